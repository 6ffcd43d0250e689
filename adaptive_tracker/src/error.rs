//! Error taxonomy shared by the linear algebra, filter and tracking layers.

use thiserror::Error;

/// Errors surfaced by estimation and track-management operations.
///
/// Shape errors point at a configuration bug (mismatched H/R/state sizes) and
/// are never retried. `Singular` is the one variant a caller may reasonably
/// recover from, by skipping the update for the current cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Operand shapes disagree. Shapes are `(rows, cols)`; vectors are `(len, 1)`.
    #[error("dimension mismatch in {op}: {left:?} vs {right:?}")]
    DimensionMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    /// A matrix required for inversion is numerically singular.
    #[error("matrix is numerically singular (pivot magnitude {pivot:e})")]
    Singular { pivot: f64 },

    /// Inverse requested for a shape that has no inverse.
    #[error("inverse is not defined for a {rows}x{cols} matrix")]
    UnsupportedShape { rows: usize, cols: usize },

    /// Time step must be strictly positive and finite.
    #[error("invalid time step: {0}")]
    InvalidTimeStep(f64),

    /// Measurement carries NaN or infinite components.
    #[error("invalid measurement: {0}")]
    InvalidMeasurement(String),

    /// Inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn mismatch(op: &'static str, left: (usize, usize), right: (usize, usize)) -> Self {
        Error::DimensionMismatch { op, left, right }
    }

    /// True for [`Error::Singular`].
    pub fn is_singular(&self) -> bool {
        matches!(self, Error::Singular { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reject time steps that are zero, negative, NaN or infinite.
pub(crate) fn check_dt(dt: f64) -> Result<()> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidTimeStep(dt))
    }
}
