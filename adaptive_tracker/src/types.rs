//! Fundamental types shared by tracks and the track manager.

use crate::error::{Error, Result};
use crate::linalg::Vector;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifier types
// ---------------------------------------------------------------------------

/// Track identity, assigned once by the owning manager.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// One sensor report: a horizontal position fix and an optional altitude.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    /// `None` when the sensor reported no altitude this cycle.
    pub altitude: Option<f64>,
}

impl Detection {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, altitude: None }
    }

    pub fn with_altitude(x: f64, y: f64, altitude: f64) -> Self {
        Self {
            x,
            y,
            altitude: Some(altitude),
        }
    }

    /// Build from a 2-D `[x, y]` measurement vector.
    pub fn from_xy(z: &Vector) -> Result<Self> {
        if z.len() != 2 {
            return Err(Error::mismatch("Detection::from_xy", (z.len(), 1), (2, 1)));
        }
        Ok(Self::new(z[0], z[1]))
    }

    pub fn xy(&self) -> Vector {
        Vector::from_slice(&[self.x, self.y])
    }

    pub fn z(&self) -> Option<Vector> {
        self.altitude.map(|a| Vector::from_slice(&[a]))
    }

    /// Euclidean distance in the horizontal plane.
    pub fn distance_to(&self, (x, y): (f64, f64)) -> f64 {
        (self.x - x).hypot(self.y - y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.altitude.map_or(true, f64::is_finite)
    }
}
