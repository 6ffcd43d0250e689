//! Adaptive mode-switching channels.
//!
//! A channel estimates one axis group (horizontal x/y or vertical z) with
//! exactly one active filter, and can swap between a simple motion model and a
//! richer one of higher state order. A swap is a dimension change, not a
//! parameter tweak: the state and covariance are carried across with a
//! selection matrix so retained components and their cross-covariances are
//! preserved exactly.
//!
//! ## Expansion (n → n+1)
//! `T = [Iₙ; 0]`, `x' = T·x`, `P' = T·P·Tᵀ`, then the new diagonal entry
//! receives a fixed prior variance.
//!
//! ## Projection (n+1 → n)
//! `S = [Iₙ 0]`, `x' = S·x`, `P' = S·P·Sᵀ`.

use crate::error::{Error, Result};
use crate::kf::Innovation;
use crate::linalg::{Matrix, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(n+1) × n` expansion matrix that zero-fills the appended component.
pub fn expansion_matrix(n: usize) -> Matrix {
    let mut t = Matrix::zeros(n + 1, n);
    for i in 0..n {
        t[(i, i)] = 1.0;
    }
    t
}

/// `n × (n+1)` projection matrix that drops the last component.
pub fn projection_matrix(n: usize) -> Matrix {
    let mut s = Matrix::zeros(n, n + 1);
    for i in 0..n {
        s[(i, i)] = 1.0;
    }
    s
}

/// Append one zero-valued component with variance `prior_variance`.
pub fn expand_state(x: &Vector, p: &Matrix, prior_variance: f64) -> Result<(Vector, Matrix)> {
    let n = x.len();
    let t = expansion_matrix(n);
    let x_new = t.mul_vec(x)?;
    let mut p_new = t.congruence(p)?;
    p_new[(n, n)] += prior_variance;
    Ok((x_new, p_new))
}

/// Drop the last component and its covariance row/column.
pub fn project_state(x: &Vector, p: &Matrix) -> Result<(Vector, Matrix)> {
    let n = x.len();
    if n == 0 {
        return Err(Error::UnsupportedShape { rows: 0, cols: 1 });
    }
    let s = projection_matrix(n - 1);
    Ok((s.mul_vec(x)?, s.congruence(p)?))
}

/// Thresholds for automatic mode adaptation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchThresholds {
    /// Horizontal CV→CT when the last NIS exceeds this.
    pub turn_up: f64,
    /// Horizontal CT→CV when |ω| (rad/s) falls below this.
    pub turn_down: f64,
    /// Vertical CV→CA when the last NIS exceeds this.
    pub accel_up: f64,
    /// Vertical CA→CV when |a| (m/s²) falls below this.
    pub accel_down: f64,
    /// Updates a channel must spend in its rich mode before switching down.
    pub min_dwell: u32,
}

impl Default for SwitchThresholds {
    fn default() -> Self {
        Self {
            turn_up: 9.21, // χ²(0.99, 2)
            turn_down: 0.01,
            accel_up: 6.63, // χ²(0.99, 1)
            accel_down: 0.1,
            min_dwell: 3,
        }
    }
}

/// A filter slot that switches deterministically between a simple and a rich
/// motion model.
pub trait AdaptiveChannel {
    type Mode: Copy + Eq + fmt::Debug + fmt::Display;

    fn mode(&self) -> Self::Mode;

    /// True while the simple (lower-order) model is active.
    fn is_simple(&self) -> bool;

    fn predict(&mut self, dt: f64) -> Result<()>;

    fn update(&mut self, z: &Vector) -> Result<Innovation>;

    fn state(&self) -> &Vector;

    fn covariance(&self) -> &Matrix;

    fn measurement_dim(&self) -> usize;

    /// Estimated quantity that only the rich model carries (turn rate,
    /// acceleration); zero while the simple model is active.
    fn kinematic_metric(&self) -> f64;

    /// NIS of the most recent update in the current mode.
    fn last_nis(&self) -> Option<f64>;

    /// Updates applied since the last mode switch.
    fn updates_in_mode(&self) -> u32;

    /// Switch to the rich model. No-op if already there.
    fn force_up(&mut self) -> Result<()>;

    /// Switch to the simple model. No-op if already there.
    fn force_down(&mut self) -> Result<()>;

    /// In the simple mode, switch up when `|metric| > threshold`.
    fn maybe_switch_up(&mut self, metric: f64, threshold: f64) -> Result<bool> {
        if self.is_simple() && metric.abs() > threshold {
            self.force_up()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// In the rich mode, switch down when `|metric| < threshold`.
    fn maybe_switch_down(&mut self, metric: f64, threshold: f64) -> Result<bool> {
        if !self.is_simple() && metric.abs() < threshold {
            self.force_down()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// One adaptation pass: the last NIS drives switching up, the rich
    /// model's own estimate drives switching down once `min_dwell` updates
    /// have been absorbed. Returns the new mode if a switch happened.
    fn adapt(&mut self, up: f64, down: f64, min_dwell: u32) -> Result<Option<Self::Mode>> {
        if self.is_simple() {
            let nis = self.last_nis().unwrap_or(0.0);
            if self.maybe_switch_up(nis, up)? {
                return Ok(Some(self.mode()));
            }
        } else if self.updates_in_mode() >= min_dwell {
            let metric = self.kinematic_metric();
            if self.maybe_switch_down(metric, down)? {
                return Ok(Some(self.mode()));
            }
        }
        Ok(None)
    }
}
