//! Coordinated-turn (CT) motion models.
//!
//! ## Kinematics
//! For turn rate ω over a step dt, with s = sin(ωdt), c = cos(ωdt):
//!
//! ```text
//! x'  = x + (s/ω)·vx − ((1−c)/ω)·vy
//! y'  = y + ((1−c)/ω)·vx + (s/ω)·vy
//! vx' = c·vx − s·vy
//! vy' = s·vx + c·vy
//! ```
//!
//! Below [`MIN_TURN_RATE`] both models fall back to constant velocity to keep
//! the `1/ω` terms finite.

use crate::error::{Error, Result};
use crate::linalg::{Matrix, Vector};
use crate::motion::{ConstantVelocity2D, MotionModel, NonlinearMotionModel};
use serde::{Deserialize, Serialize};

/// |ω| below which the turn degenerates to straight-line motion (rad/s).
pub const MIN_TURN_RATE: f64 = 1e-6;

/// Index of ω in the CT-EKF state `[x, y, vx, vy, ω]`.
pub const OMEGA_INDEX: usize = 4;

/// Write the 4×4 CT kinematic block into the top-left corner of `f`.
fn write_turn_block(f: &mut Matrix, omega: f64, dt: f64) {
    if omega.abs() < MIN_TURN_RATE {
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        return;
    }
    let (s, c) = (omega * dt).sin_cos();
    let (so, co) = (s / omega, (1.0 - c) / omega);
    f[(0, 2)] = so;
    f[(0, 3)] = -co;
    f[(1, 2)] = co;
    f[(1, 3)] = so;
    f[(2, 2)] = c;
    f[(2, 3)] = -s;
    f[(3, 2)] = s;
    f[(3, 3)] = c;
}

// ---------------------------------------------------------------------------
// Fixed turn rate (linear)
// ---------------------------------------------------------------------------

/// CT with a known, constant turn rate over state `[x, y, vx, vy]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatedTurn {
    pub q: f64,
    /// Turn rate in rad/s, positive counter-clockwise.
    pub omega: f64,
}

impl CoordinatedTurn {
    pub fn new(q: f64, omega: f64) -> Self {
        Self { q, omega }
    }

    fn is_straight(&self) -> bool {
        self.omega.abs() < MIN_TURN_RATE
    }
}

impl MotionModel for CoordinatedTurn {
    fn state_dim(&self) -> usize {
        4
    }

    fn transition(&self, dt: f64) -> Matrix {
        let mut f = Matrix::identity(4);
        write_turn_block(&mut f, self.omega, dt);
        f
    }

    /// Diagonal placeholder: q·dt² on positions, q·dt on velocities.
    /// A straight-line turn uses the CV noise so the two models coincide.
    fn process_noise(&self, dt: f64) -> Matrix {
        if self.is_straight() {
            return ConstantVelocity2D::new(self.q).process_noise(dt);
        }
        let (p, v) = (self.q * dt * dt, self.q * dt);
        Matrix::from_diagonal(&[p, p, v, v])
    }
}

// ---------------------------------------------------------------------------
// Estimated turn rate (nonlinear, for the EKF)
// ---------------------------------------------------------------------------

/// CT over state `[x, y, vx, vy, ω]` where ω is itself estimated.
///
/// Propagation uses the state's current ω and holds ω constant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatedTurnEkf {
    pub q: f64,
}

impl CoordinatedTurnEkf {
    pub fn new(q: f64) -> Self {
        Self { q }
    }

    /// The 5×5 transition matrix for a given ω, with ω carried unchanged.
    pub fn transition_for(omega: f64, dt: f64) -> Matrix {
        let mut f = Matrix::identity(5);
        write_turn_block(&mut f, omega, dt);
        f
    }
}

impl NonlinearMotionModel for CoordinatedTurnEkf {
    fn state_dim(&self) -> usize {
        5
    }

    fn propagate(&self, x: &Vector, dt: f64) -> Result<Vector> {
        let omega = x
            .get(OMEGA_INDEX)
            .ok_or_else(|| Error::mismatch("CoordinatedTurnEkf::propagate", (5, 1), (x.len(), 1)))?;
        Self::transition_for(omega, dt).mul_vec(x)
    }

    fn process_noise(&self, dt: f64) -> Matrix {
        let (p, v) = (self.q * dt * dt, self.q * dt);
        Matrix::from_diagonal(&[p, p, v, v, v])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
