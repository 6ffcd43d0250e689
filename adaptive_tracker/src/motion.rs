//! Linear motion models: constant velocity and constant acceleration.
//!
//! Each model is a pure function of `dt` producing the transition matrix F
//! and the process noise Q a Kalman filter consumes. Parameters are fixed at
//! construction.
//!
//! ## State layouts
//! - CV 1-D: `[p, v]`
//! - CV 2-D: `[x, y, vx, vy]`
//! - CA 1-D: `[p, v, a]`
//! - CA 2-D: `[x, y, vx, vy, ax, ay]`

use crate::error::Result;
use crate::linalg::{Matrix, Vector};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A linear motion model: `x_{k+1} = F(dt)·x_k + w`, `w ~ N(0, Q(dt))`.
pub trait MotionModel {
    /// Dimension of the state this model propagates.
    fn state_dim(&self) -> usize;

    /// State transition matrix F for a step of `dt` seconds.
    fn transition(&self, dt: f64) -> Matrix;

    /// Process noise covariance Q for a step of `dt` seconds.
    fn process_noise(&self, dt: f64) -> Matrix;
}

/// A nonlinear motion model: `x_{k+1} = f(x_k, dt) + w`.
///
/// The Jacobian of `f` is not part of the contract; the EKF differentiates
/// `propagate` numerically.
pub trait NonlinearMotionModel {
    fn state_dim(&self) -> usize;

    /// Nonlinear state propagation `f(x, dt)`.
    fn propagate(&self, x: &Vector, dt: f64) -> Result<Vector>;

    fn process_noise(&self, dt: f64) -> Matrix;
}

// ---------------------------------------------------------------------------
// Constant velocity
// ---------------------------------------------------------------------------

/// 1-D constant velocity with continuous white-noise acceleration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantVelocity1D {
    /// Process noise intensity.
    pub q: f64,
}

impl ConstantVelocity1D {
    pub fn new(q: f64) -> Self {
        Self { q }
    }
}

impl MotionModel for ConstantVelocity1D {
    fn state_dim(&self) -> usize {
        2
    }

    fn transition(&self, dt: f64) -> Matrix {
        let mut f = Matrix::identity(2);
        f[(0, 1)] = dt;
        f
    }

    fn process_noise(&self, dt: f64) -> Matrix {
        let q = self.q;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let mut qm = Matrix::zeros(2, 2);
        qm[(0, 0)] = q * dt3 / 3.0;
        qm[(0, 1)] = q * dt2 / 2.0;
        qm[(1, 0)] = q * dt2 / 2.0;
        qm[(1, 1)] = q * dt;
        qm
    }
}

/// 2-D constant velocity, discrete white-noise acceleration (DWNA) per axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantVelocity2D {
    pub q: f64,
}

impl ConstantVelocity2D {
    pub fn new(q: f64) -> Self {
        Self { q }
    }
}

impl MotionModel for ConstantVelocity2D {
    fn state_dim(&self) -> usize {
        4
    }

    fn transition(&self, dt: f64) -> Matrix {
        let mut f = Matrix::identity(4);
        // position += velocity * dt
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    fn process_noise(&self, dt: f64) -> Matrix {
        let q = self.q;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        // Q_pos = q·dt⁴/4, Q_pos_vel = q·dt³/2, Q_vel = q·dt²
        let mut qm = Matrix::zeros(4, 4);
        for i in 0..2usize {
            qm[(i, i)] = q * dt4 / 4.0;
            qm[(i + 2, i + 2)] = q * dt2;
            qm[(i, i + 2)] = q * dt3 / 2.0;
            qm[(i + 2, i)] = q * dt3 / 2.0;
        }
        qm
    }
}

// ---------------------------------------------------------------------------
// Constant acceleration
// ---------------------------------------------------------------------------

/// Per-axis CA noise block (piecewise-constant jerk), shared by 1-D and 2-D.
fn ca_noise_block(q: f64, dt: f64) -> [[f64; 3]; 3] {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;
    let dt5 = dt4 * dt;
    [
        [q * dt5 / 20.0, q * dt4 / 8.0, q * dt3 / 6.0],
        [q * dt4 / 8.0, q * dt3 / 3.0, q * dt2 / 2.0],
        [q * dt3 / 6.0, q * dt2 / 2.0, q * dt],
    ]
}

/// 1-D constant acceleration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantAcceleration1D {
    pub q: f64,
}

impl ConstantAcceleration1D {
    pub fn new(q: f64) -> Self {
        Self { q }
    }
}

impl MotionModel for ConstantAcceleration1D {
    fn state_dim(&self) -> usize {
        3
    }

    fn transition(&self, dt: f64) -> Matrix {
        let mut f = Matrix::identity(3);
        f[(0, 1)] = dt;
        f[(0, 2)] = 0.5 * dt * dt;
        f[(1, 2)] = dt;
        f
    }

    fn process_noise(&self, dt: f64) -> Matrix {
        let block = ca_noise_block(self.q, dt);
        let mut qm = Matrix::zeros(3, 3);
        for (r, row) in block.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                qm[(r, c)] = *v;
            }
        }
        qm
    }
}

/// 2-D constant acceleration; each axis uses the 1-D CA block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantAcceleration2D {
    pub q: f64,
}

impl ConstantAcceleration2D {
    pub fn new(q: f64) -> Self {
        Self { q }
    }
}

impl MotionModel for ConstantAcceleration2D {
    fn state_dim(&self) -> usize {
        6
    }

    fn transition(&self, dt: f64) -> Matrix {
        let half_dt2 = 0.5 * dt * dt;
        let mut f = Matrix::identity(6);
        for axis in 0..2usize {
            f[(axis, axis + 2)] = dt;
            f[(axis, axis + 4)] = half_dt2;
            f[(axis + 2, axis + 4)] = dt;
        }
        f
    }

    fn process_noise(&self, dt: f64) -> Matrix {
        let block = ca_noise_block(self.q, dt);
        let mut qm = Matrix::zeros(6, 6);
        // Axis `a` occupies indices a, a+2, a+4 (position, velocity, acceleration).
        for axis in 0..2usize {
            for (r, row) in block.iter().enumerate() {
                for (c, v) in row.iter().enumerate() {
                    qm[(axis + 2 * r, axis + 2 * c)] = *v;
                }
            }
        }
        qm
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn cv2d_integrates_velocity() {
        let m = ConstantVelocity2D::new(1.0);
        let x = Vector::from_slice(&[0.0, 0.0, 10.0, 5.0]);
        let x1 = m.transition(2.0).mul_vec(&x).unwrap();
        assert_eq!(x1.as_slice(), &[20.0, 10.0, 10.0, 5.0]);
    }

    #[test]
    fn cv1d_noise_terms() {
        let q = ConstantVelocity1D::new(2.0).process_noise(3.0);
        assert_abs_diff_eq!(q[(0, 0)], 2.0 * 27.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(0, 1)], 2.0 * 9.0 / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[(1, 1)], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn ca1d_integrates_acceleration() {
        let m = ConstantAcceleration1D::new(0.0);
        let x = Vector::from_slice(&[0.0, 1.0, 2.0]);
        let x1 = m.transition(2.0).mul_vec(&x).unwrap();
        // p = 0 + 1·2 + ½·2·4
        assert_abs_diff_eq!(x1[0], 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x1[1], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x1[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn ca2d_axes_are_decoupled() {
        let m = ConstantAcceleration2D::new(1.5);
        let q = m.process_noise(0.5);
        assert!(q.is_symmetric(0.0));
        // No x/y cross terms
        assert_eq!(q[(0, 1)], 0.0);
        assert_eq!(q[(2, 5)], 0.0);
        let q1 = ConstantAcceleration1D::new(1.5).process_noise(0.5);
        assert_abs_diff_eq!(q[(1, 5)], q1[(0, 2)], epsilon = 1e-15);
        assert_abs_diff_eq!(q[(4, 4)], q1[(2, 2)], epsilon = 1e-15);
    }

    #[test]
    fn noise_matrices_are_symmetric() {
        for dt in [0.1, 1.0, 3.7] {
            assert!(ConstantVelocity1D::new(1.0).process_noise(dt).is_symmetric(0.0));
            assert!(ConstantVelocity2D::new(1.0).process_noise(dt).is_symmetric(0.0));
            assert!(ConstantAcceleration1D::new(1.0).process_noise(dt).is_symmetric(0.0));
        }
    }
}
