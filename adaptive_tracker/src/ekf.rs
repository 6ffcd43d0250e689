//! Extended Kalman Filter (EKF) implementation.
//!
//! Unlike the standard KF, the EKF propagates the state through a nonlinear
//! model and linearizes it with a Jacobian evaluated at the current estimate.
//! The Jacobian is computed by forward differences, one extra model
//! evaluation per state dimension, which is cheap for the small states used
//! here. Measurements stay linear, so the update is the shared KF correction.

use crate::error::{check_dt, Result};
use crate::kf::{check_state, correct, Filter, Innovation, Observation};
use crate::linalg::{Matrix, Vector};
use crate::motion::NonlinearMotionModel;
use tracing::trace;

/// Perturbation used for the finite-difference Jacobian.
pub const JACOBIAN_EPS: f64 = 1e-5;

/// Forward-difference Jacobian of `model.propagate` at `x`.
///
/// Column `j` is `(f(x + ε·eⱼ, dt) − f(x, dt)) / ε`.
pub fn numerical_jacobian<M: NonlinearMotionModel>(
    model: &M,
    x: &Vector,
    dt: f64,
) -> Result<Matrix> {
    let n = x.len();
    let fx = model.propagate(x, dt)?;
    let mut jac = Matrix::zeros(fx.len(), n);
    for j in 0..n {
        let mut perturbed = x.clone();
        perturbed[j] += JACOBIAN_EPS;
        let column = model
            .propagate(&perturbed, dt)?
            .sub(&fx)?
            .scale(1.0 / JACOBIAN_EPS);
        jac.set_column(j, &column)?;
    }
    Ok(jac)
}

/// Extended Kalman filter driven by a [`NonlinearMotionModel`].
#[derive(Clone, Debug)]
pub struct ExtendedKalmanFilter<M> {
    model: M,
    x: Vector,
    p: Matrix,
    obs: Observation,
}

impl<M: NonlinearMotionModel> ExtendedKalmanFilter<M> {
    pub fn new(x0: Vector, p0: Matrix, model: M, h: Matrix, r: Matrix) -> Result<Self> {
        let dim = model.state_dim();
        check_state(&x0, &p0, dim)?;
        let obs = Observation::new(h, r, dim)?;
        Ok(Self {
            model,
            x: x0,
            p: p0,
            obs,
        })
    }

    /// Jacobian of the motion model at the current state for a step `dt`.
    pub fn jacobian(&self, dt: f64) -> Result<Matrix> {
        numerical_jacobian(&self.model, &self.x, dt)
    }
}

impl<M: NonlinearMotionModel> Filter for ExtendedKalmanFilter<M> {
    fn predict(&mut self, dt: f64) -> Result<()> {
        check_dt(dt)?;
        let x_pred = self.model.propagate(&self.x, dt)?;
        let f = self.jacobian(dt)?;
        let q = self.model.process_noise(dt);
        let p = f.congruence(&self.p)?.add(&q)?;
        trace!(dt, trace = p.trace(), "ekf predict");
        self.x = x_pred;
        self.p = p;
        Ok(())
    }

    fn update(&mut self, z: &Vector) -> Result<Innovation> {
        let c = correct(&self.x, &self.p, z, &self.obs)?;
        trace!(nis = c.innovation.nis, "ekf update");
        self.x = c.state;
        self.p = c.cov;
        Ok(c.innovation)
    }

    fn state(&self) -> &Vector {
        &self.x
    }

    fn covariance(&self) -> &Matrix {
        &self.p
    }

    fn measurement_dim(&self) -> usize {
        self.obs.h.nrows()
    }
}
