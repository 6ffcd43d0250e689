//! Kalman filter: predict and update steps.
//!
//! # Design choices
//! - A filter owns its state `x`, covariance `P`, observation matrix `H` and
//!   measurement noise `R`. Predict/update replace `x` and `P` wholesale.
//! - The correction step is shared by the linear and extended filters since
//!   measurements are always a linear projection of the state.
//! - Covariance update uses the Joseph form
//!   `P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ`, then symmetrizes, so `P` stays
//!   symmetric positive semi-definite under rounding.
//! - A failed step leaves the filter untouched.

use crate::error::{check_dt, Error, Result};
use crate::linalg::{Matrix, Vector};
use crate::motion::MotionModel;
use tracing::trace;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A recursive estimator with a predict/update cycle.
pub trait Filter {
    /// Propagate state and covariance forward by `dt` seconds.
    fn predict(&mut self, dt: f64) -> Result<()>;

    /// Correct the state with measurement `z`.
    fn update(&mut self, z: &Vector) -> Result<Innovation>;

    fn state(&self) -> &Vector;

    fn covariance(&self) -> &Matrix;

    /// Expected measurement length (rows of H).
    fn measurement_dim(&self) -> usize;
}

/// Byproducts of an update step.
#[derive(Clone, Debug)]
pub struct Innovation {
    /// Innovation y = z − H·x
    pub residual: Vector,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub covariance: Matrix,
    /// Kalman gain K
    pub gain: Matrix,
    /// Normalised innovation squared yᵀ·S⁻¹·y
    pub nis: f64,
}

/// Linear observation model shared by every mode of a channel.
#[derive(Clone, Debug)]
pub(crate) struct Observation {
    pub h: Matrix,
    pub r: Matrix,
}

impl Observation {
    /// Validate `H` against the state dimension and `R` against `H`.
    pub fn new(h: Matrix, r: Matrix, state_dim: usize) -> Result<Self> {
        if h.ncols() != state_dim {
            return Err(Error::mismatch("Observation::H", h.shape(), (state_dim, 1)));
        }
        if r.shape() != (h.nrows(), h.nrows()) {
            return Err(Error::mismatch("Observation::R", r.shape(), (h.nrows(), h.nrows())));
        }
        Ok(Self { h, r })
    }
}

/// Check that `x`/`P` agree with each other and with `dim`.
pub(crate) fn check_state(x: &Vector, p: &Matrix, dim: usize) -> Result<()> {
    if x.len() != dim {
        return Err(Error::mismatch("filter state", (x.len(), 1), (dim, 1)));
    }
    if p.shape() != (dim, dim) {
        return Err(Error::mismatch("filter covariance", p.shape(), (dim, dim)));
    }
    Ok(())
}

/// Posterior produced by [`correct`].
pub(crate) struct Correction {
    pub state: Vector,
    pub cov: Matrix,
    pub innovation: Innovation,
}

/// Linear correction step against observation `obs`.
pub(crate) fn correct(x: &Vector, p: &Matrix, z: &Vector, obs: &Observation) -> Result<Correction> {
    let (h, r) = (&obs.h, &obs.r);
    if z.len() != h.nrows() {
        return Err(Error::mismatch("measurement", (z.len(), 1), (h.nrows(), 1)));
    }

    // Innovation: y = z − H·x
    let residual = z.sub(&h.mul_vec(x)?)?;

    // Innovation covariance: S = H·P·Hᵀ + R
    let ht = h.transpose();
    let s = h.congruence(p)?.add(r)?;
    let s_inv = s.inverse()?;

    // Kalman gain: K = P·Hᵀ·S⁻¹
    let k = p.mul(&ht)?.mul(&s_inv)?;

    // x' = x + K·y
    let state = x.add(&k.mul_vec(&residual)?)?;

    // Joseph form
    let i_kh = Matrix::identity(p.nrows()).sub(&k.mul(h)?)?;
    let cov = i_kh.congruence(p)?.add(&k.congruence(r)?)?.symmetrize()?;

    let nis = residual.dot(&s_inv.mul_vec(&residual)?)?;

    Ok(Correction {
        state,
        cov,
        innovation: Innovation {
            residual,
            covariance: s,
            gain: k,
            nis,
        },
    })
}

// ---------------------------------------------------------------------------
// Linear Kalman filter
// ---------------------------------------------------------------------------

/// Linear Kalman filter driven by a [`MotionModel`].
#[derive(Clone, Debug)]
pub struct KalmanFilter<M> {
    model: M,
    x: Vector,
    p: Matrix,
    obs: Observation,
}

impl<M: MotionModel> KalmanFilter<M> {
    /// Fails with `DimensionMismatch` unless `x0`, `p0`, `h`, `r` and the
    /// model agree on the state and measurement dimensions.
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
}

impl<M: MotionModel> Filter for KalmanFilter<M> {
    fn predict(&mut self, dt: f64) -> Result<()> {
        check_dt(dt)?;
        let f = self.model.transition(dt);
        let q = self.model.process_noise(dt);
        let x = f.mul_vec(&self.x)?;
        let p = f.congruence(&self.p)?.add(&q)?;
        trace!(dt, trace = p.trace(), "kf predict");
        self.x = x;
        self.p = p;
        Ok(())
    }

    fn update(&mut self, z: &Vector) -> Result<Innovation> {
        let c = correct(&self.x, &self.p, z, &self.obs)?;
        trace!(nis = c.innovation.nis, "kf update");
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{ConstantAcceleration2D, ConstantVelocity2D};
    use approx::assert_abs_diff_eq;

    fn h_xy(dim: usize) -> Matrix {
        let mut h = Matrix::zeros(2, dim);
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }

    fn cv_filter(x0: &[f64], q: f64, p0: f64) -> KalmanFilter<ConstantVelocity2D> {
        KalmanFilter::new(
            Vector::from_slice(x0),
            Matrix::identity(4).scale(p0),
            ConstantVelocity2D::new(q),
            h_xy(4),
            Matrix::identity(2).scale(4.0),
        )
        .unwrap()
    }

    #[test]
    fn predict_constant_velocity() {
        let mut kf = cv_filter(&[0.0, 0.0, 10.0, 5.0], 0.0, 1.0);
        kf.predict(1.0).unwrap();
        assert_eq!(kf.state().as_slice(), &[10.0, 5.0, 10.0, 5.0]);
    }

    #[test]
    fn zero_noise_predict_never_shrinks_variance_and_is_reproducible() {
        let x0 = [3.0, -2.0, 1.5, 0.25];
        let mut a = cv_filter(&x0, 0.0, 7.0);
        let mut b = cv_filter(&x0, 0.0, 7.0);
        let before: Vec<f64> = (0..4).map(|i| a.covariance()[(i, i)]).collect();
        a.predict(0.5).unwrap();
        b.predict(0.5).unwrap();
        for (i, prior) in before.iter().enumerate() {
            assert!(a.covariance()[(i, i)] >= *prior);
        }
        assert_eq!(a.state(), b.state());
        assert_eq!(a.covariance(), b.covariance());
    }

    #[test]
    fn update_reduces_uncertainty() {
        let mut kf = cv_filter(&[100.0, 50.0, 5.0, 2.0], 1.0, 100.0);
        let prior_trace = kf.covariance().trace();
        let innov = kf.update(&Vector::from_slice(&[101.0, 51.0])).unwrap();
        assert!(kf.covariance().trace() < prior_trace, "Update should reduce uncertainty");
        assert!(kf.covariance().is_symmetric(1e-12));
        assert_eq!(innov.residual.as_slice(), &[1.0, 1.0]);
        assert!(innov.nis > 0.0);
        // Pulled towards the measurement
        assert!(kf.state()[0] > 100.0 && kf.state()[0] < 101.0);
    }

    #[test]
    fn joseph_matches_simple_form_for_optimal_gain() {
        let mut kf = cv_filter(&[0.0, 0.0, 1.0, 1.0], 1.0, 10.0);
        let p = kf.covariance().clone();
        let innov = kf.update(&Vector::from_slice(&[0.5, -0.5])).unwrap();
        let simple = Matrix::identity(4)
            .sub(&innov.gain.mul(&h_xy(4)).unwrap())
            .unwrap()
            .mul(&p)
            .unwrap();
        assert_abs_diff_eq!(
            kf.covariance().as_dmatrix(),
            simple.as_dmatrix(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn update_rejects_wrong_measurement_length() {
        let mut kf = cv_filter(&[0.0; 4], 1.0, 1.0);
        let before = kf.state().clone();
        let err = kf.update(&Vector::from_slice(&[1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(kf.state(), &before);
    }

    #[test]
    fn singular_innovation_leaves_filter_untouched() {
        let mut kf = KalmanFilter::new(
            Vector::zeros(4),
            Matrix::zeros(4, 4),
            ConstantVelocity2D::new(0.0),
            h_xy(4),
            Matrix::zeros(2, 2),
        )
        .unwrap();
        let err = kf.update(&Vector::from_slice(&[1.0, 1.0])).unwrap_err();
        assert!(err.is_singular());
        assert_eq!(kf.state(), &Vector::zeros(4));
    }

    #[test]
    fn three_dimensional_measurement_uses_general_inverse() {
        let mut h = Matrix::zeros(3, 6);
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h[(2, 2)] = 1.0;
        let mut kf = KalmanFilter::new(
            Vector::zeros(6),
            Matrix::identity(6).scale(10.0),
            ConstantAcceleration2D::new(1.0),
            h,
            Matrix::identity(3),
        )
        .unwrap();
        kf.update(&Vector::from_slice(&[1.0, 2.0, 3.0])).unwrap();
        assert!(kf.state()[2] > 0.0);
    }

    #[test]
    fn constructor_validates_shapes() {
        let bad_h = KalmanFilter::new(
            Vector::zeros(4),
            Matrix::identity(4),
            ConstantVelocity2D::new(1.0),
            h_xy(5),
            Matrix::identity(2),
        );
        assert!(bad_h.is_err());
        let bad_r = KalmanFilter::new(
            Vector::zeros(4),
            Matrix::identity(4),
            ConstantVelocity2D::new(1.0),
            h_xy(4),
            Matrix::identity(3),
        );
        assert!(bad_r.is_err());
        let bad_x = KalmanFilter::new(
            Vector::zeros(3),
            Matrix::identity(4),
            ConstantVelocity2D::new(1.0),
            h_xy(4),
            Matrix::identity(2),
        );
        assert!(bad_x.is_err());
    }

    #[test]
    fn predict_rejects_bad_dt() {
        let mut kf = cv_filter(&[0.0; 4], 1.0, 1.0);
        assert_eq!(kf.predict(0.0), Err(Error::InvalidTimeStep(0.0)));
    }
}
