//! Horizontal channel: x/y kinematics switching between constant velocity
//! (linear KF, `[x, y, vx, vy]`) and coordinated turn with an estimated turn
//! rate (EKF, `[x, y, vx, vy, ω]`).

use crate::channel::{expand_state, project_state, AdaptiveChannel};
use crate::ekf::ExtendedKalmanFilter;
use crate::error::{Error, Result};
use crate::kf::{Filter, Innovation, KalmanFilter};
use crate::linalg::{Matrix, Vector};
use crate::motion::ConstantVelocity2D;
use crate::turn::{CoordinatedTurnEkf, OMEGA_INDEX};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Active horizontal motion model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HorizontalMode {
    /// Constant velocity, 4 states
    Cv,
    /// Coordinated turn with estimated ω, 5 states
    Ct,
}

impl fmt::Display for HorizontalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HorizontalMode::Cv => write!(f, "CV"),
            HorizontalMode::Ct => write!(f, "CT"),
        }
    }
}

/// Configuration for a [`HorizontalChannel`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizontalConfig {
    /// CV process noise intensity
    pub q_cv: f64,
    /// CT process noise intensity
    pub q_ct: f64,
    /// Prior variance given to ω when switching CV→CT (rad²/s²)
    pub turn_rate_variance: f64,
    /// 2×4 observation matrix used in CV mode
    pub h_cv: Matrix,
    /// 2×5 observation matrix used in CT mode
    pub h_ct: Matrix,
    /// 2×2 measurement noise, shared by both modes
    pub r: Matrix,
}

/// `[I₂ 0]` with `dim` columns: observe x and y.
pub(crate) fn position_observation(dim: usize) -> Matrix {
    let mut h = Matrix::zeros(2, dim);
    h[(0, 0)] = 1.0;
    h[(1, 1)] = 1.0;
    h
}

impl Default for HorizontalConfig {
    fn default() -> Self {
        Self {
            q_cv: 1.0,
            q_ct: 1.0,
            turn_rate_variance: 0.01,
            h_cv: position_observation(4),
            h_ct: position_observation(5),
            r: Matrix::from_diagonal(&[9.0, 9.0]), // 3 m std dev
        }
    }
}

impl HorizontalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.h_cv.ncols() != 4 {
            return Err(Error::mismatch("HorizontalConfig::h_cv", self.h_cv.shape(), (2, 4)));
        }
        if self.h_ct.shape() != (self.h_cv.nrows(), 5) {
            return Err(Error::mismatch(
                "HorizontalConfig::h_ct",
                self.h_ct.shape(),
                (self.h_cv.nrows(), 5),
            ));
        }
        let m = self.h_cv.nrows();
        if self.r.shape() != (m, m) {
            return Err(Error::mismatch("HorizontalConfig::r", self.r.shape(), (m, m)));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum HorizontalFilter {
    Cv(KalmanFilter<ConstantVelocity2D>),
    Ct(ExtendedKalmanFilter<CoordinatedTurnEkf>),
}

impl HorizontalFilter {
    fn get(&self) -> &dyn Filter {
        match self {
            HorizontalFilter::Cv(kf) => kf,
            HorizontalFilter::Ct(ekf) => ekf,
        }
    }

    fn get_mut(&mut self) -> &mut dyn Filter {
        match self {
            HorizontalFilter::Cv(kf) => kf,
            HorizontalFilter::Ct(ekf) => ekf,
        }
    }
}

/// Horizontal CV↔CT channel. Starts in CV.
#[derive(Clone, Debug)]
pub struct HorizontalChannel {
    filter: HorizontalFilter,
    config: HorizontalConfig,
    last_nis: Option<f64>,
    updates_in_mode: u32,
}

impl HorizontalChannel {
    /// Create a CV-mode channel from a 4-state `[x, y, vx, vy]` prior.
    pub fn new(x0: Vector, p0: Matrix, config: HorizontalConfig) -> Result<Self> {
        config.validate()?;
        let kf = KalmanFilter::new(
            x0,
            p0,
            ConstantVelocity2D::new(config.q_cv),
            config.h_cv.clone(),
            config.r.clone(),
        )?;
        Ok(Self {
            filter: HorizontalFilter::Cv(kf),
            config,
            last_nis: None,
            updates_in_mode: 0,
        })
    }

    pub fn config(&self) -> &HorizontalConfig {
        &self.config
    }

    /// Estimated turn rate; zero in CV mode.
    pub fn turn_rate(&self) -> f64 {
        match &self.filter {
            HorizontalFilter::Cv(_) => 0.0,
            HorizontalFilter::Ct(ekf) => ekf.state()[OMEGA_INDEX],
        }
    }

    /// Estimated `(x, y)`.
    pub fn position(&self) -> (f64, f64) {
        let x = self.state();
        (x[0], x[1])
    }

    /// Estimated `(vx, vy)`.
    pub fn velocity(&self) -> (f64, f64) {
        let x = self.state();
        (x[2], x[3])
    }

    pub fn force_ct(&mut self) -> Result<()> {
        self.force_up()
    }

    pub fn force_cv(&mut self) -> Result<()> {
        self.force_down()
    }

    fn to_ct(&self, kf: &KalmanFilter<ConstantVelocity2D>) -> Result<HorizontalFilter> {
        let (x, p) = expand_state(kf.state(), kf.covariance(), self.config.turn_rate_variance)?;
        let ekf = ExtendedKalmanFilter::new(
            x,
            p,
            CoordinatedTurnEkf::new(self.config.q_ct),
            self.config.h_ct.clone(),
            self.config.r.clone(),
        )?;
        Ok(HorizontalFilter::Ct(ekf))
    }

    fn to_cv(&self, ekf: &ExtendedKalmanFilter<CoordinatedTurnEkf>) -> Result<HorizontalFilter> {
        let (x, p) = project_state(ekf.state(), ekf.covariance())?;
        let kf = KalmanFilter::new(
            x,
            p,
            ConstantVelocity2D::new(self.config.q_cv),
            self.config.h_cv.clone(),
            self.config.r.clone(),
        )?;
        Ok(HorizontalFilter::Cv(kf))
    }

    fn switched(&mut self, filter: HorizontalFilter) {
        self.filter = filter;
        self.last_nis = None;
        self.updates_in_mode = 0;
        debug!(mode = %self.mode(), "horizontal mode switch");
    }
}

impl AdaptiveChannel for HorizontalChannel {
    type Mode = HorizontalMode;

    fn mode(&self) -> HorizontalMode {
        match self.filter {
            HorizontalFilter::Cv(_) => HorizontalMode::Cv,
            HorizontalFilter::Ct(_) => HorizontalMode::Ct,
        }
    }

    fn is_simple(&self) -> bool {
        matches!(self.filter, HorizontalFilter::Cv(_))
    }

    fn predict(&mut self, dt: f64) -> Result<()> {
        self.filter.get_mut().predict(dt)
    }

    fn update(&mut self, z: &Vector) -> Result<Innovation> {
        let innovation = self.filter.get_mut().update(z)?;
        self.last_nis = Some(innovation.nis);
        self.updates_in_mode = self.updates_in_mode.saturating_add(1);
        Ok(innovation)
    }

    fn state(&self) -> &Vector {
        self.filter.get().state()
    }

    fn covariance(&self) -> &Matrix {
        self.filter.get().covariance()
    }

    fn measurement_dim(&self) -> usize {
        self.filter.get().measurement_dim()
    }

    fn kinematic_metric(&self) -> f64 {
        self.turn_rate()
    }

    fn last_nis(&self) -> Option<f64> {
        self.last_nis
    }

    fn updates_in_mode(&self) -> u32 {
        self.updates_in_mode
    }

    fn force_up(&mut self) -> Result<()> {
        if let HorizontalFilter::Cv(kf) = &self.filter {
            let ct = self.to_ct(kf)?;
            self.switched(ct);
        }
        Ok(())
    }

    fn force_down(&mut self) -> Result<()> {
        if let HorizontalFilter::Ct(ekf) = &self.filter {
            let cv = self.to_cv(ekf)?;
            self.switched(cv);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn channel() -> HorizontalChannel {
        HorizontalChannel::new(
            Vector::from_slice(&[0.0, 0.0, 20.0, 0.0]),
            Matrix::identity(4).scale(500.0),
            HorizontalConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn starts_in_cv() {
        let ch = channel();
        assert_eq!(ch.mode(), HorizontalMode::Cv);
        assert_eq!(ch.state().len(), 4);
        assert_eq!(ch.turn_rate(), 0.0);
    }

    #[test]
    fn cv_ct_cv_round_trip_preserves_shared_state() {
        let mut ch = channel();
        for k in 1..=5 {
            ch.predict(1.0).unwrap();
            ch.update(&Vector::from_slice(&[20.0 * k as f64, 0.5 * k as f64]))
                .unwrap();
        }
        let x_before = ch.state().clone();
        let p_before = ch.covariance().clone();

        assert!(ch.maybe_switch_up(1.0, 0.5).unwrap());
        assert_eq!(ch.mode(), HorizontalMode::Ct);
        assert_eq!(ch.state().len(), 5);
        assert_eq!(ch.state()[OMEGA_INDEX], 0.0);
        assert_abs_diff_eq!(ch.covariance()[(4, 4)], 0.01);

        assert!(ch.maybe_switch_down(0.0, 0.5).unwrap());
        assert_eq!(ch.mode(), HorizontalMode::Cv);
        assert_abs_diff_eq!(
            ch.state().as_dvector(),
            x_before.as_dvector(),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            ch.covariance().as_dmatrix(),
            p_before.as_dmatrix(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn thresholds_gate_switching() {
        let mut ch = channel();
        assert!(!ch.maybe_switch_up(0.4, 0.5).unwrap());
        assert!(!ch.maybe_switch_down(0.0, 0.5).unwrap(), "already CV");
        assert!(ch.maybe_switch_up(-0.6, 0.5).unwrap(), "magnitude is compared");
        assert!(!ch.maybe_switch_up(10.0, 0.5).unwrap(), "already CT");
        assert!(!ch.maybe_switch_down(0.7, 0.5).unwrap());
        assert_eq!(ch.mode(), HorizontalMode::Ct);
    }

    #[test]
    fn forced_switches_are_idempotent() {
        let mut ch = channel();
        ch.force_cv().unwrap();
        assert_eq!(ch.mode(), HorizontalMode::Cv);
        ch.force_ct().unwrap();
        ch.force_ct().unwrap();
        assert_eq!(ch.mode(), HorizontalMode::Ct);
        assert_eq!(ch.measurement_dim(), 2);
    }

    #[test]
    fn ct_mode_learns_turn_rate() {
        let config = HorizontalConfig {
            q_ct: 0.01,
            ..Default::default()
        };
        let mut ch = HorizontalChannel::new(
            Vector::from_slice(&[0.0, 0.0, 20.0, 0.0]),
            Matrix::identity(4).scale(10.0),
            config,
        )
        .unwrap();
        ch.force_ct().unwrap();
        let model = CoordinatedTurnEkf::new(0.0);
        let mut truth = Vector::from_slice(&[0.0, 0.0, 20.0, 0.0, 0.1]);
        use crate::motion::NonlinearMotionModel;
        for _ in 0..25 {
            truth = model.propagate(&truth, 1.0).unwrap();
            ch.predict(1.0).unwrap();
            ch.update(&Vector::from_slice(&[truth[0], truth[1]])).unwrap();
        }
        assert!(ch.turn_rate() > 0.05, "turn rate {}", ch.turn_rate());
    }

    #[test]
    fn adapt_respects_dwell() {
        let mut ch = channel();
        ch.predict(1.0).unwrap();
        // Far from the predicted position → large NIS
        ch.update(&Vector::from_slice(&[20.0, 200.0])).unwrap();
        assert_eq!(ch.adapt(9.21, 0.01, 2).unwrap(), Some(HorizontalMode::Ct));
        // ω = 0 but no updates yet in CT mode
        assert_eq!(ch.adapt(9.21, 0.01, 2).unwrap(), None);
        assert_eq!(ch.mode(), HorizontalMode::Ct);
    }

    #[test]
    fn adapt_switches_back_after_dwell() {
        let mut ch = channel();
        ch.predict(1.0).unwrap();
        ch.update(&Vector::from_slice(&[20.0, 200.0])).unwrap();
        assert_eq!(ch.adapt(9.21, 0.01, 2).unwrap(), Some(HorizontalMode::Ct));
        assert_eq!(ch.state().len(), 5);

        // Measurements on the predicted position keep ω at zero
        for _ in 0..2 {
            ch.predict(1.0).unwrap();
            let z = Vector::from_slice(&[ch.state()[0], ch.state()[1]]);
            ch.update(&z).unwrap();
            assert_eq!(ch.turn_rate(), 0.0);
        }
        assert_eq!(ch.updates_in_mode(), 2);
        assert_eq!(ch.adapt(9.21, 0.01, 2).unwrap(), Some(HorizontalMode::Cv));
        assert_eq!(ch.state().len(), 4);
        assert_eq!(ch.covariance().shape(), (4, 4));
        assert_eq!(ch.updates_in_mode(), 0);
    }

    #[test]
    fn rejects_mismatched_config() {
        let config = HorizontalConfig {
            r: Matrix::identity(3),
            ..Default::default()
        };
        let res = HorizontalChannel::new(Vector::zeros(4), Matrix::identity(4), config);
        assert!(res.is_err());
    }

    #[test]
    fn update_rejects_wrong_measurement_length() {
        let mut ch = channel();
        let err = ch.update(&Vector::from_slice(&[1.0])).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(ch.last_nis(), None);
    }
}
