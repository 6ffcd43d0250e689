//! Vertical channel: altitude kinematics switching between constant velocity
//! (`[z, vz]`) and constant acceleration (`[z, vz, az]`). Both are linear KFs.

use crate::channel::{expand_state, project_state, AdaptiveChannel};
use crate::error::{Error, Result};
use crate::kf::{Filter, Innovation, KalmanFilter};
use crate::linalg::{Matrix, Vector};
use crate::motion::{ConstantAcceleration1D, ConstantVelocity1D};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Index of the acceleration in the CA state.
const ACCEL_INDEX: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerticalMode {
    /// Constant velocity, 2 states
    Cv,
    /// Constant acceleration, 3 states
    Ca,
}

impl fmt::Display for VerticalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerticalMode::Cv => write!(f, "CV"),
            VerticalMode::Ca => write!(f, "CA"),
        }
    }
}

/// Configuration for a [`VerticalChannel`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerticalConfig {
    pub q_cv: f64,
    pub q_ca: f64,
    /// Variance added to the acceleration when switching CV→CA (m²/s⁴)
    pub acceleration_variance: f64,
    /// 1×2 observation matrix used in CV mode
    pub h_cv: Matrix,
    /// 1×3 observation matrix used in CA mode
    pub h_ca: Matrix,
    /// 1×1 measurement noise
    pub r: Matrix,
}

fn altitude_observation(dim: usize) -> Matrix {
    let mut h = Matrix::zeros(1, dim);
    h[(0, 0)] = 1.0;
    h
}

impl Default for VerticalConfig {
    fn default() -> Self {
        Self {
            q_cv: 1.0,
            q_ca: 1.0,
            acceleration_variance: 10.0,
            h_cv: altitude_observation(2),
            h_ca: altitude_observation(3),
            r: Matrix::from_diagonal(&[16.0]), // 4 m std dev
        }
    }
}

impl VerticalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.h_cv.ncols() != 2 {
            return Err(Error::mismatch("VerticalConfig::h_cv", self.h_cv.shape(), (1, 2)));
        }
        if self.h_ca.shape() != (self.h_cv.nrows(), 3) {
            return Err(Error::mismatch(
                "VerticalConfig::h_ca",
                self.h_ca.shape(),
                (self.h_cv.nrows(), 3),
            ));
        }
        let m = self.h_cv.nrows();
        if self.r.shape() != (m, m) {
            return Err(Error::mismatch("VerticalConfig::r", self.r.shape(), (m, m)));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum VerticalFilter {
    Cv(KalmanFilter<ConstantVelocity1D>),
    Ca(KalmanFilter<ConstantAcceleration1D>),
}

impl VerticalFilter {
    fn get(&self) -> &dyn Filter {
        match self {
            VerticalFilter::Cv(kf) => kf,
            VerticalFilter::Ca(kf) => kf,
        }
    }

    fn get_mut(&mut self) -> &mut dyn Filter {
        match self {
            VerticalFilter::Cv(kf) => kf,
            VerticalFilter::Ca(kf) => kf,
        }
    }
}

/// Vertical CV↔CA channel. Starts in CV.
#[derive(Clone, Debug)]
pub struct VerticalChannel {
    filter: VerticalFilter,
    config: VerticalConfig,
    last_nis: Option<f64>,
    updates_in_mode: u32,
}

impl VerticalChannel {
    /// Create a CV-mode channel from a `[z, vz]` prior.
    pub fn new(x0: Vector, p0: Matrix, config: VerticalConfig) -> Result<Self> {
        config.validate()?;
        let kf = KalmanFilter::new(
            x0,
            p0,
            ConstantVelocity1D::new(config.q_cv),
            config.h_cv.clone(),
            config.r.clone(),
        )?;
        Ok(Self {
            filter: VerticalFilter::Cv(kf),
            config,
            last_nis: None,
            updates_in_mode: 0,
        })
    }

    pub fn config(&self) -> &VerticalConfig {
        &self.config
    }

    /// Estimated vertical acceleration; zero in CV mode.
    pub fn acceleration(&self) -> f64 {
        match &self.filter {
            VerticalFilter::Cv(_) => 0.0,
            VerticalFilter::Ca(kf) => kf.state()[ACCEL_INDEX],
        }
    }

    pub fn altitude(&self) -> f64 {
        self.state()[0]
    }

    pub fn force_ca(&mut self) -> Result<()> {
        self.force_up()
    }

    pub fn force_cv(&mut self) -> Result<()> {
        self.force_down()
    }

    fn to_ca(&self, kf: &KalmanFilter<ConstantVelocity1D>) -> Result<VerticalFilter> {
        let (x, p) = expand_state(kf.state(), kf.covariance(), self.config.acceleration_variance)?;
        let ca = KalmanFilter::new(
            x,
            p,
            ConstantAcceleration1D::new(self.config.q_ca),
            self.config.h_ca.clone(),
            self.config.r.clone(),
        )?;
        Ok(VerticalFilter::Ca(ca))
    }

    fn to_cv(&self, kf: &KalmanFilter<ConstantAcceleration1D>) -> Result<VerticalFilter> {
        let (x, p) = project_state(kf.state(), kf.covariance())?;
        let cv = KalmanFilter::new(
            x,
            p,
            ConstantVelocity1D::new(self.config.q_cv),
            self.config.h_cv.clone(),
            self.config.r.clone(),
        )?;
        Ok(VerticalFilter::Cv(cv))
    }

    fn switched(&mut self, filter: VerticalFilter) {
        self.filter = filter;
        self.last_nis = None;
        self.updates_in_mode = 0;
        debug!(mode = %self.mode(), "vertical mode switch");
    }
}

impl AdaptiveChannel for VerticalChannel {
    type Mode = VerticalMode;

    fn mode(&self) -> VerticalMode {
        match self.filter {
            VerticalFilter::Cv(_) => VerticalMode::Cv,
            VerticalFilter::Ca(_) => VerticalMode::Ca,
        }
    }

    fn is_simple(&self) -> bool {
        matches!(self.filter, VerticalFilter::Cv(_))
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
        self.acceleration()
    }

    fn last_nis(&self) -> Option<f64> {
        self.last_nis
    }

    fn updates_in_mode(&self) -> u32 {
        self.updates_in_mode
    }

    fn force_up(&mut self) -> Result<()> {
        if let VerticalFilter::Cv(kf) = &self.filter {
            let ca = self.to_ca(kf)?;
            self.switched(ca);
        }
        Ok(())
    }

    fn force_down(&mut self) -> Result<()> {
        if let VerticalFilter::Ca(kf) = &self.filter {
            let cv = self.to_cv(kf)?;
            self.switched(cv);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
