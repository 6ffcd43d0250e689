//! Track: one object identity estimated by a horizontal and a vertical
//! channel, plus lifecycle bookkeeping.
//!
//! The two axes are estimated independently; no horizontal/vertical
//! cross-correlation is modelled, so the combined covariance is
//! block-diagonal.

use crate::channel::{AdaptiveChannel, SwitchThresholds};
use crate::error::Result;
use crate::horizontal::{HorizontalChannel, HorizontalMode};
use crate::linalg::{Matrix, Vector};
use crate::types::TrackId;
use crate::vertical::{VerticalChannel, VerticalMode};

/// A single tracked object.
#[derive(Clone, Debug)]
pub struct Track {
    id: TrackId,
    horizontal: HorizontalChannel,
    vertical: VerticalChannel,
    /// Time of the last accepted measurement
    last_update_time: f64,
    /// Time of birth
    born_at: f64,
    /// Consecutive cycles without a matched measurement
    coast_count: u32,
    /// Total number of updates
    total_hits: u32,
    /// Set by gating when this track absorbed a measurement in the current cycle
    matched: bool,
}

/// Read-only view of a track for consumers outside the estimator.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSnapshot {
    pub id: TrackId,
    /// Horizontal state followed by vertical state (layout depends on modes)
    pub state: Vector,
    /// Block-diagonal covariance matching `state`
    pub covariance: Matrix,
    pub horizontal_mode: HorizontalMode,
    pub vertical_mode: VerticalMode,
    pub last_update_time: f64,
    pub coast_count: u32,
}

impl Track {
    pub fn new(
        id: TrackId,
        horizontal: HorizontalChannel,
        vertical: VerticalChannel,
        birth_time: f64,
    ) -> Self {
        Self {
            id,
            horizontal,
            vertical,
            last_update_time: birth_time,
            born_at: birth_time,
            coast_count: 0,
            total_hits: 1,
            matched: false,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn horizontal(&self) -> &HorizontalChannel {
        &self.horizontal
    }

    pub fn horizontal_mut(&mut self) -> &mut HorizontalChannel {
        &mut self.horizontal
    }

    pub fn vertical(&self) -> &VerticalChannel {
        &self.vertical
    }

    pub fn vertical_mut(&mut self) -> &mut VerticalChannel {
        &mut self.vertical
    }

    pub fn last_update_time(&self) -> f64 {
        self.last_update_time
    }

    pub fn born_at(&self) -> f64 {
        self.born_at
    }

    pub fn coast_count(&self) -> u32 {
        self.coast_count
    }

    pub fn total_hits(&self) -> u32 {
        self.total_hits
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }

    /// Predicted / estimated horizontal position.
    pub fn position_2d(&self) -> (f64, f64) {
        self.horizontal.position()
    }

    pub fn predict(&mut self, dt: f64) -> Result<()> {
        self.horizontal.predict(dt)?;
        self.vertical.predict(dt)
    }

    /// Correct whichever channel has a measurement and stamp `time`.
    ///
    /// `None` on an axis is a missed detection on that axis. All or nothing:
    /// if either axis fails, both channels and the timestamp are left as
    /// they were.
    pub fn update(&mut self, xy: Option<&Vector>, z: Option<&Vector>, time: f64) -> Result<()> {
        let mut horizontal = self.horizontal.clone();
        if let Some(xy) = xy {
            horizontal.update(xy)?;
        }
        if let Some(z) = z {
            self.vertical.update(z)?;
        }
        self.horizontal = horizontal;
        self.last_update_time = time;
        Ok(())
    }

    /// Horizontal state followed by vertical state.
    pub fn full_state(&self) -> Vector {
        self.horizontal.state().concat(self.vertical.state())
    }

    /// Block-diagonal covariance of [`Track::full_state`].
    pub fn full_covariance(&self) -> Matrix {
        Matrix::block_diagonal(self.horizontal.covariance(), self.vertical.covariance())
    }

    /// Run one adaptation pass on both channels.
    pub fn adapt_modes(&mut self, thresholds: &SwitchThresholds) -> Result<()> {
        self.horizontal
            .adapt(thresholds.turn_up, thresholds.turn_down, thresholds.min_dwell)?;
        self.vertical
            .adapt(thresholds.accel_up, thresholds.accel_down, thresholds.min_dwell)?;
        Ok(())
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            state: self.full_state(),
            covariance: self.full_covariance(),
            horizontal_mode: self.horizontal.mode(),
            vertical_mode: self.vertical.mode(),
            last_update_time: self.last_update_time,
            coast_count: self.coast_count,
        }
    }

    pub(crate) fn begin_cycle(&mut self) {
        self.matched = false;
    }

    /// Call after the track absorbed a measurement.
    pub(crate) fn register_hit(&mut self) {
        self.matched = true;
        self.coast_count = 0;
        self.total_hits = self.total_hits.saturating_add(1);
    }

    /// Mark a newborn track as accounted for in the current cycle.
    pub(crate) fn register_birth(&mut self) {
        self.matched = true;
    }

    /// Age the track if nothing matched it this cycle.
    pub(crate) fn age(&mut self) {
        if !self.matched {
            self.coast_count = self.coast_count.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horizontal::HorizontalConfig;
    use crate::vertical::VerticalConfig;

    fn track() -> Track {
        let h = HorizontalChannel::new(
            Vector::from_slice(&[0.0, 0.0, 20.0, 0.0]),
            Matrix::identity(4).scale(500.0),
            HorizontalConfig::default(),
        )
        .unwrap();
        let v = VerticalChannel::new(
            Vector::from_slice(&[100.0, 0.0]),
            Matrix::identity(2).scale(200.0),
            VerticalConfig::default(),
        )
        .unwrap();
        Track::new(TrackId(1), h, v, 0.0)
    }

    #[test]
    fn full_state_concatenates_axes() {
        let t = track();
        assert_eq!(t.full_state().as_slice(), &[0.0, 0.0, 20.0, 0.0, 100.0, 0.0]);
        let p = t.full_covariance();
        assert_eq!(p.shape(), (6, 6));
        assert_eq!(p[(0, 4)], 0.0);
        assert_eq!(p[(4, 4)], 200.0);
    }

    #[test]
    fn layout_follows_modes() {
        let mut t = track();
        t.horizontal_mut().force_ct().unwrap();
        t.vertical_mut().force_ca().unwrap();
        let snap = t.snapshot();
        assert_eq!(snap.state.len(), 8);
        assert_eq!(snap.covariance.shape(), (8, 8));
        assert_eq!(snap.horizontal_mode, HorizontalMode::Ct);
        assert_eq!(snap.vertical_mode, VerticalMode::Ca);
    }

    #[test]
    fn update_with_missing_axis() {
        let mut t = track();
        t.predict(1.0).unwrap();
        let z_before = t.vertical().state().clone();
        t.update(Some(&Vector::from_slice(&[21.0, 0.5])), None, 1.0)
            .unwrap();
        assert_eq!(t.vertical().state(), &z_before);
        assert_eq!(t.last_update_time(), 1.0);

        t.predict(1.0).unwrap();
        t.update(None, Some(&Vector::from_slice(&[101.0])), 2.0)
            .unwrap();
        assert_eq!(t.last_update_time(), 2.0);
        assert!(t.vertical().altitude() > 100.0);
    }

    #[test]
    fn failed_update_keeps_timestamp() {
        let mut t = track();
        let err = t.update(Some(&Vector::from_slice(&[1.0])), None, 5.0);
        assert!(err.is_err());
        assert_eq!(t.last_update_time(), 0.0);
    }

    #[test]
    fn vertical_failure_rolls_back_horizontal() {
        let v = VerticalChannel::new(
            Vector::from_slice(&[100.0, 0.0]),
            Matrix::identity(2).scale(1e-12),
            VerticalConfig {
                q_cv: 0.0,
                r: Matrix::zeros(1, 1),
                ..Default::default()
            },
        )
        .unwrap();
        let mut t = Track::new(TrackId(1), track().horizontal().clone(), v, 0.0);
        t.predict(1.0).unwrap();
        let x_before = t.horizontal().state().clone();
        let z_before = t.vertical().state().clone();

        let err = t
            .update(
                Some(&Vector::from_slice(&[25.0, 0.0])),
                Some(&Vector::from_slice(&[100.0])),
                1.0,
            )
            .unwrap_err();
        assert!(err.is_singular());
        assert_eq!(t.horizontal().state(), &x_before);
        assert_eq!(t.horizontal().last_nis(), None);
        assert_eq!(t.horizontal().updates_in_mode(), 0);
        assert_eq!(t.vertical().state(), &z_before);
        assert_eq!(t.last_update_time(), 0.0);
    }

    #[test]
    fn coast_bookkeeping() {
        let mut t = track();
        t.begin_cycle();
        t.age();
        t.age();
        assert_eq!(t.coast_count(), 2);
        t.begin_cycle();
        t.register_hit();
        t.age();
        assert_eq!(t.coast_count(), 0);
        assert!(t.is_matched());
        assert_eq!(t.total_hits(), 2);
    }
}
