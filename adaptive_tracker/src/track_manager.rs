//! Track lifecycle management: gating, birth, coasting, deletion.
//!
//! # Cycle
//! Every call runs one measurement cycle, in this order:
//! 1. clear each track's matched flag
//! 2. predict every track by `dt`
//! 3. optional mode adaptation
//! 4. gate each detection; update the matched track or spawn a new one
//! 5. age every track left unmatched (`coast_count += 1`)
//! 6. delete tracks with `coast_count > max_coast`
//!
//! Predictions must reflect the current cycle before gating, so the order is
//! fixed.
//!
//! # Track Management Policy
//! - **Gating**: Euclidean distance between the predicted (x, y) and the
//!   detection, strictly below `gate_threshold`. Greedy, one candidate per
//!   detection; no joint assignment.
//! - **Birth**: a detection that gates to no track spawns one, position from
//!   the detection, zero velocity, `initial_variance · I` covariance, CV modes.
//! - **Deletion**: after more than `max_coast` consecutive unmatched cycles.
//! - **Faults**: a singular innovation skips that update (the track coasts);
//!   any other per-track error aborts only that track's cycle and is
//!   reported in [`CycleReport::faults`].

use crate::channel::SwitchThresholds;
use crate::error::{check_dt, Error, Result};
use crate::horizontal::{HorizontalChannel, HorizontalConfig};
use crate::linalg::{Matrix, Vector};
use crate::track::{Track, TrackSnapshot};
use crate::types::{Detection, TrackId};
use crate::vertical::{VerticalChannel, VerticalConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};

/// How a detection picks among the tracks inside its gate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatingPolicy {
    /// First track in id order whose prediction is inside the gate.
    FirstMatch,
    /// Closest track inside the gate; ties go to the lower id.
    #[default]
    Nearest,
}

/// Configuration for track management policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackManagerConfig {
    /// Gate radius around a track's predicted position (meters)
    pub gate_threshold: f64,
    /// Consecutive misses tolerated before deletion
    pub max_coast: u32,
    pub gating: GatingPolicy,
    /// Diagonal of the initial covariance of a newborn track
    pub initial_variance: f64,
    /// Initial altitude variance when the birth detection has no altitude
    pub initial_altitude_variance: f64,
    /// Horizontal channel settings for newborn tracks
    pub horizontal: HorizontalConfig,
    /// Vertical channel settings for newborn tracks
    pub vertical: VerticalConfig,
    /// Automatic CV↔CT / CV↔CA adaptation; disabled when `None`
    pub mode_switching: Option<SwitchThresholds>,
}

impl Default for TrackManagerConfig {
    fn default() -> Self {
        Self {
            gate_threshold: 20.0,
            max_coast: 3,
            gating: GatingPolicy::default(),
            initial_variance: 1000.0,
            initial_altitude_variance: 1.0e6,
            horizontal: HorizontalConfig {
                r: Matrix::from_diagonal(&[4.0, 4.0]), // 2 m std dev
                ..Default::default()
            },
            vertical: VerticalConfig::default(),
            mode_switching: None,
        }
    }
}

impl TrackManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.gate_threshold.is_finite() && self.gate_threshold > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "gate_threshold must be positive, got {}",
                self.gate_threshold
            )));
        }
        for (name, v) in [
            ("initial_variance", self.initial_variance),
            ("initial_altitude_variance", self.initial_altitude_variance),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::InvalidConfig(format!("{name} must be positive, got {v}")));
            }
        }
        if self.horizontal.h_cv.nrows() != 2 {
            return Err(Error::InvalidConfig("horizontal channel must observe [x, y]".into()));
        }
        if self.vertical.h_cv.nrows() != 1 {
            return Err(Error::InvalidConfig("vertical channel must observe [z]".into()));
        }
        self.horizontal.validate()?;
        self.vertical.validate()
    }
}

/// Outcome of one cycle.
#[derive(Clone, Debug, Default)]
pub struct CycleReport {
    /// Tracks born this cycle
    pub created: Vec<TrackId>,
    /// Tracks that absorbed a detection
    pub updated: Vec<TrackId>,
    /// Tracks removed after coasting too long
    pub deleted: Vec<TrackId>,
    /// Per-track errors that aborted that track's cycle
    pub faults: Vec<(TrackId, Error)>,
}

/// Owns the active tracks and their id allocation.
#[derive(Clone, Debug)]
pub struct TrackManager {
    config: TrackManagerConfig,
    tracks: BTreeMap<TrackId, Track>,
    next_id: u64,
    time: f64,
}

impl TrackManager {
    pub fn new(config: TrackManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
            time: 0.0,
        })
    }

    pub fn config(&self) -> &TrackManagerConfig {
        &self.config
    }

    /// Sum of all `dt` processed so far.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    /// Active tracks in id order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.values().map(Track::snapshot).collect()
    }

    /// One cycle with a single `[x, y]` measurement.
    pub fn process_measurement(&mut self, z: &Vector, dt: f64) -> Result<CycleReport> {
        let detection = Detection::from_xy(z)?;
        self.process_batch(std::slice::from_ref(&detection), dt)
    }

    /// One cycle with a single detection (optionally carrying altitude).
    pub fn process_detection(&mut self, detection: &Detection, dt: f64) -> Result<CycleReport> {
        self.process_batch(std::slice::from_ref(detection), dt)
    }

    /// A cycle without detections: every track coasts.
    pub fn coast_all(&mut self, dt: f64) -> Result<CycleReport> {
        self.process_batch(&[], dt)
    }

    /// One cycle over all detections of a scan.
    ///
    /// Tracks are predicted once, then detections are gated sequentially in
    /// the given order. A track absorbs at most one detection per cycle, and
    /// a track born from one detection is not offered to the next.
    ///
    /// Fails without touching any state if `dt` or a detection is invalid.
    pub fn process_batch(&mut self, detections: &[Detection], dt: f64) -> Result<CycleReport> {
        check_dt(dt)?;
        if let Some(bad) = detections.iter().find(|d| !d.is_finite()) {
            return Err(Error::InvalidMeasurement(format!("{bad:?}")));
        }

        self.time += dt;
        let mut report = CycleReport::default();
        let mut aborted = BTreeSet::new();

        self.predict_all(dt, &mut report, &mut aborted);
        if let Some(thresholds) = self.config.mode_switching {
            self.adapt_all(&thresholds, &mut report, &mut aborted);
        }

        for detection in detections {
            match self.gate(detection, &aborted) {
                Some(id) => self.apply(id, detection, &mut report, &mut aborted),
                None => {
                    let id = self.spawn(detection)?;
                    report.created.push(id);
                }
            }
        }

        for track in self.tracks.values_mut() {
            track.age();
        }
        self.prune(&mut report);
        Ok(report)
    }

    fn predict_all(&mut self, dt: f64, report: &mut CycleReport, aborted: &mut BTreeSet<TrackId>) {
        for (id, track) in self.tracks.iter_mut() {
            track.begin_cycle();
            if let Err(e) = track.predict(dt) {
                error!(track = %id, error = %e, "predict failed");
                aborted.insert(*id);
                report.faults.push((*id, e));
            }
        }
    }

    fn adapt_all(
        &mut self,
        thresholds: &SwitchThresholds,
        report: &mut CycleReport,
        aborted: &mut BTreeSet<TrackId>,
    ) {
        for (id, track) in self.tracks.iter_mut() {
            if aborted.contains(id) {
                continue;
            }
            if let Err(e) = track.adapt_modes(thresholds) {
                error!(track = %id, error = %e, "mode adaptation failed");
                aborted.insert(*id);
                report.faults.push((*id, e));
            }
        }
    }

    /// Pick the track this detection belongs to, if any.
    fn gate(&self, detection: &Detection, aborted: &BTreeSet<TrackId>) -> Option<TrackId> {
        let gate = self.config.gate_threshold;
        let mut candidates = self
            .tracks
            .values()
            .filter(|t| !t.is_matched() && !aborted.contains(&t.id()))
            .map(|t| (t.id(), detection.distance_to(t.position_2d())))
            .filter(|(_, d)| *d < gate);

        match self.config.gating {
            GatingPolicy::FirstMatch => candidates.next().map(|(id, _)| id),
            GatingPolicy::Nearest => candidates
                .fold(None, |best: Option<(TrackId, f64)>, (id, d)| match best {
                    Some((_, bd)) if bd <= d => best,
                    _ => Some((id, d)),
                })
                .map(|(id, _)| id),
        }
    }

    fn apply(
        &mut self,
        id: TrackId,
        detection: &Detection,
        report: &mut CycleReport,
        aborted: &mut BTreeSet<TrackId>,
    ) {
        let time = self.time;
        let Some(track) = self.tracks.get_mut(&id) else {
            return;
        };
        let z = detection.z();
        match track.update(Some(&detection.xy()), z.as_ref(), time) {
            Ok(()) => {
                track.register_hit();
                report.updated.push(id);
            }
            Err(e) if e.is_singular() => {
                warn!(track = %id, error = %e, "singular innovation, update skipped");
                aborted.insert(id);
            }
            Err(e) => {
                error!(track = %id, error = %e, "update failed");
                aborted.insert(id);
                report.faults.push((id, e));
            }
        }
    }

    /// Create a new tentative track from an unmatched detection.
    fn spawn(&mut self, detection: &Detection) -> Result<TrackId> {
        let id = TrackId(self.next_id);
        let var = self.config.initial_variance;
        let horizontal = HorizontalChannel::new(
            Vector::from_slice(&[detection.x, detection.y, 0.0, 0.0]),
            Matrix::identity(4).scale(var),
            self.config.horizontal.clone(),
        )?;
        let (z0, z_var) = match detection.altitude {
            Some(z) => (z, var),
            None => (0.0, self.config.initial_altitude_variance),
        };
        let vertical = VerticalChannel::new(
            Vector::from_slice(&[z0, 0.0]),
            Matrix::from_diagonal(&[z_var, var]),
            self.config.vertical.clone(),
        )?;
        let mut track = Track::new(id, horizontal, vertical, self.time);
        track.register_birth();
        self.tracks.insert(id, track);
        self.next_id += 1;
        debug!(track = %id, x = detection.x, y = detection.y, "track created");
        Ok(id)
    }

    /// Remove all tracks that coasted past the limit.
    fn prune(&mut self, report: &mut CycleReport) {
        let max_coast = self.config.max_coast;
        self.tracks.retain(|id, track| {
            let keep = track.coast_count() <= max_coast;
            if !keep {
                debug!(track = %id, coasts = track.coast_count(), "track deleted");
                report.deleted.push(*id);
            }
            keep
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
