//! `adaptive_tracker` — Adaptive multi-model Kalman tracking core.
//!
//! # Module layout
//! - [`linalg`]        — Fallible vector / matrix wrappers over nalgebra
//! - [`motion`]        — Constant-velocity and constant-acceleration models
//! - [`turn`]          — Coordinated-turn models (fixed ω and ω-in-state)
//! - [`kf`]            — Linear Kalman filter (predict / Joseph update)
//! - [`ekf`]           — Extended Kalman filter with numerical Jacobian
//! - [`channel`]       — State expansion / projection and the adaptive channel trait
//! - [`horizontal`]    — CV↔CT horizontal channel
//! - [`vertical`]      — CV↔CA vertical channel
//! - [`types`]         — Track ids and detections
//! - [`track`]         — Track struct and lifecycle bookkeeping
//! - [`track_manager`] — Gating, birth, coasting, deletion
//! - [`error`]         — Error type shared by every layer

pub mod channel;
pub mod ekf;
pub mod error;
pub mod horizontal;
pub mod kf;
pub mod linalg;
pub mod motion;
pub mod track;
pub mod track_manager;
pub mod turn;
pub mod types;
pub mod vertical;

pub use channel::{AdaptiveChannel, SwitchThresholds};
pub use error::{Error, Result};
pub use horizontal::{HorizontalChannel, HorizontalConfig, HorizontalMode};
pub use ekf::ExtendedKalmanFilter;
pub use kf::{Filter, Innovation, KalmanFilter};
pub use linalg::{Matrix, Vector};
pub use track::{Track, TrackSnapshot};
pub use track_manager::{CycleReport, GatingPolicy, TrackManager, TrackManagerConfig};
pub use types::{Detection, TrackId};
pub use vertical::{VerticalChannel, VerticalConfig, VerticalMode};
