//! Emotion Session State
//!
//! Turns per-frame classifier output into presence, absence and session-end
//! decisions for one camera, and accumulates the emotion and demographic
//! history of the subject in front of it.

mod config;
mod policy;
mod state;
mod summary;

pub use config::TimingConfig;
pub use policy::{process_frame, FrameDecision, Observation};
pub use state::CameraState;
pub use summary::{satisfaction_score, CategoryPercentages, EmotionSummary};
