use serde::{Deserialize, Serialize};

use crate::mapping::{Context, MediaKind};

/// Broadcast of the shared cycle position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position: f64,
    pub progress: f64,
    pub total_duration: f64,
    /// Wall-clock seconds since midnight at emission.
    pub emitted_at: f64,
}

/// A new visual item should be presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaChange {
    pub url: String,
    pub kind: MediaKind,
    pub segment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentBoundaryCrossed {
    pub previous_segment_id: String,
    pub new_segment_id: String,
}

/// Lifecycle notifications of the audio engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioEvent {
    Started { url: String, offset: f64 },
    Preloaded { url: String },
    HandedOff { from: String, to: String },
    Seeked { url: String, drift: f64 },
    Reloaded { url: String },
    LoadFailed { url: String, reason: String },
}

/// Everything one tick of the radio produced, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RadioEvent {
    Position(PositionUpdate),
    Context(Box<Context>),
    Boundary(SegmentBoundaryCrossed),
    Media(MediaChange),
    Audio(AudioEvent),
    ClockResynced { drift: f64 },
}
