//! Core library for the Route Radio application.
//!
//! An always-on radio that plays a looping journey. Every listener derives
//! the same cycle position from the local time of day; the position is then
//! mapped onto route segments, each carrying a geographic path, a sequence of
//! audio files and a pool of visuals. Each module owns one subsystem (clock,
//! mapping, audio sync, visual selection) and [`Radio`] wires them together.

pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod mapping;
pub mod media;
pub mod radio;
pub mod scene;
pub mod timeline;

pub use assets::PrefetchCache;
pub use audio::{
    AudioBackend, AudioSyncEngine, HeadlessBackend, LoadStatus, SlotState, SyncOutcome,
};
pub use config::{AudioResource, RadioConfig, RouteConfig, SegmentConfig, VisualPool};
pub use error::{RadioError, Result};
pub use events::{AudioEvent, MediaChange, PositionUpdate, RadioEvent, SegmentBoundaryCrossed};
pub use geo::{haversine_km, interpolate, GeoPoint};
pub use mapping::{Context, MediaKind, PoolEntry, ResourceRef, RouteMap};
pub use media::MediaSelector;
pub use radio::{Radio, SessionState};
pub use scene::VisualSequencer;
pub use timeline::{ManualTime, RadioClock, SystemTime, TimeSource};
