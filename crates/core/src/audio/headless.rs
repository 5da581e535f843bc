//! In-process audio backend without an output device.
//!
//! Tracks what a decoder would be doing from the injected time source and the
//! durations declared in the route. Used by the command line player and by
//! tests, which can also inject load failures and decoder skew.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use crate::{mapping::RouteMap, timeline::TimeSource, RadioError, Result};

use super::{AudioBackend, LoadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessHandle(u64);

#[derive(Debug)]
struct Track {
    url: String,
    duration: f64,
    ready_at: Instant,
    failure: Option<String>,
    playing_since: Option<Instant>,
    /// Offset accumulated before `playing_since`.
    offset: f64,
    volume: f32,
}

#[derive(Debug)]
pub struct HeadlessBackend<T: TimeSource> {
    time: T,
    load_latency: Duration,
    durations: HashMap<String, f64>,
    failing: HashSet<String>,
    tracks: HashMap<HeadlessHandle, Track>,
    loads: HashMap<String, usize>,
    next_id: u64,
}

impl<T: TimeSource> HeadlessBackend<T> {
    pub fn new(time: T) -> Self {
        Self {
            time,
            load_latency: Duration::ZERO,
            durations: HashMap::new(),
            failing: HashSet::new(),
            tracks: HashMap::new(),
            loads: HashMap::new(),
            next_id: 0,
        }
    }

    /// Backend that knows the duration of every resource in `route`.
    pub fn for_route(time: T, route: &RouteMap) -> Self {
        let mut backend = Self::new(time);
        for resource in route.segments().iter().flat_map(|s| &s.resources) {
            backend
                .durations
                .insert(resource.url.clone(), resource.duration);
        }
        backend
    }

    pub fn with_load_latency(mut self, latency: Duration) -> Self {
        self.load_latency = latency;
        self
    }

    /// Every later load of `url` fails.
    pub fn fail_url(&mut self, url: impl Into<String>) {
        self.failing.insert(url.into());
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    /// Shifts the decoder position of the live track for `url`.
    pub fn skew(&mut self, url: &str, seconds: f64) {
        if let Some(handle) = self.handle_for(url) {
            if let Some(track) = self.tracks.get_mut(&handle) {
                track.offset += seconds;
            }
        }
    }

    /// Most recently loaded live handle for `url`.
    pub fn handle_for(&self, url: &str) -> Option<HeadlessHandle> {
        self.tracks
            .iter()
            .filter(|(_, track)| track.url == url)
            .map(|(handle, _)| *handle)
            .max_by_key(|handle| handle.0)
    }

    pub fn load_count(&self, url: &str) -> usize {
        self.loads.get(url).copied().unwrap_or(0)
    }

    pub fn live_handles(&self) -> usize {
        self.tracks.len()
    }

    pub fn volume_of(&self, handle: HeadlessHandle) -> Option<f32> {
        self.tracks.get(&handle).map(|track| track.volume)
    }

    pub fn is_playing(&self, handle: HeadlessHandle) -> bool {
        self.tracks
            .get(&handle)
            .is_some_and(|track| track.playing_since.is_some())
    }

    fn position_of(&self, track: &Track) -> f64 {
        let running = track
            .playing_since
            .map(|since| self.time.now().saturating_duration_since(since).as_secs_f64())
            .unwrap_or(0.0);
        (track.offset + running).min(track.duration)
    }
}

impl<T: TimeSource> AudioBackend for HeadlessBackend<T> {
    type Handle = HeadlessHandle;

    fn load(&mut self, url: &str) -> Result<HeadlessHandle> {
        let duration = *self
            .durations
            .get(url)
            .ok_or_else(|| RadioError::load(url, "unknown resource"))?;

        *self.loads.entry(url.to_string()).or_default() += 1;
        let handle = HeadlessHandle(self.next_id);
        self.next_id += 1;
        let failure = self
            .failing
            .contains(url)
            .then(|| "simulated decode failure".to_string());
        self.tracks.insert(
            handle,
            Track {
                url: url.to_string(),
                duration,
                ready_at: self.time.now() + self.load_latency,
                failure,
                playing_since: None,
                offset: 0.0,
                volume: 1.0,
            },
        );
        tracing::trace!(%url, ?handle, "headless load");
        Ok(handle)
    }

    fn poll_load(&mut self, handle: HeadlessHandle) -> LoadStatus {
        let Some(track) = self.tracks.get(&handle) else {
            return LoadStatus::Failed("released".to_string());
        };
        if self.time.now() < track.ready_at {
            return LoadStatus::Pending;
        }
        match &track.failure {
            Some(reason) => LoadStatus::Failed(reason.clone()),
            None => LoadStatus::Ready,
        }
    }

    fn play(&mut self, handle: HeadlessHandle) {
        let now = self.time.now();
        if let Some(track) = self.tracks.get_mut(&handle) {
            track.playing_since.get_or_insert(now);
        }
    }

    fn pause(&mut self, handle: HeadlessHandle) {
        let Some(position) = self.tracks.get(&handle).map(|t| self.position_of(t)) else {
            return;
        };
        if let Some(track) = self.tracks.get_mut(&handle) {
            track.offset = position;
            track.playing_since = None;
        }
    }

    fn seek(&mut self, handle: HeadlessHandle, offset: f64) {
        let now = self.time.now();
        if let Some(track) = self.tracks.get_mut(&handle) {
            track.offset = offset.clamp(0.0, track.duration);
            if track.playing_since.is_some() {
                track.playing_since = Some(now);
            }
        }
    }

    fn elapsed(&self, handle: HeadlessHandle) -> f64 {
        self.tracks
            .get(&handle)
            .map(|track| self.position_of(track))
            .unwrap_or(0.0)
    }

    fn has_ended(&self, handle: HeadlessHandle) -> bool {
        self.tracks.get(&handle).is_some_and(|track| {
            track.playing_since.is_some() && self.position_of(track) >= track.duration
        })
    }

    fn set_volume(&mut self, handle: HeadlessHandle, volume: f32) {
        if let Some(track) = self.tracks.get_mut(&handle) {
            track.volume = volume;
        }
    }

    fn release(&mut self, handle: HeadlessHandle) {
        self.tracks.remove(&handle);
    }
}
