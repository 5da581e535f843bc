//! Audio synchronization engine.
//!
//! Keeps a decoder playing the resource the broadcast position points at. The
//! engine owns two slots: the resource that is playing and a preload of the
//! one after it, which is promoted on natural end for a gapless handoff.
//! A periodic sync pass corrects drift with a seek, or with a full reload when
//! the position has moved to another resource altogether.

pub mod headless;

use std::{fmt, time::Instant};

use crate::{
    config::RadioConfig,
    events::AudioEvent,
    mapping::{ResourceRef, RouteMap},
    timeline::IntervalTimer,
    Result,
};

pub use headless::{HeadlessBackend, HeadlessHandle};

/// Progress of an asynchronous load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Ready,
    Failed(String),
}

/// Seam to the decoder that actually produces sound.
///
/// `load` only begins loading; readiness is observed through `poll_load` on
/// later ticks. Operations on released or unknown handles are ignored.
pub trait AudioBackend {
    type Handle: Copy + Eq + fmt::Debug;

    fn load(&mut self, url: &str) -> Result<Self::Handle>;
    fn poll_load(&mut self, handle: Self::Handle) -> LoadStatus;
    fn play(&mut self, handle: Self::Handle);
    fn pause(&mut self, handle: Self::Handle);
    fn seek(&mut self, handle: Self::Handle, offset: f64);
    /// Seconds of the resource that have been played.
    fn elapsed(&self, handle: Self::Handle) -> f64;
    fn has_ended(&self, handle: Self::Handle) -> bool;
    fn set_volume(&mut self, handle: Self::Handle, volume: f32);
    fn release(&mut self, handle: Self::Handle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Loaded and waiting to be started.
    Idle,
    Loading,
    Playing,
}

#[derive(Debug, Clone)]
struct Slot<H> {
    resource: ResourceRef,
    url: String,
    handle: H,
    state: SlotState,
}

/// What a sync pass did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    InSync { drift: f64 },
    Seeked { drift: f64 },
    Reloaded,
    /// A load is in flight, or the engine is paused or not active.
    Skipped,
}

pub struct AudioSyncEngine<B: AudioBackend> {
    backend: B,
    current: Option<Slot<B::Handle>>,
    next: Option<Slot<B::Handle>>,
    volume: f32,
    paused: bool,
    active: bool,
    drift_tolerance: f64,
    sync_timer: IntervalTimer,
    events: Vec<AudioEvent>,
}

impl<B: AudioBackend> AudioSyncEngine<B> {
    pub fn new(backend: B, config: &RadioConfig) -> Self {
        Self {
            backend,
            current: None,
            next: None,
            volume: config.volume.clamp(0.0, 1.0),
            paused: false,
            active: false,
            drift_tolerance: config.audio_drift_tolerance_secs,
            sync_timer: IntervalTimer::new(config.audio_sync_interval()),
            events: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_resource(&self) -> Option<ResourceRef> {
        self.current.as_ref().map(|slot| slot.resource)
    }

    pub fn current_state(&self) -> Option<SlotState> {
        self.current.as_ref().map(|slot| slot.state)
    }

    pub fn preloaded_resource(&self) -> Option<ResourceRef> {
        self.next.as_ref().map(|slot| slot.resource)
    }

    pub fn preloaded_state(&self) -> Option<SlotState> {
        self.next.as_ref().map(|slot| slot.state)
    }

    /// Starts playback of whatever `position` maps to, at the matching offset.
    pub fn start_at(&mut self, route: &RouteMap, position: f64, now: Instant) -> Result<()> {
        let context = route.context_at_wrapped(position)?;
        self.active = true;
        if !self.sync_timer.is_armed() {
            self.sync_timer.arm(now);
        }

        if let Some(slot) = self.current.take() {
            self.backend.release(slot.handle);
        }

        let promotable = self
            .next
            .as_ref()
            .is_some_and(|slot| slot.resource == context.resource);
        if promotable {
            self.current = self.next.take();
        } else if let Some(url) = route.resource(context.resource).map(|r| r.url.clone()) {
            self.current = self.begin_load(context.resource, url);
        }

        let ready = self
            .current
            .as_ref()
            .is_some_and(|slot| slot.state == SlotState::Idle);
        if ready {
            self.begin_playback(route, context.offset_in_file);
        }
        Ok(())
    }

    /// Advances load states, hands off on natural end and runs the periodic
    /// sync pass. Returns the events produced since the last call.
    pub fn poll(
        &mut self,
        route: &RouteMap,
        position: f64,
        now: Instant,
    ) -> Result<Vec<AudioEvent>> {
        if self.active {
            self.poll_current(route, position, now)?;
            self.poll_preload();

            let ended = self.current.as_ref().is_some_and(|slot| {
                slot.state == SlotState::Playing && self.backend.has_ended(slot.handle)
            });
            if ended {
                self.handoff(route, position, now)?;
            }

            if self.sync_timer.poll(now) {
                self.sync(route, position, now)?;
            }
        }
        Ok(std::mem::take(&mut self.events))
    }

    /// Compares the decoder with the position and corrects it: a seek for a
    /// small offset error, a full reload when the resource itself is wrong.
    pub fn sync(&mut self, route: &RouteMap, position: f64, now: Instant) -> Result<SyncOutcome> {
        if !self.active || self.paused || self.reload_in_flight() {
            return Ok(SyncOutcome::Skipped);
        }

        let context = route.context_at_wrapped(position)?;
        let loaded = self
            .current
            .as_ref()
            .filter(|slot| slot.resource == context.resource)
            .map(|slot| slot.handle);

        let Some(handle) = loaded else {
            tracing::debug!(
                expected = %context.audio_url,
                loaded = ?self.current.as_ref().map(|slot| &slot.url),
                "audio resource mismatch, reloading"
            );
            self.events.push(AudioEvent::Reloaded {
                url: context.audio_url.clone(),
            });
            self.start_at(route, position, now)?;
            return Ok(SyncOutcome::Reloaded);
        };

        let drift = self.backend.elapsed(handle) - context.offset_in_file;
        if drift.abs() <= self.drift_tolerance {
            return Ok(SyncOutcome::InSync { drift });
        }

        tracing::debug!(
            url = %context.audio_url,
            drift,
            expected = context.offset_in_file,
            "audio drift exceeded, seeking"
        );
        self.backend.seek(handle, context.offset_in_file);
        self.events.push(AudioEvent::Seeked {
            url: context.audio_url,
            drift,
        });
        Ok(SyncOutcome::Seeked { drift })
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        for slot in self.current.iter().chain(self.next.iter()) {
            self.backend.set_volume(slot.handle, self.volume);
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
        if let Some(slot) = &self.current {
            self.backend.pause(slot.handle);
        }
    }

    /// Resumes at the live position rather than where playback paused.
    pub fn resume(&mut self, route: &RouteMap, position: f64, now: Instant) -> Result<()> {
        if !self.paused {
            return Ok(());
        }
        self.paused = false;
        if let Some(slot) = &self.current {
            if slot.state == SlotState::Playing {
                self.backend.play(slot.handle);
            }
        }
        self.sync(route, position, now)?;
        Ok(())
    }

    /// Halts playback and releases both slots.
    pub fn teardown(&mut self) {
        for slot in self.current.take().into_iter().chain(self.next.take()) {
            self.backend.release(slot.handle);
        }
        self.active = false;
        self.paused = false;
        self.sync_timer.cancel();
        self.events.clear();
        tracing::info!("audio engine stopped");
    }

    fn reload_in_flight(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|slot| slot.state == SlotState::Loading)
    }

    fn begin_load(&mut self, resource: ResourceRef, url: String) -> Option<Slot<B::Handle>> {
        match self.backend.load(&url) {
            Ok(handle) => {
                self.backend.set_volume(handle, self.volume);
                // Cached or local resources may be ready straight away.
                let state = match self.backend.poll_load(handle) {
                    LoadStatus::Ready => SlotState::Idle,
                    LoadStatus::Pending => SlotState::Loading,
                    LoadStatus::Failed(reason) => {
                        tracing::warn!(%url, %reason, "audio load failed");
                        self.backend.release(handle);
                        self.events.push(AudioEvent::LoadFailed { url, reason });
                        return None;
                    }
                };
                Some(Slot {
                    resource,
                    url,
                    handle,
                    state,
                })
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "audio load failed");
                self.events.push(AudioEvent::LoadFailed {
                    url,
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    fn begin_playback(&mut self, route: &RouteMap, offset: f64) {
        let Some(slot) = self.current.as_mut() else {
            return;
        };
        self.backend.seek(slot.handle, offset);
        if !self.paused {
            self.backend.play(slot.handle);
        }
        slot.state = SlotState::Playing;
        tracing::info!(url = %slot.url, offset, "audio started");
        self.events.push(AudioEvent::Started {
            url: slot.url.clone(),
            offset,
        });
        let resource = slot.resource;
        self.preload_after(route, resource);
    }

    fn preload_after(&mut self, route: &RouteMap, resource: ResourceRef) {
        let target = route.next_resource(resource);
        if self.next.as_ref().is_some_and(|slot| slot.resource == target) {
            return;
        }
        if let Some(stale) = self.next.take() {
            self.backend.release(stale.handle);
        }
        if let Some(url) = route.resource(target).map(|r| r.url.clone()) {
            self.next = self.begin_load(target, url);
        }
    }

    fn poll_current(&mut self, route: &RouteMap, position: f64, now: Instant) -> Result<()> {
        let Some(slot) = self.current.as_ref().filter(|s| s.state == SlotState::Loading) else {
            return Ok(());
        };
        let (handle, resource) = (slot.handle, slot.resource);

        match self.backend.poll_load(handle) {
            LoadStatus::Pending => Ok(()),
            LoadStatus::Ready => {
                // Absorb the load latency: seek to where the broadcast is now.
                let context = route.context_at_wrapped(position)?;
                if context.resource == resource {
                    if let Some(slot) = self.current.as_mut() {
                        slot.state = SlotState::Idle;
                    }
                    self.begin_playback(route, context.offset_in_file);
                    Ok(())
                } else {
                    self.start_at(route, position, now)
                }
            }
            LoadStatus::Failed(reason) => {
                if let Some(slot) = self.current.take() {
                    tracing::warn!(url = %slot.url, %reason, "audio load failed");
                    self.backend.release(slot.handle);
                    self.events.push(AudioEvent::LoadFailed {
                        url: slot.url,
                        reason,
                    });
                }
                Ok(())
            }
        }
    }

    fn poll_preload(&mut self) {
        let Some(slot) = self.next.as_ref().filter(|s| s.state == SlotState::Loading) else {
            return;
        };
        match self.backend.poll_load(slot.handle) {
            LoadStatus::Pending => {}
            LoadStatus::Ready => {
                if let Some(slot) = self.next.as_mut() {
                    slot.state = SlotState::Idle;
                    tracing::debug!(url = %slot.url, "audio preloaded");
                    self.events.push(AudioEvent::Preloaded {
                        url: slot.url.clone(),
                    });
                }
            }
            LoadStatus::Failed(reason) => {
                if let Some(slot) = self.next.take() {
                    tracing::warn!(url = %slot.url, %reason, "audio preload failed");
                    self.backend.release(slot.handle);
                    self.events.push(AudioEvent::LoadFailed {
                        url: slot.url,
                        reason,
                    });
                }
            }
        }
    }

    fn handoff(&mut self, route: &RouteMap, position: f64, now: Instant) -> Result<()> {
        let Some(finished) = self.current.take() else {
            return Ok(());
        };
        self.backend.release(finished.handle);

        let expected_next = route.next_resource(finished.resource);
        let preloaded = self
            .next
            .as_ref()
            .is_some_and(|slot| slot.resource == expected_next && slot.state == SlotState::Idle);

        if preloaded {
            self.current = self.next.take();
            if let Some(slot) = &self.current {
                tracing::debug!(from = %finished.url, to = %slot.url, "gapless handoff");
                self.events.push(AudioEvent::HandedOff {
                    from: finished.url.clone(),
                    to: slot.url.clone(),
                });
            }
            self.begin_playback(route, 0.0);
            return Ok(());
        }

        tracing::debug!(url = %finished.url, "next resource not ready, cold reload");
        self.start_at(route, position, now)
    }
}

impl<B: AudioBackend> fmt::Debug for AudioSyncEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSyncEngine")
            .field("current", &self.current)
            .field("next", &self.next)
            .field("volume", &self.volume)
            .field("paused", &self.paused)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::{AudioResource, RouteConfig, SegmentConfig, VisualPool},
        timeline::{ManualTime, TimeSource},
        GeoPoint,
    };

    fn route() -> RouteMap {
        let segment = |id: &str, durations: &[f64]| SegmentConfig {
            id: id.to_string(),
            name: id.to_string(),
            path: vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)],
            audio: durations
                .iter()
                .enumerate()
                .map(|(i, duration)| AudioResource {
                    url: format!("{id}-{i}.mp3"),
                    duration: *duration,
                })
                .collect(),
            visuals: VisualPool::default(),
        };
        RouteMap::process(&RouteConfig {
            segments: vec![segment("a", &[60.0, 60.0]), segment("b", &[120.0])],
        })
        .unwrap()
    }

    type TestEngine = AudioSyncEngine<HeadlessBackend<ManualTime>>;

    fn engine(latency_ms: u64) -> (ManualTime, RouteMap, TestEngine) {
        let time = ManualTime::new(0.0);
        let route = route();
        let backend = HeadlessBackend::for_route(time.clone(), &route)
            .with_load_latency(Duration::from_millis(latency_ms));
        let engine = AudioSyncEngine::new(backend, &RadioConfig::default());
        (time, route, engine)
    }

    #[test]
    fn starts_at_mapped_offset_once_loaded() {
        let (time, route, mut engine) = engine(200);
        engine.start_at(&route, 70.0, time.now()).unwrap();
        assert_eq!(engine.current_state(), Some(SlotState::Loading));

        time.advance(0.2);
        let events = engine.poll(&route, 70.2, time.now()).unwrap();

        assert_eq!(engine.current_state(), Some(SlotState::Playing));
        assert!(events.iter().any(|event| matches!(
            event,
            AudioEvent::Started { url, offset } if url == "a-1.mp3" && (offset - 10.2).abs() < 1e-6
        )));
        assert_eq!(
            engine.preloaded_resource(),
            Some(ResourceRef { segment: 1, resource: 0 })
        );
    }

    #[test]
    fn hands_off_gaplessly_to_preloaded_resource() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 55.0, time.now()).unwrap();
        engine.poll(&route, 55.0, time.now()).unwrap();
        engine.poll(&route, 55.0, time.now()).unwrap();
        assert_eq!(engine.preloaded_state(), Some(SlotState::Idle));

        time.advance(5.0);
        let events = engine.poll(&route, 60.0, time.now()).unwrap();

        assert!(events.contains(&AudioEvent::HandedOff {
            from: "a-0.mp3".to_string(),
            to: "a-1.mp3".to_string(),
        }));
        assert_eq!(engine.backend().load_count("a-1.mp3"), 1);
        assert_eq!(
            engine.current_resource(),
            Some(ResourceRef { segment: 0, resource: 1 })
        );
        // The finished decoder is released, not parked in an ended state.
        assert_eq!(engine.current_state(), Some(SlotState::Playing));
        assert!(engine.backend().handle_for("a-0.mp3").is_none());
    }

    #[test]
    fn last_resource_preloads_first_of_route() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 150.0, time.now()).unwrap();
        assert_eq!(
            engine.preloaded_resource(),
            Some(ResourceRef { segment: 0, resource: 0 })
        );
    }

    #[test]
    fn cold_reloads_when_preload_is_missing() {
        let (time, route, mut engine) = engine(0);
        engine.backend_mut().fail_url("a-1.mp3");
        engine.start_at(&route, 58.0, time.now()).unwrap();
        let events = engine.poll(&route, 58.0, time.now()).unwrap();
        assert!(events
            .iter()
            .any(|event| matches!(event, AudioEvent::LoadFailed { url, .. } if url == "a-1.mp3")));
        assert_eq!(engine.preloaded_resource(), None);

        time.advance(2.0);
        engine.poll(&route, 60.0, time.now()).unwrap();
        // The cold reload also fails; playback is idle but the engine lives on.
        assert_eq!(engine.current_resource(), None);

        engine.backend_mut().clear_failures();
        time.advance(3.0);
        let events = engine.poll(&route, 63.0, time.now()).unwrap();
        assert!(events.contains(&AudioEvent::Reloaded {
            url: "a-1.mp3".to_string()
        }));
    }

    #[test]
    fn small_drift_seeks_without_reload() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 10.0, time.now()).unwrap();
        engine.backend_mut().skew("a-0.mp3", -0.8);

        let outcome = engine.sync(&route, 10.0, time.now()).unwrap();

        assert!(matches!(outcome, SyncOutcome::Seeked { drift } if (drift + 0.8).abs() < 1e-6));
        assert_eq!(engine.backend().load_count("a-0.mp3"), 1);
        let handle = engine.backend().handle_for("a-0.mp3").unwrap();
        assert!((engine.backend().elapsed(handle) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn drift_within_tolerance_is_left_alone() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 10.0, time.now()).unwrap();
        engine.backend_mut().skew("a-0.mp3", 0.3);

        let outcome = engine.sync(&route, 10.0, time.now()).unwrap();
        assert!(matches!(outcome, SyncOutcome::InSync { .. }));
    }

    #[test]
    fn resource_mismatch_reloads_fully() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 10.0, time.now()).unwrap();

        // A stall carried the broadcast into segment b.
        let outcome = engine.sync(&route, 130.0, time.now()).unwrap();

        assert_eq!(outcome, SyncOutcome::Reloaded);
        assert_eq!(
            engine.current_resource(),
            Some(ResourceRef { segment: 1, resource: 0 })
        );
    }

    #[test]
    fn sync_is_skipped_while_loading() {
        let (time, route, mut engine) = engine(500);
        engine.start_at(&route, 10.0, time.now()).unwrap();
        let outcome = engine.sync(&route, 200.0, time.now()).unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(engine.backend().load_count("b-0.mp3"), 0);
    }

    #[test]
    fn periodic_sync_runs_every_interval() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 0.0, time.now()).unwrap();
        engine.backend_mut().skew("a-0.mp3", 2.0);

        time.advance(4.0);
        let events = engine.poll(&route, 4.0, time.now()).unwrap();
        assert!(!events.iter().any(|e| matches!(e, AudioEvent::Seeked { .. })));

        time.advance(1.0);
        let events = engine.poll(&route, 5.0, time.now()).unwrap();
        assert!(events.iter().any(|e| matches!(e, AudioEvent::Seeked { .. })));
    }

    #[test]
    fn volume_is_clamped_and_applied() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 0.0, time.now()).unwrap();
        engine.set_volume(1.7);
        assert_eq!(engine.volume(), 1.0);
        let handle = engine.backend().handle_for("a-0.mp3").unwrap();
        assert_eq!(engine.backend().volume_of(handle), Some(1.0));

        engine.set_volume(-1.0);
        assert_eq!(engine.backend().volume_of(handle), Some(0.0));
    }

    #[test]
    fn resume_jumps_to_live_position() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 0.0, time.now()).unwrap();
        engine.pause();
        let handle = engine.backend().handle_for("a-0.mp3").unwrap();
        assert!(engine.is_paused());
        assert!(!engine.backend().is_playing(handle));

        time.advance(30.0);
        engine.resume(&route, 30.0, time.now()).unwrap();

        assert!(engine.backend().is_playing(handle));
        assert!((engine.backend().elapsed(handle) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn teardown_releases_everything() {
        let (time, route, mut engine) = engine(0);
        engine.start_at(&route, 0.0, time.now()).unwrap();
        engine.teardown();

        assert_eq!(engine.current_resource(), None);
        assert_eq!(engine.preloaded_resource(), None);
        assert_eq!(engine.backend().live_handles(), 0);
        assert!(engine.poll(&route, 0.0, time.now()).unwrap().is_empty());
    }
}
