//! Coordinator wiring the clock to the mapper, audio engine and visuals.
//!
//! The radio is driven by repeatedly calling [`Radio::tick`]. Each tick reads
//! the clock once, derives everything else from that broadcast position and
//! returns the resulting events in order.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    audio::{AudioBackend, AudioSyncEngine},
    config::RadioConfig,
    events::{MediaChange, RadioEvent, SegmentBoundaryCrossed},
    mapping::{Context, RouteMap},
    media::MediaSelector,
    scene::VisualSequencer,
    timeline::{RadioClock, TimeSource},
    RadioError, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the listener's first interaction.
    NotStarted,
    Active,
    Stopped,
}

pub struct Radio<T: TimeSource, B: AudioBackend, R: Rng = StdRng> {
    route: RouteMap,
    clock: RadioClock<T>,
    audio: AudioSyncEngine<B>,
    visuals: VisualSequencer<R>,
    session: SessionState,
    current_segment: Option<usize>,
    latest_position: f64,
}

impl<T: TimeSource, B: AudioBackend> Radio<T, B, StdRng> {
    /// Radio whose visual draws are seeded from the operating system.
    pub fn with_os_rng(route: RouteMap, config: &RadioConfig, time: T, backend: B) -> Result<Self> {
        Self::new(route, config, time, backend, StdRng::from_os_rng())
    }
}

impl<T: TimeSource, B: AudioBackend, R: Rng> Radio<T, B, R> {
    pub fn new(route: RouteMap, config: &RadioConfig, time: T, backend: B, rng: R) -> Result<Self> {
        config.validate()?;
        let clock = RadioClock::new(time, route.total_duration(), config)?;
        let audio = AudioSyncEngine::new(backend, config);
        let selector = MediaSelector::new(rng, config.prefetch_capacity);
        let visuals = VisualSequencer::new(selector, config.image_display());

        Ok(Self {
            route,
            clock,
            audio,
            visuals,
            session: SessionState::NotStarted,
            current_segment: None,
            latest_position: 0.0,
        })
    }

    pub fn route(&self) -> &RouteMap {
        &self.route
    }

    pub fn clock(&self) -> &RadioClock<T> {
        &self.clock
    }

    pub fn audio(&self) -> &AudioSyncEngine<B> {
        &self.audio
    }

    pub fn visuals(&self) -> &VisualSequencer<R> {
        &self.visuals
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    /// Position of the most recent broadcast.
    pub fn latest_position(&self) -> f64 {
        self.latest_position
    }

    /// Starts the clock, audio and visuals. Audio may only start after the
    /// listener has interacted, so this is the single entry point for it.
    pub fn begin_session(&mut self) -> Result<Vec<RadioEvent>> {
        if self.session == SessionState::Active {
            return Ok(Vec::new());
        }

        self.clock.start();
        let now = self.clock.time().now();
        let update = self.clock.snapshot();
        let context = self.route.context_at(update.position)?;
        self.latest_position = update.position;
        self.current_segment = Some(context.segment_index);

        self.audio.start_at(&self.route, update.position, now)?;
        let media = self.visuals.start(&self.route, &context.segment_id, now);
        self.session = SessionState::Active;
        tracing::info!(
            position = update.position,
            segment = %context.segment_id,
            "session started"
        );

        let mut events = vec![
            RadioEvent::Position(update),
            RadioEvent::Context(Box::new(context)),
        ];
        events.extend(media.map(RadioEvent::Media));
        events.extend(
            self.audio
                .poll(&self.route, self.latest_position, now)?
                .into_iter()
                .map(RadioEvent::Audio),
        );
        Ok(events)
    }

    /// Runs one iteration of the radio.
    pub fn tick(&mut self) -> Result<Vec<RadioEvent>> {
        let mut events = Vec::new();
        if self.session != SessionState::Active {
            return Ok(events);
        }
        let now = self.clock.time().now();

        if let Some(check) = self.clock.check_drift() {
            if check.resynced {
                events.push(RadioEvent::ClockResynced { drift: check.drift });
            }
        }

        if let Some(update) = self.clock.tick() {
            self.latest_position = update.position;
            events.push(RadioEvent::Position(update));

            let context = self.route.context_at(update.position)?;
            if let Some(crossed) = self.detect_boundary(&context) {
                tracing::info!(
                    from = %crossed.previous_segment_id,
                    to = %crossed.new_segment_id,
                    "segment boundary crossed"
                );
                let media = self.visuals.on_segment_changed(&crossed.new_segment_id, now);
                events.push(RadioEvent::Boundary(crossed));
                events.extend(media.map(RadioEvent::Media));
            }
            events.push(RadioEvent::Context(Box::new(context)));
        }

        let audio = self.audio.poll(&self.route, self.latest_position, now)?;
        events.extend(audio.into_iter().map(RadioEvent::Audio));
        events.extend(self.visuals.poll(now).map(RadioEvent::Media));
        Ok(events)
    }

    /// Context at the most recently broadcast position.
    pub fn context(&self) -> Result<Context> {
        self.route.context_at(self.latest_position)
    }

    pub fn set_volume(&mut self, level: f32) -> Result<()> {
        self.require_session()?;
        self.audio.set_volume(level);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require_session()?;
        self.audio.pause();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.require_session()?;
        let now = self.clock.time().now();
        self.audio.resume(&self.route, self.latest_position, now)
    }

    /// Natural end of a video reported by the renderer.
    pub fn on_video_ended(&mut self, url: &str) -> Result<Option<MediaChange>> {
        self.require_session()?;
        Ok(self.visuals.on_video_ended(url, self.clock.time().now()))
    }

    /// The renderer failed to present `url`.
    pub fn on_media_failed(&mut self, url: &str) -> Result<Option<MediaChange>> {
        self.require_session()?;
        Ok(self.visuals.on_media_failed(url, self.clock.time().now()))
    }

    /// Jumps the broadcast to `position` and restarts audio there.
    #[cfg(any(test, feature = "debug-tools"))]
    pub fn seek(&mut self, position: f64) -> Result<()> {
        self.require_session()?;
        self.clock.seek(position);
        let position = self.clock.current_position();
        self.latest_position = position;
        let now = self.clock.time().now();
        self.audio.start_at(&self.route, position, now)
    }

    /// Stops the clock and releases all playback resources.
    pub fn shutdown(&mut self) {
        if self.session != SessionState::Active {
            return;
        }
        self.clock.stop();
        self.audio.teardown();
        self.visuals.stop();
        self.current_segment = None;
        self.session = SessionState::Stopped;
        tracing::info!("session stopped");
    }

    fn require_session(&self) -> Result<()> {
        match self.session {
            SessionState::Active => Ok(()),
            _ => Err(RadioError::SessionNotStarted),
        }
    }

    fn detect_boundary(&mut self, context: &Context) -> Option<SegmentBoundaryCrossed> {
        let previous = self.current_segment.replace(context.segment_index)?;
        if previous == context.segment_index {
            return None;
        }
        let previous_segment_id = self.route.segment(previous)?.id.clone();
        Some(SegmentBoundaryCrossed {
            previous_segment_id,
            new_segment_id: context.segment_id.clone(),
        })
    }
}
