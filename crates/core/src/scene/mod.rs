use std::time::{Duration, Instant};

use rand::Rng;

use crate::{
    events::MediaChange,
    mapping::{MediaKind, PoolEntry, RouteMap},
    media::MediaSelector,
};

/// The visual item currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Showing {
    pub entry: PoolEntry,
    pub segment_id: String,
    pub shown_at: Instant,
}

/// Decides when the next visual item is drawn.
///
/// Images stay for a fixed display time; videos stay until the renderer
/// reports their natural end. A segment change never interrupts the item on
/// screen, it only redirects the next draw.
#[derive(Debug)]
pub struct VisualSequencer<R: Rng> {
    selector: MediaSelector<R>,
    image_display: Duration,
    active_segment: Option<String>,
    current: Option<Showing>,
    image_deadline: Option<Instant>,
    /// The item on screen is past its display time but had no successor.
    lingering: bool,
}

impl<R: Rng> VisualSequencer<R> {
    pub fn new(selector: MediaSelector<R>, image_display: Duration) -> Self {
        Self {
            selector,
            image_display,
            active_segment: None,
            current: None,
            image_deadline: None,
            lingering: false,
        }
    }

    pub fn selector(&self) -> &MediaSelector<R> {
        &self.selector
    }

    pub fn current(&self) -> Option<&Showing> {
        self.current.as_ref()
    }

    pub fn active_segment(&self) -> Option<&str> {
        self.active_segment.as_deref()
    }

    /// Resets the draw state for `route` and shows the first item of
    /// `segment_id`.
    pub fn start(
        &mut self,
        route: &RouteMap,
        segment_id: &str,
        now: Instant,
    ) -> Option<MediaChange> {
        self.selector.initialize(route);
        self.current = None;
        self.image_deadline = None;
        self.lingering = false;
        self.active_segment = Some(segment_id.to_string());
        self.advance(now)
    }

    pub fn stop(&mut self) {
        self.current = None;
        self.image_deadline = None;
        self.lingering = false;
        self.active_segment = None;
    }

    /// Advances past an image whose display time is over.
    pub fn poll(&mut self, now: Instant) -> Option<MediaChange> {
        match self.image_deadline {
            Some(deadline) if now >= deadline => self.advance(now),
            _ => None,
        }
    }

    /// Redirects future draws to `segment_id`. Only draws right away when
    /// the item on screen is already done, e.g. after a segment with an empty
    /// pool.
    pub fn on_segment_changed(&mut self, segment_id: &str, now: Instant) -> Option<MediaChange> {
        self.active_segment = Some(segment_id.to_string());
        self.selector.refill_prefetch(segment_id);
        if self.current.is_none() || self.lingering {
            self.advance(now)
        } else {
            None
        }
    }

    /// Natural end of a video reported by the renderer. Stale reports for
    /// anything but the video on screen are ignored.
    pub fn on_video_ended(&mut self, url: &str, now: Instant) -> Option<MediaChange> {
        let matches = self
            .current
            .as_ref()
            .is_some_and(|showing| {
                showing.entry.kind == MediaKind::Video && showing.entry.url == url
            });
        if matches {
            self.advance(now)
        } else {
            None
        }
    }

    /// The renderer could not present `url`; draw a replacement.
    pub fn on_media_failed(&mut self, url: &str, now: Instant) -> Option<MediaChange> {
        let matches = self
            .current
            .as_ref()
            .is_some_and(|showing| showing.entry.url == url);
        if !matches {
            return None;
        }
        tracing::warn!(%url, "visual media failed, drawing a replacement");
        self.advance(now)
    }

    fn advance(&mut self, now: Instant) -> Option<MediaChange> {
        let segment_id = self.active_segment.clone()?;
        let Some(entry) = self.selector.pick_next(&segment_id) else {
            // Nothing to draw here; keep whatever is on screen.
            self.image_deadline = None;
            self.lingering = true;
            return None;
        };
        self.lingering = false;

        self.image_deadline = match entry.kind {
            MediaKind::Image => Some(now + self.image_display),
            MediaKind::Video => None,
        };
        self.current = Some(Showing {
            entry: entry.clone(),
            segment_id: segment_id.clone(),
            shown_at: now,
        });
        self.selector.refill_prefetch(&segment_id);

        tracing::debug!(
            url = %entry.url,
            kind = ?entry.kind,
            segment = %segment_id,
            "media change"
        );
        Some(MediaChange {
            url: entry.url,
            kind: entry.kind,
            segment_id,
        })
    }
}
