use std::{collections::HashSet, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{GeoPoint, RadioError, Result};

/// Static description of the looping journey. Segments play in file order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub segments: Vec<SegmentConfig>,
}

/// One leg of the journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub id: String,
    pub name: String,
    pub path: Vec<GeoPoint>,
    pub audio: Vec<AudioResource>,
    #[serde(default)]
    pub visuals: VisualPool,
}

/// An audio file together with its authoritative duration in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioResource {
    pub url: String,
    pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualPool {
    #[serde(default)]
    pub videos: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl VisualPool {
    pub fn len(&self) -> usize {
        self.videos.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RouteConfig {
    /// Reads and validates a route file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: RouteConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the shape of the route once so later stages can index freely.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(RadioError::config("route has no segments"));
        }

        let mut ids = HashSet::new();
        for segment in &self.segments {
            if !ids.insert(segment.id.as_str()) {
                return Err(RadioError::config(format!(
                    "duplicate segment id `{}`",
                    segment.id
                )));
            }
            if segment.path.len() < 2 {
                return Err(RadioError::config(format!(
                    "segment `{}` needs at least two path points",
                    segment.id
                )));
            }
            if let Some(point) = segment.path.iter().find(|p| !p.is_valid()) {
                return Err(RadioError::config(format!(
                    "segment `{}` has an invalid coordinate ({}, {})",
                    segment.id, point.lat, point.lon
                )));
            }
            if segment.audio.is_empty() {
                return Err(RadioError::config(format!(
                    "segment `{}` has no audio resources",
                    segment.id
                )));
            }
            for resource in &segment.audio {
                if !resource.duration.is_finite() || resource.duration <= 0.0 {
                    return Err(RadioError::config(format!(
                        "audio `{}` in segment `{}` has non-positive duration {}",
                        resource.url, segment.id, resource.duration
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Longest accepted timer period or tolerance.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Runtime tuning for the timers and tolerances of the radio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Position broadcasts per second.
    pub broadcast_hz: f64,
    pub clock_drift_check_secs: f64,
    pub clock_drift_tolerance_secs: f64,
    pub audio_sync_interval_secs: f64,
    pub audio_drift_tolerance_secs: f64,
    pub image_display_secs: f64,
    pub prefetch_capacity: usize,
    pub volume: f32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            broadcast_hz: 60.0,
            clock_drift_check_secs: 5.0,
            clock_drift_tolerance_secs: 2.0,
            audio_sync_interval_secs: 5.0,
            audio_drift_tolerance_secs: 0.5,
            image_display_secs: 10.0,
            prefetch_capacity: 3,
            volume: 1.0,
        }
    }
}

impl RadioConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RadioConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("broadcast_hz", self.broadcast_hz),
            ("clock_drift_check_secs", self.clock_drift_check_secs),
            ("clock_drift_tolerance_secs", self.clock_drift_tolerance_secs),
            ("audio_sync_interval_secs", self.audio_sync_interval_secs),
            ("audio_drift_tolerance_secs", self.audio_drift_tolerance_secs),
            ("image_display_secs", self.image_display_secs),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(RadioError::config(format!(
                    "`{name}` must be positive, got {value}"
                )));
            }
        }
        let periods = [
            ("broadcast_hz", 1.0 / self.broadcast_hz),
            ("clock_drift_check_secs", self.clock_drift_check_secs),
            ("clock_drift_tolerance_secs", self.clock_drift_tolerance_secs),
            ("audio_sync_interval_secs", self.audio_sync_interval_secs),
            ("audio_drift_tolerance_secs", self.audio_drift_tolerance_secs),
            ("image_display_secs", self.image_display_secs),
        ];
        for (name, secs) in periods {
            if secs > MAX_INTERVAL_SECS {
                return Err(RadioError::config(format!(
                    "`{name}` implies a period of {secs}s, longer than one day"
                )));
            }
        }
        if self.prefetch_capacity == 0 {
            return Err(RadioError::config("`prefetch_capacity` must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(RadioError::config(format!(
                "`volume` must lie in [0, 1], got {}",
                self.volume
            )));
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        period(1.0 / self.broadcast_hz)
    }

    pub fn clock_drift_check(&self) -> Duration {
        period(self.clock_drift_check_secs)
    }

    pub fn audio_sync_interval(&self) -> Duration {
        period(self.audio_sync_interval_secs)
    }

    pub fn image_display(&self) -> Duration {
        period(self.image_display_secs)
    }
}

/// Converts seconds to a timer period capped at [`MAX_INTERVAL_SECS`].
/// Values `validate` rejects never panic here; they collapse to zero or the cap.
fn period(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(MAX_INTERVAL_SECS)).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE: &str = r#"{
        "segments": [
            {
                "id": "coast",
                "name": "Coast road",
                "path": [{ "lat": 50.0, "lon": -4.0 }, { "lat": 50.5, "lon": -3.5 }],
                "audio": [{ "url": "coast-1.mp3", "duration": 120.0 }],
                "visuals": { "images": ["cliffs.jpg"] }
            }
        ]
    }"#;

    #[test]
    fn parses_route_with_partial_visual_pool() {
        let route = RouteConfig::from_json_str(ROUTE).unwrap();
        let segment = &route.segments[0];

        assert_eq!(segment.visuals.images, vec!["cliffs.jpg".to_string()]);
        assert!(segment.visuals.videos.is_empty());
        assert_eq!(segment.visuals.len(), 1);
    }

    #[test]
    fn rejects_empty_route() {
        let err = RouteConfig::from_json_str(r#"{ "segments": [] }"#).unwrap_err();
        assert!(matches!(err, RadioError::Configuration(_)));
    }

    #[test]
    fn rejects_non_positive_duration() {
        let raw = ROUTE.replace("120.0", "0.0");
        let err = RouteConfig::from_json_str(&raw).unwrap_err();
        assert!(format!("{err}").contains("coast-1.mp3"));
    }

    #[test]
    fn rejects_single_point_path() {
        let raw = ROUTE.replace(r#", { "lat": 50.5, "lon": -3.5 }"#, "");
        let err = RouteConfig::from_json_str(&raw).unwrap_err();
        assert!(format!("{err}").contains("two path points"));
    }

    #[test]
    fn rejects_duplicate_segment_ids() {
        let mut route = RouteConfig::from_json_str(ROUTE).unwrap();
        route.segments.push(route.segments[0].clone());
        assert!(route.validate().is_err());
    }

    #[test]
    fn tuning_defaults_fill_missing_fields() {
        let config: RadioConfig = serde_json::from_str(r#"{ "broadcast_hz": 30.0 }"#).unwrap();
        assert_eq!(config.broadcast_hz, 30.0);
        assert_eq!(config.prefetch_capacity, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tuning_rejects_periods_longer_than_a_day() {
        for raw in [
            r#"{ "clock_drift_check_secs": 1e30 }"#,
            r#"{ "broadcast_hz": 1e-300 }"#,
            r#"{ "image_display_secs": 90000.0 }"#,
        ] {
            let config: RadioConfig = serde_json::from_str(raw).unwrap();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, RadioError::Configuration(_)), "{raw}");

            // The conversions stay total even for rejected values.
            assert!(config.broadcast_interval() <= Duration::from_secs(86_400));
            assert!(config.clock_drift_check() <= Duration::from_secs(86_400));
            assert!(config.image_display() <= Duration::from_secs(86_400));
        }
        let nan = RadioConfig {
            audio_sync_interval_secs: f64::NAN,
            ..RadioConfig::default()
        };
        assert!(nan.validate().is_err());
        assert_eq!(nan.audio_sync_interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn tuning_accepts_a_one_day_period() {
        let config = RadioConfig {
            clock_drift_check_secs: MAX_INTERVAL_SECS,
            broadcast_hz: 1.0 / MAX_INTERVAL_SECS,
            ..RadioConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.clock_drift_check(), Duration::from_secs(86_400));
    }

    #[test]
    fn tuning_rejects_out_of_range_volume() {
        let config = RadioConfig {
            volume: 1.5,
            ..RadioConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
