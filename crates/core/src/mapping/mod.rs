//! Maps a cycle position onto the route.
//!
//! [`RouteMap::process`] runs once over a validated [`RouteConfig`] and lays
//! every segment and audio resource out on one absolute timeline. Lookups are
//! then binary searches over half-open `[start, end)` ranges.

use serde::{Deserialize, Serialize};

use crate::{
    config::{RouteConfig, VisualPool},
    geo::{self, GeoPoint},
    timeline::wrap_position,
    RadioError, Result,
};

/// Whether a visual pool entry is a video or a still image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

/// One tagged entry of a segment's combined visual pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolEntry {
    pub url: String,
    pub kind: MediaKind,
}

/// Audio resource placed on the absolute cycle timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedResource {
    pub url: String,
    pub duration: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub offset_in_segment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedSegment {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub path: Vec<GeoPoint>,
    pub resources: Vec<ProcessedResource>,
    pub visuals: VisualPool,
    /// Videos followed by images, each tagged with its kind.
    pub pool: Vec<PoolEntry>,
    pub start_time: f64,
    pub end_time: f64,
    pub start_distance: f64,
    pub end_distance: f64,
}

impl ProcessedSegment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn distance(&self) -> f64 {
        self.end_distance - self.start_distance
    }

    fn resource_index_at(&self, position: f64) -> Option<usize> {
        let index = self
            .resources
            .partition_point(|resource| resource.end_time <= position);
        (index < self.resources.len()).then_some(index)
    }
}

/// Address of an audio resource: segment index plus index within the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub segment: usize,
    pub resource: usize,
}

/// Snapshot of everything the route says about one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub position: f64,
    pub overall_progress: f64,
    pub segment_index: usize,
    pub segment_id: String,
    pub segment_name: String,
    pub segment_progress: f64,
    pub resource: ResourceRef,
    pub audio_url: String,
    pub offset_in_file: f64,
    pub coordinate: GeoPoint,
    /// Distance travelled along the whole route, in kilometres.
    pub distance_km: f64,
    pub pool: VisualPool,
}

/// Row of the human readable route overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub id: String,
    pub name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub distance_km: f64,
    pub resources: usize,
    pub pool_size: usize,
}

/// The processed, immutable route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMap {
    segments: Vec<ProcessedSegment>,
    total_duration: f64,
    total_distance: f64,
}

impl RouteMap {
    /// Builds the cumulative time and distance tables for `config`.
    pub fn process(config: &RouteConfig) -> Result<Self> {
        config.validate()?;

        let mut segments = Vec::with_capacity(config.segments.len());
        let mut time = 0.0;
        let mut distance = 0.0;

        for (index, segment) in config.segments.iter().enumerate() {
            let start_time = time;
            let mut resources = Vec::with_capacity(segment.audio.len());
            for resource in &segment.audio {
                let resource_start = time;
                time += resource.duration;
                resources.push(ProcessedResource {
                    url: resource.url.clone(),
                    duration: resource.duration,
                    start_time: resource_start,
                    end_time: time,
                    offset_in_segment: resource_start - start_time,
                });
            }

            let start_distance = distance;
            distance += geo::path_length_km(&segment.path);

            let pool = segment
                .visuals
                .videos
                .iter()
                .map(|url| PoolEntry {
                    url: url.clone(),
                    kind: MediaKind::Video,
                })
                .chain(segment.visuals.images.iter().map(|url| PoolEntry {
                    url: url.clone(),
                    kind: MediaKind::Image,
                }))
                .collect();

            segments.push(ProcessedSegment {
                index,
                id: segment.id.clone(),
                name: segment.name.clone(),
                path: segment.path.clone(),
                resources,
                visuals: segment.visuals.clone(),
                pool,
                start_time,
                end_time: time,
                start_distance,
                end_distance: distance,
            });
        }

        Ok(Self {
            segments,
            total_duration: time,
            total_distance: distance,
        })
    }

    pub fn segments(&self) -> &[ProcessedSegment] {
        &self.segments
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn segment(&self, index: usize) -> Option<&ProcessedSegment> {
        self.segments.get(index)
    }

    pub fn segment_by_id(&self, id: &str) -> Option<&ProcessedSegment> {
        self.segments.iter().find(|segment| segment.id == id)
    }

    pub fn resource(&self, at: ResourceRef) -> Option<&ProcessedResource> {
        self.segments.get(at.segment)?.resources.get(at.resource)
    }

    /// The resource that plays after `at`, wrapping from the last resource of
    /// the route back to the first.
    pub fn next_resource(&self, at: ResourceRef) -> ResourceRef {
        let in_segment = self
            .segments
            .get(at.segment)
            .map(|segment| segment.resources.len())
            .unwrap_or(0);

        if at.resource + 1 < in_segment {
            ResourceRef {
                segment: at.segment,
                resource: at.resource + 1,
            }
        } else {
            ResourceRef {
                segment: (at.segment + 1) % self.segments.len().max(1),
                resource: 0,
            }
        }
    }

    /// Resolves the context of an already-reduced position. Positions outside
    /// `[0, total_duration)` are a caller bug and yield
    /// [`RadioError::PositionOutOfRange`].
    pub fn context_at(&self, position: f64) -> Result<Context> {
        let out_of_range = || RadioError::PositionOutOfRange {
            position,
            total: self.total_duration,
        };
        if !(0.0..self.total_duration).contains(&position) {
            return Err(out_of_range());
        }

        let segment_index = self
            .segments
            .partition_point(|segment| segment.end_time <= position);
        let segment = self.segments.get(segment_index).ok_or_else(out_of_range)?;
        let resource_index = segment
            .resource_index_at(position)
            .ok_or_else(out_of_range)?;
        let resource = &segment.resources[resource_index];

        let segment_progress =
            ((position - segment.start_time) / segment.duration()).clamp(0.0, 1.0);
        let coordinate = geo::interpolate(&segment.path, segment_progress).ok_or_else(|| {
            RadioError::config(format!("segment `{}` has an empty path", segment.id))
        })?;

        Ok(Context {
            position,
            overall_progress: position / self.total_duration,
            segment_index,
            segment_id: segment.id.clone(),
            segment_name: segment.name.clone(),
            segment_progress,
            resource: ResourceRef {
                segment: segment_index,
                resource: resource_index,
            },
            audio_url: resource.url.clone(),
            offset_in_file: position - resource.start_time,
            coordinate,
            distance_km: segment.start_distance + segment_progress * segment.distance(),
            pool: segment.visuals.clone(),
        })
    }

    /// Like [`RouteMap::context_at`] but first reduces any finite position into
    /// the cycle.
    pub fn context_at_wrapped(&self, position: f64) -> Result<Context> {
        if !position.is_finite() {
            return Err(RadioError::PositionOutOfRange {
                position,
                total: self.total_duration,
            });
        }
        self.context_at(wrap_position(position, self.total_duration))
    }

    pub fn summary(&self) -> Vec<SegmentSummary> {
        self.segments
            .iter()
            .map(|segment| SegmentSummary {
                id: segment.id.clone(),
                name: segment.name.clone(),
                start_time: segment.start_time,
                end_time: segment.end_time,
                distance_km: segment.distance(),
                resources: segment.resources.len(),
                pool_size: segment.pool.len(),
            })
            .collect()
    }
}
