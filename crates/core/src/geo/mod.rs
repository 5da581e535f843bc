//! Great-circle distances and along-path interpolation.
//!
//! Distances use the haversine formula on a spherical earth. Interpolation
//! between two path points is planar in latitude/longitude, which is close
//! enough for the short edges of a recorded route.

use serde::{Deserialize, Serialize};

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    fn lerp(self, other: GeoPoint, t: f64) -> GeoPoint {
        GeoPoint {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push `h` a hair above 1 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

/// Sum of consecutive great-circle distances along `path`.
pub fn path_length_km(path: &[GeoPoint]) -> f64 {
    path.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
}

/// Cumulative distance from the first point to every point of `path`.
pub fn cumulative_distances(path: &[GeoPoint]) -> Vec<f64> {
    let mut table = Vec::with_capacity(path.len());
    let mut total = 0.0;
    for (index, point) in path.iter().enumerate() {
        if index > 0 {
            total += haversine_km(path[index - 1], *point);
        }
        table.push(total);
    }
    table
}

/// Returns the point reached after travelling `progress` (0..=1) of the
/// along-path distance. Progress outside the unit range is clamped to the
/// endpoints. Returns `None` only for an empty path.
pub fn interpolate(path: &[GeoPoint], progress: f64) -> Option<GeoPoint> {
    let first = *path.first()?;
    let last = *path.last()?;

    if progress.is_nan() || progress <= 0.0 {
        return Some(first);
    }
    if progress >= 1.0 {
        return Some(last);
    }

    let table = cumulative_distances(path);
    let total = table.last().copied().unwrap_or(0.0);
    if total <= f64::EPSILON {
        return Some(first);
    }

    let target = progress * total;
    let end = table.partition_point(|&d| d < target).clamp(1, path.len() - 1);
    let start = end - 1;
    let edge = table[end] - table[start];
    if edge <= f64::EPSILON {
        return Some(path[end]);
    }

    let t = ((target - table[start]) / edge).clamp(0.0, 1.0);
    Some(path[start].lerp(path[end], t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: GeoPoint, b: GeoPoint) -> bool {
        (a.lat - b.lat).abs() < 1e-9 && (a.lon - b.lon).abs() < 1e-9
    }

    #[test]
    fn identical_points_are_zero_apart() {
        let p = GeoPoint::new(48.8566, 2.3522);
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn london_to_paris_is_about_344_km() {
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let distance = haversine_km(london, paris);
        assert!((distance - 343.5).abs() < 2.0, "got {distance}");
    }

    #[test]
    fn interpolation_hits_endpoints() {
        let path = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
        ];
        assert!(close(interpolate(&path, 0.0).unwrap(), path[0]));
        assert!(close(interpolate(&path, 1.0).unwrap(), path[2]));
        assert!(close(interpolate(&path, -3.0).unwrap(), path[0]));
        assert!(close(interpolate(&path, 7.0).unwrap(), path[2]));
    }

    #[test]
    fn interpolation_walks_by_distance() {
        let path = [GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 2.0)];
        let mid = interpolate(&path, 0.5).unwrap();
        assert!(close(mid, GeoPoint::new(0.0, 1.0)));
    }

    #[test]
    fn duplicate_points_do_not_divide_by_zero() {
        let path = [
            GeoPoint::new(10.0, 10.0),
            GeoPoint::new(10.0, 10.0),
            GeoPoint::new(10.0, 11.0),
            GeoPoint::new(10.0, 11.0),
        ];
        for step in 0..=100 {
            let point = interpolate(&path, step as f64 / 100.0).unwrap();
            assert!(point.lat.is_finite() && point.lon.is_finite());
        }

        let stationary = [GeoPoint::new(1.0, 1.0), GeoPoint::new(1.0, 1.0)];
        assert!(close(interpolate(&stationary, 0.4).unwrap(), stationary[0]));
    }

    #[test]
    fn empty_path_has_no_position() {
        assert!(interpolate(&[], 0.5).is_none());
    }

    #[test]
    fn sweep_has_no_jumps_across_edges() {
        let path = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.5),
            GeoPoint::new(0.5, 0.5),
            GeoPoint::new(0.5, 1.5),
        ];
        let mut previous = interpolate(&path, 0.0).unwrap();
        for step in 1..=1000 {
            let current = interpolate(&path, step as f64 / 1000.0).unwrap();
            // Full route is 2 degrees long, a 1/1000 step moves ~0.002 degrees.
            assert!((current.lat - previous.lat).abs() < 0.01);
            assert!((current.lon - previous.lon).abs() < 0.01);
            previous = current;
        }
    }

    fn point() -> impl Strategy<Value = GeoPoint> {
        (-80.0..80.0f64, -179.0..179.0f64).prop_map(|(lat, lon)| GeoPoint::new(lat, lon))
    }

    proptest! {
        #[test]
        fn triangle_inequality_holds(a in point(), b in point(), c in point()) {
            let direct = haversine_km(a, c);
            let detour = haversine_km(a, b) + haversine_km(b, c);
            prop_assert!(direct <= detour + 1e-6);
        }

        #[test]
        fn distance_is_symmetric(a in point(), b in point()) {
            prop_assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
        }

        #[test]
        fn interior_vertices_are_reached_from_both_sides(
            path in prop::collection::vec(point(), 3..7)
        ) {
            let table = cumulative_distances(&path);
            let total = *table.last().unwrap();
            prop_assume!(total > 1.0);
            for index in 1..path.len() - 1 {
                let at = table[index] / total;
                let before = interpolate(&path, (at - 1e-9).max(0.0)).unwrap();
                let after = interpolate(&path, (at + 1e-9).min(1.0)).unwrap();
                prop_assert!((before.lat - after.lat).abs() < 1e-3);
                prop_assert!((before.lon - after.lon).abs() < 1e-3);
            }
        }
    }
}
