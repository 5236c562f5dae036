//! Geographic and temporal primitives.
//!
//! Everything here is a pure function over coordinates and time-sorted point
//! slices. The pivot decision of the whole engine lives in
//! [`has_evidence_of_leaving`]: a silent gap between two in-radius fixes is
//! missing data unless a recorded fix inside the gap proves the subject left
//! the radius.

use crate::{GpsPoint, LocationPoint};

/// Mean earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates in kilometers (haversine).
pub fn distance_km(a: &GpsPoint, b: &GpsPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Index of the first point with `recorded_at > t`.
///
/// `points` must be sorted ascending by `recorded_at`; the predicate
/// `recorded_at <= t` is monotonic over such a slice.
pub fn first_index_after(points: &[LocationPoint], t: i64) -> usize {
    points.partition_point(|p| p.recorded_at <= t)
}

/// Whether any fix recorded strictly between `from` and `to` (both bounds
/// exclusive, epoch seconds) lies farther than `radius_km` from `center`.
///
/// This is the signal that distinguishes "subject left and came back" from
/// "signal was lost": without such a fix the gap is bridged and the dwell
/// continues.
pub fn has_evidence_of_leaving(
    points: &[LocationPoint],
    from: i64,
    to: i64,
    center: &GpsPoint,
    radius_km: f64,
) -> bool {
    let start = first_index_after(points, from);
    points[start..]
        .iter()
        .take_while(|p| p.recorded_at < to)
        .any(|p| distance_km(&p.coord(), center) > radius_km)
}

/// Coordinate-wise median position of a set of fixes.
///
/// Chosen over a running mean for stored centers: the mean drifts toward
/// peripheral fixes over a long dwell, and indoor multipath scatters
/// outliers that drag it further. Even counts average the two middle order
/// statistics per axis. Empty input yields (0, 0); callers only invoke this
/// on non-empty clusters.
pub fn robust_center(points: &[LocationPoint]) -> GpsPoint {
    if points.is_empty() {
        return GpsPoint::new(0.0, 0.0);
    }

    let mut lats: Vec<f64> = points.iter().map(|p| p.latitude).collect();
    let mut lngs: Vec<f64> = points.iter().map(|p| p.longitude).collect();

    GpsPoint::new(median(&mut lats), median(&mut lngs))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Convert a distance in meters to degrees of longitude at a given latitude.
///
/// Used to inflate R-tree envelopes by a place's radius.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    // One degree of latitude is ~111.32 km; longitude shrinks with cos(lat).
    let meters_per_degree = 111_320.0 * latitude.to_radians().cos().abs().max(0.01);
    meters / meters_per_degree
}
