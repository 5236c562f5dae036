//! Synthetic GPS data generator for tests and benchmarks.
//!
//! Produces dwell and transit traces with seeded, reproducible jitter so
//! detection scenarios have known ground truth.
//!
//! # Example
//!
//! ```rust
//! use dwelldetect::synthetic::DwellScenario;
//! use dwelldetect::GpsPoint;
//!
//! let scenario = DwellScenario {
//!     center: GpsPoint::new(47.37, 8.55),
//!     start_at: 1_700_000_000,
//!     duration_secs: 1800,
//!     interval_secs: 120,
//!     jitter_m: 8.0,
//!     seed: 42,
//! };
//! let points = scenario.generate();
//! assert_eq!(points.len(), 16);
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geo_utils::meters_to_degrees;
use crate::{GpsPoint, LocationPoint};

/// A stationary dwell: fixes scattered around a center at a fixed cadence.
#[derive(Debug, Clone)]
pub struct DwellScenario {
    pub center: GpsPoint,
    /// Epoch seconds of the first fix.
    pub start_at: i64,
    /// Total span; fixes cover `[start_at, start_at + duration_secs]`.
    pub duration_secs: i64,
    /// Seconds between consecutive fixes.
    pub interval_secs: i64,
    /// Uniform jitter radius in meters, simulating GPS noise.
    pub jitter_m: f64,
    pub seed: u64,
}

impl DwellScenario {
    /// Generate the dwell's fixes, time-sorted.
    pub fn generate(&self) -> Vec<LocationPoint> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let dlat = self.jitter_m / 111_320.0;
        let dlng = meters_to_degrees(self.jitter_m, self.center.latitude);

        (0..=self.duration_secs / self.interval_secs.max(1))
            .map(|i| {
                let lat = self.center.latitude + rng.gen_range(-dlat..=dlat);
                let lng = self.center.longitude + rng.gen_range(-dlng..=dlng);
                LocationPoint::new(lat, lng, self.start_at + i * self.interval_secs)
            })
            .collect()
    }
}

/// Generate a straight-line transit between two coordinates.
pub fn transit_points(
    from: GpsPoint,
    to: GpsPoint,
    start_at: i64,
    duration_secs: i64,
    interval_secs: i64,
) -> Vec<LocationPoint> {
    let steps = (duration_secs / interval_secs.max(1)).max(1);
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            LocationPoint::new(
                from.latitude + (to.latitude - from.latitude) * t,
                from.longitude + (to.longitude - from.longitude) * t,
                start_at + i * interval_secs,
            )
        })
        .collect()
}
