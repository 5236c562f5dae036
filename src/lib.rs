//! # Dwell Detect
//!
//! Visit-detection engine for personal location history.
//!
//! This library turns a time-ordered stream of raw GPS fixes into:
//! - Confirmed/suggested dwell intervals tied to known places (visits)
//! - Clustered dwell suggestions at locations no place explains
//!
//! The engine tolerates GPS silence and drift: a long silent gap between two
//! in-radius fixes is treated as missing data (the dwell continues) unless a
//! recorded fix outside the radius proves the subject actually left.
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel per-place candidate generation with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use dwelldetect::{DetectionEngine, LocationPoint, MemoryStore, Place};
//!
//! let mut store = MemoryStore::new();
//! store.add_place(Place::new(1, "Home", 51.5074, -0.1278, 75.0));
//!
//! // A 38-minute dwell at home, one fix every two minutes...
//! let start = 1_700_000_000;
//! for i in 0..20 {
//!     store.add_point(LocationPoint::new(51.5074, -0.1278, start + i * 120));
//! }
//! // ...and a later fix far away, confirming the departure.
//! store.add_point(LocationPoint::new(52.9, -0.1278, start + 4_000));
//!
//! let mut engine = DetectionEngine::new(store);
//! let created = engine.detect_visits_for_place(1, None).unwrap();
//! assert_eq!(created, 1);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{DetectError, Result};

// Geographic and temporal primitives (distance, leaving evidence, robust center)
pub mod geo_utils;

// Storage interface consumed by the engine, plus the in-memory implementation
pub mod store;
pub use store::{DetectionStore, MemoryStore, VisitFilter};

// Detection engine with focused subcomponents
pub mod engine;
pub use engine::{place_detector::VisitCandidate, DetectionEngine, EngineStats, ReconcileStats};

// Synthetic GPS data generator for tests and benchmarks
pub mod synthetic;

// ============================================================================
// Core Types
// ============================================================================

/// A bare GPS coordinate with latitude and longitude.
///
/// Used for place centers, cluster centroids, and robust centers. Raw fixes
/// carry more context and are represented by [`LocationPoint`].
///
/// # Example
/// ```
/// use dwelldetect::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// An immutable recorded GPS fix.
///
/// `recorded_at` (epoch seconds) is the ingestion dedup key: the point store
/// holds at most one fix per second. Fixes are created only by ingestion,
/// never mutated or deleted by the engine, and always read in ascending
/// `recorded_at` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch seconds; monotonic sort key and ingestion dedup key.
    pub recorded_at: i64,
    /// Reported horizontal accuracy in meters, when the device provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
}

impl LocationPoint {
    /// Create a new fix with no optional readings. The id is assigned by the
    /// store at ingestion.
    pub fn new(latitude: f64, longitude: f64, recorded_at: i64) -> Self {
        Self {
            id: 0,
            latitude,
            longitude,
            recorded_at,
            accuracy: None,
            speed: None,
            bearing: None,
            battery: None,
        }
    }

    /// Create a new fix with a reported accuracy in meters.
    pub fn with_accuracy(latitude: f64, longitude: f64, recorded_at: i64, accuracy: f64) -> Self {
        Self {
            accuracy: Some(accuracy),
            ..Self::new(latitude, longitude, recorded_at)
        }
    }

    /// The fix's coordinate.
    pub fn coord(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Derived timestamp view of `recorded_at`.
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.recorded_at, 0)
            .single()
            .unwrap_or_default()
    }
}

/// A user-defined circular place.
///
/// Owned and edited externally; any edit to the center or radius invalidates
/// previously suggested visits and should be followed by
/// [`DetectionEngine::reconcile_visits_for_place`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters; enforced positive upstream.
    pub radius_m: f64,
    /// Inactive places are skipped by visit detection but still suppress
    /// unknown-dwell suggestions.
    pub active: bool,
}

impl Place {
    /// Create a new active place.
    pub fn new(id: i64, name: &str, latitude: f64, longitude: f64, radius_m: f64) -> Self {
        Self {
            id,
            name: name.to_string(),
            latitude,
            longitude,
            radius_m,
            active: true,
        }
    }

    /// The place's center coordinate.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// The place's radius in kilometers, the unit the distance math works in.
    pub fn radius_km(&self) -> f64 {
        self.radius_m / 1000.0
    }
}

/// Review status of a visit or unknown-dwell suggestion.
///
/// The engine only ever creates `Suggested` rows and only ever deletes
/// `Suggested` rows; promotion to `Confirmed` or demotion to `Rejected` is
/// an external actor's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitStatus {
    Suggested,
    Confirmed,
    Rejected,
}

/// A dwell interval tied to a known place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: i64,
    pub place_id: i64,
    /// Epoch seconds; always < `departure_at`.
    pub arrival_at: i64,
    pub departure_at: i64,
    pub status: VisitStatus,
}

impl Visit {
    /// Whether this visit's interval overlaps `[arrival_at, departure_at]`
    /// (inclusive at both ends).
    pub fn overlaps(&self, arrival_at: i64, departure_at: i64) -> bool {
        self.arrival_at <= departure_at && arrival_at <= self.departure_at
    }

    /// Derived arrival timestamp.
    pub fn arrival(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.arrival_at, 0)
            .single()
            .unwrap_or_default()
    }

    /// Derived departure timestamp.
    pub fn departure(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.departure_at, 0)
            .single()
            .unwrap_or_default()
    }
}

/// A dwell interval not attributable to any known place.
///
/// The center is a coordinate-wise median of the cluster's member fixes, not
/// the running centroid used during clustering; the median resists both GPS
/// drift and indoor multipath scatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownVisitSuggestion {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub arrival_at: i64,
    pub departure_at: i64,
    /// Number of member fixes in the detected cluster.
    pub point_count: u32,
    pub status: VisitStatus,
}

impl UnknownVisitSuggestion {
    /// Whether this suggestion's interval overlaps `[arrival_at, departure_at]`
    /// (inclusive at both ends).
    pub fn overlaps(&self, arrival_at: i64, departure_at: i64) -> bool {
        self.arrival_at <= departure_at && arrival_at <= self.departure_at
    }

    /// The suggestion's stored center.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Tunable detection thresholds, read from the store at the start of each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Maximum silent gap between in-radius fixes that extends a session
    /// without question. Larger gaps split the session only when a recorded
    /// fix proves the subject left the radius in between.
    /// Default: 15 minutes
    pub session_gap_minutes: u32,

    /// Minimum session span to count as a dwell at a known place.
    /// Default: 15 minutes
    pub min_dwell_minutes: u32,

    /// How long after a session's last fix the engine waits before looking
    /// for the out-of-radius fix that confirms the departure.
    /// Default: 15 minutes
    pub post_departure_minutes: u32,

    /// Session-gap tolerance for the unknown-dwell clusterer.
    /// Default: 15 minutes
    pub unknown_session_gap_minutes: u32,

    /// Minimum cluster span to become an unknown-dwell suggestion.
    /// Default: 15 minutes
    pub unknown_min_dwell_minutes: u32,

    /// Maximum distance from the running centroid for a fix to join the open
    /// cluster. Default: 50.0 meters
    pub unknown_cluster_radius_m: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            session_gap_minutes: 15,
            min_dwell_minutes: 15,
            post_departure_minutes: 15,
            unknown_session_gap_minutes: 15,
            unknown_min_dwell_minutes: 15,
            unknown_cluster_radius_m: 50.0,
        }
    }
}

impl DetectionSettings {
    pub fn session_gap_secs(&self) -> i64 {
        self.session_gap_minutes as i64 * 60
    }

    pub fn min_dwell_secs(&self) -> i64 {
        self.min_dwell_minutes as i64 * 60
    }

    pub fn post_departure_secs(&self) -> i64 {
        self.post_departure_minutes as i64 * 60
    }

    pub fn unknown_session_gap_secs(&self) -> i64 {
        self.unknown_session_gap_minutes as i64 * 60
    }

    pub fn unknown_min_dwell_secs(&self) -> i64 {
        self.unknown_min_dwell_minutes as i64 * 60
    }

    /// Cluster radius in kilometers.
    pub fn unknown_cluster_radius_km(&self) -> f64 {
        self.unknown_cluster_radius_m / 1000.0
    }
}
