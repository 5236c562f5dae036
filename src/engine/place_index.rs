//! Spatial index over place circles.
//!
//! Uses an R-tree so the unknown-dwell clusterer's known-place vote does not
//! scan every place for every member fix.

use rstar::{RTree, RTreeObject, AABB};

use crate::geo_utils::{distance_km, meters_to_degrees};
use crate::{GpsPoint, Place};

/// Place circle wrapper for R-tree indexing.
///
/// The envelope is the circle's bounding box; hits still get an exact
/// haversine check.
#[derive(Debug, Clone)]
pub struct PlaceCircle {
    pub place_id: i64,
    center: GpsPoint,
    radius_km: f64,
    envelope: AABB<[f64; 2]>,
}

impl PlaceCircle {
    fn from_place(place: &Place) -> Self {
        let dlat = place.radius_m / 111_320.0;
        let dlng = meters_to_degrees(place.radius_m, place.latitude);
        Self {
            place_id: place.id,
            center: place.center(),
            radius_km: place.radius_km(),
            envelope: AABB::from_corners(
                [place.longitude - dlng, place.latitude - dlat],
                [place.longitude + dlng, place.latitude + dlat],
            ),
        }
    }

    /// Exact containment check.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        distance_km(point, &self.center) <= self.radius_km
    }
}

impl RTreeObject for PlaceCircle {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Immutable index over a set of place circles.
#[derive(Debug)]
pub struct PlaceIndex {
    tree: RTree<PlaceCircle>,
}

impl PlaceIndex {
    /// Build an index over the given places.
    pub fn build(places: &[Place]) -> Self {
        let circles: Vec<PlaceCircle> = places.iter().map(PlaceCircle::from_place).collect();
        Self {
            tree: RTree::bulk_load(circles),
        }
    }

    /// Whether any indexed place's circle contains the point.
    pub fn covers(&self, point: &GpsPoint) -> bool {
        let location = [point.longitude, point.latitude];
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point(location))
            .any(|circle| circle.contains(point))
    }

    /// Get the number of indexed places.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
