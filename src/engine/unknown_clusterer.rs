//! Unknown-dwell clustering.
//!
//! An independent forward pass over raw fixes that finds dwells no known
//! place explains. Membership decisions during the pass use a cheap
//! accuracy-weighted running centroid; the stored center of a surviving
//! cluster is computed exactly once, with the robust median, after every
//! filter has passed.

use crate::engine::place_index::PlaceIndex;
use crate::geo_utils::{distance_km, has_evidence_of_leaving};
use crate::{DetectionSettings, GpsPoint, LocationPoint};

/// A closed dwell cluster: member fixes plus the running centroid that grew
/// it.
#[derive(Debug, Clone)]
pub struct DwellCluster {
    centroid: GpsPoint,
    /// Sum of member weights (1/accuracy, or 1 when accuracy is unknown).
    weight: f64,
    pub members: Vec<LocationPoint>,
    pub first_at: i64,
    pub last_at: i64,
}

impl DwellCluster {
    fn start(point: &LocationPoint) -> Self {
        Self {
            centroid: point.coord(),
            weight: point_weight(point),
            members: vec![point.clone()],
            first_at: point.recorded_at,
            last_at: point.recorded_at,
        }
    }

    /// Fold a fix in: update the running weighted centroid and extend the
    /// departure.
    fn absorb(&mut self, point: &LocationPoint) {
        let w = point_weight(point);
        let total = self.weight + w;
        self.centroid = GpsPoint::new(
            (self.centroid.latitude * self.weight + point.latitude * w) / total,
            (self.centroid.longitude * self.weight + point.longitude * w) / total,
        );
        self.weight = total;
        self.last_at = point.recorded_at;
        self.members.push(point.clone());
    }

    /// Merge with a later adjacent cluster. The merged centroid is the
    /// point-count-weighted average of the two centroids.
    fn merge_with(mut self, later: DwellCluster) -> Self {
        let n1 = self.members.len() as f64;
        let n2 = later.members.len() as f64;
        self.centroid = GpsPoint::new(
            (self.centroid.latitude * n1 + later.centroid.latitude * n2) / (n1 + n2),
            (self.centroid.longitude * n1 + later.centroid.longitude * n2) / (n1 + n2),
        );
        self.weight += later.weight;
        self.members.extend(later.members);
        self.last_at = later.last_at;
        self
    }

    /// The running centroid that drove membership decisions. The stored
    /// center of a surviving cluster is the robust median instead.
    pub fn centroid(&self) -> GpsPoint {
        self.centroid
    }

    pub fn span_secs(&self) -> i64 {
        self.last_at - self.first_at
    }

    pub fn point_count(&self) -> usize {
        self.members.len()
    }
}

fn point_weight(point: &LocationPoint) -> f64 {
    match point.accuracy {
        Some(a) if a > 0.0 => 1.0 / a,
        _ => 1.0,
    }
}

/// Single forward pass over a time-sorted snapshot.
///
/// State is an explicit (closed, open) pair carried through the loop. A fix
/// beyond the cluster radius closes the open cluster unconditionally
/// (spatial exit overrides timing); an in-radius fix past the session gap
/// closes it only when the gap contains leaving evidence, otherwise the gap
/// is bridged regardless of elapsed time.
pub fn cluster_points(
    points: &[LocationPoint],
    settings: &DetectionSettings,
) -> Vec<DwellCluster> {
    let radius_km = settings.unknown_cluster_radius_km();
    let gap_secs = settings.unknown_session_gap_secs();

    let mut closed: Vec<DwellCluster> = Vec::new();
    let mut open: Option<DwellCluster> = None;

    for point in points {
        open = Some(match open.take() {
            None => DwellCluster::start(point),
            Some(mut cluster) => {
                if distance_km(&point.coord(), &cluster.centroid()) > radius_km {
                    closed.push(cluster);
                    DwellCluster::start(point)
                } else {
                    let elapsed = point.recorded_at - cluster.last_at;
                    let left_meanwhile = elapsed > gap_secs
                        && has_evidence_of_leaving(
                            points,
                            cluster.last_at,
                            point.recorded_at,
                            &cluster.centroid(),
                            radius_km,
                        );
                    if left_meanwhile {
                        closed.push(cluster);
                        DwellCluster::start(point)
                    } else {
                        cluster.absorb(point);
                        cluster
                    }
                }
            }
        });
    }
    closed.extend(open);
    closed
}

/// Repair clusters artificially split by a brief, unconfirmed excursion.
///
/// Iterative relaxation to a fixpoint: each pass scans adjacent pairs and
/// merges the mergeable ones; a changed pass strictly decreases the cluster
/// count, so at most `clusters.len()` passes can change anything. The pass
/// count is bounded explicitly all the same.
pub fn merge_split_clusters(
    mut clusters: Vec<DwellCluster>,
    points: &[LocationPoint],
    settings: &DetectionSettings,
) -> Vec<DwellCluster> {
    let radius_km = settings.unknown_cluster_radius_km();
    let gap_secs = settings.unknown_session_gap_secs();

    let max_passes = clusters.len().max(1);
    for _ in 0..max_passes {
        let before = clusters.len();
        clusters = merge_pass(clusters, points, radius_km, gap_secs);
        if clusters.len() == before {
            break;
        }
    }
    clusters
}

fn merge_pass(
    clusters: Vec<DwellCluster>,
    points: &[LocationPoint],
    radius_km: f64,
    gap_secs: i64,
) -> Vec<DwellCluster> {
    let mut merged: Vec<DwellCluster> = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        match merged.last() {
            Some(prev) if mergeable(prev, &cluster, points, radius_km, gap_secs) => {
                let prev = merged.pop().expect("last() was Some");
                merged.push(prev.merge_with(cluster));
            }
            _ => merged.push(cluster),
        }
    }
    merged
}

/// Adjacent clusters merge when their centroids sit within the cluster
/// radius, the time gap between them fits the session-gap window, and no
/// leaving evidence exists in that gap. Evidence is checked around the
/// midpoint of the two centroids.
fn mergeable(
    earlier: &DwellCluster,
    later: &DwellCluster,
    points: &[LocationPoint],
    radius_km: f64,
    gap_secs: i64,
) -> bool {
    if distance_km(&earlier.centroid(), &later.centroid()) > radius_km {
        return false;
    }
    if later.first_at - earlier.last_at > gap_secs {
        return false;
    }
    let midpoint = GpsPoint::new(
        (earlier.centroid().latitude + later.centroid().latitude) / 2.0,
        (earlier.centroid().longitude + later.centroid().longitude) / 2.0,
    );
    !has_evidence_of_leaving(
        points,
        earlier.last_at,
        later.first_at,
        &midpoint,
        radius_km,
    )
}

/// Majority vote over the cluster's raw member fixes: at least half inside
/// some known place's radius means the dwell is already explained.
///
/// The vote deliberately uses raw fixes instead of the centroid; a long
/// dwell's running mean can drift outside a place's circle even when most
/// fixes were inside it.
pub fn majority_inside_known_place(cluster: &DwellCluster, places: &PlaceIndex) -> bool {
    if places.is_empty() || cluster.members.is_empty() {
        return false;
    }
    let inside = cluster
        .members
        .iter()
        .filter(|p| places.covers(&p.coord()))
        .count();
    inside * 2 >= cluster.members.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Place;

    fn minute(m: i64) -> i64 {
        m * 60
    }

    fn near_point(recorded_at: i64) -> LocationPoint {
        LocationPoint::new(0.0, 0.0, recorded_at)
    }

    #[test]
    fn test_single_cluster_from_stationary_fixes() {
        let points: Vec<LocationPoint> = (0..10).map(|i| near_point(minute(i * 2))).collect();
        let clusters = cluster_points(&points, &DetectionSettings::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_count(), 10);
        assert_eq!(clusters[0].first_at, minute(0));
        assert_eq!(clusters[0].last_at, minute(18));
    }

    #[test]
    fn test_spatial_exit_closes_unconditionally() {
        // A fix 1km away closes the cluster even though only a minute passed.
        let points = vec![
            near_point(minute(0)),
            near_point(minute(1)),
            LocationPoint::new(0.01, 0.0, minute(2)),
        ];
        let clusters = cluster_points(&points, &DetectionSettings::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].point_count(), 2);
        assert_eq!(clusters[1].point_count(), 1);
    }

    #[test]
    fn test_stale_gap_bridged_without_evidence() {
        // 40 silent minutes, then another fix at the same spot: one cluster.
        let points = vec![near_point(minute(0)), near_point(minute(40))];
        let clusters = cluster_points(&points, &DetectionSettings::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].span_secs(), minute(40));
    }

    #[test]
    fn test_stale_gap_split_with_evidence() {
        // Same fixes, but a far fix inside the gap proves the subject left.
        let points = vec![
            near_point(minute(0)),
            LocationPoint::new(0.01, 0.0, minute(20)),
            near_point(minute(40)),
        ];
        let clusters = cluster_points(&points, &DetectionSettings::default());
        // The far fix also spatially exits, so: [0], [far], [40].
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn test_accuracy_weighting_pulls_centroid_toward_precise_fixes() {
        let points = vec![
            LocationPoint::with_accuracy(0.0, 0.0, minute(0), 5.0),
            LocationPoint::with_accuracy(0.0004, 0.0, minute(2), 100.0),
        ];
        let clusters = cluster_points(&points, &DetectionSettings::default());
        assert_eq!(clusters.len(), 1);
        let centroid = clusters[0].centroid();
        // The precise fix carries 20x the weight of the coarse one.
        assert!(centroid.latitude < 0.0001);
    }

    /// Hand-build a closed cluster for merge tests.
    fn cluster_at(latitude: f64, first_at: i64, last_at: i64, count: usize) -> DwellCluster {
        let members: Vec<LocationPoint> = (0..count)
            .map(|i| LocationPoint::new(latitude, 0.0, first_at + i as i64))
            .collect();
        DwellCluster {
            centroid: GpsPoint::new(latitude, 0.0),
            weight: count as f64,
            members,
            first_at,
            last_at,
        }
    }

    #[test]
    fn test_merge_rejoins_drift_split_dwell() {
        // A slow eastward drift: the running centroid lags, one fix exceeds
        // the radius from it and opens a second cluster at the same dwell.
        let mut points: Vec<LocationPoint> = (0..5).map(|i| near_point(minute(i))).collect();
        points.push(LocationPoint::new(0.0005, 0.0, minute(5))); // ~56m from centroid
        points.extend((6..11).map(|i| LocationPoint::new(0.0004, 0.0, minute(i))));
        let settings = DetectionSettings::default();

        let clusters = cluster_points(&points, &settings);
        assert_eq!(clusters.len(), 2);

        let merged = merge_split_clusters(clusters, &points, &settings);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].point_count(), 11);
        assert_eq!(merged[0].first_at, minute(0));
        assert_eq!(merged[0].last_at, minute(10));
    }

    #[test]
    fn test_merge_blocked_by_leaving_evidence() {
        let a = cluster_at(0.0, minute(0), minute(4), 5);
        let b = cluster_at(0.0, minute(10), minute(14), 5);
        let settings = DetectionSettings::default();

        // With an out-of-radius fix recorded inside the inter-cluster gap,
        // the halves must not rejoin.
        let snapshot = vec![LocationPoint::new(0.01, 0.0, minute(6))];
        let merged = merge_split_clusters(vec![a.clone(), b.clone()], &snapshot, &settings);
        assert_eq!(merged.len(), 2);

        // Without it, they do.
        let merged = merge_split_clusters(vec![a, b], &[], &settings);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].point_count(), 10);
    }

    #[test]
    fn test_merge_blocked_by_time_gap() {
        let a = cluster_at(0.0, minute(0), minute(4), 5);
        let b = cluster_at(0.0, minute(30), minute(34), 5);
        let merged = merge_split_clusters(vec![a, b], &[], &DetectionSettings::default());
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_blocked_by_centroid_distance() {
        let a = cluster_at(0.0, minute(0), minute(4), 5);
        let b = cluster_at(0.002, minute(5), minute(9), 5); // ~220m apart
        let merged = merge_split_clusters(vec![a, b], &[], &DetectionSettings::default());
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merged_centroid_is_count_weighted() {
        let a = cluster_at(0.0, minute(0), minute(4), 6);
        let b = cluster_at(0.0004, minute(5), minute(9), 2);
        let merged = merge_split_clusters(vec![a, b], &[], &DetectionSettings::default());
        assert_eq!(merged.len(), 1);
        let c = merged[0].centroid();
        assert!((c.latitude - 0.0001).abs() < 1e-9);
    }

    #[test]
    fn test_majority_vote_uses_raw_fixes() {
        let place = Place::new(1, "Cafe", 0.0, 0.0, 50.0);
        let index = PlaceIndex::build(&[place]);
        // Wide cluster radius so the straddling fixes stay in one cluster.
        let settings = DetectionSettings {
            unknown_cluster_radius_m: 150.0,
            ..DetectionSettings::default()
        };

        // 6 of 10 fixes inside the place circle, 4 outside at ~67m.
        let mut points: Vec<LocationPoint> = (0..6).map(|i| near_point(minute(i))).collect();
        points.extend((6..10).map(|i| LocationPoint::new(0.0006, 0.0, minute(i))));
        let clusters = cluster_points(&points, &settings);
        assert_eq!(clusters.len(), 1);
        assert!(majority_inside_known_place(&clusters[0], &index));
    }

    #[test]
    fn test_minority_inside_place_not_excluded() {
        let place = Place::new(1, "Cafe", 0.0, 0.0, 50.0);
        let index = PlaceIndex::build(&[place]);
        let settings = DetectionSettings {
            unknown_cluster_radius_m: 150.0,
            ..DetectionSettings::default()
        };

        // Only 3 of 10 fixes inside: the dwell is not explained.
        let mut points: Vec<LocationPoint> = (0..3).map(|i| near_point(minute(i))).collect();
        points.extend((3..10).map(|i| LocationPoint::new(0.0006, 0.0, minute(i))));
        let clusters = cluster_points(&points, &settings);
        assert_eq!(clusters.len(), 1);
        assert!(!majority_inside_known_place(&clusters[0], &index));
    }
}
