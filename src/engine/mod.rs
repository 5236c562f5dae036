//! # Detection Engine
//!
//! Batch visit detection over a point snapshot, composed of focused modules:
//! - `place_detector` - Known-place dwell candidates and conflict resolution
//! - `unknown_clusterer` - Forward-pass clustering of unexplained dwells
//! - `place_index` - R-tree over place circles
//!
//! Each public operation is one full batch pass: read settings, take one
//! consistent point snapshot, compute in memory, write, return counts.
//! There is no internal scheduler; periodic triggering is the caller's job.
//! The engine holds its store exclusively, so runs over one store handle are
//! serialized by construction.

pub mod place_detector;
pub mod place_index;
pub mod unknown_clusterer;

pub use place_detector::VisitCandidate;
pub use place_index::PlaceIndex;
pub use unknown_clusterer::DwellCluster;

use log::{debug, warn};
use serde::Serialize;

use crate::error::Result;
use crate::geo_utils::robust_center;
use crate::store::{DetectionStore, VisitFilter};
use crate::{Place, Visit, VisitStatus};

use place_detector::{candidates_for_place, resolve_conflicts};
use unknown_clusterer::{cluster_points, majority_inside_known_place, merge_split_clusters};

/// How far beyond a requested range the point snapshot extends, so sessions
/// straddling a range boundary are not truncated.
const SNAPSHOT_BUFFER_SECS: i64 = 3 * 86_400;

/// Rows removed and created by a reconciling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReconcileStats {
    pub removed: usize,
    pub added: usize,
}

/// Entity counts for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub point_count: usize,
    pub place_count: usize,
    pub visit_count: usize,
    pub suggestion_count: usize,
}

/// Visit-detection engine over a storage backend.
///
/// All operations are synchronous, single-threaded batch passes. Empty
/// inputs (no points, no places, missing place id) yield zero-count results,
/// never errors; storage failures propagate to the caller without retries.
pub struct DetectionEngine<S> {
    store: S,
}

impl<S: DetectionStore> DetectionEngine<S> {
    /// Create an engine owning its store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Shared access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Exclusive access to the underlying store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consume the engine, returning its store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// One consistent, time-sorted point snapshot, buffered beyond the
    /// requested range.
    fn snapshot(
        &self,
        range: Option<(i64, i64)>,
        buffer_secs: i64,
    ) -> Result<Vec<crate::LocationPoint>> {
        match range {
            None => self.store.points_in_range(None, None),
            Some((start, end)) => self
                .store
                .points_in_range(Some(start - buffer_secs), Some(end + buffer_secs)),
        }
    }

    // ========================================================================
    // Known-place detection
    // ========================================================================

    /// Detect dwells at one place and persist each as a `Suggested` visit,
    /// unless it overlaps an existing visit (any status) for that place.
    ///
    /// Returns the number of visits created. A missing or inactive place and
    /// an empty snapshot both yield 0.
    pub fn detect_visits_for_place(
        &mut self,
        place_id: i64,
        range: Option<(i64, i64)>,
    ) -> Result<usize> {
        let settings = self.store.settings()?;
        let place = match self.store.place(place_id)? {
            Some(p) if p.active => p,
            _ => return Ok(0),
        };

        let points = self.snapshot(range, SNAPSHOT_BUFFER_SECS)?;
        if points.is_empty() {
            return Ok(0);
        }

        let mut candidates = candidates_for_place(&place, &points, &settings);
        if let Some((start, end)) = range {
            candidates.retain(|c| c.overlaps(start, end));
        }
        debug!(
            "place {}: {} candidate(s) from {} point(s)",
            place_id,
            candidates.len(),
            points.len()
        );

        let mut created = 0;
        for candidate in candidates {
            let existing = self.store.find_overlapping_visits(
                Some(place_id),
                candidate.arrival_at,
                candidate.departure_at,
            )?;
            if existing.is_empty() {
                self.store.create_visit(
                    place_id,
                    candidate.arrival_at,
                    candidate.departure_at,
                    VisitStatus::Suggested,
                )?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Reconcile one place's suggested visits against freshly recomputed
    /// candidates. Invoked after the place's center or radius was edited.
    ///
    /// `Suggested` visits that overlap no current candidate are deleted;
    /// candidates that overlap no surviving visit (any status) are created.
    /// `Confirmed` and `Rejected` rows are never touched. A missing place
    /// reconciles nothing; an inactive place reconciles against an empty
    /// candidate set, clearing its suggestions.
    pub fn reconcile_visits_for_place(&mut self, place_id: i64) -> Result<ReconcileStats> {
        let settings = self.store.settings()?;
        let place = match self.store.place(place_id)? {
            Some(p) => p,
            None => return Ok(ReconcileStats::default()),
        };

        let points = self.snapshot(None, 0)?;
        let candidates = if place.active {
            candidates_for_place(&place, &points, &settings)
        } else {
            Vec::new()
        };

        let existing = self
            .store
            .find_visits(&VisitFilter::default().place(place_id))?;

        let stale: Vec<i64> = existing
            .iter()
            .filter(|v| v.status == VisitStatus::Suggested)
            .filter(|v| !candidates.iter().any(|c| c.overlaps(v.arrival_at, v.departure_at)))
            .map(|v| v.id)
            .collect();
        let removed = self.store.delete_visits(&stale)?;

        let mut kept: Vec<Visit> = existing
            .into_iter()
            .filter(|v| !stale.contains(&v.id))
            .collect();

        let mut added = 0;
        for candidate in candidates {
            if kept
                .iter()
                .any(|v| v.overlaps(candidate.arrival_at, candidate.departure_at))
            {
                continue;
            }
            let visit = self.store.create_visit(
                place_id,
                candidate.arrival_at,
                candidate.departure_at,
                VisitStatus::Suggested,
            )?;
            kept.push(visit);
            added += 1;
        }

        debug!(
            "reconcile place {}: removed {}, added {}",
            place_id, removed, added
        );
        Ok(ReconcileStats { removed, added })
    }

    /// Detect visits across all active places with cross-place conflict
    /// resolution, so one time interval is attributed to at most one place.
    ///
    /// One buffered snapshot is shared by all places. Per-place candidates
    /// are resolved into winners (smallest min-distance, ties by place id);
    /// stale `Suggested` rows in the range are deleted and winners are
    /// created against an existing set that grows with each insertion, so
    /// two winners from the same run cannot create overlapping visits for
    /// one place.
    pub fn detect_visits_for_all_places(
        &mut self,
        range: Option<(i64, i64)>,
    ) -> Result<ReconcileStats> {
        let settings = self.store.settings()?;
        let places: Vec<Place> = self
            .store
            .all_places()?
            .into_iter()
            .filter(|p| p.active)
            .collect();
        if places.is_empty() {
            return Ok(ReconcileStats::default());
        }

        let points = self.snapshot(range, SNAPSHOT_BUFFER_SECS)?;
        if points.is_empty() {
            return Ok(ReconcileStats::default());
        }

        let mut candidates = generate_all_candidates(&places, &points, &settings);
        if let Some((start, end)) = range {
            candidates.retain(|c| c.overlaps(start, end));
        }
        let winners = resolve_conflicts(candidates);
        debug!(
            "all-places pass: {} place(s), {} winner(s) over {} point(s)",
            places.len(),
            winners.len(),
            points.len()
        );

        // Suggested rows in range whose (place, interval) no longer wins.
        let (start, end) = match range {
            Some((s, e)) => (Some(s), Some(e)),
            None => (None, None),
        };
        let suggested = self.store.find_visits(
            &VisitFilter::default()
                .status(VisitStatus::Suggested)
                .between(start, end),
        )?;
        let stale: Vec<i64> = suggested
            .iter()
            .filter(|v| {
                !winners.iter().any(|w| {
                    w.place_id == v.place_id
                        && w.arrival_at == v.arrival_at
                        && w.departure_at == v.departure_at
                })
            })
            .map(|v| v.id)
            .collect();
        let removed = self.store.delete_visits(&stale)?;

        let mut existing = self.store.find_visits(&VisitFilter::default())?;
        let mut added = 0;
        for winner in winners {
            let overlapping = existing.iter().any(|v| {
                v.place_id == winner.place_id && v.overlaps(winner.arrival_at, winner.departure_at)
            });
            if overlapping {
                continue;
            }
            let visit = self.store.create_visit(
                winner.place_id,
                winner.arrival_at,
                winner.departure_at,
                VisitStatus::Suggested,
            )?;
            existing.push(visit);
            added += 1;
        }

        Ok(ReconcileStats { removed, added })
    }

    // ========================================================================
    // Unknown-dwell detection
    // ========================================================================

    /// Detect dwells no known place explains and persist each as a
    /// `Suggested` unknown-visit suggestion.
    ///
    /// Returns the number of suggestions created. Clusters are dropped when
    /// too short, when at least half their fixes fall inside some place's
    /// radius, when they extend beyond the unbuffered requested range, or
    /// when an existing suggestion (any status) already overlaps their
    /// interval.
    pub fn detect_unknown_visits(&mut self, range: Option<(i64, i64)>) -> Result<usize> {
        let settings = self.store.settings()?;
        let points = self.snapshot(range, settings.unknown_session_gap_secs())?;
        if points.is_empty() {
            return Ok(0);
        }

        let clusters = cluster_points(&points, &settings);
        let clusters = merge_split_clusters(clusters, &points, &settings);
        debug!(
            "unknown pass: {} merged cluster(s) from {} point(s)",
            clusters.len(),
            points.len()
        );

        // All places suppress unknown dwells, active or not.
        let place_index = PlaceIndex::build(&self.store.all_places()?);

        let mut created = 0;
        for cluster in clusters {
            if cluster.span_secs() < settings.unknown_min_dwell_secs() {
                continue;
            }
            if majority_inside_known_place(&cluster, &place_index) {
                continue;
            }
            if let Some((start, end)) = range {
                if cluster.first_at < start || cluster.last_at > end {
                    continue;
                }
            }
            let overlapping = self
                .store
                .find_overlapping_suggestions(cluster.first_at, cluster.last_at)?;
            if !overlapping.is_empty() {
                continue;
            }

            let center = robust_center(&cluster.members);
            self.store.create_suggestion(
                center,
                cluster.first_at,
                cluster.last_at,
                cluster.point_count() as u32,
            )?;
            created += 1;
        }
        Ok(created)
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Visits matching a filter, as a JSON array string.
    pub fn visits_json(&self, filter: &VisitFilter) -> Result<String> {
        let visits = self.store.find_visits(filter)?;
        Ok(serde_json::to_string(&visits).unwrap_or_else(|e| {
            warn!("Failed to serialize visits: {}", e);
            "[]".to_string()
        }))
    }

    /// Suggestions overlapping a time window, as a JSON array string.
    pub fn suggestions_json(&self, arrival_at: i64, departure_at: i64) -> Result<String> {
        let suggestions = self
            .store
            .find_overlapping_suggestions(arrival_at, departure_at)?;
        Ok(serde_json::to_string(&suggestions).unwrap_or_else(|e| {
            warn!("Failed to serialize suggestions: {}", e);
            "[]".to_string()
        }))
    }

    /// Get engine statistics.
    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            point_count: self.store.points_in_range(None, None)?.len(),
            place_count: self.store.all_places()?.len(),
            visit_count: self.store.find_visits(&VisitFilter::default())?.len(),
            suggestion_count: self
                .store
                .find_overlapping_suggestions(i64::MIN, i64::MAX)?
                .len(),
        })
    }
}

/// Per-place candidate generation over a shared snapshot; places never see
/// each other, so the `parallel` feature fans them out with rayon.
#[cfg(feature = "parallel")]
fn generate_all_candidates(
    places: &[Place],
    points: &[crate::LocationPoint],
    settings: &crate::DetectionSettings,
) -> Vec<VisitCandidate> {
    use rayon::prelude::*;
    places
        .par_iter()
        .flat_map_iter(|place| candidates_for_place(place, points, settings))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn generate_all_candidates(
    places: &[Place],
    points: &[crate::LocationPoint],
    settings: &crate::DetectionSettings,
) -> Vec<VisitCandidate> {
    places
        .iter()
        .flat_map(|place| candidates_for_place(place, points, settings))
        .collect()
}
