//! Known-place visit detection.
//!
//! Pure candidate generation: a place plus a time-sorted point snapshot in,
//! dwell candidates out. Session grouping bridges silent gaps unless a
//! recorded fix proves the subject left the radius, and a session only
//! becomes a candidate once a later out-of-radius fix confirms the
//! departure. Cross-place conflict resolution lives here too; the store
//! orchestration is in [`DetectionEngine`](super::DetectionEngine).

use serde::Serialize;

use crate::geo_utils::{distance_km, has_evidence_of_leaving};
use crate::{DetectionSettings, LocationPoint, Place};

/// A dwell session that passed every filter and is eligible to become a
/// persisted visit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitCandidate {
    pub place_id: i64,
    /// Epoch seconds of the first in-radius fix.
    pub arrival_at: i64,
    /// Epoch seconds of the last in-radius fix.
    pub departure_at: i64,
    /// Minimum in-session distance to the place center in kilometers; the
    /// specificity score used when one interval geometrically fits several
    /// places.
    pub min_distance_km: f64,
}

impl VisitCandidate {
    /// Whether this candidate's interval overlaps `[arrival_at,
    /// departure_at]` (inclusive at both ends).
    pub fn overlaps(&self, arrival_at: i64, departure_at: i64) -> bool {
        self.arrival_at <= departure_at && arrival_at <= self.departure_at
    }
}

/// An in-radius session being grown during the forward pass.
#[derive(Debug, Clone)]
struct Session {
    first_at: i64,
    last_at: i64,
    min_distance_km: f64,
}

impl Session {
    fn start(point: &LocationPoint, distance_km: f64) -> Self {
        Self {
            first_at: point.recorded_at,
            last_at: point.recorded_at,
            min_distance_km: distance_km,
        }
    }

    fn extend(&mut self, point: &LocationPoint, distance_km: f64) {
        self.last_at = point.recorded_at;
        self.min_distance_km = self.min_distance_km.min(distance_km);
    }

    fn span_secs(&self) -> i64 {
        self.last_at - self.first_at
    }
}

/// Generate dwell candidates for one place from a time-sorted snapshot.
///
/// The snapshot must extend past the window of interest: departure
/// confirmation looks at fixes recorded after the session ends, and gap
/// evidence looks at fixes between in-radius ones.
pub fn candidates_for_place(
    place: &Place,
    points: &[LocationPoint],
    settings: &DetectionSettings,
) -> Vec<VisitCandidate> {
    let center = place.center();
    let radius_km = place.radius_km();
    let gap_secs = settings.session_gap_secs();

    // Forward pass over in-radius fixes, carrying (closed, open) explicitly.
    let mut sessions: Vec<Session> = Vec::new();
    let mut open: Option<Session> = None;

    for point in points {
        let d = distance_km(&point.coord(), &center);
        if d > radius_km {
            continue;
        }

        open = Some(match open.take() {
            None => Session::start(point, d),
            Some(mut session) => {
                let elapsed = point.recorded_at - session.last_at;
                let left_meanwhile = elapsed > gap_secs
                    && has_evidence_of_leaving(
                        points,
                        session.last_at,
                        point.recorded_at,
                        &center,
                        radius_km,
                    );
                if left_meanwhile {
                    sessions.push(session);
                    Session::start(point, d)
                } else {
                    session.extend(point, d);
                    session
                }
            }
        });
    }
    sessions.extend(open);

    sessions
        .into_iter()
        .filter(|s| s.span_secs() >= settings.min_dwell_secs())
        .filter(|s| departure_confirmed(s, points, place, settings))
        .map(|s| VisitCandidate {
            place_id: place.id,
            arrival_at: s.first_at,
            departure_at: s.last_at,
            min_distance_km: s.min_distance_km,
        })
        .collect()
}

/// Whether some fix at or after `last_at + post_departure_minutes` lies
/// outside the place radius.
///
/// Without such a fix the session's true end is unknown (the subject may
/// still be there, or the signal may simply have stopped), so it is not
/// promoted.
fn departure_confirmed(
    session: &Session,
    points: &[LocationPoint],
    place: &Place,
    settings: &DetectionSettings,
) -> bool {
    let threshold = session.last_at + settings.post_departure_secs();
    let center = place.center();
    let radius_km = place.radius_km();

    // First fix at or after the threshold, then scan forward.
    let start = points.partition_point(|p| p.recorded_at < threshold);
    points[start..]
        .iter()
        .any(|p| distance_km(&p.coord(), &center) > radius_km)
}

/// Resolve cross-place conflicts: at most one candidate survives per
/// overlapping time window.
///
/// Candidates are sorted by (arrival, departure, min distance, place id) and
/// swept left to right; a group grows for as long as the next candidate's
/// arrival falls at or before the group's maximum departure (transitive
/// interval clustering, not merely pairwise adjacency). Each group's winner
/// is the candidate closest to its place center, ties broken by the smaller
/// place id.
pub fn resolve_conflicts(mut candidates: Vec<VisitCandidate>) -> Vec<VisitCandidate> {
    if candidates.len() < 2 {
        return candidates;
    }

    candidates.sort_by(|a, b| {
        a.arrival_at
            .cmp(&b.arrival_at)
            .then(a.departure_at.cmp(&b.departure_at))
            .then(a.min_distance_km.total_cmp(&b.min_distance_km))
            .then(a.place_id.cmp(&b.place_id))
    });

    let mut winners = Vec::new();
    let mut iter = candidates.into_iter();
    let first = iter.next().expect("len checked above");
    let mut group_max_departure = first.departure_at;
    let mut group = vec![first];

    for candidate in iter {
        if candidate.arrival_at <= group_max_departure {
            group_max_departure = group_max_departure.max(candidate.departure_at);
            group.push(candidate);
        } else {
            winners.push(pick_winner(std::mem::take(&mut group)));
            group_max_departure = candidate.departure_at;
            group.push(candidate);
        }
    }
    winners.push(pick_winner(group));

    winners
}

fn pick_winner(group: Vec<VisitCandidate>) -> VisitCandidate {
    group
        .into_iter()
        .min_by(|a, b| {
            a.min_distance_km
                .total_cmp(&b.min_distance_km)
                .then(a.place_id.cmp(&b.place_id))
        })
        .expect("conflict groups are never empty")
}
