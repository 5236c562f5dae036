//! Storage interface consumed by the detection engine.
//!
//! The storage *engine* is an external collaborator; this module specifies
//! only the operations detection needs (ordered point range queries and
//! basic CRUD on places, visits, and suggestions) and ships an in-memory
//! implementation used by tests and embeddable as-is.
//!
//! Write methods take `&mut self`. Combined with the engine holding its
//! store exclusively, this serializes detection runs over one store handle
//! and closes the check-then-create overlap race a shared-store design
//! would have. Exclusion across processes sharing a backing database is the
//! embedding application's responsibility.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::Result;
use crate::{
    DetectionSettings, GpsPoint, LocationPoint, Place, UnknownVisitSuggestion, Visit, VisitStatus,
};

/// Filter for bulk visit queries.
///
/// All fields are optional; an empty filter matches every visit. The time
/// bounds select visits whose interval overlaps `[start, end]`.
#[derive(Debug, Clone, Default)]
pub struct VisitFilter {
    pub place_id: Option<i64>,
    pub status: Option<VisitStatus>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl VisitFilter {
    pub fn place(mut self, place_id: i64) -> Self {
        self.place_id = Some(place_id);
        self
    }

    pub fn status(mut self, status: VisitStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Whether a visit matches this filter.
    pub fn matches(&self, visit: &Visit) -> bool {
        if let Some(place_id) = self.place_id {
            if visit.place_id != place_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if visit.status != status {
                return false;
            }
        }
        if let Some(start) = self.start {
            if visit.departure_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if visit.arrival_at > end {
                return false;
            }
        }
        true
    }
}

/// Storage operations the detection engine consumes.
///
/// Reads take `&self`, writes take `&mut self`. Implementations over a real
/// database should map their native errors into
/// [`DetectError::Storage`](crate::DetectError::Storage); the engine
/// propagates them without retrying.
pub trait DetectionStore {
    /// Points with `recorded_at` in `[start, end]` (both optional, both
    /// inclusive), ascending by `recorded_at`.
    fn points_in_range(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<LocationPoint>>;

    fn place(&self, id: i64) -> Result<Option<Place>>;

    fn all_places(&self) -> Result<Vec<Place>>;

    /// Visits (any status) whose interval overlaps `[arrival_at,
    /// departure_at]`, optionally restricted to one place.
    fn find_overlapping_visits(
        &self,
        place_id: Option<i64>,
        arrival_at: i64,
        departure_at: i64,
    ) -> Result<Vec<Visit>>;

    fn find_visits(&self, filter: &VisitFilter) -> Result<Vec<Visit>>;

    fn create_visit(
        &mut self,
        place_id: i64,
        arrival_at: i64,
        departure_at: i64,
        status: VisitStatus,
    ) -> Result<Visit>;

    /// Update a visit's status; returns the updated row, or `None` if the id
    /// does not exist.
    fn update_visit_status(&mut self, id: i64, status: VisitStatus) -> Result<Option<Visit>>;

    /// Delete visits by id; returns how many existed and were removed.
    fn delete_visits(&mut self, ids: &[i64]) -> Result<usize>;

    /// Suggestions (any status) whose interval overlaps `[arrival_at,
    /// departure_at]`.
    fn find_overlapping_suggestions(
        &self,
        arrival_at: i64,
        departure_at: i64,
    ) -> Result<Vec<UnknownVisitSuggestion>>;

    fn create_suggestion(
        &mut self,
        center: GpsPoint,
        arrival_at: i64,
        departure_at: i64,
        point_count: u32,
    ) -> Result<UnknownVisitSuggestion>;

    fn update_suggestion_status(
        &mut self,
        id: i64,
        status: VisitStatus,
    ) -> Result<Option<UnknownVisitSuggestion>>;

    fn delete_suggestion(&mut self, id: i64) -> Result<bool>;

    /// Current detection thresholds; read once at the start of each run.
    fn settings(&self) -> Result<DetectionSettings>;
}

/// In-memory store.
///
/// Points live in a `BTreeMap` keyed by `recorded_at`, which provides the
/// ordered range queries and the one-fix-per-second ingestion dedup in one
/// structure.
#[derive(Debug, Default)]
pub struct MemoryStore {
    points: BTreeMap<i64, LocationPoint>,
    places: BTreeMap<i64, Place>,
    visits: BTreeMap<i64, Visit>,
    suggestions: BTreeMap<i64, UnknownVisitSuggestion>,
    settings: DetectionSettings,
    next_point_id: i64,
    next_visit_id: i64,
    next_suggestion_id: i64,
}

impl MemoryStore {
    /// Create an empty store with default settings.
    pub fn new() -> Self {
        Self {
            settings: DetectionSettings::default(),
            next_point_id: 1,
            next_visit_id: 1,
            next_suggestion_id: 1,
            ..Self::default()
        }
    }

    /// Create an empty store with custom settings.
    pub fn with_settings(settings: DetectionSettings) -> Self {
        Self {
            settings,
            ..Self::new()
        }
    }

    /// Replace the detection settings.
    pub fn set_settings(&mut self, settings: DetectionSettings) {
        self.settings = settings;
    }

    /// Ingest a fix. Returns `false` when a fix with the same `recorded_at`
    /// already exists (the dedup key); the existing fix wins.
    pub fn add_point(&mut self, mut point: LocationPoint) -> bool {
        if self.points.contains_key(&point.recorded_at) {
            return false;
        }
        point.id = self.next_point_id;
        self.next_point_id += 1;
        self.points.insert(point.recorded_at, point);
        true
    }

    /// Ingest many fixes; returns how many were new.
    pub fn add_points(&mut self, points: impl IntoIterator<Item = LocationPoint>) -> usize {
        points.into_iter().filter(|p| self.add_point(p.clone())).count()
    }

    /// Insert or replace a place.
    pub fn add_place(&mut self, place: Place) {
        self.places.insert(place.id, place);
    }

    /// Remove a place. Existing visits keep their `place_id`.
    pub fn remove_place(&mut self, id: i64) -> Option<Place> {
        self.places.remove(&id)
    }

    /// Look up a visit by id.
    pub fn visit(&self, id: i64) -> Option<&Visit> {
        self.visits.get(&id)
    }

    /// Look up a suggestion by id.
    pub fn suggestion(&self, id: i64) -> Option<&UnknownVisitSuggestion> {
        self.suggestions.get(&id)
    }

    /// All suggestions, ascending by id.
    pub fn all_suggestions(&self) -> Vec<UnknownVisitSuggestion> {
        self.suggestions.values().cloned().collect()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn visit_count(&self) -> usize {
        self.visits.len()
    }

    pub fn suggestion_count(&self) -> usize {
        self.suggestions.len()
    }
}

impl DetectionStore for MemoryStore {
    fn points_in_range(&self, start: Option<i64>, end: Option<i64>) -> Result<Vec<LocationPoint>> {
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let upper = end.map_or(Bound::Unbounded, Bound::Included);
        Ok(self
            .points
            .range((lower, upper))
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn place(&self, id: i64) -> Result<Option<Place>> {
        Ok(self.places.get(&id).cloned())
    }

    fn all_places(&self) -> Result<Vec<Place>> {
        Ok(self.places.values().cloned().collect())
    }

    fn find_overlapping_visits(
        &self,
        place_id: Option<i64>,
        arrival_at: i64,
        departure_at: i64,
    ) -> Result<Vec<Visit>> {
        Ok(self
            .visits
            .values()
            .filter(|v| place_id.map_or(true, |id| v.place_id == id))
            .filter(|v| v.overlaps(arrival_at, departure_at))
            .cloned()
            .collect())
    }

    fn find_visits(&self, filter: &VisitFilter) -> Result<Vec<Visit>> {
        Ok(self
            .visits
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect())
    }

    fn create_visit(
        &mut self,
        place_id: i64,
        arrival_at: i64,
        departure_at: i64,
        status: VisitStatus,
    ) -> Result<Visit> {
        let visit = Visit {
            id: self.next_visit_id,
            place_id,
            arrival_at,
            departure_at,
            status,
        };
        self.next_visit_id += 1;
        self.visits.insert(visit.id, visit.clone());
        Ok(visit)
    }

    fn update_visit_status(&mut self, id: i64, status: VisitStatus) -> Result<Option<Visit>> {
        Ok(self.visits.get_mut(&id).map(|v| {
            v.status = status;
            v.clone()
        }))
    }

    fn delete_visits(&mut self, ids: &[i64]) -> Result<usize> {
        Ok(ids
            .iter()
            .filter(|id| self.visits.remove(id).is_some())
            .count())
    }

    fn find_overlapping_suggestions(
        &self,
        arrival_at: i64,
        departure_at: i64,
    ) -> Result<Vec<UnknownVisitSuggestion>> {
        Ok(self
            .suggestions
            .values()
            .filter(|s| s.overlaps(arrival_at, departure_at))
            .cloned()
            .collect())
    }

    fn create_suggestion(
        &mut self,
        center: GpsPoint,
        arrival_at: i64,
        departure_at: i64,
        point_count: u32,
    ) -> Result<UnknownVisitSuggestion> {
        let suggestion = UnknownVisitSuggestion {
            id: self.next_suggestion_id,
            latitude: center.latitude,
            longitude: center.longitude,
            arrival_at,
            departure_at,
            point_count,
            status: VisitStatus::Suggested,
        };
        self.next_suggestion_id += 1;
        self.suggestions.insert(suggestion.id, suggestion.clone());
        Ok(suggestion)
    }

    fn update_suggestion_status(
        &mut self,
        id: i64,
        status: VisitStatus,
    ) -> Result<Option<UnknownVisitSuggestion>> {
        Ok(self.suggestions.get_mut(&id).map(|s| {
            s.status = status;
            s.clone()
        }))
    }

    fn delete_suggestion(&mut self, id: i64) -> Result<bool> {
        Ok(self.suggestions.remove(&id).is_some())
    }

    fn settings(&self) -> Result<DetectionSettings> {
        Ok(self.settings.clone())
    }
}
