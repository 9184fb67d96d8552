//! Group and event listings for the map, filtered by bounding box and
//! subtype label.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use audience_core::config::{BboxPolicy, MapConfig};
use audience_core::error::{AudienceError, AudienceResult};
use audience_core::store::RecordStore;
use audience_core::types::{
    Event, EventId, EventVisibility, GeoPoint, Group, GroupId, Polygon, SubtypeId,
};
use audience_geo::{intersects, parse_bbox, Geometry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const BBOX_ERROR_MESSAGE: &str =
    "bbox must be an array of 4 floats [lon1, lat1, lon2, lat2]";

/// Query parameters accepted by both map listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapQuery {
    /// Raw `bbox` parameter, as sent by the client.
    #[serde(default)]
    pub bbox: Option<String>,
    /// Subtype labels; an item matches if it has any of them.
    #[serde(default)]
    pub subtypes: Vec<String>,
    /// Caller may see events that are not publicly listed.
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub include_past: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapGroup {
    pub id: GroupId,
    pub name: String,
    pub subtypes: Vec<String>,
    pub coordinates: GeoPoint,
    pub current_events_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapEvent {
    pub id: EventId,
    pub name: String,
    pub subtype: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub coordinates: GeoPoint,
}

pub struct MapSearch {
    store: Arc<dyn RecordStore>,
    config: MapConfig,
}

impl MapSearch {
    pub fn new(store: Arc<dyn RecordStore>, config: MapConfig) -> Self {
        Self { store, config }
    }

    /// Value for the `Cache-Control` header of the listing endpoints.
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.config.cache_max_age_secs)
    }

    /// Published groups with coordinates, ordered by id.
    pub fn groups(&self, query: &MapQuery, now: DateTime<Utc>) -> AudienceResult<Vec<MapGroup>> {
        let area = self.spatial_filter(query.bbox.as_deref())?;
        let labels = self.labels()?;
        let wanted = wanted_subtypes(&labels, &query.subtypes);
        let events = self.store.find_events()?;

        let mut groups: Vec<MapGroup> = self
            .store
            .find_groups()?
            .into_iter()
            .filter(|g| g.published)
            .filter_map(|g| g.coordinates.map(|point| (g, point)))
            .filter(|(_, point)| area.as_ref().map_or(true, |a| covers(a, point)))
            .filter(|(g, _)| {
                wanted
                    .as_ref()
                    .map_or(true, |w| !g.subtypes.is_disjoint(w))
            })
            .map(|(g, point)| MapGroup {
                current_events_count: self.current_events(&g, &events, now),
                subtypes: g
                    .subtypes
                    .iter()
                    .filter_map(|id| labels.get(id).cloned())
                    .collect(),
                id: g.id,
                name: g.name,
                coordinates: point,
            })
            .collect();
        groups.sort_by_key(|g| g.id);

        metrics::counter!("map.groups.served").increment(groups.len() as u64);
        debug!(count = groups.len(), filtered = area.is_some(), "map groups");
        Ok(groups)
    }

    /// Events with coordinates, ordered by start time then id.
    pub fn events(&self, query: &MapQuery, now: DateTime<Utc>) -> AudienceResult<Vec<MapEvent>> {
        let area = self.spatial_filter(query.bbox.as_deref())?;
        let labels = self.labels()?;
        let wanted = wanted_subtypes(&labels, &query.subtypes);

        let mut events: Vec<MapEvent> = self
            .store
            .find_events()?
            .into_iter()
            .filter(|e| query.include_hidden || e.visibility == EventVisibility::Public)
            .filter(|e| query.include_past || e.end_time >= now)
            .filter_map(|e| e.coordinates.map(|point| (e, point)))
            .filter(|(_, point)| area.as_ref().map_or(true, |a| covers(a, point)))
            .filter(|(e, _)| {
                wanted
                    .as_ref()
                    .map_or(true, |w| e.subtype.is_some_and(|s| w.contains(&s)))
            })
            .map(|(e, point)| MapEvent {
                subtype: e.subtype.and_then(|id| labels.get(&id).cloned()),
                id: e.id,
                name: e.name,
                start_time: e.start_time,
                end_time: e.end_time,
                coordinates: point,
            })
            .collect();
        events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));

        metrics::counter!("map.events.served").increment(events.len() as u64);
        debug!(count = events.len(), filtered = area.is_some(), "map events");
        Ok(events)
    }

    /// Whether a published group located in `area` currently organizes a
    /// public event.
    pub fn active_group_in_area_exists(
        &self,
        area: &Polygon,
        now: DateTime<Utc>,
    ) -> AudienceResult<bool> {
        let area = Geometry::Polygon(area.clone());
        let events = self.store.find_events()?;
        Ok(self.store.find_groups()?.iter().any(|g| {
            g.published
                && g.coordinates.is_some_and(|point| covers(&area, &point))
                && self.current_events(g, &events, now) > 0
        }))
    }

    /// Turns the raw bbox parameter into a spatial filter, honouring the
    /// configured policy for invalid input.
    fn spatial_filter(&self, raw: Option<&str>) -> AudienceResult<Option<Geometry>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match parse_bbox(raw) {
            Some(bbox) => Ok(Some(Geometry::Polygon(bbox.to_polygon()))),
            None => {
                metrics::counter!("bbox.rejected").increment(1);
                match self.config.bbox_policy {
                    BboxPolicy::Reject => {
                        Err(AudienceError::Validation(BBOX_ERROR_MESSAGE.to_string()))
                    }
                    BboxPolicy::Ignore => {
                        warn!(bbox = raw, "ignoring invalid bbox");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn labels(&self) -> AudienceResult<HashMap<SubtypeId, String>> {
        Ok(self
            .store
            .find_subtypes()?
            .into_iter()
            .map(|s| (s.id, s.label))
            .collect())
    }

    /// Public events organized by the group and starting inside the
    /// activity window around `now`.
    fn current_events(&self, group: &Group, events: &[Event], now: DateTime<Utc>) -> usize {
        let from = now - Duration::days(self.config.active_past_days);
        let to = now + Duration::days(self.config.active_future_days);
        events
            .iter()
            .filter(|e| e.organizer_groups.contains(&group.id))
            .filter(|e| e.visibility == EventVisibility::Public)
            .filter(|e| e.start_time >= from && e.start_time <= to)
            .count()
    }
}

/// Map search wants overlap with the box, not containment.
fn covers(area: &Geometry, point: &GeoPoint) -> bool {
    intersects(area, &Geometry::Point(*point))
}

/// Subtype ids carrying one of the requested labels. `None` when no label
/// was requested; unknown labels select nothing.
fn wanted_subtypes(
    labels: &HashMap<SubtypeId, String>,
    requested: &[String],
) -> Option<BTreeSet<SubtypeId>> {
    if requested.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .filter(|(_, label)| requested.contains(label))
            .map(|(id, _)| *id)
            .collect(),
    )
}
