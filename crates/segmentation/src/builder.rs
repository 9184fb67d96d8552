//! Segment builder — fluent API for constructing segment definitions.

use audience_core::types::{EventId, MembershipRole, Polygon, SubtypeId};
use audience_geo::BoundingBox;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::SegmentDefinition;

pub struct SegmentBuilder {
    definition: SegmentDefinition,
}

impl SegmentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: SegmentDefinition::new(name),
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.definition.id = id;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.definition.tags.insert(tag.into());
        self
    }

    pub fn group_role(mut self, role: MembershipRole) -> Self {
        self.definition.group_role = Some(role);
        self
    }

    pub fn group_subtype(mut self, subtype: SubtypeId) -> Self {
        self.definition.group_subtypes.insert(subtype);
        self
    }

    pub fn attended(mut self, event: EventId) -> Self {
        self.definition.events.insert(event);
        self
    }

    pub fn within(mut self, area: Polygon) -> Self {
        self.definition.area = Some(area);
        self
    }

    pub fn within_bbox(self, bbox: &BoundingBox) -> Self {
        self.within(bbox.to_polygon())
    }

    pub fn registered_after(mut self, at: DateTime<Utc>) -> Self {
        self.definition.registration_date = Some(at);
        self
    }

    pub fn logged_in_after(mut self, at: DateTime<Utc>) -> Self {
        self.definition.last_login = Some(at);
        self
    }

    pub fn build(self) -> SegmentDefinition {
        self.definition
    }
}
