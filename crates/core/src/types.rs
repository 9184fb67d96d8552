use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type MemberId = Uuid;
pub type GroupId = Uuid;
pub type EventId = Uuid;
pub type SubtypeId = u32;

/// A (longitude, latitude) pair treated as planar coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Polygon with one exterior ring and optional interior rings (holes).
/// Rings are implicitly closed: the last vertex need not repeat the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<GeoPoint>,
    #[serde(default)]
    pub interiors: Vec<Vec<GeoPoint>>,
}

impl Polygon {
    pub fn new(exterior: Vec<GeoPoint>) -> Self {
        Self {
            exterior,
            interiors: Vec::new(),
        }
    }

    pub fn with_hole(mut self, ring: Vec<GeoPoint>) -> Self {
        self.interiors.push(ring);
        self
    }

    /// All rings, exterior first.
    pub fn rings(&self) -> impl Iterator<Item = &[GeoPoint]> {
        std::iter::once(self.exterior.as_slice()).chain(self.interiors.iter().map(Vec::as_slice))
    }
}

/// An email address attached to a member. The first address of a member is
/// the primary one used for mailings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    pub address: String,
    #[serde(default)]
    pub bounced: bool,
}

/// A person registered on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub subscribed: bool,
    #[serde(default)]
    pub emails: Vec<EmailAddress>,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl Member {
    pub fn primary_email(&self) -> Option<&EmailAddress> {
        self.emails.first()
    }

    /// Subscribed, with a primary address that has not bounced.
    pub fn is_mailable(&self) -> bool {
        self.subscribed && self.primary_email().is_some_and(|e| !e.bounced)
    }
}

/// Role held by a member inside a support group. Ordered from the least to
/// the most responsibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Member,
    Manager,
    Referent,
}

impl MembershipRole {
    pub fn label(&self) -> &'static str {
        match self {
            MembershipRole::Member => "group members",
            MembershipRole::Manager => "group managers and referents",
            MembershipRole::Referent => "group referents",
        }
    }
}

/// Member ↔ group relation, with the group's publication flag and subtypes
/// copied onto it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub member_id: MemberId,
    pub group_id: GroupId,
    pub role: MembershipRole,
    pub group_published: bool,
    #[serde(default)]
    pub group_subtypes: BTreeSet<SubtypeId>,
}

/// A label used by the map to filter groups or events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtype {
    pub id: SubtypeId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub subtypes: BTreeSet<SubtypeId>,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventVisibility {
    Public,
    Organizer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    #[serde(default)]
    pub subtype: Option<SubtypeId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub visibility: EventVisibility,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub organizer_groups: BTreeSet<GroupId>,
}

/// An RSVP of a member to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rsvp {
    pub member_id: MemberId,
    pub event_id: EventId,
}
