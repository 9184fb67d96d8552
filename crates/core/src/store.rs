//! Record store seam and its in-memory implementation.
//!
//! The resolver and the map search only ever read through [`RecordStore`].
//! [`InMemoryStore`] backs the CLI and the tests; it is loaded from a JSON
//! snapshot and keeps every table in a DashMap so concurrent readers never
//! block each other.

use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AudienceResult;
use crate::types::{
    Event, EventId, Group, GroupId, Member, MemberId, Membership, MembershipRole, Rsvp, Subtype,
    SubtypeId,
};

/// Coarse member filter pushed down to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberFilter {
    /// Only subscribed members whose primary address has not bounced.
    pub mailable_only: bool,
}

impl MemberFilter {
    pub fn mailable() -> Self {
        Self {
            mailable_only: true,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

/// Read interface over people, groups and events.
///
/// Implementations own their consistency: callers accept that two calls may
/// observe different data.
pub trait RecordStore: Send + Sync {
    fn find_members(&self, filter: &MemberFilter) -> AudienceResult<Vec<Member>>;

    /// Memberships of one member, carrying the current state of each group.
    fn find_memberships(&self, member_id: &MemberId) -> AudienceResult<Vec<Membership>>;

    /// Events the member has RSVPed to.
    fn find_rsvps(&self, member_id: &MemberId) -> AudienceResult<Vec<EventId>>;

    fn find_groups(&self) -> AudienceResult<Vec<Group>>;

    fn find_events(&self) -> AudienceResult<Vec<Event>>;

    fn find_subtypes(&self) -> AudienceResult<Vec<Subtype>>;
}

/// Raw membership row as stored; group state is joined at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub member_id: MemberId,
    pub group_id: GroupId,
    pub role: MembershipRole,
}

/// Serialized population loaded by [`InMemoryStore::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub memberships: Vec<GroupMembership>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub rsvps: Vec<Rsvp>,
    #[serde(default)]
    pub subtypes: Vec<Subtype>,
}

pub struct InMemoryStore {
    members: DashMap<MemberId, Member>,
    groups: DashMap<GroupId, Group>,
    memberships: DashMap<MemberId, Vec<GroupMembership>>,
    events: DashMap<EventId, Event>,
    rsvps: DashMap<MemberId, Vec<EventId>>,
    subtypes: DashMap<SubtypeId, Subtype>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            groups: DashMap::new(),
            memberships: DashMap::new(),
            events: DashMap::new(),
            rsvps: DashMap::new(),
            subtypes: DashMap::new(),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for member in snapshot.members {
            store.insert_member(member);
        }
        for group in snapshot.groups {
            store.insert_group(group);
        }
        for membership in snapshot.memberships {
            store.add_membership(membership);
        }
        for event in snapshot.events {
            store.insert_event(event);
        }
        for rsvp in snapshot.rsvps {
            store.add_rsvp(rsvp);
        }
        for subtype in snapshot.subtypes {
            store.insert_subtype(subtype);
        }
        store
    }

    /// Load a JSON snapshot from disk.
    pub fn load(path: impl AsRef<Path>) -> AudienceResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        info!(
            path = %path.display(),
            members = snapshot.members.len(),
            groups = snapshot.groups.len(),
            events = snapshot.events.len(),
            "loaded record snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn insert_member(&self, member: Member) {
        self.members.insert(member.id, member);
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.insert(group.id, group);
    }

    pub fn add_membership(&self, membership: GroupMembership) {
        self.memberships
            .entry(membership.member_id)
            .or_default()
            .push(membership);
    }

    pub fn insert_event(&self, event: Event) {
        self.events.insert(event.id, event);
    }

    pub fn add_rsvp(&self, rsvp: Rsvp) {
        self.rsvps.entry(rsvp.member_id).or_default().push(rsvp.event_id);
    }

    pub fn insert_subtype(&self, subtype: Subtype) {
        self.subtypes.insert(subtype.id, subtype);
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryStore {
    fn find_members(&self, filter: &MemberFilter) -> AudienceResult<Vec<Member>> {
        Ok(self
            .members
            .iter()
            .filter(|m| !filter.mailable_only || m.is_mailable())
            .map(|m| m.value().clone())
            .collect())
    }

    fn find_memberships(&self, member_id: &MemberId) -> AudienceResult<Vec<Membership>> {
        let Some(rows) = self.memberships.get(member_id) else {
            return Ok(Vec::new());
        };
        let mut memberships = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            match self.groups.get(&row.group_id) {
                Some(group) => memberships.push(Membership {
                    member_id: row.member_id,
                    group_id: row.group_id,
                    role: row.role,
                    group_published: group.published,
                    group_subtypes: group.subtypes.clone(),
                }),
                None => debug!(group_id = %row.group_id, "membership references unknown group"),
            }
        }
        Ok(memberships)
    }

    fn find_rsvps(&self, member_id: &MemberId) -> AudienceResult<Vec<EventId>> {
        Ok(self
            .rsvps
            .get(member_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    fn find_groups(&self) -> AudienceResult<Vec<Group>> {
        Ok(self.groups.iter().map(|g| g.value().clone()).collect())
    }

    fn find_events(&self) -> AudienceResult<Vec<Event>> {
        Ok(self.events.iter().map(|e| e.value().clone()).collect())
    }

    fn find_subtypes(&self) -> AudienceResult<Vec<Subtype>> {
        Ok(self.subtypes.iter().map(|s| s.value().clone()).collect())
    }
}
