//! Core segmentation engine — resolves a segment definition to its subscribers.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use audience_core::error::AudienceResult;
use audience_core::store::{MemberFilter, RecordStore};
use audience_core::types::{EventId, Member, MemberId, MembershipRole, Polygon, SubtypeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::predicates::{Candidate, DateField, Predicate};

/// A named audience used for targeted mailing. Pure configuration: every
/// field left empty leaves the audience unconstrained on that axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDefinition {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Restrict to members of published groups holding at least this role.
    #[serde(default)]
    pub group_role: Option<MembershipRole>,
    /// Only consulted together with `group_role`.
    #[serde(default)]
    pub group_subtypes: BTreeSet<SubtypeId>,
    #[serde(default)]
    pub events: BTreeSet<EventId>,
    #[serde(default)]
    pub area: Option<Polygon>,
    #[serde(default)]
    pub registration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl SegmentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tags: BTreeSet::new(),
            group_role: None,
            group_subtypes: BTreeSet::new(),
            events: BTreeSet::new(),
            area: None,
            registration_date: None,
            last_login: None,
        }
    }

    /// The active predicates, in evaluation order.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        if !self.tags.is_empty() {
            predicates.push(Predicate::Tags {
                tags: self.tags.clone(),
            });
        }
        if let Some(role) = self.group_role {
            predicates.push(Predicate::Role {
                role,
                subtypes: self.group_subtypes.clone(),
            });
        }
        if let Some(area) = &self.area {
            predicates.push(Predicate::Area { area: area.clone() });
        }
        if let Some(threshold) = self.registration_date {
            predicates.push(Predicate::DateAfter {
                field: DateField::Registration,
                threshold,
            });
        }
        if let Some(threshold) = self.last_login {
            predicates.push(Predicate::DateAfter {
                field: DateField::LastLogin,
                threshold,
            });
        }
        if !self.events.is_empty() {
            predicates.push(Predicate::Events {
                events: self.events.clone(),
            });
        }

        predicates
    }
}

/// Evaluates segment definitions against a record store. Holds no state of
/// its own, so one resolver can serve any number of concurrent callers.
pub struct SegmentResolver {
    store: Arc<dyn RecordStore>,
}

impl SegmentResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Subscribers of the segment, unique and ordered by id.
    pub fn resolve(&self, definition: &SegmentDefinition) -> AudienceResult<Vec<Member>> {
        Ok(self.matching(definition)?.into_values().collect())
    }

    /// Audience size. Always equal to `resolve(definition)?.len()`.
    pub fn resolve_count(&self, definition: &SegmentDefinition) -> AudienceResult<usize> {
        Ok(self.matching(definition)?.len())
    }

    /// Keyset page of the resolved audience: up to `limit` members whose id
    /// is strictly greater than `after`. Walking pages with the last id of
    /// the previous page visits every subscriber exactly once as long as the
    /// population does not change in between.
    pub fn resolve_page(
        &self,
        definition: &SegmentDefinition,
        after: Option<MemberId>,
        limit: usize,
    ) -> AudienceResult<Vec<Member>> {
        let matched = self.matching(definition)?;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(matched
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn matching(
        &self,
        definition: &SegmentDefinition,
    ) -> AudienceResult<BTreeMap<MemberId, Member>> {
        let predicates = definition.predicates();
        let (local, relational): (Vec<&Predicate>, Vec<&Predicate>) =
            predicates.iter().partition(|p| p.is_local());
        let needs_memberships = relational.iter().any(|p| p.needs_memberships());
        let needs_rsvps = relational.iter().any(|p| p.needs_rsvps());

        let population = self.store.find_members(&MemberFilter::mailable())?;
        let scanned = population.len();
        let mut matched = BTreeMap::new();

        for member in population {
            if !member.is_mailable() || matched.contains_key(&member.id) {
                continue;
            }
            if !local.iter().all(|p| p.matches(&Candidate::bare(&member))) {
                continue;
            }

            if !relational.is_empty() {
                let memberships = if needs_memberships {
                    self.store.find_memberships(&member.id)?
                } else {
                    Vec::new()
                };
                let rsvps = if needs_rsvps {
                    self.store.find_rsvps(&member.id)?
                } else {
                    Vec::new()
                };
                let candidate = Candidate {
                    member: &member,
                    memberships: &memberships,
                    rsvps: &rsvps,
                };
                if !relational.iter().all(|p| p.matches(&candidate)) {
                    continue;
                }
            }

            matched.insert(member.id, member);
        }

        metrics::counter!("segments.resolved").increment(1);
        metrics::counter!("segments.members_matched").increment(matched.len() as u64);
        debug!(
            segment_id = %definition.id,
            segment = %definition.name,
            predicates = predicates.len(),
            scanned,
            matched = matched.len(),
            "resolved segment"
        );

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_core::error::AudienceError;
    use audience_core::store::{GroupMembership, InMemoryStore};
    use audience_core::types::{
        EmailAddress, Event, EventVisibility, GeoPoint, Group, Membership, Rsvp, Subtype,
    };
    use chrono::{Duration, TimeZone};

    fn member(n: u128, tags: &[&str]) -> Member {
        Member {
            id: Uuid::from_u128(n),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            subscribed: true,
            emails: vec![EmailAddress {
                address: format!("person{n}@example.org"),
                bounced: false,
            }],
            coordinates: None,
            created: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
                + Duration::days(n as i64),
            last_login: None,
        }
    }

    fn resolver(store: InMemoryStore) -> SegmentResolver {
        SegmentResolver::new(Arc::new(store))
    }

    fn ids(members: &[Member]) -> Vec<u128> {
        members.iter().map(|m| m.id.as_u128()).collect()
    }

    #[test]
    fn test_empty_definition_returns_mailable_members_ordered() {
        let store = InMemoryStore::new();
        store.insert_member(member(3, &[]));
        store.insert_member(member(1, &[]));
        store.insert_member(Member {
            subscribed: false,
            ..member(2, &[])
        });
        let mut bounced = member(4, &[]);
        bounced.emails[0].bounced = true;
        store.insert_member(bounced);
        store.insert_member(Member {
            emails: Vec::new(),
            ..member(5, &[])
        });

        let resolver = resolver(store);
        let def = SegmentDefinition::new("everyone");
        let resolved = resolver.resolve(&def).unwrap();
        assert_eq!(ids(&resolved), vec![1, 3]);
        assert_eq!(resolver.resolve_count(&def).unwrap(), 2);
    }

    #[test]
    fn test_tags_and_dates_narrow() {
        let store = InMemoryStore::new();
        store.insert_member(member(1, &["donor"]));
        store.insert_member(member(2, &["volunteer"]));
        store.insert_member(Member {
            last_login: Some(Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap()),
            ..member(3, &["donor", "volunteer"])
        });
        let resolver = resolver(store);

        let mut def = SegmentDefinition::new("donors");
        def.tags.insert("donor".to_string());
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![1, 3]);

        def.registration_date = Some(Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![3]);

        def.registration_date = None;
        def.last_login = Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![3]);
    }

    #[test]
    fn test_role_and_subtype_filters() {
        let store = InMemoryStore::new();
        let published = Group {
            id: Uuid::from_u128(100),
            name: "Published".to_string(),
            published: true,
            subtypes: BTreeSet::from([1]),
            coordinates: None,
        };
        let hidden = Group {
            id: Uuid::from_u128(101),
            name: "Hidden".to_string(),
            published: false,
            subtypes: BTreeSet::from([2]),
            coordinates: None,
        };
        store.insert_group(published.clone());
        store.insert_group(hidden.clone());
        store.insert_subtype(Subtype {
            id: 1,
            label: "local".to_string(),
        });

        for (n, group, role) in [
            (1, &published, MembershipRole::Member),
            (2, &published, MembershipRole::Manager),
            (3, &published, MembershipRole::Referent),
            (4, &hidden, MembershipRole::Referent),
        ] {
            store.insert_member(member(n, &[]));
            store.add_membership(GroupMembership {
                member_id: Uuid::from_u128(n),
                group_id: group.id,
                role,
            });
        }
        store.insert_member(member(5, &[]));
        let resolver = resolver(store);

        let mut def = SegmentDefinition::new("groups");
        def.group_role = Some(MembershipRole::Member);
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![1, 2, 3]);

        def.group_role = Some(MembershipRole::Manager);
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![2, 3]);

        def.group_role = Some(MembershipRole::Referent);
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![3]);

        def.group_subtypes.insert(2);
        assert!(resolver.resolve(&def).unwrap().is_empty());

        // Subtypes without a role do not filter.
        def.group_role = None;
        assert_eq!(resolver.resolve_count(&def).unwrap(), 5);
    }

    #[test]
    fn test_area_boundary_is_included() {
        let store = InMemoryStore::new();
        let at = |n, lon, lat| Member {
            coordinates: Some(GeoPoint::new(lon, lat)),
            ..member(n, &[])
        };
        store.insert_member(at(1, 5.0, 5.0));
        store.insert_member(at(2, 10.0, 3.0));
        store.insert_member(at(3, 11.0, 3.0));
        store.insert_member(member(4, &[]));
        let resolver = resolver(store);

        let mut def = SegmentDefinition::new("area");
        def.area = Some(Polygon::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(10.0, 0.0),
            GeoPoint::new(10.0, 10.0),
            GeoPoint::new(0.0, 10.0),
        ]));
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_event_participants() {
        let store = InMemoryStore::new();
        let event = Event {
            id: Uuid::from_u128(500),
            name: "Meeting".to_string(),
            subtype: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            visibility: EventVisibility::Public,
            coordinates: None,
            organizer_groups: BTreeSet::new(),
        };
        store.insert_event(event.clone());
        store.insert_member(member(1, &[]));
        store.insert_member(member(2, &[]));
        store.add_rsvp(Rsvp {
            member_id: Uuid::from_u128(2),
            event_id: event.id,
        });
        let resolver = resolver(store);

        let mut def = SegmentDefinition::new("participants");
        def.events.insert(event.id);
        assert_eq!(ids(&resolver.resolve(&def).unwrap()), vec![2]);
    }

    #[test]
    fn test_pages_cover_audience_once() {
        let store = InMemoryStore::new();
        for n in 1..=7 {
            store.insert_member(member(n, &[]));
        }
        let resolver = resolver(store);
        let def = SegmentDefinition::new("all");

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = resolver.resolve_page(&def, after, 3).unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().map(|m| m.id);
            seen.extend(ids(&page));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    struct UnavailableStore;

    impl RecordStore for UnavailableStore {
        fn find_members(&self, _filter: &MemberFilter) -> AudienceResult<Vec<Member>> {
            Err(AudienceError::Store("connection refused".to_string()))
        }
        fn find_memberships(&self, _id: &MemberId) -> AudienceResult<Vec<Membership>> {
            Ok(Vec::new())
        }
        fn find_rsvps(&self, _id: &MemberId) -> AudienceResult<Vec<EventId>> {
            Ok(Vec::new())
        }
        fn find_groups(&self) -> AudienceResult<Vec<Group>> {
            Ok(Vec::new())
        }
        fn find_events(&self) -> AudienceResult<Vec<Event>> {
            Ok(Vec::new())
        }
        fn find_subtypes(&self) -> AudienceResult<Vec<Subtype>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_store_failure_propagates() {
        let resolver = SegmentResolver::new(Arc::new(UnavailableStore));
        let err = resolver
            .resolve_count(&SegmentDefinition::new("x"))
            .unwrap_err();
        assert!(matches!(err, AudienceError::Store(_)));
    }
}
