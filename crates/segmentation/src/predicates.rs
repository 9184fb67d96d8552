//! Predicate types and evaluation logic for segment criteria.

use std::collections::BTreeSet;

use audience_core::types::{EventId, Member, Membership, MembershipRole, Polygon, SubtypeId};
use audience_geo::covered_by;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Member timestamp compared by [`Predicate::DateAfter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    Registration,
    LastLogin,
}

/// One filter criterion. Segments combine their active predicates with AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Member holds at least one of the tags. Empty set matches everyone.
    Tags { tags: BTreeSet<String> },
    /// Member has a membership with at least `role` in a published group,
    /// of one of `subtypes` when that set is non-empty.
    Role {
        role: MembershipRole,
        subtypes: BTreeSet<SubtypeId>,
    },
    /// Member coordinates covered by the area. Members without coordinates
    /// never match.
    Area { area: Polygon },
    /// Member timestamp strictly after the threshold.
    DateAfter {
        field: DateField,
        threshold: DateTime<Utc>,
    },
    /// Member RSVPed to at least one of the events. Empty set matches everyone.
    Events { events: BTreeSet<EventId> },
}

/// A member together with the relations predicates may look at.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub member: &'a Member,
    pub memberships: &'a [Membership],
    pub rsvps: &'a [EventId],
}

impl<'a> Candidate<'a> {
    pub fn bare(member: &'a Member) -> Self {
        Self {
            member,
            memberships: &[],
            rsvps: &[],
        }
    }
}

impl Predicate {
    pub fn matches(&self, candidate: &Candidate<'_>) -> bool {
        let member = candidate.member;
        match self {
            Predicate::Tags { tags } => {
                tags.is_empty() || member.tags.iter().any(|t| tags.contains(t))
            }
            Predicate::Role { role, subtypes } => candidate
                .memberships
                .iter()
                .any(|m| membership_qualifies(m, *role, subtypes)),
            Predicate::Area { area } => member
                .coordinates
                .as_ref()
                .is_some_and(|point| covered_by(point, area)),
            Predicate::DateAfter { field, threshold } => {
                let value = match field {
                    DateField::Registration => Some(member.created),
                    DateField::LastLogin => member.last_login,
                };
                value.is_some_and(|v| v > *threshold)
            }
            Predicate::Events { events } => {
                events.is_empty() || candidate.rsvps.iter().any(|e| events.contains(e))
            }
        }
    }

    pub fn needs_memberships(&self) -> bool {
        matches!(self, Predicate::Role { .. })
    }

    pub fn needs_rsvps(&self) -> bool {
        matches!(self, Predicate::Events { events } if !events.is_empty())
    }

    /// Whether the predicate can be decided from the member record alone.
    pub fn is_local(&self) -> bool {
        !self.needs_memberships() && !self.needs_rsvps()
    }
}

/// Role, publication and subtype all have to hold on the same membership.
fn membership_qualifies(
    membership: &Membership,
    role: MembershipRole,
    subtypes: &BTreeSet<SubtypeId>,
) -> bool {
    membership.group_published
        && membership.role >= role
        && (subtypes.is_empty() || !membership.group_subtypes.is_disjoint(subtypes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_core::types::{EmailAddress, GeoPoint};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn member() -> Member {
        Member {
            id: Uuid::new_v4(),
            tags: BTreeSet::from(["volunteer".to_string()]),
            subscribed: true,
            emails: vec![EmailAddress {
                address: "a@example.org".to_string(),
                bounced: false,
            }],
            coordinates: Some(GeoPoint::new(2.35, 48.85)),
            created: Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap(),
            last_login: None,
        }
    }

    fn membership(role: MembershipRole, published: bool, subtypes: &[SubtypeId]) -> Membership {
        Membership {
            member_id: Uuid::nil(),
            group_id: Uuid::new_v4(),
            role,
            group_published: published,
            group_subtypes: subtypes.iter().copied().collect(),
        }
    }

    fn role(role: MembershipRole, subtypes: &[SubtypeId]) -> Predicate {
        Predicate::Role {
            role,
            subtypes: subtypes.iter().copied().collect(),
        }
    }

    #[test]
    fn test_tags_any_of() {
        let m = member();
        let c = Candidate::bare(&m);
        let tags = |t: &[&str]| Predicate::Tags {
            tags: t.iter().map(|s| s.to_string()).collect(),
        };
        assert!(tags(&[]).matches(&c));
        assert!(tags(&["volunteer", "donor"]).matches(&c));
        assert!(!tags(&["donor"]).matches(&c));
    }

    #[test]
    fn test_role_threshold() {
        let m = member();
        let manager = [membership(MembershipRole::Manager, true, &[])];
        let c = Candidate {
            member: &m,
            memberships: &manager,
            rsvps: &[],
        };
        assert!(role(MembershipRole::Member, &[]).matches(&c));
        assert!(role(MembershipRole::Manager, &[]).matches(&c));
        assert!(!role(MembershipRole::Referent, &[]).matches(&c));

        let referent = [membership(MembershipRole::Referent, true, &[])];
        let c = Candidate {
            member: &m,
            memberships: &referent,
            rsvps: &[],
        };
        assert!(role(MembershipRole::Manager, &[]).matches(&c));
        assert!(role(MembershipRole::Referent, &[]).matches(&c));
    }

    #[test]
    fn test_role_requires_published_group() {
        let m = member();
        let rows = [membership(MembershipRole::Referent, false, &[])];
        let c = Candidate {
            member: &m,
            memberships: &rows,
            rsvps: &[],
        };
        assert!(!role(MembershipRole::Member, &[]).matches(&c));
        assert!(!role(MembershipRole::Member, &[]).matches(&Candidate::bare(&m)));
    }

    #[test]
    fn test_role_and_subtype_must_hold_on_same_membership() {
        let m = member();
        // Manager of an unrelated group, plain member of a subtype-7 group.
        let rows = [
            membership(MembershipRole::Manager, true, &[1]),
            membership(MembershipRole::Member, true, &[7]),
        ];
        let c = Candidate {
            member: &m,
            memberships: &rows,
            rsvps: &[],
        };
        assert!(role(MembershipRole::Member, &[7]).matches(&c));
        assert!(role(MembershipRole::Manager, &[1, 7]).matches(&c));
        assert!(!role(MembershipRole::Manager, &[7]).matches(&c));
    }

    #[test]
    fn test_area_excludes_members_without_coordinates() {
        let area = Polygon::new(vec![
            GeoPoint::new(2.0, 48.0),
            GeoPoint::new(3.0, 48.0),
            GeoPoint::new(3.0, 49.0),
            GeoPoint::new(2.0, 49.0),
        ]);
        let predicate = Predicate::Area { area };

        let inside = member();
        assert!(predicate.matches(&Candidate::bare(&inside)));

        let on_edge = Member {
            coordinates: Some(GeoPoint::new(3.0, 48.5)),
            ..member()
        };
        assert!(predicate.matches(&Candidate::bare(&on_edge)));

        let nowhere = Member {
            coordinates: None,
            ..member()
        };
        assert!(!predicate.matches(&Candidate::bare(&nowhere)));
    }

    #[test]
    fn test_date_after_is_strict() {
        let m = member();
        let at = |field, threshold| Predicate::DateAfter { field, threshold };

        assert!(at(DateField::Registration, m.created - Duration::seconds(1))
            .matches(&Candidate::bare(&m)));
        assert!(!at(DateField::Registration, m.created).matches(&Candidate::bare(&m)));

        // Never logged in never matches a last-login bound.
        assert!(!at(DateField::LastLogin, m.created).matches(&Candidate::bare(&m)));
        let logged = Member {
            last_login: Some(m.created + Duration::days(10)),
            ..m.clone()
        };
        assert!(at(DateField::LastLogin, m.created).matches(&Candidate::bare(&logged)));
    }

    #[test]
    fn test_events_any_of() {
        let m = member();
        let attended = Uuid::new_v4();
        let rsvps = [attended];
        let c = Candidate {
            member: &m,
            memberships: &[],
            rsvps: &rsvps,
        };
        let events = |ids: &[EventId]| Predicate::Events {
            events: ids.iter().copied().collect(),
        };
        assert!(events(&[attended, Uuid::new_v4()]).matches(&c));
        assert!(!events(&[Uuid::new_v4()]).matches(&c));
        assert!(events(&[]).matches(&Candidate::bare(&m)));
        assert!(events(&[]).is_local());
        assert!(events(&[attended]).needs_rsvps());
    }

    #[test]
    fn test_predicates_serialize_tagged() {
        let json = serde_json::to_value(role(MembershipRole::Referent, &[2])).unwrap();
        assert_eq!(json["kind"], "role");
        assert_eq!(json["role"], "referent");
    }
}
