//! Session entity - A scheduled, bookable activity instance.
//!
//! The roster (`participants`) and the eligible division set are stored as JSON
//! columns holding plain ids, resolved through lookups when needed.

use std::collections::BTreeSet;

use chrono::TimeDelta;
use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Hours before start after which members may no longer cancel, when unset
pub const DEFAULT_CANCELLATION_DEADLINE_HOURS: i32 = 24;

/// Session database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Where the session takes place (e.g. "Court A - Main Hall")
    pub venue: String,
    /// Divisions allowed to attend
    #[sea_orm(column_type = "Json")]
    pub divisions: Divisions,
    pub starts_at: DateTimeUtc,
    pub ends_at: DateTimeUtc,
    /// Credits charged per booking
    pub credit_cost: i64,
    pub max_participants: i32,
    /// Member ids currently holding a seat, in booking order
    #[sea_orm(column_type = "Json")]
    pub participants: Participants,
    /// Admin member id that created the session
    pub created_by: String,
    /// Shared id of the recurrence batch this session was generated from
    pub parent_session_id: Option<String>,
    pub cancellation_deadline_hours: Option<i32>,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Configured cancellation deadline, falling back to
    /// [`DEFAULT_CANCELLATION_DEADLINE_HOURS`].
    #[must_use]
    pub fn cancellation_deadline_hours(&self) -> i64 {
        i64::from(
            self.cancellation_deadline_hours
                .unwrap_or(DEFAULT_CANCELLATION_DEADLINE_HOURS),
        )
    }

    #[must_use]
    pub fn cancellation_deadline(&self) -> TimeDelta {
        TimeDelta::hours(self.cancellation_deadline_hours())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participants.len() >= usize::try_from(self.max_participants).unwrap_or(0)
    }

    #[must_use]
    pub fn has_participant(&self, member_id: &str) -> bool {
        self.participants.contains(member_id)
    }

    #[must_use]
    pub fn is_open_to(&self, division: i32) -> bool {
        self.divisions.0.contains(&division)
    }
}

/// Set of division numbers a session is open to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Divisions(pub BTreeSet<i32>);

impl Divisions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<i32> for Divisions {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[i32; N]> for Divisions {
    fn from(divisions: [i32; N]) -> Self {
        divisions.into_iter().collect()
    }
}

/// Ordered list of participant member ids; never holds duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Participants(pub Vec<String>);

impl Participants {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, member_id: &str) -> bool {
        self.0.iter().any(|id| id == member_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

/// Sessions are not related to other entities; the roster holds plain ids.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session(max_participants: i32, participants: &[&str]) -> Model {
        let now = Utc::now();
        Model {
            id: "session-1".to_string(),
            venue: "Court A".to_string(),
            divisions: Divisions::from([3, 4]),
            starts_at: now,
            ends_at: now,
            credit_cost: 2,
            max_participants,
            participants: Participants(participants.iter().map(ToString::to_string).collect()),
            created_by: "admin-001".to_string(),
            parent_session_id: None,
            cancellation_deadline_hours: None,
            created_at: now,
        }
    }

    #[test]
    fn test_cancellation_deadline_defaults_to_24_hours() {
        let mut s = session(4, &[]);
        assert_eq!(s.cancellation_deadline(), TimeDelta::hours(24));

        s.cancellation_deadline_hours = Some(6);
        assert_eq!(s.cancellation_deadline(), TimeDelta::hours(6));
    }

    #[test]
    fn test_is_full_and_membership() {
        let s = session(2, &["a", "b"]);
        assert!(s.is_full());
        assert!(s.has_participant("a"));
        assert!(!s.has_participant("c"));
        assert!(s.is_open_to(3));
        assert!(!s.is_open_to(5));
    }
}
