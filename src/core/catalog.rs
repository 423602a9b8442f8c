//! Session catalog - creating single sessions and reading the live catalog.

use std::collections::BTreeSet;

use crate::{
    core::{membership::require_member, new_id},
    entities::{Divisions, Participants, Session, session},
    errors::{Error, Result},
};
use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::info;

/// Longest accepted session, in hours
pub const MAX_SESSION_HOURS: i64 = 24;

/// Parameters of a session, shared by single and recurring creation.
///
/// For recurring generation only the time of day of `starts_at` and the
/// length `ends_at - starts_at` are reused; `starts_at`'s date is the first
/// candidate day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTemplate {
    pub venue: String,
    pub divisions: BTreeSet<i32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Charged per booking, refunded on cancellation
    pub credit_cost: i64,
    pub max_participants: i32,
    /// Hours before the start after which members can no longer cancel;
    /// None uses [`session::DEFAULT_CANCELLATION_DEADLINE_HOURS`]
    pub cancellation_deadline_hours: Option<i32>,
}

impl SessionTemplate {
    /// Rejects malformed templates before anything is read or written.
    ///
    /// # Errors
    /// A validation error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.venue.trim().is_empty() {
            return Err(Error::InvalidSchedule {
                message: "venue cannot be empty".to_string(),
            });
        }
        if self.divisions.is_empty() {
            return Err(Error::EmptyDivisions);
        }
        if let Some(&division) = self.divisions.iter().find(|&&d| d < 1) {
            return Err(Error::InvalidDivision { division });
        }
        if self.credit_cost <= 0 {
            return Err(Error::InvalidCost {
                cost: self.credit_cost,
            });
        }
        if self.max_participants <= 0 {
            return Err(Error::InvalidCapacity {
                capacity: self.max_participants,
            });
        }
        if self.ends_at <= self.starts_at {
            return Err(Error::InvalidSchedule {
                message: "session must end after it starts".to_string(),
            });
        }
        if self.ends_at - self.starts_at > TimeDelta::hours(MAX_SESSION_HOURS) {
            return Err(Error::InvalidSchedule {
                message: format!("session cannot last longer than {MAX_SESSION_HOURS} hours"),
            });
        }
        if self.cancellation_deadline_hours.is_some_and(|h| h < 0) {
            return Err(Error::InvalidSchedule {
                message: "cancellation deadline cannot be negative".to_string(),
            });
        }
        Ok(())
    }

    /// Builds an unsaved session with an empty roster.
    pub(crate) fn to_active_model(
        &self,
        id: String,
        created_by: &str,
        parent_session_id: Option<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> session::ActiveModel {
        session::ActiveModel {
            id: Set(id),
            venue: Set(self.venue.trim().to_string()),
            divisions: Set(Divisions(self.divisions.clone())),
            starts_at: Set(starts_at),
            ends_at: Set(ends_at),
            credit_cost: Set(self.credit_cost),
            max_participants: Set(self.max_participants),
            participants: Set(Participants::default()),
            created_by: Set(created_by.to_string()),
            parent_session_id: Set(parent_session_id),
            cancellation_deadline_hours: Set(self.cancellation_deadline_hours),
            created_at: Set(now),
        }
    }
}

/// Creates a single session from `template`.
///
/// A single insert, so it can run on a plain connection or inside the
/// caller's transaction.
pub async fn add_session<C>(
    db: &C,
    template: &SessionTemplate,
    created_by: &str,
    now: DateTime<Utc>,
) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    template.validate()?;

    let session = template
        .to_active_model(
            new_id("session"),
            created_by,
            None,
            template.starts_at,
            template.ends_at,
            now,
        )
        .insert(db)
        .await?;

    info!(
        session_id = %session.id,
        venue = %session.venue,
        starts_at = %session.starts_at,
        "session created"
    );
    Ok(session)
}

/// Finds a session by id, returning None if it does not exist.
pub async fn get_session_by_id<C>(db: &C, session_id: &str) -> Result<Option<session::Model>>
where
    C: ConnectionTrait,
{
    Session::find_by_id(session_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a session by id or fails with `SessionNotFound`.
pub(crate) async fn require_session<C>(db: &C, session_id: &str) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    get_session_by_id(db, session_id)
        .await?
        .ok_or_else(|| Error::SessionNotFound {
            id: session_id.to_string(),
        })
}

/// The live catalog, soonest first.
pub async fn list_sessions(db: &DatabaseConnection) -> Result<Vec<session::Model>> {
    Session::find()
        .order_by_asc(session::Column::StartsAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sessions starting after `now` that are open to the member's division, soonest first.
pub async fn upcoming_sessions_for_member(
    db: &DatabaseConnection,
    member_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<session::Model>> {
    let member = require_member(db, member_id).await?;

    let sessions = Session::find()
        .filter(session::Column::StartsAt.gt(now))
        .order_by_asc(session::Column::StartsAt)
        .all(db)
        .await?;

    Ok(sessions
        .into_iter()
        .filter(|session| session.is_open_to(member.division))
        .collect())
}
