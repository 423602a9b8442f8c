//! Roster - the participant set of each session.
//!
//! Capacity is enforced when a member is added; the roster never silently
//! drops anyone. Removal is idempotent.

use crate::{
    core::catalog::require_session,
    entities::{Member, Participants, Session, member, session},
    errors::{Error, Result},
};
use sea_orm::{Set, prelude::*};
use tracing::debug;

/// Adds `member_id` to the session's roster.
///
/// # Errors
/// `AlreadyBooked` if the member is present, `SessionFull` at capacity,
/// `SessionNotFound` for an unknown session.
pub async fn add<C>(db: &C, session_id: &str, member_id: &str) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    let session = require_session(db, session_id).await?;

    if session.has_participant(member_id) {
        return Err(Error::AlreadyBooked {
            session_id: session_id.to_string(),
            member_id: member_id.to_string(),
        });
    }
    if session.is_full() {
        return Err(Error::SessionFull {
            session_id: session_id.to_string(),
            capacity: session.max_participants,
        });
    }

    let mut participants = session.participants.0.clone();
    participants.push(member_id.to_string());
    debug!(session_id, member_id, seats = participants.len(), "roster add");

    save_participants(db, session, participants).await
}

/// Removes `member_id` from the session's roster; absent members are ignored.
pub async fn remove<C>(db: &C, session_id: &str, member_id: &str) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    let session = require_session(db, session_id).await?;
    if !session.has_participant(member_id) {
        return Ok(session);
    }

    let participants: Vec<String> = session
        .participants
        .iter()
        .filter(|id| id.as_str() != member_id)
        .cloned()
        .collect();
    debug!(session_id, member_id, seats = participants.len(), "roster remove");

    save_participants(db, session, participants).await
}

/// Removes `member_id` from every roster it appears on, returning the affected session ids.
pub async fn remove_everywhere<C>(db: &C, member_id: &str) -> Result<Vec<String>>
where
    C: ConnectionTrait,
{
    let sessions = Session::find().all(db).await?;
    let mut affected = Vec::new();
    for session in sessions
        .into_iter()
        .filter(|session| session.has_participant(member_id))
    {
        affected.push(session.id.clone());
        remove(db, &session.id, member_id).await?;
    }
    Ok(affected)
}

/// Resolves the roster of a session to member records, in booking order.
///
/// Ids whose member record no longer exists are skipped.
pub async fn participants<C>(db: &C, session_id: &str) -> Result<Vec<member::Model>>
where
    C: ConnectionTrait,
{
    let session = require_session(db, session_id).await?;
    if session.participants.is_empty() {
        return Ok(Vec::new());
    }

    let members = Member::find()
        .filter(member::Column::Id.is_in(session.participants.iter().cloned()))
        .all(db)
        .await?;

    Ok(session
        .participants
        .iter()
        .filter_map(|id| members.iter().find(|m| &m.id == id).cloned())
        .collect())
}

async fn save_participants<C>(
    db: &C,
    session: session::Model,
    participants: Vec<String>,
) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    let mut active_model: session::ActiveModel = session.into();
    active_model.participants = Set(Participants(participants));
    active_model.update(db).await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_add_and_list_participants_in_order() -> Result<()> {
        let db = setup_test_db().await?;
        let session = create_test_session(&db, 2, 3).await?;
        let alice = create_test_member(&db, "alice", 0).await?;
        let bob = create_test_member(&db, "bob", 0).await?;

        add(&db, &session.id, &bob.id).await?;
        let updated = add(&db, &session.id, &alice.id).await?;
        assert_eq!(updated.participants.len(), 2);

        let members = participants(&db, &session.id).await?;
        let names: Vec<_> = members.iter().map(|m| m.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "alice"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate() -> Result<()> {
        let db = setup_test_db().await?;
        let session = create_test_session(&db, 2, 3).await?;

        add(&db, &session.id, "member-1").await?;
        let result = add(&db, &session.id, "member-1").await;
        assert!(matches!(result, Err(Error::AlreadyBooked { .. })));

        let reloaded = require_session(&db, &session.id).await?;
        assert_eq!(reloaded.participants.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_enforces_capacity() -> Result<()> {
        let db = setup_test_db().await?;
        let session = create_test_session(&db, 2, 2).await?;

        add(&db, &session.id, "member-1").await?;
        add(&db, &session.id, "member-2").await?;
        let result = add(&db, &session.id, "member-3").await;
        assert!(matches!(
            result,
            Err(Error::SessionFull { capacity: 2, .. })
        ));

        let reloaded = require_session(&db, &session.id).await?;
        assert_eq!(reloaded.participants.len(), 2);
        assert!(!reloaded.has_participant("member-3"));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let session = create_test_session(&db, 2, 4).await?;
        add(&db, &session.id, "member-1").await?;
        add(&db, &session.id, "member-2").await?;

        let after_first = remove(&db, &session.id, "member-1").await?;
        let after_second = remove(&db, &session.id, "member-1").await?;
        assert_eq!(after_first, after_second);
        assert_eq!(after_second.participants.0, vec!["member-2".to_string()]);

        // Absent from the start
        remove(&db, &session.id, "member-9").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_session() -> Result<()> {
        let db = setup_test_db().await?;
        let result = add(&db, "session-missing", "member-1").await;
        assert!(matches!(result, Err(Error::SessionNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_everywhere() -> Result<()> {
        let db = setup_test_db().await?;
        let first = create_test_session(&db, 1, 4).await?;
        let second = create_test_session(&db, 1, 4).await?;
        let untouched = create_test_session(&db, 1, 4).await?;
        add(&db, &first.id, "member-1").await?;
        add(&db, &second.id, "member-1").await?;
        add(&db, &untouched.id, "member-2").await?;

        let mut affected = remove_everywhere(&db, "member-1").await?;
        affected.sort();
        let mut expected = vec![first.id.clone(), second.id.clone()];
        expected.sort();
        assert_eq!(affected, expected);

        assert!(require_session(&db, &first.id).await?.participants.is_empty());
        assert_eq!(
            require_session(&db, &untouched.id).await?.participants.len(),
            1
        );
        Ok(())
    }
}
