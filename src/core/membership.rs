//! Membership business logic - registration, approval, profile edits and
//! cascading account deletion.
//!
//! Deleting a member unwinds every active reservation they hold: each booking is
//! refunded (deadline ignored), marked cancelled and dropped from its roster
//! before the member record is removed, all in one database transaction.
//! Administrators are never deleted.

use std::collections::BTreeSet;

use crate::{
    core::{ledger, new_id, reservation, roster},
    entities::{
        Booking, BookingStatus, Member, MemberRole, MemberStatus, TransactionKind, booking,
        credit_transaction, member,
    },
    errors::{Error, Result},
    events::{ChangeSet, Collection},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, warn};

/// Description recorded on the opening-balance ledger entry
pub const OPENING_BALANCE_DESCRIPTION: &str = "Opening balance";

/// Data for a new member account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    /// Fixed id; a fresh `member-<uuid>` is generated when None
    pub id: Option<String>,
    /// Stored lowercased; must be unique
    pub email: String,
    /// Must be unique
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub division: i32,
    pub role: MemberRole,
    pub status: MemberStatus,
    /// Opening balance
    pub credits: i64,
}

impl NewMember {
    /// A player application awaiting approval, with no credits.
    #[must_use]
    pub fn applicant(
        email: impl Into<String>,
        username: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        division: i32,
    ) -> Self {
        Self {
            id: None,
            email: email.into(),
            username: username.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            division,
            role: MemberRole::Player,
            status: MemberStatus::Applied,
            credits: 0,
        }
    }

    /// Rejects malformed fields before anything is read or written.
    pub(crate) fn validate(&self) -> Result<()> {
        validate_email(&self.email)?;
        if self.username.trim().is_empty() {
            return Err(Error::InvalidMember {
                message: "username cannot be empty".to_string(),
            });
        }
        validate_profile(&self.first_name, &self.last_name, self.division)?;
        if self.credits < 0 {
            return Err(Error::InvalidAmount {
                amount: self.credits,
            });
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(Error::InvalidMember {
            message: format!("invalid email '{email}'"),
        });
    }
    Ok(())
}

fn validate_profile(first_name: &str, last_name: &str, division: i32) -> Result<()> {
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(Error::InvalidMember {
            message: "first and last name are required".to_string(),
        });
    }
    if division < 1 {
        return Err(Error::InvalidDivision { division });
    }
    Ok(())
}

/// A newly registered member and the ledger entry recording their opening balance.
#[derive(Debug, Clone)]
pub struct Registration {
    pub member: member::Model,
    /// None for a zero opening balance
    pub opening_entry: Option<credit_transaction::Model>,
}

impl Registration {
    /// The new member plus its opening entry, if any.
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::new().with(Collection::Members, self.member.id.clone());
        if let Some(entry) = &self.opening_entry {
            changes.touch(Collection::Transactions, entry.id.clone());
        }
        changes
    }
}

/// Registers a member. A non-zero opening balance is written through the ledger
/// so that replaying the log reproduces it.
///
/// # Errors
/// Validation errors for malformed fields, `DuplicateMember` if the email or
/// username is taken.
pub async fn register_member(
    db: &DatabaseConnection,
    new_member: NewMember,
    now: DateTime<Utc>,
) -> Result<Registration> {
    new_member.validate()?;

    let txn = db.begin().await?;
    let registration = insert_member(&txn, new_member, now).await?;
    txn.commit().await?;

    info!(
        member_id = %registration.member.id,
        role = ?registration.member.role,
        credits = registration.member.credits,
        "member registered"
    );
    Ok(registration)
}

/// Inserts a validated member and its opening-balance entry in the caller's transaction.
pub(crate) async fn insert_member<C>(
    db: &C,
    new_member: NewMember,
    now: DateTime<Utc>,
) -> Result<Registration>
where
    C: ConnectionTrait,
{
    let email = normalize_email(&new_member.email);
    let username = new_member.username.trim().to_string();

    ensure_email_available(db, &email, None).await?;
    if Member::find()
        .filter(member::Column::Username.eq(username.as_str()))
        .one(db)
        .await?
        .is_some()
    {
        return Err(Error::DuplicateMember {
            field: "username",
            value: username,
        });
    }

    let id = new_member.id.unwrap_or_else(|| new_id("member"));
    member::ActiveModel {
        id: Set(id.clone()),
        email: Set(email),
        username: Set(username),
        first_name: Set(new_member.first_name.trim().to_string()),
        last_name: Set(new_member.last_name.trim().to_string()),
        division: Set(new_member.division),
        status: Set(new_member.status),
        role: Set(new_member.role),
        credits: Set(0),
        created_at: Set(now),
    }
    .insert(db)
    .await?;

    let opening_entry = if new_member.credits > 0 {
        Some(
            ledger::append(
                db,
                &id,
                TransactionKind::Earned,
                new_member.credits,
                OPENING_BALANCE_DESCRIPTION.to_string(),
                None,
                now,
            )
            .await?,
        )
    } else {
        None
    };

    let member = require_member(db, &id).await?;
    Ok(Registration {
        member,
        opening_entry,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Fails with `DuplicateMember` if another member (not `except_id`) uses `email`.
async fn ensure_email_available<C>(db: &C, email: &str, except_id: Option<&str>) -> Result<()>
where
    C: ConnectionTrait,
{
    let mut query = Member::find().filter(member::Column::Email.eq(email));
    if let Some(id) = except_id {
        query = query.filter(member::Column::Id.ne(id));
    }
    if query.one(db).await?.is_some() {
        return Err(Error::DuplicateMember {
            field: "email",
            value: email.to_string(),
        });
    }
    Ok(())
}

/// Finds a member by id, returning None if not found.
pub async fn get_member_by_id<C>(db: &C, member_id: &str) -> Result<Option<member::Model>>
where
    C: ConnectionTrait,
{
    Member::find_by_id(member_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a member by id or fails with `MemberNotFound`.
pub(crate) async fn require_member<C>(db: &C, member_id: &str) -> Result<member::Model>
where
    C: ConnectionTrait,
{
    get_member_by_id(db, member_id)
        .await?
        .ok_or_else(|| Error::MemberNotFound {
            id: member_id.to_string(),
        })
}

/// All members, oldest account first.
pub async fn list_members(db: &DatabaseConnection) -> Result<Vec<member::Model>> {
    Member::find()
        .order_by_asc(member::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Approves or rejects a membership application.
pub async fn set_member_status(
    db: &DatabaseConnection,
    member_id: &str,
    status: MemberStatus,
) -> Result<member::Model> {
    let member = require_member(db, member_id).await?;
    let mut active_model: member::ActiveModel = member.into();
    active_model.status = Set(status);
    let member = active_model.update(db).await?;
    info!(member_id, status = ?status, "member status changed");
    Ok(member)
}

/// Promotes a member to admin or demotes them to player.
pub async fn set_member_role(
    db: &DatabaseConnection,
    member_id: &str,
    role: MemberRole,
) -> Result<member::Model> {
    let member = require_member(db, member_id).await?;
    let mut active_model: member::ActiveModel = member.into();
    active_model.role = Set(role);
    let member = active_model.update(db).await?;
    info!(member_id, role = ?role, "member role changed");
    Ok(member)
}

/// Editable profile fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// Stored lowercased; must not belong to another member
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub division: i32,
}

/// Replaces a member's email, names and division.
///
/// # Errors
/// Validation errors for malformed fields, `MemberNotFound`, or
/// `DuplicateMember` if another member already uses the email.
pub async fn update_member_profile(
    db: &DatabaseConnection,
    member_id: &str,
    update: ProfileUpdate,
) -> Result<member::Model> {
    validate_email(&update.email)?;
    validate_profile(&update.first_name, &update.last_name, update.division)?;

    let txn = db.begin().await?;

    let member = require_member(&txn, member_id).await?;
    let email = normalize_email(&update.email);
    ensure_email_available(&txn, &email, Some(member_id)).await?;

    let mut active_model: member::ActiveModel = member.into();
    active_model.email = Set(email);
    active_model.first_name = Set(update.first_name.trim().to_string());
    active_model.last_name = Set(update.last_name.trim().to_string());
    active_model.division = Set(update.division);
    let member = active_model.update(&txn).await?;

    txn.commit().await?;
    info!(member_id, "member profile updated");
    Ok(member)
}

/// Result of a cascading deletion.
#[derive(Debug, Clone, Default)]
pub struct Deletion {
    /// Member ids removed from the store
    pub deleted: Vec<String>,
    /// Requested admin ids that were left untouched
    pub skipped_admins: Vec<String>,
    /// Refund entries, one per unwound booking
    pub refunds: Vec<credit_transaction::Model>,
    /// Active bookings of the deleted members, now cancelled
    pub cancelled_bookings: Vec<booking::Model>,
    /// Sessions whose roster changed
    pub sessions: Vec<String>,
}

impl Deletion {
    /// Everything the cascade touched. Skipped admins are not included.
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for id in &self.deleted {
            changes.touch(Collection::Members, id.clone());
        }
        for entry in &self.refunds {
            changes.touch(Collection::Transactions, entry.id.clone());
        }
        for booking in &self.cancelled_bookings {
            changes.touch(Collection::Bookings, booking.id.clone());
        }
        for session_id in &self.sessions {
            changes.touch(Collection::Sessions, session_id.clone());
        }
        changes
    }
}

/// Deletes the given non-admin members, unwinding their active bookings first.
///
/// Admin ids in the request are skipped and reported. Unknown ids abort the
/// whole call before anything is written.
///
/// # Errors
/// `MemberNotFound` for an unknown id; `ProtectedAdmin` if every requested id is
/// an admin; `NoEligibleMembers` for an empty request.
pub async fn delete_members(
    db: &DatabaseConnection,
    member_ids: &[String],
    now: DateTime<Utc>,
) -> Result<Deletion> {
    let requested: BTreeSet<&str> = member_ids.iter().map(String::as_str).collect();
    if requested.is_empty() {
        return Err(Error::NoEligibleMembers);
    }

    let txn = db.begin().await?;

    let mut eligible = Vec::new();
    let mut deletion = Deletion::default();
    for member_id in requested {
        let member = require_member(&txn, member_id).await?;
        if member.is_admin() {
            warn!(member_id, "refusing to delete administrator");
            deletion.skipped_admins.push(member.id);
        } else {
            eligible.push(member);
        }
    }

    if eligible.is_empty() {
        return Err(deletion
            .skipped_admins
            .into_iter()
            .next()
            .map_or(Error::NoEligibleMembers, |member_id| Error::ProtectedAdmin {
                member_id,
            }));
    }

    let mut sessions = BTreeSet::new();
    for member in eligible {
        let bookings = Booking::find()
            .filter(booking::Column::MemberId.eq(member.id.as_str()))
            .filter(booking::Column::Status.eq(BookingStatus::Active))
            .all(&txn)
            .await?;

        for booking in bookings {
            match roster::remove(&txn, &booking.session_id, &member.id).await {
                Ok(session) => {
                    let description = format!(
                        "Account deletion refund: {}",
                        reservation::describe_session(&session)
                    );
                    let refund = ledger::append(
                        &txn,
                        &member.id,
                        TransactionKind::Refund,
                        session.credit_cost,
                        description,
                        Some(session.id.clone()),
                        now,
                    )
                    .await?;
                    deletion.refunds.push(refund);
                    sessions.insert(session.id);
                }
                Err(Error::SessionNotFound { id }) => {
                    warn!(member_id = %member.id, session_id = %id, "booking references a removed session");
                }
                Err(e) => return Err(e),
            }
            deletion
                .cancelled_bookings
                .push(reservation::mark_cancelled(&txn, booking, now).await?);
        }

        sessions.extend(roster::remove_everywhere(&txn, &member.id).await?);

        Member::delete_by_id(member.id.as_str()).exec(&txn).await?;
        info!(member_id = %member.id, "member deleted");
        deletion.deleted.push(member.id);
    }
    deletion.sessions = sessions.into_iter().collect();

    txn.commit().await?;
    Ok(deletion)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::CreditTransaction;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_register_member_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let now = Utc::now();
        let valid = NewMember::applicant("jane@example.com", "jane", "Jane", "Smith", 3);

        let mut bad_email = valid.clone();
        bad_email.email = "not-an-email".to_string();
        let result = register_member(&db, bad_email, now).await;
        assert!(matches!(result, Err(Error::InvalidMember { .. })));

        let mut bad_division = valid.clone();
        bad_division.division = 0;
        let result = register_member(&db, bad_division, now).await;
        assert!(matches!(result, Err(Error::InvalidDivision { division: 0 })));

        let mut negative = valid;
        negative.credits = -1;
        let result = register_member(&db, negative, now).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: -1 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_register_member_records_opening_balance() -> Result<()> {
        let db = setup_test_db().await?;
        let mut new_member =
            NewMember::applicant("Jane@Example.com", "jane", "Jane", "Smith", 3);
        new_member.credits = 5;

        let registration = register_member(&db, new_member, Utc::now()).await?;
        assert_eq!(registration.member.email, "jane@example.com");
        assert_eq!(registration.member.status, MemberStatus::Applied);
        assert_eq!(registration.member.role, MemberRole::Player);
        assert_eq!(registration.member.credits, 5);

        let entry = registration.opening_entry.unwrap();
        assert_eq!(entry.kind, TransactionKind::Earned);
        assert_eq!(entry.amount, 5);
        assert_eq!(entry.balance_after, 5);
        assert_eq!(entry.description, OPENING_BALANCE_DESCRIPTION);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_member_without_credits_has_no_entry() -> Result<()> {
        let db = setup_test_db().await?;
        let new_member = NewMember::applicant("john@example.com", "john", "John", "Doe", 5);

        let registration = register_member(&db, new_member, Utc::now()).await?;
        assert!(registration.opening_entry.is_none());
        assert_eq!(CreditTransaction::find().all(&db).await?.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_member_rejects_duplicates() -> Result<()> {
        let db = setup_test_db().await?;
        let now = Utc::now();
        register_member(
            &db,
            NewMember::applicant("jane@example.com", "jane", "Jane", "Smith", 3),
            now,
        )
        .await?;

        let result = register_member(
            &db,
            NewMember::applicant("JANE@example.com", "other", "Jane", "Smith", 3),
            now,
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::DuplicateMember { field: "email", .. })
        ));

        let result = register_member(
            &db,
            NewMember::applicant("other@example.com", "jane", "Jane", "Smith", 3),
            now,
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::DuplicateMember {
                field: "username",
                ..
            })
        ));
        assert_eq!(list_members(&db).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_role_and_profile_updates() -> Result<()> {
        let db = setup_test_db().await?;
        let registration = register_member(
            &db,
            NewMember::applicant("kim@example.com", "kim", "Kim", "Lee", 6),
            Utc::now(),
        )
        .await?;
        let id = registration.member.id;

        let approved = set_member_status(&db, &id, MemberStatus::Approved).await?;
        assert_eq!(approved.status, MemberStatus::Approved);

        let promoted = set_member_role(&db, &id, MemberRole::Admin).await?;
        assert!(promoted.is_admin());

        let edited = update_member_profile(
            &db,
            &id,
            ProfileUpdate {
                email: "Kimberly@Example.com".to_string(),
                first_name: "Kimberly".to_string(),
                last_name: "Lee".to_string(),
                division: 4,
            },
        )
        .await?;
        assert_eq!(edited.display_name(), "Kimberly Lee");
        assert_eq!(edited.email, "kimberly@example.com");
        assert_eq!(edited.division, 4);

        let result = set_member_status(&db, "member-missing", MemberStatus::Rejected).await;
        assert!(matches!(result, Err(Error::MemberNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_email_change_is_validated() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_member(&db, "alice", 0).await?;
        create_test_member(&db, "bob", 0).await?;
        let update = |email: &str| ProfileUpdate {
            email: email.to_string(),
            first_name: "Alice".to_string(),
            last_name: "Jones".to_string(),
            division: 3,
        };

        let result = update_member_profile(&db, &alice.id, update("BOB@example.com")).await;
        assert!(matches!(
            result,
            Err(Error::DuplicateMember { field: "email", .. })
        ));

        let result = update_member_profile(&db, &alice.id, update("no-at-sign")).await;
        assert!(matches!(result, Err(Error::InvalidMember { .. })));

        let unchanged = get_member_by_id(&db, &alice.id).await?.unwrap();
        assert_eq!(unchanged.email, "alice@example.com");
        assert_eq!(unchanged.last_name, "alice");

        // Keeping one's own email is not a conflict
        let edited = update_member_profile(&db, &alice.id, update("alice@example.com")).await?;
        assert_eq!(edited.last_name, "Jones");
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_member_unwinds_active_bookings() -> Result<()> {
        let db = setup_test_db().await?;
        let now = Utc::now();
        let member = create_test_member(&db, "alice", 10).await?;
        let first = create_test_session(&db, 3, 4).await?;
        let second = create_test_session(&db, 2, 4).await?;
        reservation::book_session(&db, &first.id, &member.id, now).await?;
        reservation::book_session(&db, &second.id, &member.id, now).await?;

        let deletion = delete_members(&db, &[member.id.clone()], now).await?;

        assert_eq!(deletion.deleted, vec![member.id.clone()]);
        assert_eq!(deletion.refunds.len(), 2);
        assert!(
            deletion
                .refunds
                .iter()
                .all(|r| r.kind == TransactionKind::Refund && r.amount > 0)
        );
        assert_eq!(deletion.cancelled_bookings.len(), 2);
        assert!(
            deletion
                .cancelled_bookings
                .iter()
                .all(|b| b.status == BookingStatus::Cancelled)
        );

        assert!(get_member_by_id(&db, &member.id).await?.is_none());
        for session_id in [&first.id, &second.id] {
            let session = crate::core::catalog::require_session(&db, session_id).await?;
            assert!(!session.has_participant(&member.id));
        }

        // The ledger outlives the member
        let history = ledger::history(&db, &member.id).await?;
        assert_eq!(history[0].balance_after, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_admin_is_rejected_without_changes() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = create_test_admin(&db, "root").await?;

        let result = delete_members(&db, &[admin.id.clone()], Utc::now()).await;
        assert!(matches!(result, Err(Error::ProtectedAdmin { .. })));
        assert!(get_member_by_id(&db, &admin.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_mixed_request_skips_admins() -> Result<()> {
        let db = setup_test_db().await?;
        let admin = create_test_admin(&db, "root").await?;
        let player = create_test_member(&db, "bob", 0).await?;

        let deletion =
            delete_members(&db, &[admin.id.clone(), player.id.clone()], Utc::now()).await?;
        assert_eq!(deletion.deleted, vec![player.id.clone()]);
        assert_eq!(deletion.skipped_admins, vec![admin.id.clone()]);
        assert!(get_member_by_id(&db, &admin.id).await?.is_some());
        assert!(get_member_by_id(&db, &player.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_unknown_or_empty_request() -> Result<()> {
        let db = setup_test_db().await?;
        let player = create_test_member(&db, "bob", 0).await?;

        let result = delete_members(
            &db,
            &[player.id.clone(), "member-missing".to_string()],
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(Error::MemberNotFound { .. })));
        assert!(get_member_by_id(&db, &player.id).await?.is_some());

        let result = delete_members(&db, &[], Utc::now()).await;
        assert!(matches!(result, Err(Error::NoEligibleMembers)));
        Ok(())
    }
}
