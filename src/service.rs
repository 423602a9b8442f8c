//! The process-scoped booking service.
//!
//! [`BookingService`] owns the database connection, a write lock and the change
//! notifier. Every mutating call holds the write lock from `begin` to `commit`,
//! so mutations never interleave. On success exactly one [`ChangeSet`] is
//! published; a failed call publishes nothing. Reads do not take the lock and
//! only ever see committed state.

use chrono::{NaiveDate, Utc};
use sea_orm::DatabaseConnection;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use crate::{
    config::settings::{AppConfig, SeedConfig},
    core::{
        adjustment::{self, Adjustment, AdjustmentPreview, OverdraftPolicy},
        catalog::{self, SessionTemplate},
        ledger::{self, BalanceCorrection, LedgerDiscrepancy},
        membership::{self, Deletion, NewMember, ProfileUpdate, Registration},
        recurrence,
        reservation::{self, BookingReceipt, CancellationReceipt, SessionCancellation},
        roster,
        seed::{self, SeedReport},
    },
    entities::{MemberRole, MemberStatus, booking, credit_transaction, member, session},
    errors::Result,
    events::{ChangeNotifier, ChangeSet, Collection},
};

/// Single entry point for every engine operation.
#[derive(Debug)]
pub struct BookingService {
    db: DatabaseConnection,
    write_lock: Mutex<()>,
    notifier: ChangeNotifier,
}

impl BookingService {
    /// Wraps an open connection. `notification_capacity` bounds how far a slow
    /// subscriber may lag before it starts missing change sets.
    #[must_use]
    pub fn new(db: DatabaseConnection, notification_capacity: usize) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
            notifier: ChangeNotifier::new(notification_capacity),
        }
    }

    #[must_use]
    pub fn from_config(db: DatabaseConnection, config: &AppConfig) -> Self {
        Self::new(db, config.notification_capacity)
    }

    /// The underlying connection, for reads outside the service surface.
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Receives one [`ChangeSet`] per committed mutation from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.notifier.subscribe()
    }

    fn publish(&self, changes: ChangeSet) {
        debug!(collections = ?changes.collections().collect::<Vec<_>>(), "publishing changes");
        self.notifier.publish(changes);
    }

    // --- Reservations ---

    /// Books a seat and charges the session's cost.
    ///
    /// # Errors
    /// See [`reservation::book_session`]; nothing is published on failure.
    pub async fn book_session(&self, session_id: &str, member_id: &str) -> Result<BookingReceipt> {
        let _guard = self.write_lock.lock().await;
        let receipt = reservation::book_session(&self.db, session_id, member_id, Utc::now()).await?;
        self.publish(receipt.changes());
        Ok(receipt)
    }

    /// Member self-cancellation with a full refund, allowed until the
    /// session's cancellation deadline.
    pub async fn cancel_booking(
        &self,
        session_id: &str,
        member_id: &str,
    ) -> Result<CancellationReceipt> {
        let _guard = self.write_lock.lock().await;
        let receipt =
            reservation::cancel_booking(&self.db, session_id, member_id, Utc::now()).await?;
        self.publish(receipt.changes());
        Ok(receipt)
    }

    /// Admin cancellation of a whole session. Callers are expected to have
    /// checked the admin role.
    pub async fn cancel_session(&self, session_id: &str) -> Result<SessionCancellation> {
        let _guard = self.write_lock.lock().await;
        let cancellation = reservation::cancel_session(&self.db, session_id, Utc::now()).await?;
        self.publish(cancellation.changes());
        Ok(cancellation)
    }

    /// Whether the cancellation deadline for `session_id` is still ahead.
    pub async fn can_cancel_booking(&self, session_id: &str) -> Result<bool> {
        reservation::can_cancel_booking(&self.db, session_id, Utc::now()).await
    }

    /// Every booking the member has made, active or cancelled.
    pub async fn bookings_for_member(&self, member_id: &str) -> Result<Vec<booking::Model>> {
        reservation::bookings_for_member(&self.db, member_id).await
    }

    pub async fn active_bookings_for_member(&self, member_id: &str) -> Result<Vec<booking::Model>> {
        reservation::active_bookings_for_member(&self.db, member_id).await
    }

    // --- Credits ---

    /// Admin balance adjustment with a mandatory comment.
    ///
    /// # Errors
    /// Validation errors for a zero delta or short comment;
    /// `DeductionExceedsBalance` under [`OverdraftPolicy::Reject`].
    pub async fn add_credits(
        &self,
        member_id: &str,
        delta: i64,
        comment: &str,
        policy: OverdraftPolicy,
    ) -> Result<Adjustment> {
        let _guard = self.write_lock.lock().await;
        let adjustment =
            adjustment::add_credits(&self.db, member_id, delta, comment, policy, Utc::now())
                .await?;
        self.publish(adjustment.changes());
        Ok(adjustment)
    }

    /// Dry run of [`Self::add_credits`]; writes nothing.
    pub async fn preview_adjustment(&self, member_id: &str, delta: i64) -> Result<AdjustmentPreview> {
        adjustment::preview_adjustment(&self.db, member_id, delta).await
    }

    /// Ledger entries for a member, newest first.
    pub async fn get_credit_history(
        &self,
        member_id: &str,
    ) -> Result<Vec<credit_transaction::Model>> {
        ledger::history(&self.db, member_id).await
    }

    /// Entries whose `balance_after` does not follow from the previous one.
    pub async fn verify_history(&self, member_id: &str) -> Result<Vec<LedgerDiscrepancy>> {
        ledger::verify_history(&self.db, member_id).await
    }

    /// Repairs balances that disagree with the ledger; run once at start-up.
    pub async fn reconcile_balances(&self) -> Result<Vec<BalanceCorrection>> {
        let _guard = self.write_lock.lock().await;
        let corrections = ledger::reconcile_balances(&self.db).await?;
        let mut changes = ChangeSet::new();
        for correction in &corrections {
            changes.touch(Collection::Members, correction.member_id.clone());
        }
        self.publish(changes);
        Ok(corrections)
    }

    // --- Members ---

    /// Creates a member, writing an opening ledger entry for a non-zero balance.
    ///
    /// # Errors
    /// `InvalidMember` for bad fields, `DuplicateMember` for a taken email or
    /// username.
    pub async fn register_member(&self, new_member: NewMember) -> Result<Registration> {
        let _guard = self.write_lock.lock().await;
        let registration = membership::register_member(&self.db, new_member, Utc::now()).await?;
        self.publish(registration.changes());
        Ok(registration)
    }

    pub async fn set_member_status(
        &self,
        member_id: &str,
        status: MemberStatus,
    ) -> Result<member::Model> {
        let _guard = self.write_lock.lock().await;
        let member = membership::set_member_status(&self.db, member_id, status).await?;
        self.publish(ChangeSet::new().with(Collection::Members, member.id.clone()));
        Ok(member)
    }

    pub async fn set_member_role(&self, member_id: &str, role: MemberRole) -> Result<member::Model> {
        let _guard = self.write_lock.lock().await;
        let member = membership::set_member_role(&self.db, member_id, role).await?;
        self.publish(ChangeSet::new().with(Collection::Members, member.id.clone()));
        Ok(member)
    }

    /// Replaces email, names and division.
    pub async fn update_member_profile(
        &self,
        member_id: &str,
        update: ProfileUpdate,
    ) -> Result<member::Model> {
        let _guard = self.write_lock.lock().await;
        let member = membership::update_member_profile(&self.db, member_id, update).await?;
        self.publish(ChangeSet::new().with(Collection::Members, member.id.clone()));
        Ok(member)
    }

    /// Cascading deletion of non-admin members.
    pub async fn delete_members(&self, member_ids: &[String]) -> Result<Deletion> {
        let _guard = self.write_lock.lock().await;
        let deletion = membership::delete_members(&self.db, member_ids, Utc::now()).await?;
        self.publish(deletion.changes());
        Ok(deletion)
    }

    pub async fn get_member(&self, member_id: &str) -> Result<Option<member::Model>> {
        membership::get_member_by_id(&self.db, member_id).await
    }

    /// All members, oldest registration first.
    pub async fn list_members(&self) -> Result<Vec<member::Model>> {
        membership::list_members(&self.db).await
    }

    // --- Sessions ---

    /// Validates the template and stores one session with an empty roster.
    pub async fn add_session(
        &self,
        template: &SessionTemplate,
        created_by: &str,
    ) -> Result<session::Model> {
        let _guard = self.write_lock.lock().await;
        let session = catalog::add_session(&self.db, template, created_by, Utc::now()).await?;
        self.publish(ChangeSet::new().with(Collection::Sessions, session.id.clone()));
        Ok(session)
    }

    /// Stores every future occurrence of `template` on the given weekdays
    /// (0 = Sunday) through `end_date`, all in one commit.
    ///
    /// # Errors
    /// `InvalidSchedule`, `InvalidWeekday` or `NoSessionsGenerated`; the
    /// template's own validation errors.
    pub async fn add_recurring_sessions(
        &self,
        template: &SessionTemplate,
        weekdays: &[u32],
        end_date: NaiveDate,
        created_by: &str,
    ) -> Result<Vec<session::Model>> {
        let _guard = self.write_lock.lock().await;
        let sessions = recurrence::add_recurring_sessions(
            &self.db,
            template,
            weekdays,
            end_date,
            created_by,
            Utc::now(),
        )
        .await?;
        let mut changes = ChangeSet::new();
        for session in &sessions {
            changes.touch(Collection::Sessions, session.id.clone());
        }
        self.publish(changes);
        Ok(sessions)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<session::Model>> {
        catalog::get_session_by_id(&self.db, session_id).await
    }

    /// All sessions by start time.
    pub async fn list_sessions(&self) -> Result<Vec<session::Model>> {
        catalog::list_sessions(&self.db).await
    }

    /// Future sessions open to the member's division.
    pub async fn upcoming_sessions_for_member(
        &self,
        member_id: &str,
    ) -> Result<Vec<session::Model>> {
        catalog::upcoming_sessions_for_member(&self.db, member_id, Utc::now()).await
    }

    /// Members on a session's roster, in booking order.
    pub async fn get_session_participants(&self, session_id: &str) -> Result<Vec<member::Model>> {
        roster::participants(&self.db, session_id).await
    }

    // --- Lifecycle ---

    /// Creates the default admin and sample sessions on an empty store.
    pub async fn seed_if_empty(&self, seed: &SeedConfig) -> Result<SeedReport> {
        let _guard = self.write_lock.lock().await;
        let report = seed::seed_if_empty(&self.db, seed, Utc::now()).await?;
        if report.admin.is_some() || !report.sessions.is_empty() {
            info!(
                admin = report.admin.is_some(),
                sessions = report.sessions.len(),
                "store seeded"
            );
        }
        self.publish(report.changes());
        Ok(report)
    }
}
