//! Reservation engine - the booking state machine for a (member, session) pair.
//!
//! A booking goes `active -> cancelled` exactly once. Rebooking after a
//! cancellation creates a new booking record. Every transition writes the
//! roster, the ledger and the booking inside one database transaction.

use crate::{
    core::{
        catalog::require_session,
        ledger,
        membership::{get_member_by_id, require_member},
        new_id, roster,
    },
    entities::{
        Booking, BookingStatus, Session, TransactionKind, booking, credit_transaction, session,
    },
    errors::{Error, Result},
    events::{ChangeSet, Collection},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, warn};

/// Human-readable label used in ledger descriptions.
#[must_use]
pub fn describe_session(session: &session::Model) -> String {
    format!(
        "{} on {}",
        session.venue,
        session.starts_at.format("%Y-%m-%d %H:%M")
    )
}

/// Outcome of a successful booking.
#[derive(Debug, Clone)]
pub struct BookingReceipt {
    pub booking: booking::Model,
    /// The session with the member added to its roster
    pub session: session::Model,
    /// The `spent` entry for the session cost
    pub entry: credit_transaction::Model,
}

impl BookingReceipt {
    /// Records touched by the booking.
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        ChangeSet::new()
            .with(Collection::Bookings, self.booking.id.clone())
            .with(Collection::Sessions, self.session.id.clone())
            .with(Collection::Members, self.booking.member_id.clone())
            .with(Collection::Transactions, self.entry.id.clone())
    }
}

/// Outcome of a member cancelling their own booking.
#[derive(Debug, Clone)]
pub struct CancellationReceipt {
    /// The booking, now marked cancelled
    pub booking: booking::Model,
    pub session: session::Model,
    /// The `refunded` entry
    pub refund: credit_transaction::Model,
}

impl CancellationReceipt {
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        ChangeSet::new()
            .with(Collection::Bookings, self.booking.id.clone())
            .with(Collection::Sessions, self.session.id.clone())
            .with(Collection::Members, self.booking.member_id.clone())
            .with(Collection::Transactions, self.refund.id.clone())
    }
}

/// Outcome of an admin cancelling a whole session.
#[derive(Debug, Clone)]
pub struct SessionCancellation {
    /// The session as it was just before removal
    pub session: session::Model,
    pub cancelled_bookings: Vec<booking::Model>,
    /// One per refunded participant; members that no longer exist get none
    pub refunds: Vec<credit_transaction::Model>,
}

impl SessionCancellation {
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::new().with(Collection::Sessions, self.session.id.clone());
        for booking in &self.cancelled_bookings {
            changes.touch(Collection::Bookings, booking.id.clone());
        }
        for refund in &self.refunds {
            changes
                .touch(Collection::Transactions, refund.id.clone())
                .touch(Collection::Members, refund.member_id.clone());
        }
        changes
    }
}

/// Books a seat for `member_id` and charges the session cost.
///
/// Checks run in this order: session and member exist, the session has not
/// started, no active booking exists, the balance covers the cost, the roster
/// has room. Nothing is written unless every check passes.
pub async fn book_session(
    db: &DatabaseConnection,
    session_id: &str,
    member_id: &str,
    now: DateTime<Utc>,
) -> Result<BookingReceipt> {
    let txn = db.begin().await?;

    let session = require_session(&txn, session_id).await?;
    let member = require_member(&txn, member_id).await?;

    if session.starts_at <= now {
        warn!(session_id, member_id, "booking rejected: session already started");
        return Err(Error::SessionAlreadyStarted {
            session_id: session_id.to_string(),
        });
    }
    if find_active_booking(&txn, session_id, member_id)
        .await?
        .is_some()
    {
        return Err(Error::AlreadyBooked {
            session_id: session_id.to_string(),
            member_id: member_id.to_string(),
        });
    }
    if member.credits < session.credit_cost {
        warn!(
            session_id,
            member_id,
            balance = member.credits,
            cost = session.credit_cost,
            "booking rejected: insufficient credits"
        );
        return Err(Error::InsufficientCredits {
            member_id: member_id.to_string(),
            balance: member.credits,
            required: session.credit_cost,
        });
    }

    let session = roster::add(&txn, session_id, member_id).await?;
    let entry = ledger::append(
        &txn,
        member_id,
        TransactionKind::Spent,
        -session.credit_cost,
        format!("Booked session at {}", describe_session(&session)),
        Some(session.id.clone()),
        now,
    )
    .await?;
    let booking = booking::ActiveModel {
        id: Set(new_id("booking")),
        member_id: Set(member_id.to_string()),
        session_id: Set(session_id.to_string()),
        status: Set(BookingStatus::Active),
        booked_at: Set(now),
        cancelled_at: Set(None),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    info!(
        booking_id = %booking.id,
        session_id,
        member_id,
        amount = entry.amount,
        balance_after = entry.balance_after,
        "session booked"
    );
    Ok(BookingReceipt {
        booking,
        session,
        entry,
    })
}

/// Whether a booking for `session` may still be cancelled by the member at `now`.
#[must_use]
pub fn can_cancel(session: &session::Model, now: DateTime<Utc>) -> bool {
    now + session.cancellation_deadline() <= session.starts_at
}

/// Looks up the session and reports whether its cancellation window is still open.
pub async fn can_cancel_booking(
    db: &DatabaseConnection,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let session = require_session(db, session_id).await?;
    Ok(can_cancel(&session, now))
}

/// Cancels the member's active booking and refunds the session cost.
///
/// # Errors
/// `NotBooked` if there is no active booking (including a second cancel of
/// the same booking), `CancellationDeadlinePassed` once the window has closed.
pub async fn cancel_booking(
    db: &DatabaseConnection,
    session_id: &str,
    member_id: &str,
    now: DateTime<Utc>,
) -> Result<CancellationReceipt> {
    let txn = db.begin().await?;

    let session = require_session(&txn, session_id).await?;
    require_member(&txn, member_id).await?;

    let Some(booking) = find_active_booking(&txn, session_id, member_id).await? else {
        return Err(Error::NotBooked {
            session_id: session_id.to_string(),
            member_id: member_id.to_string(),
        });
    };
    if !can_cancel(&session, now) {
        warn!(session_id, member_id, "cancellation rejected: deadline passed");
        return Err(Error::CancellationDeadlinePassed {
            session_id: session_id.to_string(),
            deadline_hours: session.cancellation_deadline_hours(),
        });
    }

    let (session, refund, booking) = release_seat(
        &txn,
        booking,
        format!("Cancelled booking at {}", describe_session(&session)),
        now,
    )
    .await?;

    txn.commit().await?;

    info!(
        booking_id = %booking.id,
        session_id,
        member_id,
        amount = refund.amount,
        balance_after = refund.balance_after,
        "booking cancelled"
    );
    Ok(CancellationReceipt {
        booking,
        session,
        refund,
    })
}

/// Cancels a whole session: refunds every active participant, then removes
/// the session from the catalog. The cancellation deadline does not apply.
pub async fn cancel_session(
    db: &DatabaseConnection,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<SessionCancellation> {
    let txn = db.begin().await?;

    let session = require_session(&txn, session_id).await?;
    let description = format!("Session cancelled: {}", describe_session(&session));

    let mut refunds = Vec::new();
    let mut cancelled_bookings = Vec::new();
    for booking in active_bookings_for_session(&txn, session_id).await? {
        if get_member_by_id(&txn, &booking.member_id).await?.is_some() {
            refunds.push(
                ledger::append(
                    &txn,
                    &booking.member_id,
                    TransactionKind::Refund,
                    session.credit_cost,
                    description.clone(),
                    Some(session.id.clone()),
                    now,
                )
                .await?,
            );
        } else {
            warn!(
                booking_id = %booking.id,
                member_id = %booking.member_id,
                "booking belongs to a removed member, cancelling without refund"
            );
        }
        cancelled_bookings.push(mark_cancelled(&txn, booking, now).await?);
    }

    // Refunds above precede the removal within the same transaction
    Session::delete_by_id(session_id).exec(&txn).await?;
    txn.commit().await?;

    info!(
        session_id,
        refunds = refunds.len(),
        cancelled = cancelled_bookings.len(),
        "session cancelled"
    );
    Ok(SessionCancellation {
        session,
        cancelled_bookings,
        refunds,
    })
}

/// Drops the booking's member from the roster, refunds the session cost and
/// marks the booking cancelled.
async fn release_seat<C>(
    db: &C,
    booking: booking::Model,
    description: String,
    now: DateTime<Utc>,
) -> Result<(session::Model, credit_transaction::Model, booking::Model)>
where
    C: ConnectionTrait,
{
    let session = roster::remove(db, &booking.session_id, &booking.member_id).await?;
    let refund = ledger::append(
        db,
        &booking.member_id,
        TransactionKind::Refund,
        session.credit_cost,
        description,
        Some(session.id.clone()),
        now,
    )
    .await?;
    let booking = mark_cancelled(db, booking, now).await?;
    Ok((session, refund, booking))
}

pub(crate) async fn mark_cancelled<C>(
    db: &C,
    booking: booking::Model,
    now: DateTime<Utc>,
) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    let mut active_model: booking::ActiveModel = booking.into();
    active_model.status = Set(BookingStatus::Cancelled);
    active_model.cancelled_at = Set(Some(now));
    active_model.update(db).await.map_err(Into::into)
}

/// The member's active booking for a session, if any.
pub async fn find_active_booking<C>(
    db: &C,
    session_id: &str,
    member_id: &str,
) -> Result<Option<booking::Model>>
where
    C: ConnectionTrait,
{
    Booking::find()
        .filter(booking::Column::SessionId.eq(session_id))
        .filter(booking::Column::MemberId.eq(member_id))
        .filter(booking::Column::Status.eq(BookingStatus::Active))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Active bookings for a session, oldest first.
pub async fn active_bookings_for_session<C>(
    db: &C,
    session_id: &str,
) -> Result<Vec<booking::Model>>
where
    C: ConnectionTrait,
{
    Booking::find()
        .filter(booking::Column::SessionId.eq(session_id))
        .filter(booking::Column::Status.eq(BookingStatus::Active))
        .order_by_asc(booking::Column::BookedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every booking the member has made, newest first.
pub async fn bookings_for_member(
    db: &DatabaseConnection,
    member_id: &str,
) -> Result<Vec<booking::Model>> {
    Booking::find()
        .filter(booking::Column::MemberId.eq(member_id))
        .order_by_desc(booking::Column::BookedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The member's bookings that still hold a seat, newest first.
pub async fn active_bookings_for_member(
    db: &DatabaseConnection,
    member_id: &str,
) -> Result<Vec<booking::Model>> {
    Booking::find()
        .filter(booking::Column::MemberId.eq(member_id))
        .filter(booking::Column::Status.eq(BookingStatus::Active))
        .order_by_desc(booking::Column::BookedAt)
        .all(db)
        .await
        .map_err(Into::into)
}
