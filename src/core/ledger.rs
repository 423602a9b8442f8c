//! Credit ledger - the append-only log of signed balance changes.
//!
//! Every change to a member's `credits` goes through [`append`], which writes one
//! immutable [`credit_transaction::Model`] and the new balance in the caller's
//! transaction. Balances never go below zero: a delta that would overdraw is
//! clamped, and the entry records the delta that was actually applied. Because
//! each entry carries `balance_after`, the log can be replayed to re-derive every
//! balance ([`replay_balance`]) and to repair a balance after an interrupted
//! write ([`reconcile_balances`]).

use crate::{
    core::new_id,
    entities::{CreditTransaction, Member, TransactionKind, credit_transaction, member},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, warn};

/// Appends one entry for `member_id` and applies it to the member's balance.
///
/// The new balance is `max(0, current + amount)`; the stored `amount` is the
/// difference actually applied, which is smaller than requested when the
/// request would have gone negative.
///
/// # Errors
/// `MemberNotFound` if the member does not exist, or a database error.
pub async fn append<C>(
    db: &C,
    member_id: &str,
    kind: TransactionKind,
    amount: i64,
    description: String,
    session_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<credit_transaction::Model>
where
    C: ConnectionTrait,
{
    let member = Member::find_by_id(member_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::MemberNotFound {
            id: member_id.to_string(),
        })?;

    let current = member.credits;
    let new_balance = current.saturating_add(amount).max(0);
    let applied = new_balance - current;
    if applied != amount {
        warn!(
            member_id,
            requested = amount,
            applied,
            "ledger entry clamped to keep balance non-negative"
        );
    }

    let sequence = next_sequence(db).await?;
    let entry = credit_transaction::ActiveModel {
        id: Set(new_id("txn")),
        sequence: Set(sequence),
        member_id: Set(member.id.clone()),
        kind: Set(kind),
        amount: Set(applied),
        description: Set(description),
        session_id: Set(session_id),
        timestamp: Set(now),
        balance_after: Set(new_balance),
    }
    .insert(db)
    .await?;

    let mut active_model: member::ActiveModel = member.into();
    active_model.credits = Set(new_balance);
    active_model.update(db).await?;

    info!(
        member_id,
        kind = ?kind,
        amount = applied,
        balance_after = new_balance,
        sequence,
        "ledger entry appended"
    );

    Ok(entry)
}

/// All entries for a member, newest first.
///
/// Entries outlive their member: the history of a deleted member is still readable.
pub async fn history<C>(db: &C, member_id: &str) -> Result<Vec<credit_transaction::Model>>
where
    C: ConnectionTrait,
{
    CreditTransaction::find()
        .filter(credit_transaction::Column::MemberId.eq(member_id))
        .order_by_desc(credit_transaction::Column::Sequence)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Entries related to one session, oldest first.
pub async fn entries_for_session<C>(
    db: &C,
    session_id: &str,
) -> Result<Vec<credit_transaction::Model>>
where
    C: ConnectionTrait,
{
    CreditTransaction::find()
        .filter(credit_transaction::Column::SessionId.eq(session_id))
        .order_by_asc(credit_transaction::Column::Sequence)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Re-derives a member's balance by replaying their entries oldest first.
pub async fn replay_balance<C>(db: &C, member_id: &str) -> Result<i64>
where
    C: ConnectionTrait,
{
    let entries = CreditTransaction::find()
        .filter(credit_transaction::Column::MemberId.eq(member_id))
        .order_by_asc(credit_transaction::Column::Sequence)
        .all(db)
        .await?;

    Ok(entries
        .iter()
        .fold(0_i64, |balance, entry| balance.saturating_add(entry.amount).max(0)))
}

/// An entry whose recorded `balance_after` disagrees with the replayed balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDiscrepancy {
    pub transaction_id: String,
    pub sequence: i64,
    pub expected_balance: i64,
    pub recorded_balance: i64,
}

/// Checks the `balance_after` chain of a member's entries.
///
/// Returns every entry whose snapshot does not equal the running sum of the
/// amounts up to and including it. An empty result means the chain is consistent.
pub async fn verify_history<C>(db: &C, member_id: &str) -> Result<Vec<LedgerDiscrepancy>>
where
    C: ConnectionTrait,
{
    let entries = CreditTransaction::find()
        .filter(credit_transaction::Column::MemberId.eq(member_id))
        .order_by_asc(credit_transaction::Column::Sequence)
        .all(db)
        .await?;

    let mut running = 0_i64;
    let mut discrepancies = Vec::new();
    for entry in entries {
        running = running.saturating_add(entry.amount).max(0);
        if entry.balance_after != running {
            discrepancies.push(LedgerDiscrepancy {
                transaction_id: entry.id,
                sequence: entry.sequence,
                expected_balance: running,
                recorded_balance: entry.balance_after,
            });
        }
    }
    Ok(discrepancies)
}

/// A member balance rewritten to match the replayed ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceCorrection {
    pub member_id: String,
    pub stored_balance: i64,
    pub replayed_balance: i64,
}

/// Rewrites every member balance that disagrees with its replayed ledger.
///
/// Run at start-up; on a healthy store it returns an empty list and writes nothing.
pub async fn reconcile_balances(db: &DatabaseConnection) -> Result<Vec<BalanceCorrection>> {
    let txn = db.begin().await?;

    let members = Member::find().all(&txn).await?;
    let mut corrections = Vec::new();
    for member in members {
        let replayed = replay_balance(&txn, &member.id).await?;
        if replayed == member.credits {
            continue;
        }

        warn!(
            member_id = %member.id,
            stored = member.credits,
            replayed,
            "member balance disagrees with ledger, restoring replayed balance"
        );
        corrections.push(BalanceCorrection {
            member_id: member.id.clone(),
            stored_balance: member.credits,
            replayed_balance: replayed,
        });

        let mut active_model: member::ActiveModel = member.into();
        active_model.credits = Set(replayed);
        active_model.update(&txn).await?;
    }

    txn.commit().await?;
    Ok(corrections)
}

async fn next_sequence<C>(db: &C) -> Result<i64>
where
    C: ConnectionTrait,
{
    let last = CreditTransaction::find()
        .order_by_desc(credit_transaction::Column::Sequence)
        .one(db)
        .await?;
    Ok(last.map_or(1, |entry| entry.sequence + 1))
}
