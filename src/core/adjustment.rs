//! Admin credit adjustments.
//!
//! An over-deduction is never clamped silently. The caller must opt into
//! [`OverdraftPolicy::CapAtBalance`] to deduct the whole remaining balance
//! instead of the requested amount.

use crate::{
    core::{ledger, membership::require_member},
    entities::{TransactionKind, credit_transaction, member},
    errors::{Error, Result},
    events::{ChangeSet, Collection},
};
use chrono::{DateTime, Utc};
use sea_orm::{TransactionTrait, prelude::*};
use tracing::{info, warn};

/// Minimum length of the audit comment, in characters
pub const MIN_COMMENT_LENGTH: usize = 5;

/// What to do when a deduction exceeds the member's balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverdraftPolicy {
    /// Fail with `DeductionExceedsBalance`
    #[default]
    Reject,
    /// The caller confirmed deducting the current balance instead
    CapAtBalance,
}

/// A committed adjustment.
#[derive(Debug, Clone)]
pub struct Adjustment {
    /// The member after the adjustment
    pub member: member::Model,
    /// The single entry written, carrying the applied delta
    pub entry: credit_transaction::Model,
    /// Delta as requested by the caller
    pub requested: i64,
    /// True when the applied delta is smaller than requested
    pub capped: bool,
}

impl Adjustment {
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        ChangeSet::new()
            .with(Collection::Members, self.member.id.clone())
            .with(Collection::Transactions, self.entry.id.clone())
    }
}

/// What an adjustment would do, without applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentPreview {
    /// Current balance
    pub balance: i64,
    pub requested: i64,
    /// Largest delta that keeps the balance non-negative
    pub applicable: i64,
    /// Applying `requested` needs [`OverdraftPolicy::CapAtBalance`]
    pub needs_confirmation: bool,
}

fn validate(delta: i64, comment: &str) -> Result<()> {
    if comment.trim().chars().count() < MIN_COMMENT_LENGTH {
        return Err(Error::CommentTooShort {
            min: MIN_COMMENT_LENGTH,
        });
    }
    if delta == 0 {
        return Err(Error::InvalidAmount { amount: delta });
    }
    Ok(())
}

fn preview(balance: i64, delta: i64) -> AdjustmentPreview {
    let applicable = delta.max(balance.saturating_neg());
    AdjustmentPreview {
        balance,
        requested: delta,
        applicable,
        needs_confirmation: applicable != delta,
    }
}

/// Computes the effect of an adjustment against the member's current balance.
pub async fn preview_adjustment(
    db: &DatabaseConnection,
    member_id: &str,
    delta: i64,
) -> Result<AdjustmentPreview> {
    let member = require_member(db, member_id).await?;
    Ok(preview(member.credits, delta))
}

/// Grants (`delta > 0`) or deducts (`delta < 0`) credits with an audit comment.
///
/// Exactly one ledger entry is written. It is `earned` when the applied delta
/// is positive and `spent` otherwise.
///
/// # Errors
/// `CommentTooShort` and `InvalidAmount` before any read; `MemberNotFound`;
/// `DeductionExceedsBalance` for an over-deduction under [`OverdraftPolicy::Reject`].
pub async fn add_credits(
    db: &DatabaseConnection,
    member_id: &str,
    delta: i64,
    comment: &str,
    policy: OverdraftPolicy,
    now: DateTime<Utc>,
) -> Result<Adjustment> {
    validate(delta, comment)?;

    let txn = db.begin().await?;

    let member = require_member(&txn, member_id).await?;
    let plan = preview(member.credits, delta);
    if plan.needs_confirmation && policy == OverdraftPolicy::Reject {
        warn!(
            member_id,
            requested = delta,
            balance = member.credits,
            "adjustment rejected: deduction exceeds balance"
        );
        return Err(Error::DeductionExceedsBalance {
            requested: delta.saturating_neg(),
            balance: member.credits,
        });
    }

    let kind = if plan.applicable > 0 {
        TransactionKind::Earned
    } else {
        TransactionKind::Spent
    };
    let entry = ledger::append(
        &txn,
        member_id,
        kind,
        plan.applicable,
        comment.trim().to_string(),
        None,
        now,
    )
    .await?;
    let member = require_member(&txn, member_id).await?;

    txn.commit().await?;

    info!(
        member_id,
        requested = delta,
        amount = entry.amount,
        balance_after = entry.balance_after,
        "credits adjusted"
    );
    Ok(Adjustment {
        member,
        entry,
        requested: delta,
        capped: plan.needs_confirmation,
    })
}
