//! Core business logic - framework-agnostic ledger, roster and reservation operations.
//!
//! Sub-component functions (`ledger::append`, `roster::add`, ...) are generic over
//! [`sea_orm::ConnectionTrait`] so they can run inside the caller's transaction.
//! Top-level operations take a [`sea_orm::DatabaseConnection`], open one
//! transaction, and commit it only after every record write has succeeded.

/// Admin credit adjustments
pub mod adjustment;
/// Session catalog: creation, lookup and listings
pub mod catalog;
/// Append-only credit ledger, replay and reconciliation
pub mod ledger;
/// Member registration, approval, profile edits and cascading deletion
pub mod membership;
/// Recurring session generation
pub mod recurrence;
/// Booking and cancellation state machine
pub mod reservation;
/// Per-session participant sets with capacity enforcement
pub mod roster;
/// First-start seeding of an empty store
pub mod seed;

/// Generates an opaque record id of the form `<prefix>-<uuid>`.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}
