//! Shared test utilities for the session ledger.
//!
//! Helpers for an in-memory database and fixtures with sensible defaults.

use std::collections::BTreeSet;

use crate::{
    core::{
        catalog::{self, SessionTemplate},
        membership::{self, NewMember},
    },
    entities::{MemberRole, MemberStatus, member, session},
    errors::Result,
    service::BookingService,
};
use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::DatabaseConnection;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A service over a fresh in-memory database.
pub async fn setup_test_service() -> Result<BookingService> {
    Ok(BookingService::new(setup_test_db().await?, 16))
}

/// Creates an approved player in division 3.
///
/// # Arguments
/// * `username` - Also used for the email (`<username>@example.com`)
/// * `credits` - Opening balance, recorded in the ledger when non-zero
pub async fn create_test_member(
    db: &DatabaseConnection,
    username: &str,
    credits: i64,
) -> Result<member::Model> {
    let mut new_member =
        NewMember::applicant(format!("{username}@example.com"), username, "Test", username, 3);
    new_member.status = MemberStatus::Approved;
    new_member.credits = credits;
    Ok(membership::register_member(db, new_member, Utc::now())
        .await?
        .member)
}

/// Creates an approved administrator with no credits.
pub async fn create_test_admin(db: &DatabaseConnection, username: &str) -> Result<member::Model> {
    let mut new_member =
        NewMember::applicant(format!("{username}@example.com"), username, "Admin", username, 1);
    new_member.status = MemberStatus::Approved;
    new_member.role = MemberRole::Admin;
    Ok(membership::register_member(db, new_member, Utc::now())
        .await?
        .member)
}

/// A two hour template at "Court A" open to divisions 3, 4 and 5.
#[must_use]
pub fn test_template(starts_at: DateTime<Utc>, credit_cost: i64, capacity: i32) -> SessionTemplate {
    SessionTemplate {
        venue: "Court A".to_string(),
        divisions: BTreeSet::from([3, 4, 5]),
        starts_at,
        ends_at: starts_at + TimeDelta::hours(2),
        credit_cost,
        max_participants: capacity,
        cancellation_deadline_hours: None,
    }
}

/// Creates a session starting in 72 hours with the default cancellation deadline.
pub async fn create_test_session(
    db: &DatabaseConnection,
    credit_cost: i64,
    capacity: i32,
) -> Result<session::Model> {
    create_session_starting_in(db, 72, credit_cost, capacity, None).await
}

/// Creates a session starting `hours` from now.
pub async fn create_session_starting_in(
    db: &DatabaseConnection,
    hours: i64,
    credit_cost: i64,
    capacity: i32,
    cancellation_deadline_hours: Option<i32>,
) -> Result<session::Model> {
    let now = Utc::now();
    let mut template = test_template(now + TimeDelta::hours(hours), credit_cost, capacity);
    template.cancellation_deadline_hours = cancellation_deadline_hours;
    catalog::add_session(db, &template, "admin-001", now).await
}
