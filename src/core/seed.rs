//! First-start seeding: a default administrator and a few sample sessions,
//! created only when the corresponding collection is empty.
//!
//! Everything is written in one transaction, so a bad seed entry leaves the
//! store empty and the next start tries again.

use crate::{
    config::settings::{AdminSeed, SeedConfig, SessionSeed},
    core::{
        catalog::{self, SessionTemplate},
        membership::{self, NewMember},
    },
    entities::{Member, MemberRole, MemberStatus, Session, member, session},
    errors::{Error, Result},
    events::{ChangeSet, Collection},
};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait, TransactionTrait};
use tracing::{debug, info, instrument};

/// Records created by [`seed_if_empty`].
#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    /// Set only when the members table was empty
    pub admin: Option<member::Model>,
    pub sessions: Vec<session::Model>,
}

impl SeedReport {
    /// Empty when nothing was seeded.
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        if let Some(admin) = &self.admin {
            changes.touch(Collection::Members, admin.id.clone());
        }
        for session in &self.sessions {
            changes.touch(Collection::Sessions, session.id.clone());
        }
        changes
    }
}

/// Seeds the default admin if there are no members and the sample sessions if
/// there are no sessions. Safe to call on every start.
#[instrument(skip(db, seed))]
pub async fn seed_if_empty(
    db: &DatabaseConnection,
    seed: &SeedConfig,
    now: DateTime<Utc>,
) -> Result<SeedReport> {
    let admin = admin_member(&seed.admin);
    admin.validate()?;
    let templates = seed
        .sessions
        .iter()
        .map(|session_seed| session_template(session_seed, now))
        .collect::<Result<Vec<_>>>()?;

    let txn = db.begin().await?;
    let mut report = SeedReport::default();

    if Member::find().count(&txn).await? == 0 {
        let registration = membership::insert_member(&txn, admin, now).await?;
        report.admin = Some(registration.member);
    } else {
        debug!("members present, skipping admin seed");
    }

    if Session::find().count(&txn).await? == 0 {
        for template in &templates {
            let session = catalog::add_session(&txn, template, &seed.admin.id, now).await?;
            report.sessions.push(session);
        }
    } else {
        debug!("sessions present, skipping sample sessions");
    }

    txn.commit().await?;

    if let Some(admin) = &report.admin {
        info!(member_id = %admin.id, "seeded default administrator");
    }
    if !report.sessions.is_empty() {
        info!(count = report.sessions.len(), "seeded sample sessions");
    }
    Ok(report)
}

fn admin_member(admin: &AdminSeed) -> NewMember {
    NewMember {
        id: Some(admin.id.clone()),
        email: admin.email.clone(),
        username: admin.username.clone(),
        first_name: admin.first_name.clone(),
        last_name: admin.last_name.clone(),
        division: admin.division,
        role: MemberRole::Admin,
        status: MemberStatus::Approved,
        credits: admin.credits,
    }
}

fn session_template(seed: &SessionSeed, now: DateTime<Utc>) -> Result<SessionTemplate> {
    let invalid = |what: &str| Error::Config {
        message: format!("invalid {what} for seed session '{}'", seed.venue),
    };

    let time = NaiveTime::from_hms_opt(seed.start_hour, seed.start_minute, 0)
        .ok_or_else(|| invalid("start time"))?;
    let date = TimeDelta::try_days(seed.days_from_now)
        .and_then(|offset| now.date_naive().checked_add_signed(offset))
        .ok_or_else(|| invalid("days_from_now"))?;
    let starts_at = date.and_time(time).and_utc();
    let ends_at = TimeDelta::try_minutes(seed.duration_minutes)
        .and_then(|length| starts_at.checked_add_signed(length))
        .ok_or_else(|| invalid("duration_minutes"))?;

    Ok(SessionTemplate {
        venue: seed.venue.clone(),
        divisions: seed.divisions.iter().copied().collect(),
        starts_at,
        ends_at,
        credit_cost: seed.credit_cost,
        max_participants: seed.max_participants,
        cancellation_deadline_hours: None,
    })
}
