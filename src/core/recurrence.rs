//! Recurring session generation.
//!
//! A template's time of day and length are stamped onto every selected weekday
//! from the template's start date through an end date (inclusive). Candidates
//! that would start at or before "now" are dropped. The survivors share one
//! parent id and are numbered in date order.

use std::collections::BTreeSet;

use crate::{
    core::catalog::SessionTemplate,
    entities::session,
    errors::{Error, Result},
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sea_orm::{TransactionTrait, prelude::*};
use tracing::{info, warn};

/// Longest accepted generation window, in days from the template's start date
pub const MAX_RECURRENCE_DAYS: i64 = 366;

/// One dated instance of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    /// Template time of day on the matched date
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Expands `template` over the selected weekdays (0 = Sunday .. 6 = Saturday).
///
/// # Errors
/// `InvalidSchedule` for an empty weekday set, a window longer than
/// [`MAX_RECURRENCE_DAYS`] or an end time outside the supported range;
/// `InvalidWeekday` for a day number above 6.
pub fn expand_occurrences(
    template: &SessionTemplate,
    weekdays: &[u32],
    end_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Vec<Occurrence>> {
    if weekdays.is_empty() {
        return Err(Error::InvalidSchedule {
            message: "at least one weekday must be selected".to_string(),
        });
    }
    if let Some(&day) = weekdays.iter().find(|&&d| d > 6) {
        return Err(Error::InvalidWeekday { day });
    }
    let selected: BTreeSet<u32> = weekdays.iter().copied().collect();

    let first_date = template.starts_at.date_naive();
    if end_date.signed_duration_since(first_date).num_days() > MAX_RECURRENCE_DAYS {
        return Err(Error::InvalidSchedule {
            message: format!("recurrence window cannot exceed {MAX_RECURRENCE_DAYS} days"),
        });
    }

    let time_of_day = template.starts_at.time();
    let length = template.ends_at - template.starts_at;

    let occurrences = first_date
        .iter_days()
        .take_while(|date| *date <= end_date)
        .filter(|date| selected.contains(&date.weekday().num_days_from_sunday()))
        .map(|date| {
            let starts_at = date.and_time(time_of_day).and_utc();
            let ends_at = starts_at
                .checked_add_signed(length)
                .ok_or_else(|| Error::InvalidSchedule {
                    message: format!("session on {date} ends outside the supported range"),
                })?;
            Ok(Occurrence { starts_at, ends_at })
        })
        .filter(|occurrence| !matches!(occurrence, Ok(o) if o.starts_at <= now))
        .collect::<Result<Vec<_>>>()?;

    Ok(occurrences)
}

/// Creates one session per occurrence in a single transaction.
///
/// # Errors
/// Template or weekday validation errors, or `NoSessionsGenerated` when no
/// future date matched.
pub async fn add_recurring_sessions(
    db: &DatabaseConnection,
    template: &SessionTemplate,
    weekdays: &[u32],
    end_date: NaiveDate,
    created_by: &str,
    now: DateTime<Utc>,
) -> Result<Vec<session::Model>> {
    template.validate()?;
    let occurrences = expand_occurrences(template, weekdays, end_date, now)?;
    if occurrences.is_empty() {
        warn!(
            venue = %template.venue,
            %end_date,
            "recurring template produced no future sessions"
        );
        return Err(Error::NoSessionsGenerated);
    }

    let parent_id = format!("recurring-{}", uuid::Uuid::new_v4());
    let txn = db.begin().await?;

    let mut sessions = Vec::with_capacity(occurrences.len());
    for (index, occurrence) in occurrences.into_iter().enumerate() {
        let session = template
            .to_active_model(
                format!("{parent_id}-{}", index + 1),
                created_by,
                Some(parent_id.clone()),
                occurrence.starts_at,
                occurrence.ends_at,
                now,
            )
            .insert(&txn)
            .await?;
        sessions.push(session);
    }

    txn.commit().await?;

    info!(
        parent_id = %parent_id,
        count = sessions.len(),
        venue = %template.venue,
        "recurring sessions created"
    );
    Ok(sessions)
}
