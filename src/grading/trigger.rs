use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use cron::Schedule;
use thiserror::Error;
use time::OffsetDateTime;

use crate::grading::model::Assignment;

/// Half-width of the window around an occurrence that counts as "this tick".
pub(crate) const TRIGGER_WINDOW_SECONDS: i64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TriggerError {
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },
    #[error("time {0} is outside the supported range")]
    OutOfRange(OffsetDateTime),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TriggerDecision {
    pub(crate) due: bool,
    /// Distance between `now` and the next occurrence, if there is one.
    pub(crate) diff_seconds: Option<f64>,
}

/// Parses a 5-field (minute resolution) or 6/7-field (seconds first) expression.
///
/// 5-field expressions use standard cron weekdays (`0`-`7`, Sunday is `0` or `7`)
/// and are rewritten to the `1`-`7` numbering of the `cron` crate (Sunday is `1`).
pub(crate) fn parse_schedule(expression: &str) -> Result<Schedule, TriggerError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, day_of_month, month, day_of_week] => {
            let day_of_week = standard_day_of_week(day_of_week).ok_or_else(|| {
                TriggerError::InvalidExpression {
                    expression: expression.to_string(),
                    reason: format!("invalid day-of-week field {day_of_week:?}"),
                }
            })?;
            format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}")
        }
        _ => fields.join(" "),
    };

    Schedule::from_str(&normalized).map_err(|err| TriggerError::InvalidExpression {
        expression: expression.to_string(),
        reason: err.to_string(),
    })
}

/// First occurrence strictly after `after`.
pub(crate) fn next_occurrence(
    expression: &str,
    after: OffsetDateTime,
) -> Result<Option<OffsetDateTime>, TriggerError> {
    let schedule = parse_schedule(expression)?;
    let after = to_chrono(after)?;
    Ok(schedule.after(&after).next().map(from_chrono))
}

pub(crate) fn evaluate(expression: &str, now: OffsetDateTime) -> Result<TriggerDecision, TriggerError> {
    let window = time::Duration::seconds(TRIGGER_WINDOW_SECONDS);
    let next = next_occurrence(expression, now - window)?;

    let diff_seconds = next.map(|occurrence| (occurrence - now).as_seconds_f64().abs());
    let due = diff_seconds.is_some_and(|diff| diff < window.as_seconds_f64());

    Ok(TriggerDecision { due, diff_seconds })
}

/// Filters to the assignments that fire at `now`; invalid schedules are skipped.
pub(crate) fn select_due(
    assignments: Vec<Assignment>,
    now: OffsetDateTime,
    ignore_schedule: bool,
) -> Vec<Assignment> {
    if ignore_schedule {
        return assignments;
    }

    assignments
        .into_iter()
        .filter(|assignment| match evaluate(&assignment.cron_expression, now) {
            Ok(decision) => {
                tracing::info!(
                    assignment = %assignment.name,
                    cron = %assignment.cron_expression,
                    trigger = decision.due,
                    diff_seconds = ?decision.diff_seconds,
                    "Evaluated assignment schedule"
                );
                decision.due
            }
            Err(err) => {
                tracing::warn!(
                    assignment = %assignment.name,
                    error = %err,
                    "Skipping assignment with invalid schedule"
                );
                false
            }
        })
        .collect()
}

/// Rewrites numeric weekdays, ranges, lists and steps; names pass through untouched.
fn standard_day_of_week(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step.parse::<usize>().ok().filter(|step| *step > 0)?)),
            None => (item, None),
        };

        let (start, end) = if base == "*" {
            (0, 6)
        } else if let Some((start, end)) = base.split_once('-') {
            match (start.parse::<u8>(), end.parse::<u8>()) {
                (Ok(start), Ok(end)) => (start, end),
                _ => {
                    named.push(item.to_string());
                    continue;
                }
            }
        } else {
            match base.parse::<u8>() {
                Ok(day) if step.is_some() => (day, 7),
                Ok(day) => (day, day),
                Err(_) => {
                    named.push(item.to_string());
                    continue;
                }
            }
        };

        if start > end || end > 7 {
            return None;
        }
        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7 + 1);
        }
    }

    let mut items: Vec<String> = days.into_iter().map(|day| day.to_string()).collect();
    items.extend(named);
    Some(items.join(","))
}

fn to_chrono(value: OffsetDateTime) -> Result<DateTime<Utc>, TriggerError> {
    Utc.timestamp_opt(value.unix_timestamp(), value.nanosecond())
        .single()
        .ok_or(TriggerError::OutOfRange(value))
}

fn from_chrono(value: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(value.timestamp())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .replace_nanosecond(value.timestamp_subsec_nanos())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
