//! Cron schedule parsing.
//!
//! Accepts standard 5-field cron (`min hour dom mon dow`), 6-field cron
//! with seconds, the 7-field form the `cron` crate uses natively, and the
//! aliases `@hourly`, `@daily`, `@weekly` and `@monthly`. All schedules
//! are evaluated in UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, ServiceError};

/// Expand aliases and pad to the 7-field format required by the `cron` crate.
pub fn normalize_cron_expr(expr: &str) -> String {
    let expr = expr.trim();
    match expr {
        "@hourly" => return "0 0 * * * * *".into(),
        "@daily" | "@midnight" => return "0 0 0 * * * *".into(),
        "@weekly" => return "0 0 0 * * Sun *".into(),
        "@monthly" => return "0 0 0 1 * * *".into(),
        _ => {}
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => format!("0 {expr} *"),
        6 => format!("{expr} *"),
        _ => expr.to_owned(),
    }
}

pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize_cron_expr(expr))
        .map_err(|e| ServiceError::InvalidCronExpression(format!("{expr}: {e}")))
}

/// The first fire time strictly after `after`.
pub fn next_after(schedule: &Schedule, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(after).next()
}
