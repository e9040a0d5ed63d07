//! Crontab expressions.
//!
//! Jobs use the classic 5-field form (`minute hour day-of-month month
//! day-of-week`, Sunday is 0 or 7). The `cron` crate wants a leading seconds
//! field and numbers Sunday as 1, so expressions are rewritten before parsing.

use chrono::{DateTime, Utc};
use minici_core::{Error, Result};
use std::collections::BTreeSet;
use std::str::FromStr;

/// A parsed, validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse a 5-field crontab expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidSchedule {
            expression: expression.to_string(),
            message,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!(
                "expected 5 fields (minute hour day-of-month month day-of-week), found {}",
                fields.len()
            )));
        }

        let day_of_week = translate_day_of_week(fields[4]).map_err(invalid)?;
        let normalized = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], day_of_week
        );

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as written by the user.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First due time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }
}

/// Rewrite a crontab day-of-week field (0-7, Sunday = 0 or 7) into the
/// `cron` crate's numbering (1-7, Sunday = 1). Lists, ranges and steps are
/// expanded into an explicit list. Day names (`SUN`..`SAT`) count as 0-6 and
/// may be mixed with numbers.
fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    let mut parts = Vec::new();

    for part in field.split(',') {
        if part == "*" || part == "?" {
            parts.push(part.to_string());
            continue;
        }

        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", step))?;
                if step == 0 {
                    return Err("day-of-week step must be greater than zero".to_string());
                }
                (base, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = match (base, base.split_once('-')) {
            ("*", _) => (0, 6),
            (_, Some((a, b))) => (day_number(a)?, day_number(b)?),
            (single, None) if step.is_some() => (day_number(single)?, 6),
            (single, None) => {
                let day = day_number(single)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("invalid day-of-week range '{}'", base));
        }

        let days: BTreeSet<u32> = (start..=end)
            .step_by(step.unwrap_or(1))
            .map(|day| day % 7 + 1)
            .collect();
        parts.extend(days.iter().map(|d| d.to_string()));
    }

    Ok(parts.join(","))
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn day_number(token: &str) -> std::result::Result<u32, String> {
    if let Some(index) = DAY_NAMES.iter().position(|name| name.eq_ignore_ascii_case(token)) {
        return Ok(index as u32);
    }
    match token.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day of week '{}'", token)),
    }
}
