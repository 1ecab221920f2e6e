//! Schedule expressions.
//!
//! Accepted forms:
//! - standard 5-field cron (`min hour dom month dow`, `0`/`7` = Sunday)
//! - 6/7-field cron with leading seconds (and trailing year)
//! - descriptors such as `@hourly`, `@daily`, `@weekly`
//! - `@every <duration>` with `h`, `m`, `s` and `ms` units, e.g. `@every 1h30m`

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::{Error, Result};

/// A parsed recurring schedule.
#[derive(Clone)]
pub enum Schedule {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expr = expression.trim();
        let invalid = |reason: String| Error::Schedule {
            expression: expression.to_string(),
            reason,
        };

        if expr.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }

        if let Some(rest) = expr.strip_prefix("@every") {
            let every = parse_duration(rest.trim()).map_err(invalid)?;
            return Ok(Self::Every(every));
        }

        let normalized = if expr.starts_with('@') {
            expr.to_string()
        } else {
            let fields: Vec<&str> = expr.split_whitespace().collect();
            match fields.len() {
                5 => format!(
                    "0 {} {} {} {} {}",
                    fields[0],
                    fields[1],
                    fields[2],
                    fields[3],
                    translate_day_of_week(fields[4])
                ),
                6 | 7 => fields.join(" "),
                n => return Err(invalid(format!("expected 5, 6 or 7 fields, got {n}"))),
            }
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Self::Cron(Box::new(schedule)))
    }

    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Self::Cron(schedule) => schedule.after(&now).next(),
            Self::Every(every) => chrono::Duration::from_std(*every)
                .ok()
                .and_then(|d| now.checked_add_signed(d)),
        }
    }

    /// Time to wait from now until the next firing.
    pub fn delay_until_next(&self) -> Option<Duration> {
        let now = Local::now();
        let next = self.next_after(now)?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron(schedule) => f.debug_tuple("Cron").field(&schedule.to_string()).finish(),
            Self::Every(every) => f.debug_tuple("Every").field(every).finish(),
        }
    }
}

/// Parse `1h30m`, `1.5h`, `45s`, `500ms`, `250us` and the like. Zero is rejected.
fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    if input.is_empty() {
        return Err("missing duration after @every".to_string());
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let len = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        let number = &rest[..len];
        if !number.contains(|c: char| c.is_ascii_digit()) {
            return Err(format!("invalid duration '{input}'"));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration '{input}'"))?;
        rest = &rest[len..];

        let unit_len = rest.find(is_number).unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "h" => 3_600e9,
            "m" => 60e9,
            "s" => 1e9,
            "ms" => 1e6,
            "us" | "µs" | "μs" => 1e3,
            "ns" => 1.0,
            "" => return Err(format!("missing unit in duration '{input}'")),
            unit => return Err(format!("unknown unit '{unit}' in duration '{input}'")),
        };
        nanos += value * scale;
        rest = &rest[unit_len..];
    }

    // Float to int casts saturate.
    let total = Duration::from_nanos(nanos as u64);
    if total.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(total)
}

/// Map standard day-of-week numbers (`0`-`7`, Sunday = 0 or 7) onto the
/// `1`-`7` (Sunday = 1) numbering used by the cron parser. Names pass through.
fn translate_day_of_week(field: &str) -> String {
    let shift = |n: &str| -> Option<u8> {
        let n: u8 = n.parse().ok()?;
        (n <= 7).then_some(n % 7 + 1)
    };

    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };

            let translated = match base.split_once('-') {
                Some((start, "7")) => match shift(start) {
                    Some(1) => "1".to_string(),
                    Some(start) => format!("{start}-7,1"),
                    None => base.to_string(),
                },
                Some((start, end)) => match (shift(start), shift(end)) {
                    (Some(start), Some(end)) => format!("{start}-{end}"),
                    _ => base.to_string(),
                },
                None => shift(base)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| base.to_string()),
            };

            match step {
                Some(step) => format!("{translated}/{step}"),
                None => translated,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
