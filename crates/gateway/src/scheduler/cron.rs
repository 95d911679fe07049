//! Timezone-aware cron evaluator (5-field: min hour dom month dow).
//!
//! Field grammar: `*`, `*/N`, `A`, `A-B`, `A-B/N`, `A/N` (first match at A,
//! then every N — the biweekly mapping `0 9 * * 1/2` relies on this), and
//! comma-joined combinations. Day-of-week counts from Sunday = 0.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Parse a timezone string into a `chrono_tz::Tz`, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Does one comma-part of a field match `value`?
fn part_matches(part: &str, value: u32) -> bool {
    if part == "*" {
        return true;
    }
    // step syntax: <base>/<step> where base is "*", "A", or "A-B"
    if let Some((base, step_s)) = part.split_once('/') {
        let Ok(step) = step_s.parse::<u32>() else {
            return false;
        };
        if step == 0 {
            return false;
        }
        return match base {
            "*" => value % step == 0,
            _ => {
                if let Some((start_s, end_s)) = base.split_once('-') {
                    match (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                        (Ok(start), Ok(end)) => {
                            value >= start && value <= end && (value - start) % step == 0
                        }
                        _ => false,
                    }
                } else {
                    match base.parse::<u32>() {
                        // open-ended: first match at start, then every step
                        Ok(start) => value >= start && (value - start) % step == 0,
                        Err(_) => false,
                    }
                }
            }
        };
    }
    if let Some((start_s, end_s)) = part.split_once('-') {
        return match (start_s.parse::<u32>(), end_s.parse::<u32>()) {
            (Ok(start), Ok(end)) => value >= start && value <= end,
            _ => false,
        };
    }
    part.parse::<u32>().map(|n| n == value).unwrap_or(false)
}

fn field_matches(field: &str, value: u32) -> bool {
    field.split(',').any(|part| part_matches(part, value))
}

/// Check if a **local** naive datetime matches a 5-field cron expression.
fn matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    field_matches(fields[0], dt.minute())
        && field_matches(fields[1], dt.hour())
        && field_matches(fields[2], dt.day())
        && field_matches(fields[3], dt.month())
        && field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Check if a UTC datetime matches a 5-field cron expression.
pub fn cron_matches(cron: &str, dt: &DateTime<Utc>) -> bool {
    matches_naive(cron, &dt.naive_utc())
}

/// Quick shape check used by schedule validation.
pub fn is_valid_cron(cron: &str) -> bool {
    cron.split_whitespace().count() == 5
        && cron_next(cron, &Utc::now()).is_some()
}

/// Compute the next occurrence after `after`, evaluated in `tz`, returned
/// in UTC.
///
/// DST handling: local times inside a spring-forward gap are skipped;
/// fall-back overlaps resolve to the earliest (pre-transition) mapping.
pub fn cron_next_tz(cron: &str, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;

    let local_after = after.with_timezone(&tz).naive_local();
    let to_next_minute = 60 - i64::from(local_after.second());
    let mut candidate = local_after + chrono::Duration::seconds(to_next_minute);
    candidate = candidate.with_second(0).unwrap_or(candidate);

    let max_checks = 366 * 24 * 60; // one year of minutes
    for _ in 0..max_checks {
        if matches_naive(cron, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {
                    // DST gap, this local minute does not exist.
                }
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

/// Convenience: next occurrence in UTC.
pub fn cron_next(cron: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron_next_tz(cron, after, chrono_tz::UTC)
}
