//! Deadline urgency: time remaining, the discrete status bands, and the
//! human-readable remaining-time string.
//!
//! `classify` and `format_remaining` both read [`THRESHOLDS`], so the band
//! edges and the unit switches cannot drift apart.

use chrono::{DateTime, Duration, Utc};

use crate::task::Task;

pub const MINUTE_SECS: i64 = 60;
pub const HOUR_SECS: i64 = 3_600;
pub const DAY_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadlineStatus {
    Overdue,
    Imminent,
    Soon,
    Normal,
}

impl DeadlineStatus {
    pub fn label(self) -> &'static str {
        match self {
            DeadlineStatus::Overdue => "Overdue",
            DeadlineStatus::Imminent => "Due very soon",
            DeadlineStatus::Soon => "Due today",
            DeadlineStatus::Normal => "On track",
        }
    }
}

/// Upper bounds (exclusive, in seconds) of the non-negative urgency bands,
/// ascending. Remaining time at or beyond the last bound is `Normal`.
pub const THRESHOLDS: [(i64, DeadlineStatus); 2] = [
    (HOUR_SECS, DeadlineStatus::Imminent),
    (DAY_SECS, DeadlineStatus::Soon),
];

pub fn time_remaining(task: &Task, now: DateTime<Utc>) -> Option<Duration> {
    task.deadline.map(|deadline| deadline - now)
}

pub fn classify(remaining: Option<Duration>) -> DeadlineStatus {
    let Some(remaining) = remaining else {
        return DeadlineStatus::Normal;
    };
    if remaining < Duration::zero() {
        return DeadlineStatus::Overdue;
    }
    THRESHOLDS
        .iter()
        .find(|(bound, _)| remaining < Duration::seconds(*bound))
        .map(|(_, status)| *status)
        .unwrap_or(DeadlineStatus::Normal)
}

pub fn deadline_status(task: &Task, now: DateTime<Utc>) -> DeadlineStatus {
    classify(time_remaining(task, now))
}

pub fn format_remaining(remaining: Option<Duration>) -> String {
    let Some(remaining) = remaining else {
        return "no deadline".to_string();
    };

    let overdue = remaining < Duration::zero();
    let secs = remaining.num_seconds().abs();
    let [(hour_bound, _), (day_bound, _)] = THRESHOLDS;

    if secs < MINUTE_SECS {
        return if overdue {
            "under a minute overdue".to_string()
        } else {
            "under a minute".to_string()
        };
    }

    if overdue {
        let amount = if secs < hour_bound {
            units(secs / MINUTE_SECS, "minute")
        } else if secs < day_bound {
            units(secs / HOUR_SECS, "hour")
        } else {
            units(secs / DAY_SECS, "day")
        };
        return format!("{amount} overdue");
    }

    if secs < hour_bound {
        format!("{} left", units(secs / MINUTE_SECS, "minute"))
    } else if secs < day_bound {
        format!(
            "{} {} left",
            units(secs / HOUR_SECS, "hour"),
            units((secs % HOUR_SECS) / MINUTE_SECS, "minute")
        )
    } else {
        format!(
            "{} {} left",
            units(secs / DAY_SECS, "day"),
            units((secs % DAY_SECS) / HOUR_SECS, "hour")
        )
    }
}

fn units(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: i64) -> Option<Duration> {
        Some(Duration::seconds(value))
    }

    #[test]
    fn classify_partitions_at_band_edges() {
        assert_eq!(classify(Some(Duration::milliseconds(-1))), DeadlineStatus::Overdue);
        assert_eq!(classify(secs(-DAY_SECS * 3)), DeadlineStatus::Overdue);
        assert_eq!(classify(secs(0)), DeadlineStatus::Imminent);
        assert_eq!(classify(secs(HOUR_SECS - 1)), DeadlineStatus::Imminent);
        assert_eq!(classify(secs(HOUR_SECS)), DeadlineStatus::Soon);
        assert_eq!(classify(secs(DAY_SECS - 1)), DeadlineStatus::Soon);
        assert_eq!(classify(secs(DAY_SECS)), DeadlineStatus::Normal);
        assert_eq!(classify(None), DeadlineStatus::Normal);
    }

    #[test]
    fn classify_is_monotonic_across_the_axis() {
        let order = |status: DeadlineStatus| match status {
            DeadlineStatus::Overdue => 0,
            DeadlineStatus::Imminent => 1,
            DeadlineStatus::Soon => 2,
            DeadlineStatus::Normal => 3,
        };
        let mut previous = 0;
        for value in (-2 * DAY_SECS..=2 * DAY_SECS).step_by(97) {
            let rank = order(classify(secs(value)));
            assert!(rank >= previous, "classification went backwards at {value}s");
            previous = rank;
        }
    }

    #[test]
    fn formats_future_remaining_time() {
        assert_eq!(format_remaining(None), "no deadline");
        assert_eq!(format_remaining(secs(59)), "under a minute");
        assert_eq!(format_remaining(secs(60)), "1 minute left");
        assert_eq!(format_remaining(secs(45 * 60 + 59)), "45 minutes left");
        assert_eq!(format_remaining(secs(HOUR_SECS)), "1 hour 0 minutes left");
        assert_eq!(format_remaining(secs(5 * HOUR_SECS + 30 * 60)), "5 hours 30 minutes left");
        assert_eq!(format_remaining(secs(DAY_SECS + 2 * HOUR_SECS + 59)), "1 day 2 hours left");
    }

    #[test]
    fn formats_overdue_with_largest_unit_below_threshold() {
        assert_eq!(format_remaining(secs(-30)), "under a minute overdue");
        assert_eq!(format_remaining(secs(-(10 * 60 + 30))), "10 minutes overdue");
        assert_eq!(format_remaining(secs(-(HOUR_SECS * 3 + 1))), "3 hours overdue");
        assert_eq!(format_remaining(secs(-(DAY_SECS * 2 + HOUR_SECS))), "2 days overdue");
    }
}
