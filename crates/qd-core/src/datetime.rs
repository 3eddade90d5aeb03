use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str = "qd-time.toml";
const TIMEZONE_ENV_VAR: &str = "QD_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str = "QD_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
    timezone: Option<String>,
    time: Option<TimezoneSection>,
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
    timezone: Option<String>,
}

/// Timezone used to interpret and display deadlines; resolved once per process.
pub fn display_timezone() -> &'static Tz {
    static DISPLAY_TZ: OnceLock<Tz> = OnceLock::new();
    DISPLAY_TZ.get_or_init(resolve_display_timezone)
}

#[must_use]
pub fn format_local(dt: DateTime<Utc>) -> String {
    dt.with_timezone(display_timezone())
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

fn resolve_display_timezone() -> Tz {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
        && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
    {
        return tz;
    }

    if let Some(path) = timezone_config_path()
        && let Some(tz) = load_timezone_from_file(&path)
    {
        return tz;
    }

    tracing::debug!("no timezone configured; using UTC");
    chrono_tz::UTC
}

fn timezone_config_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(TIMEZONE_CONFIG_ENV_VAR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(path: &Path) -> Option<Tz> {
    if !path.exists() {
        tracing::debug!(file = %path.display(), "timezone config file not found");
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed reading timezone config file"
            );
            return None;
        }
    };

    let parsed = match toml::from_str::<TimezoneConfig>(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed parsing timezone config file"
            );
            return None;
        }
    };

    let timezone = parsed
        .timezone
        .or_else(|| parsed.time.and_then(|section| section.timezone));
    let Some(timezone) = timezone else {
        tracing::warn!(file = %path.display(), "timezone config had no timezone field");
        return None;
    };

    parse_timezone(&timezone, &format!("file:{}", path.display()))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured display timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

fn to_utc_from_local(local_naive: NaiveDateTime, tz: &Tz, context: &str) -> anyhow::Result<DateTime<Utc>> {
    match tz.from_local_datetime(&local_naive) {
        LocalResult::Single(local_dt) => Ok(local_dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => {
            tracing::warn!(
                context,
                first = %first,
                second = %second,
                "ambiguous local datetime; using earliest"
            );
            Ok(first.min(second).with_timezone(&Utc))
        }
        LocalResult::None => Err(anyhow!(
            "local datetime does not exist in configured timezone: {context}"
        )),
    }
}

/// Parses a deadline expression relative to `now` in the display timezone.
pub fn parse_deadline_expr(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    parse_deadline_expr_in(input, now, display_timezone())
}

#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_deadline_expr_in(
    input: &str,
    now: DateTime<Utc>,
    tz: &Tz,
) -> anyhow::Result<DateTime<Utc>> {
    let token = input.trim();
    let lower = token.to_ascii_lowercase();
    let local_now = now.with_timezone(tz);

    match lower.as_str() {
        "" => return Err(anyhow!("deadline expression cannot be empty")),
        "now" => return Ok(now),
        "today" | "tomorrow" => {
            // Day-only expressions resolve to 23:59 local time.
            let mut date = local_now.date_naive();
            if lower == "tomorrow" {
                date = date
                    .succ_opt()
                    .ok_or_else(|| anyhow!("failed to advance to tomorrow"))?;
            }
            return end_of_day(date, tz, &lower);
        }
        _ => {}
    }

    if let Some(target_weekday) = parse_weekday_name(&lower) {
        let target_date = next_weekday_date(local_now.date_naive(), target_weekday);
        return end_of_day(target_date, tz, "weekday-name");
    }

    if let Some((hour, minute)) = parse_clock_time(token) {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow!("invalid clock time: {token}"))?;
        let mut day = local_now.date_naive();
        if day.and_time(time) <= local_now.naive_local() {
            day = day
                .succ_opt()
                .ok_or_else(|| anyhow!("failed to advance to next day"))?;
        }
        return to_utc_from_local(day.and_time(time), tz, "clock-time");
    }

    let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
    if let Some(caps) = rel_re.captures(token) {
        let num: i64 = caps["num"]
            .parse()
            .context("invalid relative number")?;
        let duration = match &caps["unit"] {
            "d" => Duration::try_days(num),
            "h" => Duration::try_hours(num),
            "m" => Duration::try_minutes(num),
            unit => return Err(anyhow!("unknown relative unit: {unit}")),
        };
        let shifted = duration.and_then(|duration| {
            if &caps["sign"] == "-" {
                now.checked_sub_signed(duration)
            } else {
                now.checked_add_signed(duration)
            }
        });
        return shifted.ok_or_else(|| anyhow!("deadline out of range: {token}"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(token, format) {
            return to_utc_from_local(ndt, tz, "local-datetime");
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return end_of_day(date, tz, "date");
    }

    Err(anyhow!("unrecognized deadline expression: {input}"))
}

fn end_of_day(date: NaiveDate, tz: &Tz, context: &str) -> anyhow::Result<DateTime<Utc>> {
    let end = date
        .and_hms_opt(23, 59, 0)
        .ok_or_else(|| anyhow!("failed to construct end of day for {date}"))?;
    to_utc_from_local(end, tz, context)
}

fn parse_weekday_name(token: &str) -> Option<Weekday> {
    match token.trim() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday_date(from: NaiveDate, target: Weekday) -> NaiveDate {
    let from_idx = from.weekday().num_days_from_monday() as i64;
    let target_idx = target.num_days_from_monday() as i64;
    let mut delta = (7 + target_idx - from_idx) % 7;
    if delta == 0 {
        delta = 7;
    }
    from.checked_add_signed(Duration::days(delta)).unwrap_or(from)
}

fn parse_clock_time(token: &str) -> Option<(u32, u32)> {
    let clock_re =
        Regex::new(r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$").ok()?;
    let captures = clock_re.captures(token.trim())?;

    let raw_hour = captures.name("hour")?.as_str().parse::<u32>().ok()?;
    let minute = captures.name("minute")?.as_str().parse::<u32>().ok()?;
    if minute > 59 {
        return None;
    }

    let hour = match captures.name("ampm").map(|m| m.as_str().to_ascii_lowercase()) {
        Some(ampm) => {
            if raw_hour == 0 || raw_hour > 12 {
                return None;
            }
            match (ampm.as_str(), raw_hour) {
                ("am", 12) => 0,
                ("am", h) => h,
                ("pm", 12) => 12,
                ("pm", h) => h + 12,
                _ => return None,
            }
        }
        None if raw_hour > 23 => return None,
        None => raw_hour,
    };

    Some((hour, minute))
}

/// RFC 3339 in UTC; fractional seconds are written only when non-zero so
/// whole-second timestamps stay in the plain `2026-01-01T09:00:00Z` form.
pub mod iso8601_serde {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match dt {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    fn seoul() -> Tz {
        "Asia/Seoul".parse().expect("known timezone")
    }

    #[test]
    fn parses_relative_offsets() {
        let parsed = parse_deadline_expr_in("+2h", now(), &chrono_tz::UTC).expect("parse +2h");
        assert_eq!(parsed, now() + Duration::hours(2));

        let parsed = parse_deadline_expr_in("-30m", now(), &chrono_tz::UTC).expect("parse -30m");
        assert_eq!(parsed, now() - Duration::minutes(30));
    }

    #[test]
    fn oversized_relative_offsets_are_errors() {
        for expr in ["+100000000d", "-100000000d", "+200000000000d", "+99999999999999999m"] {
            let err = parse_deadline_expr_in(expr, now(), &chrono_tz::UTC)
                .expect_err("offset should be rejected");
            assert!(err.to_string().contains("out of range"), "{expr}: {err}");
        }
    }

    #[test]
    fn parses_tomorrow_as_end_of_local_day() {
        let parsed = parse_deadline_expr_in("tomorrow", now(), &seoul()).expect("parse tomorrow");
        assert_eq!(
            parsed.with_timezone(&seoul()).format("%Y-%m-%d %H:%M").to_string(),
            "2026-02-18 23:59"
        );
    }

    #[test]
    fn parses_weekday_name() {
        // 2026-02-17 is a Tuesday.
        let parsed = parse_deadline_expr_in("wednesday", now(), &chrono_tz::UTC).expect("parse weekday");
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-02-18");

        let parsed = parse_deadline_expr_in("tue", now(), &chrono_tz::UTC).expect("parse weekday");
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-02-24");
    }

    #[test]
    fn clock_time_in_the_past_rolls_to_next_day() {
        let parsed = parse_deadline_expr_in("9:15am", now(), &chrono_tz::UTC).expect("parse clock");
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2026-02-18 09:15");

        let parsed = parse_deadline_expr_in("15:23", now(), &chrono_tz::UTC).expect("parse clock");
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2026-02-17 15:23");
    }

    #[test]
    fn parses_absolute_forms() {
        let parsed = parse_deadline_expr_in("2026-03-01T08:30:00+09:00", now(), &chrono_tz::UTC)
            .expect("parse rfc3339");
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2026-02-28 23:30");

        let parsed = parse_deadline_expr_in("2026-03-01T08:30", now(), &seoul()).expect("parse local");
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2026-02-28 23:30");

        assert!(parse_deadline_expr_in("someday", now(), &chrono_tz::UTC).is_err());
    }

    #[test]
    fn iso8601_omits_zero_fraction_and_keeps_nonzero() {
        assert_eq!(iso8601_serde::format(&now()), "2026-02-17T12:00:00Z");

        let precise = now() + Duration::milliseconds(250);
        let text = iso8601_serde::format(&precise);
        assert_eq!(text, "2026-02-17T12:00:00.250Z");
        assert_eq!(iso8601_serde::parse(&text).expect("parse"), precise);
    }
}
