//! Text formats shared by rule files, configuration and the advisory prompt.
//!
//! Durations are written as `"4h"`, `"30m"`, `"1d"` or compounds such as
//! `"1h30m"`; `"s"` is accepted for short timeouts and a bare number means
//! hours. Times of day are `HH:MM`, or `HH:MM:SS` when the seconds matter.

use chrono::{Duration, NaiveTime, Timelike};
use serde::{de, Deserialize, Deserializer, Serializer};

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;

/// Parse a duration string into a non-negative `Duration`
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let text = raw.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    if text.starts_with('-') {
        return Err(format!("negative duration '{}'", raw));
    }

    if text.chars().all(|c| c.is_ascii_digit()) {
        let hours: i64 = text
            .parse()
            .map_err(|e| format!("invalid duration '{}': {}", raw, e))?;
        return seconds_to_duration(hours.checked_mul(SECONDS_PER_HOUR), raw);
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let per_unit = match c {
            'd' => SECONDS_PER_DAY,
            'h' => SECONDS_PER_HOUR,
            'm' => SECONDS_PER_MINUTE,
            's' => 1,
            ' ' if digits.is_empty() => continue,
            _ => return Err(format!("invalid duration '{}': unexpected '{}'", raw, c)),
        };
        if digits.is_empty() {
            return Err(format!("invalid duration '{}': unit without a number", raw));
        }
        let value: i64 = digits
            .parse()
            .map_err(|e| format!("invalid duration '{}': {}", raw, e))?;
        digits.clear();
        total = value
            .checked_mul(per_unit)
            .and_then(|m| total.checked_add(m))
            .ok_or_else(|| format!("duration '{}' is too large", raw))?;
    }
    if !digits.is_empty() {
        return Err(format!("invalid duration '{}': trailing number without unit", raw));
    }

    seconds_to_duration(Some(total), raw)
}

fn seconds_to_duration(seconds: Option<i64>, raw: &str) -> Result<Duration, String> {
    seconds
        .and_then(Duration::try_seconds)
        .ok_or_else(|| format!("duration '{}' is too large", raw))
}

/// Render a duration in the largest whole unit (`240m` becomes `4h`)
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds();
    if seconds == 0 {
        "0m".to_string()
    } else if seconds % SECONDS_PER_DAY == 0 {
        format!("{}d", seconds / SECONDS_PER_DAY)
    } else if seconds % SECONDS_PER_HOUR == 0 {
        format!("{}h", seconds / SECONDS_PER_HOUR)
    } else if seconds % SECONDS_PER_MINUTE == 0 {
        format!("{}m", seconds / SECONDS_PER_MINUTE)
    } else {
        format!("{}s", seconds)
    }
}

/// Parse `HH:MM` (seconds tolerated)
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, String> {
    let text = raw.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|e| format!("invalid time of day '{}': {}", raw, e))
}

/// Render a time of day as `HH:MM`
pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Serde adapter for `Duration` fields written as duration strings
pub mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(de::Error::custom)
    }
}

/// Serde adapter for optional duration strings
pub mod option_duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| parse_duration(&raw).map_err(de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for a list of `HH:MM` times
pub mod time_list {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(values: &[NaiveTime], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            let text = if value.second() == 0 {
                format_time_of_day(*value)
            } else {
                value.format("%H:%M:%S").to_string()
            };
            seq.serialize_element(&text)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<NaiveTime>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|raw| parse_time_of_day(raw).map_err(de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("4h").unwrap(), Duration::hours(4));
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_duration(" 2H ").unwrap(), Duration::hours(2));
    }

    #[test]
    fn test_bare_number_means_hours() {
        assert_eq!(parse_duration("8").unwrap(), Duration::hours(8));
    }

    #[test]
    fn test_compound_duration() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("1d 2h").unwrap(), Duration::hours(26));
    }

    #[test]
    fn test_rejects_bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-4h").is_err());
        assert!(parse_duration("4x").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("1h30").is_err());
    }

    #[test]
    fn test_format_uses_largest_whole_unit() {
        assert_eq!(format_duration(Duration::minutes(240)), "4h");
        assert_eq!(format_duration(Duration::minutes(90)), "90m");
        assert_eq!(format_duration(Duration::hours(48)), "2d");
        assert_eq!(format_duration(Duration::zero()), "0m");
        assert_eq!(format_duration(Duration::seconds(10)), "10s");
    }

    #[test]
    fn test_seconds_for_timeouts() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::seconds(90));
    }

    #[test]
    fn test_time_of_day() {
        let t = parse_time_of_day("06:00").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(format_time_of_day(t), "06:00");
        assert!(parse_time_of_day("25:00").is_err());
        assert_eq!(
            parse_time_of_day("20:15:00").unwrap(),
            NaiveTime::from_hms_opt(20, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_time_list_keeps_seconds() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Times {
            #[serde(with = "time_list")]
            times: Vec<NaiveTime>,
        }

        let parsed: Times = serde_json::from_str(r#"{"times": ["20:15:30", "08:00"]}"#).unwrap();
        let written = serde_json::to_string(&parsed).unwrap();
        assert_eq!(written, r#"{"times":["20:15:30","08:00"]}"#);

        let reloaded: Times = serde_json::from_str(&written).unwrap();
        assert_eq!(reloaded.times[0], NaiveTime::from_hms_opt(20, 15, 30).unwrap());
    }
}
