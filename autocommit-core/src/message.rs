//! Commit message assembly.
//!
//! Precedence: an explicit message is used verbatim; otherwise a generated
//! summary, when one is available and non-empty, replaces the timestamp
//! message; otherwise the timestamp message is used.

use std::fmt;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Utc};
use chrono_tz::Tz;

use crate::config::{Config, DEFAULT_MESSAGE_FORMAT};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now", injectable so message output is reproducible.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Time zones
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZoneSpec {
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
    Named(Tz),
}

impl TimeZoneSpec {
    /// Parse `UTC`, `local`, `+02:00` or an IANA name. `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("local") || raw.is_empty() {
            return Some(TimeZoneSpec::Local);
        }
        if raw.eq_ignore_ascii_case("utc") || raw == "Z" {
            return Some(TimeZoneSpec::Utc);
        }
        if let Ok(offset) = raw.parse::<FixedOffset>() {
            return Some(TimeZoneSpec::Fixed(offset));
        }
        raw.parse::<Tz>().ok().map(TimeZoneSpec::Named)
    }
}

impl fmt::Display for TimeZoneSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZoneSpec::Local => write!(f, "local"),
            TimeZoneSpec::Utc => write!(f, "UTC"),
            TimeZoneSpec::Fixed(offset) => write!(f, "{offset}"),
            TimeZoneSpec::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp messages
// ---------------------------------------------------------------------------

/// Whether `format` is a strftime pattern chrono can render without error.
pub fn is_valid_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Timestamp formatter built from `commitMessageFormat` and `timeZone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFormat {
    format: String,
    zone: TimeZoneSpec,
}

impl MessageFormat {
    /// Invalid formats fall back to the default; unknown zones to local time.
    pub fn new(format: &str, zone: Option<&str>) -> Self {
        let format = if is_valid_format(format) {
            format.to_string()
        } else {
            DEFAULT_MESSAGE_FORMAT.to_string()
        };
        let zone = zone.and_then(TimeZoneSpec::parse).unwrap_or_default();
        Self { format, zone }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.commit_message_format, config.time_zone.as_deref())
    }

    pub fn zone(&self) -> TimeZoneSpec {
        self.zone
    }

    pub fn render(&self, now: DateTime<Utc>) -> String {
        let format = self.format.as_str();
        match self.zone {
            TimeZoneSpec::Local => now.with_timezone(&Local).format(format).to_string(),
            TimeZoneSpec::Utc => now.format(format).to_string(),
            TimeZoneSpec::Fixed(offset) => now.with_timezone(&offset).format(format).to_string(),
            TimeZoneSpec::Named(tz) => now.with_timezone(&tz).format(format).to_string(),
        }
    }
}

/// Pick the final message for a commit.
pub fn assemble(explicit: Option<&str>, timestamp: String, generated: Option<String>) -> String {
    if let Some(message) = explicit {
        return message.to_string();
    }
    match generated {
        Some(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
        _ => timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    #[test]
    fn default_format_in_utc() {
        let fmt = MessageFormat::new(DEFAULT_MESSAGE_FORMAT, Some("UTC"));
        assert_eq!(fmt.render(fixed_now()), "Mar 9, 2024, 2:05 PM");
    }

    #[test]
    fn named_zone_shifts_wall_clock() {
        let fmt = MessageFormat::new("%Y-%m-%d %H:%M", Some("Asia/Tokyo"));
        assert_eq!(fmt.render(fixed_now()), "2024-03-09 23:05");
    }

    #[test]
    fn fixed_offset_zone() {
        let fmt = MessageFormat::new("%H:%M %:z", Some("-05:00"));
        assert_eq!(fmt.render(fixed_now()), "09:05 -05:00");
    }

    #[test]
    fn unknown_zone_falls_back_to_local() {
        let fmt = MessageFormat::new("%H", Some("Mars/Olympus"));
        assert_eq!(fmt.zone(), TimeZoneSpec::Local);
    }

    #[test]
    fn invalid_format_falls_back_to_default() {
        let fmt = MessageFormat::new("%Q %", Some("UTC"));
        assert_eq!(fmt.render(fixed_now()), "Mar 9, 2024, 2:05 PM");
    }

    #[test]
    fn explicit_message_wins_over_everything() {
        let out = assemble(Some("Squash"), "ts".into(), Some("Add notes".into()));
        assert_eq!(out, "Squash");
    }

    #[test]
    fn generated_summary_replaces_timestamp() {
        assert_eq!(assemble(None, "ts".into(), Some("Add notes\n".into())), "Add notes");
    }

    #[test]
    fn empty_summary_falls_back_to_timestamp_byte_for_byte() {
        let fmt = MessageFormat::new(DEFAULT_MESSAGE_FORMAT, Some("UTC"));
        let clock = FixedClock(fixed_now());
        let first = assemble(None, fmt.render(clock.now()), Some("   ".into()));
        let second = assemble(None, fmt.render(clock.now()), None);
        assert_eq!(first, "Mar 9, 2024, 2:05 PM");
        assert_eq!(first, second);
    }
}
