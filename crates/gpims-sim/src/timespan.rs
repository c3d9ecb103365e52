//! ---
//! gpims_section: "11-simulation"
//! gpims_subsection: "module"
//! gpims_type: "source"
//! gpims_scope: "code"
//! gpims_description: "Elapsed-time wire encoding for channel readings."
//! gpims_version: "v0.1.0"
//! gpims_owner: "tbd"
//! ---
//! Elapsed times travel as `[d.]hh:mm:ss[.fffffff]` strings, the layout the
//! collection server parses for step and total time.
use std::fmt::Write as _;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

/// `serde_with` adapter encoding a [`Duration`] as a time-span string.
pub struct TimeSpan;

impl SerializeAs<Duration> for TimeSpan {
    fn serialize_as<S>(source: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_timespan(*source))
    }
}

impl<'de> DeserializeAs<'de, Duration> for TimeSpan {
    fn deserialize_as<D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_timespan(&raw).ok_or_else(|| D::Error::custom(format!("invalid time span '{raw}'")))
    }
}

/// Render `duration`, truncated to 100ns ticks.
pub fn format_timespan(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut out = String::with_capacity(16);
    if days > 0 {
        let _ = write!(out, "{days}.");
    }
    let _ = write!(out, "{hours:02}:{minutes:02}:{seconds:02}");
    // Seven fractional digits, i.e. 100ns ticks.
    let ticks = duration.subsec_nanos() / 100;
    if ticks > 0 {
        let _ = write!(out, ".{ticks:07}");
    }
    out
}

/// Inverse of [`format_timespan`]; `None` for malformed or out-of-range text.
pub fn parse_timespan(raw: &str) -> Option<Duration> {
    if !raw.contains(':') {
        return None;
    }
    let mut parts = raw.rsplitn(2, '.');
    let last = parts.next()?;
    let (clock, fraction) = match parts.next() {
        // A dot after the final colon marks a fractional second.
        Some(head) if !last.contains(':') && head.contains(':') => (head, Some(last)),
        _ => (raw, None),
    };

    let (days, clock) = match clock.split_once('.') {
        Some((days, rest)) => (days.parse::<u64>().ok()?, rest),
        None => (0, clock),
    };

    let mut fields = clock.split(':');
    let hours = fields.next()?.parse::<u64>().ok()?;
    let minutes = fields.next()?.parse::<u64>().ok()?;
    let seconds = fields.next()?.parse::<u64>().ok()?;
    if fields.next().is_some() || hours >= 24 || minutes >= 60 || seconds >= 60 {
        return None;
    }

    let nanos = match fraction {
        Some(digits) if !digits.is_empty() && digits.len() <= 7 => {
            let padded = format!("{digits:0<7}");
            padded.parse::<u32>().ok()? * 100
        }
        Some(_) => return None,
        None => 0,
    };

    let secs = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + seconds)?;
    Some(Duration::new(secs, nanos))
}
