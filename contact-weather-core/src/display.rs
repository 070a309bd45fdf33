//! Rendering of snapshot values for the host.

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};

use crate::model::Snapshot;

/// Time zone used to render capture times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayZone {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl DisplayZone {
    /// `None` for offsets outside +/- 24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(DisplayZone::Fixed)
    }

    pub fn utc() -> Self {
        DisplayZone::Fixed(Utc.fix())
    }
}

pub fn format_temperature(snapshot: Option<&Snapshot>) -> String {
    match snapshot.and_then(|s| s.temperature_c) {
        Some(value) => format!("{value} °C"),
        None => String::new(),
    }
}

pub fn format_captured_at(snapshot: Option<&Snapshot>, zone: DisplayZone) -> String {
    let Some(instant) = snapshot
        .and_then(|s| s.captured_at.as_ref())
        .and_then(|c| c.resolve())
    else {
        return String::new();
    };

    match zone {
        DisplayZone::Local => render(&instant.with_timezone(&Local)),
        DisplayZone::Fixed(offset) => render(&instant.with_timezone(&offset)),
    }
}

// Matches the common en-US locale rendering, e.g. "1/1/2024, 12:00:00 AM".
fn render<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    dt.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}
