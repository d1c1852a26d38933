//! Quiet Hours
//!
//! Time-of-day windows, optionally restricted to weekdays, during which
//! non-critical checks are suppressed. A window whose end is earlier than
//! its start wraps midnight and belongs to the weekday it starts on.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: u32 = 24 * 60;
const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;

/// Largest offset a real timezone uses (UTC+14)
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// `HH:MM` serde format for window boundaries
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

/// A single quiet window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    /// Days the window starts on; empty means every day
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
}

impl QuietWindow {
    /// Window active every day between `start` and `end`
    pub fn daily(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start,
            end,
            weekdays: Vec::new(),
        }
    }

    /// Restrict the window to the given starting weekdays
    pub fn on(mut self, weekdays: &[Weekday]) -> Self {
        self.weekdays = weekdays.to_vec();
        self
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// A window that starts and ends at the same minute covers nothing
    pub fn is_empty(&self) -> bool {
        minute_of_day(self.start) == minute_of_day(self.end)
    }

    fn starts_on(&self, day: Weekday) -> bool {
        self.weekdays.is_empty() || self.weekdays.contains(&day)
    }

    /// Check whether a local weekday/time falls inside the window
    pub fn contains(&self, day: Weekday, time: NaiveTime) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.wraps_midnight() {
            (self.starts_on(day) && time >= self.start)
                || (self.starts_on(day.pred()) && time < self.end)
        } else {
            self.starts_on(day) && time >= self.start && time < self.end
        }
    }

    /// Half-open minute-of-week ranges covered by this window.
    /// Ranges that run past Sunday midnight are split at the week boundary.
    fn week_segments(&self) -> Vec<(u32, u32)> {
        if self.is_empty() {
            return Vec::new();
        }

        let start = minute_of_day(self.start);
        let end = minute_of_day(self.end);
        let length = if self.wraps_midnight() {
            MINUTES_PER_DAY - start + end
        } else {
            end - start
        };

        let mut days: Vec<u32> = if self.weekdays.is_empty() {
            (0..7).collect()
        } else {
            self.weekdays.iter().map(|d| d.num_days_from_monday()).collect()
        };
        days.sort_unstable();
        days.dedup();

        let mut segments = Vec::with_capacity(days.len() + 1);
        for day in days {
            let seg_start = day * MINUTES_PER_DAY + start;
            let seg_end = seg_start + length;
            if seg_end > MINUTES_PER_WEEK {
                segments.push((seg_start, MINUTES_PER_WEEK));
                segments.push((0, seg_end - MINUTES_PER_WEEK));
            } else {
                segments.push((seg_start, seg_end));
            }
        }
        segments
    }

    /// Check whether two windows share any minute of the week
    pub fn overlaps(&self, other: &QuietWindow) -> bool {
        let ours = self.week_segments();
        let theirs = other.week_segments();
        ours.iter()
            .any(|a| theirs.iter().any(|b| a.0 < b.1 && b.0 < a.1))
    }
}

/// Quiet-hours policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Fixed offset used to read the local time of day
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// When set, an idle agent is not held back by quiet hours
    #[serde(default)]
    pub idle_override: bool,
    #[serde(default)]
    pub windows: Vec<QuietWindow>,
}

impl QuietHours {
    /// Policy with a single nightly window
    pub fn nightly(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            windows: vec![QuietWindow::daily(start, end)],
            ..Default::default()
        }
    }

    /// Check whether `now` falls inside any window
    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        if self.windows.is_empty() {
            return false;
        }
        let Some(offset) = FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)) else {
            return false;
        };
        let local = now.with_timezone(&offset);
        let (day, time) = (local.weekday(), local.time());
        self.windows.iter().any(|w| w.contains(day, time))
    }

    /// Index pairs of windows that overlap each other
    pub fn overlapping_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, a) in self.windows.iter().enumerate() {
            for (j, b) in self.windows.iter().enumerate().skip(i + 1) {
                if a.overlaps(b) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}
