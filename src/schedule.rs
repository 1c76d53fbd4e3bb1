//! Target date selection
//!
//! The dashboard prints dates as `day.MM` (day without leading zero,
//! two-digit month), e.g. `5.11` or `21.03`.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScheduleConfig;

/// Which day to look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TargetDay {
    Today,
    Tomorrow,
    /// Today before the switch hour, tomorrow afterwards
    #[default]
    Auto,
}

/// Format a date the way the dashboard prints it
pub fn format_date_label(date: NaiveDate) -> String {
    format!("{}.{:02}", date.day(), date.month())
}

/// Current time at a fixed UTC offset; out-of-range offsets mean UTC
pub fn local_now(utc_offset_minutes: i32) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset)
}

/// Resolve the target date for a given local time
pub fn target_date(now: DateTime<FixedOffset>, which: TargetDay, switch_hour: u32) -> NaiveDate {
    let today = now.date_naive();
    let tomorrow = today + Duration::days(1);
    match which {
        TargetDay::Today => today,
        TargetDay::Tomorrow => tomorrow,
        TargetDay::Auto if now.hour() < switch_hour => today,
        TargetDay::Auto => tomorrow,
    }
}

/// Date label to search for and whether it is the local today
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: String,
    pub is_today: bool,
}

/// Resolve the target for a given local time
pub fn target_at(now: DateTime<FixedOffset>, which: TargetDay, switch_hour: u32) -> Target {
    let date = target_date(now, which, switch_hour);
    Target {
        label: format_date_label(date),
        is_today: date == now.date_naive(),
    }
}

/// Resolve the target for the current time
pub fn current_target(which: TargetDay, schedule: &ScheduleConfig) -> Target {
    target_at(local_now(schedule.utc_offset_minutes), which, schedule.switch_hour)
}
