use crate::domain::models::CalendarEvent;
use crate::domain::schedule::{DAY_END_MINUTES, DAY_START_MINUTES, MINUTES_PER_DAY};
use crate::infrastructure::error::PlannerError;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

const UNTITLED_EVENT: &str = "(No title)";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct GoogleEventTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// Present instead of `dateTime` on all-day events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub start: GoogleEventTime,
    #[serde(default)]
    pub end: GoogleEventTime,
}

/// Projects a Google event onto the visible part of `date` in `timezone`.
/// All-day, cancelled and fully off-screen events map to `None`.
pub fn map_event_for_day(
    event: &GoogleCalendarEvent,
    date: NaiveDate,
    timezone: Tz,
) -> Result<Option<CalendarEvent>, PlannerError> {
    if event.start.date.is_some() || event.end.date.is_some() {
        return Ok(None);
    }
    let is_cancelled = event
        .status
        .as_deref()
        .is_some_and(|status| status.eq_ignore_ascii_case("cancelled"));
    if is_cancelled {
        return Ok(None);
    }
    let (Some(start_raw), Some(end_raw)) =
        (event.start.date_time.as_deref(), event.end.date_time.as_deref())
    else {
        return Ok(None);
    };

    let start = minutes_on_day(parse_rfc3339_utc(start_raw, "start.dateTime")?, date, timezone);
    let end = minutes_on_day(parse_rfc3339_utc(end_raw, "end.dateTime")?, date, timezone);
    if end <= DAY_START_MINUTES || start >= DAY_END_MINUTES || end <= start {
        return Ok(None);
    }

    let title = event
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNTITLED_EVENT)
        .to_string();

    Ok(Some(CalendarEvent {
        id: event.id.clone().unwrap_or_default(),
        title,
        start_minutes: start.max(DAY_START_MINUTES),
        end_minutes: end.min(DAY_END_MINUTES),
    }))
}

pub fn day_window(date: NaiveDate, timezone: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(date, timezone);
    let end = date
        .succ_opt()
        .map(|next| local_midnight(next, timezone))
        .unwrap_or(start + chrono::Duration::days(1));
    (start, end)
}

fn local_midnight(date: NaiveDate, timezone: Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    // A DST jump can skip midnight; the day then starts an hour later.
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            timezone
                .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
        })
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

fn minutes_on_day(instant: DateTime<Utc>, date: NaiveDate, timezone: Tz) -> u32 {
    let local = instant.with_timezone(&timezone);
    match local.date_naive().cmp(&date) {
        std::cmp::Ordering::Less => 0,
        std::cmp::Ordering::Greater => MINUTES_PER_DAY,
        std::cmp::Ordering::Equal => local.hour() * 60 + local.minute(),
    }
}

fn parse_rfc3339_utc(value: &str, field: &str) -> Result<DateTime<Utc>, PlannerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            PlannerError::CollaboratorUnavailable(format!("invalid calendar event {field}: {error}"))
        })
}
