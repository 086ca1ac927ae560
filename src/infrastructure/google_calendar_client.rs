use crate::domain::models::{BusyInterval, CalendarEvent};
use crate::infrastructure::error::PlannerError;
use crate::infrastructure::event_mapper::{day_window, map_event_for_day, GoogleCalendarEvent};
use crate::infrastructure::oauth_client::AccessTokenSource;
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use reqwest::Client;
use std::sync::Arc;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

#[async_trait]
pub trait BusyIntervalSource: Send + Sync {
    async fn list_events_for_date(&self, date: NaiveDate)
    -> Result<Vec<CalendarEvent>, PlannerError>;

    async fn list_busy_intervals_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<BusyInterval>, PlannerError> {
        Ok(self
            .list_events_for_date(date)
            .await?
            .iter()
            .map(CalendarEvent::busy_interval)
            .collect())
    }
}

pub struct GoogleCalendarClient {
    client: Client,
    calendar_id: String,
    timezone: Tz,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

impl GoogleCalendarClient {
    pub fn new(
        calendar_id: impl Into<String>,
        timezone: Tz,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            client: Client::new(),
            calendar_id: calendar_id.into(),
            timezone,
            tokens,
        }
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> PlannerError {
        let message = if body.trim().is_empty() {
            format!("google calendar api error: http {}", status.as_u16())
        } else {
            format!("google calendar api error: http {}; body={body}", status.as_u16())
        };
        PlannerError::CollaboratorUnavailable(message)
    }

    fn events_endpoint(calendar_id: &str) -> Result<Url, PlannerError> {
        let mut url = Url::parse(CALENDAR_API_BASE).map_err(|error| {
            PlannerError::InvalidConfig(format!("invalid calendar api base url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                PlannerError::InvalidConfig("calendar api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
        }
        Ok(url)
    }

    async fn list_raw_events(&self, date: NaiveDate) -> Result<Vec<GoogleCalendarEvent>, PlannerError> {
        if self.calendar_id.trim().is_empty() {
            return Err(PlannerError::InvalidConfig(
                "calendar.calendarId must not be empty".to_string(),
            ));
        }
        let access_token = self.tokens.require_access_token().await?;
        let endpoint = Self::events_endpoint(&self.calendar_id)?;
        let (time_min, time_max) = day_window(date, self.timezone);
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut request = self
                .client
                .get(endpoint.clone())
                .bearer_auth(&access_token)
                .query(&[
                    ("singleEvents", "true".to_string()),
                    ("orderBy", "startTime".to_string()),
                    ("maxResults", "250".to_string()),
                    ("timeMin", time_min.to_rfc3339()),
                    ("timeMax", time_max.to_rfc3339()),
                    ("timeZone", self.timezone.name().to_string()),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                request = request.query(&[("pageToken", page_token)]);
            }

            let response = request.send().await.map_err(|error| {
                PlannerError::CollaboratorUnavailable(format!(
                    "network error while listing calendar events: {error}"
                ))
            })?;
            let status = response.status();
            let body = response.text().await.map_err(|error| {
                PlannerError::CollaboratorUnavailable(format!(
                    "network error while reading events list response: {error}"
                ))
            })?;
            if !status.is_success() {
                return Err(Self::http_error(status, &body));
            }

            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                PlannerError::CollaboratorUnavailable(format!(
                    "invalid events list payload: {error}; body={body}"
                ))
            })?;
            events.extend(parsed.items.take().unwrap_or_default());

            match parsed.next_page_token.take() {
                Some(next_page_token) => page_token = Some(next_page_token),
                None => break,
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl BusyIntervalSource for GoogleCalendarClient {
    async fn list_events_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, PlannerError> {
        let mut mapped = Vec::new();
        for event in self.list_raw_events(date).await? {
            if let Some(visible) = map_event_for_day(&event, date, self.timezone)? {
                mapped.push(visible);
            }
        }
        mapped.sort_by_key(|event| (event.start_minutes, event.end_minutes));
        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEvents(Vec<CalendarEvent>);

    #[async_trait]
    impl BusyIntervalSource for FixedEvents {
        async fn list_events_for_date(
            &self,
            _date: NaiveDate,
        ) -> Result<Vec<CalendarEvent>, PlannerError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn events_endpoint_escapes_calendar_id() {
        let url = GoogleCalendarClient::events_endpoint("team@group.calendar.google.com")
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@group.calendar.google.com/events"
        );
        let spaced = GoogleCalendarClient::events_endpoint("a b").expect("endpoint");
        assert!(spaced.as_str().ends_with("/calendars/a%20b/events"));
    }

    #[tokio::test]
    async fn busy_intervals_are_derived_from_events() {
        let source = FixedEvents(vec![CalendarEvent {
            id: "evt-1".to_string(),
            title: "Standup".to_string(),
            start_minutes: 540,
            end_minutes: 570,
        }]);
        let busy = source
            .list_busy_intervals_for_date(NaiveDate::from_ymd_opt(2026, 2, 16).expect("date"))
            .await
            .expect("busy intervals");
        assert_eq!(
            busy,
            vec![BusyInterval {
                start_minutes: 540,
                end_minutes: 570
            }]
        );
    }
}
