//! Google Calendar v3: list a day's events and insert new ones.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{check, GoogleAuth, GoogleError};

const BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
const DESCRIPTION_LIMIT: usize = 150;

/// Start or end of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    At(DateTime<FixedOffset>),
    AllDay(NaiveDate),
}

impl EventTime {
    /// Sort key: all-day events sort at the start of their day.
    pub fn sort_key(&self) -> (NaiveDate, Option<chrono::NaiveTime>) {
        match self {
            EventTime::At(dt) => (dt.date_naive(), Some(dt.time())),
            EventTime::AllDay(d) => (*d, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub location: Option<String>,
    /// At most 150 characters.
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
}

/// A timed event to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub summary: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub location: Option<String>,
    pub description: Option<String>,
}

#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Single (expanded) events overlapping `[from, to)`, ordered by start time.
    async fn list_events(
        &self,
        calendar_id: &str,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, GoogleError>;

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CalendarEvent, GoogleError>;
}

pub struct GoogleCalendar {
    auth: Arc<GoogleAuth>,
    client: reqwest::Client,
    base_url: String,
}

impl GoogleCalendar {
    pub fn new(auth: Arc<GoogleAuth>) -> Self {
        Self {
            auth,
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// `{base}/calendars/{id}/events` with the calendar id path-encoded.
    fn events_url(&self, calendar_id: &str) -> Result<reqwest::Url, GoogleError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| GoogleError::Api(format!("invalid calendar base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GoogleError::Api("calendar base url cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(["calendars", calendar_id, "events"]);
        Ok(url)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<ApiEventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<ApiEventTime>,
}

#[derive(Debug, Deserialize)]
struct ApiEventList {
    #[serde(default)]
    items: Vec<ApiEvent>,
}

fn parse_time(t: &ApiEventTime) -> Option<EventTime> {
    if let Some(ref dt) = t.date_time {
        return DateTime::parse_from_rfc3339(dt).ok().map(EventTime::At);
    }
    t.date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(EventTime::AllDay)
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Events without a parsable start are dropped; a missing end falls back to the start.
fn from_api(e: ApiEvent) -> Option<CalendarEvent> {
    let start = e.start.as_ref().and_then(parse_time)?;
    let end = e.end.as_ref().and_then(parse_time).unwrap_or(start);
    Some(CalendarEvent {
        id: e.id,
        summary: non_blank(e.summary).unwrap_or_else(|| "(no title)".to_string()),
        location: non_blank(e.location),
        description: non_blank(e.description)
            .map(|d| d.chars().take(DESCRIPTION_LIMIT).collect()),
        start,
        end,
    })
}

fn to_api(e: &NewEvent) -> ApiEvent {
    ApiEvent {
        summary: Some(e.summary.clone()),
        location: e.location.clone(),
        description: e.description.clone(),
        start: Some(ApiEventTime {
            date_time: Some(e.start.to_rfc3339()),
            date: None,
        }),
        end: Some(ApiEventTime {
            date_time: Some(e.end.to_rfc3339()),
            date: None,
        }),
        ..Default::default()
    }
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    async fn list_events(
        &self,
        calendar_id: &str,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, GoogleError> {
        let token = self.auth.access_token().await?;
        let url = self.events_url(calendar_id)?;
        let res = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("timeMin", from.to_rfc3339()),
                ("timeMax", to.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", max_results.to_string()),
            ])
            .send()
            .await?;
        let list: ApiEventList = check(res).await?.json().await?;
        Ok(list.items.into_iter().filter_map(from_api).collect())
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CalendarEvent, GoogleError> {
        let token = self.auth.access_token().await?;
        let url = self.events_url(calendar_id)?;
        let res = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&to_api(event))
            .send()
            .await?;
        let created: ApiEvent = check(res).await?.json().await?;
        from_api(created)
            .ok_or_else(|| GoogleError::Api("created event has no start time".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_events_convert() {
        let list: ApiEventList = serde_json::from_value(json!({
            "items": [
                {
                    "id": "a",
                    "summary": "Standup",
                    "location": "Zoom",
                    "description": "x".repeat(400),
                    "start": {"dateTime": "2026-10-17T09:00:00-07:00"},
                    "end": {"dateTime": "2026-10-17T09:15:00-07:00"}
                },
                {
                    "id": "b",
                    "summary": "Offsite",
                    "start": {"date": "2026-10-17"},
                    "end": {"date": "2026-10-18"}
                },
                {"id": "c", "summary": "broken"}
            ]
        }))
        .unwrap();
        let events: Vec<_> = list.items.into_iter().filter_map(from_api).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].description.as_ref().unwrap().chars().count(), 150);
        assert_eq!(events[0].location.as_deref(), Some("Zoom"));
        assert_eq!(
            events[1].start,
            EventTime::AllDay(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap())
        );
    }

    #[test]
    fn new_event_serializes_as_timed() {
        let start = DateTime::parse_from_rfc3339("2026-10-18T12:00:00-07:00").unwrap();
        let body = serde_json::to_value(to_api(&NewEvent {
            summary: "Lunch with Sam".to_string(),
            start,
            end: start + chrono::Duration::hours(1),
            location: None,
            description: None,
        }))
        .unwrap();
        assert_eq!(body["start"]["dateTime"], "2026-10-18T12:00:00-07:00");
        assert_eq!(body["end"]["dateTime"], "2026-10-18T13:00:00-07:00");
        assert!(body.get("id").is_none());
        assert!(body.get("location").is_none());
    }

    #[test]
    fn calendar_id_is_path_encoded() {
        let cal = GoogleCalendar::new(Arc::new(GoogleAuth::new("i", "s", "r")))
            .with_base_url("http://127.0.0.1:9/calendar/v3");
        let url = cal.events_url("me@example.com").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9/calendar/v3/calendars/me@example.com/events"
        );
        let url = cal.events_url("team/cal").unwrap();
        assert!(url.as_str().ends_with("/calendars/team%2Fcal/events"));
    }
}
