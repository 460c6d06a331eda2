//! Calendar tools: read a day's events, create an event.

use async_trait::async_trait;
use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone,
};
use serde_json::json;
use std::sync::Arc;

use super::{str_arg, Tool, ToolError};
use crate::google::{CalendarBackend, CalendarEvent, EventTime, NewEvent};

const MAX_EVENTS: u32 = 25;
const MAX_DAYS: i64 = 14;

/// Midnight of `date` in the local zone as a fixed-offset instant.
fn local_midnight(date: NaiveDate) -> DateTime<FixedOffset> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    local_instant(naive).unwrap_or_else(|| naive.and_utc().fixed_offset())
}

/// A wall-clock time in the local zone. In a DST gap there is no such instant.
fn local_instant(naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// RFC 3339, or `YYYY-MM-DDTHH:MM[:SS]` (also with a space) read as local time.
pub(crate) fn parse_datetime(field: &str, s: &str) -> Result<DateTime<FixedOffset>, ToolError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .ok_or_else(|| {
            ToolError::validation(
                field,
                format!("{:?} is not RFC 3339 or YYYY-MM-DDTHH:MM", s),
            )
        })?;
    local_instant(naive)
        .ok_or_else(|| ToolError::validation(field, format!("{} does not exist in local time", s)))
}

fn format_event(e: &CalendarEvent, with_date: bool) -> String {
    let mut line = String::from("- ");
    if with_date {
        line.push_str(&e.start.sort_key().0.format("%a %b %-d ").to_string());
    }
    match (e.start, e.end) {
        (EventTime::At(s), EventTime::At(end)) => {
            line.push_str(&format!("{}-{}", s.format("%H:%M"), end.format("%H:%M")))
        }
        (EventTime::At(s), _) => line.push_str(&s.format("%H:%M").to_string()),
        (EventTime::AllDay(_), _) => line.push_str("all day"),
    }
    line.push(' ');
    line.push_str(&e.summary);
    if let Some(ref loc) = e.location {
        line.push_str(" @ ");
        line.push_str(loc);
    }
    if let Some(ref desc) = e.description {
        line.push_str(": ");
        line.push_str(&desc.replace('\n', " "));
    }
    line
}

pub struct ReadCalendarEventsTool {
    backend: Arc<dyn CalendarBackend>,
    default_calendar: String,
}

impl ReadCalendarEventsTool {
    pub fn new(backend: Arc<dyn CalendarBackend>, default_calendar: impl Into<String>) -> Self {
        Self {
            backend,
            default_calendar: default_calendar.into(),
        }
    }
}

#[async_trait]
impl Tool for ReadCalendarEventsTool {
    fn name(&self) -> &str {
        "read_calendar_events"
    }

    fn description(&self) -> &str {
        "Read events from the user's Google Calendar for a day (default today), ordered by start time."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "calendar_id": { "type": "string", "description": "Calendar id; defaults to the primary calendar" },
                "date": { "type": "string", "description": "First day to read, YYYY-MM-DD; defaults to today" },
                "days": { "type": "integer", "description": "Number of days to read (1-14, default 1)" }
            }
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let calendar = str_arg(&args, "calendar_id").unwrap_or_else(|| self.default_calendar.clone());
        let date = match str_arg(&args, "date") {
            Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .map_err(|_| ToolError::validation("date", format!("{:?} is not YYYY-MM-DD", d)))?,
            None => Local::now().date_naive(),
        };
        let days = match args.get("days") {
            None | Some(serde_json::Value::Null) => 1,
            Some(v) => v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .filter(|d| (1..=MAX_DAYS).contains(d))
                .ok_or_else(|| ToolError::validation("days", "must be an integer from 1 to 14"))?,
        };

        let from = local_midnight(date);
        let to = local_midnight(date + Duration::days(days));
        let mut events = self.backend.list_events(&calendar, from, to, MAX_EVENTS).await?;
        events.sort_by_key(|e| e.start.sort_key());
        log::debug!("tools: read {} events from {}", events.len(), calendar);

        if events.is_empty() {
            return Ok(format!("No events on {}.", date.format("%Y-%m-%d")));
        }
        let lines: Vec<String> = events.iter().map(|e| format_event(e, days > 1)).collect();
        Ok(lines.join("\n"))
    }
}

pub struct CreateCalendarEventTool {
    backend: Arc<dyn CalendarBackend>,
    default_calendar: String,
}

impl CreateCalendarEventTool {
    pub fn new(backend: Arc<dyn CalendarBackend>, default_calendar: impl Into<String>) -> Self {
        Self {
            backend,
            default_calendar: default_calendar.into(),
        }
    }
}

#[async_trait]
impl Tool for CreateCalendarEventTool {
    fn name(&self) -> &str {
        "create_calendar_event"
    }

    fn description(&self) -> &str {
        "Create an event on the user's Google Calendar. Times are local unless they carry an offset."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["summary", "start_datetime"],
            "properties": {
                "calendar_id": { "type": "string", "description": "Calendar id; defaults to the primary calendar" },
                "summary": { "type": "string", "description": "Event title" },
                "start_datetime": { "type": "string", "description": "Start, YYYY-MM-DDTHH:MM or RFC 3339" },
                "end_datetime": { "type": "string", "description": "End, same format; defaults to one hour after start" },
                "location": { "type": "string" },
                "description": { "type": "string" }
            }
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let summary =
            str_arg(&args, "summary").ok_or_else(|| ToolError::validation("summary", "is required"))?;
        let start_raw = str_arg(&args, "start_datetime")
            .ok_or_else(|| ToolError::validation("start_datetime", "is required"))?;
        let start = parse_datetime("start_datetime", &start_raw)?;
        let end = match str_arg(&args, "end_datetime") {
            Some(raw) => parse_datetime("end_datetime", &raw)?,
            None => start + Duration::hours(1),
        };
        if end <= start {
            return Err(ToolError::validation("end_datetime", "must be after start_datetime"));
        }

        let calendar = str_arg(&args, "calendar_id").unwrap_or_else(|| self.default_calendar.clone());
        let event = NewEvent {
            summary,
            start,
            end,
            location: str_arg(&args, "location"),
            description: str_arg(&args, "description"),
        };
        let created = self.backend.insert_event(&calendar, &event).await?;
        log::info!("tools: created calendar event {}", created.id);
        Ok(format!(
            "Created \"{}\" on {} from {} to {}{}.",
            created.summary,
            start.format("%a %b %-d"),
            start.format("%H:%M"),
            end.format("%H:%M"),
            created
                .location
                .as_deref()
                .map(|l| format!(" at {}", l))
                .unwrap_or_default()
        ))
    }
}
