//! Daily digest: at a fixed local time, run each configured task and deliver one
//! combined message.

use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone};
use std::sync::Arc;

use crate::agent::{Agent, AgentState};
use crate::config::{DigestConfig, DigestTaskMode};
use crate::dispatch::{DeliveryTarget, Dispatcher};
use crate::responder::{Responder, RETRIEVAL_APOLOGY};
use crate::tools::ToolRegistry;

pub const NOTHING_TO_REPORT: &str = "Nothing to report today.";

#[derive(Debug, thiserror::Error)]
pub enum DigestTaskError {
    #[error("task {0:?} timed out")]
    TimedOut(String),
    #[error("task {0:?} failed: {1}")]
    Failed(String, String),
}

pub struct DigestTask {
    pub title: String,
    pub prompt: String,
    pub mode: DigestTaskMode,
    /// Tools bound for agent tasks.
    pub tools: ToolRegistry,
}

pub struct DigestScheduler {
    at: NaiveTime,
    tasks: Vec<DigestTask>,
    agent: Arc<Agent>,
    responder: Arc<Responder>,
    dispatcher: Arc<Dispatcher>,
    targets: Vec<DeliveryTarget>,
    agent_timeout: std::time::Duration,
}

/// The first instant strictly after `now` whose local wall-clock time is `at`. When `at`
/// falls in a DST gap that day, the hour after it is used.
pub fn next_fire<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        let naive = date.and_time(at);
        let resolved = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest());
        if let Some(t) = resolved {
            if t > *now {
                return t;
            }
        }
        date += Duration::days(1);
    }
}

/// Heading plus `title\ncontent` sections; a fixed line when there are none.
pub fn compose_digest(date: NaiveDate, sections: &[(String, String)]) -> String {
    let heading = format!("🗓️ Daily digest for {}", date.format("%A, %B %-d, %Y"));
    if sections.is_empty() {
        return format!("{}\n\n{}", heading, NOTHING_TO_REPORT);
    }
    let body: Vec<String> = sections
        .iter()
        .map(|(title, content)| format!("{}\n{}", title, content))
        .collect();
    format!("{}\n\n{}", heading, body.join("\n\n"))
}

impl DigestScheduler {
    pub fn new(
        at: NaiveTime,
        tasks: Vec<DigestTask>,
        agent: Arc<Agent>,
        responder: Arc<Responder>,
        dispatcher: Arc<Dispatcher>,
        targets: Vec<DeliveryTarget>,
        agent_timeout: std::time::Duration,
    ) -> Self {
        Self {
            at,
            tasks,
            agent,
            responder,
            dispatcher,
            targets,
            agent_timeout,
        }
    }

    /// Tasks from config with their tools picked out of `registry`.
    pub fn from_config(
        cfg: &DigestConfig,
        registry: &ToolRegistry,
        agent: Arc<Agent>,
        responder: Arc<Responder>,
        dispatcher: Arc<Dispatcher>,
        targets: Vec<DeliveryTarget>,
        agent_timeout: std::time::Duration,
    ) -> Result<Self> {
        let tasks = cfg
            .tasks
            .iter()
            .map(|t| DigestTask {
                title: t.title.clone(),
                prompt: t.prompt.clone(),
                mode: t.mode,
                tools: registry.subset(&t.tools),
            })
            .collect();
        Ok(Self::new(
            cfg.fire_time()?,
            tasks,
            agent,
            responder,
            dispatcher,
            targets,
            agent_timeout,
        ))
    }

    pub fn fire_time(&self) -> NaiveTime {
        self.at
    }

    async fn run_task(&self, task: &DigestTask) -> Result<String, DigestTaskError> {
        match task.mode {
            DigestTaskMode::Agent => {
                let outcome = self
                    .agent
                    .run_traced(&task.prompt, &task.tools, self.agent_timeout)
                    .await;
                match outcome.state {
                    AgentState::TimedOut => Err(DigestTaskError::TimedOut(task.title.clone())),
                    AgentState::Done => Ok(outcome.text),
                    _ => Err(DigestTaskError::Failed(task.title.clone(), outcome.text)),
                }
            }
            DigestTaskMode::Responder => {
                let text = self.responder.respond(&task.prompt).await;
                if text == RETRIEVAL_APOLOGY {
                    Err(DigestTaskError::Failed(
                        task.title.clone(),
                        "context unavailable".to_string(),
                    ))
                } else {
                    Ok(text)
                }
            }
        }
    }

    /// Run every task in order. Failed and empty sections are left out.
    pub async fn compose(&self, date: NaiveDate) -> String {
        let mut sections = Vec::new();
        for task in &self.tasks {
            match self.run_task(task).await {
                Ok(text) if text.trim().is_empty() => {
                    log::info!("digest: {} has nothing to report", task.title)
                }
                Ok(text) => sections.push((task.title.clone(), text.trim().to_string())),
                Err(e) => log::warn!("digest: {}", e),
            }
        }
        compose_digest(date, &sections)
    }

    /// Compose today's digest and deliver it. Delivery failures are logged only.
    pub async fn run_once(&self) -> String {
        let text = self.compose(Local::now().date_naive()).await;
        if let Err(e) = self.dispatcher.deliver(&text, &self.targets).await {
            log::error!("digest: delivery failed: {}", e);
        }
        text
    }

    pub async fn run_forever(self: Arc<Self>) {
        loop {
            let now = Local::now();
            let next = next_fire(&now, self.at);
            let wait = (next - now).to_std().unwrap_or_default();
            log::info!("digest: next run at {}", next.format("%Y-%m-%d %H:%M %:z"));
            tokio::time::sleep(wait).await;
            log::info!("digest: running {} tasks", self.tasks.len());
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn next_fire_same_day_or_next() {
        let tz = FixedOffset::west_opt(7 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap();
        assert_eq!(
            next_fire(&now, t(9, 30)),
            tz.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap()
        );
        let now = tz.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap();
        assert_eq!(
            next_fire(&now, t(9, 30)),
            tz.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
        );
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 0).unwrap();
        assert_eq!(
            next_fire(&now, t(0, 0)),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn compose_sections_and_empty_day() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(
            compose_digest(date, &[]),
            "🗓️ Daily digest for Saturday, October 17, 2026\n\nNothing to report today."
        );
        let out = compose_digest(
            date,
            &[
                ("📅 Calendar".to_string(), "- 09:00-09:15 Standup".to_string()),
                ("📰 Newsletters".to_string(), "Markets up".to_string()),
            ],
        );
        assert_eq!(
            out,
            "🗓️ Daily digest for Saturday, October 17, 2026\n\n📅 Calendar\n- 09:00-09:15 Standup\n\n📰 Newsletters\nMarkets up"
        );
    }
}
