//! Newsletter tool: today's mail from the configured senders, marked read as it is read.

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::json;
use std::sync::Arc;

use super::{Tool, ToolError};
use crate::google::{MailBackend, MailMessage};

/// Newsletters are long; the model only needs the gist.
const BODY_LIMIT: usize = 6000;

pub struct FetchNewslettersTool {
    mail: Arc<dyn MailBackend>,
    addresses: Vec<String>,
    max_per_sender: u32,
}

impl FetchNewslettersTool {
    pub fn new(mail: Arc<dyn MailBackend>, addresses: Vec<String>, max_per_sender: u32) -> Self {
        Self {
            mail,
            addresses,
            max_per_sender: max_per_sender.max(1),
        }
    }
}

/// Gmail search for one sender's mail since the start of `day`.
pub(crate) fn newsletter_query(address: &str, day: NaiveDate) -> String {
    format!("from:{} after:{}", address, day.format("%Y/%m/%d"))
}

fn format_message(m: &MailMessage) -> String {
    let body: String = m.body.chars().take(BODY_LIMIT).collect();
    format!(
        "From: {}\nSubject: {}\nDate: {}\nContent: {}",
        m.from, m.subject, m.date, body
    )
}

fn addresses_arg(args: &serde_json::Value) -> Option<Vec<String>> {
    let list: Vec<String> = match args.get("addresses")? {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .collect(),
        serde_json::Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => return None,
    };
    let list: Vec<String> = list.into_iter().filter(|s| !s.is_empty()).collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

#[async_trait]
impl Tool for FetchNewslettersTool {
    fn name(&self) -> &str {
        "fetch_newsletters"
    }

    fn description(&self) -> &str {
        "Fetch today's newsletter emails from the configured senders as text and mark them as read."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "addresses": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Sender addresses; defaults to the configured newsletters"
                }
            }
        })
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let addresses = addresses_arg(&args).unwrap_or_else(|| self.addresses.clone());
        if addresses.is_empty() {
            return Err(ToolError::validation(
                "addresses",
                "no newsletter addresses configured",
            ));
        }

        let today = Local::now().date_naive();
        let mut sections = Vec::new();
        let mut failures = Vec::new();
        for address in &addresses {
            let ids = match self
                .mail
                .search(&newsletter_query(address, today), self.max_per_sender)
                .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    log::warn!("tools: newsletter search for {} failed: {}", address, e);
                    failures.push(format!("{}: {}", address, e));
                    continue;
                }
            };
            for id in ids {
                let message = match self.mail.get_message(&id).await {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("tools: reading message {} failed: {}", id, e);
                        failures.push(format!("{}: {}", address, e));
                        continue;
                    }
                };
                sections.push(format_message(&message));
                // Marked as soon as it is read, before any summary exists.
                if let Err(e) = self.mail.mark_read(&id).await {
                    log::warn!("tools: marking message {} read failed: {}", id, e);
                } else {
                    log::info!("tools: newsletter {} marked as read", id);
                }
            }
        }

        if sections.is_empty() {
            if failures.len() == addresses.len() {
                return Err(ToolError::Backend(failures.join("; ")));
            }
            return Ok("No newsletters found for today.".to_string());
        }
        Ok(sections.join("\n\n---\n\n"))
    }
}
