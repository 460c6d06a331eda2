//! Gmail v1: search, read and mark messages as read.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{check, GoogleAuth, GoogleError};

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// A fetched message reduced to what the newsletter tool needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub date: String,
    /// Plain text; HTML bodies are converted.
    pub body: String,
}

#[async_trait]
pub trait MailBackend: Send + Sync {
    /// Message ids matching a Gmail search query.
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<String>, GoogleError>;

    async fn get_message(&self, id: &str) -> Result<MailMessage, GoogleError>;

    /// Remove the UNREAD label.
    async fn mark_read(&self, id: &str) -> Result<(), GoogleError>;
}

pub struct Gmail {
    auth: Arc<GoogleAuth>,
    client: reqwest::Client,
    base_url: String,
}

impl Gmail {
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

    fn url(&self, path: &str) -> String {
        format!("{}/users/me{}", self.base_url, path)
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    payload: Part,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    data: Option<String>,
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn find_part<'a>(part: &'a Part, mime: &str) -> Option<&'a Part> {
    if part.mime_type.eq_ignore_ascii_case(mime) && part.body.data.is_some() {
        return Some(part);
    }
    part.parts.iter().find_map(|p| find_part(p, mime))
}

/// HTML wins over plain text when a message carries both.
fn extract_body(payload: &Part) -> String {
    if let Some(html) = find_part(payload, "text/html")
        .and_then(|p| p.body.data.as_deref())
        .and_then(decode_body)
    {
        return html_to_text(&html);
    }
    find_part(payload, "text/plain")
        .and_then(|p| p.body.data.as_deref())
        .and_then(decode_body)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn parse_message(m: ApiMessage) -> MailMessage {
    let header = |name: &str| {
        m.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };
    MailMessage {
        from: header("From"),
        subject: header("Subject"),
        date: header("Date"),
        body: extract_body(&m.payload),
        id: m.id,
    }
}

/// Newsletter HTML as markdown-ish text: entities decoded, hidden blocks dropped, runs of
/// blank lines collapsed. Falls back to the raw HTML when the converter fails.
pub fn html_to_text(html: &str) -> String {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["head", "script", "style", "noscript", "img"])
        .build();
    let converted = match converter.convert(html) {
        Ok(md) => md,
        Err(e) => {
            log::warn!("gmail: html conversion failed: {}", e);
            html.to_string()
        }
    };
    let mut out: Vec<&str> = Vec::new();
    for line in converted.lines().map(str::trim) {
        if line.is_empty() && out.last().is_some_and(|l| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}

#[async_trait]
impl MailBackend for Gmail {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<String>, GoogleError> {
        let token = self.auth.access_token().await?;
        let res = self
            .client
            .get(self.url("/messages"))
            .bearer_auth(token)
            .query(&[("q", query.to_string()), ("maxResults", max_results.to_string())])
            .send()
            .await?;
        let list: ListResponse = check(res).await?.json().await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, GoogleError> {
        let token = self.auth.access_token().await?;
        let res = self
            .client
            .get(self.url(&format!("/messages/{}", id)))
            .bearer_auth(token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let m: ApiMessage = check(res).await?.json().await?;
        Ok(parse_message(m))
    }

    async fn mark_read(&self, id: &str) -> Result<(), GoogleError> {
        let token = self.auth.access_token().await?;
        let res = self
            .client
            .post(self.url(&format!("/messages/{}/modify", id)))
            .bearer_auth(token)
            .json(&json!({ "removeLabelIds": ["UNREAD"] }))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }
}
