//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.memex/config.json`) and then overlaid
//! with environment variables, so secrets and per-host settings can live in the
//! process environment while the rest is kept in the file.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dispatch::DeliveryTarget;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP API bind and port.
    #[serde(default)]
    pub server: ServerConfig,

    /// Messaging bridge (BlueBubbles-style) connection and sender policy.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Chat platform (Discord) delivery settings.
    #[serde(default)]
    pub chat_platform: ChatPlatformConfig,

    /// LLM endpoint and model profiles.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Context store (Chroma) and embedding settings.
    #[serde(default)]
    pub context_store: ContextStoreConfig,

    /// Responder output limits.
    #[serde(default)]
    pub responder: ResponderConfig,

    /// Tool-invocation agent limits.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Google OAuth credentials for calendar and mail tools.
    #[serde(default)]
    pub google: GoogleConfig,

    /// Newsletter sender addresses read by the fetch tool.
    #[serde(default)]
    pub newsletters: NewslettersConfig,

    /// Daily digest schedule and tasks.
    #[serde(default)]
    pub digest: DigestConfig,
}

/// HTTP API bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for the HTTP API (default 8000).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    8000
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// Bridge listener and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Start the websocket listener (ENABLE_WEBSOCKET_LISTENER).
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bridge_host")]
    pub host: String,

    #[serde(default = "default_bridge_port")]
    pub port: u16,

    /// Shared bridge password, sent as `password` on the socket and `token` on HTTP calls.
    pub token: Option<String>,

    /// Transport identifier inbound events must carry in `handle.service`.
    #[serde(default = "default_bridge_service")]
    pub service: String,

    /// Sender addresses (phone numbers / emails) allowed to talk to the assistant.
    #[serde(default)]
    pub allowed_senders: Vec<String>,

    /// Chat identifier replies are sent to; self-originated messages in this chat are processed.
    pub recipient: Option<String>,
}

fn default_bridge_host() -> String {
    "localhost".to_string()
}

fn default_bridge_port() -> u16 {
    1234
}

fn default_bridge_service() -> String {
    "iMessage".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_bridge_host(),
            port: default_bridge_port(),
            token: None,
            service: default_bridge_service(),
            allowed_senders: Vec::new(),
            recipient: None,
        }
    }
}

impl BridgeConfig {
    /// `http://host:port` for REST calls and the handshake probe.
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.host.trim(), self.port)
    }

    /// `ws://host:port` for the socket connection.
    pub fn ws_base_url(&self) -> String {
        format!("ws://{}:{}", self.host.trim(), self.port)
    }
}

/// Chat platform (Discord) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPlatformConfig {
    /// Hold a Discord session: answer messages there and deliver digests (ENABLE_DISCORD_CLIENT).
    #[serde(default)]
    pub enabled: bool,

    /// Bot token. Overridden by DISCORD_BOT_TOKEN env when set.
    pub bot_token: Option<String>,

    /// Channel to post into. Both channel and user are used when both are set.
    pub channel_id: Option<String>,

    /// User to DM.
    pub user_id: Option<String>,

    /// Readiness re-checks before a send is abandoned (default 3).
    #[serde(default = "default_ready_retries")]
    pub ready_retries: u32,

    /// Seconds between readiness re-checks (default 5).
    #[serde(default = "default_ready_backoff_secs")]
    pub ready_backoff_secs: u64,
}

fn default_ready_retries() -> u32 {
    3
}

fn default_ready_backoff_secs() -> u64 {
    5
}

impl Default for ChatPlatformConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            channel_id: None,
            user_id: None,
            ready_retries: default_ready_retries(),
            ready_backoff_secs: default_ready_backoff_secs(),
        }
    }
}

/// Which chat API the models are served from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackendKind {
    /// OpenAI-compatible `/chat/completions` (Together, LM Studio, OpenAI).
    #[default]
    Openai,
    /// Ollama `/api/chat`.
    Ollama,
}

/// One model invocation profile: model id plus sampling limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProfile {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    1024
}

/// LLM endpoint and the three profiles the pipeline uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsConfig {
    #[serde(default)]
    pub backend: LlmBackendKind,

    /// Base URL of the chat API (default Together's OpenAI-compatible endpoint).
    #[serde(default = "default_models_base_url")]
    pub base_url: String,

    /// API key. Overridden by MEMEX_LLM_API_KEY or TOGETHER_API_KEY env.
    pub api_key: Option<String>,

    /// Temperature 0; used by the classifier and the agent.
    #[serde(default = "default_deterministic_profile")]
    pub deterministic: ModelProfile,

    /// Used by the responder for the final answer.
    #[serde(default = "default_creative_profile")]
    pub creative: ModelProfile,

    /// Small model for query rewriting.
    #[serde(default = "default_fast_profile")]
    pub fast: ModelProfile,
}

fn default_models_base_url() -> String {
    "https://api.together.xyz/v1".to_string()
}

fn default_deterministic_profile() -> ModelProfile {
    ModelProfile {
        model: "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free".to_string(),
        temperature: 0.0,
        max_tokens: 1024,
    }
}

fn default_creative_profile() -> ModelProfile {
    ModelProfile {
        model: "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free".to_string(),
        temperature: 0.4,
        max_tokens: 1024,
    }
}

fn default_fast_profile() -> ModelProfile {
    ModelProfile {
        model: "Qwen/Qwen2.5-7B-Instruct-Turbo".to_string(),
        temperature: 0.0,
        max_tokens: 1024,
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackendKind::default(),
            base_url: default_models_base_url(),
            api_key: None,
            deterministic: default_deterministic_profile(),
            creative: default_creative_profile(),
            fast: default_fast_profile(),
        }
    }
}

/// Context store (Chroma server) and embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Passages per query (clamped to 5..=8).
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embeddings endpoint base; defaults to `models.baseUrl`.
    pub embedding_base_url: Option<String>,
}

fn default_store_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_collection() -> String {
    "memex".to_string()
}

fn default_top_k() -> usize {
    8
}

fn default_embedding_model() -> String {
    "BAAI/bge-large-en-v1.5".to_string()
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            collection: default_collection(),
            top_k: default_top_k(),
            embedding_model: default_embedding_model(),
            embedding_base_url: None,
        }
    }
}

impl ContextStoreConfig {
    pub fn effective_top_k(&self) -> usize {
        self.top_k.clamp(5, 8)
    }
}

/// Responder limits and guard phrases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponderConfig {
    /// Word ceiling for answers (default 200).
    #[serde(default = "default_max_words")]
    pub max_words: usize,

    /// Rewrite the query into a data-kind hint with the fast model first.
    #[serde(default = "default_true")]
    pub rewrite_query: bool,

    /// Phrases that must never reach the user.
    #[serde(default = "default_banned_phrases")]
    pub banned_phrases: Vec<String>,
}

fn default_max_words() -> usize {
    200
}

fn default_true() -> bool {
    true
}

fn default_banned_phrases() -> Vec<String> {
    ["RAG", "vector store", "querying", "the provided context"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
            rewrite_query: true,
            banned_phrases: default_banned_phrases(),
        }
    }
}

/// Agent limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Wall-clock limit for one run (default 120).
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,

    /// Tool invocations allowed per run (default 6).
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_max_tool_calls() -> usize {
    6
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_agent_timeout_secs(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

/// Google OAuth client and refresh token (offline access, calendar + gmail.modify scopes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,

    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            calendar_id: default_calendar_id(),
        }
    }
}

impl GoogleConfig {
    /// True when all three OAuth values are present.
    pub fn is_configured(&self) -> bool {
        [&self.client_id, &self.client_secret, &self.refresh_token]
            .iter()
            .all(|v| v.as_deref().map_or(false, |s| !s.trim().is_empty()))
    }
}

/// Newsletter senders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewslettersConfig {
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Messages read per sender per day (default 1).
    #[serde(default = "default_max_per_sender")]
    pub max_per_sender: u32,
}

fn default_max_per_sender() -> u32 {
    1
}

impl Default for NewslettersConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            max_per_sender: default_max_per_sender(),
        }
    }
}

/// How a digest task produces its section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DigestTaskMode {
    /// Tool-invocation agent with the task's bound tools.
    #[default]
    Agent,
    /// Retrieval-augmented responder.
    Responder,
}

/// One section of the daily digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestTaskConfig {
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub mode: DigestTaskMode,
    /// Tool names bound for agent tasks.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Daily digest schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestConfig {
    /// Run the scheduler (ENABLE_ASSISTANT).
    #[serde(default)]
    pub enabled: bool,

    /// Local fire time, `HH:MM` (default "09:30").
    #[serde(default = "default_digest_time")]
    pub time: String,

    #[serde(default = "default_digest_tasks")]
    pub tasks: Vec<DigestTaskConfig>,

    /// Delivery targets; empty means every enabled target.
    #[serde(default)]
    pub targets: Vec<DeliveryTarget>,
}

fn default_digest_time() -> String {
    "09:30".to_string()
}

fn default_digest_tasks() -> Vec<DigestTaskConfig> {
    vec![
        DigestTaskConfig {
            title: "📅 Calendar".to_string(),
            prompt: "List today's calendar events in time order as short bullet points with time, title and location. If there are no events, reply with an empty message.".to_string(),
            mode: DigestTaskMode::Agent,
            tools: vec!["read_calendar_events".to_string()],
        },
        DigestTaskConfig {
            title: "📰 Newsletters".to_string(),
            prompt: "Produce a summary for each of today's email newsletters. Title each summary with the newsletter name, subtitle it with the email subject, and extract the most important points as bullet points. Each summary should be less than 200 words, bold key words, and use emojis to indicate the topic. Do not preface your response and leave out promotional content. If there are no newsletters, reply with an empty message.".to_string(),
            mode: DigestTaskMode::Agent,
            tools: vec!["fetch_newsletters".to_string()],
        },
    ]
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time: default_digest_time(),
            tasks: default_digest_tasks(),
            targets: Vec::new(),
        }
    }
}

impl DigestConfig {
    /// Parse `time` as a local `HH:MM` (or `HH:MM:SS`).
    pub fn fire_time(&self) -> Result<NaiveTime> {
        let t = self.time.trim();
        NaiveTime::parse_from_str(t, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
            .with_context(|| format!("invalid digest time {:?} (expected HH:MM)", t))
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

impl Config {
    /// Overlay environment values using the given lookup (`std::env::var` in production).
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| env(key).and_then(non_empty);

        if let Some(v) = get("BLUEBUBBLES_HOST") {
            self.bridge.host = v;
        }
        if let Some(v) = get("BLUEBUBBLES_PORT") {
            match v.parse() {
                Ok(p) => self.bridge.port = p,
                Err(_) => log::warn!("config: ignoring invalid BLUEBUBBLES_PORT {:?}", v),
            }
        }
        if let Some(v) = get("BLUEBUBBLES_TOKEN") {
            self.bridge.token = Some(v);
        }
        if let Some(v) = get("VALID_IMESSAGE_SENDERS") {
            self.bridge.allowed_senders = split_list(&v);
        }
        if let Some(v) = get("IMESSAGE_RECIPIENT") {
            self.bridge.recipient = Some(v);
        }
        if let Some(v) = get("ENABLE_WEBSOCKET_LISTENER").and_then(|v| parse_flag(&v)) {
            self.bridge.enabled = v;
        }

        if let Some(v) = get("DISCORD_BOT_TOKEN") {
            self.chat_platform.bot_token = Some(v);
        }
        // "0" is how an unset id was spelled historically.
        if let Some(v) = get("DISCORD_CHANNEL_ID").filter(|v| v != "0") {
            self.chat_platform.channel_id = Some(v);
        }
        if let Some(v) = get("DISCORD_USER_ID").filter(|v| v != "0") {
            self.chat_platform.user_id = Some(v);
        }
        if let Some(v) = get("ENABLE_DISCORD_CLIENT").and_then(|v| parse_flag(&v)) {
            self.chat_platform.enabled = v;
        }

        if let Some(v) = get("MEMEX_LLM_API_KEY").or_else(|| get("TOGETHER_API_KEY")) {
            self.models.api_key = Some(v);
        }

        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(v);
        }
        if let Some(v) = get("GOOGLE_REFRESH_TOKEN") {
            self.google.refresh_token = Some(v);
        }

        if let Some(v) = get("NEWSLETTER_ADDRESSES") {
            self.newsletters.addresses = split_list(&v);
        }
        if let Some(v) = get("DIGEST_TIME") {
            self.digest.time = v;
        }
        if let Some(v) = get("ENABLE_ASSISTANT").and_then(|v| parse_flag(&v)) {
            self.digest.enabled = v;
        }
    }

    /// Check that every enabled integration has what it needs to start.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.enabled {
            if self.bridge.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
                anyhow::bail!("bridge listener enabled but no bridge token (set bridge.token or BLUEBUBBLES_TOKEN)");
            }
            if self.bridge.recipient.is_none() {
                anyhow::bail!("bridge listener enabled but no recipient (set bridge.recipient or IMESSAGE_RECIPIENT)");
            }
            if self.bridge.allowed_senders.is_empty() {
                log::warn!("config: bridge allow-list is empty; only self-originated messages to the recipient will be processed");
            }
        }
        if self.chat_platform.enabled {
            if self.chat_platform.bot_token.is_none() {
                anyhow::bail!("chat platform enabled but no bot token (set chatPlatform.botToken or DISCORD_BOT_TOKEN)");
            }
            if self.chat_platform.channel_id.is_none() && self.chat_platform.user_id.is_none() {
                log::warn!("config: chat platform enabled without channel or user id; platform sends will be skipped");
            }
        }
        if self.digest.enabled {
            self.digest.fire_time()?;
        }
        Ok(())
    }

    /// Delivery targets for digests: configured list, or every enabled target.
    pub fn digest_targets(&self) -> Vec<DeliveryTarget> {
        if !self.digest.targets.is_empty() {
            return self.digest.targets.clone();
        }
        let mut out = Vec::new();
        if self.chat_platform.enabled {
            out.push(DeliveryTarget::ChatPlatform);
        }
        if self.bridge.token.is_some() && self.bridge.recipient.is_some() {
            out.push(DeliveryTarget::Bridge);
        }
        out
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("MEMEX_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".memex").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default), then apply the process environment.
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = read_config_file(&path)?;
    config.apply_env(|k| std::env::var(k).ok());
    Ok((config, path))
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
