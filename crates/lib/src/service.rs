//! Service host: builds every component once from config, starts the bridge listener,
//! the chat-platform session and the digest scheduler, and serves the HTTP API on one port.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::channels::{BridgeClient, ChatPlatform, DiscordClient};
use crate::classifier::Classifier;
use crate::config::{Config, LlmBackendKind, ModelsConfig};
use crate::digest::DigestScheduler;
use crate::dispatch::Dispatcher;
use crate::gateway::{BridgeListener, ChatPolicy, FilterPolicy};
use crate::google::{CalendarBackend, Gmail, GoogleAuth, GoogleCalendar, MailBackend};
use crate::llm::{LlmBackend, OllamaClient, OpenAiClient};
use crate::responder::Responder;
use crate::routing::MessageRouter;
use crate::store::{ChromaStore, ContextStore, EmbeddingClient};
use crate::tools::{
    CreateCalendarEventTool, FetchNewslettersTool, ReadCalendarEventsTool, Tool, ToolRegistry,
};

/// Everything the entry points share. Built once per process.
pub struct Services {
    pub responder: Arc<Responder>,
    pub agent: Arc<Agent>,
    pub tools: ToolRegistry,
    pub dispatcher: Arc<Dispatcher>,
    pub router: Arc<MessageRouter>,
    pub discord: Option<Arc<DiscordClient>>,
    agent_timeout: Duration,
}

pub fn build_backend(cfg: &ModelsConfig) -> Arc<dyn LlmBackend> {
    match cfg.backend {
        LlmBackendKind::Openai => Arc::new(OpenAiClient::new(
            Some(cfg.base_url.clone()),
            cfg.api_key.clone(),
        )),
        LlmBackendKind::Ollama => Arc::new(OllamaClient::new(Some(cfg.base_url.clone()))),
    }
}

/// Calendar and newsletter tools; empty when Google credentials are missing.
pub fn build_tools(config: &Config) -> Result<ToolRegistry> {
    if !config.google.is_configured() {
        log::warn!("tools: google credentials not configured, calendar and newsletter tools disabled");
        return Ok(ToolRegistry::default());
    }
    let auth = Arc::new(GoogleAuth::from_config(&config.google).context("google auth")?);
    let calendar: Arc<dyn CalendarBackend> = Arc::new(GoogleCalendar::new(auth.clone()));
    let mail: Arc<dyn MailBackend> = Arc::new(Gmail::new(auth));
    let calendar_id = config.google.calendar_id.clone();
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadCalendarEventsTool::new(calendar.clone(), calendar_id.clone())),
        Arc::new(CreateCalendarEventTool::new(calendar, calendar_id)),
        Arc::new(FetchNewslettersTool::new(
            mail,
            config.newsletters.addresses.clone(),
            config.newsletters.max_per_sender,
        )),
    ];
    Ok(ToolRegistry::new(tools))
}

impl Services {
    pub fn build(config: &Config) -> Result<Self> {
        let backend = build_backend(&config.models);

        let store_cfg = &config.context_store;
        let embedder = EmbeddingClient::new(
            store_cfg
                .embedding_base_url
                .as_deref()
                .unwrap_or(&config.models.base_url),
            store_cfg.embedding_model.clone(),
            config.models.api_key.clone(),
        );
        let store: Arc<dyn ContextStore> = Arc::new(ChromaStore::new(
            &store_cfg.url,
            store_cfg.collection.clone(),
            embedder,
        ));

        let responder = Arc::new(
            Responder::new(
                backend.clone(),
                store,
                config.models.creative.clone(),
                config.models.fast.clone(),
                config.responder.clone(),
            )
            .with_top_k(store_cfg.effective_top_k()),
        );
        let agent = Arc::new(
            Agent::new(backend.clone(), config.models.deterministic.clone())
                .with_max_tool_calls(config.agent.max_tool_calls),
        );
        let tools = build_tools(config)?;
        log::info!("tools: registered {:?}", tools.names());

        let mut dispatcher = Dispatcher::new();
        let discord = if config.chat_platform.enabled {
            let client = Arc::new(
                DiscordClient::from_config(&config.chat_platform).context("chat platform client")?,
            );
            dispatcher = dispatcher.with_platform(client.clone(), &config.chat_platform);
            Some(client)
        } else {
            None
        };
        if let (Some(token), Some(recipient)) = (&config.bridge.token, &config.bridge.recipient) {
            dispatcher = dispatcher.with_bridge(
                BridgeClient::new(config.bridge.http_base_url(), token.clone()),
                recipient.clone(),
            );
        }
        let dispatcher = Arc::new(dispatcher);

        let agent_timeout = Duration::from_secs(config.agent.timeout_secs);
        let router = Arc::new(MessageRouter::new(
            Classifier::new(backend, config.models.deterministic.clone()),
            responder.clone(),
            agent.clone(),
            tools.clone(),
            dispatcher.clone(),
            agent_timeout,
        ));

        Ok(Self {
            responder,
            agent,
            tools,
            dispatcher,
            router,
            discord,
            agent_timeout,
        })
    }

    pub fn digest_scheduler(&self, config: &Config) -> Result<DigestScheduler> {
        DigestScheduler::from_config(
            &config.digest,
            &self.tools,
            self.agent.clone(),
            self.responder.clone(),
            self.dispatcher.clone(),
            config.digest_targets(),
            self.agent_timeout,
        )
    }
}

/// What the health endpoint reports.
pub struct ServiceStatus {
    bridge_enabled: bool,
    bridge_connected: AtomicBool,
    platform: Option<Arc<dyn ChatPlatform>>,
    digest_enabled: bool,
}

impl ServiceStatus {
    pub fn new(bridge_enabled: bool, platform: Option<Arc<dyn ChatPlatform>>, digest_enabled: bool) -> Self {
        Self {
            bridge_enabled,
            bridge_connected: AtomicBool::new(false),
            platform,
            digest_enabled,
        }
    }

    pub fn set_bridge_connected(&self, connected: bool) {
        self.bridge_connected.store(connected, Ordering::SeqCst);
    }

    fn bridge(&self) -> &'static str {
        match (self.bridge_enabled, self.bridge_connected.load(Ordering::SeqCst)) {
            (false, _) => "disabled",
            (true, true) => "connected",
            (true, false) => "disconnected",
        }
    }

    fn chat_platform(&self) -> &'static str {
        match &self.platform {
            None => "disabled",
            Some(p) if p.is_ready() => "ready",
            Some(_) => "connecting",
        }
    }

    fn digest(&self) -> &'static str {
        if self.digest_enabled {
            "scheduled"
        } else {
            "disabled"
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    responder: Arc<Responder>,
    status: Arc<ServiceStatus>,
}

impl ServiceState {
    pub fn new(responder: Arc<Responder>, status: Arc<ServiceStatus>) -> Self {
        Self { responder, status }
    }
}

pub fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/api/v1/completion", post(completion_http))
        .with_state(state)
}

/// Run until SIGINT/SIGTERM. Fails before serving when the bridge handshake fails.
pub async fn run_service(config: Config) -> Result<()> {
    config.validate()?;
    let services = Services::build(&config)?;
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let status = Arc::new(ServiceStatus::new(
        config.bridge.enabled,
        services
            .discord
            .clone()
            .map(|d| d as Arc<dyn ChatPlatform>),
        config.digest.enabled,
    ));

    let bridge_listener = if config.bridge.enabled {
        let client = BridgeClient::from_config(&config.bridge).context("bridge client")?;
        client
            .probe()
            .await
            .with_context(|| format!("bridge unreachable at {}", client.base_url()))?;
        log::info!("bridge: handshake ok at {}", client.base_url());
        let token = config.bridge.token.clone().unwrap_or_default();
        Some(BridgeListener::new(
            &config.bridge.ws_base_url(),
            &token,
            FilterPolicy::from_config(&config.bridge),
        ))
    } else {
        None
    };

    // One consumer for every source: messages are handled strictly one at a time, in
    // arrival order.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let router = services.router.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            router.handle(msg).await;
        }
        log::info!("routing: inbound queue closed");
    }));

    if let Some(discord) = services.discord.clone() {
        let policy = ChatPolicy::from_config(&config.chat_platform);
        let inbound = tx.clone();
        tasks.push(tokio::spawn(async move {
            match discord.run(Some(inbound), policy).await {
                Ok(()) => log::info!("discord: session ended"),
                Err(e) => log::error!("discord: session failed: {}", e),
            }
        }));
    }

    if let Some(listener) = bridge_listener {
        let inbound = tx.clone();
        let listener_status = status.clone();
        tasks.push(tokio::spawn(async move {
            let connected = || listener_status.set_bridge_connected(true);
            match listener.run(inbound, connected).await {
                Ok(()) => log::info!("gateway: bridge listener stopped"),
                Err(e) => log::error!("gateway: bridge listener stopped: {}", e),
            }
            listener_status.set_bridge_connected(false);
        }));
    }
    drop(tx);

    if config.digest.enabled {
        let scheduler = Arc::new(services.digest_scheduler(&config)?);
        log::info!("digest: scheduled daily at {}", scheduler.fire_time().format("%H:%M"));
        tasks.push(tokio::spawn(scheduler.run_forever()));
    }

    let app = app(ServiceState::new(services.responder.clone(), status));
    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("service listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tasks))
        .await
        .context("service exited")?;
    log::info!("service stopped");
    Ok(())
}

/// Answer one message through the router without delivering it.
pub async fn ask_once(config: &Config, text: &str) -> Result<String> {
    let services = Services::build(config)?;
    Ok(services.router.route(text).await.text)
}

/// Compose today's digest. Delivers it unless `dry_run`.
pub async fn digest_once(config: &Config, dry_run: bool) -> Result<String> {
    let services = Services::build(config)?;
    let scheduler = services.digest_scheduler(config)?;
    if dry_run {
        Ok(scheduler.compose(chrono::Local::now().date_naive()).await)
    } else {
        let session = services.discord.clone().map(|discord| {
            tokio::spawn(async move {
                if let Err(e) = discord.run(None, ChatPolicy::default()).await {
                    log::error!("discord: session failed: {}", e);
                }
            })
        });
        let text = scheduler.run_once().await;
        if let Some(session) = session {
            session.abort();
        }
        Ok(text)
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM), then
/// stops the background tasks.
async fn shutdown_signal(tasks: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping background tasks");

    for t in &tasks {
        t.abort();
    }
    for t in tasks {
        let _ = t.await;
    }
    log::info!("background tasks finished");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<ServiceState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "bridge": state.status.bridge(),
        "chatPlatform": state.status.chat_platform(),
        "digest": state.status.digest(),
    }))
}

#[derive(Debug, Deserialize)]
struct CompletionRequest {
    #[serde(default)]
    prompt: String,
}

/// POST /api/v1/completion answers `prompt` from personal context.
async fn completion_http(
    State(state): State<ServiceState>,
    Json(req): Json<CompletionRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt is required" })),
        );
    }
    let completion = state.responder.respond(prompt).await;
    (StatusCode::OK, Json(json!({ "completion": completion })))
}
