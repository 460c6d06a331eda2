//! End-to-end scenarios over the router, digest and HTTP API with in-process fakes for
//! the model, context store, calendar and chat platform.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use memex::agent::{Agent, TIMEOUT_TEXT};
use memex::channels::{ChatPlatform, InboundEvent, PlatformError};
use memex::classifier::{Classifier, Intent};
use memex::config::{ChatPlatformConfig, DigestTaskMode, ModelProfile, ResponderConfig};
use memex::digest::{DigestScheduler, DigestTask};
use memex::dispatch::{DeliveryTarget, Dispatcher};
use memex::gateway::{ChatPolicy, FilterPolicy};
use memex::google::{
    CalendarBackend, CalendarEvent, EventTime, GoogleError, MailBackend, MailMessage, NewEvent,
};
use memex::llm::{ChatMessage, ChatResponse, LlmBackend, LlmError, ToolCall, ToolDefinition};
use memex::responder::{Responder, RETRIEVAL_APOLOGY};
use memex::routing::MessageRouter;
use memex::service::{app, ServiceState, ServiceStatus};
use memex::store::{ContextPassage, ContextStore, RetrievalError};
use memex::tools::{
    CreateCalendarEventTool, FetchNewslettersTool, ReadCalendarEventsTool, Tool, ToolRegistry,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn profile(model: &str) -> ModelProfile {
    ModelProfile {
        model: model.to_string(),
        temperature: 0.0,
        max_tokens: 512,
    }
}

/// Answers by profile: "fast" rewrites, "creative" generates, "det" classifies
/// (single message, no tools) or plays the agent (tools offered).
#[derive(Default)]
struct FakeLlm {
    slow_agent: bool,
}

#[async_trait]
impl LlmBackend for FakeLlm {
    async fn chat(
        &self,
        profile: &ModelProfile,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatResponse, LlmError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let text = match (profile.model.as_str(), tools) {
            ("fast", _) => "Notes about the home network.".to_string(),
            ("creative", _) => {
                "The router is in the hallway closet. The password for the home wifi is hunter2".to_string()
            }
            (_, None) if messages.len() == 1 => {
                if last.contains("dentist") {
                    "tool_action".to_string()
                } else {
                    "rag_query".to_string()
                }
            }
            (_, None) => "Wrapped up.".to_string(),
            (_, Some(defs)) => {
                if self.slow_agent {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                return Ok(agent_step(&messages, &defs));
            }
        };
        Ok(ChatResponse::assistant(text, vec![]))
    }
}

fn agent_step(messages: &[ChatMessage], defs: &[ToolDefinition]) -> ChatResponse {
    let last = messages.last().expect("agent sends messages");
    if last.role == "tool" {
        let result: serde_json::Value = serde_json::from_str(&last.content).unwrap_or_default();
        if let Some(err) = result.get("error").and_then(|e| e.as_str()) {
            return ChatResponse::assistant(format!("I couldn't create the event: {}", err), vec![]);
        }
        if last.content.starts_with("No newsletters") {
            return ChatResponse::assistant("", vec![]);
        }
        return ChatResponse::assistant(format!("Done. {}", last.content), vec![]);
    }
    let offered = |name: &str| defs.iter().any(|d| d.function.name == name);
    let task = messages
        .iter()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .unwrap_or("");
    if task.contains("dentist") && offered("create_calendar_event") {
        let start = if task.contains("sometime") {
            "sometime next week"
        } else {
            "2030-01-02T15:00"
        };
        let call = ToolCall::function(
            "create_calendar_event",
            json!({"summary": "Dentist", "start_datetime": start}),
        );
        return ChatResponse::assistant("", vec![call]);
    }
    if offered("read_calendar_events") {
        let call = ToolCall::function("read_calendar_events", json!({"date": "2030-01-02"}));
        return ChatResponse::assistant("", vec![call]);
    }
    if offered("fetch_newsletters") {
        let call = ToolCall::function("fetch_newsletters", json!({}));
        return ChatResponse::assistant("", vec![call]);
    }
    ChatResponse::assistant("", vec![])
}

struct FakeStore {
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeStore {
    fn new(fail: bool) -> Self {
        Self {
            fail,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContextStore for FakeStore {
    async fn similarity_search(
        &self,
        query: &str,
        _k: usize,
    ) -> Result<Vec<ContextPassage>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(RetrievalError::Store("connection refused".to_string()));
        }
        Ok(vec![ContextPassage::new("Router lives in the hallway closet.")
            .with_meta("source", "notes")
            .with_meta("note_id", "n-42")
            .with_score(0.9)])
    }
}

#[derive(Default)]
struct FakeCalendar {
    inserted: Mutex<Vec<NewEvent>>,
}

fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2030, 1, 2, h, m, 0)
        .unwrap()
}

#[async_trait]
impl CalendarBackend for FakeCalendar {
    async fn list_events(
        &self,
        _calendar_id: &str,
        _from: DateTime<FixedOffset>,
        _to: DateTime<FixedOffset>,
        _max_results: u32,
    ) -> Result<Vec<CalendarEvent>, GoogleError> {
        Ok(vec![CalendarEvent {
            id: "e1".to_string(),
            summary: "Standup".to_string(),
            location: None,
            description: None,
            start: EventTime::At(at(9, 0)),
            end: EventTime::At(at(9, 15)),
        }])
    }

    async fn insert_event(
        &self,
        _calendar_id: &str,
        event: &NewEvent,
    ) -> Result<CalendarEvent, GoogleError> {
        self.inserted.lock().unwrap().push(event.clone());
        Ok(CalendarEvent {
            id: "new".to_string(),
            summary: event.summary.clone(),
            location: event.location.clone(),
            description: event.description.clone(),
            start: EventTime::At(event.start),
            end: EventTime::At(event.end),
        })
    }
}

/// An inbox with nothing in it.
#[derive(Default)]
struct FakeMail {
    searches: Mutex<Vec<String>>,
}

#[async_trait]
impl MailBackend for FakeMail {
    async fn search(&self, query: &str, _max_results: u32) -> Result<Vec<String>, GoogleError> {
        self.searches.lock().unwrap().push(query.to_string());
        Ok(Vec::new())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, GoogleError> {
        Err(GoogleError::Api(format!("no message {}", id)))
    }

    async fn mark_read(&self, _id: &str) -> Result<(), GoogleError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakePlatform {
    ready: AtomicBool,
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send_to_user(&self, user_id: &str, text: &str) -> Result<(), PlatformError> {
        self.sent
            .lock()
            .unwrap()
            .push((format!("user:{}", user_id), text.to_string()));
        Ok(())
    }

    async fn send_to_channel(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        self.sent
            .lock()
            .unwrap()
            .push((format!("channel:{}", channel_id), text.to_string()));
        Ok(())
    }
}

struct Harness {
    store: Arc<FakeStore>,
    calendar: Arc<FakeCalendar>,
    mail: Arc<FakeMail>,
    platform: Arc<FakePlatform>,
    responder: Arc<Responder>,
    agent: Arc<Agent>,
    tools: ToolRegistry,
    dispatcher: Arc<Dispatcher>,
}

fn harness(llm: FakeLlm, store_fails: bool) -> Harness {
    let backend: Arc<dyn LlmBackend> = Arc::new(llm);
    let store = Arc::new(FakeStore::new(store_fails));
    let calendar = Arc::new(FakeCalendar::default());
    let mail = Arc::new(FakeMail::default());
    let platform = Arc::new(FakePlatform::default());
    platform.ready.store(true, Ordering::SeqCst);

    let responder = Arc::new(Responder::new(
        backend.clone(),
        store.clone(),
        profile("creative"),
        profile("fast"),
        ResponderConfig::default(),
    ));
    let agent = Arc::new(Agent::new(backend, profile("det")));
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadCalendarEventsTool::new(calendar.clone(), "primary")),
        Arc::new(CreateCalendarEventTool::new(calendar.clone(), "primary")),
        Arc::new(FetchNewslettersTool::new(
            mail.clone(),
            vec!["news@example.com".to_string()],
            5,
        )),
    ];
    let platform_cfg = ChatPlatformConfig {
        enabled: true,
        user_id: Some("u1".to_string()),
        ..ChatPlatformConfig::default()
    };
    let dispatcher = Arc::new(Dispatcher::new().with_platform(platform.clone(), &platform_cfg));
    Harness {
        store,
        calendar,
        mail,
        platform,
        responder,
        agent,
        tools: ToolRegistry::new(tools),
        dispatcher,
    }
}

fn router(h: &Harness, backend: Arc<dyn LlmBackend>) -> MessageRouter {
    MessageRouter::new(
        Classifier::new(backend, profile("det")),
        h.responder.clone(),
        h.agent.clone(),
        h.tools.clone(),
        h.dispatcher.clone(),
        Duration::from_secs(30),
    )
}

#[tokio::test]
async fn data_query_is_answered_from_context() {
    let h = harness(FakeLlm::default(), false);
    let r = router(&h, Arc::new(FakeLlm::default()));

    assert_eq!(r.classify("where is the router?").await, Intent::DataQuery);
    let draft = r.route("where is the router?").await;
    assert!(draft.text.contains("hallway closet"), "{}", draft.text);
    assert!(!draft.text.contains("hunter2"), "{}", draft.text);
    assert!(draft.text.contains("home wifi is ***"), "{}", draft.text);
    assert_eq!(draft.channel_hints, BTreeSet::from([DeliveryTarget::Bridge]));
    assert_eq!(
        h.store.queries.lock().unwrap().clone(),
        vec!["where is the router? Notes about the home network.".to_string()]
    );
}

#[tokio::test]
async fn tool_action_creates_the_event() {
    let h = harness(FakeLlm::default(), false);
    let r = router(&h, Arc::new(FakeLlm::default()));

    let draft = r.route("put the dentist on my calendar jan 2 at 3pm").await;
    assert!(draft.text.starts_with("Done. Created \"Dentist\""), "{}", draft.text);
    let inserted = h.calendar.inserted.lock().unwrap().clone();
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].summary, "Dentist");
    assert_eq!(inserted[0].end - inserted[0].start, chrono::Duration::hours(1));
}

#[tokio::test]
async fn unparsable_start_is_reported_without_creating_anything() {
    let h = harness(FakeLlm::default(), false);
    let r = router(&h, Arc::new(FakeLlm::default()));

    let draft = r.route("put the dentist on my calendar sometime next week").await;
    assert!(
        draft.text.starts_with("I couldn't create the event: invalid start_datetime"),
        "{}",
        draft.text
    );
    assert!(h.calendar.inserted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn handled_message_is_delivered_to_reply_targets() {
    let h = harness(FakeLlm::default(), false);
    let r = router(&h, Arc::new(FakeLlm::default()))
        .with_reply_targets(vec![DeliveryTarget::ChatPlatform]);

    let event = InboundEvent::from_bridge_payload(json!({
        "text": " where is the router? ",
        "isFromMe": false,
        "handle": {"address": "+15551234567", "service": "iMessage"},
    }));
    let msg = FilterPolicy::new("iMessage", vec!["+15551234567".to_string()], None)
        .admit(event)
        .expect("authorized");
    r.handle(msg).await;

    let sent = h.platform.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "user:u1");
    assert!(sent[0].1.contains("hallway closet"));
}

#[tokio::test]
async fn chat_platform_message_is_answered_in_its_channel() {
    let h = harness(FakeLlm::default(), false);
    let r = router(&h, Arc::new(FakeLlm::default()));

    let event = InboundEvent::from_chat_message("u1", "1001", "where is the router?");
    let msg = ChatPolicy::new(Some("u1".to_string()))
        .admit(event, false)
        .expect("authorized");
    r.handle(msg).await;

    let sent = h.platform.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "channel:1001");
    assert!(sent[0].1.contains("hallway closet"));
}

#[tokio::test]
async fn retrieval_outage_yields_apology() {
    let h = harness(FakeLlm::default(), true);
    let r = router(&h, Arc::new(FakeLlm::default()));
    assert_eq!(r.route("where is the router?").await.text, RETRIEVAL_APOLOGY);
}

#[tokio::test(start_paused = true)]
async fn agent_timeout_yields_fixed_text() {
    let llm = FakeLlm { slow_agent: true };
    let h = harness(llm, false);
    let r = router(&h, Arc::new(FakeLlm { slow_agent: true }));
    let draft = r.route("dentist tomorrow").await;
    assert_eq!(draft.text, TIMEOUT_TEXT);
    assert!(h.calendar.inserted.lock().unwrap().is_empty());
}

fn digest(h: &Harness) -> DigestScheduler {
    let tasks = vec![
        DigestTask {
            title: "📅 Calendar".to_string(),
            prompt: "Summarize today's calendar.".to_string(),
            mode: DigestTaskMode::Agent,
            tools: h.tools.subset(&["read_calendar_events"]),
        },
        DigestTask {
            title: "📝 Notes".to_string(),
            prompt: "Anything I noted for today?".to_string(),
            mode: DigestTaskMode::Responder,
            tools: ToolRegistry::default(),
        },
    ];
    DigestScheduler::new(
        NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        tasks,
        h.agent.clone(),
        h.responder.clone(),
        h.dispatcher.clone(),
        vec![DeliveryTarget::ChatPlatform],
        Duration::from_secs(30),
    )
}

#[tokio::test]
async fn digest_collects_sections_in_order() {
    let h = harness(FakeLlm::default(), false);
    let text = digest(&h).compose(NaiveDate::from_ymd_opt(2030, 1, 2).unwrap()).await;

    assert!(text.starts_with("🗓️ Daily digest for Wednesday, January 2, 2030\n\n"), "{}", text);
    let cal = text.find("📅 Calendar\nDone. - 09:00-09:15 Standup").expect("calendar section");
    let notes = text.find("📝 Notes\n").expect("notes section");
    assert!(cal < notes);
}

#[tokio::test]
async fn digest_skips_failed_sections_and_delivers() {
    let h = harness(FakeLlm::default(), true);
    let text = digest(&h).run_once().await;

    assert!(text.contains("📅 Calendar"));
    assert!(!text.contains("📝 Notes"));
    assert!(!text.contains(RETRIEVAL_APOLOGY));
    let sent = h.platform.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, text);
}

#[tokio::test]
async fn digest_without_newsletters_still_sends_the_calendar() {
    let h = harness(FakeLlm::default(), false);
    let tasks = vec![
        DigestTask {
            title: "📅 Calendar".to_string(),
            prompt: "Summarize today's calendar.".to_string(),
            mode: DigestTaskMode::Agent,
            tools: h.tools.subset(&["read_calendar_events"]),
        },
        DigestTask {
            title: "📰 Newsletters".to_string(),
            prompt: "Summarize today's newsletters.".to_string(),
            mode: DigestTaskMode::Agent,
            tools: h.tools.subset(&["fetch_newsletters"]),
        },
    ];
    let scheduler = DigestScheduler::new(
        NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        tasks,
        h.agent.clone(),
        h.responder.clone(),
        h.dispatcher.clone(),
        vec![DeliveryTarget::ChatPlatform],
        Duration::from_secs(30),
    );

    let text = scheduler.run_once().await;
    assert!(text.contains("📅 Calendar\nDone. - 09:00-09:15 Standup"), "{}", text);
    assert!(!text.contains("📰 Newsletters"), "{}", text);
    let searches = h.mail.searches.lock().unwrap().clone();
    assert_eq!(searches.len(), 1);
    assert!(searches[0].starts_with("from:news@example.com after:"));
    let sent = h.platform.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, text);
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

#[tokio::test]
async fn completion_endpoint_uses_the_responder() {
    let h = harness(FakeLlm::default(), false);
    let status = Arc::new(ServiceStatus::new(
        false,
        Some(h.platform.clone() as Arc<dyn ChatPlatform>),
        true,
    ));
    let app = app(ServiceState::new(h.responder.clone(), status));
    let port = free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);
    let res = client
        .post(format!("{}/api/v1/completion", base))
        .json(&json!({"prompt": "where is the router?"}))
        .send()
        .await
        .expect("completion request");
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.expect("json");
    assert!(body["completion"]
        .as_str()
        .unwrap_or_default()
        .contains("hallway closet"));

    let health: serde_json::Value = client
        .get(format!("{}/", base))
        .send()
        .await
        .expect("health request")
        .json()
        .await
        .expect("json");
    assert_eq!(health["chatPlatform"], "ready");
    assert_eq!(health["digest"], "scheduled");
    assert_eq!(health["bridge"], "disabled");
}
