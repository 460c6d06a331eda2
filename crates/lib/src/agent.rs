//! Tool-invocation agent: plan with the model, execute tool calls, feed results back,
//! conclude. Bounded by a tool-call budget and a wall-clock timeout.
//!
//! States: Idle → Planning → ToolExecuting → Planning … → Concluding → Done, with
//! TimedOut or Failed reachable from any non-terminal state. [`Agent::run`] never
//! fails; callers that need to tell an answer from a fallback use [`Agent::run_traced`].

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{ChatMessage, LlmBackend, LlmError, ModelProfile};
use crate::tools::{ToolError, ToolRegistry};

pub const DEFAULT_MAX_TOOL_CALLS: usize = 6;
pub const TIMEOUT_TEXT: &str = "I wasn't able to complete that in time.";
pub const FAILURE_TEXT: &str = "I wasn't able to complete that request.";

const CONCLUDE_PROMPT: &str =
    "The tool call limit has been reached. Answer now using the results above, without calling any tools.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Planning,
    ToolExecuting,
    Concluding,
    Done,
    TimedOut,
    Failed,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Done | AgentState::TimedOut | AgentState::Failed)
    }
}

/// One executed (or rejected) tool call.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: Result<String, ToolError>,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub text: String,
    /// Terminal state: Done, TimedOut or Failed.
    pub state: AgentState,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Every state entered, in order, starting with Idle.
    pub trace: Vec<AgentState>,
}

impl AgentOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == AgentState::Done
    }
}

#[derive(Debug, thiserror::Error)]
enum AgentError {
    #[error("planning call failed: {0}")]
    Llm(#[from] LlmError),
}

/// Mutable run state, kept outside the timed future so a timeout still leaves a trace.
struct Run {
    state: AgentState,
    trace: Vec<AgentState>,
    tool_calls: Vec<ToolCallRecord>,
    text: String,
}

impl Run {
    fn new() -> Self {
        Self {
            state: AgentState::Idle,
            trace: vec![AgentState::Idle],
            tool_calls: Vec::new(),
            text: String::new(),
        }
    }

    fn enter(&mut self, next: AgentState) {
        log::debug!("agent: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.trace.push(next);
    }
}

pub struct Agent {
    backend: Arc<dyn LlmBackend>,
    profile: ModelProfile,
    max_tool_calls: usize,
}

impl Agent {
    /// `profile` should be the deterministic profile.
    pub fn new(backend: Arc<dyn LlmBackend>, profile: ModelProfile) -> Self {
        Self {
            backend,
            profile,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
        }
    }

    pub fn with_max_tool_calls(mut self, n: usize) -> Self {
        self.max_tool_calls = n;
        self
    }

    /// The final text, or a fixed fallback on timeout or failure.
    pub async fn run(&self, task: &str, tools: &ToolRegistry, timeout: Duration) -> String {
        self.run_traced(task, tools, timeout).await.text
    }

    pub async fn run_traced(
        &self,
        task: &str,
        tools: &ToolRegistry,
        timeout: Duration,
    ) -> AgentOutcome {
        let mut run = Run::new();
        let result = tokio::time::timeout(timeout, self.drive(task, tools, &mut run)).await;
        match result {
            Ok(Ok(())) => run.enter(AgentState::Done),
            Ok(Err(e)) => {
                log::warn!("agent: run failed in {:?}: {}", run.state, e);
                run.enter(AgentState::Failed);
                run.text = FAILURE_TEXT.to_string();
            }
            Err(_) => {
                log::warn!(
                    "agent: run timed out after {:?} in {:?} ({} tool calls)",
                    timeout,
                    run.state,
                    run.tool_calls.len()
                );
                run.enter(AgentState::TimedOut);
                run.text = TIMEOUT_TEXT.to_string();
            }
        }
        AgentOutcome {
            text: run.text,
            state: run.state,
            tool_calls: run.tool_calls,
            trace: run.trace,
        }
    }

    async fn drive(&self, task: &str, tools: &ToolRegistry, run: &mut Run) -> Result<(), AgentError> {
        let definitions = tools.definitions();
        let mut messages = vec![ChatMessage::system(system_prompt()), ChatMessage::user(task)];
        run.enter(AgentState::Planning);

        loop {
            let offer = if definitions.is_empty() {
                None
            } else {
                Some(definitions.clone())
            };
            let res = self.backend.chat(&self.profile, messages.clone(), offer).await?;
            let calls = res.tool_calls().to_vec();
            if calls.is_empty() {
                run.enter(AgentState::Concluding);
                run.text = res.content().trim().to_string();
                break;
            }

            run.enter(AgentState::ToolExecuting);
            messages.push(ChatMessage::assistant(res.content(), calls.clone()));
            for call in &calls {
                let name = call.function.name.as_str();
                let args = call.arguments();
                let result = if run.tool_calls.len() >= self.max_tool_calls {
                    Err(ToolError::Backend("tool call limit reached".to_string()))
                } else {
                    log::info!("agent: calling tool {}", name);
                    tools.invoke(name, args.clone()).await
                };
                let content = match &result {
                    Ok(out) => out.clone(),
                    Err(e) => {
                        log::warn!("agent: tool {} failed: {}", name, e);
                        e.to_json().to_string()
                    }
                };
                messages.push(ChatMessage::tool(name, content));
                run.tool_calls.push(ToolCallRecord {
                    name: name.to_string(),
                    arguments: args,
                    result,
                });
            }

            if run.tool_calls.len() >= self.max_tool_calls {
                log::debug!("agent: tool call budget of {} used", self.max_tool_calls);
                run.enter(AgentState::Concluding);
                messages.push(ChatMessage::user(CONCLUDE_PROMPT));
                let res = self.backend.chat(&self.profile, messages, None).await?;
                run.text = res.content().trim().to_string();
                break;
            }
            run.enter(AgentState::Planning);
        }

        if run.text.is_empty() {
            if let Some(Err(e)) = run.tool_calls.last().map(|c| &c.result) {
                run.text = format!("I couldn't complete that: {}", e);
            }
        }
        Ok(())
    }
}

fn system_prompt() -> String {
    let now = Local::now();
    format!(
        "You are a personal assistant that completes tasks by calling the provided tools. \
Now is {} ({}), local offset {}. Give times as YYYY-MM-DDTHH:MM in local time. \
When the tools have returned, answer the user concisely and do not mention the tools.",
        now.format("%Y-%m-%d %H:%M"),
        now.format("%A"),
        now.format("%:z"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ToolCall, ToolDefinition};
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted replies; records whether tools were offered on each call.
    struct Script {
        replies: Mutex<VecDeque<Result<ChatResponse, String>>>,
        offered: Mutex<Vec<bool>>,
        delay: Option<Duration>,
    }

    impl Script {
        fn new(replies: Vec<Result<ChatResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                offered: Mutex::new(Vec::new()),
                delay: None,
            })
        }
    }

    #[async_trait]
    impl LlmBackend for Script {
        async fn chat(
            &self,
            _profile: &ModelProfile,
            _messages: Vec<ChatMessage>,
            tools: Option<Vec<ToolDefinition>>,
        ) -> Result<ChatResponse, LlmError> {
            self.offered.lock().unwrap().push(tools.is_some());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(r)) => Ok(r),
                Some(Err(e)) => Err(LlmError::Api(e)),
                None => Ok(ChatResponse::assistant("", Vec::new())),
            }
        }
    }

    struct Counter {
        calls: Mutex<u32>,
        fail: bool,
    }

    #[async_trait]
    impl Tool for Counter {
        fn name(&self) -> &str {
            "count"
        }
        fn description(&self) -> &str {
            "count"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: serde_json::Value) -> Result<String, ToolError> {
            let mut n = self.calls.lock().unwrap();
            *n += 1;
            if self.fail {
                Err(ToolError::Backend("calendar unavailable".to_string()))
            } else {
                Ok(format!("count={}", *n))
            }
        }
    }

    fn counter(fail: bool) -> (Arc<Counter>, ToolRegistry) {
        let c = Arc::new(Counter {
            calls: Mutex::new(0),
            fail,
        });
        (c.clone(), ToolRegistry::new(vec![c as Arc<dyn Tool>]))
    }

    fn call(name: &str) -> ChatResponse {
        ChatResponse::assistant("", vec![ToolCall::function(name, json!({}))])
    }

    fn say(text: &str) -> ChatResponse {
        ChatResponse::assistant(text, Vec::new())
    }

    fn profile() -> ModelProfile {
        ModelProfile {
            model: "m".to_string(),
            temperature: 0.0,
            max_tokens: 64,
        }
    }

    const LONG: Duration = Duration::from_secs(120);

    #[tokio::test]
    async fn tool_then_answer_reaches_done() {
        let llm = Script::new(vec![Ok(call("count")), Ok(say("Counted once."))]);
        let (c, tools) = counter(false);
        let out = Agent::new(llm.clone(), profile()).run_traced("count", &tools, LONG).await;
        assert_eq!(out.text, "Counted once.");
        assert_eq!(out.state, AgentState::Done);
        assert_eq!(
            out.trace,
            vec![
                AgentState::Idle,
                AgentState::Planning,
                AgentState::ToolExecuting,
                AgentState::Planning,
                AgentState::Concluding,
                AgentState::Done
            ]
        );
        assert_eq!(*c.calls.lock().unwrap(), 1);
        assert_eq!(out.tool_calls[0].result, Ok("count=1".to_string()));
    }

    #[tokio::test]
    async fn budget_exhaustion_concludes_without_tools() {
        let replies = (0..10).map(|_| Ok(call("count"))).collect();
        let llm = Script::new(replies);
        let (c, tools) = counter(false);
        let agent = Agent::new(llm.clone(), profile()).with_max_tool_calls(3);
        let out = agent.run_traced("loop forever", &tools, LONG).await;
        assert_eq!(*c.calls.lock().unwrap(), 3);
        assert_eq!(out.state, AgentState::Done);
        let offered = llm.offered.lock().unwrap();
        assert_eq!(*offered, vec![true, true, true, false]);
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back_as_error() {
        let llm = Script::new(vec![Ok(call("teleport")), Ok(say("I can't teleport."))]);
        let (_, tools) = counter(false);
        let out = Agent::new(llm, profile()).run_traced("go", &tools, LONG).await;
        assert_eq!(out.text, "I can't teleport.");
        assert_eq!(
            out.tool_calls[0].result,
            Err(ToolError::Unknown("teleport".to_string()))
        );
    }

    #[tokio::test]
    async fn empty_answer_after_failed_tool_states_the_failure() {
        let llm = Script::new(vec![Ok(call("count")), Ok(say("  "))]);
        let (_, tools) = counter(true);
        let out = Agent::new(llm, profile()).run_traced("count", &tools, LONG).await;
        assert_eq!(out.text, "I couldn't complete that: calendar unavailable");
        assert_eq!(out.state, AgentState::Done);
    }

    #[tokio::test]
    async fn llm_failure_returns_fixed_text() {
        let llm = Script::new(vec![Err("502".to_string())]);
        let (_, tools) = counter(false);
        let agent = Agent::new(llm, profile());
        let out = agent.run_traced("x", &tools, LONG).await;
        assert_eq!(out.state, AgentState::Failed);
        assert_eq!(out.text, FAILURE_TEXT);
        assert!(!out.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_fixed_text() {
        let llm = Arc::new(Script {
            replies: Mutex::new(VecDeque::new()),
            offered: Mutex::new(Vec::new()),
            delay: Some(Duration::from_secs(300)),
        });
        let (_, tools) = counter(false);
        let agent = Agent::new(llm, profile());
        let out = agent.run_traced("slow", &tools, LONG).await;
        assert_eq!(out.state, AgentState::TimedOut);
        assert_eq!(out.text, TIMEOUT_TEXT);
        assert_eq!(out.trace.last(), Some(&AgentState::TimedOut));
        assert_eq!(agent.run("slow", &tools, LONG).await, TIMEOUT_TEXT);
    }
}
