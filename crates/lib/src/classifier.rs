//! Intent classifier: one deterministic LLM call decides between a data question and
//! an action request.

use std::sync::Arc;

use crate::llm::{self, LlmBackend, LlmError, ModelProfile};

/// What the user wants done with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Answer from the personal knowledge store.
    DataQuery,
    /// Perform something through the agent's tools.
    ToolAction,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::DataQuery => "rag_query",
            Intent::ToolAction => "tool_action",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("intent classification failed: {0}")]
    Llm(#[from] LlmError),
}

const CLASSIFY_PROMPT: &str = r#"Classify the user message intent into one of:
- "rag_query": the user is asking about their own data (notes, messages, contacts, places, past events)
- "tool_action": the user wants something done (create or look up calendar events, fetch newsletters)

Respond with only the label.

Message: "{message}"
Intent:"#;

pub struct Classifier {
    backend: Arc<dyn LlmBackend>,
    profile: ModelProfile,
}

impl Classifier {
    /// `profile` should be the deterministic (temperature 0) profile.
    pub fn new(backend: Arc<dyn LlmBackend>, profile: ModelProfile) -> Self {
        Self { backend, profile }
    }

    pub async fn classify(&self, text: &str) -> Result<Intent, ClassificationError> {
        let prompt = CLASSIFY_PROMPT.replace("{message}", text);
        let raw = llm::complete(self.backend.as_ref(), &self.profile, None, &prompt).await?;
        let intent = normalize_label(&raw);
        log::debug!("classifier: {:?} -> {}", raw.trim(), intent.as_str());
        Ok(intent)
    }
}

/// Anything mentioning "tool" is an action; everything else, including empty output,
/// is a data query.
pub fn normalize_label(raw: &str) -> Intent {
    if raw.trim().to_lowercase().contains("tool") {
        Intent::ToolAction
    } else {
        Intent::DataQuery
    }
}
