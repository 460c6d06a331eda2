//! Tool layer: the [`Tool`] trait the agent invokes, structured [`ToolError`]s, and the
//! immutable [`ToolRegistry`] built once at startup.

mod calendar;
mod newsletter;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub use crate::llm::ToolDefinition;
use crate::llm::ToolFunctionDefinition;
pub use calendar::{CreateCalendarEventTool, ReadCalendarEventsTool};
pub use newsletter::FetchNewslettersTool;

/// Why a tool call did not produce a result. Fed back to the model as JSON.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("{0}")]
    Backend(String),
}

impl ToolError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        ToolError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// `{"error": …}` plus `"field"` for validation failures.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ToolError::Validation { field, .. } => json!({ "error": self.to_string(), "field": field }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

impl From<crate::google::GoogleError> for ToolError {
    fn from(e: crate::google::GoogleError) -> Self {
        ToolError::Backend(e.to_string())
    }
}

/// A capability the agent can call by name with JSON arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> serde_json::Value;
    async fn invoke(&self, args: serde_json::Value) -> Result<String, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            typ: "function".to_string(),
            function: ToolFunctionDefinition {
                name: self.name().to_string(),
                description: Some(self.description().to_string()),
                parameters: self.parameters(),
            },
        }
    }
}

/// Name-unique set of tools. Cheap to clone; never mutated after construction.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Later tools with a duplicate name are dropped.
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut kept: Vec<Arc<dyn Tool>> = Vec::with_capacity(tools.len());
        for t in tools {
            if kept.iter().any(|k| k.name() == t.name()) {
                log::warn!("tools: duplicate tool {} ignored", t.name());
                continue;
            }
            kept.push(t);
        }
        Self { tools: kept }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// The named tools only, in the order given. Unknown names are logged and skipped.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> ToolRegistry {
        let mut tools = Vec::new();
        for n in names {
            match self.get(n.as_ref()) {
                Some(t) => tools.push(t.clone()),
                None => log::warn!("tools: {} is not registered", n.as_ref()),
            }
        }
        ToolRegistry::new(tools)
    }

    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<String, ToolError> {
        match self.get(name) {
            Some(t) => t.invoke(args).await,
            None => Err(ToolError::Unknown(name.to_string())),
        }
    }
}

/// Trimmed, non-empty string argument.
pub(crate) fn str_arg(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
