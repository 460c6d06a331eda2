//! OpenAI-compatible chat-completions client (Together, LM Studio, OpenAI).
//!
//! Uses `{base}/chat/completions` with temperature, max_tokens and optional tools.
//! Tool call ids are assigned per assistant message and matched to the following
//! tool messages by order, since internal messages do not carry ids.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    ChatMessage, ChatResponse, LlmBackend, LlmError, ModelProfile, ToolCall, ToolCallFunction,
    ToolDefinition,
};

const DEFAULT_BASE_URL: &str = "https://api.together.xyz/v1";

/// Client for an OpenAI-compatible chat API.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(url);
        match self.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    /// POST /chat/completions, non-streaming.
    async fn chat(
        &self,
        profile: &ModelProfile,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiChatRequest {
            model: profile.model.clone(),
            messages: messages_to_openai(&messages),
            stream: false,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            tools: tools.map(tool_definitions_to_openai),
        };
        let res = self.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: OpenAiChatResponse = res.json().await?;
        Ok(openai_response_to_chat_response(data))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OpenAiMessage {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCallRef>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallRef {
    id: String,
    #[serde(rename = "type")]
    typ: String,
    function: OpenAiToolCallFunctionRef,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallFunctionRef {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    typ: String,
    function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: serde_json::Value,
}

fn messages_to_openai(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut pending_ids: Vec<String> = Vec::new();
    let mut next_id = 0;

    for m in messages {
        match m.role.as_str() {
            "system" => out.push(OpenAiMessage::System {
                content: m.content.clone(),
            }),
            "assistant" => {
                let tool_calls = m.tool_calls.as_ref().map(|tcs| {
                    pending_ids.clear();
                    tcs.iter()
                        .map(|tc| {
                            let id = format!("call_{}", next_id);
                            next_id += 1;
                            pending_ids.push(id.clone());
                            OpenAiToolCallRef {
                                id,
                                typ: "function".to_string(),
                                function: OpenAiToolCallFunctionRef {
                                    name: tc.function.name.clone(),
                                    arguments: serde_json::to_string(&tc.arguments())
                                        .unwrap_or_else(|_| "{}".to_string()),
                                },
                            }
                        })
                        .collect()
                });
                out.push(OpenAiMessage::Assistant {
                    content: m.content.clone(),
                    tool_calls,
                });
            }
            "tool" => {
                let id = if pending_ids.is_empty() {
                    let fallback = format!("call_{}", next_id);
                    next_id += 1;
                    fallback
                } else {
                    pending_ids.remove(0)
                };
                out.push(OpenAiMessage::Tool {
                    tool_call_id: id,
                    content: m.content.clone(),
                });
            }
            _ => {
                out.push(OpenAiMessage::User {
                    content: m.content.clone(),
                });
                pending_ids.clear();
            }
        }
    }
    out
}

fn tool_definitions_to_openai(tools: Vec<ToolDefinition>) -> Vec<OpenAiTool> {
    tools
        .into_iter()
        .map(|t| OpenAiTool {
            typ: t.typ,
            function: OpenAiToolFunction {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            },
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Option<Vec<OpenAiChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseToolCall {
    #[serde(rename = "type")]
    typ: Option<String>,
    function: Option<OpenAiResponseToolCallFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseToolCallFunction {
    name: Option<String>,
    arguments: Option<String>,
}

fn openai_response_to_chat_response(data: OpenAiChatResponse) -> ChatResponse {
    let message = data
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message);
    let Some(m) = message else {
        return ChatResponse::assistant(String::new(), Vec::new());
    };
    let tool_calls: Vec<ToolCall> = m
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let f = tc.function?;
            let name = f.name?;
            Some(ToolCall {
                typ: tc.typ.unwrap_or_else(|| "function".to_string()),
                function: ToolCallFunction {
                    index: None,
                    name,
                    arguments: f
                        .arguments
                        .as_deref()
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or(serde_json::Value::Null),
                },
            })
        })
        .collect();
    ChatResponse::assistant(m.content.unwrap_or_default(), tool_calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_messages_get_matching_ids() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("lunch tomorrow"),
            ChatMessage::assistant(
                "",
                vec![ToolCall::function("create_calendar_event", json!({"summary": "Lunch"}))],
            ),
            ChatMessage::tool("create_calendar_event", "created"),
        ];
        let out = serde_json::to_value(messages_to_openai(&messages)).unwrap();
        assert_eq!(out[2]["role"], "assistant");
        assert_eq!(out[2]["tool_calls"][0]["id"], "call_0");
        assert_eq!(out[2]["tool_calls"][0]["function"]["arguments"], r#"{"summary":"Lunch"}"#);
        assert_eq!(out[3]["role"], "tool");
        assert_eq!(out[3]["tool_call_id"], "call_0");
    }

    #[test]
    fn response_parses_tool_calls() {
        let data: OpenAiChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "x",
                        "type": "function",
                        "function": {"name": "read_calendar_events", "arguments": "{\"date\":\"2026-10-17\"}"}
                    }]
                }
            }]
        }))
        .unwrap();
        let res = openai_response_to_chat_response(data);
        assert_eq!(res.content(), "");
        assert_eq!(res.tool_calls().len(), 1);
        assert_eq!(res.tool_calls()[0].function.arguments["date"], "2026-10-17");
    }

    #[test]
    fn empty_choices_yield_empty_reply() {
        let res = openai_response_to_chat_response(OpenAiChatResponse { choices: None });
        assert_eq!(res.content(), "");
        assert!(res.tool_calls().is_empty());
    }
}
