//! # Chat Completion Backend
//!
//! Trait + OpenAI implementation for generating assistant replies, including
//! the function-calling surface the tool registry plugs into.
//!
//! ## Message mapping:
//! Conversation history entries become OpenAI chat messages. Tool calls are
//! carried on an `assistant` message's `tool_calls` array; tool results
//! become `tool` role messages keyed by `tool_call_id`, which is how the
//! model matches a result back to the invocation it requested.

use crate::error::AppError;
use crate::history::HistoryEntry;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::resolve_key;

/// A tool invocation the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Backend-assigned id; tool results must echo it back
    pub call_id: String,
    pub name: String,
    /// Raw JSON argument string, exactly as the model produced it
    pub arguments: String,
}

/// One completion round: the reply text (possibly empty when the model only
/// wants tools run) and any requested tool calls, in request order.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Generates assistant replies from conversation context.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Run one completion round over the system prompt, a trailing history
    /// window, and the advertised tool schemas.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[HistoryEntry],
        tool_schemas: &[Value],
        api_key_override: Option<&str>,
    ) -> Result<CompletionResponse, AppError>;
}

/// OpenAI chat completions client.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompletion {
    pub fn new(client: reqwest::Client, model: String, api_key: Option<String>) -> Self {
        Self {
            client,
            model,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Convert history entries into OpenAI chat message objects, prefixed with
/// the system prompt.
pub(crate) fn build_messages(system_prompt: &str, entries: &[HistoryEntry]) -> Vec<Value> {
    let mut messages = vec![json!({ "role": "system", "content": system_prompt })];

    for entry in entries {
        match entry {
            HistoryEntry::User { content } => {
                messages.push(json!({ "role": "user", "content": content }));
            }
            HistoryEntry::Assistant { content } => {
                messages.push(json!({ "role": "assistant", "content": content }));
            }
            HistoryEntry::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                messages.push(json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": call_id,
                        "type": "function",
                        "function": { "name": name, "arguments": arguments }
                    }]
                }));
            }
            HistoryEntry::ToolResult { call_id, output } => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output
                }));
            }
        }
    }

    messages
}

fn parse_response(body: &Value) -> Result<CompletionResponse, AppError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| AppError::Completion("completion response had no choices".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let call_id = call
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Completion("tool call missing id".to_string()))?;
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Completion("tool call missing function name".to_string()))?;
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");

            tool_calls.push(ToolCallRequest {
                call_id: call_id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            });
        }
    }

    Ok(CompletionResponse { text, tool_calls })
}

#[async_trait]
impl CompletionBackend for OpenAiCompletion {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[HistoryEntry],
        tool_schemas: &[Value],
        api_key_override: Option<&str>,
    ) -> Result<CompletionResponse, AppError> {
        let key = resolve_key(api_key_override, self.api_key.as_deref(), "OpenAI")?;

        let mut request = json!({
            "model": self.model,
            "messages": build_messages(system_prompt, messages),
        });
        if !tool_schemas.is_empty() {
            request["tools"] = Value::Array(
                tool_schemas
                    .iter()
                    .map(|schema| json!({ "type": "function", "function": schema }))
                    .collect(),
            );
        }

        debug!(model = %self.model, history_len = messages.len(), "requesting completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Completion(format!("completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Completion(format!(
                "completion backend returned {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Completion(format!("invalid completion response: {}", e)))?;

        parse_response(&body)
    }
}
