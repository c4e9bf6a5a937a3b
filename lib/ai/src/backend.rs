//! Completion backend abstraction.
//!
//! Wire types follow the OpenAI chat completions shape, which is also
//! what OpenAI-compatible servers accept.

use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System/persona instruction.
    System,
    /// User/human message.
    User,
    /// Assistant/AI message.
    Assistant,
}

/// A message in a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Optional participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Attaches a participant name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
        }
    }
}

/// Parsed completion response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// One completion choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

/// The message inside a choice. Content is null for some refusals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Structured error reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub param: Option<JsonValue>,
    #[serde(default)]
    pub code: Option<JsonValue>,
}

impl CompletionResponse {
    /// Creates a response with a single choice.
    #[must_use]
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(content.into()),
                },
            }],
            error: None,
        }
    }

    /// Classifies the body, yielding the first choice's content.
    ///
    /// A non-empty error message wins over any choices present.
    ///
    /// # Errors
    ///
    /// Returns `Structured` when the body reports an error and
    /// `EmptyResponse` when there are no choices or the first one has no
    /// text.
    pub fn into_content(self) -> Result<String, LlmError> {
        if let Some(error) = self.error.filter(|e| !e.message.is_empty()) {
            return Err(LlmError::Structured {
                message: error.message,
                kind: error.kind,
                param: error.param.as_ref().and_then(scalar_to_string),
                code: error.code.as_ref().and_then(scalar_to_string),
            });
        }

        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Trait for completion backends.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Issues a single completion call.
    ///
    /// Implementations return `Ok` for any parseable body so the caller
    /// can classify structured errors and empty results itself.
    ///
    /// # Errors
    ///
    /// Returns `QuotaExceeded` for HTTP 429, and a transport-class error
    /// when the call fails or the body cannot be parsed.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_wire_shape() {
        let request = CompletionRequest::new(
            "gpt-4",
            vec![ChatMessage::system("be kind"), ChatMessage::user("hi")],
        );
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4",
                "messages": [
                    {"role": "system", "content": "be kind"},
                    {"role": "user", "content": "hi"}
                ]
            })
        );
    }

    #[test]
    fn first_choice_wins() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"Hello"}},{"message":{"content":"Other"}}]}"#,
        )
        .expect("deserialize");
        assert_eq!(body.into_content(), Ok("Hello".to_string()));
    }

    #[test]
    fn error_message_is_structured_error() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{"error":{"message":"bad model","type":"invalid_request_error","param":null,"code":"model_not_found"}}"#,
        )
        .expect("deserialize");
        assert_eq!(
            body.into_content(),
            Err(LlmError::Structured {
                message: "bad model".to_string(),
                kind: Some("invalid_request_error".to_string()),
                param: None,
                code: Some("model_not_found".to_string()),
            })
        );
    }

    #[test]
    fn empty_error_message_is_ignored() {
        let body: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"ok"}}],"error":{"message":""}}"#,
        )
        .expect("deserialize");
        assert_eq!(body.into_content(), Ok("ok".to_string()));
    }

    #[test]
    fn no_choices_is_empty_response() {
        let body: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("deserialize");
        assert_eq!(body.into_content(), Err(LlmError::EmptyResponse));
    }

    #[test]
    fn choice_without_text_is_empty_response() {
        let null: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#)
                .expect("deserialize");
        assert_eq!(null.into_content(), Err(LlmError::EmptyResponse));

        let blank: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":""}}]}"#)
                .expect("deserialize");
        assert_eq!(blank.into_content(), Err(LlmError::EmptyResponse));
    }

    #[test]
    fn numeric_error_code_is_stringified() {
        let body: CompletionResponse =
            serde_json::from_str(r#"{"error":{"message":"boom","code":500}}"#).expect("deserialize");
        match body.into_content() {
            Err(LlmError::Structured { code, .. }) => assert_eq!(code, Some("500".to_string())),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
