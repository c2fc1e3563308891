//! Request and response bodies of the agent service.

pub mod catalog;

pub use catalog::{AgentCatalog, AgentInfo, HealthState, HealthStatus, ModelCatalog};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Body of a send-message request, streaming or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub chat_id: String,
    pub agent_type: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// Non-streaming reply. `error: true` means `message` holds a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub chat_id: String,
    pub message: String,
    #[serde(default)]
    pub error: Option<bool>,
}

impl ChatReply {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }
}

/// Bare failure body the service returns instead of the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Either the expected body or an [`ErrorBody`].
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ServiceResponse<T> {
    Ok(T),
    Failed(ErrorBody),
}

impl<T> ServiceResponse<T> {
    pub(crate) fn into_result(self) -> Result<T, ClientError> {
        match self {
            ServiceResponse::Ok(body) => Ok(body),
            ServiceResponse::Failed(body) => Err(ClientError::Service(body.error)),
        }
    }
}

/// Pull a readable message out of a non-success response body.
///
/// Understands `{"error": "..."}`, `{"error": {"message": "..."}}` and
/// `{"detail": "..."}`; anything else is returned trimmed.
#[must_use]
pub fn error_message_from_body(body: &str) -> String {
    const MAX_LEN: usize = 512;

    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let found = value
            .get("error")
            .and_then(|err| err.as_str().or_else(|| err.get("message")?.as_str()))
            .or_else(|| value.get("detail").and_then(serde_json::Value::as_str));
        if let Some(message) = found {
            return message.to_owned();
        }
    }
    match trimmed.char_indices().nth(MAX_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_omits_unset_optionals() {
        let request = ChatRequest {
            message: "hi".to_string(),
            chat_id: "session_1".to_string(),
            agent_type: "writing".to_string(),
            user_id: "user_1".to_string(),
            provider_name: None,
            model_name: Some("qwen-plus".to_string()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["message"], "hi");
        assert_eq!(json["chat_id"], "session_1");
        assert_eq!(json["agent_type"], "writing");
        assert_eq!(json["user_id"], "user_1");
        assert_eq!(json["model_name"], "qwen-plus");
        assert!(json.get("provider_name").is_none());
    }

    #[test]
    fn test_chat_reply_error_flag() {
        let reply: ChatReply =
            serde_json::from_str(r#"{"chat_id":"c","message":"Agent 'x' unavailable","error":true}"#)
                .unwrap();
        assert!(reply.is_error());

        let reply: ChatReply = serde_json::from_str(r#"{"chat_id":"c","message":"hello"}"#).unwrap();
        assert!(!reply.is_error());
    }

    #[test]
    fn test_service_response_error_body() {
        let parsed: ServiceResponse<ChatReply> =
            serde_json::from_str(r#"{"error":"processing failed"}"#).unwrap();
        match parsed.into_result() {
            Err(ClientError::Service(message)) => assert_eq!(message, "processing failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_message_from_body_shapes() {
        assert_eq!(error_message_from_body(r#"{"error":"bad agent"}"#), "bad agent");
        assert_eq!(
            error_message_from_body(r#"{"error":{"message":"nested"}}"#),
            "nested"
        );
        assert_eq!(error_message_from_body(r#"{"detail":"Not Found"}"#), "Not Found");
        assert_eq!(error_message_from_body("  upstream down \n"), "upstream down");
    }

    #[test]
    fn test_error_message_from_body_truncates_long_text() {
        let body = "é".repeat(600);
        let message = error_message_from_body(&body);
        assert!(message.ends_with("..."));
        assert_eq!(message.chars().count(), 515);
    }
}
