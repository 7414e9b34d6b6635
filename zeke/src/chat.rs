//! Chat request/response types: the normalised contract every provider
//! adapter serialises from and every client surface parses into.
//!
//! A [`ChatRequest`] carries either a bare prompt (converted to one user
//! message) or a full message history, plus routing [`RequestTags`]. The
//! streaming carrier is an ordered sequence of [`ChatDelta`]s terminated by
//! a final delta with `finished: true`.

use serde::{Deserialize, Serialize};

/// Message role in a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Client-supplied semantic label used by the smart router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    #[default]
    Code,
    Completion,
    Refactor,
    Tests,
    Explain,
    Architecture,
    Reason,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Code => "code",
            Intent::Completion => "completion",
            Intent::Refactor => "refactor",
            Intent::Tests => "tests",
            Intent::Explain => "explain",
            Intent::Architecture => "architecture",
            Intent::Reason => "reason",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code" => Ok(Intent::Code),
            "completion" => Ok(Intent::Completion),
            "refactor" => Ok(Intent::Refactor),
            "tests" => Ok(Intent::Tests),
            "explain" => Ok(Intent::Explain),
            "architecture" => Ok(Intent::Architecture),
            "reason" => Ok(Intent::Reason),
            _ => Err(format!("unknown intent: {s}")),
        }
    }
}

/// Request complexity, explicit or estimated by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Routing tags carried on every request. Sent verbatim in the body when the
/// upstream is the aggregating proxy; OpenAI-compatible upstreams ignore the
/// extra field.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestTags {
    #[serde(default)]
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Normalised chat request. Adapters serialise this into their wire format.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tags: RequestTags,
}

impl ChatRequest {
    /// Builds a request from a bare prompt (one user message).
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            ..Self::default()
        }
    }

    /// Builds a request from a prompt with an intent tag.
    pub fn with_intent(prompt: impl Into<String>, intent: Intent) -> Self {
        let mut req = Self::from_prompt(prompt);
        req.tags.intent = intent;
        req
    }

    /// Total prompt length in bytes across all messages; the router's size
    /// heuristic input.
    pub fn prompt_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Completed (non-streaming) chat response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

/// One streamed chunk. The final delta for a request has `finished: true`
/// and empty text; nothing follows it for that id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    pub id: String,
    pub delta: String,
    pub finished: bool,
}

impl ChatDelta {
    pub fn text(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delta: delta.into(),
            finished: false,
        }
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delta: String::new(),
            finished: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_prompt_builds_one_user_message() {
        let req = ChatRequest::from_prompt("hello");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.prompt_len(), 5);
    }

    #[test]
    fn intent_round_trips_through_str() {
        for intent in [
            Intent::Code,
            Intent::Completion,
            Intent::Refactor,
            Intent::Tests,
            Intent::Explain,
            Intent::Architecture,
            Intent::Reason,
        ] {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
        assert!("banana".parse::<Intent>().is_err());
    }

    #[test]
    fn chat_response_serde_round_trip() {
        let resp = ChatResponse {
            content: "fn main() {}".into(),
            model: "qwen2.5-coder:7b".into(),
            provider: "ollama".into(),
            tokens_in: 12,
            tokens_out: 5,
            latency_ms: 180,
            cached: false,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: ChatResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn complexity_orders_simple_lt_complex() {
        assert!(Complexity::Simple < Complexity::Medium);
        assert!(Complexity::Medium < Complexity::Complex);
    }

    #[test]
    fn tags_serialize_skips_absent_fields() {
        let tags = RequestTags {
            intent: Intent::Refactor,
            ..Default::default()
        };
        let v = serde_json::to_value(&tags).unwrap();
        assert_eq!(v, serde_json::json!({"intent": "refactor"}));
    }
}
