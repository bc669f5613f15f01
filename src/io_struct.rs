use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::ops::{Add, AddAssign};

/// Extra request fields forwarded verbatim to the providers.
pub type ChatOptions = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ChatReqInput {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,

    #[serde(flatten)]
    pub other: ChatOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(rhs.total_tokens),
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

fn chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

/// One incremental unit of a streamed chat completion.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Chunk {
    pub id: String,
    #[serde(default = "chunk_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Chunk {
            id: id.into(),
            object: chunk_object(),
            created,
            model: model.into(),
            choices: vec![ChunkChoice::default()],
            usage: None,
        }
    }

    pub fn with_reasoning(mut self, text: impl Into<String>) -> Self {
        self.delta_mut().reasoning_content = Some(text.into());
        self
    }

    pub fn with_content(mut self, text: impl Into<String>) -> Self {
        self.delta_mut().content = Some(text.into());
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        if self.choices.is_empty() {
            self.choices.push(ChunkChoice::default());
        }
        self.choices[0].finish_reason = Some(reason.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    fn delta_mut(&mut self) -> &mut Delta {
        if self.choices.is_empty() {
            self.choices.push(ChunkChoice::default());
        }
        &mut self.choices[0].delta
    }

    pub fn delta(&self) -> Option<&Delta> {
        self.choices.first().map(|c| &c.delta)
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.delta().and_then(|d| d.reasoning_content.as_deref())
    }

    pub fn content(&self) -> Option<&str> {
        self.delta().and_then(|d| d.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }

    /// Providers such as DeepSeek pair a reasoning fragment with `content: ""`
    /// (or the reverse); the empty side is dropped.
    pub fn normalize(mut self) -> Self {
        if let Some(delta) = self.choices.first_mut().map(|c| &mut c.delta) {
            let empty = |s: &Option<String>| s.as_deref() == Some("");
            if delta.reasoning_content.is_some() && empty(&delta.content) {
                delta.content = None;
            } else if delta.content.is_some() && empty(&delta.reasoning_content) {
                delta.reasoning_content = None;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.reasoning().is_some() && self.content().is_some() {
            return Err(Error::protocol(format!(
                "chunk {} carries both reasoning and answer content",
                self.id
            )));
        }
        Ok(())
    }

    pub fn relabel(mut self, model: &str) -> Self {
        if self.model != model {
            self.model = model.to_string();
        }
        self
    }
}

/// A complete, non-streaming chat completion folded from a chunk stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub content: String,
    pub reasoning_content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn to_json(&self) -> Value {
        let reasoning = if self.reasoning_content.is_empty() {
            Value::Null
        } else {
            Value::String(self.reasoning_content.clone())
        };
        json!({
            "id": self.id,
            "object": "chat.completion",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": self.content,
                    "reasoning_content": reasoning,
                },
                "finish_reason": self.finish_reason,
            }],
            "usage": self.usage.unwrap_or_default(),
        })
    }
}
