//! The reasoning-injection algorithm, free of any I/O or scheduling.
//!
//! [`Injection`] is fed pull outcomes and answers with the next [`Step`]; the
//! blocking and cooperative drivers in [`crate::orchestrator`] only open
//! streams, pull, and forward what it emits.

use crate::io_struct::{ChatMessage, Chunk, Completion};
use crate::registry::ModelBinding;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reasoning,
    Response,
}

/// A provider call the driver must open next.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub phase: Phase,
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

#[derive(Debug, PartialEq)]
pub enum Step {
    Open(Call),
    Emit(Chunk),
    Finished,
}

#[derive(Debug)]
pub struct Injection {
    binding: Arc<ModelBinding>,
    messages: Vec<ChatMessage>,
    phase: Option<Phase>,
    reasoning: String,
}

impl Injection {
    pub fn new(binding: Arc<ModelBinding>, messages: Vec<ChatMessage>) -> Self {
        Injection {
            binding,
            messages,
            phase: None,
            reasoning: String::new(),
        }
    }

    pub fn binding(&self) -> &ModelBinding {
        &self.binding
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn start(&mut self) -> Step {
        self.phase = Some(Phase::Reasoning);
        log::debug!(
            "[{}] reasoning phase on {}",
            self.binding.name,
            self.binding.reason_model
        );
        Step::Open(Call {
            phase: Phase::Reasoning,
            messages: self.messages.clone(),
            model: self.binding.reason_model.clone(),
        })
    }

    pub fn on_chunk(&mut self, chunk: Chunk) -> Step {
        if self.phase == Some(Phase::Reasoning) {
            if let Some(text) = chunk.reasoning() {
                self.reasoning.push_str(text);
            }
        }
        Step::Emit(chunk.relabel(&self.binding.name))
    }

    pub fn on_exhausted(&mut self) -> Step {
        match self.phase {
            Some(Phase::Reasoning) => {
                self.phase = Some(Phase::Response);
                let reasoning = std::mem::take(&mut self.reasoning);
                let messages = self.augment(&reasoning);
                log::debug!(
                    "[{}] response phase on {} ({} reasoning bytes)",
                    self.binding.name,
                    self.binding.response_model,
                    reasoning.len()
                );
                Step::Open(Call {
                    phase: Phase::Response,
                    messages,
                    model: self.binding.response_model.clone(),
                })
            }
            Some(Phase::Response) | None => {
                self.phase = None;
                Step::Finished
            }
        }
    }

    /// Original messages plus the injected reasoning, or the original messages
    /// alone when there is no reasoning text.
    pub fn augment(&self, reasoning: &str) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        if !reasoning.is_empty() {
            messages.push(ChatMessage::assistant(self.binding.inject(reasoning)));
        }
        messages
    }

    /// Combines the folded phases of a non-streaming call. Both phases are
    /// billable, so their usage is summed.
    pub fn merge(&self, reasoning: Completion, response: Completion) -> Completion {
        let usage = match (reasoning.usage, response.usage) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or_default() + b.unwrap_or_default()),
        };
        Completion {
            id: response.id,
            created: response.created,
            model: self.binding.name.clone(),
            content: response.content,
            reasoning_content: reasoning.reasoning_content,
            finish_reason: response.finish_reason,
            usage,
        }
    }
}
