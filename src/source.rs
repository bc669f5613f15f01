//! Capability contracts for the two provider roles.
//!
//! A reasoning source yields only the reasoning phase of a provider call; a
//! response source yields the full answer. Each role has a blocking and a
//! cooperative flavour with the same semantics; the folded variants are always
//! defined through the aggregator so that streaming and non-streaming calls
//! cannot drift apart.

use crate::aggregate::{Identity, fold, fold_async};
use crate::error::Result;
use crate::io_struct::{ChatMessage, ChatOptions, Chunk, Completion};
use crate::stream::{AsyncChunkStream, ChunkStream};
use std::future::Future;
use std::ops::ControlFlow;

pub trait ReasonSource: Send + Sync {
    fn reason_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<ChunkStream>;

    fn reason(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<Completion> {
        fold(self.reason_stream(messages, model, options)?, model)
    }
}

pub trait ResponseSource: Send + Sync {
    fn response_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<ChunkStream>;

    fn response(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<Completion> {
        fold(self.response_stream(messages, model, options)?, model)
    }
}

pub trait AsyncReasonSource: Send + Sync {
    fn reason_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> impl Future<Output = Result<AsyncChunkStream>> + Send;

    fn reason(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> impl Future<Output = Result<Completion>> + Send {
        async move { fold_async(self.reason_stream(messages, model, options).await?, model).await }
    }
}

pub trait AsyncResponseSource: Send + Sync {
    fn response_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> impl Future<Output = Result<AsyncChunkStream>> + Send;

    fn response(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> impl Future<Output = Result<Completion>> + Send {
        async move {
            fold_async(self.response_stream(messages, model, options).await?, model).await
        }
    }
}

/// Take-while policy marking where reasoning ends: the first delta without a
/// reasoning fragment closes the phase, and it is discarded with everything
/// after it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReasoningBoundary;

impl ReasoningBoundary {
    pub fn admits(&self, chunk: &Chunk) -> bool {
        chunk.reasoning().is_some()
    }

    pub fn apply(&self, chunk: Chunk) -> ControlFlow<(), Chunk> {
        if self.admits(&chunk) {
            ControlFlow::Continue(chunk)
        } else {
            ControlFlow::Break(())
        }
    }
}

/// Stream transform for reasoning-phase provider output. Streaming and folded
/// consumers both see a protocol error when the chunk identity changes.
pub fn reasoning_transform(
    boundary: ReasoningBoundary,
) -> impl FnMut(Chunk) -> Result<ControlFlow<(), Chunk>> + Send + 'static {
    let mut identity = Identity::default();
    move |chunk| match boundary.apply(chunk.normalize()) {
        ControlFlow::Continue(chunk) => {
            chunk.validate()?;
            identity.check(&chunk)?;
            Ok(ControlFlow::Continue(chunk))
        }
        ControlFlow::Break(()) => Ok(ControlFlow::Break(())),
    }
}

/// Stream transform for response-phase provider output, and for reasoning
/// providers that hand back their whole output.
pub fn response_transform() -> impl FnMut(Chunk) -> Result<ControlFlow<(), Chunk>> + Send + 'static
{
    let mut identity = Identity::default();
    move |chunk| {
        let chunk = chunk.normalize();
        chunk.validate()?;
        identity.check(&chunk)?;
        Ok(ControlFlow::Continue(chunk))
    }
}

/// Passes chunks through untouched apart from the identity check.
pub fn identity_guard() -> impl FnMut(Chunk) -> Result<ControlFlow<(), Chunk>> + Send + 'static {
    let mut identity = Identity::default();
    move |chunk| {
        identity.check(&chunk)?;
        Ok(ControlFlow::Continue(chunk))
    }
}
