//! Scripted in-process sources for exercising the orchestrator.

use crate::error::{Error, Result};
use crate::io_struct::{ChatMessage, ChatOptions, Chunk};
use crate::source::{
    AsyncReasonSource, AsyncResponseSource, ReasonSource, ResponseSource, identity_guard,
};
use crate::stream::{AsyncChunkStream, ChunkStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Request = (Vec<ChatMessage>, ChatOptions);

/// Replays the same chunks on every call and counts opens and closes. Clones
/// share their counters.
#[derive(Clone)]
pub struct MockSource {
    chunks: Vec<Chunk>,
    fail_at: Option<usize>,
    refuse: bool,
    pub calls: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockSource {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        MockSource {
            chunks,
            fail_at: None,
            refuse: false,
            calls: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Yields the first `index` chunks, then a provider error.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Fails when the call is opened.
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn with_tail(mut self, chunk: Chunk) -> Self {
        self.chunks.push(chunk);
        self
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.clone()
    }

    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        let requests = self.requests.lock().unwrap();
        requests.iter().map(|(messages, _)| messages.clone()).collect()
    }

    pub fn options(&self) -> Vec<ChatOptions> {
        let requests = self.requests.lock().unwrap();
        requests.iter().map(|(_, options)| options.clone()).collect()
    }

    fn open(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<Vec<Result<Chunk>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));
        if self.refuse {
            return Err(Error::provider("connection refused"));
        }
        let items = match self.fail_at {
            None => self.chunks.iter().cloned().map(Ok).collect(),
            Some(index) => self
                .chunks
                .iter()
                .take(index)
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(Error::provider("mock failure"))))
                .collect(),
        };
        Ok(items)
    }

    fn blocking(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChunkStream> {
        let items = self.open(messages, options)?;
        Ok(ChunkStream::new(items.into_iter(), identity_guard(), on_close(self.closes.clone())))
    }

    fn cooperative(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<AsyncChunkStream> {
        let items = self.open(messages, options)?;
        Ok(AsyncChunkStream::new(
            futures::stream::iter(items),
            identity_guard(),
            on_close(self.closes.clone()),
        ))
    }
}

fn on_close(closes: Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
    move || {
        closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl ReasonSource for MockSource {
    fn reason_stream(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        options: &ChatOptions,
    ) -> Result<ChunkStream> {
        self.blocking(messages, options)
    }
}

impl ResponseSource for MockSource {
    fn response_stream(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        options: &ChatOptions,
    ) -> Result<ChunkStream> {
        self.blocking(messages, options)
    }
}

impl AsyncReasonSource for MockSource {
    async fn reason_stream(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        options: &ChatOptions,
    ) -> Result<AsyncChunkStream> {
        self.cooperative(messages, options)
    }
}

impl AsyncResponseSource for MockSource {
    async fn response_stream(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        options: &ChatOptions,
    ) -> Result<AsyncChunkStream> {
        self.cooperative(messages, options)
    }
}
