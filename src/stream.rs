//! Single-pass chunk streams with a guaranteed close action.
//!
//! [`ChunkStream`] is the thread-blocking flavour (an [`Iterator`]) and
//! [`AsyncChunkStream`] the cooperative one (a [`futures::Stream`]). Both share
//! the same lifecycle: hooks are fixed at construction, the close action runs
//! exactly once before the terminal outcome reaches the consumer, and the
//! underlying source is dropped (closing any upstream connection) when it does.

use crate::error::{Error, Result};
use crate::io_struct::Chunk;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// Applied to every raw item before it reaches the consumer. `Break` ends the
/// stream early, exactly like end of data.
pub type Transform = Box<dyn FnMut(Chunk) -> Result<ControlFlow<(), Chunk>> + Send>;

pub type OnClose = Box<dyn FnOnce() + Send>;

pub fn passthrough(chunk: Chunk) -> Result<ControlFlow<(), Chunk>> {
    Ok(ControlFlow::Continue(chunk))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Pulling,
    Exhausted,
    Errored,
    Closed,
}

struct Lifecycle<S> {
    source: Option<S>,
    transform: Transform,
    on_close: Option<OnClose>,
    state: State,
}

impl<S> Lifecycle<S> {
    fn new(source: S, transform: Transform, on_close: OnClose) -> Self {
        Lifecycle {
            source: Some(source),
            transform,
            on_close: Some(on_close),
            state: State::Idle,
        }
    }

    fn finish(&mut self, via: State) {
        if self.state == State::Closed {
            return;
        }
        self.state = via;
        self.source = None;
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
        self.state = State::Closed;
    }

    fn settle(&mut self, raw: Option<Result<Chunk>>) -> Option<Result<Chunk>> {
        let outcome = match raw {
            None => Ok(ControlFlow::Break(())),
            Some(Ok(chunk)) => (self.transform)(chunk),
            Some(Err(e)) => Err(e),
        };
        match outcome {
            Ok(ControlFlow::Continue(chunk)) => {
                self.state = State::Idle;
                Some(Ok(chunk))
            }
            Ok(ControlFlow::Break(())) => {
                self.finish(State::Exhausted);
                None
            }
            Err(e) => {
                self.finish(State::Errored);
                Some(Err(e))
            }
        }
    }
}

impl<S> Drop for Lifecycle<S> {
    fn drop(&mut self) {
        self.finish(State::Closed);
    }
}

type BoxIter = Box<dyn Iterator<Item = Result<Chunk>> + Send>;

pub struct ChunkStream {
    inner: Lifecycle<BoxIter>,
}

impl ChunkStream {
    pub fn new<I, T, C>(source: I, transform: T, on_close: C) -> Self
    where
        I: Iterator<Item = Result<Chunk>> + Send + 'static,
        T: FnMut(Chunk) -> Result<ControlFlow<(), Chunk>> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let source: BoxIter = Box::new(source);
        ChunkStream {
            inner: Lifecycle::new(source, Box::new(transform), Box::new(on_close)),
        }
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self::new(chunks.into_iter().map(Ok), passthrough, || {})
    }

    pub fn empty() -> Self {
        Self::from_chunks(Vec::new())
    }

    pub fn state(&self) -> State {
        self.inner.state
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state == State::Closed
    }

    /// Runs the close action if it has not run yet.
    pub fn close(&mut self) {
        self.inner.finish(State::Closed);
    }

    pub fn pull(&mut self) -> Result<Option<Chunk>> {
        match self.inner.state {
            State::Idle => {}
            // Only reachable when a previous pull unwound without settling.
            State::Pulling => return Err(Error::PullInProgress),
            State::Exhausted | State::Errored | State::Closed => return Ok(None),
        }
        self.inner.state = State::Pulling;
        let raw = self.inner.source.as_mut().and_then(|s| s.next());
        self.inner.settle(raw).transpose()
    }
}

impl Iterator for ChunkStream {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pull().transpose()
    }
}

pub struct AsyncChunkStream {
    inner: Lifecycle<BoxStream<'static, Result<Chunk>>>,
}

impl AsyncChunkStream {
    pub fn new<S, T, C>(source: S, transform: T, on_close: C) -> Self
    where
        S: Stream<Item = Result<Chunk>> + Send + 'static,
        T: FnMut(Chunk) -> Result<ControlFlow<(), Chunk>> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        AsyncChunkStream {
            inner: Lifecycle::new(source.boxed(), Box::new(transform), Box::new(on_close)),
        }
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self::new(
            futures::stream::iter(chunks.into_iter().map(Ok)),
            passthrough,
            || {},
        )
    }

    pub fn empty() -> Self {
        Self::from_chunks(Vec::new())
    }

    pub fn state(&self) -> State {
        self.inner.state
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state == State::Closed
    }

    pub fn close(&mut self) {
        self.inner.finish(State::Closed);
    }

    pub async fn pull(&mut self) -> Result<Option<Chunk>> {
        self.next().await.transpose()
    }
}

impl Stream for AsyncChunkStream {
    type Item = Result<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = &mut self.get_mut().inner;
        // `Pulling` here means the previous poll returned `Pending`; this poll
        // resumes the same pull.
        if matches!(
            inner.state,
            State::Exhausted | State::Errored | State::Closed
        ) {
            return Poll::Ready(None);
        }
        inner.state = State::Pulling;
        let raw = match inner.source.as_mut() {
            Some(source) => ready!(source.poll_next_unpin(cx)),
            None => None,
        };
        Poll::Ready(inner.settle(raw))
    }
}
