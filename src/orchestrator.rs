use crate::error::Result;
use crate::io_struct::{ChatMessage, ChatOptions, Chunk, Completion};
use crate::pipeline::{Call, Injection, Phase, Step};
use crate::registry::ModelBinding;
use crate::source::{AsyncReasonSource, AsyncResponseSource, ReasonSource, ResponseSource};
use crate::stream::{AsyncChunkStream, ChunkStream, passthrough};
use std::sync::Arc;

/// Serves one display model by chaining a reasoning source into a response
/// source. Cloning is cheap; every call gets its own [`Injection`].
pub struct Orchestrator<R, S> {
    reasoner: Arc<R>,
    responder: Arc<S>,
    binding: Arc<ModelBinding>,
}

impl<R, S> Clone for Orchestrator<R, S> {
    fn clone(&self) -> Self {
        Orchestrator {
            reasoner: self.reasoner.clone(),
            responder: self.responder.clone(),
            binding: self.binding.clone(),
        }
    }
}

impl<R, S> Orchestrator<R, S> {
    pub fn new(reasoner: Arc<R>, responder: Arc<S>, binding: Arc<ModelBinding>) -> Self {
        Orchestrator {
            reasoner,
            responder,
            binding,
        }
    }

    pub fn binding(&self) -> &ModelBinding {
        &self.binding
    }
}

fn on_close(name: String) -> impl FnOnce() + Send + 'static {
    move || log::debug!("[{}] orchestrated stream closed", name)
}

impl<R, S> Orchestrator<R, S>
where
    R: ReasonSource + 'static,
    S: ResponseSource + 'static,
{
    /// Reasoning chunks followed by response chunks, all relabelled with the
    /// display name. The response call is only opened once the reasoning
    /// stream is exhausted; closing the result early closes whichever
    /// provider stream is open.
    pub fn stream(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> ChunkStream {
        let driver = BlockingDriver {
            reasoner: self.reasoner.clone(),
            responder: self.responder.clone(),
            options,
            pending: None,
            current: None,
            core: Injection::new(self.binding.clone(), messages),
        };
        ChunkStream::new(driver.started(), passthrough, on_close(self.binding.name.clone()))
    }

    pub fn complete(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> Result<Completion> {
        let injection = Injection::new(self.binding.clone(), messages);
        let reasoning = ReasonSource::reason(
            &*self.reasoner,
            injection.messages(),
            &self.binding.reason_model,
            &options,
        )?;
        let augmented = injection.augment(&reasoning.reasoning_content);
        let response = ResponseSource::response(
            &*self.responder,
            &augmented,
            &self.binding.response_model,
            &options,
        )?;
        Ok(injection.merge(reasoning, response))
    }
}

struct BlockingDriver<R, S> {
    reasoner: Arc<R>,
    responder: Arc<S>,
    options: ChatOptions,
    pending: Option<Step>,
    current: Option<ChunkStream>,
    core: Injection,
}

impl<R: ReasonSource, S: ResponseSource> BlockingDriver<R, S> {
    fn started(mut self) -> Self {
        self.pending = Some(self.core.start());
        self
    }

    fn open(&self, call: &Call) -> Result<ChunkStream> {
        match call.phase {
            Phase::Reasoning => {
                ReasonSource::reason_stream(&*self.reasoner, &call.messages, &call.model, &self.options)
            }
            Phase::Response => ResponseSource::response_stream(
                &*self.responder,
                &call.messages,
                &call.model,
                &self.options,
            ),
        }
    }
}

impl<R: ReasonSource, S: ResponseSource> Iterator for BlockingDriver<R, S> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = match self.pending.take() {
                Some(step) => step,
                None => {
                    let current = self.current.as_mut()?;
                    match current.pull() {
                        Ok(Some(chunk)) => self.core.on_chunk(chunk),
                        Ok(None) => {
                            self.current = None;
                            self.core.on_exhausted()
                        }
                        Err(e) => {
                            self.current = None;
                            return Some(Err(e));
                        }
                    }
                }
            };
            match step {
                Step::Open(call) => match self.open(&call) {
                    Ok(stream) => self.current = Some(stream),
                    Err(e) => return Some(Err(e)),
                },
                Step::Emit(chunk) => return Some(Ok(chunk)),
                Step::Finished => return None,
            }
        }
    }
}

impl<R, S> Orchestrator<R, S>
where
    R: AsyncReasonSource + 'static,
    S: AsyncResponseSource + 'static,
{
    /// Cooperative counterpart of [`Orchestrator::stream`].
    pub fn stream_async(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> AsyncChunkStream {
        let reasoner = self.reasoner.clone();
        let responder = self.responder.clone();
        let mut core = Injection::new(self.binding.clone(), messages);
        let source = async_stream::try_stream! {
            let mut step = core.start();
            let mut current: Option<AsyncChunkStream> = None;
            loop {
                match step {
                    Step::Open(call) => {
                        let opened = match call.phase {
                            Phase::Reasoning => {
                                AsyncReasonSource::reason_stream(&*reasoner, &call.messages, &call.model, &options).await?
                            }
                            Phase::Response => {
                                AsyncResponseSource::response_stream(&*responder, &call.messages, &call.model, &options).await?
                            }
                        };
                        current = Some(opened);
                    }
                    Step::Emit(chunk) => {
                        yield chunk;
                    }
                    Step::Finished => break,
                }
                let Some(stream) = current.as_mut() else {
                    break;
                };
                step = match stream.pull().await? {
                    Some(chunk) => core.on_chunk(chunk),
                    None => {
                        current = None;
                        core.on_exhausted()
                    }
                };
            }
        };
        AsyncChunkStream::new(source, passthrough, on_close(self.binding.name.clone()))
    }

    pub async fn complete_async(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<Completion> {
        let injection = Injection::new(self.binding.clone(), messages);
        let reasoning = AsyncReasonSource::reason(
            &*self.reasoner,
            injection.messages(),
            &self.binding.reason_model,
            &options,
        )
        .await?;
        let augmented = injection.augment(&reasoning.reasoning_content);
        let response = AsyncResponseSource::response(
            &*self.responder,
            &augmented,
            &self.binding.response_model,
            &options,
        )
        .await?;
        Ok(injection.merge(reasoning, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::io_struct::{Role, Usage};
    use crate::mock::MockSource;
    use futures::StreamExt;
    use std::sync::atomic::Ordering;

    fn reasoning(text: &str) -> Chunk {
        Chunk::new("r-1", 10, "reason-m").with_reasoning(text)
    }

    fn answer(text: &str) -> Chunk {
        Chunk::new("s-1", 20, "answer-m").with_content(text)
    }

    fn usage(prompt: u64, completion: u64) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    fn orchestrator(
        reasoner: &MockSource,
        responder: &MockSource,
    ) -> Orchestrator<MockSource, MockSource> {
        Orchestrator::new(
            Arc::new(reasoner.clone()),
            Arc::new(responder.clone()),
            Arc::new(ModelBinding::new("show", "r", "reason-m", "s", "answer-m")),
        )
    }

    fn standard() -> (MockSource, MockSource) {
        let reasoner = MockSource::new(vec![reasoning("a"), reasoning("b"), reasoning("c")]);
        let responder = MockSource::new(vec![
            answer("x"),
            answer("y"),
            Chunk::new("s-1", 20, "answer-m")
                .with_finish_reason("stop")
                .with_usage(usage(7, 2)),
        ]);
        (reasoner, responder)
    }

    #[test]
    fn test_stream_concatenates_phases() {
        let (reasoner, responder) = standard();
        let chunks: Vec<Chunk> = orchestrator(&reasoner, &responder)
            .stream(vec![ChatMessage::user("hi")], ChatOptions::new())
            .map(|c| c.unwrap())
            .collect();

        let expected: Vec<Chunk> = reasoner
            .chunks()
            .into_iter()
            .chain(responder.chunks())
            .map(|c| c.relabel("show"))
            .collect();
        assert_eq!(chunks, expected);
        assert!(chunks.iter().all(|c| c.model == "show"));

        let seen = responder.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][1].role, Role::Assistant);
        assert_eq!(seen[0][1].content.matches("<Think>abc</Think>").count(), 1);
        assert_eq!(reasoner.seen(), vec![vec![ChatMessage::user("hi")]]);
        assert_eq!(reasoner.closes.load(Ordering::SeqCst), 1);
        assert_eq!(responder.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_reasoning_skips_injection() {
        let reasoner = MockSource::new(vec![]);
        let responder = MockSource::new(vec![answer("only")]);
        let original = vec![ChatMessage::system("terse"), ChatMessage::user("hi")];
        let chunks: Vec<Chunk> = orchestrator(&reasoner, &responder)
            .stream(original.clone(), ChatOptions::new())
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks, vec![answer("only").relabel("show")]);
        assert_eq!(responder.seen(), vec![original]);
    }

    #[test]
    fn test_closing_during_reasoning_never_calls_responder() {
        let (reasoner, responder) = standard();
        let mut stream = orchestrator(&reasoner, &responder)
            .stream(vec![ChatMessage::user("hi")], ChatOptions::new());
        assert!(stream.next().unwrap().is_ok());
        stream.close();
        assert!(stream.next().is_none());
        assert_eq!(reasoner.closes.load(Ordering::SeqCst), 1);
        assert_eq!(responder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reasoning_failure_stops_pipeline() {
        let (reasoner, responder) = standard();
        let reasoner = reasoner.failing_at(1);
        let results: Vec<Result<Chunk>> = orchestrator(&reasoner, &responder)
            .stream(vec![ChatMessage::user("hi")], ChatOptions::new())
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Provider { .. })));
        assert_eq!(responder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reasoner.closes.load(Ordering::SeqCst), 1);

        let err = orchestrator(&reasoner, &responder)
            .complete(vec![ChatMessage::user("hi")], ChatOptions::new())
            .unwrap_err();
        assert!(err.is_provider());
        assert_eq!(responder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_failure_is_reported_once() {
        let reasoner = MockSource::new(vec![]).refusing();
        let responder = MockSource::new(vec![answer("x")]);
        let mut stream = orchestrator(&reasoner, &responder)
            .stream(vec![ChatMessage::user("hi")], ChatOptions::new());
        assert!(matches!(stream.next(), Some(Err(Error::Provider { .. }))));
        assert!(stream.next().is_none());
        assert_eq!(responder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_complete_merges_phases() {
        let (reasoner, responder) = standard();
        let reasoner = reasoner.with_tail(
            Chunk::new("r-1", 10, "reason-m").with_usage(usage(3, 4)),
        );
        let completion = orchestrator(&reasoner, &responder)
            .complete(vec![ChatMessage::user("hi")], ChatOptions::new())
            .unwrap();
        assert_eq!(completion.model, "show");
        assert_eq!(completion.id, "s-1");
        assert_eq!(completion.created, 20);
        assert_eq!(completion.content, "xy");
        assert_eq!(completion.reasoning_content, "abc");
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.usage, Some(usage(10, 6)));
        assert_eq!(responder.seen()[0][1].content, "<Think>abc</Think>");
    }

    #[test]
    fn test_options_reach_both_phases() {
        let (reasoner, responder) = standard();
        let mut options = ChatOptions::new();
        options.insert("temperature".into(), serde_json::json!(0.3));
        orchestrator(&reasoner, &responder)
            .complete(vec![ChatMessage::user("hi")], options.clone())
            .unwrap();
        assert_eq!(reasoner.options(), vec![options.clone()]);
        assert_eq!(responder.options(), vec![options]);
    }

    #[tokio::test]
    async fn test_async_matches_blocking() {
        let (reasoner, responder) = standard();
        let blocking: Vec<Chunk> = orchestrator(&reasoner, &responder)
            .stream(vec![ChatMessage::user("hi")], ChatOptions::new())
            .map(|c| c.unwrap())
            .collect();
        let cooperative: Vec<Chunk> = orchestrator(&reasoner, &responder)
            .stream_async(vec![ChatMessage::user("hi")], ChatOptions::new())
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(blocking, cooperative);

        let sync_completion = orchestrator(&reasoner, &responder)
            .complete(vec![ChatMessage::user("hi")], ChatOptions::new())
            .unwrap();
        let async_completion = orchestrator(&reasoner, &responder)
            .complete_async(vec![ChatMessage::user("hi")], ChatOptions::new())
            .await
            .unwrap();
        assert_eq!(sync_completion, async_completion);
    }

    #[tokio::test]
    async fn test_async_drop_closes_open_phase() {
        let (reasoner, responder) = standard();
        let mut stream = orchestrator(&reasoner, &responder)
            .stream_async(vec![ChatMessage::user("hi")], ChatOptions::new());
        for _ in 0..4 {
            assert!(stream.next().await.unwrap().is_ok());
        }
        assert_eq!(reasoner.closes.load(Ordering::SeqCst), 1);
        assert_eq!(responder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(responder.closes.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(responder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_reasoning_failure_stops_pipeline() {
        let (reasoner, responder) = standard();
        let reasoner = reasoner.failing_at(0);
        let results: Vec<Result<Chunk>> = orchestrator(&reasoner, &responder)
            .stream_async(vec![ChatMessage::user("hi")], ChatOptions::new())
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(responder.calls.load(Ordering::SeqCst), 0);
    }

    fn drifting() -> MockSource {
        MockSource::new(vec![
            answer("x"),
            Chunk::new("s-OTHER", 99, "other-model").with_content("y"),
            answer("z"),
        ])
    }

    #[test]
    fn test_identity_change_fails_stream_and_complete() {
        let (reasoner, _) = standard();
        let responder = drifting();
        let results: Vec<Result<Chunk>> = orchestrator(&reasoner, &responder)
            .stream(vec![ChatMessage::user("hi")], ChatOptions::new())
            .collect();
        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(|r| r.is_ok()));
        assert!(matches!(results[4], Err(Error::Protocol { .. })));
        assert_eq!(responder.closes.load(Ordering::SeqCst), 1);

        let err = orchestrator(&reasoner, &responder)
            .complete(vec![ChatMessage::user("hi")], ChatOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_async_identity_change_fails_stream() {
        let (reasoner, _) = standard();
        let responder = drifting();
        let results: Vec<Result<Chunk>> = orchestrator(&reasoner, &responder)
            .stream_async(vec![ChatMessage::user("hi")], ChatOptions::new())
            .collect()
            .await;
        assert_eq!(results.len(), 5);
        assert!(matches!(results[4], Err(Error::Protocol { .. })));

        let err = orchestrator(&reasoner, &responder)
            .complete_async(vec![ChatMessage::user("hi")], ChatOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_async_closing_during_reasoning_never_calls_responder() {
        let (reasoner, responder) = standard();
        let mut stream = orchestrator(&reasoner, &responder)
            .stream_async(vec![ChatMessage::user("hi")], ChatOptions::new());
        assert!(stream.next().await.unwrap().is_ok());
        stream.close();
        assert!(stream.next().await.is_none());
        assert_eq!(reasoner.closes.load(Ordering::SeqCst), 1);
        assert_eq!(responder.calls.load(Ordering::SeqCst), 0);
    }
}
