use crate::error::{Error, Result};
use crate::io_struct::{Chunk, Completion, Usage};
use crate::stream::{AsyncChunkStream, ChunkStream};

#[derive(Debug)]
struct Head {
    id: String,
    created: i64,
    model: String,
}

/// Pins the `id`, `created` and `model` of the first chunk a stream yields;
/// every later chunk must carry the same values.
#[derive(Debug, Default)]
pub struct Identity {
    head: Option<Head>,
}

impl Identity {
    pub fn check(&mut self, chunk: &Chunk) -> Result<()> {
        match &self.head {
            None => {
                self.head = Some(Head {
                    id: chunk.id.clone(),
                    created: chunk.created,
                    model: chunk.model.clone(),
                });
                Ok(())
            }
            Some(head) => {
                if head.id != chunk.id || head.created != chunk.created || head.model != chunk.model
                {
                    return Err(Error::protocol(format!(
                        "chunk identity changed mid-stream: {}@{}/{} -> {}@{}/{}",
                        head.id, head.created, head.model, chunk.id, chunk.created, chunk.model
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Folds chunks, in arrival order, into one [`Completion`].
#[derive(Debug)]
pub struct Aggregator {
    fallback_model: String,
    identity: Identity,
    content: String,
    reasoning: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl Aggregator {
    /// `fallback_model` labels the result when the stream turns out empty.
    pub fn new(fallback_model: impl Into<String>) -> Self {
        Aggregator {
            fallback_model: fallback_model.into(),
            identity: Identity::default(),
            content: String::new(),
            reasoning: String::new(),
            finish_reason: None,
            usage: None,
        }
    }

    pub fn push(&mut self, chunk: Chunk) -> Result<()> {
        chunk.validate()?;
        self.identity.check(&chunk)?;
        if let Some(text) = chunk.content() {
            self.content.push_str(text);
        }
        if let Some(text) = chunk.reasoning() {
            self.reasoning.push_str(text);
        }
        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        Ok(())
    }

    pub fn finish(self) -> Completion {
        let head = self.identity.head.unwrap_or_else(|| Head {
            id: format!("chatcmpl-{:016x}", rand::random::<u64>()),
            created: chrono::Utc::now().timestamp(),
            model: self.fallback_model,
        });
        Completion {
            id: head.id,
            created: head.created,
            model: head.model,
            content: self.content,
            reasoning_content: self.reasoning,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Drains `stream` and folds it. The stream is closed on every path; on error
/// no partial result is returned.
pub fn fold(mut stream: ChunkStream, fallback_model: &str) -> Result<Completion> {
    let mut aggregator = Aggregator::new(fallback_model);
    while let Some(chunk) = stream.pull()? {
        if let Err(e) = aggregator.push(chunk) {
            stream.close();
            return Err(e);
        }
    }
    Ok(aggregator.finish())
}

pub async fn fold_async(mut stream: AsyncChunkStream, fallback_model: &str) -> Result<Completion> {
    let mut aggregator = Aggregator::new(fallback_model);
    while let Some(chunk) = stream.pull().await? {
        if let Err(e) = aggregator.push(chunk) {
            stream.close();
            return Err(e);
        }
    }
    Ok(aggregator.finish())
}
