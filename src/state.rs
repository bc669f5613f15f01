use crate::codec::{DONE, encode_chunk};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::io_struct::ChatReqInput;
use crate::registry::HttpRegistry;
use crate::stream::AsyncChunkStream;
use actix_web::HttpResponse;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};

pub struct AppState {
    pub registry: HttpRegistry,
    pub api_keys: Vec<String>,
    pub model_owner: String,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let registry = HttpRegistry::from_config(config)?;
        Ok(Self {
            registry,
            api_keys: config.api_keys.clone(),
            model_owner: config.model_owner.clone(),
        })
    }

    /// Checks an `Authorization` header value against the configured keys.
    pub fn verify_authorization(&self, header: Option<&str>) -> Result<()> {
        if self.api_keys.is_empty() {
            return Ok(());
        }
        let header = header.ok_or_else(|| Error::authorization("Expect token"))?;
        let token = header.strip_prefix("Bearer ").map(str::trim);
        match token {
            Some(token) if self.api_keys.iter().any(|key| key == token) => Ok(()),
            _ => Err(Error::authorization("Invalid or expired token")),
        }
    }

    pub fn list_models(&self) -> Value {
        let data: Vec<Value> = self
            .registry
            .models()
            .iter()
            .map(|binding| binding.to_json(&self.model_owner))
            .collect();
        json!({ "object": "list", "data": data })
    }

    pub async fn chat_completions(&self, req: ChatReqInput) -> Result<HttpResponse> {
        let orchestrator = self.registry.resolve(&req.model)?;
        if req.stream {
            let chunks = orchestrator.stream_async(req.messages, req.other);
            Ok(HttpResponse::Ok()
                .content_type("text/event-stream")
                .insert_header(("Cache-Control", "no-cache"))
                .streaming(sse_body(chunks, req.model)))
        } else {
            let completion = orchestrator
                .complete_async(req.messages, req.other)
                .await
                .inspect_err(|e| log::error!("[{}] chat completion failed: {}", req.model, e))?;
            Ok(HttpResponse::Ok().json(completion.to_json()))
        }
    }
}

/// `data:` records for every chunk, then `data: [DONE]`. A failure ends the
/// body without the terminator.
fn sse_body(
    mut chunks: AsyncChunkStream,
    model: String,
) -> impl Stream<Item = Result<Bytes>> + 'static {
    async_stream::stream! {
        let mut failed = false;
        while let Some(item) = chunks.next().await {
            match item.and_then(|chunk| encode_chunk(&chunk)) {
                Ok(bytes) => {
                    yield Ok(bytes);
                }
                Err(e) => {
                    log::error!("[{}] stream aborted: {}", model, e);
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }
        if !failed {
            yield Ok(Bytes::from_static(DONE));
        }
    }
}
