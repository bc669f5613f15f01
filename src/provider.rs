//! HTTP-backed providers speaking the OpenAI-compatible streaming chat API.

use crate::codec::{Frame, SseDecoder};
use crate::config::{
    Endpoint, ReasonProviderConfig, ReasonProviderKind, ResponseProviderConfig,
    ResponseProviderKind,
};
use crate::error::{Error, Result};
use crate::io_struct::{ChatMessage, ChatOptions, Chunk};
use crate::source::{
    AsyncReasonSource, AsyncResponseSource, ReasonSource, ReasoningBoundary, ResponseSource,
    reasoning_transform, response_transform,
};
use crate::stream::{AsyncChunkStream, ChunkStream};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

const CHAT_COMPLETIONS: &str = "/chat/completions";

/// Builds a client for one upstream endpoint.
pub trait Connect: Sized + Send + Sync + 'static {
    fn connect(endpoint: &Endpoint) -> Result<Self>;
}

fn request_body(
    endpoint: &Endpoint,
    messages: &[ChatMessage],
    model: &str,
    options: &ChatOptions,
) -> Value {
    let mut body = options.clone();
    body.insert("model".to_string(), json!(model));
    body.insert("messages".to_string(), json!(messages));
    body.insert("stream".to_string(), Value::Bool(true));
    if endpoint.include_usage {
        body.insert(
            "stream_options".to_string(),
            json!({ "include_usage": true }),
        );
    }
    Value::Object(body)
}

fn client_error(endpoint: &Endpoint, e: reqwest::Error) -> Error {
    Error::configuration(format!(
        "failed to build client for {}: {}",
        endpoint.base_url, e
    ))
}

fn default_headers(endpoint: &Endpoint) -> Result<HeaderMap> {
    let args = &endpoint.client_args;
    for key in args.unused.keys() {
        log::warn!("Ignoring client arg '{}' for {}", key, endpoint.base_url);
    }
    let mut headers = HeaderMap::new();
    for (name, value) in args.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::configuration(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| Error::configuration(format!("invalid value for header {}: {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl Connect for Client {
    fn connect(endpoint: &Endpoint) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .default_headers(default_headers(endpoint)?)
            .build()
            .map_err(|e| client_error(endpoint, e))?;
        Ok(Client {
            http,
            endpoint: endpoint.clone(),
        })
    }
}

impl Client {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        let url = self.endpoint.api_path(CHAT_COMPLETIONS);
        let mut request = self
            .http
            .post(&url)
            .json(&request_body(&self.endpoint, messages, model, options));
        let query = &self.endpoint.client_args.default_query;
        if !query.is_empty() {
            request = request.query(query);
        }
        if !self.endpoint.api_key.is_empty() {
            request = request.bearer_auth(&self.endpoint.api_key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }
        log::debug!("Opened stream {} for {}", url, model);
        Ok(sse_chunks(response).boxed())
    }
}

fn sse_chunks(response: reqwest::Response) -> impl Stream<Item = Result<Chunk>> + Send + 'static {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        while let Some(bytes) = body.next().await {
            for frame in decoder.feed(&bytes?)? {
                if let Frame::Chunk(chunk) = frame {
                    yield chunk;
                }
            }
            if decoder.is_done() {
                break;
            }
        }
        if let Some(Frame::Chunk(chunk)) = decoder.finish()? {
            yield chunk;
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockingClient {
    http: reqwest::blocking::Client,
    endpoint: Endpoint,
}

impl Connect for BlockingClient {
    fn connect(endpoint: &Endpoint) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .default_headers(default_headers(endpoint)?)
            .build()
            .map_err(|e| client_error(endpoint, e))?;
        Ok(BlockingClient {
            http,
            endpoint: endpoint.clone(),
        })
    }
}

impl BlockingClient {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<SseChunks<reqwest::blocking::Response>> {
        let url = self.endpoint.api_path(CHAT_COMPLETIONS);
        let mut request = self
            .http
            .post(&url)
            .json(&request_body(&self.endpoint, messages, model, options));
        let query = &self.endpoint.client_args.default_query;
        if !query.is_empty() {
            request = request.query(query);
        }
        if !self.endpoint.api_key.is_empty() {
            request = request.bearer_auth(&self.endpoint.api_key);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::provider(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }
        log::debug!("Opened stream {} for {}", url, model);
        Ok(SseChunks::new(response))
    }
}

/// Chunks decoded from a blocking `text/event-stream` body.
pub struct SseChunks<R> {
    reader: R,
    decoder: SseDecoder,
    pending: VecDeque<Chunk>,
    finished: bool,
}

impl<R: Read> SseChunks<R> {
    pub fn new(reader: R) -> Self {
        SseChunks {
            reader,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Ends the body, surfacing a trailing line or a deferred decode error.
    fn flush(&mut self) -> Option<Result<Chunk>> {
        self.finished = true;
        match self.decoder.finish() {
            Ok(Some(Frame::Chunk(chunk))) => Some(Ok(chunk)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<R: Read> Iterator for SseChunks<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            if self.finished {
                return None;
            }
            if self.decoder.is_done() {
                return self.flush();
            }
            match self.reader.read(&mut buf) {
                Ok(0) => return self.flush(),
                Ok(n) => match self.decoder.feed(&buf[..n]) {
                    Ok(frames) => {
                        for frame in frames {
                            if let Frame::Chunk(chunk) = frame {
                                self.pending.push_back(chunk);
                            }
                        }
                    }
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(Error::provider(e)));
                }
            }
        }
    }
}

fn on_close(phase: &'static str, provider: String, model: String) -> impl FnOnce() + Send + 'static {
    move || log::debug!("Closed {} stream {}/{}", phase, provider, model)
}

pub enum ReasonProvider<C> {
    /// Streams `reasoning_content` deltas and stops at the first answer delta.
    Deepseek { name: String, client: C },
    /// Hands back the provider's whole stream, answer deltas included.
    OpenAi { name: String, client: C },
    Disabled { name: String },
}

impl<C> ReasonProvider<C> {
    pub fn name(&self) -> &str {
        match self {
            ReasonProvider::Deepseek { name, .. }
            | ReasonProvider::OpenAi { name, .. }
            | ReasonProvider::Disabled { name } => name,
        }
    }
}

impl<C: Connect> ReasonProvider<C> {
    pub fn connect(config: &ReasonProviderConfig) -> Result<Self> {
        let name = config.name.clone();
        Ok(match &config.kind {
            ReasonProviderKind::Deepseek(endpoint) => ReasonProvider::Deepseek {
                name,
                client: C::connect(endpoint)?,
            },
            ReasonProviderKind::OpenAi(endpoint) => ReasonProvider::OpenAi {
                name,
                client: C::connect(endpoint)?,
            },
            ReasonProviderKind::Disabled => ReasonProvider::Disabled { name },
        })
    }
}

impl ReasonSource for ReasonProvider<BlockingClient> {
    fn reason_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<ChunkStream> {
        match self {
            ReasonProvider::Deepseek { name, client } => {
                let chunks = client.stream_chat(messages, model, options)?;
                Ok(ChunkStream::new(
                    chunks,
                    reasoning_transform(ReasoningBoundary),
                    on_close("reasoning", name.clone(), model.to_string()),
                ))
            }
            ReasonProvider::OpenAi { name, client } => {
                let chunks = client.stream_chat(messages, model, options)?;
                Ok(ChunkStream::new(
                    chunks,
                    response_transform(),
                    on_close("reasoning", name.clone(), model.to_string()),
                ))
            }
            ReasonProvider::Disabled { .. } => Ok(ChunkStream::empty()),
        }
    }
}

impl AsyncReasonSource for ReasonProvider<Client> {
    async fn reason_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<AsyncChunkStream> {
        match self {
            ReasonProvider::Deepseek { name, client } => {
                let chunks = client.stream_chat(messages, model, options).await?;
                Ok(AsyncChunkStream::new(
                    chunks,
                    reasoning_transform(ReasoningBoundary),
                    on_close("reasoning", name.clone(), model.to_string()),
                ))
            }
            ReasonProvider::OpenAi { name, client } => {
                let chunks = client.stream_chat(messages, model, options).await?;
                Ok(AsyncChunkStream::new(
                    chunks,
                    response_transform(),
                    on_close("reasoning", name.clone(), model.to_string()),
                ))
            }
            ReasonProvider::Disabled { .. } => Ok(AsyncChunkStream::empty()),
        }
    }
}

pub enum ResponseProvider<C> {
    OpenAi { name: String, client: C },
}

impl<C> ResponseProvider<C> {
    pub fn name(&self) -> &str {
        match self {
            ResponseProvider::OpenAi { name, .. } => name,
        }
    }
}

impl<C: Connect> ResponseProvider<C> {
    pub fn connect(config: &ResponseProviderConfig) -> Result<Self> {
        Ok(match &config.kind {
            ResponseProviderKind::OpenAi(endpoint) => ResponseProvider::OpenAi {
                name: config.name.clone(),
                client: C::connect(endpoint)?,
            },
        })
    }
}

impl ResponseSource for ResponseProvider<BlockingClient> {
    fn response_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<ChunkStream> {
        let ResponseProvider::OpenAi { name, client } = self;
        let chunks = client.stream_chat(messages, model, options)?;
        Ok(ChunkStream::new(
            chunks,
            response_transform(),
            on_close("response", name.clone(), model.to_string()),
        ))
    }
}

impl AsyncResponseSource for ResponseProvider<Client> {
    async fn response_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> Result<AsyncChunkStream> {
        let ResponseProvider::OpenAi { name, client } = self;
        let chunks = client.stream_chat(messages, model, options).await?;
        Ok(AsyncChunkStream::new(
            chunks,
            response_transform(),
            on_close("response", name.clone(), model.to_string()),
        ))
    }
}
