#![allow(dead_code)]

use actix_web::http::StatusCode;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What the mock answers for one upstream model id.
#[derive(Clone)]
pub enum Script {
    Frames(Vec<String>),
    Status(u16, String),
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub authorization: Option<String>,
    pub headers: HashMap<String, String>,
    pub query: String,
    pub body: Value,
}

struct MockState {
    scripts: HashMap<String, Script>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// An OpenAI-compatible provider on an ephemeral port, running on its own
/// thread and actix system so blocking clients can call it too.
pub struct MockProvider {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockProvider {
    pub fn start(scripts: Vec<(&str, Script)>) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = web::Data::new(MockState {
            scripts: scripts
                .into_iter()
                .map(|(model, script)| (model.to_string(), script))
                .collect(),
            requests: requests.clone(),
        });
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            actix_web::rt::System::new().block_on(async move {
                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(state.clone())
                        .route("/v1/chat/completions", web::post().to(chat))
                })
                .workers(1)
                .disable_signals()
                .bind(("127.0.0.1", 0))
                .unwrap();
                let port = server.addrs()[0].port();
                let server = server.run();
                tx.send(port).unwrap();
                server.await.unwrap();
            })
        });
        let port = rx.recv().unwrap();
        MockProvider {
            base_url: format!("http://127.0.0.1:{}/v1", port),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, model: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.body["model"] == model)
            .collect()
    }
}

async fn chat(req: HttpRequest, body: web::Json<Value>, state: web::Data<MockState>) -> HttpResponse {
    let body = body.into_inner();
    let authorization = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    state.requests.lock().unwrap().push(Recorded {
        authorization,
        headers,
        query: req.query_string().to_string(),
        body: body.clone(),
    });
    let model = body["model"].as_str().unwrap_or_default();
    match state.scripts.get(model) {
        Some(Script::Frames(frames)) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .body(frames.concat()),
        Some(Script::Status(code, message)) => {
            HttpResponse::build(StatusCode::from_u16(*code).unwrap()).body(message.clone())
        }
        None => HttpResponse::NotFound().body(format!("no such model {}", model)),
    }
}

pub const DONE: &str = "data: [DONE]\n\n";

fn frame(value: Value) -> String {
    format!("data: {}\n\n", value)
}

pub fn chunk_frame(id: &str, created: i64, model: &str, delta: Value) -> String {
    frame(json!({
        "id": id, "object": "chat.completion.chunk", "created": created, "model": model,
        "choices": [{"index": 0, "delta": delta, "finish_reason": null}]
    }))
}

pub fn reasoning_frame(id: &str, model: &str, text: &str) -> String {
    frame(json!({
        "id": id, "object": "chat.completion.chunk", "created": 100, "model": model,
        "choices": [{"index": 0, "delta": {"role": "assistant", "content": "", "reasoning_content": text}, "finish_reason": null}]
    }))
}

pub fn content_frame(id: &str, model: &str, text: &str) -> String {
    frame(json!({
        "id": id, "object": "chat.completion.chunk", "created": 200, "model": model,
        "choices": [{"index": 0, "delta": {"content": text, "reasoning_content": null}, "finish_reason": null}]
    }))
}

pub fn finish_frame(id: &str, model: &str, prompt: u64, completion: u64) -> String {
    frame(json!({
        "id": id, "object": "chat.completion.chunk", "created": 200, "model": model,
        "choices": [{"index": 0, "delta": {"content": ""}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": prompt, "completion_tokens": completion, "total_tokens": prompt + completion}
    }))
}

/// A DeepSeek-style reasoner: reasoning deltas, then the answer it would have
/// given itself, which must never reach the caller.
pub fn deepseek_script(model: &str, reasoning: &[&str]) -> Script {
    let mut frames: Vec<String> = reasoning
        .iter()
        .map(|text| reasoning_frame("r-1", model, text))
        .collect();
    frames.push(": keep-alive\n\n".to_string());
    frames.push(content_frame("r-1", model, "SECRET"));
    frames.push(content_frame("r-1", model, "ANSWER"));
    frames.push(DONE.to_string());
    Script::Frames(frames)
}

pub fn answer_script(model: &str, answer: &[&str]) -> Script {
    let mut frames: Vec<String> = answer
        .iter()
        .map(|text| content_frame("s-1", model, text))
        .collect();
    frames.push(finish_frame("s-1", model, 12, 3));
    frames.push(DONE.to_string());
    Script::Frames(frames)
}

pub fn config_json(reasoner: &MockProvider, responder: &MockProvider, api_keys: &[&str]) -> String {
    json!({
        "model_owner": "tests",
        "api_keys": api_keys,
        "reason_providers": [
            {"name": "deepseek", "type": "deepseek", "base_url": reasoner.base_url, "api_key": "reason-key", "timeout_secs": 30},
            {"name": "off", "type": "none"}
        ],
        "response_providers": [
            {"name": "local", "type": "openai", "base_url": responder.base_url, "timeout_secs": 30}
        ],
        "models": [
            {"name": "R1-local", "reason_provider": "deepseek", "reason_model": "deepseek-reasoner",
             "response_provider": "local", "response_model": "answer-model", "created": 1700000000},
            {"name": "plain", "reason_provider": "off", "reason_model": "unused",
             "response_provider": "local", "response_model": "answer-model",
             "injection_template": "[reasoning]{}[/reasoning]"}
        ]
    })
    .to_string()
}
