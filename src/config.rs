use crate::registry::{DEFAULT_TEMPLATE, ModelBinding};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model_owner() -> String {
    "reason-relay".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_model_owner")]
    pub model_owner: String,
    /// Accepted bearer tokens for the chat endpoint. Empty disables auth.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default, alias = "reason_clients")]
    pub reason_providers: Vec<ReasonProviderConfig>,
    #[serde(default, alias = "response_clients")]
    pub response_providers: Vec<ResponseProviderConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Connection settings shared by every HTTP-backed provider.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Endpoint {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ask the upstream for a trailing usage chunk (`stream_options`).
    #[serde(default)]
    pub include_usage: bool,
    #[serde(default, alias = "extract_args")]
    pub client_args: ClientArgs,
}

/// Extra per-provider client settings sent with every upstream request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ClientArgs {
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub default_query: BTreeMap<String, String>,
    /// Keys this relay does not act on; logged and otherwise ignored.
    #[serde(flatten)]
    pub unused: BTreeMap<String, Value>,
}

impl ClientArgs {
    /// Every header the client sends by default, organization and project
    /// included.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();
        if let Some(organization) = &self.organization {
            headers.push(("OpenAI-Organization".to_string(), organization.clone()));
        }
        if let Some(project) = &self.project {
            headers.push(("OpenAI-Project".to_string(), project.clone()));
        }
        headers.extend(
            self.default_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        headers
    }
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Endpoint {
            base_url: base_url.into(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            include_usage: false,
            client_args: ClientArgs::default(),
        }
    }

    pub fn api_path(&self, api_path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if api_path.starts_with('/') {
            format!("{}{}", base, api_path)
        } else {
            format!("{}/{}", base, api_path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReasonProviderKind {
    Deepseek(Endpoint),
    /// Any OpenAI-compatible model; its whole output forms the reasoning phase.
    #[serde(rename = "openai")]
    OpenAi(Endpoint),
    /// No reasoning phase; the response model answers the original messages.
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReasonProviderConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ReasonProviderKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseProviderKind {
    #[serde(rename = "openai")]
    OpenAi(Endpoint),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResponseProviderConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ResponseProviderKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(alias = "reason_client")]
    pub reason_provider: String,
    pub reason_model: String,
    #[serde(alias = "response_client")]
    pub response_provider: String,
    pub response_model: String,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default = "default_template", alias = "reason_prompt")]
    pub injection_template: String,
}

impl ModelConfig {
    pub fn to_binding(&self) -> ModelBinding {
        let binding = ModelBinding::new(
            &self.name,
            &self.reason_provider,
            &self.reason_model,
            &self.response_provider,
            &self.response_model,
        )
        .with_template(&self.injection_template);
        match self.created {
            Some(created) => binding.with_created(created),
            None => binding,
        }
    }
}
