use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::provider::{BlockingClient, Client, Connect, ReasonProvider, ResponseProvider};
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;

pub const PLACEHOLDER: &str = "{}";
pub const DEFAULT_TEMPLATE: &str = "<Think>{}</Think>";

/// A caller-facing model: which reasoning and response models serve it, and
/// how the reasoning is embedded into the second prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBinding {
    pub name: String,
    pub reason_provider: String,
    pub reason_model: String,
    pub response_provider: String,
    pub response_model: String,
    pub injection_template: String,
    pub created: i64,
}

impl ModelBinding {
    pub fn new(
        name: impl Into<String>,
        reason_provider: impl Into<String>,
        reason_model: impl Into<String>,
        response_provider: impl Into<String>,
        response_model: impl Into<String>,
    ) -> Self {
        ModelBinding {
            name: name.into(),
            reason_provider: reason_provider.into(),
            reason_model: reason_model.into(),
            response_provider: response_provider.into(),
            response_model: response_model.into(),
            injection_template: DEFAULT_TEMPLATE.to_string(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.injection_template = template.into();
        self
    }

    pub fn with_created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    /// Substitutes the reasoning text into the template's single placeholder.
    /// The inserted text is never re-scanned.
    pub fn inject(&self, reasoning: &str) -> String {
        self.injection_template.replacen(PLACEHOLDER, reasoning, 1)
    }

    pub fn validate(&self) -> Result<()> {
        let placeholders = self.injection_template.matches(PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(Error::configuration(format!(
                "injection template of model '{}' must contain exactly one '{}', found {}",
                self.name, PLACEHOLDER, placeholders
            )));
        }
        Ok(())
    }

    pub fn to_json(&self, owned_by: &str) -> Value {
        json!({
            "id": self.name,
            "object": "model",
            "created": self.created,
            "owned_by": owned_by,
        })
    }
}

/// Display name -> binding, provider name -> provider.
pub struct Registry<R, S> {
    reasoners: DashMap<String, Arc<R>>,
    responders: DashMap<String, Arc<S>>,
    models: DashMap<String, Arc<ModelBinding>>,
}

pub type HttpRegistry = Registry<ReasonProvider<Client>, ResponseProvider<Client>>;
pub type BlockingRegistry = Registry<ReasonProvider<BlockingClient>, ResponseProvider<BlockingClient>>;

impl<R, S> Default for Registry<R, S> {
    fn default() -> Self {
        Registry {
            reasoners: DashMap::new(),
            responders: DashMap::new(),
            models: DashMap::new(),
        }
    }
}

impl<R, S> Registry<R, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reasoner(&self, name: impl Into<String>, reasoner: R) -> Result<()> {
        let name = name.into();
        if self.reasoners.contains_key(&name) {
            return Err(Error::configuration(format!(
                "duplicate reason provider '{}'",
                name
            )));
        }
        self.reasoners.insert(name, Arc::new(reasoner));
        Ok(())
    }

    pub fn add_responder(&self, name: impl Into<String>, responder: S) -> Result<()> {
        let name = name.into();
        if self.responders.contains_key(&name) {
            return Err(Error::configuration(format!(
                "duplicate response provider '{}'",
                name
            )));
        }
        self.responders.insert(name, Arc::new(responder));
        Ok(())
    }

    /// Providers must be registered before the models that reference them.
    pub fn add_model(&self, binding: ModelBinding) -> Result<()> {
        binding.validate()?;
        if !self.reasoners.contains_key(&binding.reason_provider) {
            return Err(Error::configuration(format!(
                "model '{}' references unknown reason provider '{}'",
                binding.name, binding.reason_provider
            )));
        }
        if !self.responders.contains_key(&binding.response_provider) {
            return Err(Error::configuration(format!(
                "model '{}' references unknown response provider '{}'",
                binding.name, binding.response_provider
            )));
        }
        if self.models.contains_key(&binding.name) {
            return Err(Error::configuration(format!(
                "duplicate model '{}'",
                binding.name
            )));
        }
        self.models
            .insert(binding.name.clone(), Arc::new(binding));
        Ok(())
    }

    pub fn binding(&self, name: &str) -> Result<Arc<ModelBinding>> {
        self.models
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownModel {
                name: name.to_string(),
            })
    }

    pub fn models(&self) -> Vec<Arc<ModelBinding>> {
        let mut models: Vec<_> = self.models.iter().map(|e| e.value().clone()).collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    pub fn resolve(&self, name: &str) -> Result<Orchestrator<R, S>> {
        let binding = self.binding(name)?;
        let reasoner = self
            .reasoners
            .get(&binding.reason_provider)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                Error::configuration(format!(
                    "unknown reason provider '{}'",
                    binding.reason_provider
                ))
            })?;
        let responder = self
            .responders
            .get(&binding.response_provider)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                Error::configuration(format!(
                    "unknown response provider '{}'",
                    binding.response_provider
                ))
            })?;
        Ok(Orchestrator::new(reasoner, responder, binding))
    }
}

impl<C: Connect> Registry<ReasonProvider<C>, ResponseProvider<C>> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Self::new();
        for provider in &config.reason_providers {
            registry.add_reasoner(&provider.name, ReasonProvider::connect(provider)?)?;
        }
        for provider in &config.response_providers {
            registry.add_responder(&provider.name, ResponseProvider::connect(provider)?)?;
        }
        for model in &config.models {
            registry.add_model(model.to_binding())?;
        }
        log::info!(
            "Loaded {} models, {} reason providers, {} response providers",
            registry.models.len(),
            registry.reasoners.len(),
            registry.responders.len()
        );
        Ok(registry)
    }
}
