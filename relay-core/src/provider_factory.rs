use std::path::PathBuf;
use std::{collections::HashMap, sync::Arc};

use secrecy::SecretString;
use tracing::debug;

use crate::classifier::ContentErrorClassifier;
use crate::config::{Config, GenerationCfg, ProviderCfg};
use crate::engine::Engine;
use crate::error::{CoreResult, RelayError};
use crate::http_client::{HttpClient, Transport};
use crate::model::ModelSpec;
use crate::provider::{Backend, ChatProvider, NullProvider};
use crate::providers::SystemPrompt;
use crate::providers::openai::OpenAi;
use crate::providers::xai::Xai;
use crate::request_builder::GenerationOptions;
use crate::retry::RetryPolicy;
use crate::telemetry::{EngineObserver, ObserverSet, RequestLogObserver, TracingObserver};
use crate::tracker::{self, RequestStateTracker};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_XAI_MODEL: &str = "grok-4";

/// Pieces every engine built from one config shares.
struct EngineParts {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    classifier: ContentErrorClassifier,
    options: GenerationOptions,
    observer: Arc<dyn EngineObserver>,
    tracker: Option<Arc<RequestStateTracker>>,
}

impl EngineParts {
    fn from_config(cfg: &Config) -> CoreResult<Self> {
        let classifier = match &cfg.content_errors.phrases {
            Some(phrases) => ContentErrorClassifier::new(phrases),
            None => ContentErrorClassifier::default(),
        };
        let mut observers = ObserverSet::new().with(Arc::new(TracingObserver));
        if let Some(dir) = &cfg.logging.request_log_dir {
            observers = observers.with(Arc::new(RequestLogObserver::new(dir)));
        }
        Ok(Self {
            transport: Arc::new(HttpClient::from_config(&cfg.http)?),
            policy: RetryPolicy::from_config(&cfg.retry),
            classifier,
            options: generation_options(&cfg.generation),
            observer: Arc::new(observers),
            tracker: cfg.tracker.mirror_global.then(tracker::global),
        })
    }

    fn engine<B: Backend>(&self, backend: B) -> Arc<dyn ChatProvider> {
        Arc::new(
            Engine::builder(backend, self.transport.clone())
                .policy(self.policy.clone())
                .classifier(self.classifier.clone())
                .options(self.options.clone())
                .observer(self.observer.clone())
                .tracker(self.tracker.clone())
                .build(),
        )
    }
}

/// Registry of chat providers by name ("openai", "xai", "null").
pub struct ProviderRegistry {
    chat: HashMap<String, Arc<dyn ChatProvider>>,
    default: String,
}

impl ProviderRegistry {
    /// Build from configuration, reading API keys from the process environment.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Self::from_config_with(cfg, |name| std::env::var(name).ok())
    }

    /// Build from configuration with an explicit key lookup. A provider is
    /// registered only when its configured key variable resolves to a non-empty value.
    pub fn from_config_with<F>(cfg: &Config, lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parts = EngineParts::from_config(cfg)?;
        let mut chat: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();

        // Always provide a fallback null provider
        chat.insert("null".into(), Arc::new(NullProvider::default()));

        if let Some(pc) = &cfg.providers.openai
            && let Some(key) = api_key(pc, &lookup)
        {
            let model = model_for(pc, DEFAULT_OPENAI_MODEL);
            let backend = OpenAi::new(model, key, pc.base_url.clone()).with_org(pc.organization.clone());
            chat.insert("openai".into(), parts.engine(backend));
        }

        if let Some(pc) = &cfg.providers.xai
            && let Some(key) = api_key(pc, &lookup)
        {
            let model = model_for(pc, DEFAULT_XAI_MODEL);
            let backend = Xai::new(model, key, pc.base_url.clone())
                .with_system_prompt(SystemPrompt::new(None, pc.system_prompt_file.as_ref().map(PathBuf::from)));
            chat.insert("xai".into(), parts.engine(backend));
        }

        let default = match &cfg.default_provider {
            Some(name) if chat.contains_key(name) => name.clone(),
            Some(name) => {
                return Err(RelayError::Validation(format!(
                    "default_provider {name} is not configured or has no API key"
                )));
            }
            None => ["xai", "openai"]
                .into_iter()
                .find(|n| chat.contains_key(*n))
                .unwrap_or("null")
                .to_string(),
        };
        debug!(providers = chat.len(), default = %default, "provider registry built");

        Ok(Self { chat, default })
    }

    /// Get a chat provider by name.
    pub fn chat(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.chat.get(name).cloned()
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn default_chat(&self) -> Arc<dyn ChatProvider> {
        self.chat
            .get(&self.default)
            .cloned()
            .unwrap_or_else(|| Arc::new(NullProvider::default()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.chat.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn api_key<F: Fn(&str) -> Option<String>>(pc: &ProviderCfg, lookup: &F) -> Option<SecretString> {
    match lookup(&pc.api_key_env) {
        Some(v) if !v.trim().is_empty() => Some(SecretString::from(v)),
        _ => {
            debug!(env = %pc.api_key_env, "api key not set, provider skipped");
            None
        }
    }
}

fn generation_options(g: &GenerationCfg) -> GenerationOptions {
    GenerationOptions {
        max_tokens: g.max_tokens,
        temperature: g.temperature,
        top_p: g.top_p,
        stop: g.stop.clone(),
        frequency_penalty: g.frequency_penalty,
        presence_penalty: g.presence_penalty,
        reasoning_effort: g.reasoning_effort.clone(),
    }
}

fn model_for(pc: &ProviderCfg, fallback: &str) -> ModelSpec {
    ModelSpec::builtin(pc.model.as_deref().unwrap_or(fallback))
}
