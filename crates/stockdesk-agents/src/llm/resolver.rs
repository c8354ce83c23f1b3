use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stockdesk_models::{ProviderConfig, ProviderKind};
use tracing::{info, warn};

use super::{AnthropicModel, ChatModel, OllamaModel, OpenAiModel};
use crate::env::Env;
use crate::error::AgentError;

/// Builds one backend from its config. Construction fails on missing
/// credentials or an unreachable local service.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn build(
        &self,
        config: &ProviderConfig,
        env: &dyn Env,
    ) -> Result<Arc<dyn ChatModel>, AgentError>;
}

/// Factory for the real HTTP backends, sharing one client.
pub struct HttpProviderFactory {
    client: reqwest::Client,
}

impl HttpProviderFactory {
    pub fn new(request_timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AgentError::model("http", format!("failed to build client: {e}")))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Environment variable that holds the key for a hosted backend.
pub fn api_key_var(config: &ProviderConfig) -> Option<String> {
    config.api_key_env.clone().or_else(|| match config.kind {
        ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY".to_string()),
        ProviderKind::OpenAi => Some("OPENAI_API_KEY".to_string()),
        ProviderKind::Ollama => None,
    })
}

/// Explicit endpoint, then the configured override variable.
pub fn base_url(config: &ProviderConfig, env: &dyn Env) -> Option<String> {
    config.base_url.clone().or_else(|| {
        config
            .base_url_env
            .as_deref()
            .and_then(|var| env.non_empty(var))
    })
}

fn require_key(config: &ProviderConfig, env: &dyn Env) -> Result<String, AgentError> {
    let var = api_key_var(config).unwrap_or_default();
    env.non_empty(&var)
        .ok_or_else(|| AgentError::model(config.kind.as_str(), format!("{var} not set")))
}

#[async_trait]
impl ProviderFactory for HttpProviderFactory {
    async fn build(
        &self,
        config: &ProviderConfig,
        env: &dyn Env,
    ) -> Result<Arc<dyn ChatModel>, AgentError> {
        let url = base_url(config, env);
        match config.kind {
            ProviderKind::Anthropic => {
                let key = require_key(config, env)?;
                Ok(Arc::new(AnthropicModel::new(
                    self.client.clone(),
                    key,
                    &config.model,
                    url,
                )))
            }
            ProviderKind::OpenAi => {
                let key = require_key(config, env)?;
                Ok(Arc::new(OpenAiModel::new(self.client.clone(), key, &config.model, url)))
            }
            ProviderKind::Ollama => {
                let model = OllamaModel::new(self.client.clone(), &config.model, url);
                model.probe().await?;
                Ok(Arc::new(model))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Selected,
    Failed(String),
}

/// What happened to one candidate during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub kind: ProviderKind,
    pub model: String,
    pub outcome: AttemptOutcome,
}

impl std::fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            AttemptOutcome::Selected => write!(f, "{}:{} (selected)", self.kind, self.model),
            AttemptOutcome::Failed(reason) => write!(f, "{}:{} ({reason})", self.kind, self.model),
        }
    }
}

/// The chosen backend plus a record of every candidate tried.
pub struct Resolution {
    pub model: Arc<dyn ChatModel>,
    pub attempts: Vec<ProviderAttempt>,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("model", &self.model.info())
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Try `candidates` strictly in order and return the first backend that
/// builds. Each failure is logged and recorded; nothing is retried.
pub async fn resolve(
    candidates: &[ProviderConfig],
    factory: &dyn ProviderFactory,
    env: &dyn Env,
) -> Result<Resolution, AgentError> {
    let mut attempts = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        info!(provider = %candidate.kind, model = %candidate.model, "Initializing model provider");
        match factory.build(candidate, env).await {
            Ok(model) => {
                attempts.push(ProviderAttempt {
                    kind: candidate.kind,
                    model: candidate.model.clone(),
                    outcome: AttemptOutcome::Selected,
                });
                info!(provider = %candidate.kind, model = %candidate.model, "Model provider ready");
                return Ok(Resolution { model, attempts });
            }
            Err(e) => {
                warn!(provider = %candidate.kind, model = %candidate.model, error = %e, "Model provider failed");
                attempts.push(ProviderAttempt {
                    kind: candidate.kind,
                    model: candidate.model.clone(),
                    outcome: AttemptOutcome::Failed(e.to_string()),
                });
            }
        }
    }

    let tried = if attempts.is_empty() {
        "no candidates configured".to_string()
    } else {
        attempts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    };
    Err(AgentError::NoProvider(tried))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Succeeds only for the listed kinds; records build order.
    struct FakeFactory {
        available: Vec<ProviderKind>,
        calls: Mutex<Vec<ProviderKind>>,
    }

    impl FakeFactory {
        fn new(available: Vec<ProviderKind>) -> Self {
            Self {
                available,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderFactory for FakeFactory {
        async fn build(
            &self,
            config: &ProviderConfig,
            _env: &dyn Env,
        ) -> Result<Arc<dyn ChatModel>, AgentError> {
            self.calls.lock().unwrap().push(config.kind);
            if self.available.contains(&config.kind) {
                Ok(Arc::new(ScriptedModel::named(config.kind.as_str(), &config.model)))
            } else {
                Err(AgentError::model(config.kind.as_str(), "unavailable"))
            }
        }
    }

    fn chain() -> Vec<ProviderConfig> {
        stockdesk_models::DeskConfig::default().providers
    }

    #[tokio::test]
    async fn first_buildable_candidate_wins() {
        let factory = FakeFactory::new(vec![ProviderKind::Ollama, ProviderKind::OpenAi]);
        let resolution = resolve(&chain(), &factory, &BTreeMap::new()).await.unwrap();

        assert_eq!(resolution.model.info().provider, "ollama");
        assert_eq!(
            *factory.calls.lock().unwrap(),
            vec![ProviderKind::Anthropic, ProviderKind::Ollama]
        );
        assert_eq!(resolution.attempts.len(), 2);
        assert!(matches!(resolution.attempts[0].outcome, AttemptOutcome::Failed(_)));
        assert_eq!(resolution.attempts[1].outcome, AttemptOutcome::Selected);
    }

    #[tokio::test]
    async fn all_failures_yield_no_provider() {
        let factory = FakeFactory::new(vec![]);
        let err = resolve(&chain(), &factory, &BTreeMap::new()).await.unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("No LLM provider available"));
        assert!(message.contains("anthropic:claude-3-haiku-20240307 (Model error (anthropic): unavailable)"));
        assert_eq!(factory.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_chain_is_no_provider() {
        let factory = FakeFactory::new(vec![ProviderKind::Ollama]);
        let err = resolve(&[], &factory, &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::NoProvider(msg) if msg == "no candidates configured"));
    }

    #[tokio::test]
    async fn hosted_backends_need_their_key() {
        let factory = HttpProviderFactory::new(Duration::from_secs(5)).unwrap();
        let chain = chain();
        let anthropic = &chain[0];

        let err = factory.build(anthropic, &BTreeMap::new()).await.err().unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY not set"));

        let mut env = BTreeMap::new();
        env.insert("ANTHROPIC_API_KEY".to_string(), "sk-ant-test".to_string());
        let model = factory.build(anthropic, &env).await.unwrap();
        assert_eq!(model.info().model, "claude-3-haiku-20240307");
    }

    #[tokio::test]
    async fn unreachable_ollama_fails_to_build() {
        let factory = HttpProviderFactory::new(Duration::from_secs(5)).unwrap();
        let mut config = chain()[1].clone();
        config.base_url = Some("http://127.0.0.1:9".to_string());

        assert!(factory.build(&config, &BTreeMap::new()).await.is_err());
    }

    #[test]
    fn base_url_prefers_explicit_value() {
        let mut env = BTreeMap::new();
        env.insert("OLLAMA_BASE_URL".to_string(), "http://env-host:11434".to_string());
        let mut config = chain()[1].clone();

        assert_eq!(base_url(&config, &env).as_deref(), Some("http://env-host:11434"));
        config.base_url = Some("http://pinned:11434".to_string());
        assert_eq!(base_url(&config, &env).as_deref(), Some("http://pinned:11434"));
    }
}
