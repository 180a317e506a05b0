use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::errors::ConfigError;
use crate::models::catalog::{ModelCatalog, ModelSpec};
use crate::store::{ConversationStore, MissingFilePolicy};

pub const DEFAULT_HOST: &str = "https://api.anthropic.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes
pub const ENV_PREFIX: &str = "PARLEY";

/// Immutable client settings, produced by [`ClientConfigBuilder`]
#[derive(Clone)]
pub struct ClientConfig {
    api_key: String,
    host: String,
    model: &'static ModelSpec,
    catalog: ModelCatalog,
    timeout: Duration,
    store: Option<ConversationStore>,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn model(&self) -> &'static ModelSpec {
        self.model
    }

    pub fn catalog(&self) -> ModelCatalog {
        self.catalog
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn store(&self) -> Option<&ConversationStore> {
        self.store.as_ref()
    }
}

// The API key stays out of logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("host", &self.host)
            .field("model", &self.model.name)
            .field("timeout", &self.timeout)
            .field("store", &self.store)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    api_key: Option<String>,
    host: Option<String>,
    model: Option<String>,
    catalog: Option<ModelCatalog>,
    timeout: Option<Duration>,
    conversation_file: Option<PathBuf>,
    missing_file: MissingFilePolicy,
}

impl ClientConfigBuilder {
    pub fn api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Model alias (e.g. `haiku`) or full model name
    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Persist the conversation to this file after every accepted reply
    pub fn conversation_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.conversation_file = Some(path.into());
        self
    }

    pub fn missing_file_policy(mut self, policy: MissingFilePolicy) -> Self {
        self.missing_file = policy;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let catalog = self.catalog.unwrap_or_default();
        let model_name = self
            .model
            .filter(|model| !model.trim().is_empty())
            .ok_or(ConfigError::MissingModel)?;
        let model = catalog
            .resolve(&model_name)
            .ok_or(ConfigError::UnknownModel(model_name))?;

        let host = self
            .host
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
            .trim_end_matches('/')
            .to_string();

        let store = self
            .conversation_file
            .map(|path| ConversationStore::new(path).with_missing_file_policy(self.missing_file));

        Ok(ClientConfig {
            api_key,
            host,
            model,
            catalog,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            store,
        })
    }
}

/// Settings read from `PARLEY_*` environment variables
#[derive(Debug, Deserialize)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub conversation_file: Option<PathBuf>,
    #[serde(default)]
    pub missing_file: MissingFilePolicy,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Settings>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `api_key`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Settings(err))
                }
            }
        }
    }

    pub fn into_builder(self) -> ClientConfigBuilder {
        let builder = ClientConfig::builder()
            .api_key(self.api_key)
            .model(self.model)
            .host(self.host)
            .timeout(Duration::from_secs(self.timeout_secs))
            .missing_file_policy(self.missing_file);
        match self.conversation_file {
            Some(path) => builder.conversation_file(path),
            None => builder,
        }
    }
}

fn to_env_var(field: &str) -> String {
    format!("{}_{}", ENV_PREFIX, field.to_uppercase())
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}
