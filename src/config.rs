//! TOML configuration parsing and validation.
//!
//! Every tunable has a serde default so a config file only needs the
//! sections it changes. Secrets (the completion API key and the admin
//! secret) are never read from the file directly unless `admin.secret` is
//! set explicitly; they are looked up in the environment under the names
//! the config gives.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::admin::{AdminMode, AuthPolicy};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub prompt: PromptSettings,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_character_limit")]
    pub character_limit: usize,
    /// Directory that receives a copy of every raw upload. Disabled when unset.
    #[serde(default)]
    pub uploads_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            path: default_store_path(),
            character_limit: default_character_limit(),
            uploads_dir: None,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/knowledge.json")
}
fn default_character_limit() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reads the API key from the configured environment variable.
    ///
    /// A missing or blank key is an error; callers treat it as fatal at startup.
    pub fn api_key(&self) -> Result<String> {
        let key = std::env::var(&self.api_key_env).unwrap_or_default();
        let key = key.trim();
        if key.is_empty() {
            bail!(
                "{} environment variable not set; the completion service cannot be reached",
                self.api_key_env
            );
        }
        Ok(key.to_string())
    }
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "meta-llama/llama-3.3-70b-instruct".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    150
}
fn default_temperature() -> f32 {
    0.1
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptSettings {
    #[serde(default = "default_fallback_phrase")]
    pub fallback_phrase: String,
    #[serde(default = "default_max_sentences")]
    pub max_sentences: u32,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            fallback_phrase: default_fallback_phrase(),
            max_sentences: default_max_sentences(),
        }
    }
}

fn default_fallback_phrase() -> String {
    "Information not available.".to_string()
}
fn default_max_sentences() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    #[serde(default)]
    pub mode: AdminMode,
    #[serde(default)]
    pub policy: AuthPolicy,
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// Literal secret. Takes precedence over `secret_env` when set.
    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            mode: AdminMode::default(),
            policy: AuthPolicy::default(),
            secret_env: default_secret_env(),
            secret: None,
        }
    }
}

impl AdminConfig {
    /// Resolves the shared secret (or trigger phrase) from config or environment.
    pub fn resolve_secret(&self) -> Result<String> {
        let secret = match &self.secret {
            Some(s) => s.clone(),
            None => std::env::var(&self.secret_env).with_context(|| {
                format!(
                    "admin secret not configured: set admin.secret or the {} environment variable",
                    self.secret_env
                )
            })?,
        };
        if secret.is_empty() {
            bail!("admin secret must not be empty");
        }
        Ok(secret)
    }
}

fn default_secret_env() -> String {
    "DOCQA_ADMIN_SECRET".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConversationConfig {
    /// JSON Lines file mirroring the conversation log. In-memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.store.character_limit == 0 {
        bail!("store.character_limit must be > 0");
    }

    if config.completion.max_tokens == 0 {
        bail!("completion.max_tokens must be > 0");
    }

    if !(0.0..=2.0).contains(&config.completion.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }

    if config.completion.timeout_secs == 0 {
        bail!("completion.timeout_secs must be > 0");
    }

    if config.completion.model.trim().is_empty() {
        bail!("completion.model must not be empty");
    }

    if config.prompt.fallback_phrase.trim().is_empty() {
        bail!("prompt.fallback_phrase must not be empty");
    }

    if config.prompt.max_sentences == 0 {
        bail!("prompt.max_sentences must be > 0");
    }

    if matches!(config.admin.secret.as_deref(), Some("")) {
        bail!("admin.secret must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.store.character_limit, 4000);
        assert_eq!(config.store.backend, BackendKind::File);
        assert_eq!(config.completion.max_tokens, 150);
        assert_eq!(config.completion.timeout_secs, 30);
        assert_eq!(config.prompt.fallback_phrase, "Information not available.");
        assert_eq!(config.admin.mode, AdminMode::Password);
        assert_eq!(config.admin.policy, AuthPolicy::LatchForSession);
    }

    #[test]
    fn parses_all_sections() {
        let config: Config = toml::from_str(
            r#"
[store]
backend = "sqlite"
path = "/tmp/kb.sqlite"
character_limit = 4500

[completion]
model = "some/model"
max_tokens = 80
temperature = 0.0

[admin]
mode = "trigger_phrase"
policy = "reauth"
secret = "open sesame"
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.store.backend, BackendKind::Sqlite);
        assert_eq!(config.store.character_limit, 4500);
        assert_eq!(config.completion.model, "some/model");
        assert_eq!(config.admin.mode, AdminMode::TriggerPhrase);
        assert_eq!(config.admin.policy, AuthPolicy::ReAuthEveryMutation);
        assert_eq!(config.admin.resolve_secret().unwrap(), "open sesame");
    }

    #[test]
    fn rejects_zero_character_limit() {
        let config: Config = toml::from_str("[store]\ncharacter_limit = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let config: Config = toml::from_str("[completion]\ntemperature = 3.5\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_empty_literal_secret() {
        let config: Config = toml::from_str("[admin]\nsecret = \"\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let completion = CompletionConfig {
            api_key_env: "DOCQA_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        let err = completion.api_key().unwrap_err();
        assert!(err.to_string().contains("DOCQA_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
