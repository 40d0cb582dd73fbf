//! Configuration loading and validation.
//!
//! Concierge reads `concierge.toml` (or the file named by `$CONCIERGE_CONFIG`).
//! A missing file yields defaults. Environment variables override file values
//! and file values override defaults.
//!
//! Secrets never live in the TOML file: each section names the environment
//! variable that holds its secret, resolved into [`Secrets`] at startup.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "CONCIERGE_CONFIG";

/// Default config file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "concierge.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Vector knowledge base settings.
    pub knowledge: KnowledgeConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// WhatsApp (Twilio) channel settings.
    pub whatsapp: WhatsAppConfig,
    /// Payment gateway settings.
    pub payments: PaymentsConfig,
    /// Business profile used in templated replies and the system prompt.
    pub business: BusinessConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:8080`.
    pub bind: String,
    /// Origins allowed to call the API from a browser. Empty allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
            cors_origins: Vec::new(),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    pub url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://concierge.db".to_owned(),
            max_connections: 5,
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Anthropic model identifier.
    pub model: String,
    /// Environment variable holding the Anthropic API key.
    pub api_key_env: String,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Number of stored conversation messages sent as history.
    pub history_messages: u32,
    /// Estimated token ceiling for the history sent per call.
    pub history_token_budget: u64,
    /// Maximum tool-use rounds before the model must answer in text.
    pub max_tool_rounds: u32,
    /// Daily token ceiling across all conversations.
    pub daily_token_limit: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_owned(),
            api_key_env: "ANTHROPIC_API_KEY".to_owned(),
            max_tokens: 1024,
            history_messages: 20,
            history_token_budget: 6_000,
            max_tool_rounds: 4,
            daily_token_limit: 2_000_000,
        }
    }
}

/// Vector knowledge base settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Index host URL. Retrieval is disabled when unset.
    pub index_host: Option<String>,
    /// Index namespace.
    pub namespace: String,
    /// Environment variable holding the index API key.
    pub api_key_env: String,
    /// Number of snippets to retrieve per question.
    pub top_k: u32,
    /// Minimum relevance score for a snippet to be used.
    pub min_score: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            index_host: None,
            namespace: "default".to_owned(),
            api_key_env: "PINECONE_API_KEY".to_owned(),
            top_k: 4,
            min_score: 0.3,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Maximum number of cached replies.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 500,
        }
    }
}

/// WhatsApp channel settings (Twilio).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Twilio account SID. Outbound WhatsApp is disabled when unset.
    pub account_sid: Option<String>,
    /// Environment variable holding the Twilio auth token.
    pub auth_token_env: String,
    /// Sender number in E.164 form, without the `whatsapp:` prefix.
    pub from_number: Option<String>,
    /// Environment variable holding the shared webhook token expected in
    /// the `token` query parameter. The check is skipped when unset.
    pub webhook_token_env: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token_env: "TWILIO_AUTH_TOKEN".to_owned(),
            from_number: None,
            webhook_token_env: "CONCIERGE_WHATSAPP_WEBHOOK_TOKEN".to_owned(),
        }
    }
}

/// Payment gateway settings (Midtrans).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Environment variable holding the gateway server key.
    pub server_key_env: String,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            server_key_env: "MIDTRANS_SERVER_KEY".to_owned(),
        }
    }
}

/// Business profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    /// Display name.
    pub name: String,
    /// Short description of what the business sells or offers.
    pub description: String,
    /// Human-readable opening hours.
    pub opening_hours: String,
    /// Street address.
    pub address: String,
    /// Contact phone number.
    pub phone: String,
    /// ISO currency code used when formatting amounts.
    pub currency: String,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            name: "Our Store".to_owned(),
            description: "a retail store and wellness clinic".to_owned(),
            opening_hours: "Monday to Saturday, 09:00 to 18:00".to_owned(),
            address: "Address not configured".to_owned(),
            phone: "Phone not configured".to_owned(),
            currency: "IDR".to_owned(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON log files.
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Load configuration: file (or defaults) then environment overrides.
    ///
    /// `explicit` takes precedence over `$CONCIERGE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => config_path_with(|key| std::env::var(key).ok()),
        };
        let mut config = Self::load_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed values.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides through a resolver function.
    ///
    /// Takes a resolver so tests can inject values without touching the
    /// process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("CONCIERGE_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("CONCIERGE_DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = env("CONCIERGE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env("CONCIERGE_KNOWLEDGE_HOST") {
            self.knowledge.index_host = Some(v);
        }
        if let Some(v) = env("CONCIERGE_TWILIO_ACCOUNT_SID") {
            self.whatsapp.account_sid = Some(v);
        }
        if let Some(v) = env("CONCIERGE_TWILIO_FROM") {
            self.whatsapp.from_number = Some(v);
        }
        if let Some(v) = env("CONCIERGE_LOG_DIR") {
            self.logging.dir = PathBuf::from(v);
        }
        if let Some(v) = env("CONCIERGE_CACHE_TTL_SECS") {
            match v.parse() {
                Ok(n) => self.cache.ttl_secs = n,
                Err(_) => tracing::warn!(
                    var = "CONCIERGE_CACHE_TTL_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value found.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid server.bind {:?}", self.server.bind))?;
        if self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be greater than zero");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be greater than zero");
        }
        if let Some(ref host) = self.knowledge.index_host {
            url::Url::parse(host)
                .with_context(|| format!("invalid knowledge.index_host {host:?}"))?;
        }
        if self.whatsapp.account_sid.is_some() && self.whatsapp.from_number.is_none() {
            anyhow::bail!("whatsapp.from_number is required when whatsapp.account_sid is set");
        }
        Ok(())
    }

    /// Resolve the secrets named by this configuration.
    pub fn resolve_secrets(&self, env: impl Fn(&str) -> Option<String>) -> Secrets {
        let mut vars = BTreeMap::new();
        for key in [
            self.llm.api_key_env.as_str(),
            self.knowledge.api_key_env.as_str(),
            self.whatsapp.auth_token_env.as_str(),
            self.whatsapp.webhook_token_env.as_str(),
            self.payments.server_key_env.as_str(),
        ] {
            if let Some(value) = env(key).filter(|v| !v.trim().is_empty()) {
                vars.insert(key.to_owned(), value);
            }
        }
        Secrets {
            anthropic_api_key: vars.get(&self.llm.api_key_env).cloned(),
            knowledge_api_key: vars.get(&self.knowledge.api_key_env).cloned(),
            twilio_auth_token: vars.get(&self.whatsapp.auth_token_env).cloned(),
            whatsapp_webhook_token: vars.get(&self.whatsapp.webhook_token_env).cloned(),
            payment_server_key: vars.get(&self.payments.server_key_env).cloned(),
        }
    }
}

/// Secret values resolved from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// Knowledge index API key.
    pub knowledge_api_key: Option<String>,
    /// Twilio auth token.
    pub twilio_auth_token: Option<String>,
    /// Shared token expected on the WhatsApp webhook.
    pub whatsapp_webhook_token: Option<String>,
    /// Payment gateway server key.
    pub payment_server_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("anthropic_api_key", &self.anthropic_api_key.is_some())
            .field("knowledge_api_key", &self.knowledge_api_key.is_some())
            .field("twilio_auth_token", &self.twilio_auth_token.is_some())
            .field(
                "whatsapp_webhook_token",
                &self.whatsapp_webhook_token.is_some(),
            )
            .field("payment_server_key", &self.payment_server_key.is_some())
            .finish()
    }
}

/// Resolve the config file path using a custom env resolver.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    env(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
