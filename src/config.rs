use crate::ratelimit::{FailurePolicy, RateLimit, parse_limits};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default SQLite location used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/smartdoc.db";
/// Default Gemini model, matching the hosted API's stable flash release.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-001";
/// Default Ollama model used when the Ollama provider is selected.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
/// Default number of characters of document text passed as generation context.
pub const DEFAULT_CONTEXT_MAX_CHARS: usize = 500;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable {key}: {reason}")]
    InvalidValue {
        /// Name of the offending variable.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Runtime configuration for the smartdoc server.
///
/// Built once at process start and handed to the components that need it; nothing reads the
/// environment after construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    /// Root directory of the blob area holding raw uploaded bytes.
    pub upload_dir: PathBuf,
    /// HTTP port to bind.
    pub server_port: u16,
    /// Origins allowed by the CORS layer.
    pub allowed_origins: Vec<String>,
    /// Secret used to sign and verify bearer tokens.
    pub token_secret: String,
    /// Lifetime of tokens minted by `issue-token`.
    pub token_ttl: Duration,
    /// Answer generation settings.
    pub generation: GenerationConfig,
    /// Upper bound on text extraction for a single upload.
    pub extraction_timeout: Duration,
    /// Number of leading characters of a document passed to the generator.
    pub context_max_chars: usize,
    /// Admission control settings.
    pub rate_limits: RateLimitConfig,
}

/// Supported answer generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationProvider {
    /// No provider; every answer is the configuration-error fallback.
    None,
    /// Google Gemini `generateContent` REST API.
    Gemini,
    /// Local Ollama runtime.
    Ollama,
}

/// Settings for the external generation capability.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Backend used to answer questions.
    pub provider: GenerationProvider,
    /// API key sent to hosted providers.
    pub api_key: Option<String>,
    /// Model identifier understood by the provider.
    pub model: String,
    /// Optional endpoint override (tests, proxies, self-hosted runtimes).
    pub base_url: Option<String>,
    /// Upper bound on a single generation call.
    pub timeout: Duration,
}

/// Settings for the rate admission controller.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Limits keyed by operation path (e.g. `/upload`).
    pub limits: HashMap<String, Vec<RateLimit>>,
    /// What to do when the counter store cannot be consulted.
    pub failure_policy: FailurePolicy,
}

impl RateLimitConfig {
    /// Limits configured for an operation, empty when the operation is unthrottled.
    pub fn limits_for(&self, operation: &str) -> &[RateLimit] {
        self.limits
            .get(operation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let generation = GenerationConfig::from_env()?;
        Ok(Self {
            database_url: load_env_optional("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            upload_dir: load_env_optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            server_port: parse_optional("SERVER_PORT")?.unwrap_or(8000),
            allowed_origins: load_env_optional("ALLOWED_ORIGINS")
                .unwrap_or_else(|| "http://localhost:9002".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            token_secret: load_env("TOKEN_SECRET")?,
            token_ttl: token_ttl()?,
            generation,
            extraction_timeout: Duration::from_secs(
                parse_optional("EXTRACTION_TIMEOUT_SECS")?.unwrap_or(30),
            ),
            context_max_chars: parse_optional("CONTEXT_MAX_CHARS")?
                .unwrap_or(DEFAULT_CONTEXT_MAX_CHARS),
            rate_limits: RateLimitConfig::from_env()?,
        })
    }
}

impl GenerationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_key = load_env_optional("GENERATION_API_KEY");
        let provider = match load_env_optional("GENERATION_PROVIDER") {
            Some(value) => value.parse::<GenerationProvider>().map_err(|()| ConfigError::InvalidValue {
                key: "GENERATION_PROVIDER".into(),
                reason: format!("unknown provider '{value}' (expected none, gemini or ollama)"),
            })?,
            None if api_key.is_some() => GenerationProvider::Gemini,
            None => GenerationProvider::None,
        };

        if provider == GenerationProvider::Gemini && api_key.is_none() {
            return Err(ConfigError::MissingVariable("GENERATION_API_KEY".into()));
        }

        let model = load_env_optional("GENERATION_MODEL").unwrap_or_else(|| match provider {
            GenerationProvider::Ollama => DEFAULT_OLLAMA_MODEL.to_string(),
            _ => DEFAULT_GEMINI_MODEL.to_string(),
        });

        Ok(Self {
            provider,
            api_key,
            model,
            base_url: load_env_optional("GENERATION_BASE_URL"),
            timeout: Duration::from_secs(parse_optional("GENERATION_TIMEOUT_SECS")?.unwrap_or(30)),
        })
    }
}

impl RateLimitConfig {
    fn from_env() -> Result<Self, ConfigError> {
        const OPERATIONS: [(&str, &str, &str); 4] = [
            ("/upload", "RATE_LIMIT_UPLOAD", "10/minute"),
            ("/ask", "RATE_LIMIT_ASK", "30/minute"),
            ("/history", "RATE_LIMIT_HISTORY", "60/minute"),
            ("/documents", "RATE_LIMIT_DOCUMENTS", "60/minute"),
        ];

        let mut limits = HashMap::new();
        for (operation, key, default) in OPERATIONS {
            let raw = load_env_optional(key).unwrap_or_else(|| default.to_string());
            let parsed = parse_limits(&raw).map_err(|error| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: error.to_string(),
            })?;
            limits.insert(operation.to_string(), parsed);
        }

        let failure_policy = match load_env_optional("RATE_LIMIT_FAILURE_POLICY") {
            Some(value) => value.parse::<FailurePolicy>().map_err(|()| ConfigError::InvalidValue {
                key: "RATE_LIMIT_FAILURE_POLICY".into(),
                reason: format!("expected 'open' or 'closed', got '{value}'"),
            })?,
            None => FailurePolicy::Closed,
        };

        Ok(Self {
            limits,
            failure_policy,
        })
    }
}

fn token_ttl() -> Result<Duration, ConfigError> {
    let minutes = parse_optional::<u64>("TOKEN_TTL_MINUTES")?.unwrap_or(30);
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "TOKEN_TTL_MINUTES".into(),
            reason: format!("{minutes} minutes is out of range"),
        })
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    load_env_optional(key)
        .map(|value| {
            value.trim().parse().map_err(|error: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: error.to_string(),
            })
        })
        .transpose()
}

impl std::str::FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "disabled" => Ok(Self::None),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Load `.env` (when present) and build the configuration.
pub fn load_config() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        database_url = %config.database_url,
        upload_dir = %config.upload_dir.display(),
        server_port = config.server_port,
        provider = ?config.generation.provider,
        model = %config.generation.model,
        failure_policy = ?config.rate_limits.failure_policy,
        "Loaded configuration"
    );
    Ok(config)
}
