//! Configuration types.
//!
//! Everything is read once at startup into explicit values that are handed
//! to constructors. Nothing reads the environment after that.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::EmailConfig;
use crate::channels::email::normalize_sender;
use crate::error::ConfigError;
use crate::llm::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, ImageConfig, LlmConfig};
use crate::pipeline::PipelineSettings;

/// Catalog file name under the root.
pub const CATALOG_FILE: &str = "topics.json";

/// Output tree directory under the root.
pub const DOCS_DIR: &str = "docs";

/// Filesystem layout rooted at the published repository.
#[derive(Debug, Clone)]
pub struct PressPaths {
    pub root: PathBuf,
}

impl PressPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn catalog(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    pub fn docs(&self) -> PathBuf {
        self.root.join(DOCS_DIR)
    }
}

/// Cycle controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// The only sender whose mail is processed.
    pub allowed_sender: String,
    /// Period of the mail poll.
    pub poll_interval: Duration,
    /// Period of autonomous advance; `None` disables it.
    pub auto_interval: Option<Duration>,
}

impl ControllerConfig {
    pub fn new(allowed_sender: &str) -> Self {
        Self {
            allowed_sender: normalize_sender(allowed_sender),
            poll_interval: Duration::from_secs(30),
            auto_interval: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// Publish settings.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub enabled: bool,
    pub remote: String,
    pub branch: String,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub image: ImageConfig,
    /// `None` when no IMAP host is configured.
    pub email: Option<EmailConfig>,
    pub allowed_sender: Option<String>,
    pub paths: PressPaths,
    pub pipeline: PipelineSettings,
    pub poll_interval: Duration,
    pub auto_interval: Option<Duration>,
    pub publish: PublishConfig,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. A missing `ANTHROPIC_API_KEY` is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("ANTHROPIC_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            model: get("PRESS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: parse_or(&get, "PRESS_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
        };

        let poll_secs: u64 = parse_or(&get, "PRESS_POLL_INTERVAL_SECS", 30)?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PRESS_POLL_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let auto_secs: u64 = parse_or(&get, "PRESS_AUTO_INTERVAL_SECS", 1800)?;
        let step_delay_ms: u64 = parse_or(&get, "PRESS_STEP_DELAY_MS", 1000)?;

        let pipeline = PipelineSettings {
            step_delay: Duration::from_millis(step_delay_ms),
            ..PipelineSettings::default()
        };

        Ok(Self {
            llm,
            image: ImageConfig::from_lookup(&get),
            email: EmailConfig::from_lookup(&get),
            allowed_sender: get("PRESS_ALLOWED_SENDER").map(|s| normalize_sender(&s)),
            paths: PressPaths::new(get("PRESS_ROOT").unwrap_or_else(|| ".".to_string())),
            pipeline,
            poll_interval: Duration::from_secs(poll_secs),
            auto_interval: (auto_secs > 0).then(|| Duration::from_secs(auto_secs)),
            publish: PublishConfig {
                enabled: parse_bool_or(&get, "PRESS_PUBLISH", true)?,
                remote: get("PRESS_GIT_REMOTE").unwrap_or_else(|| "origin".to_string()),
                branch: get("PRESS_GIT_BRANCH").unwrap_or_else(|| "main".to_string()),
            },
            log_dir: get("PRESS_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Controller settings. Requires an allowed sender.
    pub fn controller(&self) -> Result<ControllerConfig, ConfigError> {
        let allowed_sender = self
            .allowed_sender
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("PRESS_ALLOWED_SENDER".to_string()))?;
        Ok(ControllerConfig {
            allowed_sender,
            poll_interval: self.poll_interval,
            auto_interval: self.auto_interval,
        })
    }

    /// Mail settings. Requires an IMAP host.
    pub fn email(&self) -> Result<EmailConfig, ConfigError> {
        self.email
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".to_string()))
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}

fn parse_bool_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got {v:?}"),
            }),
        },
    }
}
