//! Error types for topic-press.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Site(#[from] SiteError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Topic catalog errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {path}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Duplicate topic slug in catalog: {0}")]
    DuplicateSlug(String),

    #[error("Catalog site settings have no base_url")]
    MissingBaseUrl,
}

/// Mail transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to fetch messages on channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel health check failed: {name}: {reason}")]
    HealthCheckFailed { name: String, reason: String },
}

/// LLM / generation-capability errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Output tree (render / rebuild) errors.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("Failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to scan {path}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Publish step errors. Never propagated past the generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("git {step} failed: {stderr}")]
    Git { step: String, stderr: String },

    #[error("Failed to spawn git")]
    Spawn(#[from] std::io::Error),
}

/// Generation pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Research failed for {slug}")]
    Research { slug: String, source: LlmError },

    #[error("Draft attempt {attempt} failed for {slug}")]
    Draft {
        slug: String,
        attempt: u32,
        source: LlmError,
    },

    #[error("Quality check failed for {slug}")]
    QualityCheck { slug: String, source: LlmError },

    #[error("Render failed")]
    Site(#[from] SiteError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Render an error together with its `source()` chain, one cause per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_lists_every_cause() {
        let err = Error::Pipeline(PipelineError::Research {
            slug: "vorhand".into(),
            source: LlmError::RequestFailed {
                provider: "anthropic".into(),
                reason: "503".into(),
            },
        });
        let chain = error_chain(&err);
        assert_eq!(
            chain,
            "Research failed for vorhand\n  caused by: Provider anthropic request failed: 503"
        );
    }

    #[test]
    fn error_chain_single_error() {
        let err = CatalogError::DuplicateSlug("aufschlag".into());
        assert_eq!(error_chain(&err), "Duplicate topic slug in catalog: aufschlag");
    }
}
