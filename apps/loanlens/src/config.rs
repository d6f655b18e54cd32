//! # Server Configuration
//!
//! Resolved settings for `loanlens serve`. Values come from CLI flags,
//! with `LOANLENS_BIND` and `LOANLENS_MODELS` as environment fallbacks
//! (see [`crate::cli::ServeArgs`]).

use loanlens_core::{ExplainerKind, PipelineOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Default model bundle location, relative to the working directory.
pub const DEFAULT_MODELS_PATH: &str = "models/loan_model.json";

/// Default request body cap (2 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Default cap on applications per batch request.
pub const DEFAULT_MAX_BATCH: usize = 1000;

/// Default requests per second across all clients. 0 disables limiting.
pub const DEFAULT_RATE_LIMIT: u32 = 50;

/// Invalid server settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid CORS origin {0:?}")]
    CorsOrigin(String),
}

/// Everything the HTTP server needs besides the loaded pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub models_path: PathBuf,
    pub pipeline: PipelineOptions,
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit_per_second: u32,
    /// Allowed CORS origins; empty means permissive.
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
    pub max_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            models_path: PathBuf::from(DEFAULT_MODELS_PATH),
            pipeline: PipelineOptions::default(),
            rate_limit_per_second: DEFAULT_RATE_LIMIT,
            cors_origins: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

impl ServerConfig {
    /// Reject settings that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Zero("max_body_bytes"));
        }
        if self.max_batch == 0 {
            return Err(ConfigError::Zero("max_batch"));
        }
        if self.pipeline.explainer == ExplainerKind::Exact && self.pipeline.max_background == 0 {
            return Err(ConfigError::Zero("max_background"));
        }
        for origin in &self.cors_origins {
            if origin.parse::<axum::http::HeaderValue>().is_err() {
                return Err(ConfigError::CorsOrigin(origin.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = ServerConfig {
            max_batch: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("max_batch")));

        let config = ServerConfig {
            max_body_bytes: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("max_body_bytes")));
    }

    #[test]
    fn exact_explainer_needs_background_rows() {
        let config = ServerConfig {
            pipeline: PipelineOptions {
                explainer: ExplainerKind::Exact,
                max_background: 0,
                ..PipelineOptions::default()
            },
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("max_background")));
    }

    #[test]
    fn zero_rate_limit_is_allowed() {
        let config = ServerConfig {
            rate_limit_per_second: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_cors_origin_is_rejected() {
        let config = ServerConfig {
            cors_origins: vec!["http://ok.example".to_string(), "bad\norigin".to_string()],
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::CorsOrigin(_))));
    }
}
