//! Typed errors for configuration problems

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found (searched: {0})")]
    NotFound(String),

    #[error("config file <{}> does not exist", .0.display())]
    Missing(PathBuf),

    #[error("failed to load config file <{}>: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: String, reason: String },

    #[error("invalid regex for `{key}`: {source}")]
    Regex {
        key: String,
        #[source]
        source: regex::Error,
    },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Raised when `internet_access.method` names neither `ping` nor `dns`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid IACheckMethod <{0}>")]
pub struct UnknownCheckMethod(pub String);
