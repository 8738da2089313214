//! Credential and endpoint configuration.

use crate::error::{EditError, Result};

/// Environment variables checked for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Environment variable overriding the model identifier.
pub const MODEL_ENV_VAR: &str = "IMAGEWAND_MODEL";

/// Environment variable overriding the API base URL.
pub const BASE_URL_ENV_VAR: &str = "IMAGEWAND_BASE_URL";

/// Where the API key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// A key passed in explicitly.
    Explicit(String),
    /// Read from the environment on every call.
    Env,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit(_) => f.write_str("Explicit(..)"),
            Self::Env => f.write_str("Env"),
        }
    }
}

impl Credential {
    /// Resolves the key, reading the environment for [`Credential::Env`].
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Explicit(key) if !key.trim().is_empty() => Ok(key.clone()),
            Self::Explicit(_) => Err(EditError::Auth("API key is empty".into())),
            Self::Env => api_key_from_env().ok_or_else(|| {
                EditError::Auth(format!(
                    "{} not set and no API key provided",
                    API_KEY_ENV_VARS.join(" / ")
                ))
            }),
        }
    }
}

/// When a missing credential is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialCheck {
    /// Fail when the editor is built.
    #[default]
    Eager,
    /// Fail on the first edit request.
    Lazy,
}

fn api_key_from_env() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Returns a non-empty environment value.
pub(crate) fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
