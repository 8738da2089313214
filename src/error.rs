//! Error types for image intake and edit invocation.

use std::time::Duration;

/// Maximum length of a provider message kept after sanitizing.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while loading an image or requesting an edit.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// The selected file is not an image.
    #[error("invalid file type: {0}")]
    InvalidFileType(String),

    /// The selected file exceeds the configured intake limit.
    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    /// The file could not be read or encoded.
    #[error("failed to encode image: {0}")]
    Encoding(String),

    /// API key missing or rejected by the provider.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// The model answered with text instead of an image.
    #[error("model refused: {0}")]
    ModelRefusal(String),

    /// The model returned neither an image nor text.
    #[error("empty response from model")]
    EmptyResponse,

    /// Any other network or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// An edit is already in flight for this session.
    #[error("an edit is already in progress")]
    Busy,

    /// The request cannot be issued in the current state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error (e.g., saving a download).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl From<reqwest::Error> for EditError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => return Self::Auth(sanitize_error_message(&err.to_string())),
                429 => return Self::RateLimited { retry_after: None },
                _ => {}
            }
        }
        Self::Transport(sanitize_error_message(&err.to_string()))
    }
}

impl EditError {
    /// Returns the suggested retry delay, if the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns the message shown to the end user.
    ///
    /// Credentials and raw status text never reach this string.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidFileType(_) => "Please upload a valid image file.".into(),
            Self::FileTooLarge { limit, .. } => {
                format!("The image is too large (limit is {limit} bytes).")
            }
            Self::Encoding(_) | Self::Io(_) => "Failed to process the image.".into(),
            Self::Auth(_) => "The service is currently unavailable. Please try again later.".into(),
            Self::RateLimited { .. } => {
                "The server is very busy. Please wait a moment and try again.".into()
            }
            Self::ModelRefusal(text) => format!("Could not apply the edit: {text}"),
            Self::EmptyResponse | Self::Json(_) | Self::Decode(_) => {
                "The image was not generated successfully.".into()
            }
            Self::Transport(message) => {
                if message.is_empty() || contains_sensitive(message) {
                    "An unexpected error occurred.".into()
                } else {
                    message.clone()
                }
            }
            Self::Busy => "An edit is already in progress.".into(),
            Self::InvalidRequest(reason) => reason.clone(),
        }
    }
}

/// Result type alias for imagewand operations.
pub type Result<T> = std::result::Result<T, EditError>;

/// Strips credential-looking values from a provider message and caps its length.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let mut out = Vec::new();
    let mut redact_next = false;
    for word in text.split_whitespace() {
        if redact_next {
            out.push("[REDACTED]".to_string());
            redact_next = false;
            continue;
        }
        let lower = word.to_ascii_lowercase();
        if let Some(pos) = lower.find("key=").or_else(|| lower.find("key:")) {
            let (head, tail) = word.split_at(pos + 4);
            if tail.is_empty() {
                redact_next = true;
                out.push(head.to_string());
            } else {
                out.push(format!("{head}[REDACTED]"));
            }
            continue;
        }
        if looks_like_secret(word) {
            out.push("[REDACTED]".to_string());
            continue;
        }
        out.push(word.to_string());
    }

    let joined = out.join(" ");
    if joined.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let cut: String = joined.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        format!("{cut}...")
    } else {
        joined
    }
}

fn looks_like_secret(word: &str) -> bool {
    let token = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_');
    if token.starts_with("AIza") && token.len() >= 20 {
        return true;
    }
    token.len() >= 32
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| c.is_ascii_alphabetic())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Returns true if a message should not be shown verbatim to the end user.
pub(crate) fn contains_sensitive(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("key")
        || lower.contains("[redacted]")
        || lower.contains('<')
        || lower
            .split(|c: char| !c.is_ascii_digit())
            .any(is_http_error_code)
}

fn is_http_error_code(token: &str) -> bool {
    token.len() == 3 && (token.starts_with('4') || token.starts_with('5'))
}

/// Parses the `Retry-After` header as whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
