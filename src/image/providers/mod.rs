//! Image editing providers.

#[cfg(feature = "gemini")]
mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{
    GeminiEditor, GeminiEditorBuilder, GeminiModel, HttpReply, HttpTransport, Transport,
    DEFAULT_BASE_URL, MAX_REFUSAL_CHARS,
};

#[cfg(all(test, feature = "gemini"))]
pub(crate) use gemini::stub;
