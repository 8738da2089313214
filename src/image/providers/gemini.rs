//! Gemini (Google) image editing provider.

use crate::config::{env_override, Credential, CredentialCheck, BASE_URL_ENV_VAR, MODEL_ENV_VAR};
use crate::error::{parse_retry_after, sanitize_error_message, EditError, Result};
use crate::image::provider::ImageEditor;
use crate::image::types::{DataUri, TransformRequest, DEFAULT_EDIT_FRAMING, DEFAULT_MIME_TYPE};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default Gemini API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Maximum characters of model text kept in a refusal.
pub const MAX_REFUSAL_CHARS: usize = 200;

const REFUSAL_ELLIPSIS: &str = "...";

/// Gemini image model variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Nano Banana - Gemini 2.5 Flash Image (fast, economical).
    #[default]
    FlashImage,
    /// Nano Banana Pro - Gemini 3 Pro Image (highest quality).
    ProImage,
    /// Any other model identifier.
    Custom(String),
}

impl GeminiModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::FlashImage => "gemini-2.5-flash-image",
            Self::ProImage => "gemini-3-pro-image-preview",
            Self::Custom(id) => id,
        }
    }

    /// Maps a model identifier to a variant.
    pub fn from_id(id: &str) -> Self {
        match id {
            "gemini-2.5-flash-image" => Self::FlashImage,
            "gemini-3-pro-image-preview" => Self::ProImage,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Status, retry hint and body of an HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Response body as text.
    pub body: String,
}

impl HttpReply {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP seam used by [`GeminiEditor`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// POSTs a JSON body authenticated with the given key.
    async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<HttpReply>;

    /// GETs a URL authenticated with the given key.
    async fn get(&self, url: &str, api_key: &str) -> Result<HttpReply>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Wraps an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn into_reply(response: reqwest::Response) -> Result<HttpReply> {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers()).map(Duration::from_secs);
        let body = response.text().await?;
        Ok(HttpReply {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<HttpReply> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::into_reply(response).await
    }

    async fn get(&self, url: &str, api_key: &str) -> Result<HttpReply> {
        let response = self
            .client
            .get(url)
            .header("x-goog-api-key", api_key)
            .send()
            .await?;
        Self::into_reply(response).await
    }
}

/// Builder for GeminiEditor.
#[derive(Debug, Clone, Default)]
pub struct GeminiEditorBuilder {
    api_key: Option<String>,
    model: Option<GeminiModel>,
    base_url: Option<String>,
    framing: Option<String>,
    credential_check: CredentialCheck,
}

impl GeminiEditorBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Without one, the key is read from the environment
    /// on every request.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the Gemini model variant. Falls back to `IMAGEWAND_MODEL`.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Sets the API base URL. Falls back to `IMAGEWAND_BASE_URL`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the phrase prepended to every instruction.
    pub fn framing(mut self, framing: impl Into<String>) -> Self {
        self.framing = Some(framing.into());
        self
    }

    /// Chooses when a missing environment key is reported.
    pub fn credential_check(mut self, check: CredentialCheck) -> Self {
        self.credential_check = check;
        self
    }

    /// Builds the editor with the default HTTP transport.
    pub fn build(self) -> Result<GeminiEditor> {
        self.build_with_transport(HttpTransport::default())
    }

    /// Builds the editor over a custom transport.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> Result<GeminiEditor<T>> {
        let credential = match self.api_key {
            Some(key) => Credential::Explicit(key),
            None => Credential::Env,
        };
        if self.credential_check == CredentialCheck::Eager {
            credential.resolve()?;
        }

        let model = self
            .model
            .or_else(|| env_override(MODEL_ENV_VAR).map(|id| GeminiModel::from_id(&id)))
            .unwrap_or_default();
        let base_url = self
            .base_url
            .or_else(|| env_override(BASE_URL_ENV_VAR))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(GeminiEditor {
            transport,
            credential,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            framing: self
                .framing
                .unwrap_or_else(|| DEFAULT_EDIT_FRAMING.to_string()),
        })
    }
}

/// Gemini image editing provider.
pub struct GeminiEditor<T = HttpTransport> {
    transport: T,
    credential: Credential,
    model: GeminiModel,
    base_url: String,
    framing: String,
}

impl GeminiEditor {
    /// Creates a new `GeminiEditorBuilder`.
    pub fn builder() -> GeminiEditorBuilder {
        GeminiEditorBuilder::new()
    }
}

impl<T: Transport> GeminiEditor<T> {
    fn model_url(&self) -> String {
        format!("{}/v1beta/models/{}", self.base_url, self.model.as_str())
    }

    async fn transform_impl(&self, request: &TransformRequest) -> Result<DataUri> {
        let start = Instant::now();
        let api_key = self.credential.resolve()?;

        let url = format!("{}:generateContent", self.model_url());
        let body = serde_json::to_value(GeminiRequest::from_transform_request(
            request,
            &self.framing,
        ))?;

        tracing::debug!(
            model = self.model.as_str(),
            mime_type = %request.mime_type,
            payload_len = request.encoded_payload.len(),
            "submitting edit request"
        );

        let reply = self.transport.post_json(&url, &api_key, &body).await?;

        if !reply.is_success() {
            let text = reply.body.replace(&api_key, "[REDACTED]");
            let err = classify_failure(reply.status, &text, reply.retry_after);
            tracing::warn!(status = reply.status, "edit request failed: {err}");
            return Err(err);
        }

        let response: GeminiResponse = serde_json::from_str(&reply.body)?;
        let result = extract_image(response);

        tracing::debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "edit request complete"
        );
        result
    }
}

#[async_trait]
impl<T: Transport> ImageEditor for GeminiEditor<T> {
    async fn transform(&self, request: &TransformRequest) -> Result<DataUri> {
        self.transform_impl(request).await
    }

    fn model(&self) -> &str {
        self.model.as_str()
    }

    fn name(&self) -> &str {
        "Gemini (Google)"
    }

    async fn health_check(&self) -> Result<()> {
        let api_key = self.credential.resolve()?;
        let reply = self.transport.get(&self.model_url(), &api_key).await?;

        match reply.status {
            401 | 403 => Err(EditError::Auth("Invalid API key".into())),
            404 => Err(EditError::InvalidRequest(
                "Model not found. Verify the model name is correct.".into(),
            )),
            429 => Err(EditError::RateLimited {
                retry_after: reply.retry_after,
            }),
            s if !(200..300).contains(&s) => {
                Err(EditError::Transport("Health check failed".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Maps a failed HTTP reply to an error, never keeping credentials.
fn classify_failure(status: u16, text: &str, retry_after: Option<Duration>) -> EditError {
    let message = serde_json::from_str::<GeminiErrorResponse>(text)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| text.to_string());
    let message = sanitize_error_message(&message);

    if status == 429 {
        return EditError::RateLimited { retry_after };
    }
    if status == 401 || status == 403 {
        return EditError::Auth(message);
    }
    let lower = message.to_lowercase();
    if lower.contains("api key") || lower.contains("api_key") || lower.contains("unauthenticated")
    {
        return EditError::Auth(message);
    }
    if lower.contains("resource_exhausted") || lower.contains("quota") {
        return EditError::RateLimited { retry_after };
    }
    EditError::Transport(message)
}

/// Picks the first inline image, then the first text, out of a response.
fn extract_image(response: GeminiResponse) -> Result<DataUri> {
    if response.candidates.is_empty() {
        if let Some(feedback) = response.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(EditError::ModelRefusal(truncate_refusal(&msg)));
            }
        }
        return Err(EditError::EmptyResponse);
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(EditError::EmptyResponse);
    };
    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    if let Some(inline) = parts.iter().find_map(|p| p.inline_data.as_ref()) {
        let mime_type = inline.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE);
        return Ok(DataUri::new(mime_type, inline.data.clone()));
    }

    if let Some(text) = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .find(|t| !t.is_empty())
    {
        return Err(EditError::ModelRefusal(truncate_refusal(text)));
    }

    tracing::debug!(
        finish_reason = candidate.finish_reason.as_deref().unwrap_or("none"),
        "response carried no image or text"
    );
    Err(EditError::EmptyResponse)
}

/// Cuts model text to [`MAX_REFUSAL_CHARS`] characters plus an ellipsis.
fn truncate_refusal(text: &str) -> String {
    if text.chars().count() > MAX_REFUSAL_CHARS {
        let cut: String = text.chars().take(MAX_REFUSAL_CHARS).collect();
        format!("{cut}{REFUSAL_ELLIPSIS}")
    } else {
        text.to_string()
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - either inline image data or text.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
}

impl GeminiRequest {
    fn from_transform_request(req: &TransformRequest, framing: &str) -> Self {
        let parts = vec![
            GeminiRequestPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: req.mime_type.clone(),
                    data: req.encoded_payload.clone(),
                },
            },
            GeminiRequestPart::Text {
                text: req.framed_instruction(framing),
            },
        ];

        Self {
            contents: vec![GeminiContent { parts }],
            // TEXT stays enabled so refusals come back as readable text.
            generation_config: GeminiConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    inline_data: Option<InlineData>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: Option<String>,
}
