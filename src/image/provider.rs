//! Image editor trait and utilities.

use crate::error::Result;
use crate::image::types::{DataUri, TransformRequest};
use async_trait::async_trait;

/// Trait for providers that edit an image according to a text instruction.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    /// Sends one edit request and returns the edited image.
    ///
    /// Each call is independent; callers that share an editor are responsible
    /// for not overlapping requests that belong to the same session.
    async fn transform(&self, request: &TransformRequest) -> Result<DataUri>;

    /// Returns the model identifier used for requests.
    fn model(&self) -> &str;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str;

    /// Checks if the provider is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}

/// Edits a base64-encoded image with the given instruction.
pub async fn transform<E: ImageEditor + ?Sized>(
    editor: &E,
    payload: &str,
    mime_type: &str,
    instruction: &str,
) -> Result<DataUri> {
    let request = TransformRequest::new(payload, mime_type, instruction)?;
    editor.transform(&request).await
}
