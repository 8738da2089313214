//! Core types for image editing.

use crate::error::{EditError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MIME type assumed when a provider omits one.
pub const DEFAULT_MIME_TYPE: &str = "image/png";

/// Image formats recognized by magic bytes and file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
    /// GIF format.
    Gif,
}

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Maps a MIME type back to a known format.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            "image/gif" => Some(Self::Gif),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Some(Self::Gif);
        }

        None
    }
}

/// A `data:{mime};base64,{payload}` URI carrying an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    mime_type: String,
    payload: String,
}

impl DataUri {
    /// Creates a data URI from an already base64-encoded payload.
    ///
    /// The payload is kept verbatim. An empty MIME type falls back to
    /// [`DEFAULT_MIME_TYPE`].
    pub fn new(mime_type: impl Into<String>, payload: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_MIME_TYPE.to_string()
        } else {
            mime_type
        };
        Self {
            mime_type,
            payload: payload.into(),
        }
    }

    /// Encodes raw bytes into a data URI.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(bytes),
        )
    }

    /// Returns the MIME segment.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Returns the base64 segment exactly as received.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decodes the base64 payload into raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(self.payload.trim())?)
    }

    /// Returns the known format for this URI's MIME type, if any.
    pub fn format(&self) -> Option<ImageFormat> {
        ImageFormat::from_mime_type(&self.mime_type)
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.payload)
    }
}

impl FromStr for DataUri {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("data:")
            .ok_or_else(|| EditError::InvalidRequest("data URI must start with 'data:'".into()))?;
        let (mime_type, payload) = rest.split_once(";base64,").ok_or_else(|| {
            EditError::InvalidRequest("data URI must be base64-encoded".into())
        })?;
        Ok(Self::new(mime_type, payload))
    }
}

/// Framing phrase prepended to the user's instruction.
pub const DEFAULT_EDIT_FRAMING: &str = "Edit this image.";

/// A single edit request, built right before invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    /// Base64 of the source image.
    pub encoded_payload: String,
    /// MIME type of the source image.
    pub mime_type: String,
    /// User-supplied instruction, never blank.
    pub instruction: String,
}

impl TransformRequest {
    /// Creates a request, rejecting a blank instruction or payload.
    pub fn new(
        encoded_payload: impl Into<String>,
        mime_type: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Result<Self> {
        let encoded_payload = encoded_payload.into();
        let instruction = instruction.into();
        if instruction.trim().is_empty() {
            return Err(EditError::InvalidRequest(
                "Please describe the edit you want.".into(),
            ));
        }
        if encoded_payload.is_empty() {
            return Err(EditError::InvalidRequest("Please upload an image first.".into()));
        }
        Ok(Self {
            encoded_payload,
            mime_type: mime_type.into(),
            instruction,
        })
    }

    /// Returns the text part sent to the model.
    pub fn framed_instruction(&self, framing: &str) -> String {
        let framing = framing.trim();
        if framing.is_empty() {
            self.instruction.clone()
        } else {
            format!("{} {}", framing, self.instruction)
        }
    }
}

/// Outcome of one edit invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformResult {
    /// The model returned an image.
    Image(DataUri),
    /// The invocation failed; holds the user-facing message.
    Failure(String),
}

impl TransformResult {
    /// Returns the image, if the invocation succeeded.
    pub fn image(&self) -> Option<&DataUri> {
        match self {
            Self::Image(uri) => Some(uri),
            Self::Failure(_) => None,
        }
    }
}
