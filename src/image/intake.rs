//! Image intake: validating a source file and preparing its payload.

use crate::error::{EditError, Result};
use crate::image::types::{DataUri, ImageFormat};
use base64::Engine;
use std::path::Path;
use std::sync::Arc;

/// Content type used when nothing better can be determined.
const OCTET_STREAM: &str = "application/octet-stream";

/// A file selected by the user, with its declared content type.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Display name (usually the file name).
    pub name: String,
    /// Declared content type, e.g. `image/png`.
    pub content_type: String,
    /// File content.
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Creates a source file from in-memory content.
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk, deriving its content type from the extension
    /// and falling back to magic-byte sniffing.
    ///
    /// A read failure is reported as [`EditError::Encoding`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EditError::Encoding(format!("{}: {e}", path.display())))?;

        let content_type = content_type_for(path, &bytes);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        tracing::debug!(file = %name, %content_type, size = bytes.len(), "opened source file");

        Ok(Self {
            name,
            content_type,
            bytes,
        })
    }

    /// Returns true if the declared content type names an image.
    pub fn is_image(&self) -> bool {
        is_image_content_type(&self.content_type)
    }
}

fn content_type_for(path: &Path, bytes: &[u8]) -> String {
    let from_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(mime_for_extension);
    match from_ext {
        Some(mime) => mime.to_string(),
        None => ImageFormat::from_magic_bytes(bytes)
            .map(|f| f.mime_type())
            .unwrap_or(OCTET_STREAM)
            .to_string(),
    }
}

/// Maps common image file extensions to MIME types.
fn mime_for_extension(ext: &str) -> Option<&'static str> {
    if let Some(format) = ImageFormat::from_extension(ext) {
        return Some(format.mime_type());
    }
    match ext.to_lowercase().as_str() {
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "avif" => Some("image/avif"),
        "tif" | "tiff" => Some("image/tiff"),
        "svg" => Some("image/svg+xml"),
        "ico" => Some("image/x-icon"),
        _ => None,
    }
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// Renderable handle to the original bytes of an uploaded image.
///
/// Clones share the same buffer; the buffer is released when the last
/// handle is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewHandle {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl PreviewHandle {
    /// Returns the previewed bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the MIME type of the preview.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Renders the preview as a data URI.
    pub fn to_data_uri(&self) -> DataUri {
        DataUri::from_bytes(self.mime_type.clone(), &self.bytes)
    }
}

/// An image accepted by intake, ready to be edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Display name of the source file.
    pub name: String,
    raw_bytes: Arc<[u8]>,
    preview: PreviewHandle,
    encoded_payload: String,
    mime_type: String,
}

impl UploadedImage {
    /// Returns the original file content.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }

    /// Returns the preview handle for display.
    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }

    /// Returns the base64 encoding of the original bytes.
    pub fn encoded_payload(&self) -> &str {
        &self.encoded_payload
    }

    /// Returns the declared MIME type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// Options controlling intake validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntakeOptions {
    /// Maximum accepted file size in bytes; unlimited when `None`.
    pub max_bytes: Option<u64>,
}

impl IntakeOptions {
    /// Sets the maximum accepted file size.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

/// Validates a source file and encodes it with default options.
pub async fn ingest(file: SourceFile) -> Result<UploadedImage> {
    ingest_with(file, IntakeOptions::default()).await
}

/// Validates a source file and encodes it.
///
/// The preview handle is created before encoding starts; the base64
/// encoding runs on a blocking worker.
pub async fn ingest_with(file: SourceFile, options: IntakeOptions) -> Result<UploadedImage> {
    if !file.is_image() {
        return Err(EditError::InvalidFileType(file.content_type));
    }

    let size = file.bytes.len() as u64;
    if let Some(limit) = options.max_bytes {
        if size > limit {
            return Err(EditError::FileTooLarge { size, limit });
        }
    }

    let SourceFile {
        name,
        content_type,
        bytes,
    } = file;
    let mime_type = content_type.trim().to_ascii_lowercase();
    let raw_bytes: Arc<[u8]> = bytes.into();

    let preview = PreviewHandle {
        bytes: Arc::clone(&raw_bytes),
        mime_type: mime_type.clone(),
    };

    let to_encode = Arc::clone(&raw_bytes);
    let encoded_payload = tokio::task::spawn_blocking(move || {
        base64::engine::general_purpose::STANDARD.encode(&to_encode[..])
    })
    .await
    .map_err(|e| EditError::Encoding(e.to_string()))?;

    tracing::debug!(file = %name, %mime_type, size, "image ingested");

    Ok(UploadedImage {
        name,
        raw_bytes,
        preview,
        encoded_payload,
        mime_type,
    })
}

/// Opens and ingests a file from disk.
pub async fn ingest_path(path: impl AsRef<Path>, options: IntakeOptions) -> Result<UploadedImage> {
    let file = SourceFile::open(path).await?;
    ingest_with(file, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[tokio::test]
    async fn test_ingest_round_trips_bytes() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4099).collect();
        let image = ingest(SourceFile::new("a.png", "image/png", bytes.clone()))
            .await
            .unwrap();

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(image.encoded_payload())
            .unwrap();
        assert_eq!(decoded, bytes);
        assert_eq!(image.raw_bytes(), &bytes[..]);
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.preview().bytes(), &bytes[..]);
    }

    #[tokio::test]
    async fn test_ingest_empty_image_file() {
        let image = ingest(SourceFile::new("empty.gif", "image/gif", Vec::new()))
            .await
            .unwrap();
        assert_eq!(image.encoded_payload(), "");
    }

    #[tokio::test]
    async fn test_ingest_rejects_non_image() {
        let err = ingest(SourceFile::new("notes.txt", "text/plain", b"hello".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::InvalidFileType(ref t) if t == "text/plain"));
    }

    #[tokio::test]
    async fn test_ingest_accepts_any_image_subtype() {
        for mime in ["image/heic", "IMAGE/PNG", "image/svg+xml"] {
            assert!(ingest(SourceFile::new("x", mime, PNG_MAGIC.to_vec()))
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn test_ingest_enforces_size_limit() {
        let options = IntakeOptions::default().with_max_bytes(4);
        let err = ingest_with(SourceFile::new("a.png", "image/png", PNG_MAGIC.to_vec()), options)
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::FileTooLarge { size: 12, limit: 4 }));
    }

    #[tokio::test]
    async fn test_open_detects_content_type() {
        let dir = tempfile::tempdir().unwrap();

        let named = dir.path().join("photo.JPG");
        std::fs::write(&named, b"not really a jpeg").unwrap();
        let file = SourceFile::open(&named).await.unwrap();
        assert_eq!(file.content_type, "image/jpeg");
        assert_eq!(file.name, "photo.JPG");

        let sniffed = dir.path().join("upload.bin");
        std::fs::write(&sniffed, PNG_MAGIC).unwrap();
        let file = SourceFile::open(&sniffed).await.unwrap();
        assert_eq!(file.content_type, "image/png");

        let text = dir.path().join("readme");
        std::fs::write(&text, b"just some plain text").unwrap();
        let file = SourceFile::open(&text).await.unwrap();
        assert_eq!(file.content_type, "application/octet-stream");
        assert!(!file.is_image());
    }

    #[tokio::test]
    async fn test_open_missing_file_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingest_path(dir.path().join("missing.png"), IntakeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::Encoding(_)));
    }

    #[test]
    fn test_preview_renders_data_uri() {
        let preview = PreviewHandle {
            bytes: Arc::from(&b"ABC"[..]),
            mime_type: "image/png".into(),
        };
        assert_eq!(
            preview.to_data_uri().to_string(),
            "data:image/png;base64,QUJD"
        );
    }
}
