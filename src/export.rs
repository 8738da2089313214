//! Saving edited images to disk.

use crate::error::Result;
use crate::image::DataUri;
use std::path::{Path, PathBuf};

/// Returns the download file name for an image produced at `millis`.
pub fn download_file_name(uri: &DataUri, millis: i64) -> String {
    let ext = uri.format().unwrap_or_default().extension();
    format!("transformed-{millis}.{ext}")
}

/// Decodes a data URI and writes it as `transformed-{unix_millis}.{ext}`
/// inside `dir`.
pub async fn save_data_uri(uri: &DataUri, dir: impl AsRef<Path>) -> Result<PathBuf> {
    let bytes = uri.decode()?;
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;

    let name = download_file_name(uri, chrono::Utc::now().timestamp_millis());
    let path = dir.join(name);
    tokio::fs::write(&path, &bytes).await?;

    tracing::debug!(path = %path.display(), size = bytes.len(), "saved edited image");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EditError;

    #[test]
    fn test_download_file_name() {
        let png = DataUri::new("image/png", "AAAA");
        assert_eq!(download_file_name(&png, 1700000000000), "transformed-1700000000000.png");

        let jpeg = DataUri::new("image/jpeg", "AAAA");
        assert_eq!(download_file_name(&jpeg, 5), "transformed-5.jpg");

        let unknown = DataUri::new("image/heic", "AAAA");
        assert_eq!(download_file_name(&unknown, 5), "transformed-5.png");
    }

    #[tokio::test]
    async fn test_save_data_uri_writes_decoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let uri = DataUri::from_bytes("image/webp", b"webp-bytes");

        let path = save_data_uri(&uri, dir.path().join("out")).await.unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("webp"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("transformed-")));
        assert_eq!(std::fs::read(&path).unwrap(), b"webp-bytes");
    }

    #[tokio::test]
    async fn test_save_rejects_bad_payload() {
        let dir = tempfile::tempdir().unwrap();
        let uri = DataUri::new("image/png", "not base64!!");
        let err = save_data_uri(&uri, dir.path()).await.unwrap_err();
        assert!(matches!(err, EditError::Decode(_)));
    }
}
