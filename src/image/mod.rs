//! Image intake and editing.

pub mod intake;
mod provider;
pub mod providers;
mod types;

pub use intake::{
    ingest, ingest_path, ingest_with, IntakeOptions, PreviewHandle, SourceFile, UploadedImage,
};
pub use provider::{transform, ImageEditor};
pub use types::{
    DataUri, ImageFormat, TransformRequest, TransformResult, DEFAULT_EDIT_FRAMING,
    DEFAULT_MIME_TYPE,
};
