#![warn(missing_docs)]
//! imagewand - edit images with natural-language instructions.
//!
//! Load an image, describe the change, and get the model's edited image back
//! as a data URI ready for preview or download.
//!
//! # Quick Start
//!
//! ```no_run
//! use imagewand::{GeminiEditor, Session, SourceFile};
//!
//! #[tokio::main]
//! async fn main() -> imagewand::Result<()> {
//!     let session = Session::new(GeminiEditor::builder().build()?);
//!     session.upload(SourceFile::open("cat.png").await?).await?;
//!     session.set_prompt("Give the cat a wizard hat").await?;
//!     let edited = session.generate().await?;
//!     println!("{}", edited.mime_type());
//!     session.download(".").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `gemini` (default): Gemini image editing over HTTP
//! - `cli`: Command-line interface
//!
//! # Configuration
//!
//! The API key is read from `GEMINI_API_KEY`, `GOOGLE_API_KEY` or `API_KEY`
//! unless passed to the builder. `IMAGEWAND_MODEL` and `IMAGEWAND_BASE_URL`
//! override the model and endpoint.

pub mod config;
mod error;
pub mod export;
pub mod image;
pub mod session;

// Re-export error types at crate root
pub use error::{EditError, Result};

pub use crate::image::{
    ingest, transform, DataUri, ImageEditor, ImageFormat, IntakeOptions, PreviewHandle,
    SourceFile, TransformRequest, TransformResult, UploadedImage,
};
pub use session::{Action, Session, SessionState, Status};

#[cfg(feature = "gemini")]
pub use crate::image::providers::{GeminiEditor, GeminiEditorBuilder, GeminiModel};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{EditError, Result};
    pub use crate::image::{DataUri, ImageEditor, SourceFile, TransformRequest};
    pub use crate::session::{Session, Status};

    #[cfg(feature = "gemini")]
    pub use crate::image::providers::GeminiEditor;
}
