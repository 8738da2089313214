//! Session state for one editing workflow.
//!
//! All changes go through [`SessionState::apply`], so the
//! `Idle → Generating → Success | Error` machine has a single update path.
//! [`Session`] pairs that state with an [`ImageEditor`] and rejects
//! overlapping edits instead of letting the last reply win.

use crate::error::{EditError, Result};
use crate::export;
use crate::image::{
    ingest_with, DataUri, ImageEditor, IntakeOptions, SourceFile, TransformRequest,
    TransformResult, UploadedImage,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Message recorded when an in-flight edit is dropped before it completes.
const CANCELLED_MESSAGE: &str = "The edit was cancelled.";

/// Workflow status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A file is being read and encoded.
    Uploading,
    /// An edit request is in flight.
    Generating,
    /// The last edit produced an image.
    Success,
    /// The last edit failed.
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Uploading => write!(f, "uploading"),
            Self::Generating => write!(f, "generating"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A state transition.
#[derive(Debug)]
pub enum Action {
    /// A file was picked and is being ingested.
    UploadStarted,
    /// Intake produced a new image.
    UploadFinished(UploadedImage),
    /// Intake failed.
    UploadFailed {
        /// Message shown to the user.
        message: String,
        /// Whether the previous image survives the failure.
        keep_image: bool,
    },
    /// The instruction text changed.
    PromptChanged(String),
    /// An edit request was sent.
    GenerateStarted,
    /// The edit returned an image.
    GenerateSucceeded(DataUri),
    /// The edit failed with the given user-facing message.
    GenerateFailed(String),
    /// Discard everything and return to idle.
    Reset,
}

impl Action {
    /// Builds the failure action for an intake error.
    ///
    /// Validation errors keep the previous image; read or encode errors drop it.
    pub fn upload_failed(err: &EditError) -> Self {
        let keep_image = matches!(
            err,
            EditError::InvalidFileType(_) | EditError::FileTooLarge { .. }
        );
        Self::UploadFailed {
            message: err.user_message(),
            keep_image,
        }
    }

    /// Builds the failure action for an invocation error.
    pub fn generate_failed(err: &EditError) -> Self {
        Self::GenerateFailed(err.user_message())
    }
}

/// Everything the front end renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Current status.
    pub status: Status,
    /// The image being edited.
    pub current_image: Option<UploadedImage>,
    /// The instruction text.
    pub current_prompt: String,
    /// Outcome of the most recent edit.
    pub last_result: Option<TransformResult>,
    /// Message for the most recent failure.
    pub last_error: Option<String>,
    status_before_upload: Status,
}

impl SessionState {
    /// Applies one transition.
    ///
    /// Illegal transitions return an error and leave the state unchanged.
    pub fn apply(&mut self, action: Action) -> Result<()> {
        match action {
            Action::UploadStarted => {
                self.ensure_not_generating()?;
                if self.status != Status::Uploading {
                    self.status_before_upload = self.status;
                }
                self.status = Status::Uploading;
            }
            Action::UploadFinished(image) => {
                self.ensure_not_generating()?;
                self.current_image = Some(image);
                self.last_result = None;
                self.last_error = None;
                self.status = Status::Idle;
            }
            Action::UploadFailed {
                message,
                keep_image,
            } => {
                self.ensure_not_generating()?;
                if !keep_image {
                    self.current_image = None;
                    self.last_result = None;
                    self.status = Status::Idle;
                } else if self.status == Status::Uploading {
                    self.status = self.status_before_upload;
                }
                self.last_error = Some(message);
            }
            Action::PromptChanged(prompt) => {
                self.ensure_not_generating()?;
                self.current_prompt = prompt;
            }
            Action::GenerateStarted => {
                self.ensure_can_generate()?;
                self.status = Status::Generating;
                self.last_error = None;
            }
            Action::GenerateSucceeded(uri) => {
                self.ensure_generating()?;
                self.last_result = Some(TransformResult::Image(uri));
                self.status = Status::Success;
            }
            Action::GenerateFailed(message) => {
                self.ensure_generating()?;
                self.last_result = Some(TransformResult::Failure(message.clone()));
                self.last_error = Some(message);
                self.status = Status::Error;
            }
            Action::Reset => {
                self.ensure_not_generating()?;
                *self = Self::default();
            }
        }
        tracing::debug!(status = %self.status, "session updated");
        Ok(())
    }

    /// Builds the edit request for the current image and prompt.
    pub fn transform_request(&self) -> Result<TransformRequest> {
        self.ensure_can_generate()?;
        let image = self
            .current_image
            .as_ref()
            .ok_or_else(|| EditError::InvalidRequest("Please upload an image first.".into()))?;
        TransformRequest::new(
            image.encoded_payload(),
            image.mime_type(),
            self.current_prompt.clone(),
        )
    }

    /// Returns the edited image, if the last edit succeeded.
    pub fn result_image(&self) -> Option<&DataUri> {
        self.last_result.as_ref().and_then(TransformResult::image)
    }

    /// Returns true while an edit is in flight.
    pub fn is_busy(&self) -> bool {
        self.status == Status::Generating
    }

    fn ensure_not_generating(&self) -> Result<()> {
        if self.is_busy() {
            return Err(EditError::Busy);
        }
        Ok(())
    }

    fn ensure_generating(&self) -> Result<()> {
        if !self.is_busy() {
            return Err(EditError::InvalidRequest("No edit is in progress.".into()));
        }
        Ok(())
    }

    fn ensure_can_generate(&self) -> Result<()> {
        self.ensure_not_generating()?;
        if self.status == Status::Uploading {
            return Err(EditError::InvalidRequest(
                "Please wait for the upload to finish.".into(),
            ));
        }
        if self.current_image.is_none() {
            return Err(EditError::InvalidRequest("Please upload an image first.".into()));
        }
        if self.current_prompt.trim().is_empty() {
            return Err(EditError::InvalidRequest(
                "Please describe the edit you want.".into(),
            ));
        }
        Ok(())
    }
}

/// A session store driving an [`ImageEditor`].
pub struct Session<E> {
    editor: E,
    intake: IntakeOptions,
    state: Mutex<SessionState>,
}

impl<E: ImageEditor> Session<E> {
    /// Creates an idle session.
    pub fn new(editor: E) -> Self {
        Self {
            editor,
            intake: IntakeOptions::default(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Sets the intake options used for uploads.
    pub fn with_intake_options(mut self, options: IntakeOptions) -> Self {
        self.intake = options;
        self
    }

    /// Returns the editor behind this session.
    pub fn editor(&self) -> &E {
        &self.editor
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    // The lock is never held across an await.
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }

    async fn dispatch(&self, action: Action) -> Result<()> {
        self.lock().apply(action)
    }

    /// Validates and encodes a file, making it the current image.
    pub async fn upload(&self, file: SourceFile) -> Result<()> {
        if !file.is_image() {
            let err = EditError::InvalidFileType(file.content_type);
            self.dispatch(Action::upload_failed(&err)).await?;
            return Err(err);
        }

        self.dispatch(Action::UploadStarted).await?;
        match ingest_with(file, self.intake).await {
            Ok(image) => self.dispatch(Action::UploadFinished(image)).await,
            Err(err) => {
                self.dispatch(Action::upload_failed(&err)).await?;
                Err(err)
            }
        }
    }

    /// Reads a file from disk and uploads it.
    pub async fn upload_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.dispatch(Action::UploadStarted).await?;
        match SourceFile::open(path).await {
            Ok(file) => self.upload(file).await,
            Err(err) => {
                self.dispatch(Action::upload_failed(&err)).await?;
                Err(err)
            }
        }
    }

    /// Replaces the instruction text.
    pub async fn set_prompt(&self, prompt: impl Into<String>) -> Result<()> {
        self.dispatch(Action::PromptChanged(prompt.into())).await
    }

    /// Sends the current image and prompt to the editor.
    ///
    /// Fails with [`EditError::Busy`] while another edit is in flight.
    pub async fn generate(&self) -> Result<DataUri> {
        let request = {
            let mut state = self.lock();
            let request = state.transform_request()?;
            state.apply(Action::GenerateStarted)?;
            request
        };

        let mut in_flight = InFlight {
            state: &self.state,
            finished: false,
        };
        let outcome = self.editor.transform(&request).await;
        in_flight.finished = true;

        let mut state = self.lock();
        match &outcome {
            Ok(uri) => state.apply(Action::GenerateSucceeded(uri.clone()))?,
            Err(err) => {
                tracing::debug!(error = %err, "edit failed");
                state.apply(Action::generate_failed(err))?;
            }
        }
        outcome
    }

    /// Re-runs the last edit with the same image and prompt.
    pub async fn regenerate(&self) -> Result<DataUri> {
        {
            let state = self.lock();
            state.ensure_not_generating()?;
            if state.last_result.is_none() {
                return Err(EditError::InvalidRequest("Nothing to regenerate yet.".into()));
            }
        }
        self.generate().await
    }

    /// Writes the edited image into `dir`.
    pub async fn download(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let uri = self
            .snapshot()
            .await
            .result_image()
            .cloned()
            .ok_or_else(|| EditError::InvalidRequest("There is no edited image to download.".into()))?;
        export::save_data_uri(&uri, dir).await
    }

    /// Clears the image, prompt and result.
    pub async fn reset(&self) -> Result<()> {
        self.dispatch(Action::Reset).await
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks an in-flight edit as failed if its future is dropped early.
struct InFlight<'a> {
    state: &'a Mutex<SessionState>,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = lock_state(self.state);
        if state
            .apply(Action::GenerateFailed(CANCELLED_MESSAGE.into()))
            .is_ok()
        {
            tracing::debug!("edit cancelled before completion");
        }
    }
}

#[cfg(all(test, feature = "gemini"))]
mod tests {
    use super::*;
    use crate::image::providers::stub::{editor, image_reply, StubTransport};
    use std::sync::Arc;
    use tokio::sync::Notify;

    const FIXED_B64: &str = "RURJVEVELUJZVEVT";

    fn red_png() -> Vec<u8> {
        let img = ::image::RgbImage::from_pixel(10, 10, ::image::Rgb([255, 0, 0]));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), ::image::ImageFormat::Png)
            .unwrap();
        png
    }

    fn png_file() -> SourceFile {
        SourceFile::new("red.png", "image/png", red_png())
    }

    fn session_with(transport: StubTransport) -> Session<crate::image::providers::GeminiEditor<StubTransport>> {
        Session::new(editor(transport))
    }

    #[tokio::test]
    async fn test_end_to_end_red_square() {
        let transport = StubTransport::ok(image_reply("image/png", FIXED_B64));
        let session = session_with(transport.clone());

        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();
        let uri = session.generate().await.unwrap();

        assert_eq!(uri.to_string(), format!("data:image/png;base64,{FIXED_B64}"));

        let state = session.snapshot().await;
        assert_eq!(state.status, Status::Success);
        assert_eq!(state.result_image(), Some(&uri));
        assert!(state.last_error.is_none());

        let sent = transport.requests.lock().unwrap()[0].clone();
        let image = state.current_image.unwrap();
        assert_eq!(
            sent["contents"][0]["parts"][0]["inlineData"]["data"],
            image.encoded_payload()
        );
        assert_eq!(
            sent["contents"][0]["parts"][1]["text"],
            "Edit this image. make it blue"
        );
    }

    #[tokio::test]
    async fn test_generate_requires_image_and_prompt() {
        let transport = StubTransport::ok(image_reply("image/png", FIXED_B64));
        let session = session_with(transport.clone());

        session.set_prompt("make it blue").await.unwrap();
        assert!(matches!(
            session.generate().await,
            Err(EditError::InvalidRequest(_))
        ));

        session.upload(png_file()).await.unwrap();
        session.set_prompt("   ").await.unwrap();
        assert!(matches!(
            session.generate().await,
            Err(EditError::InvalidRequest(_))
        ));

        assert_eq!(session.snapshot().await.status, Status::Idle);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_file_keeps_current_image() {
        let session = session_with(StubTransport::ok(image_reply("image/png", FIXED_B64)));
        session.upload(png_file()).await.unwrap();
        let before = session.snapshot().await.current_image;

        let err = session
            .upload(SourceFile::new("notes.txt", "text/plain", b"hi".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::InvalidFileType(_)));

        let state = session.snapshot().await;
        assert_eq!(state.current_image, before);
        assert_eq!(state.status, Status::Idle);
        assert_eq!(
            state.last_error.as_deref(),
            Some("Please upload a valid image file.")
        );
    }

    #[tokio::test]
    async fn test_unreadable_file_clears_image() {
        let session = session_with(StubTransport::ok(image_reply("image/png", FIXED_B64)));
        session.upload(png_file()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = session
            .upload_path(dir.path().join("gone.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::Encoding(_)));

        let state = session.snapshot().await;
        assert!(state.current_image.is_none());
        assert_eq!(state.status, Status::Idle);
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_new_upload_clears_previous_result() {
        let session = session_with(StubTransport::ok(image_reply("image/png", FIXED_B64)));
        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();
        session.generate().await.unwrap();

        session.upload(png_file()).await.unwrap();
        let state = session.snapshot().await;
        assert!(state.last_result.is_none());
        assert_eq!(state.status, Status::Idle);
        assert_eq!(state.current_prompt, "make it blue");
    }

    #[tokio::test]
    async fn test_refusal_keeps_image_and_records_error() {
        let transport = StubTransport::ok(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "I can't change that."}]}}]
        }));
        let session = session_with(transport);
        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();

        let err = session.generate().await.unwrap_err();
        assert!(matches!(err, EditError::ModelRefusal(_)));

        let state = session.snapshot().await;
        assert_eq!(state.status, Status::Error);
        assert!(state.current_image.is_some());
        assert_eq!(
            state.last_error.as_deref(),
            Some("Could not apply the edit: I can't change that.")
        );
        assert_eq!(
            state.last_result,
            Some(TransformResult::Failure(
                "Could not apply the edit: I can't change that.".into()
            ))
        );
        assert!(state.result_image().is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_message_is_generic() {
        let transport = StubTransport::new(429, "RESOURCE_EXHAUSTED: quota for project 1234");
        let session = session_with(transport);
        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();

        assert!(matches!(
            session.generate().await,
            Err(EditError::RateLimited { .. })
        ));
        let message = session.snapshot().await.last_error.unwrap();
        assert!(!message.contains("RESOURCE_EXHAUSTED"));
        assert!(!message.contains("1234"));
    }

    #[tokio::test]
    async fn test_overlapping_generate_is_rejected() {
        let gate = Arc::new(Notify::new());
        let transport =
            StubTransport::ok(image_reply("image/png", FIXED_B64)).gated(Arc::clone(&gate));
        let session = Arc::new(session_with(transport.clone()));
        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.generate().await })
        };
        while session.snapshot().await.status != Status::Generating {
            tokio::task::yield_now().await;
        }

        assert!(matches!(session.generate().await, Err(EditError::Busy)));
        assert!(matches!(session.regenerate().await, Err(EditError::Busy)));
        assert!(matches!(session.reset().await, Err(EditError::Busy)));
        assert!(matches!(
            session.set_prompt("something else").await,
            Err(EditError::Busy)
        ));
        assert!(matches!(
            session.upload(png_file()).await,
            Err(EditError::Busy)
        ));

        gate.notify_one();
        let uri = first.await.unwrap().unwrap();
        assert_eq!(uri.payload(), FIXED_B64);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(session.snapshot().await.status, Status::Success);
    }

    #[tokio::test]
    async fn test_cancelled_generate_releases_session() {
        let gate = Arc::new(Notify::new());
        let transport =
            StubTransport::ok(image_reply("image/png", FIXED_B64)).gated(Arc::clone(&gate));
        let session = session_with(transport);
        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();

        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), session.generate()).await;
        assert!(timed_out.is_err());

        let state = session.snapshot().await;
        assert_eq!(state.status, Status::Error);
        assert_eq!(state.last_error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(state.current_image.is_some());

        session.reset().await.unwrap();
        assert_eq!(session.snapshot().await, SessionState::default());
    }

    #[tokio::test]
    async fn test_rejected_upload_keeps_previous_result() {
        let session = session_with(StubTransport::ok(image_reply("image/png", FIXED_B64)));
        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();
        let uri = session.generate().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, b"not an image").unwrap();
        let err = session.upload_path(&notes).await.unwrap_err();
        assert!(matches!(err, EditError::InvalidFileType(_)));

        let state = session.snapshot().await;
        assert_eq!(state.status, Status::Success);
        assert_eq!(state.result_image(), Some(&uri));
        assert!(state.current_image.is_some());
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_regenerate_reuses_image_and_prompt() {
        let transport = StubTransport::ok(image_reply("image/png", FIXED_B64));
        let session = session_with(transport.clone());
        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();

        assert!(matches!(
            session.regenerate().await,
            Err(EditError::InvalidRequest(_))
        ));

        let first = session.generate().await.unwrap();
        let second = session.regenerate().await.unwrap();
        assert_eq!(first, second);

        let requests = transport.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test]
    async fn test_download_and_reset() {
        let session = session_with(StubTransport::ok(image_reply("image/png", FIXED_B64)));
        let dir = tempfile::tempdir().unwrap();

        assert!(session.download(dir.path()).await.is_err());

        session.upload(png_file()).await.unwrap();
        session.set_prompt("make it blue").await.unwrap();
        session.generate().await.unwrap();

        let path = session.download(dir.path()).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"EDITED-BYTES");

        session.reset().await.unwrap();
        assert_eq!(session.snapshot().await, SessionState::default());
    }

    #[test]
    fn test_completion_without_generating_is_rejected() {
        let mut state = SessionState::default();
        let err = state
            .apply(Action::GenerateSucceeded(DataUri::new("image/png", "QUJD")))
            .unwrap_err();
        assert!(matches!(err, EditError::InvalidRequest(_)));
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Generating.to_string(), "generating");
        assert_eq!(Status::default(), Status::Idle);
    }
}
