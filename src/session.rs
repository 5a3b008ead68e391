//! Conversation state machine that drives the pipeline for one user.
//!
//! ```text
//!             Photo                Text(name)                    PaymentConfirmed
//! AwaitingPhoto ──▶ AwaitingName ──────────────▶ AwaitingPayment ────────────────▶ Terminal
//!       ▲                │   pipeline runs here        │
//!       └── failure ─────┘                             │
//!                                    Cancel (any state) ───────────────────────▶ Terminal
//!                                    Start  (any state) ──▶ AwaitingPhoto
//! ```
//!
//! The session is transport-agnostic: a chat bot, the `docphoto chat` CLI
//! or a test feeds it [`SessionInput`]s and delivers the [`Reply`]s it
//! returns. Every file a session creates lives in its own temporary
//! directory, keyed by the session id, and is removed when the session is
//! dropped. Payment confirmation is taken at face value.

use crate::error::DocPhotoError;
use crate::pipeline::encode;
use crate::produce::PhotoPipeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MSG_WELCOME: &str = "Welcome! Please send your passport-size photo to begin.";
pub const MSG_PHOTO_RECEIVED: &str = "Photo received. Now please send your full name.";
pub const MSG_NO_PHOTO: &str = "No valid photo found. Please /start again.";
pub const MSG_PREVIEW: &str = "Preview: complete payment to receive the full-quality image.";
pub const MSG_PAY: &str = "Please complete payment:";
pub const MSG_DELIVERED: &str = "Payment confirmed! Here is your photo. Good luck!";
pub const MSG_NOT_FOUND: &str = "Image not found. Please /start again.";
pub const MSG_CANCELLED: &str = "Operation cancelled.";
pub const MSG_RESTART: &str = "Send /start to begin.";
pub const MSG_SEND_PHOTO: &str = "Please send a photo.";
pub const MSG_SEND_NAME: &str = "Please send your full name as text.";
pub const MSG_CONFIRM_PAYMENT: &str = "Tap \"I've Paid\" once payment is complete.";

/// Label of the payment-confirmation button.
pub const PAID_LABEL: &str = "I've Paid";

/// Where a session is in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingPhoto,
    AwaitingName,
    AwaitingPaymentConfirmation,
    Terminal,
}

/// One user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Start,
    Photo(Vec<u8>),
    Text(String),
    PaymentConfirmed,
    Cancel,
}

/// Something to show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Blurred preview image with a caption.
    Preview { path: PathBuf, caption: String },
    /// Payment link plus a confirmation button labelled `label`.
    PaymentPrompt { url: String, label: String },
    /// The finished photograph.
    Document { path: PathBuf },
}

impl Reply {
    fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }
}

/// A single user's conversation.
pub struct Session {
    id: Uuid,
    state: SessionState,
    workdir: TempDir,
    photo_path: Option<PathBuf>,
    final_path: Option<PathBuf>,
    pipeline: Arc<PhotoPipeline>,
    payment_url: String,
}

impl Session {
    /// Start a session in [`SessionState::AwaitingPhoto`].
    pub fn new(
        pipeline: Arc<PhotoPipeline>,
        payment_url: impl Into<String>,
    ) -> Result<Self, DocPhotoError> {
        let id = Uuid::new_v4();
        let workdir = tempfile::Builder::new()
            .prefix(&format!("docphoto-{id}-"))
            .tempdir()
            .map_err(|e| DocPhotoError::Internal(format!("session workdir: {e}")))?;
        debug!("Session {} in {}", id, workdir.path().display());
        Ok(Self {
            id,
            state: SessionState::AwaitingPhoto,
            workdir,
            photo_path: None,
            final_path: None,
            pipeline,
            payment_url: payment_url.into(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Apply one input and return what to show the user.
    pub fn handle(&mut self, input: SessionInput) -> Vec<Reply> {
        use SessionInput as I;
        use SessionState as S;

        match (self.state, input) {
            (_, I::Cancel) => {
                info!("Session {} cancelled", self.id);
                self.reset_files();
                self.state = S::Terminal;
                vec![Reply::text(MSG_CANCELLED)]
            }
            (_, I::Start) => {
                self.reset_files();
                self.state = S::AwaitingPhoto;
                vec![Reply::text(MSG_WELCOME)]
            }
            (S::AwaitingPhoto, I::Photo(bytes)) => self.accept_photo(bytes),
            (S::AwaitingPhoto, _) => vec![Reply::text(MSG_SEND_PHOTO)],
            (S::AwaitingName, I::Text(name)) => self.accept_name(&name),
            (S::AwaitingName, I::Photo(bytes)) => self.accept_photo(bytes),
            (S::AwaitingName, _) => vec![Reply::text(MSG_SEND_NAME)],
            (S::AwaitingPaymentConfirmation, I::PaymentConfirmed) => self.deliver(),
            (S::AwaitingPaymentConfirmation, _) => vec![Reply::text(MSG_CONFIRM_PAYMENT)],
            (S::Terminal, _) => vec![Reply::text(MSG_RESTART)],
        }
    }

    fn accept_photo(&mut self, bytes: Vec<u8>) -> Vec<Reply> {
        let path = self.workdir.path().join(format!("upload-{}.img", Uuid::new_v4()));
        if let Err(e) = std::fs::write(&path, &bytes) {
            warn!("Session {}: cannot store upload: {}", self.id, e);
            return vec![Reply::text(MSG_SEND_PHOTO)];
        }
        self.discard_upload();
        self.photo_path = Some(path);
        self.state = SessionState::AwaitingName;
        vec![Reply::text(MSG_PHOTO_RECEIVED)]
    }

    fn accept_name(&mut self, name: &str) -> Vec<Reply> {
        let source = match self.photo_path.as_deref().map(std::fs::read) {
            Some(Ok(bytes)) => bytes,
            _ => {
                self.state = SessionState::Terminal;
                return vec![Reply::text(MSG_NO_PHOTO)];
            }
        };

        match self.pipeline.produce_to_dir(&source, name, self.workdir.path()) {
            Ok((final_path, photo)) => {
                let preview_path = self
                    .workdir
                    .path()
                    .join(format!("preview-{}.jpg", photo.request_id));
                let preview = encode::make_preview(&photo.bytes, self.pipeline.config().target.dpi)
                    .and_then(|bytes| {
                        std::fs::write(&preview_path, bytes).map_err(|e| {
                            DocPhotoError::OutputWriteFailed {
                                path: preview_path.clone(),
                                source: e,
                            }
                        })
                    });

                self.final_path = Some(final_path);
                self.state = SessionState::AwaitingPaymentConfirmation;

                let mut replies = Vec::with_capacity(3);
                match preview {
                    Ok(()) => replies.push(Reply::Preview {
                        path: preview_path,
                        caption: MSG_PREVIEW.to_string(),
                    }),
                    Err(e) => warn!("Session {}: preview failed: {}", self.id, e),
                }
                replies.push(Reply::text(MSG_PAY));
                replies.push(Reply::PaymentPrompt {
                    url: self.payment_url.clone(),
                    label: PAID_LABEL.to_string(),
                });
                replies
            }
            Err(DocPhotoError::EmptyName) => vec![Reply::text(MSG_SEND_NAME)],
            Err(e) => {
                warn!("Session {}: pipeline failed: {}", self.id, e);
                self.discard_upload();
                self.state = SessionState::AwaitingPhoto;
                vec![Reply::text(format!(
                    "Sorry, that photo could not be processed: {e}\nPlease send another photo."
                ))]
            }
        }
    }

    fn deliver(&mut self) -> Vec<Reply> {
        self.state = SessionState::Terminal;
        match self.final_path.clone() {
            Some(path) if path.is_file() => {
                info!("Session {} delivered {}", self.id, path.display());
                vec![Reply::Document { path }, Reply::text(MSG_DELIVERED)]
            }
            _ => vec![Reply::text(MSG_NOT_FOUND)],
        }
    }

    /// Delete the stored upload, if any.
    fn discard_upload(&mut self) {
        if let Some(old) = self.photo_path.take() {
            if let Err(e) = std::fs::remove_file(&old) {
                debug!("Session {}: cannot remove {}: {}", self.id, old.display(), e);
            }
        }
    }

    /// Forget per-conversation files; the directory itself stays until drop.
    fn reset_files(&mut self) {
        self.photo_path = None;
        self.final_path = None;
        if let Ok(entries) = std::fs::read_dir(self.workdir.path()) {
            for entry in entries.flatten() {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("workdir", &self.workdir.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FontChoice, PhotoConfig};
    use image::{ImageEncoder, Rgb, RgbImage};

    fn portrait_png() -> Vec<u8> {
        let mut img = RgbImage::from_pixel(90, 120, Rgb([240, 240, 240]));
        for y in 30..120 {
            for x in 25..65 {
                img.put_pixel(x, y, Rgb([40, 20, 90]));
            }
        }
        let mut buf = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buf)
            .write_image(img.as_raw(), 90, 120, image::ExtendedColorType::Rgb8)
            .unwrap();
        buf
    }

    fn session() -> Session {
        let config = PhotoConfig::builder()
            .font(FontChoice::Builtin)
            .build()
            .unwrap();
        let pipeline = Arc::new(PhotoPipeline::new(config).unwrap());
        Session::new(pipeline, "https://pay.example/abc").unwrap()
    }

    #[test]
    fn happy_path_reaches_terminal_with_document() {
        let mut s = session();
        assert_eq!(s.handle(SessionInput::Start), vec![Reply::text(MSG_WELCOME)]);
        s.handle(SessionInput::Photo(portrait_png()));
        assert_eq!(s.state(), SessionState::AwaitingName);

        let replies = s.handle(SessionInput::Text("a. kumar".into()));
        assert_eq!(s.state(), SessionState::AwaitingPaymentConfirmation);
        assert!(replies.iter().any(|r| matches!(r, Reply::Preview { path, .. } if path.is_file())));
        assert!(replies.iter().any(|r| matches!(
            r,
            Reply::PaymentPrompt { url, .. } if url == "https://pay.example/abc"
        )));

        let replies = s.handle(SessionInput::PaymentConfirmed);
        assert_eq!(s.state(), SessionState::Terminal);
        match &replies[0] {
            Reply::Document { path } => {
                assert!(path.starts_with(s.workdir()));
                let bytes = std::fs::read(path).unwrap();
                let img = image::load_from_memory(&bytes).unwrap();
                assert_eq!((img.width(), img.height()), (276, 354));
            }
            other => panic!("expected document, got {other:?}"),
        }
    }

    #[test]
    fn cancel_from_any_state_is_terminal() {
        let mut s = session();
        s.handle(SessionInput::Photo(portrait_png()));
        assert_eq!(s.handle(SessionInput::Cancel), vec![Reply::text(MSG_CANCELLED)]);
        assert_eq!(s.state(), SessionState::Terminal);
        assert_eq!(s.handle(SessionInput::Text("x".into())), vec![Reply::text(MSG_RESTART)]);
    }

    #[test]
    fn missing_photo_at_name_step_is_terminal() {
        let mut s = session();
        s.handle(SessionInput::Photo(portrait_png()));
        // upload vanished from disk
        for entry in std::fs::read_dir(s.workdir()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        let replies = s.handle(SessionInput::Text("Name".into()));
        assert_eq!(replies, vec![Reply::text(MSG_NO_PHOTO)]);
        assert_eq!(s.state(), SessionState::Terminal);
    }

    #[test]
    fn unprocessable_photo_returns_to_awaiting_photo() {
        let mut s = session();
        s.handle(SessionInput::Photo(b"not an image".to_vec()));
        let replies = s.handle(SessionInput::Text("Name".into()));
        assert_eq!(s.state(), SessionState::AwaitingPhoto);
        assert!(matches!(&replies[0], Reply::Text(t) if t.contains("could not be processed")));
        assert_eq!(std::fs::read_dir(s.workdir()).unwrap().count(), 0);
    }

    #[test]
    fn second_upload_replaces_the_first() {
        let mut s = session();
        s.handle(SessionInput::Photo(b"first".to_vec()));
        s.handle(SessionInput::Photo(portrait_png()));
        assert_eq!(s.state(), SessionState::AwaitingName);

        let files: Vec<_> = std::fs::read_dir(s.workdir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), portrait_png());
    }

    #[test]
    fn blank_name_asks_again() {
        let mut s = session();
        s.handle(SessionInput::Photo(portrait_png()));
        assert_eq!(s.handle(SessionInput::Text("   ".into())), vec![Reply::text(MSG_SEND_NAME)]);
        assert_eq!(s.state(), SessionState::AwaitingName);
    }

    #[test]
    fn start_restarts_and_clears_files() {
        let mut s = session();
        s.handle(SessionInput::Photo(portrait_png()));
        s.handle(SessionInput::Start);
        assert_eq!(s.state(), SessionState::AwaitingPhoto);
        assert_eq!(std::fs::read_dir(s.workdir()).unwrap().count(), 0);
    }

    #[test]
    fn sessions_do_not_share_files() {
        let a = session();
        let b = session();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.workdir(), b.workdir());
    }

    #[test]
    fn workdir_is_removed_on_drop() {
        let s = session();
        let dir = s.workdir().to_path_buf();
        drop(s);
        assert!(!dir.exists());
    }
}
