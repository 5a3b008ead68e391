//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PhotoConfigBuilder::progress_callback`] to receive events
//! as each stage of a photograph starts and finishes, and whenever a
//! [`PipelineWarning`] is raised.
//!
//! # Example
//!
//! ```rust
//! use docphoto::{PipelineProgressCallback, PhotoConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { finished: AtomicUsize::new(0) });
//!
//! let config = PhotoConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::{DocPhotoError, PipelineWarning};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One step of the document-photo pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Decode and validate the uploaded bytes.
    Decode,
    /// Replace the background with white.
    Segment,
    /// Scale onto the fixed-size canvas.
    Compose,
    /// Draw the name and date into the footer.
    Caption,
    /// Encode within the byte window.
    Encode,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Decode,
        Stage::Segment,
        Stage::Compose,
        Stage::Caption,
        Stage::Encode,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Decode => "decode",
            Stage::Segment => "segment",
            Stage::Compose => "compose",
            Stage::Caption => "caption",
            Stage::Encode => "encode",
        };
        f.write_str(name)
    }
}

/// Called by the pipeline as it processes a photograph.
///
/// Implementations must be `Send + Sync`: one pipeline may serve several
/// photographs concurrently (see [`crate::batch`]). All methods have default
/// no-op implementations so callers only override what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called just before `stage` runs.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when `stage` finished successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when `stage` failed; no later stage will run.
    fn on_stage_error(&self, stage: Stage, error: &DocPhotoError) {
        let _ = (stage, error);
    }

    /// Called for each non-fatal condition as it is raised.
    fn on_warning(&self, warning: &PipelineWarning) {
        let _ = warning;
    }
}

/// Type alias for a shared, heap-allocated progress callback.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

/// A do-nothing callback, for callers that need a concrete value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start:{stage}"));
        }
    }

    #[test]
    fn default_methods_are_noops() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Decode);
        cb.on_stage_complete(Stage::Decode, 3);
        cb.on_warning(&PipelineWarning::CaptionOverflow {
            text: "X".into(),
            width_px: 300,
            max_width_px: 256,
        });
    }

    #[test]
    fn overridden_method_is_dispatched_through_arc() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        for stage in Stage::ALL {
            cb.on_stage_start(stage);
        }
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], "start:decode");
        assert_eq!(events[4], "start:encode");
    }

    #[test]
    fn callback_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn PipelineProgressCallback>();
    }
}
