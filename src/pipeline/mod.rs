//! Pipeline stages for document-photo production.
//!
//! Each submodule implements exactly one transformation step and is a pure
//! function of its inputs, so every stage is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ segment ──▶ compose ──▶ caption ──▶ encode
//! (bytes)   (white bg)   (canvas)    (footer)    (JPEG in window)
//! ```
//!
//! 1. [`input`]   — decode the upload; every input error is raised here,
//!    before any work is done
//! 2. [`segment`] — mask the subject and blend the background to white;
//!    [`onnx`] adds a neural backend behind the `onnx` feature
//! 3. [`compose`] — scale to canvas width and centre in the head region
//! 4. [`caption`] — clear the footer and draw name and date, shrinking the
//!    font to fit
//! 5. [`encode`]  — search the quality ladder for the byte ceiling, then pad
//!    to the floor
//!
//! All five stages are CPU-bound; [`crate::produce`] runs them inside
//! `spawn_blocking` when called from async code.

pub mod caption;
pub mod compose;
pub mod encode;
pub mod input;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod segment;
