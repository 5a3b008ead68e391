//! Integration tests for docphoto through its public API.
//!
//! Every test uses the embedded caption face and a pinned date so that the
//! results do not depend on the fonts installed on the machine or on the
//! day the suite runs.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use chrono::NaiveDate;
use docphoto::{
    produce_stream, DocPhotoError, FontChoice, FontSource, PaddingStrategy, PhotoConfig, PhotoJob,
    PhotoPipeline, PipelineWarning, Reply, SearchStrategy, Session, SessionInput, SessionState,
};
use futures::StreamExt;
use image::{ImageEncoder, Rgb, RgbImage};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

const FLOOR: usize = 35 * 1024;
const CEILING: usize = 49 * 1024;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

/// Light-grey wall, a head-and-shoulders block in the lower middle.
fn portrait(w: u32, h: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(w, h, Rgb([214, 210, 200]));
    for y in h / 4..h {
        for x in w * 3 / 8..w * 5 / 8 {
            let shade = ((x + y) % 40) as u8;
            img.put_pixel(x, y, Rgb([150 + shade, 100 + shade / 2, 80]));
        }
    }
    for y in h * 3 / 5..h {
        for x in w / 4..w * 3 / 4 {
            img.put_pixel(x, y, Rgb([30, 40, 90]));
        }
    }
    img
}

fn png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), img.width(), img.height(), image::ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

fn config() -> docphoto::PhotoConfigBuilder {
    PhotoConfig::builder()
        .font(FontChoice::Builtin)
        .caption_date(date())
}

fn pipeline() -> PhotoPipeline {
    PhotoPipeline::new(config().build().unwrap()).unwrap()
}

// ── Production ───────────────────────────────────────────────────────────────

#[test]
fn large_portrait_becomes_document_photo() {
    let source = png(&portrait(4000, 3000));
    let photo = pipeline().produce(&source, "A. Kumar").unwrap();

    assert_eq!((photo.width, photo.height), (276, 354));
    assert!(
        (FLOOR..=CEILING).contains(&photo.byte_len),
        "size {} outside window",
        photo.byte_len
    );
    assert_eq!(photo.byte_len, photo.bytes.len());
    assert_eq!(photo.caption.name, "A. KUMAR");
    assert_eq!(photo.caption.date, "19-10-2026");
    assert_eq!(photo.caption.font_source, FontSource::Builtin);
    assert!(photo.is_clean(), "unexpected warnings: {:?}", photo.warnings);
    assert_eq!(photo.stats.source_width, 4000);
    assert_eq!(photo.stats.source_height, 3000);

    let decoded = image::load_from_memory(&photo.bytes).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (276, 354));
    // Corners of the head region were backdrop and must now be white.
    let corner = decoded.get_pixel(2, 2);
    assert!(corner.0.iter().all(|&c| c >= 240), "corner {corner:?}");
}

#[test]
fn overlong_name_shrinks_to_minimum_and_warns() {
    let source = png(&portrait(600, 800));
    let name = "Maximilian Alexander Bartholomew Fitzgerald-Wolfenstein III";
    let photo = pipeline().produce(&source, name).unwrap();

    assert_eq!(photo.caption.font_size, 8);
    assert!(photo.warnings.iter().any(|w| matches!(
        w,
        PipelineWarning::CaptionOverflow { width_px, max_width_px, .. } if width_px > max_width_px
    )));
    assert!((FLOOR..=CEILING).contains(&photo.byte_len));
}

#[test]
fn uniform_image_fails_segmentation_and_writes_nothing() {
    let blank = png(&RgbImage::from_pixel(400, 500, Rgb([128, 128, 128])));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("blank.jpg");

    let err = pipeline().produce_to_file(&blank, "Nobody", &out).unwrap_err();
    assert!(matches!(err, DocPhotoError::SegmentationFailure { .. }));
    assert!(!out.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn undecodable_upload_is_input_error() {
    let err = pipeline().produce(b"not an image at all", "A. Kumar").unwrap_err();
    assert!(matches!(err, DocPhotoError::UnreadableImage { .. }));
    assert!(err.is_input_error());
}

#[test]
fn same_input_and_date_give_identical_bytes() {
    let source = png(&portrait(900, 1200));
    let a = pipeline().produce(&source, "S. Devi").unwrap();
    let b = pipeline().produce(&source, "S. Devi").unwrap();
    assert_eq!(a.bytes, b.bytes);
    assert_ne!(a.request_id, b.request_id);
}

// ── Encoding budget ──────────────────────────────────────────────────────────

#[test]
fn impossible_ceiling_keeps_lowest_quality_with_warning() {
    // No JPEG of this canvas fits in 200 bytes; the headers alone exceed it.
    let config = config().byte_window(100, 200).build().unwrap();
    let photo = PhotoPipeline::new(config)
        .unwrap()
        .produce(&png(&portrait(400, 500)), "A. Kumar")
        .unwrap();

    assert_eq!(photo.quality, 5);
    assert_eq!(photo.attempts, 19);
    assert_eq!(photo.padding, 0);
    assert!(!photo.budget_met());
    assert!(photo
        .warnings
        .iter()
        .any(|w| matches!(w, PipelineWarning::EncodingBudgetUnmet { max_bytes: 200, .. })));
    image::load_from_memory(&photo.bytes).unwrap();
}

#[test]
fn binary_search_stays_within_window() {
    let config = config().search(SearchStrategy::Binary).build().unwrap();
    let photo = PhotoPipeline::new(config)
        .unwrap()
        .produce(&png(&portrait(800, 600)), "A. Kumar")
        .unwrap();
    assert!((FLOOR..=CEILING).contains(&photo.byte_len));
    assert!(photo.attempts <= 6);
}

/// A floor well above anything the canvas compresses to, so every run pads.
const PADDED_FLOOR: usize = 150_000;

fn padded(padding: PaddingStrategy) -> docphoto::ProducedPhoto {
    let config = config()
        .byte_window(PADDED_FLOOR, 200_000)
        .padding(padding)
        .build()
        .unwrap();
    PhotoPipeline::new(config)
        .unwrap()
        .produce(&png(&portrait(800, 600)), "A. Kumar")
        .unwrap()
}

#[test]
fn trailing_zero_padding_appends_after_image() {
    let photo = padded(PaddingStrategy::TrailingZeros);

    assert!(photo.padding > 0);
    assert_eq!(photo.byte_len, PADDED_FLOOR);
    assert_eq!(photo.compressed_len + photo.padding, PADDED_FLOOR);
    let eoi = photo.compressed_len;
    assert_eq!(&photo.bytes[eoi - 2..eoi], &[0xFF, 0xD9]);
    assert!(photo.bytes[eoi..].iter().all(|&b| b == 0));
    image::load_from_memory(&photo.bytes).unwrap();
}

#[test]
fn comment_padding_keeps_jfif_header() {
    let photo = padded(PaddingStrategy::CommentSegment);

    assert!(photo.padding > 0);
    assert_eq!(photo.byte_len, PADDED_FLOOR);
    let bytes = &photo.bytes;
    assert!(bytes.starts_with(&[0xFF, 0xD8]));
    assert!(bytes.ends_with(&[0xFF, 0xD9]));
    // APP0 "JFIF" stays directly after SOI; the comment follows it.
    assert_eq!(&bytes[2..4], &[0xFF, 0xE0]);
    assert_eq!(&bytes[6..11], b"JFIF\0");
    let after_app0 = 4 + u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
    assert_eq!(&bytes[after_app0..after_app0 + 2], &[0xFF, 0xFE]);

    let decoded = image::load_from_memory(bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (276, 354));
}

#[test]
fn one_byte_deficit_lands_inside_narrow_window() {
    // Learn the size of the first ladder step, then ask for one byte more.
    let unpadded = padded(PaddingStrategy::CommentSegment);
    let len = unpadded.compressed_len;

    let config = config().byte_window(len + 1, len + 2).build().unwrap();
    let photo = PhotoPipeline::new(config)
        .unwrap()
        .produce(&png(&portrait(800, 600)), "A. Kumar")
        .unwrap();

    assert_eq!(photo.quality, unpadded.quality);
    assert_eq!(photo.byte_len, len + 1);
    assert!(photo.byte_len <= len + 2);
    assert!(photo.budget_met());
    assert!(photo.is_clean(), "unexpected warnings: {:?}", photo.warnings);
}

#[test]
fn preview_is_smaller_and_decodable() {
    let photo = pipeline().produce(&png(&portrait(800, 600)), "A. Kumar").unwrap();
    let preview = docphoto::make_preview(&photo.bytes, 200).unwrap();
    assert!(preview.len() < photo.bytes.len());
    let decoded = image::load_from_memory(&preview).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (276, 354));
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_stream_yields_one_result_per_job() {
    let source = png(&portrait(500, 700));
    let jobs = vec![
        PhotoJob {
            id: "kumar".into(),
            source: source.clone(),
            name: "A. Kumar".into(),
        },
        PhotoJob {
            id: "devi".into(),
            source,
            name: "S. Devi".into(),
        },
        PhotoJob {
            id: "broken".into(),
            source: b"garbage".to_vec(),
            name: "X".into(),
        },
    ];

    let mut results: Vec<_> = produce_stream(Arc::new(pipeline()), jobs, 2)
        .collect()
        .await;
    results.sort_by(|a, b| a.id.cmp(&b.id));

    let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["broken", "devi", "kumar"]);
    assert!(results[0].result.is_err());
    assert_eq!(results[1].result.as_ref().unwrap().caption.name, "S. DEVI");
    assert_eq!(results[2].result.as_ref().unwrap().caption.name, "A. KUMAR");
}

// ── Conversation ─────────────────────────────────────────────────────────────

#[test]
fn conversation_delivers_photo_after_payment() {
    let mut session = Session::new(Arc::new(pipeline()), "https://pay.example/abc").unwrap();

    session.handle(SessionInput::Start);
    session.handle(SessionInput::Photo(png(&portrait(600, 800))));
    assert_eq!(session.state(), SessionState::AwaitingName);

    let replies = session.handle(SessionInput::Text("a. kumar".into()));
    assert_eq!(session.state(), SessionState::AwaitingPaymentConfirmation);
    assert!(replies.iter().any(|r| matches!(r, Reply::Preview { .. })));
    assert!(replies.iter().any(|r| matches!(
        r,
        Reply::PaymentPrompt { url, .. } if url == "https://pay.example/abc"
    )));

    let replies = session.handle(SessionInput::PaymentConfirmed);
    assert_eq!(session.state(), SessionState::Terminal);
    let path = replies
        .iter()
        .find_map(|r| match r {
            Reply::Document { path } => Some(path.clone()),
            _ => None,
        })
        .expect("document reply");
    let bytes = std::fs::read(path).unwrap();
    assert!((FLOOR..=CEILING).contains(&bytes.len()));
}

#[test]
fn conversation_cancel_is_terminal() {
    let mut session = Session::new(Arc::new(pipeline()), "https://pay.example/abc").unwrap();
    session.handle(SessionInput::Photo(png(&portrait(300, 400))));
    let replies = session.handle(SessionInput::Cancel);
    assert_eq!(session.state(), SessionState::Terminal);
    assert_eq!(replies, vec![Reply::Text("Operation cancelled.".into())]);
}
