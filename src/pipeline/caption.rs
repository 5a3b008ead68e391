//! Caption rendering: applicant name and date in the footer band.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────┐ 0
//! │                      │
//! │     head region      │
//! │                      │
//! ├──────────────────────┤ head_px
//! │      A. KUMAR        │ head_px + 8
//! │     19-10-2026       │ head_px + 8 + size + 4
//! └──────────────────────┘ height_px
//! ```
//!
//! Both lines are centred horizontally. Positions are the top edge of each
//! line. The font starts at 40% of the footer height and shrinks in 2 px
//! steps until the name fits within the canvas width minus a 20 px margin,
//! but never below 8 px. A name that still does not fit is drawn anyway
//! (clipped symmetrically) and reported as [`PipelineWarning::CaptionOverflow`].
//!
//! ## Fonts
//!
//! [`resolve_font`] is called once per pipeline. It loads an outline face
//! (explicit path, or the first bold serif found on the system) and falls
//! back to DejaVu Serif Bold, which is compiled into the crate, when that
//! fails. A fallback is reported through [`PipelineWarning::FontFallback`]
//! on every photograph that uses it.

use crate::config::{FontChoice, PixelGeometry};
use crate::error::{DocPhotoError, PipelineWarning};
use crate::output::CaptionLayout;
use crate::pipeline::compose::WHITE;
use ab_glyph::{FontArc, PxScale};
use chrono::NaiveDate;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Caption ink colour.
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
/// Share of the footer height used as the starting font size.
pub const START_SIZE_RATIO: f64 = 0.4;
/// Smallest font size the shrink loop will go to.
pub const MIN_FONT_PX: u32 = 8;
/// Font size decrement per shrink step.
pub const SHRINK_STEP_PX: u32 = 2;
/// Horizontal space kept free around the name (both sides together).
pub const SIDE_MARGIN_PX: u32 = 20;
/// Gap between the head region and the name line.
pub const TOP_GAP_PX: i32 = 8;
/// Gap between the name line and the date line.
pub const LINE_GAP_PX: i32 = 4;
/// Caption date format.
pub const DATE_FORMAT: &str = "%d-%m-%Y";

/// Bold serif faces tried, in order, for [`FontChoice::System`].
pub const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/liberation/LiberationSerif-Bold.ttf",
    "/usr/share/fonts/liberation-serif/LiberationSerif-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSerif-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSerif-Bold.ttf",
    "/Library/Fonts/Times New Roman Bold.ttf",
    "/System/Library/Fonts/Supplemental/Times New Roman Bold.ttf",
    "C:\\Windows\\Fonts\\timesbd.ttf",
];

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// DejaVu Serif Bold, the face used when no other can be loaded.
/// Licence: `assets/fonts/LICENSE-DejaVu.txt`.
pub static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSerif-Bold.ttf");

static EMBEDDED_FACE: Lazy<FontArc> =
    Lazy::new(|| FontArc::try_from_slice(EMBEDDED_FONT).unwrap());

// ── Fonts ────────────────────────────────────────────────────────────────

/// Where the caption face came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FontSource {
    /// An outline font loaded from this file.
    File { path: PathBuf },
    /// The embedded face, because it was asked for.
    Builtin,
    /// The embedded face, because loading the requested font failed.
    Fallback { reason: String },
}

/// An outline face that can measure and draw a single line of text.
#[derive(Clone)]
pub struct CaptionFace {
    font: FontArc,
}

impl std::fmt::Debug for CaptionFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CaptionFace(..)")
    }
}

impl CaptionFace {
    /// The face compiled into the crate.
    pub fn embedded() -> Self {
        Self {
            font: EMBEDDED_FACE.clone(),
        }
    }

    /// Parse a TrueType/OpenType font file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let data = std::fs::read(path).map_err(|e| e.to_string())?;
        let font =
            FontArc::try_from_vec(data).map_err(|e| format!("not a usable font file: {e}"))?;
        Ok(Self { font })
    }

    /// Rendered width of `text` at `px`.
    pub fn measure(&self, text: &str, px: u32) -> u32 {
        text_size(PxScale::from(px as f32), &self.font, text).0
    }

    /// Draw `text` with its top-left at (`x`, `y`).
    pub fn draw(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32, px: u32) {
        let scale = PxScale::from(px as f32);
        draw_text_mut(canvas, BLACK, x, y, scale, &self.font, text);
    }
}

/// The face chosen for a pipeline, plus how it was chosen.
#[derive(Debug)]
pub struct ResolvedFont {
    pub face: CaptionFace,
    pub source: FontSource,
    /// Set when the requested face could not be used.
    pub fallback: Option<PipelineWarning>,
}

impl ResolvedFont {
    /// The embedded face, on request.
    pub fn builtin() -> Self {
        Self {
            face: CaptionFace::embedded(),
            source: FontSource::Builtin,
            fallback: None,
        }
    }

    fn fallback(requested: String, reason: String) -> Self {
        warn!("Caption font unavailable ({}): {}", requested, reason);
        Self {
            face: CaptionFace::embedded(),
            source: FontSource::Fallback {
                reason: reason.clone(),
            },
            fallback: Some(PipelineWarning::FontFallback { requested, reason }),
        }
    }
}

/// Load the face selected by `choice`, falling back to the embedded face.
///
/// Never fails: a missing or corrupt font degrades to the embedded face with a
/// [`PipelineWarning::FontFallback`] recorded in [`ResolvedFont::fallback`].
pub fn resolve_font(choice: &FontChoice) -> ResolvedFont {
    match choice {
        FontChoice::Builtin => ResolvedFont::builtin(),
        FontChoice::Path(path) => match CaptionFace::from_file(path) {
            Ok(font) => loaded(font, path),
            Err(reason) => ResolvedFont::fallback(path.display().to_string(), reason),
        },
        FontChoice::System => {
            for candidate in SYSTEM_FONT_CANDIDATES {
                let path = Path::new(candidate);
                if !path.is_file() {
                    continue;
                }
                match CaptionFace::from_file(path) {
                    Ok(font) => return loaded(font, path),
                    Err(reason) => debug!("Skipping {}: {}", candidate, reason),
                }
            }
            ResolvedFont::fallback(
                "system bold serif".to_string(),
                format!(
                    "none of {} known locations held a usable face",
                    SYSTEM_FONT_CANDIDATES.len()
                ),
            )
        }
    }
}

fn loaded(face: CaptionFace, path: &Path) -> ResolvedFont {
    debug!("Caption font: {}", path.display());
    ResolvedFont {
        face,
        source: FontSource::File {
            path: path.to_path_buf(),
        },
        fallback: None,
    }
}

// ── Text ─────────────────────────────────────────────────────────────────

/// The two caption lines, already normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionText {
    pub name: String,
    pub date: String,
}

impl CaptionText {
    /// Normalise `name` and format `date` as `DD-MM-YYYY`.
    pub fn new(name: &str, date: NaiveDate) -> Result<Self, DocPhotoError> {
        Ok(Self {
            name: normalize_name(name)?,
            date: date.format(DATE_FORMAT).to_string(),
        })
    }
}

/// Trim, collapse inner whitespace and uppercase.
///
/// Diacritics are kept; `to_uppercase` is Unicode-aware, so `"élise"`
/// becomes `"ÉLISE"`.
pub fn normalize_name(name: &str) -> Result<String, DocPhotoError> {
    let collapsed = RE_WHITESPACE.replace_all(name.trim(), " ");
    if collapsed.is_empty() {
        return Err(DocPhotoError::EmptyName);
    }
    Ok(collapsed.to_uppercase())
}

/// Starting font size for a footer of `footer_px`.
pub fn start_font_size(footer_px: u32) -> u32 {
    ((footer_px as f64 * START_SIZE_RATIO) as u32).max(1)
}

/// Shrink from `start` until `text` fits in `max_width` or the floor is hit.
///
/// Returns the chosen size and the text width at that size. A start size
/// already below the floor is used as is.
pub fn fit_font_size(face: &CaptionFace, text: &str, start: u32, max_width: u32) -> (u32, u32) {
    let mut size = start;
    let mut width = face.measure(text, size);
    while width > max_width && size > MIN_FONT_PX {
        size = size.saturating_sub(SHRINK_STEP_PX).max(MIN_FONT_PX);
        width = face.measure(text, size);
    }
    (size, width)
}

/// Clear the footer and draw both caption lines.
///
/// Returns the final layout and, if the name overflows at the minimum size,
/// a [`PipelineWarning::CaptionOverflow`].
pub fn render_caption(
    canvas: &mut RgbImage,
    text: &CaptionText,
    font: &ResolvedFont,
    geometry: &PixelGeometry,
) -> (CaptionLayout, Option<PipelineWarning>) {
    let footer = geometry.footer_px();
    let head = geometry.head_px as i32;
    let width = geometry.width_px;
    draw_filled_rect_mut(
        canvas,
        Rect::at(0, head).of_size(width, footer.max(1)),
        WHITE,
    );

    let max_width = width.saturating_sub(SIDE_MARGIN_PX);
    let start = start_font_size(footer);
    let (size, name_width) = fit_font_size(&font.face, &text.name, start, max_width);
    let date_width = font.face.measure(&text.date, size);

    let name_origin = (centred_x(width, name_width), head + TOP_GAP_PX);
    let date_origin = (
        centred_x(width, date_width),
        head + TOP_GAP_PX + size as i32 + LINE_GAP_PX,
    );
    let face = &font.face;
    face.draw(canvas, &text.name, name_origin.0, name_origin.1, size);
    face.draw(canvas, &text.date, date_origin.0, date_origin.1, size);

    debug!(
        "Caption '{}' / '{}' at {}px (name {}px wide, limit {}px)",
        text.name, text.date, size, name_width, max_width
    );

    let overflow = (name_width > max_width).then(|| PipelineWarning::CaptionOverflow {
        text: text.name.clone(),
        width_px: name_width,
        max_width_px: max_width,
    });

    let layout = CaptionLayout {
        name: text.name.clone(),
        date: text.date.clone(),
        font_size: size,
        name_origin,
        date_origin,
        name_width,
        date_width,
        font_source: font.source.clone(),
    };
    (layout, overflow)
}

fn centred_x(canvas_w: u32, text_w: u32) -> i32 {
    (canvas_w as i32 - text_w as i32) / 2
}
