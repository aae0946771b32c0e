//! Query-string option parsing.
//!
//! Turns the flat `name → value` map of a request into [`TransformOptions`],
//! a typed description of every transformation the caller asked for. No
//! ordering decisions happen here; that is the job of
//! [`plan_pipeline`](crate::imaging::plan_pipeline).
//!
//! ## Leniency rules
//!
//! Parameters fall into two groups:
//!
//! - **Strict**: flags, anchors, colors and overlay names. A malformed value
//!   is an [`OptionsError`] (rendered as `400 Bad Request`), because these
//!   values end up verbatim on the `convert` command line.
//! - **Lenient**: `NxM` pairs and reflection values. A malformed value is
//!   treated as if the parameter were absent.
//!
//! Values are whitespace-trimmed and an empty value counts as absent.
//!
//! ## Parameters
//!
//! ```text
//! size=NxM                 resize target
//! maintain_ratio=1         keep aspect ratio when resizing
//! crop=1                   fill and crop to size (needs maintain_ratio=1)
//! crop_anchor=ANCHOR       where the crop is anchored (default center)
//! extent=1                 expand canvas to extent_size (default: size)
//! extent_size=NxM
//! extent_anchor=ANCHOR
//! extent_background=#HEX   default #00000000
//! extent_compose=over|add|subtract
//! extent_shift=NxM         shift the image inside the extent (may be negative)
//! splice=1                 insert a band of splice_size (default: size)
//! splice_size=NxM
//! splice_anchor=ANCHOR
//! splice_background=#HEX
//! splice_compose=over|add|subtract
//! post_crop_size=NxM       second crop after resize/extent/splice
//! post_crop_anchor=ANCHOR
//! reflection_height=N      mirrored, fading reflection of N rows
//! reflection_alpha_top=F   0..1, default 1
//! reflection_alpha_bottom=F 0..1, default 0
//! normalize=1  equalize=1
//! contrast_stretch=AxB     -contrast-stretch A%xB%
//! brightness_contrast=CxD  -brightness-contrast C%xD%
//! overlay_image=a.png,b.png  bare file names from the overlay directory
//! format=jpeg|png|png16    default jpeg
//! ```

use crate::imaging::{Compose, Dimensions2D, Gravity, HexColor};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
    #[error("{name} must be an integer flag, got {value:?}")]
    InvalidFlag { name: &'static str, value: String },
    #[error("{name} has unknown anchor {value:?}")]
    UnknownAnchor { name: &'static str, value: String },
    #[error("{name} must be a hex color like #FFFF00AA, got {value:?}")]
    InvalidColor { name: &'static str, value: String },
    #[error("overlay_image entries must be bare file names, got {0:?}")]
    InvalidOverlayName(String),
}

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatRequest {
    #[default]
    Jpeg,
    Png,
    /// PNG pre-dithered for 16-bit (RGB555) screens.
    Png16,
}

/// Parameters of a mirrored reflection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reflection {
    pub height: u32,
    /// Alpha at the top of the reflection, in `[0, 1]`.
    pub alpha_top: f64,
    /// Alpha at the bottom of the reflection, in `[0, 1]`.
    pub alpha_bottom: f64,
}

/// Everything a request asked for, parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub size: Option<Dimensions2D>,
    pub maintain_ratio: bool,
    pub crop: bool,
    pub crop_anchor: Gravity,

    pub extent: bool,
    pub extent_size: Option<Dimensions2D>,
    pub extent_anchor: Gravity,
    pub extent_background: HexColor,
    pub extent_compose: Compose,
    pub extent_shift: Option<Dimensions2D>,

    pub splice: bool,
    pub splice_size: Option<Dimensions2D>,
    pub splice_anchor: Gravity,
    pub splice_background: HexColor,
    pub splice_compose: Compose,

    pub post_crop_size: Option<Dimensions2D>,
    pub post_crop_anchor: Gravity,

    pub reflection: Option<Reflection>,
    /// `reflection_height` was given a non-empty value, whether or not it
    /// parsed. This alone suppresses the centered constrain after a resize.
    pub reflection_requested: bool,

    pub normalize: bool,
    pub equalize: bool,
    pub contrast_stretch: Option<Dimensions2D>,
    pub brightness_contrast: Option<Dimensions2D>,

    pub overlay_images: Vec<String>,
    pub format: FormatRequest,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            size: None,
            maintain_ratio: false,
            crop: false,
            crop_anchor: Gravity::Center,
            extent: false,
            extent_size: None,
            extent_anchor: Gravity::Center,
            extent_background: HexColor::transparent(),
            extent_compose: Compose::Over,
            extent_shift: None,
            splice: false,
            splice_size: None,
            splice_anchor: Gravity::Center,
            splice_background: HexColor::transparent(),
            splice_compose: Compose::Over,
            post_crop_size: None,
            post_crop_anchor: Gravity::Center,
            reflection: None,
            reflection_requested: false,
            normalize: false,
            equalize: false,
            contrast_stretch: None,
            brightness_contrast: None,
            overlay_images: Vec::new(),
            format: FormatRequest::Jpeg,
        }
    }
}

/// Look up a parameter, trimmed, treating empty values as absent.
fn arg<'a>(query: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    query
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Parse `NxM` into a pair of integers.
///
/// Each side may be any finite float and is rounded half away from zero.
/// Only the first `x` splits, so `3x4x5` is malformed. Returns `None` for
/// anything that does not parse.
///
/// ```
/// # use magick_gate::options::parse_2d_param;
/// # use magick_gate::imaging::Dimensions2D;
/// assert_eq!(parse_2d_param("200x100"), Some(Dimensions2D::new(200, 100)));
/// assert_eq!(parse_2d_param("10.5x-3.5"), Some(Dimensions2D::new(11, -4)));
/// assert_eq!(parse_2d_param("200"), None);
/// ```
pub fn parse_2d_param(value: &str) -> Option<Dimensions2D> {
    let (w, h) = value.split_once('x')?;
    Some(Dimensions2D::new(parse_rounded(w)?, parse_rounded(h)?))
}

fn parse_rounded(s: &str) -> Option<i64> {
    let v: f64 = s.trim().parse().ok()?;
    // i64 covers anything a sane geometry can hold; reject the rest outright
    (v.is_finite() && v.abs() < 1e15).then(|| v.round() as i64)
}

/// `NxM` where both sides must be positive.
fn parse_size(value: Option<&str>) -> Option<Dimensions2D> {
    value.and_then(parse_2d_param).filter(|d| d.is_positive())
}

fn parse_flag(query: &HashMap<String, String>, name: &'static str) -> Result<bool, OptionsError> {
    match arg(query, name) {
        None => Ok(false),
        Some(v) => v
            .parse::<i64>()
            .map(|n| n == 1)
            .map_err(|_| OptionsError::InvalidFlag {
                name,
                value: v.to_string(),
            }),
    }
}

fn parse_anchor(
    query: &HashMap<String, String>,
    name: &'static str,
) -> Result<Gravity, OptionsError> {
    match arg(query, name) {
        None => Ok(Gravity::Center),
        Some(v) => Gravity::from_anchor(v).ok_or_else(|| OptionsError::UnknownAnchor {
            name,
            value: v.to_string(),
        }),
    }
}

fn parse_color(
    query: &HashMap<String, String>,
    name: &'static str,
) -> Result<HexColor, OptionsError> {
    match arg(query, name) {
        None => Ok(HexColor::transparent()),
        Some(v) => HexColor::parse(v).ok_or_else(|| OptionsError::InvalidColor {
            name,
            value: v.to_string(),
        }),
    }
}

fn parse_compose(query: &HashMap<String, String>, name: &str) -> Compose {
    arg(query, name)
        .map(Compose::parse_or_default)
        .unwrap_or_default()
}

/// A reflection needs all three values to parse; a zero or negative height
/// means no reflection.
fn parse_reflection(query: &HashMap<String, String>) -> Option<Reflection> {
    let height: i64 = arg(query, "reflection_height")?.parse().ok()?;
    let alpha = |name: &str, default: f64| -> Option<f64> {
        match arg(query, name) {
            None => Some(default),
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|a| a.is_finite())
                .map(|a| a.clamp(0.0, 1.0)),
        }
    };
    let alpha_top = alpha("reflection_alpha_top", 1.0)?;
    let alpha_bottom = alpha("reflection_alpha_bottom", 0.0)?;
    let height = u32::try_from(height).ok().filter(|h| *h > 0)?;
    Some(Reflection {
        height,
        alpha_top,
        alpha_bottom,
    })
}

/// Split a comma-separated overlay list. Entries must be plain file names
/// (`[A-Za-z0-9._-]`, not starting with `.` or `-`).
fn parse_overlay_list(value: Option<&str>) -> Result<Vec<String>, OptionsError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let mut names = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let bare = !entry.starts_with(['.', '-'])
            && entry
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !bare {
            return Err(OptionsError::InvalidOverlayName(entry.to_string()));
        }
        names.push(entry.to_string());
    }
    Ok(names)
}

fn parse_format(value: Option<&str>) -> FormatRequest {
    let value = value.unwrap_or_default().to_ascii_lowercase();
    if value == "png16" {
        FormatRequest::Png16
    } else if value.starts_with("png") {
        FormatRequest::Png
    } else {
        FormatRequest::Jpeg
    }
}

impl TransformOptions {
    /// Parse a request's query parameters.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, OptionsError> {
        let size_raw = arg(query, "size");
        Ok(Self {
            size: parse_size(size_raw),
            maintain_ratio: parse_flag(query, "maintain_ratio")?,
            crop: parse_flag(query, "crop")?,
            crop_anchor: parse_anchor(query, "crop_anchor")?,

            extent: parse_flag(query, "extent")?,
            extent_size: parse_size(arg(query, "extent_size").or(size_raw)),
            extent_anchor: parse_anchor(query, "extent_anchor")?,
            extent_background: parse_color(query, "extent_background")?,
            extent_compose: parse_compose(query, "extent_compose"),
            extent_shift: arg(query, "extent_shift").and_then(parse_2d_param),

            splice: parse_flag(query, "splice")?,
            splice_size: parse_size(arg(query, "splice_size").or(size_raw)),
            splice_anchor: parse_anchor(query, "splice_anchor")?,
            splice_background: parse_color(query, "splice_background")?,
            splice_compose: parse_compose(query, "splice_compose"),

            post_crop_size: parse_size(arg(query, "post_crop_size")),
            post_crop_anchor: parse_anchor(query, "post_crop_anchor")?,

            reflection: parse_reflection(query),
            reflection_requested: arg(query, "reflection_height").is_some(),

            normalize: parse_flag(query, "normalize")?,
            equalize: parse_flag(query, "equalize")?,
            contrast_stretch: arg(query, "contrast_stretch").and_then(parse_2d_param),
            brightness_contrast: arg(query, "brightness_contrast").and_then(parse_2d_param),

            overlay_images: parse_overlay_list(arg(query, "overlay_image"))?,
            format: parse_format(arg(query, "format")),
        })
    }
}
