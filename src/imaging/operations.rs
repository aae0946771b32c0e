//! Option set → pipeline planning.
//!
//! [`plan_pipeline`] decides which steps run and in what order. The order is
//! the durable contract of this service; callers rely on it to get the same
//! bytes (and the same cache name) for the same query:
//!
//! 1. resize, overlays, then either an anchored crop or a centered constrain
//! 2. extent (optionally shifted)
//! 3. splice, or the splice that realizes the extent shift
//! 4. post-crop
//! 5. reflection
//! 6. normalize, equalize, contrast-stretch, brightness-contrast
//! 7. output format (and RGB555 dithering for `png16`)

use super::params::{Dimensions2D, Gravity, OutputFormat};
use super::pipeline::Pipeline;
use crate::options::{FormatRequest, TransformOptions};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("{name} of {value} exceeds the maximum dimension {max}")]
    TooLarge {
        name: &'static str,
        value: i64,
        max: u32,
    },
    #[error("extent_shift {shift_w}x{shift_h} leaves no room inside extent {width}x{height}")]
    ShiftExceedsExtent {
        width: i64,
        height: i64,
        shift_w: i64,
        shift_h: i64,
    },
}

/// Deployment-specific inputs to planning.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    /// Directory overlay images are looked up in. Overlays are ignored without it.
    pub overlay_dir: Option<&'a Path>,
    /// Colormap for `png16` dithering. `png16` degrades to plain PNG without it.
    pub dither_colormap: Option<&'a Path>,
    /// Upper bound for any requested output dimension.
    pub max_dimension: u32,
}

impl Default for PlanContext<'_> {
    fn default() -> Self {
        Self {
            overlay_dir: None,
            dither_colormap: None,
            max_dimension: 4096,
        }
    }
}

/// Validate a positive pair against the dimension limit.
fn checked(
    dims: Dimensions2D,
    name: &'static str,
    ctx: &PlanContext<'_>,
) -> Result<(u32, u32), PlanError> {
    let too_large = |value: i64| PlanError::TooLarge {
        name,
        value,
        max: ctx.max_dimension,
    };
    let side = |v: i64| {
        u32::try_from(v)
            .ok()
            .filter(|v| *v <= ctx.max_dimension)
            .ok_or_else(|| too_large(v))
    };
    Ok((side(dims.width)?, side(dims.height)?))
}

/// Gravity a shifted extent is spliced at: the sign of each shift component
/// picks the side the padding goes on.
fn shift_gravity(shift: Dimensions2D) -> Gravity {
    match (shift.height >= 0, shift.width >= 0) {
        (true, true) => Gravity::NorthWest,
        (true, false) => Gravity::NorthEast,
        (false, true) => Gravity::SouthWest,
        (false, false) => Gravity::SouthEast,
    }
}

/// Build the ordered pipeline for `opts`.
pub fn plan_pipeline(
    opts: &TransformOptions,
    ctx: &PlanContext<'_>,
) -> Result<Pipeline, PlanError> {
    let mut p = Pipeline::new();

    if let Some(size) = opts.size {
        let (w, h) = checked(size, "size", ctx)?;
        p.resize(w, h, opts.maintain_ratio, opts.crop);

        add_overlays(&mut p, opts, ctx, (w, h));

        if opts.maintain_ratio && opts.crop {
            p.repage();
            p.crop(w, h, 0, 0, opts.crop_anchor);
            p.repage();
        } else if !opts.reflection_requested && !opts.extent {
            p.constrain(w, h);
        }
    }

    let mut shift = None;
    if opts.extent
        && let Some(extent) = opts.extent_size
    {
        checked(extent, "extent_size", ctx)?;
        let (mut w, mut h) = (extent.width, extent.height);
        if let Some(s) = opts.extent_shift {
            w -= s.width.abs();
            h -= s.height.abs();
            if w <= 0 || h <= 0 {
                return Err(PlanError::ShiftExceedsExtent {
                    width: extent.width,
                    height: extent.height,
                    shift_w: s.width,
                    shift_h: s.height,
                });
            }
            shift = Some(s);
        }
        let (w, h) = checked(Dimensions2D::new(w, h), "extent_size", ctx)?;
        p.repage();
        p.extent(
            w,
            h,
            opts.extent_anchor,
            &opts.extent_background,
            opts.extent_compose,
        );
        p.repage();
    }

    // A shifted extent and an explicit splice are mutually exclusive; the shift wins.
    if let Some(s) = shift {
        let (w, h) = checked(
            Dimensions2D::new(s.width.abs(), s.height.abs()),
            "extent_shift",
            ctx,
        )?;
        p.repage();
        p.splice(
            w,
            h,
            shift_gravity(s),
            &opts.extent_background,
            opts.extent_compose,
        );
        p.repage();
    } else if opts.splice
        && let Some(splice) = opts.splice_size
    {
        let (w, h) = checked(splice, "splice_size", ctx)?;
        p.repage();
        p.splice(
            w,
            h,
            opts.splice_anchor,
            &opts.splice_background,
            opts.splice_compose,
        );
        p.repage();
    }

    if let Some(post) = opts.post_crop_size {
        let (w, h) = checked(post, "post_crop_size", ctx)?;
        p.repage();
        p.crop(w, h, 0, 0, opts.post_crop_anchor);
        p.repage();
    }

    if let Some(r) = opts.reflection {
        if r.height > ctx.max_dimension {
            return Err(PlanError::TooLarge {
                name: "reflection_height",
                value: i64::from(r.height),
                max: ctx.max_dimension,
            });
        }
        p.reflect(r.height, r.alpha_top, r.alpha_bottom);
    }

    if opts.normalize {
        p.normalize();
    }
    if opts.equalize {
        p.equalize();
    }
    if let Some(cs) = opts.contrast_stretch {
        p.contrast_stretch(cs.width, cs.height);
    }
    if let Some(bc) = opts.brightness_contrast {
        p.brightness_contrast(bc.width, bc.height);
    }

    match opts.format {
        FormatRequest::Jpeg => p.set_format(OutputFormat::Jpeg),
        FormatRequest::Png => p.set_format(OutputFormat::Png),
        FormatRequest::Png16 => {
            p.set_format(OutputFormat::Png);
            match ctx.dither_colormap {
                Some(colormap) => p.rgb555_dither(colormap),
                None => tracing::warn!("png16 requested but no dither colormap configured"),
            }
        }
    }

    Ok(p)
}

/// Composite each requested overlay that exists, stretched to the resize box.
fn add_overlays(
    p: &mut Pipeline,
    opts: &TransformOptions,
    ctx: &PlanContext<'_>,
    size: (u32, u32),
) {
    if opts.overlay_images.is_empty() {
        return;
    }
    let Some(dir) = ctx.overlay_dir else {
        tracing::debug!("overlay_image ignored: no overlay directory configured");
        return;
    };
    for name in &opts.overlay_images {
        let path = dir.join(name);
        if path.is_file() {
            p.overlay(0, 0, Gravity::Center, &path, Some(size));
        } else {
            tracing::warn!("Requested overlay image that does not exist: {}", path.display());
        }
    }
}
