//! Ordered assembly of `convert` arguments.
//!
//! A [`Pipeline`] is a list of steps, each a named group of command-line
//! arguments. Steps run in the order they are added; ImageMagick applies
//! operators left to right, so the order here *is* the processing order.
//!
//! Step names double as cache key components: two pipelines with the same
//! names in the same order and the same output format produce the same image
//! from the same source. `+repage` steps carry no name since they only reset
//! the virtual canvas.
//!
//! ```text
//! convert - -resize 200x100^ +repage -gravity Center -crop 200x100+0+0 +repage \
//!         -quiet -quality 85 -sampling-factor 2x1 -colorspace sRGB -strip jpeg:-
//! ```

use super::params::{Compose, Gravity, HexColor, OutputFormat};
use std::path::Path;

/// One group of arguments in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Filter name, `None` for bookkeeping steps such as `+repage`.
    pub name: Option<String>,
    pub args: Vec<String>,
}

/// Ordered chain of ImageMagick operations plus the output format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    steps: Vec<Step>,
    format: OutputFormat,
}

/// `+N` / `-N` offset notation used by `-crop` and `-geometry`.
fn signed_offset(v: i64) -> String {
    if v >= 0 { format!("+{v}") } else { v.to_string() }
}

fn to_args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: impl Into<String>, args: Vec<String>) {
        self.steps.push(Step {
            name: Some(name.into()),
            args,
        });
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn set_format(&mut self, format: OutputFormat) {
        self.format = format;
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Names of all named steps, in order.
    pub fn filters(&self) -> Vec<&str> {
        self.steps.iter().filter_map(|s| s.name.as_deref()).collect()
    }

    /// Reset the virtual canvas. Used around crops, extents and splices.
    pub fn repage(&mut self) {
        self.steps.push(Step {
            name: None,
            args: vec!["+repage".to_string()],
        });
    }

    /// Resize to `width`x`height`.
    ///
    /// Without `maintain_ratio` the image is forced to the exact size (`!`).
    /// With it, the image fits inside the box, or fills and overflows it
    /// (`^`) when a crop will follow.
    pub fn resize(&mut self, width: u32, height: u32, maintain_ratio: bool, will_crop: bool) {
        let (suffix, resize_type) = match (maintain_ratio, will_crop) {
            (false, _) => ("!", 0),
            (true, false) => ("", 1),
            (true, true) => ("^", 2),
        };
        self.push(
            format!("resize_{width}_{height}_{resize_type}"),
            vec!["-resize".into(), format!("{width}x{height}{suffix}")],
        );
    }

    /// Pad the image to exactly `width`x`height` on a transparent canvas,
    /// centered. Used after an aspect-preserving resize.
    pub fn constrain(&mut self, width: u32, height: u32) {
        let mut args = to_args(["-gravity", "Center", "-background", "transparent", "-extent"]);
        args.push(format!("{width}x{height}"));
        self.push(format!("constrain_{width}_{height}"), args);
    }

    /// Crop to `width`x`height` offset by (`x`, `y`) relative to `gravity`.
    pub fn crop(&mut self, width: u32, height: u32, x: i64, y: i64, gravity: Gravity) {
        let geometry = format!("{width}x{height}{}{}", signed_offset(x), signed_offset(y));
        self.push(
            format!("crop_{gravity}_{geometry}"),
            vec![
                "-gravity".into(),
                gravity.to_string(),
                "-crop".into(),
                geometry,
            ],
        );
    }

    /// Grow (or shrink) the canvas to `width`x`height`, filling new area with
    /// `background` composed by `compose`.
    pub fn extent(
        &mut self,
        width: u32,
        height: u32,
        gravity: Gravity,
        background: &HexColor,
        compose: Compose,
    ) {
        self.canvas_op("extent", width, height, gravity, background, compose);
    }

    /// Insert a `width`x`height` band of `background` at `gravity`.
    pub fn splice(
        &mut self,
        width: u32,
        height: u32,
        gravity: Gravity,
        background: &HexColor,
        compose: Compose,
    ) {
        self.canvas_op("splice", width, height, gravity, background, compose);
    }

    fn canvas_op(
        &mut self,
        op: &str,
        width: u32,
        height: u32,
        gravity: Gravity,
        background: &HexColor,
        compose: Compose,
    ) {
        self.push(
            format!(
                "{op}_{gravity}_{width}_{height}_{}_{}",
                background.as_str(),
                compose.as_str()
            ),
            vec![
                "-gravity".into(),
                gravity.to_string(),
                "-background".into(),
                background.as_str().to_string(),
                "-compose".into(),
                compose.as_str().to_string(),
                format!("-{op}"),
                format!("{width}x{height}"),
            ],
        );
    }

    /// Composite `image` over the current image at (`x`, `y`) relative to
    /// `gravity`. When `resize_to` is given, the overlay is first stretched
    /// to that size.
    pub fn overlay(
        &mut self,
        x: i64,
        y: i64,
        gravity: Gravity,
        image: &Path,
        resize_to: Option<(u32, u32)>,
    ) {
        let basename = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut args = vec!["(".to_string(), image.to_string_lossy().into_owned()];
        if let Some((w, h)) = resize_to {
            args.push("-resize".into());
            args.push(format!("{w}x{h}!"));
        }
        args.push(")".into());
        args.push("-gravity".into());
        args.push(gravity.to_string());
        args.push("-geometry".into());
        args.push(format!("{}{}", signed_offset(x), signed_offset(y)));
        args.push("-composite".into());
        self.push(format!("overlay_{x}_{y}_{basename}"), args);
    }

    /// Flip the image and keep the last `height` rows, fading alpha linearly
    /// from `top_alpha` to `bottom_alpha`.
    pub fn reflect(&mut self, height: u32, top_alpha: f64, bottom_alpha: f64) {
        let crop = format!("x{height}!");
        let range = top_alpha - bottom_alpha;
        let fx = format!("{top_alpha:.2}-(j/h)*{range:.2}");
        let mut args = to_args(["-gravity", "NorthWest", "-alpha", "on", "-flip"]);
        args.extend(to_args(["(", "+clone", "-crop"]));
        args.push(crop.clone());
        args.extend(to_args(["-delete", "1-100", "-channel", "G", "-fx"]));
        args.push(fx);
        args.extend(to_args(["-separate", ")"]));
        args.extend(to_args(["-alpha", "off", "-compose", "copy_opacity", "-composite"]));
        args.push("-crop".into());
        args.push(crop);
        args.extend(to_args(["-delete", "1-100"]));
        self.push(
            format!("reflect_{:.2}_{top_alpha:.2}_{bottom_alpha:.2}", f64::from(height)),
            args,
        );
    }

    /// Stretch contrast so the darkest 2% become black and the lightest 1% white.
    pub fn normalize(&mut self) {
        self.push("normalize", to_args(["-normalize"]));
    }

    /// Redistribute colors uniformly, channel by channel.
    pub fn equalize(&mut self) {
        self.push("equalize", to_args(["-equalize"]));
    }

    /// `-contrast-stretch A%xB%`: darkest `black`% to black, lightest `white`% to white.
    pub fn contrast_stretch(&mut self, black: i64, white: i64) {
        self.push(
            format!("contrast_stretch_{black}_{white}"),
            vec!["-contrast-stretch".into(), format!("{black}%x{white}%")],
        );
    }

    /// `-brightness-contrast A%xB%`: percentage change of brightness and contrast.
    pub fn brightness_contrast(&mut self, brightness: i64, contrast: i64) {
        self.push(
            format!("brightness_contrast_{brightness}_{contrast}"),
            vec![
                "-brightness-contrast".into(),
                format!("{brightness}%x{contrast}%"),
            ],
        );
    }

    /// Dither RGB down to 5 bits per channel against `colormap`, keeping alpha.
    /// Meant for PNGs shown on 16-bit (RGB555) screens.
    pub fn rgb555_dither(&mut self, colormap: &Path) {
        let mut args = to_args(["-background", "white"]);
        args.extend(to_args(["(", "+clone", "-channel", "RGB", "-separate"]));
        args.extend(to_args(["-type", "TrueColor", "-remap"]));
        args.push(colormap.to_string_lossy().into_owned());
        args.push(")".into());
        args.extend(to_args(["(", "-clone", "0", "-channel", "A", "-separate"]));
        args.extend(to_args(["-alpha", "copy", ")"]));
        args.extend(to_args(["-delete", "0", "-channel", "RGBA", "-combine"]));
        self.push("rgb555_dither", args);
    }

    /// Encoder settings and output target (stdout) for the current format.
    pub fn format_args(&self) -> Vec<String> {
        match self.format {
            // zlib level 9 + adaptive filtering, 8 bits per channel, keep alpha
            OutputFormat::Png => to_args(["-quality", "95", "-depth", "8", "png32:-"]),
            // Q85 with 4:2:2 chroma, forced sRGB, no EXIF
            OutputFormat::Jpeg => to_args([
                "-quality",
                "85",
                "-sampling-factor",
                "2x1",
                "-colorspace",
                "sRGB",
                "-strip",
                "jpeg:-",
            ]),
        }
    }

    /// Full argument vector, program first. The input is always read from stdin.
    pub fn command_line(&self, convert_path: &str) -> Vec<String> {
        let mut cmd = vec![convert_path.to_string(), "-".to_string()];
        for step in &self.steps {
            cmd.extend(step.args.iter().cloned());
        }
        cmd.push("-quiet".into());
        cmd.extend(self.format_args());
        cmd
    }

    /// File name identifying this pipeline's output, e.g.
    /// `resize_10_10_1+constrain_10_10.jpeg`.
    pub fn cache_name(&self) -> String {
        let filters = self.filters();
        let stem = if filters.is_empty() {
            "base".to_string()
        } else {
            filters.join("+")
        };
        format!("{stem}.{}", self.format.extension())
    }
}
