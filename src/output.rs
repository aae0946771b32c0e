//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Plan
//!
//! ```text
//! Steps
//! 001 resize_200_200_2
//!     -resize 200x200^
//!     +repage
//! 002 crop_Center_200x200+0+0
//!     -gravity Center -crop 200x200+0+0
//!     +repage
//!
//! Output
//!     image/jpeg
//!     Cache name: resize_200_200_2+crop_Center_200x200+0+0.jpeg
//!
//! Command
//!     convert - -resize '200x200^' +repage ...
//! ```
//!
//! Unnamed bookkeeping steps (`+repage`) are listed under the step they
//! follow rather than numbered.
//!
//! ## Check
//!
//! ```text
//! Config
//!     bind: 127.0.0.1:8888
//!     ...
//!
//! Checks
//!     ok    convert: Version: ImageMagick 6.9.12-98
//!     FAIL  image_dir: images (not a directory)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability. `main` prints the lines.

use crate::cache;
use crate::config::{ServiceConfig, effective_permits};
use crate::imaging::Pipeline;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Quote an argument for a POSIX shell, leaving plain words alone.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_+=/.,:%@#".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Join a command line into a single copy-pasteable shell string.
pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format the `plan` command output.
pub fn format_plan_output(pipeline: &Pipeline, convert_path: &str) -> Vec<String> {
    let mut lines = vec!["Steps".to_string()];
    let mut named = 0;
    for step in pipeline.steps() {
        if let Some(name) = &step.name {
            named += 1;
            lines.push(format!("{} {}", format_index(named), name));
        }
        lines.push(format!("{}{}", indent(1), shell_join(&step.args)));
    }
    if pipeline.steps().is_empty() {
        lines.push(format!("{}(none)", indent(1)));
    }

    lines.push(String::new());
    lines.push("Output".to_string());
    lines.push(format!("{}{}", indent(1), pipeline.mime_type()));
    lines.push(format!(
        "{}Cache name: {}",
        indent(1),
        cache::entry_name(pipeline)
    ));

    lines.push(String::new());
    lines.push("Command".to_string());
    lines.push(format!(
        "{}{}",
        indent(1),
        shell_join(&pipeline.command_line(convert_path))
    ));
    lines
}

/// Result of one environment check run by the `check` command.
#[derive(Debug)]
pub struct Check {
    pub name: &'static str,
    pub outcome: Result<String, String>,
}

/// Summarize the effective configuration.
pub fn format_config_summary(config: &ServiceConfig) -> Vec<String> {
    let optional = |p: &Option<std::path::PathBuf>| match p {
        Some(p) => p.display().to_string(),
        None => "(none)".to_string(),
    };
    let remote = if !config.sources.allow_remote {
        "disabled".to_string()
    } else if config.sources.allowed_hosts.is_empty() {
        "any host".to_string()
    } else {
        config.sources.allowed_hosts.join(", ")
    };
    let cache = if config.cache.enabled {
        config.cache.dir.display().to_string()
    } else {
        "disabled".to_string()
    };

    vec![
        "Config".to_string(),
        format!("{}bind: {}", indent(1), config.server.bind),
        format!("{}convert: {}", indent(1), config.convert.convert_path),
        format!("{}timeout: {}s", indent(1), config.convert.timeout_secs),
        format!(
            "{}image_dir: {}",
            indent(1),
            config.sources.image_dir.display()
        ),
        format!(
            "{}overlay_dir: {}",
            indent(1),
            optional(&config.sources.overlay_dir)
        ),
        format!(
            "{}dither_colormap: {}",
            indent(1),
            optional(&config.convert.dither_colormap)
        ),
        format!("{}remote: {}", indent(1), remote),
        format!("{}cache: {}", indent(1), cache),
        format!(
            "{}max_processes: {}",
            indent(1),
            effective_permits(&config.processing)
        ),
        format!(
            "{}max_dimension: {}",
            indent(1),
            config.limits.max_dimension
        ),
    ]
}

/// Format the `check` command's results.
pub fn format_check_output(checks: &[Check]) -> Vec<String> {
    let mut lines = vec!["Checks".to_string()];
    for check in checks {
        let line = match &check.outcome {
            Ok(detail) => format!("{}ok    {}: {}", indent(1), check.name, detail),
            Err(problem) => format!("{}FAIL  {}: {}", indent(1), check.name, problem),
        };
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Gravity;

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn shell_quote_plain_words() {
        assert_eq!(shell_quote("-resize"), "-resize");
        assert_eq!(shell_quote("200x100+0-5"), "200x100+0-5");
        assert_eq!(shell_quote("#00000000"), "#00000000");
        assert_eq!(shell_quote("jpeg:-"), "jpeg:-");
    }

    #[test]
    fn shell_quote_special_characters() {
        assert_eq!(shell_quote("200x100^"), "'200x100^'");
        assert_eq!(shell_quote("("), "'('");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    // =========================================================================
    // Plan output
    // =========================================================================

    #[test]
    fn plan_output_for_empty_pipeline() {
        let lines = format_plan_output(&Pipeline::new(), "convert");
        assert_eq!(
            lines,
            [
                "Steps",
                "    (none)",
                "",
                "Output",
                "    image/jpeg",
                "    Cache name: base.jpeg",
                "",
                "Command",
                "    convert - -quiet -quality 85 -sampling-factor 2x1 -colorspace sRGB -strip jpeg:-",
            ]
        );
    }

    #[test]
    fn plan_output_numbers_named_steps() {
        let mut p = Pipeline::new();
        p.resize(200, 200, true, true);
        p.repage();
        p.crop(200, 200, 0, 0, Gravity::Center);
        p.repage();
        let lines = format_plan_output(&p, "/usr/bin/convert");

        assert_eq!(
            lines[..7],
            [
                "Steps",
                "001 resize_200_200_2",
                "    -resize '200x200^'",
                "    +repage",
                "002 crop_Center_200x200+0+0",
                "    -gravity Center -crop 200x200+0+0",
                "    +repage",
            ]
        );
        assert!(lines.last().unwrap().starts_with("    /usr/bin/convert - -resize"));
    }

    // =========================================================================
    // Check output
    // =========================================================================

    #[test]
    fn check_output_marks_failures() {
        let checks = [
            Check {
                name: "convert",
                outcome: Ok("ImageMagick 6.9".into()),
            },
            Check {
                name: "image_dir",
                outcome: Err("images (not a directory)".into()),
            },
        ];
        assert_eq!(
            format_check_output(&checks),
            [
                "Checks",
                "    ok    convert: ImageMagick 6.9",
                "    FAIL  image_dir: images (not a directory)",
            ]
        );
    }

    #[test]
    fn config_summary_shows_disabled_features() {
        let lines = format_config_summary(&ServiceConfig::default());
        assert!(lines.contains(&"    remote: disabled".to_string()));
        assert!(lines.contains(&"    cache: disabled".to_string()));
        assert!(lines.contains(&"    overlay_dir: (none)".to_string()));
    }
}
