//! Value types for pipeline steps.
//!
//! These types describe *what* a step needs, already validated. They sit
//! between the loosely-typed query string ([`options`](crate::options)) and
//! the argument assembly in [`pipeline`](super::pipeline), so the pipeline
//! never has to re-check a value it is about to pass to `convert`.
//!
//! ## Types
//!
//! - [`Gravity`]: ImageMagick `-gravity` values reachable from anchor names.
//! - [`OutputFormat`]: JPEG or PNG, with MIME type and cache extension.
//! - [`Compose`]: Compose method for extent/splice backgrounds.
//! - [`HexColor`]: A `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa` color.
//! - [`Dimensions2D`]: A parsed `NxM` pair (may be negative, e.g. for shifts).

use std::fmt;

/// ImageMagick gravity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gravity {
    NorthWest,
    North,
    NorthEast,
    West,
    Center,
    East,
    SouthWest,
    South,
    SouthEast,
}

impl Gravity {
    /// Map a query-string anchor name to a gravity.
    ///
    /// Accepted names: `left right top bottom middle center topleft topright
    /// bottomleft bottomright`, case-insensitive. `middle` and `center` are
    /// synonyms.
    pub fn from_anchor(anchor: &str) -> Option<Self> {
        match anchor.to_ascii_lowercase().as_str() {
            "left" => Some(Self::West),
            "right" => Some(Self::East),
            "top" => Some(Self::North),
            "bottom" => Some(Self::South),
            "middle" | "center" => Some(Self::Center),
            "topleft" => Some(Self::NorthWest),
            "topright" => Some(Self::NorthEast),
            "bottomleft" => Some(Self::SouthWest),
            "bottomright" => Some(Self::SouthEast),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NorthWest => "NorthWest",
            Self::North => "North",
            Self::NorthEast => "NorthEast",
            Self::West => "West",
            Self::Center => "Center",
            Self::East => "East",
            Self::SouthWest => "SouthWest",
            Self::South => "South",
            Self::SouthEast => "SouthEast",
        }
    }
}

impl fmt::Display for Gravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output encoding for the converted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Extension used for cache file names.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }
}

/// Compose method used when extending or splicing onto a background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compose {
    #[default]
    Over,
    Add,
    Subtract,
}

impl Compose {
    /// Parse a compose name. Matching is case-sensitive; anything else
    /// falls back to [`Compose::Over`].
    pub fn parse_or_default(name: &str) -> Self {
        match name {
            "add" => Self::Add,
            "subtract" => Self::Subtract,
            _ => Self::Over,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Over => "over",
            Self::Add => "add",
            Self::Subtract => "subtract",
        }
    }
}

/// A validated hex color, stored as written (including the leading `#`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexColor(String);

impl HexColor {
    /// Fully transparent black, the default extent/splice background.
    pub fn transparent() -> Self {
        Self("#00000000".to_string())
    }

    /// Parse `#` followed by 3, 4, 6 or 8 hex digits.
    pub fn parse(value: &str) -> Option<Self> {
        let digits = value.strip_prefix('#')?;
        let valid_len = matches!(digits.len(), 3 | 4 | 6 | 8);
        if valid_len && digits.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(value.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for HexColor {
    fn default() -> Self {
        Self::transparent()
    }
}

/// A parsed `NxM` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions2D {
    pub width: i64,
    pub height: i64,
}

impl Dimensions2D {
    pub fn new(width: i64, height: i64) -> Self {
        Self { width, height }
    }

    pub fn is_positive(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_map_to_gravities() {
        assert_eq!(Gravity::from_anchor("left"), Some(Gravity::West));
        assert_eq!(Gravity::from_anchor("right"), Some(Gravity::East));
        assert_eq!(Gravity::from_anchor("top"), Some(Gravity::North));
        assert_eq!(Gravity::from_anchor("bottom"), Some(Gravity::South));
        assert_eq!(Gravity::from_anchor("topleft"), Some(Gravity::NorthWest));
        assert_eq!(Gravity::from_anchor("topright"), Some(Gravity::NorthEast));
        assert_eq!(Gravity::from_anchor("bottomleft"), Some(Gravity::SouthWest));
        assert_eq!(Gravity::from_anchor("bottomright"), Some(Gravity::SouthEast));
    }

    #[test]
    fn middle_and_center_are_synonyms() {
        assert_eq!(Gravity::from_anchor("middle"), Some(Gravity::Center));
        assert_eq!(Gravity::from_anchor("center"), Some(Gravity::Center));
    }

    #[test]
    fn anchor_is_case_insensitive() {
        assert_eq!(Gravity::from_anchor("TopLeft"), Some(Gravity::NorthWest));
    }

    #[test]
    fn unknown_anchor_is_none() {
        assert_eq!(Gravity::from_anchor("upperleft"), None);
        assert_eq!(Gravity::from_anchor(""), None);
    }

    #[test]
    fn output_format_mime_types() {
        assert_eq!(OutputFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(OutputFormat::Png.mime_type(), "image/png");
        assert_eq!(OutputFormat::default(), OutputFormat::Jpeg);
    }

    #[test]
    fn compose_falls_back_to_over() {
        assert_eq!(Compose::parse_or_default("add"), Compose::Add);
        assert_eq!(Compose::parse_or_default("subtract"), Compose::Subtract);
        assert_eq!(Compose::parse_or_default("multiply"), Compose::Over);
        assert_eq!(Compose::parse_or_default(""), Compose::Over);
        assert_eq!(Compose::parse_or_default("ADD"), Compose::Over);
        assert_eq!(Compose::parse_or_default("Subtract"), Compose::Over);
    }

    #[test]
    fn hex_color_accepts_valid_lengths() {
        for c in ["#FF0", "#FF0A", "#FFFF00", "#FFFF00AA", "#abcdef"] {
            assert_eq!(HexColor::parse(c).unwrap().as_str(), c);
        }
    }

    #[test]
    fn hex_color_rejects_malformed() {
        for c in ["FF0", "#FF", "#FFFFF", "#GGG", "#FFFF00AA00", "-write", ""] {
            assert!(HexColor::parse(c).is_none(), "{c} should be rejected");
        }
    }

    #[test]
    fn dimensions_positivity() {
        assert!(Dimensions2D::new(1, 1).is_positive());
        assert!(!Dimensions2D::new(0, 10).is_positive());
        assert!(!Dimensions2D::new(10, -1).is_positive());
    }
}
