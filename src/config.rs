//! Service configuration.
//!
//! Handles loading, validating, and merging `magick-gate.toml`. The file is
//! sparse: user values are merged over the stock defaults, so a deployment
//! only writes the keys it wants to change.
//!
//! ## Config File Location
//!
//! Passed with `--config PATH`. Without it, `./magick-gate.toml` is used when
//! present, otherwise the stock defaults apply.
//!
//! ## Configuration Options
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8888"
//!
//! [convert]
//! convert_path = "convert"     # ImageMagick convert binary
//! curl_path = "curl"           # used to fetch remote sources
//! timeout_secs = 30            # kill conversions running longer than this
//! # dither_colormap = "/usr/share/magick-gate/gs5bit.png"
//!
//! [sources]
//! image_dir = "images"         # served under /images/
//! # overlay_dir = "overlays"   # overlay_image=... looks here
//! allow_remote = false         # enable /remote?src=URL
//! allowed_hosts = []           # empty = any host (when remote is allowed)
//!
//! [cache]
//! enabled = false
//! dir = "/tmp/magick-gate"
//!
//! [processing]
//! # max_processes = 4          # concurrent conversions (default: CPU cores)
//!
//! [limits]
//! max_dimension = 4096         # largest width/height a request may ask for
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "magick-gate.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// External tool settings.
    pub convert: ConvertConfig,
    /// Where source images come from.
    pub sources: SourcesConfig,
    /// Optional on-disk output cache.
    pub cache: CacheConfig,
    /// Concurrency bound for conversions.
    pub processing: ProcessingConfig,
    /// Request limits.
    pub limits: LimitsConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "server.bind must be an address like 127.0.0.1:8888, got {:?}",
                self.server.bind
            )));
        }
        if self.convert.convert_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "convert.convert_path must not be empty".into(),
            ));
        }
        if self.convert.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "convert.timeout_secs must be at least 1".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if self.limits.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "limits.max_dimension must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8888".to_string(),
        }
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    /// ImageMagick `convert` binary (name on `PATH` or absolute path).
    pub convert_path: String,
    /// `curl` binary used to fetch remote sources.
    pub curl_path: String,
    /// Wall-clock limit for a single conversion, in seconds.
    pub timeout_secs: u64,
    /// 5-bit grayscale colormap used by `format=png16`.
    pub dither_colormap: Option<PathBuf>,
}

impl ConvertConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            convert_path: "convert".to_string(),
            curl_path: "curl".to_string(),
            timeout_secs: 30,
            dither_colormap: None,
        }
    }
}

/// Where source images come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    /// Root directory for `/images/...` requests.
    pub image_dir: PathBuf,
    /// Directory `overlay_image` names are resolved against.
    pub overlay_dir: Option<PathBuf>,
    /// Whether `/remote?src=URL` is served at all.
    pub allow_remote: bool,
    /// Hosts remote sources may come from. Empty means any host.
    pub allowed_hosts: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("images"),
            overlay_dir: None,
            allow_remote: false,
            allowed_hosts: Vec::new(),
        }
    }
}

/// On-disk cache of converted images.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("/tmp/magick-gate"),
        }
    }
}

/// Conversion concurrency settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of `convert` processes running at once.
    /// When absent, defaults to the number of CPU cores.
    pub max_processes: Option<usize>,
}

/// Resolve the effective number of concurrent conversions.
///
/// Unlike CPU-bound work inside the process, `convert` runs out of process,
/// so an explicit value is honored even above the core count.
pub fn effective_permits(config: &ProcessingConfig) -> usize {
    config.max_processes.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest width or height any step may produce.
    pub max_dimension: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_dimension: 4096,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServiceConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the service config.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] in the
/// working directory is used if present, else the stock defaults.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let overlay = match path {
        Some(p) => Some(load_raw_config(p)?),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                Some(load_raw_config(fallback)?)
            } else {
                None
            }
        }
    };
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock config file. Used by `gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# magick-gate configuration
# =========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Listener
# ---------------------------------------------------------------------------
[server]
bind = "127.0.0.1:8888"

# ---------------------------------------------------------------------------
# External tools
# ---------------------------------------------------------------------------
[convert]
# ImageMagick convert binary, looked up on PATH unless absolute.
convert_path = "convert"

# curl binary used to fetch /remote sources.
curl_path = "curl"

# Conversions running longer than this are killed.
timeout_secs = 30

# Colormap for format=png16 (RGB555 dithering). Without it png16 is plain PNG.
# dither_colormap = "/usr/share/magick-gate/gs5bit.png"

# ---------------------------------------------------------------------------
# Sources
# ---------------------------------------------------------------------------
[sources]
# Root for GET /images/<path>.
image_dir = "images"

# Directory searched for overlay_image=<name>. Overlays are off without it.
# overlay_dir = "overlays"

# Serve GET /remote?src=<url>.
allow_remote = false

# Restrict remote sources to these hosts. Empty list = any host.
allowed_hosts = []

# ---------------------------------------------------------------------------
# Cache
# ---------------------------------------------------------------------------
[cache]
# Store converted images on disk and serve repeats from there.
enabled = false
dir = "/tmp/magick-gate"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum concurrent convert processes.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Limits
# ---------------------------------------------------------------------------
[limits]
# Largest width or height a request may ask for.
max_dimension = 4096
"##
}
