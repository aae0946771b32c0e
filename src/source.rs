//! Source image resolution.
//!
//! A request names its input either as a path under the configured image
//! directory (`/images/<path>`) or as a URL (`/remote?src=<url>`). This module
//! turns that request into a [`Source`] the backend can read, refusing
//! anything outside the image root or outside the remote allowlist.

use crate::cache::hash_key;
use crate::config::SourcesConfig;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SourceError {
    #[error("Image not found: {0}")]
    NotFound(String),
    #[error("Remote sources are disabled")]
    RemoteDisabled,
    #[error("Host not allowed: {0}")]
    HostNotAllowed(String),
    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),
}

/// Where `convert` reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file below the image root. `relative` is the normalized request path.
    Local { path: PathBuf, relative: PathBuf },
    /// An http(s) URL fetched with curl.
    Remote { url: Url },
}

impl Source {
    /// Directory (relative to the cache root) that holds this source's outputs.
    pub fn cache_key(&self) -> PathBuf {
        match self {
            Self::Local { relative, .. } => Path::new("local").join(relative),
            Self::Remote { url } => Path::new("remote").join(hash_key(url.as_str())),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { relative, .. } => write!(f, "{}", relative.display()),
            Self::Remote { url } => write!(f, "{url}"),
        }
    }
}

/// Resolve a request path against the image root.
///
/// `..` components, absolute paths, and symlinks that lead out of the root
/// all resolve to [`SourceError::NotFound`] so callers can't probe the
/// filesystem.
pub fn resolve_local(image_dir: &Path, requested: &str) -> Result<Source, SourceError> {
    let not_found = || SourceError::NotFound(requested.to_string());

    let mut relative = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(not_found());
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(not_found());
    }

    let root = image_dir.canonicalize().map_err(|_| not_found())?;
    let path = root.join(&relative).canonicalize().map_err(|_| not_found())?;
    if !path.starts_with(&root) || !path.is_file() {
        return Err(not_found());
    }

    Ok(Source::Local { path, relative })
}

/// Validate a remote source URL against the sources config.
pub fn resolve_remote(src: &str, config: &SourcesConfig) -> Result<Source, SourceError> {
    if !config.allow_remote {
        return Err(SourceError::RemoteDisabled);
    }

    let url = Url::parse(src.trim()).map_err(|e| SourceError::InvalidUrl(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SourceError::InvalidUrl(format!(
            "unsupported scheme {:?}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| SourceError::InvalidUrl("missing host".into()))?
        .to_ascii_lowercase();

    if !config.allowed_hosts.is_empty()
        && !config
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&host))
    {
        return Err(SourceError::HostNotAllowed(host));
    }

    Ok(Source::Remote { url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn image_root() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("photos")).unwrap();
        fs::write(tmp.path().join("photos/cat.jpg"), b"cat").unwrap();
        fs::write(tmp.path().join("top.png"), b"top").unwrap();
        tmp
    }

    fn remote_config(hosts: &[&str]) -> SourcesConfig {
        SourcesConfig {
            allow_remote: true,
            allowed_hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..SourcesConfig::default()
        }
    }

    // =========================================================================
    // Local sources
    // =========================================================================

    #[test]
    fn resolves_nested_file() {
        let tmp = image_root();
        let source = resolve_local(tmp.path(), "photos/cat.jpg").unwrap();
        match &source {
            Source::Local { path, relative } => {
                assert!(path.ends_with("photos/cat.jpg"));
                assert_eq!(relative, Path::new("photos/cat.jpg"));
            }
            other => panic!("expected local source, got {other:?}"),
        }
        assert_eq!(source.to_string(), "photos/cat.jpg");
        assert_eq!(source.cache_key(), PathBuf::from("local/photos/cat.jpg"));
    }

    #[test]
    fn current_dir_components_are_dropped() {
        let tmp = image_root();
        let source = resolve_local(tmp.path(), "./photos/./cat.jpg").unwrap();
        assert_eq!(source.cache_key(), PathBuf::from("local/photos/cat.jpg"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = image_root();
        assert_eq!(
            resolve_local(tmp.path(), "photos/dog.jpg"),
            Err(SourceError::NotFound("photos/dog.jpg".into()))
        );
    }

    #[test]
    fn directory_is_not_found() {
        let tmp = image_root();
        assert!(matches!(
            resolve_local(tmp.path(), "photos"),
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            resolve_local(tmp.path(), ""),
            Err(SourceError::NotFound(_))
        ));
    }

    #[test]
    fn traversal_is_rejected() {
        let tmp = image_root();
        for path in ["../etc/passwd", "photos/../../x", "/etc/passwd"] {
            assert!(
                matches!(resolve_local(tmp.path(), path), Err(SourceError::NotFound(_))),
                "{path} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        let tmp = image_root();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.jpg"), b"secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.jpg"),
            tmp.path().join("link.jpg"),
        )
        .unwrap();
        assert!(matches!(
            resolve_local(tmp.path(), "link.jpg"),
            Err(SourceError::NotFound(_))
        ));
    }

    // =========================================================================
    // Remote sources
    // =========================================================================

    #[test]
    fn remote_disabled_by_default() {
        assert_eq!(
            resolve_remote("http://example.com/a.jpg", &SourcesConfig::default()),
            Err(SourceError::RemoteDisabled)
        );
    }

    #[test]
    fn remote_any_host_when_allowlist_empty() {
        let source = resolve_remote("http://example.com/a.jpg", &remote_config(&[])).unwrap();
        assert!(matches!(source, Source::Remote { .. }));
        assert_eq!(source.to_string(), "http://example.com/a.jpg");
    }

    #[test]
    fn remote_allowlist_is_case_insensitive() {
        let config = remote_config(&["www.Gravatar.com"]);
        assert!(resolve_remote("https://WWW.gravatar.com/avatar/abc", &config).is_ok());
        assert_eq!(
            resolve_remote("https://evil.example/avatar/abc", &config),
            Err(SourceError::HostNotAllowed("evil.example".into()))
        );
    }

    #[test]
    fn remote_rejects_other_schemes() {
        let config = remote_config(&[]);
        for src in ["file:///etc/passwd", "ftp://example.com/a.jpg", "not a url"] {
            assert!(
                matches!(resolve_remote(src, &config), Err(SourceError::InvalidUrl(_))),
                "{src} should be rejected"
            );
        }
    }

    #[test]
    fn remote_cache_key_is_hashed() {
        let source = resolve_remote("http://example.com/a.jpg", &remote_config(&[])).unwrap();
        let key = source.cache_key();
        assert!(key.starts_with("remote"));
        assert_eq!(
            key.file_name().unwrap().len(),
            64,
            "sha256 hex digest expected"
        );
    }
}
