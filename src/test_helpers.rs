//! Shared test utilities.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let opts = TransformOptions::from_query(&query(&[("size", "200x100")])).unwrap();
//! let tmp = image_root(&[("photos/cat.jpg", b"cat")]);
//! ```

use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

/// Build a query map the way axum's `Query` extractor would.
pub fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Create a temp directory containing the given files (paths relative to it).
pub fn image_root(files: &[(&str, &[u8])]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (rel, content) in files {
        let path = tmp.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    tmp
}
