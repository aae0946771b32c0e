//! # magick-gate
//!
//! An HTTP facade over ImageMagick's `convert`. A request names a source
//! image and describes a transformation in its query string; the service
//! turns that into an ordered `convert` pipeline, runs it as a child process,
//! and streams the result back as it is produced.
//!
//! ```text
//! GET /images/photos/cat.jpg?size=200x200&maintain_ratio=1&crop=1&format=png
//!
//!   query ──▶ TransformOptions ──▶ Pipeline ──▶ convert - … png32:- ──▶ body
//!              (options)          (imaging)      (MagickBackend)
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`options`] | Query string → validated [`options::TransformOptions`] |
//! | [`imaging`] | Pipeline planning, `convert` argument assembly, and the conversion backend |
//! | [`source`] | Resolves `/images/<path>` and `/remote?src=` to a readable source |
//! | [`cache`] | Optional write-once on-disk cache of converted images |
//! | [`server`] | axum router, request flow, streaming responses, status mapping |
//! | [`config`] | `magick-gate.toml` loading, validation, and merging over stock defaults |
//! | [`output`] | CLI output formatting for `plan` and `check` |
//!
//! # Design Decisions
//!
//! ## The Pipeline Is Data
//!
//! Planning never touches a process. [`imaging::plan_pipeline`] produces a
//! [`imaging::Pipeline`]: named steps, each with its exact `convert`
//! arguments, plus the output format. The same value drives the command
//! line, the response content type, and the cache file name, and the
//! `magick-gate plan` command prints it without running anything.
//!
//! ## Arguments, Never a Shell
//!
//! `convert` is spawned with an argument vector. Request values only reach
//! it after parsing into typed values (numbers, enums, validated hex colors,
//! bare overlay names), and the source image is always fed on stdin, so no
//! request value is ever read by `convert` as a file name or an option.
//!
//! ## Stream, But Fail Cleanly
//!
//! Output is forwarded chunk by chunk, but the response is not committed
//! until the first chunk exists. A conversion that fails up front becomes a
//! 500; one that fails halfway aborts the connection rather than delivering
//! a truncated image with a 200.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod options;
pub mod output;
pub mod server;
pub mod source;

#[cfg(test)]
pub(crate) mod test_helpers;
