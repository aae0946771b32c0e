//! Conversion backend trait and shared types.
//!
//! The [`ConvertBackend`] trait is the seam between the HTTP layer and the
//! process that actually transforms pixels: given a [`Source`] and a planned
//! [`Pipeline`], start a conversion and hand back its output as a stream of
//! byte chunks.
//!
//! The production implementation is
//! [`MagickBackend`](super::magick_backend::MagickBackend), which runs
//! ImageMagick's `convert`. Tests use the recording `MockBackend` below.

use super::pipeline::Pipeline;
use crate::source::Source;
use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use thiserror::Error;

/// Converted image bytes, in the order the converter writes them.
///
/// An `Err` item means the conversion failed; no further items follow.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Trait for conversion backends.
///
/// `convert` only *starts* the work. Errors that surface while the image is
/// being produced arrive as `Err` items on the returned stream. Dropping the
/// stream must stop the conversion.
pub trait ConvertBackend: Send + Sync {
    fn convert(&self, source: &Source, pipeline: &Pipeline) -> Result<ByteStream, BackendError>;
}
