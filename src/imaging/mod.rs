//! Image transformation: planning and running ImageMagick pipelines.
//!
//! | Stage | Where |
//! |---|---|
//! | **Value types** | [`Gravity`], [`Compose`], [`HexColor`], [`OutputFormat`] |
//! | **Steps and argv** | [`Pipeline`] |
//! | **Options → steps** | [`plan_pipeline`] |
//! | **Execution** | [`ConvertBackend`] + [`MagickBackend`] |
//!
//! The module is split into:
//! - **Parameters**: Validated values a step needs
//! - **Pipeline**: Ordered steps, output format, and the `convert` command line
//! - **Operations**: Turning [`TransformOptions`](crate::options::TransformOptions) into a pipeline
//! - **Backend**: The trait the server talks to, and the ImageMagick implementation

pub mod backend;
pub mod magick_backend;
pub mod operations;
mod params;
pub mod pipeline;

pub use backend::{BackendError, ByteStream, ConvertBackend};
pub use magick_backend::MagickBackend;
pub use operations::{PlanContext, PlanError, plan_pipeline};
pub use params::{Compose, Dimensions2D, Gravity, HexColor, OutputFormat};
pub use pipeline::{Pipeline, Step};
