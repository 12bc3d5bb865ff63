//! Gaussian splat to 3D Tiles conversion.
//!
//! Raw splats are split into finest-zoom quadtree tiles in a local ENU frame,
//! cleaned, decimated into a pyramid of coarser levels and assembled into a
//! `tileset.json` with binary glTF content.

pub mod bounds;
pub mod cleaner;
pub mod compressor;
pub mod config;
pub mod coordinates;
pub mod error;
pub mod glb;
pub mod lod;
pub mod pipeline;
pub mod progress;
pub mod splat;
pub mod splitter;
pub mod stats;
pub mod tile;
pub mod tileset;

pub use config::PipelineConfig;
pub use error::{Result, TilerError};
pub use pipeline::Pipeline;
pub use progress::CancelToken;
pub use stats::RunReport;
