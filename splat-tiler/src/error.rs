/// Error taxonomy for the tiling pipeline
use std::path::{Path, PathBuf};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, TilerError>;

/// Errors raised by the pipeline stages
#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    /// Source coordinate outside the survey projection's valid domain
    #[error("Projection error: {0}")]
    Projection(String),

    /// Adjacent zoom levels disagree about which tiles exist
    #[error("Incomplete level at zoom {zoom}, tile {x}_{y}: {reason}")]
    IncompleteLevel {
        zoom: u8,
        x: u32,
        y: u32,
        reason: String,
    },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tile file that does not decode as whole splat records
    #[error("Corrupt tile {}: {reason}", .path.display())]
    CorruptTile { path: PathBuf, reason: String },

    /// External compressor failed; the uncompressed content was kept
    #[error("Compression failed for {}: {reason}", .input.display())]
    CompressionFailure { input: PathBuf, reason: String },

    /// Stage-level failure, fatal to the run
    #[error("Stage `{stage}` failed ({} -> {}): {reason}", .input.display(), .output.display())]
    Stage {
        stage: String,
        input: PathBuf,
        output: PathBuf,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl TilerError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Attach the offending path to a bare IO result.
pub trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| TilerError::io(path, e))
    }
}
