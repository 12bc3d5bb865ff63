/// Per-stage counters and the run report written next to the outputs.
use crate::error::Result;
use crate::splat::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Drop counters of the splat filter, one per removal reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub input: usize,
    pub invalid: usize,
    pub low_alpha: usize,
    pub oversized: usize,
    pub flyers: usize,
    pub kept: usize,
}

impl FilterStats {
    pub fn merge(self, other: Self) -> Self {
        Self {
            input: self.input + other.input,
            invalid: self.invalid + other.invalid,
            low_alpha: self.low_alpha + other.low_alpha,
            oversized: self.oversized + other.oversized,
            flyers: self.flyers + other.flyers,
            kept: self.kept + other.kept,
        }
    }

    pub fn dropped(&self) -> usize {
        self.invalid + self.low_alpha + self.oversized + self.flyers
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimationStats {
    pub children: usize,
    pub parents: usize,
    pub input: usize,
    pub output: usize,
}

impl DecimationStats {
    pub fn merge(self, other: Self) -> Self {
        Self {
            children: self.children + other.children,
            parents: self.parents + other.parents,
            input: self.input + other.input,
            output: self.output + other.output,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitStats {
    pub files: usize,
    pub records: usize,
    pub projection_errors: usize,
    pub tiles: usize,
}

impl SplitStats {
    pub fn merge(self, other: Self) -> Self {
        Self {
            files: self.files + other.files,
            records: self.records + other.records,
            projection_errors: self.projection_errors + other.projection_errors,
            tiles: self.tiles.max(other.tiles),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyStats {
    pub levels: usize,
    pub tiles: usize,
    pub points: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub files: usize,
    pub compressed: usize,
    pub fallbacks: usize,
    pub copied: usize,
}

/// Stage-specific counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageCounters {
    #[default]
    None,
    Split(SplitStats),
    Clean(FilterStats),
    Lod(DecimationStats),
    Assemble(AssemblyStats),
    Compress(CompressionStats),
}

/// A tile or file that failed while its siblings carried on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl TileFailure {
    pub fn new(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Output already existed; nothing was run
    pub skipped: bool,
    pub tiles: usize,
    pub counters: StageCounters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TileFailure>,
}

impl StageReport {
    pub fn new(stage: &str, input: &Path, output: &Path) -> Self {
        Self {
            stage: stage.to_string(),
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn skipped(stage: &str, input: &Path, output: &Path) -> Self {
        Self {
            skipped: true,
            ..Self::new(stage, input, output)
        }
    }
}

/// Everything a run did, serialized to `report.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tileset: Option<PathBuf>,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn failure_count(&self) -> usize {
        self.stages.iter().map(|s| s.failures.len()).sum()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }
}
