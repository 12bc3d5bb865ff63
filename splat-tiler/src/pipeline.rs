/// Conversion pipeline orchestrating split, clean, LOD, assembly and compression.
use crate::cleaner::clean_level;
use crate::compressor::{GltfpackCompressor, MeshCompressor, compress_directory};
use crate::config::PipelineConfig;
use crate::error::{IoResultExt, Result, TilerError};
use crate::lod::{build_level, level_resolution};
use crate::progress::CancelToken;
use crate::splitter::{RawSplitter, SplatFileSplitter};
use crate::stats::{RunReport, StageReport};
use crate::tileset::assemble;
use constants::format::{
    BUILD_DIR, COMPRESSED_DIR, PARTIAL_SUFFIX, REPORT_FILE, RESULT_DIR, SPLIT_DIR, TILESET_FILE,
};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Stage directories of one run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub root: PathBuf,
}

impl RunLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn split(&self) -> PathBuf {
        self.root.join(SPLIT_DIR)
    }

    pub fn build(&self) -> PathBuf {
        self.root.join(BUILD_DIR)
    }

    pub fn level(&self, zoom: u8) -> PathBuf {
        self.build().join(zoom.to_string())
    }

    pub fn result(&self) -> PathBuf {
        self.root.join(RESULT_DIR)
    }

    pub fn compressed(&self) -> PathBuf {
        self.root.join(COMPRESSED_DIR)
    }

    pub fn report(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }
}

/// Sibling directory a stage writes into before it is promoted.
pub fn partial_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dir.with_file_name(format!("{name}.{PARTIAL_SUFFIX}"))
}

/// Run `work` into `<output>.partial` and rename it to `output` once it
/// produced at least one tile. An existing `output` skips the stage.
pub fn run_stage<F>(name: &str, input: &Path, output: &Path, work: F) -> Result<StageReport>
where
    F: FnOnce(&Path) -> Result<StageReport>,
{
    if output.is_dir() {
        info!("Stage {name}: {} exists, skipping", output.display());
        return Ok(StageReport::skipped(name, input, output));
    }

    let partial = partial_path(output);
    if partial.exists() {
        warn!("Stage {name}: discarding stale {}", partial.display());
        fs::remove_dir_all(&partial).at(&partial)?;
    }
    if let Some(parent) = partial.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::create_dir_all(&partial).at(&partial)?;

    let start = Instant::now();
    let mut report = work(&partial)?;
    if report.tiles == 0 {
        return Err(TilerError::Stage {
            stage: name.to_string(),
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            reason: "stage produced no tiles".to_string(),
        });
    }

    fs::rename(&partial, output).at(output)?;
    report.stage = name.to_string();
    report.input = input.to_path_buf();
    report.output = output.to_path_buf();
    info!(
        "Stage {name} finished: {} tiles in {:.1}s",
        report.tiles,
        start.elapsed().as_secs_f64()
    );
    Ok(report)
}

/// End-to-end conversion of raw splats into a tileset.
pub struct Pipeline {
    config: PipelineConfig,
    input: PathBuf,
    layout: RunLayout,
    splitter: Box<dyn RawSplitter>,
    compressor: Option<Box<dyn MeshCompressor>>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Validates the configuration; nothing touches the disk yet.
    pub fn new(config: PipelineConfig, input: &Path, output_dir: &Path) -> Result<Self> {
        config.validate()?;
        let cancel = CancelToken::new();
        let compressor = config.compressor.as_ref().map(|c| {
            Box::new(GltfpackCompressor::new(c, cancel.clone())) as Box<dyn MeshCompressor>
        });
        Ok(Self {
            config,
            input: input.to_path_buf(),
            layout: RunLayout::new(output_dir),
            splitter: Box::new(SplatFileSplitter::default()),
            compressor,
            cancel,
        })
    }

    pub fn with_splitter(mut self, splitter: Box<dyn RawSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_compressor(mut self, compressor: Option<Box<dyn MeshCompressor>>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Token that stops the run between tile tasks.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Run every stage not yet complete and write the run report.
    pub fn run(&self) -> Result<RunReport> {
        fs::create_dir_all(&self.layout.root).at(&self.layout.root)?;
        let mut report = RunReport::default();
        let outcome = self.run_stages(&mut report);
        if matches!(outcome, Err(TilerError::Cancelled)) {
            report.cancelled = true;
        }
        report.save(&self.layout.report())?;
        outcome?;

        info!(
            "Conversion complete: {} ({} tile failures)",
            self.layout.result().display(),
            report.failure_count()
        );
        Ok(report)
    }

    fn run_stages(&self, report: &mut RunReport) -> Result<()> {
        let config = &self.config;
        let adapter = config.adapter()?;
        let frame = *adapter.frame();
        let zoom = config.tile_zoom;
        let cancel = &self.cancel;
        let layout = &self.layout;

        let split = layout.split();
        report.stages.push(run_stage("split", &self.input, &split, |out| {
            self.splitter.split(&self.input, out, &adapter, zoom, cancel)
        })?);

        let cleaned = layout.level(zoom);
        report.stages.push(run_stage("clean", &split, &cleaned, |out| {
            clean_level(&split, out, zoom, &config.clean, cancel)
        })?);

        for coarser in (config.coarsest_zoom()..zoom).rev() {
            let finer = layout.level(coarser + 1);
            let target = layout.level(coarser);
            let resolution = level_resolution(config.tile_resolution, zoom, coarser);
            let name = format!("lod_{coarser}");
            report.stages.push(run_stage(&name, &finer, &target, |out| {
                build_level(&finer, out, &frame, coarser, resolution, cancel)
            })?);
        }

        let build = layout.build();
        let result = layout.result();
        report.stages.push(run_stage("assemble", &build, &result, |out| {
            assemble(&build, out, &frame, zoom, config.tile_error, cancel).map(|(_, stage)| stage)
        })?);
        report.tileset = Some(result.join(TILESET_FILE));

        if let Some(compressor) = &self.compressor {
            let compressed = layout.compressed();
            let workers = config.worker_count();
            report.stages.push(run_stage("compress", &result, &compressed, |out| {
                compress_directory(&result, out, compressor.as_ref(), workers, cancel)
            })?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_directory_sits_beside_its_stage() {
        assert_eq!(
            partial_path(Path::new("/out/build/19")),
            PathBuf::from("/out/build/19.partial")
        );
        assert_eq!(partial_path(Path::new("/out/split")), PathBuf::from("/out/split.partial"));
    }

    #[test]
    fn empty_stage_is_fatal_and_not_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("split");

        let err = run_stage("split", dir.path(), &output, |out| {
            Ok(StageReport::new("split", dir.path(), out))
        })
        .unwrap_err();

        assert!(matches!(err, TilerError::Stage { .. }));
        assert!(err.to_string().contains("split"));
        assert!(!output.exists());
    }

    #[test]
    fn finished_stage_is_skipped_and_stale_partial_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("result");
        fs::create_dir_all(partial_path(&output).join("junk")).unwrap();

        let first = run_stage("assemble", dir.path(), &output, |out| {
            assert!(!out.join("junk").exists());
            fs::write(out.join("tileset.json"), "{}").unwrap();
            let mut report = StageReport::new("assemble", dir.path(), out);
            report.tiles = 1;
            Ok(report)
        })
        .unwrap();
        assert!(!first.skipped);
        assert!(output.join("tileset.json").is_file());
        assert!(!partial_path(&output).exists());

        let second = run_stage("assemble", dir.path(), &output, |_| {
            panic!("completed stage must not run again")
        })
        .unwrap();
        assert!(second.skipped);
    }

    #[test]
    fn cancelled_stage_keeps_its_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("split");
        let err = run_stage("split", dir.path(), &output, |_| Err(TilerError::Cancelled)).unwrap_err();
        assert!(matches!(err, TilerError::Cancelled));
        assert!(!output.exists());
        assert!(partial_path(&output).exists());
    }

    #[test]
    fn invalid_config_fails_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            lod_levels: 30,
            ..Default::default()
        };
        let out = dir.path().join("run");
        assert!(Pipeline::new(config, dir.path(), &out).is_err());
        assert!(!out.exists());
    }
}
