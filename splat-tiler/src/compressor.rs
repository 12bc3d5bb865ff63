/// Mesh compression of assembled content through an external tool.
///
/// Each content file is one job run as a child process. A failed job never
/// blocks its siblings: the uncompressed file is copied in its place and the
/// failure lands in the stage report.
use crate::error::{IoResultExt, Result, TilerError};
use crate::progress::{CancelToken, progress_bar};
use crate::splat::temp_path;
use crate::stats::{CompressionStats, StageCounters, StageReport, TileFailure};
use constants::defaults::GLTFPACK_ARGS;
use constants::format::CONTENT_EXTENSION;
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Compresses one content file into another.
pub trait MeshCompressor: Send + Sync {
    fn compress(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Operator settings for the external compressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Kill a job still running after this many seconds
    pub timeout_secs: Option<u64>,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gltfpack"),
            args: GLTFPACK_ARGS.iter().map(|a| a.to_string()).collect(),
            timeout_secs: None,
        }
    }
}

/// Runs `program -i <input> -o <output> <args...>` per file.
#[derive(Debug, Clone)]
pub struct GltfpackCompressor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl GltfpackCompressor {
    pub fn new(config: &CompressorConfig, cancel: CancelToken) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
            cancel,
        }
    }
}

impl MeshCompressor for GltfpackCompressor {
    fn compress(&self, input: &Path, output: &Path) -> Result<()> {
        let failure = |reason: String| TilerError::CompressionFailure {
            input: input.to_path_buf(),
            reason,
        };
        let tmp = temp_path(output);
        let mut child = Command::new(&self.program)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(&tmp)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| failure(format!("cannot start {}: {e}", self.program.display())))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return Err(failure(format!("lost track of the job: {e}"))),
            }
            let timed_out = self.timeout.is_some_and(|t| started.elapsed() > t);
            if self.cancel.is_cancelled() || timed_out {
                // Already-exited races are fine; the wait below reaps either way.
                let _ = child.kill();
                let _ = child.wait();
                let _ = fs::remove_file(&tmp);
                let why = if timed_out { "timed out" } else { "cancelled" };
                return Err(failure(format!("job {why} and was killed")));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let _ = fs::remove_file(&tmp);
            return Err(failure(format!("exited with {status}")));
        }
        if !tmp.is_file() {
            return Err(failure("finished without writing output".to_string()));
        }
        fs::rename(&tmp, output).at(output)
    }
}

enum JobOutcome {
    Compressed,
    Fallback(TileFailure),
    Failed(TileFailure),
}

/// Compress (or fall back to copying) one content file.
fn run_job(compressor: &dyn MeshCompressor, input: &Path, output: &Path) -> JobOutcome {
    match compressor.compress(input, output) {
        Ok(()) => JobOutcome::Compressed,
        Err(e) => {
            debug!("Compression of {} failed: {e}", input.display());
            match fs::copy(input, output) {
                Ok(_) => JobOutcome::Fallback(TileFailure::new(input, e)),
                Err(copy) => JobOutcome::Failed(TileFailure::new(
                    input,
                    format!("{e}; fallback copy failed: {copy}"),
                )),
            }
        }
    }
}

/// Mirror `input_dir` into `output_dir`, compressing every content file on a
/// dedicated pool of `workers` threads and copying everything else.
pub fn compress_directory(
    input_dir: &Path,
    output_dir: &Path,
    compressor: &dyn MeshCompressor,
    workers: usize,
    cancel: &CancelToken,
) -> Result<StageReport> {
    let mut jobs: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut stats = CompressionStats::default();
    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let source = e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed"));
            TilerError::io(input_dir, source)
        })?;
        let Ok(relative) = entry.path().strip_prefix(input_dir) else {
            continue;
        };
        let target = output_dir.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).at(&target)?;
        } else if entry.path().extension().is_some_and(|ext| ext == CONTENT_EXTENSION) {
            jobs.push((entry.into_path(), target));
        } else {
            fs::copy(entry.path(), &target).at(&target)?;
            stats.copied += 1;
        }
    }
    stats.files = jobs.len();
    info!(
        "Compressing {} content files with {} workers",
        jobs.len(),
        workers
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| TilerError::Stage {
            stage: "compress".to_string(),
            input: input_dir.to_path_buf(),
            output: output_dir.to_path_buf(),
            reason: format!("cannot start worker pool: {e}"),
        })?;

    let (tx, rx) = unbounded::<JobOutcome>();
    let pb = progress_bar(jobs.len(), "files");
    let mut report = StageReport::new("compress", input_dir, output_dir);
    thread::scope(|scope| {
        scope.spawn(|| {
            pool.install(|| {
                jobs.par_iter().for_each_with(tx, |tx, (input, output)| {
                    if cancel.is_cancelled() {
                        return;
                    }
                    // The receiver outlives every sender.
                    let _ = tx.send(run_job(compressor, input, output));
                });
            });
        });

        for outcome in rx.iter() {
            pb.inc(1);
            match outcome {
                JobOutcome::Compressed => stats.compressed += 1,
                JobOutcome::Fallback(failure) => {
                    warn!("Kept uncompressed {}: {}", failure.path.display(), failure.reason);
                    stats.fallbacks += 1;
                    report.failures.push(failure);
                }
                JobOutcome::Failed(failure) => {
                    warn!("Lost {}: {}", failure.path.display(), failure.reason);
                    report.failures.push(failure);
                }
            }
        }
    });
    pb.finish_with_message("Content compressed");

    if cancel.is_cancelled() {
        return Err(TilerError::Cancelled);
    }

    // Completion order depends on scheduling; report in path order.
    report.failures.sort_by(|a, b| a.path.cmp(&b.path));
    report.tiles = stats.compressed + stats.fallbacks;
    report.counters = StageCounters::Compress(stats);
    info!(
        "Compressed {}/{} files ({} fell back to the original)",
        stats.compressed, stats.files, stats.fallbacks
    );
    Ok(report)
}
