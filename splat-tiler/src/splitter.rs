/// Raw splitter: streams survey `.splat` files, re-projects every splat into
/// the local frame and bins it into finest-zoom tiles.
use crate::coordinates::CoordinateAdapter;
use crate::error::{IoResultExt, Result, TilerError};
use crate::progress::{CancelToken, progress_bar};
use crate::splat::{Splat, decode_records};
use crate::stats::{SplitStats, StageCounters, StageReport, TileFailure};
use crate::tile::{LevelEntry, LevelIndex, TileId};
use constants::defaults::SPLIT_CHUNK_POINTS;
use constants::format::{SPLAT_RECORD_SIZE, TILE_EXTENSION};
use log::{info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Turns raw survey data into one directory of finest-zoom tiles.
pub trait RawSplitter: Send + Sync {
    fn split(
        &self,
        input: &Path,
        output_dir: &Path,
        adapter: &CoordinateAdapter,
        zoom: u8,
        cancel: &CancelToken,
    ) -> Result<StageReport>;
}

/// Splitter for `.splat` files whose positions are in the survey projection.
#[derive(Debug, Clone)]
pub struct SplatFileSplitter {
    chunk_points: usize,
}

impl Default for SplatFileSplitter {
    fn default() -> Self {
        Self {
            chunk_points: SPLIT_CHUNK_POINTS,
        }
    }
}

impl SplatFileSplitter {
    pub fn with_chunk_points(chunk_points: usize) -> Self {
        Self {
            chunk_points: chunk_points.max(1),
        }
    }
}

/// `.splat` files at `input`: the file itself, or every one below a directory, sorted.
pub fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let source = e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed"));
            TilerError::io(input, source)
        })?;
        let is_splat = entry.path().extension().is_some_and(|ext| ext == TILE_EXTENSION);
        if entry.file_type().is_file() && is_splat {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Project one chunk; splats outside the projection domain are counted and dropped.
fn project_chunk(
    records: &[Splat],
    adapter: &CoordinateAdapter,
    zoom: u8,
) -> (Vec<(TileId, Splat)>, usize) {
    let projected: Vec<Option<(TileId, Splat)>> = records
        .par_iter()
        .map(|raw| {
            let [x, y, z] = raw.position.map(|c| c as f64);
            let enu = adapter.to_local_enu([x, y, z]).ok()?;
            let mut splat = *raw;
            splat.position = enu.map(|c| c as f32);
            // Address from the stored precision so the file and the id agree.
            let [east, north, _] = splat.position.map(|c| c as f64);
            let id = TileId::containing(adapter.frame(), east, north, zoom);
            Some((id, splat))
        })
        .collect();
    let dropped = projected.iter().filter(|p| p.is_none()).count();
    (projected.into_iter().flatten().collect(), dropped)
}

/// Append grouped splats to their tile files.
fn append_tiles(
    output_dir: &Path,
    groups: &BTreeMap<TileId, Vec<Splat>>,
    counts: &mut BTreeMap<TileId, usize>,
) -> Result<()> {
    for (id, splats) in groups {
        let path = output_dir.join(id.file_name());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .at(&path)?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytemuck::cast_slice(splats))
            .and_then(|_| writer.flush())
            .at(&path)?;
        *counts.entry(*id).or_default() += splats.len();
    }
    Ok(())
}

impl SplatFileSplitter {
    fn split_file(
        &self,
        path: &Path,
        output_dir: &Path,
        adapter: &CoordinateAdapter,
        zoom: u8,
        cancel: &CancelToken,
        counts: &mut BTreeMap<TileId, usize>,
        on_chunk: &dyn Fn(usize),
    ) -> Result<SplitStats> {
        let len = fs::metadata(path).at(path)?.len() as usize;
        if len % SPLAT_RECORD_SIZE != 0 {
            return Err(TilerError::CorruptTile {
                path: path.to_path_buf(),
                reason: format!("{len} bytes is not a multiple of the {SPLAT_RECORD_SIZE}-byte record"),
            });
        }

        let mut reader = BufReader::new(File::open(path).at(path)?);
        let chunk_bytes = (self.chunk_points * SPLAT_RECORD_SIZE) as u64;
        let mut buffer = Vec::with_capacity(chunk_bytes as usize);
        let mut stats = SplitStats {
            files: 1,
            ..Default::default()
        };

        loop {
            if cancel.is_cancelled() {
                return Err(TilerError::Cancelled);
            }
            buffer.clear();
            let read = reader.by_ref().take(chunk_bytes).read_to_end(&mut buffer).at(path)?;
            if read == 0 {
                break;
            }
            let records = decode_records(&buffer, path)?;
            let (projected, dropped) = project_chunk(&records, adapter, zoom);
            stats.records += records.len();
            stats.projection_errors += dropped;

            let mut groups: BTreeMap<TileId, Vec<Splat>> = BTreeMap::new();
            for (id, splat) in projected {
                groups.entry(id).or_default().push(splat);
            }
            // A half-appended chunk leaves tiles the counters cannot explain.
            append_tiles(output_dir, &groups, counts).map_err(|e| TilerError::Stage {
                stage: "split".to_string(),
                input: path.to_path_buf(),
                output: output_dir.to_path_buf(),
                reason: format!("writing tiles failed: {e}"),
            })?;
            on_chunk(records.len());
        }
        Ok(stats)
    }
}

impl RawSplitter for SplatFileSplitter {
    fn split(
        &self,
        input: &Path,
        output_dir: &Path,
        adapter: &CoordinateAdapter,
        zoom: u8,
        cancel: &CancelToken,
    ) -> Result<StageReport> {
        let files = input_files(input)?;
        fs::create_dir_all(output_dir).at(output_dir)?;
        let total_bytes: u64 = files
            .iter()
            .filter_map(|f| fs::metadata(f).ok())
            .map(|m| m.len())
            .sum();
        info!(
            "Splitting {} files ({} splats) into zoom {} tiles",
            files.len(),
            total_bytes as usize / SPLAT_RECORD_SIZE,
            zoom
        );

        let pb = progress_bar(total_bytes as usize / SPLAT_RECORD_SIZE, "points");
        let mut report = StageReport::new("split", input, output_dir);
        let mut counts: BTreeMap<TileId, usize> = BTreeMap::new();
        let mut totals = SplitStats::default();
        for file in &files {
            let result = self.split_file(file, output_dir, adapter, zoom, cancel, &mut counts, &|n: usize| {
                pb.inc(n as u64)
            });
            match result {
                Ok(stats) => totals = totals.merge(stats),
                Err(e @ (TilerError::Cancelled | TilerError::Stage { .. })) => return Err(e),
                Err(e) => {
                    warn!("Skipping input {}: {}", file.display(), e);
                    report.failures.push(TileFailure::new(file, e));
                }
            }
        }
        pb.finish_with_message("Points split");

        let mut index = LevelIndex::new(zoom);
        for (id, points) in &counts {
            index.insert(
                *id,
                LevelEntry {
                    points: *points,
                    children: Vec::new(),
                },
            );
        }
        index.save(output_dir)?;

        totals.tiles = counts.len();
        if totals.projection_errors > 0 {
            warn!(
                "{} splats fell outside the source projection and were dropped",
                totals.projection_errors
            );
        }
        report.tiles = counts.len();
        report.counters = StageCounters::Split(totals);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::{ReferenceFrame, SourceProjection};
    use crate::splat::{read_splats, test_splat, write_splats};
    use crate::tile;

    fn geographic() -> CoordinateAdapter {
        CoordinateAdapter::new(
            ReferenceFrame::new(120.0, 30.0).unwrap(),
            SourceProjection::Geographic,
        )
    }

    #[test]
    fn splats_land_in_the_tile_of_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.splat");
        let output = dir.path().join("split");
        let records = vec![
            test_splat([120.0, 30.0, 5.0], 255),
            test_splat([120.0001, 30.0, 0.0], 255),
            test_splat([120.01, 30.01, 0.0], 255),
            test_splat([120.0, 95.0, 0.0], 255),
        ];
        write_splats(&input, &records).unwrap();

        let adapter = geographic();
        let report = SplatFileSplitter::with_chunk_points(3)
            .split(&input, &output, &adapter, 20, &CancelToken::new())
            .unwrap();

        let StageCounters::Split(stats) = report.counters else {
            panic!("split counters expected");
        };
        assert_eq!(stats.records, 4);
        assert_eq!(stats.projection_errors, 1);

        let ids = tile::list_tiles(&output, 20).unwrap();
        assert_eq!(ids.len(), report.tiles);
        let mut total = 0;
        for id in ids {
            let splats = read_splats(&output.join(id.file_name())).unwrap();
            for s in &splats {
                let p = s.position;
                assert_eq!(TileId::containing(adapter.frame(), p[0] as f64, p[1] as f64, 20), id);
            }
            total += splats.len();
        }
        assert_eq!(total, 3);
        assert_eq!(LevelIndex::load(&output).unwrap().total_points(), 3);
    }

    #[test]
    fn origin_record_becomes_local_zero() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("origin.splat");
        let output = dir.path().join("split");
        write_splats(&input, &[test_splat([120.0, 30.0, 2.5], 255)]).unwrap();

        let adapter = geographic();
        SplatFileSplitter::default()
            .split(&input, &output, &adapter, 20, &CancelToken::new())
            .unwrap();

        let id = TileId::containing(adapter.frame(), 0.0, 0.0, 20);
        let splats = read_splats(&output.join(id.file_name())).unwrap();
        assert!(splats[0].position[0].abs() < 1e-3);
        assert!(splats[0].position[1].abs() < 1e-3);
        assert_eq!(splats[0].position[2], 2.5);
    }

    #[test]
    fn truncated_input_is_recorded_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = dir.path().join("in");
        fs::create_dir_all(&inputs).unwrap();
        write_splats(&inputs.join("a.splat"), &[test_splat([120.0, 30.0, 0.0], 255)]).unwrap();
        fs::write(inputs.join("b.splat"), [0u8; 33]).unwrap();
        fs::write(inputs.join("notes.txt"), "ignored").unwrap();

        let report = SplatFileSplitter::default()
            .split(&inputs, &dir.path().join("out"), &geographic(), 20, &CancelToken::new())
            .unwrap();

        assert_eq!(report.tiles, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("b.splat"));
    }

    #[test]
    fn failed_tile_write_aborts_the_split() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scan.splat");
        let output = dir.path().join("split");
        write_splats(
            &input,
            &[test_splat([120.0, 30.0, 0.0], 255), test_splat([120.01, 30.01, 0.0], 255)],
        )
        .unwrap();

        // A directory squatting on the second tile's file name.
        let adapter = geographic();
        let blocked = read_splats(&input)
            .unwrap()
            .iter()
            .map(|s| {
                let enu = adapter.to_local_enu(s.position.map(|c| c as f64)).unwrap();
                let [east, north, _] = enu.map(|c| c as f32 as f64);
                TileId::containing(adapter.frame(), east, north, 20)
            })
            .max()
            .unwrap();
        fs::create_dir_all(output.join(blocked.file_name())).unwrap();

        let err = SplatFileSplitter::default()
            .split(&input, &output, &adapter, 20, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, TilerError::Stage { ref stage, .. } if stage == "split"));
        assert!(!LevelIndex::exists(&output));
    }
}
