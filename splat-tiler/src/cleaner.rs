/// Splat filter: removes degenerate and spatially isolated splats from a tile.
use crate::error::{IoResultExt, Result, TilerError};
use crate::progress::{CancelToken, progress_bar};
use crate::stats::{FilterStats, StageCounters, StageReport, TileFailure};
use crate::tile::{self, LevelEntry, LevelIndex, Tile, TileId};
use constants::defaults::{FLYERS_DISTANCE, FLYERS_NUM, MAX_FLYER_PASSES, MAX_SCALE, MIN_ALPHA};
use log::{debug, info, warn};
use rayon::prelude::*;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanParams {
    /// Minimum opacity in [0, 1]
    pub min_alpha: f32,
    /// Largest allowed scale component
    pub max_scale: f32,
    /// Neighbors per flyer test; 0 disables the flyer pass
    pub flyers_num: usize,
    /// Multiple of the tile's mean neighbor distance beyond which a splat is a flyer
    pub flyers_dis: f64,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            min_alpha: MIN_ALPHA,
            max_scale: MAX_SCALE,
            flyers_num: FLYERS_NUM,
            flyers_dis: FLYERS_DISTANCE,
        }
    }
}

impl CleanParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_alpha) {
            return Err(TilerError::Config(format!(
                "min_alpha {} is outside [0, 1]",
                self.min_alpha
            )));
        }
        if !(self.max_scale > 0.0) {
            return Err(TilerError::Config(format!(
                "max_scale {} must be positive",
                self.max_scale
            )));
        }
        if !(self.flyers_dis >= 1.0) {
            return Err(TilerError::Config(format!(
                "flyers_dis {} must be at least 1",
                self.flyers_dis
            )));
        }
        Ok(())
    }
}

/// Filter one tile. Survivors keep their input order.
pub fn clean(tile: &Tile, params: &CleanParams) -> (Tile, FilterStats) {
    clean_with_passes(tile, params, MAX_FLYER_PASSES)
}

fn clean_with_passes(tile: &Tile, params: &CleanParams, max_passes: usize) -> (Tile, FilterStats) {
    let mut stats = FilterStats {
        input: tile.len(),
        ..Default::default()
    };

    let mut survivors = Vec::with_capacity(tile.len());
    for splat in &tile.splats {
        if !splat.is_finite() {
            stats.invalid += 1;
        } else if splat.opacity() < params.min_alpha {
            stats.low_alpha += 1;
        } else if splat.scale.iter().any(|&s| s > params.max_scale) {
            stats.oversized += 1;
        } else {
            survivors.push(*splat);
        }
    }

    // Removing flyers shifts the tile average, so repeat until stable.
    let mut passes = 0;
    loop {
        if passes == max_passes {
            warn!(
                "Tile {}: flyer removal still unstable after {max_passes} passes",
                tile.id
            );
            break;
        }
        passes += 1;
        let positions: Vec<[f64; 3]> = survivors
            .iter()
            .map(|s| s.position.map(|c| c as f64))
            .collect();
        let flyers = flyer_mask(&positions, params.flyers_num, params.flyers_dis);
        let removed = flyers.iter().filter(|&&f| f).count();
        if removed == 0 {
            break;
        }
        stats.flyers += removed;
        let mut mask = flyers.into_iter();
        survivors.retain(|_| !mask.next().unwrap_or(false));
    }

    stats.kept = survivors.len();
    (Tile::new(tile.id, survivors), stats)
}

/// Marks points whose mean distance to their `k` nearest neighbors exceeds
/// `factor` times the average of that mean over all points.
fn flyer_mask(points: &[[f64; 3]], k: usize, factor: f64) -> Vec<bool> {
    if k == 0 || points.len() < k + 1 {
        return vec![false; points.len()];
    }

    let tree = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(*p, i))
            .collect(),
    );

    let mean_distances: Vec<f64> = points
        .iter()
        .map(|p| {
            // First hit is the point itself (or an exact duplicate, same distance).
            let total: f64 = tree
                .nearest_neighbor_iter_with_distance_2(p)
                .skip(1)
                .take(k)
                .map(|(_, d2)| d2.sqrt())
                .sum();
            total / k as f64
        })
        .collect();

    let average = mean_distances.iter().sum::<f64>() / mean_distances.len() as f64;
    let limit = factor * average;
    mean_distances.iter().map(|&d| d > limit).collect()
}

/// Clean every tile of `input_dir` into `output_dir` and index the result.
pub fn clean_level(
    input_dir: &Path,
    output_dir: &Path,
    zoom: u8,
    params: &CleanParams,
    cancel: &CancelToken,
) -> Result<StageReport> {
    let ids = tile::list_tiles(input_dir, zoom)?;
    fs::create_dir_all(output_dir).at(output_dir)?;
    info!(
        "Cleaning {} tiles at zoom {} ({})",
        ids.len(),
        zoom,
        input_dir.display()
    );

    let pb = progress_bar(ids.len(), "tiles");
    let outcomes: Vec<Option<std::result::Result<(TileId, FilterStats), TileFailure>>> = ids
        .par_iter()
        .map(|&id| {
            if cancel.is_cancelled() {
                return None;
            }
            let outcome = clean_tile(input_dir, output_dir, id, params);
            pb.inc(1);
            Some(outcome.map_err(|e| TileFailure::new(input_dir.join(id.file_name()), e)))
        })
        .collect();
    pb.finish_with_message("Tiles cleaned");

    if cancel.is_cancelled() {
        return Err(TilerError::Cancelled);
    }

    let mut report = StageReport::new("clean", input_dir, output_dir);
    let mut index = LevelIndex::new(zoom);
    let mut totals = FilterStats::default();
    for outcome in outcomes.into_iter().flatten() {
        match outcome {
            Ok((id, stats)) => {
                totals = totals.merge(stats);
                if stats.kept > 0 {
                    index.insert(
                        id,
                        LevelEntry {
                            points: stats.kept,
                            children: Vec::new(),
                        },
                    );
                }
            }
            Err(failure) => {
                warn!("Skipping tile {}: {}", failure.path.display(), failure.reason);
                report.failures.push(failure);
            }
        }
    }

    index.save(output_dir)?;
    report.tiles = index.tiles.len();
    report.counters = StageCounters::Clean(totals);
    info!(
        "Kept {}/{} splats ({} invalid, {} transparent, {} oversized, {} flyers)",
        totals.kept,
        totals.input,
        totals.invalid,
        totals.low_alpha,
        totals.oversized,
        totals.flyers
    );
    Ok(report)
}

fn clean_tile(input_dir: &Path, output_dir: &Path, id: TileId, params: &CleanParams) -> Result<(TileId, FilterStats)> {
    let tile = Tile::read(input_dir, id)?;
    let (cleaned, stats) = clean(&tile, params);
    if cleaned.is_empty() {
        debug!("Tile {} emptied by the filter", id);
    } else {
        cleaned.write(output_dir)?;
    }
    Ok((id, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splat::{Splat, test_splat};

    fn tile_of(splats: Vec<Splat>) -> Tile {
        Tile::new(TileId::new(20, 1, 1), splats)
    }

    /// Regular 5x5x2 lattice, 0.1 m spacing.
    fn lattice() -> Vec<Splat> {
        let mut splats = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..2 {
                    splats.push(test_splat([i as f32 * 0.1, j as f32 * 0.1, k as f32 * 0.1], 255));
                }
            }
        }
        splats
    }

    #[test]
    fn half_opacity_is_dropped_at_full_threshold() {
        let params = CleanParams {
            min_alpha: 1.0,
            max_scale: 10000.0,
            flyers_num: 0,
            ..Default::default()
        };
        let tile = tile_of(vec![test_splat([0.0; 3], 128), test_splat([1.0; 3], 255)]);

        let (out, stats) = clean(&tile, &params);

        assert_eq!(out.len(), 1);
        assert_eq!(out.splats[0].color[3], 255);
        assert_eq!(stats.low_alpha, 1);
    }

    #[test]
    fn default_threshold_only_drops_fully_transparent() {
        let tile = tile_of(vec![test_splat([0.0; 3], 0), test_splat([0.1; 3], 1)]);
        let params = CleanParams {
            flyers_num: 0,
            ..Default::default()
        };
        let (out, stats) = clean(&tile, &params);
        assert_eq!(out.len(), 1);
        assert_eq!(stats.low_alpha, 1);
    }

    #[test]
    fn oversized_and_non_finite_splats_are_counted_separately() {
        let mut huge = test_splat([0.0; 3], 255);
        huge.scale = [0.1, 20000.0, 0.1];
        let mut broken = test_splat([0.0; 3], 255);
        broken.position[1] = f32::NAN;
        let tile = tile_of(vec![huge, broken, test_splat([0.0; 3], 255)]);
        let params = CleanParams {
            flyers_num: 0,
            ..Default::default()
        };

        let (out, stats) = clean(&tile, &params);

        assert_eq!(out.len(), 1);
        assert_eq!(stats.oversized, 1);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.input, stats.kept + stats.dropped());
    }

    #[test]
    fn isolated_splat_is_removed_as_flyer() {
        let mut splats = lattice();
        splats.push(test_splat([500.0, 500.0, 500.0], 255));
        let params = CleanParams {
            flyers_num: 4,
            flyers_dis: 3.0,
            ..Default::default()
        };

        let (out, stats) = clean(&tile_of(splats), &params);

        assert_eq!(stats.flyers, 1);
        assert_eq!(out.len(), 50);
        assert!(out.bounds.max_x < 1.0);
    }

    #[test]
    fn survivors_keep_input_order() {
        let mut splats = lattice();
        splats.insert(7, test_splat([900.0, 0.0, 0.0], 255));
        let params = CleanParams {
            flyers_num: 3,
            flyers_dis: 2.0,
            ..Default::default()
        };
        let (out, _) = clean(&tile_of(splats), &params);
        assert_eq!(out.splats, lattice());
    }

    #[test]
    fn flyer_passes_stop_at_the_cap() {
        let mut splats = lattice();
        splats.push(test_splat([3.0, 3.0, 0.0], 255));
        splats.push(test_splat([3.5, 3.0, 0.0], 255));
        splats.push(test_splat([1e4, 0.0, 0.0], 255));
        let params = CleanParams {
            flyers_num: 4,
            flyers_dis: 2.0,
            ..Default::default()
        };

        let (_, single) = clean_with_passes(&tile_of(splats.clone()), &params, 1);
        let (_, settled) = clean(&tile_of(splats), &params);

        assert_eq!(single.flyers, 1);
        assert!(settled.flyers > single.flyers);
    }

    #[test]
    fn small_tiles_skip_the_flyer_pass() {
        let splats = vec![test_splat([0.0; 3], 255), test_splat([1000.0; 3], 255)];
        let params = CleanParams {
            flyers_num: 25,
            ..Default::default()
        };
        let (out, stats) = clean(&tile_of(splats), &params);
        assert_eq!(out.len(), 2);
        assert_eq!(stats.flyers, 0);
    }

    #[test]
    fn cleaning_twice_removes_nothing() {
        let mut splats = lattice();
        // A loose cluster that only stands out once the far flyer is gone.
        splats.push(test_splat([3.0, 3.0, 0.0], 255));
        splats.push(test_splat([3.5, 3.0, 0.0], 255));
        splats.push(test_splat([1e4, 0.0, 0.0], 255));
        splats.push(test_splat([0.2, 0.2, 0.0], 10));
        let params = CleanParams {
            min_alpha: 0.5,
            flyers_num: 4,
            flyers_dis: 2.0,
            ..Default::default()
        };

        let (once, first) = clean(&tile_of(splats), &params);
        let (twice, second) = clean(&once, &params);

        assert!(first.dropped() > 0);
        assert_eq!(second.dropped(), 0);
        assert_eq!(twice.splats, once.splats);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = CleanParams {
            flyers_dis: 0.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
        assert!(CleanParams::default().validate().is_ok());
    }

    #[test]
    fn level_is_cleaned_and_indexed() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let keep = Tile::new(TileId::new(20, 3, 4), vec![test_splat([0.0; 3], 255)]);
        let empty = Tile::new(TileId::new(20, 3, 5), vec![test_splat([0.0; 3], 0)]);
        keep.write(input.path()).unwrap();
        empty.write(input.path()).unwrap();
        fs::write(input.path().join("9_9.splat"), [1u8; 7]).unwrap();

        let report = clean_level(
            input.path(),
            output.path(),
            20,
            &CleanParams::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(report.tiles, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(output.path().join("3_4.splat").exists());
        assert!(!output.path().join("3_5.splat").exists());
        let index = LevelIndex::load(output.path()).unwrap();
        assert_eq!(index.total_points(), 1);
    }

    #[test]
    fn cancelled_level_reports_cancellation() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        Tile::new(TileId::new(20, 0, 0), vec![test_splat([0.0; 3], 255)])
            .write(input.path())
            .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = clean_level(input.path(), output.path(), 20, &CleanParams::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, TilerError::Cancelled));
        assert!(!LevelIndex::exists(output.path()));
    }
}
