/// Level-of-detail pyramid: each coarser zoom is derived from its four finer
/// children by grid decimation.
use crate::coordinates::ReferenceFrame;
use crate::error::{IoResultExt, Result, TilerError};
use crate::progress::{CancelToken, progress_bar};
use crate::splat::Splat;
use crate::stats::{DecimationStats, StageCounters, StageReport, TileFailure};
use crate::tile::{self, LevelEntry, LevelIndex, Tile, TileId};
use log::{info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Decimation grid size for `zoom`; doubles per level toward the root.
pub fn level_resolution(base_resolution: f64, tile_zoom: u8, zoom: u8) -> f64 {
    let steps = tile_zoom.saturating_sub(1).saturating_sub(zoom);
    base_resolution * 2f64.powi(steps as i32)
}

/// Keep one splat per `resolution`-sized cube, anchored at `anchor`.
///
/// The representative is the most opaque splat of its cube; the first one
/// seen wins ties. Output follows the order in which cubes were first hit.
pub fn decimate(splats: &[Splat], anchor: [f64; 3], resolution: f64) -> Vec<Splat> {
    let mut buckets: HashMap<[i64; 3], usize> = HashMap::with_capacity(splats.len());
    let mut kept: Vec<Splat> = Vec::new();

    for splat in splats {
        let key = [0, 1, 2].map(|axis| {
            ((splat.position[axis] as f64 - anchor[axis]) / resolution).floor() as i64
        });
        match buckets.get(&key) {
            Some(&slot) => {
                if splat.color[3] > kept[slot].color[3] {
                    kept[slot] = *splat;
                }
            }
            None => {
                buckets.insert(key, kept.len());
                kept.push(*splat);
            }
        }
    }
    kept
}

/// Merge children (already in (x, y) order) and decimate into their parent.
pub fn build_parent(
    frame: &ReferenceFrame,
    parent: TileId,
    children: &[Tile],
    resolution: f64,
) -> Tile {
    let merged: Vec<Splat> = children
        .iter()
        .flat_map(|child| child.splats.iter().copied())
        .collect();
    let (west, south, _, _) = parent.footprint(frame);
    Tile::new(parent, decimate(&merged, [west, south, 0.0], resolution))
}

/// Parent cells of the finer level, each with its children in (x, y) order.
fn group_by_parent(ids: &[TileId]) -> BTreeMap<TileId, Vec<TileId>> {
    let mut groups: BTreeMap<TileId, Vec<TileId>> = BTreeMap::new();
    for id in ids {
        if let Some(parent) = id.parent() {
            groups.entry(parent).or_default().push(*id);
        }
    }
    for children in groups.values_mut() {
        children.sort();
    }
    groups
}

struct ParentOutcome {
    parent: TileId,
    claimed: Vec<TileId>,
    stats: DecimationStats,
    failures: Vec<TileFailure>,
}

/// Build zoom `coarser_zoom` in `coarser_dir` from zoom `coarser_zoom + 1` in `finer_dir`.
pub fn build_level(
    finer_dir: &Path,
    coarser_dir: &Path,
    frame: &ReferenceFrame,
    coarser_zoom: u8,
    resolution: f64,
    cancel: &CancelToken,
) -> Result<StageReport> {
    let finer_zoom = coarser_zoom + 1;
    let ids = tile::list_tiles(finer_dir, finer_zoom)?;
    let groups: Vec<(TileId, Vec<TileId>)> = group_by_parent(&ids).into_iter().collect();
    fs::create_dir_all(coarser_dir).at(coarser_dir)?;
    info!(
        "Building zoom {} from {} tiles into {} parents (grid {:.3} m)",
        coarser_zoom,
        ids.len(),
        groups.len(),
        resolution
    );

    let pb = progress_bar(groups.len(), "parents");
    let outcomes: Vec<Option<Result<ParentOutcome>>> = groups
        .par_iter()
        .map(|(parent, children)| {
            if cancel.is_cancelled() {
                return None;
            }
            let outcome = build_one(finer_dir, coarser_dir, frame, *parent, children, resolution);
            pb.inc(1);
            Some(outcome)
        })
        .collect();
    pb.finish_with_message(format!("Zoom {coarser_zoom} built"));

    if cancel.is_cancelled() {
        return Err(TilerError::Cancelled);
    }

    let stage = format!("lod_{coarser_zoom}");
    let mut report = StageReport::new(&stage, finer_dir, coarser_dir);
    let mut index = LevelIndex::new(coarser_zoom);
    let mut totals = DecimationStats::default();
    for outcome in outcomes.into_iter().flatten() {
        let outcome = outcome?;
        for failure in &outcome.failures {
            warn!("Skipping child {}: {}", failure.path.display(), failure.reason);
        }
        report.failures.extend(outcome.failures);
        totals = totals.merge(outcome.stats);
        if outcome.stats.output > 0 {
            index.insert(
                outcome.parent,
                LevelEntry {
                    points: outcome.stats.output,
                    children: outcome.claimed.iter().map(|c| [c.x, c.y]).collect(),
                },
            );
        }
    }

    index.save(coarser_dir)?;
    report.tiles = index.tiles.len();
    report.counters = StageCounters::Lod(totals);
    info!(
        "Zoom {}: {} -> {} splats in {} tiles",
        coarser_zoom, totals.input, totals.output, report.tiles
    );
    Ok(report)
}

fn build_one(
    finer_dir: &Path,
    coarser_dir: &Path,
    frame: &ReferenceFrame,
    parent: TileId,
    children: &[TileId],
    resolution: f64,
) -> Result<ParentOutcome> {
    let mut tiles = Vec::with_capacity(children.len());
    let mut failures = Vec::new();
    for &child in children {
        match Tile::read(finer_dir, child) {
            Ok(tile) if !tile.is_empty() => tiles.push(tile),
            Ok(_) => {}
            Err(e) => failures.push(TileFailure::new(finer_dir.join(child.file_name()), e)),
        }
    }

    let built = build_parent(frame, parent, &tiles, resolution);
    if !built.is_empty() {
        built.write(coarser_dir)?;
    }

    Ok(ParentOutcome {
        parent,
        claimed: tiles.iter().map(|t| t.id).collect(),
        stats: DecimationStats {
            children: tiles.len(),
            parents: usize::from(!built.is_empty()),
            input: tiles.iter().map(Tile::len).sum(),
            output: built.len(),
        },
        failures,
    })
}
