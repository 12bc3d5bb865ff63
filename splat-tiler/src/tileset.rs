/// Tileset assembly: walks a finished pyramid, writes per-tile content and
/// the `tileset.json` manifest tying it together.
use crate::bounds::TileBounds;
use crate::coordinates::ReferenceFrame;
use crate::error::{IoResultExt, Result, TilerError};
use crate::glb;
use crate::progress::{CancelToken, progress_bar};
use crate::splat::{read_splats, write_atomic};
use crate::stats::{AssemblyStats, StageCounters, StageReport};
use crate::tile::{self, LevelEntry, LevelIndex, TileId};
use constants::format::{CONTENT_EXTENSION, TILESET_FILE, TILESET_VERSION};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Slack for box round-off when testing containment, in meters.
pub const CONTAINMENT_TOLERANCE: f64 = 1e-6;

/// Refinement strategy for child tiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TileRefine {
    #[default]
    Replace,
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    #[serde(rename = "box")]
    pub bounding_box: [f64; 12],
}

impl BoundingVolume {
    pub fn from_bounds(bounds: &TileBounds) -> Self {
        Self {
            bounding_box: bounds.to_box(),
        }
    }

    pub fn bounds(&self) -> TileBounds {
        TileBounds::from_box(&self.bounding_box)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileContent {
    pub uri: String,
}

/// A node of the tileset hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilesetNode {
    #[serde(skip)]
    pub tile: Option<TileId>,
    /// Tight bounds of this node's own splats, not serialized
    #[serde(skip)]
    pub content_bounds: TileBounds,
    #[serde(rename = "boundingVolume")]
    pub bounding_volume: BoundingVolume,
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    #[serde(default)]
    pub refine: TileRefine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TileContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TilesetNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 16]>,
}

impl TilesetNode {
    /// Node for a tile whose content spans `content_bounds`; the volume
    /// grows to enclose every child.
    pub fn new(
        tile: Option<TileId>,
        content_bounds: TileBounds,
        geometric_error: f64,
        children: Vec<TilesetNode>,
    ) -> Self {
        let mut bounds = content_bounds;
        for child in &children {
            bounds.merge(&child.bounding_volume.bounds());
        }
        Self {
            tile,
            content_bounds,
            bounding_volume: BoundingVolume::from_bounds(&bounds),
            geometric_error,
            refine: TileRefine::Replace,
            content: tile.map(|id| TileContent {
                uri: content_uri(id),
            }),
            children,
            transform: None,
        }
    }

    pub fn count_nodes(&self) -> usize {
        1 + self.children.iter().map(|c| c.count_nodes()).sum::<usize>()
    }

    pub fn max_depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.max_depth()).max().unwrap_or(0)
    }

    /// Every volume encloses its content and its children, errors never
    /// grow toward the leaves, and refinement is REPLACE throughout.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let volume = self.bounding_volume.bounds().expanded(CONTAINMENT_TOLERANCE);
        let name = self.name();
        if !volume.contains(&self.content_bounds) {
            return Err(format!("{name}: volume does not enclose its content"));
        }
        if self.refine != TileRefine::Replace {
            return Err(format!("{name}: refine must be REPLACE"));
        }
        for child in &self.children {
            if !volume.contains(&child.bounding_volume.bounds()) {
                return Err(format!("{name}: volume does not enclose child {}", child.name()));
            }
            if child.geometric_error > self.geometric_error {
                return Err(format!(
                    "{name}: child {} has larger geometric error ({} > {})",
                    child.name(),
                    child.geometric_error,
                    self.geometric_error
                ));
            }
            child.check_invariants()?;
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.tile.map_or_else(|| "root".to_string(), |id| id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilesetAsset {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
}

/// Root `tileset.json` structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tileset {
    pub asset: TilesetAsset,
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    pub root: TilesetNode,
}

impl Tileset {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).at(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Pretty JSON with object keys sorted, byte-stable across runs.
    pub fn to_json(&self) -> Result<String> {
        // Round-trip through Value: its map type orders keys.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_json()?.as_bytes())
    }
}

/// Content path of a tile relative to the manifest
pub fn content_uri(id: TileId) -> String {
    format!("{}/{}_{}.{}", id.zoom, id.x, id.y, CONTENT_EXTENSION)
}

/// Geometric error of zoom `zoom`: 0 at the finest level, doubling per
/// coarser level from `base_error`.
pub fn level_geometric_error(base_error: f64, base_zoom: u8, zoom: u8) -> f64 {
    if zoom >= base_zoom {
        0.0
    } else {
        base_error * 2f64.powi((base_zoom - zoom - 1) as i32)
    }
}

/// Numeric zoom directories under `root`, ascending.
pub fn discover_levels(root: &Path, base_zoom: u8) -> Result<Vec<u8>> {
    let mut zooms = Vec::new();
    for entry in fs::read_dir(root).at(root)? {
        let entry = entry.at(root)?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(zoom) = entry.file_name().to_str().and_then(|n| n.parse::<u8>().ok()) {
            zooms.push(zoom);
        }
    }
    zooms.sort_unstable();

    let stage_error = |reason: String| TilerError::Stage {
        stage: "assemble".to_string(),
        input: root.to_path_buf(),
        output: PathBuf::new(),
        reason,
    };
    let (Some(&first), Some(&last)) = (zooms.first(), zooms.last()) else {
        return Err(stage_error("no zoom directories found".to_string()));
    };
    if last > base_zoom {
        return Err(stage_error(format!(
            "zoom {last} is finer than the base zoom {base_zoom}"
        )));
    }
    if (last - first) as usize + 1 != zooms.len() {
        return Err(stage_error(format!("zoom levels {zooms:?} are not contiguous")));
    }
    Ok(zooms)
}

/// Index of a level directory. Directories written without an index are
/// listed from their files, each tile claiming whichever finer tiles exist.
fn load_level(dir: &Path, zoom: u8, finer: Option<&LevelIndex>) -> Result<LevelIndex> {
    if LevelIndex::exists(dir) {
        let index = LevelIndex::load(dir)?;
        if index.zoom != zoom {
            return Err(TilerError::CorruptTile {
                path: LevelIndex::path(dir),
                reason: format!("index is for zoom {} but sits in zoom {zoom}", index.zoom),
            });
        }
        return Ok(index);
    }

    debug!("No level index in {}, listing tiles", dir.display());
    let mut index = LevelIndex::new(zoom);
    let finer_ids: Vec<TileId> = finer.map(|f| f.entries().map(|(id, _)| id).collect()).unwrap_or_default();
    for id in tile::list_tiles(dir, zoom)? {
        let children = finer_ids
            .iter()
            .filter(|c| c.parent() == Some(id))
            .map(|c| [c.x, c.y])
            .collect();
        index.insert(
            id,
            LevelEntry {
                points: 0,
                children,
            },
        );
    }
    Ok(index)
}

/// Every claimed child is indexed and has its tile file in `fine_dir`, every
/// finer tile is claimed, and only the finest level has childless tiles.
fn check_claims(coarse: &LevelIndex, fine: &LevelIndex, fine_dir: &Path) -> Result<()> {
    let fine_ids: BTreeSet<TileId> = fine.entries().map(|(id, _)| id).collect();
    let mut claimed = BTreeSet::new();

    for (parent, entry) in coarse.entries() {
        if entry.children.is_empty() {
            return Err(TilerError::IncompleteLevel {
                zoom: parent.zoom,
                x: parent.x,
                y: parent.y,
                reason: format!("claims no tiles at zoom {}", fine.zoom),
            });
        }
        for &[x, y] in &entry.children {
            let child = TileId::new(fine.zoom, x, y);
            if child.parent() != Some(parent) {
                return Err(TilerError::IncompleteLevel {
                    zoom: fine.zoom,
                    x,
                    y,
                    reason: format!("claimed by {parent}, which is not its parent cell"),
                });
            }
            if !fine_ids.contains(&child) {
                return Err(TilerError::IncompleteLevel {
                    zoom: fine.zoom,
                    x,
                    y,
                    reason: format!("claimed by {parent} but missing"),
                });
            }
            if !fine_dir.join(child.file_name()).is_file() {
                return Err(TilerError::IncompleteLevel {
                    zoom: fine.zoom,
                    x,
                    y,
                    reason: format!("claimed by {parent} but its tile file is missing"),
                });
            }
            claimed.insert(child);
        }
    }

    if let Some(orphan) = fine_ids.difference(&claimed).next() {
        return Err(TilerError::IncompleteLevel {
            zoom: orphan.zoom,
            x: orphan.x,
            y: orphan.y,
            reason: format!("not claimed by any tile at zoom {}", coarse.zoom),
        });
    }
    Ok(())
}

/// Write one content file, returning the bounds of its splats.
fn write_content(level_dir: &Path, content_dir: &Path, id: TileId) -> Result<(TileId, TileBounds, usize)> {
    let source = level_dir.join(id.file_name());
    let splats = read_splats(&source)?;
    if splats.is_empty() {
        return Err(TilerError::CorruptTile {
            path: source,
            reason: "indexed tile has no splats".to_string(),
        });
    }
    let bytes = glb::encode(&splats)?;
    let target = content_dir.join(format!("{}_{}.{}", id.x, id.y, CONTENT_EXTENSION));
    write_atomic(&target, &bytes)?;
    Ok((id, TileBounds::from_splats(&splats), splats.len()))
}

/// Assemble the pyramid under `pyramid_root` into `output_dir`.
///
/// Returns the manifest path and a stage report. Nothing is written to the
/// manifest path unless every level is consistent and the node tree holds
/// its invariants.
pub fn assemble(
    pyramid_root: &Path,
    output_dir: &Path,
    frame: &ReferenceFrame,
    base_zoom: u8,
    base_geometric_error: f64,
    cancel: &CancelToken,
) -> Result<(PathBuf, StageReport)> {
    let zooms = discover_levels(pyramid_root, base_zoom)?;
    info!(
        "Assembling zoom {}..={} from {}",
        zooms[0],
        zooms[zooms.len() - 1],
        pyramid_root.display()
    );

    // Finest first so coarser directories without an index can infer claims.
    let mut levels: BTreeMap<u8, LevelIndex> = BTreeMap::new();
    for &zoom in zooms.iter().rev() {
        let finer = zoom.checked_add(1).and_then(|z| levels.get(&z));
        let index = load_level(&pyramid_root.join(zoom.to_string()), zoom, finer)?;
        levels.insert(zoom, index);
    }
    for pair in zooms.windows(2) {
        let fine_dir = pyramid_root.join(pair[1].to_string());
        check_claims(&levels[&pair[0]], &levels[&pair[1]], &fine_dir)?;
    }

    let total: usize = levels.values().map(|l| l.tiles.len()).sum();
    let pb = progress_bar(total, "tiles");
    let mut bounds: HashMap<TileId, TileBounds> = HashMap::with_capacity(total);
    let mut points = 0;
    for (&zoom, index) in &levels {
        let level_dir = pyramid_root.join(zoom.to_string());
        let content_dir = output_dir.join(zoom.to_string());
        fs::create_dir_all(&content_dir).at(&content_dir)?;

        let ids: Vec<TileId> = index.entries().map(|(id, _)| id).collect();
        let written: Vec<Option<Result<(TileId, TileBounds, usize)>>> = ids
            .par_iter()
            .map(|&id| {
                if cancel.is_cancelled() {
                    return None;
                }
                let result = write_content(&level_dir, &content_dir, id);
                pb.inc(1);
                Some(result)
            })
            .collect();
        if cancel.is_cancelled() {
            return Err(TilerError::Cancelled);
        }
        for result in written.into_iter().flatten() {
            let (id, tile_bounds, count) = result?;
            bounds.insert(id, tile_bounds);
            points += count;
        }
    }
    pb.finish_with_message("Content written");

    let mut root = build_tree(&levels, &bounds, base_zoom, base_geometric_error);
    root.transform = Some(frame.enu_to_ecef_transform());
    let tileset = Tileset {
        asset: TilesetAsset {
            version: TILESET_VERSION.to_string(),
            generator: Some(concat!("splat-tiler ", env!("CARGO_PKG_VERSION")).to_string()),
        },
        geometric_error: if root.geometric_error > 0.0 {
            root.geometric_error * 2.0
        } else {
            base_geometric_error
        },
        root,
    };
    tileset
        .root
        .check_invariants()
        .map_err(|reason| TilerError::Stage {
            stage: "assemble".to_string(),
            input: pyramid_root.to_path_buf(),
            output: output_dir.to_path_buf(),
            reason,
        })?;

    let manifest = output_dir.join(TILESET_FILE);
    tileset.save(&manifest)?;
    info!(
        "Wrote {} with {} nodes, depth {}",
        manifest.display(),
        tileset.root.count_nodes(),
        tileset.root.max_depth()
    );

    let mut report = StageReport::new("assemble", pyramid_root, output_dir);
    report.tiles = total;
    report.counters = StageCounters::Assemble(AssemblyStats {
        levels: levels.len(),
        tiles: total,
        points,
    });
    Ok((manifest, report))
}

/// Build nodes bottom-up. Claims were verified, so every claimed child has
/// a node waiting in the finer level's map.
fn build_tree(
    levels: &BTreeMap<u8, LevelIndex>,
    bounds: &HashMap<TileId, TileBounds>,
    base_zoom: u8,
    base_error: f64,
) -> TilesetNode {
    let mut finer: BTreeMap<TileId, TilesetNode> = BTreeMap::new();
    for (&zoom, index) in levels.iter().rev() {
        let error = level_geometric_error(base_error, base_zoom, zoom);
        let mut current = BTreeMap::new();
        for (id, entry) in index.entries() {
            let mut claimed: Vec<TileId> = entry
                .children
                .iter()
                .map(|&[x, y]| TileId::new(zoom + 1, x, y))
                .collect();
            claimed.sort();
            let children = claimed.iter().filter_map(|c| finer.remove(c)).collect();
            let content = bounds.get(&id).copied().unwrap_or_default();
            current.insert(id, TilesetNode::new(Some(id), content, error, children));
        }
        finer = current;
    }

    let mut top: Vec<TilesetNode> = finer.into_values().collect();
    if top.len() == 1 {
        return top.remove(0);
    }
    let error = top.iter().map(|n| n.geometric_error).fold(0.0, f64::max);
    let error = if error > 0.0 { error * 2.0 } else { base_error };
    TilesetNode::new(None, TileBounds::new(), error, top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splat::test_splat;
    use crate::tile::Tile;

    fn volume(min: f64, max: f64) -> TileBounds {
        TileBounds {
            min_x: min,
            max_x: max,
            min_y: min,
            max_y: max,
            min_z: min,
            max_z: max,
        }
    }

    #[test]
    fn errors_double_per_coarser_level() {
        assert_eq!(level_geometric_error(1.0, 20, 20), 0.0);
        assert_eq!(level_geometric_error(1.0, 20, 19), 1.0);
        assert_eq!(level_geometric_error(1.0, 20, 18), 2.0);
        assert_eq!(level_geometric_error(0.5, 20, 15), 8.0);
    }

    #[test]
    fn parent_volume_encloses_children() {
        let a = TilesetNode::new(Some(TileId::new(2, 0, 0)), volume(0.0, 1.0), 0.0, vec![]);
        let b = TilesetNode::new(Some(TileId::new(2, 1, 0)), volume(5.0, 6.0), 0.0, vec![]);
        let parent = TilesetNode::new(Some(TileId::new(1, 0, 0)), volume(2.0, 3.0), 1.0, vec![a, b]);

        assert!(parent.check_invariants().is_ok());
        let enclosing = parent.bounding_volume.bounds();
        assert_eq!(enclosing.min_x, 0.0);
        assert_eq!(enclosing.max_x, 6.0);
    }

    #[test]
    fn growing_error_toward_leaves_is_rejected() {
        let leaf = TilesetNode::new(Some(TileId::new(2, 0, 0)), volume(0.0, 1.0), 4.0, vec![]);
        let parent = TilesetNode::new(Some(TileId::new(1, 0, 0)), volume(0.0, 1.0), 1.0, vec![leaf]);
        assert!(parent.check_invariants().unwrap_err().contains("geometric error"));
    }

    #[test]
    fn manifest_serializes_3d_tiles_names() {
        let node = TilesetNode::new(Some(TileId::new(18, 3, 4)), volume(0.0, 1.0), 2.0, vec![]);
        let tileset = Tileset {
            asset: TilesetAsset {
                version: TILESET_VERSION.to_string(),
                generator: None,
            },
            geometric_error: 4.0,
            root: node,
        };
        let json: serde_json::Value = serde_json::from_str(&tileset.to_json().unwrap()).unwrap();
        assert_eq!(json["root"]["refine"], "REPLACE");
        assert_eq!(json["root"]["content"]["uri"], "18/3_4.glb");
        assert_eq!(json["root"]["boundingVolume"]["box"].as_array().unwrap().len(), 12);
        assert!(json["root"].get("children").is_none());
    }

    /// Two levels: zoom 19 holds one parent of two zoom-20 tiles.
    fn two_level_pyramid(root: &Path, claim_both: bool) -> ReferenceFrame {
        let frame = ReferenceFrame::new(120.0, 30.0).unwrap();
        let parent = TileId::containing(&frame, 1.0, 1.0, 19);
        let [a, _, c, _] = parent.children();
        let fine_dir = root.join("20");
        let coarse_dir = root.join("19");
        fs::create_dir_all(&fine_dir).unwrap();
        fs::create_dir_all(&coarse_dir).unwrap();

        let mut fine_index = LevelIndex::new(20);
        for (id, offset) in [(a, 0.0), (c, 40.0)] {
            let tile = Tile::new(id, vec![test_splat([offset, 1.0, 0.0], 255), test_splat([offset + 1.0, 2.0, 3.0], 255)]);
            tile.write(&fine_dir).unwrap();
            fine_index.insert(id, LevelEntry { points: 2, children: vec![] });
        }
        fine_index.save(&fine_dir).unwrap();

        Tile::new(parent, vec![test_splat([0.5, 1.5, 1.0], 255)]).write(&coarse_dir).unwrap();
        let mut coarse_index = LevelIndex::new(19);
        let claims = if claim_both { vec![[a.x, a.y], [c.x, c.y]] } else { vec![[a.x, a.y]] };
        coarse_index.insert(parent, LevelEntry { points: 1, children: claims });
        coarse_index.save(&coarse_dir).unwrap();
        frame
    }

    #[test]
    fn assembled_tileset_is_anchored_and_consistent() {
        let pyramid = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let frame = two_level_pyramid(pyramid.path(), true);

        let (manifest, report) =
            assemble(pyramid.path(), output.path(), &frame, 20, 1.0, &CancelToken::new()).unwrap();

        let tileset = Tileset::load(&manifest).unwrap();
        assert_eq!(tileset.root.geometric_error, 1.0);
        assert_eq!(tileset.geometric_error, 2.0);
        let transform = tileset.root.transform.unwrap();
        for (read, expected) in transform.iter().zip(frame.enu_to_ecef_transform()) {
            assert!((read - expected).abs() < 1e-6);
        }
        assert_eq!(tileset.root.children.len(), 2);
        assert!(tileset.root.children.iter().all(|c| c.geometric_error == 0.0));
        for child in &tileset.root.children {
            let uri = &child.content.as_ref().unwrap().uri;
            assert!(output.path().join(uri).is_file());
        }
        // Containment survives the JSON round trip.
        let root_volume = tileset.root.bounding_volume.bounds().expanded(CONTAINMENT_TOLERANCE);
        for child in &tileset.root.children {
            assert!(root_volume.contains(&child.bounding_volume.bounds()));
        }
        assert_eq!(report.tiles, 3);
    }

    #[test]
    fn unclaimed_tile_blocks_the_manifest() {
        let pyramid = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let frame = two_level_pyramid(pyramid.path(), false);

        let err = assemble(pyramid.path(), output.path(), &frame, 20, 1.0, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, TilerError::IncompleteLevel { zoom: 20, .. }));
        assert!(!output.path().join(TILESET_FILE).exists());
    }

    #[test]
    fn missing_claimed_child_blocks_the_manifest() {
        let pyramid = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let frame = two_level_pyramid(pyramid.path(), true);
        let mut fine = LevelIndex::load(&pyramid.path().join("20")).unwrap();
        let last = fine.tiles.keys().last().cloned().unwrap();
        fine.tiles.remove(&last);
        fine.save(&pyramid.path().join("20")).unwrap();

        let err = assemble(pyramid.path(), output.path(), &frame, 20, 1.0, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, TilerError::IncompleteLevel { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn claimed_child_without_its_file_blocks_the_manifest() {
        let pyramid = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let frame = two_level_pyramid(pyramid.path(), true);
        let fine = LevelIndex::load(&pyramid.path().join("20")).unwrap();
        let (child, _) = fine.entries().last().unwrap();
        fs::remove_file(pyramid.path().join("20").join(child.file_name())).unwrap();

        let err = assemble(pyramid.path(), output.path(), &frame, 20, 1.0, &CancelToken::new())
            .unwrap_err();
        match err {
            TilerError::IncompleteLevel { zoom, x, y, reason } => {
                assert_eq!((zoom, x, y), (20, child.x, child.y));
                assert!(reason.contains("tile file is missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.path().join(TILESET_FILE).exists());
    }

    #[test]
    fn gaps_between_levels_are_rejected() {
        let pyramid = tempfile::tempdir().unwrap();
        fs::create_dir_all(pyramid.path().join("20")).unwrap();
        fs::create_dir_all(pyramid.path().join("18")).unwrap();
        assert!(discover_levels(pyramid.path(), 20).is_err());
        assert!(discover_levels(pyramid.path(), 19).is_err());
    }

    #[test]
    fn several_coarse_tiles_get_a_synthetic_root() {
        let mut levels = BTreeMap::new();
        let mut index = LevelIndex::new(20);
        let mut bounds = HashMap::new();
        for (i, id) in [TileId::new(20, 5, 1), TileId::new(20, 2, 9)].into_iter().enumerate() {
            index.insert(id, LevelEntry { points: 1, children: vec![] });
            bounds.insert(id, volume(i as f64 * 10.0, i as f64 * 10.0 + 1.0));
        }
        levels.insert(20, index);

        let root = build_tree(&levels, &bounds, 20, 1.0);

        assert!(root.tile.is_none());
        assert!(root.content.is_none());
        assert_eq!(root.geometric_error, 1.0);
        let order: Vec<TileId> = root.children.iter().filter_map(|c| c.tile).collect();
        assert_eq!(order, vec![TileId::new(20, 2, 9), TileId::new(20, 5, 1)]);
        assert!(root.check_invariants().is_ok());
    }
}
