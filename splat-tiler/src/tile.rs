/// Quadtree tile addressing and the per-zoom on-disk layout.
///
/// Cells follow the web-Mercator tiling: at zoom `z` the normalized Mercator
/// square is split into `2^z x 2^z` cells, x growing east and y growing south.
/// Tiles are addressed by key, never linked by pointers; the directory of a
/// zoom level is the arena for that level.
use crate::bounds::TileBounds;
use crate::coordinates::ReferenceFrame;
use crate::error::{IoResultExt, Result};
use crate::splat::{self, Splat};
use constants::format::{LEVEL_INDEX_FILE, TILE_EXTENSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Highest zoom whose cell indices fit the u32 grid.
pub const MAX_ZOOM: u8 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Cell containing an ENU position at `zoom`
    pub fn containing(frame: &ReferenceFrame, east: f64, north: f64, zoom: u8) -> Self {
        let (x, y) = cell_of(frame, east, north, zoom);
        Self { zoom, x, y }
    }

    /// None at zoom 0
    pub fn parent(&self) -> Option<TileId> {
        if self.zoom == 0 {
            return None;
        }
        let (x, y) = parent_of(self.x, self.y);
        Some(TileId::new(self.zoom - 1, x, y))
    }

    /// The four cells one zoom finer, in (x, y) order
    pub fn children(&self) -> [TileId; 4] {
        let (x, y, z) = (self.x * 2, self.y * 2, self.zoom + 1);
        [
            TileId::new(z, x, y),
            TileId::new(z, x, y + 1),
            TileId::new(z, x + 1, y),
            TileId::new(z, x + 1, y + 1),
        ]
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.x, self.y, TILE_EXTENSION)
    }

    /// Parse `{x}_{y}.splat` at a known zoom
    pub fn from_file_name(zoom: u8, name: &str) -> Option<Self> {
        let stem = name.strip_suffix(TILE_EXTENSION)?.strip_suffix('.')?;
        let (x, y) = stem.split_once('_')?;
        Some(Self::new(zoom, x.parse().ok()?, y.parse().ok()?))
    }

    /// ENU footprint of the cell: (min_east, min_north, max_east, max_north)
    pub fn footprint(&self, frame: &ReferenceFrame) -> (f64, f64, f64, f64) {
        let cells = (1u64 << self.zoom) as f64;
        let (west, north) = frame.mercator_to_enu(self.x as f64 / cells, self.y as f64 / cells);
        let (east, south) =
            frame.mercator_to_enu((self.x + 1) as f64 / cells, (self.y + 1) as f64 / cells);
        (west, south, east, north)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.zoom, self.x, self.y)
    }
}

/// Grid cell of an ENU position at `zoom`, clamped to the valid range
pub fn cell_of(frame: &ReferenceFrame, east: f64, north: f64, zoom: u8) -> (u32, u32) {
    let cells = (1u64 << zoom) as f64;
    let (mx, my) = frame.enu_to_mercator(east, north);
    let max = (1u64 << zoom) - 1;
    let index = |m: f64| ((m * cells).floor().max(0.0) as u64).min(max) as u32;
    (index(mx), index(my))
}

pub fn parent_of(x: u32, y: u32) -> (u32, u32) {
    (x / 2, y / 2)
}

/// Edge length of a cell at `zoom` in local meters
pub fn cell_size_meters(frame: &ReferenceFrame, zoom: u8) -> f64 {
    1.0 / ((1u64 << zoom) as f64 * frame.mercator_scale())
}

/// An in-memory tile: its key, its splats and their bounds
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: TileId,
    pub splats: Vec<Splat>,
    pub bounds: TileBounds,
}

impl Tile {
    pub fn new(id: TileId, splats: Vec<Splat>) -> Self {
        let bounds = TileBounds::from_splats(&splats);
        Self { id, splats, bounds }
    }

    pub fn read(dir: &Path, id: TileId) -> Result<Self> {
        let splats = splat::read_splats(&dir.join(id.file_name()))?;
        Ok(Self::new(id, splats))
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        splat::write_splats(&dir.join(self.id.file_name()), &self.splats)
    }

    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }
}

/// One tile's entry in a level index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelEntry {
    pub points: usize,
    /// Finer-zoom cells this tile was derived from, as [x, y]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<[u32; 2]>,
}

/// `level.json`: what a finished zoom directory contains
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelIndex {
    pub zoom: u8,
    /// Keyed by `{x}_{y}` for readable, stably ordered JSON
    pub tiles: BTreeMap<String, LevelEntry>,
}

impl LevelIndex {
    pub fn new(zoom: u8) -> Self {
        Self {
            zoom,
            tiles: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: TileId, entry: LevelEntry) {
        self.tiles.insert(format!("{}_{}", id.x, id.y), entry);
    }

    /// Entries with parsed ids
    pub fn entries(&self) -> impl Iterator<Item = (TileId, &LevelEntry)> + '_ {
        self.tiles.iter().filter_map(move |(key, entry)| {
            let (x, y) = key.split_once('_')?;
            Some((TileId::new(self.zoom, x.parse().ok()?, y.parse().ok()?), entry))
        })
    }

    pub fn total_points(&self) -> usize {
        self.tiles.values().map(|e| e.points).sum()
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(LEVEL_INDEX_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).is_file()
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let text = fs::read_to_string(&path).at(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        splat::write_atomic(&Self::path(dir), json.as_bytes())
    }
}

/// Tile ids present in a zoom directory, sorted
pub fn list_tiles(dir: &Path, zoom: u8) -> Result<Vec<TileId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let name = entry.file_name();
        if let Some(id) = TileId::from_file_name(zoom, &name.to_string_lossy()) {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Zoom of a level directory: from its index when present, else its name
pub fn level_zoom(dir: &Path) -> Option<u8> {
    if let Ok(index) = LevelIndex::load(dir) {
        return Some(index.zoom);
    }
    dir.file_name()?.to_str()?.parse().ok()
}
