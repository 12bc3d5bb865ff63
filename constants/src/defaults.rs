/// Operator parameter defaults

/// Finest zoom level produced by the splitter.
pub const TILE_ZOOM: u8 = 20;

/// Number of coarser levels built above the finest zoom.
pub const LOD_LEVELS: u8 = 5;

/// Decimation grid cell size of the first LOD level (meters).
pub const TILE_RESOLUTION: f64 = 0.1;

/// Geometric error of the first LOD level (meters).
pub const TILE_ERROR: f64 = 1.0;

/// Minimum opacity kept by the cleaner, one alpha step (drops fully transparent splats).
pub const MIN_ALPHA: f32 = 1.0 / 255.0;

/// Largest scale component kept by the cleaner.
pub const MAX_SCALE: f32 = 10_000.0;

/// Neighbour count for flyer detection.
pub const FLYERS_NUM: usize = 25;

/// Flyer distance factor relative to the tile average.
pub const FLYERS_DISTANCE: f64 = 10.0;

/// Upper bound on repeated flyer passes over one tile.
pub const MAX_FLYER_PASSES: usize = 16;

/// Records read per chunk by the splitter.
pub const SPLIT_CHUNK_POINTS: usize = 1 << 20;

/// Arguments passed to gltfpack for every content file.
pub const GLTFPACK_ARGS: &[&str] = &["-cc", "-vpf"];

/// Progress bar template and glyphs.
pub const PROGRESS_TEMPLATE: &str = "[{bar:40.green/blue}] {pos}/{len} {prefix} ({percent}%) {msg}";
pub const PROGRESS_CHARS: &str = "▉▊▋▌▍▎▏ ";
