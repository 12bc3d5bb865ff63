/// On-disk layout shared by the splitter, cleaner, LOD builder and assembler.

/// Size of one `.splat` record: position (3 f32), scale (3 f32),
/// colour RGBA (4 u8), rotation wxyz (4 u8).
pub const SPLAT_RECORD_SIZE: usize = 32;

/// Extension of point tile files.
pub const TILE_EXTENSION: &str = "splat";

/// Extension of binary tile content written for the tileset.
pub const CONTENT_EXTENSION: &str = "glb";

/// Per-level index recording tile counts and parent claims.
pub const LEVEL_INDEX_FILE: &str = "level.json";

/// Tileset manifest file name.
pub const TILESET_FILE: &str = "tileset.json";

/// Run report written at the output root.
pub const REPORT_FILE: &str = "report.json";

/// Suffix of a stage directory that is still being written.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Stage directory names under the run output directory.
pub const SPLIT_DIR: &str = "split";
pub const BUILD_DIR: &str = "build";
pub const RESULT_DIR: &str = "result";
pub const COMPRESSED_DIR: &str = "result_opt";

/// 3D Tiles version written into manifests; 1.1 takes glTF content directly.
pub const TILESET_VERSION: &str = "1.1";

/// Primitive extension marking splat content.
pub const GAUSSIAN_SPLATTING_EXTENSION: &str = "KHR_gaussian_splatting";
