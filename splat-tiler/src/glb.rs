/// Binary glTF content for one tile: a single POINTS primitive carrying the
/// splat attributes read by the viewer.
use crate::error::{Result, TilerError};
use crate::splat::Splat;
use bytemuck::{Pod, Zeroable};
use constants::coordinate_system::enu_to_gltf;
use constants::format::GAUSSIAN_SPLATTING_EXTENSION;
use serde_json::{Value, json};
use std::path::Path;

const GLB_MAGIC: [u8; 4] = *b"glTF";
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F534A;
const CHUNK_BIN: u32 = 0x004E4942;

const COMPONENT_UNSIGNED_BYTE: u32 = 5121;
const COMPONENT_FLOAT: u32 = 5126;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const MODE_POINTS: u32 = 0;

/// GLB file header (12 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GlbHeader {
    magic: [u8; 4],
    version: u32,
    length: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ChunkHeader {
    length: u32,
    kind: u32,
}

/// Attribute columns in glTF (y-up) order
struct Columns {
    positions: Vec<[f32; 3]>,
    colors: Vec<[u8; 4]>,
    scales: Vec<[f32; 3]>,
    rotations: Vec<[f32; 4]>,
}

impl Columns {
    fn from_splats(splats: &[Splat]) -> Self {
        let positions = splats
            .iter()
            .map(|s| {
                let [e, n, u] = s.position.map(|c| c as f64);
                let (x, y, z) = enu_to_gltf(e, n, u);
                [x as f32, y as f32, z as f32]
            })
            .collect();
        // Local axes move with the frame: scales swap like positions and the
        // quaternion's vector part is rotated like a position. Scales are
        // stored as natural logs, which the viewer exponentiates.
        let scales = splats
            .iter()
            .map(|s| [s.scale[0], s.scale[2], s.scale[1]].map(log_scale))
            .collect();
        let rotations = splats
            .iter()
            .map(|s| {
                let [x, y, z, w] = s.rotation_xyzw();
                [x, z, -y, w]
            })
            .collect();
        Self {
            positions,
            colors: splats.iter().map(|s| s.color).collect(),
            scales,
            rotations,
        }
    }

    fn position_range(&self) -> ([f32; 3], [f32; 3]) {
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for p in &self.positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        (min, max)
    }
}

/// Encode splats as a GLB document.
pub fn encode(splats: &[Splat]) -> Result<Vec<u8>> {
    if splats.is_empty() {
        return Err(TilerError::Config("cannot encode an empty tile".to_string()));
    }
    let count = splats.len();
    let columns = Columns::from_splats(splats);

    let mut bin: Vec<u8> = Vec::with_capacity(count * 44);
    let mut views = Vec::new();
    let mut push_view = |bytes: &[u8]| {
        views.push(json!({
            "buffer": 0,
            "byteOffset": bin.len(),
            "byteLength": bytes.len(),
            "target": TARGET_ARRAY_BUFFER,
        }));
        bin.extend_from_slice(bytes);
    };
    push_view(bytemuck::cast_slice(columns.positions.as_slice()));
    push_view(bytemuck::cast_slice(columns.colors.as_slice()));
    push_view(bytemuck::cast_slice(columns.scales.as_slice()));
    push_view(bytemuck::cast_slice(columns.rotations.as_slice()));

    let (min, max) = columns.position_range();
    let document = json!({
        "asset": { "version": "2.0", "generator": concat!("splat-tiler ", env!("CARGO_PKG_VERSION")) },
        "extensionsUsed": [GAUSSIAN_SPLATTING_EXTENSION],
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "mode": MODE_POINTS,
                "attributes": {
                    "POSITION": 0,
                    "COLOR_0": 1,
                    "_SCALE": 2,
                    "_ROTATION": 3,
                },
                "extensions": { GAUSSIAN_SPLATTING_EXTENSION: {} },
            }],
        }],
        "buffers": [{ "byteLength": bin.len() }],
        "bufferViews": views,
        "accessors": [
            { "bufferView": 0, "componentType": COMPONENT_FLOAT, "count": count, "type": "VEC3", "min": min, "max": max },
            { "bufferView": 1, "componentType": COMPONENT_UNSIGNED_BYTE, "normalized": true, "count": count, "type": "VEC4" },
            { "bufferView": 2, "componentType": COMPONENT_FLOAT, "count": count, "type": "VEC3" },
            { "bufferView": 3, "componentType": COMPONENT_FLOAT, "count": count, "type": "VEC4" },
        ],
    });

    let mut json_bytes = serde_json::to_vec(&document)?;
    pad_to_four(&mut json_bytes, b' ');
    pad_to_four(&mut bin, 0);

    let length = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(length);
    out.extend_from_slice(bytemuck::bytes_of(&GlbHeader {
        magic: GLB_MAGIC,
        version: GLB_VERSION,
        length: length as u32,
    }));
    out.extend_from_slice(bytemuck::bytes_of(&ChunkHeader {
        length: json_bytes.len() as u32,
        kind: CHUNK_JSON,
    }));
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(bytemuck::bytes_of(&ChunkHeader {
        length: bin.len() as u32,
        kind: CHUNK_BIN,
    }));
    out.extend_from_slice(&bin);
    Ok(out)
}

/// Log-space scale; a zero extent maps to the smallest finite value.
fn log_scale(extent: f32) -> f32 {
    extent.max(f32::MIN_POSITIVE).ln()
}

fn pad_to_four(bytes: &mut Vec<u8>, fill: u8) {
    while bytes.len() % 4 != 0 {
        bytes.push(fill);
    }
}

/// JSON chunk of a GLB document.
pub fn read_json(bytes: &[u8], path: &Path) -> Result<Value> {
    let corrupt = |reason: &str| TilerError::CorruptTile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if bytes.len() < 20 {
        return Err(corrupt("shorter than a GLB header"));
    }
    let header: GlbHeader = bytemuck::pod_read_unaligned(&bytes[..12]);
    if header.magic != GLB_MAGIC || header.version != GLB_VERSION {
        return Err(corrupt("not a glTF 2.0 binary"));
    }
    let chunk: ChunkHeader = bytemuck::pod_read_unaligned(&bytes[12..20]);
    let end = 20 + chunk.length as usize;
    if chunk.kind != CHUNK_JSON || end > bytes.len() {
        return Err(corrupt("missing JSON chunk"));
    }
    Ok(serde_json::from_slice(&bytes[20..end])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splat::test_splat;

    #[test]
    fn document_is_aligned_and_self_describing() {
        let splats = vec![test_splat([1.0, 2.0, 3.0], 255), test_splat([-1.0, 0.0, 0.5], 7)];
        let bytes = encode(&splats).unwrap();

        assert_eq!(&bytes[..4], b"glTF");
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize, bytes.len());

        let json = read_json(&bytes, Path::new("t.glb")).unwrap();
        let primitive = &json["meshes"][0]["primitives"][0];
        assert_eq!(primitive["mode"], 0);
        assert!(primitive["extensions"][GAUSSIAN_SPLATTING_EXTENSION].is_object());
        assert_eq!(json["accessors"][0]["count"], 2);
        assert_eq!(json["buffers"][0]["byteLength"], 2 * 44);
    }

    #[test]
    fn positions_are_stored_y_up() {
        let bytes = encode(&[test_splat([1.0, 2.0, 3.0], 255)]).unwrap();
        let json = read_json(&bytes, Path::new("t.glb")).unwrap();
        let min: Vec<f64> = serde_json::from_value(json["accessors"][0]["min"].clone()).unwrap();
        assert_eq!(min, vec![1.0, 3.0, -2.0]);
    }

    #[test]
    fn scales_are_written_in_log_space() {
        let mut splat = test_splat([0.0; 3], 255);
        splat.scale = [1.0, 2.0, 0.5];
        let bytes = encode(&[splat]).unwrap();
        let json = read_json(&bytes, Path::new("t.glb")).unwrap();

        let json_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let bin_start = 20 + json_len + 8;
        let offset = bin_start + json["bufferViews"][2]["byteOffset"].as_u64().unwrap() as usize;
        let stored: Vec<f32> = bytes[offset..offset + 12]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
            .collect();

        let expected = [0.0f32, 0.5f32.ln(), 2.0f32.ln()];
        for (s, e) in stored.iter().zip(expected) {
            assert!((s - e).abs() < 1e-6, "{stored:?}");
        }
        assert!(log_scale(0.0).is_finite());
    }

    #[test]
    fn encoding_is_deterministic() {
        let splats: Vec<Splat> = (0..17).map(|i| test_splat([i as f32, 0.0, 0.0], 255)).collect();
        assert_eq!(encode(&splats).unwrap(), encode(&splats).unwrap());
    }

    #[test]
    fn foreign_bytes_are_rejected() {
        let err = read_json(b"not a glb file at all", Path::new("x.glb")).unwrap_err();
        assert!(matches!(err, TilerError::CorruptTile { .. }));
    }
}
