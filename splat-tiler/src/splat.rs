/// Splat record layout and tile file access
use crate::error::{IoResultExt, Result, TilerError};
use bytemuck::{Pod, Zeroable};
use constants::format::SPLAT_RECORD_SIZE;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One Gaussian splat as stored in `.splat` files.
/// Field order and sizes are the 32-byte on-disk record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Splat {
    pub position: [f32; 3],
    pub scale: [f32; 3],
    /// RGBA, alpha is opacity * 255.
    pub color: [u8; 4],
    /// Quaternion w, x, y, z packed as `c * 128 + 128`.
    pub rotation: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<Splat>() == SPLAT_RECORD_SIZE);

impl Splat {
    /// Opacity in [0, 1]
    pub fn opacity(&self) -> f32 {
        self.color[3] as f32 / 255.0
    }

    pub fn max_scale(&self) -> f32 {
        self.scale[0].max(self.scale[1]).max(self.scale[2])
    }

    /// Position and scale are all finite numbers
    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(self.scale.iter()).all(|c| c.is_finite())
    }

    /// Decoded unit quaternion in glTF order (x, y, z, w).
    pub fn rotation_xyzw(&self) -> [f32; 4] {
        let decode = |b: u8| (b as f32 - 128.0) / 128.0;
        let (w, x, y, z) = (
            decode(self.rotation[0]),
            decode(self.rotation[1]),
            decode(self.rotation[2]),
            decode(self.rotation[3]),
        );
        let norm = (w * w + x * x + y * y + z * z).sqrt();
        if norm > f32::EPSILON {
            [x / norm, y / norm, z / norm, w / norm]
        } else {
            [0.0, 0.0, 0.0, 1.0]
        }
    }
}

/// Decode a byte buffer of whole records.
pub fn decode_records(bytes: &[u8], path: &Path) -> Result<Vec<Splat>> {
    if bytes.len() % SPLAT_RECORD_SIZE != 0 {
        return Err(TilerError::CorruptTile {
            path: path.to_path_buf(),
            reason: format!(
                "{} bytes is not a multiple of the {}-byte record",
                bytes.len(),
                SPLAT_RECORD_SIZE
            ),
        });
    }
    // Copy out instead of casting in place; file buffers carry no alignment guarantee.
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

/// Read every splat of a tile file.
pub fn read_splats(path: &Path) -> Result<Vec<Splat>> {
    let bytes = fs::read(path).at(path)?;
    decode_records(&bytes, path)
}

/// Write a tile file through a temporary sibling and rename it into place,
/// so readers never observe a half-written tile.
pub fn write_splats(path: &Path, splats: &[Splat]) -> Result<()> {
    let tmp = temp_path(path);
    {
        let file = File::create(&tmp).at(&tmp)?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytemuck::cast_slice(splats))
            .and_then(|_| writer.flush())
            .at(&tmp)?;
    }
    fs::rename(&tmp, path).at(path)
}

/// Write arbitrary bytes atomically (content files, manifests).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    fs::write(&tmp, bytes).at(&tmp)?;
    fs::rename(&tmp, path).at(path)
}

/// Temporary path keeping the original extension last, for tools that sniff it.
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".tmp.{name}"))
}

#[cfg(test)]
pub(crate) fn test_splat(position: [f32; 3], alpha: u8) -> Splat {
    Splat {
        position,
        scale: [0.01, 0.01, 0.01],
        color: [200, 100, 50, alpha],
        rotation: [255, 128, 128, 128],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_survive_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("3_4.splat");
        let splats = vec![
            test_splat([1.0, 2.0, 3.0], 255),
            test_splat([-4.0, 5.5, 0.25], 10),
        ];

        write_splats(&path, &splats).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 64);
        assert_eq!(read_splats(&path).unwrap(), splats);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn truncated_file_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0_0.splat");
        fs::write(&path, [0u8; 40]).unwrap();

        let err = read_splats(&path).unwrap_err();
        assert!(matches!(err, TilerError::CorruptTile { .. }));
    }

    #[test]
    fn missing_file_carries_its_path() {
        let err = read_splats(Path::new("/nonexistent/1_1.splat")).unwrap_err();
        assert!(err.to_string().contains("1_1.splat"));
    }

    #[test]
    fn identity_rotation_decodes_to_unit_w() {
        let splat = test_splat([0.0; 3], 255);
        let q = splat.rotation_xyzw();
        assert_eq!(q[0], 0.0);
        assert!((q[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opacity_is_normalised_alpha() {
        assert_eq!(test_splat([0.0; 3], 255).opacity(), 1.0);
        assert!((test_splat([0.0; 3], 51).opacity() - 0.2).abs() < 1e-6);
    }
}
