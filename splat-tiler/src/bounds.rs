/// Axis-aligned bounds tracking for tiles and tileset nodes
use crate::splat::Splat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl TileBounds {
    /// Create new bounds initialised to infinity values (empty)
    pub fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
            min_z: f64::INFINITY,
            max_z: f64::NEG_INFINITY,
        }
    }

    /// Tight bounds over splat positions
    pub fn from_splats(splats: &[Splat]) -> Self {
        let mut bounds = Self::new();
        for splat in splats {
            let [x, y, z] = splat.position;
            bounds.update(x as f64, y as f64, z as f64);
        }
        bounds
    }

    /// Update bounds with a new point
    pub fn update(&mut self, x: f64, y: f64, z: f64) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
    }

    /// Grow to enclose another bounds
    pub fn merge(&mut self, other: &TileBounds) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        self.min_z = self.min_z.min(other.min_z);
        self.max_z = self.max_z.max(other.max_z);
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y || self.min_z > self.max_z
    }

    pub fn contains_point(&self, x: f64, y: f64, z: f64) -> bool {
        x >= self.min_x
            && x <= self.max_x
            && y >= self.min_y
            && y <= self.max_y
            && z >= self.min_z
            && z <= self.max_z
    }

    /// Empty bounds are contained by anything
    pub fn contains(&self, other: &TileBounds) -> bool {
        other.is_empty()
            || (self.contains_point(other.min_x, other.min_y, other.min_z)
                && self.contains_point(other.max_x, other.max_y, other.max_z))
    }

    /// Grown by `margin` on every side
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            max_x: self.max_x + margin,
            min_y: self.min_y - margin,
            max_y: self.max_y + margin,
            min_z: self.min_z - margin,
            max_z: self.max_z + margin,
        }
    }

    pub fn center(&self) -> (f64, f64, f64) {
        (
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
            (self.min_z + self.max_z) * 0.5,
        )
    }

    /// Get world space dimensions
    pub fn dimensions(&self) -> (f64, f64, f64) {
        (
            self.max_x - self.min_x,
            self.max_y - self.min_y,
            self.max_z - self.min_z,
        )
    }

    /// 3D Tiles `box`: center followed by the three half-axis vectors
    pub fn to_box(&self) -> [f64; 12] {
        let (cx, cy, cz) = self.center();
        let (dx, dy, dz) = self.dimensions();
        [
            cx,
            cy,
            cz,
            dx * 0.5,
            0.0,
            0.0,
            0.0,
            dy * 0.5,
            0.0,
            0.0,
            0.0,
            dz * 0.5,
        ]
    }

    /// Inverse of `to_box` for axis-aligned boxes
    pub fn from_box(data: &[f64; 12]) -> Self {
        let (hx, hy, hz) = (data[3].abs(), data[7].abs(), data[11].abs());
        Self {
            min_x: data[0] - hx,
            max_x: data[0] + hx,
            min_y: data[1] - hy,
            max_y: data[1] + hy,
            min_z: data[2] - hz,
            max_z: data[2] + hz,
        }
    }
}

impl Default for TileBounds {
    fn default() -> Self {
        Self::new()
    }
}
