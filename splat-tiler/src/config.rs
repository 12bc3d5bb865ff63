/// Operator parameters for a conversion run
use crate::cleaner::CleanParams;
use crate::compressor::CompressorConfig;
use crate::coordinates::{CoordinateAdapter, ReferenceFrame, SourceProjection};
use crate::error::{IoResultExt, Result, TilerError};
use crate::tile::MAX_ZOOM;
use constants::defaults::{LOD_LEVELS, TILE_ERROR, TILE_RESOLUTION, TILE_ZOOM};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Geodetic origin of the local frame, [lon, lat] in degrees
    pub origin: [f64; 2],
    pub tile_zoom: u8,
    pub lod_levels: u8,
    /// Decimation grid of the first LOD level, meters
    pub tile_resolution: f64,
    /// Geometric error of the first LOD level, meters
    pub tile_error: f64,
    #[serde(flatten)]
    pub clean: CleanParams,
    pub source_projection: SourceProjection,
    /// Compress content after assembly when set
    pub compressor: Option<CompressorConfig>,
    /// Worker threads; the CPU count when unset
    pub workers: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            origin: [0.0, 0.0],
            tile_zoom: TILE_ZOOM,
            lod_levels: LOD_LEVELS,
            tile_resolution: TILE_RESOLUTION,
            tile_error: TILE_ERROR,
            clean: CleanParams::default(),
            source_projection: SourceProjection::default(),
            compressor: None,
            workers: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).at(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.frame()?;
        if self.tile_zoom > MAX_ZOOM {
            return Err(TilerError::Config(format!(
                "tile_zoom {} exceeds the maximum of {MAX_ZOOM}",
                self.tile_zoom
            )));
        }
        if self.lod_levels > self.tile_zoom {
            return Err(TilerError::Config(format!(
                "{} LOD levels do not fit above zoom {}",
                self.lod_levels, self.tile_zoom
            )));
        }
        if !(self.tile_resolution.is_finite() && self.tile_resolution > 0.0) {
            return Err(TilerError::Config(format!(
                "tile_resolution {} must be a positive number of meters",
                self.tile_resolution
            )));
        }
        if !(self.tile_error.is_finite() && self.tile_error > 0.0) {
            return Err(TilerError::Config(format!(
                "tile_error {} must be positive",
                self.tile_error
            )));
        }
        if self.workers == Some(0) {
            return Err(TilerError::Config("workers must be at least 1".to_string()));
        }
        self.clean.validate()
    }

    pub fn frame(&self) -> Result<ReferenceFrame> {
        let [lon, lat] = self.origin;
        ReferenceFrame::new(lon, lat)
            .map_err(|e| TilerError::Config(format!("origin ({lon}, {lat}) is unusable: {e}")))
    }

    pub fn adapter(&self) -> Result<CoordinateAdapter> {
        Ok(CoordinateAdapter::new(self.frame()?, self.source_projection))
    }

    /// Zoom of the coarsest LOD level
    pub fn coarsest_zoom(&self) -> u8 {
        self.tile_zoom - self.lod_levels
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(rayon::current_num_threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_operator_tool() {
        let config = PipelineConfig::default();
        assert_eq!(config.tile_zoom, 20);
        assert_eq!(config.lod_levels, 5);
        assert_eq!(config.tile_resolution, 0.1);
        assert_eq!(config.tile_error, 1.0);
        assert_eq!(config.clean.flyers_num, 25);
        assert_eq!(config.clean.flyers_dis, 10.0);
        assert_eq!(config.coarsest_zoom(), 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{
            "origin": [120.0, 30.0],
            "min_alpha": 1.0,
            "source_projection": { "type": "geographic" },
            "compressor": { "timeout_secs": 30 }
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.origin, [120.0, 30.0]);
        assert_eq!(config.clean.min_alpha, 1.0);
        assert_eq!(config.clean.max_scale, 10000.0);
        assert_eq!(config.source_projection, SourceProjection::Geographic);
        let compressor = config.compressor.unwrap();
        assert_eq!(compressor.timeout_secs, Some(30));
        assert_eq!(compressor.args, vec!["-cc", "-vpf"]);
    }

    #[test]
    fn invalid_parameters_are_rejected_before_running() {
        let bad = [
            PipelineConfig {
                origin: [0.0, 89.0],
                ..Default::default()
            },
            PipelineConfig {
                tile_zoom: 3,
                ..Default::default()
            },
            PipelineConfig {
                tile_resolution: 0.0,
                ..Default::default()
            },
            PipelineConfig {
                workers: Some(0),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(TilerError::Config(_))), "{config:?}");
        }
    }
}
