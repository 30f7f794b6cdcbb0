//! Pipeline configuration: a JSON settings file deserialized into nested
//! structs, every field individually defaultable so a partial file only
//! overrides what it names. No module-level singletons; the loaded value is
//! passed by reference into each stage.

use std::path::Path;

use anyhow::{Context, Result};
use glbtile::proj::TransverseMercator;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project: ProjectSettings,
    pub projection: TransverseMercator,
    pub buildings: BuildingSettings,
    pub terrain: TerrainSettings,
    pub roads: RoadSettings,
    pub railways: RailwaySettings,
    pub waterways: WaterwaySettings,
    pub water: WaterSettings,
    pub sea: SeaSettings,
    pub output: OutputSettings,
}

impl Settings {
    /// Load settings from a JSON file, or fall back to the defaults when the
    /// file does not exist. A present-but-unreadable file is an error.
    pub fn load(path: &Path) -> Result<Settings> {
        if !path.exists() {
            info!("settings file {} not found, using defaults", path.display());
            return Ok(Settings::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing settings {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub name: String,
    pub version: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            name: "twin_mvp_v1".into(),
            version: "1.0.0".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildingSettings {
    pub storey_height_m: f64,
    pub ndsm_percentile: f64,
    pub min_height_m: f64,
    pub max_height_m: f64,
    pub default_height_m: f64,
}

impl Default for BuildingSettings {
    fn default() -> Self {
        Self {
            storey_height_m: 3.0,
            ndsm_percentile: 90.0,
            min_height_m: 2.5,
            max_height_m: 80.0,
            // two storeys
            default_height_m: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSettings {
    pub chunk_size_m: f64,
    /// Stride applied to the elevation grid before meshing (1 = full res).
    pub downsample: usize,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            chunk_size_m: 500.0,
            downsample: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadSettings {
    pub width_primary_m: f64,
    pub width_secondary_m: f64,
    pub width_tertiary_m: f64,
    pub width_residential_m: f64,
    pub width_service_m: f64,
    pub width_footway_m: f64,
    pub width_cycleway_m: f64,
    pub width_steps_m: f64,
    pub width_default_m: f64,
    pub elevation_offset_m: f64,
}

impl Default for RoadSettings {
    fn default() -> Self {
        Self {
            width_primary_m: 8.0,
            width_secondary_m: 7.0,
            width_tertiary_m: 6.0,
            width_residential_m: 5.0,
            width_service_m: 4.0,
            width_footway_m: 2.0,
            width_cycleway_m: 2.5,
            width_steps_m: 1.5,
            width_default_m: 4.0,
            elevation_offset_m: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RailwaySettings {
    pub width_m: f64,
    pub elevation_offset_m: f64,
}

impl Default for RailwaySettings {
    fn default() -> Self {
        Self {
            width_m: 3.5,
            elevation_offset_m: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterwaySettings {
    pub width_river_m: f64,
    pub width_canal_m: f64,
    pub width_stream_m: f64,
    pub width_brook_m: f64,
    pub width_drain_m: f64,
    pub width_ditch_m: f64,
    pub width_default_m: f64,
    pub elevation_offset_m: f64,
}

impl Default for WaterwaySettings {
    fn default() -> Self {
        Self {
            width_river_m: 6.0,
            width_canal_m: 8.0,
            width_stream_m: 2.0,
            width_brook_m: 1.5,
            width_drain_m: 1.0,
            width_ditch_m: 1.0,
            width_default_m: 2.0,
            elevation_offset_m: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterSettings {
    pub elevation_offset_m: f64,
}

impl Default for WaterSettings {
    fn default() -> Self {
        Self {
            elevation_offset_m: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeaSettings {
    pub elevation_m: f64,
}

impl Default for SeaSettings {
    fn default() -> Self {
        Self { elevation_m: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Gzip every packed asset (the manifest records which entries are).
    pub compress: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self { compress: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_only_override_named_fields() {
        let parsed: Settings =
            serde_json::from_str(r#"{ "terrain": { "chunk_size_m": 250.0 } }"#).unwrap();
        assert_eq!(parsed.terrain.chunk_size_m, 250.0);
        assert_eq!(parsed.terrain.downsample, 4);
        assert_eq!(parsed.buildings.storey_height_m, 3.0);
        assert_eq!(parsed.roads.width_primary_m, 8.0);
    }

    #[test]
    fn defaults_round_trip_through_json() {
        let defaults = Settings::default();
        let text = serde_json::to_string(&defaults).unwrap();
        let back: Settings = serde_json::from_str(&text).unwrap();
        assert_eq!(back.buildings.max_height_m, defaults.buildings.max_height_m);
        assert_eq!(back.sea.elevation_m, defaults.sea.elevation_m);
    }
}
