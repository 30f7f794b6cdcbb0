//! Vector feature input model: GeoJSON FeatureCollections with free-form tag
//! maps, plus the classification functions that turn raw tags into the typed
//! categories the geometry code consumes. Raw tag maps never travel past
//! this boundary.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{RoadSettings, WaterwaySettings};

pub type TagMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "feature_collection_kind")]
    pub kind: String,
    pub features: Vec<Feature>,
}

fn feature_collection_kind() -> String {
    "FeatureCollection".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_kind")]
    pub kind: String,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: TagMap,
}

fn feature_kind() -> String {
    "Feature".into()
}

/// Geometry is kept as a tagged coordinate blob so unknown types pass
/// through unharmed when a collection is rewritten (the heights stage does
/// exactly that).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

impl Geometry {
    /// Exterior ring of a `Polygon` geometry.
    pub fn polygon_exterior(&self) -> Option<Vec<[f64; 2]>> {
        if self.kind != "Polygon" {
            return None;
        }
        let rings: Vec<Vec<[f64; 2]>> = serde_json::from_value(self.coordinates.clone()).ok()?;
        rings.into_iter().next().filter(|r| r.len() >= 3)
    }

    /// Exterior rings of a `Polygon` or every part of a `MultiPolygon`.
    pub fn polygon_exteriors(&self) -> Vec<Vec<[f64; 2]>> {
        match self.kind.as_str() {
            "Polygon" => self.polygon_exterior().into_iter().collect(),
            "MultiPolygon" => {
                let parts: Vec<Vec<Vec<[f64; 2]>>> =
                    match serde_json::from_value(self.coordinates.clone()) {
                        Ok(parts) => parts,
                        Err(_) => return Vec::new(),
                    };
                parts
                    .into_iter()
                    .filter_map(|rings| rings.into_iter().next())
                    .filter(|r| r.len() >= 3)
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Point sequence of a `LineString` geometry.
    pub fn line(&self) -> Option<Vec<[f64; 2]>> {
        if self.kind != "LineString" {
            return None;
        }
        let coords: Vec<[f64; 2]> = serde_json::from_value(self.coordinates.clone()).ok()?;
        (coords.len() >= 2).then_some(coords)
    }
}

pub fn load_collection(path: &Path) -> Result<FeatureCollection> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening feature collection {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    serde_json::from_reader(reader)
        .with_context(|| format!("parsing feature collection {}", path.display()))
}

pub fn save_collection(path: &Path, collection: &FeatureCollection) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("writing feature collection {}", path.display()))?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer(writer, collection)
        .with_context(|| format!("serializing feature collection {}", path.display()))
}

/// Tag value as a string slice, when it is one.
pub fn tag_str<'a>(tags: &'a TagMap, key: &str) -> Option<&'a str> {
    tags.get(key).and_then(Value::as_str)
}

/// Tag value as a number, accepting both JSON numbers and numeric strings
/// (OSM exports disagree on which one `building:levels` is).
pub fn tag_f64(tags: &TagMap, key: &str) -> Option<f64> {
    match tags.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Closed classification of a building footprint, the only thing the
/// envelope synthesizer sees of the tag map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildingCategory {
    Terraced,
    Apartments,
    Commercial,
    Industrial,
    Garage,
    Church,
    School,
}

impl BuildingCategory {
    pub fn label(&self) -> &'static str {
        match self {
            BuildingCategory::Terraced => "terraced",
            BuildingCategory::Apartments => "apartments",
            BuildingCategory::Commercial => "commercial",
            BuildingCategory::Industrial => "industrial",
            BuildingCategory::Garage => "garage",
            BuildingCategory::Church => "church",
            BuildingCategory::School => "school",
        }
    }
}

/// Roof construction chosen from the category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoofStyle {
    Flat,
    Pitched { pitch_deg: f64 },
}

pub fn classify_building(tags: &TagMap, height: f64) -> BuildingCategory {
    if let Some(building) = tag_str(tags, "building") {
        match building {
            "house" | "detached" | "semidetached_house" | "terrace" | "terraced_house" => {
                return BuildingCategory::Terraced
            }
            "apartments" | "residential" | "flats" => return BuildingCategory::Apartments,
            "commercial" | "retail" | "shop" => return BuildingCategory::Commercial,
            "industrial" | "warehouse" | "factory" => return BuildingCategory::Industrial,
            "garage" | "garages" | "shed" => return BuildingCategory::Garage,
            "church" | "chapel" => return BuildingCategory::Church,
            _ => {}
        }
    }

    if tags.contains_key("shop") || tags.contains_key("office") {
        return BuildingCategory::Commercial;
    }
    if matches!(
        tag_str(tags, "amenity"),
        Some("school") | Some("college") | Some("university")
    ) {
        return BuildingCategory::School;
    }

    // No usable tags: infer from height (short -> utility, tall -> flats).
    if height < 5.0 {
        BuildingCategory::Garage
    } else if height > 15.0 {
        BuildingCategory::Apartments
    } else {
        BuildingCategory::Terraced
    }
}

pub fn roof_style(category: BuildingCategory) -> RoofStyle {
    match category {
        BuildingCategory::Terraced => RoofStyle::Pitched { pitch_deg: 35.0 },
        BuildingCategory::Garage => RoofStyle::Pitched { pitch_deg: 20.0 },
        BuildingCategory::Church => RoofStyle::Pitched { pitch_deg: 45.0 },
        _ => RoofStyle::Flat,
    }
}

/// Extrusion width for a road by its `highway` class.
pub fn road_width_m(highway: &str, cfg: &RoadSettings) -> f64 {
    match highway {
        "motorway" | "motorway_link" | "trunk" | "trunk_link" | "primary" | "primary_link" => {
            cfg.width_primary_m
        }
        "secondary" | "secondary_link" => cfg.width_secondary_m,
        "tertiary" | "tertiary_link" => cfg.width_tertiary_m,
        "residential" | "unclassified" => cfg.width_residential_m,
        "service" | "track" => cfg.width_service_m,
        "footway" | "path" | "pedestrian" => cfg.width_footway_m,
        "cycleway" => cfg.width_cycleway_m,
        "steps" => cfg.width_steps_m,
        _ => cfg.width_default_m,
    }
}

/// Extrusion width for a linear waterway by its `waterway` type.
pub fn waterway_width_m(waterway: &str, cfg: &WaterwaySettings) -> f64 {
    match waterway {
        "river" => cfg.width_river_m,
        "canal" => cfg.width_canal_m,
        "stream" => cfg.width_stream_m,
        "brook" => cfg.width_brook_m,
        "drain" => cfg.width_drain_m,
        "ditch" => cfg.width_ditch_m,
        _ => cfg.width_default_m,
    }
}

/// Linear waterways arrive in the water collection as LineStrings and are
/// ribboned; everything else there is an area water body.
pub fn is_linear_waterway(tags: &TagMap) -> bool {
    matches!(
        tag_str(tags, "waterway"),
        Some("stream") | Some("river") | Some("drain") | Some("ditch") | Some("canal")
            | Some("brook")
    )
}

/// Island and islet coastline segments never contribute to the sea polygon.
pub fn is_island(tags: &TagMap) -> bool {
    matches!(tag_str(tags, "place"), Some("island") | Some("islet"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags(pairs: &[(&str, Value)]) -> TagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn explicit_building_tags_win_over_height() {
        let t = tags(&[("building", json!("church"))]);
        assert_eq!(classify_building(&t, 40.0), BuildingCategory::Church);

        let t = tags(&[("building", json!("yes")), ("shop", json!("bakery"))]);
        assert_eq!(classify_building(&t, 6.0), BuildingCategory::Commercial);
    }

    #[test]
    fn untagged_buildings_classify_by_height() {
        let t = TagMap::new();
        assert_eq!(classify_building(&t, 3.0), BuildingCategory::Garage);
        assert_eq!(classify_building(&t, 20.0), BuildingCategory::Apartments);
        assert_eq!(classify_building(&t, 8.0), BuildingCategory::Terraced);
    }

    #[test]
    fn road_width_lookup_falls_back_to_default() {
        let cfg = RoadSettings::default();
        assert_eq!(road_width_m("primary", &cfg), 8.0);
        assert_eq!(road_width_m("trunk_link", &cfg), 8.0);
        assert_eq!(road_width_m("bridleway", &cfg), 4.0);
    }

    #[test]
    fn geometry_decoding_by_kind() {
        let polygon = Geometry {
            kind: "Polygon".into(),
            coordinates: json!([[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]),
        };
        assert_eq!(polygon.polygon_exterior().unwrap().len(), 4);
        assert!(polygon.line().is_none());

        let line = Geometry {
            kind: "LineString".into(),
            coordinates: json!([[0.0, 0.0], [1.0, 1.0]]),
        };
        assert_eq!(line.line().unwrap().len(), 2);
        assert!(line.polygon_exterior().is_none());

        let multi = Geometry {
            kind: "MultiPolygon".into(),
            coordinates: json!([
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
                [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 5.0]]]
            ]),
        };
        assert_eq!(multi.polygon_exteriors().len(), 2);
    }

    #[test]
    fn levels_tag_parses_as_string_or_number() {
        let t = tags(&[("building:levels", json!("4"))]);
        assert_eq!(tag_f64(&t, "building:levels"), Some(4.0));
        let t = tags(&[("building:levels", json!(4))]);
        assert_eq!(tag_f64(&t, "building:levels"), Some(4.0));
    }
}
