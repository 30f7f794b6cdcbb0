//! Stage drivers: heights -> meshes -> pack.
//!
//! Stages are restartable in isolation and communicate only through files
//! under the data directory, so the surrounding orchestrator can rerun any
//! one of them. Within a stage, per-primitive work fans out over rayon and
//! accumulates into per-thread fragment maps that merge in a reduce step.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use glam::DVec2;
use glbtile::Mesh;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde_json::json;

use crate::aoi::Aoi;
use crate::buildings::{synthesize_envelope, EnvelopeSpec};
use crate::chunk::{ChunkKey, FaceRange, FragmentMap};
use crate::config::Settings;
use crate::features::{
    self, classify_building, is_island, is_linear_waterway, road_width_m, roof_style, tag_f64,
    tag_str, waterway_width_m, Feature, TagMap,
};
use crate::geometry::{self, MIN_POLYGON_AREA_M2};
use crate::heights::{derive_height, HeightSource};
use crate::pack::{pack_asset_dir, pack_textures, Manifest};
use crate::raster::{ground_elevation, ElevationGrid};
use crate::ribbons::ribbon_mesh;
use crate::stats::StageStats;
use crate::terrain::terrain_chunks;
use crate::texture::TextureCatalog;
use crate::water::{clip_water_ring, flat_ring_mesh, merge_coastline, sea_ring};

/// Building tags worth exporting for viewer-side selection.
const METADATA_PROPERTIES: &[&str] = &[
    "name",
    "building",
    "amenity",
    "shop",
    "addr:housename",
    "addr:housenumber",
    "addr:street",
    "addr:postcode",
    "addr:city",
    "height",
    "height_source",
];

#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub dist_root: PathBuf,
}

impl Paths {
    pub fn new(data_dir: PathBuf, dist_root: PathBuf) -> Paths {
        Paths { data_dir, dist_root }
    }

    pub fn raw_osm(&self, file: &str) -> PathBuf {
        self.data_dir.join("raw").join("osm").join(file)
    }

    pub fn interim(&self, file: &str) -> PathBuf {
        self.data_dir.join("interim").join(file)
    }

    pub fn processed_dir(&self, sub: &str) -> PathBuf {
        self.data_dir.join("processed").join(sub)
    }

    pub fn processed_file(&self, file: &str) -> PathBuf {
        self.data_dir.join("processed").join(file)
    }

    pub fn dist_dir(&self, name: &str) -> PathBuf {
        self.dist_root.join(name)
    }
}

fn planar_ring(aoi: &Aoi, settings: &Settings, coords: &[[f64; 2]]) -> Vec<DVec2> {
    coords
        .iter()
        .map(|c| aoi.to_planar(&settings.projection, c[0], c[1]))
        .collect()
}

fn local_ring(aoi: &Aoi, planar: &[DVec2]) -> Vec<DVec2> {
    planar.iter().map(|p| aoi.to_local(*p)).collect()
}

// ---------------------------------------------------------------------------
// Stage 1: height derivation
// ---------------------------------------------------------------------------

/// Resolve a height and provenance for every footprint and write the
/// enriched collection for the mesh stage.
pub fn run_heights(paths: &Paths, settings: &Settings, aoi: &Aoi) -> Result<()> {
    let buildings_path = paths.raw_osm("buildings.geojson");
    if !buildings_path.exists() {
        bail!("required input missing: {}", buildings_path.display());
    }
    let mut collection = features::load_collection(&buildings_path)?;
    info!("deriving heights for {} footprints", collection.features.len());

    let ndsm_path = paths.interim("ndsm.asc");
    let ndsm = if ndsm_path.exists() {
        match ElevationGrid::from_ascii_grid(&ndsm_path) {
            Ok(grid) => Some(grid),
            Err(err) => {
                warn!("unusable nDSM {} ({err:#}); falling back to tags", ndsm_path.display());
                None
            }
        }
    } else {
        warn!("no nDSM at {}; heights come from tags or the default", ndsm_path.display());
        None
    };

    let resolved: Vec<(f64, HeightSource)> = collection
        .features
        .par_iter()
        .map(|feature| {
            let ring = feature
                .geometry
                .as_ref()
                .and_then(|g| g.polygon_exterior())
                .map(|coords| planar_ring(aoi, settings, &coords))
                .unwrap_or_default();
            derive_height(&feature.properties, &ring, ndsm.as_ref(), &settings.buildings)
        })
        .collect();

    let mut histogram: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (feature, (height, source)) in collection.features.iter_mut().zip(&resolved) {
        let rounded = (height * 10.0).round() / 10.0;
        feature.properties.insert("height".into(), json!(rounded));
        feature
            .properties
            .insert("height_source".into(), json!(source.as_str()));
        *histogram.entry(source.as_str()).or_insert(0) += 1;
    }

    std::fs::create_dir_all(paths.processed_dir(""))
        .context("creating processed directory")?;
    let out = paths.processed_file("buildings_height.geojson");
    features::save_collection(&out, &collection)?;

    info!("height sources: {histogram:?}");
    info!("written {}", out.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Stage 2: mesh generation
// ---------------------------------------------------------------------------

/// Generate every mesh type. The terrain raster is required here; each
/// vector category degrades to a skipped component when its file is absent.
pub fn run_meshes(paths: &Paths, settings: &Settings, aoi: &Aoi) -> Result<()> {
    let dtm_path = paths.interim("dtm.asc");
    let dtm = ElevationGrid::from_ascii_grid(&dtm_path)
        .with_context(|| format!("terrain raster {} is required", dtm_path.display()))?;

    let have_any_vectors = ["roads.geojson", "railways.geojson", "water.geojson", "coast.geojson"]
        .iter()
        .any(|f| paths.raw_osm(f).exists())
        || paths.processed_file("buildings_height.geojson").exists()
        || paths.raw_osm("buildings.geojson").exists();
    if !have_any_vectors {
        bail!(
            "no vector feature category found under {}",
            paths.data_dir.join("raw").join("osm").display()
        );
    }

    terrain_stage(paths, settings, aoi, &dtm)?;
    buildings_stage(paths, settings, aoi, &dtm)?;
    roads_stage(paths, settings, aoi, &dtm)?;
    railways_stage(paths, settings, aoi, &dtm)?;
    water_stage(paths, settings, aoi, &dtm)?;
    sea_stage(paths, settings, aoi)?;
    Ok(())
}

fn write_chunks(dir: &Path, prefix: &str, chunks: Vec<(ChunkKey, Mesh)>) -> Result<()> {
    if chunks.is_empty() {
        info!("{prefix}: no chunks produced");
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating {}", dir.display()))?;

    let (mut verts, mut tris) = (0usize, 0usize);
    let count = chunks.len();
    for (key, mesh) in chunks {
        let path = dir.join(format!("{prefix}_{}.glb", key.label()));
        glbtile::write_file(&path, &mesh)
            .with_context(|| format!("writing {}", path.display()))?;
        debug!("{}: {} verts, {} tris", path.display(), mesh.vertex_count(), mesh.triangle_count());
        verts += mesh.vertex_count();
        tris += mesh.triangle_count();
    }
    info!("{prefix}: {count} chunks, {verts} verts, {tris} tris");
    Ok(())
}

fn terrain_stage(paths: &Paths, settings: &Settings, aoi: &Aoi, dtm: &ElevationGrid) -> Result<()> {
    let chunks = terrain_chunks(dtm, aoi, &settings.terrain);
    write_chunks(&paths.processed_dir("terrain"), "terrain", chunks)
}

fn building_mesh(
    id: usize,
    feature: &Feature,
    settings: &Settings,
    aoi: &Aoi,
    dtm: &ElevationGrid,
) -> Option<(ChunkKey, Mesh)> {
    let coords = feature.geometry.as_ref()?.polygon_exterior()?;
    let planar = planar_ring(aoi, settings, &coords);
    let local = local_ring(aoi, &planar);

    let ring = match geometry::repair_ring(&local, MIN_POLYGON_AREA_M2) {
        Ok(ring) => ring,
        Err(err) => {
            debug!("footprint {id}: {err}");
            return None;
        }
    };

    let centroid = geometry::ring_centroid(&ring);
    let ground_z = ground_elevation(
        Some(dtm),
        centroid.x + aoi.origin[0],
        centroid.y + aoi.origin[1],
    );

    let height = tag_f64(&feature.properties, "height")
        .unwrap_or(settings.buildings.default_height_m);
    let category = classify_building(&feature.properties, height);
    let style = roof_style(category);

    let mut mesh = synthesize_envelope(&ring, &EnvelopeSpec { ground_z, height, style })?;
    mesh.feature_ids = Some(vec![id as f32; mesh.vertex_count()]);

    let key = ChunkKey::of_point(centroid, settings.terrain.chunk_size_m);
    Some((key, mesh))
}

fn selected_metadata(tags: &TagMap) -> TagMap {
    let mut out = TagMap::new();
    for key in METADATA_PROPERTIES {
        if let Some(value) = tags.get(*key) {
            if !value.is_null() {
                out.insert(key.replace(':', "_"), value.clone());
            }
        }
    }
    out
}

fn buildings_stage(paths: &Paths, settings: &Settings, aoi: &Aoi, dtm: &ElevationGrid) -> Result<()> {
    let path = paths.processed_file("buildings_height.geojson");
    if !path.exists() {
        warn!(
            "{} missing (run the heights stage first); skipping buildings",
            path.display()
        );
        return Ok(());
    }
    let collection = features::load_collection(&path)?;
    info!("synthesizing {} building envelopes", collection.features.len());

    let (fragments, stats) = collection
        .features
        .par_iter()
        .enumerate()
        .fold(
            || (FragmentMap::new(), StageStats::default()),
            |(mut map, mut stats), (id, feature)| {
                match building_mesh(id, feature, settings, aoi, dtm) {
                    Some((key, mesh)) => {
                        map.insert(key, id as u64, mesh);
                        stats.ok();
                    }
                    None => stats.skip(),
                }
                (map, stats)
            },
        )
        .reduce(
            || (FragmentMap::new(), StageStats::default()),
            |(map_a, mut stats_a), (map_b, stats_b)| {
                stats_a += stats_b;
                (map_a.merge(map_b), stats_a)
            },
        );
    info!("buildings: {} ok, {} skipped", stats.succeeded, stats.failed);

    let combined = fragments.combine();

    // Face-range maps let the viewer map a raycast hit back to a footprint
    // without re-deriving geometry.
    let mut chunk_meta: BTreeMap<String, Vec<FaceRange>> = BTreeMap::new();
    let mut used_ids: BTreeSet<u64> = BTreeSet::new();
    let mut chunks = Vec::with_capacity(combined.len());
    for (key, mesh, ranges) in combined {
        used_ids.extend(ranges.iter().map(|r| r.feature_id));
        chunk_meta.insert(key.label(), ranges);
        chunks.push((key, mesh));
    }
    write_chunks(&paths.processed_dir("buildings"), "buildings", chunks)?;

    let building_meta: BTreeMap<String, TagMap> = used_ids
        .iter()
        .filter_map(|id| {
            let tags = selected_metadata(&collection.features[*id as usize].properties);
            (!tags.is_empty()).then(|| (id.to_string(), tags))
        })
        .collect();

    let metadata = json!({
        "chunks": chunk_meta
            .iter()
            .map(|(label, ranges)| (label.clone(), json!({ "face_map": ranges })))
            .collect::<BTreeMap<String, serde_json::Value>>(),
        "buildings": building_meta,
    });
    let meta_path = paths.processed_file("buildings_metadata.json");
    std::fs::write(&meta_path, serde_json::to_vec(&metadata)?)
        .with_context(|| format!("writing {}", meta_path.display()))?;
    info!("written {}", meta_path.display());
    Ok(())
}

/// Shared ribbon fan-out: each feature becomes one ribbon fragment chunked
/// by its midpoint vertex. `width_of` returning `None` skips the feature
/// without counting it as a failure (it belongs to another component).
fn ribbon_fragments<F>(
    features: &[Feature],
    width_of: F,
    z_offset: f64,
    settings: &Settings,
    aoi: &Aoi,
    dtm: &ElevationGrid,
) -> (FragmentMap, StageStats)
where
    F: Fn(&TagMap) -> Option<f64> + Sync,
{
    features
        .par_iter()
        .enumerate()
        .fold(
            || (FragmentMap::new(), StageStats::default()),
            |(mut map, mut stats), (id, feature)| {
                let Some(width) = width_of(&feature.properties) else {
                    return (map, stats);
                };
                let Some(coords) = feature.geometry.as_ref().and_then(|g| g.line()) else {
                    stats.skip();
                    return (map, stats);
                };

                let planar = planar_ring(aoi, settings, &coords);
                let local = local_ring(aoi, &planar);
                let elevations: Vec<f64> = planar
                    .iter()
                    .map(|p| ground_elevation(Some(dtm), p.x, p.y))
                    .collect();

                match ribbon_mesh(&local, &elevations, width, z_offset) {
                    Some(mesh) => {
                        let midpoint = local[local.len() / 2];
                        let key = ChunkKey::of_point(midpoint, settings.terrain.chunk_size_m);
                        map.insert(key, id as u64, mesh);
                        stats.ok();
                    }
                    None => stats.skip(),
                }
                (map, stats)
            },
        )
        .reduce(
            || (FragmentMap::new(), StageStats::default()),
            |(map_a, mut stats_a), (map_b, stats_b)| {
                stats_a += stats_b;
                (map_a.merge(map_b), stats_a)
            },
        )
}

fn combined_chunks(map: FragmentMap) -> Vec<(ChunkKey, Mesh)> {
    map.combine()
        .into_iter()
        .map(|(key, mesh, _)| (key, mesh))
        .collect()
}

fn roads_stage(paths: &Paths, settings: &Settings, aoi: &Aoi, dtm: &ElevationGrid) -> Result<()> {
    let path = paths.raw_osm("roads.geojson");
    if !path.exists() {
        warn!("no roads at {}; skipping", path.display());
        return Ok(());
    }
    let collection = features::load_collection(&path)?;
    info!("ribboning {} roads", collection.features.len());

    let (map, stats) = ribbon_fragments(
        &collection.features,
        |tags| {
            let highway = tag_str(tags, "highway").unwrap_or("unclassified");
            Some(road_width_m(highway, &settings.roads))
        },
        settings.roads.elevation_offset_m,
        settings,
        aoi,
        dtm,
    );
    info!("roads: {} ok, {} skipped", stats.succeeded, stats.failed);
    write_chunks(&paths.processed_dir("roads"), "roads", combined_chunks(map))
}

fn railways_stage(paths: &Paths, settings: &Settings, aoi: &Aoi, dtm: &ElevationGrid) -> Result<()> {
    let path = paths.raw_osm("railways.geojson");
    if !path.exists() {
        warn!("no railways at {}; skipping", path.display());
        return Ok(());
    }
    let collection = features::load_collection(&path)?;
    info!("ribboning {} railways", collection.features.len());

    let width = settings.railways.width_m;
    let (map, stats) = ribbon_fragments(
        &collection.features,
        |_tags| Some(width),
        settings.railways.elevation_offset_m,
        settings,
        aoi,
        dtm,
    );
    info!("railways: {} ok, {} skipped", stats.succeeded, stats.failed);
    write_chunks(&paths.processed_dir("railways"), "railways", combined_chunks(map))
}

fn water_stage(paths: &Paths, settings: &Settings, aoi: &Aoi, dtm: &ElevationGrid) -> Result<()> {
    let path = paths.raw_osm("water.geojson");
    if !path.exists() {
        warn!("no water at {}; skipping", path.display());
        return Ok(());
    }
    let collection = features::load_collection(&path)?;
    info!("resolving {} water features", collection.features.len());

    // Linear waterways (streams, rivers) are ribbons, not area polygons.
    let (waterway_map, waterway_stats) = ribbon_fragments(
        &collection.features,
        |tags| {
            is_linear_waterway(tags)
                .then(|| waterway_width_m(tag_str(tags, "waterway").unwrap_or(""), &settings.waterways))
        },
        settings.waterways.elevation_offset_m,
        settings,
        aoi,
        dtm,
    );
    info!(
        "waterways: {} ok, {} skipped",
        waterway_stats.succeeded, waterway_stats.failed
    );
    write_chunks(
        &paths.processed_dir("waterways"),
        "waterways",
        combined_chunks(waterway_map),
    )?;

    let rect = aoi.clip_rect();
    let (map, stats) = collection
        .features
        .par_iter()
        .enumerate()
        .fold(
            || (FragmentMap::new(), StageStats::default()),
            |(mut map, mut stats), (id, feature)| {
                let Some(geom) = feature.geometry.as_ref() else {
                    stats.skip();
                    return (map, stats);
                };
                if geom.kind == "LineString" {
                    return (map, stats); // handled as a waterway ribbon
                }
                let rings = geom.polygon_exteriors();
                if rings.is_empty() {
                    stats.skip();
                    return (map, stats);
                }
                for coords in rings {
                    let planar = planar_ring(aoi, settings, &coords);
                    let local = local_ring(aoi, &planar);
                    let clipped = match clip_water_ring(&local, rect) {
                        Ok(ring) => ring,
                        Err(err) => {
                            debug!("water {id}: {err}");
                            stats.skip();
                            continue;
                        }
                    };
                    let centroid = geometry::ring_centroid(&clipped);
                    let ground_z = ground_elevation(
                        Some(dtm),
                        centroid.x + aoi.origin[0],
                        centroid.y + aoi.origin[1],
                    );
                    let z = ground_z + settings.water.elevation_offset_m;
                    match flat_ring_mesh(&clipped, z) {
                        Some(mesh) => {
                            let key =
                                ChunkKey::of_point(centroid, settings.terrain.chunk_size_m);
                            map.insert(key, id as u64, mesh);
                            stats.ok();
                        }
                        None => stats.skip(),
                    }
                }
                (map, stats)
            },
        )
        .reduce(
            || (FragmentMap::new(), StageStats::default()),
            |(map_a, mut stats_a), (map_b, stats_b)| {
                stats_a += stats_b;
                (map_a.merge(map_b), stats_a)
            },
        );
    info!("water: {} ok, {} skipped", stats.succeeded, stats.failed);
    write_chunks(&paths.processed_dir("water"), "water", combined_chunks(map))
}

fn sea_stage(paths: &Paths, settings: &Settings, aoi: &Aoi) -> Result<()> {
    let path = paths.raw_osm("coast.geojson");
    if !path.exists() {
        warn!("no coastline at {}; skipping sea", path.display());
        return Ok(());
    }
    let collection = features::load_collection(&path)?;

    let mut islands = 0usize;
    let mut segments: Vec<Vec<DVec2>> = Vec::new();
    for feature in &collection.features {
        if is_island(&feature.properties) {
            islands += 1;
            continue;
        }
        if let Some(coords) = feature.geometry.as_ref().and_then(|g| g.line()) {
            let planar = planar_ring(aoi, settings, &coords);
            segments.push(local_ring(aoi, &planar));
        }
    }
    info!(
        "coastline: {} segments ({} island segments excluded)",
        segments.len(),
        islands
    );

    let Some(chain) = merge_coastline(segments) else {
        info!("no usable coastline; no sea mesh (this is fine)");
        return Ok(());
    };

    let ring = match sea_ring(&chain, aoi.clip_rect()) {
        Ok(ring) => ring,
        Err(err) => {
            info!("sea polygon collapsed during clipping ({err}); no sea mesh");
            return Ok(());
        }
    };

    let Some(mesh) = flat_ring_mesh(&ring, settings.sea.elevation_m) else {
        info!("sea polygon failed to triangulate; no sea mesh");
        return Ok(());
    };

    let key = ChunkKey::of_point(geometry::ring_centroid(&ring), settings.terrain.chunk_size_m);
    write_chunks(&paths.processed_dir("sea"), "sea", vec![(key, mesh)])
}

// ---------------------------------------------------------------------------
// Stage 3: packaging
// ---------------------------------------------------------------------------

const ASSET_TYPES: &[&str] = &[
    "terrain",
    "buildings",
    "roads",
    "railways",
    "waterways",
    "water",
    "sea",
];

pub fn run_pack(paths: &Paths, settings: &Settings, aoi: &Aoi) -> Result<()> {
    let dist = paths.dist_dir(&settings.project.name);
    let assets_dir = dist.join("assets");
    std::fs::create_dir_all(&assets_dir)
        .with_context(|| format!("creating {}", assets_dir.display()))?;

    let chunk_size = settings.terrain.chunk_size_m;
    let mut assets = Vec::new();
    for asset_type in ASSET_TYPES {
        assets.extend(pack_asset_dir(
            &paths.processed_dir(asset_type),
            &assets_dir,
            asset_type,
            settings.output.compress,
            chunk_size,
        )?);
    }

    let meta_src = paths.processed_file("buildings_metadata.json");
    if meta_src.exists() {
        std::fs::copy(&meta_src, dist.join("buildings_metadata.json"))
            .context("copying buildings_metadata.json")?;
        info!("copied buildings_metadata.json");
    }

    let catalog = TextureCatalog::resolve(&paths.processed_dir("textures"));
    assets.extend(pack_textures(&catalog, &assets_dir)?);

    if assets.is_empty() {
        warn!("nothing to pack; manifest will be empty");
    }

    let manifest = Manifest::new(settings, aoi, assets);
    let manifest_path = dist.join("manifest.json");
    manifest.save(&manifest_path)?;
    info!(
        "manifest {} lists {} assets",
        manifest_path.display(),
        manifest.assets.len()
    );
    Ok(())
}
