//! Asset packaging: copy (or gzip) every produced chunk file into the
//! distribution directory, derive each asset's bounding box from its chunk
//! key, and emit the manifest the viewer streams from. The manifest also
//! declares the local origin and projection so consumers can get back to
//! geographic coordinates.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use glbtile::proj::TransverseMercator;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::aoi::Aoi;
use crate::chunk::ChunkKey;
use crate::config::Settings;
use crate::texture::{TextureCatalog, TextureSource};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bbox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bbox {
    pub fn of_chunk(key: ChunkKey, chunk_size: f64) -> Bbox {
        let (min_x, min_y, max_x, max_y) = key.bounds(chunk_size);
        Bbox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub size_bytes: u64,
    pub compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginDecl {
    pub projection: TransverseMercator,
    pub x: f64,
    pub y: f64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AoiDecl {
    pub centre_wgs84: [f64; 2],
    pub side_length_m: f64,
    pub buffer_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub name: String,
    pub generated: String,
    pub origin: OriginDecl,
    pub aoi: AoiDecl,
    pub assets: Vec<AssetEntry>,
}

impl Manifest {
    pub fn new(settings: &Settings, aoi: &Aoi, assets: Vec<AssetEntry>) -> Manifest {
        Manifest {
            version: settings.project.version.clone(),
            name: settings.project.name.clone(),
            generated: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            origin: OriginDecl {
                projection: settings.projection,
                x: aoi.origin[0],
                y: aoi.origin[1],
                note: "All mesh coordinates are relative to this origin".into(),
            },
            aoi: AoiDecl {
                centre_wgs84: [aoi.centre_lon, aoi.centre_lat],
                side_length_m: aoi.side_length_m,
                buffer_m: aoi.buffer_m,
            },
            assets,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("writing manifest {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Manifest> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing manifest {}", path.display()))
    }
}

fn gzip_file(src: &Path, dst: &Path) -> Result<u64> {
    let bytes = std::fs::read(src).with_context(|| format!("reading {}", src.display()))?;
    let file = File::create(dst).with_context(|| format!("creating {}", dst.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    encoder.write_all(&bytes)?;
    encoder.finish()?.flush()?;
    Ok(std::fs::metadata(dst)?.len())
}

/// Pack every chunk file of one asset type from its processed directory
/// into `assets_dir`. Missing directories mean the stage that would have
/// produced them was skipped; that is not an error here.
pub fn pack_asset_dir(
    input_dir: &Path,
    assets_dir: &Path,
    asset_type: &str,
    compress: bool,
    chunk_size: f64,
) -> Result<Vec<AssetEntry>> {
    let mut entries = Vec::new();
    if !input_dir.is_dir() {
        return Ok(entries);
    }

    let mut files: Vec<_> = WalkDir::new(input_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_file()
                && e.path().extension().and_then(|s| s.to_str()) == Some("glb")
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();

    for path in files {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let chunk_id = stem
            .strip_prefix(&format!("{asset_type}_"))
            .unwrap_or(&stem)
            .to_string();
        let bbox = ChunkKey::parse_label(&chunk_id).map(|key| Bbox::of_chunk(key, chunk_size));
        if bbox.is_none() {
            warn!("{}: no chunk key in file name, packing without bbox", path.display());
        }

        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        let (url, size_bytes) = if compress {
            let dst = assets_dir.join(format!("{file_name}.gz"));
            let size = gzip_file(&path, &dst)?;
            (format!("assets/{file_name}.gz"), size)
        } else {
            let dst = assets_dir.join(file_name);
            std::fs::copy(&path, &dst)
                .with_context(|| format!("copying {}", path.display()))?;
            (format!("assets/{file_name}"), std::fs::metadata(&dst)?.len())
        };

        entries.push(AssetEntry {
            id: chunk_id,
            kind: asset_type.to_string(),
            url,
            size_bytes,
            compressed: compress,
            bbox,
        });
    }

    info!("packed {} {} files", entries.len(), asset_type);
    Ok(entries)
}

/// Copy resolved texture files into `assets/textures` and list them in the
/// manifest. Procedural keys are only logged; the viewer generates those.
pub fn pack_textures(catalog: &TextureCatalog, assets_dir: &Path) -> Result<Vec<AssetEntry>> {
    let mut entries = Vec::new();
    let textures_dir = assets_dir.join("textures");

    for (key, source) in &catalog.entries {
        match source {
            TextureSource::Loaded(path) => {
                std::fs::create_dir_all(&textures_dir)?;
                let dst = textures_dir.join(key);
                std::fs::copy(path, &dst)
                    .with_context(|| format!("copying texture {}", path.display()))?;
                entries.push(AssetEntry {
                    id: format!("texture_{}", key.replace('.', "_")),
                    kind: "texture".into(),
                    url: format!("assets/textures/{key}"),
                    size_bytes: std::fs::metadata(&dst)?.len(),
                    compressed: false,
                    bbox: None,
                });
            }
            TextureSource::Procedural => {
                info!("texture {key} not on disk, viewer will use a procedural fallback");
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glbtile::Mesh;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("twingen-pack-{}-{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn chunk_mesh(key: ChunkKey, chunk_size: f64) -> Mesh {
        // A triangle strictly inside the chunk's bounds.
        let (min_x, min_y, ..) = key.bounds(chunk_size);
        Mesh {
            positions: vec![
                [(min_x + 10.0) as f32, (min_y + 10.0) as f32, 0.0],
                [(min_x + 60.0) as f32, (min_y + 10.0) as f32, 0.0],
                [(min_x + 10.0) as f32, (min_y + 60.0) as f32, 5.0],
            ],
            indices: vec![0, 1, 2],
            uvs: None,
            feature_ids: None,
        }
    }

    #[test]
    fn manifest_bboxes_bound_each_chunks_vertices() {
        let chunk_size = 500.0;
        let input = temp_dir("in");
        let assets = temp_dir("assets");

        let keys = [ChunkKey { cx: 0, cy: 0 }, ChunkKey { cx: -1, cy: 2 }];
        for key in keys {
            let mesh = chunk_mesh(key, chunk_size);
            glbtile::write_file(input.join(format!("roads_{}.glb", key.label())), &mesh).unwrap();
        }

        let entries = pack_asset_dir(&input, &assets, "roads", false, chunk_size).unwrap();
        assert_eq!(entries.len(), 2);

        for entry in &entries {
            let bbox = entry.bbox.as_ref().expect("bbox from chunk key");
            let packed = assets.join(entry.url.strip_prefix("assets/").unwrap());
            let mesh = glbtile::read_file(&packed).unwrap();
            for p in &mesh.positions {
                assert!(f64::from(p[0]) >= bbox.min_x && f64::from(p[0]) < bbox.max_x);
                assert!(f64::from(p[1]) >= bbox.min_y && f64::from(p[1]) < bbox.max_y);
            }
            assert_eq!(entry.size_bytes, std::fs::metadata(&packed).unwrap().len());
        }

        std::fs::remove_dir_all(&input).ok();
        std::fs::remove_dir_all(&assets).ok();
    }

    #[test]
    fn compressed_assets_carry_the_gzip_magic() {
        let chunk_size = 500.0;
        let input = temp_dir("gz-in");
        let assets = temp_dir("gz-assets");

        let key = ChunkKey { cx: 1, cy: 1 };
        glbtile::write_file(
            input.join(format!("terrain_{}.glb", key.label())),
            &chunk_mesh(key, chunk_size),
        )
        .unwrap();

        let entries = pack_asset_dir(&input, &assets, "terrain", true, chunk_size).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].compressed);
        assert!(entries[0].url.ends_with(".glb.gz"));

        let packed = assets.join(entries[0].url.strip_prefix("assets/").unwrap());
        let bytes = std::fs::read(packed).unwrap();
        assert_eq!(&bytes[0..2], &[0x1f, 0x8b], "missing RFC-1952 magic");

        std::fs::remove_dir_all(&input).ok();
        std::fs::remove_dir_all(&assets).ok();
    }

    #[test]
    fn missing_input_dir_packs_nothing() {
        let assets = temp_dir("none");
        let entries =
            pack_asset_dir(Path::new("/nonexistent/sea"), &assets, "sea", false, 500.0).unwrap();
        assert!(entries.is_empty());
        std::fs::remove_dir_all(&assets).ok();
    }
}
