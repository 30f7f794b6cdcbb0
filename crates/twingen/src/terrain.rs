//! Terrain surface meshing: a downsampled elevation grid partitioned into
//! the same floor-division chunk grid every other asset type uses, two
//! triangles per cell, UVs spanning the full AOI extent so one texture
//! drapes seamlessly across all terrain chunks.

use glbtile::Mesh;

use crate::aoi::Aoi;
use crate::chunk::ChunkKey;
use crate::config::TerrainSettings;
use crate::raster::ElevationGrid;

/// Consecutive index ranges sharing a chunk coordinate.
fn blocks(values: &[f64], chunk_size: f64) -> Vec<(i32, std::ops::Range<usize>)> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < values.len() {
        let key = (values[start] / chunk_size).floor() as i32;
        let mut end = start + 1;
        while end < values.len() && (values[end] / chunk_size).floor() as i32 == key {
            end += 1;
        }
        out.push((key, start..end));
        start = end;
    }
    out
}

/// Mesh the grid into per-chunk surfaces.
///
/// Nodata and NaN samples read as sea level (0.0), but a window whose
/// samples are entirely nodata emits no chunk at all.
pub fn terrain_chunks(
    grid: &ElevationGrid,
    aoi: &Aoi,
    cfg: &TerrainSettings,
) -> Vec<(ChunkKey, Mesh)> {
    let stride = cfg.downsample.max(1);
    let chunk_size = cfg.chunk_size_m;
    let (ox, oy) = (aoi.origin[0], aoi.origin[1]);

    let dcols = grid.ncols.div_ceil(stride);
    let drows = grid.nrows.div_ceil(stride);
    if dcols < 2 || drows < 2 {
        return Vec::new();
    }

    let y_top = grid.yll + grid.nrows as f64 * grid.cellsize;
    // Local planar coordinates of each downsampled sample; rows top-down.
    let xs: Vec<f64> = (0..dcols)
        .map(|c| grid.xll + (c * stride) as f64 * grid.cellsize - ox)
        .collect();
    let ys: Vec<f64> = (0..drows)
        .map(|r| y_top - (r * stride) as f64 * grid.cellsize - oy)
        .collect();

    // Full-extent UV mapping: the texture covers the exact AOI square.
    let half = aoi.half_side();
    let span = aoi.side_length_m.max(0.01);
    let uv_of = |x: f64, y: f64| [((x + half) / span) as f32, ((y + half) / span) as f32];

    let mut chunks = Vec::new();
    for (cy, row_range) in blocks(&ys, chunk_size) {
        for (cx, col_range) in blocks(&xs, chunk_size) {
            let rows = row_range.len();
            let cols = col_range.len();
            if rows < 2 || cols < 2 {
                continue;
            }

            let mut positions = Vec::with_capacity(rows * cols);
            let mut uvs = Vec::with_capacity(rows * cols);
            let mut any_valid = false;
            for r in row_range.clone() {
                let src_row = r * stride;
                for c in col_range.clone() {
                    let src_col = c * stride;
                    let raw = grid.value(src_col, src_row);
                    let z = if grid.is_nodata(raw) {
                        0.0
                    } else {
                        any_valid = true;
                        raw
                    };
                    positions.push([xs[c] as f32, ys[r] as f32, z]);
                    uvs.push(uv_of(xs[c], ys[r]));
                }
            }

            if !any_valid {
                continue;
            }

            let mut indices = Vec::with_capacity((rows - 1) * (cols - 1) * 6);
            for r in 0..rows - 1 {
                for c in 0..cols - 1 {
                    let idx = (r * cols + c) as u32;
                    let below = idx + cols as u32;
                    indices.extend_from_slice(&[idx, below, idx + 1]);
                    indices.extend_from_slice(&[idx + 1, below, below + 1]);
                }
            }

            chunks.push((
                ChunkKey { cx, cy },
                Mesh {
                    positions,
                    indices,
                    uvs: Some(uvs),
                    feature_ids: None,
                },
            ));
        }
    }

    chunks.sort_by_key(|(key, _)| *key);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    fn flat_aoi(side: f64) -> Aoi {
        Aoi {
            centre_lat: 55.0,
            centre_lon: -1.5,
            side_length_m: side,
            buffer_m: 0.0,
            origin: [1000.0, 2000.0],
        }
    }

    fn grid(ncols: usize, nrows: usize, cellsize: f64, data: Vec<f32>) -> ElevationGrid {
        ElevationGrid {
            ncols,
            nrows,
            // Anchored so local coordinates start at the AOI's south-west corner.
            xll: 1000.0 - (ncols as f64 * cellsize) / 2.0,
            yll: 2000.0 - (nrows as f64 * cellsize) / 2.0,
            cellsize,
            nodata: -9999.0,
            data,
        }
    }

    #[test]
    fn regular_grid_meshes_two_triangles_per_cell() {
        let g = grid(4, 4, 10.0, (0..16).map(|v| v as f32).collect());
        let aoi = flat_aoi(40.0);
        let cfg = TerrainSettings {
            chunk_size_m: 1000.0,
            downsample: 1,
        };
        let chunks = terrain_chunks(&g, &aoi, &cfg);
        // Grid spans one chunk on each side of the origin in both axes.
        assert!(!chunks.is_empty());
        let total_tris: usize = chunks.iter().map(|(_, m)| m.triangle_count()).sum();
        let total_cells: usize = chunks
            .iter()
            .map(|(_, m)| {
                let n = m.vertex_count();
                // every chunk window here is rectangular
                let cols = (0..n)
                    .take_while(|&i| m.positions[i][1] == m.positions[0][1])
                    .count();
                (cols - 1) * (n / cols - 1)
            })
            .sum();
        assert_eq!(total_tris, total_cells * 2);
    }

    #[test]
    fn fully_nodata_window_emits_no_chunk() {
        // Left half valid, right half nodata; chunk size splits the halves.
        let mut data = Vec::new();
        for _row in 0..4 {
            data.extend_from_slice(&[5.0, 5.0, -9999.0, -9999.0]);
        }
        let g = grid(4, 4, 10.0, data);
        let aoi = flat_aoi(40.0);
        let cfg = TerrainSettings {
            chunk_size_m: 20.0,
            downsample: 1,
        };
        let chunks = terrain_chunks(&g, &aoi, &cfg);
        assert!(!chunks.is_empty());
        for (key, mesh) in &chunks {
            assert!(key.cx < 1, "nodata-only window {key:?} was emitted");
            // Nodata samples inside mixed windows read as sea level.
            for p in &mesh.positions {
                assert!(p[2] == 5.0 || p[2] == 0.0);
            }
        }
    }

    #[test]
    fn uvs_span_the_full_aoi_extent() {
        let g = grid(4, 4, 10.0, vec![1.0; 16]);
        let aoi = flat_aoi(40.0);
        let cfg = TerrainSettings {
            chunk_size_m: 1000.0,
            downsample: 1,
        };
        let chunks = terrain_chunks(&g, &aoi, &cfg);
        let (_, mesh) = &chunks[0];
        for (p, uv) in mesh.positions.iter().zip(mesh.uvs.as_ref().unwrap()) {
            let expect_u = (p[0] + 20.0) / 40.0;
            let expect_v = (p[1] + 20.0) / 40.0;
            assert!((uv[0] - expect_u).abs() < 1e-6);
            assert!((uv[1] - expect_v).abs() < 1e-6);
        }
    }

    #[test]
    fn triangles_face_upward() {
        let g = grid(3, 3, 10.0, vec![2.0; 9]);
        let aoi = flat_aoi(30.0);
        let cfg = TerrainSettings {
            chunk_size_m: 1000.0,
            downsample: 1,
        };
        let chunks = terrain_chunks(&g, &aoi, &cfg);
        for (_, mesh) in &chunks {
            for t in mesh.indices.chunks_exact(3) {
                let p = |i: u32| {
                    let v = mesh.positions[i as usize];
                    DVec2::new(v[0] as f64, v[1] as f64)
                };
                let cross = (p(t[1]) - p(t[0])).perp_dot(p(t[2]) - p(t[0]));
                assert!(cross > 0.0, "clockwise triangle {t:?}");
            }
        }
    }

    #[test]
    fn downsampling_strides_the_grid() {
        let g = grid(8, 8, 5.0, vec![1.0; 64]);
        let aoi = flat_aoi(40.0);
        let full = terrain_chunks(
            &g,
            &aoi,
            &TerrainSettings {
                chunk_size_m: 1000.0,
                downsample: 1,
            },
        );
        let coarse = terrain_chunks(
            &g,
            &aoi,
            &TerrainSettings {
                chunk_size_m: 1000.0,
                downsample: 4,
            },
        );
        let full_verts: usize = full.iter().map(|(_, m)| m.vertex_count()).sum();
        let coarse_verts: usize = coarse.iter().map(|(_, m)| m.vertex_count()).sum();
        assert!(coarse_verts < full_verts / 4);
    }
}
