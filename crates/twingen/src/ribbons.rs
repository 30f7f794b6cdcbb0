//! Ribbon meshes: width-extruded strips following a polyline, used for
//! roads, railways and linear waterways alike. U accumulates distance
//! travelled in metres so a repeating surface texture tiles seamlessly
//! along the path; V spans the width.

use glam::{DVec2, DVec3};
use glbtile::Mesh;

/// Segments shorter than this produce degenerate quads and are skipped.
const MIN_SEGMENT_LEN_M: f64 = 0.01;

/// Build a ribbon along `path` (local coordinates) with one ground
/// elevation per point. Returns `None` when no segment survives.
pub fn ribbon_mesh(path: &[DVec2], elevations: &[f64], width: f64, z_offset: f64) -> Option<Mesh> {
    if path.len() < 2 || path.len() != elevations.len() || width <= 0.0 {
        return None;
    }

    let half_width = width / 2.0;
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut distance = 0.0_f64;

    for i in 0..path.len() - 1 {
        let p1 = path[i];
        let p2 = path[i + 1];
        let z1 = elevations[i] + z_offset;
        let z2 = elevations[i + 1] + z_offset;

        let dir = p2 - p1;
        let len = dir.length();
        if len < MIN_SEGMENT_LEN_M {
            distance += len;
            continue;
        }

        // Unit perpendicular, left of the travel direction.
        let perp = DVec2::new(-dir.y, dir.x) / len * half_width;

        let u1 = distance;
        let u2 = distance + len;

        let base = positions.len() as u32;
        let quad = [
            (DVec3::new(p1.x - perp.x, p1.y - perp.y, z1), [u1, 0.0]),
            (DVec3::new(p1.x + perp.x, p1.y + perp.y, z1), [u1, 1.0]),
            (DVec3::new(p2.x + perp.x, p2.y + perp.y, z2), [u2, 1.0]),
            (DVec3::new(p2.x - perp.x, p2.y - perp.y, z2), [u2, 0.0]),
        ];
        for (p, uv) in quad {
            positions.push([p.x as f32, p.y as f32, p.z as f32]);
            uvs.push([uv[0] as f32, uv[1] as f32]);
        }

        // Two upward-facing triangles per quad.
        indices.extend_from_slice(&[base, base + 2, base + 1]);
        indices.extend_from_slice(&[base, base + 3, base + 2]);

        distance += len;
    }

    if positions.is_empty() {
        return None;
    }

    Some(Mesh {
        positions,
        indices,
        uvs: Some(uvs),
        feature_ids: None,
    })
}
