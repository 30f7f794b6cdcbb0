//! Building envelope synthesis.
//!
//! A validated footprint ring becomes a watertight volume: independent wall
//! quads (so facade UV seams survive GLB export), a floor cap, and a roof
//! that is either flat, gabled along the footprint's principal axis, or a
//! hip/pyramid fallback. The gabled construction is only attempted when a
//! single trigger condition holds (near-convex ring with few vertices) and
//! is discarded whenever its cap fails to close against the eave ring, so
//! every emitted envelope is watertight regardless of footprint shape.

use std::collections::{HashMap, HashSet};

use glam::{DVec2, DVec3};
use glbtile::Mesh;

use crate::features::RoofStyle;
use crate::geometry::{self, Obb};

/// Facade texture tiling rates, metres per repeat.
const FACADE_TILE_U_M: f64 = 4.0;
const FACADE_TILE_V_M: f64 = 3.0;

/// Walls take this share of the resolved height under a pitched roof.
const PITCHED_WALL_FRACTION: f64 = 0.8;

/// Roof rise never exceeds this share of the wall height.
const MAX_RISE_FRACTION: f64 = 0.6;

/// Gabled construction trigger: near-convex rings with few vertices.
const GABLE_MIN_CONVEXITY: f64 = 0.85;
const GABLE_MAX_VERTICES: usize = 8;

const SIDE_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct EnvelopeSpec {
    pub ground_z: f64,
    pub height: f64,
    pub style: RoofStyle,
}

#[derive(Default)]
struct Builder {
    positions: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    indices: Vec<u32>,
}

impl Builder {
    fn push(&mut self, p: DVec3, uv: [f64; 2]) -> u32 {
        self.positions.push([p.x as f32, p.y as f32, p.z as f32]);
        self.uvs.push([uv[0] as f32, uv[1] as f32]);
        (self.positions.len() - 1) as u32
    }

    fn tri(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend_from_slice(&[a, b, c]);
    }

    fn into_mesh(self) -> Mesh {
        Mesh {
            positions: self.positions,
            indices: self.indices,
            uvs: Some(self.uvs),
            feature_ids: None,
        }
    }
}

/// Normalized plan-projection UV for roof and floor caps.
fn plan_uv(ring: &[DVec2]) -> impl Fn(DVec2) -> [f64; 2] {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in ring {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    let w = (max_x - min_x).max(0.01);
    let h = (max_y - min_y).max(0.01);
    move |p: DVec2| [(p.x - min_x) / w, (p.y - min_y) / h]
}

/// One independent quad per boundary edge, facade UVs tiled by perimeter
/// distance and height. The ring is CCW, so this winding faces outward.
fn add_walls(b: &mut Builder, ring: &[DVec2], z0: f64, z1: f64) {
    let n = ring.len();
    let v_top = (z1 - z0) / FACADE_TILE_V_M;
    let mut u_offset = 0.0;
    for i in 0..n {
        let p1 = ring[i];
        let p2 = ring[(i + 1) % n];
        let len = p1.distance(p2);
        let u1 = u_offset / FACADE_TILE_U_M;
        let u2 = (u_offset + len) / FACADE_TILE_U_M;

        let a = b.push(DVec3::new(p1.x, p1.y, z0), [u1, 0.0]);
        let bb = b.push(DVec3::new(p2.x, p2.y, z0), [u2, 0.0]);
        let c = b.push(DVec3::new(p2.x, p2.y, z1), [u2, v_top]);
        let d = b.push(DVec3::new(p1.x, p1.y, z1), [u1, v_top]);
        b.tri(a, bb, c);
        b.tri(a, c, d);

        u_offset += len;
    }
}

/// Triangulated horizontal cap at `z`, wound to face up or down.
fn add_cap(b: &mut Builder, ring: &[DVec2], z: f64, facing_up: bool) {
    let n = ring.len();
    let uv = plan_uv(ring);
    let base: Vec<u32> = ring
        .iter()
        .map(|p| b.push(DVec3::new(p.x, p.y, z), uv(*p)))
        .collect();

    let mut tris = geometry::triangulate_ring(ring);
    if tris.is_empty() {
        // Fan fallback for rings earcut rejects.
        tris = (1..n - 1).map(|i| [0, i, i + 1]).collect();
    }

    for t in tris {
        let cross = (ring[t[1]] - ring[t[0]]).perp_dot(ring[t[2]] - ring[t[0]]);
        if (cross > 0.0) == facing_up {
            b.tri(base[t[0]], base[t[1]], base[t[2]]);
        } else {
            b.tri(base[t[0]], base[t[2]], base[t[1]]);
        }
    }
}

/// Hip/pyramid roof: every eave vertex to one peak above the centroid.
/// Always watertight against the eave ring.
fn add_hip_roof(b: &mut Builder, ring: &[DVec2], eave_z: f64, rise: f64) {
    let n = ring.len();
    let centroid = geometry::ring_centroid(ring);
    let uv = plan_uv(ring);

    let peak = b.push(
        DVec3::new(centroid.x, centroid.y, eave_z + rise),
        [0.5, 0.5],
    );
    let eaves: Vec<u32> = ring
        .iter()
        .map(|p| b.push(DVec3::new(p.x, p.y, eave_z), uv(*p)))
        .collect();

    for i in 0..n {
        b.tri(eaves[i], eaves[(i + 1) % n], peak);
    }
}

/// Mean eave-to-centroid distance drives the hip rise.
fn hip_rise(ring: &[DVec2], pitch_deg: f64, wall_height: f64) -> f64 {
    let centroid = geometry::ring_centroid(ring);
    let n = ring.len().max(1) as f64;
    let avg: f64 = ring.iter().map(|p| p.distance(centroid)).sum::<f64>() / n;
    (0.5 * avg * pitch_deg.to_radians().tan()).min(wall_height * MAX_RISE_FRACTION)
}

#[inline]
fn quantize(p: DVec3) -> (i64, i64, i64) {
    (
        (p.x * 1000.0).round() as i64,
        (p.y * 1000.0).round() as i64,
        (p.z * 1000.0).round() as i64,
    )
}

type EdgeKey = ((i64, i64, i64), (i64, i64, i64));

#[inline]
fn edge_key(a: DVec3, b: DVec3) -> EdgeKey {
    let (qa, qb) = (quantize(a), quantize(b));
    if qa <= qb {
        (qa, qb)
    } else {
        (qb, qa)
    }
}

/// Candidate gabled roof cap. Returns the cap's own vertex/face lists, or
/// `None` when edge classification degenerates (ridge too short, an edge
/// collinear with the ridge).
fn gabled_roof_faces(
    ring: &[DVec2],
    eave_z: f64,
    ridge_z: f64,
    obb: &Obb,
) -> Option<(Vec<DVec3>, Vec<[usize; 3]>)> {
    let n = ring.len();
    let ridge_len = 2.0 * obb.half_len;
    if ridge_len < 0.1 {
        return None;
    }

    let ridge_start = obb.center - obb.axis * obb.half_len;
    let ridge_end = obb.center + obb.axis * obb.half_len;
    let perp = DVec2::new(-obb.axis.y, obb.axis.x);
    let centroid = geometry::ring_centroid(ring);

    // Which side of the ridge each vertex falls on, and where it projects
    // onto the ridge line (clamped to the ridge extent).
    let side: Vec<i8> = ring
        .iter()
        .map(|p| {
            let d = (*p - obb.center).dot(perp);
            if d > SIDE_EPS {
                1
            } else if d < -SIDE_EPS {
                -1
            } else {
                0
            }
        })
        .collect();
    let along: Vec<f64> = ring
        .iter()
        .map(|p| ((*p - ridge_start).dot(obb.axis) / ridge_len).clamp(0.0, 1.0))
        .collect();

    let mut verts: Vec<DVec3> = ring
        .iter()
        .map(|p| DVec3::new(p.x, p.y, eave_z))
        .collect();
    verts.push(DVec3::new(ridge_start.x, ridge_start.y, ridge_z));
    verts.push(DVec3::new(ridge_end.x, ridge_end.y, ridge_z));
    let ridge_start_idx = n;
    let ridge_end_idx = n + 1;

    let mut ridge_at = |t: f64, verts: &mut Vec<DVec3>| -> usize {
        if t <= 0.0 {
            return ridge_start_idx;
        }
        if t >= 1.0 {
            return ridge_end_idx;
        }
        let p = ridge_start + obb.axis * (t * ridge_len);
        verts.push(DVec3::new(p.x, p.y, ridge_z));
        verts.len() - 1
    };

    let mut faces: Vec<[usize; 3]> = Vec::new();
    let mut push_oriented = |faces: &mut Vec<[usize; 3]>, verts: &[DVec3], f: [usize; 3]| {
        let normal = (verts[f[1]] - verts[f[0]]).cross(verts[f[2]] - verts[f[0]]);
        if normal.length_squared() < 1e-12 {
            return; // degenerate sliver
        }
        let keep = if normal.z.abs() > 1e-9 {
            // Sloped face: outward means up.
            normal.z > 0.0
        } else {
            // Vertical gable: outward means away from the footprint centre.
            let mid = (verts[f[0]] + verts[f[1]] + verts[f[2]]) / 3.0;
            let out = DVec2::new(mid.x, mid.y) - centroid;
            DVec2::new(normal.x, normal.y).dot(out) > 0.0
        };
        faces.push(if keep { f } else { [f[0], f[2], f[1]] });
    };

    for i in 0..n {
        let j = (i + 1) % n;
        if side[i] == side[j] && side[i] != 0 {
            // Slope: eave edge up to the ridge projections of its endpoints.
            let ri = ridge_at(along[i], &mut verts);
            let rj = ridge_at(along[j], &mut verts);
            if (along[i] - along[j]).abs() < 1e-9 {
                push_oriented(&mut faces, &verts, [i, j, rj]);
            } else {
                push_oriented(&mut faces, &verts, [i, j, rj]);
                push_oriented(&mut faces, &verts, [i, rj, ri]);
            }
        } else if side[i] != side[j] {
            // Gable: edge straddles the ridge, triangle to the nearer end.
            let mid = (ring[i] + ring[j]) / 2.0;
            let r = if mid.distance(ridge_start) <= mid.distance(ridge_end) {
                ridge_start_idx
            } else {
                ridge_end_idx
            };
            push_oriented(&mut faces, &verts, [i, j, r]);
        } else {
            // Both endpoints on the ridge line: classification is unreliable.
            return None;
        }
    }

    Some((verts, faces))
}

/// The cap closes iff its once-used edges are exactly the eave ring edges
/// and every other edge is shared by two faces.
fn cap_closes(ring: &[DVec2], eave_z: f64, verts: &[DVec3], faces: &[[usize; 3]]) -> bool {
    let mut counts: HashMap<EdgeKey, u32> = HashMap::new();
    for f in faces {
        for k in 0..3 {
            let key = edge_key(verts[f[k]], verts[f[(k + 1) % 3]]);
            *counts.entry(key).or_insert(0) += 1;
        }
    }

    let n = ring.len();
    let mut expected: HashSet<EdgeKey> = HashSet::with_capacity(n);
    for i in 0..n {
        let a = DVec3::new(ring[i].x, ring[i].y, eave_z);
        let b = DVec3::new(ring[(i + 1) % n].x, ring[(i + 1) % n].y, eave_z);
        expected.insert(edge_key(a, b));
    }

    for (key, count) in counts {
        match count {
            1 => {
                if !expected.remove(&key) {
                    return false;
                }
            }
            2 => {}
            _ => return false,
        }
    }
    expected.is_empty()
}

/// Whether the single gabled-roof trigger condition holds for this ring.
pub(crate) fn gable_applicable(ring: &[DVec2]) -> bool {
    ring.len() <= GABLE_MAX_VERTICES && geometry::convexity_ratio(ring) >= GABLE_MIN_CONVEXITY
}

fn try_gabled_roof(b: &mut Builder, ring: &[DVec2], eave_z: f64, pitch_deg: f64, wall_height: f64) -> bool {
    let obb = geometry::oriented_bounding_box(ring);
    let rise = (obb.half_depth * pitch_deg.to_radians().tan()).min(wall_height * MAX_RISE_FRACTION);
    if rise <= 0.0 {
        return false;
    }

    let Some((verts, faces)) = gabled_roof_faces(ring, eave_z, eave_z + rise, &obb) else {
        return false;
    };
    if faces.is_empty() || !cap_closes(ring, eave_z, &verts, &faces) {
        return false;
    }

    let uv = plan_uv(ring);
    let base: Vec<u32> = verts
        .iter()
        .map(|v| b.push(*v, uv(DVec2::new(v.x, v.y))))
        .collect();
    for f in faces {
        b.tri(base[f[0]], base[f[1]], base[f[2]]);
    }
    true
}

/// Extrude a repaired CCW footprint ring into a watertight envelope.
///
/// Returns `None` only for rings the caller should count as skipped
/// (fewer than 3 vertices).
pub fn synthesize_envelope(ring: &[DVec2], spec: &EnvelopeSpec) -> Option<Mesh> {
    if ring.len() < 3 || spec.height <= 0.0 {
        return None;
    }

    let z0 = spec.ground_z;
    let mut b = Builder::default();

    match spec.style {
        RoofStyle::Flat => {
            let z1 = z0 + spec.height;
            add_walls(&mut b, ring, z0, z1);
            add_cap(&mut b, ring, z1, true);
            add_cap(&mut b, ring, z0, false);
        }
        RoofStyle::Pitched { pitch_deg } => {
            let wall_height = spec.height * PITCHED_WALL_FRACTION;
            let eave_z = z0 + wall_height;
            add_walls(&mut b, ring, z0, eave_z);
            add_cap(&mut b, ring, z0, false);

            let gabled = gable_applicable(ring)
                && try_gabled_roof(&mut b, ring, eave_z, pitch_deg, wall_height);
            if !gabled {
                let rise = hip_rise(ring, pitch_deg, wall_height);
                add_hip_roof(&mut b, ring, eave_z, rise);
            }
        }
    }

    Some(b.into_mesh())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f64) -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(side, 0.0),
            DVec2::new(side, side),
            DVec2::new(0.0, side),
        ]
    }

    fn rectangle(w: f64, d: f64) -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(w, 0.0),
            DVec2::new(w, d),
            DVec2::new(0.0, d),
        ]
    }

    fn l_shape() -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(12.0, 0.0),
            DVec2::new(12.0, 4.0),
            DVec2::new(4.0, 4.0),
            DVec2::new(4.0, 12.0),
            DVec2::new(0.0, 12.0),
        ]
    }

    fn vec3(p: [f32; 3]) -> DVec3 {
        DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64)
    }

    /// Every positional edge must be shared by exactly two triangles.
    fn is_watertight(mesh: &Mesh) -> bool {
        let mut counts: HashMap<EdgeKey, u32> = HashMap::new();
        for t in mesh.indices.chunks_exact(3) {
            for k in 0..3 {
                let a = vec3(mesh.positions[t[k] as usize]);
                let b = vec3(mesh.positions[t[(k + 1) % 3] as usize]);
                *counts.entry(edge_key(a, b)).or_insert(0) += 1;
            }
        }
        counts.values().all(|&c| c == 2)
    }

    fn signed_volume(mesh: &Mesh) -> f64 {
        let mut vol = 0.0;
        for t in mesh.indices.chunks_exact(3) {
            let a = vec3(mesh.positions[t[0] as usize]);
            let b = vec3(mesh.positions[t[1] as usize]);
            let c = vec3(mesh.positions[t[2] as usize]);
            vol += a.dot(b.cross(c)) / 6.0;
        }
        vol
    }

    #[test]
    fn flat_envelope_is_watertight_with_expected_volume() {
        let mesh = synthesize_envelope(
            &square(10.0),
            &EnvelopeSpec {
                ground_z: 20.0,
                height: 6.0,
                style: RoofStyle::Flat,
            },
        )
        .unwrap();
        assert!(is_watertight(&mesh));
        let vol = signed_volume(&mesh);
        assert!((vol - 600.0).abs() < 1.0, "volume {vol}");
    }

    #[test]
    fn gabled_envelope_is_watertight_with_positive_volume() {
        let ring = rectangle(20.0, 8.0);
        assert!(gable_applicable(&ring));
        let mesh = synthesize_envelope(
            &ring,
            &EnvelopeSpec {
                ground_z: 0.0,
                height: 8.0,
                style: RoofStyle::Pitched { pitch_deg: 35.0 },
            },
        )
        .unwrap();
        assert!(is_watertight(&mesh));
        assert!(signed_volume(&mesh) > 20.0 * 8.0 * 8.0 * 0.8 - 1.0);

        // The ridge actually rises above the eaves.
        let eave_z = 8.0 * PITCHED_WALL_FRACTION;
        let max_z = mesh
            .positions
            .iter()
            .map(|p| p[2])
            .fold(f32::MIN, f32::max);
        assert!(max_z as f64 > eave_z + 0.5, "ridge at {max_z}");
    }

    #[test]
    fn concave_footprint_falls_back_to_hip_and_stays_watertight() {
        let ring = l_shape();
        assert!(!gable_applicable(&ring));
        let mesh = synthesize_envelope(
            &ring,
            &EnvelopeSpec {
                ground_z: 5.0,
                height: 7.0,
                style: RoofStyle::Pitched { pitch_deg: 35.0 },
            },
        )
        .unwrap();
        assert!(is_watertight(&mesh));
        assert!(signed_volume(&mesh) > 0.0);
    }

    #[test]
    fn roof_rise_is_capped_at_sixty_percent_of_wall_height() {
        // 20m deep at 45 degrees would rise 10m uncapped; the 3.2m walls
        // cap it at 1.92m.
        let ring = rectangle(30.0, 20.0);
        let mesh = synthesize_envelope(
            &ring,
            &EnvelopeSpec {
                ground_z: 0.0,
                height: 4.0,
                style: RoofStyle::Pitched { pitch_deg: 45.0 },
            },
        )
        .unwrap();
        let wall_height = 4.0 * PITCHED_WALL_FRACTION;
        let max_z = mesh
            .positions
            .iter()
            .map(|p| p[2] as f64)
            .fold(f64::MIN, f64::max);
        let rise = max_z - wall_height;
        assert!(
            rise <= wall_height * MAX_RISE_FRACTION + 1e-3,
            "rise {rise} exceeds cap"
        );
    }

    #[test]
    fn wall_quads_are_independent_and_uv_tiled_by_distance() {
        let mesh = synthesize_envelope(
            &square(8.0),
            &EnvelopeSpec {
                ground_z: 0.0,
                height: 6.0,
                style: RoofStyle::Flat,
            },
        )
        .unwrap();
        // 4 wall quads of 4 vertices each, nothing deduplicated.
        let uvs = mesh.uvs.as_ref().unwrap();
        assert!(mesh.vertex_count() >= 16);
        // First wall: u runs 0 -> 8/4, v runs 0 -> 6/3.
        assert_eq!(uvs[0], [0.0, 0.0]);
        assert_eq!(uvs[1], [2.0, 0.0]);
        assert_eq!(uvs[2], [2.0, 2.0]);
        // Second wall continues the perimeter distance.
        assert_eq!(uvs[4], [2.0, 0.0]);
        assert_eq!(uvs[5], [4.0, 0.0]);
    }

    #[test]
    fn degenerate_rings_yield_no_mesh() {
        assert!(synthesize_envelope(
            &[DVec2::ZERO, DVec2::new(1.0, 0.0)],
            &EnvelopeSpec {
                ground_z: 0.0,
                height: 6.0,
                style: RoofStyle::Flat,
            },
        )
        .is_none());
    }
}
