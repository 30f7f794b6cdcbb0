//! Water bodies and the synthesized sea surface.
//!
//! Water polygons are clipped to the AOI box and meshed flat just above the
//! ground. The sea is built from coastline segments: islands are excluded,
//! the remainder is merged into the longest continuous chain, the chain is
//! closed against the AOI's far (+x) boundary edge and clipped. Producing
//! no sea mesh is a normal outcome, not an error.

use geo_types::Rect;
use glam::DVec2;
use glbtile::Mesh;

use crate::error::GeometryError;
use crate::geometry::{clip_ring_to_rect, repair_ring, triangulate_ring, MIN_POLYGON_AREA_M2};

/// Endpoints closer than this join into one chain.
const CHAIN_JOIN_EPS_M: f64 = 1.0;

/// Repair a water ring and intersect it with the AOI box, keeping the
/// largest part of a multi-part result.
pub fn clip_water_ring(ring: &[DVec2], rect: Rect<f64>) -> Result<Vec<DVec2>, GeometryError> {
    let repaired = repair_ring(ring, MIN_POLYGON_AREA_M2)?;
    clip_ring_to_rect(&repaired, rect)
}

/// Flat polygon mesh at `z`, UVs normalized to the ring's plan bounds.
pub fn flat_ring_mesh(ring: &[DVec2], z: f64) -> Option<Mesh> {
    if ring.len() < 3 {
        return None;
    }
    let tris = triangulate_ring(ring);
    if tris.is_empty() {
        return None;
    }

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

    let positions: Vec<[f32; 3]> = ring
        .iter()
        .map(|p| [p.x as f32, p.y as f32, z as f32])
        .collect();
    let uvs: Vec<[f32; 2]> = ring
        .iter()
        .map(|p| [((p.x - min_x) / w) as f32, ((p.y - min_y) / h) as f32])
        .collect();

    let mut indices = Vec::with_capacity(tris.len() * 3);
    for t in tris {
        // Face up regardless of earcut's output order.
        let cross = (ring[t[1]] - ring[t[0]]).perp_dot(ring[t[2]] - ring[t[0]]);
        if cross > 0.0 {
            indices.extend_from_slice(&[t[0] as u32, t[1] as u32, t[2] as u32]);
        } else {
            indices.extend_from_slice(&[t[0] as u32, t[2] as u32, t[1] as u32]);
        }
    }

    Some(Mesh {
        positions,
        indices,
        uvs: Some(uvs),
        feature_ids: None,
    })
}

fn polyline_length(line: &[DVec2]) -> f64 {
    line.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Merge coastline segments endpoint-to-endpoint and return the longest
/// resulting chain. Segments may arrive in either orientation.
pub fn merge_coastline(segments: Vec<Vec<DVec2>>) -> Option<Vec<DVec2>> {
    let mut pool: Vec<Vec<DVec2>> = segments.into_iter().filter(|s| s.len() >= 2).collect();
    let mut chains: Vec<Vec<DVec2>> = Vec::new();

    while let Some(mut chain) = pool.pop() {
        loop {
            let mut extended = false;
            let mut index = 0;
            while index < pool.len() {
                let seg = &pool[index];
                let (head, tail) = (chain[0], *chain.last().unwrap());
                let (s_head, s_tail) = (seg[0], *seg.last().unwrap());

                if tail.distance(s_head) < CHAIN_JOIN_EPS_M {
                    let seg = pool.swap_remove(index);
                    chain.extend(seg.into_iter().skip(1));
                    extended = true;
                } else if tail.distance(s_tail) < CHAIN_JOIN_EPS_M {
                    let seg = pool.swap_remove(index);
                    chain.extend(seg.into_iter().rev().skip(1));
                    extended = true;
                } else if head.distance(s_tail) < CHAIN_JOIN_EPS_M {
                    let mut seg = pool.swap_remove(index);
                    seg.extend(chain.into_iter().skip(1));
                    chain = seg;
                    extended = true;
                } else if head.distance(s_head) < CHAIN_JOIN_EPS_M {
                    let seg = pool.swap_remove(index);
                    let mut reversed: Vec<DVec2> = seg.into_iter().rev().collect();
                    reversed.extend(chain.into_iter().skip(1));
                    chain = reversed;
                    extended = true;
                } else {
                    index += 1;
                }
            }
            if !extended {
                break;
            }
        }
        chains.push(chain);
    }

    chains
        .into_iter()
        .max_by(|a, b| {
            polyline_length(a)
                .partial_cmp(&polyline_length(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .filter(|c| c.len() >= 2)
}

/// Close the merged coastline into a sea polygon against the AOI's far +x
/// boundary and clip it to the box.
pub fn sea_ring(chain: &[DVec2], rect: Rect<f64>) -> Result<Vec<DVec2>, GeometryError> {
    if chain.len() < 2 {
        return Err(GeometryError::TooFewVertices);
    }
    let max_x = rect.max().x;

    let mut ring: Vec<DVec2> = chain.to_vec();
    let last = *chain.last().unwrap();
    let first = chain[0];
    ring.push(DVec2::new(max_x, last.y));
    ring.push(DVec2::new(max_x, first.y));

    let repaired = repair_ring(&ring, MIN_POLYGON_AREA_M2)?;
    clip_ring_to_rect(&repaired, rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ring_signed_area;
    use geo_types::coord;

    fn rect(half: f64) -> Rect<f64> {
        Rect::new(coord! { x: -half, y: -half }, coord! { x: half, y: half })
    }

    #[test]
    fn water_polygon_is_clipped_to_the_box() {
        // Lake poking out of the east edge of a 100m box.
        let ring = vec![
            DVec2::new(20.0, -30.0),
            DVec2::new(120.0, -30.0),
            DVec2::new(120.0, 30.0),
            DVec2::new(20.0, 30.0),
        ];
        let clipped = clip_water_ring(&ring, rect(50.0)).unwrap();
        let area = ring_signed_area(&clipped);
        assert!((area - 30.0 * 60.0).abs() < 1e-6, "area {area}");
        for p in &clipped {
            assert!(p.x <= 50.0 + 1e-9);
        }
    }

    #[test]
    fn degenerate_clip_results_are_dropped() {
        let outside = vec![
            DVec2::new(200.0, 200.0),
            DVec2::new(210.0, 200.0),
            DVec2::new(210.0, 210.0),
        ];
        assert!(clip_water_ring(&outside, rect(50.0)).is_err());
    }

    #[test]
    fn coastline_merge_handles_reversed_segments() {
        // Two mainland segments, one drawn backwards.
        let a = vec![DVec2::new(0.0, -40.0), DVec2::new(5.0, 0.0)];
        let b = vec![DVec2::new(10.0, 40.0), DVec2::new(5.0, 0.0)];
        let chain = merge_coastline(vec![a, b]).unwrap();
        assert_eq!(chain.len(), 3);
        let length = polyline_length(&chain);
        assert!(length > 80.0, "chain length {length}");
    }

    #[test]
    fn longest_chain_wins_and_islands_stay_separate() {
        // A short disconnected blob and a long mainland run.
        let mainland = vec![
            DVec2::new(0.0, -50.0),
            DVec2::new(2.0, 0.0),
            DVec2::new(0.0, 50.0),
        ];
        let blob = vec![DVec2::new(30.0, 0.0), DVec2::new(31.0, 1.0)];
        let chain = merge_coastline(vec![blob, mainland.clone()]).unwrap();
        assert_eq!(chain, mainland);
    }

    #[test]
    fn sea_fills_east_of_the_coast() {
        // North-south coastline through x=0: sea spans x in [0, 50].
        let chain = vec![DVec2::new(0.0, -50.0), DVec2::new(0.0, 50.0)];
        let ring = sea_ring(&chain, rect(50.0)).unwrap();
        let area = ring_signed_area(&ring);
        assert!((area - 100.0 * 50.0).abs() < 1.0, "area {area}");
        for p in &ring {
            assert!(p.x >= -1e-9, "sea leaked west of the coast: {p:?}");
        }
    }

    #[test]
    fn flat_mesh_faces_up_at_the_given_elevation() {
        let ring = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(10.0, 0.0),
            DVec2::new(10.0, 10.0),
            DVec2::new(0.0, 10.0),
        ];
        let mesh = flat_ring_mesh(&ring, 3.3).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        for p in &mesh.positions {
            assert!((p[2] - 3.3).abs() < 1e-6);
        }
    }
}
