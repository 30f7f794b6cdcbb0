//! Planar polygon utilities shared by the mesh synthesizers.
//!
//! Rings are open (no repeated closing vertex) and CCW once repaired.
//! Boolean work is delegated to `geo`; triangulation to `earcutr`.

use geo::algorithm::line_intersection::line_intersection;
use geo::{Area, BooleanOps, Centroid, ConvexHull};
use geo_types::{Coord, Line, LineString, MultiPolygon, Polygon, Rect};
use glam::DVec2;

use crate::error::GeometryError;

/// Footprints and water rings below this enclose nothing worth meshing.
pub const MIN_POLYGON_AREA_M2: f64 = 1.0;

/// Consecutive vertices closer than this collapse into one.
const DEDUP_EPS: f64 = 1e-9;

/// Shoelace area; positive for CCW rings.
pub fn ring_signed_area(ring: &[DVec2]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    0.5 * sum
}

/// Even-odd point-in-polygon test against an open ring.
pub fn point_in_ring(ring: &[DVec2], p: DVec2) -> bool {
    let n = ring.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = ring[i];
        let b = ring[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x_inter = (b.x - a.x) * (p.y - a.y) / (b.y - a.y + 1e-20) + a.x;
            if p.x < x_inter {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Drop repeated consecutive vertices and a duplicated closing vertex.
pub fn dedup_ring(ring: &[DVec2]) -> Vec<DVec2> {
    let mut out: Vec<DVec2> = Vec::with_capacity(ring.len());
    for &p in ring {
        if out.last().map_or(true, |&q| p.distance(q) > DEDUP_EPS) {
            out.push(p);
        }
    }
    while out.len() > 1 && out[0].distance(*out.last().unwrap()) <= DEDUP_EPS {
        out.pop();
    }
    out
}

fn ring_is_simple(ring: &[DVec2]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let seg = |i: usize| {
        Line::new(
            Coord {
                x: ring[i].x,
                y: ring[i].y,
            },
            Coord {
                x: ring[(i + 1) % n].x,
                y: ring[(i + 1) % n].y,
            },
        )
    };
    for i in 0..n {
        for j in (i + 1)..n {
            // Adjacent segments share an endpoint by construction.
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            if line_intersection(seg(i), seg(j)).is_some() {
                return false;
            }
        }
    }
    true
}

pub fn to_geo_polygon(ring: &[DVec2]) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = ring
        .iter()
        .map(|p| Coord { x: p.x, y: p.y })
        .collect();
    Polygon::new(LineString::from(coords), vec![])
}

/// Open exterior ring of a geo polygon (closing vertex removed).
pub fn ring_of_polygon(poly: &Polygon<f64>) -> Vec<DVec2> {
    let coords = poly.exterior();
    let mut out: Vec<DVec2> = coords.0.iter().map(|c| DVec2::new(c.x, c.y)).collect();
    if out.len() > 1 && out[0].distance(*out.last().unwrap()) <= DEDUP_EPS {
        out.pop();
    }
    dedup_ring(&out)
}

pub fn largest_part(parts: MultiPolygon<f64>) -> Option<Polygon<f64>> {
    parts
        .into_iter()
        .max_by(|a, b| {
            a.unsigned_area()
                .partial_cmp(&b.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .filter(|p| p.unsigned_area() > 0.0)
}

/// Validate and normalize a footprint ring.
///
/// A simple ring is only deduplicated and reoriented CCW. A self-intersecting
/// ring gets one best-effort normalization (boolean union with itself, the
/// same effect a zero-distance buffer has); if that still yields nothing
/// usable the ring is `Unrepairable`. Deeper repair is out of scope.
pub fn repair_ring(ring: &[DVec2], min_area: f64) -> Result<Vec<DVec2>, GeometryError> {
    let ring = dedup_ring(ring);
    if ring.len() < 3 {
        return Err(GeometryError::TooFewVertices);
    }

    if ring_is_simple(&ring) {
        let area = ring_signed_area(&ring);
        if area.abs() < min_area {
            return Err(GeometryError::BelowMinArea(area.abs()));
        }
        let mut out = ring;
        if area < 0.0 {
            out.reverse();
        }
        return Ok(out);
    }

    let poly = to_geo_polygon(&ring);
    let best = largest_part(poly.union(&poly)).ok_or(GeometryError::Unrepairable)?;
    let area = best.unsigned_area();
    if area < min_area {
        return Err(GeometryError::BelowMinArea(area));
    }
    let mut out = ring_of_polygon(&best);
    if out.len() < 3 {
        return Err(GeometryError::Unrepairable);
    }
    if ring_signed_area(&out) < 0.0 {
        out.reverse();
    }
    Ok(out)
}

/// Intersect a repaired ring with an axis-aligned box, keeping the largest
/// part of a multi-part result.
pub fn clip_ring_to_rect(ring: &[DVec2], rect: Rect<f64>) -> Result<Vec<DVec2>, GeometryError> {
    let subject = to_geo_polygon(ring);
    let clipped = subject.intersection(&rect.to_polygon());
    let best = largest_part(clipped).ok_or(GeometryError::EmptyClip)?;
    if best.unsigned_area() < MIN_POLYGON_AREA_M2 {
        return Err(GeometryError::BelowMinArea(best.unsigned_area()));
    }
    let mut out = ring_of_polygon(&best);
    if out.len() < 3 {
        return Err(GeometryError::EmptyClip);
    }
    if ring_signed_area(&out) < 0.0 {
        out.reverse();
    }
    Ok(out)
}

/// Ratio of ring area to its convex hull area, 1.0 for convex rings.
pub fn convexity_ratio(ring: &[DVec2]) -> f64 {
    let poly = to_geo_polygon(ring);
    let hull_area = poly.convex_hull().unsigned_area();
    if hull_area <= 0.0 {
        return 0.0;
    }
    poly.unsigned_area() / hull_area
}

/// Area centroid, falling back to the vertex mean for degenerate rings.
pub fn ring_centroid(ring: &[DVec2]) -> DVec2 {
    if let Some(c) = to_geo_polygon(ring).centroid() {
        return DVec2::new(c.x(), c.y());
    }
    let n = ring.len().max(1) as f64;
    ring.iter().fold(DVec2::ZERO, |acc, p| acc + *p) / n
}

/// Earcut triangulation of an open ring without holes. Indices refer to the
/// input ring; the output is empty when triangulation fails.
pub fn triangulate_ring(ring: &[DVec2]) -> Vec<[usize; 3]> {
    if ring.len() < 3 {
        return Vec::new();
    }
    let mut flat = Vec::with_capacity(ring.len() * 2);
    for p in ring {
        flat.push(p.x);
        flat.push(p.y);
    }
    match earcutr::earcut(&flat, &[], 2) {
        Ok(indices) => indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Oriented bounding box from principal-component analysis of ring vertices.
#[derive(Debug, Clone, Copy)]
pub struct Obb {
    pub center: DVec2,
    /// Unit direction of the longer axis.
    pub axis: DVec2,
    /// Half-extent along `axis`.
    pub half_len: f64,
    /// Half-extent perpendicular to `axis` (the roof "half depth").
    pub half_depth: f64,
}

pub fn oriented_bounding_box(ring: &[DVec2]) -> Obb {
    let n = ring.len().max(1) as f64;
    let mean = ring.iter().fold(DVec2::ZERO, |acc, p| acc + *p) / n;

    let (mut sxx, mut sxy, mut syy) = (0.0_f64, 0.0_f64, 0.0_f64);
    for p in ring {
        let d = *p - mean;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }

    // Principal direction of the 2x2 covariance matrix.
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let mut axis = DVec2::new(theta.cos(), theta.sin());
    let mut perp = DVec2::new(-axis.y, axis.x);

    let (mut min_a, mut max_a) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_p, mut max_p) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in ring {
        let d = *p - mean;
        let a = d.dot(axis);
        let q = d.dot(perp);
        min_a = min_a.min(a);
        max_a = max_a.max(a);
        min_p = min_p.min(q);
        max_p = max_p.max(q);
    }

    let mut half_len = 0.5 * (max_a - min_a);
    let mut half_depth = 0.5 * (max_p - min_p);
    let mut mid_a = 0.5 * (max_a + min_a);
    let mut mid_p = 0.5 * (max_p + min_p);

    // Keep the longer extent on `axis` even when the covariance is ambiguous.
    // Rotating (axis, perp) by 90 degrees maps the old axis onto the new
    // negative perp, so the perp offset changes sign.
    if half_depth > half_len {
        std::mem::swap(&mut half_len, &mut half_depth);
        axis = perp;
        let new_mid_a = mid_p;
        mid_p = -mid_a;
        mid_a = new_mid_a;
        perp = DVec2::new(-axis.y, axis.x);
    }

    Obb {
        center: mean + axis * mid_a + perp * mid_p,
        axis,
        half_len,
        half_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::coord;

    fn square(side: f64) -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(side, 0.0),
            DVec2::new(side, side),
            DVec2::new(0.0, side),
        ]
    }

    #[test]
    fn repair_reorients_clockwise_rings() {
        let mut cw = square(10.0);
        cw.reverse();
        let repaired = repair_ring(&cw, MIN_POLYGON_AREA_M2).unwrap();
        assert!(ring_signed_area(&repaired) > 0.0);
        assert_eq!(repaired.len(), 4);
    }

    #[test]
    fn repair_rejects_degenerate_rings() {
        let sliver = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(10.0, 0.0),
            DVec2::new(10.0, 0.01),
        ];
        assert!(matches!(
            repair_ring(&sliver, MIN_POLYGON_AREA_M2),
            Err(GeometryError::BelowMinArea(_))
        ));
        assert_eq!(
            repair_ring(&[DVec2::ZERO, DVec2::ONE], MIN_POLYGON_AREA_M2),
            Err(GeometryError::TooFewVertices)
        );
    }

    #[test]
    fn repair_normalizes_a_bowtie() {
        // Self-intersecting "bowtie": two triangles meeting at the middle.
        let bowtie = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(10.0, 10.0),
            DVec2::new(10.0, 0.0),
            DVec2::new(0.0, 10.0),
        ];
        let repaired = repair_ring(&bowtie, MIN_POLYGON_AREA_M2).unwrap();
        assert!(ring_signed_area(&repaired) > 0.0);
    }

    #[test]
    fn clip_keeps_the_inside_part() {
        let ring = square(20.0);
        let rect = Rect::new(coord! { x: -5.0, y: -5.0 }, coord! { x: 10.0, y: 10.0 });
        let clipped = clip_ring_to_rect(&ring, rect).unwrap();
        let area = ring_signed_area(&clipped);
        assert!((area - 100.0).abs() < 1e-6, "area {area}");
    }

    #[test]
    fn convexity_ratio_flags_an_l_shape() {
        assert!((convexity_ratio(&square(10.0)) - 1.0).abs() < 1e-9);
        let l_shape = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(10.0, 0.0),
            DVec2::new(10.0, 4.0),
            DVec2::new(4.0, 4.0),
            DVec2::new(4.0, 10.0),
            DVec2::new(0.0, 10.0),
        ];
        let ratio = convexity_ratio(&l_shape);
        assert!(ratio < 0.85, "ratio {ratio}");
    }

    #[test]
    fn obb_finds_the_long_axis() {
        let ring = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(20.0, 0.0),
            DVec2::new(20.0, 6.0),
            DVec2::new(0.0, 6.0),
        ];
        let obb = oriented_bounding_box(&ring);
        assert!((obb.half_len - 10.0).abs() < 1e-6);
        assert!((obb.half_depth - 3.0).abs() < 1e-6);
        assert!(obb.axis.x.abs() > 0.99, "axis {:?}", obb.axis);
        assert!(obb.center.distance(DVec2::new(10.0, 3.0)) < 1e-6);
    }

    #[test]
    fn triangulation_covers_the_ring() {
        let tris = triangulate_ring(&square(10.0));
        assert_eq!(tris.len(), 2);
        let ring = square(10.0);
        let covered: f64 = tris
            .iter()
            .map(|t| {
                ring_signed_area(&[ring[t[0]], ring[t[1]], ring[t[2]]]).abs()
            })
            .sum();
        assert!((covered - 100.0).abs() < 1e-6);
    }

    #[test]
    fn point_in_ring_even_odd() {
        let ring = square(10.0);
        assert!(point_in_ring(&ring, DVec2::new(5.0, 5.0)));
        assert!(!point_in_ring(&ring, DVec2::new(15.0, 5.0)));
    }
}
