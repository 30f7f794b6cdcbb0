//! Deterministic spatial chunking.
//!
//! One rule for every asset type: floor-divide a primitive's representative
//! point by the chunk size. Fragment accumulation is append-only and built
//! for rayon's fold/reduce, so parallel producers never contend on a shared
//! map.

use std::collections::HashMap;

use glam::DVec2;
use glbtile::Mesh;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub cx: i32,
    pub cy: i32,
}

impl ChunkKey {
    /// Pure function of the representative point and the chunk size.
    pub fn of_point(p: DVec2, chunk_size: f64) -> ChunkKey {
        ChunkKey {
            cx: (p.x / chunk_size).floor() as i32,
            cy: (p.y / chunk_size).floor() as i32,
        }
    }

    /// File-name fragment, e.g. `"0_-1"`.
    pub fn label(&self) -> String {
        format!("{}_{}", self.cx, self.cy)
    }

    /// Parse the two trailing components of a chunk file stem.
    pub fn parse_label(label: &str) -> Option<ChunkKey> {
        let mut parts = label.rsplitn(2, '_');
        let cy: i32 = parts.next()?.parse().ok()?;
        let cx: i32 = parts.next()?.parse().ok()?;
        Some(ChunkKey { cx, cy })
    }

    /// Local-coordinate bounds `[k*S, (k+1)*S)` on both axes.
    pub fn bounds(&self, chunk_size: f64) -> (f64, f64, f64, f64) {
        (
            self.cx as f64 * chunk_size,
            self.cy as f64 * chunk_size,
            (self.cx + 1) as f64 * chunk_size,
            (self.cy + 1) as f64 * chunk_size,
        )
    }
}

/// Face interval of one source feature inside a combined chunk mesh,
/// exported so viewers can map raycast hits back to footprints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceRange {
    pub feature_id: u64,
    pub start_face: usize,
    pub end_face: usize,
}

/// Append-only chunk-to-fragment map.
#[derive(Debug, Default)]
pub struct FragmentMap {
    chunks: HashMap<ChunkKey, Vec<(u64, Mesh)>>,
}

impl FragmentMap {
    pub fn new() -> FragmentMap {
        FragmentMap::default()
    }

    pub fn insert(&mut self, key: ChunkKey, feature_id: u64, mesh: Mesh) {
        self.chunks.entry(key).or_default().push((feature_id, mesh));
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Merge a sibling accumulator (rayon reduce step).
    pub fn merge(mut self, other: FragmentMap) -> FragmentMap {
        for (key, mut fragments) in other.chunks {
            self.chunks.entry(key).or_default().append(&mut fragments);
        }
        self
    }

    /// Combine each chunk's fragments into one mesh, recording per-feature
    /// face intervals. Chunks come out sorted by key so output is stable
    /// regardless of thread scheduling.
    pub fn combine(self) -> Vec<(ChunkKey, Mesh, Vec<FaceRange>)> {
        let mut out: Vec<(ChunkKey, Mesh, Vec<FaceRange>)> = self
            .chunks
            .into_iter()
            .map(|(key, mut fragments)| {
                // Insertion order differs across runs with work stealing;
                // sort by feature id for determinism.
                fragments.sort_by_key(|(id, _)| *id);

                let mut combined = Mesh::new();
                let mut ranges = Vec::with_capacity(fragments.len());
                let mut face_cursor = 0usize;
                for (feature_id, mesh) in &fragments {
                    let faces = mesh.triangle_count();
                    combined.append(mesh);
                    ranges.push(FaceRange {
                        feature_id: *feature_id,
                        start_face: face_cursor,
                        end_face: face_cursor + faces,
                    });
                    face_cursor += faces;
                }
                (key, combined, ranges)
            })
            .collect();
        out.sort_by_key(|(key, _, _)| *key);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_assignment_is_pure_and_interval_aligned() {
        let size = 500.0;
        // Everything in [k*S, (k+1)*S) on both axes maps to key k.
        for &(x, y, cx, cy) in &[
            (0.0, 0.0, 0, 0),
            (499.999, 499.999, 0, 0),
            (500.0, 0.0, 1, 0),
            (-0.001, 0.0, -1, 0),
            (-500.0, -500.0, -1, -1),
            (-500.001, 250.0, -2, 0),
        ] {
            let key = ChunkKey::of_point(DVec2::new(x, y), size);
            assert_eq!((key.cx, key.cy), (cx, cy), "point ({x}, {y})");
            // Same input, same key.
            assert_eq!(key, ChunkKey::of_point(DVec2::new(x, y), size));
        }
    }

    #[test]
    fn label_round_trips_including_negatives() {
        for key in [
            ChunkKey { cx: 0, cy: 0 },
            ChunkKey { cx: -3, cy: 7 },
            ChunkKey { cx: 12, cy: -1 },
        ] {
            assert_eq!(ChunkKey::parse_label(&key.label()), Some(key));
        }
        assert_eq!(ChunkKey::parse_label("garbage"), None);
    }

    #[test]
    fn bounds_tile_the_plane() {
        let key = ChunkKey { cx: -1, cy: 2 };
        assert_eq!(key.bounds(500.0), (-500.0, 1000.0, 0.0, 1500.0));
    }

    fn tri_at(x: f32, id: u64) -> (u64, Mesh) {
        (
            id,
            Mesh {
                positions: vec![[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 1.0, 0.0]],
                indices: vec![0, 1, 2],
                uvs: None,
                feature_ids: Some(vec![id as f32; 3]),
            },
        )
    }

    #[test]
    fn combine_concatenates_and_tracks_face_ranges() {
        let mut map = FragmentMap::new();
        let key = ChunkKey { cx: 0, cy: 0 };
        let (id_b, mesh_b) = tri_at(10.0, 9);
        let (id_a, mesh_a) = tri_at(0.0, 4);
        map.insert(key, id_b, mesh_b);
        map.insert(key, id_a, mesh_a);

        let combined = map.combine();
        assert_eq!(combined.len(), 1);
        let (out_key, mesh, ranges) = &combined[0];
        assert_eq!(*out_key, key);
        assert_eq!(mesh.triangle_count(), 2);
        // Sorted by feature id, contiguous face intervals.
        assert_eq!(
            ranges,
            &vec![
                FaceRange { feature_id: 4, start_face: 0, end_face: 1 },
                FaceRange { feature_id: 9, start_face: 1, end_face: 2 },
            ]
        );
        // Feature ids survive combination per vertex.
        let ids = mesh.feature_ids.as_ref().unwrap();
        assert_eq!(&ids[0..3], &[4.0, 4.0, 4.0]);
        assert_eq!(&ids[3..6], &[9.0, 9.0, 9.0]);
    }

    #[test]
    fn merge_is_append_only() {
        let key = ChunkKey { cx: 1, cy: 1 };
        let mut left = FragmentMap::new();
        let (id, mesh) = tri_at(0.0, 1);
        left.insert(key, id, mesh);
        let mut right = FragmentMap::new();
        let (id, mesh) = tri_at(5.0, 2);
        right.insert(key, id, mesh);

        let merged = left.merge(right);
        let combined = merged.combine();
        assert_eq!(combined[0].1.triangle_count(), 2);
    }
}
