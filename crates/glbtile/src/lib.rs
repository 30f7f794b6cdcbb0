//! GLB mesh tiles: the single on-disk geometry format of the twin pipeline.
//!
//! Every tile is a binary glTF 2.0 container holding one triangle-list
//! primitive:
//!
//! - `POSITION`    vec3 f32, local planar metres relative to the project origin
//! - `TEXCOORD_0`  vec2 f32, optional
//! - `_FEATURE_ID` scalar f32, optional per-vertex source-feature identity
//! - indices       u32, CCW winding, outward-facing
//!
//! Layout (little-endian):
//!   00  : u32  magic = "glTF"
//!   04  : u32  version = 2
//!   08  : u32  total length
//!   0C  : u32  JSON chunk length, u32 tag "JSON", payload (space-padded to 4)
//!   ..  : u32  BIN  chunk length, u32 tag "BIN\0", payload (zero-padded to 4)
//!
//! Buffer views are 4-byte aligned and tightly packed (no byteStride), which
//! is all `parse_glb_bytes` supports: it is the single source of truth for
//! parsing and only promises to read what `write_glb_bytes` produces.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use serde_json::{json, Value};

pub mod proj;

pub const GLB_MAGIC: [u8; 4] = *b"glTF";
pub const GLB_VERSION: u32 = 2;

const CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
const CHUNK_BIN: u32 = 0x004E_4942; // "BIN\0"

const COMP_F32: u64 = 5126;
const COMP_U32: u64 = 5125;
const TARGET_ARRAY_BUFFER: u64 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u64 = 34963;

/// An indexed triangle mesh with optional per-vertex attributes.
///
/// Positions are `f32`: the pipeline subtracts the project origin before any
/// mesh is built, so coordinates stay small enough for single precision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub feature_ids: Option<Vec<f32>>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Axis-aligned bounds over all vertices, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.positions.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Some((min, max))
    }

    /// Append `other` after this mesh, offsetting its indices.
    ///
    /// If either side carries UVs or feature ids the combined mesh does too;
    /// vertices from the side that lacked the attribute get zeros.
    pub fn append(&mut self, other: &Mesh) {
        let base = self.positions.len() as u32;
        let own_len = self.positions.len();

        self.positions.extend_from_slice(&other.positions);
        self.indices.extend(other.indices.iter().map(|i| i + base));

        if self.uvs.is_some() || other.uvs.is_some() {
            let uvs = self.uvs.get_or_insert_with(Vec::new);
            uvs.resize(own_len, [0.0, 0.0]);
            match &other.uvs {
                Some(o) => uvs.extend_from_slice(o),
                None => uvs.resize(own_len + other.positions.len(), [0.0, 0.0]),
            }
        }

        if self.feature_ids.is_some() || other.feature_ids.is_some() {
            let ids = self.feature_ids.get_or_insert_with(Vec::new);
            ids.resize(own_len, 0.0);
            match &other.feature_ids {
                Some(o) => ids.extend_from_slice(o),
                None => ids.resize(own_len + other.positions.len(), 0.0),
            }
        }
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated GLB"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

#[inline]
fn put_f32s(bin: &mut Vec<u8>, vals: &[f32]) {
    #[cfg(target_endian = "little")]
    bin.extend_from_slice(bytemuck::cast_slice(vals));

    #[cfg(not(target_endian = "little"))]
    for v in vals {
        bin.extend_from_slice(&v.to_le_bytes());
    }
}

#[inline]
fn put_u32s(bin: &mut Vec<u8>, vals: &[u32]) {
    #[cfg(target_endian = "little")]
    bin.extend_from_slice(bytemuck::cast_slice(vals));

    #[cfg(not(target_endian = "little"))]
    for v in vals {
        bin.extend_from_slice(&v.to_le_bytes());
    }
}

#[inline]
fn align4(bin: &mut Vec<u8>) {
    while bin.len() % 4 != 0 {
        bin.push(0);
    }
}

/// Record a tightly-packed buffer view starting at `offset`.
fn push_view(views: &mut Vec<Value>, offset: usize, bytes_len: usize, target: u64) -> usize {
    views.push(json!({
        "buffer": 0,
        "byteOffset": offset,
        "byteLength": bytes_len,
        "target": target,
    }));
    views.len() - 1
}

/// Serialize a mesh into a standalone GLB byte vector.
pub fn write_glb_bytes(mesh: &Mesh) -> io::Result<Vec<u8>> {
    if mesh.is_empty() {
        return Err(bad("refusing to write an empty mesh"));
    }
    if mesh.indices.len() % 3 != 0 {
        return Err(bad("index count is not a multiple of 3"));
    }
    if let Some(uvs) = &mesh.uvs {
        if uvs.len() != mesh.positions.len() {
            return Err(bad("uv count != position count"));
        }
    }
    if let Some(ids) = &mesh.feature_ids {
        if ids.len() != mesh.positions.len() {
            return Err(bad("feature id count != position count"));
        }
    }

    let vertex_count = mesh.positions.len();
    let (min, max) = mesh.bounds().expect("non-empty mesh has bounds");

    let mut bin = Vec::<u8>::new();
    let mut views = Vec::<Value>::new();
    let mut accessors = Vec::<Value>::new();
    let mut attributes = serde_json::Map::new();

    // POSITION (min/max are mandatory for position accessors)
    {
        let flat: Vec<f32> = mesh.positions.iter().flatten().copied().collect();
        align4(&mut bin);
        let offset = bin.len();
        put_f32s(&mut bin, &flat);
        let view = push_view(&mut views, offset, flat.len() * 4, TARGET_ARRAY_BUFFER);
        accessors.push(json!({
            "bufferView": view,
            "componentType": COMP_F32,
            "count": vertex_count,
            "type": "VEC3",
            "min": [min[0], min[1], min[2]],
            "max": [max[0], max[1], max[2]],
        }));
        attributes.insert("POSITION".into(), json!(accessors.len() - 1));
    }

    if let Some(uvs) = &mesh.uvs {
        let flat: Vec<f32> = uvs.iter().flatten().copied().collect();
        align4(&mut bin);
        let offset = bin.len();
        put_f32s(&mut bin, &flat);
        let view = push_view(&mut views, offset, flat.len() * 4, TARGET_ARRAY_BUFFER);
        accessors.push(json!({
            "bufferView": view,
            "componentType": COMP_F32,
            "count": vertex_count,
            "type": "VEC2",
        }));
        attributes.insert("TEXCOORD_0".into(), json!(accessors.len() - 1));
    }

    if let Some(ids) = &mesh.feature_ids {
        align4(&mut bin);
        let offset = bin.len();
        put_f32s(&mut bin, ids);
        let view = push_view(&mut views, offset, ids.len() * 4, TARGET_ARRAY_BUFFER);
        accessors.push(json!({
            "bufferView": view,
            "componentType": COMP_F32,
            "count": vertex_count,
            "type": "SCALAR",
        }));
        attributes.insert("_FEATURE_ID".into(), json!(accessors.len() - 1));
    }

    let indices_accessor = {
        align4(&mut bin);
        let offset = bin.len();
        put_u32s(&mut bin, &mesh.indices);
        let view = push_view(&mut views, offset, mesh.indices.len() * 4, TARGET_ELEMENT_ARRAY_BUFFER);
        accessors.push(json!({
            "bufferView": view,
            "componentType": COMP_U32,
            "count": mesh.indices.len(),
            "type": "SCALAR",
        }));
        accessors.len() - 1
    };

    align4(&mut bin);

    let doc = json!({
        "asset": { "version": "2.0", "generator": "glbtile" },
        "scene": 0,
        "scenes": [ { "nodes": [0] } ],
        "nodes": [ { "mesh": 0 } ],
        "meshes": [ {
            "primitives": [ {
                "attributes": attributes,
                "indices": indices_accessor,
                "mode": 4,
            } ],
        } ],
        "buffers": [ { "byteLength": bin.len() } ],
        "bufferViews": views,
        "accessors": accessors,
    });

    let mut json_bytes = serde_json::to_vec(&doc).map_err(|e| bad(&format!("glTF JSON: {e}")))?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let total = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut out = Vec::<u8>::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC);
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);

    Ok(out)
}

fn accessor_bytes<'a>(doc: &Value, bin: &'a [u8], index: u64) -> io::Result<(&'a [u8], usize)> {
    let accessor = doc["accessors"]
        .get(index as usize)
        .ok_or_else(|| bad("accessor index out of range"))?;
    let count = accessor["count"].as_u64().ok_or_else(|| bad("accessor without count"))? as usize;
    let comp = accessor["componentType"].as_u64().unwrap_or(0);
    if comp != COMP_F32 && comp != COMP_U32 {
        return Err(bad("unsupported accessor component type"));
    }
    let elems = match accessor["type"].as_str() {
        Some("SCALAR") => 1usize,
        Some("VEC2") => 2,
        Some("VEC3") => 3,
        _ => return Err(bad("unsupported accessor type")),
    };

    let view_index = accessor["bufferView"]
        .as_u64()
        .ok_or_else(|| bad("accessor without bufferView"))? as usize;
    let view = doc["bufferViews"]
        .get(view_index)
        .ok_or_else(|| bad("bufferView index out of range"))?;
    if view.get("byteStride").is_some() {
        return Err(bad("strided buffer views are not supported"));
    }
    let offset = view["byteOffset"].as_u64().unwrap_or(0) as usize;
    let length = view["byteLength"].as_u64().ok_or_else(|| bad("bufferView without byteLength"))? as usize;

    if offset + length > bin.len() {
        return Err(bad("bufferView overruns BIN chunk"));
    }
    if count * elems * 4 > length {
        return Err(bad("accessor overruns bufferView"));
    }

    Ok((&bin[offset..offset + count * elems * 4], count))
}

fn read_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Parse a GLB byte slice produced by [`write_glb_bytes`].
pub fn parse_glb_bytes(bytes: &[u8]) -> io::Result<Mesh> {
    let mut p = bytes;

    if take(&mut p, 4)? != b"glTF" {
        return Err(bad("bad GLB magic"));
    }
    if le_u32(&mut p)? != GLB_VERSION {
        return Err(bad("unsupported GLB version"));
    }
    let _total = le_u32(&mut p)?;

    let json_len = le_u32(&mut p)? as usize;
    if le_u32(&mut p)? != CHUNK_JSON {
        return Err(bad("expected JSON chunk"));
    }
    let json_bytes = take(&mut p, json_len)?;

    let bin: &[u8] = if p.is_empty() {
        &[]
    } else {
        let bin_len = le_u32(&mut p)? as usize;
        if le_u32(&mut p)? != CHUNK_BIN {
            return Err(bad("expected BIN chunk"));
        }
        take(&mut p, bin_len)?
    };

    let doc: Value =
        serde_json::from_slice(json_bytes).map_err(|e| bad(&format!("glTF JSON: {e}")))?;

    let prim = &doc["meshes"][0]["primitives"][0];
    if prim.is_null() {
        return Err(bad("GLB contains no mesh primitive"));
    }
    if let Some(mode) = prim["mode"].as_u64() {
        if mode != 4 {
            return Err(bad("only triangle-list primitives are supported"));
        }
    }

    let attrs = &prim["attributes"];
    let pos_index = attrs["POSITION"]
        .as_u64()
        .ok_or_else(|| bad("primitive without POSITION"))?;

    let (pos_bytes, _) = accessor_bytes(&doc, bin, pos_index)?;
    let flat = read_f32s(pos_bytes);
    let positions: Vec<[f32; 3]> = flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();

    let uvs = match attrs["TEXCOORD_0"].as_u64() {
        Some(index) => {
            let (bytes, _) = accessor_bytes(&doc, bin, index)?;
            let flat = read_f32s(bytes);
            Some(flat.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
        }
        None => None,
    };

    let feature_ids = match attrs["_FEATURE_ID"].as_u64() {
        Some(index) => {
            let (bytes, _) = accessor_bytes(&doc, bin, index)?;
            Some(read_f32s(bytes))
        }
        None => None,
    };

    let indices_index = prim["indices"]
        .as_u64()
        .ok_or_else(|| bad("primitive without indices"))?;
    let (index_bytes, _) = accessor_bytes(&doc, bin, indices_index)?;
    let indices: Vec<u32> = index_bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if indices.len() % 3 != 0 {
        return Err(bad("index count is not a multiple of 3"));
    }
    if let Some(&max_index) = indices.iter().max() {
        if max_index as usize >= positions.len() {
            return Err(bad("index out of vertex range"));
        }
    }

    Ok(Mesh {
        positions,
        indices,
        uvs,
        feature_ids,
    })
}

pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Mesh> {
    let bytes = std::fs::read(path)?;
    parse_glb_bytes(&bytes)
}

pub fn write_file<P: AsRef<Path>>(path: P, mesh: &Mesh) -> io::Result<()> {
    let bytes = write_glb_bytes(mesh)?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(())
}
