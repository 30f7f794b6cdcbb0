//! Building height derivation.
//!
//! One height per footprint, first match wins: explicit height tag, level
//! count times storey height, 90th percentile of the surface-minus-ground
//! raster inside the footprint, fixed two-storey default. The result is
//! clamped and tagged with its provenance. Raster trouble is never fatal
//! here; it just falls through to the next tier.

use glam::DVec2;

use crate::config::BuildingSettings;
use crate::features::{tag_f64, tag_str, TagMap};
use crate::geometry::point_in_ring;
use crate::raster::ElevationGrid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeightSource {
    ExplicitTag,
    Levels,
    Ndsm,
    Default,
}

impl HeightSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeightSource::ExplicitTag => "explicit-tag",
            HeightSource::Levels => "levels",
            HeightSource::Ndsm => "ndsm",
            HeightSource::Default => "default",
        }
    }
}

/// Parse an explicit height tag: numeric prefix with an optional unit
/// suffix ("12", "12m", "12.5 m", "40ft", "10 metres").
pub fn parse_height_tag(raw: &str) -> Option<f64> {
    let s = raw.trim().to_ascii_lowercase();
    if let Some(num) = s.strip_suffix("ft") {
        let value: f64 = num.trim_end().parse().ok()?;
        return (value.is_finite() && value > 0.0).then_some(value * 0.3048);
    }
    let end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let value: f64 = s[..end].parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Linear-interpolated percentile of a sorted slice.
pub fn percentile(sorted: &[f32], pct: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = (sorted.len() - 1) as f64 * (pct / 100.0).clamp(0.0, 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] as f64 * (1.0 - frac) + sorted[hi] as f64 * frac
}

/// Sample the nDSM inside a footprint (planar coordinates) and take the
/// requested percentile. Values at or below zero and nodata are excluded;
/// an empty intersection yields `None`.
pub fn ndsm_height(grid: &ElevationGrid, ring_planar: &[DVec2], pct: f64) -> Option<f64> {
    if ring_planar.len() < 3 {
        return None;
    }

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in ring_planar {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let (gx0, gy0, gx1, gy1) = grid.bounds();
    let min_x = min_x.max(gx0);
    let min_y = min_y.max(gy0);
    let max_x = max_x.min(gx1);
    let max_y = max_y.min(gy1);
    if min_x >= max_x || min_y >= max_y {
        return None;
    }

    let cell = grid.cellsize;
    let col0 = ((min_x - grid.xll) / cell).floor().max(0.0) as usize;
    let col1 = (((max_x - grid.xll) / cell).ceil() as usize).min(grid.ncols);
    let row_up0 = ((min_y - grid.yll) / cell).floor().max(0.0) as usize;
    let row_up1 = (((max_y - grid.yll) / cell).ceil() as usize).min(grid.nrows);

    let mut values = Vec::new();
    for row_up in row_up0..row_up1 {
        let y = grid.yll + (row_up as f64 + 0.5) * cell;
        let row = grid.nrows - 1 - row_up;
        for col in col0..col1 {
            let x = grid.xll + (col as f64 + 0.5) * cell;
            if !point_in_ring(ring_planar, DVec2::new(x, y)) {
                continue;
            }
            let v = grid.value(col, row);
            if !grid.is_nodata(v) && v > 0.0 {
                values.push(v);
            }
        }
    }

    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(percentile(&values, pct))
}

/// Resolve one footprint's height and provenance.
pub fn derive_height(
    tags: &TagMap,
    ring_planar: &[DVec2],
    ndsm: Option<&ElevationGrid>,
    cfg: &BuildingSettings,
) -> (f64, HeightSource) {
    let mut resolved = tag_str(tags, "height")
        .and_then(parse_height_tag)
        .map(|h| (h, HeightSource::ExplicitTag));

    if resolved.is_none() {
        resolved = tag_f64(tags, "building:levels")
            .filter(|l| *l > 0.0)
            .map(|levels| (levels * cfg.storey_height_m, HeightSource::Levels));
    }

    if resolved.is_none() {
        resolved = ndsm
            .and_then(|grid| ndsm_height(grid, ring_planar, cfg.ndsm_percentile))
            .map(|h| (h, HeightSource::Ndsm));
    }

    let (height, source) = resolved.unwrap_or((cfg.default_height_m, HeightSource::Default));
    (
        height.clamp(cfg.min_height_m, cfg.max_height_m),
        source,
    )
}
