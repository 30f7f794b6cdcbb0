//! Single-band elevation rasters in ESRI ASCII grid format.
//!
//! The upstream raster preparation step materializes the clipped ground
//! model (and optionally the surface-minus-ground model) in the planar
//! projection with an explicit nodata value; this reader is deliberately
//! strict about the header and tolerant about whitespace.

use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};

/// A rectangular elevation grid, row 0 at the northern edge.
///
/// Read-only input to the meshers; never mutated after load.
#[derive(Debug, Clone)]
pub struct ElevationGrid {
    pub ncols: usize,
    pub nrows: usize,
    /// Planar coordinate of the outer south-west corner.
    pub xll: f64,
    pub yll: f64,
    pub cellsize: f64,
    pub nodata: f32,
    /// Row-major, top row first.
    pub data: Vec<f32>,
}

impl ElevationGrid {
    pub fn from_ascii_grid(path: &Path) -> Result<ElevationGrid> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening raster {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut ncols = None;
        let mut nrows = None;
        let mut xll = None;
        let mut yll = None;
        let mut xll_is_center = false;
        let mut yll_is_center = false;
        let mut cellsize = None;
        let mut nodata = -9999.0_f32;
        let mut data = Vec::new();

        for line in reader.lines() {
            let line = line.with_context(|| format!("reading raster {}", path.display()))?;
            let mut parts = line.split_whitespace();
            let Some(first) = parts.next() else {
                continue;
            };

            // Header rows are `key value`; everything after them is numbers.
            if first.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
                let value: f64 = parts
                    .next()
                    .with_context(|| format!("header '{first}' without a value"))?
                    .parse()
                    .with_context(|| format!("header '{first}' value"))?;
                match first.to_ascii_lowercase().as_str() {
                    "ncols" => ncols = Some(value as usize),
                    "nrows" => nrows = Some(value as usize),
                    "xllcorner" => xll = Some(value),
                    "yllcorner" => yll = Some(value),
                    "xllcenter" => {
                        xll = Some(value);
                        xll_is_center = true;
                    }
                    "yllcenter" => {
                        yll = Some(value);
                        yll_is_center = true;
                    }
                    "cellsize" => cellsize = Some(value),
                    "nodata_value" => nodata = value as f32,
                    other => bail!("unknown ASCII grid header '{other}'"),
                }
                continue;
            }

            data.push(
                first
                    .parse::<f32>()
                    .with_context(|| format!("elevation value '{first}'"))?,
            );
            for token in parts {
                data.push(
                    token
                        .parse::<f32>()
                        .with_context(|| format!("elevation value '{token}'"))?,
                );
            }
        }

        let ncols = ncols.context("raster is missing ncols")?;
        let nrows = nrows.context("raster is missing nrows")?;
        let cellsize = cellsize.context("raster is missing cellsize")?;
        let mut xll = xll.context("raster is missing xllcorner")?;
        let mut yll = yll.context("raster is missing yllcorner")?;
        if xll_is_center {
            xll -= cellsize / 2.0;
        }
        if yll_is_center {
            yll -= cellsize / 2.0;
        }

        if data.len() != ncols * nrows {
            bail!(
                "raster {} has {} values, expected {}x{}",
                path.display(),
                data.len(),
                ncols,
                nrows
            );
        }

        Ok(ElevationGrid {
            ncols,
            nrows,
            xll,
            yll,
            cellsize,
            nodata,
            data,
        })
    }

    #[inline]
    pub fn is_nodata(&self, v: f32) -> bool {
        v == self.nodata || v.is_nan()
    }

    #[inline]
    pub fn value(&self, col: usize, row: usize) -> f32 {
        self.data[row * self.ncols + col]
    }

    /// Planar extent as (min_x, min_y, max_x, max_y).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.xll,
            self.yll,
            self.xll + self.ncols as f64 * self.cellsize,
            self.yll + self.nrows as f64 * self.cellsize,
        )
    }

    /// Elevation of the cell containing the planar point, `None` outside the
    /// grid or on nodata.
    pub fn sample(&self, x: f64, y: f64) -> Option<f32> {
        let col = ((x - self.xll) / self.cellsize).floor();
        let row_up = ((y - self.yll) / self.cellsize).floor();
        if col < 0.0 || row_up < 0.0 {
            return None;
        }
        let col = col as usize;
        let row_up = row_up as usize;
        if col >= self.ncols || row_up >= self.nrows {
            return None;
        }
        let row = self.nrows - 1 - row_up;
        let v = self.value(col, row);
        (!self.is_nodata(v)).then_some(v)
    }
}

/// Ground elevation at a planar point, with the sea-level fallback the rest
/// of the pipeline expects when the lookup fails.
pub fn ground_elevation(grid: Option<&ElevationGrid>, x: f64, y: f64) -> f64 {
    grid.and_then(|g| g.sample(x, y)).map_or(0.0, f64::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_grid(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("twingen-{}-{}", std::process::id(), name));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    const SMALL: &str = "ncols 3\n\
                         nrows 2\n\
                         xllcorner 100.0\n\
                         yllcorner 200.0\n\
                         cellsize 10.0\n\
                         NODATA_value -9999\n\
                         1.0 2.0 3.0\n\
                         4.0 -9999 6.0\n";

    #[test]
    fn parses_header_and_samples_cells() {
        let path = write_grid("small.asc", SMALL);
        let grid = ElevationGrid::from_ascii_grid(&path).unwrap();
        assert_eq!((grid.ncols, grid.nrows), (3, 2));
        assert_eq!(grid.bounds(), (100.0, 200.0, 130.0, 220.0));

        // Bottom row is the last data row.
        assert_eq!(grid.sample(105.0, 205.0), Some(4.0));
        // Top row.
        assert_eq!(grid.sample(125.0, 215.0), Some(3.0));
        // Nodata cell and out-of-bounds both fail the lookup.
        assert_eq!(grid.sample(115.0, 205.0), None);
        assert_eq!(grid.sample(95.0, 205.0), None);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn ground_elevation_falls_back_to_zero() {
        let path = write_grid("fallback.asc", SMALL);
        let grid = ElevationGrid::from_ascii_grid(&path).unwrap();
        assert_eq!(ground_elevation(Some(&grid), 115.0, 205.0), 0.0);
        assert_eq!(ground_elevation(None, 0.0, 0.0), 0.0);
        assert_eq!(ground_elevation(Some(&grid), 105.0, 205.0), 4.0);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn value_count_mismatch_is_an_error() {
        let path = write_grid(
            "short.asc",
            "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n",
        );
        assert!(ElevationGrid::from_ascii_grid(&path).is_err());
        std::fs::remove_file(path).ok();
    }
}
