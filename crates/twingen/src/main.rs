use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use twingen::aoi::Aoi;
use twingen::config::Settings;
use twingen::pipeline::{run_heights, run_meshes, run_pack, Paths};

/// Which part of the pipeline to run. Stages communicate through files
/// under the data directory, so an orchestrator can rerun any one of them.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Stage {
    /// Derive building heights and write the enriched collection.
    Heights,
    /// Generate terrain, building, ribbon, water and sea chunk meshes.
    Meshes,
    /// Package chunk files and emit the manifest.
    Pack,
    /// Heights, meshes and pack in order.
    All,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Heights => "heights",
            Stage::Meshes => "meshes",
            Stage::Pack => "pack",
            Stage::All => "all",
        };

        f.write_str(s)
    }
}

#[derive(Parser, Debug)]
#[command(name = "twingen", version)]
struct Args {
    /// Root of the materialized inputs (raw/osm/*.geojson, interim/*.asc)
    /// and the processed outputs.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Root of the packaged distribution directories.
    #[arg(long, default_value = "dist")]
    dist_dir: PathBuf,

    /// Pipeline settings JSON; defaults apply when the file is absent.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// AOI descriptor JSON with the resolved local origin. Required.
    #[arg(long)]
    aoi: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Stage::All)]
    stage: Stage,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let settings_path = args
        .settings
        .unwrap_or_else(|| args.data_dir.join("config").join("settings.json"));
    let aoi_path = args
        .aoi
        .unwrap_or_else(|| args.data_dir.join("config").join("aoi.json"));

    let settings = Settings::load(&settings_path)?;
    let aoi = Aoi::load(&aoi_path).context("cannot run without an AOI descriptor")?;
    let paths = Paths::new(args.data_dir, args.dist_dir);

    info!(
        "project '{}', origin ({:.1}, {:.1}), stage {}",
        settings.project.name, aoi.origin[0], aoi.origin[1], args.stage
    );

    match args.stage {
        Stage::Heights => run_heights(&paths, &settings, &aoi)?,
        Stage::Meshes => run_meshes(&paths, &settings, &aoi)?,
        Stage::Pack => run_pack(&paths, &settings, &aoi)?,
        Stage::All => {
            run_heights(&paths, &settings, &aoi)?;
            run_meshes(&paths, &settings, &aoi)?;
            run_pack(&paths, &settings, &aoi)?;
        }
    }

    info!("done");
    Ok(())
}
