//! Pipeline stages and their external tool command templates.
//!
//! A stage consumes artifacts written by earlier stages and writes exactly one
//! new artifact. The command builders below are pure functions of their
//! explicit inputs so each template can be checked in isolation.

use crate::tool::ToolCommand;
use lidarpipe_tiles::{ArtifactKind, NamingPolicy, TileBounds};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Stages
// ============================================================================

/// One step of a tile pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Download the tile.
    Fetch,
    /// Pull the LAS point cloud out of the archive.
    Extract,
    /// Recompress LAS to LAZ.
    Convert,
    /// Rasterize the surface model.
    RasterizeDsm,
    /// Fill no-data gaps in the surface model.
    FillDsm,
    /// Hillshade the surface model.
    ShadeDsm,
    /// Rasterize the ground-only terrain model.
    RasterizeDtm,
    /// Fill no-data gaps in the terrain model.
    FillDtm,
    /// Hillshade the terrain model.
    ShadeDtm,
    /// Rasterize building heights above ground.
    RasterizeBuildings,
    /// Rasterize vegetation heights above ground.
    RasterizeVegetation,
    /// Hillshade a downloaded raster tile.
    ShadeRaster,
}

impl Stage {
    /// Stable name used in logs, errors and metrics.
    pub const fn name(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Convert => "convert",
            Stage::RasterizeDsm => "rasterize-dsm",
            Stage::FillDsm => "fill-dsm",
            Stage::ShadeDsm => "shade-dsm",
            Stage::RasterizeDtm => "rasterize-dtm",
            Stage::FillDtm => "fill-dtm",
            Stage::ShadeDtm => "shade-dtm",
            Stage::RasterizeBuildings => "rasterize-buildings",
            Stage::RasterizeVegetation => "rasterize-vegetation",
            Stage::ShadeRaster => "shade-raster",
        }
    }

    /// The artifact this stage writes.
    pub const fn output(&self) -> ArtifactKind {
        match self {
            Stage::Fetch => ArtifactKind::Archive,
            Stage::Extract => ArtifactKind::PointCloud,
            Stage::Convert => ArtifactKind::CompressedPointCloud,
            Stage::RasterizeDsm => ArtifactKind::DsmRaw,
            Stage::FillDsm => ArtifactKind::DsmFilled,
            Stage::ShadeDsm => ArtifactKind::DsmShaded,
            Stage::RasterizeDtm => ArtifactKind::DtmRaw,
            Stage::FillDtm => ArtifactKind::DtmFilled,
            Stage::ShadeDtm => ArtifactKind::DtmShaded,
            Stage::RasterizeBuildings => ArtifactKind::Buildings,
            Stage::RasterizeVegetation => ArtifactKind::Vegetation,
            Stage::ShadeRaster => ArtifactKind::Relief,
        }
    }

    /// The artifact this stage reads, if any.
    pub const fn input(&self) -> Option<ArtifactKind> {
        match self {
            Stage::Fetch => None,
            Stage::Extract | Stage::ShadeRaster => Some(ArtifactKind::Archive),
            Stage::Convert => Some(ArtifactKind::PointCloud),
            Stage::RasterizeDsm
            | Stage::RasterizeDtm
            | Stage::RasterizeBuildings
            | Stage::RasterizeVegetation => Some(ArtifactKind::CompressedPointCloud),
            Stage::FillDsm => Some(ArtifactKind::DsmRaw),
            Stage::ShadeDsm => Some(ArtifactKind::DsmFilled),
            Stage::FillDtm => Some(ArtifactKind::DtmRaw),
            Stage::ShadeDtm => Some(ArtifactKind::DtmFilled),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Which kind of source tile the run processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// ZIP archives holding a LAS point cloud; produces DSM, DTM, hillshades
    /// and nDSMs.
    #[default]
    Surface3d,
    /// GeoTIFF elevation tiles; produces a hillshade per tile.
    Raster,
}

const SURFACE3D_STAGES: [Stage; 11] = [
    Stage::Fetch,
    Stage::Extract,
    Stage::Convert,
    Stage::RasterizeDsm,
    Stage::FillDsm,
    Stage::ShadeDsm,
    Stage::RasterizeDtm,
    Stage::FillDtm,
    Stage::ShadeDtm,
    Stage::RasterizeBuildings,
    Stage::RasterizeVegetation,
];

const SURFACE3D_INTERMEDIATES: [ArtifactKind; 5] = [
    ArtifactKind::Archive,
    ArtifactKind::PointCloud,
    ArtifactKind::CompressedPointCloud,
    ArtifactKind::DsmRaw,
    ArtifactKind::DtmRaw,
];

const RASTER_STAGES: [Stage; 2] = [Stage::Fetch, Stage::ShadeRaster];

impl Profile {
    /// Stages in execution order.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Profile::Surface3d => &SURFACE3D_STAGES,
            Profile::Raster => &RASTER_STAGES,
        }
    }

    /// Artifacts deleted by cleanup; everything else is a product.
    pub fn intermediates(&self) -> &'static [ArtifactKind] {
        match self {
            Profile::Surface3d => &SURFACE3D_INTERMEDIATES,
            // The downloaded GeoTIFF is itself a product
            Profile::Raster => &[],
        }
    }

    /// Filename convention of the profile's source tiles.
    pub fn default_naming(&self) -> NamingPolicy {
        match self {
            Profile::Surface3d => NamingPolicy::surface3d(),
            Profile::Raster => NamingPolicy::raster(),
        }
    }
}

// ============================================================================
// Tool settings
// ============================================================================

/// `gdal_fillnodata.py` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillParams {
    /// Maximum search distance in pixels (`-md`).
    pub max_distance: u32,
    /// Smoothing iterations (`-si`).
    pub smoothing_iterations: u32,
}

/// `gdaldem hillshade` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HillshadeParams {
    /// Sun altitude in degrees (`-alt`).
    pub altitude: f64,
    /// Combine several light directions (`-multidirectional`).
    pub multidirectional: bool,
}

/// Programs and parameters for every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub unzip: String,
    pub pdal: String,
    pub fillnodata: String,
    pub gdaldem: String,
    /// Directory holding the PDAL pipeline descriptions.
    pub pipelines_dir: PathBuf,
    pub dsm_fill: FillParams,
    pub dtm_fill: FillParams,
    pub dsm_hillshade: HillshadeParams,
    pub dtm_hillshade: HillshadeParams,
    pub raster_hillshade: HillshadeParams,
    /// GDAL creation options for hillshade output (`-co`).
    pub creation_options: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            unzip: "unzip".to_string(),
            pdal: "pdal".to_string(),
            fillnodata: "gdal_fillnodata.py".to_string(),
            gdaldem: "gdaldem".to_string(),
            pipelines_dir: PathBuf::from("pdal"),
            dsm_fill: FillParams {
                max_distance: 100,
                smoothing_iterations: 2,
            },
            dtm_fill: FillParams {
                max_distance: 500,
                smoothing_iterations: 2,
            },
            dsm_hillshade: HillshadeParams {
                altitude: 55.0,
                multidirectional: true,
            },
            dtm_hillshade: HillshadeParams {
                altitude: 50.0,
                multidirectional: true,
            },
            raster_hillshade: HillshadeParams {
                altitude: 55.0,
                multidirectional: true,
            },
            creation_options: vec![
                "TILED=YES".to_string(),
                "COMPRESS=DEFLATE".to_string(),
                "PREDICTOR=2".to_string(),
            ],
        }
    }
}

impl ToolsConfig {
    /// PDAL pipeline description for a stage.
    pub fn pipeline_file(&self, stage: Stage) -> Option<PathBuf> {
        let name = match stage {
            Stage::Convert => "las2laz.json",
            Stage::RasterizeDsm => "laz2dsm.json",
            Stage::RasterizeDtm => "laz2dtm.json",
            Stage::RasterizeBuildings => "laz2buildings.json",
            Stage::RasterizeVegetation => "laz2vegetation.json",
            _ => return None,
        };
        Some(self.pipelines_dir.join(name))
    }
}

// ============================================================================
// Command templates
// ============================================================================

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// `unzip -o -j <archive> <member> -d <dest_dir>`
pub fn extract_command(tools: &ToolsConfig, archive: &Path, member: &str, dest_dir: &Path) -> ToolCommand {
    ToolCommand::new(&tools.unzip)
        .args(["-o", "-j"])
        .arg(path_arg(archive))
        .arg(member)
        .arg("-d")
        .arg(path_arg(dest_dir))
}

/// `pdal pipeline <las2laz> --readers.las.filename=<las> --writers.las.filename=<laz>`
pub fn convert_command(tools: &ToolsConfig, pipeline: &Path, las: &Path, laz: &Path) -> ToolCommand {
    ToolCommand::new(&tools.pdal)
        .arg("pipeline")
        .arg(path_arg(pipeline))
        .arg(format!("--readers.las.filename={}", las.display()))
        .arg(format!("--writers.las.filename={}", laz.display()))
}

/// `pdal pipeline <laz2x> --readers.las.filename=<laz> --writers.gdal.filename=<tif> --writers.gdal.bounds=<bounds>`
pub fn rasterize_command(
    tools: &ToolsConfig,
    pipeline: &Path,
    laz: &Path,
    raster: &Path,
    bounds: &TileBounds,
) -> ToolCommand {
    ToolCommand::new(&tools.pdal)
        .arg("pipeline")
        .arg(path_arg(pipeline))
        .arg(format!("--readers.las.filename={}", laz.display()))
        .arg(format!("--writers.gdal.filename={}", raster.display()))
        .arg(format!("--writers.gdal.bounds={}", bounds.to_bounds_string()))
}

/// `gdal_fillnodata.py -md <n> -si <n> <input> <output>`
pub fn fill_command(tools: &ToolsConfig, params: FillParams, input: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(&tools.fillnodata)
        .arg("-md")
        .arg(params.max_distance.to_string())
        .arg("-si")
        .arg(params.smoothing_iterations.to_string())
        .arg(path_arg(input))
        .arg(path_arg(output))
}

/// `gdaldem hillshade <input> <output> -compute_edges -alt <deg> [-multidirectional] [-co K=V]...`
pub fn hillshade_command(
    tools: &ToolsConfig,
    params: HillshadeParams,
    input: &Path,
    output: &Path,
) -> ToolCommand {
    let mut cmd = ToolCommand::new(&tools.gdaldem)
        .arg("hillshade")
        .arg(path_arg(input))
        .arg(path_arg(output))
        .arg("-compute_edges")
        .arg("-alt")
        .arg(params.altitude.to_string());
    if params.multidirectional {
        cmd = cmd.arg("-multidirectional");
    }
    for option in &tools.creation_options {
        cmd = cmd.arg("-co").arg(option.as_str());
    }
    cmd
}
