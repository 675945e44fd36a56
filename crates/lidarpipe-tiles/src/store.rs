//! Artifact directory layout and deterministic per-tile paths.
//!
//! Every product category has its own base directory. Workers share the
//! directories but write to paths keyed by tile identity, so no locking is
//! needed for artifact writes.

use crate::naming::{TileDescriptor, TileIdentity};
use crate::{Result, TileError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base directory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactDir {
    /// Downloaded archives and source rasters.
    Archive,
    /// Point clouds extracted from archives.
    Extracted,
    /// Recompressed point clouds.
    Converted,
    /// Raw and filled surface models.
    Dsm,
    /// Surface model hillshades.
    DsmShaded,
    /// Raw and filled terrain models.
    Dtm,
    /// Terrain model hillshades.
    DtmShaded,
    /// Building height models.
    Buildings,
    /// Vegetation height models.
    Vegetation,
    /// Hillshades rendered straight from source rasters.
    Relief,
}

impl ArtifactDir {
    /// All categories.
    pub const ALL: [ArtifactDir; 10] = [
        ArtifactDir::Archive,
        ArtifactDir::Extracted,
        ArtifactDir::Converted,
        ArtifactDir::Dsm,
        ArtifactDir::DsmShaded,
        ArtifactDir::Dtm,
        ArtifactDir::DtmShaded,
        ArtifactDir::Buildings,
        ArtifactDir::Vegetation,
        ArtifactDir::Relief,
    ];

    /// Directory name below the layout root.
    pub const fn default_name(&self) -> &'static str {
        match self {
            ArtifactDir::Archive => "zip",
            ArtifactDir::Extracted => "las",
            ArtifactDir::Converted => "laz",
            ArtifactDir::Dsm => "dsm",
            ArtifactDir::DsmShaded => "dsm_shaded_relief",
            ArtifactDir::Dtm => "dtm",
            ArtifactDir::DtmShaded => "dtm_shaded_relief",
            ArtifactDir::Buildings => "ndsm_buildings",
            ArtifactDir::Vegetation => "ndsm_vegetation",
            ArtifactDir::Relief => "relief",
        }
    }
}

/// Kinds of file a tile pipeline creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    /// Downloaded file, named after the locator.
    Archive,
    /// Extracted LAS point cloud.
    PointCloud,
    /// LAZ point cloud.
    CompressedPointCloud,
    /// DSM straight from the rasterizer.
    DsmRaw,
    /// DSM with no-data gaps filled.
    DsmFilled,
    /// DSM hillshade.
    DsmShaded,
    /// DTM straight from the rasterizer.
    DtmRaw,
    /// DTM with no-data gaps filled.
    DtmFilled,
    /// DTM hillshade.
    DtmShaded,
    /// Building nDSM.
    Buildings,
    /// Vegetation nDSM.
    Vegetation,
    /// Hillshade of a downloaded raster.
    Relief,
}

impl ArtifactKind {
    /// Base directory category.
    pub const fn dir(&self) -> ArtifactDir {
        match self {
            ArtifactKind::Archive => ArtifactDir::Archive,
            ArtifactKind::PointCloud => ArtifactDir::Extracted,
            ArtifactKind::CompressedPointCloud => ArtifactDir::Converted,
            ArtifactKind::DsmRaw | ArtifactKind::DsmFilled => ArtifactDir::Dsm,
            ArtifactKind::DsmShaded => ArtifactDir::DsmShaded,
            ArtifactKind::DtmRaw | ArtifactKind::DtmFilled => ArtifactDir::Dtm,
            ArtifactKind::DtmShaded => ArtifactDir::DtmShaded,
            ArtifactKind::Buildings => ArtifactDir::Buildings,
            ArtifactKind::Vegetation => ArtifactDir::Vegetation,
            ArtifactKind::Relief => ArtifactDir::Relief,
        }
    }

    /// Filename prefix; kinds sharing a directory differ here.
    pub const fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::DsmRaw | ArtifactKind::DtmRaw => "orig_",
            ArtifactKind::DsmFilled | ArtifactKind::DtmFilled => "filled_no_data_",
            _ => "",
        }
    }

    /// File extension without the dot.
    pub const fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Archive => "zip",
            ArtifactKind::PointCloud => "las",
            ArtifactKind::CompressedPointCloud => "laz",
            _ => "tif",
        }
    }

    /// Whether the artifact is named after the source file rather than the
    /// tile identity.
    pub const fn keeps_source_name(&self) -> bool {
        matches!(self, ArtifactKind::Archive | ArtifactKind::Relief)
    }

    /// File name for an identity-keyed artifact.
    pub fn file_name(&self, identity: &TileIdentity) -> String {
        format!("{}{}.{}", self.prefix(), identity, self.extension())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A file produced for one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// What the file is.
    pub kind: ArtifactKind,
    /// Name of the stage that wrote it.
    pub stage: &'static str,
    /// Tile the file belongs to.
    pub identity: TileIdentity,
    /// Absolute path.
    pub path: PathBuf,
}

/// Where artifacts live on disk.
///
/// Each category defaults to a fixed name below `root`; any of them can be
/// pointed elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryLayout {
    /// Parent of every category without an override.
    pub root: PathBuf,
    pub archive: Option<PathBuf>,
    pub extracted: Option<PathBuf>,
    pub converted: Option<PathBuf>,
    pub dsm: Option<PathBuf>,
    pub dsm_shaded: Option<PathBuf>,
    pub dtm: Option<PathBuf>,
    pub dtm_shaded: Option<PathBuf>,
    pub buildings: Option<PathBuf>,
    pub vegetation: Option<PathBuf>,
    pub relief: Option<PathBuf>,
}

impl Default for DirectoryLayout {
    fn default() -> Self {
        Self::under("work")
    }
}

impl DirectoryLayout {
    /// Layout with every category directly below `root`.
    pub fn under<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            archive: None,
            extracted: None,
            converted: None,
            dsm: None,
            dsm_shaded: None,
            dtm: None,
            dtm_shaded: None,
            buildings: None,
            vegetation: None,
            relief: None,
        }
    }

    fn override_for(&self, dir: ArtifactDir) -> Option<&PathBuf> {
        match dir {
            ArtifactDir::Archive => self.archive.as_ref(),
            ArtifactDir::Extracted => self.extracted.as_ref(),
            ArtifactDir::Converted => self.converted.as_ref(),
            ArtifactDir::Dsm => self.dsm.as_ref(),
            ArtifactDir::DsmShaded => self.dsm_shaded.as_ref(),
            ArtifactDir::Dtm => self.dtm.as_ref(),
            ArtifactDir::DtmShaded => self.dtm_shaded.as_ref(),
            ArtifactDir::Buildings => self.buildings.as_ref(),
            ArtifactDir::Vegetation => self.vegetation.as_ref(),
            ArtifactDir::Relief => self.relief.as_ref(),
        }
    }

    /// Configured (not yet created) directory for a category.
    pub fn directory(&self, dir: ArtifactDir) -> PathBuf {
        self.override_for(dir)
            .cloned()
            .unwrap_or_else(|| self.root.join(dir.default_name()))
    }
}

/// Resolved, existing artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dirs: BTreeMap<ArtifactDir, PathBuf>,
}

impl ArtifactStore {
    /// Create every directory of the layout and resolve them to absolute paths.
    pub fn open(layout: &DirectoryLayout) -> Result<Self> {
        let mut dirs = BTreeMap::new();
        for dir in ArtifactDir::ALL {
            let path = layout.directory(dir);
            let unavailable = |source| TileError::DirectoryUnavailable {
                path: path.clone(),
                source,
            };
            fs::create_dir_all(&path).map_err(unavailable)?;
            let absolute = fs::canonicalize(&path).map_err(unavailable)?;
            debug!("Artifact directory {:?}: {}", dir, absolute.display());
            dirs.insert(dir, absolute);
        }
        Ok(Self { dirs })
    }

    /// Absolute base directory of a category.
    pub fn directory(&self, dir: ArtifactDir) -> &Path {
        // open() inserts every category
        &self.dirs[&dir]
    }

    /// Absolute path of an artifact for a tile.
    pub fn resolve_path(&self, kind: ArtifactKind, tile: &TileDescriptor) -> PathBuf {
        let name = if kind.keeps_source_name() {
            tile.file_name.clone()
        } else {
            kind.file_name(&tile.identity)
        };
        self.directory(kind.dir()).join(name)
    }

    /// Reference to an artifact of a tile.
    pub fn artifact(&self, kind: ArtifactKind, stage: &'static str, tile: &TileDescriptor) -> ArtifactRef {
        ArtifactRef {
            kind,
            stage,
            identity: tile.identity.clone(),
            path: self.resolve_path(kind, tile),
        }
    }

    /// Delete an artifact.
    ///
    /// Returns `Ok(false)` when the file was already gone.
    pub fn delete(&self, artifact: &ArtifactRef) -> Result<bool> {
        remove_if_present(&artifact.path)
    }
}

/// Remove a file, treating a missing file as success.
pub fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Already absent: {}", path.display());
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
