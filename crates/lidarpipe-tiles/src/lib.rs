//! # lidarpipe-tiles
//!
//! Tile bookkeeping for batch LiDAR processing: which tiles to fetch, what they
//! are called, where on the ground they sit, and where their derived products
//! live on disk.
//!
//! ## Overview
//!
//! Survey tiles (e.g. swisstopo swissSURFACE3D) are 1 km grid cells published
//! as ZIP archives holding a LAS point cloud, or as GeoTIFF rasters. The cell
//! is encoded in the filename:
//!
//! ```text
//! swisssurface3d_2019_2600-1200_2056_5728.las.zip
//!                     ^^^^^^^^^ easting km - northing km
//! ```
//!
//! - [`TileManifest`] reads the list of locators to process.
//! - [`NamingPolicy`] turns a locator into a [`TileIdentity`] (`2600_1200`) and
//!   [`TileBounds`] for the rasterizer.
//! - [`ArtifactStore`] owns the per-product directories and resolves
//!   deterministic paths per tile.
//! - [`HttpFetcher`] downloads tiles.
//!
//! ## Example
//!
//! ```no_run
//! use lidarpipe_tiles::{ArtifactKind, ArtifactStore, DirectoryLayout, NamingPolicy, TileManifest};
//!
//! let manifest = TileManifest::load("tiles.csv")?;
//! let store = ArtifactStore::open(&DirectoryLayout::under("/data/work"))?;
//! let naming = NamingPolicy::surface3d();
//!
//! for locator in manifest.locators() {
//!     let tile = naming.describe(locator)?;
//!     println!(
//!         "{} {} -> {}",
//!         tile.identity,
//!         tile.bounds,
//!         store.resolve_path(ArtifactKind::DsmFilled, &tile).display()
//!     );
//! }
//! # Ok::<(), lidarpipe_tiles::TileError>(())
//! ```

mod error;
mod fetch;
mod manifest;
mod naming;
mod store;

pub use error::TileError;
pub use fetch::{FetchConfig, FetchStats, Fetched, HttpFetcher, TileFetcher};
pub use manifest::{ManifestEntry, TileManifest};
pub use naming::{
    filename_segment, IdentityRule, NamingPolicy, TileBounds, TileDescriptor, TileIdentity,
    DEFAULT_CELL_SIZE, DEFAULT_RESOLUTION,
};
pub use store::{remove_if_present, ArtifactDir, ArtifactKind, ArtifactRef, ArtifactStore, DirectoryLayout};

/// Result type for tile operations.
pub type Result<T> = std::result::Result<T, TileError>;
