//! Tile naming policy: canonical identities and grid bounds from locators.
//!
//! Survey tiles are published with the grid cell encoded in the filename, e.g.
//! `swisssurface3d_2019_2600-1200_2056_5728.las.zip` covers the kilometre cell
//! whose south-west corner is easting 2 600 000, northing 1 200 000. The cell
//! `2600-1200` becomes the identity `2600_1200`, which names every artifact
//! derived from the tile.
//!
//! The filename convention is an external contract, so the rule that extracts
//! the cell is configurable ([`IdentityRule`]) and always validated.

use crate::{Result, TileError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity prefixes are kilometre indices.
const GRID_ORIGIN_SCALE: f64 = 1000.0;

/// Default cell edge length in metres.
pub const DEFAULT_CELL_SIZE: f64 = 1000.0;

/// Default rasterizer grid resolution in metres.
pub const DEFAULT_RESOLUTION: f64 = 0.25;

/// Canonical key of a tile, e.g. `2600_1200`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileIdentity(String);

impl TileIdentity {
    /// Build an identity from a raw cell token such as `2600-1200`.
    pub fn from_cell(cell: &str) -> Self {
        Self(cell.replace('-', "_"))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Easting and northing kilometre indices, four digits each.
    pub fn grid_cell(&self) -> Result<(u32, u32)> {
        let invalid = || TileError::InvalidIdentity(self.0.clone());
        let (easting, northing) = self.0.split_once('_').ok_or_else(invalid)?;
        Ok((parse_index(easting).ok_or_else(invalid)?, parse_index(northing).ok_or_else(invalid)?))
    }
}

impl fmt::Display for TileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digits in each half of a grid cell, e.g. `2600` in `2600_1200`.
const CELL_INDEX_DIGITS: usize = 4;

fn parse_index(digits: &str) -> Option<u32> {
    if digits.len() != CELL_INDEX_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Axis-aligned extent of a tile in projected metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    /// West edge.
    pub min_easting: f64,
    /// South edge.
    pub min_northing: f64,
    /// East edge (last pixel origin, not the cell boundary).
    pub max_easting: f64,
    /// North edge (last pixel origin, not the cell boundary).
    pub max_northing: f64,
}

impl TileBounds {
    /// Bounds of the cell with the given origin, shrunk by one grid step.
    pub fn from_origin(min_easting: f64, min_northing: f64, cell_size: f64, resolution: f64) -> Self {
        let extent = cell_size - resolution;
        Self {
            min_easting,
            min_northing,
            max_easting: min_easting + extent,
            max_northing: min_northing + extent,
        }
    }

    /// Width in metres.
    pub fn width(&self) -> f64 {
        self.max_easting - self.min_easting
    }

    /// Height in metres.
    pub fn height(&self) -> f64 {
        self.max_northing - self.min_northing
    }

    /// Check if a coordinate is within the bounds.
    pub fn contains(&self, easting: f64, northing: f64) -> bool {
        easting >= self.min_easting
            && easting <= self.max_easting
            && northing >= self.min_northing
            && northing <= self.max_northing
    }

    /// Rasterizer bounds string: `([minE,maxE],[minN,maxN])`.
    pub fn to_bounds_string(&self) -> String {
        format!(
            "([{},{}],[{},{}])",
            self.min_easting, self.max_easting, self.min_northing, self.max_northing
        )
    }
}

impl fmt::Display for TileBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bounds_string())
    }
}

/// How the grid cell is located inside a tile filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityRule {
    /// Fixed byte window `[start, start + len)` of the filename.
    FixedWindow {
        /// First byte of the cell token.
        start: usize,
        /// Length of the cell token.
        len: usize,
    },
    /// First `DDDD-DDDD` run anywhere in the filename.
    Pattern,
}

impl IdentityRule {
    fn extract<'a>(&self, file_name: &'a str) -> std::result::Result<&'a str, String> {
        match *self {
            IdentityRule::FixedWindow { start, len } => {
                let end = start + len;
                if file_name.len() < end {
                    return Err(format!(
                        "filename '{}' is shorter than the {}..{} identity window",
                        file_name, start, end
                    ));
                }
                file_name
                    .get(start..end)
                    .ok_or_else(|| format!("identity window {}..{} splits a character", start, end))
            }
            IdentityRule::Pattern => find_cell_token(file_name)
                .ok_or_else(|| format!("filename '{}' has no DDDD-DDDD cell token", file_name)),
        }
    }
}

/// Find the first `DDDD-DDDD` token.
fn find_cell_token(file_name: &str) -> Option<&str> {
    let bytes = file_name.as_bytes();
    if bytes.len() < 9 {
        return None;
    }
    (0..=bytes.len() - 9)
        .find(|&i| {
            let window = &bytes[i..i + 9];
            window[4] == b'-'
                && window[..4].iter().all(u8::is_ascii_digit)
                && window[5..].iter().all(u8::is_ascii_digit)
        })
        .map(|i| &file_name[i..i + 9])
}

/// Filename segment of a locator: text after the last `/`, without query or
/// fragment.
pub fn filename_segment(locator: &str) -> &str {
    let end = locator.find(|c| c == '?' || c == '#').unwrap_or(locator.len());
    let path = &locator[..end];
    path.rsplit('/').next().unwrap_or(path)
}

/// Everything a pipeline needs to know about one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDescriptor {
    /// Locator as it appeared in the manifest.
    pub locator: String,
    /// Filename segment of the locator.
    pub file_name: String,
    /// Canonical tile key.
    pub identity: TileIdentity,
    /// Rasterizer extent.
    pub bounds: TileBounds,
}

/// Rules for turning a locator into a [`TileDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingPolicy {
    /// Where the cell token sits in the filename.
    pub rule: IdentityRule,
    /// Cell edge length in metres.
    pub cell_size: f64,
    /// Rasterizer grid resolution in metres.
    pub resolution: f64,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self::surface3d()
    }
}

impl NamingPolicy {
    /// Point cloud archives: `swisssurface3d_2019_2600-1200_2056_5728.las.zip`.
    pub const fn surface3d() -> Self {
        Self {
            rule: IdentityRule::FixedWindow { start: 20, len: 9 },
            cell_size: DEFAULT_CELL_SIZE,
            resolution: DEFAULT_RESOLUTION,
        }
    }

    /// Raster tiles: `swisssurface3d-raster_2019_2600-1200_0.5_2056_5728.tif`.
    pub const fn raster() -> Self {
        Self {
            rule: IdentityRule::FixedWindow { start: 27, len: 9 },
            cell_size: DEFAULT_CELL_SIZE,
            resolution: DEFAULT_RESOLUTION,
        }
    }

    /// Derive the tile identity from a locator's filename segment.
    pub fn derive_identity(&self, locator: &str) -> Result<TileIdentity> {
        let file_name = filename_segment(locator);
        let cell = self
            .rule
            .extract(file_name)
            .map_err(|reason| TileError::MalformedLocation {
                locator: locator.to_string(),
                reason,
            })?;
        Ok(TileIdentity::from_cell(cell))
    }

    /// Derive the rasterizer bounds for an identity.
    pub fn derive_bounds(&self, identity: &TileIdentity) -> Result<TileBounds> {
        let (easting, northing) = identity.grid_cell()?;
        Ok(TileBounds::from_origin(
            f64::from(easting) * GRID_ORIGIN_SCALE,
            f64::from(northing) * GRID_ORIGIN_SCALE,
            self.cell_size,
            self.resolution,
        ))
    }

    /// Derive identity and bounds in one step.
    pub fn describe(&self, locator: &str) -> Result<TileDescriptor> {
        let identity = self.derive_identity(locator)?;
        let bounds = self.derive_bounds(&identity)?;
        Ok(TileDescriptor {
            locator: locator.to_string(),
            file_name: filename_segment(locator).to_string(),
            identity,
            bounds,
        })
    }
}
