//! Tile manifests: one remote locator per line.

use crate::{Result, TileError};
use std::path::Path;

/// One dispatchable manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// 1-based line number in the manifest file.
    pub line: usize,
    /// The tile locator (URL or path).
    pub locator: String,
}

/// Ordered list of tile locators.
///
/// Blank lines and lines starting with `#` are skipped; everything else is an
/// entry, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileManifest {
    entries: Vec<ManifestEntry>,
}

impl TileManifest {
    /// Read a manifest file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TileError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse manifest text.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .enumerate()
            .filter_map(|(index, raw)| {
                let locator = raw.trim();
                if locator.is_empty() || locator.starts_with('#') {
                    return None;
                }
                Some(ManifestEntry {
                    line: index + 1,
                    locator: locator.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    /// Build a manifest from locators directly.
    pub fn from_locators<I, S>(locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = locators
            .into_iter()
            .enumerate()
            .map(|(index, locator)| ManifestEntry {
                line: index + 1,
                locator: locator.into(),
            })
            .collect();
        Self { entries }
    }

    /// Entries in manifest order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Locators in manifest order.
    pub fn locators(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.locator.as_str())
    }

    /// Number of dispatchable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there is nothing to dispatch.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_blank_and_comment_lines() {
        let text = "# swisssurface3d export\n\
                    https://host/swisssurface3d_2019_2600-1200_2056_5728.las.zip\n\
                    \n\
                    https://host/swisssurface3d_2019_2601-1200_2056_5728.las.zip\r\n";
        let manifest = TileManifest::parse(text);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[0].line, 2);
        assert_eq!(manifest.entries()[1].line, 4);
        assert!(manifest.entries()[1].locator.ends_with(".las.zip"));
    }

    #[test]
    fn test_parse_preserves_order() {
        let manifest = TileManifest::parse("c\nb\na\n");
        let locators: Vec<_> = manifest.locators().collect();
        assert_eq!(locators, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = TileManifest::parse("\n# nothing\n   \n");
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = TileManifest::load("/nonexistent/manifest.csv").unwrap_err();
        assert!(matches!(err, TileError::ManifestRead { .. }));
    }
}
