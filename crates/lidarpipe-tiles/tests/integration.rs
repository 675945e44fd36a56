//! Integration tests for lidarpipe-tiles: manifest to paths, end to end.

use lidarpipe_tiles::{
    ArtifactKind, ArtifactStore, DirectoryLayout, HttpFetcher, FetchConfig, NamingPolicy,
    TileFetcher, TileManifest,
};
use std::fs;

const MANIFEST: &str = "\
# swissSURFACE3D selection
https://data.geo.admin.ch/ch.swisstopo.swisssurface3d/swisssurface3d_2019_2600-1200/swisssurface3d_2019_2600-1200_2056_5728.las.zip

https://data.geo.admin.ch/ch.swisstopo.swisssurface3d/swisssurface3d_2019_2601-1200/swisssurface3d_2019_2601-1200_2056_5728.las.zip
";

#[test]
fn test_manifest_to_bounds() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("tiles.csv");
    fs::write(&path, MANIFEST).unwrap();

    let manifest = TileManifest::load(&path).unwrap();
    assert_eq!(manifest.len(), 2, "comment and blank lines are not entries");

    let naming = NamingPolicy::surface3d();
    let tiles: Vec<_> = manifest
        .locators()
        .map(|l| naming.describe(l).unwrap())
        .collect();

    assert_eq!(tiles[0].identity.as_str(), "2600_1200");
    assert_eq!(
        tiles[0].bounds.to_bounds_string(),
        "([2600000,2600999.75],[1200000,1200999.75])"
    );
    assert_eq!(tiles[1].identity.as_str(), "2601_1200");
    assert_eq!(
        tiles[1].bounds.to_bounds_string(),
        "([2601000,2601999.75],[1200000,1200999.75])"
    );
}

#[test]
fn test_fetch_into_store() {
    let tmp = tempfile::tempdir().unwrap();
    let mirror = tmp.path().join("mirror");
    fs::create_dir_all(&mirror).unwrap();
    let source = mirror.join("swisssurface3d_2019_2600-1200_2056_5728.las.zip");
    fs::write(&source, b"archive bytes").unwrap();

    let store = ArtifactStore::open(&DirectoryLayout::under(tmp.path().join("work"))).unwrap();
    let tile = NamingPolicy::surface3d()
        .describe(&format!("file://{}", source.display()))
        .unwrap();
    let dest = store.resolve_path(ArtifactKind::Archive, &tile);

    let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
    fetcher.fetch(&tile.locator, &dest).unwrap();

    assert_eq!(fs::read(&dest).unwrap(), b"archive bytes");
    assert_eq!(dest.parent().unwrap().file_name().unwrap(), "zip");
}

#[test]
fn test_layout_from_yaml() {
    let layout: DirectoryLayout = serde_yaml::from_str("root: /srv/lidar\ndsm: /scratch/dsm\n").unwrap();
    assert_eq!(layout.root, std::path::PathBuf::from("/srv/lidar"));
    assert_eq!(layout.dsm, Some(std::path::PathBuf::from("/scratch/dsm")));
    assert_eq!(layout.dtm, None);
}
