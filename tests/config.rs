use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ifcb_catalog::config::{Config, ConfigLoader};
use ifcb_catalog::error::CatalogError;
use ifcb_catalog::layout::Layout;
use ifcb_catalog::store::Atomicity;

#[test]
fn resolve_from_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ifcb-catalog.json");
    fs::write(
        &path,
        r#"{
            "catalog_path": "/data/ifcb/catalog.json",
            "layout": "yearday",
            "workers": 0,
            "skip_existing": false,
            "atomicity": "bin",
            "exclude_dirs": ["archive"]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.catalog_path, Utf8PathBuf::from("/data/ifcb/catalog.json"));
    assert_eq!(resolved.layout, Layout::Yearday);
    assert_eq!(resolved.workers, 1);
    assert!(!resolved.skip_existing);
    assert!(resolved.skip_missing);
    assert_eq!(resolved.atomicity, Atomicity::Bin);
    assert_eq!(resolved.exclude_dirs, vec!["archive".to_string()]);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CatalogError::ConfigRead(_))
    );
}

#[test]
fn malformed_json_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ifcb-catalog.json");
    fs::write(&path, "{ layout: day }").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CatalogError::ConfigParse(_))
    );
}

#[test]
fn unknown_atomicity_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ifcb-catalog.json");
    fs::write(&path, r#"{ "atomicity": "directory" }"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CatalogError::ConfigParse(_))
    );
}

#[test]
fn explicit_catalog_path_skips_data_dir_lookup() {
    let config = Config {
        catalog_path: Some("catalog.json".to_string()),
        layout: Some("day".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.catalog_path, Utf8PathBuf::from("catalog.json"));
    assert_eq!(resolved.layout, Layout::Day);
}
