use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use ifcb_catalog::error::CatalogError;
use ifcb_catalog::fileset::FilesetStore;
use ifcb_catalog::layout::Layout;
use ifcb_catalog::store::{
    Atomicity, BinStore, EXTENSIONS, IterableStore, OutputDirectory, RawBin, ReadableStore,
    WritableStore,
};

fn utf8_root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

fn write_fileset(dir: &Utf8Path, lid: &str) {
    fs::create_dir_all(dir.as_std_path()).unwrap();
    for ext in EXTENSIONS {
        fs::write(
            dir.join(format!("{lid}.{ext}")).as_std_path(),
            format!("{lid}.{ext}"),
        )
        .unwrap();
    }
}

#[test]
fn fileset_store_capabilities() {
    let store = FilesetStore::new("/nonexistent");
    assert!(store.readable().is_some());
    assert!(store.iterable().is_some());
    assert!(store.writable().is_none());
}

fn stream_len(store: &FilesetStore) -> usize {
    store.iterable().unwrap().stream().unwrap().len()
}

#[test]
fn stream_rescans_on_every_call() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    write_fileset(&root, "D20220101T000000_IFCB001");
    let store = FilesetStore::new(root.clone());
    assert_eq!(stream_len(&store), 1);

    write_fileset(&root.join("2022"), "D20220102T000000_IFCB001");
    assert_eq!(stream_len(&store), 2);
}

#[test]
fn write_day_layout_preserves_content() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let lid = "D20220412T000000_IFCB001";
    write_fileset(&root.join("src"), lid);

    let source = FilesetStore::new(root.join("src"));
    let bin = source.get(lid).unwrap();
    let dest = OutputDirectory::new(root.join("dest"), Layout::Day);
    let outcome = dest.write(&bin, true).unwrap();
    assert_eq!(outcome.written.len(), 3);

    for ext in EXTENSIONS {
        let path = root.join(format!("dest/2022102/{lid}.{ext}"));
        assert_eq!(
            fs::read_to_string(path.as_std_path()).unwrap(),
            format!("{lid}.{ext}")
        );
    }
}

#[test]
fn overwrite_when_not_skipping() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let lid = "D20220412T000000_IFCB001";
    write_fileset(&root.join("src"), lid);
    let bin = FilesetStore::new(root.join("src")).get(lid).unwrap();

    let dest = OutputDirectory::new(root.join("dest"), Layout::Flat);
    let stale = dest.destination_path(bin.pid(), "hdr");
    fs::create_dir_all(stale.parent().unwrap().as_std_path()).unwrap();
    fs::write(stale.as_std_path(), "stale").unwrap();

    let skipped = dest.write(&bin, true).unwrap();
    assert_eq!(skipped.skipped, vec!["hdr"]);
    assert_eq!(fs::read_to_string(stale.as_std_path()).unwrap(), "stale");

    let replaced = dest.write(&bin, false).unwrap();
    assert_eq!(replaced.written.len(), 3);
    assert_eq!(
        fs::read_to_string(stale.as_std_path()).unwrap(),
        format!("{lid}.hdr")
    );
}

#[test]
fn incomplete_fileset_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let lid = "D20220412T000000_IFCB001";
    write_fileset(&root.join("src"), lid);
    let bin = FilesetStore::new(root.join("src")).get(lid).unwrap();
    fs::remove_file(bin.path("roi").as_std_path()).unwrap();

    let dest = OutputDirectory::new(root.join("dest"), Layout::Flat).with_atomicity(Atomicity::Bin);
    let err = dest.write(&bin, true).unwrap_err();
    assert_matches!(err, CatalogError::IncompleteFileset { pid, missing } if pid == lid && missing == "roi");
    for ext in EXTENSIONS {
        assert!(!dest.destination_path(bin.pid(), ext).as_std_path().exists());
    }
}

fn dest_entries(dir: &Utf8Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Source fileset plus a destination whose `.adc` slot is a non-empty
/// directory, so copying that extension fails after `.hdr` went through.
fn blocked_destination(root: &Utf8Path, lid: &str) -> (RawBin, Utf8PathBuf) {
    write_fileset(&root.join("src"), lid);
    let bin = FilesetStore::new(root.join("src")).get(lid).unwrap();
    let dest = root.join("dest");
    let blocker = dest.join(format!("{lid}.adc"));
    fs::create_dir_all(blocker.as_std_path()).unwrap();
    fs::write(blocker.join("keep").as_std_path(), "x").unwrap();
    (bin, dest)
}

#[test]
fn bin_atomicity_restores_overwritten_files() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let lid = "D20220412T000000_IFCB001";
    let (bin, dest) = blocked_destination(&root, lid);
    let hdr = dest.join(format!("{lid}.hdr"));
    fs::write(hdr.as_std_path(), "preexisting").unwrap();

    let output = OutputDirectory::new(dest.clone(), Layout::Flat).with_atomicity(Atomicity::Bin);
    let err = output.write(&bin, false).unwrap_err();
    assert_matches!(err, CatalogError::Filesystem(_));

    assert_eq!(fs::read_to_string(hdr.as_std_path()).unwrap(), "preexisting");
    assert_eq!(
        dest_entries(&dest),
        vec![format!("{lid}.adc"), format!("{lid}.hdr")]
    );
}

#[test]
fn bin_atomicity_removes_files_created_by_failed_write() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let lid = "D20220412T000000_IFCB001";
    let (bin, dest) = blocked_destination(&root, lid);

    let output = OutputDirectory::new(dest.clone(), Layout::Flat).with_atomicity(Atomicity::Bin);
    assert!(output.write(&bin, false).is_err());
    assert_eq!(dest_entries(&dest), vec![format!("{lid}.adc")]);
}

#[test]
fn file_atomicity_keeps_copied_extensions() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let lid = "D20220412T000000_IFCB001";
    let (bin, dest) = blocked_destination(&root, lid);

    let output = OutputDirectory::new(dest.clone(), Layout::Flat);
    assert!(output.write(&bin, false).is_err());
    assert_eq!(
        dest_entries(&dest),
        vec![format!("{lid}.adc"), format!("{lid}.hdr")]
    );
}

#[test]
fn lookup_table_is_reused_until_rescanned() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let first = "D20220101T000000_IFCB001";
    let second = "D20220102T000000_IFCB001";
    write_fileset(&root.join("cruise/leg1"), first);
    let store = FilesetStore::new(root.clone());

    assert_eq!(
        store.get(first).unwrap().basepath(),
        root.join(format!("cruise/leg1/{first}")).as_path()
    );

    write_fileset(&root.join("cruise/leg2"), second);
    assert_matches!(store.get(second), Err(CatalogError::NotFound(_)));

    assert_eq!(stream_len(&store), 2);
    assert!(store.get(second).is_ok());

    fs::remove_file(root.join(format!("cruise/leg1/{first}.adc")).as_std_path()).unwrap();
    assert_matches!(store.get(first), Err(CatalogError::NotFound(_)));
}
