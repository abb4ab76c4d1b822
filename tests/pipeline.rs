use std::fs;
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use ifcb_catalog::app::{NoopSink, ProgressEvent, ProgressSink};
use ifcb_catalog::catalog::{Catalog, ImportOptions};
use ifcb_catalog::error::CatalogError;
use ifcb_catalog::fileset::FilesetStore;
use ifcb_catalog::layout::Layout;
use ifcb_catalog::pipeline::{BinOutcome, CancelToken, CopyOptions, CopyPipeline};
use ifcb_catalog::selection::BinSelection;
use ifcb_catalog::store::{BinStore, EXTENSIONS, OutputDirectory};

const PIDS: [&str; 3] = [
    "D20220410T000000_IFCB001",
    "D20220411T000000_IFCB001",
    "D20220412T000000_IFCB001",
];

fn utf8_root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

fn write_fileset(dir: &Utf8Path, lid: &str) {
    fs::create_dir_all(dir.as_std_path()).unwrap();
    for ext in EXTENSIONS {
        fs::write(
            dir.join(format!("{lid}.{ext}")).as_std_path(),
            format!("{lid} {ext} payload"),
        )
        .unwrap();
    }
}

/// Catalogs every pid and binds the selection to the data directory.
fn bound_selection(data: &Utf8Path) -> (Catalog, BinSelection) {
    for pid in PIDS {
        write_fileset(data, pid);
    }
    let catalog = Catalog::in_memory();
    catalog
        .reconcile(&FilesetStore::new(data), ImportOptions::default(), &NoopSink)
        .unwrap();
    let store: Arc<dyn BinStore> = Arc::new(FilesetStore::new(data));
    let selection = catalog.select_all().with_data(store).unwrap();
    (catalog, selection)
}

fn dest_files(dest: &Utf8Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(dest.as_std_path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            entry
                .path()
                .strip_prefix(dest.as_std_path())
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    files.sort();
    files
}

#[test]
fn copy_into_day_layout() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let (catalog, _) = bound_selection(&root.join("data"));
    let store: Arc<dyn BinStore> = Arc::new(FilesetStore::new(root.join("data")));
    let selection = catalog.select_pids([PIDS[2]]).with_data(store).unwrap();
    let dest = root.join("dest");

    let report = selection
        .copy_to(dest.clone(), Layout::Day, &CopyOptions::default())
        .unwrap();
    assert_matches!(report.outcome(PIDS[2]), Some(BinOutcome::Copied { files: 3, .. }));
    assert_eq!(
        dest_files(&dest),
        vec![
            format!("2022102/{}.adc", PIDS[2]),
            format!("2022102/{}.hdr", PIDS[2]),
            format!("2022102/{}.roi", PIDS[2]),
        ]
    );
    assert_eq!(
        fs::read_to_string(dest.join(format!("2022102/{}.roi", PIDS[2])).as_std_path()).unwrap(),
        format!("{} roi payload", PIDS[2])
    );
}

#[test]
fn second_copy_skips_everything() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let (_catalog, selection) = bound_selection(&root.join("data"));
    let dest = root.join("dest");
    let options = CopyOptions::default();

    let first = selection.copy_to(dest.clone(), Layout::Yearday, &options).unwrap();
    assert_eq!(first.summary().copied, 3);
    let snapshot: Vec<Vec<u8>> = dest_files(&dest)
        .iter()
        .map(|name| fs::read(dest.join(name).as_std_path()).unwrap())
        .collect();

    let second = selection.copy_to(dest.clone(), Layout::Yearday, &options).unwrap();
    assert_eq!(second.summary().skipped_existing, 3);
    assert_eq!(second.summary().copied, 0);
    let after: Vec<Vec<u8>> = dest_files(&dest)
        .iter()
        .map(|name| fs::read(dest.join(name).as_std_path()).unwrap())
        .collect();
    assert_eq!(snapshot, after);
}

#[test]
fn missing_bin_aborts_before_any_write() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let data = root.join("data");
    let (_catalog, selection) = bound_selection(&data);
    for ext in EXTENSIONS {
        fs::remove_file(data.join(format!("{}.{ext}", PIDS[1])).as_std_path()).unwrap();
    }
    let dest = root.join("dest");
    let options = CopyOptions {
        skip_missing: false,
        ..CopyOptions::default()
    };

    let err = selection.copy_to(dest.clone(), Layout::Flat, &options).unwrap_err();
    assert_matches!(err, CatalogError::NotFound(pid) if pid == PIDS[1]);
    assert!(dest_files(&dest).is_empty());
}

#[test]
fn missing_bin_is_reported_when_skipping() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let data = root.join("data");
    let (_catalog, selection) = bound_selection(&data);
    fs::remove_file(data.join(format!("{}.hdr", PIDS[0])).as_std_path()).unwrap();
    let dest = root.join("dest");

    let report = selection
        .copy_to(dest.clone(), Layout::Flat, &CopyOptions::default())
        .unwrap();
    assert_eq!(report.outcome(PIDS[0]), Some(&BinOutcome::Missing));
    assert_eq!(report.summary().copied, 2);
    assert!(!report.has_failures());
    assert_eq!(dest_files(&dest).len(), 6);
}

#[test]
fn report_is_independent_of_worker_count() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let (_catalog, selection) = bound_selection(&root.join("data"));

    let serial = CopyOptions {
        workers: 1,
        ..CopyOptions::default()
    };
    let parallel = CopyOptions {
        workers: 8,
        ..CopyOptions::default()
    };
    let one = selection.copy_to(root.join("one"), Layout::Day, &serial).unwrap();
    let many = selection.copy_to(root.join("many"), Layout::Day, &parallel).unwrap();
    assert_eq!(one, many);
    assert_eq!(dest_files(&root.join("one")), dest_files(&root.join("many")));
}

#[test]
fn cancelled_run_copies_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let (_catalog, selection) = bound_selection(&root.join("data"));
    let dest = OutputDirectory::new(root.join("dest"), Layout::Flat);

    let token = CancelToken::new();
    token.cancel();
    let report = CopyPipeline::new(CopyOptions::default())
        .with_cancel_token(token)
        .run(&selection, &dest, &NoopSink)
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.summary().cancelled, 3);
    assert!(dest_files(&root.join("dest")).is_empty());
}

#[test]
fn destination_must_be_writable() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let (_catalog, selection) = bound_selection(&root.join("data"));
    let not_writable = FilesetStore::new(root.join("data"));
    let err = selection
        .copy(&not_writable, &CopyOptions::default())
        .unwrap_err();
    assert_matches!(err, CatalogError::MissingCapability(_));
}

/// Cancels the run as soon as one bin has finished copying.
struct CancelAfterCopy {
    token: CancelToken,
}

impl ProgressSink for CancelAfterCopy {
    fn event(&self, event: ProgressEvent) {
        if event.message.starts_with("phase=Copy") {
            self.token.cancel();
        }
    }
}

#[test]
fn cancellation_mid_run_stops_later_bins() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let (_catalog, selection) = bound_selection(&root.join("data"));
    let dest = root.join("dest");
    let output = OutputDirectory::new(dest.clone(), Layout::Flat);
    let options = CopyOptions {
        workers: 1,
        ..CopyOptions::default()
    };

    let token = CancelToken::new();
    let sink = CancelAfterCopy {
        token: token.clone(),
    };
    let report = CopyPipeline::new(options)
        .with_cancel_token(token)
        .run(&selection, &output, &sink)
        .unwrap();

    let summary = report.summary();
    assert!(report.cancelled);
    assert_eq!(summary.copied, 1);
    assert_eq!(summary.cancelled, 2);
    let (copied, _) = report
        .outcomes
        .iter()
        .find(|(_, outcome)| matches!(outcome, BinOutcome::Copied { .. }))
        .unwrap();
    assert_eq!(
        dest_files(&dest),
        ["adc", "hdr", "roi"]
            .iter()
            .map(|ext| format!("{copied}.{ext}"))
            .collect::<Vec<_>>()
    );
}

#[test]
fn cancel_after_last_bin_is_not_reported() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8_root(&temp);
    let (catalog, _) = bound_selection(&root.join("data"));
    let store: Arc<dyn BinStore> = Arc::new(FilesetStore::new(root.join("data")));
    let selection = catalog.select_pids([PIDS[0]]).with_data(store).unwrap();
    let output = OutputDirectory::new(root.join("dest"), Layout::Flat);

    let token = CancelToken::new();
    let sink = CancelAfterCopy {
        token: token.clone(),
    };
    let report = CopyPipeline::new(CopyOptions::default())
        .with_cancel_token(token.clone())
        .run(&selection, &output, &sink)
        .unwrap();

    assert!(token.is_cancelled());
    assert!(!report.cancelled);
    assert_eq!(report.summary().copied, 1);
}
