use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::RwLock;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::domain::Pid;
use crate::error::CatalogError;
use crate::layout::Layout;
use crate::store::{BinStore, EXTENSIONS, IterableStore, RawBin, ReadableStore};

pub fn default_exclude_dirs() -> Vec<String> {
    vec!["bak".to_string(), "beads".to_string()]
}

/// Finds complete `.hdr`/`.adc`/`.roi` filesets below a root directory.
///
/// Lookups that miss the standard layouts fall back to a table of every
/// fileset by bin id. The table is built by the first such lookup and
/// replaced on every `scan`. Clones share it.
#[derive(Debug, Clone)]
pub struct FilesetIndex {
    root: Utf8PathBuf,
    exclude: Vec<String>,
    lookup: Arc<RwLock<Option<HashMap<String, RawBin>>>>,
}

impl FilesetIndex {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: default_exclude_dirs(),
            lookup: Arc::default(),
        }
    }

    pub fn with_exclude_dirs(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn scan(&self) -> Result<Vec<RawBin>, CatalogError> {
        if !self.root.as_std_path().is_dir() {
            return Err(CatalogError::Filesystem(format!(
                "data directory not found: {}",
                self.root
            )));
        }

        let mut found = Vec::new();
        let walker = WalkDir::new(self.root.as_std_path())
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry));
        for entry in walker {
            let entry = entry.map_err(|err| CatalogError::Filesystem(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
                continue;
            };
            if let Some(bin) = fileset_from_header(&path) {
                found.push(bin);
            }
        }
        let lookup = found
            .iter()
            .map(|bin| (bin.pid().bin_lid().to_string(), bin.clone()))
            .collect();
        *self.lookup.write() = Some(lookup);
        Ok(found)
    }

    pub fn find(&self, pid: &Pid) -> Result<Option<RawBin>, CatalogError> {
        for layout in [Layout::Flat, Layout::Day, Layout::Yearday] {
            let candidate = RawBin::new(pid.clone(), self.root.join(layout.basepath(pid)));
            if candidate.missing_files().is_empty() {
                return Ok(Some(candidate));
            }
        }
        if let Some(lookup) = self.lookup.read().as_ref() {
            return Ok(lookup
                .get(pid.bin_lid())
                .filter(|bin| bin.missing_files().is_empty())
                .cloned());
        }
        debug!(root = %self.root, "building fileset lookup table");
        self.scan()?;
        Ok(self
            .lookup
            .read()
            .as_ref()
            .and_then(|lookup| lookup.get(pid.bin_lid()).cloned()))
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry.file_name().to_str().is_some_and(|name| {
                self.exclude
                    .iter()
                    .any(|excluded| excluded.eq_ignore_ascii_case(name))
            })
    }
}

fn fileset_from_header(path: &Utf8Path) -> Option<RawBin> {
    if path.extension() != Some(EXTENSIONS[0]) {
        return None;
    }
    let stem = path.file_stem()?;
    let pid = match stem.parse::<Pid>() {
        Ok(pid) if pid.bin_lid() == stem => pid,
        _ => {
            debug!(%path, "not a bin header, ignoring");
            return None;
        }
    };
    let bin = RawBin::new(pid, path.with_extension(""));
    let missing = bin.missing_files();
    if !missing.is_empty() {
        debug!(%path, missing = ?missing, "incomplete fileset, ignoring");
        return None;
    }
    Some(bin)
}

/// Source store over a directory of raw filesets.
#[derive(Debug, Clone)]
pub struct FilesetStore {
    index: FilesetIndex,
}

impl FilesetStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            index: FilesetIndex::new(root),
        }
    }

    pub fn from_index(index: FilesetIndex) -> Self {
        Self { index }
    }

    pub fn root(&self) -> &Utf8Path {
        self.index.root()
    }
}

impl ReadableStore for FilesetStore {
    fn get(&self, pid: &str) -> Result<RawBin, CatalogError> {
        let pid: Pid = pid.parse()?;
        self.index
            .find(&pid)?
            .ok_or_else(|| CatalogError::NotFound(pid.to_string()))
    }
}

impl IterableStore for FilesetStore {
    fn stream(&self) -> Result<Vec<RawBin>, CatalogError> {
        self.index.scan()
    }
}

impl BinStore for FilesetStore {
    fn readable(&self) -> Option<&dyn ReadableStore> {
        Some(self)
    }

    fn iterable(&self) -> Option<&dyn IterableStore> {
        Some(self)
    }
}
