use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::domain::Pid;
use crate::error::CatalogError;
use crate::fs_util::{copy_file_preserving, set_aside};
use crate::layout::Layout;

/// Extensions that together make up one bin's raw fileset.
pub const EXTENSIONS: [&str; 3] = ["hdr", "adc", "roi"];

/// The physical files backing one bin in some store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBin {
    pid: Pid,
    basepath: Utf8PathBuf,
}

impl RawBin {
    pub fn new(pid: Pid, basepath: Utf8PathBuf) -> Self {
        Self { pid, basepath }
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.pid.timestamp()
    }

    pub fn instrument(&self) -> u32 {
        self.pid.instrument()
    }

    pub fn basepath(&self) -> &Utf8Path {
        &self.basepath
    }

    pub fn path(&self, ext: &str) -> Utf8PathBuf {
        with_extension(&self.basepath, ext)
    }

    pub fn missing_files(&self) -> Vec<&'static str> {
        EXTENSIONS
            .into_iter()
            .filter(|ext| !self.path(ext).as_std_path().is_file())
            .collect()
    }
}

fn with_extension(basepath: &Utf8Path, ext: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{basepath}.{ext}"))
}

pub trait ReadableStore: Send + Sync {
    fn get(&self, pid: &str) -> Result<RawBin, CatalogError>;
}

pub trait WritableStore: Send + Sync {
    fn write(&self, bin: &RawBin, skip_existing: bool) -> Result<WriteOutcome, CatalogError>;
}

pub trait IterableStore: Send + Sync {
    /// One directory scan per call.
    fn stream(&self) -> Result<Vec<RawBin>, CatalogError>;
}

/// Capability queries over a storage endpoint. A concrete store overrides
/// the accessors for the capabilities it implements.
pub trait BinStore: Send + Sync {
    fn readable(&self) -> Option<&dyn ReadableStore> {
        None
    }

    fn writable(&self) -> Option<&dyn WritableStore> {
        None
    }

    fn iterable(&self) -> Option<&dyn IterableStore> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub pid: String,
    pub written: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub bytes: u64,
}

impl WriteOutcome {
    fn new(pid: &Pid) -> Self {
        Self {
            pid: pid.to_string(),
            written: Vec::new(),
            skipped: Vec::new(),
            bytes: 0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.written.is_empty()
    }
}

/// What happens to already-copied files when a later extension of the same
/// bin fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Atomicity {
    /// Keep whatever was copied.
    #[default]
    File,
    /// Remove files written by the failing call.
    Bin,
}

/// Destination store: writes filesets under `root` using a layout.
#[derive(Debug, Clone)]
pub struct OutputDirectory {
    root: Utf8PathBuf,
    layout: Layout,
    atomicity: Atomicity,
}

impl OutputDirectory {
    pub fn new(root: impl Into<Utf8PathBuf>, layout: Layout) -> Self {
        Self {
            root: root.into(),
            layout,
            atomicity: Atomicity::default(),
        }
    }

    pub fn with_atomicity(mut self, atomicity: Atomicity) -> Self {
        self.atomicity = atomicity;
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn destination_path(&self, pid: &Pid, ext: &str) -> Utf8PathBuf {
        with_extension(&self.root.join(self.layout.basepath(pid)), ext)
    }

    fn copy_extension(
        &self,
        source: &Utf8Path,
        dest: &Utf8Path,
        undo: &mut Vec<Undo>,
    ) -> io::Result<u64> {
        let backup = if self.atomicity == Atomicity::Bin && dest.as_std_path().exists() {
            Some(set_aside(dest)?)
        } else {
            None
        };
        let copied = copy_file_preserving(source, dest);
        match (backup, &copied) {
            (Some(backup), _) => undo.push(Undo::Restore(dest.to_path_buf(), backup)),
            (None, Ok(_)) => undo.push(Undo::Remove(dest.to_path_buf())),
            (None, Err(_)) => {}
        }
        copied
    }
}

/// How to revert one destination file touched by a failing `write`.
enum Undo {
    Remove(Utf8PathBuf),
    Restore(Utf8PathBuf, TempPath),
}

/// Deletes files the failing call created and puts overwritten files back.
fn rollback(undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        let result = match step {
            Undo::Remove(path) => fs::remove_file(path.as_std_path()),
            Undo::Restore(path, backup) => backup
                .persist(path.as_std_path())
                .map_err(|err| err.error),
        };
        if let Err(err) = result {
            warn!(%err, "failed to roll back destination file");
        }
    }
}

impl WritableStore for OutputDirectory {
    fn write(&self, bin: &RawBin, skip_existing: bool) -> Result<WriteOutcome, CatalogError> {
        let missing = bin.missing_files();
        if !missing.is_empty() {
            return Err(CatalogError::IncompleteFileset {
                pid: bin.pid().to_string(),
                missing: missing.join(", "),
            });
        }

        let mut outcome = WriteOutcome::new(bin.pid());
        let mut undo = Vec::new();
        for ext in EXTENSIONS {
            let source = bin.path(ext);
            let dest = self.destination_path(bin.pid(), ext);
            if skip_existing && dest.as_std_path().exists() {
                debug!(%dest, "destination exists, skipping");
                outcome.skipped.push(ext);
                continue;
            }
            match self.copy_extension(&source, &dest, &mut undo) {
                Ok(bytes) => {
                    outcome.written.push(ext);
                    outcome.bytes += bytes;
                }
                Err(err) => {
                    if self.atomicity == Atomicity::Bin {
                        rollback(undo);
                    }
                    if err.kind() == io::ErrorKind::NotFound && !source.as_std_path().exists() {
                        return Err(CatalogError::IncompleteFileset {
                            pid: bin.pid().to_string(),
                            missing: ext.to_string(),
                        });
                    }
                    return Err(CatalogError::Filesystem(format!(
                        "copy {source} -> {dest}: {err}"
                    )));
                }
            }
        }
        Ok(outcome)
    }
}

impl BinStore for OutputDirectory {
    fn writable(&self) -> Option<&dyn WritableStore> {
        Some(self)
    }
}
