use std::fs::{self, File, FileTimes};
use std::io;

use camino::Utf8Path;
use tempfile::TempPath;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::CatalogError;

/// Copies `source` to `dest` through a temp file in the destination
/// directory, keeping permissions and access/modification times. Missing
/// parent directories are created. An existing `dest` is replaced.
pub fn copy_file_preserving(source: &Utf8Path, dest: &Utf8Path) -> io::Result<u64> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid destination path"))?;
    fs::create_dir_all(parent.as_std_path())?;

    let metadata = fs::metadata(source.as_std_path())?;
    let temp = tempfile::Builder::new()
        .prefix(".ifcb-copy")
        .tempfile_in(parent.as_std_path())?;
    let bytes = fs::copy(source.as_std_path(), temp.path())?;

    let mut times = FileTimes::new().set_modified(metadata.modified()?);
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    temp.as_file().set_times(times)?;
    fs::set_permissions(temp.path(), metadata.permissions())?;

    temp.persist(dest.as_std_path()).map_err(|err| err.error)?;
    Ok(bytes)
}

/// Moves `path` to a hidden temp name in the same directory. The moved file
/// is deleted when the returned path drops unless it is persisted back.
pub fn set_aside(path: &Utf8Path) -> io::Result<TempPath> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid destination path"))?;
    let backup = tempfile::Builder::new()
        .prefix(".ifcb-backup")
        .tempfile_in(parent.as_std_path())?
        .into_temp_path();
    fs::rename(path.as_std_path(), &backup)?;
    Ok(backup)
}

pub struct ZipArchiveWriter {
    writer: ZipWriter<File>,
}

impl ZipArchiveWriter {
    pub fn create(path: &Utf8Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        }
        let file = File::create(path.as_std_path())
            .map_err(|err| CatalogError::Filesystem(format!("create zip {path}: {err}")))?;
        Ok(Self {
            writer: ZipWriter::new(file),
        })
    }

    pub fn add_file(&mut self, source: &Utf8Path, entry_name: &str) -> Result<(), CatalogError> {
        let mut input = File::open(source.as_std_path()).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                CatalogError::NotFound(source.to_string())
            } else {
                CatalogError::Filesystem(err.to_string())
            }
        })?;
        self.writer
            .start_file(entry_name, SimpleFileOptions::default())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        io::copy(&mut input, &mut self.writer)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn finish(self) -> Result<(), CatalogError> {
        self.writer
            .finish()
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Writes `content` to `path` via a sibling temp file and a rename.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CatalogError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".ifcb-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    Ok(())
}
