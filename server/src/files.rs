//! On-disk storage for uploaded source images and generated result plots.
//!
//! Layout under the static root:
//!
//! ```text
//! images/files_saved_here/   uploaded source images (current batch only)
//! images/analyzedpngs/       plots written by the last analysis run
//! images/display/            display images referenced by the modules page
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

pub const UPLOAD_SUBDIR: &str = "images/files_saved_here";
pub const ANALYZED_SUBDIR: &str = "images/analyzedpngs";
pub const DISPLAY_SUBDIR: &str = "images/display";

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("Invalid filename: {0:?}")]
    InvalidName(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error deleting file {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        FileStoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory layout of the application's static root.
#[derive(Clone, Debug)]
pub struct FileStore {
    static_root: PathBuf,
    upload_dir: PathBuf,
    analyzed_dir: PathBuf,
}

impl FileStore {
    pub fn new(static_root: impl Into<PathBuf>) -> Self {
        let static_root = static_root.into();
        Self {
            upload_dir: static_root.join(UPLOAD_SUBDIR),
            analyzed_dir: static_root.join(ANALYZED_SUBDIR),
            static_root,
        }
    }

    pub fn static_root(&self) -> &Path {
        &self.static_root
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn analyzed_dir(&self) -> &Path {
        &self.analyzed_dir
    }

    /// Create the upload and analyzed directories if they are missing.
    pub fn ensure_dirs(&self) -> Result<(), FileStoreError> {
        for dir in [&self.upload_dir, &self.analyzed_dir] {
            fs::create_dir_all(dir).map_err(|e| FileStoreError::io(dir, e))?;
        }
        Ok(())
    }

    /// Write `bytes` to the upload directory under `filename`, replacing any
    /// existing file of that name.
    pub fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, FileStoreError> {
        let name = checked_filename(filename)?;
        fs::create_dir_all(&self.upload_dir).map_err(|e| FileStoreError::io(&self.upload_dir, e))?;
        let path = self.upload_dir.join(name);
        fs::write(&path, bytes).map_err(|e| FileStoreError::io(&path, e))?;
        info!("saved upload path={} bytes={}", path.display(), bytes.len());
        Ok(path)
    }

    /// Delete one uploaded file.
    pub fn remove(&self, filename: &str) -> Result<(), FileStoreError> {
        let name = checked_filename(filename)?;
        let path = self.upload_dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("removed upload path={}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FileStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(FileStoreError::io(&path, e)),
        }
    }

    pub fn clear_uploads(&self) -> Result<usize, FileStoreError> {
        clear_dir(&self.upload_dir)
    }

    pub fn list_uploads(&self) -> Result<Vec<String>, FileStoreError> {
        list_dir(&self.upload_dir)
    }

    pub fn uploads_empty(&self) -> Result<bool, FileStoreError> {
        Ok(self.list_uploads()?.is_empty())
    }
}

/// Delete every entry of `dir`, stopping at the first failure.
///
/// A missing directory has nothing to delete and clears successfully.
/// Returns the number of entries removed.
pub fn clear_dir(dir: &Path) -> Result<usize, FileStoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(FileStoreError::io(dir, e)),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| FileStoreError::io(dir, e))?.path();
        fs::remove_file(&path).map_err(|source| FileStoreError::Delete {
            path: path.clone(),
            source,
        })?;
        removed += 1;
    }
    if removed > 0 {
        info!("cleared dir={} removed={}", dir.display(), removed);
    }
    Ok(removed)
}

/// Entry names of `dir`, sorted.
pub fn list_dir(dir: &Path) -> Result<Vec<String>, FileStoreError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| FileStoreError::io(dir, e))? {
        let entry = entry.map_err(|e| FileStoreError::io(dir, e))?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

/// Accept only a single plain path component as an upload name.
pub fn checked_filename(name: &str) -> Result<&str, FileStoreError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(FileStoreError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// URL of the display image derived from an uploaded filename: last
/// extension replaced by `.png`, under `/static/images/display/`.
pub fn display_image_url(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("/static/{}/{}.png", DISPLAY_SUBDIR, stem)
}
