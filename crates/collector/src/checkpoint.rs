// Checkpoint persistence with atomic writes
// Stores the highest record id fully processed as a single textual integer
//
// Single-writer: at most one collector may own a checkpoint file. Two
// processes sharing one file get undefined ordering; nothing here prevents it.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint file {path} does not hold an integer: {content:?}")]
    Corrupt { path: PathBuf, content: String },
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling temp file: the full file name plus `.tmp`, never the target itself
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Last saved value, or 0 when no checkpoint has been written yet
    pub fn load(&self) -> Result<u64, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        content
            .trim()
            .parse::<u64>()
            .map_err(|_| CheckpointError::Corrupt {
                path: self.path.clone(),
                content,
            })
    }

    /// Overwrite the checkpoint. Readers see either the old or the new
    /// value, never a partial write: temp file + fsync + rename.
    pub fn save(&self, value: u64) -> Result<(), CheckpointError> {
        let tmp_file = self.tmp_path();
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = File::create(&tmp_file).map_err(io_err)?;
        file.write_all(value.to_string().as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_file, &self.path).map_err(io_err)?;
        Ok(())
    }
}
