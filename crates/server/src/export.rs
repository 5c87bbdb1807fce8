//! Offline dump of the event store to a JSON file

use sphere_core::{EventStore, StoreError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExportError {
    let path = path.to_path_buf();
    move |source| ExportError::Io { path, source }
}

/// Write every stored event, newest first, as a pretty JSON array.
/// Missing parent directories are created. Returns the number written.
pub fn write_export(store: &EventStore, out: &Path) -> Result<usize, ExportError> {
    let events = store.all()?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    std::fs::write(out, serde_json::to_vec_pretty(&events)?).map_err(io_err(out))?;

    tracing::info!(count = events.len(), out = %out.display(), "export written");
    Ok(events.len())
}
