//! File loading helpers shared by the renderer and the CLI

use std::path::Path;

use crate::error::{CoreError, Result};

/// Read a file, mapping a missing path to a named error
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => CoreError::FileNotFound {
            path: path.display().to_string(),
        },
        _ => CoreError::Io(err),
    })
}

/// Returns true if the given path is an existing directory
pub fn is_dir<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().is_dir()
}
