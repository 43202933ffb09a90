// tidemark-core/src/infrastructure/fs.rs

use crate::error::TidemarkError;
use crate::infrastructure::error::InfrastructureError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write content to a file atomically using a temporary file.
///
/// The temporary file lives in the target's directory so the final rename
/// never crosses filesystems. The target is either fully written or left
/// untouched.
pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
) -> Result<(), InfrastructureError> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(InfrastructureError::Io)?;
    temp_file
        .write_all(content.as_ref())
        .map_err(InfrastructureError::Io)?;
    temp_file
        .persist(path)
        .map_err(|e| InfrastructureError::Io(e.error))?;

    Ok(())
}

/// `key=value` directory segment. Backend identifiers go straight into the
/// output tree, so anything that could climb out of it is refused.
pub fn partition_segment(key: &str, value: &str) -> Result<String, TidemarkError> {
    let unsafe_value = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if unsafe_value {
        return Err(TidemarkError::UnsafePath(format!("{key}={value}")));
    }
    Ok(format!("{key}={value}"))
}

/// Child directories of `dir` named `key=...`, as `(value, path)` sorted by
/// value. A missing `dir` yields nothing.
pub fn list_partitions(dir: &Path, key: &str) -> Result<Vec<(String, PathBuf)>, InfrastructureError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let prefix = format!("{key}=");
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(value) = name.strip_prefix(&prefix) {
            found.push((value.to_string(), entry.path()));
        }
    }
    found.sort();
    Ok(found)
}
