use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempPath;
use uuid::Uuid;

/// Creates an empty scratch file in `dir`, removed when the returned path is dropped.
pub fn scratch_file(dir: &Path, label: &str) -> io::Result<TempPath> {
    fs::create_dir_all(dir)?;
    let prefix = format!("tenant-backup-{}-", Uuid::new_v4());
    let file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&format!("-{label}"))
        .tempfile_in(dir)?;
    Ok(file.into_temp_path())
}
