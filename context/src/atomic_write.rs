//! Atomic session file writes.
//!
//! Writes go to a temp file in the destination directory which is then renamed
//! over the target. Windows refuses to rename over an existing file, so there
//! the old file is moved aside first and restored if the second rename fails.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy)]
pub(crate) struct AtomicWriteOptions {
    /// `sync_all()` the temp file before the rename.
    pub(crate) sync_all: bool,
    /// Best-effort `sync_all()` on the parent directory after the rename.
    pub(crate) dir_sync: bool,
    /// Unix permission bits for the written file (e.g. `0o600`).
    pub(crate) unix_mode: Option<u32>,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self {
        Self {
            sync_all: true,
            dir_sync: false,
            unix_mode: None,
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub(crate) fn atomic_write_with_options(
    path: &Path,
    bytes: &[u8],
    options: AtomicWriteOptions,
) -> std::io::Result<()> {
    let parent = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(parent)?;
    #[cfg(unix)]
    if let Some(mode) = options.unix_mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))?;
    }

    tmp.write_all(bytes)?;
    if options.sync_all {
        tmp.as_file().sync_all()?;
    }

    if let Err(err) = tmp.persist(path) {
        if !path.exists() {
            return Err(err.error);
        }
        let backup = path.with_extension("bak");
        let _ = std::fs::remove_file(&backup);
        std::fs::rename(path, &backup)?;

        if let Err(retry) = err.file.persist(path) {
            let _ = std::fs::rename(&backup, path);
            return Err(retry.error);
        }
        if let Err(e) = std::fs::remove_file(&backup) {
            tracing::warn!(path = %backup.display(), "Failed to remove backup after atomic write: {e}");
        }
    }

    if options.dir_sync {
        sync_dir(parent);
    }

    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(path = %dir.display(), "Directory sync failed (best-effort): {e}");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
