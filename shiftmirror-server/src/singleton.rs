//! One server per data directory.
//!
//! Two servers on the same store would each run their own scheduler and race on the
//! snapshot file. The lock file sits next to the snapshot and holds the owner's PID.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

const LOCK_FILE: &str = "server.lock";

/// Holds the data directory lock until dropped.
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Could not release store lock");
        }
    }
}

/// Lock `data_dir` for this process, failing if another server holds it.
pub fn lock_data_dir(data_dir: &Path) -> Result<StoreLock> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let path = data_dir.join(LOCK_FILE);
    // No truncate: the current holder's PID must survive a failed attempt.
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        let holder = read_holder(&mut file).unwrap_or_else(|| "unknown".into());
        anyhow::bail!(
            "Another shiftmirror-server (pid {holder}) is already using {}",
            data_dir.display()
        );
    }

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()?;

    tracing::debug!(path = %path.display(), "Acquired store lock");
    Ok(StoreLock { file, path })
}

fn read_holder(file: &mut File) -> Option<String> {
    let mut pid = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut pid).ok()?;
    let pid = pid.trim();
    (!pid.is_empty()).then(|| pid.to_string())
}
