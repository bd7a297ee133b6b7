//! Exclusive run lock backed by an advisory file lock.
//!
//! Runs against one warehouse must be serialized. [`RunLock::acquire`] takes an
//! exclusive `flock`-style lock on the lock file and holds it for the life of the
//! [`RunLock`]. The operating system releases the lock when the holding process
//! exits, however it exits, so a crashed run leaves at most a stale file that the
//! next run simply relocks. The file stores the holder's pid for operators.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock at `path` without blocking, writing the current process id into it.
    ///
    /// # Errors
    /// Fails if another live handle holds the lock, or the file cannot be opened or written.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let mut holder = String::new();
                let _ = file.read_to_string(&mut holder);
                bail!(
                    "another run holds the lock {} (pid {})",
                    path.display(),
                    holder.trim()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("lock {}", path.display()));
            }
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .and_then(|()| file.sync_data())
            .with_context(|| format!("write lock file {}", path.display()))?;
        debug!(path = %path.display(), "run lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // The file stays; removing it would let a waiter lock an unlinked inode.
        if let Err(e) = self.file.set_len(0) {
            warn!(path = %self.path.display(), error = %e, "could not clear run lock");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "could not release run lock");
        }
    }
}
