//! Per-execution advisory run lock.
//!
//! Only one run may drive a given execution id at a time.  The lock is a
//! non-blocking exclusive `flock` on `<lock_dir>/<execution>.lock`; the
//! kernel releases it when the holder closes the file or dies, so a reboot
//! in the middle of a run never leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::DbError;

/// Held for the lifetime of a run; dropping it releases the lock.
#[derive(Debug)]
pub struct ExecutionLock {
    _file: File,
    path: PathBuf,
}

impl ExecutionLock {
    /// Take the lock for `execution`, failing with [`DbError::Locked`] when
    /// another run already holds it.
    pub fn acquire(lock_dir: &Path, execution: &str) -> Result<Self, DbError> {
        std::fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", file_stem(execution)));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if !try_flock_exclusive(&file)? {
            return Err(DbError::Locked {
                execution: execution.to_string(),
            });
        }

        debug!(path = %path.display(), "acquired execution lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Execution ids are opaque; keep only characters safe in a file name.
fn file_stem(execution: &str) -> String {
    execution
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if the file is
/// already locked through another open file description.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();

        let first = ExecutionLock::acquire(dir.path(), "run-1").expect("first lock");
        assert!(matches!(
            ExecutionLock::acquire(dir.path(), "run-1"),
            Err(DbError::Locked { execution }) if execution == "run-1"
        ));

        // A different execution id is independent.
        let _other = ExecutionLock::acquire(dir.path(), "run-2").expect("other lock");

        drop(first);
        ExecutionLock::acquire(dir.path(), "run-1").expect("lock after release");
    }

    #[test]
    fn execution_ids_are_sanitised_for_the_file_name() {
        assert_eq!(file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(file_stem("a1b2-c3_d4"), "a1b2-c3_d4");
    }
}
