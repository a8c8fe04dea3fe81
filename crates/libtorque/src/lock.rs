use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use fs4::FileExt;

use crate::TorqueError;

/// File name of the lock held while a branch context is open.
pub const LOCK_FILE_NAME: &str = "torque-branch-context.lock";

/// RAII guard marking a working tree as owned by an open branch context.
///
/// The lock is advisory and per open file description, so a second context
/// in the same process is refused just like one in another process.
#[derive(Debug)]
pub struct ContextLock {
    /// The locked file handle.
    lock_file: fs::File,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl ContextLock {
    /// Take the exclusive lock in `git_dir`, failing fast if it is already held.
    pub fn acquire(git_dir: &Path) -> Result<Self, TorqueError> {
        let lock_path = git_dir.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(map_io)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                lock_file,
                lock_path,
            }),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(TorqueError::ContextActive {
                repo_dir: git_dir.to_path_buf(),
            }),
            Err(err) => Err(map_io(err)),
        }
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ContextLock {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Map an IO error to a TorqueError.
#[allow(clippy::needless_pass_by_value)]
fn map_io(err: io::Error) -> TorqueError {
    TorqueError::RepoState(format!("context lock unavailable: {err}"))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn second_lock_on_same_directory_is_refused() {
        let tmp = tempdir().unwrap();
        let first = ContextLock::acquire(tmp.path()).unwrap();
        assert!(first.path().exists());

        let second = ContextLock::acquire(tmp.path());
        assert!(matches!(second, Err(TorqueError::ContextActive { .. })));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let tmp = tempdir().unwrap();
        let lock_path = {
            let lock = ContextLock::acquire(tmp.path()).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!lock_path.exists());
        assert!(ContextLock::acquire(tmp.path()).is_ok());
    }
}
