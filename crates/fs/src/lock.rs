//! Advisory jacket lock over the sentinel file.
//!
//! The locked file is the jacket info blob itself, so a jacket directory
//! carries exactly one coordination point. Locks are OS-advisory: they
//! coordinate cooperating processes on one host and are released on drop
//! (or process exit) on every path.

use std::fs::File;
use std::path::Path;

use fs2::FileExt;

use sgfa_core::{JacketLock, LockError};

#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub fn open(path: &Path) -> Result<Self, LockError> {
        let file = File::open(path)?;
        Ok(FileLock { file })
    }
}

#[derive(Debug)]
pub struct SharedGuard<'a> {
    file: &'a File,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    file: &'a File,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

impl JacketLock for FileLock {
    type Shared<'a> = SharedGuard<'a>;
    type Exclusive<'a> = ExclusiveGuard<'a>;

    fn shared(&self) -> Result<Self::Shared<'_>, LockError> {
        self.file.lock_shared()?;
        Ok(SharedGuard { file: &self.file })
    }

    fn exclusive(&self) -> Result<Self::Exclusive<'_>, LockError> {
        self.file.lock_exclusive()?;
        Ok(ExclusiveGuard { file: &self.file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sentinel() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_jacket");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"{}\n").unwrap();
        (dir, path)
    }

    #[test]
    fn shared_guards_coexist() {
        let (_dir, path) = sentinel();
        let lock = FileLock::open(&path).unwrap();

        let first = lock.shared().unwrap();
        let other = FileLock::open(&path).unwrap();
        let second = other.shared().unwrap();

        drop(first);
        drop(second);
    }

    #[test]
    fn exclusive_is_reacquirable_after_release() {
        let (_dir, path) = sentinel();
        let lock = FileLock::open(&path).unwrap();

        drop(lock.exclusive().unwrap());
        drop(lock.exclusive().unwrap());
    }
}
