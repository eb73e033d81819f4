//! File-system backend: content-addressed store, state index and advisory
//! lock over one jacket directory.
//!
//! Layout of a jacket directory:
//! ```text
//! <jacket>/
//!   _jacket    info blob, doubles as the advisory lock sentinel
//!   items/     content-addressed store (see `store`)
//!   state/     state index (see `state`)
//! ```

use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use sgfa_core::{Jacket, JacketError, JacketInfo, LockError, StateIndex};

pub mod lock;
pub mod state;
pub mod store;

pub use lock::*;
pub use state::*;
pub use store::*;

/// File name of the sentinel (info blob + advisory lock).
pub const JACKET_FILE: &str = "_jacket";
pub const ITEMS_DIR: &str = "items";
pub const STATE_DIR: &str = "state";

pub type FsJacket = Jacket<FileStore, FileState, FileLock>;

/// Initialize a jacket directory and open it.
///
/// Refuses a directory that already carries a sentinel file.
pub fn create(path: &Path, id_text: &str) -> Result<FsJacket, JacketError> {
    let info = JacketInfo::new(id_text)?;
    let sentinel = path.join(JACKET_FILE);

    if sentinel.exists() {
        return Err(JacketError::sanity(format!(
            "jacket already exists at {}",
            path.display()
        )));
    }

    fs::create_dir_all(path).map_err(LockError::from)?;
    fs::create_dir_all(path.join(ITEMS_DIR)).map_err(LockError::from)?;

    fs::write(&sentinel, info.to_bytes()?).map_err(LockError::from)?;

    let state = FileState::new(path.join(STATE_DIR));
    state.reset()?;

    info!(id_text, path = %path.display(), "jacket created");

    assemble(path, info)
}

/// Open an existing jacket directory, verifying its info blob.
pub fn open(path: &Path) -> Result<FsJacket, JacketError> {
    let sentinel = path.join(JACKET_FILE);

    let bytes = match fs::read(&sentinel) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(JacketError::nonexistent(format!(
                "jacket at {}",
                path.display()
            )));
        }
        Err(err) => return Err(LockError::from(err).into()),
    };

    let info = JacketInfo::from_bytes(&bytes)?;

    assemble(path, info)
}

fn assemble(path: &Path, info: JacketInfo) -> Result<FsJacket, JacketError> {
    let store = FileStore::new(path.join(ITEMS_DIR));
    let state = FileState::new(path.join(STATE_DIR));
    let lock = FileLock::open(&path.join(JACKET_FILE))?;

    Jacket::assemble(info, store, state, lock)
}
