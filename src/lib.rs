pub mod prelude;

pub use sgfa_core as core;
pub use sgfa_fs as fs;
pub use sgfa_object as object;

use std::path::Path;

use crate::prelude::Result;

/// Initialize a jacket directory on the local file system and open it.
pub fn create(path: impl AsRef<Path>, id_text: &str) -> Result<fs::FsJacket> {
    Ok(fs::create(path.as_ref(), id_text)?)
}

/// Open an existing jacket directory on the local file system.
pub fn open(path: impl AsRef<Path>) -> Result<fs::FsJacket> {
    Ok(fs::open(path.as_ref())?)
}
