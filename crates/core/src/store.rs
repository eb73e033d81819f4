//! The content-addressed item store abstraction.
//!
//! A store is a mapping from `(kind, id)` to an opaque blob. It does not
//! enforce that content hashes back to the id; that is the jacket's job.
//! A missing item is the `None` sentinel, never an error.

use std::io::{Read, Write};

use crate::{ItemHash, ItemKind, StoreError};

pub trait ItemStore {
    /// Readable handle positioned at offset 0. The caller releases it by
    /// dropping.
    type Read: Read;

    /// Scratch blob on the store's own medium, so `write` can install it
    /// without copying.
    type Temp: Write;

    fn read(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<Self::Read>, StoreError>;

    fn temp(&self) -> Result<Self::Temp, StoreError>;

    /// Consume the temp handle, installing its contents at `(kind, id)`.
    ///
    /// Atomic: either the full content becomes visible or nothing does.
    /// Idempotent under identical content; a failed write never tombstones
    /// the id.
    fn write(&self, kind: ItemKind, id: &ItemHash, temp: Self::Temp) -> Result<(), StoreError>;

    /// Returns whether the item existed.
    fn delete(&self, kind: ItemKind, id: &ItemHash) -> Result<bool, StoreError>;

    /// Size in bytes, used as a presence probe during backup.
    fn size(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<u64>, StoreError>;

    fn read_bytes(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<Vec<u8>>, StoreError> {
        match self.read(kind, id)? {
            Some(mut handle) => {
                let mut buf = Vec::new();
                handle.read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    fn write_bytes(&self, kind: ItemKind, id: &ItemHash, bytes: &[u8]) -> Result<(), StoreError> {
        let mut temp = self.temp()?;
        temp.write_all(bytes)?;
        self.write(kind, id, temp)
    }

    fn contains(&self, kind: ItemKind, id: &ItemHash) -> Result<bool, StoreError> {
        Ok(self.size(kind, id)?.is_some())
    }
}
