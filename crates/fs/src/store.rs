//! Content-addressed item store on a local file system.
//!
//! Layout under the store root: `<xx>/<rest>-<k>` where `xx` is the first
//! two hex characters of the id, `rest` the remaining 62 and `k` the kind
//! suffix. Installs hard-link a sibling temp file into place, so a write is
//! atomic and idempotent; shard directories are created on demand.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

use sgfa_core::{ItemHash, ItemKind, ItemStore, StoreError};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn path(&self, kind: ItemKind, id: &ItemHash) -> PathBuf {
        let hex = id.to_string();
        self.root
            .join(&hex[..2])
            .join(format!("{}-{}", &hex[2..], kind.suffix()))
    }
}

impl ItemStore for FileStore {
    type Read = File;
    type Temp = NamedTempFile;

    fn read(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<Self::Read>, StoreError> {
        match File::open(self.path(kind, id)) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn temp(&self) -> Result<Self::Temp, StoreError> {
        Ok(NamedTempFile::new_in(&self.root)?)
    }

    fn write(&self, kind: ItemKind, id: &ItemHash, mut temp: Self::Temp) -> Result<(), StoreError> {
        temp.flush()?;
        temp.as_file().sync_all()?;

        let path = self.path(kind, id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::hard_link(temp.path(), &path) {
            Ok(()) => Ok(()),
            // identical content is already installed under this id
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, kind: ItemKind, id: &ItemHash) -> Result<bool, StoreError> {
        match fs::remove_file(self.path(kind, id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn size(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<u64>, StoreError> {
        match fs::metadata(self.path(kind, id)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn write_then_read_back() {
        let (_dir, store) = scratch();
        let id = ItemHash::compute(b"content");

        store.write_bytes(ItemKind::Entry, &id, b"content").unwrap();

        assert_eq!(
            store.read_bytes(ItemKind::Entry, &id).unwrap(),
            Some(b"content".to_vec())
        );
        assert_eq!(store.size(ItemKind::Entry, &id).unwrap(), Some(7));
    }

    #[test]
    fn missing_item_is_absent_not_error() {
        let (_dir, store) = scratch();
        let id = ItemHash::compute(b"nope");

        assert!(store.read(ItemKind::File, &id).unwrap().is_none());
        assert!(store.size(ItemKind::File, &id).unwrap().is_none());
        assert!(!store.delete(ItemKind::File, &id).unwrap());
    }

    #[test]
    fn layout_is_sharded_by_leading_hex() {
        let (dir, store) = scratch();
        let id = ItemHash::compute(b"shard me");

        store.write_bytes(ItemKind::History, &id, b"x").unwrap();

        let hex = id.to_string();
        let expected = dir
            .path()
            .join(&hex[..2])
            .join(format!("{}-h", &hex[2..]));
        assert!(expected.is_file());
    }

    #[test]
    fn rewrite_of_identical_content_is_idempotent() {
        let (_dir, store) = scratch();
        let id = ItemHash::compute(b"twice");

        store.write_bytes(ItemKind::Entry, &id, b"twice").unwrap();
        store.write_bytes(ItemKind::Entry, &id, b"twice").unwrap();

        assert_eq!(
            store.read_bytes(ItemKind::Entry, &id).unwrap(),
            Some(b"twice".to_vec())
        );
    }

    #[test]
    fn kinds_do_not_collide() {
        let (_dir, store) = scratch();
        let id = ItemHash::compute(b"same id");

        store.write_bytes(ItemKind::Entry, &id, b"entry").unwrap();
        store.write_bytes(ItemKind::File, &id, b"file").unwrap();

        assert_eq!(
            store.read_bytes(ItemKind::Entry, &id).unwrap(),
            Some(b"entry".to_vec())
        );
        assert_eq!(
            store.read_bytes(ItemKind::File, &id).unwrap(),
            Some(b"file".to_vec())
        );
    }

    #[test]
    fn delete_reports_prior_presence() {
        let (_dir, store) = scratch();
        let id = ItemHash::compute(b"bye");

        store.write_bytes(ItemKind::File, &id, b"bye").unwrap();

        assert!(store.delete(ItemKind::File, &id).unwrap());
        assert!(!store.delete(ItemKind::File, &id).unwrap());
        assert!(store.read(ItemKind::File, &id).unwrap().is_none());
    }
}
