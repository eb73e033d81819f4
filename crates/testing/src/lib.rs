//! In-memory backends and canned fixtures for tests.
//!
//! The memory store, state index and lock implement the same contracts as
//! the production backends, minus durability. Tests that need a full
//! jacket assemble one with `memory_jacket`.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sgfa_core::{
    Clock, EntryNum, ItemHash, ItemKind, ItemStore, Jacket, JacketError, JacketInfo, JacketLock,
    LockError, StateError, StateIndex, StoreError, TagDelta, TagMove,
};

pub mod fixtures;

pub use fixtures::*;

/// A content-addressed store held entirely in memory.
///
/// Clones share the same map, mirroring how the file-system store's clones
/// share a directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: Arc<Mutex<HashMap<(ItemKind, ItemHash), Vec<u8>>>>,
}

/// Scratch blob for `MemoryStore`.
#[derive(Debug, Default)]
pub struct MemoryTemp(Vec<u8>);

impl Write for MemoryTemp {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Overwrite an item in place, bypassing the temp-blob protocol. For
    /// corruption tests.
    pub fn tamper(&self, kind: ItemKind, id: &ItemHash, bytes: &[u8]) {
        if let Ok(mut items) = self.items.lock() {
            items.insert((kind, *id), bytes.to_vec());
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ItemStore for MemoryStore {
    type Read = Cursor<Vec<u8>>;
    type Temp = MemoryTemp;

    fn read(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<Self::Read>, StoreError> {
        let items = self
            .items
            .lock()
            .map_err(|_| StoreError::internal("store mutex poisoned"))?;

        Ok(items.get(&(kind, *id)).cloned().map(Cursor::new))
    }

    fn temp(&self) -> Result<Self::Temp, StoreError> {
        Ok(MemoryTemp::default())
    }

    fn write(&self, kind: ItemKind, id: &ItemHash, temp: Self::Temp) -> Result<(), StoreError> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| StoreError::internal("store mutex poisoned"))?;

        items.insert((kind, *id), temp.0);

        Ok(())
    }

    fn delete(&self, kind: ItemKind, id: &ItemHash) -> Result<bool, StoreError> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| StoreError::internal("store mutex poisoned"))?;

        Ok(items.remove(&(kind, *id)).is_some())
    }

    fn size(&self, kind: ItemKind, id: &ItemHash) -> Result<Option<u64>, StoreError> {
        let items = self
            .items
            .lock()
            .map_err(|_| StoreError::internal("store mutex poisoned"))?;

        Ok(items.get(&(kind, *id)).map(|bytes| bytes.len() as u64))
    }
}

#[derive(Debug, Default)]
struct MemoryStateInner {
    current: BTreeMap<u64, u64>,
    // allocation-ordered directory, ids never reused within a generation
    directory: Vec<(u64, String)>,
    lists: HashMap<String, Vec<(String, EntryNum)>>,
}

/// A state index held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    inner: Arc<Mutex<MemoryStateInner>>,
}

impl MemoryState {
    pub fn new() -> Self {
        MemoryState::default()
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, MemoryStateInner>, StateError> {
        self.inner
            .lock()
            .map_err(|_| StateError::internal("state mutex poisoned"))
    }
}

impl StateIndex for MemoryState {
    fn current(&self, num: u64) -> Result<u64, StateError> {
        Ok(self.locked()?.current.get(&num).copied().unwrap_or(0))
    }

    fn set_current(&self, num: u64, value: u64) -> Result<(), StateError> {
        self.locked()?.current.insert(num, value);
        Ok(())
    }

    fn tag_names(&self) -> Result<Vec<String>, StateError> {
        Ok(self
            .locked()?
            .directory
            .iter()
            .map(|(_, tag)| tag.clone())
            .collect())
    }

    fn tag_window(
        &self,
        tag: &str,
        offset: usize,
        max: usize,
    ) -> Result<Option<(usize, Vec<(String, EntryNum)>)>, StateError> {
        let inner = self.locked()?;

        let Some(list) = inner.lists.get(tag) else {
            return Ok(None);
        };

        let window = list
            .iter()
            .rev()
            .skip(offset)
            .take(max)
            .cloned()
            .collect();

        Ok(Some((list.len(), window)))
    }

    fn apply_delta(&self, delta: &TagDelta) -> Result<(), StateError> {
        let mut inner = self.locked()?;

        for (tag, moves) in delta.tags() {
            let mut list = inner.lists.get(tag).cloned().unwrap_or_default();

            for (&entry, tag_move) in moves {
                list.retain(|(_, num)| *num != entry);

                if let TagMove::Insert(time) = tag_move {
                    // ties land after equal times: newer insertions later
                    let at = list.partition_point(|(t, _)| t.as_str() <= time.as_str());
                    list.insert(at, (time.clone(), entry));
                }
            }

            if list.is_empty() {
                inner.lists.remove(tag);
                inner.directory.retain(|(_, name)| name != tag);
            } else {
                if !inner.directory.iter().any(|(_, name)| name == tag) {
                    let next = inner.directory.iter().map(|(id, _)| *id).max().unwrap_or(0) + 1;
                    inner.directory.push((next, tag.to_owned()));
                }
                inner.lists.insert(tag.to_owned(), list);
            }
        }

        Ok(())
    }

    fn reset(&self) -> Result<(), StateError> {
        let mut inner = self.locked()?;
        *inner = MemoryStateInner::default();
        Ok(())
    }
}

/// A process-local jacket lock.
#[derive(Debug, Default)]
pub struct MemoryLock {
    inner: RwLock<()>,
}

impl MemoryLock {
    pub fn new() -> Self {
        MemoryLock::default()
    }
}

impl JacketLock for MemoryLock {
    type Shared<'a> = RwLockReadGuard<'a, ()>;
    type Exclusive<'a> = RwLockWriteGuard<'a, ()>;

    fn shared(&self) -> Result<Self::Shared<'_>, LockError> {
        self.inner
            .read()
            .map_err(|_| LockError::internal("lock poisoned"))
    }

    fn exclusive(&self) -> Result<Self::Exclusive<'_>, LockError> {
        self.inner
            .write()
            .map_err(|_| LockError::internal("lock poisoned"))
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn now_str(&self) -> String {
        self.0.clone()
    }
}

pub type MemoryJacket = Jacket<MemoryStore, MemoryState, MemoryLock>;

/// Assemble a fully in-memory jacket with a pinned clock.
pub fn memory_jacket(id_text: &str, now: &str) -> Result<MemoryJacket, JacketError> {
    let info = JacketInfo::new(id_text)?;

    let jacket = Jacket::assemble(
        info,
        MemoryStore::new(),
        MemoryState::new(),
        MemoryLock::new(),
    )?;

    Ok(jacket.with_clock(Box::new(FixedClock(now.to_owned()))))
}

