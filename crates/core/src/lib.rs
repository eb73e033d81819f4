//! Traits and machinery that are common to all sgfa crates.
//!
//! Glossary:
//!  - `jacket`: a single logical container of versioned entries secured by a
//!    hash-linked history chain.
//!  - `entry`: a versioned record holding title, body, tags and attachments.
//!  - `history`: the log record binding a set of entry writes to the chain.
//!  - `item`: any persistent blob (history, entry, attachment) addressed by a
//!    SHA-256-derived id.
//!  - `state`: the mutable derived index giving O(1) current-revision lookup
//!    and time-ordered tag queries.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub mod entry;
pub mod history;
pub mod item;
pub mod jacket;
pub mod limits;
pub mod lock;
pub mod state;
pub mod store;
pub mod time;

pub use entry::*;
pub use history::*;
pub use item::*;
pub use jacket::*;
pub use lock::*;
pub use state::*;
pub use store::*;
pub use time::*;

/// The sequence number of a history record within a jacket.
pub type HistoryNum = u64;

/// The number of an entry within a jacket.
pub type EntryNum = u64;

/// The revision of an entry (the optimistic-concurrency cursor).
pub type Revision = u64;

/// The number of an attachment within an entry.
pub type AttachNum = u64;

/// Raw attachment content as handed over by the caller.
pub type Blob = Vec<u8>;

/// Version of the jacket info blob format.
pub const JACKET_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn internal<T>(value: T) -> Self
    where
        T: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StoreError::Internal(value.into())
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl StateError {
    pub fn malformed(text: impl Into<String>) -> Self {
        StateError::Malformed(text.into())
    }

    pub fn internal<T>(value: T) -> Self
    where
        T: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StateError::Internal(value.into())
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl LockError {
    pub fn internal<T>(value: T) -> Self
    where
        T: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        LockError::Internal(value.into())
    }
}

/// Error taxonomy shared by every jacket backend.
#[derive(Debug, Error)]
pub enum JacketError {
    /// Input failed validation against the field limits.
    #[error("limits violated for {field}: {reason}")]
    Limits { field: &'static str, reason: String },

    /// The requested object does not logically exist.
    #[error("non-existent {0}")]
    NonExistent(String),

    /// Decoded bytes violated an invariant, or the state index references a
    /// blob that must exist and does not.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// Optimistic-concurrency revision mismatch during a write.
    #[error("conflict on entry {entry}: write carries revision {given}, current is {current}")]
    Conflict {
        entry: EntryNum,
        given: Revision,
        current: Revision,
    },

    /// API misuse.
    #[error("sanity: {0}")]
    Sanity(String),

    /// Reserved for access-control layers above the core.
    #[error("permission denied: {0}")]
    Permission(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl JacketError {
    pub fn limits(field: &'static str, reason: impl Into<String>) -> Self {
        JacketError::Limits {
            field,
            reason: reason.into(),
        }
    }

    pub fn nonexistent(what: impl Into<String>) -> Self {
        JacketError::NonExistent(what.into())
    }

    pub fn corrupt(what: impl Into<String>) -> Self {
        JacketError::Corrupt(what.into())
    }

    pub fn sanity(what: impl Into<String>) -> Self {
        JacketError::Sanity(what.into())
    }
}

/// The jacket info blob, stored in the sentinel file that also carries the
/// advisory lock.
///
/// Serialized as pretty-printed JSON with a trailing newline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JacketInfo {
    pub sgfa_jacket_ver: u64,
    pub id_hash: String,
    pub id_text: String,
}

impl JacketInfo {
    pub fn new(id_text: &str) -> Result<Self, JacketError> {
        limits::check_id_text(id_text)?;

        Ok(JacketInfo {
            sgfa_jacket_ver: JACKET_VERSION,
            id_hash: ItemHash::compute(id_text.as_bytes()).to_string(),
            id_text: id_text.to_owned(),
        })
    }

    /// The id hash as a parsed value. `id_text` is the only cryptographic
    /// binding; `verify` must have accepted the blob first.
    pub fn hash(&self) -> Result<ItemHash, JacketError> {
        ItemHash::parse(&self.id_hash)
    }

    pub fn verify(&self) -> Result<(), JacketError> {
        if self.sgfa_jacket_ver != JACKET_VERSION {
            return Err(JacketError::corrupt(format!(
                "unsupported jacket version {}",
                self.sgfa_jacket_ver
            )));
        }

        limits::check_id_text(&self.id_text)?;

        let derived = ItemHash::compute(self.id_text.as_bytes());

        if self.hash()? != derived {
            return Err(JacketError::corrupt("jacket id hash does not match id text"));
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, JacketError> {
        let mut text = serde_json::to_string_pretty(self)
            .map_err(|err| JacketError::corrupt(err.to_string()))?;

        text.push('\n');

        Ok(text.into_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, JacketError> {
        let info: JacketInfo = serde_json::from_slice(bytes)
            .map_err(|err| JacketError::corrupt(format!("jacket info blob: {err}")))?;

        info.verify()?;

        Ok(info)
    }
}

/// Sink for findings produced by `check`, `push` and `pull`.
///
/// Findings are data for the caller, not diagnostics; tracing output happens
/// independently of the sink.
pub trait Reporter {
    fn note(&mut self, line: &str);
}

impl Reporter for Vec<String> {
    fn note(&mut self, line: &str) {
        self.push(line.to_owned());
    }
}

/// Forwards findings to the tracing pipeline.
#[derive(Debug, Default)]
pub struct TraceReporter;

impl Reporter for TraceReporter {
    fn note(&mut self, line: &str) {
        warn!("{line}");
    }
}
