//! The advisory jacket lock.
//!
//! Cooperative coordination of parallel host processes over a single
//! jacket. Guards release on drop, so every exit path (including panics)
//! unlocks. There is no atomic shared-to-exclusive upgrade: a reader that
//! needs to write must drop its shared guard and restart its transaction
//! under a fresh exclusive one.
//!
//! Cross-jacket operations must not hold more than one exclusive lock at a
//! time.

use crate::LockError;

pub trait JacketLock {
    type Shared<'a>
    where
        Self: 'a;

    type Exclusive<'a>
    where
        Self: 'a;

    /// Block until a shared (reader) lock is held.
    fn shared(&self) -> Result<Self::Shared<'_>, LockError>;

    /// Block until the exclusive (writer) lock is held.
    fn exclusive(&self) -> Result<Self::Exclusive<'_>, LockError>;
}
