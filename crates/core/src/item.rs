//! Item identities.
//!
//! Every persistent blob is addressed by a SHA-256-derived id. Ids are
//! deterministic functions of the jacket hash, the item kind and the item's
//! numbers, so the same logical object hashes to the same id across stores
//! and a single store can host multiple jackets without collision.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::{AttachNum, EntryNum, HistoryNum, JacketError};

/// The kind of a persistent item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    History,
    Entry,
    File,
}

impl ItemKind {
    /// Single-character suffix used by the store layouts.
    pub fn suffix(&self) -> char {
        match self {
            ItemKind::History => 'h',
            ItemKind::Entry => 'e',
            ItemKind::File => 'f',
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::History => "history",
            ItemKind::Entry => "entry",
            ItemKind::File => "file",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A SHA-256 value, used both as content hash and as item id.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemHash([u8; 32]);

impl ItemHash {
    pub const fn zero() -> Self {
        ItemHash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        ItemHash(hasher.finalize().into())
    }

    /// Hash a stream without materializing it.
    pub fn digest_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(ItemHash(hasher.finalize().into()))
    }

    pub fn parse(text: &str) -> Result<Self, JacketError> {
        if text.len() != 64 || !text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(JacketError::corrupt(format!("malformed hash {text:?}")));
        }

        let raw = hex::decode(text).map_err(|err| JacketError::corrupt(err.to_string()))?;

        let mut out = [0u8; 32];
        out.copy_from_slice(&raw);

        Ok(ItemHash(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ItemHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ItemHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemHash({})", hex::encode(self.0))
    }
}

impl FromStr for ItemHash {
    type Err = JacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemHash::parse(s)
    }
}

fn derive(text: String) -> ItemHash {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    ItemHash(hasher.finalize().into())
}

/// Id of a history record. Kind `History`.
pub fn history_id(jacket: &ItemHash, history: HistoryNum) -> ItemHash {
    derive(format!("{jacket} history {history}\n"))
}

/// Id of an entry at a specific revision. Kind `Entry`.
pub fn entry_id(jacket: &ItemHash, entry: EntryNum, revision: u64) -> ItemHash {
    derive(format!("{jacket} entry {entry} {revision}\n"))
}

/// Id of an attachment introduced in a specific history record. Kind `File`.
pub fn attach_id(
    jacket: &ItemHash,
    entry: EntryNum,
    attach: AttachNum,
    history: HistoryNum,
) -> ItemHash {
    derive(format!("{jacket} attach {entry} {attach} {history}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        let jacket = ItemHash::compute(b"demo");

        assert_eq!(history_id(&jacket, 1), history_id(&jacket, 1));
        assert_eq!(entry_id(&jacket, 3, 2), entry_id(&jacket, 3, 2));
        assert_eq!(attach_id(&jacket, 1, 1, 4), attach_id(&jacket, 1, 1, 4));
    }

    #[test]
    fn ids_differ_across_tuples() {
        let jacket = ItemHash::compute(b"demo");
        let other = ItemHash::compute(b"other");

        assert_ne!(history_id(&jacket, 1), history_id(&jacket, 2));
        assert_ne!(history_id(&jacket, 1), history_id(&other, 1));
        assert_ne!(entry_id(&jacket, 1, 2), entry_id(&jacket, 2, 1));
        assert_ne!(attach_id(&jacket, 1, 2, 3), attach_id(&jacket, 1, 3, 2));
    }

    #[test]
    fn id_preimage_is_decimal_without_padding() {
        let jacket = ItemHash::compute(b"demo");
        let expected = ItemHash::compute(format!("{jacket} history 10\n").as_bytes());

        assert_eq!(history_id(&jacket, 10), expected);
    }

    #[test]
    fn hash_round_trips_through_hex() {
        let hash = ItemHash::compute(b"payload");
        let text = hash.to_string();

        assert_eq!(text.len(), 64);
        assert_eq!(ItemHash::parse(&text).unwrap(), hash);
    }

    #[test]
    fn parse_rejects_uppercase_and_short_input() {
        assert!(ItemHash::parse("ABC").is_err());
        assert!(ItemHash::parse(&"A".repeat(64)).is_err());
    }

    #[test]
    fn digest_reader_matches_compute() {
        let data = b"some attachment bytes".to_vec();
        let mut cursor = std::io::Cursor::new(data.clone());

        let streamed = ItemHash::digest_reader(&mut cursor).unwrap();
        assert_eq!(streamed, ItemHash::compute(&data));
    }
}
