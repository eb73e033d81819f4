//! The history record.
//!
//! A history record binds a set of entry writes to the jacket's
//! tamper-evident chain: each record carries the SHA-256 of its
//! predecessor's canonical encoding (256 zero bits for record #1).
//! `process` finalizes the drafts of a write, aggregates their hashes and
//! computes the tag delta the state index must apply.

use std::fmt::Write as _;

use crate::{
    entry::{field, positive, take_line},
    item::ItemHash,
    limits, AttachNum, Blob, Entry, EntryNum, HistoryNum, JacketError, Revision, TagDelta,
    TAG_ALL,
};

/// What a processed write hands back to the jacket: the state-index moves
/// plus the attachment content to persist.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub delta: TagDelta,
    pub files: Vec<(EntryNum, AttachNum, Blob, ItemHash)>,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    jacket: Option<ItemHash>,
    history: HistoryNum,
    previous: ItemHash,
    entry_max: EntryNum,
    time: Option<String>,
    user: Option<String>,
    entries: Vec<(EntryNum, Revision, ItemHash)>,
    attachments: Vec<(EntryNum, AttachNum, ItemHash)>,
    canonical: Option<Vec<u8>>,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    pub fn with_jacket(jacket: ItemHash) -> Self {
        History {
            jacket: Some(jacket),
            previous: ItemHash::zero(),
            ..History::default()
        }
    }

    pub fn jacket(&self) -> Option<&ItemHash> {
        self.jacket.as_ref()
    }

    pub fn number(&self) -> HistoryNum {
        self.history
    }

    pub fn previous(&self) -> &ItemHash {
        &self.previous
    }

    pub fn entry_max(&self) -> EntryNum {
        self.entry_max
    }

    pub fn time_str(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Entries recorded by this history, in write order.
    pub fn entries(&self) -> &[(EntryNum, Revision, ItemHash)] {
        &self.entries
    }

    /// Attachments recorded by this history, in discovery order.
    pub fn attachments(&self) -> &[(EntryNum, AttachNum, ItemHash)] {
        &self.attachments
    }

    /// Record a set of drafts as this history.
    ///
    /// Drafts without an entry number are assigned the next numbers after
    /// `prior_entry_max`, in input order. Each draft is finalized via
    /// `Entry::update`; the resulting change-sets are folded into the
    /// record's hash lists and into one tag delta:
    ///  - a new entry, or one whose time changed, is re-inserted under every
    ///    one of its tags (and `_all`) at the new time;
    ///  - otherwise only added tags insert; removed tags always tombstone.
    pub fn process(
        &mut self,
        history: HistoryNum,
        previous: ItemHash,
        prior_entry_max: EntryNum,
        user: &str,
        entries: &mut [Entry],
        time: &str,
    ) -> Result<ProcessOutcome, JacketError> {
        if history == 0 {
            return Err(JacketError::sanity("history number must be positive"));
        }

        limits::check_user(user)?;
        limits::check_time_str(time)?;

        let jacket = self
            .jacket
            .ok_or_else(|| JacketError::sanity("history is not bound to a jacket"))?;

        self.history = history;
        self.previous = previous;
        self.time = Some(time.to_owned());
        self.user = Some(user.to_owned());
        self.entries.clear();
        self.attachments.clear();
        self.canonical = None;

        let mut entry_max = prior_entry_max;
        let mut outcome = ProcessOutcome::default();

        for entry in entries.iter_mut() {
            entry.set_jacket(jacket)?;

            let num = match entry.entry() {
                Some(num) => {
                    entry_max = entry_max.max(num);
                    num
                }
                None => {
                    entry_max += 1;
                    entry.set_entry(entry_max)?;
                    entry_max
                }
            };

            let changes = entry.update(history, time)?;
            let hash = entry.hash()?;
            self.entries.push((num, entry.revision(), hash));

            for (attach, (blob, file_hash)) in changes.files {
                self.attachments.push((num, attach, file_hash));
                outcome.files.push((num, attach, blob, file_hash));
            }

            let entry_time = entry
                .time_str()
                .ok_or_else(|| JacketError::sanity("finalized entry has no time"))?
                .to_owned();

            if changes.time_changed {
                for tag in entry.tags() {
                    outcome.delta.insert(tag.clone(), num, entry_time.clone());
                }
                outcome.delta.insert(TAG_ALL, num, entry_time.clone());
            } else {
                for tag in &changes.tags_added {
                    outcome.delta.insert(tag.clone(), num, entry_time.clone());
                }
            }

            for tag in &changes.tags_removed {
                outcome.delta.remove(tag.clone(), num);
            }
        }

        self.entry_max = entry_max;

        Ok(outcome)
    }

    /// Produce the successor record: next number, `previous` linked to this
    /// record's hash.
    pub fn next(
        &mut self,
        user: &str,
        entries: &mut [Entry],
        time: &str,
    ) -> Result<(History, ProcessOutcome), JacketError> {
        if self.history == 0 {
            return Err(JacketError::sanity("cannot extend an unprocessed history"));
        }

        let jacket = self
            .jacket
            .ok_or_else(|| JacketError::sanity("history is not bound to a jacket"))?;
        let previous = self.hash()?;
        let number = self.history + 1;
        let entry_max = self.entry_max;

        let mut successor = History::with_jacket(jacket);
        let outcome = successor.process(number, previous, entry_max, user, entries, time)?;

        Ok((successor, outcome))
    }

    /// Canonical encoding. Only valid once the record is processed.
    pub fn canonical(&mut self) -> Result<&[u8], JacketError> {
        if self.canonical.is_none() {
            self.canonical = Some(self.render()?);
        }

        Ok(self.canonical.as_deref().unwrap_or_default())
    }

    pub fn hash(&mut self) -> Result<ItemHash, JacketError> {
        Ok(ItemHash::compute(self.canonical()?))
    }

    fn render(&self) -> Result<Vec<u8>, JacketError> {
        let jacket = self
            .jacket
            .ok_or_else(|| JacketError::sanity("history is not bound to a jacket"))?;

        if self.history == 0 {
            return Err(JacketError::sanity("cannot encode an unprocessed history"));
        }

        let time = self
            .time
            .as_deref()
            .ok_or_else(|| JacketError::sanity("time is not set"))?;
        let user = self
            .user
            .as_deref()
            .ok_or_else(|| JacketError::sanity("user is not set"))?;

        let mut out = String::new();
        let _ = writeln!(out, "jckt {jacket}");
        let _ = writeln!(out, "hist {}", self.history);
        let _ = writeln!(out, "emax {}", self.entry_max);
        let _ = writeln!(out, "time {time}");
        let _ = writeln!(out, "prev {}", self.previous);
        let _ = writeln!(out, "user {user}");

        for (entry, revision, hash) in &self.entries {
            let _ = writeln!(out, "entr {entry} {revision} {hash}");
        }

        for (entry, attach, hash) in &self.attachments {
            let _ = writeln!(out, "atch {entry} {attach} {hash}");
        }

        Ok(out.into_bytes())
    }

    /// Strict decode of a canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, JacketError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| JacketError::corrupt("history record is not valid utf-8"))?;

        let mut rest = text;

        let jacket = ItemHash::parse(field(take_line(&mut rest)?, "jckt")?)?;
        let history = positive(field(take_line(&mut rest)?, "hist")?, "hist")?;
        let entry_max = limits::parse_num(field(take_line(&mut rest)?, "emax")?)?;

        let time = field(take_line(&mut rest)?, "time")?;
        limits::check_time_str(time).map_err(|err| JacketError::corrupt(err.to_string()))?;

        let previous = ItemHash::parse(field(take_line(&mut rest)?, "prev")?)?;

        if (history == 1) != previous.is_zero() {
            return Err(JacketError::corrupt("previous hash does not fit position"));
        }

        let user = field(take_line(&mut rest)?, "user")?;
        limits::check_user(user).map_err(|err| JacketError::corrupt(err.to_string()))?;

        let mut entries = Vec::new();
        let mut attachments = Vec::new();
        let mut in_attachments = false;

        while !rest.is_empty() {
            let line = take_line(&mut rest)?;

            if let Some(spec) = line.strip_prefix("entr ") {
                if in_attachments {
                    return Err(JacketError::corrupt("entry after attachment list"));
                }

                let (entry, revision, hash) = triple(spec)?;

                if entry > entry_max {
                    return Err(JacketError::corrupt(
                        "entry number exceeds recorded maximum",
                    ));
                }

                entries.push((entry, revision, hash));
                continue;
            }

            if let Some(spec) = line.strip_prefix("atch ") {
                in_attachments = true;
                attachments.push(triple(spec)?);
                continue;
            }

            return Err(JacketError::corrupt(format!("unexpected line {line:?}")));
        }

        Ok(History {
            jacket: Some(jacket),
            history,
            previous,
            entry_max,
            time: Some(time.to_owned()),
            user: Some(user.to_owned()),
            entries,
            attachments,
            canonical: Some(bytes.to_vec()),
        })
    }
}

fn triple(spec: &str) -> Result<(u64, u64, ItemHash), JacketError> {
    let (first, spec) = spec
        .split_once(' ')
        .ok_or_else(|| JacketError::corrupt("malformed reference line"))?;
    let (second, hash) = spec
        .split_once(' ')
        .ok_or_else(|| JacketError::corrupt("malformed reference line"))?;

    Ok((
        positive(first, "reference")?,
        positive(second, "reference")?,
        ItemHash::parse(hash)?,
    ))
}
