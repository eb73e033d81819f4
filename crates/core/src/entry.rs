//! The entry record.
//!
//! An entry is a versioned record of title, body, tags and attachments.
//! A record whose history number is unset is a *draft*: it has no stable
//! hash and is never persisted. The first mutation of a loaded record turns
//! it back into a draft at the next revision; `update` finalizes the draft
//! into a history record and reports what changed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::{
    item::ItemHash, limits, render_time, AttachNum, Blob, EntryNum, HistoryNum, JacketError,
    Revision,
};

/// A single attachment slot within an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// History record in which the current content was introduced. Zero only
    /// while the content is pending inside a draft.
    pub history: HistoryNum,
    pub name: String,
}

/// Changes produced by finalizing a draft, consumed by the write protocol.
#[derive(Debug, Default)]
pub struct EntryChanges {
    pub time_changed: bool,
    pub tags_added: BTreeSet<String>,
    pub tags_removed: BTreeSet<String>,
    pub files: BTreeMap<AttachNum, (Blob, ItemHash)>,
}

#[derive(Debug, Clone)]
pub struct Entry {
    jacket: Option<ItemHash>,
    entry: Option<EntryNum>,
    revision: Revision,
    history: Option<HistoryNum>,
    attach_max: AttachNum,
    time: Option<String>,
    title: Option<String>,
    body: Option<String>,
    tags: BTreeSet<String>,
    attachments: BTreeMap<AttachNum, Attachment>,

    // snapshot of the loaded revision, for change tracking
    loaded_time: Option<String>,
    loaded_tags: BTreeSet<String>,

    pending: BTreeMap<AttachNum, Blob>,
    canonical: Option<Vec<u8>>,
}

impl Default for Entry {
    fn default() -> Self {
        Entry::new()
    }
}

impl Entry {
    pub fn new() -> Self {
        Entry {
            jacket: None,
            entry: None,
            revision: 1,
            history: None,
            attach_max: 0,
            time: None,
            title: None,
            body: None,
            tags: BTreeSet::new(),
            attachments: BTreeMap::new(),
            loaded_time: None,
            loaded_tags: BTreeSet::new(),
            pending: BTreeMap::new(),
            canonical: None,
        }
    }

    // a mutation invalidates the canonical form and, on a loaded record,
    // opens the next revision
    fn touch(&mut self) {
        self.canonical = None;
        if self.history.take().is_some() {
            self.revision += 1;
        }
    }

    pub fn is_draft(&self) -> bool {
        self.history.is_none()
    }

    pub fn jacket(&self) -> Option<&ItemHash> {
        self.jacket.as_ref()
    }

    pub fn entry(&self) -> Option<EntryNum> {
        self.entry
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn history(&self) -> Option<HistoryNum> {
        self.history
    }

    pub fn attach_max(&self) -> AttachNum {
        self.attach_max
    }

    pub fn time_str(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn attachments(&self) -> &BTreeMap<AttachNum, Attachment> {
        &self.attachments
    }

    /// Bind the entry to a jacket. Binding is permanent; rebinding to a
    /// different jacket is refused.
    pub fn set_jacket(&mut self, jacket: ItemHash) -> Result<(), JacketError> {
        match self.jacket {
            Some(bound) if bound != jacket => {
                Err(JacketError::sanity("entry is bound to a different jacket"))
            }
            Some(_) => Ok(()),
            None => {
                self.touch();
                self.jacket = Some(jacket);
                Ok(())
            }
        }
    }

    /// Assign the entry number. Numbers are assigned once, on first write.
    pub fn set_entry(&mut self, entry: EntryNum) -> Result<(), JacketError> {
        if entry == 0 || entry > limits::NUM_MAX {
            return Err(JacketError::limits(
                "entry",
                format!("number {entry} out of range"),
            ));
        }

        match self.entry {
            Some(assigned) if assigned != entry => {
                Err(JacketError::sanity("entry number is already assigned"))
            }
            Some(_) => Ok(()),
            None => {
                self.touch();
                self.entry = Some(entry);
                Ok(())
            }
        }
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), JacketError> {
        limits::check_title(title)?;
        self.touch();
        self.title = Some(title.to_owned());
        Ok(())
    }

    pub fn set_body(&mut self, body: &str) -> Result<(), JacketError> {
        limits::check_body(body)?;
        self.touch();
        self.body = Some(body.to_owned());
        Ok(())
    }

    pub fn set_time(&mut self, time: &DateTime<Utc>) -> Result<(), JacketError> {
        self.set_time_str(&render_time(time))
    }

    pub fn set_time_str(&mut self, time: &str) -> Result<(), JacketError> {
        limits::check_time_str(time)?;
        self.touch();
        self.time = Some(time.to_owned());
        Ok(())
    }

    /// Add a tag, returning its normalized form. Adding a tag the entry
    /// already carries is a no-op and does not open a new revision.
    pub fn add_tag(&mut self, tag: &str) -> Result<String, JacketError> {
        let tag = limits::normalize_tag(tag)?;

        if !self.tags.contains(&tag) {
            self.touch();
            self.tags.insert(tag.clone());
        }

        Ok(tag)
    }

    pub fn remove_tag(&mut self, tag: &str) -> Result<(), JacketError> {
        let tag = limits::normalize_tag(tag)?;

        if self.tags.contains(&tag) {
            self.touch();
            self.tags.remove(&tag);
        }

        Ok(())
    }

    /// Attach new content under the next attachment number.
    ///
    /// Numbers are never reused, even after deletion. The content stays
    /// pending (history 0) until `update` binds it to a history record.
    pub fn attach(&mut self, name: &str, blob: Blob) -> Result<AttachNum, JacketError> {
        limits::check_name(name)?;
        self.touch();

        self.attach_max += 1;
        let num = self.attach_max;

        self.attachments.insert(
            num,
            Attachment {
                history: 0,
                name: name.to_owned(),
            },
        );
        self.pending.insert(num, blob);

        Ok(num)
    }

    pub fn rename_attach(&mut self, attach: AttachNum, name: &str) -> Result<(), JacketError> {
        limits::check_name(name)?;

        if !self.attachments.contains_key(&attach) {
            return Err(JacketError::nonexistent(format!("attachment {attach}")));
        }

        self.touch();
        if let Some(slot) = self.attachments.get_mut(&attach) {
            slot.name = name.to_owned();
        }

        Ok(())
    }

    /// Replace the content of an existing attachment. The old content is no
    /// longer referenced by the entry record; its id stays reachable through
    /// the history chain.
    pub fn replace_attach(&mut self, attach: AttachNum, blob: Blob) -> Result<(), JacketError> {
        if !self.attachments.contains_key(&attach) {
            return Err(JacketError::nonexistent(format!("attachment {attach}")));
        }

        self.touch();
        if let Some(slot) = self.attachments.get_mut(&attach) {
            slot.history = 0;
        }
        self.pending.insert(attach, blob);

        Ok(())
    }

    pub fn delete_attach(&mut self, attach: AttachNum) -> Result<(), JacketError> {
        if !self.attachments.contains_key(&attach) {
            return Err(JacketError::nonexistent(format!("attachment {attach}")));
        }

        self.touch();
        self.attachments.remove(&attach);
        self.pending.remove(&attach);

        Ok(())
    }

    /// Finalize the draft into the given history record.
    ///
    /// Assigns the history number, defaults the time to `now` when unset,
    /// rewrites pending attachment slots, and reports the change-set the
    /// write protocol needs to persist blobs and move tags.
    pub fn update(&mut self, history: HistoryNum, now: &str) -> Result<EntryChanges, JacketError> {
        if self.history.is_some() {
            return Err(JacketError::sanity("entry is not a draft"));
        }

        if history == 0 {
            return Err(JacketError::sanity("history number must be positive"));
        }

        if self.entry.is_none() {
            return Err(JacketError::sanity("entry number is not assigned"));
        }

        if self.title.is_none() {
            return Err(JacketError::limits("title", "must be set before writing"));
        }

        if self.body.is_none() {
            return Err(JacketError::limits("body", "must be set before writing"));
        }

        let time_changed = match (&self.time, &self.loaded_time) {
            (None, _) => {
                limits::check_time_str(now)?;
                self.time = Some(now.to_owned());
                true
            }
            (Some(time), Some(loaded)) => time != loaded,
            (Some(_), None) => true,
        };

        let tags_added = self.tags.difference(&self.loaded_tags).cloned().collect();
        let tags_removed = self.loaded_tags.difference(&self.tags).cloned().collect();

        let mut files = BTreeMap::new();
        for (num, blob) in std::mem::take(&mut self.pending) {
            if let Some(slot) = self.attachments.get_mut(&num) {
                slot.history = history;
                let hash = ItemHash::compute(&blob);
                files.insert(num, (blob, hash));
            }
        }

        self.history = Some(history);
        self.canonical = None;
        self.loaded_time = self.time.clone();
        self.loaded_tags = self.tags.clone();

        Ok(EntryChanges {
            time_changed,
            tags_added,
            tags_removed,
            files,
        })
    }

    /// Canonical encoding. Only valid once the record is finalized.
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
            .ok_or_else(|| JacketError::sanity("entry is not bound to a jacket"))?;
        let entry = self
            .entry
            .ok_or_else(|| JacketError::sanity("entry number is not assigned"))?;
        let history = self
            .history
            .ok_or_else(|| JacketError::sanity("cannot encode a draft"))?;
        let time = self
            .time
            .as_deref()
            .ok_or_else(|| JacketError::sanity("time is not set"))?;
        let title = self
            .title
            .as_deref()
            .ok_or_else(|| JacketError::sanity("title is not set"))?;
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| JacketError::sanity("body is not set"))?;

        let mut out = String::new();
        let _ = writeln!(out, "jckt {jacket}");
        let _ = writeln!(out, "entr {entry}");
        let _ = writeln!(out, "revn {}", self.revision);
        let _ = writeln!(out, "hist {history}");
        let _ = writeln!(out, "amax {}", self.attach_max);
        let _ = writeln!(out, "time {time}");
        let _ = writeln!(out, "titl {title}");

        for tag in &self.tags {
            let _ = writeln!(out, "tags {tag}");
        }

        for (num, slot) in &self.attachments {
            let _ = writeln!(out, "atch {num} {} {}", slot.history, slot.name);
        }

        out.push('\n');
        out.push_str(body);

        Ok(out.into_bytes())
    }

    /// Strict decode of a canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, JacketError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| JacketError::corrupt("entry record is not valid utf-8"))?;

        let mut rest = text;

        let jacket = ItemHash::parse(field(take_line(&mut rest)?, "jckt")?)?;
        let entry = positive(field(take_line(&mut rest)?, "entr")?, "entr")?;
        let revision = positive(field(take_line(&mut rest)?, "revn")?, "revn")?;
        let history = positive(field(take_line(&mut rest)?, "hist")?, "hist")?;
        let attach_max = limits::parse_num(field(take_line(&mut rest)?, "amax")?)?;

        let time = field(take_line(&mut rest)?, "time")?;
        limits::check_time_str(time).map_err(reject)?;

        let title = field(take_line(&mut rest)?, "titl")?;
        limits::check_title(title).map_err(reject)?;

        let mut tags = BTreeSet::new();
        let mut attachments = BTreeMap::new();
        let mut in_attachments = false;

        loop {
            let line = take_line(&mut rest)?;

            if line.is_empty() {
                break;
            }

            if let Some(tag) = line.strip_prefix("tags ") {
                if in_attachments {
                    return Err(JacketError::corrupt("tag after attachment list"));
                }

                match limits::normalize_tag(tag) {
                    Ok(normal) if normal == tag => {}
                    _ => {
                        return Err(JacketError::corrupt(format!(
                            "tag not in canonical form {tag:?}"
                        )));
                    }
                }

                if let Some(last) = tags.iter().next_back() {
                    if tag <= String::as_str(last) {
                        return Err(JacketError::corrupt("tags out of order"));
                    }
                }

                tags.insert(tag.to_owned());
                continue;
            }

            if let Some(spec) = line.strip_prefix("atch ") {
                in_attachments = true;

                let (num, spec) = spec
                    .split_once(' ')
                    .ok_or_else(|| JacketError::corrupt("malformed attachment line"))?;
                let (hist, name) = spec
                    .split_once(' ')
                    .ok_or_else(|| JacketError::corrupt("malformed attachment line"))?;

                let num = positive(num, "atch")?;
                let hist = positive(hist, "atch")?;
                limits::check_name(name).map_err(reject)?;

                if let Some((last, _)) = attachments.iter().next_back() {
                    if num <= *last {
                        return Err(JacketError::corrupt("attachments out of order"));
                    }
                }

                if num > attach_max {
                    return Err(JacketError::corrupt(
                        "attachment number exceeds recorded maximum",
                    ));
                }

                attachments.insert(
                    num,
                    Attachment {
                        history: hist,
                        name: name.to_owned(),
                    },
                );
                continue;
            }

            return Err(JacketError::corrupt(format!("unexpected line {line:?}")));
        }

        let body = rest;
        limits::check_body(body).map_err(reject)?;

        Ok(Entry {
            jacket: Some(jacket),
            entry: Some(entry),
            revision,
            history: Some(history),
            attach_max,
            time: Some(time.to_owned()),
            title: Some(title.to_owned()),
            body: Some(body.to_owned()),
            loaded_time: Some(time.to_owned()),
            loaded_tags: tags.clone(),
            tags,
            attachments,
            pending: BTreeMap::new(),
            canonical: Some(bytes.to_vec()),
        })
    }
}

pub(crate) fn take_line<'a>(rest: &mut &'a str) -> Result<&'a str, JacketError> {
    match rest.split_once('\n') {
        Some((line, tail)) => {
            *rest = tail;
            Ok(line)
        }
        None => Err(JacketError::corrupt("truncated record")),
    }
}

pub(crate) fn field<'a>(line: &'a str, key: &str) -> Result<&'a str, JacketError> {
    line.strip_prefix(key)
        .and_then(|value| value.strip_prefix(' '))
        .ok_or_else(|| JacketError::corrupt(format!("expected {key} line, got {line:?}")))
}

pub(crate) fn positive(text: &str, key: &str) -> Result<u64, JacketError> {
    let num = limits::parse_num(text)?;

    if num == 0 {
        return Err(JacketError::corrupt(format!("{key} must be positive")));
    }

    Ok(num)
}

// decode failures are always Corrupt, even when a limit check spotted them
fn reject(err: JacketError) -> JacketError {
    JacketError::corrupt(err.to_string())
}
