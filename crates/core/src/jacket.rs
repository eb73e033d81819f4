//! The jacket: orchestration of store, state and lock.
//!
//! A jacket value is produced by assembling a verified info blob with the
//! three backend capabilities and is consumed by `close`; there is no
//! half-open mode. Every public operation takes the jacket lock for its
//! duration: shared for reads, exclusive for writes, restore and rebuild.

use std::collections::HashSet;
use std::io;

use tracing::{debug, info, warn};

use crate::{
    item, limits, AttachNum, Clock, Entry, EntryNum, History, HistoryNum, ItemHash, ItemKind,
    ItemStore, JacketError, JacketInfo, JacketLock, Reporter, Revision, StateIndex, StoreError,
    SystemClock, TagDelta, TAG_ALL,
};

/// How many entries a state rebuild folds together before flushing tag
/// moves to the index.
const REBUILD_FLUSH: usize = 250;

/// Parameters for `check`.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// First history number to verify.
    pub min: HistoryNum,
    /// Last history number to verify; `None` walks until the chain runs out.
    pub max: Option<HistoryNum>,
    /// Number of tolerated history gaps before the walk gives up.
    pub miss: u64,
    /// Known-good hash the record at `max` must carry.
    pub max_hash: Option<ItemHash>,
    /// Re-hash every referenced entry blob.
    pub hash_entries: bool,
    /// Re-hash every referenced attachment blob.
    pub hash_attachments: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            min: 1,
            max: None,
            miss: 0,
            max_hash: None,
            hash_entries: false,
            hash_attachments: false,
        }
    }
}

/// Parameters for `push` and `pull`.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub min: HistoryNum,
    /// `None`: push copies up to the current history, pull walks until the
    /// source runs out.
    pub max: Option<HistoryNum>,
    /// Probe the receiving side and skip blobs already present.
    pub stat: bool,
    pub skip_history: bool,
    pub skip_entries: bool,
    pub skip_attachments: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            min: 1,
            max: None,
            stat: true,
            skip_history: false,
            skip_entries: false,
            skip_attachments: false,
        }
    }
}

pub struct Jacket<S, X, L>
where
    S: ItemStore,
    X: StateIndex,
    L: JacketLock,
{
    info: JacketInfo,
    id: ItemHash,
    store: S,
    state: X,
    lock: L,
    clock: Box<dyn Clock>,
}

impl<S, X, L> Jacket<S, X, L>
where
    S: ItemStore,
    X: StateIndex,
    L: JacketLock,
{
    /// Assemble an open jacket from a verified info blob and its backends.
    pub fn assemble(info: JacketInfo, store: S, state: X, lock: L) -> Result<Self, JacketError> {
        info.verify()?;
        let id = info.hash()?;

        Ok(Jacket {
            info,
            id,
            store,
            state,
            lock,
            clock: Box::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Consume the jacket. Backends release with it; a closed jacket has no
    /// surface.
    pub fn close(self) {}

    pub fn id_text(&self) -> &str {
        &self.info.id_text
    }

    pub fn id_hash(&self) -> &ItemHash {
        &self.id
    }

    pub fn info(&self) -> &JacketInfo {
        &self.info
    }

    /// The jacket's own store, usable as the counterparty of another
    /// jacket's `push` or `pull`.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn current_history(&self) -> Result<HistoryNum, JacketError> {
        let _guard = self.lock.shared()?;
        Ok(self.state.current(0)?)
    }

    // ------------------------------------------------------------------
    // write

    /// Record a set of drafts as the next history.
    ///
    /// Fails `Conflict` without touching anything when any draft's revision
    /// is not exactly one past the entry's current revision. On success the
    /// drafts are finalized in place and the new history number returned.
    pub fn write(&self, user: &str, entries: &mut [Entry]) -> Result<HistoryNum, JacketError> {
        if entries.is_empty() {
            return Err(JacketError::sanity("nothing to write"));
        }

        limits::check_user(user)?;

        let _guard = self.lock.exclusive()?;
        self.write_locked(user, entries)
    }

    fn write_locked(&self, user: &str, entries: &mut [Entry]) -> Result<HistoryNum, JacketError> {
        // conflict check first; nothing may mutate before it passes
        for entry in entries.iter() {
            if !entry.is_draft() {
                return Err(JacketError::sanity("entry has no changes"));
            }

            if let Some(num) = entry.entry() {
                let current = self.state.current(num)?;
                if entry.revision() != current + 1 {
                    return Err(JacketError::Conflict {
                        entry: num,
                        given: entry.revision(),
                        current,
                    });
                }
            }
        }

        let now = self.clock.now_str();
        let current = self.state.current(0)?;

        let (mut history, outcome) = if current == 0 {
            let mut first = History::with_jacket(self.id);
            let outcome = first.process(1, ItemHash::zero(), 0, user, entries, &now)?;
            (first, outcome)
        } else {
            let bytes = self
                .store
                .read_bytes(ItemKind::History, &item::history_id(&self.id, current))?
                .ok_or_else(|| {
                    JacketError::corrupt(format!("state references missing history {current}"))
                })?;
            let mut prior = History::decode(&bytes)?;
            prior.next(user, entries, &now)?
        };

        let number = history.number();

        // entry blobs, each followed by its state row
        for entry in entries.iter_mut() {
            let num = entry
                .entry()
                .ok_or_else(|| JacketError::sanity("entry number missing after process"))?;

            if num > limits::NUM_MAX {
                return Err(JacketError::limits(
                    "entry",
                    format!("number {num} out of range"),
                ));
            }

            let id = item::entry_id(&self.id, num, entry.revision());
            let bytes = entry.canonical()?.to_vec();
            self.store.write_bytes(ItemKind::Entry, &id, &bytes)?;
            self.state.set_current(num, entry.revision())?;
        }

        for (entry, attach, blob, _) in &outcome.files {
            let id = item::attach_id(&self.id, *entry, *attach, number);
            self.store.write_bytes(ItemKind::File, &id, blob)?;
        }

        self.state.apply_delta(&outcome.delta)?;

        let bytes = history.canonical()?.to_vec();
        self.store
            .write_bytes(ItemKind::History, &item::history_id(&self.id, number), &bytes)?;

        // the commit point for readers
        self.state.set_current(0, number)?;

        info!(history = number, entries = entries.len(), "write committed");

        Ok(number)
    }

    // ------------------------------------------------------------------
    // read

    /// Read an entry. Revision 0 selects the current revision.
    pub fn read_entry(&self, entry: EntryNum, revision: Revision) -> Result<Entry, JacketError> {
        let _guard = self.lock.shared()?;
        self.read_entry_locked(entry, revision)
    }

    fn read_entry_locked(&self, entry: EntryNum, revision: Revision) -> Result<Entry, JacketError> {
        if entry == 0 {
            return Err(JacketError::sanity("entry number must be positive"));
        }

        let (revision, at_current) = if revision == 0 {
            let current = self.state.current(entry)?;
            if current == 0 {
                return Err(JacketError::nonexistent(format!("entry {entry}")));
            }
            (current, true)
        } else {
            (revision, false)
        };

        let id = item::entry_id(&self.id, entry, revision);

        match self.store.read_bytes(ItemKind::Entry, &id)? {
            Some(bytes) => Entry::decode(&bytes),
            None if at_current => Err(JacketError::corrupt(format!(
                "state references missing entry {entry}-{revision}"
            ))),
            None => Err(JacketError::nonexistent(format!(
                "entry {entry}-{revision}"
            ))),
        }
    }

    /// Read a history record. Number 0 selects the current one.
    pub fn read_history(&self, history: HistoryNum) -> Result<History, JacketError> {
        let _guard = self.lock.shared()?;

        let (history, at_current) = if history == 0 {
            let current = self.state.current(0)?;
            if current == 0 {
                return Err(JacketError::nonexistent("jacket is empty"));
            }
            (current, true)
        } else {
            (history, false)
        };

        let id = item::history_id(&self.id, history);

        match self.store.read_bytes(ItemKind::History, &id)? {
            Some(bytes) => History::decode(&bytes),
            None if at_current => Err(JacketError::corrupt(format!(
                "state references missing history {history}"
            ))),
            None => Err(JacketError::nonexistent(format!("history {history}"))),
        }
    }

    /// Read an attachment as a stream. The caller releases the handle by
    /// dropping it; content is never cached.
    pub fn read_attach(
        &self,
        entry: EntryNum,
        attach: AttachNum,
        history: HistoryNum,
    ) -> Result<S::Read, JacketError> {
        let _guard = self.lock.shared()?;

        if entry == 0 || attach == 0 || history == 0 {
            return Err(JacketError::sanity("attachment coordinates must be positive"));
        }

        let id = item::attach_id(&self.id, entry, attach, history);

        self.store
            .read(ItemKind::File, &id)?
            .ok_or_else(|| JacketError::nonexistent(format!("attachment {entry}-{attach}-{history}")))
    }

    /// Newest-first window over a tag: total list size plus up to `max`
    /// pairs after skipping `offset`.
    pub fn read_tag(
        &self,
        tag: &str,
        offset: usize,
        max: usize,
    ) -> Result<(usize, Vec<(String, EntryNum)>), JacketError> {
        let _guard = self.lock.shared()?;

        self.state
            .tag_window(tag, offset, max)?
            .ok_or_else(|| JacketError::nonexistent(format!("tag {tag}")))
    }

    /// Enumerate the tag directory.
    pub fn read_list(&self) -> Result<Vec<String>, JacketError> {
        let _guard = self.lock.shared()?;
        Ok(self.state.tag_names()?)
    }

    // ------------------------------------------------------------------
    // validate

    /// Walk the history chain, verifying linkage and optionally re-hashing
    /// referenced blobs. Findings go to `report`.
    ///
    /// Returns true iff no errors were found and, when `max` was given, the
    /// walk actually reached it.
    pub fn check(&self, opts: &CheckOptions, report: &mut dyn Reporter) -> Result<bool, JacketError> {
        let _guard = self.lock.shared()?;
        self.check_locked(opts, report)
    }

    fn check_locked(
        &self,
        opts: &CheckOptions,
        report: &mut dyn Reporter,
    ) -> Result<bool, JacketError> {
        if opts.min == 0 {
            return Err(JacketError::sanity("history numbers start at 1"));
        }

        let mut ok = true;
        let mut missed = 0u64;
        let mut reached_max = false;
        // last fetched record, for linkage verification
        let mut prev: Option<(HistoryNum, ItemHash)> = None;
        let mut last_present: Option<HistoryNum> = None;

        let mut number = opts.min;

        loop {
            if let Some(max) = opts.max {
                if number > max {
                    break;
                }
            }

            let id = item::history_id(&self.id, number);
            let bytes = match self.store.read_bytes(ItemKind::History, &id)? {
                Some(bytes) => bytes,
                None => {
                    missed += 1;

                    if missed > opts.miss {
                        if let Some(last) = last_present {
                            report.note(&format!("Valid extent {}-{last}", opts.min));
                        }
                        break;
                    }

                    report.note(&format!("History missing {number}"));
                    prev = None;
                    number += 1;
                    continue;
                }
            };

            last_present = Some(number);

            let history = match History::decode(&bytes) {
                Ok(history) => history,
                Err(err) => {
                    debug!(history = number, %err, "history record failed to decode");
                    report.note(&format!("History corrupt {number}"));
                    ok = false;
                    prev = None;
                    number += 1;
                    continue;
                }
            };

            match prev {
                Some((prev_number, prev_hash)) if prev_number + 1 == number => {
                    if history.previous() != &prev_hash {
                        report.note(&format!("History invalid {number}"));
                        ok = false;
                    }
                }
                // across a tolerated gap the linkage is unverifiable
                Some(_) => {}
                None => {
                    if number == 1 && !history.previous().is_zero() {
                        report.note("History invalid 1");
                        ok = false;
                    }
                }
            }

            let hash = ItemHash::compute(&bytes);
            prev = Some((number, hash));

            if opts.hash_entries {
                for &(entry, revision, recorded) in history.entries() {
                    let id = item::entry_id(&self.id, entry, revision);
                    match self.store.read_bytes(ItemKind::Entry, &id)? {
                        Some(bytes) => {
                            if ItemHash::compute(&bytes) != recorded {
                                report.note(&format!("Entry invalid {entry}-{revision}"));
                                ok = false;
                            }
                        }
                        None => report.note(&format!("Entry missing {entry}-{revision}")),
                    }
                }
            }

            if opts.hash_attachments {
                for &(entry, attach, recorded) in history.attachments() {
                    let id = item::attach_id(&self.id, entry, attach, number);
                    match self.store.read(ItemKind::File, &id)? {
                        Some(mut handle) => {
                            let streamed = ItemHash::digest_reader(&mut handle)
                                .map_err(StoreError::from)?;
                            if streamed != recorded {
                                report.note(&format!(
                                    "Attachment invalid {entry}-{attach}-{number}"
                                ));
                                ok = false;
                            }
                        }
                        None => report.note(&format!(
                            "Attachment missing {entry}-{attach}-{number}"
                        )),
                    }
                }
            }

            if opts.max == Some(number) {
                reached_max = true;

                if let Some(expected) = &opts.max_hash {
                    if hash != *expected {
                        report.note(&format!("Final hash mismatch {number}"));
                        ok = false;
                    }
                }
            }

            number += 1;
        }

        Ok(ok && (opts.max.is_none() || reached_max))
    }

    // ------------------------------------------------------------------
    // backup

    /// Copy a history range with everything it references into another
    /// store. Never deletes from the destination; ascending order keeps the
    /// destination consistent with some prefix of the chain.
    pub fn push<D: ItemStore>(
        &self,
        dest: &D,
        opts: &CopyOptions,
        report: &mut dyn Reporter,
    ) -> Result<(), JacketError> {
        if opts.min == 0 {
            return Err(JacketError::sanity("history numbers start at 1"));
        }

        let _guard = self.lock.shared()?;

        let max = match opts.max {
            Some(max) => max,
            None => self.state.current(0)?,
        };

        for number in opts.min..=max {
            let id = item::history_id(&self.id, number);

            let bytes = match self.store.read_bytes(ItemKind::History, &id)? {
                Some(bytes) => bytes,
                None => {
                    report.note(&format!("History missing {number}"));
                    continue;
                }
            };

            if !opts.skip_history && !(opts.stat && dest.contains(ItemKind::History, &id)?) {
                dest.write_bytes(ItemKind::History, &id, &bytes)?;
            }

            let history = match History::decode(&bytes) {
                Ok(history) => history,
                Err(_) => {
                    report.note(&format!("History corrupt {number}"));
                    continue;
                }
            };

            if !opts.skip_entries {
                for &(entry, revision, _) in history.entries() {
                    let id = item::entry_id(&self.id, entry, revision);

                    if opts.stat && dest.contains(ItemKind::Entry, &id)? {
                        continue;
                    }

                    match self.store.read_bytes(ItemKind::Entry, &id)? {
                        Some(bytes) => dest.write_bytes(ItemKind::Entry, &id, &bytes)?,
                        None => report.note(&format!("Entry missing {entry}-{revision}")),
                    }
                }
            }

            if !opts.skip_attachments {
                for &(entry, attach, _) in history.attachments() {
                    let id = item::attach_id(&self.id, entry, attach, number);

                    if opts.stat && dest.contains(ItemKind::File, &id)? {
                        continue;
                    }

                    match self.store.read(ItemKind::File, &id)? {
                        Some(mut handle) => copy_item(&mut handle, dest, ItemKind::File, &id)?,
                        None => report.note(&format!(
                            "Attachment missing {entry}-{attach}-{number}"
                        )),
                    }
                }
            }

            debug!(history = number, "pushed history");
        }

        Ok(())
    }

    /// Fetch a history range with everything it references from a backup
    /// store, then rebuild the state index over the restored range.
    ///
    /// Holds the exclusive lock for the whole restore, rebuild included.
    pub fn pull<D: ItemStore>(
        &self,
        source: &D,
        opts: &CopyOptions,
        report: &mut dyn Reporter,
    ) -> Result<(), JacketError> {
        if opts.min == 0 {
            return Err(JacketError::sanity("history numbers start at 1"));
        }

        let _guard = self.lock.exclusive()?;

        let mut restored = 0;
        let mut number = opts.min;

        loop {
            if let Some(max) = opts.max {
                if number > max {
                    break;
                }
            }

            let id = item::history_id(&self.id, number);

            if opts.stat && self.store.contains(ItemKind::History, &id)? {
                restored = number;
                number += 1;
                continue;
            }

            let bytes = match source.read_bytes(ItemKind::History, &id)? {
                Some(bytes) => bytes,
                None => {
                    if opts.max.is_none() {
                        break;
                    }
                    report.note(&format!("History missing {number}"));
                    number += 1;
                    continue;
                }
            };

            if !opts.skip_history {
                self.store.write_bytes(ItemKind::History, &id, &bytes)?;
            }

            let history = match History::decode(&bytes) {
                Ok(history) => history,
                Err(_) => {
                    report.note(&format!("History corrupt {number}"));
                    number += 1;
                    continue;
                }
            };

            if !opts.skip_entries {
                for &(entry, revision, _) in history.entries() {
                    let id = item::entry_id(&self.id, entry, revision);

                    if opts.stat && self.store.contains(ItemKind::Entry, &id)? {
                        continue;
                    }

                    match source.read_bytes(ItemKind::Entry, &id)? {
                        Some(bytes) => self.store.write_bytes(ItemKind::Entry, &id, &bytes)?,
                        None => report.note(&format!("Entry missing {entry}-{revision}")),
                    }
                }
            }

            if !opts.skip_attachments {
                for &(entry, attach, _) in history.attachments() {
                    let id = item::attach_id(&self.id, entry, attach, number);

                    if opts.stat && self.store.contains(ItemKind::File, &id)? {
                        continue;
                    }

                    match source.read(ItemKind::File, &id)? {
                        Some(mut handle) => {
                            copy_item(&mut handle, &self.store, ItemKind::File, &id)?
                        }
                        None => report.note(&format!(
                            "Attachment missing {entry}-{attach}-{number}"
                        )),
                    }
                }
            }

            restored = number;
            number += 1;
        }

        if opts.min == 1 {
            self.state.reset()?;
        }

        if restored >= opts.min {
            self.rebuild_locked(opts.min, restored)?;
        }

        info!(min = opts.min, max = restored, "restore finished");

        Ok(())
    }

    // ------------------------------------------------------------------
    // state rebuild

    /// Re-derive the state index from the history chain over `[min, max]`.
    ///
    /// The sole recovery mechanism after restore or corruption. A rebuild
    /// from 1 resets the index first.
    pub fn rebuild(&self, min: HistoryNum, max: HistoryNum) -> Result<(), JacketError> {
        let _guard = self.lock.exclusive()?;

        if min == 1 {
            self.state.reset()?;
        }

        self.rebuild_locked(min, max)
    }

    fn rebuild_locked(&self, min: HistoryNum, max: HistoryNum) -> Result<(), JacketError> {
        if min == 0 || max < min {
            return Err(JacketError::sanity("invalid history range"));
        }

        let mut seen: HashSet<EntryNum> = HashSet::new();
        let mut delta = TagDelta::default();
        let mut pending = 0usize;
        let mut newest: Option<HistoryNum> = None;

        // walk downward: the first sighting of an entry is its current
        // revision
        for number in (min..=max).rev() {
            let id = item::history_id(&self.id, number);
            let bytes = match self.store.read_bytes(ItemKind::History, &id)? {
                Some(bytes) => bytes,
                None => {
                    warn!(history = number, "history missing during state rebuild");
                    continue;
                }
            };

            let history = History::decode(&bytes)?;

            if newest.is_none() {
                newest = Some(number);
            }

            for &(num, revision, _) in history.entries() {
                if !seen.insert(num) {
                    continue;
                }

                let old = self.state.current(num)?;

                let bytes = self
                    .store
                    .read_bytes(ItemKind::Entry, &item::entry_id(&self.id, num, revision))?
                    .ok_or_else(|| {
                        JacketError::corrupt(format!(
                            "entry {num}-{revision} missing during rebuild"
                        ))
                    })?;
                let entry = Entry::decode(&bytes)?;

                let time = entry
                    .time_str()
                    .ok_or_else(|| JacketError::corrupt("decoded entry has no time"))?
                    .to_owned();

                for tag in entry.tags() {
                    delta.insert(tag.clone(), num, time.clone());
                }
                delta.insert(TAG_ALL, num, time.clone());

                // a partial rebuild may leave stale lines from the state's
                // old view of this entry
                if min > 1 && old > 0 && old != revision {
                    let id = item::entry_id(&self.id, num, old);
                    if let Some(bytes) = self.store.read_bytes(ItemKind::Entry, &id)? {
                        let prior = Entry::decode(&bytes)?;
                        for tag in prior.tags() {
                            if !entry.tags().contains(tag) {
                                delta.remove(tag.clone(), num);
                            }
                        }
                    }
                }

                self.state.set_current(num, revision)?;
                pending += 1;

                if pending >= REBUILD_FLUSH {
                    self.state.apply_delta(&delta)?;
                    delta = TagDelta::default();
                    pending = 0;
                }
            }
        }

        if !delta.is_empty() {
            self.state.apply_delta(&delta)?;
        }

        if let Some(newest) = newest {
            self.state.set_current(0, newest)?;
        }

        info!(min, max, "state rebuilt");

        Ok(())
    }
}

fn copy_item<D: ItemStore>(
    handle: &mut impl io::Read,
    dest: &D,
    kind: ItemKind,
    id: &ItemHash,
) -> Result<(), JacketError> {
    let mut temp = dest.temp()?;
    io::copy(handle, &mut temp).map_err(StoreError::from)?;
    dest.write(kind, id, temp)?;
    Ok(())
}
