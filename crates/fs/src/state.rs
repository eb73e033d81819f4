//! File-backed state index.
//!
//! One directory per jacket:
//!  - `_state`: fixed-width records of 10 bytes (9 zero-padded ASCII digits
//!    plus newline). Record 0 is the current history number; record `e` the
//!    current revision of entry `e`. Zeros mean "absent".
//!  - `_list`: the tag directory, one `<9-digit id> <tag>\n` line per tag.
//!  - one file per tag, named by the 9-digit id, holding 30-byte records
//!    `YYYY-MM-DD HH:MM:SS <9-digit entry>\n` sorted ascending by time.
//!
//! Tag files are replaced whole (temp file + rename), the directory is
//! rewritten once per delta. Records that do not parse at their fixed width
//! are malformed; there is no tolerance for longer lines.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

use sgfa_core::{limits, EntryNum, StateError, StateIndex, TagDelta, TagMove};

const STATE_FILE: &str = "_state";
const LIST_FILE: &str = "_list";

const STATE_RECORD: u64 = 10;
const TAG_RECORD: usize = 30;

#[derive(Debug, Clone)]
pub struct FileState {
    dir: PathBuf,
}

impl FileState {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileState { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn list_path(&self) -> PathBuf {
        self.dir.join(LIST_FILE)
    }

    fn tag_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id:09}"))
    }

    fn read_list(&self) -> Result<Vec<(u64, String)>, StateError> {
        let text = match fs::read_to_string(self.list_path()) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut list = Vec::new();

        for line in text.lines() {
            let (id, tag) = line
                .split_at_checked(limits::NUM_DIGITS)
                .filter(|(id, _)| id.bytes().all(|b| b.is_ascii_digit()))
                .ok_or_else(|| StateError::malformed(format!("tag directory line {line:?}")))?;

            let tag = tag
                .strip_prefix(' ')
                .ok_or_else(|| StateError::malformed(format!("tag directory line {line:?}")))?;

            let id = id
                .parse()
                .map_err(|_| StateError::malformed(format!("tag directory line {line:?}")))?;

            list.push((id, tag.to_owned()));
        }

        Ok(list)
    }

    fn write_list(&self, list: &[(u64, String)]) -> Result<(), StateError> {
        let mut temp = NamedTempFile::new_in(&self.dir)?;

        for (id, tag) in list {
            writeln!(temp, "{id:09} {tag}")?;
        }

        temp.flush()?;
        temp.persist(self.list_path()).map_err(|err| err.error)?;

        Ok(())
    }

    fn read_tag_file(&self, id: u64) -> Result<Vec<(String, EntryNum)>, StateError> {
        let bytes = match fs::read(self.tag_path(id)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        if bytes.len() % TAG_RECORD != 0 {
            return Err(StateError::malformed(format!(
                "tag file {id:09} is not record-aligned"
            )));
        }

        bytes.chunks(TAG_RECORD).map(parse_tag_record).collect()
    }

    fn write_tag_file(&self, id: u64, list: &[(String, EntryNum)]) -> Result<(), StateError> {
        let mut temp = NamedTempFile::new_in(&self.dir)?;

        for (time, entry) in list {
            if *entry > limits::NUM_MAX {
                return Err(StateError::malformed(format!(
                    "entry number {entry} too wide for a tag record"
                )));
            }

            writeln!(temp, "{time} {entry:09}")?;
        }

        temp.flush()?;
        temp.persist(self.tag_path(id)).map_err(|err| err.error)?;

        Ok(())
    }
}

fn parse_tag_record(record: &[u8]) -> Result<(String, EntryNum), StateError> {
    let bad = || StateError::malformed("tag record does not fit the fixed width");

    if record.len() != TAG_RECORD || record[19] != b' ' || record[29] != b'\n' {
        return Err(bad());
    }

    let time = std::str::from_utf8(&record[..19]).map_err(|_| bad())?;
    let entry = std::str::from_utf8(&record[20..29]).map_err(|_| bad())?;

    if !entry.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }

    let entry = entry.parse().map_err(|_| bad())?;

    Ok((time.to_owned(), entry))
}

impl StateIndex for FileState {
    fn current(&self, num: u64) -> Result<u64, StateError> {
        let mut file = match File::open(self.state_path()) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let offset = num * STATE_RECORD;

        if file.metadata()?.len() < offset + STATE_RECORD {
            return Ok(0);
        }

        let mut record = [0u8; STATE_RECORD as usize];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut record)?;

        if record[9] != b'\n' || !record[..9].iter().all(u8::is_ascii_digit) {
            return Err(StateError::malformed(format!("state record {num}")));
        }

        std::str::from_utf8(&record[..9])
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| StateError::malformed(format!("state record {num}")))
    }

    fn set_current(&self, num: u64, value: u64) -> Result<(), StateError> {
        if value > limits::NUM_MAX {
            return Err(StateError::malformed(format!(
                "value {value} too wide for a state record"
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.state_path())?;

        let len = file.metadata()?.len();

        if len % STATE_RECORD != 0 {
            return Err(StateError::malformed("state file is not record-aligned"));
        }

        let offset = num * STATE_RECORD;

        // grow with absent records up to the target slot
        if len < offset {
            file.seek(SeekFrom::End(0))?;
            let gap = (offset - len) / STATE_RECORD;
            let zeros = "000000000\n".repeat(gap as usize);
            file.write_all(zeros.as_bytes())?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(format!("{value:09}\n").as_bytes())?;

        Ok(())
    }

    fn tag_names(&self) -> Result<Vec<String>, StateError> {
        Ok(self.read_list()?.into_iter().map(|(_, tag)| tag).collect())
    }

    fn tag_window(
        &self,
        tag: &str,
        offset: usize,
        max: usize,
    ) -> Result<Option<(usize, Vec<(String, EntryNum)>)>, StateError> {
        let list = self.read_list()?;

        let Some(&(id, _)) = list.iter().find(|(_, name)| name == tag) else {
            return Ok(None);
        };

        let mut file = match File::open(self.tag_path(id)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Some((0, Vec::new()))),
            Err(err) => return Err(err.into()),
        };

        let len = file.metadata()?.len() as usize;

        if len % TAG_RECORD != 0 {
            return Err(StateError::malformed(format!(
                "tag file {id:09} is not record-aligned"
            )));
        }

        let total = len / TAG_RECORD;
        let mut window = Vec::with_capacity(max.min(total));
        let mut record = [0u8; TAG_RECORD];

        // newest-first: walk the sorted file from the end
        for skip in offset..total.min(offset + max) {
            let index = total - 1 - skip;
            file.seek(SeekFrom::Start((index * TAG_RECORD) as u64))?;
            file.read_exact(&mut record)?;
            window.push(parse_tag_record(&record)?);
        }

        Ok(Some((total, window)))
    }

    fn apply_delta(&self, delta: &TagDelta) -> Result<(), StateError> {
        let mut list = self.read_list()?;
        let mut list_changed = false;

        for (tag, moves) in delta.tags() {
            let known = list.iter().find(|(_, name)| name == tag).map(|(id, _)| *id);

            if known.is_none() && moves.values().all(|m| matches!(m, TagMove::Remove)) {
                continue;
            }

            let id = match known {
                Some(id) => id,
                None => {
                    let id = list.iter().map(|(id, _)| *id).max().unwrap_or(0) + 1;
                    list.push((id, tag.to_owned()));
                    list_changed = true;
                    id
                }
            };

            let mut records = self.read_tag_file(id)?;

            for (&entry, tag_move) in moves {
                records.retain(|(_, num)| *num != entry);

                if let TagMove::Insert(time) = tag_move {
                    // ties land after equal times: newer insertions later
                    let at = records.partition_point(|(t, _)| t.as_str() <= time.as_str());
                    records.insert(at, (time.clone(), entry));
                }
            }

            if records.is_empty() {
                match fs::remove_file(self.tag_path(id)) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                list.retain(|(_, name)| name != tag);
                list_changed = true;
            } else {
                self.write_tag_file(id, &records)?;
            }
        }

        if list_changed {
            self.write_list(&list)?;
        }

        Ok(())
    }

    fn reset(&self) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)?;

        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let name = name.to_string_lossy();

            let ours = name == STATE_FILE
                || name == LIST_FILE
                || (name.len() == limits::NUM_DIGITS && name.bytes().all(|b| b.is_ascii_digit()));

            if ours {
                fs::remove_file(dirent.path())?;
            }
        }

        fs::write(self.state_path(), "000000000\n")?;
        fs::write(self.list_path(), "")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgfa_core::TAG_ALL;

    fn scratch() -> (tempfile::TempDir, FileState) {
        let dir = tempfile::tempdir().unwrap();
        let state = FileState::new(dir.path());
        state.reset().unwrap();
        (dir, state)
    }

    #[test]
    fn fresh_state_is_all_zeros() {
        let (_dir, state) = scratch();

        assert_eq!(state.current(0).unwrap(), 0);
        assert_eq!(state.current(42).unwrap(), 0);
        assert!(state.tag_names().unwrap().is_empty());
    }

    #[test]
    fn current_records_are_fixed_width() {
        let (dir, state) = scratch();

        state.set_current(2, 7).unwrap();
        state.set_current(0, 3).unwrap();

        assert_eq!(state.current(0).unwrap(), 3);
        assert_eq!(state.current(1).unwrap(), 0);
        assert_eq!(state.current(2).unwrap(), 7);

        let bytes = fs::read(dir.path().join(STATE_FILE)).unwrap();
        assert_eq!(bytes, b"000000003\n000000000\n000000007\n");
    }

    #[test]
    fn set_current_rejects_wide_values() {
        let (_dir, state) = scratch();

        assert!(state.set_current(1, limits::NUM_MAX).is_ok());
        assert!(state.set_current(1, limits::NUM_MAX + 1).is_err());
    }

    #[test]
    fn delta_application_builds_sorted_tag_files() {
        let (dir, state) = scratch();

        let mut delta = TagDelta::default();
        delta.insert(TAG_ALL, 2, "2026-08-01 13:00:00");
        delta.insert(TAG_ALL, 1, "2026-08-01 12:00:00");
        delta.insert("work", 1, "2026-08-01 12:00:00");
        state.apply_delta(&delta).unwrap();

        assert_eq!(
            state.tag_names().unwrap(),
            vec![TAG_ALL.to_owned(), "work".to_owned()]
        );

        let bytes = fs::read(dir.path().join("000000001")).unwrap();
        assert_eq!(
            bytes,
            b"2026-08-01 12:00:00 000000001\n2026-08-01 13:00:00 000000002\n"
        );

        let list = fs::read_to_string(dir.path().join(LIST_FILE)).unwrap();
        assert_eq!(list, "000000001 _all\n000000002 work\n");
    }

    #[test]
    fn reinsert_moves_an_entry_to_its_new_time() {
        let (_dir, state) = scratch();

        let mut delta = TagDelta::default();
        delta.insert("t", 1, "2026-08-01 12:00:00");
        delta.insert("t", 2, "2026-08-01 12:30:00");
        state.apply_delta(&delta).unwrap();

        let mut delta = TagDelta::default();
        delta.insert("t", 1, "2026-08-01 13:00:00");
        state.apply_delta(&delta).unwrap();

        let (total, window) = state.tag_window("t", 0, 10).unwrap().unwrap();
        assert_eq!(total, 2);
        assert_eq!(
            window,
            vec![
                ("2026-08-01 13:00:00".to_owned(), 1),
                ("2026-08-01 12:30:00".to_owned(), 2),
            ]
        );
    }

    #[test]
    fn emptied_tag_leaves_the_directory() {
        let (dir, state) = scratch();

        let mut delta = TagDelta::default();
        delta.insert("t", 1, "2026-08-01 12:00:00");
        state.apply_delta(&delta).unwrap();

        let mut delta = TagDelta::default();
        delta.remove("t", 1);
        state.apply_delta(&delta).unwrap();

        assert!(state.tag_names().unwrap().is_empty());
        assert!(state.tag_window("t", 0, 10).unwrap().is_none());
        assert!(!dir.path().join("000000001").exists());
    }

    #[test]
    fn removal_of_an_unknown_tag_is_a_no_op() {
        let (_dir, state) = scratch();

        let mut delta = TagDelta::default();
        delta.remove("ghost", 1);
        state.apply_delta(&delta).unwrap();

        assert!(state.tag_names().unwrap().is_empty());
    }

    #[test]
    fn window_respects_offset_and_max() {
        let (_dir, state) = scratch();

        let mut delta = TagDelta::default();
        for entry in 1..=5u64 {
            delta.insert("t", entry, format!("2026-08-01 12:00:0{entry}"));
        }
        state.apply_delta(&delta).unwrap();

        let (total, window) = state.tag_window("t", 1, 2).unwrap().unwrap();
        assert_eq!(total, 5);
        assert_eq!(
            window.iter().map(|(_, e)| *e).collect::<Vec<_>>(),
            vec![4, 3]
        );

        let (_, window) = state.tag_window("t", 4, 2).unwrap().unwrap();
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn misaligned_tag_file_is_malformed() {
        let (dir, state) = scratch();

        let mut delta = TagDelta::default();
        delta.insert("t", 1, "2026-08-01 12:00:00");
        state.apply_delta(&delta).unwrap();

        let path = dir.path().join("000000001");
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(b"oops");
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            state.tag_window("t", 0, 10),
            Err(StateError::Malformed(_))
        ));
    }

    #[test]
    fn reset_returns_to_the_empty_shape() {
        let (dir, state) = scratch();

        state.set_current(1, 1).unwrap();
        let mut delta = TagDelta::default();
        delta.insert("t", 1, "2026-08-01 12:00:00");
        state.apply_delta(&delta).unwrap();

        state.reset().unwrap();

        assert_eq!(state.current(1).unwrap(), 0);
        assert!(state.tag_names().unwrap().is_empty());
        assert_eq!(fs::read(dir.path().join(STATE_FILE)).unwrap(), b"000000000\n");
    }
}
