//! End-to-end scenarios over the file-system backend.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use sgfa::core::{entry_id, CheckOptions, CopyOptions, ItemHash, JacketError, TAG_ALL};
use sgfa::fs::{FileStore, FsJacket};
use sgfa_testing::{draft, FixedClock, ALICE, BOB, NOON};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn new_jacket(path: &Path, id_text: &str) -> FsJacket {
    init_tracing();
    sgfa::create(path, id_text)
        .unwrap()
        .with_clock(Box::new(FixedClock(NOON.to_owned())))
}

/// Path of an entry blob inside a jacket directory's item store.
fn entry_blob_path(root: &Path, jacket: &FsJacket, entry: u64, revision: u64) -> std::path::PathBuf {
    let hex = entry_id(jacket.id_hash(), entry, revision).to_string();
    root.join("items")
        .join(&hex[..2])
        .join(format!("{}-e", &hex[2..]))
}

fn state_files(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();

    for dirent in fs::read_dir(root.join("state")).unwrap() {
        let dirent = dirent.unwrap();
        let name = dirent.file_name().to_string_lossy().into_owned();
        files.insert(name, fs::read(dirent.path()).unwrap());
    }

    files
}

#[test]
fn create_write_read() {
    let dir = tempfile::tempdir().unwrap();
    let jacket = new_jacket(&dir.path().join("demo"), "demo");

    let mut entries = vec![draft("hello", "world", &["a", "b: c"])];
    let history = jacket.write(ALICE, &mut entries).unwrap();
    assert_eq!(history, 1);

    // identical input yields an identical chain head
    let twin_dir = tempfile::tempdir().unwrap();
    let twin = new_jacket(&twin_dir.path().join("demo"), "demo");
    let mut twin_entries = vec![draft("hello", "world", &["a", "b: c"])];
    twin.write(ALICE, &mut twin_entries).unwrap();

    assert_eq!(
        jacket.read_history(1).unwrap().hash().unwrap(),
        twin.read_history(1).unwrap().hash().unwrap()
    );

    let entry = jacket.read_entry(1, 0).unwrap();
    assert_eq!(entry.title(), Some("hello"));
    assert_eq!(entry.body(), Some("world"));

    let (total, window) = jacket.read_tag(TAG_ALL, 0, 10).unwrap();
    assert_eq!(total, 1);
    assert_eq!(window, vec![(NOON.to_owned(), 1)]);

    let (total, _) = jacket.read_tag("b: c", 0, 10).unwrap();
    assert_eq!(total, 1);
}

#[test]
fn revision_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let jacket = new_jacket(&dir.path().join("demo"), "demo");

    let mut entries = vec![draft("hello", "world", &["a"])];
    jacket.write(ALICE, &mut entries).unwrap();

    let mut first = jacket.read_entry(1, 0).unwrap();
    let mut second = jacket.read_entry(1, 0).unwrap();

    first.set_body("first writer").unwrap();
    jacket.write(ALICE, std::slice::from_mut(&mut first)).unwrap();

    second.set_body("second writer").unwrap();
    let err = jacket
        .write(BOB, std::slice::from_mut(&mut second))
        .unwrap_err();

    assert!(matches!(err, JacketError::Conflict { entry: 1, .. }));

    // the losing write changed nothing
    assert_eq!(jacket.current_history().unwrap(), 2);
    assert_eq!(
        jacket.read_entry(1, 0).unwrap().body(),
        Some("first writer")
    );
}

#[test]
fn tag_move() {
    let dir = tempfile::tempdir().unwrap();
    let jacket = new_jacket(&dir.path().join("demo"), "demo");

    let mut entries = vec![draft("one", "body", &["x"])];
    jacket.write(ALICE, &mut entries).unwrap();

    let mut entry = jacket.read_entry(1, 0).unwrap();
    entry.remove_tag("x").unwrap();
    entry.add_tag("y").unwrap();
    jacket.write(ALICE, std::slice::from_mut(&mut entry)).unwrap();

    assert!(matches!(
        jacket.read_tag("x", 0, 10),
        Err(JacketError::NonExistent(_))
    ));

    let (_, window) = jacket.read_tag("y", 0, 10).unwrap();
    assert_eq!(window.iter().map(|(_, e)| *e).collect::<Vec<_>>(), vec![1]);

    let (total, _) = jacket.read_tag(TAG_ALL, 0, 10).unwrap();
    assert_eq!(total, 1);
}

#[test]
fn chain_validation() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("demo");
    let jacket = new_jacket(&root, "demo");

    let mut first = vec![draft("one", "body", &["a"])];
    jacket.write(ALICE, &mut first).unwrap();

    let mut second = jacket.read_entry(1, 0).unwrap();
    second.set_body("revised").unwrap();
    second.attach("notes.txt", b"attached notes".to_vec()).unwrap();
    jacket.write(ALICE, std::slice::from_mut(&mut second)).unwrap();

    let mut third = vec![draft("two", "body", &["b"])];
    jacket.write(BOB, &mut third).unwrap();

    let opts = CheckOptions {
        max: Some(3),
        hash_entries: true,
        hash_attachments: true,
        ..CheckOptions::default()
    };

    let mut log = Vec::new();
    assert!(jacket.check(&opts, &mut log).unwrap());
    assert!(log.is_empty());

    // corrupt the blob for entry 1 revision 1 on disk
    let blob = entry_blob_path(&root, &jacket, 1, 1);
    fs::write(&blob, b"tampered").unwrap();

    let mut log = Vec::new();
    assert!(!jacket.check(&opts, &mut log).unwrap());
    assert!(log.contains(&"Entry invalid 1-1".to_owned()));
}

#[test]
fn backup_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source_root = dir.path().join("demo");
    let jacket = new_jacket(&source_root, "demo");

    let mut first = vec![draft("one", "body one", &["a"])];
    jacket.write(ALICE, &mut first).unwrap();

    let mut entry = jacket.read_entry(1, 0).unwrap();
    entry.set_body("body one revised").unwrap();
    entry.attach("report.txt", b"report content".to_vec()).unwrap();
    jacket.write(ALICE, std::slice::from_mut(&mut entry)).unwrap();

    let mut second = vec![draft("two", "body two", &["b: c"])];
    jacket.write(BOB, &mut second).unwrap();

    let backup_root = dir.path().join("backup");
    fs::create_dir_all(&backup_root).unwrap();
    let backup = FileStore::new(&backup_root);

    let mut log = Vec::new();
    jacket
        .push(&backup, &CopyOptions::default(), &mut log)
        .unwrap();
    assert!(log.is_empty());

    let restored_root = dir.path().join("restored");
    let restored = new_jacket(&restored_root, "demo");
    restored
        .pull(&backup, &CopyOptions::default(), &mut log)
        .unwrap();
    assert!(log.is_empty());

    assert_eq!(
        restored.current_history().unwrap(),
        jacket.current_history().unwrap()
    );
    assert_eq!(
        fs::read(source_root.join("state").join("_state")).unwrap(),
        fs::read(restored_root.join("state").join("_state")).unwrap()
    );

    for entry_num in 1..=2 {
        let mut wanted = jacket.read_entry(entry_num, 0).unwrap();
        let mut got = restored.read_entry(entry_num, 0).unwrap();
        assert_eq!(got.canonical().unwrap(), wanted.canonical().unwrap());
    }

    let mut handle = restored.read_attach(1, 1, 2).unwrap();
    let mut content = Vec::new();
    handle.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"report content");
}

#[test]
fn state_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("demo");
    let jacket = new_jacket(&root, "demo");

    let mut first = vec![draft("one", "body", &["alpha"])];
    first[0].set_time_str("2026-08-01 09:00:00").unwrap();
    jacket.write(ALICE, &mut first).unwrap();

    let mut second = vec![draft("two", "body", &["beta"])];
    second[0].set_time_str("2026-08-01 10:00:00").unwrap();
    jacket.write(ALICE, &mut second).unwrap();

    let mut revised = jacket.read_entry(1, 0).unwrap();
    revised.set_title("one, revised").unwrap();
    jacket
        .write(ALICE, std::slice::from_mut(&mut revised))
        .unwrap();

    let before = state_files(&root);
    let current = jacket.current_history().unwrap();

    fs::remove_dir_all(root.join("state")).unwrap();
    jacket.rebuild(1, current).unwrap();

    assert_eq!(state_files(&root), before);
}

#[test]
fn attachment_history_of_introduction() {
    let dir = tempfile::tempdir().unwrap();
    let jacket = new_jacket(&dir.path().join("demo"), "demo");

    let mut entry = draft("files", "body", &[]);
    entry.attach("data.bin", b"version one".to_vec()).unwrap();
    jacket.write(ALICE, std::slice::from_mut(&mut entry)).unwrap();

    let mut entry = jacket.read_entry(1, 0).unwrap();
    entry.replace_attach(1, b"version two".to_vec()).unwrap();
    jacket.write(ALICE, std::slice::from_mut(&mut entry)).unwrap();

    let entry = jacket.read_entry(1, 0).unwrap();
    assert_eq!(entry.attachments().get(&1).unwrap().history, 2);

    // the superseded content stays reachable through the chain
    for (history, expected) in [(1u64, b"version one".as_slice()), (2, b"version two")] {
        let mut handle = jacket.read_attach(1, 1, history).unwrap();
        let mut content = Vec::new();
        handle.read_to_end(&mut content).unwrap();
        assert_eq!(content, expected);
    }

    assert_eq!(
        ItemHash::compute(b"version two"),
        jacket.read_history(2).unwrap().attachments()[0].2
    );
}
