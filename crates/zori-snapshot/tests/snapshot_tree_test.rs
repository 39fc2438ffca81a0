//! Integration tests: directory walk → trees → snapshot diff
//!
//! Timestamps are pinned after every filesystem change so that tree
//! addresses depend only on names and content.

use proptest::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

use zori_chunks::ChunkSizes;
use zori_core::config::EngineConfig;
use zori_core::{Algorithm, ContentAddress};
use zori_snapshot::{EntryReference, MemoryDocumentStore, SnapshotEngine, Tree, TreeEntry};

const PINNED: u64 = 1_700_000_000;

fn engine() -> SnapshotEngine {
    let cfg = EngineConfig {
        small_file_threshold: 64,
        ..Default::default()
    };
    SnapshotEngine::new(Arc::new(MemoryDocumentStore::new()), &cfg)
        .with_chunk_sizes(ChunkSizes::for_average(1024))
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
    std::fs::write(&path, content).expect("write test file");
}

/// Set every mtime under `root` (not `root` itself), children before parents.
fn pin_mtimes(root: &Path) {
    fn visit(dir: &Path, out: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("dir entry").path();
            let meta = std::fs::symlink_metadata(&path).expect("stat");
            if meta.file_type().is_symlink() {
                continue;
            }
            if meta.is_dir() {
                visit(&path, out);
            }
            out.push(path);
        }
    }
    let mut paths = Vec::new();
    visit(root, &mut paths);
    let when = UNIX_EPOCH + Duration::from_secs(PINNED);
    for path in paths {
        File::open(&path)
            .and_then(|f| f.set_modified(when))
            .expect("set mtime");
    }
}

fn populate(root: &Path) {
    write(root, "README", b"top level notes");
    write(root, "docs/guide.txt", b"how to restore");
    write(root, "docs/deep/nested.txt", b"deeply nested");
    write(root, "src/lib.rs", &vec![b'x'; 4096]);
    pin_mtimes(root);
}

fn snapshot(e: &mut SnapshotEngine, root: &Path) -> ContentAddress {
    e.take_snapshot(root, None).expect("snapshot")
}

fn root_tree(e: &SnapshotEngine, snap: &ContentAddress) -> Tree {
    let s = e.load_snapshot(snap).expect("load snapshot");
    e.load_tree(&s.tree).expect("load tree")
}

fn subtree(e: &SnapshotEngine, tree: &Tree, name: &str) -> (ContentAddress, Tree) {
    match &tree.get(name).expect("entry").reference {
        EntryReference::Tree(addr) => (addr.clone(), e.load_tree(addr).expect("load subtree")),
        other => panic!("{name} is a {}", other.kind()),
    }
}

#[test]
fn identical_directories_share_tree_addresses() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    populate(a.path());
    populate(b.path());

    let mut e = engine();
    let sa = snapshot(&mut e, a.path());
    let sb = snapshot(&mut e, b.path());

    let ta = e.load_snapshot(&sa).unwrap().tree;
    let tb = e.load_snapshot(&sb).unwrap().tree;
    assert_eq!(ta, tb);
    assert_eq!(e.load_snapshot(&sa).unwrap().file_count, 4);
}

#[test]
fn tree_entries_carry_pinned_mod_time() {
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    let mut e = engine();
    let snap = snapshot(&mut e, dir.path());

    let tree = root_tree(&e, &snap);
    let names: Vec<_> = tree.entries().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["README", "docs", "src"]);
    for entry in tree.entries() {
        assert_eq!(entry.mod_time.timestamp(), PINNED as i64, "{}", entry.name);
    }
}

#[test]
fn change_propagates_to_ancestors_only() {
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    let mut e = engine();
    let before = snapshot(&mut e, dir.path());

    write(dir.path(), "docs/deep/nested.txt", b"edited");
    pin_mtimes(dir.path());
    let after = snapshot(&mut e, dir.path());

    let old_root = root_tree(&e, &before);
    let new_root = root_tree(&e, &after);
    assert_ne!(e.load_snapshot(&before).unwrap().tree, e.load_snapshot(&after).unwrap().tree);

    let (old_docs_addr, old_docs) = subtree(&e, &old_root, "docs");
    let (new_docs_addr, new_docs) = subtree(&e, &new_root, "docs");
    assert_ne!(old_docs_addr, new_docs_addr);
    assert_ne!(subtree(&e, &old_docs, "deep").0, subtree(&e, &new_docs, "deep").0);

    // Siblings keep their references.
    assert_eq!(old_docs.get("guide.txt"), new_docs.get("guide.txt"));
    assert_eq!(old_root.get("src"), new_root.get("src"));
    assert_eq!(old_root.get("README"), new_root.get("README"));

    let changes = e.find_changed_files(&before, &after).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes.get(Path::new("docs/deep/nested.txt")),
        Some(&EntryReference::small(b"edited"))
    );
}

#[test]
fn diff_against_self_is_empty() {
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    let mut e = engine();
    let snap = snapshot(&mut e, dir.path());
    assert!(e.find_changed_files(&snap, &snap).unwrap().is_empty());
}

#[test]
fn diff_reports_additions_but_not_deletions() {
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    let mut e = engine();
    let before = snapshot(&mut e, dir.path());

    std::fs::remove_file(dir.path().join("README")).unwrap();
    write(dir.path(), "NEW", b"fresh");
    std::fs::create_dir(dir.path().join("empty")).unwrap();
    pin_mtimes(dir.path());
    let after = snapshot(&mut e, dir.path());

    let changes = e.find_changed_files(&before, &after).unwrap();
    let paths: Vec<_> = changes.keys().cloned().collect();
    assert_eq!(paths, vec![PathBuf::from("NEW"), PathBuf::from("empty")]);
    assert!(changes[Path::new("empty")].is_tree());
}

#[cfg(unix)]
#[test]
fn diff_follows_type_transitions() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    populate(dir.path());
    write(dir.path(), "x", b"plain file");
    write(dir.path(), "y", b"becomes a directory");
    pin_mtimes(dir.path());
    let mut e = engine();
    let s1 = snapshot(&mut e, dir.path());

    // file → symlink, file → directory
    std::fs::remove_file(dir.path().join("x")).unwrap();
    symlink("docs/guide.txt", dir.path().join("x")).unwrap();
    std::fs::remove_file(dir.path().join("y")).unwrap();
    write(dir.path(), "y/a", b"first");
    write(dir.path(), "y/b/c", b"second");
    pin_mtimes(dir.path());
    let s2 = snapshot(&mut e, dir.path());

    let changes = e.find_changed_files(&s1, &s2).unwrap();
    let paths: Vec<_> = changes.keys().cloned().collect();
    assert_eq!(
        paths,
        vec![PathBuf::from("x"), PathBuf::from("y/a"), PathBuf::from("y/b/c")]
    );
    let link = &changes[Path::new("x")];
    assert_eq!(link.kind(), "link");
    assert_eq!(link.decoded_bytes().unwrap().unwrap(), b"docs/guide.txt");

    // symlink → file, directory → file
    std::fs::remove_file(dir.path().join("x")).unwrap();
    write(dir.path(), "x", b"plain again");
    std::fs::remove_dir_all(dir.path().join("y")).unwrap();
    write(dir.path(), "y", b"file again");
    pin_mtimes(dir.path());
    let s3 = snapshot(&mut e, dir.path());

    let changes = e.find_changed_files(&s2, &s3).unwrap();
    let paths: Vec<_> = changes.keys().cloned().collect();
    assert_eq!(paths, vec![PathBuf::from("x"), PathBuf::from("y")]);
    assert_eq!(changes[Path::new("y")], EntryReference::small(b"file again"));
}

#[cfg(unix)]
#[test]
fn unreadable_entries_become_errors_and_walk_continues() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    populate(dir.path());
    write(dir.path(), "locked/secret.txt", b"hidden");
    write(dir.path(), "sealed.txt", b"no read bit");
    pin_mtimes(dir.path());

    let locked = dir.path().join("locked");
    let sealed = dir.path().join("sealed.txt");
    let set_mode = |path: &Path, mode: u32| {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    };
    set_mode(&locked, 0o000);
    set_mode(&sealed, 0o000);

    // Permission bits don't stop a privileged user.
    if std::fs::read_dir(&locked).is_ok() || std::fs::read(&sealed).is_ok() {
        set_mode(&locked, 0o755);
        set_mode(&sealed, 0o644);
        return;
    }

    let mut e = engine();
    let result = e.take_snapshot(dir.path(), None);
    set_mode(&locked, 0o755);
    set_mode(&sealed, 0o644);
    let snap = result.expect("snapshot despite unreadable entries");

    let tree = root_tree(&e, &snap);
    assert_eq!(tree.get("locked").unwrap().reference.kind(), "error");
    assert_eq!(tree.get("sealed.txt").unwrap().reference.kind(), "error");
    assert_eq!(
        tree.get("README").unwrap().reference,
        EntryReference::small(b"top level notes")
    );
    let (_, docs) = subtree(&e, &tree, "docs");
    assert_eq!(docs.get("guide.txt").unwrap().reference, EntryReference::small(b"how to restore"));
    assert_eq!(e.load_snapshot(&snap).unwrap().file_count, 4);
}

#[test]
fn large_files_are_recorded_once() {
    let dir = TempDir::new().unwrap();
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
    write(dir.path(), "one.bin", &body);
    write(dir.path(), "copy/two.bin", &body);
    pin_mtimes(dir.path());

    let docs = Arc::new(MemoryDocumentStore::new());
    let mut e = SnapshotEngine::new(docs.clone(), &EngineConfig::default())
        .with_chunk_sizes(ChunkSizes::for_average(1024));
    let snap = e.take_snapshot(dir.path(), None).unwrap();

    assert_eq!(docs.ids_with_prefix("file/").len(), 1);
    let tree = root_tree(&e, &snap);
    let (_, copy) = subtree(&e, &tree, "copy");
    assert_eq!(tree.get("one.bin").unwrap().reference, copy.get("two.bin").unwrap().reference);
    assert_eq!(
        tree.get("one.bin").unwrap().reference,
        EntryReference::File(zori_chunks::digest(Algorithm::Sha256, &body))
    );
}

#[test]
fn excluded_entries_are_left_out() {
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    write(dir.path(), "scratch.tmp", b"junk");
    write(dir.path(), "docs/draft.tmp", b"junk");
    write(dir.path(), "target/debug/out", b"build output");
    pin_mtimes(dir.path());

    let mut e = engine()
        .with_excludes(&["*.tmp".to_string(), "target".to_string()])
        .unwrap();
    let snap = snapshot(&mut e, dir.path());

    let tree = root_tree(&e, &snap);
    assert!(tree.get("scratch.tmp").is_none());
    assert!(tree.get("target").is_none());
    let (_, docs) = subtree(&e, &tree, "docs");
    assert!(docs.get("draft.tmp").is_none());
    assert!(docs.get("guide.txt").is_some());
}

#[test]
fn snapshot_is_readable_from_json_dir_store() {
    let dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    populate(data.path());

    let docs = Arc::new(zori_snapshot::JsonDirStore::open(&dir.path().join("db")).unwrap());
    let mut e = SnapshotEngine::new(docs, &EngineConfig::default());
    let snap = e.take_snapshot(data.path(), None).unwrap();

    let reopened = Arc::new(zori_snapshot::JsonDirStore::open(&dir.path().join("db")).unwrap());
    let e2 = SnapshotEngine::new(reopened, &EngineConfig::default());
    let tree = root_tree(&e2, &snap);
    assert_eq!(tree.entries().len(), 3);
    assert!(dir
        .path()
        .join("db/snapshot")
        .join(format!("{snap}.json"))
        .is_file());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn tree_address_ignores_insertion_order(
        names in proptest::collection::btree_set("[a-z]{1,8}", 1..12),
        seed in any::<u64>(),
    ) {
        let entries: Vec<TreeEntry> = names
            .iter()
            .map(|n| TreeEntry {
                name: n.clone(),
                mod_time: chrono::DateTime::from_timestamp(PINNED as i64, 0).unwrap(),
                reference: EntryReference::small(n.as_bytes()),
            })
            .collect();
        let mut shuffled = entries.clone();
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();

        let a = Tree::new(entries).address(Algorithm::Sha256).unwrap();
        let b = Tree::new(shuffled).address(Algorithm::Sha256).unwrap();
        prop_assert_eq!(a, b);
    }
}

