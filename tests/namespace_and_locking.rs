//! Cross-module integration coverage for C1/C2/C6's filesystem and
//! OS-resource behavior (§4.1/§4.2/§6), run against the real filesystem
//! and real namespace/lock syscalls rather than mocks.

use std::path::PathBuf;

use tubular::kernel::layout::StateDirLayout;
use tubular::lock::StateDirLock;
use tubular::namespace::NamespaceHandle;

#[test]
fn resolved_namespace_handle_produces_a_layout_whose_root_can_be_created_and_locked() {
    let state_root = tempfile::tempdir().unwrap();
    let ns_file = tempfile::NamedTempFile::new().unwrap();

    let handle = NamespaceHandle::resolve(ns_file.path(), state_root.path()).unwrap();
    let layout = StateDirLayout::new(handle.state_dir());
    std::fs::create_dir_all(&layout.root).unwrap();

    let held = StateDirLock::lock_exclusive(&layout.root).unwrap();
    assert!(StateDirLock::try_lock_exclusive(&layout.root).unwrap().is_none());
    drop(held);
    assert!(StateDirLock::try_lock_exclusive(&layout.root).unwrap().is_some());
}

#[test]
fn two_namespace_handles_for_different_inodes_resolve_to_different_state_dirs() {
    let state_root = tempfile::tempdir().unwrap();
    let a = tempfile::NamedTempFile::new().unwrap();
    let b = tempfile::NamedTempFile::new().unwrap();

    let handle_a = NamespaceHandle::resolve(a.path(), state_root.path()).unwrap();
    let handle_b = NamespaceHandle::resolve(b.path(), state_root.path()).unwrap();

    assert_ne!(handle_a.state_dir(), handle_b.state_dir());
}

#[test]
fn scratch_sibling_sits_next_to_the_real_state_dir_under_the_resolved_root() {
    let state_root = tempfile::tempdir().unwrap();
    let ns_file = tempfile::NamedTempFile::new().unwrap();

    let handle = NamespaceHandle::resolve(ns_file.path(), state_root.path()).unwrap();
    let layout = StateDirLayout::new(handle.state_dir());

    assert_eq!(layout.scratch_sibling().parent(), layout.root.parent());
    assert_ne!(layout.scratch_sibling(), layout.root);
}

#[test]
fn rejects_a_state_root_outside_of_any_real_directory() {
    let ns_file = tempfile::NamedTempFile::new().unwrap();
    let bogus_root = PathBuf::from("/nonexistent/tubular/integration/test/root");
    assert!(NamespaceHandle::resolve(ns_file.path(), &bogus_root).is_err());
}
