//! Registry invariants: capacity, ordering, removal indices, neighbor math

use muxd::launcher::LaunchSpec;
use muxd::registry::{Direction, RegistryError, SessionRegistry};
use muxd::session::{Session, SessionEvent};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedSender;

fn events() -> UnboundedSender<SessionEvent> {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    tx
}

/// A session running `cat`, which stays alive until its pty closes.
fn cat_session(cwd: &Path, events: &UnboundedSender<SessionEvent>) -> Session {
    let spec = LaunchSpec {
        executable: PathBuf::from("/bin/cat"),
        args: Vec::new(),
        cwd: cwd.to_path_buf(),
        env: Vec::new(),
        display_name: "cat".to_string(),
    };
    Session::spawn(&spec, 24, 80, events.clone()).expect("cat should spawn")
}

#[test]
fn test_add_preserves_creation_order_and_identity() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(8);

    let a = cat_session(tmp.path(), &tx);
    let b = cat_session(tmp.path(), &tx);
    let c = cat_session(tmp.path(), &tx);

    assert_eq!(registry.add(a.clone()).expect("add a"), 0);
    assert_eq!(registry.add(b.clone()).expect("add b"), 1);
    assert_eq!(registry.add(c.clone()).expect("add c"), 2);

    let ids: Vec<_> = registry.sessions().iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec![a.id(), b.id(), c.id()], "insertion order is creation order");
    assert_ne!(a.id(), b.id(), "identities are distinct");
    assert_ne!(b.id(), c.id(), "identities are distinct");

    assert_eq!(registry.index_of(b.id()), Some(1));
    assert_eq!(registry.get(2).map(|s| s.id()), Some(c.id()));
    assert!(a.pid() != 0 && a.started_at() <= chrono::Utc::now());
}

#[test]
fn test_capacity_is_a_rejected_operation_not_an_error_state() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(3);

    for _ in 0..3 {
        registry.add(cat_session(tmp.path(), &tx)).expect("within capacity");
    }

    let overflow = cat_session(tmp.path(), &tx);
    let err = registry.add(overflow).expect_err("registry is full");
    assert_eq!(err, RegistryError::CapacityExceeded { max: 3 });
    assert_eq!(registry.len(), 3, "rejected add leaves the registry untouched");

    // Capacity frees up again after removal.
    let first = registry.get(0).map(|s| s.id()).expect("first session");
    registry.remove(first).expect("remove first");
    registry
        .add(cat_session(tmp.path(), &tx))
        .expect("capacity available again");
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_size_stays_bounded_over_mixed_add_remove_sequences() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(4);

    for round in 0..3 {
        while registry.len() < registry.max_sessions() {
            registry.add(cat_session(tmp.path(), &tx)).expect("add");
            assert!(registry.len() <= registry.max_sessions());
        }
        assert!(registry.add(cat_session(tmp.path(), &tx)).is_err());

        let drop_count = 2 + round % 2;
        for _ in 0..drop_count {
            let id = registry.get(0).map(|s| s.id()).expect("non-empty");
            registry.remove(id).expect("remove");
        }
        assert!(registry.len() <= registry.max_sessions());
    }

    while let Some(id) = registry.get(0).map(|s| s.id()) {
        registry.remove(id).expect("remove");
    }
    assert!(registry.is_empty());
    assert_eq!(registry.remove(cat_session(tmp.path(), &tx).id()), Err(RegistryError::NotFound));
}

#[test]
fn test_remove_returns_occupied_index() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(8);

    let a = cat_session(tmp.path(), &tx);
    let b = cat_session(tmp.path(), &tx);
    let c = cat_session(tmp.path(), &tx);
    registry.add(a.clone()).expect("add");
    registry.add(b.clone()).expect("add");
    registry.add(c.clone()).expect("add");

    let (index, removed) = registry.remove(b.id()).expect("remove b");
    assert_eq!(index, 1);
    assert_eq!(removed, b);

    // c slid down into b's slot.
    assert_eq!(registry.index_of(c.id()), Some(1));
    assert_eq!(registry.remove(b.id()), Err(RegistryError::NotFound), "second removal is NotFound");
}

#[test]
fn test_neighbor_wraps_modulo_length() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(8);

    let a = cat_session(tmp.path(), &tx);
    let b = cat_session(tmp.path(), &tx);
    let c = cat_session(tmp.path(), &tx);
    registry.add(a.clone()).expect("add");
    registry.add(b.clone()).expect("add");
    registry.add(c.clone()).expect("add");

    assert_eq!(registry.neighbor(a.id(), Direction::Forward).expect("fwd"), b);
    assert_eq!(registry.neighbor(c.id(), Direction::Forward).expect("fwd wraps"), a);
    assert_eq!(registry.neighbor(a.id(), Direction::Backward).expect("back wraps"), c);
    assert_eq!(registry.neighbor(b.id(), Direction::Backward).expect("back"), a);
}

#[test]
fn test_neighbor_of_single_session_is_itself() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(8);

    let only = cat_session(tmp.path(), &tx);
    registry.add(only.clone()).expect("add");

    assert_eq!(registry.neighbor(only.id(), Direction::Forward).expect("fwd"), only);
    assert_eq!(registry.neighbor(only.id(), Direction::Backward).expect("back"), only);
}

#[test]
fn test_neighbor_fails_loudly_on_empty_registry() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(8);

    let orphan = cat_session(tmp.path(), &tx);
    assert_eq!(
        registry.neighbor(orphan.id(), Direction::Forward),
        Err(RegistryError::Empty)
    );
}

#[test]
fn test_neighbor_anchors_before_first_slot_for_absent_current() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(8);

    let a = cat_session(tmp.path(), &tx);
    let b = cat_session(tmp.path(), &tx);
    registry.add(a.clone()).expect("add");
    registry.add(b.clone()).expect("add");

    let gone = cat_session(tmp.path(), &tx);
    assert_eq!(registry.neighbor(gone.id(), Direction::Forward).expect("fwd"), a);
    assert_eq!(registry.neighbor(gone.id(), Direction::Backward).expect("back"), b);
}

#[test]
fn test_sessions_snapshot_is_independent_of_later_mutation() {
    let tmp = TempDir::new().expect("tempdir");
    let tx = events();
    let mut registry = SessionRegistry::new(8);

    registry.add(cat_session(tmp.path(), &tx)).expect("add");
    let snapshot = registry.sessions();
    registry.add(cat_session(tmp.path(), &tx)).expect("add");

    assert_eq!(snapshot.len(), 1);
    assert_eq!(registry.len(), 2);
}
