//! Tests for SessionRegistry
//!
//! These tests verify:
//! - Unique keys and duplicate rejection
//! - Idempotent removal
//! - Lookup and in-place mutation
//! - Ordered snapshots and draining
//! - Concurrent access from several threads

use std::sync::Arc;
use std::thread;

use netsession::error::NetError;
use netsession::{SessionId, SessionRegistry};

fn id(raw: u64) -> SessionId {
    SessionId::new(raw)
}

// =============================================================================
// Add / Remove Tests
// =============================================================================

#[test]
fn test_registry_starts_empty() {
    let registry: SessionRegistry<String> = SessionRegistry::new();

    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
    assert!(registry.ids().is_empty());
}

#[test]
fn test_registry_add_and_contains() {
    let registry = SessionRegistry::new();

    registry.add(id(1), "first").unwrap();
    registry.add(id(2), "second").unwrap();

    assert!(registry.contains(id(1)));
    assert!(registry.contains(id(2)));
    assert!(!registry.contains(id(3)));
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_registry_rejects_duplicate_id() {
    let registry = SessionRegistry::new();

    registry.add(id(7), "original").unwrap();
    let result = registry.add(id(7), "impostor");

    assert!(matches!(result, Err(NetError::DuplicateSession(dup)) if dup == id(7)));
    assert_eq!(registry.lookup(id(7), |s| *s), Some("original"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_registry_remove_returns_session_once() {
    let registry = SessionRegistry::new();
    registry.add(id(1), 42u32).unwrap();

    assert_eq!(registry.remove(id(1)), Some(42));
    assert_eq!(registry.remove(id(1)), None);
    assert!(registry.is_empty());
}

#[test]
fn test_registry_discard_is_idempotent() {
    let registry = SessionRegistry::new();
    registry.add(id(3), ()).unwrap();

    assert!(registry.discard(id(3)));
    assert!(!registry.discard(id(3)));
    assert!(!registry.discard(id(99)));
}

#[test]
fn test_registry_remove_only_touches_one_entry() {
    let registry = SessionRegistry::new();
    for raw in 1..=5 {
        registry.add(id(raw), raw * 10).unwrap();
    }

    registry.remove(id(3));

    assert_eq!(registry.ids(), vec![id(1), id(2), id(4), id(5)]);
    assert_eq!(registry.lookup(id(4), |v| *v), Some(40));
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_registry_lookup_unknown_id() {
    let registry: SessionRegistry<u8> = SessionRegistry::new();

    assert_eq!(registry.lookup(id(1), |v| *v), None);
}

#[test]
fn test_registry_with_mut_updates_in_place() {
    let registry = SessionRegistry::new();
    registry.add(id(1), vec![1u8]).unwrap();

    let len = registry.with_mut(id(1), |v| {
        v.push(2);
        v.len()
    });

    assert_eq!(len, Some(2));
    assert_eq!(registry.lookup(id(1), |v| v.clone()), Some(vec![1, 2]));
    assert_eq!(registry.with_mut(id(2), |v| v.len()), None);
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_registry_ids_are_sorted() {
    let registry = SessionRegistry::new();
    for raw in [9, 2, 5, 1] {
        registry.add(id(raw), ()).unwrap();
    }

    assert_eq!(registry.ids(), vec![id(1), id(2), id(5), id(9)]);
}

#[test]
fn test_registry_drain_empties_in_order() {
    let registry = SessionRegistry::new();
    for raw in [3, 1, 2] {
        registry.add(id(raw), raw).unwrap();
    }

    let drained = registry.drain();

    assert_eq!(drained, vec![(id(1), 1), (id(2), 2), (id(3), 3)]);
    assert!(registry.is_empty());
    assert!(registry.drain().is_empty());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_registry_concurrent_add_remove() {
    let registry = Arc::new(SessionRegistry::new());
    let threads = 8u64;
    let per_thread = 200u64;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let raw = t * per_thread + i + 1;
                    registry.add(id(raw), raw).unwrap();
                    if i % 2 == 0 {
                        assert!(registry.discard(id(raw)));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len() as u64, threads * per_thread / 2);
    assert!(registry.ids().iter().all(|id| id.get() % 2 == 0));
}

#[test]
fn test_registry_concurrent_single_removal_wins() {
    let registry = Arc::new(SessionRegistry::new());
    registry.add(id(1), "session").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.discard(id(1)))
        })
        .collect();

    let removed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|removed| *removed)
        .count();

    assert_eq!(removed, 1);
}
