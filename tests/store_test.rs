//! Capacity and invariant tests for the message store at full scale.

use message_relay::store::{MessageStore, DEFAULT_CAPACITY};
use proptest::prelude::*;

#[test]
fn store_holds_exactly_n_messages_below_capacity() {
    let store = MessageStore::new(DEFAULT_CAPACITY);
    for _ in 0..1000 {
        store.append("Alice", "hello", false);
    }
    let messages = store.list_all(None, None).unwrap();
    assert_eq!(messages.len(), 1000);
    assert_eq!(messages.first().unwrap().id, 1);
    assert_eq!(messages.last().unwrap().id, 1000);
}

#[test]
fn store_evicts_oldest_first_beyond_capacity() {
    let store = MessageStore::new(DEFAULT_CAPACITY);
    for _ in 0..1005 {
        store.append("Alice", "hello", false);
    }
    let messages = store.list_all(None, None).unwrap();
    assert_eq!(messages.len(), 1000);
    // The most recent 1000 survive: ids (N-999)..=N.
    assert_eq!(messages.first().unwrap().id, 6);
    assert_eq!(messages.last().unwrap().id, 1005);
}

#[test]
fn append_returns_the_stored_record() {
    let store = MessageStore::new(4);
    let returned = store.append("Alice", "hello", false);
    let stored = store.list_all(None, None).unwrap().pop().unwrap();
    assert_eq!(returned, stored);
}

proptest! {
    #[test]
    fn len_and_id_invariants_hold(appends in 0usize..200, capacity in 1usize..32) {
        let store = MessageStore::new(capacity);
        for _ in 0..appends {
            store.append("Alice", "hi", false);
        }

        let messages = store.list_all(None, None).unwrap();
        prop_assert_eq!(messages.len(), appends.min(capacity));

        let ids: Vec<u64> = messages.iter().map(|m| m.id).collect();
        for pair in ids.windows(2) {
            prop_assert_eq!(pair[1], pair[0] + 1);
        }
        if let Some(last) = ids.last() {
            prop_assert_eq!(*last, appends as u64);
        }
    }
}
