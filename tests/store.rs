//! Integration tests for stream store behaviour.

use augur::{
    Event, Field, MatchValue, MetadataMatcher, Operator,
    store::{StoreError, Stream, StreamName, StreamStore, inmemory},
};
use serde_json::json;

fn name(s: &str) -> StreamName {
    StreamName::new(s).unwrap()
}

fn event(label: &str) -> Event {
    Event::new(label, json!({}))
}

#[test]
fn appends_read_back_in_write_order_with_gapless_versions() {
    let store = inmemory::Store::new();
    store.create(Stream::new(name("orders"), Vec::new())).unwrap();

    for i in 0..5 {
        store
            .append_to(&name("orders"), vec![event(&format!("e{i}"))], None)
            .unwrap();
    }

    let loaded = store.load(&name("orders"), 1, None, None).unwrap().unwrap();
    let versions: Vec<u64> = loaded.events.iter().map(|e| e.version).collect();
    let labels: Vec<&str> = loaded.events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    assert_eq!(labels, vec!["e0", "e1", "e2", "e3", "e4"]);
}

#[test]
fn append_to_missing_stream_fails_until_created() {
    let store = inmemory::Store::new();

    let result = store.append_to(&name("orders"), vec![event("e")], None);
    assert!(matches!(result, Err(StoreError::StreamNotFound(_))));

    store.create(Stream::new(name("orders"), Vec::new())).unwrap();
    store.append_to(&name("orders"), vec![event("e")], None).unwrap();
}

#[test]
fn racing_appenders_on_one_expected_version_one_wins() {
    let store = inmemory::Store::new();
    store
        .create(Stream::new(name("orders"), vec![event("seed")]))
        .unwrap();

    // Both writers loaded the stream at version 1.
    let first = store.append_to(&name("orders"), vec![event("a")], Some(1));
    let second = store.append_to(&name("orders"), vec![event("b")], Some(1));

    assert!(first.is_ok());
    match second {
        Err(StoreError::Concurrency(conflict)) => {
            assert_eq!(conflict.expected, Some(1));
            assert_eq!(conflict.actual, Some(2));
        }
        other => panic!("expected a conflict, got {other:?}"),
    }

    let loaded = store.load(&name("orders"), 1, None, None).unwrap().unwrap();
    assert_eq!(loaded.events.len(), 2);
    assert_eq!(loaded.events[1].name, "a");
}

#[test]
fn first_writer_race_on_a_fresh_stream() {
    let store = inmemory::Store::new();
    store.create(Stream::new(name("orders"), Vec::new())).unwrap();

    // Both writers saw the stream empty, so both expect version 0.
    store
        .append_to(&name("orders"), vec![event("a")], Some(0))
        .unwrap();
    let second = store.append_to(&name("orders"), vec![event("b")], Some(0));
    match second {
        Err(StoreError::Concurrency(conflict)) => {
            assert_eq!(conflict.expected, Some(0));
            assert_eq!(conflict.actual, Some(1));
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
}

#[test]
fn loser_retries_after_reload() {
    let store = inmemory::Store::new();
    store
        .create(Stream::new(name("orders"), vec![event("seed")]))
        .unwrap();

    store.append_to(&name("orders"), vec![event("a")], Some(1)).unwrap();
    assert!(store.append_to(&name("orders"), vec![event("b")], Some(1)).is_err());

    let current = store
        .load(&name("orders"), 1, None, None)
        .unwrap()
        .unwrap()
        .events
        .last()
        .map(|e| e.version);
    store
        .append_to(&name("orders"), vec![event("b")], current)
        .unwrap();
}

#[test]
fn matcher_narrows_reads_across_properties_and_metadata() {
    let store = inmemory::Store::new();
    let events = vec![
        event("deposit").with_metadata("currency", json!("eur")),
        event("deposit").with_metadata("currency", json!("usd")),
        event("withdrawal").with_metadata("currency", json!("eur")),
        event("deposit").with_metadata("currency", json!("eur")),
    ];
    store.create(Stream::new(name("account-1"), events)).unwrap();

    let matcher = MetadataMatcher::new()
        .and_metadata_eq("currency", json!("eur"))
        .unwrap()
        .and(
            Field::Property(augur::metadata::Property::EventName),
            Operator::Equals,
            MatchValue::Scalar(json!("deposit")),
        )
        .unwrap();

    let loaded = store
        .load(&name("account-1"), 1, None, Some(&matcher))
        .unwrap()
        .unwrap();
    let versions: Vec<u64> = loaded.events.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 4]);
}

#[test]
fn reverse_iteration_yields_newest_first() {
    let store = inmemory::Store::new();
    let events = (0..4).map(|i| event(&format!("e{i}"))).collect();
    store.create(Stream::new(name("orders"), events)).unwrap();

    let versions: Vec<u64> = store
        .load_events_reverse(&name("orders"), u64::MAX, None, None)
        .unwrap()
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, vec![4, 3, 2, 1]);
}

#[test]
fn deleted_stream_is_gone_for_readers_and_writers() {
    let store = inmemory::Store::new();
    store
        .create(Stream::new(name("orders"), vec![event("e")]))
        .unwrap();
    store.delete(&name("orders")).unwrap();

    assert!(!store.has_stream(&name("orders")));
    assert!(store.load(&name("orders"), 1, None, None).unwrap().is_none());
    assert!(matches!(
        store.append_to(&name("orders"), vec![event("e")], None),
        Err(StoreError::StreamNotFound(_))
    ));
}
