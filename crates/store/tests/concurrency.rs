//! Concurrency tests: disjoint batches, SHOW atomicity, frozen snapshots.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pipekvs_store::Kvs;

fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
    list.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_disjoint_batches_run_concurrently() {
    let kvs = Arc::new(Kvs::new());
    let barrier = Arc::new(Barrier::new(2));

    // bucket sets {a,b} and {x,y} never overlap, so neither batch waits
    // on the other's bucket locks
    let left = {
        let kvs = Arc::clone(&kvs);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..200 {
                kvs.write(&pairs(&[("alpha", &i.to_string()), ("bravo", &i.to_string())]))
                    .unwrap();
            }
        })
    };
    let right = {
        let kvs = Arc::clone(&kvs);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..200 {
                kvs.write(&pairs(&[("xray", &i.to_string()), ("yankee", &i.to_string())]))
                    .unwrap();
            }
        })
    };

    left.join().unwrap();
    right.join().unwrap();

    assert_eq!(kvs.get("alpha").unwrap().as_deref(), Some("199"));
    assert_eq!(kvs.get("xray").unwrap().as_deref(), Some("199"));
    assert_eq!(kvs.entry_count(), 4);
}

#[test]
fn test_overlapping_batches_serialize_per_bucket() {
    let kvs = Arc::new(Kvs::new());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let kvs = Arc::clone(&kvs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..100 {
                    // all threads fight over the same two buckets
                    kvs.write(&pairs(&[
                        ("apple", &format!("{t}-{i}")),
                        ("avocado", &format!("{t}-{i}")),
                    ]))
                    .unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // exactly the two keys, with a value some thread wrote last
    assert_eq!(kvs.entry_count(), 2);
    assert!(kvs.get("apple").unwrap().is_some());
}

#[test]
fn test_show_never_observes_partial_state() {
    let kvs = Arc::new(Kvs::new());
    kvs.write(&pairs(&[("stable", "anchor")])).unwrap();

    let writer = {
        let kvs = Arc::clone(&kvs);
        thread::spawn(move || {
            let mut sink = std::io::sink();
            for i in 0..100 {
                kvs.write(&pairs(&[("flicker", &i.to_string())])).unwrap();
                kvs.delete(&["flicker".to_string()], &mut sink).unwrap();
            }
        })
    };

    for _ in 0..50 {
        let mut out = Vec::new();
        kvs.show(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        for line in text.lines() {
            // every emitted line is a complete pair, never a torn record
            assert!(
                line.starts_with('(') && line.ends_with(')') && line.contains(", "),
                "malformed SHOW line: {line:?}"
            );
        }
        assert!(text.contains("(stable, anchor)"));
    }

    writer.join().unwrap();
}

#[test]
fn test_frozen_table_yields_stable_snapshots() {
    let kvs = Arc::new(Kvs::new());
    kvs.write(&pairs(&[("key", "v0")])).unwrap();

    let writer = {
        let kvs = Arc::clone(&kvs);
        thread::spawn(move || {
            for i in 1..=200 {
                kvs.write(&pairs(&[("key", &format!("v{i}"))])).unwrap();
            }
        })
    };

    // let the writer make some progress, then freeze mid-stream
    thread::sleep(Duration::from_millis(5));
    {
        let _frozen = kvs.freeze();
        let mut first = Vec::new();
        kvs.write_snapshot(&mut first).unwrap();
        thread::sleep(Duration::from_millis(5));
        let mut second = Vec::new();
        kvs.write_snapshot(&mut second).unwrap();
        // while frozen nothing can mutate, so two snapshots are identical
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        let key_lines: Vec<_> = text.lines().filter(|l| l.starts_with("(key,")).collect();
        assert_eq!(key_lines.len(), 1, "one line per key, never mid-batch state");
    }

    writer.join().unwrap();
    assert_eq!(kvs.get("key").unwrap().as_deref(), Some("v200"));
}

#[test]
fn test_snapshot_matches_show_taken_under_same_freeze() {
    let kvs = Arc::new(Kvs::new());
    for i in 0..20 {
        kvs.write(&pairs(&[(&format!("k{i}"), &i.to_string())])).unwrap();
    }

    // SHOW and the snapshot emitter produce byte-identical output for the
    // same frozen state
    let mut shown = Vec::new();
    kvs.show(&mut shown).unwrap();
    let _frozen = kvs.freeze();
    let mut snapped = Vec::new();
    kvs.write_snapshot(&mut snapped).unwrap();
    assert_eq!(shown, snapped);
}

#[test]
fn test_concurrent_deletes_tear_down_subscriptions_once() {
    use pipekvs_store::CollectingSink;

    let kvs = Arc::new(Kvs::new());
    kvs.write(&pairs(&[("target", "v")])).unwrap();

    let sid = kvs.sessions().allocate().unwrap();
    let sink = Arc::new(CollectingSink::new());
    kvs.sessions().activate(sid, sink.clone()).unwrap();
    kvs.subscribe(sid, "target").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let kvs = Arc::clone(&kvs);
            thread::spawn(move || {
                let mut sink = std::io::sink();
                kvs.delete(&["target".to_string()], &mut sink).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // exactly one thread won the delete; the rest saw a miss
    assert_eq!(sink.decoded(), vec![("target".to_string(), "DELETED".to_string())]);
    assert_eq!(kvs.sessions().sub_count(sid).unwrap(), 0);
}
