//! End-to-end scenarios exercised through the public API.

use omvec::{IndexError, IndexOptions, VectorIndex};

#[test]
fn scenario_tiny_exact_retrieval() {
    // D=4, L2, default params.
    let mut index = VectorIndex::new();
    index.add("a", &[1.0, 0.0, 0.0, 0.0], None).unwrap();
    index.add("b", &[0.0, 1.0, 0.0, 0.0], None).unwrap();
    index.add("c", &[0.707, 0.707, 0.0, 0.0], None).unwrap();

    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 3, None).unwrap();
    assert_eq!(hits.len(), 3);

    // Strict relative ordering: a, then c, then b.
    assert_eq!(hits[0].id, "a");
    assert_eq!(hits[1].id, "c");
    assert_eq!(hits[2].id, "b");

    // Squared-L2 against the unit query: 0, (1-0.707)^2 + 0.707^2, 2.
    assert!(hits[0].distance <= 0.01);
    assert!((hits[1].distance - 0.5857).abs() < 0.01);
    assert!((hits[2].distance - 2.0).abs() < 0.01);
}

#[test]
fn scenario_duplicate_rejection_and_upsert() {
    // D=2.
    let mut index = VectorIndex::new();
    index.add("v", &[1.0, 2.0], None).unwrap();

    let err = index.add("v", &[3.0, 4.0], None).unwrap_err();
    assert!(matches!(err, IndexError::DuplicateId(id) if id == "v"));

    assert!(!index.upsert("v", &[3.0, 4.0], None).unwrap());
    assert_eq!(index.get("v").unwrap().0, vec![3.0, 4.0]);
}

#[test]
fn scenario_buffer_flush_boundary() {
    // D=8, buffer_capacity=10.
    let mut index = VectorIndex::with_options(IndexOptions {
        buffer_capacity: 10,
        ..IndexOptions::default()
    })
    .unwrap();

    for i in 0..10 {
        index.add(format!("v{i}"), &[i as f32; 8], None).unwrap();
    }
    let stats = index.stats();
    assert_eq!(index.count(), 10);
    assert_eq!(stats.buffer_len, 10);
    assert_eq!(stats.graph_nodes, 0);

    // The 11th insert flushes the full buffer first, then stages itself.
    index.add("v10", &[10.0; 8], None).unwrap();
    let stats = index.stats();
    assert_eq!(index.count(), 11);
    assert_eq!(stats.buffer_len, 1);
    assert_eq!(stats.graph_nodes, 10);

    // All 11 ids are findable by self-retrieval.
    for i in 0..11 {
        let hits = index.search(&[i as f32; 8], 1, None).unwrap();
        assert_eq!(hits[0].id, format!("v{i}"));
    }
}

#[test]
fn scenario_persistence_round_trip() {
    // D=3, deterministic seed, 100 vectors.
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("ix");

    let options = IndexOptions {
        seed: 42,
        persistence_path: Some(base.clone()),
        ..IndexOptions::default()
    };

    let mut index = VectorIndex::with_options(options.clone()).unwrap();
    for i in 0..100 {
        let v = [i as f32, (i % 7) as f32, (i % 13) as f32];
        index.add(format!("v{i}"), &v, None).unwrap();
    }
    index.checkpoint().unwrap();
    drop(index);

    let reopened = VectorIndex::open(options).unwrap();
    assert_eq!(reopened.count(), 100);
    for i in 0..100 {
        let (v, _) = reopened.get(&format!("v{i}")).unwrap();
        assert_eq!(v, vec![i as f32, (i % 7) as f32, (i % 13) as f32]);
    }
}

#[test]
fn scenario_deletion_and_search() {
    // D=2, 50 vectors.
    let mut index = VectorIndex::new();
    for i in 0..50 {
        index
            .add(format!("v_{i}"), &[i as f32, (i * i % 13) as f32], None)
            .unwrap();
    }
    index.flush().unwrap();

    let target = index.get("v_25").unwrap().0;
    assert!(index.delete("v_25").unwrap());
    assert_eq!(index.count(), 49);

    let hits = index.search(&target, 50, None).unwrap();
    assert_eq!(hits.len(), 49);
    assert!(hits.iter().all(|h| h.id != "v_25"));
}

#[test]
fn scenario_dimension_mismatch() {
    // D is set to 16 by the first insert.
    let mut index = VectorIndex::new();
    index.add("first", &[0.5; 16], None).unwrap();

    let err = index.add("x", &[1.0, 2.0], None).unwrap_err();
    assert!(matches!(
        err,
        IndexError::DimensionMismatch {
            expected: 16,
            got: 2
        }
    ));

    // State unchanged.
    assert_eq!(index.count(), 1);
    assert!(index.get("x").is_none());
}
