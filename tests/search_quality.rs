//! Search quality against brute force, per distance function.

use omvec::{DistanceKind, IndexOptions, VectorIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_vectors(count: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

fn brute_force_top_k(
    kind: DistanceKind,
    vectors: &[Vec<f32>],
    query: &[f32],
    k: usize,
) -> Vec<usize> {
    let mut scored: Vec<(f32, usize)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (kind.distance(query, v), i))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, i)| i).collect()
}

fn recall_under(kind: DistanceKind) -> f64 {
    let n = 300;
    let k = 10;
    let vectors = random_vectors(n, 16, 7);
    let queries = random_vectors(20, 16, 8);

    let mut index = VectorIndex::with_options(IndexOptions {
        distance: kind,
        seed: 42,
        ..IndexOptions::default()
    })
    .unwrap();
    for (i, v) in vectors.iter().enumerate() {
        index.add(format!("v{i}"), v, None).unwrap();
    }
    index.flush().unwrap();

    let mut found = 0usize;
    let mut wanted = 0usize;
    for query in &queries {
        let expected = brute_force_top_k(kind, &vectors, query, k);
        // Candidate pool as wide as the index: the layer-0 sweep visits the
        // whole connected component, so misses can only come from graph
        // quality, not from an undersized pool.
        let hits = index.search_with_ef(query, k, n, None).unwrap();
        let got: Vec<usize> = hits.iter().map(|h| h.id[1..].parse().unwrap()).collect();

        wanted += expected.len();
        found += expected.iter().filter(|i| got.contains(i)).count();
    }
    found as f64 / wanted as f64
}

#[test]
fn recall_l2_near_exhaustive() {
    assert!(recall_under(DistanceKind::L2) >= 0.95);
}

#[test]
fn recall_cosine_near_exhaustive() {
    assert!(recall_under(DistanceKind::Cosine) >= 0.95);
}

#[test]
fn recall_inner_product_near_exhaustive() {
    assert!(recall_under(DistanceKind::InnerProduct) >= 0.95);
}

#[test]
fn ordering_matches_distance_kind() {
    // Inner product rewards magnitude; cosine ignores it; L2 punishes it.
    let build = |kind: DistanceKind| {
        let mut index = VectorIndex::with_options(IndexOptions {
            distance: kind,
            ..IndexOptions::default()
        })
        .unwrap();
        index.add("unit", &[1.0, 0.0], None).unwrap();
        index.add("long", &[10.0, 0.0], None).unwrap();
        index.add("off_axis", &[0.0, 1.0], None).unwrap();
        index
    };

    let query = [1.0, 0.0];

    let l2 = build(DistanceKind::L2);
    assert_eq!(l2.search(&query, 1, None).unwrap()[0].id, "unit");

    let cosine = build(DistanceKind::Cosine);
    let cosine_hits = cosine.search(&query, 3, None).unwrap();
    // unit and long are colinear with the query; both beat off_axis.
    assert_eq!(cosine_hits[2].id, "off_axis");
    assert!(cosine_hits[0].distance.abs() < 1e-6);
    assert!(cosine_hits[1].distance.abs() < 1e-6);

    let ip = build(DistanceKind::InnerProduct);
    assert_eq!(ip.search(&query, 1, None).unwrap()[0].id, "long");
}
