//! Minimal end-to-end tour: insert, search, filter, persist, reopen.
//!
//! Run with: `cargo run --example quickstart`

use omvec::{Filter, IndexError, IndexOptions, Metadata, VectorIndex};

fn main() -> Result<(), IndexError> {
    let base = std::env::temp_dir().join("omvec-quickstart");

    let options = IndexOptions {
        persistence_path: Some(base),
        ..IndexOptions::default()
    };

    let mut index = VectorIndex::open(options.clone())?;
    index.clear()?;

    // A few toy document embeddings.
    let docs: &[(&str, [f32; 4], &str)] = &[
        ("intro", [0.9, 0.1, 0.0, 0.0], "en"),
        ("einleitung", [0.85, 0.2, 0.1, 0.0], "de"),
        ("appendix", [0.0, 0.1, 0.9, 0.3], "en"),
        ("anhang", [0.05, 0.0, 0.88, 0.35], "de"),
    ];
    for (id, vector, lang) in docs {
        let mut metadata = Metadata::new();
        metadata.insert("lang".to_string(), (*lang).to_string());
        index.add(*id, vector, Some(metadata))?;
    }

    let query = [0.88, 0.15, 0.05, 0.0];
    println!("top-2 for {query:?}:");
    for hit in index.search(&query, 2, None)? {
        println!("  {} (distance {:.4})", hit.id, hit.distance);
    }

    let english = Filter::new().with("lang", "en");
    println!("top-2 restricted to lang=en:");
    for hit in index.search(&query, 2, Some(&english))? {
        println!("  {} (distance {:.4})", hit.id, hit.distance);
    }

    index.checkpoint()?;
    drop(index);

    let reopened = VectorIndex::open(options)?;
    println!(
        "reopened index holds {} vectors of dimension {:?}",
        reopened.count(),
        reopened.dimension()
    );
    Ok(())
}
