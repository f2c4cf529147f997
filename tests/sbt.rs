use std::fs::File;
use std::io::Write;

use assert_matches::assert_matches;
use proptest::collection::vec;
use proptest::prelude::*;

use mhbt::encodings::HashFunctions;
use mhbt::index::linear::LinearIndex;
use mhbt::index::sbt::walker::walk;
use mhbt::index::sbt::{Factory, NodeKind, SbtNode};
use mhbt::index::{Index, SearchMode, SearchResult, SigStore, MHBT};
use mhbt::signature::SigsTrait;
use mhbt::sketch::minhash::KmerMinHash;
use mhbt::Error;

fn dna(num: u32, hashes: &[u64]) -> KmerMinHash {
    let mut mh = KmerMinHash::with_num(num, 21, HashFunctions::murmur64_DNA).unwrap();
    mh.add_many(hashes).unwrap();
    mh
}

fn small_tree(d: u32) -> MHBT {
    MHBT::new(d, Factory::graph(1, 1000, 2)).unwrap()
}

fn by_name(mut results: Vec<SearchResult>) -> Vec<(String, f64)> {
    results.sort_by(|a, b| a.name().cmp(b.name()));
    results
        .into_iter()
        .map(|r| (r.name().clone(), r.score()))
        .collect()
}

#[test]
fn similarity_search() {
    let mut sbt = small_tree(2);
    sbt.insert_sketch("a", dna(5, &[1, 2, 3, 4, 5])).unwrap();
    sbt.insert_sketch("b", dna(5, &[3, 4, 5, 6, 7])).unwrap();

    let results = sbt
        .search(&dna(5, &[1, 2, 3, 4, 5]), 0.5, SearchMode::Similarity)
        .unwrap();
    assert_eq!(
        by_name(results),
        vec![("a".to_string(), 1.0), ("b".to_string(), 0.6)]
    );

    let results = sbt
        .search(&dna(5, &[1, 2, 3, 4, 5]), 0.7, SearchMode::Similarity)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name(), "a");
}

#[test]
fn protein_into_dna_tree() {
    let mut sbt = small_tree(2);
    sbt.insert_sketch("a", dna(5, &[1, 2, 3])).unwrap();

    let mut prot = KmerMinHash::with_num(5, 21, HashFunctions::murmur64_protein).unwrap();
    prot.add_protein(b"MVLSPADKTNVKAAW").unwrap();

    assert_matches!(
        sbt.insert(SigStore::from_minhash("p", prot.clone())),
        Err(Error::IncompatibleSketch { .. })
    );
    assert_eq!(sbt.len(), 1);

    assert_matches!(
        sbt.search(&prot, 0.1, SearchMode::Similarity),
        Err(Error::IncompatibleSketch { .. })
    );
}

#[test]
fn ranked_ties_keep_insertion_order() {
    let mut sbt = small_tree(3);
    sbt.insert_sketch("first", dna(10, &[1, 2, 9])).unwrap();
    sbt.insert_sketch("best", dna(10, &[1, 2, 3])).unwrap();
    sbt.insert_sketch("second", dna(10, &[1, 2, 8])).unwrap();

    let results = sbt
        .search_ranked(&dna(10, &[1, 2, 3]), 0.1, SearchMode::Containment)
        .unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.name().as_str()).collect();
    assert_eq!(names, vec!["best", "first", "second"]);
    assert_eq!(results[1].score(), results[2].score());
}

#[test]
fn filesystem_roundtrip() {
    let mut sbt = small_tree(2);
    for i in 0..7u64 {
        let hashes: Vec<u64> = (i * 3..i * 3 + 6).collect();
        sbt.insert_sketch(format!("d{}", i), dna(10, &hashes)).unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.sbt.json");
    sbt.save(&path).unwrap();
    assert!(dir.path().join(".sbt.tree").is_dir());

    let loaded = MHBT::from_path(&path).unwrap();
    assert_eq!(loaded.len(), 7);
    assert_eq!(loaded.d(), 2);

    let query = dna(10, &[3, 4, 5, 6]);
    for mode in [SearchMode::Similarity, SearchMode::Containment] {
        assert_eq!(
            loaded.search(&query, 0.2, mode).unwrap(),
            sbt.search(&query, 0.2, mode).unwrap()
        );
    }

    let scores = |tree: &MHBT| -> Vec<(u64, NodeKind, f64, f64)> {
        walk(tree, &query)
            .unwrap()
            .into_iter()
            .map(|r| (r.position, r.kind, r.containment, r.similarity))
            .collect()
    };
    assert_eq!(scores(&loaded), scores(&sbt));

    // a reloaded tree keeps growing where it left off
    let mut loaded = loaded;
    let pos = loaded.insert_sketch("d7", dna(10, &[100, 101])).unwrap();
    assert!(loaded.node(pos).is_some());
    let results = loaded
        .search(&dna(10, &[100, 101]), 1.0, SearchMode::Containment)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].insertion(), 7);
}

#[test]
fn identical_sketches_keep_their_labels() {
    let mut sbt = small_tree(2);
    for (name, filename) in [("x", "x.fa"), ("y", "y.fa"), ("z", "z.fa")] {
        let store = SigStore::builder()
            .name(name)
            .filename(filename)
            .data(dna(10, &[1, 2, 3]))
            .build();
        sbt.insert(store).unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dups.sbt.json");
    sbt.save(&path).unwrap();
    let loaded = MHBT::from_path(&path).unwrap();

    let labels = |tree: &MHBT| -> Vec<(String, String)> {
        let mut results = tree
            .search(&dna(10, &[1, 2, 3]), 1.0, SearchMode::Similarity)
            .unwrap();
        results.sort_by(|a, b| a.name().cmp(b.name()));
        results
            .into_iter()
            .map(|r| (r.name().clone(), r.filename().clone()))
            .collect()
    };
    assert_eq!(
        labels(&loaded),
        vec![
            ("x".to_string(), "x.fa".to_string()),
            ("y".to_string(), "y.fa".to_string()),
            ("z".to_string(), "z.fa".to_string()),
        ]
    );
    assert_eq!(labels(&loaded), labels(&sbt));
}

#[test]
fn unreadable_descriptors_are_corrupt() {
    let dir = tempfile::tempdir().unwrap();

    let garbage = dir.path().join("garbage.sbt.json");
    File::create(&garbage)
        .unwrap()
        .write_all(b"this is not an index")
        .unwrap();
    assert_matches!(
        MHBT::from_path(&garbage),
        Err(Error::CorruptIndex { .. })
    );

    let old = dir.path().join("old.sbt.json");
    File::create(&old)
        .unwrap()
        .write_all(
            br#"{"d": 2, "version": 2, "storage": {"backend": "FSStorage", "args": {"path": ".sbt.old"}},
                "factory": {"class": "GraphFactory", "args": [1, 1000.0, 2]},
                "nodes": {}, "leaves": {}}"#,
        )
        .unwrap();
    assert_matches!(MHBT::from_path(&old), Err(Error::CorruptIndex { .. }));
}

#[test]
fn missing_blob_directory_is_corrupt() {
    let mut sbt = small_tree(2);
    sbt.insert_sketch("a", dna(10, &[1, 2])).unwrap();
    sbt.insert_sketch("b", dna(10, &[3, 4])).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.sbt.json");
    sbt.save(&path).unwrap();
    std::fs::remove_dir_all(dir.path().join(".sbt.tree")).unwrap();

    assert_matches!(MHBT::from_path(&path), Err(Error::CorruptIndex { .. }));
}

#[test]
fn damaged_filters_are_corrupt() {
    let mut sbt = small_tree(2);
    for i in 0..4u64 {
        sbt.insert_sketch(format!("d{}", i), dna(10, &[i, i + 10])).unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.sbt.json");
    sbt.save(&path).unwrap();

    let root = dir.path().join(".sbt.tree").join("internal.0");
    let original = std::fs::read(&root).unwrap();

    let damaged: Vec<(&str, Vec<u8>)> = vec![
        ("truncated", original[..original.len() / 2].to_vec()),
        ("bad magic", [&b"XXXX"[..], &original[4..]].concat()),
        ("gzip garbage", vec![0x1f, 0x8b, 0x07, 0x00, 0x01, 0x02, 0x03, 0x04]),
        ("huge table", {
            let mut raw = original[..19].to_vec();
            raw.extend_from_slice(&u64::MAX.to_le_bytes());
            raw
        }),
    ];
    for (what, bytes) in damaged {
        std::fs::write(&root, bytes).unwrap();
        assert!(
            matches!(MHBT::from_path(&path), Err(Error::CorruptIndex { .. })),
            "{} filter was accepted",
            what
        );
    }
}

#[test]
fn degenerate_factories_are_rejected() {
    for (tablesize, n_tables) in [(0, 1), (3, 1), (3, 4), (10, 4), (1000, 0)] {
        assert_matches!(
            MHBT::new(2, Factory::graph(1, tablesize, n_tables)),
            Err(Error::InvalidSketchParams { .. })
        );
    }
}

fn datasets() -> impl Strategy<Value = Vec<Vec<u64>>> {
    vec(vec(0u64..300, 1..30), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pruned_search_finds_every_match(
        sets in datasets(),
        query in vec(0u64..300, 1..30),
        d in 2u32..5,
        threshold in 0.05f64..1.0,
        batch in any::<bool>(),
    ) {
        let mut sbt = small_tree(d);
        let mut linear = LinearIndex::builder().build();

        let stores: Vec<_> = sets
            .iter()
            .enumerate()
            .map(|(i, hashes)| SigStore::from_minhash(format!("d{}", i), dna(10, hashes)))
            .collect();
        if batch {
            sbt.batch_insert(stores.clone()).unwrap();
        } else {
            for store in stores.clone() {
                sbt.insert(store).unwrap();
            }
        }
        linear.batch_insert(stores).unwrap();

        let query = dna(10, &query);
        for mode in [SearchMode::Similarity, SearchMode::Containment] {
            let expected = by_name(linear.search(&query, threshold, mode).unwrap());
            let found = by_name(sbt.search(&query, threshold, mode).unwrap());
            prop_assert_eq!(found, expected);
        }
    }

    #[test]
    fn ancestors_bound_containment(
        sets in datasets(),
        query in vec(0u64..300, 1..30),
        d in 2u32..5,
    ) {
        let mut sbt = small_tree(d);
        for (i, hashes) in sets.iter().enumerate() {
            sbt.insert_sketch(format!("d{}", i), dna(10, hashes)).unwrap();
        }

        // reports come in depth-first order, so the ancestors of a node are
        // the last report seen at each smaller depth
        let mut path: Vec<f64> = vec![];
        for report in walk(&sbt, &dna(10, &query)).unwrap() {
            path.truncate(report.depth);
            prop_assert_eq!(path.len(), report.depth);
            for ancestor in &path {
                prop_assert!(*ancestor >= report.containment);
            }
            path.push(report.containment);
        }
    }

    #[test]
    fn filters_hold_every_leaf_below(
        sets in datasets(),
        d in 2u32..5,
        batch in any::<bool>(),
    ) {
        let mut sbt = small_tree(d);
        let stores: Vec<_> = sets
            .iter()
            .enumerate()
            .map(|(i, hashes)| SigStore::from_minhash(format!("d{}", i), dna(10, hashes)))
            .collect();
        if batch {
            sbt.batch_insert(stores).unwrap();
        } else {
            for store in stores {
                sbt.insert(store).unwrap();
            }
        }

        for (pos, node) in sbt.iter() {
            let filter = match node {
                SbtNode::Internal(node) => node.data(),
                SbtNode::Leaf(_) => continue,
            };

            let mut below = sbt.children(pos);
            while let Some(child) = below.pop() {
                match sbt.node(child) {
                    Some(SbtNode::Leaf(leaf)) => {
                        for h in leaf.data().mins() {
                            prop_assert!(filter.might_contain(h));
                        }
                    }
                    Some(SbtNode::Internal(_)) => below.extend(sbt.children(child)),
                    None => (),
                }
            }
        }
    }
}
