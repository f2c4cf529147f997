use std::collections::BTreeSet;

use assert_matches::assert_matches;
use proptest::collection::vec;
use proptest::prelude::*;

use mhbt::encodings::HashFunctions;
use mhbt::signature::SigsTrait;
use mhbt::sketch::minhash::KmerMinHash;
use mhbt::Error;

fn num_sketch(num: u32, hashes: &[u64]) -> KmerMinHash {
    let mut mh = KmerMinHash::with_num(num, 21, HashFunctions::murmur64_DNA).unwrap();
    mh.add_many(hashes).unwrap();
    mh
}

#[test]
fn throws_error() {
    let mut mh = KmerMinHash::with_num(1, 4, HashFunctions::murmur64_DNA).unwrap();

    assert_matches!(
        mh.add_sequence(b"ATGR", false),
        Err(Error::InvalidDNA { .. })
    );
    // with force the bad k-mer is skipped
    mh.add_sequence(b"ATGR", true).unwrap();
    assert!(mh.is_empty());
}

#[test]
fn combined_sample_similarity() {
    let a = num_sketch(5, &[1, 2, 3, 4, 5]);
    let b = num_sketch(5, &[3, 4, 5, 6, 7]);

    // the combined sample is {1..5}, and {3, 4, 5} is shared
    assert_eq!(a.similarity(&b, true, false).unwrap(), 0.6);
    assert_eq!(b.similarity(&a, true, false).unwrap(), 0.6);
    assert_eq!(a.similarity(&a, true, false).unwrap(), 1.0);
}

#[test]
fn underfull_similarity() {
    let a = num_sketch(5, &[1]);
    let b = num_sketch(5, &[1, 2]);

    assert_eq!(a.similarity(&b, true, false).unwrap(), 0.5);
}

#[test]
fn same_sequence_same_sketch() {
    let mut a = KmerMinHash::with_num(20, 10, HashFunctions::murmur64_DNA).unwrap();
    let mut b = KmerMinHash::with_num(20, 10, HashFunctions::murmur64_DNA).unwrap();

    let seq = b"TGCCGCCCAGCACCGGGTGACTAGGTTGAGCCATGATTAACCTGCAATGA";
    a.add_sequence(seq, false).unwrap();
    b.add_sequence(seq, false).unwrap();
    assert_eq!(a.similarity(&b, true, false).unwrap(), 1.0);

    // adding the same k-mers again changes nothing
    b.add_sequence(seq, false).unwrap();
    assert_eq!(a, b);

    // the reverse complement has the same canonical k-mers
    let mut rc = KmerMinHash::with_num(20, 10, HashFunctions::murmur64_DNA).unwrap();
    rc.add_sequence(b"TCATTGCAGGTTAATCATGGCTCAACCTAGTCACCCGGTGCTGGGCGGCA", false)
        .unwrap();
    assert_eq!(a.mins(), rc.mins());
}

#[test]
fn protein_into_dna_is_rejected() {
    let dna = KmerMinHash::with_num(10, 21, HashFunctions::murmur64_DNA).unwrap();
    let prot = KmerMinHash::with_num(10, 21, HashFunctions::murmur64_protein).unwrap();

    assert_matches!(
        dna.check_compatible(&prot),
        Err(Error::IncompatibleSketch { .. })
    );
    assert_matches!(
        dna.similarity(&prot, true, true),
        Err(Error::IncompatibleSketch { .. })
    );
}

#[test]
fn scaled_resolutions() {
    let mut fine = KmerMinHash::with_scaled(1, 21, HashFunctions::murmur64_DNA).unwrap();
    let mut coarse = KmerMinHash::with_scaled(2, 21, HashFunctions::murmur64_DNA).unwrap();
    let hashes = [10, 20, u64::MAX / 2 - 1, u64::MAX - 1];
    fine.add_many(&hashes).unwrap();
    coarse.add_many(&hashes).unwrap();
    assert_eq!(coarse.size(), 3);

    // without downsampling the sketches are not comparable
    assert!(fine.similarity(&coarse, true, false).is_err());
    assert_eq!(fine.similarity(&coarse, true, true).unwrap(), 1.0);
    assert_eq!(fine.contained_by(&coarse).unwrap(), 1.0);
}

proptest! {
    #[test]
    fn keeps_num_smallest(num in 1u32..50, hashes in vec(any::<u64>(), 0..200)) {
        let mh = num_sketch(num, &hashes);

        let expected: Vec<u64> = hashes
            .iter()
            .copied()
            .collect::<BTreeSet<u64>>()
            .into_iter()
            .take(num as usize)
            .collect();

        prop_assert!(mh.size() <= num as usize);
        prop_assert_eq!(mh.mins(), expected);
    }

    #[test]
    fn insertion_order_does_not_matter(num in 1u32..20, mut hashes in vec(any::<u64>(), 0..100)) {
        let forward = num_sketch(num, &hashes);
        hashes.reverse();
        let backward = num_sketch(num, &hashes);

        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn similarity_in_unit_interval(
        a in vec(0u64..1000, 0..60),
        b in vec(0u64..1000, 0..60),
    ) {
        let a = num_sketch(20, &a);
        let b = num_sketch(20, &b);

        let sim = a.similarity(&b, true, false).unwrap();
        prop_assert!((0.0..=1.0).contains(&sim));
        prop_assert_eq!(sim, b.similarity(&a, true, false).unwrap());

        let containment = a.contained_by(&b).unwrap();
        prop_assert!((0.0..=1.0).contains(&containment));
    }
}
