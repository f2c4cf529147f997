//! # Sequence Bloom Trees over MinHash sketches
//!
//! mhbt computes [MinHash sketches][0] for DNA and protein datasets and
//! organizes many of them in a Sequence Bloom Tree (SBT), a tree of Bloom
//! filters where every internal node summarizes the union of its subtree.
//! Queries descend the tree and prune every subtree whose filter cannot hold
//! enough of the query, so only promising leaves are compared exactly.
//!
//! [0]: https://en.wikipedia.org/wiki/MinHash
//!
//! The main entry points are [`sketch::minhash::KmerMinHash`] for building
//! sketches and [`index::MHBT`] for indexing and searching them.

// TODO: remove this line and update all the appropriate type names for 1.0
#![allow(clippy::upper_case_acronyms)]

pub mod errors;
pub use errors::SbtError as Error;

pub type Result<T> = std::result::Result<T, Error>;

pub mod cmd;
pub mod prelude;

pub mod index;

pub mod signature;
pub mod sketch;

pub mod encodings;

use murmurhash3::murmurhash3_x64_128;

type HashIntoType = u64;

pub fn _hash_murmur(kmer: &[u8], seed: u64) -> u64 {
    murmurhash3_x64_128(kmer, seed).0
}
