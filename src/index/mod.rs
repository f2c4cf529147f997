//! # Indexing structures for fast similarity search
//!
//! An index organizes sketches to allow for fast similarity search.
//! [`sbt::SBT`] prunes subtrees using Bloom filters at internal nodes,
//! [`linear::LinearIndex`] compares the query against every dataset.

pub mod linear;
pub mod sbt;
pub mod search;
pub mod storage;

use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::prelude::*;
use crate::signature::Signature;
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::nodegraph::Nodegraph;
use crate::{Error, Result};

pub use crate::index::sbt::{Node, SBT};
pub use crate::index::search::{SearchMode, SearchResult};

/// A Sequence Bloom Tree with Nodegraph filters and MinHash leaves.
pub type MHBT = SBT<Node<Nodegraph>, KmerMinHash>;

pub trait Index {
    type Item: Comparable<Self::Item>;

    fn find<F>(&self, search_fn: F, sig: &Self::Item, threshold: f64) -> Result<Vec<&Self::Item>>
    where
        F: Fn(&dyn Comparable<Self::Item>, &Self::Item, f64) -> Result<bool>,
    {
        let mut matches = vec![];
        for node in self.signature_refs() {
            if search_fn(&node, sig, threshold)? {
                matches.push(node);
            }
        }
        Ok(matches)
    }

    /// Datasets scoring at least `threshold` against `query`.
    fn search(
        &self,
        query: &Self::Item,
        threshold: f64,
        mode: SearchMode,
    ) -> Result<Vec<SearchResult>>;

    /// Like `search`, with the best scores first. Ties keep insertion order.
    fn search_ranked(
        &self,
        query: &Self::Item,
        threshold: f64,
        mode: SearchMode,
    ) -> Result<Vec<SearchResult>> {
        let mut results = self.search(query, threshold, mode)?;
        results.sort_by(|a, b| {
            b.score()
                .total_cmp(&a.score())
                .then_with(|| a.insertion().cmp(&b.insertion()))
        });
        Ok(results)
    }

    fn insert(&mut self, dataset: SigStore<Self::Item>) -> Result<()>;

    fn batch_insert(&mut self, datasets: Vec<SigStore<Self::Item>>) -> Result<()> {
        for dataset in datasets {
            self.insert(dataset)?;
        }

        Ok(())
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()>;

    fn signatures(&self) -> Vec<Self::Item>;

    fn signature_refs(&self) -> Vec<&Self::Item>;

    fn len(&self) -> usize {
        self.signature_refs().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a, N, L> Comparable<L> for &'a N
where
    N: Comparable<L>,
{
    fn similarity(&self, other: &L) -> Result<f64> {
        (*self).similarity(other)
    }

    fn containment(&self, other: &L) -> Result<f64> {
        (*self).containment(other)
    }
}

impl Comparable<KmerMinHash> for KmerMinHash {
    fn similarity(&self, other: &KmerMinHash) -> Result<f64> {
        KmerMinHash::similarity(self, other, true, true)
    }

    fn containment(&self, other: &KmerMinHash) -> Result<f64> {
        other.contained_by(self)
    }
}

impl ToWriter for KmerMinHash {
    fn to_writer<W>(&self, writer: &mut W) -> Result<()>
    where
        W: std::io::Write,
    {
        serde_json::to_writer(writer, &self)?;
        Ok(())
    }
}

/// A dataset stored in an index: the sketch plus its label.
#[derive(TypedBuilder, Debug, Clone, PartialEq)]
pub struct SigStore<T> {
    #[builder(setter(into))]
    filename: String,

    #[builder(setter(into))]
    name: String,

    #[builder(setter(into), default)]
    metadata: String,

    /// Insertion sequence number, assigned by the index.
    #[builder(default)]
    pub(crate) insertion: u64,

    pub(crate) data: T,
}

impl<T> SigStore<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    pub fn insertion(&self) -> u64 {
        self.insertion
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub(crate) fn info(&self, filename: String) -> DatasetInfo {
        DatasetInfo {
            filename,
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            insertion: Some(self.insertion),
        }
    }
}

impl SigStore<KmerMinHash> {
    /// Labels a sketch with `name`, using its checksum as the storage name.
    pub fn from_minhash<S: Into<String>>(name: S, mh: KmerMinHash) -> SigStore<KmerMinHash> {
        SigStore::builder()
            .filename(mh.md5sum())
            .name(name)
            .data(mh)
            .build()
    }

    pub fn md5sum(&self) -> String {
        self.data.md5sum()
    }

    /// The dataset as a one-sketch signature file, the way indices store it.
    pub(crate) fn to_blob(&self) -> Result<Vec<u8>> {
        let sig = Signature::builder()
            .name(Some(self.name.clone()))
            .filename(Some(self.filename.clone()))
            .signatures(vec![self.data.clone()])
            .build();

        let mut buffer = Vec::new();
        sig.to_writer(&mut buffer)?;
        Ok(buffer)
    }
}

/// Reads a stored dataset back, returning its filename and sketch.
///
/// Bare sketches are accepted too, labeled by their checksum.
pub(crate) fn read_leaf_blob(raw: &[u8]) -> Result<(String, KmerMinHash)> {
    match Signature::from_reader(raw) {
        Ok(mut sigs) if sigs.len() == 1 => {
            let sig = sigs.remove(0);
            let filename = sig.filename();
            match sig.minhash() {
                Some(mh) if sig.size() == 1 => Ok((filename, mh.clone())),
                _ => Err(Error::corrupt("expected exactly one sketch")),
            }
        }
        Ok(sigs) => Err(Error::corrupt(format!(
            "expected one signature, found {}",
            sigs.len()
        ))),
        Err(e) => {
            warn!("not a signature file ({}), reading a bare sketch", e);
            let mh: KmerMinHash = serde_json::from_slice(raw)?;
            Ok((mh.md5sum(), mh))
        }
    }
}

impl From<KmerMinHash> for SigStore<KmerMinHash> {
    fn from(other: KmerMinHash) -> SigStore<KmerMinHash> {
        let name = other.md5sum();
        SigStore::from_minhash(name, other)
    }
}

impl TryFrom<Signature> for SigStore<KmerMinHash> {
    type Error = Error;

    fn try_from(sig: Signature) -> Result<SigStore<KmerMinHash>> {
        let name = sig.name();
        let filename = sig.filename();
        let mh = sig.minhash().cloned().ok_or_else(|| Error::InvalidSketchParams {
            message: format!("signature {} has no sketches", name),
        })?;
        Ok(SigStore::builder()
            .filename(filename)
            .name(name)
            .data(mh)
            .build())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub filename: String,
    pub name: String,
    pub metadata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insertion: Option<u64>,
}
