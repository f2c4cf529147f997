use std::io::Write;

use crate::Result;

pub use crate::index::storage::Storage;
pub use crate::index::Index;
pub use crate::signature::{SeqToHashes, Signature, SigsTrait};

pub trait ToWriter {
    fn to_writer<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write;
}

pub trait Update<O> {
    fn update(&self, other: &mut O) -> Result<()>;
}

pub trait FromFactory<N> {
    fn factory(&self, name: &str) -> Result<N>;
}

/// Scores between a node (or leaf) and a query.
///
/// `containment(other)` is the fraction of `other` found in `self`.
pub trait Comparable<O> {
    fn similarity(&self, other: &O) -> Result<f64>;
    fn containment(&self, other: &O) -> Result<f64>;
}
