use std::fmt;

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::prelude::Comparable;
use crate::Result;

/// How leaves are scored against a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Jaccard similarity between query and dataset.
    Similarity,
    /// Fraction of the query contained in the dataset.
    Containment,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Similarity
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SearchMode::Similarity => write!(f, "similarity"),
            SearchMode::Containment => write!(f, "containment"),
        }
    }
}

impl SearchMode {
    pub fn score<L>(&self, node: &dyn Comparable<L>, query: &L) -> Result<f64> {
        match self {
            SearchMode::Similarity => node.similarity(query),
            SearchMode::Containment => node.containment(query),
        }
    }
}

#[derive(TypedBuilder, CopyGetters, Getters, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult {
    #[getset(get = "pub")]
    #[builder(setter(into))]
    name: String,

    #[getset(get = "pub")]
    #[builder(setter(into))]
    filename: String,

    #[getset(get_copy = "pub")]
    score: f64,

    /// Position of the leaf in the index.
    #[getset(get_copy = "pub")]
    position: u64,

    #[getset(get_copy = "pub")]
    insertion: u64,
}

pub fn search_minhashes<L>(node: &dyn Comparable<L>, query: &L, threshold: f64) -> Result<bool> {
    Ok(node.similarity(query)? >= threshold)
}

pub fn search_minhashes_containment<L>(
    node: &dyn Comparable<L>,
    query: &L,
    threshold: f64,
) -> Result<bool> {
    Ok(node.containment(query)? >= threshold)
}
