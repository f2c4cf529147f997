//! Per-node scores of a query against every node of a tree.

use std::io::Write;

use crate::index::sbt::{Node, NodeKind, SbtNode, SBT};
use crate::index::search::SearchMode;
use crate::prelude::*;
use crate::sketch::minhash::KmerMinHash;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub position: u64,
    pub depth: usize,
    pub kind: NodeKind,
    pub name: String,
    pub containment: f64,
    pub similarity: f64,
}

/// Scores `query` against every node, in depth-first order, without pruning.
///
/// Internal nodes report filter estimates, leaves exact scores.
pub fn walk<U>(sbt: &SBT<Node<U>, KmerMinHash>, query: &KmerMinHash) -> Result<Vec<NodeReport>>
where
    Node<U>: Comparable<KmerMinHash>,
{
    let traversal = sbt.traverse(query, 0.0, SearchMode::Containment, false)?;
    let query = traversal.query().clone();

    let mut reports = vec![];
    for visit in traversal {
        let visit = visit?;
        let report = match sbt.node(visit.position) {
            Some(SbtNode::Internal(node)) => NodeReport {
                position: visit.position,
                depth: visit.depth,
                kind: NodeKind::Internal,
                name: node.name().into(),
                containment: visit.score,
                similarity: node.similarity(&query)?,
            },
            Some(SbtNode::Leaf(leaf)) => NodeReport {
                position: visit.position,
                depth: visit.depth,
                kind: NodeKind::Leaf,
                name: leaf.name().into(),
                containment: visit.score,
                similarity: Comparable::similarity(leaf.data(), &query)?,
            },
            None => continue,
        };
        reports.push(report);
    }

    Ok(reports)
}

/// Writes one line per node, indented four spaces per level.
pub fn print_tree<U, W>(
    sbt: &SBT<Node<U>, KmerMinHash>,
    query: &KmerMinHash,
    writer: &mut W,
) -> Result<()>
where
    Node<U>: Comparable<KmerMinHash>,
    W: Write,
{
    for report in walk(sbt, query)? {
        writeln!(
            writer,
            "{}{} containment={:.3} similarity={:.3}",
            "    ".repeat(report.depth),
            report.name,
            report.containment,
            report.similarity
        )?;
    }
    Ok(())
}
