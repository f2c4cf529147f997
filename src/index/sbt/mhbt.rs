use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::info;

use crate::index::sbt::{Descriptor, Factory, Node, SbtNode, SBT};
use crate::index::storage::{FSStorage, InnerStorage, StorageArgs};
use crate::index::{read_leaf_blob, SigStore, MHBT};
use crate::prelude::*;
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::nodegraph::Nodegraph;
use crate::{Error, Result};

impl<L> FromFactory<Node<Nodegraph>> for SBT<Node<Nodegraph>, L> {
    fn factory(&self, name: &str) -> Result<Node<Nodegraph>> {
        match self.factory {
            Factory::GraphFactory { args: (k, t, n) } => {
                let n = Nodegraph::with_tables(t as usize, n as usize, k as usize);

                Ok(Node::builder()
                    .filename(name)
                    .name(name)
                    .metadata(HashMap::default())
                    .data(n)
                    .build())
            }
        }
    }
}

impl Update<Node<Nodegraph>> for Node<Nodegraph> {
    fn update(&self, parent: &mut Node<Nodegraph>) -> Result<()> {
        parent.data.union_with(&self.data)?;

        if let Some(below) = self.metadata.get("min_n_below") {
            let min_n_below = parent
                .metadata
                .entry("min_n_below".into())
                .or_insert(u64::MAX);
            *min_n_below = u64::min(*below, *min_n_below);
        }

        Ok(())
    }
}

impl Update<Node<Nodegraph>> for KmerMinHash {
    fn update(&self, parent: &mut Node<Nodegraph>) -> Result<()> {
        for h in self.iter_mins() {
            parent.data.count(*h);
        }

        let min_n_below = parent
            .metadata
            .entry("min_n_below".into())
            .or_insert(u64::MAX);

        *min_n_below = u64::min(self.size() as u64, *min_n_below);
        if *min_n_below == 0 {
            *min_n_below = 1
        }

        Ok(())
    }
}

impl Comparable<Node<Nodegraph>> for Node<Nodegraph> {
    fn similarity(&self, other: &Node<Nodegraph>) -> Result<f64> {
        Comparable::similarity(&self.data, &other.data)
    }

    fn containment(&self, other: &Node<Nodegraph>) -> Result<f64> {
        Comparable::containment(&self.data, &other.data)
    }
}

impl Comparable<KmerMinHash> for Node<Nodegraph> {
    /// Hashes of the query in this filter over the smallest sketch below.
    ///
    /// This overestimates the similarity of any leaf, and can also
    /// underestimate the containment of the query in the best one, so it is
    /// only reported and never used to prune.
    fn similarity(&self, other: &KmerMinHash) -> Result<f64> {
        if other.is_empty() {
            return Ok(0.0);
        }

        let matches = self.data.matches(other) as f64;
        Ok(f64::min(matches / self.min_n_below() as f64, 1.0))
    }

    fn containment(&self, other: &KmerMinHash) -> Result<f64> {
        Ok(self.data.estimated_containment(other))
    }
}

impl MHBT {
    /// Loads a tree whose blobs live in a directory next to the descriptor.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<MHBT> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let descriptor = Descriptor::from_reader(reader)?;
        let storage = match &descriptor.storage.args {
            StorageArgs::FSStorage { path: subdir } => {
                let base = path.parent().unwrap_or_else(|| Path::new(""));
                InnerStorage::new(FSStorage::new(base, subdir))
            }
            StorageArgs::MemStorage {} => {
                return Err(Error::corrupt(format!(
                    "{} was saved to an in-memory storage",
                    path.display()
                )))
            }
        };

        MHBT::from_descriptor(descriptor, storage)
    }

    /// Loads a tree from a descriptor, reading every blob from `storage`.
    pub fn from_reader_with_storage<R: Read>(rdr: R, storage: InnerStorage) -> Result<MHBT> {
        let descriptor = Descriptor::from_reader(rdr)?;
        MHBT::from_descriptor(descriptor, storage)
    }

    fn from_descriptor(descriptor: Descriptor, storage: InnerStorage) -> Result<MHBT> {
        let Descriptor {
            d,
            factory,
            nodes,
            leaves,
            ..
        } = descriptor;

        if d < 2 {
            return Err(Error::corrupt(format!("invalid tree degree {}", d)));
        }
        factory
            .validate()
            .map_err(|e| Error::corrupt(format!("invalid factory: {}", e)))?;

        let n_entries = (nodes.len() + leaves.len()) as u64;
        let bound = n_entries
            .checked_mul(u64::from(d))
            .and_then(|n| n.checked_add(1))
            .unwrap_or(u64::MAX);
        for pos in nodes.keys().chain(leaves.keys()) {
            if *pos >= bound {
                return Err(Error::corrupt(format!(
                    "position {} out of range for {} entries",
                    pos, n_entries
                )));
            }
        }
        if let Some(pos) = nodes.keys().find(|p| leaves.contains_key(*p)) {
            return Err(Error::corrupt(format!(
                "position {} is both a node and a leaf",
                pos
            )));
        }

        let expected = match factory {
            Factory::GraphFactory { args: (k, t, n) } => {
                Nodegraph::with_tables(t as usize, n as usize, k as usize).tablesizes()
            }
        };

        let mut arena: Vec<Option<SbtNode<Node<Nodegraph>, KmerMinHash>>> = Vec::new();
        let mut place = |pos: u64, node| {
            let idx = pos as usize;
            if idx >= arena.len() {
                arena.resize_with(idx + 1, || None);
            }
            arena[idx] = Some(node);
        };

        for (pos, info) in nodes {
            let raw = load_blob(&storage, &info.filename)?;
            let ng = Nodegraph::from_reader(&raw[..])?;
            if ng.tablesizes() != expected {
                return Err(Error::corrupt(format!(
                    "filter at {} has tablesizes {:?}, expected {:?}",
                    pos,
                    ng.tablesizes(),
                    expected
                )));
            }

            let node = Node::builder()
                .filename(info.filename)
                .name(info.name)
                .metadata(info.metadata)
                .data(ng)
                .build();
            place(pos, SbtNode::Internal(node));
        }

        let mut next_insertion = leaves
            .values()
            .filter_map(|l| l.insertion)
            .max()
            .map_or(0, |i| i + 1);

        for (pos, info) in leaves {
            let raw = load_blob(&storage, &info.filename)?;
            let (filename, mh) = read_leaf_blob(&raw)
                .map_err(|e| Error::corrupt(format!("leaf {} is unreadable: {}", pos, e)))?;

            let insertion = match info.insertion {
                Some(i) => i,
                None => {
                    next_insertion += 1;
                    next_insertion - 1
                }
            };

            let leaf = SigStore::builder()
                .filename(filename)
                .name(info.name)
                .metadata(info.metadata)
                .insertion(insertion)
                .data(mh)
                .build();
            place(pos, SbtNode::Leaf(leaf));
        }

        let sbt = SBT::builder()
            .d(d)
            .storage(Some(storage))
            .factory(factory)
            .nodes(arena)
            .next_insertion(next_insertion)
            .build();
        sbt.validate()?;

        info!(
            "loaded SBT with {} leaves and {} internal nodes",
            sbt.len(),
            sbt.n_internal()
        );
        Ok(sbt)
    }

    /// Checks the tree shape, leaf compatibility and that every filter covers
    /// the leaves below it.
    fn validate(&self) -> Result<()> {
        for (pos, node) in self.iter() {
            if let Some(ppos) = self.parent(pos) {
                match self.node(ppos) {
                    Some(SbtNode::Internal(_)) => (),
                    _ => {
                        return Err(Error::corrupt(format!(
                            "node {} has no internal parent",
                            pos
                        )))
                    }
                }
            }
            if node.kind() == super::NodeKind::Internal && self.children(pos).is_empty() {
                return Err(Error::corrupt(format!("internal node {} has no children", pos)));
            }
        }

        let leaves = self.leaves();
        if let Some(first) = leaves.first() {
            for leaf in &leaves[1..] {
                first
                    .data()
                    .check_compatible(leaf.data())
                    .map_err(|e| Error::corrupt(format!("incompatible leaves: {}", e)))?;
            }
        }

        for (pos, leaf) in self.iter_leaves() {
            let mut current = pos;
            while let Some(ppos) = self.parent(current) {
                if let Some(SbtNode::Internal(node)) = self.node(ppos) {
                    let missing = leaf
                        .data()
                        .iter_mins()
                        .find(|h| !node.data().might_contain(**h));
                    if let Some(h) = missing {
                        return Err(Error::corrupt(format!(
                            "filter at {} is missing hash {} of leaf {}",
                            ppos, h, pos
                        )));
                    }
                }
                current = ppos;
            }
        }

        Ok(())
    }
}

fn load_blob(storage: &InnerStorage, path: &str) -> Result<Vec<u8>> {
    storage
        .load(path)
        .map_err(|e| Error::corrupt(format!("missing blob {}: {}", path, e)))
}
