pub mod mhbt;
pub mod walker;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::index::search::{SearchMode, SearchResult};
use crate::index::storage::{FSStorage, InnerStorage, StorageInfo};
use crate::index::{DatasetInfo, Index, SigStore};
use crate::prelude::*;
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::nodegraph::Nodegraph;
use crate::{Error, Result};

/// A Sequence Bloom Tree.
///
/// Nodes live in a flat arena indexed by position: the parent of `p` is
/// `(p - 1) / d` and child `c` of `p` is `d * p + c + 1`. Internal nodes hold
/// a filter covering every leaf below them.
#[derive(TypedBuilder, Debug, Clone)]
pub struct SBT<N, L> {
    #[builder(default = 2)]
    d: u32,

    #[builder(default, setter(into))]
    storage: Option<InnerStorage>,

    #[builder(default = Factory::GraphFactory { args: (1, 100000.0, 4) })]
    factory: Factory,

    #[builder(default)]
    nodes: Vec<Option<SbtNode<N, L>>>,

    #[builder(default)]
    next_insertion: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SbtNode<N, L> {
    Internal(N),
    Leaf(SigStore<L>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Leaf,
}

impl<N, L> SbtNode<N, L> {
    pub fn kind(&self) -> NodeKind {
        match self {
            SbtNode::Internal(_) => NodeKind::Internal,
            SbtNode::Leaf(_) => NodeKind::Leaf,
        }
    }
}

const fn parent(pos: u64, d: u64) -> u64 {
    (pos - 1) / d
}

const fn child(parent: u64, pos: u64, d: u64) -> u64 {
    d * parent + pos + 1
}

impl<N, L> SBT<N, L> {
    /// An empty tree with degree `d`.
    pub fn new(d: u32, factory: Factory) -> Result<SBT<N, L>> {
        check_degree(d)?;
        factory.validate()?;

        Ok(SBT::builder().d(d).factory(factory).build())
    }

    #[inline(always)]
    fn parent(&self, pos: u64) -> Option<u64> {
        if pos == 0 {
            None
        } else {
            Some(parent(pos, u64::from(self.d)))
        }
    }

    #[inline(always)]
    fn child(&self, parent: u64, pos: u64) -> u64 {
        child(parent, pos, u64::from(self.d))
    }

    #[inline(always)]
    fn child_slots(&self, pos: u64) -> impl Iterator<Item = u64> + '_ {
        (0..u64::from(self.d)).map(move |c| self.child(pos, c))
    }

    /// Occupied child positions of `pos`, in order.
    pub fn children(&self, pos: u64) -> Vec<u64> {
        self.child_slots(pos)
            .filter(|c| self.node(*c).is_some())
            .collect()
    }

    pub fn node(&self, pos: u64) -> Option<&SbtNode<N, L>> {
        usize::try_from(pos)
            .ok()
            .and_then(|p| self.nodes.get(p))
            .and_then(|n| n.as_ref())
    }

    /// Occupied positions with their nodes, in position order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &SbtNode<N, L>)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(p, n)| n.as_ref().map(|n| (p as u64, n)))
    }

    fn iter_leaves(&self) -> impl Iterator<Item = (u64, &SigStore<L>)> {
        self.iter().filter_map(|(p, n)| match n {
            SbtNode::Leaf(l) => Some((p, l)),
            SbtNode::Internal(_) => None,
        })
    }

    /// Leaves in position order.
    pub fn leaves(&self) -> Vec<&SigStore<L>> {
        self.iter_leaves().map(|(_, l)| l).collect()
    }

    pub fn n_internal(&self) -> usize {
        self.iter()
            .filter(|(_, n)| n.kind() == NodeKind::Internal)
            .count()
    }

    pub fn d(&self) -> u32 {
        self.d
    }

    pub fn node_factory(&self) -> &Factory {
        &self.factory
    }

    pub fn storage(&self) -> Option<InnerStorage> {
        self.storage.clone()
    }

    fn max_leaf_pos(&self) -> Option<u64> {
        self.nodes.iter().enumerate().rev().find_map(|(p, n)| match n {
            Some(SbtNode::Leaf(_)) => Some(p as u64),
            _ => None,
        })
    }

    fn first_leaf(&self) -> Option<&SigStore<L>> {
        self.iter_leaves().map(|(_, l)| l).next()
    }

    fn set(&mut self, pos: u64, node: SbtNode<N, L>) {
        let idx = pos as usize;
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, || None);
        }
        self.nodes[idx] = Some(node);
    }

    fn take(&mut self, pos: u64) -> Option<SbtNode<N, L>> {
        self.nodes.get_mut(pos as usize).and_then(|n| n.take())
    }
}

fn check_degree(d: u32) -> Result<()> {
    if d < 2 {
        return Err(Error::InvalidSketchParams {
            message: format!("tree degree must be at least 2, got {}", d),
        });
    }
    Ok(())
}

impl<N, L> SBT<N, L>
where
    N: Update<N>,
    L: SigsTrait + Update<N>,
    SBT<N, L>: FromFactory<N>,
{
    /// Adds a leaf and updates every filter above it. Returns the position
    /// of the new leaf.
    ///
    /// An incompatible sketch leaves the tree unchanged.
    pub fn insert_leaf(&mut self, mut dataset: SigStore<L>) -> Result<u64> {
        check_degree(self.d)?;
        if let Some(first) = self.first_leaf() {
            first.data.check_compatible(&dataset.data)?;
        }

        dataset.insertion = self.next_insertion;
        let (pos, moved) = self.place(dataset)?;
        self.next_insertion += 1;

        if let Some(moved) = moved {
            self.absorb_leaf(moved)?;
        }
        self.absorb_leaf(pos)?;

        debug!("inserted leaf at position {}", pos);
        Ok(pos)
    }

    /// Adds many leaves, building every internal filter once at the end.
    ///
    /// Either every dataset is compatible and all of them are inserted, or
    /// none is.
    pub fn batch_insert_leaves(&mut self, datasets: Vec<SigStore<L>>) -> Result<()> {
        check_degree(self.d)?;
        {
            let reference = self
                .first_leaf()
                .or_else(|| datasets.first())
                .map(|l| &l.data);
            if let Some(reference) = reference {
                for dataset in &datasets {
                    reference.check_compatible(&dataset.data)?;
                }
            }
        }

        let n_datasets = datasets.len();
        for mut dataset in datasets {
            dataset.insertion = self.next_insertion;
            self.next_insertion += 1;
            self.place(dataset)?;
        }
        self.rebuild_filters()?;

        info!(
            "inserted {} datasets, tree has {} leaves and {} internal nodes",
            n_datasets,
            self.iter_leaves().count(),
            self.n_internal()
        );
        Ok(())
    }

    /// Puts the dataset in the next free slot without touching any filter.
    ///
    /// Returns the new leaf position and, if an existing leaf had to move
    /// down, its new position.
    fn place(&mut self, dataset: SigStore<L>) -> Result<(u64, Option<u64>)> {
        let pos = match self.max_leaf_pos() {
            Some(p) => p + 1,
            None => {
                if self.node(0).is_some() {
                    return Err(Error::Internal {
                        message: "tree has internal nodes but no leaves".into(),
                    });
                }
                self.set(0, SbtNode::Leaf(dataset));
                return Ok((0, None));
            }
        };

        // pos > 0 here, there is always a parent
        let parent_pos = parent(pos, u64::from(self.d));
        let first_child = self.child(parent_pos, 0);
        let new_node = self.factory(&format!("internal.{}", parent_pos))?;

        match self.take(parent_pos) {
            // the parent slot holds a leaf: it moves down next to the new one
            Some(SbtNode::Leaf(leaf)) => {
                let second_child = self.child(parent_pos, 1);
                self.set(parent_pos, SbtNode::Internal(new_node));
                self.set(first_child, SbtNode::Leaf(leaf));
                self.set(second_child, SbtNode::Leaf(dataset));
                Ok((second_child, Some(first_child)))
            }
            Some(internal @ SbtNode::Internal(_)) => {
                self.set(parent_pos, internal);
                self.set(pos, SbtNode::Leaf(dataset));
                Ok((pos, None))
            }
            // only happens with d > 2
            None => {
                self.set(parent_pos, SbtNode::Internal(new_node));
                self.set(first_child, SbtNode::Leaf(dataset));
                Ok((first_child, None))
            }
        }
    }

    /// Adds the hashes of the leaf at `pos` to every ancestor, root included.
    fn absorb_leaf(&mut self, pos: u64) -> Result<()> {
        let leaf = match self.take(pos) {
            Some(SbtNode::Leaf(leaf)) => leaf,
            other => {
                if let Some(node) = other {
                    self.set(pos, node);
                }
                return Err(Error::Internal {
                    message: format!("no leaf at position {}", pos),
                });
            }
        };

        let result = self.update_ancestors(pos, &leaf.data);
        self.set(pos, SbtNode::Leaf(leaf));
        result
    }

    fn update_ancestors(&mut self, pos: u64, data: &L) -> Result<()> {
        let mut current = pos;
        while let Some(ppos) = self.parent(current) {
            if let Some(Some(SbtNode::Internal(node))) = self.nodes.get_mut(ppos as usize) {
                data.update(node)?;
            }
            current = ppos;
        }
        Ok(())
    }

    /// Recomputes every internal filter from its children, deepest first.
    fn rebuild_filters(&mut self) -> Result<()> {
        let mut internal: Vec<u64> = self
            .iter()
            .filter(|(_, n)| n.kind() == NodeKind::Internal)
            .map(|(p, _)| p)
            .collect();
        internal.sort_unstable_by(|a, b| b.cmp(a));

        for pos in internal {
            let mut node = self.factory(&format!("internal.{}", pos))?;
            for c in self.children(pos) {
                match self.node(c) {
                    Some(SbtNode::Leaf(leaf)) => leaf.data.update(&mut node)?,
                    Some(SbtNode::Internal(other)) => other.update(&mut node)?,
                    None => (),
                }
            }
            self.set(pos, SbtNode::Internal(node));
        }

        Ok(())
    }
}

impl<N> SBT<N, KmerMinHash> {
    /// Adds a sketch labeled `name`, returning its position.
    pub fn insert_sketch<S: Into<String>>(&mut self, name: S, mh: KmerMinHash) -> Result<u64>
    where
        N: Update<N>,
        KmerMinHash: Update<N>,
        SBT<N, KmerMinHash>: FromFactory<N>,
    {
        self.insert_leaf(SigStore::from_minhash(name, mh))
    }

    /// Checks the query against the tree and brings it to the tree
    /// resolution if it is finer.
    pub(crate) fn prepare_query<'a>(
        &self,
        query: &'a KmerMinHash,
    ) -> Result<Cow<'a, KmerMinHash>> {
        let leaf = match self.first_leaf() {
            Some(leaf) => &leaf.data,
            None => return Ok(Cow::Borrowed(query)),
        };

        leaf.check_comparable(query)?;
        if leaf.is_scaled() && query.max_hash() > leaf.max_hash() {
            Ok(Cow::Owned(query.downsample_max_hash(leaf.max_hash())?))
        } else {
            Ok(Cow::Borrowed(query))
        }
    }

    /// Lazily walks the tree from the root, one node per step.
    ///
    /// With `prune`, the children of an internal node whose containment
    /// estimate is below `threshold` are never visited. Internal nodes are
    /// always scored on containment, leaves on `mode`.
    pub fn traverse<'a>(
        &'a self,
        query: &'a KmerMinHash,
        threshold: f64,
        mode: SearchMode,
        prune: bool,
    ) -> Result<Traversal<'a, N, KmerMinHash>> {
        let query = self.prepare_query(query)?;
        let stack = if self.node(0).is_some() {
            vec![(0, 0)]
        } else {
            vec![]
        };

        Ok(Traversal {
            sbt: self,
            query,
            threshold,
            mode,
            prune,
            stack,
        })
    }
}

/// One node visited by a [`Traversal`].
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub position: u64,
    pub depth: usize,
    pub kind: NodeKind,
    pub score: f64,
    /// Whether the score reached the threshold.
    pub passed: bool,
}

/// Depth-first, resumable walk over an [`SBT`].
///
/// Dropping it between visits stops the search.
pub struct Traversal<'a, N, L: Clone> {
    sbt: &'a SBT<N, L>,
    query: Cow<'a, L>,
    threshold: f64,
    mode: SearchMode,
    prune: bool,
    stack: Vec<(u64, usize)>,
}

impl<'a, N, L: Clone> Traversal<'a, N, L> {
    /// The query as compared against the tree.
    pub fn query(&self) -> &L {
        &self.query
    }

    fn visit(&mut self, pos: u64, depth: usize) -> Result<Option<Visit>>
    where
        N: Comparable<L>,
        L: Comparable<L>,
    {
        let sbt = self.sbt;
        let query: &L = &self.query;
        let visit = match sbt.node(pos) {
            None => return Ok(None),
            Some(SbtNode::Internal(node)) => {
                let score = node.containment(query)?;
                let passed = score >= self.threshold;
                if passed || !self.prune {
                    for c in sbt.children(pos).into_iter().rev() {
                        self.stack.push((c, depth + 1));
                    }
                } else {
                    debug!(
                        "pruned subtree at {} (estimate {:.3} < {})",
                        pos, score, self.threshold
                    );
                }
                Visit {
                    position: pos,
                    depth,
                    kind: NodeKind::Internal,
                    score,
                    passed,
                }
            }
            Some(SbtNode::Leaf(leaf)) => {
                let score = self.mode.score::<L>(&leaf.data, query)?;
                Visit {
                    position: pos,
                    depth,
                    kind: NodeKind::Leaf,
                    score,
                    passed: score >= self.threshold,
                }
            }
        };
        Ok(Some(visit))
    }
}

impl<'a, N, L> Iterator for Traversal<'a, N, L>
where
    N: Comparable<L>,
    L: Comparable<L> + Clone,
{
    type Item = Result<Visit>;

    fn next(&mut self) -> Option<Result<Visit>> {
        while let Some((pos, depth)) = self.stack.pop() {
            match self.visit(pos, depth) {
                Ok(Some(visit)) => return Some(Ok(visit)),
                Ok(None) => continue,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl<U> Index for SBT<Node<U>, KmerMinHash>
where
    U: ToWriter,
    Node<U>: Comparable<KmerMinHash> + Update<Node<U>>,
    KmerMinHash: Update<Node<U>>,
    SBT<Node<U>, KmerMinHash>: FromFactory<Node<U>>,
{
    type Item = KmerMinHash;

    fn find<F>(&self, search_fn: F, sig: &KmerMinHash, threshold: f64) -> Result<Vec<&KmerMinHash>>
    where
        F: Fn(&dyn Comparable<KmerMinHash>, &KmerMinHash, f64) -> Result<bool>,
    {
        let prepared = self.prepare_query(sig)?;
        let query: &KmerMinHash = &prepared;
        let mut matches = Vec::new();
        let mut queue = if self.node(0).is_some() { vec![0u64] } else { vec![] };

        while let Some(pos) = queue.pop() {
            match self.node(pos) {
                Some(SbtNode::Internal(node)) => {
                    if node.containment(query)? >= threshold {
                        queue.extend(self.children(pos).into_iter().rev());
                    }
                }
                Some(SbtNode::Leaf(leaf)) => {
                    if search_fn(&leaf.data, query, threshold)? {
                        matches.push(&leaf.data);
                    }
                }
                None => (),
            }
        }

        Ok(matches)
    }

    fn search(
        &self,
        query: &KmerMinHash,
        threshold: f64,
        mode: SearchMode,
    ) -> Result<Vec<SearchResult>> {
        let mut results = vec![];
        for visit in self.traverse(query, threshold, mode, true)? {
            let visit = visit?;
            if visit.kind != NodeKind::Leaf || !visit.passed {
                continue;
            }
            if let Some(SbtNode::Leaf(leaf)) = self.node(visit.position) {
                results.push(
                    SearchResult::builder()
                        .name(leaf.name())
                        .filename(leaf.filename())
                        .score(visit.score)
                        .position(visit.position)
                        .insertion(leaf.insertion())
                        .build(),
                );
            }
        }
        Ok(results)
    }

    fn insert(&mut self, dataset: SigStore<KmerMinHash>) -> Result<()> {
        self.insert_leaf(dataset)?;
        Ok(())
    }

    fn batch_insert(&mut self, datasets: Vec<SigStore<KmerMinHash>>) -> Result<()> {
        self.batch_insert_leaves(datasets)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.save_file(path, None)
    }

    fn signatures(&self) -> Vec<KmerMinHash> {
        self.iter_leaves().map(|(_, l)| l.data.clone()).collect()
    }

    fn signature_refs(&self) -> Vec<&KmerMinHash> {
        self.iter_leaves().map(|(_, l)| &l.data).collect()
    }

    fn len(&self) -> usize {
        self.iter_leaves().count()
    }
}

impl<U> SBT<Node<U>, KmerMinHash>
where
    U: ToWriter,
{
    /// Writes the JSON descriptor to `writer` and every node and leaf to
    /// `storage`.
    pub fn to_writer_with_storage<W: Write>(
        &self,
        writer: &mut W,
        storage: &InnerStorage,
    ) -> Result<()> {
        let mut nodes = BTreeMap::new();
        let mut leaves = BTreeMap::new();

        for (pos, node) in self.iter() {
            match node {
                SbtNode::Internal(n) => {
                    let filename = n.save(storage, &format!("internal.{}", pos))?;
                    let info = NodeInfo {
                        filename,
                        name: n.name.clone(),
                        metadata: n.metadata.clone(),
                    };
                    nodes.insert(pos, info);
                }
                SbtNode::Leaf(l) => {
                    // identical sketches can carry different names
                    let key = format!("{}.{}", l.md5sum(), pos);
                    let filename = storage.save(&key, &l.to_blob()?)?;
                    leaves.insert(pos, l.info(filename));
                }
            }
        }

        let info: SBTInfoV5<NodeInfo, DatasetInfo> = SBTInfoV5 {
            d: self.d,
            version: 5,
            storage: StorageInfo::from_args(storage.args()),
            factory: self.factory.clone(),
            nodes,
            leaves,
        };
        serde_json::to_writer(writer, &info)?;

        info!(
            "saved SBT with {} leaves and {} internal nodes",
            info.leaves.len(),
            info.nodes.len()
        );
        Ok(())
    }

    /// Saves the descriptor to `path`. Without an explicit `storage`, blobs
    /// go to a `.sbt.<basename>` directory next to it.
    pub fn save_file<P: AsRef<Path>>(&self, path: P, storage: Option<InnerStorage>) -> Result<()> {
        let ref_path = path.as_ref();

        let storage = match storage {
            Some(s) => s,
            None => {
                let mut basename = ref_path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .ok_or_else(|| Error::Internal {
                        message: format!("invalid index path {}", ref_path.display()),
                    })?
                    .to_owned();
                if basename.ends_with(".sbt.json") {
                    basename = basename.replace(".sbt.json", "");
                }
                let location = ref_path.parent().unwrap_or_else(|| Path::new(""));
                let subdir = format!(".sbt.{}", basename);
                InnerStorage::new(FSStorage::new(location, &subdir))
            }
        };

        let file = File::create(ref_path)?;
        let mut writer = BufWriter::new(file);
        self.to_writer_with_storage(&mut writer, &storage)?;
        writer.flush()?;

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Factory {
    /// Nodegraph filters, `args` is `(ksize, tablesize, n_tables)`.
    GraphFactory { args: (u64, f64, u64) },
}

impl Factory {
    pub fn graph(ksize: u64, tablesize: u64, n_tables: u64) -> Factory {
        Factory::GraphFactory {
            args: (ksize, tablesize as f64, n_tables),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Factory::GraphFactory { args: (_, t, n) } => {
                if !t.is_finite() || *t < 3.0 {
                    return Err(Error::InvalidSketchParams {
                        message: format!("filter table size must be at least 3, got {}", t),
                    });
                }
                if *n < 1 || *n > u64::from(u8::MAX) {
                    return Err(Error::InvalidSketchParams {
                        message: format!("number of filter tables must be in 1..=255, got {}", n),
                    });
                }
                if Nodegraph::prime_tablesizes(*t as usize, *n as usize).is_none() {
                    return Err(Error::InvalidSketchParams {
                        message: format!(
                            "filter table size {} leaves fewer than {} prime table sizes",
                            t, n
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for Factory {
    fn default() -> Factory {
        Factory::GraphFactory {
            args: (1, 100000.0, 4),
        }
    }
}

#[derive(TypedBuilder, Default, Clone)]
pub struct Node<T> {
    #[builder(setter(into))]
    filename: String,

    #[builder(setter(into))]
    name: String,

    #[builder(default)]
    metadata: HashMap<String, u64>,

    data: T,
}

impl<T> Node<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn metadata(&self) -> &HashMap<String, u64> {
        &self.metadata
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Size of the smallest sketch below this node, at least 1.
    pub fn min_n_below(&self) -> u64 {
        self.metadata
            .get("min_n_below")
            .copied()
            .unwrap_or(1)
            .max(1)
    }
}

impl<T> Node<T>
where
    T: ToWriter,
{
    pub fn save(&self, storage: &InnerStorage, path: &str) -> Result<String> {
        let mut buffer = Vec::new();
        self.data.to_writer(&mut buffer)?;

        storage.save(path, &buffer)
    }
}

impl<T> PartialEq for Node<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Node<T>) -> bool {
        self.data == other.data
    }
}

impl<T> std::fmt::Debug for Node<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node [name={}, filename={}, metadata: {:?}, data: {:?}]",
            self.name, self.filename, self.metadata, self.data
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct NodeInfo {
    pub filename: String,
    pub name: String,
    pub metadata: HashMap<String, u64>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
enum NodeInfoV4 {
    Node(NodeInfo),
    Leaf(DatasetInfo),
}

#[derive(Serialize, Deserialize)]
struct SBTInfoV4<N> {
    d: u32,
    version: u32,
    storage: StorageInfo,
    factory: Factory,
    nodes: BTreeMap<u64, N>,
}

#[derive(Serialize, Deserialize)]
struct SBTInfoV5<N, L> {
    d: u32,
    version: u32,
    storage: StorageInfo,
    factory: Factory,
    nodes: BTreeMap<u64, N>,
    leaves: BTreeMap<u64, L>,
}

#[derive(Serialize, Deserialize)]
struct SBTInfoV6<N, L> {
    d: u32,
    version: u32,
    storage: StorageInfo,
    factory: Factory,
    nodes: BTreeMap<u64, N>,
    signatures: BTreeMap<u64, L>,
}

enum SBTInfo {
    V6(SBTInfoV6<NodeInfo, DatasetInfo>),
    V5(SBTInfoV5<NodeInfo, DatasetInfo>),
    V4(SBTInfoV4<NodeInfoV4>),
}

impl SBTInfo {
    // integer map keys don't survive an untagged enum, so each layout is
    // tried in turn, newest first
    fn parse(raw: &str) -> serde_json::Result<SBTInfo> {
        serde_json::from_str(raw)
            .map(SBTInfo::V6)
            .or_else(|_| serde_json::from_str(raw).map(SBTInfo::V5))
            .or_else(|_| serde_json::from_str(raw).map(SBTInfo::V4))
    }
}

/// A descriptor reduced to what every layout version has in common.
pub(crate) struct Descriptor {
    pub d: u32,
    pub storage: StorageInfo,
    pub factory: Factory,
    pub nodes: BTreeMap<u64, NodeInfo>,
    pub leaves: BTreeMap<u64, DatasetInfo>,
}

impl Descriptor {
    pub(crate) fn from_reader<R: Read>(mut rdr: R) -> Result<Descriptor> {
        let mut raw = String::new();
        rdr.read_to_string(&mut raw)
            .map_err(|e| Error::corrupt(format!("unreadable SBT descriptor: {}", e)))?;

        let sinfo = SBTInfo::parse(&raw)
            .map_err(|e| Error::corrupt(format!("invalid SBT descriptor: {}", e)))?;

        let (d, version, storage, factory, nodes, leaves) = match sinfo {
            SBTInfo::V6(sbt) => (
                sbt.d,
                sbt.version,
                sbt.storage,
                sbt.factory,
                sbt.nodes,
                sbt.signatures,
            ),
            SBTInfo::V5(sbt) => (
                sbt.d,
                sbt.version,
                sbt.storage,
                sbt.factory,
                sbt.nodes,
                sbt.leaves,
            ),
            SBTInfo::V4(sbt) => {
                let mut nodes = BTreeMap::new();
                let mut leaves = BTreeMap::new();
                for (pos, entry) in sbt.nodes {
                    match entry {
                        NodeInfoV4::Node(n) => {
                            nodes.insert(pos, n);
                        }
                        NodeInfoV4::Leaf(l) => {
                            leaves.insert(pos, l);
                        }
                    }
                }
                (sbt.d, sbt.version, sbt.storage, sbt.factory, nodes, leaves)
            }
        };

        if !(4..=6).contains(&version) {
            return Err(Error::corrupt(format!(
                "unsupported SBT version {}",
                version
            )));
        }

        Ok(Descriptor {
            d,
            storage,
            factory,
            nodes,
            leaves,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert_matches::assert_matches;

    use crate::encodings::HashFunctions;
    use crate::index::storage::MemStorage;
    use crate::index::MHBT;

    fn mh(hashes: &[u64]) -> KmerMinHash {
        let mut mh = KmerMinHash::with_num(10, 21, HashFunctions::murmur64_DNA).unwrap();
        mh.add_many(hashes).unwrap();
        mh
    }

    fn leaf_positions<N, L>(sbt: &SBT<N, L>) -> Vec<u64> {
        sbt.iter_leaves().map(|(p, _)| p).collect()
    }

    fn internal_positions<N, L>(sbt: &SBT<N, L>) -> Vec<u64> {
        sbt.iter()
            .filter(|(_, n)| n.kind() == NodeKind::Internal)
            .map(|(p, _)| p)
            .collect()
    }

    #[test]
    fn navigation() {
        let sbt: MHBT = SBT::builder().d(3).build();
        assert_eq!(sbt.parent(0), None);
        assert_eq!(sbt.parent(1), Some(0));
        assert_eq!(sbt.parent(3), Some(0));
        assert_eq!(sbt.parent(4), Some(1));
        assert_eq!(sbt.child(1, 2), 6);
        assert_eq!(sbt.child_slots(0).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn insert_layout_binary() {
        let mut sbt: MHBT = SBT::builder().build();

        assert_eq!(sbt.insert_sketch("a", mh(&[1])).unwrap(), 0);
        assert_eq!(leaf_positions(&sbt), vec![0]);

        // the root leaf moves down
        assert_eq!(sbt.insert_sketch("b", mh(&[2])).unwrap(), 2);
        assert_eq!(leaf_positions(&sbt), vec![1, 2]);
        assert_eq!(internal_positions(&sbt), vec![0]);

        assert_eq!(sbt.insert_sketch("c", mh(&[3])).unwrap(), 4);
        assert_eq!(leaf_positions(&sbt), vec![2, 3, 4]);
        assert_eq!(internal_positions(&sbt), vec![0, 1]);

        match sbt.node(3) {
            Some(SbtNode::Leaf(l)) => assert_eq!(l.name(), "a"),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn insert_layout_ternary() {
        let mut sbt: MHBT = SBT::builder().d(3).build();
        for i in 0..5 {
            sbt.insert_sketch(format!("{}", i), mh(&[i + 1])).unwrap();
        }

        // 0 -> [1 2 3], 1 -> [4 5 6]
        assert_eq!(internal_positions(&sbt), vec![0, 1]);
        assert_eq!(leaf_positions(&sbt), vec![2, 3, 4, 5, 6]);
        assert_eq!(sbt.children(0), vec![1, 2, 3]);
        assert_eq!(sbt.children(1), vec![4, 5, 6]);
    }

    #[test]
    fn root_filter_sees_every_leaf() {
        let mut sbt: MHBT = SBT::builder().build();
        for i in 0..6u64 {
            sbt.insert_sketch(format!("{}", i), mh(&[i * 10, i * 10 + 1]))
                .unwrap();
        }

        let root: &Nodegraph = match sbt.node(0) {
            Some(SbtNode::Internal(n)) => n.data(),
            other => panic!("unexpected root {:?}", other),
        };
        for leaf in sbt.leaves() {
            for h in leaf.data().iter_mins() {
                assert!(root.might_contain(*h));
            }
        }
    }

    #[test]
    fn batch_insert_matches_incremental() {
        let sketches: Vec<_> = (0..7u64).map(|i| mh(&[i, i + 100, i * 7])).collect();

        let mut incremental: MHBT = SBT::builder().build();
        for (i, s) in sketches.iter().enumerate() {
            incremental.insert_sketch(format!("{}", i), s.clone()).unwrap();
        }

        let mut batch: MHBT = SBT::builder().build();
        batch
            .batch_insert_leaves(
                sketches
                    .iter()
                    .enumerate()
                    .map(|(i, s)| SigStore::from_minhash(format!("{}", i), s.clone()))
                    .collect(),
            )
            .unwrap();

        assert_eq!(leaf_positions(&incremental), leaf_positions(&batch));
        for (pos, node) in incremental.iter() {
            assert_eq!(Some(node), batch.node(pos));
        }
    }

    #[test]
    fn batch_insert_is_all_or_nothing() {
        let mut sbt: MHBT = SBT::builder().build();
        sbt.insert_sketch("a", mh(&[1])).unwrap();

        let other = KmerMinHash::with_num(10, 31, HashFunctions::murmur64_DNA).unwrap();
        let res = sbt.batch_insert_leaves(vec![
            SigStore::from_minhash("b", mh(&[2])),
            SigStore::from_minhash("c", other),
        ]);
        assert!(res.is_err());
        assert_eq!(sbt.len(), 1);
    }

    #[test]
    fn invalid_degree() {
        assert!(MHBT::new(1, Factory::default()).is_err());
        assert!(MHBT::new(2, Factory::graph(1, 2, 4)).is_err());
        assert!(MHBT::new(2, Factory::graph(1, 100, 0)).is_err());
        assert_matches!(
            MHBT::new(2, Factory::graph(1, 3, 4)),
            Err(Error::InvalidSketchParams { .. })
        );
        assert_matches!(
            MHBT::new(2, Factory::graph(1, 10, 4)),
            Err(Error::InvalidSketchParams { .. })
        );
        assert!(MHBT::new(2, Factory::graph(1, 10, 3)).is_ok());

        let mut sbt: MHBT = SBT::builder().d(0).build();
        assert!(sbt.insert_sketch("a", mh(&[1])).is_err());
    }

    #[test]
    fn traversal_prunes() {
        let mut sbt: MHBT = SBT::builder().build();
        sbt.insert_sketch("a", mh(&[1, 2, 3])).unwrap();
        sbt.insert_sketch("b", mh(&[4, 5, 6])).unwrap();
        sbt.insert_sketch("c", mh(&[7, 8, 9])).unwrap();

        let query = mh(&[100, 200, 300]);
        let pruned: Vec<Visit> = sbt
            .traverse(&query, 0.5, SearchMode::Similarity, true)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].position, 0);
        assert!(!pruned[0].passed);

        let full: Vec<Visit> = sbt
            .traverse(&query, 0.5, SearchMode::Similarity, false)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let order: Vec<u64> = full.iter().map(|v| v.position).collect();
        assert_eq!(order, vec![0, 1, 3, 4, 2]);
        assert_eq!(full[2].depth, 2);
    }

    #[test]
    fn traversal_can_stop_early() {
        let mut sbt: MHBT = SBT::builder().build();
        for i in 0..4u64 {
            sbt.insert_sketch(format!("{}", i), mh(&[1, i + 2])).unwrap();
        }

        let query = mh(&[1]);
        let mut traversal = sbt
            .traverse(&query, 0.0, SearchMode::Containment, true)
            .unwrap();
        let first = traversal.next().unwrap().unwrap();
        assert_eq!(first.position, 0);
        drop(traversal);
    }

    #[test]
    fn empty_tree() {
        let sbt: MHBT = SBT::builder().build();
        assert!(sbt.is_empty());
        assert!(sbt
            .search(&mh(&[1]), 0.0, SearchMode::Similarity)
            .unwrap()
            .is_empty());
        assert_eq!(sbt.traverse(&mh(&[1]), 0.0, SearchMode::Similarity, true).unwrap().count(), 0);
    }

    #[test]
    fn search_and_find() {
        let mut sbt: MHBT = SBT::builder().build();
        sbt.insert_sketch("a", mh(&[1, 2, 3, 4])).unwrap();
        sbt.insert_sketch("b", mh(&[1, 2, 30, 40])).unwrap();
        sbt.insert_sketch("c", mh(&[10, 20, 30, 40])).unwrap();

        let query = mh(&[1, 2]);
        let results = sbt.search(&query, 1.0, SearchMode::Containment).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name().as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let found = sbt
            .find(crate::index::search::search_minhashes_containment, &query, 1.0)
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn incompatible_query() {
        let mut sbt: MHBT = SBT::builder().build();
        sbt.insert_sketch("a", mh(&[1])).unwrap();

        let query = KmerMinHash::with_num(10, 31, HashFunctions::murmur64_DNA).unwrap();
        assert!(sbt.search(&query, 0.1, SearchMode::Similarity).is_err());
    }

    #[test]
    fn finer_query_is_downsampled() {
        let mut leaf = KmerMinHash::with_scaled(10, 21, HashFunctions::murmur64_DNA).unwrap();
        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::murmur64_DNA).unwrap();
        let small = leaf.max_hash() / 2;
        leaf.add_many(&[1, 2, small]).unwrap();
        query.add_many(&[1, 2, small, u64::MAX - 1]).unwrap();

        let mut sbt: MHBT = SBT::builder().build();
        sbt.insert_sketch("a", leaf).unwrap();

        let results = sbt.search(&query, 1.0, SearchMode::Containment).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn coarser_query_downsamples_leaves() {
        let mut leaf = KmerMinHash::with_scaled(1, 21, HashFunctions::murmur64_DNA).unwrap();
        let mut query = KmerMinHash::with_scaled(10, 21, HashFunctions::murmur64_DNA).unwrap();
        let small = query.max_hash() / 2;
        leaf.add_many(&[1, 2, small, u64::MAX - 1]).unwrap();
        query.add_many(&[1, 2, small]).unwrap();

        let mut sbt: MHBT = SBT::builder().build();
        sbt.insert_sketch("a", leaf).unwrap();

        for mode in [SearchMode::Similarity, SearchMode::Containment] {
            let results = sbt.search(&query, 1.0, mode).unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].score(), 1.0);
        }
    }

    #[test]
    fn descriptor_roundtrip_with_memstorage() {
        let mut sbt: MHBT = SBT::builder().build();
        sbt.insert_sketch("a", mh(&[1, 2])).unwrap();
        sbt.insert_sketch("b", mh(&[3, 4])).unwrap();

        let storage = InnerStorage::new(MemStorage::new());
        let mut buffer = Vec::new();
        sbt.to_writer_with_storage(&mut buffer, &storage).unwrap();

        let descriptor = Descriptor::from_reader(&buffer[..]).unwrap();
        assert_eq!(descriptor.d, 2);
        assert_eq!(descriptor.nodes.keys().collect::<Vec<_>>(), vec![&0]);
        assert_eq!(descriptor.leaves.keys().collect::<Vec<_>>(), vec![&1, &2]);
        assert_eq!(descriptor.leaves[&2].insertion, Some(1));
        assert_eq!(descriptor.storage.backend, "MemStorage");
    }

    #[test]
    fn descriptor_versions() {
        let v4 = r#"{"d": 2, "version": 4, "storage": {"backend": "FSStorage", "args": {"path": ".sbt.v4"}},
            "factory": {"class": "GraphFactory", "args": [1, 100000.0, 4]},
            "nodes": {"0": {"filename": "internal.0", "name": "internal.0", "metadata": {"min_n_below": 3}},
                      "1": {"filename": "abc", "name": "a", "metadata": ""}}}"#;
        let descriptor = Descriptor::from_reader(v4.as_bytes()).unwrap();
        assert_eq!(descriptor.nodes.len(), 1);
        assert_eq!(descriptor.leaves.len(), 1);
        assert_eq!(descriptor.leaves[&1].name, "a");

        let v6 = r#"{"d": 2, "version": 6, "storage": {"backend": "FSStorage", "args": {"path": ".sbt.v6"}},
            "factory": {"class": "GraphFactory", "args": [1, 100000.0, 4]},
            "nodes": {}, "signatures": {"0": {"filename": "abc", "name": "a", "metadata": ""}}}"#;
        let descriptor = Descriptor::from_reader(v6.as_bytes()).unwrap();
        assert_eq!(descriptor.leaves.len(), 1);

        let v7 = v6.replace("\"version\": 6", "\"version\": 7");
        assert!(Descriptor::from_reader(v7.as_bytes()).is_err());
        assert!(Descriptor::from_reader(&b"{\"d\": 2}"[..]).is_err());
    }
}
