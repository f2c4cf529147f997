use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::index::search::{SearchMode, SearchResult};
use crate::index::storage::{FSStorage, InnerStorage, StorageArgs, StorageInfo};
use crate::index::{read_leaf_blob, DatasetInfo, Index, SigStore};
use crate::prelude::*;
use crate::sketch::minhash::KmerMinHash;
use crate::{Error, Result};

/// Every dataset in a list, each one compared against the query.
#[derive(TypedBuilder, Debug, Clone)]
pub struct LinearIndex<L> {
    #[builder(default)]
    storage: Option<InnerStorage>,

    #[builder(default)]
    datasets: Vec<SigStore<L>>,
}

#[derive(Serialize, Deserialize)]
struct LinearInfo<L> {
    version: u32,
    storage: StorageInfo,
    leaves: Vec<L>,
}

impl<L> LinearIndex<L> {
    pub fn storage(&self) -> Option<InnerStorage> {
        self.storage.clone()
    }

    pub fn datasets(&self) -> &[SigStore<L>] {
        &self.datasets
    }
}

impl Index for LinearIndex<KmerMinHash> {
    type Item = KmerMinHash;

    fn search(
        &self,
        query: &KmerMinHash,
        threshold: f64,
        mode: SearchMode,
    ) -> Result<Vec<SearchResult>> {
        let mut results = vec![];
        for (position, dataset) in self.datasets.iter().enumerate() {
            dataset.data().check_comparable(query)?;

            let score = mode.score::<KmerMinHash>(dataset.data(), query)?;
            if score >= threshold {
                results.push(
                    SearchResult::builder()
                        .name(dataset.name())
                        .filename(dataset.filename())
                        .score(score)
                        .position(position as u64)
                        .insertion(dataset.insertion())
                        .build(),
                );
            }
        }
        Ok(results)
    }

    fn insert(&mut self, mut dataset: SigStore<KmerMinHash>) -> Result<()> {
        if let Some(first) = self.datasets.first() {
            first.data().check_compatible(dataset.data())?;
        }
        dataset.insertion = self.datasets.len() as u64;
        self.datasets.push(dataset);
        Ok(())
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.save_file(path, None)
    }

    fn signatures(&self) -> Vec<KmerMinHash> {
        self.datasets.iter().map(|x| x.data().clone()).collect()
    }

    fn signature_refs(&self) -> Vec<&KmerMinHash> {
        self.datasets.iter().map(|x| x.data()).collect()
    }
}

impl LinearIndex<KmerMinHash> {
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
                if basename.ends_with(".json") {
                    basename = basename.replace(".json", "");
                }
                let location = ref_path.parent().unwrap_or_else(|| Path::new(""));
                let subdir = format!(".linear.{}", basename);
                InnerStorage::new(FSStorage::new(location, &subdir))
            }
        };

        let mut leaves = Vec::with_capacity(self.datasets.len());
        for (i, l) in self.datasets.iter().enumerate() {
            let key = format!("{}.{}", l.md5sum(), i);
            let filename = storage.save(&key, &l.to_blob()?)?;
            leaves.push(l.info(filename));
        }

        let info: LinearInfo<DatasetInfo> = LinearInfo {
            storage: StorageInfo::from_args(storage.args()),
            version: 5,
            leaves,
        };

        let file = File::create(ref_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &info)?;
        writer.flush()?;

        Ok(())
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<LinearIndex<KmerMinHash>> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let linear: LinearInfo<DatasetInfo> = serde_json::from_reader(reader)
            .map_err(|e| Error::corrupt(format!("invalid linear index: {}", e)))?;

        let storage = match &linear.storage.args {
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

        LinearIndex::from_info(linear, storage)
    }

    pub fn from_reader_with_storage<R: Read>(
        rdr: R,
        storage: InnerStorage,
    ) -> Result<LinearIndex<KmerMinHash>> {
        let linear: LinearInfo<DatasetInfo> = serde_json::from_reader(rdr)
            .map_err(|e| Error::corrupt(format!("invalid linear index: {}", e)))?;
        LinearIndex::from_info(linear, storage)
    }

    fn from_info(
        linear: LinearInfo<DatasetInfo>,
        storage: InnerStorage,
    ) -> Result<LinearIndex<KmerMinHash>> {
        let mut datasets = Vec::with_capacity(linear.leaves.len());
        for (i, l) in linear.leaves.into_iter().enumerate() {
            let raw = storage
                .load(&l.filename)
                .map_err(|e| Error::corrupt(format!("missing blob {}: {}", l.filename, e)))?;
            let (filename, mh) = read_leaf_blob(&raw)
                .map_err(|e| Error::corrupt(format!("dataset {} is unreadable: {}", i, e)))?;

            datasets.push(
                SigStore::builder()
                    .filename(filename)
                    .name(l.name)
                    .metadata(l.metadata)
                    .insertion(l.insertion.unwrap_or(i as u64))
                    .data(mh)
                    .build(),
            );
        }

        info!("loaded linear index with {} datasets", datasets.len());
        Ok(LinearIndex {
            storage: Some(storage),
            datasets,
        })
    }
}
