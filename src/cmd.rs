//! Commands behind the `mhbt` binary.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{info, warn};

use crate::encodings::HashFunctions;
use crate::index::sbt::walker::print_tree;
use crate::index::sbt::Factory;
use crate::index::search::{SearchMode, SearchResult};
use crate::index::{SigStore, MHBT};
use crate::prelude::*;
use crate::sketch::minhash::{max_hash_for_scaled, KmerMinHash};
use crate::{Error, Result};

/// Which sketches to take from signature files.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub ksize: Option<usize>,
    pub moltype: Option<HashFunctions>,
    pub scaled: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct IndexParams {
    pub d: u32,
    pub tablesize: u64,
    pub n_tables: u64,
    /// Extend an existing index instead of replacing it.
    pub append: bool,
}

impl Default for IndexParams {
    fn default() -> IndexParams {
        IndexParams {
            d: 2,
            tablesize: 100_000,
            n_tables: 4,
            append: false,
        }
    }
}

fn load_sketches(path: &Path, selection: &Selection) -> Result<Vec<SigStore<KmerMinHash>>> {
    let reader = BufReader::new(File::open(path)?);
    let sigs = Signature::load_signatures(reader, selection.ksize, selection.moltype)?;

    let mut datasets = Vec::with_capacity(sigs.len());
    for sig in sigs {
        let mut dataset = SigStore::try_from(sig)?;
        if let Some(scaled) = selection.scaled {
            match resample(dataset.data(), scaled) {
                Ok(mh) => dataset.data = mh,
                Err(e) => {
                    warn!("skipping {} from {}: {}", dataset.name(), path.display(), e);
                    continue;
                }
            }
        }
        datasets.push(dataset);
    }

    if datasets.is_empty() {
        warn!("no matching sketches in {}", path.display());
    }
    Ok(datasets)
}

fn resample(mh: &KmerMinHash, scaled: u64) -> Result<KmerMinHash> {
    if !mh.is_scaled() {
        return Err(Error::InvalidSketchParams {
            message: "cannot use --scaled with a num sketch".into(),
        });
    }
    mh.downsample_max_hash(max_hash_for_scaled(scaled))
}

/// Loads the first matching sketch of a signature file.
pub fn load_query(path: &Path, selection: &Selection) -> Result<SigStore<KmerMinHash>> {
    let mut sketches = load_sketches(path, selection)?;
    if sketches.len() > 1 {
        warn!(
            "{} has {} matching sketches, using the first one",
            path.display(),
            sketches.len()
        );
    }
    if sketches.is_empty() {
        return Err(Error::InvalidSketchParams {
            message: format!("no matching sketch in {}", path.display()),
        });
    }
    Ok(sketches.remove(0))
}

/// Builds an index at `output` from every matching sketch in `sig_files`.
/// Returns how many datasets the index holds.
pub fn index(
    output: &Path,
    sig_files: &[PathBuf],
    selection: &Selection,
    params: &IndexParams,
) -> Result<usize> {
    let datasets: Vec<_> = sig_files
        .iter()
        .map(|path| load_sketches(path, selection))
        .flatten_ok()
        .collect::<Result<_>>()?;

    if datasets.is_empty() {
        return Err(Error::InvalidSketchParams {
            message: "no sketches to index".into(),
        });
    }

    let mut sbt = if params.append && output.exists() {
        info!("appending to {}", output.display());
        MHBT::from_path(output)?
    } else {
        MHBT::new(params.d, Factory::graph(1, params.tablesize, params.n_tables))?
    };

    info!(
        "indexing {} datasets from {} files",
        datasets.len(),
        sig_files.len()
    );
    sbt.batch_insert(datasets)?;
    sbt.save_file(output, None)?;

    Ok(sbt.len())
}

pub fn search(
    query: &Path,
    index: &Path,
    selection: &Selection,
    threshold: f64,
    mode: SearchMode,
    ranked: bool,
) -> Result<Vec<SearchResult>> {
    let query = load_query(query, selection)?;
    let sbt = MHBT::from_path(index)?;
    info!(
        "searching {} datasets for {} ({}, threshold {})",
        sbt.len(),
        query.name(),
        mode,
        threshold
    );

    if ranked {
        sbt.search_ranked(query.data(), threshold, mode)
    } else {
        sbt.search(query.data(), threshold, mode)
    }
}

/// Writes search results as tab-separated lines.
///
/// Names holding tabs, quotes or newlines are quoted.
pub fn write_results<W: Write>(results: &[SearchResult], writer: &mut W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);

    wtr.write_record(["score", "name", "filename"])?;
    for r in results {
        let score = format!("{:.3}", r.score());
        wtr.write_record([score.as_str(), r.name().as_str(), r.filename().as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn print(index: &Path, query: &Path, selection: &Selection) -> Result<()> {
    let query = load_query(query, selection)?;
    let sbt = MHBT::from_path(index)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    print_tree(&sbt, query.data(), &mut handle)
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_sigs(path: &Path, sketches: Vec<(&str, KmerMinHash)>) {
        let sigs: Vec<Signature> = sketches
            .into_iter()
            .map(|(name, mh)| {
                Signature::builder()
                    .name(Some(name.into()))
                    .filename(Some(format!("{}.fa", name)))
                    .signatures(vec![mh])
                    .build()
            })
            .collect();
        let mut file = File::create(path).unwrap();
        serde_json::to_writer(&mut file, &sigs).unwrap();
    }

    fn scaled(hashes: &[u64]) -> KmerMinHash {
        let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::murmur64_DNA).unwrap();
        mh.add_many(hashes).unwrap();
        mh
    }

    #[test]
    fn index_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let sigs = dir.path().join("sigs.json");
        write_sigs(
            &sigs,
            vec![("a", scaled(&[1, 2, 3, 4])), ("b", scaled(&[3, 4, 5, 6]))],
        );
        let query = dir.path().join("query.json");
        write_sigs(&query, vec![("q", scaled(&[1, 2]))]);

        let output = dir.path().join("db.sbt.json");
        let n = index(
            &output,
            &[sigs.clone()],
            &Selection::default(),
            &IndexParams::default(),
        )
        .unwrap();
        assert_eq!(n, 2);
        assert!(dir.path().join(".sbt.db").is_dir());

        let results = search(
            &query,
            &output,
            &Selection::default(),
            1.0,
            SearchMode::Containment,
            false,
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name(), "a");
        assert_eq!(results[0].filename(), "a.fa");

        let params = IndexParams {
            append: true,
            ..IndexParams::default()
        };
        assert_eq!(index(&output, &[sigs], &Selection::default(), &params).unwrap(), 4);
    }

    #[test]
    fn scaled_selection_skips_num_sketches() {
        let dir = tempfile::tempdir().unwrap();
        let sigs = dir.path().join("sigs.json");
        let mut num = KmerMinHash::with_num(10, 21, HashFunctions::murmur64_DNA).unwrap();
        num.add_hash(1);
        write_sigs(&sigs, vec![("num", num), ("scaled", scaled(&[1, 2]))]);

        let selection = Selection {
            scaled: Some(10),
            ..Selection::default()
        };
        let datasets = load_sketches(&sigs, &selection).unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name(), "scaled");
        assert_eq!(datasets[0].data().scaled(), 10);
    }

    #[test]
    fn results_are_tab_separated() {
        let results = vec![SearchResult::builder()
            .name("a")
            .filename("a.fa")
            .score(0.5)
            .position(1)
            .insertion(0)
            .build()];
        let mut out = Vec::new();
        write_results(&results, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "score\tname\tfilename\n0.500\ta\ta.fa\n"
        );
    }

    #[test]
    fn awkward_names_are_quoted() {
        let results = vec![
            SearchResult::builder()
                .name("two\tcolumns")
                .filename("a.fa")
                .score(1.0)
                .position(1)
                .insertion(0)
                .build(),
            SearchResult::builder()
                .name("line\nbreak")
                .filename("b \"quoted\".fa")
                .score(0.25)
                .position(2)
                .insertion(1)
                .build(),
        ];
        let mut out = Vec::new();
        write_results(&results, &mut out).unwrap();

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_reader(&out[..]);
        let rows: Vec<Vec<String>> = rdr
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        assert_eq!(
            rows,
            vec![
                vec!["1.000", "two\tcolumns", "a.fa"],
                vec!["0.250", "line\nbreak", "b \"quoted\".fa"],
            ]
        );
    }
}
