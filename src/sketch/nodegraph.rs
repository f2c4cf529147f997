use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use fixedbitset::FixedBitSet;

use crate::prelude::{Comparable, ToWriter, Update};
use crate::sketch::minhash::KmerMinHash;
use crate::Error;
use crate::HashIntoType;

const OXLI_MAGIC: u32 = 0x4f58_4c49;
const OXLI_VERSION: u8 = 4;
const OXLI_NODEGRAPH: u8 = 2;

/// A Bloom filter made of `k` bit tables with distinct prime sizes.
///
/// Probe `i` of a hash `h` is bit `h % size_i` of table `i`. Bits are only ever
/// set, never cleared.
#[derive(Debug, Default, Clone)]
pub struct Nodegraph {
    bs: Vec<FixedBitSet>,
    ksize: usize,
    occupied_bins: usize,
    unique_kmers: usize,
}

// unique_kmers is not part of the khmer format, so it is not compared
impl PartialEq for Nodegraph {
    fn eq(&self, other: &Nodegraph) -> bool {
        self.bs == other.bs
            && self.occupied_bins == other.occupied_bins
            && self.ksize == other.ksize
    }
}

impl Update<Nodegraph> for Nodegraph {
    fn update(&self, other: &mut Nodegraph) -> Result<(), Error> {
        other.union_with(self)
    }
}

impl Update<Nodegraph> for KmerMinHash {
    fn update(&self, other: &mut Nodegraph) -> Result<(), Error> {
        for h in self.iter_mins() {
            other.insert(*h);
        }
        Ok(())
    }
}

impl Comparable<Nodegraph> for Nodegraph {
    fn similarity(&self, other: &Nodegraph) -> Result<f64, Error> {
        self.check_tablesizes(other)?;
        Ok(Nodegraph::similarity(self, other))
    }

    fn containment(&self, other: &Nodegraph) -> Result<f64, Error> {
        self.check_tablesizes(other)?;
        Ok(Nodegraph::containment(self, other))
    }
}

impl ToWriter for Nodegraph {
    fn to_writer<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: io::Write,
    {
        self.save_to_writer(writer)
    }
}

impl Nodegraph {
    pub fn new(tablesizes: &[usize], ksize: usize) -> Nodegraph {
        let mut bs = Vec::with_capacity(tablesizes.len());
        for size in tablesizes.iter() {
            bs.push(FixedBitSet::with_capacity(*size));
        }

        Nodegraph {
            bs,
            ksize,
            occupied_bins: 0,
            unique_kmers: 0,
        }
    }

    /// Builds a filter with the `n_tables` largest primes below `tablesize`.
    ///
    /// Gets fewer tables when there are not enough odd primes below
    /// `tablesize`; check with [`Nodegraph::prime_tablesizes`] first.
    pub fn with_tables(tablesize: usize, n_tables: usize, ksize: usize) -> Nodegraph {
        let tablesizes = Nodegraph::largest_primes(tablesize, n_tables);
        Nodegraph::new(tablesizes.as_slice(), ksize)
    }

    /// The `n_tables` table sizes [`Nodegraph::with_tables`] would use, or
    /// `None` if `tablesize` is too small to fit that many tables.
    pub fn prime_tablesizes(tablesize: usize, n_tables: usize) -> Option<Vec<usize>> {
        let tablesizes = Nodegraph::largest_primes(tablesize, n_tables);
        if n_tables > 0 && tablesizes.len() == n_tables {
            Some(tablesizes)
        } else {
            None
        }
    }

    fn largest_primes(tablesize: usize, n_tables: usize) -> Vec<usize> {
        let mut tablesizes = Vec::with_capacity(n_tables);

        let mut i = u64::max(tablesize.saturating_sub(1) as u64, 2);
        if i % 2 == 0 {
            i -= 1
        }

        while tablesizes.len() != n_tables {
            if primal_check::miller_rabin(i) {
                tablesizes.push(i as usize);
            }
            if i == 1 {
                break;
            }
            i -= 2;
        }
        tablesizes
    }

    /// Sets the bits for `hash`. Returns true if any bit was not set before.
    pub fn insert(&mut self, hash: HashIntoType) -> bool {
        let mut is_new_kmer = false;

        for (i, bitset) in self.bs.iter_mut().enumerate() {
            let bin = hash % bitset.len() as u64;
            if !bitset.put(bin as usize) {
                if i == 0 {
                    self.occupied_bins += 1;
                }
                is_new_kmer = true;
            }
        }

        if is_new_kmer {
            self.unique_kmers += 1
        }
        is_new_kmer
    }

    pub fn count(&mut self, hash: HashIntoType) -> bool {
        self.insert(hash)
    }

    /// True if every table has the bit for `hash` set. False positives are
    /// possible, false negatives are not.
    pub fn might_contain(&self, hash: HashIntoType) -> bool {
        self.bs.iter().all(|bitset| {
            let bin = hash % bitset.len() as u64;
            bitset.contains(bin as usize)
        })
    }

    pub fn get(&self, hash: HashIntoType) -> usize {
        usize::from(self.might_contain(hash))
    }

    pub fn union_with(&mut self, other: &Nodegraph) -> Result<(), Error> {
        self.check_tablesizes(other)?;

        for (bs, bs_other) in self.bs.iter_mut().zip(&other.bs) {
            bs.union_with(bs_other);
        }
        self.occupied_bins = self.bs.first().map(|bs| bs.count_ones(..)).unwrap_or(0);
        Ok(())
    }

    fn check_tablesizes(&self, other: &Nodegraph) -> Result<(), Error> {
        let (left, right) = (self.tablesizes(), other.tablesizes());
        if left != right {
            return Err(Error::FilterSizeMismatch { left, right });
        }
        Ok(())
    }

    pub fn expected_collisions(&self) -> f64 {
        let min_size = match self.bs.iter().map(|x| x.len()).min() {
            Some(size) if size > 0 => size,
            _ => return 0.0,
        };
        let n_ht = self.bs.len();
        let occupancy = self.occupied_bins;

        let fp_one = occupancy as f64 / min_size as f64;
        f64::powf(fp_one, n_ht as f64)
    }

    pub fn tablesize(&self) -> usize {
        self.bs.iter().map(|x| x.len()).sum()
    }

    pub fn noccupied(&self) -> usize {
        self.occupied_bins
    }

    /// Number of hashes of `mh` that might be in this filter.
    pub fn matches(&self, mh: &KmerMinHash) -> usize {
        mh.iter_mins().filter(|x| self.might_contain(**x)).count()
    }

    /// Fraction of the hashes of `query` that might be in this filter.
    ///
    /// Never below the true fraction, which makes it a safe upper bound for
    /// pruning.
    pub fn estimated_containment(&self, query: &KmerMinHash) -> f64 {
        if query.is_empty() {
            return 0.0;
        }
        let size = query.iter_mins().count();
        self.matches(query) as f64 / size as f64
    }

    pub fn ntables(&self) -> usize {
        self.bs.len()
    }

    pub fn ksize(&self) -> usize {
        self.ksize
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        self.save_to_writer(&mut File::create(path)?)?;
        Ok(())
    }

    pub fn save_to_writer<W>(&self, wtr: &mut W) -> Result<(), Error>
    where
        W: io::Write,
    {
        wtr.write_all(b"OXLI")?;
        wtr.write_u8(OXLI_VERSION)?;
        wtr.write_u8(OXLI_NODEGRAPH)?;
        wtr.write_u32::<LittleEndian>(self.ksize as u32)?;
        wtr.write_u8(self.bs.len() as u8)?;
        wtr.write_u64::<LittleEndian>(self.occupied_bins as u64)?;
        for count in &self.bs {
            let tablesize = count.len();
            wtr.write_u64::<LittleEndian>(tablesize as u64)?;

            let byte_size = tablesize / 8 + 1;
            let (div, rem) = (byte_size / 4, byte_size % 4);

            for block in &count.as_slice()[..div] {
                wtr.write_u32::<LittleEndian>(*block)?;
            }

            if rem != 0 {
                let mut cursor = [0u8; 4];
                // a table size that is a multiple of 32 has no partial block
                let last = count.as_slice().get(div).copied().unwrap_or(0);
                LittleEndian::write_u32(&mut cursor, last);
                wtr.write_all(&cursor[..rem])?;
            }
        }
        Ok(())
    }

    /// Reads a khmer nodegraph (OXLI version 4), gzipped or not.
    pub fn from_reader<R>(rdr: R) -> Result<Nodegraph, Error>
    where
        R: io::Read,
    {
        let (mut rdr, _format) = niffler::get_reader(Box::new(rdr))
            .map_err(|e| Error::corrupt(format!("unreadable nodegraph: {}", e)))?;
        Nodegraph::read_oxli(&mut rdr).map_err(|e| match e {
            Error::IOError(e) => Error::corrupt(format!("truncated nodegraph: {}", e)),
            e => e,
        })
    }

    fn read_oxli<R: io::Read>(rdr: &mut R) -> Result<Nodegraph, Error> {
        let signature = rdr.read_u32::<BigEndian>()?;
        if signature != OXLI_MAGIC {
            return Err(Error::corrupt(format!(
                "bad nodegraph signature {:#010x}",
                signature
            )));
        }

        let version = rdr.read_u8()?;
        if version != OXLI_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported nodegraph version {}",
                version
            )));
        }

        let ht_type = rdr.read_u8()?;
        if ht_type != OXLI_NODEGRAPH {
            return Err(Error::corrupt(format!(
                "not a nodegraph (table type {})",
                ht_type
            )));
        }

        let ksize = rdr.read_u32::<LittleEndian>()?;
        let n_tables = rdr.read_u8()?;
        if n_tables == 0 {
            return Err(Error::corrupt("nodegraph without tables"));
        }
        let occupied_bins = rdr.read_u64::<LittleEndian>()? as usize;

        let mut bs = Vec::with_capacity(n_tables as usize);
        for _i in 0..n_tables {
            let tablesize = rdr.read_u64::<LittleEndian>()?;
            if tablesize == 0 {
                return Err(Error::corrupt("empty nodegraph table"));
            }
            let tablesize = usize::try_from(tablesize).map_err(|_| {
                Error::corrupt(format!("nodegraph table too large: {}", tablesize))
            })?;
            let byte_size = tablesize / 8 + 1;

            // the header size is untrusted, so only keep what the input holds
            let mut raw = Vec::new();
            rdr.by_ref().take(byte_size as u64).read_to_end(&mut raw)?;
            if raw.len() != byte_size {
                return Err(Error::corrupt(format!(
                    "truncated nodegraph table: expected {} bytes, found {}",
                    byte_size,
                    raw.len()
                )));
            }

            let blocks = raw.chunks(4).map(|chunk| {
                let mut values = [0u8; 4];
                values[..chunk.len()].copy_from_slice(chunk);
                LittleEndian::read_u32(&values)
            });

            bs.push(FixedBitSet::with_capacity_and_blocks(tablesize, blocks));
        }

        Ok(Nodegraph {
            bs,
            ksize: ksize as usize,
            occupied_bins,
            unique_kmers: 0,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Nodegraph, Error> {
        let mut reader = io::BufReader::new(File::open(path)?);
        Nodegraph::from_reader(&mut reader)
    }

    pub fn tablesizes(&self) -> Vec<u64> {
        self.bs.iter().map(|x| x.len() as u64).collect()
    }

    pub fn n_occupied_bins(&self) -> usize {
        self.occupied_bins
    }

    pub fn unique_kmers(&self) -> usize {
        self.unique_kmers
    }

    pub fn similarity(&self, other: &Nodegraph) -> f64 {
        let result: usize = self
            .bs
            .iter()
            .zip(&other.bs)
            .map(|(bs, bs_other)| bs.intersection(bs_other).count())
            .sum();
        let size: usize = self
            .bs
            .iter()
            .zip(&other.bs)
            .map(|(bs, bs_other)| bs.union(bs_other).count())
            .sum();
        if size == 0 {
            return 0.0;
        }
        result as f64 / size as f64
    }

    pub fn containment(&self, other: &Nodegraph) -> f64 {
        let result: usize = self
            .bs
            .iter()
            .zip(&other.bs)
            .map(|(bs, bs_other)| bs.intersection(bs_other).count())
            .sum();
        let size: usize = other.bs.iter().map(|bs| bs.count_ones(..)).sum();
        if size == 0 {
            return 0.0;
        }
        result as f64 / size as f64
    }
}
