use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use std::fmt::Write;

use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use crate::_hash_murmur;
use crate::encodings::HashFunctions;
use crate::signature::{SeqToHashes, SigsTrait};
use crate::Error;

pub fn max_hash_for_scaled(scaled: u64) -> u64 {
    match scaled {
        0 => 0,
        1 => u64::MAX,
        _ => u64::MAX / scaled,
    }
}

pub fn scaled_for_max_hash(max_hash: u64) -> u64 {
    match max_hash {
        0 => 0,
        u64::MAX => 1,
        _ => u64::MAX / max_hash,
    }
}

/// A MinHash sketch over the k-mers of one dataset.
///
/// Either a num-sketch (keeps the `num` smallest hashes seen, `max_hash == 0`)
/// or a scaled sketch (keeps every hash `<= max_hash`, `num == 0`). Hashes are
/// kept in a `BTreeSet`, so insertion and eviction of the current maximum are
/// both logarithmic.
#[derive(Debug, Clone, PartialEq)]
pub struct KmerMinHash {
    num: u32,
    ksize: u32,
    hash_function: HashFunctions,
    seed: u64,
    max_hash: u64,
    mins: BTreeSet<u64>,
    abunds: Option<BTreeMap<u64, u64>>,
}

impl Serialize for KmerMinHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let n_fields = match &self.abunds {
            Some(_) => 8,
            _ => 7,
        };

        let mut partial = serializer.serialize_struct("KmerMinHash", n_fields)?;
        partial.serialize_field("num", &self.num)?;
        partial.serialize_field("ksize", &self.ksize)?;
        partial.serialize_field("seed", &self.seed)?;
        partial.serialize_field("max_hash", &self.max_hash)?;
        partial.serialize_field("mins", &self.mins)?;
        partial.serialize_field("md5sum", &self.md5sum())?;

        if let Some(abunds) = &self.abunds {
            let abs: Vec<u64> = abunds.values().cloned().collect();
            partial.serialize_field("abundances", &abs)?;
        }

        partial.serialize_field("molecule", &self.hash_function.to_string())?;

        partial.end()
    }
}

impl<'de> Deserialize<'de> for KmerMinHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TempSig {
            num: u32,
            ksize: u32,
            #[serde(default = "default_seed")]
            seed: u64,
            max_hash: u64,
            #[allow(dead_code)]
            #[serde(default)]
            md5sum: Option<String>,
            mins: Vec<u64>,
            abundances: Option<Vec<u64>>,
            molecule: String,
        }

        let tmpsig = TempSig::deserialize(deserializer)?;

        let hash_function =
            HashFunctions::try_from(tmpsig.molecule.as_str()).map_err(D::Error::custom)?;

        if (tmpsig.num == 0) == (tmpsig.max_hash == 0) {
            return Err(D::Error::custom(format!(
                "exactly one of num and max_hash must be set (num={}, max_hash={})",
                tmpsig.num, tmpsig.max_hash
            )));
        }

        // Older signatures were written with unordered (and sometimes
        // repeated) mins, so everything goes through the ordered containers.
        let (mins, abunds) = if let Some(abunds) = tmpsig.abundances {
            if abunds.len() != tmpsig.mins.len() {
                return Err(D::Error::custom(format!(
                    "{} abundances for {} mins",
                    abunds.len(),
                    tmpsig.mins.len()
                )));
            }
            let mut values = BTreeMap::new();
            for (hash, abund) in tmpsig.mins.into_iter().zip(abunds) {
                *values.entry(hash).or_insert(0) += abund;
            }
            let mins: BTreeSet<u64> = values.keys().cloned().collect();
            (mins, Some(values))
        } else {
            (tmpsig.mins.into_iter().collect(), None)
        };

        if tmpsig.num != 0 && mins.len() > tmpsig.num as usize {
            return Err(D::Error::custom(format!(
                "{} mins in a sketch with num={}",
                mins.len(),
                tmpsig.num
            )));
        }

        if tmpsig.max_hash != 0 {
            if let Some(last) = mins.iter().next_back() {
                if *last > tmpsig.max_hash {
                    return Err(D::Error::custom(format!(
                        "hash {} is above max_hash {}",
                        last, tmpsig.max_hash
                    )));
                }
            }
        }

        Ok(KmerMinHash {
            num: tmpsig.num,
            ksize: tmpsig.ksize,
            seed: tmpsig.seed,
            max_hash: tmpsig.max_hash,
            mins,
            abunds,
            hash_function,
        })
    }
}

fn default_seed() -> u64 {
    42
}

impl KmerMinHash {
    /// Creates an empty sketch. Exactly one of `num` and `scaled` must be
    /// non-zero.
    pub fn new(
        scaled: u64,
        ksize: u32,
        hash_function: HashFunctions,
        seed: u64,
        track_abundance: bool,
        num: u32,
    ) -> Result<KmerMinHash, Error> {
        if (num == 0) == (scaled == 0) {
            return Err(Error::InvalidSketchParams {
                message: format!(
                    "exactly one of num and scaled must be set (num={}, scaled={})",
                    num, scaled
                ),
            });
        }

        if ksize == 0 {
            return Err(Error::InvalidSketchParams {
                message: "ksize must be positive".into(),
            });
        }

        let abunds = if track_abundance {
            Some(Default::default())
        } else {
            None
        };

        Ok(KmerMinHash {
            num,
            ksize,
            hash_function,
            seed,
            max_hash: max_hash_for_scaled(scaled),
            mins: Default::default(),
            abunds,
        })
    }

    pub fn with_num(num: u32, ksize: u32, hash_function: HashFunctions) -> Result<KmerMinHash, Error> {
        KmerMinHash::new(0, ksize, hash_function, 42, false, num)
    }

    pub fn with_scaled(
        scaled: u64,
        ksize: u32,
        hash_function: HashFunctions,
    ) -> Result<KmerMinHash, Error> {
        KmerMinHash::new(scaled, ksize, hash_function, 42, false, 0)
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn is_protein(&self) -> bool {
        self.hash_function.protein()
    }

    pub fn dayhoff(&self) -> bool {
        self.hash_function.dayhoff()
    }

    pub fn hp(&self) -> bool {
        self.hash_function.hp()
    }

    pub fn max_hash(&self) -> u64 {
        self.max_hash
    }

    pub fn scaled(&self) -> u64 {
        scaled_for_max_hash(self.max_hash)
    }

    pub fn is_scaled(&self) -> bool {
        self.max_hash != 0
    }

    pub fn clear(&mut self) {
        self.mins.clear();
        if let Some(ref mut abunds) = self.abunds {
            abunds.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mins.is_empty()
    }

    pub fn set_hash_function(&mut self, h: HashFunctions) -> Result<(), Error> {
        if self.hash_function == h {
            return Ok(());
        }

        if !self.is_empty() {
            return Err(Error::NonEmptyMinHash {
                message: "hash_function".into(),
            });
        }

        self.hash_function = h;
        Ok(())
    }

    pub fn track_abundance(&self) -> bool {
        self.abunds.is_some()
    }

    pub fn enable_abundance(&mut self) -> Result<(), Error> {
        if !self.mins.is_empty() {
            return Err(Error::NonEmptyMinHash {
                message: "track_abundance=True".into(),
            });
        }

        self.abunds = Some(Default::default());

        Ok(())
    }

    pub fn disable_abundance(&mut self) {
        self.abunds = None;
    }

    pub fn md5sum(&self) -> String {
        let mut buffer = String::with_capacity(20);

        let mut md5_ctx = md5::Context::new();
        // writing into a String can't fail
        let _ = write!(&mut buffer, "{}", self.ksize);
        md5_ctx.consume(&buffer);
        buffer.clear();
        for x in &self.mins {
            let _ = write!(&mut buffer, "{}", x);
            md5_ctx.consume(&buffer);
            buffer.clear();
        }
        format!("{:x}", md5_ctx.compute())
    }

    pub fn add_hash_with_abundance(&mut self, hash: u64, abundance: u64) {
        if self.max_hash != 0 && hash > self.max_hash {
            return;
        }

        if abundance == 0 {
            return;
        }

        if self.num != 0 && self.mins.len() >= self.num as usize {
            match self.mins.iter().next_back() {
                Some(&current_max) if hash > current_max => return,
                _ => {}
            }
        }

        self.mins.insert(hash);
        if let Some(ref mut abunds) = self.abunds {
            *abunds.entry(hash).or_insert(0) += abundance;
        }

        if self.num != 0 && self.mins.len() > self.num as usize {
            if let Some(last) = self.mins.pop_last() {
                if let Some(ref mut abunds) = self.abunds {
                    abunds.remove(&last);
                }
            }
        }
    }

    pub fn add_word(&mut self, word: &[u8]) {
        let hash = _hash_murmur(word, self.seed);
        self.add_hash(hash);
    }

    pub fn remove_hash(&mut self, hash: u64) {
        if self.mins.remove(&hash) {
            if let Some(ref mut abunds) = self.abunds {
                abunds.remove(&hash);
            }
        }
    }

    pub fn remove_many(&mut self, hashes: &[u64]) -> Result<(), Error> {
        for min in hashes {
            self.remove_hash(*min);
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &KmerMinHash) -> Result<(), Error> {
        self.check_compatible(other)?;

        let to_take = if self.num == 0 {
            usize::MAX
        } else {
            self.num as usize
        };

        let merged: BTreeSet<u64> = self.mins.union(&other.mins).take(to_take).cloned().collect();

        if let Some(abunds) = &self.abunds {
            let mut new_abunds = BTreeMap::new();
            for hash in &merged {
                let mine = abunds.get(hash).cloned().unwrap_or(0);
                let theirs = match &other.abunds {
                    Some(oabunds) => oabunds.get(hash).cloned().unwrap_or(0),
                    None if other.mins.contains(hash) => 1,
                    None => 0,
                };
                new_abunds.insert(*hash, mine + theirs);
            }
            self.abunds = Some(new_abunds);
        }
        self.mins = merged;

        Ok(())
    }

    pub fn add_from(&mut self, other: &KmerMinHash) -> Result<(), Error> {
        for min in &other.mins {
            self.add_hash(*min);
        }
        Ok(())
    }

    pub fn add_many(&mut self, hashes: &[u64]) -> Result<(), Error> {
        for min in hashes {
            self.add_hash(*min);
        }
        Ok(())
    }

    pub fn add_many_with_abund(&mut self, hashes: &[(u64, u64)]) -> Result<(), Error> {
        for item in hashes {
            self.add_hash_with_abundance(item.0, item.1);
        }
        Ok(())
    }

    /// Adds every hash produced by an external k-mer hashing callback.
    pub fn add_sequence_with<H: SeqToHashes>(&mut self, seq: &[u8], hasher: &H) -> Result<(), Error> {
        for hash in hasher.hashes(seq, self.ksize as usize, self.seed)? {
            self.add_hash(hash);
        }
        Ok(())
    }

    /// Like `check_compatible`, but two scaled sketches may differ in
    /// resolution. Downsampled comparisons only need this.
    pub fn check_comparable(&self, other: &KmerMinHash) -> Result<(), Error> {
        self.check_params(other, self.is_scaled() && other.is_scaled())
    }

    fn check_params(&self, other: &KmerMinHash, ignore_max_hash: bool) -> Result<(), Error> {
        if self.ksize != other.ksize {
            return Err(Error::incompatible(format!(
                "different ksizes ({} != {})",
                self.ksize, other.ksize
            )));
        }
        if self.hash_function != other.hash_function {
            return Err(Error::incompatible(format!(
                "different molecule types ({} != {})",
                self.hash_function, other.hash_function
            )));
        }
        if self.seed != other.seed {
            return Err(Error::incompatible(format!(
                "different seeds ({} != {})",
                self.seed, other.seed
            )));
        }
        if self.is_scaled() != other.is_scaled() {
            return Err(Error::incompatible(
                "cannot compare a num sketch with a scaled sketch",
            ));
        }
        if self.num != other.num {
            return Err(Error::incompatible(format!(
                "different num ({} != {})",
                self.num, other.num
            )));
        }
        if !ignore_max_hash && self.max_hash != other.max_hash {
            return Err(Error::incompatible(format!(
                "different scaled ({} != {})",
                self.scaled(),
                other.scaled()
            )));
        }
        Ok(())
    }

    /// Brings two scaled sketches with different `max_hash` to the coarser
    /// resolution. Anything else is returned as is.
    fn common_resolution<'a>(
        &'a self,
        other: &'a KmerMinHash,
    ) -> Result<(Cow<'a, KmerMinHash>, Cow<'a, KmerMinHash>), Error> {
        if self.is_scaled() && other.is_scaled() && self.max_hash != other.max_hash {
            if self.max_hash < other.max_hash {
                Ok((
                    Cow::Borrowed(self),
                    Cow::Owned(other.downsample_max_hash(self.max_hash)?),
                ))
            } else {
                Ok((
                    Cow::Owned(self.downsample_max_hash(other.max_hash)?),
                    Cow::Borrowed(other),
                ))
            }
        } else {
            Ok((Cow::Borrowed(self), Cow::Borrowed(other)))
        }
    }

    pub fn count_common(&self, other: &KmerMinHash, downsample: bool) -> Result<u64, Error> {
        if downsample {
            let (first, second) = self.common_resolution(other)?;
            return first.count_common(&second, false);
        }

        self.check_compatible(other)?;
        let (small, large) = if self.size() < other.size() {
            (self, other)
        } else {
            (other, self)
        };
        Ok(small
            .mins
            .iter()
            .filter(|h| large.mins.contains(h))
            .count() as u64)
    }

    pub fn intersection(&self, other: &KmerMinHash) -> Result<(Vec<u64>, u64), Error> {
        self.check_compatible(other)?;

        if self.num != 0 {
            let combined = self.combined_sample(other)?;
            let common: Vec<u64> = self
                .mins
                .intersection(&other.mins)
                .filter(|h| combined.mins.contains(h))
                .cloned()
                .collect();
            Ok((common, combined.mins.len() as u64))
        } else {
            Ok(intersection(self.mins.iter(), other.mins.iter()))
        }
    }

    /// Returns `(common, union)`. For num-sketches the union is the `num`
    /// smallest hashes of both sketches, and `common` only counts shared
    /// hashes inside it.
    pub fn intersection_size(&self, other: &KmerMinHash) -> Result<(u64, u64), Error> {
        self.check_compatible(other)?;

        if self.num != 0 {
            let combined = self.combined_sample(other)?;
            let common = self
                .mins
                .intersection(&other.mins)
                .filter(|h| combined.mins.contains(h))
                .count();
            Ok((common as u64, combined.mins.len() as u64))
        } else {
            Ok(intersection_size(self.mins.iter(), other.mins.iter()))
        }
    }

    fn combined_sample(&self, other: &KmerMinHash) -> Result<KmerMinHash, Error> {
        let mut combined_mh = KmerMinHash::new(
            0,
            self.ksize,
            self.hash_function,
            self.seed,
            false,
            self.num,
        )?;
        combined_mh.merge(self)?;
        combined_mh.merge(other)?;
        Ok(combined_mh)
    }

    // calculate Jaccard similarity, ignoring abundance.
    pub fn jaccard(&self, other: &KmerMinHash) -> Result<f64, Error> {
        let (common, size) = self.intersection_size(other)?;
        if size == 0 {
            return Ok(0.0);
        }
        Ok(common as f64 / size as f64)
    }

    // compare two minhashes, with abundance;
    // calculate their angular similarity.
    pub fn angular_similarity(&self, other: &KmerMinHash) -> Result<f64, Error> {
        self.check_compatible(other)?;

        let (abunds, other_abunds) = match (&self.abunds, &other.abunds) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(Error::InvalidSketchParams {
                    message: "angular similarity requires abundance tracking".into(),
                })
            }
        };

        let mut prod = 0;
        let a_sq: u64 = abunds.values().map(|a| (a * a)).sum();
        let b_sq: u64 = other_abunds.values().map(|a| (a * a)).sum();

        for (hash, value) in abunds.iter() {
            if let Some(oa) = other_abunds.get(hash) {
                prod += value * oa
            }
        }

        let norm_a = (a_sq as f64).sqrt();
        let norm_b = (b_sq as f64).sqrt();

        if norm_a == 0. || norm_b == 0. {
            return Ok(0.0);
        }
        let prod = f64::min(prod as f64 / (norm_a * norm_b), 1.);
        let distance = 2. * prod.acos() / PI;
        Ok(1. - distance)
    }

    pub fn similarity(
        &self,
        other: &KmerMinHash,
        ignore_abundance: bool,
        downsample: bool,
    ) -> Result<f64, Error> {
        if downsample {
            let (first, second) = self.common_resolution(other)?;
            return first.similarity(&second, ignore_abundance, false);
        }

        if ignore_abundance || self.abunds.is_none() || other.abunds.is_none() {
            self.jaccard(other)
        } else {
            self.angular_similarity(other)
        }
    }

    /// Fraction of the hashes in `self` that are also in `other`.
    pub fn contained_by(&self, other: &KmerMinHash) -> Result<f64, Error> {
        let (first, second) = self.common_resolution(other)?;
        first.check_compatible(&second)?;

        if first.mins.is_empty() {
            return Ok(0.0);
        }
        let common = first.count_common(&second, false)?;
        Ok(common as f64 / first.size() as f64)
    }

    pub fn mins(&self) -> Vec<u64> {
        self.mins.iter().cloned().collect()
    }

    pub fn iter_mins(&self) -> impl Iterator<Item = &u64> {
        self.mins.iter()
    }

    pub fn abunds(&self) -> Option<Vec<u64>> {
        self.abunds
            .as_ref()
            .map(|abunds| abunds.values().cloned().collect())
    }

    /// Creates a scaled copy of `self` keeping only hashes `<= max_hash`.
    pub fn downsample_max_hash(&self, max_hash: u64) -> Result<KmerMinHash, Error> {
        if self.is_scaled() && max_hash > self.max_hash {
            return Err(Error::incompatible(format!(
                "cannot upsample max_hash {} to {}",
                self.max_hash, max_hash
            )));
        }

        let mut new_mh = KmerMinHash::new(
            scaled_for_max_hash(max_hash),
            self.ksize,
            self.hash_function,
            self.seed,
            self.abunds.is_some(),
            0,
        )?;
        new_mh.max_hash = max_hash;

        let (mins, abunds): (BTreeSet<u64>, Option<BTreeMap<u64, u64>>) = (
            self.mins.range(..=max_hash).cloned().collect(),
            self.abunds
                .as_ref()
                .map(|a| a.range(..=max_hash).map(|(h, n)| (*h, *n)).collect()),
        );
        new_mh.mins = mins;
        new_mh.abunds = abunds;
        Ok(new_mh)
    }

    pub fn to_vec_abunds(&self) -> Vec<(u64, u64)> {
        if let Some(abunds) = &self.abunds {
            abunds.iter().map(|(a, b)| (*a, *b)).collect()
        } else {
            self.mins
                .iter()
                .cloned()
                .zip(std::iter::repeat(1))
                .collect()
        }
    }
}

impl SigsTrait for KmerMinHash {
    fn size(&self) -> usize {
        self.mins.len()
    }

    fn to_vec(&self) -> Vec<u64> {
        self.mins()
    }

    fn ksize(&self) -> usize {
        self.ksize as usize
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn hash_function(&self) -> HashFunctions {
        self.hash_function
    }

    fn add_hash(&mut self, hash: u64) {
        self.add_hash_with_abundance(hash, 1);
    }

    fn check_compatible(&self, other: &KmerMinHash) -> Result<(), Error> {
        self.check_params(other, false)
    }
}

fn intersection<'a>(
    me_iter: impl Iterator<Item = &'a u64>,
    other_iter: impl Iterator<Item = &'a u64>,
) -> (Vec<u64>, u64) {
    let mut me = me_iter.peekable();
    let mut other = other_iter.peekable();
    let mut common: Vec<u64> = vec![];
    let mut union_size = 0;

    loop {
        match (me.peek(), other.peek()) {
            (Some(left_key), Some(right_key)) => match left_key.cmp(right_key) {
                Ordering::Less => {
                    me.next();
                }
                Ordering::Greater => {
                    other.next();
                }
                Ordering::Equal => {
                    common.push(**left_key);
                    me.next();
                    other.next();
                }
            },
            (None, Some(_)) => {
                other.next();
            }
            (Some(_), None) => {
                me.next();
            }
            _ => break,
        };
        union_size += 1;
    }
    (common, union_size)
}

fn intersection_size<'a>(
    me_iter: impl Iterator<Item = &'a u64>,
    other_iter: impl Iterator<Item = &'a u64>,
) -> (u64, u64) {
    let (common, union_size) = intersection(me_iter, other_iter);
    (common.len() as u64, union_size)
}
