//! Signatures: named collections of sketches, plus the k-mer hashing
//! collaborators used to fill them from sequences.

use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::encodings::{aa_to_dayhoff, aa_to_hp, revcomp, HashFunctions, VALID};
use crate::prelude::ToWriter;
use crate::sketch::minhash::KmerMinHash;
use crate::Error;
use crate::HashIntoType;

pub trait SigsTrait {
    fn size(&self) -> usize;
    fn to_vec(&self) -> Vec<u64>;
    fn ksize(&self) -> usize;
    fn check_compatible(&self, other: &Self) -> Result<(), Error>;
    fn seed(&self) -> u64;

    fn hash_function(&self) -> HashFunctions;

    fn add_hash(&mut self, hash: HashIntoType);

    fn add_sequence(&mut self, seq: &[u8], force: bool) -> Result<(), Error> {
        if !self.hash_function().dna() {
            return Err(Error::InvalidSketchParams {
                message: format!(
                    "cannot add DNA to a {} sketch, use add_protein",
                    self.hash_function()
                ),
            });
        }

        let hashes = DnaKmers { force }.hashes(seq, self.ksize(), self.seed())?;
        for hash in hashes {
            self.add_hash(hash);
        }
        Ok(())
    }

    fn add_protein(&mut self, seq: &[u8]) -> Result<(), Error> {
        let hasher = ProteinKmers {
            hash_function: self.hash_function(),
        };
        for hash in hasher.hashes(seq, self.ksize(), self.seed())? {
            self.add_hash(hash);
        }
        Ok(())
    }
}

/// Turns a sequence into k-mer hashes.
pub trait SeqToHashes {
    fn hashes(&self, seq: &[u8], ksize: usize, seed: u64) -> Result<Vec<HashIntoType>, Error>;
}

/// Canonical DNA k-mers: each k-mer is hashed together with its reverse
/// complement, keeping the lexicographically smaller one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnaKmers {
    /// Skip k-mers with non-ACGT characters instead of failing.
    pub force: bool,
}

impl SeqToHashes for DnaKmers {
    fn hashes(&self, seq: &[u8], ksize: usize, seed: u64) -> Result<Vec<HashIntoType>, Error> {
        let sequence = seq.to_ascii_uppercase();
        let len = sequence.len();
        if ksize == 0 || len < ksize {
            return Ok(vec![]);
        }

        let rc = revcomp(&sequence);
        let mut hashes = Vec::with_capacity(len - ksize + 1);

        for i in 0..=(len - ksize) {
            let kmer = &sequence[i..i + ksize];
            if let Some(bad) = kmer.iter().find(|nt| !VALID[**nt as usize]) {
                if self.force {
                    continue;
                }
                return Err(Error::InvalidDNA {
                    message: format!(
                        "{} ({:?})",
                        String::from_utf8_lossy(kmer),
                        char::from(*bad)
                    ),
                });
            }

            //   For a ksize = 3, and a sequence AGTCGT (len = 6):
            //   seq      RC     |i|i + ksize|len - ksize - i|len - i|
            //  AGTCGT   ACGACT  +-+---------+---------------+-------+
            //  +->         +->  |0|    2    |       3       |   6   |
            //   +->       +->   |1|    3    |       2       |   5   |
            let krc = &rc[len - ksize - i..len - i];
            hashes.push(crate::_hash_murmur(std::cmp::min(kmer, krc), seed));
        }

        Ok(hashes)
    }
}

/// Amino-acid k-mers of length `ksize / 3`, optionally mapped into a reduced
/// alphabet first.
#[derive(Debug, Clone, Copy)]
pub struct ProteinKmers {
    pub hash_function: HashFunctions,
}

impl SeqToHashes for ProteinKmers {
    fn hashes(&self, seq: &[u8], ksize: usize, seed: u64) -> Result<Vec<HashIntoType>, Error> {
        let aa_ksize = ksize / 3;
        if aa_ksize == 0 {
            return Err(Error::InvalidSketchParams {
                message: format!("ksize {} is too small for protein k-mers", ksize),
            });
        }

        let sequence = seq.to_ascii_uppercase();
        if let Some(bad) = sequence
            .iter()
            .find(|aa| !(aa.is_ascii_alphabetic() || **aa == b'*'))
        {
            return Err(Error::InvalidProt {
                message: format!("{:?}", char::from(*bad)),
            });
        }

        let residues: Vec<u8> = match self.hash_function {
            HashFunctions::murmur64_protein => sequence,
            HashFunctions::murmur64_dayhoff => sequence.into_iter().map(aa_to_dayhoff).collect(),
            HashFunctions::murmur64_hp => sequence.into_iter().map(aa_to_hp).collect(),
            HashFunctions::murmur64_DNA => {
                return Err(Error::InvalidSketchParams {
                    message: "protein k-mers need a protein, dayhoff or hp sketch".into(),
                })
            }
        };

        Ok(residues
            .windows(aa_ksize)
            .map(|aa_kmer| crate::_hash_murmur(aa_kmer, seed))
            .collect())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TypedBuilder)]
pub struct Signature {
    #[serde(default = "default_class")]
    #[builder(default = default_class())]
    class: String,

    #[serde(default)]
    #[builder(default)]
    email: String,

    #[builder(setter(into), default = default_hash_function())]
    hash_function: String,

    #[builder(default)]
    filename: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub(crate) name: Option<String>,

    #[serde(default = "default_license")]
    #[builder(default = default_license())]
    license: String,

    pub(crate) signatures: Vec<KmerMinHash>,

    #[serde(default = "default_version")]
    #[builder(default = default_version())]
    version: f64,
}

fn default_license() -> String {
    "CC0".to_string()
}

fn default_class() -> String {
    "sourmash_signature".to_string()
}

fn default_hash_function() -> String {
    "0.murmur64".to_string()
}

fn default_version() -> f64 {
    0.4
}

impl Signature {
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(filename) = &self.filename {
            filename.clone()
        } else {
            self.md5sum().unwrap_or_default()
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.into())
    }

    pub fn filename(&self) -> String {
        self.filename.clone().unwrap_or_default()
    }

    pub fn set_filename(&mut self, name: &str) {
        self.filename = Some(name.into())
    }

    pub fn size(&self) -> usize {
        self.signatures.len()
    }

    pub fn sketches(&self) -> &[KmerMinHash] {
        &self.signatures
    }

    /// The first sketch, which is the only one after `load_signatures`.
    pub fn minhash(&self) -> Option<&KmerMinHash> {
        self.signatures.first()
    }

    pub fn push(&mut self, sketch: KmerMinHash) {
        self.signatures.push(sketch);
    }

    pub fn license(&self) -> String {
        self.license.clone()
    }

    pub fn class(&self) -> String {
        self.class.clone()
    }

    pub fn hash_function(&self) -> String {
        self.hash_function.clone()
    }

    pub fn email(&self) -> String {
        self.email.clone()
    }

    pub fn md5sum(&self) -> Option<String> {
        self.minhash().map(|mh| mh.md5sum())
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Signature>, Error> {
        let mut reader = io::BufReader::new(File::open(path)?);
        Signature::from_reader(&mut reader)
    }

    pub fn from_reader<R>(rdr: R) -> Result<Vec<Signature>, Error>
    where
        R: io::Read,
    {
        let (rdr, _format) = niffler::get_reader(Box::new(rdr))?;

        let sigs: Vec<Signature> = serde_json::from_reader(rdr)?;
        Ok(sigs)
    }

    /// Reads signatures and splits them into one signature per sketch,
    /// keeping only the sketches matching `ksize` and `moltype` (when set).
    pub fn load_signatures<R>(
        buf: R,
        ksize: Option<usize>,
        moltype: Option<HashFunctions>,
    ) -> Result<Vec<Signature>, Error>
    where
        R: io::Read,
    {
        let orig_sigs = Signature::from_reader(buf)?;

        let flat_sigs = orig_sigs.into_iter().flat_map(|s| {
            s.signatures
                .iter()
                .map(|mh| {
                    let mut new_s = s.clone();
                    new_s.signatures = vec![mh.clone()];
                    new_s
                })
                .collect::<Vec<Signature>>()
        });

        let filtered_sigs = flat_sigs.filter(|sig| {
            sig.signatures.iter().all(|mh| {
                if let Some(k) = ksize {
                    if k != mh.ksize() {
                        return false;
                    }
                }
                match moltype {
                    Some(x) => mh.hash_function() == x,
                    None => true,
                }
            })
        });

        Ok(filtered_sigs.collect())
    }
}

impl ToWriter for Signature {
    fn to_writer<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: io::Write,
    {
        serde_json::to_writer(writer, &vec![&self])?;
        Ok(())
    }
}
