use std::collections::HashMap;
use std::fs::{DirBuilder, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::Error;

/// An abstraction for any place where we can store data.
pub trait Storage {
    /// Save bytes into path
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error>;

    /// Load bytes from path
    fn load(&self, path: &str) -> Result<Vec<u8>, Error>;

    /// Args for initializing a new Storage
    fn args(&self) -> StorageArgs;
}

/// Shared handle to a storage backend.
#[derive(Clone)]
pub struct InnerStorage(Arc<Mutex<dyn Storage + Send>>);

impl InnerStorage {
    pub fn new(inner: impl Storage + Send + 'static) -> InnerStorage {
        InnerStorage(Arc::new(Mutex::new(inner)))
    }
}

impl std::fmt::Debug for InnerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("InnerStorage").field(&self.args()).finish()
    }
}

impl Storage for InnerStorage {
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error> {
        self.0.save(path, content)
    }
    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.0.load(path)
    }
    fn args(&self) -> StorageArgs {
        self.0.args()
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Path can't be empty")]
    EmptyPathError,

    #[error("Path not found: {0}")]
    PathNotFoundError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StorageInfo {
    pub backend: String,
    pub args: StorageArgs,
}

impl StorageInfo {
    pub(crate) fn from_args(args: StorageArgs) -> StorageInfo {
        let backend = match args {
            StorageArgs::FSStorage { .. } => "FSStorage",
            StorageArgs::MemStorage {} => "MemStorage",
        };
        StorageInfo {
            backend: backend.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StorageArgs {
    FSStorage { path: String },
    MemStorage {},
}

impl<L> Storage for Mutex<L>
where
    L: ?Sized + Storage,
{
    // a poisoned lock still holds a usable backend
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .save(path, content)
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.lock().unwrap_or_else(|e| e.into_inner()).load(path)
    }

    fn args(&self) -> StorageArgs {
        self.lock().unwrap_or_else(|e| e.into_inner()).args()
    }
}

/// Store files locally into a directory
#[derive(TypedBuilder, Debug, Clone, Default)]
pub struct FSStorage {
    /// absolute path for the directory where data is saved.
    fullpath: PathBuf,
    subdir: String,
}

impl FSStorage {
    pub fn new<P: AsRef<Path>>(location: P, subdir: &str) -> FSStorage {
        let mut fullpath = PathBuf::new();
        fullpath.push(location);
        fullpath.push(subdir);

        FSStorage {
            fullpath,
            subdir: subdir.into(),
        }
    }

    pub fn set_base<P: AsRef<Path>>(&mut self, location: P) {
        let mut fullpath = PathBuf::new();
        fullpath.push(location);
        fullpath.push(&self.subdir);
        self.fullpath = fullpath;
    }

    pub fn fullpath(&self) -> &Path {
        &self.fullpath
    }
}

impl Storage for FSStorage {
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error> {
        if path.is_empty() {
            return Err(StorageError::EmptyPathError.into());
        }

        let fpath = self.fullpath.join(path);
        if let Some(parent) = fpath.parent() {
            DirBuilder::new().recursive(true).create(parent)?;
        }

        let file = File::create(&fpath)?;
        let mut buf_writer = BufWriter::new(file);
        buf_writer.write_all(content)?;
        buf_writer.flush()?;
        Ok(path.into())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        let fpath = self.fullpath.join(path);
        if !fpath.exists() {
            return Err(StorageError::PathNotFoundError(path.into()).into());
        }
        let file = File::open(fpath)?;
        let mut buf_reader = BufReader::new(file);
        let mut contents = Vec::new();
        buf_reader.read_to_end(&mut contents)?;
        Ok(contents)
    }

    fn args(&self) -> StorageArgs {
        StorageArgs::FSStorage {
            path: self.subdir.clone(),
        }
    }
}

/// Keeps everything in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> MemStorage {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemStorage {
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error> {
        if path.is_empty() {
            return Err(StorageError::EmptyPathError.into());
        }
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), content.to_vec());
        Ok(path.into())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::PathNotFoundError(path.into()).into())
    }

    fn args(&self) -> StorageArgs {
        StorageArgs::MemStorage {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn mem_storage_shares_data() {
        let storage = MemStorage::new();
        let handle = InnerStorage::new(storage.clone());

        assert_eq!(handle.save("a/b", b"content").unwrap(), "a/b");
        assert_eq!(storage.load("a/b").unwrap(), b"content");
        assert_eq!(storage.len(), 1);

        assert_matches!(
            handle.load("missing"),
            Err(Error::StorageError(StorageError::PathNotFoundError(_)))
        );
        assert_matches!(
            handle.save("", b""),
            Err(Error::StorageError(StorageError::EmptyPathError))
        );
    }

    #[test]
    fn fs_storage_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FSStorage::new(tmp.path(), ".sbt.test");

        storage.save("internal.0", &[1, 2, 3]).unwrap();
        assert!(tmp.path().join(".sbt.test").join("internal.0").exists());
        assert_eq!(storage.load("internal.0").unwrap(), vec![1, 2, 3]);

        assert_eq!(
            storage.args(),
            StorageArgs::FSStorage {
                path: ".sbt.test".into()
            }
        );
    }

    #[test]
    fn storage_info_serde() {
        let fs = StorageInfo::from_args(StorageArgs::FSStorage {
            path: ".sbt.x".into(),
        });
        let json = serde_json::to_string(&fs).unwrap();
        assert_eq!(json, r#"{"backend":"FSStorage","args":{"path":".sbt.x"}}"#);

        let mem: StorageInfo =
            serde_json::from_str(r#"{"backend":"MemStorage","args":{}}"#).unwrap();
        assert_eq!(mem.args, StorageArgs::MemStorage {});
    }
}
