use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hash::HashKey;

/// remote object source: resolves a hash to a readable stream when the
/// content is not present in the local cache.
///
/// failure to resolve surfaces to callers as not-found, never as a distinct
/// transport condition.
pub trait RemoteSource {
    /// open the object's content for reading
    fn open(&self, key: &HashKey) -> Result<Box<dyn Read>>;
}

/// directory-backed remote using the same sharded object layout as the
/// local store. doubles as the reference implementation for tests.
pub struct LocalRemote {
    root: PathBuf,
}

impl LocalRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &HashKey) -> PathBuf {
        let (shard, rest) = key.to_path_components();
        self.root.join("objects").join(shard).join(rest)
    }
}

impl RemoteSource for LocalRemote {
    fn open(&self, key: &HashKey) -> Result<Box<dyn Read>> {
        let path = self.path_of(key);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ObjectNotFound(key.clone()))
            }
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }
}
