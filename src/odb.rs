use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::HashKey;
use crate::pool::WorkerPool;

/// suffix of the secondary on-disk materialization of a directory object
const UNPACKED_SUFFIX: &str = ".unpacked";

/// content-addressable object store.
///
/// objects live under `objects/<2-hex shard>/<rest of key>`; directory
/// manifests keep their `.dir` suffix in the file name, so the key kind is
/// recoverable from the on-disk path. both constants are stable for the
/// lifetime of a store.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    root: PathBuf,
    read_only: bool,
}

impl ObjectStore {
    /// initialize a new store at the given path
    pub fn init(root: &Path) -> Result<Self> {
        if root.join("objects").exists() {
            return Err(Error::StoreExists(root.to_path_buf()));
        }
        fs::create_dir_all(root.join("objects")).with_path(root)?;
        fs::create_dir_all(root.join("tmp")).with_path(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            read_only: false,
        })
    }

    /// open an existing store
    pub fn open(root: &Path, read_only: bool) -> Result<Self> {
        if !root.join("objects").is_dir() {
            return Err(Error::NoStore(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            read_only,
        })
    }

    /// open an existing store, taking the read-only flag from configuration
    pub fn open_with_config(root: &Path, config: &Config) -> Result<Self> {
        Self::open(root, config.read_only)
    }

    /// store root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// is every mutating operation forbidden
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    fn objects_path(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// deterministic storage location of a key's blob
    pub fn path_of(&self, key: &HashKey) -> PathBuf {
        let (shard, rest) = key.to_path_components();
        self.objects_path().join(shard).join(rest)
    }

    /// location of a directory key's unpacked artifact
    pub fn unpacked_path_of(&self, key: &HashKey) -> PathBuf {
        let primary = self.path_of(key);
        let mut name = primary.as_os_str().to_os_string();
        name.push(UNPACKED_SUFFIX);
        PathBuf::from(name)
    }

    /// is the key physically present
    pub fn contains(&self, key: &HashKey) -> bool {
        self.path_of(key).is_file()
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyStore(self.root.clone()));
        }
        Ok(())
    }

    /// store content under the given key.
    ///
    /// atomic write: temp file, fsync, rename. a key already present is left
    /// untouched (content is immutable once written).
    pub fn insert(&self, key: &HashKey, content: &[u8]) -> Result<()> {
        self.check_writable()?;

        let (shard, rest) = key.to_path_components();
        let shard_dir = self.objects_path().join(shard);
        let path = shard_dir.join(rest);

        // dedup: content is immutable once written
        if path.exists() {
            return Ok(());
        }

        fs::create_dir_all(&shard_dir).with_path(&shard_dir)?;

        let tmp_path = self.tmp_path().join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(content).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &path).with_path(&path)?;

        let dir_file = File::open(&shard_dir).with_path(&shard_dir)?;
        dir_file.sync_all().with_path(&shard_dir)?;

        Ok(())
    }

    /// read a stored blob
    pub fn read(&self, key: &HashKey) -> Result<Vec<u8>> {
        let path = self.path_of(key);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(key.clone())
            } else {
                Error::Io { path, source: e }
            }
        })
    }

    /// open a stored blob for streaming reads
    pub fn open_blob(&self, key: &HashKey) -> Result<File> {
        let path = self.path_of(key);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(key.clone())
            } else {
                Error::Io { path, source: e }
            }
        })
    }

    /// enumerate every stored key, in unspecified order.
    ///
    /// shards are scanned through the pool since enumeration is
    /// filesystem-bound. entries that do not parse as keys (tmp leftovers,
    /// unpacked artifacts) are skipped.
    pub fn all(&self, pool: &WorkerPool) -> Box<dyn Iterator<Item = Result<HashKey>>> {
        let objects = self.objects_path();
        let shards = match list_shards(&objects) {
            Ok(shards) => shards,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        if shards.is_empty() {
            return Box::new(std::iter::empty());
        }
        Box::new(
            pool.imap_unordered(shards, scan_shard)
                .flat_map(|scanned| match scanned {
                    Ok(keys) => keys.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                }),
        )
    }

    /// delete a stored blob. removing an absent key is not an error.
    pub fn remove(&self, key: &HashKey) -> Result<()> {
        self.check_writable()?;

        let path = self.path_of(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    /// delete a directory object together with its unpacked artifact.
    ///
    /// the unpacked copy must go before the primary blob: it is a
    /// materialized directory whose contents overlap file paths a concurrent
    /// enumeration may still be visiting.
    pub fn remove_dir_artifact(&self, key: &HashKey) -> Result<()> {
        self.check_writable()?;

        let unpacked = self.unpacked_path_of(key);
        match fs::remove_dir_all(&unpacked) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io {
                    path: unpacked,
                    source: e,
                })
            }
        }
        self.remove(key)
    }
}

fn list_shards(objects: &Path) -> Result<Vec<PathBuf>> {
    let mut shards = Vec::new();
    for entry in fs::read_dir(objects).with_path(objects)? {
        let entry = entry.with_path(objects)?;
        if entry.file_type().with_path(entry.path())?.is_dir() {
            shards.push(entry.path());
        }
    }
    Ok(shards)
}

fn scan_shard(shard: PathBuf) -> Result<Vec<HashKey>> {
    let shard_name = shard
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();

    let mut keys = Vec::new();
    for entry in WalkDir::new(&shard).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Io {
            path: shard.clone(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")
                }),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_str().unwrap_or("");
        if let Ok(key) = HashKey::parse(&format!("{shard_name}{file_name}")) {
            keys.push(key);
        }
    }
    Ok(keys)
}
