use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::hash::HashKey;
use crate::manifest::DirManifest;
use crate::odb::ObjectStore;

/// one tracked output: a workspace path, its current hash and the cache
/// store holding its content.
///
/// whether the output denotes a whole directory follows from the hash kind.
/// the directory manifest is fetched from the cache on first use, validated
/// by recomputing its hash against the recorded one, and memoized; a failed
/// fetch is not cached, so a later call may retry.
pub struct Output {
    path: PathBuf,
    hash: HashKey,
    cache: Arc<ObjectStore>,
    manifest: Mutex<Option<Arc<DirManifest>>>,
}

impl Output {
    pub fn new(path: impl Into<PathBuf>, hash: HashKey, cache: Arc<ObjectStore>) -> Self {
        Self {
            path: path.into(),
            hash,
            cache,
            manifest: Mutex::new(None),
        }
    }

    /// root workspace path of this output
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// current content hash
    pub fn hash(&self) -> &HashKey {
        &self.hash
    }

    /// cache store holding this output's content
    pub fn cache(&self) -> &ObjectStore {
        &self.cache
    }

    /// does this output track a whole directory
    pub fn is_dir_checksum(&self) -> bool {
        self.hash.is_dir()
    }

    /// is the content behind `hash` absent from the local cache
    pub fn changed_cache(&self, hash: &HashKey) -> bool {
        !self.cache.contains(hash)
    }

    /// segments of `path` relative to this output's root.
    /// empty for the root itself, `None` when `path` is not under it.
    pub fn relative_key(&self, path: &Path) -> Option<Vec<String>> {
        let rel = path.strip_prefix(&self.path).ok()?;
        Some(
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect(),
        )
    }

    /// fetch and validate this output's directory manifest, memoized.
    ///
    /// the loaded listing is re-hashed and compared against the recorded
    /// hash; disagreement is a [`Error::CorruptManifest`].
    pub fn dir_manifest(&self) -> Result<Arc<DirManifest>> {
        let mut slot = self
            .manifest
            .lock()
            .map_err(|_| Error::CorruptManifest(self.hash.clone()))?;
        if let Some(manifest) = slot.as_ref() {
            return Ok(Arc::clone(manifest));
        }

        let manifest = DirManifest::load(&self.cache, &self.hash)?;
        if manifest.hash()? != self.hash {
            return Err(Error::CorruptManifest(self.hash.clone()));
        }

        let manifest = Arc::new(manifest);
        *slot = Some(Arc::clone(&manifest));
        Ok(manifest)
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("path", &self.path)
            .field("hash", &self.hash)
            .finish()
    }
}

/// the current set of tracked outputs, as supplied by the revision-control
/// backend. resolves which outputs cover a given workspace path.
#[derive(Debug, Default)]
pub struct OutputSet {
    outputs: Vec<Arc<Output>>,
}

impl OutputSet {
    pub fn new(outputs: Vec<Arc<Output>>) -> Self {
        Self { outputs }
    }

    pub fn push(&mut self, output: Output) {
        self.outputs.push(Arc::new(output));
    }

    pub fn outputs(&self) -> &[Arc<Output>] {
        &self.outputs
    }

    /// outputs covering `path`.
    ///
    /// `strict` restricts the match to an output rooted exactly at `path`;
    /// otherwise any output whose root is an ancestor of `path` matches too.
    /// `recursive` additionally includes outputs strictly under `path`.
    /// zero matches is an [`Error::OutputNotFound`].
    pub fn find(&self, path: &Path, strict: bool, recursive: bool) -> Result<Vec<Arc<Output>>> {
        let matched: Vec<Arc<Output>> = self
            .outputs
            .iter()
            .filter(|out| {
                if out.path() == path {
                    return true;
                }
                if !strict && path.starts_with(out.path()) {
                    return true;
                }
                recursive && out.path().starts_with(path)
            })
            .cloned()
            .collect();

        if matched.is_empty() {
            return Err(Error::OutputNotFound(path.to_path_buf()));
        }
        Ok(matched)
    }
}
