use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash::HashKey;
use crate::output::{Output, OutputSet};
use crate::remote::RemoteSource;
use crate::trie::PathTrie;

/// overlay filesystem over tracked outputs.
///
/// presents hashed objects and the tracked-output index as one namespace:
/// a path may be a plain tracked file, the root of a whole hashed directory,
/// or a file nested inside one. content reads fall back to a remote object
/// source when the local cache misses.
pub struct VirtualTree<'a> {
    outputs: &'a OutputSet,
    remote: Option<&'a dyn RemoteSource>,
}

/// resolved metadata for one path
pub struct Meta {
    pub path: PathBuf,
    pub outputs: Vec<Arc<Output>>,
    pub is_dir: bool,
}

/// one directory listing produced by [`VirtualTree::walk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub dir: PathBuf,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

impl<'a> VirtualTree<'a> {
    pub fn new(outputs: &'a OutputSet) -> Self {
        Self {
            outputs,
            remote: None,
        }
    }

    pub fn with_remote(outputs: &'a OutputSet, remote: &'a dyn RemoteSource) -> Self {
        Self {
            outputs,
            remote: Some(remote),
        }
    }

    /// resolve a path against the tracked outputs.
    /// a lookup miss is translated to a filesystem-style not-found.
    pub fn metadata(&self, path: &Path) -> Result<Meta> {
        let outputs = self
            .outputs
            .find(path, false, true)
            .map_err(|_| Error::PathNotFound(path.to_path_buf()))?;
        let is_dir = self.check_is_dir(path, &outputs)?;
        Ok(Meta {
            path: path.to_path_buf(),
            outputs,
            is_dir,
        })
    }

    pub fn exists(&self, path: &Path) -> Result<bool> {
        match self.metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_dir(&self, path: &Path) -> Result<bool> {
        match self.metadata(path) {
            Ok(meta) => Ok(meta.is_dir),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_file(&self, path: &Path) -> Result<bool> {
        match self.metadata(path) {
            Ok(meta) => Ok(!meta.is_dir),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// is there an output rooted exactly at this path
    pub fn is_output(&self, path: &Path) -> bool {
        self.outputs
            .outputs()
            .iter()
            .any(|out| out.path() == path)
    }

    /// hash of a path strictly inside a directory-hash output, looked up in
    /// that output's validated manifest
    pub fn granular_hash(&self, path: &Path, output: &Output) -> Result<HashKey> {
        let key = output
            .relative_key(path)
            .ok_or_else(|| Error::PathNotFound(path.to_path_buf()))?;
        let manifest = output.dir_manifest()?;
        manifest
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::PathNotFound(path.to_path_buf()))
    }

    /// hash identity of a tracked file, granular for paths nested inside a
    /// directory-hash output
    pub fn file_hash(&self, path: &Path) -> Result<HashKey> {
        let outputs = self.outputs.find(path, false, false)?;
        if outputs.len() != 1 {
            return Err(Error::OutputNotFound(path.to_path_buf()));
        }
        let out = &outputs[0];
        if out.is_dir_checksum() {
            return self.granular_hash(path, out);
        }
        Ok(out.hash().clone())
    }

    /// hash identity of a whole tracked directory. forces the manifest fetch
    /// so the recorded hash has been validated against the content.
    pub fn dir_hash(&self, path: &Path) -> Result<HashKey> {
        let outputs = self
            .outputs
            .find(path, true, false)
            .map_err(|_| Error::PathNotFound(path.to_path_buf()))?;
        if outputs.len() == 1 && outputs[0].is_dir_checksum() {
            let out = &outputs[0];
            out.dir_manifest()?;
            return Ok(out.hash().clone());
        }
        Err(Error::NotADirectory(path.to_path_buf()))
    }

    /// open a tracked file for reading.
    ///
    /// a single covering output is required; the root of a directory-hash
    /// output is not a file. when the local cache misses, the content is
    /// resolved through the remote source; no remote, or a remote miss,
    /// surfaces as not-found.
    pub fn open(&self, path: &Path) -> Result<Box<dyn Read>> {
        let outputs = self
            .outputs
            .find(path, false, false)
            .map_err(|_| Error::PathNotFound(path.to_path_buf()))?;
        if outputs.len() != 1 || (outputs[0].is_dir_checksum() && path == outputs[0].path()) {
            return Err(Error::IsADirectory(path.to_path_buf()));
        }

        let out = &outputs[0];
        let target = if out.is_dir_checksum() {
            self.granular_hash(path, out)?
        } else {
            out.hash().clone()
        };

        if out.changed_cache(&target) {
            let remote = match self.remote {
                Some(remote) => remote,
                None => return Err(Error::PathNotFound(path.to_path_buf())),
            };
            return remote.open(&target).map_err(|e| {
                if e.is_not_found() {
                    Error::PathNotFound(path.to_path_buf())
                } else {
                    e
                }
            });
        }

        Ok(Box::new(out.cache().open_blob(&target)?))
    }

    /// lazily walk the overlay, top-down only.
    ///
    /// yields a [`WalkEntry`] for `top` and every discovered subdirectory.
    /// directory-hash outputs covering `top` are expanded up front; one
    /// strictly below it is expanded only when the traversal descends into
    /// it, at most once per walk. failures (missing top, non-directory top,
    /// manifest fetch errors) go to `on_error` and prune the affected
    /// subtree, so partial walks continue.
    pub fn walk<F: FnMut(Error)>(&self, top: &Path, mut on_error: F) -> Walk<F> {
        let meta = match self.metadata(top) {
            Ok(meta) => meta,
            Err(e) => {
                on_error(e);
                return Walk::empty(on_error);
            }
        };
        if !meta.is_dir {
            on_error(Error::NotADirectory(top.to_path_buf()));
            return Walk::empty(on_error);
        }

        let top_key = path_segments(top);
        let mut trie: PathTrie<Option<Arc<Output>>> = PathTrie::new();
        let mut expanded = HashSet::new();

        for out in &meta.outputs {
            let out_key = path_segments(out.path());
            trie.insert(&out_key, Some(Arc::clone(out)));

            // an output covering the walk root must be expanded up front,
            // or the root's own listing would be empty; a failure here means
            // nothing under the root can be listed, so the walk is over
            if out.is_dir_checksum() && top.starts_with(out.path()) {
                match expand_output(&mut trie, out) {
                    Ok(()) => {
                        expanded.insert(out_key);
                    }
                    Err(e) => {
                        on_error(e);
                        return Walk::empty(on_error);
                    }
                }
            }
        }

        Walk {
            trie,
            stack: vec![top_key],
            expanded,
            on_error,
        }
    }

    /// every file path under `top`, in walk order
    pub fn walk_files(&self, top: &Path) -> impl Iterator<Item = PathBuf> {
        self.walk(top, |_| {}).flat_map(|entry| {
            let dir = entry.dir;
            entry
                .files
                .into_iter()
                .map(move |name| dir.join(name))
                .collect::<Vec<_>>()
        })
    }

    /// directory determination for a resolved path:
    /// several covering outputs make it a directory; a single output rooted
    /// elsewhere implies directory-ness by ancestry; a path inside a
    /// directory-hash output is a file exactly when its granular key exists.
    fn check_is_dir(&self, path: &Path, outputs: &[Arc<Output>]) -> Result<bool> {
        if outputs.len() != 1 {
            return Ok(true);
        }
        let out = &outputs[0];
        if !out.is_dir_checksum() {
            return Ok(out.path() != path);
        }
        if out.path() == path {
            return Ok(true);
        }
        match self.granular_hash(path, out) {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// expand a directory-hash output's manifest into the walk trie
fn expand_output(trie: &mut PathTrie<Option<Arc<Output>>>, out: &Output) -> Result<()> {
    let manifest = out.dir_manifest()?;
    let base = path_segments(out.path());
    for (rel, _hash) in manifest.iter() {
        let mut key = base.clone();
        key.extend(rel.iter().cloned());
        trie.insert(&key, None);
    }
    Ok(())
}

fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect()
}

fn segments_to_path(segments: &[String]) -> PathBuf {
    segments.iter().collect()
}

/// lazy top-down traversal state, owned by a single walk call
pub struct Walk<F> {
    trie: PathTrie<Option<Arc<Output>>>,
    stack: Vec<Vec<String>>,
    expanded: HashSet<Vec<String>>,
    on_error: F,
}

impl<F: FnMut(Error)> Walk<F> {
    fn empty(on_error: F) -> Self {
        Self {
            trie: PathTrie::new(),
            stack: vec![],
            expanded: HashSet::new(),
            on_error,
        }
    }
}

impl<F: FnMut(Error)> Iterator for Walk<F> {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        while let Some(dir_key) = self.stack.pop() {
            // descending into an unexpanded directory-hash output
            // materializes its manifest, once per walk
            let pending = match self.trie.get(&dir_key) {
                Some(Some(out)) if out.is_dir_checksum() && !self.expanded.contains(&dir_key) => {
                    Some(Arc::clone(out))
                }
                _ => None,
            };
            if let Some(out) = pending {
                match expand_output(&mut self.trie, &out) {
                    Ok(()) => {
                        self.expanded.insert(dir_key.clone());
                    }
                    Err(e) => {
                        tracing::debug!(
                            dir = %segments_to_path(&dir_key).display(),
                            error = %e,
                            "skipping unexpandable directory"
                        );
                        (self.on_error)(e);
                        continue;
                    }
                }
            }

            let depth = dir_key.len();
            let mut dirs = BTreeSet::new();
            let mut files = Vec::new();
            for (key, value) in self.trie.iter_prefix(&dir_key) {
                if key == dir_key {
                    continue;
                }
                let name = key[depth].clone();
                if key.len() > depth + 1 {
                    dirs.insert(name);
                    continue;
                }
                match value {
                    // direct child that is itself a whole hashed directory
                    Some(Some(out)) if out.is_dir_checksum() => {
                        dirs.insert(name);
                    }
                    // tracked file or manifest member
                    Some(_) => files.push(name),
                    // bare intermediate node: picked up through its children
                    None => {}
                }
            }

            let dirs: Vec<String> = dirs.into_iter().collect();
            files.sort_unstable();
            files.dedup();

            // depth-first in sorted order
            for name in dirs.iter().rev() {
                let mut child = dir_key.clone();
                child.push(name.clone());
                self.stack.push(child);
            }

            return Some(WalkEntry {
                dir: segments_to_path(&dir_key),
                dirs,
                files,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DirManifest, ManifestEntry};
    use crate::odb::ObjectStore;
    use crate::remote::LocalRemote;
    use tempfile::tempdir;

    fn segs(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: Arc<ObjectStore>,
        outputs: OutputSet,
        f1_hash: HashKey,
        sub_hash: HashKey,
        x_hash: HashKey,
        z_hash: HashKey,
    }

    /// tracked outputs: a plain file at root/f1 and a hashed directory at
    /// root/sub with members x and y/z
    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let cache = Arc::new(ObjectStore::init(&dir.path().join("cache")).unwrap());

        let f1_hash = HashKey::of_bytes(b"f1 content");
        cache.insert(&f1_hash, b"f1 content").unwrap();

        let x_hash = HashKey::of_bytes(b"x content");
        let z_hash = HashKey::of_bytes(b"z content");
        cache.insert(&x_hash, b"x content").unwrap();
        cache.insert(&z_hash, b"z content").unwrap();

        let manifest = DirManifest::new(vec![
            ManifestEntry::new(segs(&["x"]), x_hash.clone()),
            ManifestEntry::new(segs(&["y", "z"]), z_hash.clone()),
        ])
        .unwrap();
        let sub_hash = manifest.save(&cache).unwrap();

        let mut outputs = OutputSet::default();
        outputs.push(Output::new("root/f1", f1_hash.clone(), Arc::clone(&cache)));
        outputs.push(Output::new("root/sub", sub_hash.clone(), Arc::clone(&cache)));

        Fixture {
            _dir: dir,
            cache,
            outputs,
            f1_hash,
            sub_hash,
            x_hash,
            z_hash,
        }
    }

    #[test]
    fn test_exists_and_kind() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        assert!(tree.exists(Path::new("root")).unwrap());
        assert!(tree.is_dir(Path::new("root")).unwrap());

        assert!(tree.exists(Path::new("root/f1")).unwrap());
        assert!(tree.is_file(Path::new("root/f1")).unwrap());
        assert!(!tree.is_dir(Path::new("root/f1")).unwrap());

        assert!(tree.is_dir(Path::new("root/sub")).unwrap());
        assert!(tree.is_file(Path::new("root/sub/x")).unwrap());
        assert!(tree.is_dir(Path::new("root/sub/y")).unwrap());
        assert!(tree.is_file(Path::new("root/sub/y/z")).unwrap());

        assert!(!tree.exists(Path::new("elsewhere")).unwrap());
        assert!(!tree.is_dir(Path::new("elsewhere")).unwrap());
        assert!(!tree.is_file(Path::new("elsewhere")).unwrap());
    }

    #[test]
    fn test_is_output() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        assert!(tree.is_output(Path::new("root/f1")));
        assert!(tree.is_output(Path::new("root/sub")));
        assert!(!tree.is_output(Path::new("root")));
        assert!(!tree.is_output(Path::new("root/sub/x")));
    }

    #[test]
    fn test_granular_hash() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);
        let out = fx.outputs.find(Path::new("root/sub"), true, false).unwrap()[0].clone();

        assert_eq!(
            tree.granular_hash(Path::new("root/sub/x"), &out).unwrap(),
            fx.x_hash
        );
        assert_eq!(
            tree.granular_hash(Path::new("root/sub/y/z"), &out).unwrap(),
            fx.z_hash
        );

        let missing = tree.granular_hash(Path::new("root/sub/missing"), &out);
        assert!(matches!(missing, Err(Error::PathNotFound(_))));
    }

    #[test]
    fn test_hash_accessors() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        assert_eq!(tree.file_hash(Path::new("root/f1")).unwrap(), fx.f1_hash);
        assert_eq!(tree.file_hash(Path::new("root/sub/x")).unwrap(), fx.x_hash);
        assert_eq!(tree.dir_hash(Path::new("root/sub")).unwrap(), fx.sub_hash);

        assert!(matches!(
            tree.dir_hash(Path::new("root/f1")),
            Err(Error::NotADirectory(_))
        ));
        assert!(matches!(
            tree.dir_hash(Path::new("nope")),
            Err(Error::PathNotFound(_))
        ));
    }

    #[test]
    fn test_open_cached() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        let mut content = String::new();
        tree.open(Path::new("root/f1"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "f1 content");

        let mut content = String::new();
        tree.open(Path::new("root/sub/y/z"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "z content");
    }

    #[test]
    fn test_open_directory() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        assert!(matches!(
            tree.open(Path::new("root/sub")),
            Err(Error::IsADirectory(_))
        ));
    }

    #[test]
    fn test_open_missing() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        assert!(matches!(
            tree.open(Path::new("root/nope")),
            Err(Error::PathNotFound(_))
        ));
    }

    #[test]
    fn test_open_remote_fallback() {
        let fx = fixture();

        // move f1's content out of the cache and into a remote
        let remote_dir = fx._dir.path().join("remote");
        let remote_store = ObjectStore::init(&remote_dir).unwrap();
        remote_store.insert(&fx.f1_hash, b"f1 content").unwrap();
        fx.cache.remove(&fx.f1_hash).unwrap();

        // without a remote the miss is a not-found
        let tree = VirtualTree::new(&fx.outputs);
        assert!(matches!(
            tree.open(Path::new("root/f1")),
            Err(Error::PathNotFound(_))
        ));

        // with one, open succeeds through the fallback
        let remote = LocalRemote::new(&remote_dir);
        let tree = VirtualTree::with_remote(&fx.outputs, &remote);
        let mut content = String::new();
        tree.open(Path::new("root/f1"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "f1 content");

        // a remote miss is still a not-found
        fx.cache.remove(&fx.x_hash).unwrap();
        assert!(matches!(
            tree.open(Path::new("root/sub/x")),
            Err(Error::PathNotFound(_))
        ));
    }

    #[test]
    fn test_walk_completeness() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        let entries: Vec<WalkEntry> = tree.walk(Path::new("root"), |e| panic!("{e}")).collect();
        assert_eq!(
            entries,
            vec![
                WalkEntry {
                    dir: PathBuf::from("root"),
                    dirs: vec!["sub".to_string()],
                    files: vec!["f1".to_string()],
                },
                WalkEntry {
                    dir: PathBuf::from("root/sub"),
                    dirs: vec!["y".to_string()],
                    files: vec!["x".to_string()],
                },
                WalkEntry {
                    dir: PathBuf::from("root/sub/y"),
                    dirs: vec![],
                    files: vec!["z".to_string()],
                },
            ]
        );
    }

    #[test]
    fn test_walk_inside_directory_output() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        let entries: Vec<WalkEntry> =
            tree.walk(Path::new("root/sub"), |e| panic!("{e}")).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dir, PathBuf::from("root/sub"));
        assert_eq!(entries[0].dirs, vec!["y".to_string()]);
        assert_eq!(entries[0].files, vec!["x".to_string()]);
        assert_eq!(entries[1].dir, PathBuf::from("root/sub/y"));
    }

    #[test]
    fn test_walk_fetches_manifest_once() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        let first: Vec<WalkEntry> = tree.walk(Path::new("root"), |e| panic!("{e}")).collect();
        assert_eq!(first.len(), 3);

        // the stored manifest is gone, yet the walk still expands from the
        // memoized fetch: it was loaded exactly once
        fx.cache.remove(&fx.sub_hash).unwrap();
        let second: Vec<WalkEntry> = tree.walk(Path::new("root"), |e| panic!("{e}")).collect();
        assert_eq!(second, first);
    }

    #[test]
    fn test_walk_missing_top() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        let mut errors = Vec::new();
        let entries: Vec<WalkEntry> = tree.walk(Path::new("nope"), |e| errors.push(e)).collect();
        assert!(entries.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::PathNotFound(_)));
    }

    #[test]
    fn test_walk_file_top() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        let mut errors = Vec::new();
        let entries: Vec<WalkEntry> =
            tree.walk(Path::new("root/f1"), |e| errors.push(e)).collect();
        assert!(entries.is_empty());
        assert!(matches!(errors[0], Error::NotADirectory(_)));
    }

    #[test]
    fn test_walk_prunes_on_corrupt_manifest() {
        let fx = fixture();

        // tamper with the stored manifest before anything fetched it
        let path = fx.cache.path_of(&fx.sub_hash);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(0xff);
        std::fs::write(&path, &bytes).unwrap();

        let tree = VirtualTree::new(&fx.outputs);
        let mut errors = Vec::new();
        let entries: Vec<WalkEntry> =
            tree.walk(Path::new("root"), |e| errors.push(e)).collect();

        // the walk continues past the broken subtree
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dir, PathBuf::from("root"));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::CorruptManifest(_)));
    }

    #[test]
    fn test_walk_corrupt_top_output_reports_once() {
        let fx = fixture();

        let path = fx.cache.path_of(&fx.sub_hash);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(0xff);
        std::fs::write(&path, &bytes).unwrap();

        // walking at the broken output's own root fails the up-front
        // expansion: one callback invocation, nothing yielded
        let tree = VirtualTree::new(&fx.outputs);
        let mut errors = Vec::new();
        let entries: Vec<WalkEntry> =
            tree.walk(Path::new("root/sub"), |e| errors.push(e)).collect();
        assert!(entries.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::CorruptManifest(_)));
    }

    #[test]
    fn test_walk_files() {
        let fx = fixture();
        let tree = VirtualTree::new(&fx.outputs);

        let files: Vec<PathBuf> = tree.walk_files(Path::new("root")).collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("root/f1"),
                PathBuf::from("root/sub/x"),
                PathBuf::from("root/sub/y/z"),
            ]
        );
    }
}
