use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::hash::HashKey;
use crate::manifest::DirManifest;
use crate::odb::ObjectStore;
use crate::pool::WorkerPool;

/// which removal a sweep phase performs, picked once per phase
#[derive(Clone, Copy)]
enum RemoveKind {
    /// directory object plus its unpacked artifact
    DirArtifact,
    /// plain object
    Object,
}

/// garbage collect every stored object not reachable from `used`.
///
/// directory hashes in `used` are expanded to their member file hashes
/// unless `shallow` is set; shallow mode treats the directory hash itself as
/// covering its unexpanded contents, trading gc precision for skipping the
/// manifest loads (members stored independently of any used directory are
/// then unprotected). a manifest that fails to load during expansion aborts
/// the whole run, since reachability cannot be determined.
///
/// unreferenced directory objects are deleted before file objects; the
/// directory phase is fully drained first because unpacked artifacts overlap
/// file paths still being enumerated. individual deletion failures are
/// logged and skipped. returns whether at least one object was deleted.
pub fn collect(
    store: &ObjectStore,
    used: &[HashKey],
    pool: &WorkerPool,
    shallow: bool,
) -> Result<bool> {
    if store.read_only() {
        return Err(Error::ReadOnlyStore(store.root().to_path_buf()));
    }

    // mark
    let mut used_hashes: HashSet<HashKey> = HashSet::new();
    for key in used {
        used_hashes.insert(key.clone());
        if key.is_dir() && !shallow {
            let manifest = DirManifest::load(store, key)?;
            used_hashes.extend(manifest.file_hashes().cloned());
        }
    }

    // partition the unreferenced remainder so dirs can go first
    let mut dir_keys = Vec::new();
    let mut file_keys = Vec::new();
    for key in store.all(pool) {
        let key = key?;
        if used_hashes.contains(&key) {
            continue;
        }
        if key.is_dir() {
            dir_keys.push(key);
        } else {
            file_keys.push(key);
        }
    }

    if dir_keys.is_empty() && file_keys.is_empty() {
        return Ok(false);
    }

    let removed_dirs = sweep(store, pool, dir_keys, RemoveKind::DirArtifact, "dirs");
    let removed_files = sweep(store, pool, file_keys, RemoveKind::Object, "objects");
    Ok(removed_dirs || removed_files)
}

/// delete one group of keys through the pool, draining it completely before
/// returning. failures are soft: logged, never propagated.
fn sweep(
    store: &ObjectStore,
    pool: &WorkerPool,
    keys: Vec<HashKey>,
    kind: RemoveKind,
    label: &'static str,
) -> bool {
    if keys.is_empty() {
        return false;
    }
    tracing::debug!(total = keys.len(), "cleaning {}", label);

    let store = store.clone();
    let mut any_deleted = false;
    for deleted in pool.imap_unordered(keys, move |key| {
        let result = match kind {
            RemoveKind::DirArtifact => store.remove_dir_artifact(&key),
            RemoveKind::Object => store.remove(&key),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to remove object");
                false
            }
        }
    }) {
        any_deleted |= deleted;
    }
    any_deleted
}
