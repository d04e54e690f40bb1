use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::hash::HashKey;
use crate::odb::ObjectStore;
use crate::trie::PathTrie;

/// one manifest leaf: a relative path (as segments) and its file hash
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: Vec<String>,
    pub hash: HashKey,
}

impl ManifestEntry {
    pub fn new(path: Vec<String>, hash: HashKey) -> Self {
        Self { path, hash }
    }
}

/// immutable directory manifest: an ordered path -> file-hash listing,
/// itself stored as a hashed object.
///
/// serialized as CBOR of the sorted entry list, zstd compressed; the
/// directory hash is computed over the compressed bytes and carries the
/// `.dir` marker, so loading a manifest by its hash can always be verified
/// by recomputing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirManifest {
    entries: Vec<ManifestEntry>,
}

impl DirManifest {
    /// build a manifest, validating, sorting and deduplicating entries
    pub fn new(mut entries: Vec<ManifestEntry>) -> Result<Self> {
        for entry in &entries {
            validate_entry_path(&entry.path)?;
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));

        for window in entries.windows(2) {
            if window[0].path == window[1].path {
                return Err(Error::DuplicateEntryPath(window[0].path.join("/")));
            }
        }

        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// entries in sorted path order (the order the hash is computed over)
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// look up a file hash by relative segment path
    pub fn get(&self, key: &[String]) -> Option<&HashKey> {
        self.entries
            .binary_search_by(|e| e.path.as_slice().cmp(key))
            .ok()
            .map(|i| &self.entries[i].hash)
    }

    /// iterate `(path segments, file hash)` pairs in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&[String], &HashKey)> {
        self.entries.iter().map(|e| (e.path.as_slice(), &e.hash))
    }

    /// member file hashes, for gc expansion
    pub fn file_hashes(&self) -> impl Iterator<Item = &HashKey> {
        self.entries.iter().map(|e| &e.hash)
    }

    /// prefix-tree view for granular lookups
    pub fn trie(&self) -> PathTrie<HashKey> {
        let mut trie = PathTrie::new();
        for entry in &self.entries {
            trie.insert(&entry.path, entry.hash.clone());
        }
        trie
    }

    /// serialize to the stored form: canonical cbor, zstd compressed
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cbor = Vec::new();
        ciborium::into_writer(&self.entries, &mut cbor)?;
        zstd::encode_all(&cbor[..], 3).map_err(|e| Error::Io {
            path: PathBuf::from("<zstd>"),
            source: e,
        })
    }

    /// the directory hash this manifest serializes to
    pub fn hash(&self) -> Result<HashKey> {
        Ok(HashKey::of_manifest_bytes(&self.to_bytes()?))
    }

    /// serialize and store, returning the directory hash
    pub fn save(&self, store: &ObjectStore) -> Result<HashKey> {
        let bytes = self.to_bytes()?;
        let key = HashKey::of_manifest_bytes(&bytes);
        store.insert(&key, &bytes)?;
        Ok(key)
    }

    /// load a manifest by its directory hash and verify it reproduces that
    /// hash; a mismatch is corruption, never silently tolerated.
    pub fn load(store: &ObjectStore, dir_hash: &HashKey) -> Result<Self> {
        if !dir_hash.is_dir() {
            return Err(Error::InvalidHashKey(dir_hash.to_string()));
        }

        let bytes = store.read(dir_hash)?;
        if HashKey::of_manifest_bytes(&bytes) != *dir_hash {
            return Err(Error::CorruptManifest(dir_hash.clone()));
        }

        let cbor = zstd::decode_all(&bytes[..]).map_err(|e| Error::Io {
            path: store.path_of(dir_hash),
            source: e,
        })?;
        let entries: Vec<ManifestEntry> = ciborium::from_reader(&cbor[..])?;
        Self::new(entries)
    }
}

fn validate_entry_path(path: &[String]) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidEntryPath("empty path".to_string()));
    }
    for segment in path {
        if segment.is_empty() {
            return Err(Error::InvalidEntryPath(format!(
                "empty segment in: {}",
                path.join("/")
            )));
        }
        if segment.contains('/') || segment.contains('\0') {
            return Err(Error::InvalidEntryPath(format!(
                "invalid segment: {}",
                segment
            )));
        }
        if segment == "." || segment == ".." {
            return Err(Error::InvalidEntryPath(format!(
                "reserved segment: {}",
                segment
            )));
        }
    }
    Ok(())
}
