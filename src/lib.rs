//! silo - content-addressed object store for tracked data
//!
//! a local object database keyed by content hash, with directory manifests,
//! mark-and-sweep garbage collection and a virtual filesystem view over
//! tracked outputs.
//!
//! # Core concepts
//!
//! - **Object**: content-addressed bytes stored under `objects/<2-hex>/<62-hex>`
//! - **Manifest**: a serialized directory listing (CBOR + zstd), stored as an
//!   object whose hash carries a `.dir` marker
//! - **Output**: one tracked workspace path, its recorded hash and the cache
//!   store holding its content
//! - **VirtualTree**: read-only filesystem semantics (metadata, open, walk)
//!   over a set of outputs, with remote fallback for missing content
//!
//! # Example usage
//!
//! ```no_run
//! use silo::{gc, HashKey, ObjectStore, WorkerPool};
//! use std::path::Path;
//!
//! // open an existing store
//! let store = ObjectStore::open(Path::new("/path/to/store"), false).unwrap();
//!
//! // insert some content
//! let key = HashKey::of_bytes(b"hello");
//! store.insert(&key, b"hello").unwrap();
//!
//! // collect everything unreachable from the used set
//! let pool = WorkerPool::new(None);
//! gc::collect(&store, &[key], &pool, false).unwrap();
//! ```

mod config;
mod error;
mod hash;
mod manifest;
mod odb;
mod output;
mod pool;
mod remote;
mod trie;
mod vtree;

pub mod gc;

pub use config::{Config, Remote};
pub use error::{Error, Result};
pub use hash::{HashKey, DIR_SUFFIX};
pub use manifest::{DirManifest, ManifestEntry};
pub use odb::ObjectStore;
pub use output::{Output, OutputSet};
pub use pool::WorkerPool;
pub use remote::{LocalRemote, RemoteSource};
pub use trie::PathTrie;
pub use vtree::{Meta, VirtualTree, Walk, WalkEntry};
