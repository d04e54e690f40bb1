use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;

/// suffix marking a hash key that addresses a directory manifest.
///
/// stable across a store's lifetime: changing it invalidates every
/// previously stored key.
pub const DIR_SUFFIX: &str = ".dir";

const HEX_LEN: usize = 64;

/// content digest key for the object store.
///
/// two forms exist: a file hash (64 lowercase hex chars, addressing a single
/// blob) and a directory hash (the same plus [`DIR_SUFFIX`], addressing a
/// serialized directory manifest).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashKey(String);

impl HashKey {
    /// parse and validate a key in either form
    pub fn parse(s: &str) -> crate::Result<Self> {
        let hex_part = s.strip_suffix(DIR_SUFFIX).unwrap_or(s);
        if hex_part.len() != HEX_LEN || hex::decode(hex_part).is_err() {
            return Err(Error::InvalidHashKey(s.to_string()));
        }
        if hex_part.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidHashKey(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// file hash of a blob's content
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// directory hash of a serialized manifest
    pub fn of_manifest_bytes(data: &[u8]) -> Self {
        Self(format!("{}{}", hex::encode(Sha256::digest(data)), DIR_SUFFIX))
    }

    /// does this key address a directory manifest
    pub fn is_dir(&self) -> bool {
        self.0.ends_with(DIR_SUFFIX)
    }

    /// the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// split into path components for the sharded store layout
    /// returns (first 2 hex chars, remainder including any suffix)
    pub fn to_path_components(&self) -> (&str, &str) {
        (&self.0[..2], &self.0[2..])
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.is_dir() { "/dir" } else { "" };
        write!(f, "HashKey({}{})", &self.0[..12], marker)
    }
}

impl Serialize for HashKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HashKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
