// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Peter Carlton

// Content keys for sequences.
//
// A key is the lowercase hex SHA-256 of the *normalized* sequence. The normalization rule
// determines key identity: every key already in a store was computed under it, so it is
// versioned (`HASH_POLICY`) and recorded in the store's metadata.
//
// Policy `sha256-v1`: drop all whitespace, then ASCII-uppercase.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::MsaCacheError;

pub const HASH_POLICY: &str = "sha256-v1";

/// Length of a hex-encoded SHA-256 digest.
pub const KEY_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key(String);

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("valid key regex"))
}

impl Key {
    /// Parses a full hex key. Upper-case hex is accepted and folded.
    pub fn parse(text: &str) -> Result<Key, MsaCacheError> {
        let text = text.trim();
        if !key_regex().is_match(text) {
            return Err(MsaCacheError::Format(format!(
                "not a {}-character hex key: '{}'",
                KEY_LEN, text
            )));
        }
        Ok(Key(text.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, for log lines.
    pub fn short(&self, n: usize) -> &str {
        &self.0[..n.min(self.0.len())]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Key {
    type Err = MsaCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::parse(s)
    }
}

impl TryFrom<String> for Key {
    type Error = MsaCacheError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Key::parse(&s)
    }
}

impl From<Key> for String {
    fn from(k: Key) -> Self {
        k.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn normalize(sequence: &str) -> String {
    sequence
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Total: any string hashes, the empty one included.
pub fn hash(sequence: &str) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(normalize(sequence).as_bytes());
    Key(hex::encode(hasher.finalize()))
}

/// Normalizes a search query to a lowercase hex prefix. `None` if it cannot be a key prefix.
pub fn key_prefix(query: &str) -> Option<String> {
    let q = query.trim().to_ascii_lowercase();
    if q.is_empty() || q.len() > KEY_LEN || !q.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(q)
}
