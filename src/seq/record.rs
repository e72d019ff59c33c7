// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Thomas Junier
// Modifications (c) 2026 Peter Carlton

// A cached MSA bundle: the query sequence plus whatever the pipeline computed for it. The
// alignment and template payloads are opaque JSON and are never interpreted here.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::seq::hash::{hash, Key};

/// An alignment set to `Some(Value::Null)` is the same as an absent one: it compares equal to
/// `None` and is stored as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsaRecord {
    pub sequence: String,
    #[serde(default, deserialize_with = "null_as_none")]
    pub unpaired_msa: Option<Value>,
    #[serde(default, deserialize_with = "null_as_none")]
    pub paired_msa: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub templates: Vec<Value>,
}

// `null` and a missing field mean the same thing everywhere in this crate.

pub(crate) fn null_as_none<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(deserializer)?;
    Ok(v.filter(|v| !v.is_null()))
}

pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn present(v: &Option<Value>) -> Option<&Value> {
    v.as_ref().filter(|v| !v.is_null())
}

impl PartialEq for MsaRecord {
    fn eq(&self, other: &MsaRecord) -> bool {
        self.sequence == other.sequence
            && present(&self.unpaired_msa) == present(&other.unpaired_msa)
            && present(&self.paired_msa) == present(&other.paired_msa)
            && self.templates == other.templates
    }
}

impl MsaRecord {
    pub fn new(sequence: impl Into<String>) -> Self {
        MsaRecord {
            sequence: sequence.into(),
            unpaired_msa: None,
            paired_msa: None,
            templates: Vec::new(),
        }
    }

    pub fn with_unpaired_msa(mut self, msa: impl Into<Value>) -> Self {
        self.unpaired_msa = Some(msa.into()).filter(|v| !v.is_null());
        self
    }

    pub fn with_paired_msa(mut self, msa: impl Into<Value>) -> Self {
        self.paired_msa = Some(msa.into()).filter(|v| !v.is_null());
        self
    }

    pub fn with_templates(mut self, templates: Vec<Value>) -> Self {
        self.templates = templates;
        self
    }

    pub fn key(&self) -> Key {
        hash(&self.sequence)
    }

    /// True if alignments and templates are all present.
    pub fn is_complete(&self) -> bool {
        present(&self.unpaired_msa).is_some()
            && present(&self.paired_msa).is_some()
            && !self.templates.is_empty()
    }

    /// Merges a newer bundle for the same sequence into this one.
    ///
    /// Supplied alignments replace stored ones; absent ones leave them alone. A non-empty
    /// template list replaces the stored list, an empty one does not clear it. Returns true if
    /// anything changed.
    pub fn merge(&mut self, incoming: &MsaRecord) -> bool {
        let mut changed = false;
        if let Some(msa) = present(&incoming.unpaired_msa) {
            changed |= self.unpaired_msa.as_ref() != Some(msa);
            self.unpaired_msa = Some(msa.clone());
        }
        if let Some(msa) = present(&incoming.paired_msa) {
            changed |= self.paired_msa.as_ref() != Some(msa);
            self.paired_msa = Some(msa.clone());
        }
        if !incoming.templates.is_empty() {
            changed |= self.templates != incoming.templates;
            self.templates = incoming.templates.clone();
        }
        changed
    }
}
