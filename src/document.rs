// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Thomas Junier
// Modifications (c) 2026 Peter Carlton

// Pipeline input/output documents (AlphaFold3 JSON dialect).
//
// Only the fields the cache needs are typed. Everything else (`modelSeeds`, `dialect`,
// ligand/RNA/DNA chains, modifications, ...) is kept in flattened maps so a document survives a
// read/write cycle unchanged.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::MsaCacheError;
use crate::seq::hash::Key;
use crate::seq::record::{null_as_none, MsaRecord};
use crate::store::MsaDb;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sequences: Vec<ChainEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<ProteinChain>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProteinChain {
    /// A chain id or a list of ids (homomers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub sequence: String,
    #[serde(
        default,
        deserialize_with = "null_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub unpaired_msa: Option<Value>,
    #[serde(
        default,
        deserialize_with = "null_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub paired_msa: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProteinChain {
    pub fn to_record(&self) -> MsaRecord {
        MsaRecord {
            sequence: self.sequence.clone(),
            unpaired_msa: self.unpaired_msa.clone(),
            paired_msa: self.paired_msa.clone(),
            templates: self.templates.clone().unwrap_or_default(),
        }
    }

    fn label(&self) -> String {
        match &self.id {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::from("?"),
        }
    }

    fn has_templates(&self) -> bool {
        self.templates.as_ref().is_some_and(|t| !t.is_empty())
    }

    fn is_complete(&self) -> bool {
        self.unpaired_msa.is_some() && self.paired_msa.is_some() && self.has_templates()
    }

    // Fills only what this chain lacks; data already in the document wins.
    fn fill_from(&mut self, cached: &MsaRecord) -> bool {
        let mut filled = false;
        if self.unpaired_msa.is_none() && cached.unpaired_msa.is_some() {
            self.unpaired_msa = cached.unpaired_msa.clone();
            filled = true;
        }
        if self.paired_msa.is_none() && cached.paired_msa.is_some() {
            self.paired_msa = cached.paired_msa.clone();
            filled = true;
        }
        if !self.has_templates() && !cached.templates.is_empty() {
            self.templates = Some(cached.templates.clone());
            filled = true;
        }
        filled
    }
}

/// Outcome of [`PipelineDocument::fill_from_store`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    pub protein_chains: usize,
    pub hits: usize,
    pub filled: usize,
    pub misses: Vec<Key>,
    pub complete: usize,
    /// RNA chains without an `unpairedMsa`; the cache cannot supply these.
    pub rna_without_msa: usize,
}

impl FillReport {
    /// True if the data pipeline has nothing left to compute: there is at least one protein
    /// chain, every protein chain carries both alignments and templates, and every RNA chain
    /// carries its alignment.
    pub fn is_complete(&self) -> bool {
        self.protein_chains > 0
            && self.complete == self.protein_chains
            && self.rna_without_msa == 0
    }
}

// An RNA entry needs its own unpaired MSA from the data pipeline.
fn rna_lacks_msa(entry: &ChainEntry) -> bool {
    entry
        .other
        .get("rna")
        .is_some_and(|rna| rna.get("unpairedMsa").map_or(true, Value::is_null))
}

impl PipelineDocument {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<PipelineDocument, MsaCacheError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        text.parse().map_err(|e: MsaCacheError| {
            MsaCacheError::Format(format!("{}: {}", path.display(), e))
        })
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MsaCacheError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn protein_chains(&self) -> impl Iterator<Item = &ProteinChain> {
        self.sequences.iter().filter_map(|c| c.protein.as_ref())
    }

    /// One record per distinct protein sequence, in document order.
    ///
    /// Identical chains (e.g. the copies of a homomer) collapse into one record, merged with
    /// the usual upsert rules.
    pub fn bundles(&self) -> Result<Vec<MsaRecord>, MsaCacheError> {
        let mut bundles: Vec<MsaRecord> = Vec::new();
        for (i, chain) in self.sequences.iter().enumerate() {
            let Some(protein) = &chain.protein else {
                let kinds: Vec<&str> = chain.other.keys().map(String::as_str).collect();
                warn!("Entry {} is not a protein chain ({:?}); skipped", i, kinds);
                continue;
            };
            if protein.sequence.trim().is_empty() {
                return Err(MsaCacheError::Format(format!(
                    "protein chain {} has an empty sequence",
                    protein.label()
                )));
            }
            let record = protein.to_record();
            let key = record.key();
            match bundles.iter_mut().find(|b| b.key() == key) {
                Some(existing) => {
                    debug!("Chain {} repeats {}", protein.label(), key.short(12));
                    existing.merge(&record);
                }
                None => bundles.push(record),
            }
        }
        Ok(bundles)
    }

    /// Completes protein chains from the store. Chains whose sequence is not cached are left
    /// as they are and reported as misses.
    pub fn fill_from_store(&mut self, db: &MsaDb) -> Result<FillReport, MsaCacheError> {
        let mut report = FillReport::default();
        for chain in self.sequences.iter_mut() {
            if rna_lacks_msa(chain) {
                report.rna_without_msa += 1;
            }
            let Some(protein) = chain.protein.as_mut() else {
                continue;
            };
            report.protein_chains += 1;
            match db.lookup(&protein.sequence)? {
                Some(cached) => {
                    report.hits += 1;
                    if protein.fill_from(&cached) {
                        report.filled += 1;
                    }
                }
                None => {
                    let key = protein.to_record().key();
                    warn!(
                        "Chain {} ({}) is not in the store",
                        protein.label(),
                        key.short(12)
                    );
                    report.misses.push(key);
                }
            }
            if protein.is_complete() {
                report.complete += 1;
            }
        }
        Ok(report)
    }
}

impl std::str::FromStr for PipelineDocument {
    type Err = MsaCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)?;
        if value.get("sequences").is_none() {
            return Err(MsaCacheError::Format(String::from(
                "document has no 'sequences' list",
            )));
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"{
        "name": "2PV7",
        "modelSeeds": [42, 55, 1],
        "sequences": [
            {"protein": {"id": ["A", "B"], "sequence": "GMRESYANENQFGFKTINSDIHKIVIVGGYGKLGGLFARYLRASGYPISILDREDWAVAESILANADVVIVSVPINLTLETIERLKPYLTENMLLADLTSVKREPLAKMLEVHTGAVLGLHPMFGADIASMAKQVVVRCDGRFPERYEWLLEQIQIWGAKIYQTNATEHDHNMTYIQALRHFSTFANGLHLSKQPINLANLLALSSPIYRLELAMIGRLFAQDAELYADIIMDKSENLAVIETLKQTYDEALTFFENNDRQGFIDAFHKVRDWFGDYSEQFLKESRQLLQQANDLKQG"}},
            {"ligand": {"id": "C", "ccdCodes": ["ATP"]}},
            {"protein": {"id": "D", "sequence": "MKTAYIAKQR", "unpairedMsa": ">q\nMKTAYIAKQR\n", "pairedMsa": null, "templates": [], "modifications": []}}
        ],
        "dialect": "alphafold3",
        "version": 1
    }"#;

    #[test]
    fn test_parse_keeps_unknown_fields() {
        let doc: PipelineDocument = DOC.parse().unwrap();
        assert_eq!(doc.name.as_deref(), Some("2PV7"));
        assert_eq!(doc.extra["dialect"], json!("alphafold3"));
        assert_eq!(doc.sequences[1].other["ligand"]["id"], json!("C"));
        let d = doc.sequences[2].protein.as_ref().unwrap();
        assert_eq!(d.extra["modifications"], json!([]));
        assert_eq!(d.paired_msa, None);

        let back: Value = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["modelSeeds"], json!([42, 55, 1]));
        assert_eq!(back["sequences"][1]["ligand"]["ccdCodes"], json!(["ATP"]));
    }

    #[test]
    fn test_bundles() {
        let doc: PipelineDocument = DOC.parse().unwrap();
        let bundles = doc.bundles().unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[1].sequence, "MKTAYIAKQR");
        assert_eq!(bundles[1].unpaired_msa, Some(json!(">q\nMKTAYIAKQR\n")));
        assert!(bundles[1].templates.is_empty());
    }

    #[test]
    fn test_bundles_dedupe_homomer() {
        let doc: PipelineDocument = r#"{"sequences": [
            {"protein": {"id": "A", "sequence": "MKTAYIAKQR", "templates": [{"mmcif": "t"}]}},
            {"protein": {"id": "B", "sequence": "MKTAYIAKQR", "unpairedMsa": "u"}}
        ]}"#
        .parse()
        .unwrap();
        let bundles = doc.bundles().unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].unpaired_msa, Some(json!("u")));
        assert_eq!(bundles[0].templates, vec![json!({"mmcif": "t"})]);
    }

    #[test]
    fn test_missing_sequences() {
        let err = r#"{"name": "x"}"#.parse::<PipelineDocument>().unwrap_err();
        assert!(matches!(err, MsaCacheError::Format(_)));
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let doc: PipelineDocument = r#"{"sequences": [{"protein": {"id": "A", "sequence": "  "}}]}"#
            .parse()
            .unwrap();
        assert!(matches!(doc.bundles(), Err(MsaCacheError::Format(_))));
    }

    #[test]
    fn test_fill_report_needs_pipeline() {
        let db_dir = tempfile::tempdir().unwrap();
        let db = MsaDb::open(db_dir.path().join("msa.sqlite")).unwrap();

        let mut rna_only: PipelineDocument =
            r#"{"sequences": [{"rna": {"id": "A", "sequence": "ACGU"}}]}"#.parse().unwrap();
        let report = rna_only.fill_from_store(&db).unwrap();
        assert_eq!(report.protein_chains, 0);
        assert_eq!(report.rna_without_msa, 1);
        assert!(!report.is_complete());

        let mut with_rna: PipelineDocument = r#"{"sequences": [
            {"protein": {"id": "A", "sequence": "MKTAYIAKQR", "unpairedMsa": "u", "pairedMsa": "p", "templates": ["T1"]}},
            {"rna": {"id": "B", "sequence": "ACGU", "unpairedMsa": null}}
        ]}"#
        .parse()
        .unwrap();
        let report = with_rna.fill_from_store(&db).unwrap();
        assert_eq!(report.complete, 1);
        assert!(!report.is_complete());

        with_rna.sequences[1].other["rna"]["unpairedMsa"] = json!(">q\nACGU\n");
        assert!(with_rna.fill_from_store(&db).unwrap().is_complete());
    }

    #[test]
    fn test_fill_keeps_document_data() {
        let mut chain = ProteinChain {
            id: Some(json!("A")),
            sequence: String::from("MKTAYIAKQR"),
            unpaired_msa: Some(json!("mine")),
            paired_msa: None,
            templates: Some(vec![]),
            extra: Map::new(),
        };
        let cached = MsaRecord::new("MKTAYIAKQR")
            .with_unpaired_msa("cached-u")
            .with_paired_msa("cached-p")
            .with_templates(vec![json!("T1")]);
        assert!(chain.fill_from(&cached));
        assert_eq!(chain.unpaired_msa, Some(json!("mine")));
        assert_eq!(chain.paired_msa, Some(json!("cached-p")));
        assert_eq!(chain.templates, Some(vec![json!("T1")]));
        assert!(chain.is_complete());
    }
}
