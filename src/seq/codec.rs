// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Peter Carlton

// Row form of an `MsaRecord`.
//
// Every structured field is stored as gzip-compressed JSON. Absent alignments are SQL `NULL`;
// templates are always present (an empty list encodes as `[]`).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::errors::MsaCacheError;
use crate::seq::hash::{hash, Key};
use crate::seq::record::MsaRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub sequence: String,
    pub unpaired_msa: Option<Vec<u8>>,
    pub paired_msa: Option<Vec<u8>>,
    pub templates: Vec<u8>,
}

pub fn encode(record: &MsaRecord) -> Result<StoredRecord, MsaCacheError> {
    let unpaired_msa = match record.unpaired_msa.as_ref().filter(|v| !v.is_null()) {
        Some(v) => Some(compress(v)?),
        None => None,
    };
    let paired_msa = match record.paired_msa.as_ref().filter(|v| !v.is_null()) {
        Some(v) => Some(compress(v)?),
        None => None,
    };
    let templates = compress(&Value::Array(record.templates.clone()))?;
    Ok(StoredRecord {
        key: record.key().to_string(),
        sequence: record.sequence.clone(),
        unpaired_msa,
        paired_msa,
        templates,
    })
}

pub fn decode(stored: &StoredRecord) -> Result<MsaRecord, MsaCacheError> {
    let corrupt = |reason: String| MsaCacheError::CorruptRecord {
        key: stored.key.clone(),
        reason,
    };

    let expected: Key = hash(&stored.sequence);
    if expected.as_str() != stored.key {
        return Err(corrupt(format!("sequence hashes to {}", expected)));
    }

    let unpaired_msa = match &stored.unpaired_msa {
        Some(blob) => Some(decompress(blob).map_err(|e| corrupt(format!("unpairedMsa: {}", e)))?),
        None => None,
    };
    let paired_msa = match &stored.paired_msa {
        Some(blob) => Some(decompress(blob).map_err(|e| corrupt(format!("pairedMsa: {}", e)))?),
        None => None,
    };
    let templates = match decompress(&stored.templates)
        .map_err(|e| corrupt(format!("templates: {}", e)))?
    {
        Value::Array(items) => items,
        other => {
            return Err(corrupt(format!(
                "templates: expected a list, found {}",
                json_kind(&other)
            )))
        }
    };

    Ok(MsaRecord {
        sequence: stored.sequence.clone(),
        unpaired_msa: unpaired_msa.filter(|v| !v.is_null()),
        paired_msa: paired_msa.filter(|v| !v.is_null()),
        templates,
    })
}

fn compress(value: &Value) -> Result<Vec<u8>, MsaCacheError> {
    let raw = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

fn decompress(blob: &[u8]) -> Result<Value, String> {
    let mut raw = Vec::new();
    GzDecoder::new(blob)
        .read_to_end(&mut raw)
        .map_err(|e| format!("gzip: {}", e))?;
    serde_json::from_slice(&raw).map_err(|e| format!("json: {}", e))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_record() -> MsaRecord {
        MsaRecord::new("GSHMSLFDFFKNKGSAA")
            .with_unpaired_msa(">query\nGSHMSLFDFFKNKGSAA\n>hit1\nGSHMSLFDFF-NKGSAA\n")
            .with_paired_msa(">query\nGSHMSLFDFFKNKGSAA\n")
            .with_templates(vec![json!({
                "mmcif": "data_1ABC\n#\n",
                "queryIndices": [0, 1, 2],
                "templateIndices": [4, 5, 6],
                "vendorExtra": {"score": 93, "tags": ["x", null]},
            })])
    }

    #[test]
    fn test_roundtrip_full() {
        let r = full_record();
        assert_eq!(decode(&encode(&r).unwrap()).unwrap(), r);
    }

    #[test]
    fn test_roundtrip_sparse() {
        // Only the sequence known: both alignments NULL, templates an empty list
        let r = MsaRecord::new("MKTAYIAKQR");
        let stored = encode(&r).unwrap();
        assert!(stored.unpaired_msa.is_none());
        assert!(stored.paired_msa.is_none());
        assert_eq!(decode(&stored).unwrap(), r);
    }

    #[test]
    fn test_null_alignment_stored_as_absent() {
        let r = MsaRecord {
            unpaired_msa: Some(Value::Null),
            ..MsaRecord::new("MKTAYIAKQR").with_paired_msa("p")
        };
        let stored = encode(&r).unwrap();
        assert!(stored.unpaired_msa.is_none());
        let back = decode(&stored).unwrap();
        assert_eq!(back.unpaired_msa, None);
        assert_eq!(back, r);
        assert_ne!(back, MsaRecord::new("MKTAYIAKQR"));
    }

    #[test]
    fn test_roundtrip_structured_msa() {
        // Alignments need not be strings
        let r = MsaRecord::new("MKTAYIAKQR").with_unpaired_msa(json!({"a3m": ["q", "h"], "n": 2}));
        assert_eq!(decode(&encode(&r).unwrap()).unwrap(), r);
    }

    #[test]
    fn test_key_is_sequence_hash() {
        let r = full_record();
        assert_eq!(encode(&r).unwrap().key, r.key().to_string());
    }

    #[test]
    fn test_decode_bad_blob() {
        let mut stored = encode(&full_record()).unwrap();
        stored.paired_msa = Some(b"not gzip".to_vec());
        match decode(&stored) {
            Err(MsaCacheError::CorruptRecord { reason, .. }) => {
                assert!(reason.starts_with("pairedMsa"), "{}", reason)
            }
            other => panic!("expected CorruptRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_key_mismatch() {
        let mut stored = encode(&full_record()).unwrap();
        stored.sequence.push('W');
        assert!(matches!(
            decode(&stored),
            Err(MsaCacheError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_decode_templates_not_a_list() {
        let mut stored = encode(&full_record()).unwrap();
        stored.templates = compress(&json!({"not": "a list"})).unwrap();
        assert!(matches!(
            decode(&stored),
            Err(MsaCacheError::CorruptRecord { .. })
        ));
    }
}
