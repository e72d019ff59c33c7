// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Thomas Junier
// Modifications (c) 2026 Peter Carlton

use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;

use msacache::{seq::record::MsaRecord, store::MsaDb};

/// A store in a fresh temporary directory. Keep the `TempDir` alive as long as the store.
#[allow(dead_code)]
pub fn scratch_store() -> (TempDir, PathBuf, MsaDb) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("msa.sqlite");
    let db = MsaDb::open(&path).expect("open store");
    (dir, path, db)
}

#[allow(dead_code)]
pub fn complete_record(sequence: &str) -> MsaRecord {
    MsaRecord::new(sequence)
        .with_unpaired_msa(format!(">query\n{}\n", sequence))
        .with_paired_msa(format!(">query\n{}\n", sequence))
        .with_templates(vec![json!({"mmcif": "data_T1", "queryIndices": [0, 1], "templateIndices": [0, 1]})])
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}
