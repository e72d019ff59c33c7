// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Peter Carlton

// Feeding the bundles of a pipeline document into the store.

use std::fmt;

use log::{info, warn};

use crate::document::PipelineDocument;
use crate::errors::MsaCacheError;
use crate::seq::hash::Key;
use crate::store::{MsaDb, Upserted};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Strict: one already-cached sequence aborts the whole document.
    Add,
    /// Insert new sequences, merge into cached ones.
    Upsert,
    /// Insert new sequences, leave cached ones alone.
    SkipExisting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: Vec<Key>,
    pub merged: Vec<Key>,
    pub unchanged: Vec<Key>,
    pub skipped: Vec<Key>,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added {}, merged {}, unchanged {}, skipped {}",
            self.added.len(),
            self.merged.len(),
            self.unchanged.len(),
            self.skipped.len()
        )
    }
}

pub fn import_document(
    db: &mut MsaDb,
    doc: &PipelineDocument,
    mode: ImportMode,
) -> Result<ImportReport, MsaCacheError> {
    let bundles = doc.bundles()?;
    for bundle in bundles.iter().filter(|b| !b.is_complete()) {
        warn!(
            "Sequence {} lacks unpaired MSA, paired MSA or templates",
            bundle.key().short(12)
        );
    }
    let mut report = ImportReport::default();

    match mode {
        ImportMode::Add => {
            report.added = db.add_all(&bundles)?;
        }
        ImportMode::Upsert => {
            for (key, outcome) in db.upsert_all(&bundles)? {
                match outcome {
                    Upserted::Inserted => report.added.push(key),
                    Upserted::Merged => report.merged.push(key),
                    Upserted::Unchanged => report.unchanged.push(key),
                }
            }
        }
        ImportMode::SkipExisting => {
            let (added, skipped) = db.add_missing(&bundles)?;
            for key in &skipped {
                warn!("{} is already in the store; skipped", key);
            }
            report.added = added;
            report.skipped = skipped;
        }
    }

    info!("Imported document {:?}: {}", doc.name, report);
    Ok(report)
}
