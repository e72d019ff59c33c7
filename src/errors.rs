// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Thomas Junier
// Modifications (c) 2026 Peter Carlton

use std::io;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::seq::hash::Key;

#[derive(Debug, Error)]
pub enum MsaCacheError {
    /// The store could not be opened: unreadable/unwritable path, not a database, or a schema
    /// this build does not understand.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("duplicate key: {0} is already in the store")]
    DuplicateKey(Key),

    #[error("not found: no record for key {0}")]
    NotFound(Key),

    #[error("store busy: another writer holds the lock")]
    StoreBusy,

    #[error("store closed")]
    StoreClosed,

    #[error("corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("pipeline failed with exit code {}", fmt_exit_code(.exit_code))]
    PipelineFailed { exit_code: Option<i32> },

    /// SQLite failure on an open store that is not lock contention.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Format error: {0}")]
    Format(String),
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => String::from("none (terminated by signal)"),
    }
}

impl MsaCacheError {
    /// Process exit code for the CLI. A failed subprocess hands its own code through.
    pub fn exit_code(&self) -> i32 {
        match self {
            MsaCacheError::PipelineFailed {
                exit_code: Some(code),
            } if *code != 0 => *code,
            _ => 1,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, MsaCacheError::StoreBusy)
    }
}

// Lock contention becomes StoreBusy, everything else on an open store is a plain storage error.
// Open-time failures are mapped to StorageUnavailable by the store itself.

impl From<rusqlite::Error> for MsaCacheError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                MsaCacheError::StoreBusy
            }
            _ => MsaCacheError::Storage(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for MsaCacheError {
    fn from(e: serde_json::Error) -> Self {
        MsaCacheError::Format(e.to_string())
    }
}
