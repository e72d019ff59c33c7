// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Thomas Junier
// Modifications (c) 2026 Peter Carlton

pub mod config;
pub mod document;
pub mod errors;
pub mod import;
pub mod pipeline;
mod runner;
pub mod seq;
pub mod store;

use crate::errors::MsaCacheError;

pub fn run() -> Result<(), MsaCacheError> {
    runner::run()
}
