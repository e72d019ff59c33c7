// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Thomas Junier
// Modifications (c) 2026 Peter Carlton

fn main() {
    if let Err(e) = msacache::run() {
        eprintln!("Error: {}", e);
        if e.is_busy() {
            eprintln!("Another process is writing to the MSA store; try again later.");
        }
        std::process::exit(e.exit_code());
    }
}
