/*
 * Copyright © 2025, Martin Kessler <mkessler@mailbox.org>
 *
 * This program is free software: you can redistribute it and/or
 * modify it under the terms of the GNU General Public License version
 * 3 as published by the Free Software Foundation.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
 * General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Custom error types.
//!
//! Per-entry failures during traversal (unreadable files, failed
//! chown, failed mkdir) are logged and skipped at the call site; only
//! the variants below terminate a run.

use std::path::PathBuf;

pub use anyhow::Result;

#[derive(Debug, thiserror::Error)]
pub enum MbakError {
    #[error("Operation canceled")]
    Canceled,

    #[error("Out of space on destination: {total} bytes total, {used} used, {free} free")]
    OutOfSpace { total: u64, used: u64, free: u64 },

    #[error("Invalid source: {0}")]
    InvalidSource(&'static str),

    #[error("Invalid destination: {0}")]
    InvalidDestination(&'static str),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("No backup manifest found at {0}; this does not look like a backup volume")]
    ManifestMissing(PathBuf),

    #[error("Hash of {path} timed out after {seconds}s")]
    HashTimeout { path: PathBuf, seconds: u64 },

    #[error("Verification failed: {errors} errors exceed the budget of {budget}")]
    VerificationFailed { errors: usize, budget: usize },
}
