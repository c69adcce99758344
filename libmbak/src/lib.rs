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

//! `libmbak` is the synchronization core of the [mbak] backup tool: an
//! incremental mirror engine for a single Linux host writing to a
//! mounted external volume. It walks a source tree, copies what
//! changed, deletes what disappeared, and verifies the result, with
//! selective folder inclusion, shared progress counters and
//! cooperative cancellation.
//!
//! # Usage example
//!
//!     use tempfile::TempDir;
//!
//!     use libmbak::config::{OperationKind, RunConfig};
//!     use libmbak::run::BackupRun;
//!
//!     let source = TempDir::new().unwrap();
//!     std::fs::write(source.path().join("notes.txt"), "important").unwrap();
//!     let dest = TempDir::new().unwrap();
//!
//!     let config = RunConfig::new(
//!         OperationKind::HomeBackup,
//!         source.path().to_path_buf(),
//!         dest.path().to_path_buf(),
//!     );
//!     let run = BackupRun::new(config);
//!
//!     // A UI would poll `run.progress()` from another thread and
//!     // could set `run.cancel_token()` at any time.
//!     let result = run.execute();
//!     assert!(result.is_success());
//!     assert!(dest.path().join("notes.txt").exists());
//!
//! [mbak]: https://crates.io/crates/mbak

pub mod cancel;
pub mod config;
pub mod errors;
pub mod manifest;
pub mod pattern;
pub mod progress;
pub mod run;
pub mod selection;
pub mod verify;

// Internal
mod copier;
mod fsutil;
mod identity;
mod reconcile;
mod walker;

pub use walker::CopiedSet;
