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

//! Shared progress counters and the phase → (fraction, message) model.
//!
//! The UI polls [`ProgressState::report`] on a tick; the walkers feed
//! the counters with relaxed atomics, batched on the hot path. Reads
//! are weakly consistent, which is fine: every counter is monotone
//! within its phase, so the bar never runs backwards inside one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Run phases as the progress model sees them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Scan,
    Sync,
    Delete,
    Verify,
    Done,
}

/// Counters and phase flags for one run. Reset at run start, frozen at
/// run end.
#[derive(Debug, Default)]
pub struct ProgressState {
    files_found: AtomicU64,
    files_copied: AtomicU64,
    files_skipped: AtomicU64,
    files_deleted: AtomicU64,
    files_verified: AtomicU64,
    /// Number of checks the verifier expects to make; denominator for
    /// the verify fraction.
    verify_total: AtomicU64,

    directory_walk_complete: AtomicBool,
    sync_complete: AtomicBool,
    deletion_active: AtomicBool,
    verification_active: AtomicBool,
    standalone_verification: AtomicBool,
    done: AtomicBool,

    /// Advisory only; the walker updates it every few hundred entries.
    current_directory: Mutex<String>,
    verify_started: Mutex<Option<Instant>>,
}

impl ProgressState {
    pub fn new() -> ProgressState {
        ProgressState::default()
    }

    pub(crate) fn reset(&self) {
        self.files_found.store(0, Ordering::Relaxed);
        self.files_copied.store(0, Ordering::Relaxed);
        self.files_skipped.store(0, Ordering::Relaxed);
        self.files_deleted.store(0, Ordering::Relaxed);
        self.files_verified.store(0, Ordering::Relaxed);
        self.verify_total.store(0, Ordering::Relaxed);
        self.directory_walk_complete.store(false, Ordering::Relaxed);
        self.sync_complete.store(false, Ordering::Relaxed);
        self.deletion_active.store(false, Ordering::Relaxed);
        self.verification_active.store(false, Ordering::Relaxed);
        self.standalone_verification.store(false, Ordering::Relaxed);
        self.done.store(false, Ordering::Relaxed);
        self.current_directory.lock().unwrap().clear();
        *self.verify_started.lock().unwrap() = None;
    }

    pub fn add_found(&self, n: u64) {
        self.files_found.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_copied(&self, n: u64) {
        self.files_copied.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_skipped(&self, n: u64) {
        self.files_skipped.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_deleted(&self, n: u64) {
        self.files_deleted.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_verified(&self, n: u64) {
        self.files_verified.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_verify_total(&self, n: u64) {
        self.verify_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn files_found(&self) -> u64 {
        self.files_found.load(Ordering::Relaxed)
    }
    pub fn files_copied(&self) -> u64 {
        self.files_copied.load(Ordering::Relaxed)
    }
    pub fn files_skipped(&self) -> u64 {
        self.files_skipped.load(Ordering::Relaxed)
    }
    pub fn files_deleted(&self) -> u64 {
        self.files_deleted.load(Ordering::Relaxed)
    }
    pub fn files_verified(&self) -> u64 {
        self.files_verified.load(Ordering::Relaxed)
    }

    pub fn set_walk_complete(&self) {
        self.directory_walk_complete.store(true, Ordering::Relaxed);
    }
    pub fn set_sync_complete(&self) {
        self.sync_complete.store(true, Ordering::Relaxed);
    }
    pub fn set_deletion_active(&self) {
        self.deletion_active.store(true, Ordering::Relaxed);
    }
    pub fn set_verification_active(&self, standalone: bool) {
        self.verification_active.store(true, Ordering::Relaxed);
        self.standalone_verification
            .store(standalone, Ordering::Relaxed);
        *self.verify_started.lock().unwrap() = Some(Instant::now());
    }
    pub fn set_done(&self) {
        self.done.store(true, Ordering::Relaxed);
    }
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    pub fn set_current_directory(&self, dir: &str) {
        *self.current_directory.lock().unwrap() = dir.to_string();
    }

    pub fn phase(&self) -> Phase {
        if self.done.load(Ordering::Relaxed) {
            Phase::Done
        } else if self.verification_active.load(Ordering::Relaxed) {
            Phase::Verify
        } else if self.deletion_active.load(Ordering::Relaxed) {
            Phase::Delete
        } else if self.directory_walk_complete.load(Ordering::Relaxed) {
            Phase::Sync
        } else if self.files_found.load(Ordering::Relaxed) > 0 {
            Phase::Scan
        } else {
            Phase::Init
        }
    }

    /// Map the counters and phase into a bar fraction and message.
    pub fn report(&self) -> Report {
        let found = self.files_found();
        let copied = self.files_copied();
        let skipped = self.files_skipped();
        let deleted = self.files_deleted();
        let verified = self.files_verified();

        let (fraction, headline) = match self.phase() {
            Phase::Init => (0.0, "Preparing".to_string()),
            Phase::Scan => {
                let f = 0.001 + (found as f64 / 500_000.0).min(1.0) * 0.009;
                (
                    f.min(0.01),
                    format!("Scanning source • {} files found", group_digits(found)),
                )
            }
            Phase::Sync => {
                let ratio = if found == 0 {
                    0.0
                } else {
                    (copied + skipped) as f64 / found as f64
                };
                (
                    0.01 + ratio.min(1.0) * 0.94,
                    format!(
                        "Syncing files • {} copied, {} skipped • {} total",
                        group_digits(copied),
                        group_digits(skipped),
                        group_digits(found)
                    ),
                )
            }
            Phase::Delete => {
                let denom = (found / 10).max(1);
                (
                    0.95 + (deleted as f64 / denom as f64).min(1.0) * 0.04,
                    format!("Removing stale files • {} deleted", group_digits(deleted)),
                )
            }
            Phase::Verify => {
                let total = self.verify_total.load(Ordering::Relaxed);
                let file_ratio = if total == 0 {
                    0.0
                } else {
                    (verified as f64 / total as f64).min(1.0)
                };
                let f = if self.standalone_verification.load(Ordering::Relaxed) {
                    let elapsed = self
                        .verify_started
                        .lock()
                        .unwrap()
                        .map(|t| t.elapsed().as_secs_f64())
                        .unwrap_or(0.0);
                    let time_ratio = (elapsed / 10.0).min(1.0);
                    (0.7 * time_ratio + 0.3 * file_ratio).min(0.99)
                } else {
                    0.95 + file_ratio * 0.05
                };
                (
                    f,
                    format!(
                        "Verifying • {} of {} checks done",
                        group_digits(verified),
                        group_digits(total)
                    ),
                )
            }
            Phase::Done => (
                1.0,
                format!(
                    "Done • {} copied, {} skipped, {} deleted, {} verified",
                    group_digits(copied),
                    group_digits(skipped),
                    group_digits(deleted),
                    group_digits(verified)
                ),
            ),
        };

        let dir = self.current_directory.lock().unwrap().clone();
        Report {
            fraction: fraction.min(1.0),
            headline,
            detail: if dir.is_empty() { None } else { Some(dir) },
        }
    }
}

/// One progress tick as shown to the user.
#[derive(Clone, Debug)]
pub struct Report {
    /// In [0, 1].
    pub fraction: f64,
    pub headline: String,
    /// Advisory current directory, if the walk has published one.
    pub detail: Option<String>,
}

fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
