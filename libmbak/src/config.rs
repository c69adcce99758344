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

//! Run configuration.

use std::path::PathBuf;
use std::result;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::MbakError;
use crate::selection::SelectionMap;

/// What a run does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// Mirror `/` onto the backup volume.
    SystemBackup,
    /// Mirror one user's home directory.
    HomeBackup,
    /// Home mirror restricted by a folder selection map.
    SelectiveHomeBackup,
    /// Copy a backup volume back onto the host.
    Restore,
    /// Check an existing backup against its source without writing.
    Verify,
}

impl OperationKind {
    pub fn is_backup(&self) -> bool {
        matches!(
            self,
            OperationKind::SystemBackup
                | OperationKind::HomeBackup
                | OperationKind::SelectiveHomeBackup
        )
    }

    pub fn is_home(&self) -> bool {
        matches!(
            self,
            OperationKind::HomeBackup | OperationKind::SelectiveHomeBackup
        )
    }
}

// String conversion helper as a convenience for command-line parsing.
impl FromStr for OperationKind {
    type Err = MbakError;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(OperationKind::SystemBackup),
            "home" => Ok(OperationKind::HomeBackup),
            "selective" => Ok(OperationKind::SelectiveHomeBackup),
            "restore" => Ok(OperationKind::Restore),
            "verify" => Ok(OperationKind::Verify),
            _ => Err(MbakError::InvalidArguments(format!(
                "Unexpected operation kind: {}",
                s
            ))),
        }
    }
}

/// Knobs for the incremental-skip decision.
///
/// Changing either field changes the incremental-correctness
/// guarantee: raising `large_file_threshold` widens the range where a
/// same-size rewrite goes undetected, and clearing `trust_mtime`
/// reduces the whole decision to size equality.
#[derive(Clone, Debug)]
pub struct IdentityPolicy {
    /// Files larger than this are judged identical on size alone.
    pub large_file_threshold: u64,
    /// Below the threshold, treat a source mtime newer than the
    /// destination's as a content change.
    pub trust_mtime: bool,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        IdentityPolicy {
            large_file_threshold: 500 * 1024 * 1024,
            trust_mtime: true,
        }
    }
}

/// Verification configuration.
#[derive(Clone, Debug)]
pub struct VerificationPolicy {
    /// Fraction of skipped files to re-check in the random tier.
    pub sample_rate: f64,
    /// Soft budget for the whole verification pass; remaining tiers
    /// are skipped with a warning once it is spent.
    pub overall_budget: Duration,
    /// Worker pool size. 0 means use the number of logical CPUs.
    pub workers: usize,
    /// Files always verified by full hash when present.
    pub critical_paths: Vec<PathBuf>,
    /// Files at or below this size get a full hash instead of samples.
    pub full_hash_limit: u64,
    /// Per-file hash deadline.
    pub hash_timeout: Duration,
    /// Per-file hash deadline for files over 1 GiB.
    pub hash_timeout_large: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        VerificationPolicy {
            sample_rate: 0.01,
            overall_budget: Duration::from_secs(5 * 60),
            workers: 4,
            critical_paths: default_critical_paths(),
            full_hash_limit: 1024 * 1024,
            hash_timeout: Duration::from_secs(30),
            hash_timeout_large: Duration::from_secs(120),
        }
    }
}

impl VerificationPolicy {
    pub(crate) fn num_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

fn default_critical_paths() -> Vec<PathBuf> {
    [
        "/etc/fstab",
        "/etc/passwd",
        "/etc/shadow",
        "/etc/group",
        "/etc/default/grub",
        "/boot/grub/grub.cfg",
        "/boot/loader/loader.conf",
        "/etc/systemd/system",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Everything one run needs. Owned by the [`BackupRun`](crate::run::BackupRun);
/// the shared pieces (progress, cancellation, copied set) live next to
/// it with interior synchronization.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub kind: OperationKind,
    /// Tree being mirrored (backup) or compared against (verify). For
    /// a restore this is the backup volume.
    pub source: PathBuf,
    /// Backup volume root (backup/verify) or restore target.
    pub dest: PathBuf,
    /// Extra exclusion patterns on top of the canonical set.
    pub exclusions: Vec<String>,
    /// Folder map for selective home backups.
    pub selection: Option<SelectionMap>,
    pub identity: IdentityPolicy,
    pub verification: VerificationPolicy,
    /// Run the verifier after a backup completes.
    pub verify_after: bool,
}

impl RunConfig {
    pub fn new(kind: OperationKind, source: PathBuf, dest: PathBuf) -> RunConfig {
        RunConfig {
            kind,
            source,
            dest,
            exclusions: Vec::new(),
            selection: None,
            identity: IdentityPolicy::default(),
            verification: VerificationPolicy::default(),
            verify_after: true,
        }
    }
}
