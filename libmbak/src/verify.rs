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

//! Post-sync verification in four tiers.
//!
//! Tier 1 re-checks every file the run actually wrote and is the only
//! tier that can fail the run. Tier 2 full-hashes a fixed list of
//! critical system files. Tier 3 random-samples the files the sync
//! pass skipped, to catch silent divergence. Tier 4 compares directory
//! counts as a cheap structure check. The expensive tiers run on a
//! small worker pool fed from a channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use crossbeam_channel as cbc;
use log::{debug, info, warn};
use rand::seq::IteratorRandom;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::config::{OperationKind, VerificationPolicy};
use crate::errors::{MbakError, Result};
use crate::identity;
use crate::progress::ProgressState;
use crate::selection::{Decision, WalkFilter};
use crate::walker::CopiedSet;

/// Tier-3 sample error rate above which a warning is surfaced.
const SAMPLE_WARN_RATE: f64 = 0.01;
/// Tier-4 directory-count slack before a warning.
const STRUCTURE_SLACK: u64 = 10;
/// Tier-3 sample ceiling.
const MAX_SAMPLES: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyErrorKind {
    SizeMismatch,
    ChecksumMismatch,
    SampleMismatch,
    Missing,
    Timeout,
}

#[derive(Clone, Debug)]
pub struct VerifyIssue {
    pub path: PathBuf,
    pub kind: VerifyErrorKind,
    pub detail: String,
}

/// Everything verification found, short of a fatal tier-1 overrun.
#[derive(Debug, Default)]
pub struct VerifyOutcome {
    pub issues: Vec<VerifyIssue>,
    pub warnings: Vec<String>,
}

pub struct Verifier<'a> {
    pub src_root: &'a Path,
    pub dst_root: &'a Path,
    pub kind: OperationKind,
    pub policy: &'a VerificationPolicy,
    pub progress: &'a ProgressState,
    pub cancel: &'a CancelToken,
}

impl Verifier<'_> {
    /// Verification pass after a backup run. Fails (fatally for the
    /// run) only when tier-1 errors exceed their budget.
    pub fn verify_backup(
        &self,
        copied: &CopiedSet,
        filter: &dyn WalkFilter,
    ) -> Result<VerifyOutcome> {
        self.progress.set_verification_active(false);
        let started = Instant::now();
        let mut outcome = VerifyOutcome::default();

        let copied_paths = copied.snapshot();
        let budget = (copied_paths.len() / 10).max(10);
        let tier1 = self.check_copied(copied_paths)?;
        if tier1.len() > budget {
            for issue in &tier1 {
                warn!("Verification error: {:?}: {}", issue.path, issue.detail);
            }
            return Err(MbakError::VerificationFailed {
                errors: tier1.len(),
                budget,
            }
            .into());
        }
        outcome.issues.extend(tier1);

        if self.budget_left(started, &mut outcome) {
            self.check_critical(&mut outcome)?;
        }
        if self.budget_left(started, &mut outcome) {
            self.check_sample(filter, &mut outcome)?;
        }
        if self.budget_left(started, &mut outcome) {
            self.check_structure(filter, &mut outcome)?;
        }

        Ok(outcome)
    }

    /// Standalone verification of an existing backup: tiers 2 to 4.
    /// There is no copied set; the sample tier draws from the whole
    /// filtered source instead of the skip count.
    pub fn verify_standalone(&self, filter: &dyn WalkFilter) -> Result<VerifyOutcome> {
        self.progress.set_verification_active(true);
        let started = Instant::now();
        let mut outcome = VerifyOutcome::default();

        self.check_critical(&mut outcome)?;

        if started.elapsed() <= self.policy.overall_budget {
            let candidates = self.sample_candidates(filter)?;
            let wanted = ((candidates.len() as f64 * self.policy.sample_rate).ceil() as usize)
                .clamp(1, MAX_SAMPLES)
                .min(candidates.len());
            self.run_sample(candidates, wanted, &mut outcome)?;
        } else {
            outcome
                .warnings
                .push("Verification time budget exhausted; sampling skipped".into());
        }

        self.check_structure(filter, &mut outcome)?;
        Ok(outcome)
    }

    // ---------------------------------------------------------------- //

    // Soft time budget: once spent, remaining tiers are skipped with a
    // single warning.
    fn budget_left(&self, started: Instant, outcome: &mut VerifyOutcome) -> bool {
        if started.elapsed() <= self.policy.overall_budget {
            return true;
        }
        if !outcome
            .warnings
            .iter()
            .any(|w| w.contains("time budget exhausted"))
        {
            warn!("Verification ran over its budget; skipping remaining tiers");
            outcome
                .warnings
                .push("Verification time budget exhausted; remaining tiers skipped".into());
        }
        false
    }

    // Tier 1: everything the run wrote, against its source.
    fn check_copied(&self, paths: Vec<PathBuf>) -> Result<Vec<VerifyIssue>> {
        info!("Verifying {} newly copied files", paths.len());
        self.progress.add_verify_total(paths.len() as u64);
        self.run_pool(paths, |path| self.check_ladder(path, VerifyErrorKind::SampleMismatch))
    }

    // Tier 2: critical files get a full hash, always. Collected but
    // never fatal; missing-in-source entries are skipped silently.
    fn check_critical(&self, outcome: &mut VerifyOutcome) -> Result<()> {
        let mut targets = Vec::new();
        for critical in &self.policy.critical_paths {
            if self.kind.is_home() && critical.is_absolute() {
                continue;
            }
            if !critical.starts_with(self.src_root) {
                continue;
            }
            match fs::symlink_metadata(critical) {
                Err(_) => continue,
                Ok(m) if m.is_dir() => {
                    for entry in WalkDir::new(critical).into_iter().flatten() {
                        if entry.file_type().is_file() {
                            targets.push(entry.into_path());
                        }
                    }
                }
                Ok(m) if m.is_file() => targets.push(critical.clone()),
                Ok(_) => {}
            }
        }

        if targets.is_empty() {
            return Ok(());
        }
        info!("Verifying {} critical files", targets.len());
        self.progress.add_verify_total(targets.len() as u64);
        let issues = self.run_pool(targets, |path| self.check_full_hash(path))?;
        outcome.issues.extend(issues);
        Ok(())
    }

    // Tier 3: spot-check a random slice of what the sync pass skipped.
    fn check_sample(&self, filter: &dyn WalkFilter, outcome: &mut VerifyOutcome) -> Result<()> {
        let skipped = self.progress.files_skipped();
        if skipped <= 100 {
            return Ok(());
        }
        let wanted = ((skipped as f64 * self.policy.sample_rate) as usize).min(MAX_SAMPLES);
        if wanted == 0 {
            return Ok(());
        }
        let candidates = self.sample_candidates(filter)?;
        self.run_sample(candidates, wanted, outcome)
    }

    fn run_sample(
        &self,
        candidates: Vec<PathBuf>,
        wanted: usize,
        outcome: &mut VerifyOutcome,
    ) -> Result<()> {
        if candidates.is_empty() || wanted == 0 {
            return Ok(());
        }
        let sample = candidates
            .into_iter()
            .choose_multiple(&mut rand::rng(), wanted);

        info!("Sampling {} unchanged files for verification", sample.len());
        let drawn = sample.len();
        self.progress.add_verify_total(drawn as u64);
        let issues =
            self.run_pool(sample, |path| self.check_ladder(path, VerifyErrorKind::SampleMismatch))?;

        if !issues.is_empty() {
            let rate = issues.len() as f64 / drawn as f64;
            if rate > SAMPLE_WARN_RATE {
                outcome.warnings.push(format!(
                    "Sampled verification found {} mismatches in {} files ({:.1}% > {:.0}% threshold)",
                    issues.len(),
                    drawn,
                    rate * 100.0,
                    SAMPLE_WARN_RATE * 100.0
                ));
            }
            outcome.issues.extend(issues);
        }
        Ok(())
    }

    // Tier 4: directory counts should roughly agree.
    fn check_structure(&self, filter: &dyn WalkFilter, outcome: &mut VerifyOutcome) -> Result<()> {
        let src_dirs = self.count_dirs(self.src_root, Some(filter))?;
        let dst_dirs = self.count_dirs(self.dst_root, None)?;
        self.progress.add_verify_total(1);
        self.progress.add_verified(1);

        let skew = src_dirs.abs_diff(dst_dirs);
        debug!("Directory counts: {} source, {} destination", src_dirs, dst_dirs);
        if skew > STRUCTURE_SLACK {
            outcome.warnings.push(format!(
                "Directory structure skew: {} directories in source, {} in backup",
                src_dirs, dst_dirs
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------- //

    fn run_pool<F>(&self, paths: Vec<PathBuf>, check: F) -> Result<Vec<VerifyIssue>>
    where
        F: Fn(&Path) -> Option<VerifyIssue> + Sync,
    {
        let (tx, rx) = cbc::unbounded::<PathBuf>();
        for p in paths {
            tx.send(p).expect("work channel closed early");
        }
        drop(tx);

        let issues = Mutex::new(Vec::new());
        thread::scope(|s| {
            for _ in 0..self.policy.num_workers() {
                let rx = rx.clone();
                let issues = &issues;
                let check = &check;
                s.spawn(move || {
                    for path in rx.iter() {
                        if self.cancel.is_canceled() {
                            return;
                        }
                        if let Some(issue) = check(&path) {
                            issues.lock().unwrap().push(issue);
                        }
                        self.progress.add_verified(1);
                    }
                });
            }
        });

        if self.cancel.is_canceled() {
            return Err(MbakError::Canceled.into());
        }
        Ok(issues.into_inner().unwrap())
    }

    // Size, then full hash for small or boot/etc files, sampling
    // otherwise.
    fn check_ladder(&self, src: &Path, sample_kind: VerifyErrorKind) -> Option<VerifyIssue> {
        let rel = src.strip_prefix(self.src_root).ok()?;
        let dst = self.dst_root.join(rel);

        let dm = match fs::metadata(&dst) {
            Ok(m) => m,
            Err(_) => {
                return Some(VerifyIssue {
                    path: src.to_path_buf(),
                    kind: VerifyErrorKind::Missing,
                    detail: "missing from backup".into(),
                })
            }
        };
        let sm = match fs::metadata(src) {
            Ok(m) => m,
            // The source moved on since the copy; nothing to compare.
            Err(_) => return None,
        };

        if sm.len() != dm.len() {
            return Some(VerifyIssue {
                path: src.to_path_buf(),
                kind: VerifyErrorKind::SizeMismatch,
                detail: format!("size {} in source, {} in backup", sm.len(), dm.len()),
            });
        }
        if sm.len() == 0 {
            return None;
        }

        let rel_str = rel.to_string_lossy();
        if sm.len() <= self.policy.full_hash_limit
            || rel_str.contains("boot")
            || rel_str.contains("etc")
        {
            return self.hash_compare(src, &dst, sm.len(), VerifyErrorKind::ChecksumMismatch);
        }

        match identity::sampled_identical(src, &dst, sm.len()) {
            Ok(true) => None,
            Ok(false) => Some(VerifyIssue {
                path: src.to_path_buf(),
                kind: sample_kind,
                detail: "content samples differ".into(),
            }),
            Err(e) => Some(VerifyIssue {
                path: src.to_path_buf(),
                kind: sample_kind,
                detail: format!("sample read failed: {}", e),
            }),
        }
    }

    fn check_full_hash(&self, src: &Path) -> Option<VerifyIssue> {
        let rel = src.strip_prefix(self.src_root).ok()?;
        let dst = self.dst_root.join(rel);
        if fs::metadata(&dst).is_err() {
            return Some(VerifyIssue {
                path: src.to_path_buf(),
                kind: VerifyErrorKind::Missing,
                detail: "missing from backup".into(),
            });
        }
        let size = fs::metadata(src).map(|m| m.len()).unwrap_or(0);
        self.hash_compare(src, &dst, size, VerifyErrorKind::ChecksumMismatch)
    }

    fn hash_compare(
        &self,
        src: &Path,
        dst: &Path,
        size: u64,
        kind: VerifyErrorKind,
    ) -> Option<VerifyIssue> {
        let timeout = identity::hash_timeout_for(
            size,
            self.policy.hash_timeout,
            self.policy.hash_timeout_large,
        );
        match identity::hash_identical(src, dst, timeout) {
            Ok(true) => None,
            Ok(false) => Some(VerifyIssue {
                path: src.to_path_buf(),
                kind,
                detail: "checksums differ".into(),
            }),
            Err(e) => {
                let is_timeout = matches!(
                    e.downcast_ref::<MbakError>(),
                    Some(MbakError::HashTimeout { .. })
                );
                Some(VerifyIssue {
                    path: src.to_path_buf(),
                    kind: if is_timeout {
                        VerifyErrorKind::Timeout
                    } else {
                        kind
                    },
                    detail: format!("{}", e),
                })
            }
        }
    }

    // Filtered walk of the source collecting regular files whose
    // backup counterpart exists.
    fn sample_candidates(&self, filter: &dyn WalkFilter) -> Result<Vec<PathBuf>> {
        let mut candidates = Vec::new();
        let mut it = WalkDir::new(self.src_root).follow_links(false).into_iter();
        let mut seen: usize = 0;

        while let Some(next) = it.next() {
            let entry = match next {
                Ok(e) => e,
                Err(_) => continue,
            };
            seen += 1;
            if seen % crate::walker::CANCEL_POLL_INTERVAL == 0 && self.cancel.is_canceled() {
                return Err(MbakError::Canceled.into());
            }
            if entry.depth() == 0 {
                continue;
            }
            let is_dir = entry.file_type().is_dir();
            match filter.decide(entry.path(), is_dir) {
                Decision::Include => {}
                Decision::SkipEntry => continue,
                Decision::SkipSubtree => {
                    if is_dir {
                        it.skip_current_dir();
                    }
                    continue;
                }
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(self.src_root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if self.dst_root.join(rel).exists() {
                candidates.push(entry.into_path());
            }
        }
        Ok(candidates)
    }

    fn count_dirs(&self, root: &Path, filter: Option<&dyn WalkFilter>) -> Result<u64> {
        let mut count: u64 = 0;
        let mut seen: usize = 0;
        let mut it = WalkDir::new(root).follow_links(false).into_iter();
        while let Some(next) = it.next() {
            let entry = match next {
                Ok(e) => e,
                Err(_) => continue,
            };
            seen += 1;
            if seen % crate::walker::CANCEL_POLL_INTERVAL == 0 && self.cancel.is_canceled() {
                return Err(MbakError::Canceled.into());
            }
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                continue;
            }
            if let Some(f) = filter {
                match f.decide(entry.path(), true) {
                    Decision::Include => {}
                    Decision::SkipEntry => continue,
                    Decision::SkipSubtree => {
                        it.skip_current_dir();
                        continue;
                    }
                }
            }
            count += 1;
        }
        Ok(count)
    }
}
