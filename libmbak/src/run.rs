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

//! One run, start to finish.
//!
//! A [`BackupRun`] owns its configuration and shares three things with
//! the outside: the progress state (polled by the UI), the
//! cancellation token (set by the UI) and the copied set (consumed by
//! the verifier). One run at a time; counters and token are reset on
//! entry so a token left set by a previous run cannot leak in.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{OperationKind, RunConfig};
use crate::errors::{MbakError, Result};
use crate::fsutil;
use crate::manifest::{self, BackupType};
use crate::pattern;
use crate::progress::ProgressState;
use crate::reconcile;
use crate::selection::{self, PatternFilter, ResolvedSelection, SelectiveFilter, WalkFilter};
use crate::verify::Verifier;
use crate::walker::{CopiedSet, Walker};

/// How a run ended, as handed back to the caller. The CLI maps these
/// onto exit codes; a UI maps them onto screens.
#[derive(Debug)]
pub enum RunResult {
    Completed { warnings: Vec<String> },
    Canceled,
    Fatal(anyhow::Error),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Completed { .. })
    }
}

pub struct BackupRun {
    config: RunConfig,
    progress: Arc<ProgressState>,
    cancel: CancelToken,
    copied: CopiedSet,
}

impl BackupRun {
    pub fn new(config: RunConfig) -> BackupRun {
        BackupRun {
            config,
            progress: Arc::new(ProgressState::new()),
            cancel: CancelToken::new(),
            copied: CopiedSet::new(),
        }
    }

    /// Shared progress handle for the UI tick.
    pub fn progress(&self) -> Arc<ProgressState> {
        self.progress.clone()
    }

    /// Token the UI sets to request cancellation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run to completion on the calling thread.
    pub fn execute(&self) -> RunResult {
        self.reset_run_state();

        let outcome = match self.config.kind {
            OperationKind::SystemBackup
            | OperationKind::HomeBackup
            | OperationKind::SelectiveHomeBackup => self.run_backup(),
            OperationKind::Restore => self.run_restore(),
            OperationKind::Verify => self.run_verify(),
        };

        match outcome {
            Ok(warnings) => {
                self.progress.set_done();
                RunResult::Completed { warnings }
            }
            Err(e) => {
                if matches!(e.downcast_ref::<MbakError>(), Some(MbakError::Canceled)) {
                    RunResult::Canceled
                } else {
                    RunResult::Fatal(e)
                }
            }
        }
    }

    fn reset_run_state(&self) {
        self.cancel.reset();
        self.progress.reset();
        self.copied.clear();
    }

    fn run_backup(&self) -> Result<Vec<String>> {
        let src = &self.config.source;
        let dst = &self.config.dest;

        if !src.is_dir() {
            return Err(MbakError::InvalidSource("Source does not exist or is not a directory").into());
        }
        fs::create_dir_all(dst)
            .map_err(|_| MbakError::InvalidDestination("Cannot create destination root"))?;

        match fsutil::capacity(dst) {
            Ok(cap) => info!(
                "Destination: {} free of {}",
                fsutil::nice_size(cap.free),
                fsutil::nice_size(cap.total)
            ),
            Err(e) => warn!("Cannot stat destination filesystem: {}", e),
        }

        let (patterns, resolved) = self.backup_patterns()?;
        let filter: Box<dyn WalkFilter> = match &resolved {
            Some(res) => Box::new(SelectiveFilter::new(src, &patterns, res)),
            None => Box::new(PatternFilter::new(src, &patterns)),
        };

        let walker = Walker {
            src_root: src,
            dst_root: dst,
            filter: filter.as_ref(),
            identity: &self.config.identity,
            progress: &self.progress,
            cancel: &self.cancel,
            copied: &self.copied,
        };

        walker.scan()?;
        info!("Scan complete: {} files", self.progress.files_found());

        let btype = match self.config.kind {
            OperationKind::SystemBackup => BackupType::System,
            _ => BackupType::Home,
        };
        manifest::write_info(dst, btype)?;
        if let Some(res) = &resolved {
            let list = manifest::build_folder_list(src, res);
            manifest::write_folders(dst, &list)?;
        }

        walker.sync()?;
        info!(
            "Sync complete: {} copied, {} skipped",
            self.progress.files_copied(),
            self.progress.files_skipped()
        );

        reconcile::delete_extras(src, dst, resolved.as_ref(), &self.progress, &self.cancel)?;

        let mut warnings = Vec::new();
        if self.config.verify_after {
            let verifier = Verifier {
                src_root: src,
                dst_root: dst,
                kind: self.config.kind,
                policy: &self.config.verification,
                progress: &self.progress,
                cancel: &self.cancel,
            };
            let outcome = verifier.verify_backup(&self.copied, filter.as_ref())?;
            for issue in &outcome.issues {
                warn!("Verification: {:?}: {}", issue.path, issue.detail);
                warnings.push(format!("{}: {}", issue.path.display(), issue.detail));
            }
            warnings.extend(outcome.warnings);
        }

        fsutil::commit_to_disk();
        Ok(warnings)
    }

    fn run_restore(&self) -> Result<Vec<String>> {
        let backup = &self.config.source;
        let target = &self.config.dest;

        if !backup.is_dir() {
            return Err(MbakError::InvalidSource("Backup volume is not mounted").into());
        }
        let btype = manifest::detect_backup_type(backup)
            .ok_or_else(|| MbakError::ManifestMissing(backup.clone()))?;
        info!(
            "Restoring a {} backup onto {:?}",
            match btype {
                BackupType::System => "complete system",
                BackupType::Home => "home directory",
            },
            target
        );
        fs::create_dir_all(target)
            .map_err(|_| MbakError::InvalidDestination("Cannot create restore target"))?;

        // The manifests describe the backup volume; they do not belong
        // on the restored system.
        let patterns: Vec<String> = [manifest::INFO_FILE, manifest::FOLDERS_FILE]
            .iter()
            .map(|name| backup.join(name).to_string_lossy().into_owned())
            .collect();
        let filter = PatternFilter::new(backup, &patterns);

        let walker = Walker {
            src_root: backup,
            dst_root: target,
            filter: &filter,
            identity: &self.config.identity,
            progress: &self.progress,
            cancel: &self.cancel,
            copied: &self.copied,
        };
        walker.scan()?;
        walker.sync()?;

        fsutil::commit_to_disk();
        Ok(Vec::new())
    }

    fn run_verify(&self) -> Result<Vec<String>> {
        let src = &self.config.source;
        let backup = &self.config.dest;

        if !backup.is_dir() {
            return Err(MbakError::InvalidDestination("Backup volume is not mounted").into());
        }

        let btype = manifest::detect_backup_type(backup);
        let kind = match btype {
            Some(BackupType::System) => OperationKind::SystemBackup,
            _ => OperationKind::HomeBackup,
        };

        let mut patterns = self.catalog_for(kind);
        patterns.extend(self.config.exclusions.iter().cloned());

        // A selective backup records its folder choices; respect them
        // so intentional omissions are not flagged as missing.
        let folders = manifest::read_folders(backup)?;
        let filter: Box<dyn WalkFilter> = match folders {
            Some(list) => {
                let root_depth = src.components().count();
                let mut resolved = ResolvedSelection {
                    deselected: list.excluded,
                    ..ResolvedSelection::default()
                };
                for inc in list.included {
                    if inc.components().count() > root_depth + 1 {
                        resolved.selected_subfolders.push(inc);
                    } else {
                        resolved.selected_roots.push(inc);
                    }
                }
                Box::new(SelectiveFilter::new(src, &patterns, &resolved))
            }
            None => Box::new(PatternFilter::new(src, &patterns)),
        };

        let verifier = Verifier {
            src_root: src,
            dst_root: backup,
            kind,
            policy: &self.config.verification,
            progress: &self.progress,
            cancel: &self.cancel,
        };
        let outcome = verifier.verify_standalone(filter.as_ref())?;

        let mut warnings = Vec::new();
        for issue in &outcome.issues {
            warn!("Verification: {:?}: {}", issue.path, issue.detail);
            warnings.push(format!("{}: {}", issue.path.display(), issue.detail));
        }
        warnings.extend(outcome.warnings);
        Ok(warnings)
    }

    // Canonical pattern catalog + user additions (+ deselected folders
    // for a selective run).
    fn backup_patterns(&self) -> Result<(Vec<String>, Option<ResolvedSelection>)> {
        let mut patterns = self.catalog_for(self.config.kind);
        patterns.extend(self.config.exclusions.iter().cloned());

        let resolved = if self.config.kind == OperationKind::SelectiveHomeBackup {
            let map = self.config.selection.as_ref().ok_or_else(|| {
                MbakError::InvalidArguments("Selective backup requires a folder selection".into())
            })?;
            let resolved = selection::resolve(map, &self.config.source);
            for folder in &resolved.deselected {
                patterns.push(folder.to_string_lossy().into_owned());
            }
            Some(resolved)
        } else {
            None
        };

        Ok((patterns, resolved))
    }

    fn catalog_for(&self, kind: OperationKind) -> Vec<String> {
        let set = match kind {
            OperationKind::SystemBackup | OperationKind::Restore => pattern::SYSTEM_EXCLUSIONS,
            _ => pattern::HOME_EXCLUSIONS,
        };
        set.iter().map(|s| s.to_string()).collect()
    }
}

/// The home directory of the real user. Under sudo that is the
/// invoking user's home, not root's.
pub fn real_user_home() -> Result<PathBuf> {
    if let Ok(user) = env::var("SUDO_USER") {
        if !user.is_empty() {
            return Ok(PathBuf::from("/home").join(user));
        }
    }
    env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| MbakError::InvalidSource("Cannot determine the home directory").into())
}
