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

//! Source-tree traversal: the counting scan and the mirror sync.
//!
//! Two passes over the same filter. The scan feeds `files_found` so
//! the sync pass has a denominator; the sync pass reproduces
//! directories and symlinks, asks the identity oracle about regular
//! files and copies the ones that changed. Per-entry failures are
//! logged and skipped; only cancellation and a full destination stop
//! the walk.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::config::IdentityPolicy;
use crate::copier;
use crate::errors::{MbakError, Result};
use crate::fsutil;
use crate::identity;
use crate::progress::ProgressState;
use crate::selection::{Decision, WalkFilter};

/// Cancellation poll cadence, in processed entries.
pub const CANCEL_POLL_INTERVAL: usize = 5_000;
/// Advisory current-directory update cadence.
const ADVISORY_INTERVAL: usize = 500;
/// Counter updates are batched to keep contention off the hot path.
const COUNTER_BATCH: u64 = 1_000;

/// Ordered record of the source paths actually written this run,
/// consumed by the verifier's first tier.
#[derive(Debug, Default)]
pub struct CopiedSet(Mutex<Vec<PathBuf>>);

impl CopiedSet {
    pub fn new() -> CopiedSet {
        CopiedSet::default()
    }

    pub fn push(&self, path: PathBuf) {
        self.0.lock().unwrap().push(path);
    }

    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub struct Walker<'a> {
    pub src_root: &'a Path,
    pub dst_root: &'a Path,
    pub filter: &'a dyn WalkFilter,
    pub identity: &'a IdentityPolicy,
    pub progress: &'a ProgressState,
    pub cancel: &'a CancelToken,
    pub copied: &'a CopiedSet,
}

impl Walker<'_> {
    /// Counting pass: how many regular files will the sync visit?
    /// Feeds `files_found` and marks the walk complete.
    pub fn scan(&self) -> Result<()> {
        let root_dev = fs::metadata(self.src_root)?.dev();
        let mut pending: u64 = 0;

        self.traverse(root_dev, &mut |entry, _ctx| {
            if entry.file_type().is_file() {
                pending += 1;
                if pending >= COUNTER_BATCH {
                    self.progress.add_found(pending);
                    pending = 0;
                }
            }
            Ok(())
        })?;

        self.progress.add_found(pending);
        self.progress.set_walk_complete();
        Ok(())
    }

    /// Mirror pass. Directories and symlinks are reproduced inline;
    /// regular files go through the identity oracle and the copier.
    pub fn sync(&self) -> Result<()> {
        let root_dev = fs::metadata(self.src_root)?.dev();
        let mut copied_pending: u64 = 0;
        let mut skipped_pending: u64 = 0;

        let result = self.traverse(root_dev, &mut |entry, ctx| {
            let target = ctx.dst;
            let ft = entry.file_type();

            if ft.is_dir() {
                self.mirror_directory(entry.path(), target);
            } else if ft.is_symlink() {
                self.mirror_symlink(entry.path(), target);
            } else if ft.is_file() {
                if identity::identical(entry.path(), target, self.identity) {
                    skipped_pending += 1;
                } else {
                    match copier::copy_file(entry.path(), target) {
                        Ok(_) => {
                            copied_pending += 1;
                            self.copied.push(entry.path().to_path_buf());
                        }
                        Err(e) => {
                            if e.downcast_ref::<MbakError>().is_some() {
                                // OutOfSpace; nothing else is typed here.
                                return Err(e);
                            }
                            error!("Failed to copy {:?}: {}", entry.path(), e);
                        }
                    }
                }
                if copied_pending + skipped_pending >= COUNTER_BATCH {
                    self.progress.add_copied(copied_pending);
                    self.progress.add_skipped(skipped_pending);
                    copied_pending = 0;
                    skipped_pending = 0;
                }
            }
            // Sockets, devices and FIFOs are not mirrored.
            Ok(())
        });

        self.progress.add_copied(copied_pending);
        self.progress.add_skipped(skipped_pending);
        result?;

        self.progress.set_sync_complete();
        Ok(())
    }

    fn traverse(
        &self,
        root_dev: u64,
        visit: &mut dyn FnMut(&walkdir::DirEntry, &EntryContext) -> Result<()>,
    ) -> Result<()> {
        let mut it = WalkDir::new(self.src_root).follow_links(false).into_iter();
        let mut seen: usize = 0;

        while let Some(next) = it.next() {
            let entry = match next {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            seen += 1;
            if seen % CANCEL_POLL_INTERVAL == 0 && self.cancel.is_canceled() {
                return Err(MbakError::Canceled.into());
            }
            if seen % ADVISORY_INTERVAL == 0 {
                let dir = if entry.file_type().is_dir() {
                    entry.path()
                } else {
                    entry.path().parent().unwrap_or(self.src_root)
                };
                self.progress.set_current_directory(&dir.to_string_lossy());
            }

            if entry.depth() == 0 {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            match self.filter.decide(entry.path(), is_dir) {
                Decision::Include => {}
                Decision::SkipEntry => continue,
                Decision::SkipSubtree => {
                    if is_dir {
                        it.skip_current_dir();
                    }
                    continue;
                }
            }

            // Filesystem boundary: stay on the root's device, with a
            // carve-out for /home subvolume layouts.
            if is_dir {
                match entry.metadata() {
                    Ok(m) if m.dev() != root_dev && !under_home(entry.path()) => {
                        debug!("Skipping {:?}: different filesystem", entry.path());
                        it.skip_current_dir();
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Cannot stat {:?}, skipping subtree: {}", entry.path(), e);
                        it.skip_current_dir();
                        continue;
                    }
                }
            }

            let rel = match entry.path().strip_prefix(self.src_root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let dst = self.dst_root.join(rel);
            visit(&entry, &EntryContext { dst: &dst })?;
        }

        Ok(())
    }

    fn mirror_directory(&self, src: &Path, dst: &Path) {
        if let Err(e) = fs::create_dir_all(dst) {
            // Keep walking; children will fail individually but the
            // run survives a single unmakeable directory.
            error!("Failed to create directory {:?}: {}", dst, e);
            return;
        }
        match fs::metadata(src) {
            Ok(m) => {
                if let Err(e) = fsutil::apply_metadata(&m, dst) {
                    warn!("Failed to mirror metadata onto {:?}: {}", dst, e);
                }
            }
            Err(e) => warn!("Cannot stat {:?}: {}", src, e),
        }
    }

    fn mirror_symlink(&self, src: &Path, dst: &Path) {
        let target = match fs::read_link(src) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot read symlink {:?}: {}", src, e);
                return;
            }
        };

        // Recreate verbatim; never follow. An existing identical link
        // is left alone.
        if let Ok(existing) = fs::read_link(dst) {
            if existing == target {
                return;
            }
        }
        if fs::symlink_metadata(dst).is_ok() {
            if let Err(e) = fs::remove_file(dst) {
                warn!("Cannot replace {:?}: {}", dst, e);
                return;
            }
        }
        if let Err(e) = std::os::unix::fs::symlink(&target, dst) {
            warn!("Failed to create symlink {:?} -> {:?}: {}", dst, target, e);
            return;
        }
        if let Ok(m) = fs::symlink_metadata(src) {
            if let Err(e) = fsutil::apply_symlink_ownership(&m, dst) {
                debug!("Cannot mirror symlink ownership on {:?}: {}", dst, e);
            }
        }
    }
}

struct EntryContext<'a> {
    dst: &'a Path,
}

fn under_home(path: &Path) -> bool {
    path.starts_with("/home")
}
