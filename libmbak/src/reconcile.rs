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

//! Deletion reconciliation: make the backup forget what the source
//! forgot.
//!
//! Walks the destination tree and removes entries whose source
//! counterpart is gone, or which fall outside a selective run's folder
//! choices. Exclusion patterns are deliberately not consulted here: if
//! the exclusion list ever tightens, files copied under the old list
//! must still age out of the backup.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::errors::{MbakError, Result};
use crate::manifest;
use crate::progress::ProgressState;
use crate::selection::ResolvedSelection;

/// Deletion polls cancellation much more often than the sync walk;
/// destructive work should stop promptly.
pub const CANCEL_POLL_INTERVAL: usize = 50;

pub fn delete_extras(
    src_root: &Path,
    dst_root: &Path,
    selection: Option<&ResolvedSelection>,
    progress: &ProgressState,
    cancel: &CancelToken,
) -> Result<()> {
    progress.set_deletion_active();

    let mut it = WalkDir::new(dst_root).follow_links(false).into_iter();
    let mut seen: usize = 0;

    while let Some(next) = it.next() {
        let entry = match next {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable destination entry: {}", e);
                continue;
            }
        };

        seen += 1;
        if seen % CANCEL_POLL_INTERVAL == 0 && cancel.is_canceled() {
            return Err(MbakError::Canceled.into());
        }

        if entry.depth() == 0 {
            continue;
        }

        let rel = match entry.path().strip_prefix(dst_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };

        // The manifests describe the backup; they have no source
        // counterpart and must survive every reconciliation.
        if entry.depth() == 1 {
            if let Some(name) = rel.to_str() {
                if name == manifest::INFO_FILE || name == manifest::FOLDERS_FILE {
                    continue;
                }
            }
        }

        let src = src_root.join(rel);
        let missing = fs::symlink_metadata(&src).is_err();
        let outside = selection.map_or(false, |sel| !sel.keeps(&src, src_root));

        if !(missing || outside) {
            continue;
        }

        let is_dir = entry.file_type().is_dir();
        debug!("Removing {:?} (source {})", entry.path(),
               if missing { "gone" } else { "deselected" });
        let removed = if is_dir {
            fs::remove_dir_all(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        match removed {
            Ok(()) => progress.add_deleted(1),
            Err(e) => warn!("Failed to remove {:?}: {}", entry.path(), e),
        }
        if is_dir {
            it.skip_current_dir();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};
    use tempfile::tempdir;

    fn counters() -> (ProgressState, CancelToken) {
        (ProgressState::new(), CancelToken::new())
    }

    #[test]
    fn removes_entries_missing_from_source() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        create_dir_all(src.join("keep"))?;
        write(src.join("keep/a.txt"), "a")?;
        create_dir_all(dst.join("keep"))?;
        write(dst.join("keep/a.txt"), "a")?;
        write(dst.join("keep/stale.txt"), "x")?;
        create_dir_all(dst.join("gone/deeper"))?;
        write(dst.join("gone/deeper/b.txt"), "b")?;

        let (progress, cancel) = counters();
        delete_extras(&src, &dst, None, &progress, &cancel)?;

        assert!(dst.join("keep/a.txt").exists());
        assert!(!dst.join("keep/stale.txt").exists());
        assert!(!dst.join("gone").exists());
        assert_eq!(progress.files_deleted(), 2);
        Ok(())
    }

    #[test]
    fn manifests_are_never_deleted() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        create_dir_all(&src)?;
        create_dir_all(&dst)?;
        write(dst.join(manifest::INFO_FILE), "info")?;
        write(dst.join(manifest::FOLDERS_FILE), "folders")?;
        write(dst.join("stale.txt"), "x")?;

        let (progress, cancel) = counters();
        delete_extras(&src, &dst, None, &progress, &cancel)?;

        assert!(dst.join(manifest::INFO_FILE).exists());
        assert!(dst.join(manifest::FOLDERS_FILE).exists());
        assert!(!dst.join("stale.txt").exists());
        Ok(())
    }

    #[test]
    fn exclusions_do_not_shield_stale_files() -> Result<()> {
        // A file matching an exclusion pattern but present only in the
        // destination still goes away; deletion never consults the
        // pattern set.
        let dir = tempdir()?;
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        create_dir_all(&src)?;
        create_dir_all(dst.join(".cache"))?;
        write(dst.join(".cache/old"), "x")?;

        let (progress, cancel) = counters();
        delete_extras(&src, &dst, None, &progress, &cancel)?;

        assert!(!dst.join(".cache").exists());
        Ok(())
    }

    #[test]
    fn selection_scopes_deletion() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("home");
        let dst = dir.path().join("backup");
        for d in ["Videos/Family", "Videos/Work", "Documents"] {
            create_dir_all(src.join(d))?;
            create_dir_all(dst.join(d))?;
        }
        write(dst.join("Videos/Family/f.mp4"), "f")?;
        write(src.join("Videos/Family/f.mp4"), "f")?;
        write(dst.join("Videos/Work/w.mp4"), "w")?;
        write(src.join("Videos/Work/w.mp4"), "w")?;

        let mut map = crate::selection::SelectionMap::new();
        map.insert(src.join("Videos"), false);
        map.insert(src.join("Videos/Family"), true);
        map.insert(src.join("Documents"), true);
        let resolved = crate::selection::resolve(&map, &src);

        let (progress, cancel) = counters();
        delete_extras(&src, &dst, Some(&resolved), &progress, &cancel)?;

        assert!(dst.join("Videos/Family/f.mp4").exists());
        assert!(!dst.join("Videos/Work").exists());
        assert!(dst.join("Documents").exists());
        Ok(())
    }

    #[test]
    fn cancellation_stops_deletion() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        create_dir_all(&src)?;
        create_dir_all(&dst)?;
        for i in 0..200 {
            write(dst.join(format!("f{}", i)), "x")?;
        }

        let (progress, cancel) = counters();
        cancel.cancel();
        let err = delete_extras(&src, &dst, None, &progress, &cancel).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MbakError>(),
            Some(MbakError::Canceled)
        ));
        // Promptness: no more than one poll interval's worth of work.
        assert!(progress.files_deleted() <= CANCEL_POLL_INTERVAL as u64);
        Ok(())
    }
}
