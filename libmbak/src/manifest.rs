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

//! Backup manifests written at the destination root.
//!
//! `BACKUP-INFO.txt` records what kind of backup a volume holds and is
//! the authoritative input for restore-time type detection.
//! `BACKUP-FOLDERS.txt` exists only for selective home backups and
//! tells the verifier which omissions were intentional.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::warn;

use crate::errors::Result;
use crate::selection::ResolvedSelection;

pub const INFO_FILE: &str = "BACKUP-INFO.txt";
pub const FOLDERS_FILE: &str = "BACKUP-FOLDERS.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupType {
    System,
    Home,
}

impl BackupType {
    fn type_line(&self) -> &'static str {
        match self {
            BackupType::System => "Complete System",
            BackupType::Home => "Home Directory",
        }
    }

    fn banner(&self) -> &'static str {
        match self {
            BackupType::System => "COMPLETE SYSTEM BACKUP",
            BackupType::Home => "HOME DIRECTORY BACKUP",
        }
    }
}

/// Write `BACKUP-INFO.txt`. UTF-8, LF-terminated, fixed layout; the
/// "Backup Type:" line is what detection matches on.
pub fn write_info(dest_root: &Path, btype: BackupType) -> Result<()> {
    let uname = rustix::system::uname();
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    let recipe = match btype {
        BackupType::System => {
            "1. Boot a live environment and mount your system partition.\n\
             2. Mount this backup volume.\n\
             3. Run: mbak restore <backup mount> <system mount>\n\
             4. Reinstall the bootloader if required.\n"
        }
        BackupType::Home => {
            "1. Log in as the user being restored.\n\
             2. Mount this backup volume.\n\
             3. Run: mbak restore <backup mount> <home directory>\n\
             4. Log out and back in so applications pick up restored settings.\n"
        }
    };

    let mut f = fs::File::create(dest_root.join(INFO_FILE))?;
    write!(
        f,
        "{}\n\
         =========================\n\
         Created: {}\n\
         Hostname: {}\n\
         Kernel: {}\n\
         Architecture: {}\n\
         Backup Type: {}\n\
         \n\
         Written by mbak v{}\n\
         \n\
         To restore:\n\
         {}",
        btype.banner(),
        Local::now().to_rfc3339(),
        host,
        uname.release().to_string_lossy(),
        uname.machine().to_string_lossy(),
        btype.type_line(),
        env!("CARGO_PKG_VERSION"),
        recipe,
    )?;
    Ok(())
}

/// What kind of backup does this volume hold?
///
/// The manifest is authoritative. Without one, the tree's shape is a
/// usable hint: a system backup carries `etc/`, a home backup
/// `.config/`.
pub fn detect_backup_type(root: &Path) -> Option<BackupType> {
    if let Ok(contents) = fs::read_to_string(root.join(INFO_FILE)) {
        if contents.contains("Backup Type: Complete System") {
            return Some(BackupType::System);
        }
        if contents.contains("Backup Type: Home Directory") {
            return Some(BackupType::Home);
        }
        warn!("Manifest at {:?} has no recognizable type line", root);
    }
    if root.join("etc").is_dir() {
        return Some(BackupType::System);
    }
    if root.join(".config").is_dir() {
        return Some(BackupType::Home);
    }
    None
}

/// Included/excluded folders of a selective backup, in both directions
/// of the serialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FolderList {
    pub included: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
}

/// Flatten a resolved selection against the folders actually on disk.
///
/// A deselected folder that shelters a selected subfolder is reported
/// through its children, so the list names the subtrees that are
/// really absent rather than the parent that partially exists.
pub fn build_folder_list(root: &Path, resolved: &ResolvedSelection) -> FolderList {
    let mut list = FolderList::default();

    let entries = match fs::read_dir(root) {
        Ok(rd) => rd,
        Err(e) => {
            warn!("Cannot enumerate {:?} for the folder manifest: {}", root, e);
            return list;
        }
    };

    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if !resolved.deselected.contains(&path) {
            list.included.push(path);
            continue;
        }
        if resolved
            .selected_subfolders
            .iter()
            .any(|s| s.starts_with(&path))
        {
            split_partial_folder(&path, resolved, &mut list);
        } else {
            list.excluded.push(path);
        }
    }

    list.included.sort();
    list.excluded.sort();
    list
}

fn split_partial_folder(dir: &Path, resolved: &ResolvedSelection, list: &mut FolderList) {
    let entries = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            warn!("Cannot enumerate {:?} for the folder manifest: {}", dir, e);
            return;
        }
    };
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let child = entry.path();
        let kept = resolved
            .selected_subfolders
            .iter()
            .any(|s| child.starts_with(s) || s.starts_with(&child));
        if kept {
            list.included.push(child);
        } else {
            list.excluded.push(child);
        }
    }
}

/// Write `BACKUP-FOLDERS.txt` for a selective run.
pub fn write_folders(dest_root: &Path, list: &FolderList) -> Result<()> {
    let mut f = fs::File::create(dest_root.join(FOLDERS_FILE))?;

    writeln!(f, "SELECTIVE HOME BACKUP FOLDER LIST")?;
    writeln!(f, "=====================================")?;
    writeln!(f, "Created: {}", Local::now().to_rfc3339())?;
    writeln!(f)?;
    writeln!(f, "INCLUDED FOLDERS (backed up):")?;
    for path in &list.included {
        writeln!(f, "  ✅ {}", path.display())?;
    }
    writeln!(f)?;
    writeln!(f, "EXCLUDED FOLDERS (not backed up):")?;
    for path in &list.excluded {
        writeln!(f, "  ❌ {}", path.display())?;
    }
    writeln!(f)?;
    writeln!(
        f,
        "SUMMARY: {} folders included, {} folders excluded",
        list.included.len(),
        list.excluded.len()
    )?;
    Ok(())
}

/// Parse `BACKUP-FOLDERS.txt` back into folder sets. Returns None when
/// the backup has no folder manifest (any non-selective backup).
pub fn read_folders(dest_root: &Path) -> Result<Option<FolderList>> {
    let path = dest_root.join(FOLDERS_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Included,
        Excluded,
        Done,
    }

    let mut section = Section::Preamble;
    let mut list = FolderList::default();

    for line in contents.lines() {
        if line.starts_with("INCLUDED FOLDERS") {
            section = Section::Included;
            continue;
        }
        if line.starts_with("EXCLUDED FOLDERS") {
            section = Section::Excluded;
            continue;
        }
        if line.starts_with("SUMMARY:") {
            section = Section::Done;
            continue;
        }

        let entry = line.trim_start();
        let target = match section {
            Section::Included => entry.strip_prefix("✅ ").map(|p| (&mut list.included, p)),
            Section::Excluded => entry.strip_prefix("❌ ").map(|p| (&mut list.excluded, p)),
            _ => None,
        };
        if let Some((bucket, p)) = target {
            if p.starts_with('/') {
                bucket.push(PathBuf::from(p));
            }
        }
    }

    Ok(Some(list))
}
