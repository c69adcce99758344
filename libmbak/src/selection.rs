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

//! Selective inclusion: translating a user's folder choices into
//! walker decisions.
//!
//! The rule that makes this nontrivial is hierarchical selection: a
//! selected subfolder of a deselected parent is still backed up. The
//! walker therefore descends into a deselected directory whenever a
//! selected subfolder lies beneath it, while skipping its other
//! children.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::warn;
use walkdir::WalkDir;

use crate::errors::Result;
use crate::pattern;

/// Folder path → included? Insertion order is irrelevant. Folders not
/// in the map are included by default.
pub type SelectionMap = BTreeMap<PathBuf, bool>;

/// Security-critical dotfolders that stay in every home backup no
/// matter what the selection says.
pub const ALWAYS_INCLUDE: &[&str] = &[
    ".ssh",
    ".gnupg",
    ".pki",
    ".password-store",
    ".mozilla",
    ".thunderbird",
];

/// One home folder as shown to the user.
#[derive(Debug)]
pub struct FolderEntry {
    pub name: String,
    pub path: PathBuf,
    /// Recursive size in bytes; unreadable entries are skipped.
    pub size: u64,
    /// Leading-dot folder.
    pub hidden: bool,
    pub always_include: bool,
    subfolders: OnceLock<bool>,
}

impl FolderEntry {
    pub fn new(path: PathBuf, size: u64) -> FolderEntry {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hidden = name.starts_with('.');
        FolderEntry {
            always_include: hidden && ALWAYS_INCLUDE.contains(&name.as_str()),
            name,
            path,
            size,
            hidden,
            subfolders: OnceLock::new(),
        }
    }

    /// Whether the folder contains at least one directory. Computed on
    /// first use; the UI asks this when deciding to offer expansion.
    pub fn has_subfolders(&self) -> bool {
        *self.subfolders.get_or_init(|| {
            std::fs::read_dir(&self.path)
                .map(|rd| {
                    rd.flatten()
                        .any(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                })
                .unwrap_or(false)
        })
    }
}

/// List the folders directly under a home root, sizes included.
pub fn list_home_folders(home: &Path) -> Result<Vec<FolderEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(home)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable home entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let size = tree_size(&path);
        entries.push(FolderEntry::new(path, size));
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn tree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// A selection map flattened into what the walker and the deletion
/// reconciler consume.
#[derive(Clone, Debug, Default)]
pub struct ResolvedSelection {
    /// Deselected folders; appended verbatim to the exclusion pattern
    /// list and matched as prefixes during the walk.
    pub deselected: Vec<PathBuf>,
    /// Selected folders below the root level. These override
    /// exclusions for their whole subtree.
    pub selected_subfolders: Vec<PathBuf>,
    /// Selected root-level folders. Recorded for the folder manifest;
    /// the walk includes them simply by not excluding them.
    pub selected_roots: Vec<PathBuf>,
}

impl ResolvedSelection {
    /// Does the selection keep this source path? True when the path
    /// sits under a selected folder, is an ancestor of one (so the
    /// directory chain must exist), sits under an always-include
    /// folder, or is a loose entry directly under the root, which the
    /// folder map does not govern.
    pub fn keeps(&self, path: &Path, root: &Path) -> bool {
        if path == root || path.parent() == Some(root) {
            // Root-level entries: loose files are always kept, folders
            // only if not deselected.
            if !self.deselected.iter().any(|d| d == path) {
                return true;
            }
        }
        if always_include_covers(root, path) {
            return true;
        }
        self.selected_subfolders
            .iter()
            .chain(self.selected_roots.iter())
            .any(|s| path.starts_with(s) || s.starts_with(path))
            || self.deselected.iter().all(|d| !path.starts_with(d))
    }
}

fn always_include_covers(root: &Path, path: &Path) -> bool {
    ALWAYS_INCLUDE
        .iter()
        .any(|name| path.starts_with(root.join(name)))
}

/// Flatten a selection map against its root.
///
/// Deselected folders become exclusions, except always-include
/// dotfolders which can never be excluded. A selected folder deeper
/// than the root level becomes an explicit subfolder inclusion.
pub fn resolve(map: &SelectionMap, root: &Path) -> ResolvedSelection {
    let root_depth = root.components().count();
    let mut resolved = ResolvedSelection::default();

    for (path, included) in map {
        let depth = path.components().count();
        if *included {
            if depth > root_depth + 1 {
                resolved.selected_subfolders.push(path.clone());
            } else {
                resolved.selected_roots.push(path.clone());
            }
        } else {
            if always_include_covers(root, path) {
                warn!(
                    "Ignoring deselection of protected folder {:?}",
                    path
                );
                continue;
            }
            resolved.deselected.push(path.clone());
        }
    }

    resolved
}

/// Walker verdict for one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Include,
    /// Skip this entry only.
    SkipEntry,
    /// Skip this directory and everything under it.
    SkipSubtree,
}

/// The one inclusion question the walker asks. Pattern exclusion and
/// hierarchical selection are both implementations of this.
pub trait WalkFilter: Send + Sync {
    fn decide(&self, path: &Path, is_dir: bool) -> Decision;
}

/// Plain pattern exclusion. Relative patterns are anchored to the
/// source root once, at construction.
pub struct PatternFilter {
    patterns: Vec<String>,
}

impl PatternFilter {
    pub fn new(root: &Path, patterns: &[String]) -> PatternFilter {
        let root_str = root.to_string_lossy();
        let root_str = root_str.trim_end_matches('/');
        let patterns = patterns
            .iter()
            .map(|p| {
                if p.starts_with('/') {
                    p.clone()
                } else {
                    format!("{}/{}", root_str, p)
                }
            })
            .collect();
        PatternFilter { patterns }
    }

    fn excluded(&self, path: &Path) -> bool {
        pattern::matches_any(&path.to_string_lossy(), &self.patterns)
    }
}

impl WalkFilter for PatternFilter {
    fn decide(&self, path: &Path, is_dir: bool) -> Decision {
        if self.excluded(path) {
            if is_dir {
                Decision::SkipSubtree
            } else {
                Decision::SkipEntry
            }
        } else {
            Decision::Include
        }
    }
}

/// Hierarchical selection on top of pattern exclusion.
///
/// Precedence: a path under an explicitly selected subfolder is
/// included unconditionally, bypassing exclusion patterns. A directory
/// that is an ancestor of a selected subfolder is descended so the
/// selection can be reached, but its other children fall under the
/// deselection. Only then do ordinary exclusion patterns apply.
pub struct SelectiveFilter {
    patterns: PatternFilter,
    deselected: Vec<PathBuf>,
    selected: Vec<PathBuf>,
}

impl SelectiveFilter {
    pub fn new(root: &Path, patterns: &[String], selection: &ResolvedSelection) -> SelectiveFilter {
        SelectiveFilter {
            patterns: PatternFilter::new(root, patterns),
            deselected: selection.deselected.clone(),
            selected: selection.selected_subfolders.clone(),
        }
    }
}

impl WalkFilter for SelectiveFilter {
    fn decide(&self, path: &Path, is_dir: bool) -> Decision {
        if self.selected.iter().any(|s| path.starts_with(s)) {
            return Decision::Include;
        }
        if is_dir && self.selected.iter().any(|s| s.starts_with(path)) {
            return Decision::Include;
        }
        if self.deselected.iter().any(|d| path.starts_with(d)) {
            return if is_dir {
                Decision::SkipSubtree
            } else {
                Decision::SkipEntry
            };
        }
        self.patterns.decide(path, is_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> PathBuf {
        PathBuf::from("/home/alice")
    }

    fn selection() -> SelectionMap {
        let mut map = SelectionMap::new();
        map.insert(home().join("Videos"), false);
        map.insert(home().join("Videos/Family"), true);
        map.insert(home().join("Documents"), true);
        map
    }

    #[test]
    fn resolution_splits_roots_and_subfolders() {
        let resolved = resolve(&selection(), &home());
        assert_eq!(resolved.deselected, vec![home().join("Videos")]);
        assert_eq!(
            resolved.selected_subfolders,
            vec![home().join("Videos/Family")]
        );
        assert_eq!(resolved.selected_roots, vec![home().join("Documents")]);
    }

    #[test]
    fn protected_folders_cannot_be_deselected() {
        let mut map = SelectionMap::new();
        map.insert(home().join(".ssh"), false);
        map.insert(home().join("Downloads"), false);
        let resolved = resolve(&map, &home());
        assert_eq!(resolved.deselected, vec![home().join("Downloads")]);
    }

    #[test]
    fn selected_subfolder_of_deselected_parent_wins() {
        let resolved = resolve(&selection(), &home());
        let filter = SelectiveFilter::new(&home(), &[], &resolved);

        // The deselected parent is descended, not skipped.
        assert_eq!(filter.decide(&home().join("Videos"), true), Decision::Include);
        // The selected subtree is in.
        assert_eq!(
            filter.decide(&home().join("Videos/Family/clip.mp4"), false),
            Decision::Include
        );
        // Its siblings are out.
        assert_eq!(
            filter.decide(&home().join("Videos/Work"), true),
            Decision::SkipSubtree
        );
        assert_eq!(
            filter.decide(&home().join("Videos/loose.mp4"), false),
            Decision::SkipEntry
        );
        // Untouched root folders flow through the pattern filter.
        assert_eq!(
            filter.decide(&home().join("Documents/notes.txt"), false),
            Decision::Include
        );
    }

    #[test]
    fn selected_subfolder_bypasses_exclusion_patterns() {
        let resolved = resolve(&selection(), &home());
        let patterns = vec!["Videos/Family/*".to_string()];
        let filter = SelectiveFilter::new(&home(), &patterns, &resolved);
        assert_eq!(
            filter.decide(&home().join("Videos/Family/clip.mp4"), false),
            Decision::Include
        );
    }

    #[test]
    fn pattern_filter_anchors_relative_patterns() {
        let filter = PatternFilter::new(&home(), &[".cache/*".to_string()]);
        assert_eq!(
            filter.decide(&home().join(".cache/fontconfig"), true),
            Decision::SkipSubtree
        );
        assert_eq!(
            filter.decide(&home().join("cachet"), false),
            Decision::Include
        );
    }

    #[test]
    fn home_listing_flags_hidden_and_protected_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Documents/sub")).unwrap();
        std::fs::create_dir_all(dir.path().join(".ssh")).unwrap();
        std::fs::write(dir.path().join("Documents/f.txt"), "12345").unwrap();
        std::fs::write(dir.path().join("loose.txt"), "x").unwrap();

        let folders = list_home_folders(dir.path()).unwrap();
        assert_eq!(folders.len(), 2);

        let ssh = folders.iter().find(|f| f.name == ".ssh").unwrap();
        assert!(ssh.hidden);
        assert!(ssh.always_include);
        assert!(!ssh.has_subfolders());

        let docs = folders.iter().find(|f| f.name == "Documents").unwrap();
        assert!(!docs.hidden);
        assert!(!docs.always_include);
        assert!(docs.has_subfolders());
        assert_eq!(docs.size, 5);
    }

    #[test]
    fn keeps_governs_deletion_scope() {
        let resolved = resolve(&selection(), &home());
        let root = home();
        assert!(resolved.keeps(&home().join("Documents/d.txt"), &root));
        assert!(resolved.keeps(&home().join("Videos/Family/clip.mp4"), &root));
        assert!(resolved.keeps(&home().join("Videos"), &root)); // ancestor of Family
        assert!(!resolved.keeps(&home().join("Videos/Work"), &root));
        assert!(resolved.keeps(&home().join(".bashrc"), &root)); // loose root file
        assert!(resolved.keeps(&home().join(".ssh/id_ed25519"), &root));
    }
}
