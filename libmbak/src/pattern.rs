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

//! Exclusion pattern matching.
//!
//! Patterns come in two forms: absolute (starting with `/`) or
//! relative to the source root; the caller anchors relative patterns
//! before matching. A trailing `/*` covers the directory itself and
//! everything inside it, and interior `/*` segments float, so
//! `/home/*/.cache/*` matches any user's cache tree. This runs on the
//! walker hot path; keep it O(|pattern|) per call.

/// Decide whether an absolute, normalized path is matched by a pattern.
pub fn matches(path: &str, pattern: &str) -> bool {
    if pattern.contains("/*") && multi_segment_match(path, pattern) {
        return true;
    }

    if let Ok(glob) = glob::Pattern::new(pattern) {
        if glob.matches(path) {
            return true;
        }
    }

    // A trailing /* also covers the directory entry itself, so a
    // matching directory is skipped as a whole subtree.
    if let Some(prefix) = pattern.strip_suffix("/*") {
        if let Some(rest) = path.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                return true;
            }
        }
    }

    false
}

// Split the pattern on "/*" and scan the path with a cursor: the first
// segment anchors at the start, interior segments may float anywhere in
// the remaining tail, and a trailing empty segment matches the rest.
fn multi_segment_match(path: &str, pattern: &str) -> bool {
    let mut segments = pattern.split("/*");

    let head = segments.next().unwrap_or("");
    let mut tail = match path.strip_prefix(head) {
        Some(t) => t,
        None => return false,
    };

    for segment in segments {
        if segment.is_empty() {
            // Consecutive or trailing wildcards impose nothing.
            continue;
        }
        match tail.find(segment) {
            Some(at) => tail = &tail[at + segment.len()..],
            None => return false,
        }
    }

    true
}

/// Does any pattern in the set match?
pub fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches(path, p))
}

/// The canonical exclusion set for whole-system backups. Pseudo
/// filesystems, scratch space, mounts and container/image stores that
/// would bloat or break a mirror of `/`.
pub const SYSTEM_EXCLUSIONS: &[&str] = &[
    "/dev/*",
    "/proc/*",
    "/sys/*",
    "/tmp/*",
    "/run/*",
    "/mnt/*",
    "/media/*",
    "/var/tmp/*",
    "/var/cache/*",
    "/var/log/*",
    "/var/run/*",
    "/var/lock/*",
    "/lost+found",
    "/swapfile",
    "/swap.img",
    "/var/lib/docker/*",
    "/var/lib/containers/*",
    "/var/lib/flatpak/repo/*",
    "/var/lib/libvirt/images/*",
    "/home/*/.cache/*",
    "/home/*/.local/share/Trash/*",
];

/// The canonical exclusion set for home backups, anchored relative to
/// the home root. Caches, trash, package/runtime stores and browser
/// caches; all regenerable.
pub const HOME_EXCLUSIONS: &[&str] = &[
    ".cache/*",
    ".local/share/Trash/*",
    ".local/share/Steam/steamapps/*",
    ".local/share/containers/*",
    ".local/share/flatpak/repo/*",
    ".local/share/baloo/*",
    ".var/app/*/cache/*",
    ".config/google-chrome/*/Cache/*",
    ".config/chromium/*/Cache/*",
    ".mozilla/firefox/*/startupCache/*",
    ".npm/_cacache/*",
    ".cargo/registry/cache/*",
    ".thumbnails/*",
];

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("/dev/null", "/dev/*", true; "simple wildcard tail")]
    #[test_case("/dev", "/dev/*", true; "wildcard covers the directory itself")]
    #[test_case("/device", "/dev/*", true; "prefix anchoring is byte-wise")]
    #[test_case("/var/log/syslog", "/var/log/*", true; "nested tail")]
    #[test_case("/var/local/x", "/var/log/*", false; "sibling does not match")]
    #[test_case("/lost+found", "/lost+found", true; "literal pattern")]
    #[test_case("/lost+found/x", "/lost+found", false; "literal does not cover children")]
    fn single_wildcard(path: &str, pattern: &str, expected: bool) {
        assert_eq!(matches(path, pattern), expected);
    }

    #[test_case("/home/alice/.cache/fontconfig", "/home/*/.cache/*", true; "any user cache")]
    #[test_case("/home/bob/.cache", "/home/*/.cache/*", true; "cache root itself")]
    #[test_case("/home/alice/work/.cache/x", "/home/*/.cache/*", true; "floating interior segment")]
    #[test_case("/home/alice/Documents/report", "/home/*/.cache/*", false; "no cache segment")]
    #[test_case("/root/.cache/x", "/home/*/.cache/*", false; "head segment anchors")]
    fn multi_wildcard(path: &str, pattern: &str, expected: bool) {
        assert_eq!(matches(path, pattern), expected);
    }

    #[test]
    fn plain_glob_fallback() {
        assert!(matches("/home/alice/core.1234", "/home/alice/core.*"));
        assert!(!matches("/home/alice/score.1", "/home/alice/core.*"));
    }

    #[test]
    fn trailing_wildcard_matches_deep_descendants() {
        assert!(matches("/var/cache/apt/archives/x.deb", "/var/cache/*"));
    }

    #[test]
    fn set_matching() {
        let patterns: Vec<String> = SYSTEM_EXCLUSIONS.iter().map(|s| s.to_string()).collect();
        assert!(matches_any("/proc/12/maps", &patterns));
        assert!(!matches_any("/etc/fstab", &patterns));
    }
}
