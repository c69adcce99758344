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

//! File identity oracles, from cheap to expensive.
//!
//! The sync walker uses [`identical`], a fail-closed size/mtime ladder:
//! anything unknown means "copy it again". The verifier uses
//! [`sampled_identical`] and [`hash_identical`] which actually read
//! file content.

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::{Duration, Instant};

use log::debug;
use sha2::{Digest, Sha256};

use crate::config::IdentityPolicy;
use crate::errors::{MbakError, Result};

const SAMPLE_LEN: u64 = 4096;
const HASH_BUF_LEN: usize = 1024 * 1024;
const HASH_PROGRESS_INTERVAL: u64 = 100 * 1024 * 1024;

/// Incremental-skip decision. Unknown means not identical, so a stat
/// failure on either side triggers a fresh copy.
pub fn identical(src: &Path, dst: &Path, policy: &IdentityPolicy) -> bool {
    let (sm, dm) = match (fs::metadata(src), fs::metadata(dst)) {
        (Ok(s), Ok(d)) => (s, d),
        _ => return false,
    };

    if sm.len() != dm.len() {
        return false;
    }
    if sm.len() == 0 {
        return true;
    }
    // Above the threshold, matching size is judged sufficient. Media
    // trees dominate that range and stat-only keeps incremental runs
    // fast; see IdentityPolicy.
    if sm.len() > policy.large_file_threshold {
        return true;
    }
    if !policy.trust_mtime {
        return true;
    }
    match (sm.modified(), dm.modified()) {
        (Ok(s), Ok(d)) => s <= d,
        _ => false,
    }
}

/// Compare fixed 4 KiB windows at the start, middle and end of both
/// files, plus the quarter points for files over 100 MiB.
pub fn sampled_identical(src: &Path, dst: &Path, size: u64) -> Result<bool> {
    let sf = File::open(src)?;
    let df = File::open(dst)?;

    let mut offsets = vec![0, size / 2, size.saturating_sub(SAMPLE_LEN)];
    if size > 100 * 1024 * 1024 {
        offsets.push(size / 4);
        offsets.push(3 * (size / 4));
    }

    let mut sbuf = [0u8; SAMPLE_LEN as usize];
    let mut dbuf = [0u8; SAMPLE_LEN as usize];
    for off in offsets {
        let len = SAMPLE_LEN.min(size - off) as usize;
        if len == 0 {
            continue;
        }
        sf.read_exact_at(&mut sbuf[..len], off)?;
        df.read_exact_at(&mut dbuf[..len], off)?;
        if sbuf[..len] != dbuf[..len] {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Stream SHA-256 over a file with a deadline. Fails with
/// [`MbakError::HashTimeout`] rather than blocking a verifier worker
/// indefinitely on a dying disk.
pub fn hash_file(path: &Path, timeout: Duration) -> Result<[u8; 32]> {
    let start = Instant::now();
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_LEN];
    let mut total: u64 = 0;
    let mut next_report = HASH_PROGRESS_INTERVAL;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
        if total >= next_report {
            debug!("Hashing {:?}: {} done", path, crate::fsutil::nice_size(total));
            next_report += HASH_PROGRESS_INTERVAL;
        }
        if start.elapsed() > timeout {
            return Err(MbakError::HashTimeout {
                path: path.to_path_buf(),
                seconds: start.elapsed().as_secs(),
            }
            .into());
        }
    }

    Ok(hasher.finalize().into())
}

/// Full-content comparison via streaming SHA-256 of both sides.
pub fn hash_identical(src: &Path, dst: &Path, timeout: Duration) -> Result<bool> {
    Ok(hash_file(src, timeout)? == hash_file(dst, timeout)?)
}

/// Deadline for hashing one file: the policy baseline, doubled up for
/// files past the gigabyte mark.
pub fn hash_timeout_for(size: u64, baseline: Duration, large: Duration) -> Duration {
    if size > 1024 * 1024 * 1024 {
        large
    } else {
        baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{write, File};
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn policy() -> IdentityPolicy {
        IdentityPolicy::default()
    }

    fn set_mtime(path: &Path, when: SystemTime) {
        let times = fs::FileTimes::new().set_modified(when);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_times(times)
            .unwrap();
    }

    #[test]
    fn missing_side_is_not_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        write(&a, "x").unwrap();
        assert!(!identical(&a, &dir.path().join("missing"), &policy()));
        assert!(!identical(&dir.path().join("missing"), &a, &policy()));
    }

    #[test]
    fn size_mismatch_is_not_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write(&a, "xx").unwrap();
        write(&b, "x").unwrap();
        assert!(!identical(&a, &b, &policy()));
    }

    #[test]
    fn empty_files_are_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write(&a, "").unwrap();
        write(&b, "").unwrap();
        assert!(identical(&a, &b, &policy()));
    }

    #[test]
    fn newer_source_mtime_forces_copy() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write(&a, "same").unwrap();
        write(&b, "same").unwrap();

        let now = SystemTime::now();
        set_mtime(&a, now);
        set_mtime(&b, now - Duration::from_secs(3600));
        assert!(!identical(&a, &b, &policy()));

        set_mtime(&b, now + Duration::from_secs(3600));
        assert!(identical(&a, &b, &policy()));
    }

    #[test]
    fn large_files_compare_by_size_alone() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write(&a, "same-size").unwrap();
        write(&b, "diff-size").unwrap();
        set_mtime(&a, SystemTime::now());
        set_mtime(&b, SystemTime::now() - Duration::from_secs(3600));

        // Shrink the threshold below the file size; the stale mtime no
        // longer matters.
        let small_threshold = IdentityPolicy {
            large_file_threshold: 4,
            ..IdentityPolicy::default()
        };
        assert!(identical(&a, &b, &small_threshold));
        assert!(!identical(&a, &b, &policy()));
    }

    #[test]
    fn sampling_sees_a_tail_flip() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let mut data = vec![7u8; 64 * 1024];
        write(&a, &data).unwrap();
        *data.last_mut().unwrap() = 8;
        write(&b, &data).unwrap();

        assert!(!sampled_identical(&a, &b, 64 * 1024).unwrap());
        write(&b, vec![7u8; 64 * 1024]).unwrap();
        assert!(sampled_identical(&a, &b, 64 * 1024).unwrap());
    }

    #[test]
    fn hashing_compares_full_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write(&a, "identical payload").unwrap();
        write(&b, "identical payload").unwrap();
        assert!(hash_identical(&a, &b, Duration::from_secs(30)).unwrap());

        write(&b, "identical paylosd").unwrap();
        assert!(!hash_identical(&a, &b, Duration::from_secs(30)).unwrap());
    }

    #[test]
    fn hash_deadline_is_enforced() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        write(&a, vec![0u8; 8 * 1024 * 1024]).unwrap();
        let e = hash_file(&a, Duration::ZERO).unwrap_err();
        assert!(matches!(
            e.downcast_ref::<MbakError>(),
            Some(MbakError::HashTimeout { .. })
        ));
    }
}
