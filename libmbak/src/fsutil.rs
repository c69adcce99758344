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

//! Filesystem operations supplementary to `std::fs`: metadata
//! mirroring, capacity reporting and durability.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use filetime::FileTime;
use log::{debug, warn};
use rustix::fs::{AtFlags, Gid, Uid, CWD};

use crate::errors::{MbakError, Result};

/// Mirror permissions, ownership and mtime from source metadata onto a
/// copied file or directory. Ownership needs privilege; on an
/// unprivileged run the chown fails and the caller downgrades the whole
/// application to a logged warning.
pub fn apply_metadata(src_meta: &Metadata, dst: &Path) -> Result<()> {
    fs::set_permissions(dst, src_meta.permissions())?;
    rustix::fs::chown(
        dst,
        Some(Uid::from_raw(src_meta.uid())),
        Some(Gid::from_raw(src_meta.gid())),
    )?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(src_meta))?;
    Ok(())
}

/// Same for a symlink, without following it. mtime is left alone; link
/// targets carry the identity, not their timestamps.
pub fn apply_symlink_ownership(src_meta: &Metadata, dst: &Path) -> Result<()> {
    rustix::fs::chownat(
        CWD,
        dst,
        Some(Uid::from_raw(src_meta.uid())),
        Some(Gid::from_raw(src_meta.gid())),
        AtFlags::SYMLINK_NOFOLLOW,
    )?;
    Ok(())
}

/// Best-effort extended attribute copy. The target filesystem may not
/// support xattrs at all, so any failure is a warning.
pub fn copy_xattrs(src: &Path, dst: &Path) {
    let attrs = match xattr::list(src) {
        Ok(attrs) => attrs,
        Err(e) => {
            debug!("Cannot list xattrs on {:?}: {}", src, e);
            return;
        }
    };
    for attr in attrs {
        match xattr::get(src, &attr) {
            Ok(Some(value)) => {
                if let Err(e) = xattr::set(dst, &attr, &value) {
                    warn!("Failed to copy xattr {:?} to {:?}: {}", attr, dst, e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Cannot read xattr {:?} from {:?}: {}", attr, src, e),
        }
    }
}

/// Total/used/free bytes of the filesystem holding `path`.
#[derive(Clone, Copy, Debug)]
pub struct Capacity {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

pub fn capacity(path: &Path) -> Result<Capacity> {
    let vfs = rustix::fs::statvfs(path)?;
    let total = vfs.f_blocks * vfs.f_frsize;
    let free = vfs.f_bavail * vfs.f_frsize;
    let used = total - vfs.f_bfree * vfs.f_frsize;
    Ok(Capacity { total, used, free })
}

/// Translate an I/O error into the fatal out-of-space kind when the OS
/// reported ENOSPC, attaching a capacity report for the destination.
/// Everything else passes through unchanged.
pub fn enospc_check(e: io::Error, dst: &Path) -> anyhow::Error {
    if e.raw_os_error() == Some(rustix::io::Errno::NOSPC.raw_os_error()) {
        let probe = dst.parent().unwrap_or(dst);
        let cap = capacity(probe).unwrap_or(Capacity { total: 0, used: 0, free: 0 });
        MbakError::OutOfSpace {
            total: cap.total,
            used: cap.used,
            free: cap.free,
        }
        .into()
    } else {
        e.into()
    }
}

/// Flush all pending writes to disk. Issued once at the end of a
/// backup run, before the drive provider unmounts the volume.
pub fn commit_to_disk() {
    rustix::fs::sync();
}

/// Human-readable byte count, 1024-based.
pub fn nice_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
