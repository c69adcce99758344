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

//! Single-file copy with metadata preservation.

use std::fs::{DirBuilder, File};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use log::warn;

use crate::errors::Result;
use crate::fsutil;

const DEFAULT_BUF: usize = 256 * 1024;
const MEDIUM_BUF: usize = 2 * 1024 * 1024;
const LARGE_BUF: usize = 4 * 1024 * 1024;

// Larger buffers amortize syscalls on big files without taxing the
// common small-file case.
fn buffer_size(file_len: u64) -> usize {
    if file_len > 100 * 1024 * 1024 {
        LARGE_BUF
    } else if file_len > 10 * 1024 * 1024 {
        MEDIUM_BUF
    } else {
        DEFAULT_BUF
    }
}

/// Copy one regular file. On success the destination holds the same
/// bytes and carries the source's mode, owner and mtime. ENOSPC
/// surfaces as [`MbakError::OutOfSpace`](crate::errors::MbakError)
/// with a capacity report; the walker treats that as fatal.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let mut infd = File::open(src)?;
    let metadata = infd.metadata()?;

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)
                .map_err(|e| fsutil::enospc_check(e, dst))?;
        }
    }

    let mut outfd = File::create(dst).map_err(|e| fsutil::enospc_check(e, dst))?;

    let mut buf = vec![0u8; buffer_size(metadata.len())];
    let mut written: u64 = 0;
    loop {
        let len = match infd.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        outfd
            .write_all(&buf[..len])
            .map_err(|e| fsutil::enospc_check(e, dst))?;
        written += len as u64;
    }
    drop(outfd);

    // The copy stands even if metadata cannot be mirrored (common when
    // running unprivileged).
    if let Err(e) = fsutil::apply_metadata(&metadata, dst) {
        warn!("Failed to apply metadata to {:?}: {}", dst, e);
    }
    fsutil::copy_xattrs(src, dst);

    Ok(written)
}
