#![allow(unused)]
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

use std::fs::{create_dir_all, read, File};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};
use std::result;

use anyhow::Error;
use tempfile::{tempdir, TempDir};

pub type TResult = result::Result<(), Error>;

pub fn get_command() -> Result<Command, Error> {
    let exe = env!("CARGO_BIN_EXE_mbak");
    Ok(Command::new(exe))
}

pub fn run(args: &[&str]) -> Result<Output, Error> {
    let out = get_command()?.args(args).output()?;
    println!("STDOUT: {}", String::from_utf8_lossy(&out.stdout));
    println!("STDERR: {}", String::from_utf8_lossy(&out.stderr));
    Ok(out)
}

pub fn create_file(path: &Path, text: &str) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write!(&file, "{}", text)?;
    Ok(())
}

pub fn files_match(a: &Path, b: &Path) -> bool {
    match (read(a), read(b)) {
        (Ok(da), Ok(db)) => da == db,
        _ => false,
    }
}

/// Every file under `a` exists under `b` with identical content.
pub fn tree_subset(a: &Path, b: &Path) -> bool {
    for entry in walkdir::WalkDir::new(a).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(a).unwrap();
        if !files_match(entry.path(), &b.join(rel)) {
            return false;
        }
    }
    true
}

/// Source/destination pair under one tempdir, with a small home-like
/// source tree.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Result<Fixture, Error> {
        let dir = tempdir()?;
        let f = Fixture { dir };
        create_file(&f.src().join("notes.txt"), "some notes")?;
        create_file(&f.src().join("Documents/report.txt"), "the report")?;
        create_dir_all(f.dst())?;
        Ok(f)
    }

    pub fn src(&self) -> std::path::PathBuf {
        self.dir.path().join("src")
    }

    pub fn dst(&self) -> std::path::PathBuf {
        self.dir.path().join("dst")
    }
}
