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

use std::fs::create_dir_all;

use test_case::test_case;

mod util;
use crate::util::*;

#[test]
fn basic_help() -> TResult {
    let out = run(&["--help"])?;

    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout)?;
    assert!(stdout.contains("Incremental mirror backup"));
    Ok(())
}

#[test]
fn no_args() -> TResult {
    let out = run(&[])?;

    assert!(!out.status.success());
    Ok(())
}

#[test]
fn backup_and_rerun() -> TResult {
    let f = Fixture::new()?;
    let src = f.src();
    let dst = f.dst();

    let out = run(&[
        "--no-progress",
        "backup",
        "--source",
        src.to_str().unwrap(),
        dst.to_str().unwrap(),
    ])?;
    assert!(out.status.success());

    assert!(files_match(
        &src.join("notes.txt"),
        &dst.join("notes.txt")
    ));
    assert!(files_match(
        &src.join("Documents/report.txt"),
        &dst.join("Documents/report.txt")
    ));
    assert!(dst.join("BACKUP-INFO.txt").exists());

    // Second run converges without touching anything.
    let out = run(&[
        "--no-progress",
        "backup",
        "--source",
        src.to_str().unwrap(),
        dst.to_str().unwrap(),
    ])?;
    assert!(out.status.success());
    Ok(())
}

#[test_case("home"; "with the home catalog")]
#[test_case("system"; "with the system catalog")]
fn backup_source_missing(kind: &str) -> TResult {
    let f = Fixture::new()?;
    let out = run(&[
        "--no-progress",
        "backup",
        "--kind",
        kind,
        "--source",
        "/this/should/not/exist",
        f.dst().to_str().unwrap(),
    ])?;

    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8(out.stderr)?;
    assert!(stderr.contains("Invalid source"));
    Ok(())
}

#[test]
fn exclusions_apply() -> TResult {
    let f = Fixture::new()?;
    let src = f.src();
    let dst = f.dst();
    create_file(&src.join("junk/scratch.tmp"), "scratch")?;

    let out = run(&[
        "--no-progress",
        "backup",
        "--source",
        src.to_str().unwrap(),
        "--exclude",
        "junk/*",
        dst.to_str().unwrap(),
    ])?;
    assert!(out.status.success());
    assert!(!dst.join("junk").exists());
    assert!(dst.join("notes.txt").exists());
    Ok(())
}

#[test]
fn deletion_follows_source() -> TResult {
    let f = Fixture::new()?;
    let src = f.src();
    let dst = f.dst();

    let args = [
        "--no-progress",
        "backup",
        "--source",
        src.to_str().unwrap(),
        dst.to_str().unwrap(),
    ];
    assert!(run(&args)?.status.success());
    assert!(dst.join("notes.txt").exists());

    std::fs::remove_file(src.join("notes.txt"))?;
    assert!(run(&args)?.status.success());
    assert!(!dst.join("notes.txt").exists());
    Ok(())
}

#[test]
fn selective_backup_via_flags() -> TResult {
    let f = Fixture::new()?;
    let src = f.src();
    let dst = f.dst();
    create_file(&src.join("Videos/Family/clip.mp4"), "family")?;
    create_file(&src.join("Videos/Work/meeting.mp4"), "work")?;

    let out = run(&[
        "--no-progress",
        "backup",
        "--source",
        src.to_str().unwrap(),
        "--deselect",
        "Videos",
        "--select",
        "Videos/Family",
        dst.to_str().unwrap(),
    ])?;
    assert!(out.status.success());

    assert!(dst.join("Videos/Family/clip.mp4").exists());
    assert!(!dst.join("Videos/Work").exists());
    assert!(dst.join("BACKUP-FOLDERS.txt").exists());
    Ok(())
}

#[test]
fn restore_needs_a_manifest() -> TResult {
    let f = Fixture::new()?;
    let plain = f.dir.path().join("plain");
    create_dir_all(&plain)?;

    let out = run(&[
        "--no-progress",
        "restore",
        plain.to_str().unwrap(),
        f.dir.path().join("target").to_str().unwrap(),
    ])?;
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8(out.stderr)?;
    assert!(stderr.contains("No backup manifest"));
    Ok(())
}

#[test]
fn backup_then_verify() -> TResult {
    let f = Fixture::new()?;
    let src = f.src();
    let dst = f.dst();

    assert!(run(&[
        "--no-progress",
        "backup",
        "--source",
        src.to_str().unwrap(),
        dst.to_str().unwrap(),
    ])?
    .status
    .success());

    let out = run(&[
        "--no-progress",
        "verify",
        src.to_str().unwrap(),
        dst.to_str().unwrap(),
    ])?;
    assert!(out.status.success());
    Ok(())
}

#[test]
fn restore_round_trip() -> TResult {
    let f = Fixture::new()?;
    let src = f.src();
    let dst = f.dst();
    let target = f.dir.path().join("restored");

    assert!(run(&[
        "--no-progress",
        "backup",
        "--source",
        src.to_str().unwrap(),
        dst.to_str().unwrap(),
    ])?
    .status
    .success());

    let out = run(&[
        "--no-progress",
        "restore",
        dst.to_str().unwrap(),
        target.to_str().unwrap(),
    ])?;
    assert!(out.status.success());

    assert!(tree_subset(&src, &target));
    assert!(!target.join("BACKUP-INFO.txt").exists());
    Ok(())
}
