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

use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use unbytify::unbytify;

use libmbak::config::{OperationKind, RunConfig};
use libmbak::errors::{MbakError, Result};
use libmbak::run::real_user_home;
use libmbak::selection::SelectionMap;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "mbak",
    about = "Incremental mirror backup and restore for external drives.",
    version,
)]
pub struct Opts {
    /// Verbosity.
    ///
    /// Can be specified multiple times to increase logging.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable the progress bar.
    #[arg(long, global = true)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Mirror a source tree onto a backup volume.
    ///
    /// Repeated runs are incremental: unchanged files are skipped,
    /// files that vanished from the source are removed from the
    /// backup, and the result is verified unless --no-verify is set.
    Backup {
        /// What to back up: 'system' (all of /) or 'home'.
        #[arg(long, default_value = "home")]
        kind: OperationKind,

        /// Mount point of the backup volume.
        dest: PathBuf,

        /// Back up this tree instead of the default root.
        #[arg(long)]
        source: Option<PathBuf>,

        /// Additional exclusion pattern; may repeat.
        ///
        /// Absolute, or relative to the source root. A trailing /*
        /// covers a directory and everything inside it.
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,

        /// Leave this home folder out of the backup; may repeat.
        /// Implies a selective backup.
        #[arg(long = "deselect")]
        deselect: Vec<PathBuf>,

        /// Keep this subfolder even though a parent is deselected;
        /// may repeat. Implies a selective backup.
        #[arg(long = "select")]
        select: Vec<PathBuf>,

        /// Skip post-backup verification.
        #[arg(long)]
        no_verify: bool,

        /// Size above which unchanged files are detected by size
        /// alone.
        ///
        /// Accepts standard size modifiers like "M" and "GB".
        #[arg(long, default_value = "500MB", value_parser = unbytify)]
        large_file_threshold: u64,

        /// Ignore mtimes entirely and trust size equality.
        #[arg(long)]
        size_only: bool,

        /// Fraction of unchanged files to spot-check during
        /// verification.
        #[arg(long, default_value_t = 0.01)]
        sample_rate: f64,

        /// Verifier worker threads; 0 means the number of logical
        /// CPUs.
        #[arg(long, default_value_t = 4)]
        verify_workers: usize,
    },

    /// Copy a backup volume back onto the host.
    Restore {
        /// Mount point of the backup volume.
        from: PathBuf,

        /// Where to restore to (the system root or a home directory).
        to: PathBuf,
    },

    /// Check an existing backup against its source without writing.
    Verify {
        /// Tree the backup was taken from.
        source: PathBuf,

        /// Mount point of the backup volume.
        backup: PathBuf,

        /// Fraction of files to spot-check.
        #[arg(long, default_value_t = 0.01)]
        sample_rate: f64,

        /// Verifier worker threads; 0 means the number of logical
        /// CPUs.
        #[arg(long, default_value_t = 4)]
        verify_workers: usize,
    },
}

impl Opts {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Translate the parsed command line into an engine run.
    pub fn to_config(&self) -> Result<RunConfig> {
        match &self.command {
            Command::Backup {
                kind,
                dest,
                source,
                exclude,
                deselect,
                select,
                no_verify,
                large_file_threshold,
                size_only,
                sample_rate,
                verify_workers,
            } => {
                let selective = !deselect.is_empty() || !select.is_empty();
                let kind = match (kind, selective) {
                    (OperationKind::SystemBackup, false) => OperationKind::SystemBackup,
                    (OperationKind::SystemBackup, true) => {
                        return Err(MbakError::InvalidArguments(
                            "Folder selection only applies to home backups".into(),
                        )
                        .into())
                    }
                    (OperationKind::HomeBackup | OperationKind::SelectiveHomeBackup, _) => {
                        if selective {
                            OperationKind::SelectiveHomeBackup
                        } else {
                            OperationKind::HomeBackup
                        }
                    }
                    _ => {
                        return Err(MbakError::InvalidArguments(
                            "Backup kind must be 'system' or 'home'".into(),
                        )
                        .into())
                    }
                };

                let root = match source {
                    Some(path) => path.clone(),
                    None => match kind {
                        OperationKind::SystemBackup => PathBuf::from("/"),
                        _ => real_user_home()?,
                    },
                };

                let mut config = RunConfig::new(kind, root.clone(), dest.clone());
                config.exclusions = exclude.clone();
                config.identity.large_file_threshold = *large_file_threshold;
                config.identity.trust_mtime = !size_only;
                config.verification.sample_rate = *sample_rate;
                config.verification.workers = *verify_workers;
                config.verify_after = !no_verify;

                if kind == OperationKind::SelectiveHomeBackup {
                    let mut map = SelectionMap::new();
                    for folder in deselect {
                        map.insert(anchor(&root, folder), false);
                    }
                    for folder in select {
                        map.insert(anchor(&root, folder), true);
                    }
                    config.selection = Some(map);
                }

                Ok(config)
            }

            Command::Restore { from, to } => Ok(RunConfig::new(
                OperationKind::Restore,
                from.clone(),
                to.clone(),
            )),

            Command::Verify {
                source,
                backup,
                sample_rate,
                verify_workers,
            } => {
                let mut config =
                    RunConfig::new(OperationKind::Verify, source.clone(), backup.clone());
                config.verification.sample_rate = *sample_rate;
                config.verification.workers = *verify_workers;
                Ok(config)
            }
        }
    }
}

// Folder flags may be given relative to the source root.
fn anchor(root: &Path, folder: &Path) -> PathBuf {
    if folder.is_absolute() {
        folder.to_path_buf()
    } else {
        root.join(folder)
    }
}
