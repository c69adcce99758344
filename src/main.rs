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

mod options;
mod progress;

use std::process::exit;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use libmbak::errors::Result;
use libmbak::run::{BackupRun, RunResult};

use crate::options::Opts;
use crate::progress::ProgressBar;

/// UI tick for progress polling.
const TICK: Duration = Duration::from_millis(200);

fn main() {
    let opts = Opts::parse();

    TermLogger::init(
        opts.log_level(),
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("Failed to initialize logging");

    match run_command(&opts) {
        Ok(code) => exit(code),
        Err(e) => {
            error!("{:#}", e);
            exit(1);
        }
    }
}

fn run_command(opts: &Opts) -> Result<i32> {
    let config = opts.to_config()?;
    let run = Arc::new(BackupRun::new(config));
    let shared = run.progress();

    // The engine runs on its own thread; this one becomes the UI tick.
    let handle = {
        let run = run.clone();
        thread::spawn(move || run.execute())
    };

    let bar = ProgressBar::new(opts.no_progress)?;
    while !handle.is_finished() {
        bar.update(&shared.report());
        thread::sleep(TICK);
    }
    bar.update(&shared.report());
    bar.end();

    let result = handle.join().expect("Run thread panicked");
    let code = match result {
        RunResult::Completed { warnings } => {
            for w in &warnings {
                warn!("{}", w);
            }
            if warnings.is_empty() {
                info!("Completed cleanly");
            } else {
                info!("Completed with {} warnings", warnings.len());
            }
            0
        }
        RunResult::Canceled => {
            warn!("Operation canceled; the backup volume holds a partial mirror that the next run will converge");
            2
        }
        RunResult::Fatal(e) => {
            error!("{:#}", e);
            1
        }
    };
    Ok(code)
}
