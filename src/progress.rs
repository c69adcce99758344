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

use libmbak::errors::Result;
use libmbak::progress::Report;

const BAR_SCALE: u64 = 1000;

pub enum ProgressBar {
    Visual(indicatif::ProgressBar),
    Nop,
}

impl ProgressBar {
    pub fn new(no_progress: bool) -> Result<ProgressBar> {
        match no_progress {
            true => Ok(ProgressBar::Nop),
            false => iprogress_bar(),
        }
    }

    pub fn update(&self, report: &Report) {
        if let ProgressBar::Visual(pb) = self {
            pb.set_position((report.fraction * BAR_SCALE as f64) as u64);
            let msg = match &report.detail {
                Some(dir) => format!("{} • {}", report.headline, abbreviate(dir, 48)),
                None => report.headline.clone(),
            };
            pb.set_message(msg);
        }
    }

    pub fn end(&self) {
        if let ProgressBar::Visual(pb) = self {
            pb.finish();
        }
    }
}

fn iprogress_bar() -> Result<ProgressBar> {
    let ipb = indicatif::ProgressBar::new(BAR_SCALE).with_style(
        indicatif::ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:>3}% {msg}")?
            .progress_chars("#>-"),
    );
    Ok(ProgressBar::Visual(ipb))
}

/// Shorten a path for one status line, keeping the tail: the basename
/// is what tells the user where the walk currently is.
pub fn abbreviate(path: &str, budget: usize) -> String {
    let budget = budget.min(width_budget());
    if path.len() <= budget {
        return path.to_string();
    }
    if budget <= 3 {
        return ".".repeat(budget);
    }
    let tail: String = path
        .chars()
        .rev()
        .take(budget - 3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{}", tail)
}

fn width_budget() -> usize {
    match terminal_size::terminal_size() {
        Some((terminal_size::Width(w), _)) => (w as usize).saturating_sub(30).max(10),
        None => 48,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_paths_pass_through() {
        assert_eq!(abbreviate("/home/alice", 48), "/home/alice");
    }

    #[test]
    fn long_paths_keep_their_tail() {
        let long = "/home/alice/some/deeply/nested/folder/with/content";
        let out = abbreviate(long, 20);
        assert!(out.starts_with("..."));
        assert!(out.ends_with("with/content"));
        assert!(out.len() <= 20);
    }
}
