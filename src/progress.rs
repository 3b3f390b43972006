// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Terminal progress indicators for the pipeline phases.
///
/// Spinners are drawn only on a terminal; every item is also reported through
/// `tracing` so non-interactive runs keep a complete log.
use indicatif::{ProgressBar, ProgressStyle};

const SPINNER_TEMPLATE: &str = "{spinner:.yellow} [{elapsed_precise}] {prefix} {pos}/{len} {msg}";

/// Creates a spinner for a phase processing `total` items.
pub fn phase(prefix: &'static str, total: usize,) -> ProgressBar
{
    let style = ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE,)
        .unwrap_or_else(|_| ProgressStyle::default_spinner(),);

    let pb = ProgressBar::new(total as u64,);
    pb.set_style(style,);
    pb.set_prefix(prefix,);
    pb
}
