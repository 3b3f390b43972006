// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Installs the template library's declared dependencies.
///
/// Runs `jb install` from the library root so the `vendor/` tree exists
/// before any template is compiled.
use tracing::info;

use crate::{
    command::CommandRunner,
    error::Error,
    toolchain::{PACKAGE_MANAGER, Toolchain},
};

/// Fetches dependencies through the selected toolchain.
///
/// # Errors
///
/// Returns [`Error::Install`] when the installer exits unsuccessfully and
/// propagates runner failures (spawn errors, timeouts). Every failure is
/// fatal for the run.
pub async fn install<R,>(toolchain: &Toolchain, runner: &R,) -> Result<(), Error,>
where
    R: CommandRunner,
{
    let command = toolchain.command(toolchain.tool(PACKAGE_MANAGER,).arg("install",),);
    info!(
        "installing dependencies in {} ({})",
        toolchain.library_dir().display(),
        toolchain.mode().label()
    );

    let output = runner.run(&command,).await?;
    if !output.success() {
        return Err(Error::Install {
            message: output.diagnostic(),
        },);
    }

    info!("✓ dependencies installed");
    Ok((),)
}
