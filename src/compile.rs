// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Compilation of templates into dashboard documents.
//!
//! Each template is compiled in isolation with `jsonnet`, pointing the
//! include path at the vendored dependencies and passing every external
//! parameter as `--ext-str`. Standard output is the compiled document and is
//! written verbatim to `<output_dir>/<name>.json`.
//!
//! A failure for one template never stops the others: [`compile_all`]
//! attempts every template and returns the failures alongside the successes
//! so an operator sees every broken template in a single run.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{info, warn};

use crate::{
    command::{CommandRunner, CommandSpec, relative_to},
    config::ExternalParams,
    error::{self, Error},
    progress,
    template::Template,
    toolchain::{COMPILER, Toolchain},
};

/// Include path handed to the compiler, relative to the library root.
pub const VENDOR_DIR: &str = "vendor";

/// A successfully compiled template.
#[derive(Debug, Clone, Serialize,)]
pub struct CompiledDashboard
{
    /// Template name the document was compiled from.
    pub name:     String,
    /// Location of the written document.
    pub path:     PathBuf,
    /// Compiled document, kept verbatim for publishing.
    #[serde(skip)]
    pub document: Box<RawValue,>,
}

/// Compilation failure for a single template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct CompileError
{
    /// Name of the template that failed.
    pub template: String,
    /// Diagnostic text captured from the compiler.
    pub message:  String,
}

impl fmt::Display for CompileError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result
    {
        write!(f, "failed to compile {}: {}", self.template, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Outcome of the compile phase, in discovery order.
#[derive(Debug, Default, Serialize,)]
pub struct CompileReport
{
    pub compiled: Vec<CompiledDashboard,>,
    pub failures: Vec<CompileError,>,
}

impl CompileReport
{
    pub fn attempted(&self,) -> usize
    {
        self.compiled.len() + self.failures.len()
    }
}

/// Converts collected failures into a single run-level error.
pub fn compile_failure(failures: &[CompileError],) -> Option<Error,>
{
    if failures.is_empty() {
        return None;
    }
    let templates = failures.iter().map(|f| f.template.as_str(),).collect::<Vec<_,>>().join(", ",);
    Some(Error::Compile {
        count: failures.len(), templates,
    },)
}

/// Builds the logical compiler invocation for `template`.
///
/// Parameters are emitted in sorted key order, so the same template and
/// parameter set always yield the same invocation.
pub fn compiler_invocation(
    toolchain: &Toolchain,
    template: &Template,
    params: &ExternalParams,
) -> CommandSpec
{
    let mut spec = toolchain.tool(COMPILER,).args(["-J", VENDOR_DIR,],);
    for (key, value,) in params.iter() {
        spec = spec.arg("--ext-str",).arg(format!("{key}={value}"),);
    }
    let relative = relative_to(&template.path, toolchain.library_dir(),);
    spec.arg(relative.to_string_lossy().into_owned(),)
}

/// Compiles one template and writes the result to `output_dir`.
///
/// # Errors
///
/// Returns a [`CompileError`] when the compiler cannot run, exits non-zero,
/// prints nothing, prints something that is not JSON, or when the document
/// cannot be written.
pub async fn compile<R,>(
    template: &Template,
    params: &ExternalParams,
    toolchain: &Toolchain,
    runner: &R,
    output_dir: &Path,
) -> Result<CompiledDashboard, CompileError,>
where
    R: CommandRunner,
{
    let failed = |message: String| CompileError {
        template: template.name.clone(), message,
    };

    let command = toolchain.command(compiler_invocation(toolchain, template, params,),);
    let output = runner.run(&command,).await.map_err(|e| failed(e.to_display_string(),),)?;

    if !output.success() {
        return Err(failed(output.diagnostic(),),);
    }
    if output.stdout.trim().is_empty() {
        return Err(failed("compiler produced no output".to_owned(),),);
    }

    let document: Box<RawValue,> = serde_json::from_str(output.stdout.trim(),)
        .map_err(|e| failed(format!("compiler output is not valid JSON: {e}"),),)?;

    let path = output_dir.join(template.output_file_name(),);
    fs::write(&path, output.stdout.as_bytes(),)
        .map_err(|source| failed(error::io_error(&path, source,).to_display_string(),),)?;

    Ok(CompiledDashboard {
        name: template.name.clone(),
        path,
        document,
    },)
}

/// Compiles every template in order, collecting successes and failures.
///
/// # Errors
///
/// Returns [`Error::Io`] only when the output directory cannot be created;
/// per-template failures are reported in the returned [`CompileReport`].
pub async fn compile_all<R,>(
    templates: &[Template],
    params: &ExternalParams,
    toolchain: &Toolchain,
    runner: &R,
    output_dir: &Path,
) -> Result<CompileReport, Error,>
where
    R: CommandRunner,
{
    fs::create_dir_all(output_dir,).map_err(|source| error::io_error(output_dir, source,),)?;

    let pb = progress::phase("compiling", templates.len(),);
    let mut report = CompileReport::default();

    for template in templates {
        pb.set_message(template.name.clone(),);
        info!("compiling {}…", template.name);

        match compile(template, params, toolchain, runner, output_dir,).await {
            Ok(compiled,) => {
                info!("✓ {} -> {}", compiled.name, compiled.path.display());
                report.compiled.push(compiled,);
            }
            Err(failure,) => {
                warn!("✗ {failure}");
                report.failures.push(failure,);
            }
        }
        pb.inc(1,);
    }

    pb.finish_and_clear();
    info!("compiled {}/{} dashboards", report.compiled.len(), report.attempted());
    Ok(report,)
}
