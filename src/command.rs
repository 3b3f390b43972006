// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Typed descriptors for external tool invocations.
///
/// Every external call (compiler, dependency manager, container runtime) is
/// described by a [`CommandSpec`] and executed through a [`CommandRunner`].
/// Arguments are kept as a list and handed to the operating system as-is, so
/// no value is ever interpolated into a shell string.
use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use serde::Serialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::error::Error;

/// Executable, argument list and working directory of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct CommandSpec
{
    /// Program looked up on `PATH`.
    pub program:     String,
    /// Arguments passed verbatim.
    pub args:        Vec<String,>,
    /// Directory the program runs in.
    pub working_dir: PathBuf,
    /// Invocation run after this one exceeds the time limit, e.g. to stop a
    /// container the killed client left behind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_timeout:  Option<Box<CommandSpec,>,>,
}

impl CommandSpec
{
    /// Creates a descriptor without arguments.
    pub fn new(program: impl Into<String,>, working_dir: impl Into<PathBuf,>,) -> Self
    {
        Self {
            program:     program.into(),
            args:        Vec::new(),
            working_dir: working_dir.into(),
            on_timeout:  None,
        }
    }

    /// Appends a single argument.
    pub fn arg(mut self, value: impl Into<String,>,) -> Self
    {
        self.args.push(value.into(),);
        self
    }

    /// Appends several arguments in order.
    pub fn args<I, S,>(mut self, values: I,) -> Self
    where
        I: IntoIterator<Item = S,>,
        S: Into<String,>,
    {
        self.args.extend(values.into_iter().map(Into::into,),);
        self
    }

    /// Registers the invocation to run when this one times out.
    pub fn cleanup_on_timeout(mut self, cleanup: CommandSpec,) -> Self
    {
        self.on_timeout = Some(Box::new(cleanup,),);
        self
    }

    /// Renders the invocation for log output only.
    pub fn display_line(&self,) -> String
    {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ',);
            line.push_str(arg,);
        }
        line
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq,)]
pub struct CommandOutput
{
    /// Exit code, `None` when the process was terminated by a signal.
    pub status: Option<i32,>,
    /// Standard output decoded lossily as UTF-8.
    pub stdout: String,
    /// Standard error decoded lossily as UTF-8.
    pub stderr: String,
}

impl CommandOutput
{
    /// Returns `true` when the process exited with status zero.
    pub fn success(&self,) -> bool
    {
        self.status == Some(0,)
    }

    /// Picks the most useful diagnostic text for an unsuccessful run.
    pub fn diagnostic(&self,) -> String
    {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_owned();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_owned();
        }
        match self.status {
            Some(code,) => format!("exited with status {code}"),
            None => "terminated by signal".to_owned(),
        }
    }
}

/// Executes command descriptors.
///
/// The production implementation is [`ProcessRunner`]; tests substitute a
/// scripted runner.
pub trait CommandRunner
{
    /// Runs the command to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] when the program cannot be started and
    /// [`Error::Timeout`] when it exceeds the runner's limit. A non-zero exit
    /// status is not an error at this layer. After a timeout the registered
    /// [`CommandSpec::on_timeout`] invocation, if any, is run once.
    fn run(&self, spec: &CommandSpec,) -> impl Future<Output = Result<CommandOutput, Error,>,>;
}

/// Spawns real processes with a bounded wall-clock limit.
#[derive(Debug, Clone,)]
pub struct ProcessRunner
{
    limit: Duration,
}

impl ProcessRunner
{
    /// Creates a runner that kills any process running longer than `limit`.
    pub fn new(limit: Duration,) -> Self
    {
        Self {
            limit,
        }
    }

    async fn execute(&self, spec: &CommandSpec,) -> Result<CommandOutput, Error,>
    {
        debug!("running `{}` in {}", spec.display_line(), spec.working_dir.display());

        let child = Command::new(&spec.program,)
            .args(&spec.args,)
            .current_dir(&spec.working_dir,)
            .stdin(Stdio::null(),)
            .stdout(Stdio::piped(),)
            .stderr(Stdio::piped(),)
            .kill_on_drop(true,)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: spec.program.clone(), source,
            },)?;

        let output = match timeout(self.limit, child.wait_with_output(),).await {
            Ok(result,) => result.map_err(|source| Error::Spawn {
                program: spec.program.clone(), source,
            },)?,
            Err(_,) => {
                return Err(Error::Timeout {
                    program: spec.program.clone(), seconds: self.limit.as_secs(),
                },);
            }
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout,).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr,).into_owned(),
        },)
    }
}

impl CommandRunner for ProcessRunner
{
    async fn run(&self, spec: &CommandSpec,) -> Result<CommandOutput, Error,>
    {
        let result = self.execute(spec,).await;

        if let (Err(Error::Timeout { .. },), Some(cleanup,),) = (&result, spec.on_timeout.as_deref(),)
        {
            warn!("`{}` timed out, running `{}`", spec.program, cleanup.display_line());
            if let Err(error,) = self.execute(cleanup,).await {
                warn!("cleanup after timeout failed: {}", error.to_display_string());
            }
        }

        result
    }
}

/// Expresses `path` relative to `base`, falling back to the path itself.
pub fn relative_to(path: &Path, base: &Path,) -> PathBuf
{
    path.strip_prefix(base,).map(Path::to_path_buf,).unwrap_or_else(|_| path.to_path_buf(),)
}

#[cfg(test)]
mod tests
{
    use std::{path::Path, time::Duration};

    use super::*;

    #[test]
    fn builder_keeps_argument_order()
    {
        let spec = CommandSpec::new("jsonnet", "/repo/dashboards",)
            .args(["-J", "vendor",],)
            .arg("node.jsonnet",);

        assert_eq!(spec.program, "jsonnet");
        assert_eq!(spec.args, vec!["-J", "vendor", "node.jsonnet"]);
        assert_eq!(spec.working_dir, Path::new("/repo/dashboards"));
        assert_eq!(spec.display_line(), "jsonnet -J vendor node.jsonnet");
    }

    #[test]
    fn arguments_with_spaces_stay_single_entries()
    {
        let spec = CommandSpec::new("jsonnet", ".",).arg("datasource=My Prom; rm -rf /",);
        assert_eq!(spec.args.len(), 1);
    }

    #[test]
    fn diagnostic_prefers_stderr()
    {
        let output = CommandOutput {
            status: Some(1,),
            stdout: "partial".to_owned(),
            stderr: "  RUNTIME ERROR: oops \n".to_owned(),
        };
        assert!(!output.success());
        assert_eq!(output.diagnostic(), "RUNTIME ERROR: oops");
    }

    #[test]
    fn diagnostic_falls_back_to_status()
    {
        let output = CommandOutput {
            status: Some(3,), ..CommandOutput::default()
        };
        assert_eq!(output.diagnostic(), "exited with status 3");

        let signalled = CommandOutput::default();
        assert_eq!(signalled.diagnostic(), "terminated by signal");
    }

    #[test]
    fn relative_to_strips_base()
    {
        let relative = relative_to(Path::new("/repo/dashboards/a.jsonnet",), Path::new("/repo",),);
        assert_eq!(relative, Path::new("dashboards/a.jsonnet"));

        let unrelated = relative_to(Path::new("/other/a.jsonnet",), Path::new("/repo",),);
        assert_eq!(unrelated, Path::new("/other/a.jsonnet"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_captures_output_and_status()
    {
        let runner = ProcessRunner::new(Duration::from_secs(10,),);
        let spec = CommandSpec::new("sh", ".",).args(["-c", "echo out; echo err >&2; exit 4",],);

        let output = runner.run(&spec,).await.expect("sh should start",);
        assert_eq!(output.status, Some(4));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_enforces_time_limit()
    {
        let runner = ProcessRunner::new(Duration::from_millis(200,),);
        let spec = CommandSpec::new("sleep", ".",).arg("5",);

        let error = runner.run(&spec,).await.expect_err("sleep should time out",);
        assert!(matches!(error, Error::Timeout { ref program, .. } if program == "sleep"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timed_out_command_runs_its_cleanup()
    {
        let temp = tempfile::tempdir().expect("failed to create tempdir",);
        let marker = temp.path().join("killed",);
        let runner = ProcessRunner::new(Duration::from_millis(200,),);
        let spec = CommandSpec::new("sleep", ".",).arg("5",).cleanup_on_timeout(
            CommandSpec::new("touch", ".",).arg(marker.display().to_string(),),
        );

        let error = runner.run(&spec,).await.expect_err("sleep should time out",);
        assert!(matches!(error, Error::Timeout { .. }));
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cleanup_is_skipped_when_command_finishes()
    {
        let temp = tempfile::tempdir().expect("failed to create tempdir",);
        let marker = temp.path().join("killed",);
        let runner = ProcessRunner::new(Duration::from_secs(10,),);
        let spec = CommandSpec::new("true", ".",).cleanup_on_timeout(
            CommandSpec::new("touch", ".",).arg(marker.display().to_string(),),
        );

        runner.run(&spec,).await.expect("true should run",);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn process_runner_reports_missing_program()
    {
        let runner = ProcessRunner::new(Duration::from_secs(1,),);
        let spec = CommandSpec::new("dashbuild-definitely-missing-tool", ".",);

        let error = runner.run(&spec,).await.expect_err("program should be missing",);
        assert!(matches!(error, Error::Spawn { .. }));
    }
}
