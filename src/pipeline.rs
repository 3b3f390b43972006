// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Pipeline driver.
//!
//! Runs the phases strictly in order: discover templates, resolve the
//! toolchain, install dependencies, compile every template, then publish the
//! compiled dashboards when a token is configured. Fatal conditions abort the
//! run as an `Err`; per-item failures are collected in the [`RunReport`],
//! which decides the final exit status.

use std::{fs, path::Path};

use serde::Serialize;
use tracing::info;

use crate::{
    command::CommandRunner,
    compile::{CompileError, CompiledDashboard, compile_all, compile_failure},
    config::RunConfig,
    error::{self, Error},
    install::install,
    publish::{DashboardTransport, PublishResult, Publisher},
    template::discover_templates,
    toolchain::{Toolchain, ToolchainMode},
};

/// Outcome of the publish phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublishPhase
{
    /// No token configured; nothing was sent.
    Skipped,
    /// Dashboards were sent in order; stops early on failure when fail-fast.
    Attempted
    {
        results: Vec<PublishResult,>,
    },
}

/// Aggregated result of a pipeline run.
#[derive(Debug, Serialize,)]
pub struct RunReport
{
    pub mode:             ToolchainMode,
    pub templates:        usize,
    pub compiled:         Vec<CompiledDashboard,>,
    pub compile_failures: Vec<CompileError,>,
    pub publish:          PublishPhase,
}

impl RunReport
{
    /// Number of dashboards the server accepted.
    pub fn published(&self,) -> usize
    {
        match &self.publish {
            PublishPhase::Skipped => 0,
            PublishPhase::Attempted {
                results,
            } => results.iter().filter(|r| r.success,).count(),
        }
    }

    fn first_publish_failure(&self,) -> Option<&PublishResult,>
    {
        match &self.publish {
            PublishPhase::Skipped => None,
            PublishPhase::Attempted {
                results,
            } => results.iter().find(|r| !r.success,),
        }
    }

    /// `true` when every template compiled and every attempted publish
    /// succeeded (or publishing was skipped).
    pub fn is_success(&self,) -> bool
    {
        self.compile_failures.is_empty() && self.first_publish_failure().is_none()
    }

    /// One-line human readable summary.
    pub fn summary(&self,) -> String
    {
        let compiled = format!("compiled {}/{} dashboards", self.compiled.len(), self.templates);
        match &self.publish {
            PublishPhase::Skipped => format!("{compiled}, publish skipped: no token configured"),
            PublishPhase::Attempted {
                ..
            } => format!("{compiled}, published {}", self.published()),
        }
    }

    /// Turns collected failures into the run's terminal error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compile`] when any template failed, otherwise
    /// [`Error::Publish`] for the first failed upload.
    pub fn into_result(self,) -> Result<Self, Error,>
    {
        if let Some(error,) = compile_failure(&self.compile_failures,) {
            return Err(error,);
        }
        if let Some(error,) = self.first_publish_failure().and_then(PublishResult::to_error,) {
            return Err(error,);
        }
        Ok(self,)
    }

    /// Writes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialize`] or [`Error::Io`] when writing fails.
    pub fn write_json(&self, path: &Path,) -> Result<(), Error,>
    {
        let json = serde_json::to_string_pretty(self,)?;
        if let Some(parent,) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent,).map_err(|source| error::io_error(parent, source,),)?;
        }
        fs::write(path, json,).map_err(|source| error::io_error(path, source,),)
    }
}

/// Sequential driver wiring the components of one run together.
pub struct Pipeline<'a, R, T, P,>
{
    config:    &'a RunConfig,
    runner:    &'a R,
    transport: &'a T,
    probe:     P,
}

impl<'a, R, T, P,> Pipeline<'a, R, T, P,>
where
    R: CommandRunner,
    T: DashboardTransport,
    P: Fn(&str,) -> bool,
{
    /// Creates a driver; `probe` reports whether an executable is on `PATH`.
    pub fn new(config: &'a RunConfig, runner: &'a R, transport: &'a T, probe: P,) -> Self
    {
        Self {
            config,
            runner,
            transport,
            probe,
        }
    }

    /// Resolves the toolchain mode without running anything.
    pub fn toolchain(&self,) -> Toolchain
    {
        Toolchain::detect(self.config, &self.probe,)
    }

    /// Executes the whole pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTemplates`] before any work when discovery finds
    /// nothing, [`Error::Toolchain`] when the container image cannot be
    /// prepared, [`Error::Install`] when dependencies cannot be fetched, and
    /// [`Error::Io`] when the output directory cannot be created. Compile and
    /// publish failures are reported through the returned [`RunReport`].
    pub async fn run(&self,) -> Result<RunReport, Error,>
    {
        let templates = discover_templates(self.config.templates_dir(),)?;
        info!(
            "discovered {} template(s) in {}",
            templates.len(),
            self.config.templates_dir().display()
        );

        let toolchain = self.toolchain();
        info!("toolchain: {}", toolchain.mode().label());
        toolchain.prepare(self.runner,).await?;

        install(&toolchain, self.runner,).await?;

        let compiled = compile_all(
            &templates,
            self.config.params(),
            &toolchain,
            self.runner,
            self.config.output_dir(),
        )
        .await?;

        let publish = match self.config.grafana_token() {
            None => {
                info!("no dashboard server token configured, skipping publish");
                PublishPhase::Skipped
            }
            Some(token,) => {
                let endpoint = self.config.upsert_endpoint();
                let publisher = Publisher::new(self.transport, &endpoint, token,);
                let results = publisher
                    .publish_all(&compiled.compiled, self.config.stop_on_first_failure(),)
                    .await;
                PublishPhase::Attempted {
                    results,
                }
            }
        };

        let report = RunReport {
            mode: toolchain.mode().clone(),
            templates: templates.len(),
            compiled: compiled.compiled,
            compile_failures: compiled.failures,
            publish,
        };
        info!("{}", report.summary());
        Ok(report,)
    }
}

#[cfg(test)]
mod tests
{
    use std::{fs, path::Path};

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::{
        command::CommandOutput,
        config::RunSettings,
        publish::tests::ScriptedTransport,
        toolchain::tests::{ScriptedRunner, exit},
    };

    fn repo(names: &[&str],) -> TempDir
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let library = temp.path().join("dashboards",);
        fs::create_dir_all(&library,).expect("mkdir",);
        for name in names {
            fs::write(library.join(format!("{name}.jsonnet"),), "{}",).expect("write",);
        }
        temp
    }

    fn config(root: &Path, token: Option<&str,>,) -> RunConfig
    {
        RunConfig::from_settings(RunSettings {
            root: root.to_path_buf(),
            grafana_token: token.map(str::to_owned,),
            ..RunSettings::default()
        },)
        .expect("valid config",)
    }

    fn doc(title: &str,) -> CommandOutput
    {
        CommandOutput {
            status: Some(0,), stdout: format!("{{\"title\":\"{title}\"}}\n"), stderr: String::new(),
        }
    }

    fn native(_: &str,) -> bool
    {
        true
    }

    #[tokio::test]
    async fn compile_only_run_without_token()
    {
        let temp = repo(&["a", "b", "c"],);
        let config = config(temp.path(), None,);
        let runner = ScriptedRunner::with_replies(vec![exit(0,), doc("a",), doc("b",), doc("c",)],);
        let transport = ScriptedTransport::default();

        let report =
            Pipeline::new(&config, &runner, &transport, native,).run().await.expect("run failed",);

        assert!(report.is_success());
        assert_eq!(report.compiled.len(), 3);
        assert_eq!(report.publish, PublishPhase::Skipped);
        assert!(transport.requests.borrow().is_empty());
        for name in ["a", "b", "c",] {
            assert!(config.output_dir().join(format!("{name}.json")).is_file());
        }
        assert_eq!(report.summary(), "compiled 3/3 dashboards, publish skipped: no token configured");
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn publishes_only_successfully_compiled_dashboards()
    {
        let temp = repo(&["first", "second"],);
        let config = config(temp.path(), Some("token",),);
        let runner = ScriptedRunner::with_replies(vec![exit(0,), doc("first",), exit(1,)],);
        let transport = ScriptedTransport::with_statuses(&[200],);

        let report =
            Pipeline::new(&config, &runner, &transport, native,).run().await.expect("run failed",);

        assert_eq!(report.compiled.len(), 1);
        assert_eq!(report.compile_failures.len(), 1);
        assert_eq!(report.compile_failures[0].template, "second");
        assert_eq!(transport.requests.borrow().len(), 1);
        assert_eq!(report.published(), 1);
        assert!(!report.is_success());
        assert!(matches!(report.into_result(), Err(Error::Compile { count: 1, .. })));
    }

    #[tokio::test]
    async fn third_publish_failure_fails_the_run()
    {
        let temp = repo(&["a", "b", "c"],);
        let config = config(temp.path(), Some("token",),);
        let runner = ScriptedRunner::with_replies(vec![exit(0,), doc("a",), doc("b",), doc("c",)],);
        let transport = ScriptedTransport::with_statuses(&[200, 200, 500],);

        let report =
            Pipeline::new(&config, &runner, &transport, native,).run().await.expect("run failed",);

        let PublishPhase::Attempted {
            results,
        } = &report.publish
        else {
            panic!("publish phase should have run");
        };
        let outcomes: Vec<bool,> = results.iter().map(|r| r.success,).collect();
        assert_eq!(outcomes, vec![true, true, false]);
        assert_eq!(results[2].detail.as_deref(), Some("{\"status\":500}"));
        assert_eq!(report.summary(), "compiled 3/3 dashboards, published 2");

        let requests = transport.requests.borrow();
        assert_eq!(requests[0].0, "http://localhost:3000/api/dashboards/db");
        assert_eq!(requests[0].1, "token");
        drop(requests);

        match report.into_result() {
            Err(Error::Publish {
                dashboard,
                detail,
                ..
            },) => {
                assert_eq!(dashboard, "c");
                assert!(detail.contains("500"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_fast_skips_remaining_dashboards()
    {
        let temp = repo(&["a", "b", "c"],);
        let config = config(temp.path(), Some("token",),);
        let runner = ScriptedRunner::with_replies(vec![exit(0,), doc("a",), doc("b",), doc("c",)],);
        let transport = ScriptedTransport::with_statuses(&[500, 200, 200],);

        let report =
            Pipeline::new(&config, &runner, &transport, native,).run().await.expect("run failed",);

        assert_eq!(transport.requests.borrow().len(), 1);
        assert_eq!(report.published(), 0);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn no_templates_aborts_before_any_work()
    {
        let temp = repo(&[],);
        let config = config(temp.path(), Some("token",),);
        let runner = ScriptedRunner::default();
        let transport = ScriptedTransport::default();

        let error = Pipeline::new(&config, &runner, &transport, native,)
            .run()
            .await
            .expect_err("run should abort",);

        assert!(matches!(error, Error::NoTemplates { .. }));
        assert!(runner.calls.borrow().is_empty());
        assert!(transport.requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn install_failure_aborts_before_compiling()
    {
        let temp = repo(&["a"],);
        let config = config(temp.path(), Some("token",),);
        let runner = ScriptedRunner::with_replies(vec![exit(1,)],);
        let transport = ScriptedTransport::default();

        let error = Pipeline::new(&config, &runner, &transport, native,)
            .run()
            .await
            .expect_err("run should abort",);

        assert!(matches!(error, Error::Install { .. }));
        assert_eq!(runner.calls.borrow().len(), 1);
        assert!(transport.requests.borrow().is_empty());
        assert!(!config.output_dir().join("a.json").exists());
    }

    #[tokio::test]
    async fn missing_tools_route_everything_through_container()
    {
        let temp = repo(&["a", "b"],);
        let config = config(temp.path(), None,);
        let runner =
            ScriptedRunner::with_replies(vec![exit(0,), exit(0,), doc("a",), doc("b",)],);
        let transport = ScriptedTransport::default();

        let report = Pipeline::new(&config, &runner, &transport, |_: &str| false,)
            .run()
            .await
            .expect("run failed",);

        assert_eq!(report.mode, ToolchainMode::Containerized {
            image: config.image().to_owned()
        });
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|call| call.program == "docker"));
        assert_eq!(calls[0].args[..2], ["image", "inspect"]);
        assert!(calls[1].args.ends_with(&["jb".to_owned(), "install".to_owned()]));
        assert!(calls[2].args.ends_with(&["a.jsonnet".to_owned()]));
        assert!(calls[3].args.ends_with(&["b.jsonnet".to_owned()]));
    }

    #[tokio::test]
    async fn report_serializes_to_json_file()
    {
        let temp = repo(&["a"],);
        let config = config(temp.path(), None,);
        let runner = ScriptedRunner::with_replies(vec![exit(0,), doc("a",)],);
        let transport = ScriptedTransport::default();

        let report =
            Pipeline::new(&config, &runner, &transport, native,).run().await.expect("run failed",);
        let path = temp.path().join("reports/run.json",);
        report.write_json(&path,).expect("write report",);

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path,).expect("read",),).expect("json",);
        assert_eq!(value["mode"]["mode"], "native");
        assert_eq!(value["templates"], 1);
        assert_eq!(value["compiled"][0]["name"], "a");
        assert_eq!(value["publish"]["state"], "skipped");
    }
}
