// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Toolchain selection and container routing.
//!
//! The pipeline needs two executables: `jsonnet` to compile templates and
//! `jb` to fetch the library dependencies. When both are on `PATH` they are
//! invoked directly; otherwise every invocation is wrapped in a container run
//! that bind-mounts the repository root. Callers always describe the logical
//! command and let [`Toolchain::command`] decide how it is executed, so both
//! modes receive identical program names and arguments.

use std::{
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    command::{CommandRunner, CommandSpec, relative_to},
    config::RunConfig,
    error::Error,
};

/// Template compiler executable.
pub const COMPILER: &str = "jsonnet";
/// Dependency manager executable.
pub const PACKAGE_MANAGER: &str = "jb";
/// Executables that must all be present for native mode.
pub const REQUIRED_TOOLS: [&str; 2] = [COMPILER, PACKAGE_MANAGER];
/// Mount point of the repository root inside the container.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

static NEXT_CONTAINER: AtomicU64 = AtomicU64::new(0,);

/// How external tools are executed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolchainMode
{
    /// Tools run directly on the host.
    Native,
    /// Tools run inside the given container image.
    Containerized
    {
        /// Image every invocation is executed in.
        image: String,
    },
}

impl ToolchainMode
{
    pub fn label(&self,) -> &'static str
    {
        match self {
            Self::Native => "native",
            Self::Containerized {
                ..
            } => "containerized",
        }
    }
}

/// Returns `true` when `program` resolves on `PATH`.
pub fn on_path(program: &str,) -> bool
{
    which::which(program,).is_ok()
}

/// Picks the toolchain mode by probing for the required executables.
///
/// Missing tools are not an error; they select containerized mode with the
/// configured image.
pub fn resolve<P,>(probe: P, image: &str,) -> ToolchainMode
where
    P: Fn(&str,) -> bool,
{
    let missing: Vec<&str,> =
        REQUIRED_TOOLS.iter().copied().filter(|tool| !probe(tool,),).collect();

    if missing.is_empty() {
        debug!("found {} on PATH", REQUIRED_TOOLS.join(", "));
        ToolchainMode::Native
    } else {
        info!("{} not found on PATH, using container image {image}", missing.join(", "));
        ToolchainMode::Containerized {
            image: image.to_owned(),
        }
    }
}

/// Resolved toolchain bound to the repository layout of one run.
#[derive(Debug, Clone,)]
pub struct Toolchain
{
    mode:          ToolchainMode,
    runtime:       String,
    root:          PathBuf,
    templates_dir: PathBuf,
}

impl Toolchain
{
    /// Resolves the mode with `probe` and binds it to the configured layout.
    pub fn detect<P,>(config: &RunConfig, probe: P,) -> Self
    where
        P: Fn(&str,) -> bool,
    {
        Self::with_mode(config, resolve(probe, config.image(),),)
    }

    pub fn with_mode(config: &RunConfig, mode: ToolchainMode,) -> Self
    {
        Self {
            mode,
            runtime: config.container_runtime().to_owned(),
            root: config.root().to_path_buf(),
            templates_dir: config.templates_dir().to_path_buf(),
        }
    }

    pub fn mode(&self,) -> &ToolchainMode
    {
        &self.mode
    }

    /// Template library root on the host.
    pub fn library_dir(&self,) -> &Path
    {
        &self.templates_dir
    }

    /// Logical invocation of a library tool, run from the library root.
    pub fn tool(&self, program: &str,) -> CommandSpec
    {
        CommandSpec::new(program, &self.templates_dir,)
    }

    /// Routes a logical invocation through the selected mode.
    ///
    /// In containerized mode the repository root is mounted at
    /// [`CONTAINER_WORKSPACE`] and the working directory is mapped to the
    /// same relative location inside the container. Each container gets a
    /// unique name and a `kill` invocation to run if it times out, since
    /// killing the runtime client does not stop the container.
    pub fn command(&self, logical: CommandSpec,) -> CommandSpec
    {
        let image = match &self.mode {
            ToolchainMode::Native => return logical,
            ToolchainMode::Containerized {
                image,
            } => image,
        };

        let relative = relative_to(&logical.working_dir, &self.root,);
        let container_dir = container_path(&relative,);
        let mount = format!("{}:{CONTAINER_WORKSPACE}", self.root.display());
        let name = format!(
            "dashbuild-{}-{}",
            process::id(),
            NEXT_CONTAINER.fetch_add(1, Ordering::Relaxed,)
        );
        let kill = CommandSpec::new(&self.runtime, &self.root,).args(["kill", name.as_str(),],);

        CommandSpec::new(&self.runtime, &self.root,)
            .args(["run", "--rm", "--init", "--name",],)
            .arg(name,)
            .arg("-v",)
            .arg(mount,)
            .arg("-w",)
            .arg(container_dir,)
            .arg(image.as_str(),)
            .arg(logical.program,)
            .args(logical.args,)
            .cleanup_on_timeout(kill,)
    }

    /// Makes sure the container image exists, building it from the library
    /// root when absent. Does nothing in native mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Toolchain`] when the build fails, and propagates
    /// runner errors such as a missing container runtime.
    pub async fn prepare<R,>(&self, runner: &R,) -> Result<(), Error,>
    where
        R: CommandRunner,
    {
        let ToolchainMode::Containerized {
            image,
        } = &self.mode
        else {
            return Ok((),);
        };

        let inspect = CommandSpec::new(&self.runtime, &self.root,)
            .args(["image", "inspect", image.as_str(),],);
        if runner.run(&inspect,).await?.success() {
            debug!("container image {image} already present");
            return Ok((),);
        }

        info!("building container image {image}");
        let build = CommandSpec::new(&self.runtime, &self.root,)
            .args(["build", "-t", image.as_str(),],)
            .arg(self.templates_dir.display().to_string(),);
        let output = runner.run(&build,).await?;
        if !output.success() {
            return Err(Error::Toolchain {
                message: format!("building image {image} failed: {}", output.diagnostic()),
            },);
        }

        Ok((),)
    }
}

fn container_path(relative: &Path,) -> String
{
    let mut path = String::from(CONTAINER_WORKSPACE,);
    for component in relative.components() {
        let segment = component.as_os_str().to_string_lossy();
        if segment.is_empty() || segment == "." {
            continue;
        }
        path.push('/',);
        path.push_str(&segment,);
    }
    path
}
