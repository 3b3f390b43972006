//! Command-line interface for the dashbuild binary.
//!
//! Without a subcommand the full pipeline runs: compile every dashboard
//! template and, when a server token is configured, publish the results.
//! Every option can also be supplied through the environment variable shown
//! in `--help`.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process,
};

use clap::{ArgAction, Args, Parser, Subcommand};
use dashbuild::{
    Error, HttpTransport, Pipeline, ProcessRunner, RunConfig, RunSettings,
    config::{
        DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONTAINER_RUNTIME, DEFAULT_DATASOURCE,
        DEFAULT_GRAFANA_URL, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_IMAGE, DEFAULT_TEMPLATES_DIR,
    },
    discover_templates, on_path, resolve,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Command line interface for compiling and publishing dashboards.
#[derive(Debug, Parser,)]
#[command(name = "dashbuild", version, about = "Compile jsonnet dashboards and publish them")]
struct Cli
{
    #[command(subcommand)]
    command: Option<Command,>,

    /// Pipeline options used when no subcommand is given.
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand,)]
enum Command
{
    /// Compile every template and publish when a token is configured.
    Run(RunArgs,),
    /// List discovered templates as JSON.
    List(ListArgs,),
    /// Print the toolchain mode that would be used.
    Toolchain(ToolchainArgs,),
}

#[derive(Debug, Args, Clone,)]
struct LayoutArgs
{
    /// Repository root; mounted into the container in fallback mode.
    #[arg(long = "root", value_name = "DIR", env = "DASHBUILD_ROOT", default_value = ".")]
    root: PathBuf,

    /// Template library directory, relative to the root.
    #[arg(
        long = "templates-dir",
        value_name = "DIR",
        env = "DASHBUILD_TEMPLATES_DIR",
        default_value = DEFAULT_TEMPLATES_DIR
    )]
    templates_dir: PathBuf,
}

#[derive(Debug, Args, Clone,)]
struct RunArgs
{
    #[command(flatten)]
    layout: LayoutArgs,

    /// Directory receiving compiled dashboards (default: <root>/build).
    #[arg(long = "output-dir", value_name = "DIR", env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf,>,

    /// Base URL of the dashboard server.
    #[arg(long = "grafana-url", value_name = "URL", env = "GRAFANA_URL", default_value = DEFAULT_GRAFANA_URL)]
    grafana_url: String,

    /// API token; publishing is skipped when absent.
    #[arg(long = "grafana-token", value_name = "TOKEN", env = "GRAFANA_TOKEN", hide_env_values = true)]
    grafana_token: Option<String,>,

    /// Datasource identifier injected into every template.
    #[arg(long = "datasource", value_name = "UID", env = "DATASOURCE", default_value = DEFAULT_DATASOURCE)]
    datasource: String,

    /// Container image used when jsonnet or jb is missing.
    #[arg(long = "image", value_name = "IMAGE", env = "JSONNET_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Container runtime executable.
    #[arg(
        long = "container-runtime",
        value_name = "PROGRAM",
        env = "CONTAINER_RUNTIME",
        default_value = DEFAULT_CONTAINER_RUNTIME
    )]
    container_runtime: String,

    /// Extra external string parameter, repeatable.
    #[arg(long = "ext-str", value_name = "KEY=VALUE", action = ArgAction::Append)]
    ext_str: Vec<String,>,

    /// YAML file with additional external parameters.
    #[arg(long = "params", value_name = "PATH", env = "DASHBUILD_PARAMS")]
    params: Option<PathBuf,>,

    /// Time limit for every external command, in seconds.
    #[arg(
        long = "command-timeout",
        value_name = "SECS",
        env = "DASHBUILD_COMMAND_TIMEOUT",
        default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS
    )]
    command_timeout: u64,

    /// Time limit for every HTTP request, in seconds.
    #[arg(
        long = "http-timeout",
        value_name = "SECS",
        env = "DASHBUILD_HTTP_TIMEOUT",
        default_value_t = DEFAULT_HTTP_TIMEOUT_SECS
    )]
    http_timeout: u64,

    /// Attempt every publish instead of stopping at the first failure.
    #[arg(long = "keep-going", action = ArgAction::SetTrue)]
    keep_going: bool,

    /// Write the run report as JSON to this path.
    #[arg(long = "report", value_name = "PATH")]
    report: Option<PathBuf,>,
}

impl RunArgs
{
    fn to_settings(&self,) -> RunSettings
    {
        RunSettings {
            root:                  self.layout.root.clone(),
            templates_dir:         self.layout.templates_dir.clone(),
            output_dir:            self.output_dir.clone(),
            grafana_url:           self.grafana_url.clone(),
            grafana_token:         self.grafana_token.clone(),
            datasource:            self.datasource.clone(),
            image:                 self.image.clone(),
            container_runtime:     self.container_runtime.clone(),
            ext_str:               self.ext_str.clone(),
            params_file:           self.params.clone(),
            command_timeout_secs:  self.command_timeout,
            http_timeout_secs:     self.http_timeout,
            stop_on_first_failure: !self.keep_going,
        }
    }
}

#[derive(Debug, Args,)]
struct ListArgs
{
    #[command(flatten)]
    layout: LayoutArgs,

    /// Output formatted JSON for easier inspection.
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pretty: bool,
}

#[derive(Debug, Args,)]
struct ToolchainArgs
{
    /// Container image used when jsonnet or jb is missing.
    #[arg(long = "image", value_name = "IMAGE", env = "JSONNET_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,
}

/// Entry point that reports errors and sets the appropriate exit status.
#[tokio::main(flavor = "current_thread")]
async fn main()
{
    init_tracing();

    if let Err(error,) = run().await {
        eprintln!("{}", error.to_display_string());
        process::exit(1,);
    }
}

fn init_tracing()
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info",),);
    tracing_subscriber::fmt()
        .with_env_filter(filter,)
        .with_writer(io::stderr,)
        .with_target(false,)
        .init();
}

/// Executes the CLI using parsed arguments.
///
/// # Errors
///
/// Propagates configuration, fatal pipeline errors and the terminal error of
/// a run with failed templates or uploads.
async fn run() -> Result<(), Error,>
{
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Run(args,),) => run_pipeline(&args,).await,
        Some(Command::List(args,),) => run_list(&args,),
        Some(Command::Toolchain(args,),) => run_toolchain(&args,),
        None => run_pipeline(&cli.run,).await,
    }
}

async fn run_pipeline(args: &RunArgs,) -> Result<(), Error,>
{
    let config = RunConfig::from_settings(args.to_settings(),)?;
    let runner = ProcessRunner::new(config.command_timeout(),);
    let transport = HttpTransport::new(config.http_timeout(),)?;

    let report = Pipeline::new(&config, &runner, &transport, on_path,).run().await?;
    println!("{}", report.summary());

    if let Some(path,) = args.report.as_deref() {
        report.write_json(path,)?;
    }

    report.into_result().map(|_| (),)
}

fn run_list(args: &ListArgs,) -> Result<(), Error,>
{
    let config = RunConfig::from_settings(RunSettings {
        root: args.layout.root.clone(),
        templates_dir: args.layout.templates_dir.clone(),
        ..RunSettings::default()
    },)?;
    let templates = discover_templates(config.templates_dir(),)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_json(&mut handle, &templates, args.pretty,)
}

fn run_toolchain(args: &ToolchainArgs,) -> Result<(), Error,>
{
    let mode = resolve(on_path, &args.image,);

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_json(&mut handle, &mode, false,)
}

fn write_json<W: io::Write, T: Serialize + ?Sized,>(
    writer: &mut W,
    value: &T,
    pretty: bool,
) -> Result<(), Error,>
{
    if pretty {
        serde_json::to_writer_pretty(&mut *writer, value,)?;
    } else {
        serde_json::to_writer(&mut *writer, value,)?;
    }
    writeln!(writer).map_err(|source| dashbuild::io_error(Path::new("<stdout>",), source,),)
}
