//! Build-and-deploy pipeline for jsonnet dashboard templates.
//!
//! The library discovers dashboard templates, compiles each one with
//! `jsonnet` (natively or inside a container when the tools are missing) and
//! optionally publishes the compiled documents to a Grafana-compatible
//! dashboard server, reporting success or failure per dashboard. Every phase
//! runs sequentially so upload order and log output stay deterministic.

pub mod command;
pub mod compile;
pub mod config;
mod error;
pub mod install;
pub mod pipeline;
mod progress;
pub mod publish;
pub mod template;
pub mod toolchain;

pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use compile::{CompileError, CompileReport, CompiledDashboard, compile, compile_all};
pub use config::{ExternalParams, RunConfig, RunSettings};
pub use error::{Error, io_error};
pub use install::install;
pub use pipeline::{Pipeline, PublishPhase, RunReport};
pub use publish::{
    DashboardEnvelope, DashboardTransport, HttpReply, HttpTransport, PublishResult, PublishStatus,
    Publisher,
};
pub use template::{Template, discover_templates};
pub use toolchain::{Toolchain, ToolchainMode, on_path, resolve};
