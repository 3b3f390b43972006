#![allow(non_shorthand_field_patterns)]
#![doc = "Error handling primitives shared across the dashbuild crate."]
// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! The derive emitted by [`masterror::Error`] expands pattern matches that
//! trigger the `non_shorthand_field_patterns` lint. The lint is disabled for
//! the module to keep the generated implementations warning-free.

use std::path::{Path, PathBuf};

/// Unified error type returned by the pipeline components and the CLI.
///
/// Fatal conditions (no templates, failed dependency install, failed image
/// build) surface directly as variants. Per-item failures are recorded in the
/// run report first and converted into [`Error::Compile`] or
/// [`Error::Publish`] once the run has finished.
#[derive(Debug, masterror::Error)]
pub enum Error {
    /// Wraps I/O errors raised while reading templates or writing outputs.
    #[error("I/O failure at {path:?}: {source}")]
    Io {
        /// Location that triggered the failure.
        path:   PathBuf,
        /// Underlying I/O error.
        source: std::io::Error
    },
    /// Wraps YAML decoding errors from the parameters file.
    #[error("failed to parse parameters file: {source}")]
    Parse {
        /// Source decoding error from serde_yaml.
        source: serde_yaml::Error
    },
    /// Returned when the run configuration violates invariants.
    #[error("invalid configuration: {message}")]
    Validation {
        /// Human readable message describing the validation problem.
        message: String
    },
    /// Returned when the template directory holds no templates.
    #[error("no dashboard templates found in {directory:?}")]
    NoTemplates {
        /// Directory that was scanned.
        directory: PathBuf
    },
    /// Wraps JSON serialization errors for reports and CLI output.
    #[error("failed to serialize output: {source}")]
    Serialize {
        /// Underlying serialization error.
        source: serde_json::Error
    },
    /// An external program could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error reported by the operating system.
        source:  std::io::Error
    },
    /// An external program exceeded the configured time limit.
    #[error("`{program}` did not finish within {seconds}s")]
    Timeout {
        /// Program that was killed.
        program: String,
        /// Limit that was exceeded.
        seconds: u64
    },
    /// The container image could not be prepared.
    #[error("container toolchain unavailable: {message}")]
    Toolchain {
        /// Diagnostic text from the container runtime.
        message: String
    },
    /// Dependency installation exited unsuccessfully.
    #[error("dependency install failed: {message}")]
    Install {
        /// Diagnostic text captured from the installer.
        message: String
    },
    /// One or more templates failed to compile.
    #[error("{count} template(s) failed to compile: {templates}")]
    Compile {
        /// Number of failed templates.
        count:     usize,
        /// Comma separated names of the failed templates.
        templates: String
    },
    /// A dashboard was rejected by the server or never reached it.
    #[error("failed to publish dashboard '{dashboard}' ({status}): {detail}")]
    Publish {
        /// Name of the dashboard that failed.
        dashboard: String,
        /// HTTP status code or transport marker.
        status:    String,
        /// Response body or transport diagnostic.
        detail:    String
    },
    /// The HTTP layer failed before a response was received.
    #[error("transport error: {message}")]
    Transport {
        /// Human readable description of the transport failure.
        message: String
    }
}

impl Error {
    /// Constructs a validation error from the provided displayable value.
    ///
    /// # Parameters
    ///
    /// * `message` - Human-readable description of the validation failure.
    pub fn validation<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Validation {
            message: message.into()
        }
    }

    /// Constructs a transport error from the provided displayable value.
    pub fn transport<M>(message: M) -> Self
    where
        M: Into<String>
    {
        Self::Transport {
            message: message.into()
        }
    }

    /// Formats the error for diagnostics without the variant name.
    ///
    /// The returned string matches the [`std::fmt::Display`] implementation.
    pub fn to_display_string(&self) -> String {
        format!("{self}")
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(source: serde_yaml::Error) -> Self {
        Self::Parse {
            source
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialize {
            source
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport {
            message: error.to_string()
        }
    }
}

/// Creates an [`Error::Io`] variant capturing the failing path and source.
///
/// # Parameters
///
/// * `path` - Location that triggered the error.
/// * `source` - I/O error reported by the operating system.
pub fn io_error(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source
    }
}
