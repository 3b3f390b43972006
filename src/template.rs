// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Discovery of dashboard templates.
///
/// Templates are the `*.jsonnet` files placed directly in the template
/// library directory. Library helpers (`*.libsonnet`) and the vendored
/// dependency tree are never treated as templates.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{self, Error};

/// File suffix that marks a dashboard template.
pub const TEMPLATE_SUFFIX: &str = ".jsonnet";

/// A dashboard template discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct Template
{
    /// Name derived from the file stem; keys the output file.
    pub name: String,
    /// Absolute path to the template source.
    pub path: PathBuf,
}

impl Template
{
    /// Builds a template descriptor from a candidate path.
    ///
    /// Returns `None` when the file name does not follow the template naming
    /// convention.
    pub fn from_path(path: &Path,) -> Option<Self,>
    {
        let file_name = path.file_name()?.to_str()?;
        let name = file_name.strip_suffix(TEMPLATE_SUFFIX,)?;
        if name.is_empty() || name.starts_with('.',) {
            return None;
        }

        Some(Self {
            name: name.to_owned(), path: path.to_path_buf(),
        },)
    }

    /// File name of the compiled document, `<name>.json`.
    pub fn output_file_name(&self,) -> String
    {
        format!("{}.json", self.name)
    }
}

/// Scans `directory` for templates and returns them in file-name order.
///
/// # Errors
///
/// Returns [`Error::NoTemplates`] when the directory is missing or contains
/// no template, and [`Error::Io`] for any other filesystem failure.
pub fn discover_templates(directory: &Path,) -> Result<Vec<Template,>, Error,>
{
    let entries = match fs::read_dir(directory,) {
        Ok(entries,) => entries,
        Err(source,) if source.kind() == ErrorKind::NotFound => {
            return Err(Error::NoTemplates {
                directory: directory.to_path_buf(),
            },);
        }
        Err(source,) => return Err(error::io_error(directory, source,),),
    };

    let mut templates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| error::io_error(directory, source,),)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| error::io_error(&path, source,),)?;
        let is_file = if file_type.is_symlink() {
            match fs::metadata(&path,) {
                Ok(target,) => target.is_file(),
                Err(source,) => {
                    warn!("skipping unresolvable link {}: {source}", path.display());
                    continue;
                }
            }
        } else {
            file_type.is_file()
        };
        if !is_file {
            continue;
        }
        if path.file_name().and_then(|name| name.to_str(),).is_none() {
            warn!("skipping file with a non-UTF-8 name: {}", path.display());
            continue;
        }

        match Template::from_path(&path,) {
            Some(template,) => templates.push(template,),
            None => debug!("ignoring non-template file {}", path.display()),
        }
    }

    if templates.is_empty() {
        return Err(Error::NoTemplates {
            directory: directory.to_path_buf(),
        },);
    }

    templates.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name(),),);
    Ok(templates,)
}
