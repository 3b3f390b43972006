// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Run configuration assembled once at startup.
//!
//! Raw values arrive through [`RunSettings`] (populated by the CLI from flags
//! and environment variables). [`RunConfig::from_settings`] validates them
//! and produces the immutable value object every pipeline component borrows.
//! External parameters are held in a sorted map so that the compiler
//! invocation for a template never depends on insertion order.

use std::{
    collections::BTreeMap,
    fs,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

/// External parameter key that always carries the datasource identifier.
pub const DATASOURCE_PARAM: &str = "datasource";
/// Directory below the repository root that holds the template library.
pub const DEFAULT_TEMPLATES_DIR: &str = "dashboards";
/// Directory below the repository root receiving compiled dashboards.
pub const DEFAULT_OUTPUT_DIR: &str = "build";
pub const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000";
pub const DEFAULT_DATASOURCE: &str = "prometheus";
pub const DEFAULT_IMAGE: &str = "dashbuild-jsonnet:latest";
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

static PARAM_KEY: LazyLock<Regex,> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$",).expect("valid parameter key pattern",)
},);

/// Unvalidated configuration values as supplied by the operator.
#[derive(Debug, Clone,)]
pub struct RunSettings
{
    pub root:                  PathBuf,
    pub templates_dir:         PathBuf,
    pub output_dir:            Option<PathBuf,>,
    pub grafana_url:           String,
    pub grafana_token:         Option<String,>,
    pub datasource:            String,
    pub image:                 String,
    pub container_runtime:     String,
    /// Raw `KEY=VALUE` assignments.
    pub ext_str:               Vec<String,>,
    pub params_file:           Option<PathBuf,>,
    pub command_timeout_secs:  u64,
    pub http_timeout_secs:     u64,
    pub stop_on_first_failure: bool,
}

impl Default for RunSettings
{
    fn default() -> Self
    {
        Self {
            root:                  PathBuf::from(".",),
            templates_dir:         PathBuf::from(DEFAULT_TEMPLATES_DIR,),
            output_dir:            None,
            grafana_url:           DEFAULT_GRAFANA_URL.to_owned(),
            grafana_token:         None,
            datasource:            DEFAULT_DATASOURCE.to_owned(),
            image:                 DEFAULT_IMAGE.to_owned(),
            container_runtime:     DEFAULT_CONTAINER_RUNTIME.to_owned(),
            ext_str:               Vec::new(),
            params_file:           None,
            command_timeout_secs:  DEFAULT_COMMAND_TIMEOUT_SECS,
            http_timeout_secs:     DEFAULT_HTTP_TIMEOUT_SECS,
            stop_on_first_failure: true,
        }
    }
}

/// Validated, immutable configuration shared by every pipeline step.
#[derive(Debug, Clone,)]
pub struct RunConfig
{
    root:                  PathBuf,
    templates_dir:         PathBuf,
    output_dir:            PathBuf,
    grafana_url:           Url,
    grafana_token:         Option<String,>,
    params:                ExternalParams,
    image:                 String,
    container_runtime:     String,
    command_timeout:       Duration,
    http_timeout:          Duration,
    stop_on_first_failure: bool,
}

impl RunConfig
{
    /// Validates raw settings and resolves every path against the repository
    /// root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the repository root cannot be resolved,
    /// [`Error::Parse`] when the parameters file is malformed and
    /// [`Error::Validation`] for any other invalid value.
    pub fn from_settings(settings: RunSettings,) -> Result<Self, Error,>
    {
        let root = fs::canonicalize(&settings.root,)
            .map_err(|source| error::io_error(&settings.root, source,),)?;

        let templates_dir = if settings.templates_dir.is_absolute() {
            settings.templates_dir
        } else {
            root.join(&settings.templates_dir,)
        };
        let escapes = templates_dir.components().any(|part| part == Component::ParentDir,);
        if escapes || !templates_dir.starts_with(&root,) {
            return Err(Error::validation(format!(
                "template directory {} must live inside the repository root {}",
                templates_dir.display(),
                root.display()
            ),),);
        }

        let output_dir = match settings.output_dir {
            Some(dir,) if dir.is_absolute() => dir,
            Some(dir,) => root.join(dir,),
            None => root.join(DEFAULT_OUTPUT_DIR,),
        };

        let grafana_url = parse_base_url(&settings.grafana_url,)?;

        let grafana_token = settings
            .grafana_token
            .map(|token| token.trim().to_owned(),)
            .filter(|token| !token.is_empty(),);

        let datasource = settings.datasource.trim();
        if datasource.is_empty() {
            return Err(Error::validation("datasource must not be empty",),);
        }

        let mut params = ExternalParams::default();
        params.insert(DATASOURCE_PARAM, datasource,)?;
        if let Some(path,) = settings.params_file.as_deref() {
            for (key, value,) in load_params_file(path,)? {
                params.insert(&key, &value,)?;
            }
        }
        for assignment in &settings.ext_str {
            let (key, value,) = parse_assignment(assignment,)?;
            params.insert(key, value,)?;
        }

        if settings.image.trim().is_empty() {
            return Err(Error::validation("container image must not be empty",),);
        }
        if settings.container_runtime.trim().is_empty() {
            return Err(Error::validation("container runtime must not be empty",),);
        }
        if settings.command_timeout_secs == 0 || settings.http_timeout_secs == 0 {
            return Err(Error::validation("timeouts must be at least one second",),);
        }

        Ok(Self {
            root,
            templates_dir,
            output_dir,
            grafana_url,
            grafana_token,
            params,
            image: settings.image.trim().to_owned(),
            container_runtime: settings.container_runtime.trim().to_owned(),
            command_timeout: Duration::from_secs(settings.command_timeout_secs,),
            http_timeout: Duration::from_secs(settings.http_timeout_secs,),
            stop_on_first_failure: settings.stop_on_first_failure,
        },)
    }

    /// Absolute repository root; mounted into the container in fallback mode.
    pub fn root(&self,) -> &Path
    {
        &self.root
    }

    /// Directory scanned for templates, also the template library root.
    pub fn templates_dir(&self,) -> &Path
    {
        &self.templates_dir
    }

    pub fn output_dir(&self,) -> &Path
    {
        &self.output_dir
    }

    /// Token for the dashboard server. `None` selects compile-only mode.
    pub fn grafana_token(&self,) -> Option<&str,>
    {
        self.grafana_token.as_deref()
    }

    pub fn params(&self,) -> &ExternalParams
    {
        &self.params
    }

    pub fn image(&self,) -> &str
    {
        &self.image
    }

    pub fn container_runtime(&self,) -> &str
    {
        &self.container_runtime
    }

    pub fn command_timeout(&self,) -> Duration
    {
        self.command_timeout
    }

    pub fn http_timeout(&self,) -> Duration
    {
        self.http_timeout
    }

    pub fn stop_on_first_failure(&self,) -> bool
    {
        self.stop_on_first_failure
    }

    /// Full URL of the dashboard upsert endpoint.
    pub fn upsert_endpoint(&self,) -> String
    {
        format!("{}/api/dashboards/db", self.grafana_url.as_str().trim_end_matches('/'))
    }
}

/// Named string values injected into every template at compile time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize,)]
#[serde(transparent)]
pub struct ExternalParams(BTreeMap<String, String,>,);

impl ExternalParams
{
    /// Adds a parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the key is malformed or already
    /// present.
    pub fn insert(&mut self, key: &str, value: &str,) -> Result<(), Error,>
    {
        if !PARAM_KEY.is_match(key,) {
            return Err(Error::validation(format!("invalid external parameter name '{key}'"),),);
        }
        if self.0.contains_key(key,) {
            return Err(Error::validation(format!(
                "external parameter '{key}' is defined more than once"
            ),),);
        }
        self.0.insert(key.to_owned(), value.to_owned(),);
        Ok((),)
    }

    pub fn get(&self, key: &str,) -> Option<&str,>
    {
        self.0.get(key,).map(String::as_str,)
    }

    /// Iterates in sorted key order.
    pub fn iter(&self,) -> impl Iterator<Item = (&str, &str,),>
    {
        self.0.iter().map(|(key, value,)| (key.as_str(), value.as_str(),),)
    }
}

/// Splits a `KEY=VALUE` assignment at the first `=`.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the separator is missing.
pub fn parse_assignment(raw: &str,) -> Result<(&str, &str,), Error,>
{
    raw.split_once('=',)
        .map(|(key, value,)| (key.trim(), value,),)
        .ok_or_else(|| Error::validation(format!("expected KEY=VALUE, got '{raw}'"),),)
}

/// Parameters file layout.
///
/// ```yaml
/// params:
///   cluster: production
///   refresh: 30s
/// ```
#[derive(Debug, Deserialize, Default,)]
#[serde(deny_unknown_fields)]
struct ParamsDocument
{
    #[serde(default, deserialize_with = "deserialize_scalar_map")]
    params: BTreeMap<String, String,>,
}

/// Reads extra external parameters from a YAML file.
///
/// # Errors
///
/// Returns [`Error::Io`] when the file cannot be read and [`Error::Parse`]
/// when it is not a mapping of scalar values.
pub fn load_params_file(path: &Path,) -> Result<BTreeMap<String, String,>, Error,>
{
    let contents = fs::read_to_string(path,).map_err(|source| error::io_error(path, source,),)?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new(),);
    }
    let document: ParamsDocument = serde_yaml::from_str(&contents,)?;
    Ok(document.params,)
}

fn deserialize_scalar_map<'de, D,>(deserializer: D,) -> Result<BTreeMap<String, String,>, D::Error,>
where
    D: serde::Deserializer<'de,>,
{
    let raw: BTreeMap<String, serde_yaml::Value,> = BTreeMap::deserialize(deserializer,)?;
    raw.into_iter()
        .map(|(key, value,)| {
            let text = match value {
                serde_yaml::Value::String(text,) => text,
                serde_yaml::Value::Number(number,) => number.to_string(),
                serde_yaml::Value::Bool(flag,) => flag.to_string(),
                _ => {
                    return Err(serde::de::Error::custom(format!(
                        "params.{key} must be a string, number or boolean"
                    ),),);
                }
            };
            Ok((key, text,),)
        },)
        .collect()
}

fn parse_base_url(raw: &str,) -> Result<Url, Error,>
{
    let url = Url::parse(raw.trim(),)
        .map_err(|e| Error::validation(format!("invalid dashboard server URL '{raw}': {e}"),),)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation(format!(
            "dashboard server URL must use http or https, got '{}'",
            url.scheme()
        ),),);
    }
    Ok(url,)
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use proptest::prelude::*;
    use tempfile::tempdir;

    use super::*;

    fn settings_in(root: &Path,) -> RunSettings
    {
        RunSettings {
            root: root.to_path_buf(), ..RunSettings::default()
        }
    }

    #[test]
    fn defaults_resolve_against_root()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let config = RunConfig::from_settings(settings_in(temp.path(),),).expect("valid config",);

        let root = fs::canonicalize(temp.path(),).expect("canonical root",);
        assert_eq!(config.root(), root);
        assert_eq!(config.templates_dir(), root.join("dashboards"));
        assert_eq!(config.output_dir(), root.join("build"));
        assert_eq!(config.grafana_token(), None);
        assert_eq!(config.params().get(DATASOURCE_PARAM), Some("prometheus"));
        assert_eq!(config.image(), DEFAULT_IMAGE);
        assert!(config.stop_on_first_failure());
    }

    #[test]
    fn blank_token_means_compile_only()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            grafana_token: Some("   ".to_owned(),), ..settings_in(temp.path(),)
        };
        let config = RunConfig::from_settings(settings,).expect("valid config",);
        assert!(config.grafana_token().is_none());
    }

    #[test]
    fn upsert_endpoint_handles_trailing_slash()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            grafana_url: "https://grafana.example.com/".to_owned(), ..settings_in(temp.path(),)
        };
        let config = RunConfig::from_settings(settings,).expect("valid config",);
        assert_eq!(config.upsert_endpoint(), "https://grafana.example.com/api/dashboards/db");
    }

    #[test]
    fn rejects_non_http_url()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            grafana_url: "ftp://grafana".to_owned(), ..settings_in(temp.path(),)
        };
        let error = RunConfig::from_settings(settings,).expect_err("ftp must be rejected",);
        assert!(matches!(error, Error::Validation { .. }));
    }

    #[test]
    fn rejects_missing_root()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let error = RunConfig::from_settings(settings_in(&temp.path().join("absent",),),)
            .expect_err("missing root must fail",);
        assert!(matches!(error, Error::Io { .. }));
    }

    #[test]
    fn relative_output_dir_is_joined_onto_root()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            output_dir: Some(PathBuf::from("out/dashboards",),), ..settings_in(temp.path(),)
        };
        let config = RunConfig::from_settings(settings,).expect("valid config",);

        let root = fs::canonicalize(temp.path(),).expect("canonical root",);
        assert_eq!(config.output_dir(), root.join("out/dashboards"));

        let absolute = temp.path().join("elsewhere",);
        let settings = RunSettings {
            output_dir: Some(absolute.clone(),), ..settings_in(temp.path(),)
        };
        let config = RunConfig::from_settings(settings,).expect("valid config",);
        assert_eq!(config.output_dir(), absolute);
    }

    #[test]
    fn rejects_templates_outside_root()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            templates_dir: PathBuf::from("../elsewhere",), ..settings_in(temp.path(),)
        };
        let error = RunConfig::from_settings(settings,).expect_err("escape must be rejected",);
        assert!(matches!(error, Error::Validation { .. }));
    }

    #[test]
    fn rejects_zero_timeout()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            command_timeout_secs: 0, ..settings_in(temp.path(),)
        };
        assert!(RunConfig::from_settings(settings,).is_err());
    }

    #[test]
    fn ext_str_assignments_are_merged_in_sorted_order()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            ext_str: vec!["zone=eu-west".to_owned(), "cluster=prod=1".to_owned()],
            ..settings_in(temp.path(),)
        };
        let config = RunConfig::from_settings(settings,).expect("valid config",);
        let keys: Vec<&str,> = config.params().iter().map(|(key, _,)| key,).collect();
        assert_eq!(keys, vec!["cluster", "datasource", "zone"]);
        assert_eq!(config.params().get("cluster"), Some("prod=1"));
    }

    #[test]
    fn datasource_cannot_be_redefined()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let settings = RunSettings {
            ext_str: vec!["datasource=other".to_owned()], ..settings_in(temp.path(),)
        };
        let error = RunConfig::from_settings(settings,).expect_err("duplicate must fail",);
        match error {
            Error::Validation {
                message,
            } => assert!(message.contains("more than once")),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn assignment_requires_separator()
    {
        assert!(parse_assignment("novalue").is_err());
        assert_eq!(parse_assignment("key=").expect("empty value allowed"), ("key", ""));
    }

    #[test]
    fn params_file_accepts_scalars()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("params.yaml",);
        fs::write(&path, "params:\n  cluster: prod\n  replicas: 3\n  debug: true\n",)
            .expect("failed to write params",);

        let params = load_params_file(&path,).expect("valid params",);
        assert_eq!(params.get("cluster").map(String::as_str), Some("prod"));
        assert_eq!(params.get("replicas").map(String::as_str), Some("3"));
        assert_eq!(params.get("debug").map(String::as_str), Some("true"));
    }

    #[test]
    fn params_file_rejects_nested_values()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("params.yaml",);
        fs::write(&path, "params:\n  nested:\n    a: b\n",).expect("failed to write params",);

        let error = load_params_file(&path,).expect_err("nested values must fail",);
        assert!(matches!(error, Error::Parse { .. }));
    }

    #[test]
    fn params_file_and_ext_str_cannot_overlap()
    {
        let temp = tempdir().expect("failed to create tempdir",);
        let path = temp.path().join("params.yaml",);
        fs::write(&path, "params:\n  cluster: prod\n",).expect("failed to write params",);
        let settings = RunSettings {
            params_file: Some(path,),
            ext_str: vec!["cluster=staging".to_owned()],
            ..settings_in(temp.path(),)
        };
        assert!(RunConfig::from_settings(settings,).is_err());
    }

    proptest! {
        #[test]
        fn generated_identifiers_are_accepted(key in "[A-Za-z_][A-Za-z0-9_]{0,24}") {
            let mut params = ExternalParams::default();
            prop_assert!(params.insert(&key, "value").is_ok());
        }

        #[test]
        fn keys_with_whitespace_or_equals_are_rejected(
            prefix in "[a-z]{1,8}",
            bad in "[ =\t]",
            suffix in "[a-z]{0,8}",
        ) {
            let mut params = ExternalParams::default();
            let key = format!("{prefix}{bad}{suffix}");
            prop_assert!(params.insert(&key, "value").is_err());
        }
    }
}
