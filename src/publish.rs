// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Publishing compiled dashboards to the dashboard server.
//!
//! Every document is wrapped in an upsert envelope that force-overwrites any
//! dashboard with the same identity in the root folder, then posted to the
//! server's `/api/dashboards/db` endpoint with a bearer token. Responses in
//! the `200..300` range count as success; anything else is a failure whose
//! response body is kept as diagnostic text.
//!
//! The publish loop stops at the first failure unless configured to keep
//! going. There is no retry; re-running the pipeline is safe because compiled
//! output is deterministic and uploads always overwrite.

use std::{fmt, future::Future, time::Duration};

use reqwest::Client;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

use crate::{compile::CompiledDashboard, error::Error, progress};

/// Folder id of the server's root ("General") folder.
pub const ROOT_FOLDER_ID: u64 = 0;

/// Request body accepted by the upsert endpoint.
#[derive(Debug, Serialize,)]
pub struct DashboardEnvelope<'a,>
{
    /// Compiled document, embedded without re-serialization.
    pub dashboard: &'a RawValue,
    /// Always `true`: existing dashboards are replaced.
    pub overwrite: bool,
    #[serde(rename = "folderId")]
    pub folder_id: u64,
}

impl<'a,> DashboardEnvelope<'a,>
{
    /// Wraps a compiled document for forced overwrite in the root folder.
    pub fn overwrite(dashboard: &'a RawValue,) -> Self
    {
        Self {
            dashboard, overwrite: true, folder_id: ROOT_FOLDER_ID,
        }
    }
}

/// Status line and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct HttpReply
{
    pub status: u16,
    pub body:   String,
}

/// Sends envelopes to the dashboard server.
pub trait DashboardTransport
{
    /// Posts `envelope` to `url` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when no HTTP response was received. Any
    /// response, whatever its status, is returned as `Ok`.
    fn post_dashboard(
        &self,
        url: &str,
        token: &str,
        envelope: &DashboardEnvelope<'_,>,
    ) -> impl Future<Output = Result<HttpReply, Error,>,>;
}

/// Production transport backed by a shared `reqwest` client.
#[derive(Debug, Clone,)]
pub struct HttpTransport
{
    client: Client,
}

impl HttpTransport
{
    /// Builds a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the TLS backend cannot initialise.
    pub fn new(timeout: Duration,) -> Result<Self, Error,>
    {
        let client = Client::builder()
            .timeout(timeout,)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),)
            .build()?;
        Ok(Self {
            client,
        },)
    }
}

impl DashboardTransport for HttpTransport
{
    async fn post_dashboard(
        &self,
        url: &str,
        token: &str,
        envelope: &DashboardEnvelope<'_,>,
    ) -> Result<HttpReply, Error,>
    {
        let response = self
            .client
            .post(url,)
            .bearer_auth(token,)
            .json(envelope,)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body,) => body,
            Err(error,) => format!("failed to read response body: {error}"),
        };
        Ok(HttpReply {
            status,
            body,
        },)
    }
}

/// How a single publish attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishStatus
{
    /// The server answered with this status code.
    Http
    {
        code: u16,
    },
    /// No response was received.
    Transport,
}

impl fmt::Display for PublishStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result
    {
        match self {
            Self::Http {
                code,
            } => write!(f, "HTTP {code}"),
            Self::Transport => f.write_str("transport failure",),
        }
    }
}

/// Result of publishing one dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
pub struct PublishResult
{
    pub name:    String,
    pub status:  PublishStatus,
    /// `true` iff the server answered with a 2xx status.
    pub success: bool,
    /// Response body or transport diagnostic for failed attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail:  Option<String,>,
}

impl PublishResult
{
    fn from_reply(name: &str, reply: HttpReply,) -> Self
    {
        let success = (200..300).contains(&reply.status,);
        Self {
            name: name.to_owned(),
            status: PublishStatus::Http {
                code: reply.status,
            },
            success,
            detail: if success { None } else { Some(reply.body,) },
        }
    }

    fn transport_failure(name: &str, error: &Error,) -> Self
    {
        Self {
            name:    name.to_owned(),
            status:  PublishStatus::Transport,
            success: false,
            detail:  Some(error.to_display_string(),),
        }
    }

    /// Converts a failed result into the run's terminal error.
    pub fn to_error(&self,) -> Option<Error,>
    {
        if self.success {
            return None;
        }
        Some(Error::Publish {
            dashboard: self.name.clone(),
            status:    self.status.to_string(),
            detail:    self.detail.clone().unwrap_or_default(),
        },)
    }
}

/// Uploads compiled dashboards with a fixed endpoint and token.
#[derive(Debug,)]
pub struct Publisher<'a, T,>
{
    transport: &'a T,
    endpoint:  &'a str,
    token:     &'a str,
}

impl<'a, T,> Publisher<'a, T,>
where
    T: DashboardTransport,
{
    pub fn new(transport: &'a T, endpoint: &'a str, token: &'a str,) -> Self
    {
        Self {
            transport,
            endpoint,
            token,
        }
    }

    /// Publishes one dashboard and classifies the outcome.
    pub async fn publish(&self, compiled: &CompiledDashboard,) -> PublishResult
    {
        let envelope = DashboardEnvelope::overwrite(&compiled.document,);
        debug!("POST {} for {}", self.endpoint, compiled.name);

        match self.transport.post_dashboard(self.endpoint, self.token, &envelope,).await {
            Ok(reply,) => PublishResult::from_reply(&compiled.name, reply,),
            Err(error,) => PublishResult::transport_failure(&compiled.name, &error,),
        }
    }

    /// Publishes dashboards in order.
    ///
    /// With `stop_on_first_failure` the loop ends at the first failed
    /// dashboard; later dashboards are not attempted and are absent from the
    /// returned results.
    pub async fn publish_all(
        &self,
        dashboards: &[CompiledDashboard],
        stop_on_first_failure: bool,
    ) -> Vec<PublishResult,>
    {
        let pb = progress::phase("deploying", dashboards.len(),);
        let mut results = Vec::with_capacity(dashboards.len(),);

        for compiled in dashboards {
            pb.set_message(compiled.name.clone(),);
            info!("deploying {}…", compiled.name);

            let result = self.publish(compiled,).await;
            pb.inc(1,);

            if result.success {
                info!("✓ {} ({})", result.name, result.status);
                results.push(result,);
                continue;
            }

            warn!(
                "✗ {} ({}): {}",
                result.name,
                result.status,
                result.detail.as_deref().unwrap_or_default()
            );
            results.push(result,);
            if stop_on_first_failure {
                break;
            }
        }

        pb.finish_and_clear();
        results
    }
}
