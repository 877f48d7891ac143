//! Control-plane client for the kernel lifecycle.
//!
//! One [`SessionClient`] issues the `POST /kernels` and
//! `DELETE /kernels/{id}` calls. The underlying transport is configured
//! explicitly (base URL, token, timeout) so tests can point it at a fake
//! server; there are no ambient client defaults.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::ConnectionSettings;
use crate::error::{Error, Result};

/// A remote, ephemeral code-execution context. Created per query and
/// destroyed when the query finishes; it must never outlive the query.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub last_activity: DateTime<Utc>,
    pub execution_state: String,
    pub connections: i64,
}

#[derive(Debug)]
pub struct SessionClient {
    http: Client,
    base_url: String,
    token: String,
}

impl SessionClient {
    pub fn new(settings: &ConnectionSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            token: settings.token.clone(),
        })
    }

    /// Create a kernel. A failed creation aborts the whole query; there is
    /// no retry.
    pub async fn create(&self) -> Result<Session> {
        let url = endpoint(&self.base_url, &["kernels"], &self.token)?;
        log::debug!("creating kernel at {url}");

        let resp = self.http.post(url).send().await.map_err(|e| Error::SessionCreate {
            status: 0,
            detail: e.to_string(),
        })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::SessionCreate {
                status: status.as_u16(),
                detail: body,
            });
        }

        serde_json::from_str::<Session>(&body).map_err(|e| Error::SessionCreate {
            status: status.as_u16(),
            detail: format!("malformed kernel response: {e}"),
        })
    }

    /// Delete a kernel. Must run exactly once per created session, on every
    /// exit path of the orchestrator; a leaked kernel exhausts the remote
    /// service.
    pub async fn delete(&self, kernel_id: &str) -> Result<()> {
        let url = endpoint(&self.base_url, &["kernels", kernel_id], &self.token)?;
        log::debug!("deleting kernel {kernel_id}");

        let resp = self.http.delete(url).send().await.map_err(|e| Error::SessionDelete {
            status: 0,
            detail: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::SessionDelete {
                status: status.as_u16(),
                detail: body,
            });
        }
        Ok(())
    }
}

/// Join path segments onto the configured base (keeping any base path
/// prefix) and attach the token as a query parameter when non-empty.
pub(crate) fn endpoint(base_url: &str, segments: &[&str], token: &str) -> Result<Url> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|e| Error::Config(format!("invalid base url '{base_url}': {e}")))?;
    if url.host_str().is_none() {
        return Err(Error::Config(format!("base url '{base_url}' must include a host")));
    }
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| Error::Config(format!("base url '{base_url}' cannot carry a path")))?;
        path.pop_if_empty();
        for s in segments {
            path.push(s);
        }
    }
    if !token.is_empty() {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}
