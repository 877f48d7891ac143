//! Per-query orchestration: session lifecycle around the execute pipeline.
//!
//! One query = create kernel → run the user's code silently → run the
//! introspection snippet → decode → type → delete kernel. The deletion is
//! wrapped around the whole execute region so every new failure path added
//! inside it still cleans up; a leaked kernel is a correctness bug, not a
//! missed optimization.

use url::Url;

use crate::channel::ExecutionChannel;
use crate::config::ConnectionSettings;
use crate::decode::decode_payload;
use crate::error::{Error, Result};
use crate::frame::{build_columns, Column};
use crate::kernel::SessionClient;

/// Caller-facing query descriptor.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Python to run for its side effects (silent, no result extracted).
    pub code: String,
    /// Expression yielding the result dict (column name → list of scalars).
    pub result_code: String,
    /// Expression naming the time-column list; an empty list is used when
    /// the name is not bound on the kernel.
    pub time_names_code: String,
}

/// Python shipped as the second, non-silent request. It serializes the
/// result expression and the time-name list as two independently
/// base64-encoded JSON documents joined by a dot, which is the shape
/// [`decode_payload`] expects back.
pub fn introspection_snippet(spec: &QuerySpec) -> String {
    format!(
        r#"import json
import base64
base64.b64encode(json.dumps({result},ensure_ascii=True,indent=None).encode("utf-8")).decode('ascii') \
+ "." \
+ base64.b64encode(json.dumps(({names} if "{names}" in globals() else []),ensure_ascii=True,indent=None).encode("utf-8")).decode('ascii')"#,
        result = spec.result_code,
        names = spec.time_names_code,
    )
}

/// Run one query end to end. Queries are independent; nothing is shared
/// across concurrent calls.
pub async fn run_query(settings: &ConnectionSettings, spec: &QuerySpec) -> Result<Vec<Column>> {
    let client = SessionClient::new(settings)?;
    let session = client.create().await?;
    log::debug!(
        "kernel {} created (state {})",
        session.id,
        session.execution_state
    );

    let outcome = execute_pipeline(settings, None, &session.id, spec).await;

    finish(&client, &session.id, outcome).await
}

/// As [`run_query`], but dialing the channel at an explicit endpoint.
/// Lets tests aim the data plane at a fake kernel while the control plane
/// stays on `settings.base_url`.
pub async fn run_query_at(
    settings: &ConnectionSettings,
    channel_url: Url,
    spec: &QuerySpec,
) -> Result<Vec<Column>> {
    let client = SessionClient::new(settings)?;
    let session = client.create().await?;

    let outcome = execute_pipeline(settings, Some(channel_url), &session.id, spec).await;

    finish(&client, &session.id, outcome).await
}

/// Delete the session exactly once and merge the outcomes: a cleanup
/// failure surfaces alongside the query error, never instead of it.
async fn finish(
    client: &SessionClient,
    session_id: &str,
    outcome: Result<Vec<Column>>,
) -> Result<Vec<Column>> {
    let cleanup = client.delete(session_id).await;
    match (outcome, cleanup) {
        (Ok(columns), Ok(())) => Ok(columns),
        (Ok(_), Err(c)) => Err(c),
        (Err(q), Ok(())) => Err(q),
        (Err(q), Err(c)) => Err(Error::Cleanup {
            query: Box::new(q),
            cleanup: Box::new(c),
        }),
    }
}

async fn execute_pipeline(
    settings: &ConnectionSettings,
    channel_url: Option<Url>,
    kernel_id: &str,
    spec: &QuerySpec,
) -> Result<Vec<Column>> {
    let mut channel = match channel_url {
        Some(url) => ExecutionChannel::connect_url(url, settings.execute_timeout).await?,
        None => ExecutionChannel::connect(settings, kernel_id).await?,
    };

    let result = drive(&mut channel, spec).await;
    channel.close().await;

    let payload = result?;
    let bundle = decode_payload(&payload)?;
    build_columns(&bundle)
}

/// The two ordered execute/await cycles. The introspection snippet depends
/// on side effects of the first run, so they never reorder.
async fn drive(channel: &mut ExecutionChannel, spec: &QuerySpec) -> Result<String> {
    channel.execute(&spec.code, true).await?;

    let payload = channel.execute(&introspection_snippet(spec), false).await?;
    payload.ok_or_else(|| {
        Error::ResultFormat("introspection run finished without a result payload".to_string())
    })
}
