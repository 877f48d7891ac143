//! Orchestrator tests against a fake control plane (httpmock) and a fake
//! kernel WebSocket. The load-bearing invariant: the kernel is deleted
//! exactly once per query, whatever failed in between.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use httpmock::prelude::*;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use kernelq::decode::{encode_bundle, ResultBundle};
use kernelq::frame::ColumnValues;
use kernelq::query::{run_query, run_query_at, QuerySpec};
use kernelq::{ConnectionSettings, Error};

const KERNEL_ID: &str = "k-test-1";

fn spec(code: &str) -> QuerySpec {
    QuerySpec {
        code: code.to_string(),
        result_code: "{'a': [1, 2, 3]}".to_string(),
        time_names_code: "tcols".to_string(),
    }
}

fn settings(base_url: String) -> ConnectionSettings {
    ConnectionSettings {
        base_url,
        token: String::new(),
        request_timeout: Duration::from_secs(5),
        execute_timeout: Some(Duration::from_secs(5)),
    }
}

fn kernel_body() -> serde_json::Value {
    json!({
        "id": KERNEL_ID,
        "name": "python3",
        "last_activity": "2024-05-01T12:00:00Z",
        "execution_state": "starting",
        "connections": 0
    })
}

/// What the fake kernel does once the second (introspection) request
/// arrives. The first request always gets stream output plus an
/// `execute_reply`.
#[derive(Clone)]
enum KernelScript {
    Result(String),
    Error(Vec<String>),
    Silence,
}

/// One-connection fake kernel speaking the channels protocol.
async fn spawn_fake_kernel(script: KernelScript) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut requests_seen = 0u32;

        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else { continue };
            let msg: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(msg["header"]["msg_type"], "execute_request");
            requests_seen += 1;

            // Chatter that the channel must consume and ignore.
            let busy = json!({"msg_type": "status", "content": {"execution_state": "busy"}});
            ws.send(Message::Text(busy.to_string().into())).await.unwrap();

            if requests_seen == 1 {
                assert_eq!(msg["content"]["silent"], true);
                let out = json!({"msg_type": "stream", "content": {"text": "side effects\n"}});
                ws.send(Message::Text(out.to_string().into())).await.unwrap();
                let reply = json!({"msg_type": "execute_reply", "content": {"status": "ok"}});
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                continue;
            }

            assert_eq!(msg["content"]["silent"], false);
            let code = msg["content"]["code"].as_str().unwrap();
            assert!(code.contains("base64.b64encode"));

            match &script {
                KernelScript::Result(payload) => {
                    let result = json!({
                        "msg_type": "execute_result",
                        "content": {"data": {"text/plain": payload}}
                    });
                    ws.send(Message::Text(result.to_string().into())).await.unwrap();
                }
                KernelScript::Error(traceback) => {
                    let err = json!({"msg_type": "error", "content": {"traceback": traceback}});
                    ws.send(Message::Text(err.to_string().into())).await.unwrap();
                }
                KernelScript::Silence => {
                    // Leave the caller waiting; the deadline must fire.
                }
            }
        }
    });

    Url::parse(&format!("ws://{addr}/")).unwrap()
}

fn bundle(data: serde_json::Value, time_columns: &[&str]) -> ResultBundle {
    let serde_json::Value::Object(map) = data else { panic!() };
    ResultBundle {
        data: map,
        time_columns: time_columns.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn end_to_end_integer_column() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(204);
        })
        .await;

    let payload = encode_bundle(&bundle(json!({"a": [1, 2, 3]}), &[]));
    let ws_url = spawn_fake_kernel(KernelScript::Result(payload)).await;

    let columns = run_query_at(&settings(server.url("/api")), ws_url, &spec("x=1"))
        .await
        .unwrap();

    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].name, "a");
    assert_eq!(columns[0].values, ColumnValues::Int(vec![1, 2, 3]));
    create.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn end_to_end_time_and_float_columns() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(204);
        })
        .await;

    let payload = encode_bundle(&bundle(
        json!({"t": ["2024-01-01T00:00:00Z"], "v": [3.5]}),
        &["t"],
    ));
    let ws_url = spawn_fake_kernel(KernelScript::Result(payload)).await;

    let columns = run_query_at(&settings(server.url("/api")), ws_url, &spec("x=1"))
        .await
        .unwrap();

    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].name, "t");
    assert!(matches!(&columns[0].values, ColumnValues::Time(ts) if ts.len() == 1));
    assert_eq!(columns[1].name, "v");
    assert_eq!(columns[1].values, ColumnValues::Float(vec![3.5]));
    delete.assert_async().await;
}

#[tokio::test]
async fn remote_traceback_still_deletes_the_kernel() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(204);
        })
        .await;

    let ws_url = spawn_fake_kernel(KernelScript::Error(vec![
        "Traceback (most recent call last):".into(),
        "NameError: name 'df' is not defined".into(),
    ]))
    .await;

    let err = run_query_at(&settings(server.url("/api")), ws_url, &spec("x=1"))
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::RemoteExecution { traceback } if traceback.len() == 2));
    delete.assert_async().await;
}

#[tokio::test]
async fn malformed_payload_still_deletes_the_kernel() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(204);
        })
        .await;

    // No dot separator: decodable as neither segment.
    let ws_url = spawn_fake_kernel(KernelScript::Result("'bm90YXBheWxvYWQ='".into())).await;

    let err = run_query_at(&settings(server.url("/api")), ws_url, &spec("x=1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ResultFormat(_)));
    delete.assert_async().await;
}

#[tokio::test]
async fn stalled_kernel_times_out_and_deletes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(204);
        })
        .await;

    let ws_url = spawn_fake_kernel(KernelScript::Silence).await;
    let mut settings = settings(server.url("/api"));
    settings.execute_timeout = Some(Duration::from_millis(200));

    let err = run_query_at(&settings, ws_url, &spec("x=1")).await.unwrap_err();

    assert!(matches!(err, Error::ChannelTimeout { .. }));
    delete.assert_async().await;
}

#[tokio::test]
async fn channel_connect_failure_still_deletes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(204);
        })
        .await;

    // The data plane resolves onto the mock HTTP server, which cannot
    // upgrade the connection.
    let err = run_query(&settings(server.url("/api")), &spec("x=1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ChannelConnect(_)));
    delete.assert_async().await;
}

#[tokio::test]
async fn failed_creation_aborts_without_cleanup() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(503).body("no kernels available");
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path_includes("/kernels/");
            then.status(204);
        })
        .await;

    let err = run_query(&settings(server.url("/api")), &spec("x=1"))
        .await
        .unwrap_err();

    match err {
        Error::SessionCreate { status, detail } => {
            assert_eq!(status, 503);
            assert!(detail.contains("no kernels available"));
        }
        other => panic!("unexpected error: {other}"),
    }
    create.assert_async().await;
    delete.assert_hits_async(0).await;
}

#[tokio::test]
async fn delete_failure_surfaces_after_a_successful_query() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(500).body("shutdown refused");
        })
        .await;

    let payload = encode_bundle(&bundle(json!({"a": [1]}), &[]));
    let ws_url = spawn_fake_kernel(KernelScript::Result(payload)).await;

    let err = run_query_at(&settings(server.url("/api")), ws_url, &spec("x=1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SessionDelete { status: 500, .. }));
    delete.assert_async().await;
}

#[tokio::test]
async fn cleanup_failure_reports_both_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/kernels");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(format!("/api/kernels/{KERNEL_ID}"));
            then.status(500).body("shutdown refused");
        })
        .await;

    let ws_url = spawn_fake_kernel(KernelScript::Error(vec!["boom".into()])).await;

    let err = run_query_at(&settings(server.url("/api")), ws_url, &spec("x=1"))
        .await
        .unwrap_err();

    match err {
        Error::Cleanup { query, cleanup } => {
            assert!(matches!(*query, Error::RemoteExecution { .. }));
            assert!(matches!(*cleanup, Error::SessionDelete { status: 500, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    delete.assert_async().await;
}

#[tokio::test]
async fn token_rides_along_as_a_query_parameter() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/kernels")
                .query_param("token", "sekrit");
            then.status(201).json_body(kernel_body());
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path(format!("/api/kernels/{KERNEL_ID}"))
                .query_param("token", "sekrit");
            then.status(204);
        })
        .await;

    let payload = encode_bundle(&bundle(json!({"a": [1]}), &[]));
    let ws_url = spawn_fake_kernel(KernelScript::Result(payload)).await;

    let mut settings = settings(server.url("/api"));
    settings.token = "sekrit".to_string();

    run_query_at(&settings, ws_url, &spec("x=1")).await.unwrap();
    create.assert_async().await;
    delete.assert_async().await;
}
