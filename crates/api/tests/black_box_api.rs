use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use jobqueue_api::app::{self, services};
use jobqueue_api::executors;
use jobqueue_infra::config::QueueConfig;

struct TestServer {
    base_url: String,
    ws_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Same router as prod, in-memory store, fast timers, ephemeral port.
    async fn spawn(worker_count: usize) -> Self {
        let queue = QueueConfig {
            claim_backoff: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(100),
            worker_count,
            ..QueueConfig::default()
        };
        let runtime = services::start_in_memory(queue, Arc::new(executors::demo_registry()))
            .await
            .expect("in-memory runtime starts");
        let app = app::build_app(runtime.services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            // Keep the background tasks alive for as long as the server runs.
            let _tasks = runtime.tasks;
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws"),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create(&self, body: Value) -> Value {
        let res = reqwest::Client::new()
            .post(self.url("/api/jobs"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        res.json().await.unwrap()
    }

    async fn status_of(&self, id: i64) -> String {
        let body: Value = reqwest::get(self.url(&format!("/api/jobs/{id}/status")))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["status"].as_str().unwrap_or_default().to_string()
    }

    async fn wait_for_status(&self, id: i64, status: &str) {
        for _ in 0..200 {
            if self.status_of(id).await == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {status}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a websocket message")
            .expect("websocket closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn(0).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_and_read_a_job() {
    let srv = TestServer::spawn(0).await;

    let job = srv
        .create(json!({"type": "send_email", "payload": {"to": "a@example.com"}}))
        .await;
    assert_eq!(job["type"], "send_email");
    assert_eq!(job["status"], "PENDING");
    assert_eq!(job["attempts"], 0);
    assert_eq!(job["max_attempts"], 3);
    assert_eq!(job["payload"]["to"], "a@example.com");

    let id = job["id"].as_i64().unwrap();
    let fetched: Value = reqwest::get(srv.url(&format!("/api/jobs/{id}")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, job);
    assert_eq!(srv.status_of(id).await, "PENDING");
}

#[tokio::test]
async fn unknown_and_invalid_ids() {
    let srv = TestServer::spawn(0).await;

    let res = reqwest::get(srv.url("/api/jobs/999")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Job not found");

    let res = reqwest::get(srv.url("/api/jobs/999/status")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = reqwest::get(srv.url("/api/jobs/abc")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_bodies_are_rejected() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    for body in [
        json!({"payload": {}}),
        json!({"type": ""}),
        json!({"type": "send_email", "maxAttempts": 0}),
    ] {
        let res = client
            .post(srv.url("/api/jobs"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn deleting_jobs() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();
    let job = srv.create(json!({"type": "send_email"})).await;
    let id = job["id"].as_i64().unwrap();

    let res = client
        .delete(srv.url(&format!("/api/jobs/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Job deleted");
    assert_eq!(body["job"]["id"], id);

    let res = client
        .delete(srv.url(&format!("/api/jobs/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_jobs_cannot_be_deleted() {
    let srv = TestServer::spawn(1).await;
    let job = srv
        .create(json!({"type": "sleep", "payload": {"ms": 2000}}))
        .await;
    let id = job["id"].as_i64().unwrap();
    srv.wait_for_status(id, "RUNNING").await;

    let res = reqwest::Client::new()
        .delete(srv.url(&format!("/api/jobs/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Cannot delete a RUNNING job");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workers_retry_then_fail() {
    let srv = TestServer::spawn(1).await;
    let job = srv
        .create(json!({"type": "fail", "payload": {"error": "smtp timeout"}, "maxAttempts": 2}))
        .await;
    let id = job["id"].as_i64().unwrap();
    srv.wait_for_status(id, "FAILED").await;

    let job: Value = reqwest::get(srv.url(&format!("/api/jobs/{id}")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["attempts"], 2);
    assert_eq!(job["error"], "smtp timeout");
    assert!(!job["finished_at"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observers_receive_status_pushes() {
    let srv = TestServer::spawn(1).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(srv.ws_url.as_str())
        .await
        .expect("websocket connects");

    // Noise is ignored without a reply.
    ws.send(Message::Text("not json".into())).await.unwrap();

    // The in-memory store numbers jobs from 1, so the subscription can precede the job.
    ws.send(Message::Text(r#"{"action":"subscribe","jobId":1}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"message": "Subscribed to job 1"}));

    let job = srv.create(json!({"type": "sleep", "payload": {"ms": 50}})).await;
    assert_eq!(job["id"], 1);

    loop {
        let push = next_json(&mut ws).await;
        assert_eq!(push["jobId"], 1);
        if push["status"] == "SUCCESSFUL" {
            assert_eq!(push, json!({"jobId": 1, "status": "SUCCESSFUL", "attempts": 1, "error": null}));
            break;
        }
    }

    ws.send(Message::Text(r#"{"action":"unsubscribe","jobId":"1"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"message": "Unsubscribed from job 1"}));
}
