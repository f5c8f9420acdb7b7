use std::sync::Arc;
use std::time::Duration;

use bookforge_api::app::services::AppServices;
use bookforge_infra::blob::BlobStore;
use bookforge_infra::{InMemoryBackends, PipelineConfig};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    memory: InMemoryBackends,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Same router as prod over in-memory backends, with the in-process worker.
    async fn spawn() -> Self {
        Self::spawn_with(true).await
    }

    async fn spawn_with(worker: bool) -> Self {
        let memory = InMemoryBackends::new();
        let backends = memory.backends();
        let config = PipelineConfig {
            poll_interval: Duration::from_millis(5),
            worker_name: "black-box".to_string(),
            ..PipelineConfig::default()
        };
        let mut services = AppServices::new(&backends, &config);
        if worker {
            services = services.with_in_process_worker(&backends, &config);
        }
        let app = bookforge_api::app::build_app(Arc::new(services));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            memory,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn task_eventually_terminal(
    client: &reqwest::Client,
    base_url: &str,
    task_id: &str,
) -> serde_json::Value {
    for _ in 0..500 {
        let res = client
            .get(format!("{}/library/tasks/status/{}", base_url, task_id))
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("task {task_id} did not reach a terminal status within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_on_submission_routes_reports_ready() {
    let srv = TestServer::spawn_with(false).await;
    let client = reqwest::Client::new();

    for path in ["/library/generate-async", "/gallery/generate-images-async"] {
        let res = client.get(format!("{}{}", srv.base_url, path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["status"], "ready");
    }
}

#[tokio::test]
async fn book_submission_completes_with_three_blobs() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/library/generate-async", srv.base_url))
        .json(&json!({ "count": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "queued");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let record = task_eventually_terminal(&client, &srv.base_url, &task_id).await;
    assert_eq!(record["status"], "completed");
    assert_eq!(record["progress"], 100);

    let blobs = srv.memory.blobs.list("book_").await.unwrap();
    assert_eq!(blobs.len(), 3);
    for head in &blobs {
        assert_eq!(head.metadata.get("generated"), Some("true"));
        assert!(head.metadata.iter().all(|(k, v)| k.is_ascii() && v.is_ascii()));
    }

    let report: serde_json::Value = client
        .get(format!("{}/library/tasks/status", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "success");
    assert_eq!(report["total_tasks"], 1);
    assert_eq!(report["completed_tasks"][0]["task_id"], task_id.as_str());
}

#[tokio::test]
async fn broker_down_returns_503_and_writes_no_record() {
    let srv = TestServer::spawn_with(false).await;
    srv.memory.broker.set_available(false);
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/library/generate-async", srv.base_url))
        .json(&json!({ "count": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "service_unavailable");

    let report: serde_json::Value = client
        .get(format!("{}/library/tasks/status", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["total_tasks"], 0);
    assert!(srv.memory.status.is_empty());
}

#[tokio::test]
async fn large_book_batch_returns_one_task_per_book() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/library/generate-large-books", srv.base_url))
        .header("X-Forwarded-User", "alice")
        .json(&json!({ "count": 2, "word_count": 300 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["queue"], "large_book_generation_queue");
    let tasks: Vec<String> = body["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect();
    assert_eq!(tasks.len(), 2);
    assert_ne!(tasks[0], tasks[1]);

    for task_id in &tasks {
        let record = task_eventually_terminal(&client, &srv.base_url, task_id).await;
        assert_eq!(record["status"], "completed");
    }

    let blobs = srv.memory.blobs.list("large_book_").await.unwrap();
    assert_eq!(blobs.len(), 2);
    assert!(blobs.iter().all(|h| h.metadata.get("user_id") == Some("alice")));
    assert!(blobs.iter().all(|h| h.metadata.get("word_count") == Some("300")));
}

#[tokio::test]
async fn invalid_body_falls_back_to_defaults() {
    let srv = TestServer::spawn_with(false).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/gallery/generate-images-async", srv.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("4 images"));

    let task_id = body["task_id"].as_str().unwrap();
    let record: serde_json::Value = client
        .get(format!("{}/library/tasks/status/{}", srv.base_url, task_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record["status"], "queued");
    assert_eq!(record["progress"], 0);
}

#[tokio::test]
async fn unknown_and_malformed_task_ids() {
    let srv = TestServer::spawn_with(false).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!(
            "{}/library/tasks/status/{}",
            srv.base_url,
            bookforge_core::TaskId::new()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = client
        .get(format!("{}/library/tasks/status/not-a-uuid", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}
