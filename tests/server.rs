//! HTTP surface, bound to an ephemeral port and driven with reqwest.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use context_pipeline::ingest::IngestionPipeline;
use context_pipeline::jobs::JobManager;
use context_pipeline::retrieve::Retriever;
use context_pipeline::server::{router, AppState};
use context_pipeline_core::store::memory::InMemoryIndex;
use serde_json::{json, Value};

async fn spawn_server() -> (String, Arc<InMemoryIndex>) {
    let cfg = config("[embedding]\ndims = 16\n");
    let index = Arc::new(InMemoryIndex::new());

    let pipeline = Arc::new(IngestionPipeline::new(
        cfg.clone(),
        index.clone(),
        hash_factory(Arc::default()),
    ));
    let retriever = Arc::new(Retriever::new(
        cfg,
        index.clone(),
        Box::new(HashEmbedder),
        Box::new(TableEncoder::new(&[("Install the widget with cargo.", 2.5)])),
    ));
    let app = router(AppState::new(Arc::new(JobManager::new(pipeline)), retriever));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), index)
}

/// Poll a job until it leaves `pending` / `running`.
async fn wait_for_job(client: &reqwest::Client, base: &str, job_id: &str) -> Value {
    for _ in 0..200 {
        let info: Value = client
            .get(format!("{}/ingest/{}", base, job_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if info["status"] != "pending" && info["status"] != "running" {
            return info;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test]
async fn test_root_and_health() {
    let (base, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let root = client.get(&base).send().await.unwrap();
    assert_eq!(root.status(), 200);
    assert_eq!(root.text().await.unwrap(), "RUNNING");

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());
}

#[tokio::test]
async fn test_ingest_rejects_bad_payloads() {
    let (base, _) = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("{}/ingest", base);

    let resp = client
        .post(&url)
        .json(&json!({
            "asset_type": "ftp", "asset_id": "a", "owner": "o", "reader_kwargs": {}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_asset_type");

    let resp = client
        .post(&url)
        .json(&json!({
            "asset_type": "github", "asset_id": "a", "owner": "o",
            "reader_kwargs": { "owner": "acme" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client.post(&url).body("{not json").send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // Nothing was accepted.
    let jobs: Value = client
        .get(format!("{}/ingest/jobs", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let (base, index) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp: Value = client
        .post(format!("{}/ingest", base))
        .json(&json!({
            "asset_type": "s3",
            "asset_id": "bucket-1",
            "owner": "alice",
            "reader_kwargs": {
                "bucket_name": "docs",
                "access_key": MOCK_ACCESS_KEY,
                "secret_key": "secret",
                "endpoint": "http://127.0.0.1:1"
            }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = resp["job_id"].as_str().unwrap().to_string();

    let info = wait_for_job(&client, &base, &job_id).await;
    assert_eq!(info["status"], "failed");
    assert_eq!(info["stage"], "failed");
    assert_eq!(info["asset_type"], "s3");
    assert!(info["error"].as_str().unwrap().contains("s3"));
    assert!(!info["logs"].as_array().unwrap().is_empty());
    assert_eq!(index.point_count("default"), 0);
}

#[tokio::test]
async fn test_ingest_then_retrieve() {
    let (base, index) = spawn_server().await;
    let s3 = spawn_mock_s3(
        "docs",
        vec![
            MockObject::text("guide.txt", "Install the widget with cargo."),
            MockObject::text("faq.txt", "Widgets are blue."),
        ],
    )
    .await;
    let client = reqwest::Client::new();

    let resp: Value = client
        .post(format!("{}/ingest", base))
        .json(&json!({
            "asset_type": "s3",
            "asset_id": "bucket-1",
            "owner": "alice",
            "reader_kwargs": {
                "bucket_name": "docs",
                "access_key": MOCK_ACCESS_KEY,
                "secret_key": "secret",
                "endpoint": s3
            }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = resp["job_id"].as_str().unwrap().to_string();

    let info = wait_for_job(&client, &base, &job_id).await;
    assert_eq!(info["status"], "succeeded", "job info: {}", info);
    assert_eq!(info["stage"], "done");
    assert_eq!(info["report"]["documents"], 2);
    assert_eq!(info["report"]["points"], 2);
    assert_eq!(index.point_count("default"), 2);

    let jobs: Value = client
        .get(format!("{}/ingest/jobs", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs["jobs"][0]["job_id"], job_id.as_str());

    let contexts: Value = client
        .post(format!("{}/retrieve", base))
        .json(&json!({
            "query": "Install the widget with cargo.",
            "asset_ids": ["bucket-1"],
            "num_contexts": 5
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let contexts = contexts.as_array().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0]["text"], "Install the widget with cargo.");
    assert_eq!(contexts[0]["score"], 2.5);
    assert_eq!(contexts[0]["metadata"]["file_name"], "guide.txt");

    // Another asset sees nothing.
    let contexts: Value = client
        .post(format!("{}/retrieve", base))
        .json(&json!({ "query": "widget", "asset_ids": ["other"], "score_threshold": 0.0 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(contexts.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_job_and_empty_query() {
    let (base, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/ingest/nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .delete(format!("{}/ingest/nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/retrieve", base))
        .json(&json!({ "query": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_stop_finished_job_keeps_status() {
    let (base, _) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp: Value = client
        .post(format!("{}/ingest", base))
        .json(&json!({
            "asset_type": "s3",
            "asset_id": "bucket-1",
            "owner": "alice",
            "reader_kwargs": {
                "bucket_name": "docs",
                "access_key": MOCK_ACCESS_KEY,
                "secret_key": "secret",
                "endpoint": "http://127.0.0.1:1"
            }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = resp["job_id"].as_str().unwrap().to_string();
    wait_for_job(&client, &base, &job_id).await;

    let stopped: Value = client
        .delete(format!("{}/ingest/{}", base, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["status"], "failed");
}
