//! HTTP API tests.
//!
//! Each test serves the real router on an ephemeral port, backed by the
//! in-memory store and a hashing embedder, and talks to it with reqwest.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use survey_index::config::load_config;
use survey_index::embedding::EmbeddingProvider;
use survey_index::pipeline::Pipeline;
use survey_index::server::{router, serve, AppState};
use survey_index::store::{InMemoryStore, SurveyStore};

struct HashEmbedder {
    delay: Option<Duration>,
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 8];
                for c in t.chars() {
                    v[c as usize % 8] += 1.0;
                }
                v
            })
            .collect())
    }
}

struct TestServer {
    addr: SocketAddr,
    store: Arc<InMemoryStore>,
    _tmp: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn build_pipeline(responses: &str, delay: Option<Duration>) -> (TempDir, Pipeline, Arc<InMemoryStore>) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::write(
        root.join("questions.csv"),
        "Q1,보유 휴대폰,SINGLE\n1,갤럭시\n2,아이폰\nQ2,기타 의견,OPEN\n",
    )
    .unwrap();
    fs::write(root.join("responses.csv"), responses).unwrap();
    fs::write(
        root.join("svidx.toml"),
        format!(
            "[store]\nindex = \"survey_http\"\n\n[data]\nquestions = \"{root}/questions.csv\"\nresponses = \"{root}/responses.csv\"\n",
            root = root.display()
        ),
    )
    .unwrap();
    let config = load_config(&root.join("svidx.toml")).unwrap();

    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::new(
        Arc::new(config),
        store.clone(),
        Arc::new(HashEmbedder { delay }),
    );
    (tmp, pipeline, store)
}

async fn start_server(responses: &str, delay: Option<Duration>) -> TestServer {
    let (tmp, pipeline, store) = build_pipeline(responses, delay);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(pipeline));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestServer {
        addr,
        store,
        _tmp: tmp,
    }
}

const RESPONSES: &str = "mb_sn,Q1,Q2\nu1,1,좋아요\nu2,2,\n,1,\n";

#[tokio::test]
async fn root_and_health() {
    let server = start_server(RESPONSES, None).await;
    let client = reqwest::Client::new();

    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("Elasticsearch"));

    let resp = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn index_endpoint_reports_counts() {
    let server = start_server(RESPONSES, None).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/index-survey-data"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success_count"], 2);
    assert_eq!(body["failure_count"], 0);
    assert_eq!(body["message"], "사용자 단위 설문 데이터 색인 작업이 완료되었습니다.");

    assert_eq!(server.store.count("survey_http").await.unwrap(), 2);
}

#[tokio::test]
async fn index_endpoint_without_documents() {
    let server = start_server("mb_sn,Q1,Q2\n,1,\nu1,,\n", None).await;
    let resp = reqwest::Client::new()
        .post(server.url("/index-survey-data"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "처리할 데이터가 없습니다.");
    assert_eq!(body["success_count"], 0);
    assert_eq!(body["failure_count"], 0);
}

#[tokio::test]
async fn unavailable_store_returns_503() {
    let server = start_server(RESPONSES, None).await;
    server.store.set_available(false);

    let resp = reqwest::Client::new()
        .post(server.url("/index-survey-data"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "store_unavailable");
    assert!(body["error"]["message"].as_str().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn rejected_documents_show_up_in_failure_count() {
    let server = start_server(RESPONSES, None).await;
    server.store.reject_user("u2");

    let resp = reqwest::Client::new()
        .post(server.url("/index-survey-data"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["failure_count"], 1);
}

#[tokio::test]
async fn job_lifecycle() {
    let server = start_server(RESPONSES, None).await;
    let client = reqwest::Client::new();

    let resp = client.post(server.url("/jobs")).send().await.unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let mut state = String::new();
    for _ in 0..50 {
        let snapshot: Value = client
            .get(server.url(&format!("/jobs/{}", job_id)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        state = snapshot["state"].as_str().unwrap().to_string();
        if state == "succeeded" {
            assert_eq!(snapshot["success_count"], 2);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(state, "succeeded");

    let list: Value = client
        .get(server.url("/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let server = start_server(RESPONSES, None).await;
    let client = reqwest::Client::new();

    let resp = client.get(server.url("/jobs/missing")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .delete(server.url("/jobs/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn concurrent_run_conflicts_until_cancelled() {
    let server = start_server(RESPONSES, Some(Duration::from_secs(30))).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(server.url("/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let resp = client
        .post(server.url("/index-survey-data"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "conflict");

    let resp = client.post(server.url("/jobs")).send().await.unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .delete(server.url(&format!("/jobs/{}", job_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let mut state = String::new();
    for _ in 0..50 {
        let snapshot: Value = client
            .get(server.url(&format!("/jobs/{}", job_id)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        state = snapshot["state"].as_str().unwrap().to_string();
        if state == "cancelled" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(state, "cancelled");
}

#[tokio::test]
async fn shutdown_cancels_synchronous_run() {
    let (_tmp, pipeline, store) = build_pipeline(RESPONSES, Some(Duration::from_secs(30)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, AppState::new(pipeline), async move {
        let _ = stop_rx.await;
    }));

    let request = tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("http://{}/index-survey-data", addr))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop_tx.send(()).unwrap();

    let resp = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("request did not finish after shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "cancelled");

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(store.count("survey_http").await.unwrap(), 0);
}
