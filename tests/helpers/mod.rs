//! Test helper utilities for end-to-end testing against a live gateway

#![allow(dead_code)]

use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;

use mailbox_verify::{
    app_state::AppState,
    db::{self, token_queries},
    routes,
};

pub const WORKER_TOKEN: &str = "test-worker-token";

/// A gateway served on an ephemeral port, backed by a throwaway database.
pub struct TestServer {
    pub base_url: String,
    pub pool: SqlitePool,
    pub client: reqwest::Client,
    _dir: TempDir,
}

/// Start the gateway with one active worker token.
pub async fn spawn_server() -> TestServer {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());

    let pool = db::init_pool(&url, 4).await.expect("pool should open");
    db::run_migrations(&pool).await.expect("migrations should run");
    token_queries::create_token(&pool, WORKER_TOKEN, Some("integration tests"))
        .await
        .expect("token should be created");

    let app = routes::api_router(AppState::new(pool.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });

    TestServer {
        base_url: format!("http://{}", addr),
        pool,
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST /queue/verify with a raw JSON body.
    pub async fn enqueue(&self, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url("/queue/verify"))
            .json(&body)
            .send()
            .await
            .expect("enqueue request");
        json_response(response).await
    }

    pub async fn get_json(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request");
        json_response(response).await
    }

    /// GET a worker route with an optional token.
    pub async fn worker_get(&self, path: &str, token: Option<&str>) -> (u16, Value) {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.header("X-Worker-Token", token);
        }
        json_response(request.send().await.expect("worker GET request")).await
    }

    /// POST /worker/result with the test token.
    pub async fn submit(&self, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url("/worker/result"))
            .header("X-Worker-Token", WORKER_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("submit request");
        json_response(response).await
    }

    pub async fn stats(&self) -> Value {
        let (status, body) = self.get_json("/queue/stats").await;
        assert_eq!(status, 200, "stats failed: {}", body);
        body["stats"].clone()
    }
}

async fn json_response(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let text = response.text().await.expect("response body");
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, body)
}
