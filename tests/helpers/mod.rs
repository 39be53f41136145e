//! In-process stand-in for the Baidu token and OCR endpoints.

#![allow(dead_code)]

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ocr_archive::services::breaker::CircuitBreaker;
use ocr_archive::services::ocr::BaiduOcrClient;
use ocr_archive::services::token::{TokenManager, TokenSettings};

/// What the OCR endpoint answers with.
#[derive(Debug, Clone)]
pub enum StubReply {
    Lines(Vec<String>),
    ErrorCode(i64, String),
    Status(u16),
}

impl StubReply {
    pub fn lines(lines: &[&str]) -> Self {
        StubReply::Lines(lines.iter().map(|l| l.to_string()).collect())
    }
}

/// What the token endpoint answers with.
#[derive(Debug, Clone)]
pub enum TokenReply {
    /// A fresh `token-{n}` valid for thirty days.
    Issue,
    /// A fresh `token-{n}` with the given `expires_in`.
    IssueExpiring(i64),
    /// An error body with the given status.
    Fail(u16),
}

#[derive(Clone)]
struct StubState {
    token_calls: Arc<AtomicUsize>,
    ocr_calls: Arc<AtomicUsize>,
    seen_tokens: Arc<Mutex<Vec<String>>>,
    script: Arc<Mutex<VecDeque<StubReply>>>,
    fallback: StubReply,
    token_script: Arc<Mutex<VecDeque<TokenReply>>>,
    token_fallback: Arc<Mutex<TokenReply>>,
}

/// Running stub server; replies come from `script` first, then `fallback`.
pub struct StubService {
    pub base_url: String,
    state: StubState,
}

impl StubService {
    pub async fn start(fallback: StubReply) -> Self {
        let state = StubState {
            token_calls: Arc::new(AtomicUsize::new(0)),
            ocr_calls: Arc::new(AtomicUsize::new(0)),
            seen_tokens: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            token_script: Arc::new(Mutex::new(VecDeque::new())),
            token_fallback: Arc::new(Mutex::new(TokenReply::Issue)),
        };

        let app = Router::new()
            .route("/oauth/2.0/token", get(token))
            .route("/ocr", post(ocr))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub server");
        let addr = listener.local_addr().expect("Stub server has no address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Stub server error");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Queue replies used before the fallback.
    pub fn script(&self, replies: Vec<StubReply>) {
        self.state.script.lock().unwrap().extend(replies);
    }

    /// Queue token endpoint replies used before the token fallback.
    pub fn script_tokens(&self, replies: Vec<TokenReply>) {
        self.state.token_script.lock().unwrap().extend(replies);
    }

    /// Change how the token endpoint answers once its script is used up.
    pub fn set_token_fallback(&self, reply: TokenReply) {
        *self.state.token_fallback.lock().unwrap() = reply;
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/2.0/token", self.base_url)
    }

    pub fn ocr_url(&self) -> String {
        format!("{}/ocr", self.base_url)
    }

    pub fn token_calls(&self) -> usize {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn ocr_calls(&self) -> usize {
        self.state.ocr_calls.load(Ordering::SeqCst)
    }

    /// Access tokens presented to the OCR endpoint, in arrival order.
    pub fn seen_tokens(&self) -> Vec<String> {
        self.state.seen_tokens.lock().unwrap().clone()
    }

    pub fn token_settings(&self, cache_path: &Path) -> TokenSettings {
        TokenSettings {
            token_url: self.token_url(),
            grant_type: "client_credentials".to_string(),
            client_id: "stub-id".to_string(),
            client_secret: "stub-secret".to_string(),
            cache_path: cache_path.to_path_buf(),
        }
    }

    /// Token manager plus OCR client wired to this stub.
    pub async fn client(
        &self,
        cache_path: &Path,
        threshold: u32,
    ) -> (Arc<TokenManager>, Arc<BaiduOcrClient>) {
        let http = reqwest::Client::new();
        let tokens = Arc::new(
            TokenManager::initialize(http.clone(), self.token_settings(cache_path))
                .await
                .expect("Failed to load stub credential"),
        );
        let client = Arc::new(BaiduOcrClient::new(
            http,
            self.ocr_url(),
            "CHN_ENG".to_string(),
            tokens.clone(),
            Arc::new(CircuitBreaker::new(threshold)),
        ));
        (tokens, client)
    }
}

async fn token(
    State(state): State<StubState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("client_id").map(String::as_str) != Some("stub-id") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "unknown client id"
            })),
        )
            .into_response();
    }
    let n = state.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let reply = state
        .token_script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| state.token_fallback.lock().unwrap().clone());

    let expires_in = match reply {
        TokenReply::Issue => 2_592_000,
        TokenReply::IssueExpiring(expires_in) => expires_in,
        TokenReply::Fail(code) => {
            return (
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Json(serde_json::json!({
                    "error": "server_error",
                    "error_description": "token service unavailable"
                })),
            )
                .into_response();
        }
    };
    Json(serde_json::json!({
        "access_token": format!("token-{n}"),
        "expires_in": expires_in
    }))
    .into_response()
}

async fn ocr(
    State(state): State<StubState>,
    Query(params): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.ocr_calls.fetch_add(1, Ordering::SeqCst);
    state
        .seen_tokens
        .lock()
        .unwrap()
        .push(params.get("access_token").cloned().unwrap_or_default());

    if form.get("detect_direction").map(String::as_str) != Some("true")
        || form.get("image").map_or(true, |image| image.is_empty())
    {
        return Json(serde_json::json!({"error_code": 216100, "error_msg": "invalid param"}))
            .into_response();
    }

    let reply = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| state.fallback.clone());

    match reply {
        StubReply::Lines(lines) => {
            let words: Vec<_> = lines
                .iter()
                .map(|line| serde_json::json!({ "words": line }))
                .collect();
            Json(serde_json::json!({
                "log_id": 42,
                "words_result_num": words.len(),
                "words_result": words
            }))
            .into_response()
        }
        StubReply::ErrorCode(code, message) => {
            Json(serde_json::json!({"error_code": code, "error_msg": message})).into_response()
        }
        StubReply::Status(code) => (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "stub failure",
        )
            .into_response(),
    }
}
