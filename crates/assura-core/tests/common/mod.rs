//! In-process mock of the Assura backend for gateway tests.

// Each test binary uses a different subset of the helpers
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assura_core::vault::{BiometricAvailability, BiometricKind, ChallengeError};
use assura_core::{BiometricAuthenticator, Config};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

pub const PASSWORD: &str = "correct horse";

/// Use RUST_LOG to see gateway logs while debugging a test
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub struct BackendState {
    valid_token: Mutex<String>,
    issued: (String, String),
    refresh_status: StatusCode,
    refresh_delay: Duration,
    reject_all: bool,
    refresh_calls: AtomicUsize,
    refresh_bodies: Mutex<Vec<Value>>,
    seen_auth: Mutex<Vec<String>>,
}

pub struct BackendBuilder {
    valid_token: String,
    issued: (String, String),
    refresh_status: StatusCode,
    refresh_delay: Duration,
    reject_all: bool,
}

impl Default for BackendBuilder {
    fn default() -> Self {
        Self {
            valid_token: String::new(),
            issued: ("new".to_string(), "new-r".to_string()),
            refresh_status: StatusCode::OK,
            refresh_delay: Duration::from_millis(200),
            reject_all: false,
        }
    }
}

impl BackendBuilder {
    /// Token the backend accepts before any refresh
    pub fn valid_token(mut self, token: &str) -> Self {
        self.valid_token = token.to_string();
        self
    }

    pub fn refresh_status(mut self, status: StatusCode) -> Self {
        self.refresh_status = status;
        self
    }

    pub fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Reject every protected request, even with a freshly issued token
    pub fn reject_all(mut self) -> Self {
        self.reject_all = true;
        self
    }

    pub async fn start(self) -> MockBackend {
        init_tracing();

        let state = Arc::new(BackendState {
            valid_token: Mutex::new(self.valid_token),
            issued: self.issued,
            refresh_status: self.refresh_status,
            refresh_delay: self.refresh_delay,
            reject_all: self.reject_all,
            refresh_calls: AtomicUsize::new(0),
            refresh_bodies: Mutex::new(Vec::new()),
            seen_auth: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/policies", get(policies))
            .route("/policies/missing", get(missing))
            .route("/auth/refresh", post(refresh))
            .route("/auth/login", post(login))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().expect("Failed to read mock backend address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock backend stopped");
        });

        MockBackend { addr, state }
    }
}

pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
}

impl MockBackend {
    pub fn builder() -> BackendBuilder {
        BackendBuilder::default()
    }

    pub fn config(&self) -> Config {
        Config {
            api_base_url: format!("http://{}", self.addr),
            ..Config::default()
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_bodies(&self) -> Vec<Value> {
        self.state.refresh_bodies.lock().unwrap().clone()
    }

    /// How many protected requests carried exactly this Authorization header
    pub fn requests_with(&self, authorization: &str) -> usize {
        self.state
            .seen_auth
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| seen.as_str() == authorization)
            .count()
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "jwt expired" }))).into_response()
}

async fn policies(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.seen_auth.lock().unwrap().push(authorization.clone());

    let expected = format!("Bearer {}", state.valid_token.lock().unwrap());
    if state.reject_all || authorization != expected {
        return unauthorized();
    }
    Json(json!({ "policies": [{ "id": "POL-1", "status": "active" }] })).into_response()
}

async fn missing() -> Response {
    (StatusCode::NOT_FOUND, "no such policy").into_response()
}

async fn refresh(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    state.refresh_bodies.lock().unwrap().push(body);
    tokio::time::sleep(state.refresh_delay).await;

    if state.refresh_status != StatusCode::OK {
        return (
            state.refresh_status,
            Json(json!({ "message": "invalid refresh token" })),
        )
            .into_response();
    }

    let (token, refresh_token) = state.issued.clone();
    *state.valid_token.lock().unwrap() = token.clone();
    Json(json!({ "token": token, "refreshToken": refresh_token })).into_response()
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    if body["password"] != PASSWORD {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "bad credentials" })))
            .into_response();
    }
    *state.valid_token.lock().unwrap() = "login-token".to_string();
    Json(json!({
        "user": { "id": "u-1", "email": body["email"], "kycStatus": "pending" },
        "token": "login-token",
        "refreshToken": "login-refresh",
    }))
    .into_response()
}

/// Device whose face scan always succeeds.
pub struct ApprovingBiometrics;

impl BiometricAuthenticator for ApprovingBiometrics {
    fn availability(&self) -> BiometricAvailability {
        BiometricAvailability::available(BiometricKind::Face)
    }

    fn challenge(&self, _prompt: &str) -> Result<(), ChallengeError> {
        Ok(())
    }
}
