//! Integration test harness for the Pestania cart client.
//!
//! Provides [`MockCartServer`], an in-process `axum` implementation of the
//! storefront `/api/cart` resource bound to an ephemeral port. It keeps the
//! cart in memory, checks the bearer token, records every request it
//! receives and can be told to fail or hold specific requests.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pestania-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, Method, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use pestania_storefront::{
    CartManager, api::CartApiClient, config::parse_api_url, session::AuthSession,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Bearer token the mock server accepts by default.
pub const TEST_TOKEN: &str = "test-token";

/// Largest request body the mock server will buffer.
const BODY_LIMIT: usize = 64 * 1024;

/// A request as seen by the mock server.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    /// `"METHOD /path"`, handy for asserting on request sequences.
    #[must_use]
    pub fn line(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[derive(Debug, Clone)]
struct StoredItem {
    id: i32,
    product_id: i32,
    quantity: u32,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    method: Method,
    path: String,
    status: StatusCode,
    body: Option<String>,
}

#[derive(Debug)]
struct HeldRequest {
    method: Method,
    path: String,
    release: oneshot::Receiver<()>,
}

#[derive(Debug)]
struct ServerState {
    token: String,
    catalog: HashMap<i32, Value>,
    items: Vec<StoredItem>,
    next_item_id: i32,
    requests: Vec<RecordedRequest>,
    failures: VecDeque<InjectedFailure>,
    held: Vec<HeldRequest>,
}

type SharedState = Arc<Mutex<ServerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process mock of the storefront cart API.
#[derive(Debug)]
pub struct MockCartServer {
    addr: SocketAddr,
    state: SharedState,
    task: JoinHandle<()>,
}

impl Drop for MockCartServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockCartServer {
    /// Start a server with an empty catalog.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(ServerState {
            token: TEST_TOKEN.to_string(),
            catalog: HashMap::new(),
            items: Vec::new(),
            next_item_id: 1,
            requests: Vec::new(),
            failures: VecDeque::new(),
            held: Vec::new(),
        }));

        let app = Router::new()
            .route(
                "/api/cart",
                get(get_cart).post(add_item).delete(clear_cart),
            )
            .route("/api/cart/{id}", put(update_item).delete(remove_item))
            .layer(middleware::from_fn_with_state(state.clone(), gatekeeper))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock cart server");
        let addr = listener.local_addr().expect("Failed to read local address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    /// Base URL of the API, ending in `/`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Make `product_id` purchasable at `price` (sent as given, e.g. a JSON number).
    pub fn add_product(&self, product_id: i32, price: impl Into<Value>) {
        lock(&self.state).catalog.insert(product_id, price.into());
    }

    /// The id the next created cart item will get.
    pub fn set_next_item_id(&self, id: i32) {
        lock(&self.state).next_item_id = id;
    }

    /// Put an item in the cart directly, as another device would.
    pub fn seed_item(&self, product_id: i32, quantity: u32) -> i32 {
        let mut state = lock(&self.state);
        let id = state.next_item_id;
        state.next_item_id += 1;
        state.items.push(StoredItem {
            id,
            product_id,
            quantity,
        });
        id
    }

    /// Remove every item server-side, as another device would.
    pub fn wipe_cart(&self) {
        lock(&self.state).items.clear();
    }

    /// Fail the next `method path` request with `status` and an optional `{error}` body.
    pub fn fail_once(&self, method: Method, path: &str, status: StatusCode, error: Option<&str>) {
        lock(&self.state).failures.push_back(InjectedFailure {
            method,
            path: path.to_string(),
            status,
            body: error.map(|e| json!({ "error": e }).to_string()),
        });
    }

    /// Fail the next `method path` request with a non-JSON body.
    pub fn fail_once_with_text(&self, method: Method, path: &str, status: StatusCode, text: &str) {
        lock(&self.state).failures.push_back(InjectedFailure {
            method,
            path: path.to_string(),
            status,
            body: Some(text.to_string()),
        });
    }

    /// Hold the next `method path` request until the returned sender fires
    /// (or is dropped). The request is recorded as soon as it arrives.
    pub fn hold_once(&self, method: Method, path: &str) -> oneshot::Sender<()> {
        let (tx, release) = oneshot::channel();
        lock(&self.state).held.push(HeldRequest {
            method,
            path: path.to_string(),
            release,
        });
        tx
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// Request lines (`"GET /api/cart"`) received so far.
    #[must_use]
    pub fn request_lines(&self) -> Vec<String> {
        self.requests().iter().map(RecordedRequest::line).collect()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        lock(&self.state).requests.clear();
    }

    /// Total units in the server-side cart.
    #[must_use]
    pub fn server_item_count(&self) -> u64 {
        lock(&self.state)
            .items
            .iter()
            .map(|i| u64::from(i.quantity))
            .sum()
    }

    /// Build a cart manager pointed at this server.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn manager(&self, session: Arc<dyn AuthSession>, message_ttl: Duration) -> CartManager {
        manager_for(&self.base_url(), session, message_ttl)
    }
}

/// Build a cart manager for `base_url` that never goes through a proxy.
///
/// # Panics
///
/// Panics if the URL or the HTTP client is invalid.
#[must_use]
pub fn manager_for(
    base_url: &str,
    session: Arc<dyn AuthSession>,
    message_ttl: Duration,
) -> CartManager {
    let url = parse_api_url(base_url).expect("Invalid base URL");
    let http = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("Failed to build HTTP client");
    let api = CartApiClient::with_client(http, &url, session).expect("Failed to build cart client");
    CartManager::new(api, message_ttl)
}

/// Poll `check` until it returns `true` or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Records the request, waits if it is held, then applies injected
/// failures and the bearer check.
async fn gatekeeper(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .unwrap_or_default();
    let authorization = bearer_header(&parts.headers);

    let (held, failure, authorized) = {
        let mut s = lock(&state);
        s.requests.push(RecordedRequest {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            authorization: authorization.clone(),
            body: serde_json::from_slice(&bytes).ok(),
        });
        let position = s
            .failures
            .iter()
            .position(|f| f.method == parts.method && f.path == parts.uri.path());
        let failure = position.and_then(|i| s.failures.remove(i));
        let held = s
            .held
            .iter()
            .position(|h| h.method == parts.method && h.path == parts.uri.path())
            .map(|i| s.held.remove(i));
        let authorized = authorization.as_deref() == Some(format!("Bearer {}", s.token).as_str());
        (held, failure, authorized)
    };

    if let Some(held) = held {
        let _ = held.release.await;
    }

    if let Some(failure) = failure {
        return (failure.status, failure.body.unwrap_or_default()).into_response();
    }
    if !authorized {
        return api_error(StatusCode::UNAUTHORIZED, "Token inválido");
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn bearer_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn api_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn render_item(state: &ServerState, item: &StoredItem) -> Value {
    let price = state.catalog.get(&item.product_id).cloned().unwrap_or(Value::Null);
    json!({
        "id": item.id,
        "userId": 1,
        "productId": item.product_id,
        "quantity": item.quantity,
        "product": {
            "id": item.product_id,
            "name": format!("Pack {}", item.product_id),
            "price": price,
        },
    })
}

async fn get_cart(State(state): State<SharedState>) -> Response {
    let s = lock(&state);
    let items: Vec<Value> = s.items.iter().map(|i| render_item(&s, i)).collect();
    Json(json!({ "items": items })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddBody {
    product_id: i32,
    quantity: u32,
}

async fn add_item(State(state): State<SharedState>, Json(body): Json<AddBody>) -> Response {
    let mut s = lock(&state);
    if !s.catalog.contains_key(&body.product_id) {
        return api_error(StatusCode::NOT_FOUND, "Producto no encontrado");
    }
    if body.quantity == 0 {
        return api_error(StatusCode::BAD_REQUEST, "Cantidad inválida");
    }

    let index = match s.items.iter().position(|i| i.product_id == body.product_id) {
        Some(index) => {
            if let Some(item) = s.items.get_mut(index) {
                item.quantity += body.quantity;
            }
            index
        }
        None => {
            let id = s.next_item_id;
            s.next_item_id += 1;
            s.items.push(StoredItem {
                id,
                product_id: body.product_id,
                quantity: body.quantity,
            });
            s.items.len() - 1
        }
    };

    let rendered = s.items.get(index).map(|item| render_item(&s, item));
    (StatusCode::CREATED, Json(rendered.unwrap_or(Value::Null))).into_response()
}

#[derive(Deserialize)]
struct UpdateBody {
    quantity: u32,
}

async fn update_item(
    State(state): State<SharedState>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateBody>,
) -> Response {
    let mut s = lock(&state);
    let Some(index) = s.items.iter().position(|i| i.id == id) else {
        return api_error(StatusCode::NOT_FOUND, "Item no encontrado");
    };
    if let Some(item) = s.items.get_mut(index) {
        item.quantity = body.quantity;
    }
    let rendered = s.items.get(index).map(|item| render_item(&s, item));
    Json(rendered.unwrap_or(Value::Null)).into_response()
}

async fn remove_item(State(state): State<SharedState>, Path(id): Path<i32>) -> Response {
    let mut s = lock(&state);
    let before = s.items.len();
    s.items.retain(|i| i.id != id);
    if s.items.len() == before {
        return api_error(StatusCode::NOT_FOUND, "Item no encontrado");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn clear_cart(State(state): State<SharedState>) -> Response {
    lock(&state).items.clear();
    StatusCode::NO_CONTENT.into_response()
}
