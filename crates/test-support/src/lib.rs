use anyhow::Context as _;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::process::Child;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

#[derive(Debug, Clone)]
struct Served {
    status: StatusCode,
    content_type: String,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct ServerState {
    documents: Mutex<HashMap<String, Served>>,
    hits: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
}

/// In-process HTTP server that serves `OpenAPI` documents from memory.
///
/// Unknown paths answer `404`. The server shuts down when dropped.
pub struct DocumentServer {
    base_url: String,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    _handle: JoinHandle<()>,
}

impl DocumentServer {
    /// Bind an ephemeral localhost port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the listener fails.
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/{*path}", any(serve_document))
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind document server")?;
        let addr = listener.local_addr().context("document server local_addr")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let handle = tokio::spawn(async move {
            let _ = server.await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
            _handle: handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path` (which must start with `/`).
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Serve `body` at `path` with a `200` status.
    pub fn set_document(&self, path: &str, body: impl Into<Vec<u8>>, content_type: &str) {
        self.state.documents.lock().insert(
            path.to_string(),
            Served {
                status: StatusCode::OK,
                content_type: content_type.to_string(),
                body: body.into(),
            },
        );
    }

    /// Answer requests for `path` with `status` and an empty body.
    pub fn set_status(&self, path: &str, status: u16) {
        self.state.documents.lock().insert(
            path.to_string(),
            Served {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                content_type: "text/plain".to_string(),
                body: Vec::new(),
            },
        );
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Number of requests received for `path`.
    #[must_use]
    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().get(path).copied().unwrap_or(0)
    }
}

impl Drop for DocumentServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve_document(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *state.hits.lock().entry(path.clone()).or_default() += 1;

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let served = state.documents.lock().get(&path).cloned();
    match served {
        Some(s) => (s.status, [(header::CONTENT_TYPE, s.content_type)], s.body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// A JSON `OpenAPI` 3.0 document with `endpoints` GET operations (`/items{i}/{id}`) and one model.
///
/// Operations whose index is a multiple of three are tagged `admin`, the rest `items`.
#[must_use]
pub fn generated_document(endpoints: usize) -> String {
    let mut paths = Map::new();
    for i in 0..endpoints {
        let tag = if i % 3 == 0 { "admin" } else { "items" };
        paths.insert(
            format!("/items{i}/{{id}}"),
            json!({
                "get": {
                    "operationId": format!("getItem{i}"),
                    "summary": format!("Fetch item {i}"),
                    "tags": [tag],
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}
                    ],
                    "responses": {
                        "200": {
                            "description": "ok",
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/Item"}
                                }
                            }
                        }
                    }
                }
            }),
        );
    }
    let doc = json!({
        "openapi": "3.0.3",
        "info": {"title": "Generated", "version": "1.0.0"},
        "paths": Value::Object(paths),
        "components": {
            "schemas": {
                "Item": {
                    "type": "object",
                    "required": ["id"],
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"}
                    }
                }
            }
        }
    });
    doc.to_string()
}

/// A small YAML document used across the service tests.
pub const USERS_YAML: &str = r##"openapi: 3.0.3
info:
  title: Users API
  version: "2.1.0"
  description: Manage users and their orders.
servers:
  - url: /v2
tags:
  - name: users
  - name: orders
security:
  - bearer: []
paths:
  /users:
    get:
      operationId: listUsers
      summary: List users
      tags: [users]
      parameters:
        - name: limit
          in: query
          schema:
            type: integer
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: '#/components/schemas/User'
    post:
      operationId: createUser
      summary: Create a user
      tags: [users]
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/User'
      responses:
        "201":
          description: created
  /users/{id}:
    get:
      operationId: getUser
      summary: Fetch one user
      tags: [users]
      parameters:
        - name: id
          in: path
          required: true
          schema:
            type: string
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/User'
        "404":
          description: missing
  /orders:
    get:
      operationId: listOrders
      summary: List orders
      tags: [orders]
      security: []
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: '#/components/schemas/Order'
  /health:
    get:
      operationId: health
      deprecated: true
      security: []
      responses:
        "200":
          description: ok
components:
  securitySchemes:
    bearer:
      type: http
      scheme: bearer
  schemas:
    User:
      type: object
      description: A registered user.
      required: [id, email]
      properties:
        id:
          type: string
        email:
          type: string
          format: email
        address:
          $ref: '#/components/schemas/Address'
    Address:
      type: object
      properties:
        city:
          type: string
    Order:
      type: object
      properties:
        id:
          type: string
        status:
          $ref: '#/components/schemas/OrderStatus'
    OrderStatus:
      type: string
      enum: [open, shipped]
"##;
