//! Facegate server implementation
//!
//! Axum router with the device WebSocket endpoint, static image serving, health check
//! and the operator routes, plus startup and shutdown of the periodic components.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler;
use axum::{
  extract::{
    ws::{Message, WebSocket, WebSocketUpgrade},
    DefaultBodyLimit, Request, State,
  },
  http::{header, StatusCode},
  middleware::{self, Next},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use chrono::Utc;
use facegate::base::constants::MAX_FRAME_SIZE;
use facegate::base::Store;
use facegate::components::dispatcher::JobDispatcher;
use facegate::components::materializer::{MaterializerConfig, ScheduleMaterializer};
use facegate::components::retry::{RetryConfig, RetryManager};
use facegate::components::ComponentLifecycle;
use facegate::gateway::Gateway;
use facegate::memdb::MemoryStore;
use facegate::photo::{ImageProcessor, ImageProcessorConfig};
use facegate::registry::ConnectionRegistry;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Outbound frames buffered per connection
const OUTBOUND_BUFFER: usize = 256;

/// How long shutdown waits for each periodic component
const COMPONENT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for the server
pub struct AppState {
  pub gateway: Arc<Gateway>,
  pub images: ImageProcessor,
  pub config: ServerConfig,
}

/// Facegate server
///
/// Owns the gateway and its store, serves devices on `/ws` and runs the schedule
/// materializer, job dispatcher and retry manager in the background.
pub struct FacegateServer {
  config: ServerConfig,
  state: Arc<AppState>,
}

impl FacegateServer {
  /// Create a server over an existing store
  pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> Self {
    let gateway = Arc::new(Gateway::new(
      store.clone(),
      Arc::new(ConnectionRegistry::new()),
    ));
    let images = ImageProcessor::new(store, ImageProcessorConfig::new(config.images_dir()));
    let state = Arc::new(AppState {
      gateway,
      images,
      config: config.clone(),
    });
    Self { config, state }
  }

  /// Create a server, choosing the store from the configuration
  pub async fn from_config(config: ServerConfig) -> Result<Self> {
    let store = open_store(&config).await?;
    Ok(Self::new(config, store))
  }

  pub fn gateway(&self) -> &Arc<Gateway> {
    &self.state.gateway
  }

  pub fn config(&self) -> &ServerConfig {
    &self.config
  }

  /// Build the HTTP router
  pub fn router(&self) -> Router {
    let state = self.state.clone();

    let mut app = Router::new()
      .route("/ws", get(websocket_handler))
      .route("/health", get(health_handler));

    if self.config.admin.is_some() {
      let api = Router::new()
        .route("/api/devices/{id}/open", post(handler::open_door))
        .route("/api/devices/{id}/relay", post(handler::relay_out))
        .route(
          "/api/persons/{phone}/image",
          post(handler::upload_person_image)
            .get(handler::person_image)
            .layer(DefaultBodyLimit::max(handler::MAX_IMAGE_UPLOAD)),
        )
        .route_layer(middleware::from_fn_with_state(
          state.clone(),
          auth_middleware,
        ));
      app = app.merge(api);
    }

    app
      .nest_service(
        &self.config.image_url_prefix,
        ServeDir::new(self.config.images_dir()),
      )
      .nest_service("/uploads", ServeDir::new(self.config.uploads_dir()))
      .layer(CorsLayer::permissive())
      .layer(TraceLayer::new_for_http())
      .with_state(state)
  }

  /// The periodic components, configured from the server configuration
  pub fn components(&self) -> Vec<Arc<dyn ComponentLifecycle>> {
    let store = self.state.gateway.store().clone();
    vec![
      Arc::new(ScheduleMaterializer::new(
        store.clone(),
        MaterializerConfig {
          interval: self.config.materialize_interval,
          ..Default::default()
        },
      )),
      Arc::new(JobDispatcher::new(
        self.state.gateway.clone(),
        self.config.dispatcher_config(),
      )),
      Arc::new(RetryManager::new(
        store,
        RetryConfig {
          interval: self.config.retry_interval,
          ..Default::default()
        },
      )),
    ]
  }

  /// Run the server until ctrl-c
  pub async fn run(self) -> Result<()> {
    let listener = TcpListener::bind(self.config.addr).await.map_err(Error::Io)?;
    self
      .serve(listener, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, stopping server...");
      })
      .await
  }

  /// Serve on an already bound listener until `shutdown` resolves
  pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    tokio::fs::create_dir_all(self.config.images_dir()).await?;
    tokio::fs::create_dir_all(self.config.uploads_dir()).await?;

    let components = self.components();
    let handles: Vec<_> = components.iter().map(|c| c.clone().start()).collect();
    info!("Periodic components started");

    let app = self.router();
    let addr = listener.local_addr().map_err(Error::Io)?;
    info!("Facegate server listening on {}", addr);

    let result = axum::serve(listener, app)
      .with_graceful_shutdown(shutdown)
      .await
      .map_err(Error::Io);

    for component in &components {
      component.shutdown();
    }
    for handle in handles {
      if tokio::time::timeout(COMPONENT_STOP_TIMEOUT, handle)
        .await
        .is_err()
      {
        warn!("Periodic component did not stop in time");
      }
    }
    info!("Periodic components stopped");

    result
  }
}

async fn open_store(config: &ServerConfig) -> Result<Arc<dyn Store>> {
  match config.database_url.as_deref() {
    #[cfg(feature = "postgres")]
    Some(url) => {
      let store = facegate::backend::PostgresStore::new(url)
        .await
        .map_err(|e| Error::server(format!("Failed to connect to PostgreSQL: {}", e)))?;
      info!("Using PostgreSQL store");
      Ok(Arc::new(store))
    }
    #[cfg(not(feature = "postgres"))]
    Some(_) => {
      warn!("DATABASE_URL is set but the postgres feature is disabled, using memory store");
      Ok(Arc::new(MemoryStore::new()))
    }
    None => {
      info!("Using memory store");
      Ok(Arc::new(MemoryStore::new()))
    }
  }
}

/// Basic authentication middleware for the operator routes
async fn auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
  let Some(credentials) = state.config.admin.as_ref() else {
    return StatusCode::NOT_FOUND.into_response();
  };

  let authorized = req
    .headers()
    .get(header::AUTHORIZATION)
    .and_then(|h| h.to_str().ok())
    .is_some_and(|value| credentials.verify_header(value));

  if !authorized {
    warn!(path = %req.uri().path(), "Rejected operator request");
    return (
      StatusCode::UNAUTHORIZED,
      [(header::WWW_AUTHENTICATE, "Basic realm=\"facegate\"")],
    )
      .into_response();
  }
  next.run(req).await
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(json!({
    "status": "healthy",
    "timestamp": Utc::now().to_rfc3339(),
    "connections": state.gateway.registry().len(),
  }))
}

/// WebSocket upgrade handler
async fn websocket_handler(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
  ws.max_message_size(MAX_FRAME_SIZE)
    .max_frame_size(MAX_FRAME_SIZE)
    .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one device connection
///
/// Frames are processed in arrival order; every text frame gets exactly one reply.
/// Pushes from other tasks share the same outbound channel.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
  let (mut sender, mut receiver) = socket.split();
  let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
  let mut session = state.gateway.open_session(out_tx.clone());
  debug!(conn_id = session.conn_id(), "Device connection opened");

  let send_task = tokio::spawn(async move {
    while let Some(text) = out_rx.recv().await {
      if sender.send(Message::Text(text.into())).await.is_err() {
        break;
      }
    }
  });

  while let Some(msg) = receiver.next().await {
    let text = match msg {
      Ok(Message::Text(text)) => text.as_str().to_owned(),
      Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
      Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
      Ok(Message::Close(_)) => break,
      Err(e) => {
        warn!(conn_id = session.conn_id(), "WebSocket error: {}", e);
        break;
      }
    };

    let response = state.gateway.handle_frame(&mut session, &text).await;
    match response.to_json() {
      Ok(json) => {
        if out_tx.send(json).await.is_err() {
          break;
        }
      }
      Err(e) => error!("Failed to encode response: {}", e),
    }
  }

  state.gateway.close_session(&session).await;
  drop(out_tx);
  send_task.abort();
  debug!(conn_id = session.conn_id(), "Device connection closed");
}
