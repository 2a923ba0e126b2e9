//! HTTP/WebSocket gateway of the daemon.
//!
//! The server:
//! - Serves the pre-rendered home page at `/`
//! - Serves the current sensor records at `/api/sensors`
//! - Upgrades `/changes` to a WebSocket and registers it with the hub
//! - Starts one forwarder per configured upstream
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │     Server      │
//! │  (axum router)  │
//! └───────┬─────────┘
//!         │ /changes upgrade
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  split_socket   │────▶│    HubHandle    │◀──── Forwarders
//! │ (sink + stream) │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Requests arriving while terminating get `503 Service Unavailable`
//! - Only listener setup failures are fatal

mod handlers;
mod websocket;

pub use websocket::split_socket;

use std::io;
use std::sync::Arc;

use axum::routing::get;
use flushcap_core::Sensor;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::forwarder::{Forwarder, ForwarderConfig};
use crate::hub::{HubError, HubHandle};

/// Default listen address
pub const DEFAULT_LISTEN: &str = "localhost:8080";

/// Home page template; `{{canonical_url}}` is replaced at startup.
const HOME_TEMPLATE: &str = include_str!("../../assets/index.html");

/// Body of every 503 response.
pub(crate) const TERMINATING_BODY: &str = "Server Terminating";

/// Gateway configuration, constructed once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`.
    pub listen: String,
    /// Address browsers use to reach this instance, rendered into the page.
    pub canonical_url: String,
    /// Upstream instances to forward events from.
    pub forward: Vec<String>,
    pub forwarder: ForwarderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            canonical_url: DEFAULT_LISTEN.to_string(),
            forward: Vec::new(),
            forwarder: ForwarderConfig::default(),
        }
    }
}

/// Shared state of the request handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub hub: HubHandle,
    pub home_page: Arc<str>,
}

/// The HTTP/WebSocket gateway.
pub struct Server {
    config: ServerConfig,
    hub: HubHandle,
    home_page: Arc<str>,
    /// Stops the listener once the hub is drained.
    shutdown: CancellationToken,
    /// `None` once `terminate` took the forwarders.
    forwarders: Mutex<Option<Vec<Forwarder>>>,
}

impl Server {
    /// Creates the server and pre-renders the home page.
    pub fn new(config: ServerConfig, hub: HubHandle) -> Self {
        let home_page: Arc<str> = render_home(&config.canonical_url).into();
        Self {
            config,
            hub,
            home_page,
            shutdown: CancellationToken::new(),
            forwarders: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// The three routes with request tracing.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            home_page: Arc::clone(&self.home_page),
        };

        Router::new()
            .route("/", get(handlers::serve_home))
            .route("/api/sensors", get(handlers::serve_sensors))
            .route("/changes", get(handlers::serve_changes))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Registers the local sensors with the hub, in order.
    ///
    /// Returns `Ok(false)` when termination was requested before every
    /// sensor was registered; that is a requested shutdown, not a failure.
    ///
    /// # Errors
    ///
    /// - `ServerError::Hub` if a sensor is refused (duplicate name, watch failure)
    pub async fn register_sensors(&self, sensors: &[Arc<dyn Sensor>]) -> Result<bool, ServerError> {
        for sensor in sensors {
            match self.hub.register_sensor(Arc::clone(sensor)).await {
                Ok(()) => {}
                Err(e) if e.is_unavailable() => {
                    info!(sensor = %sensor.name(), "Terminated while registering sensors");
                    return Ok(false);
                }
                Err(e) => {
                    warn!(sensor = %sensor.name(), error = %e, "Failed to register sensor");
                    return Err(e.into());
                }
            }
        }
        Ok(true)
    }

    /// Binds the configured address and serves until terminated.
    ///
    /// # Errors
    ///
    /// - `ServerError::Bind` if the listener cannot be bound
    /// - `ServerError::Serve` if accepting connections fails
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener =
            TcpListener::bind(&self.config.listen)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: self.config.listen.clone(),
                    source,
                })?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until terminated.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().map_err(ServerError::Serve)?;

        match self.hub.mark_running().await {
            Ok(()) => {}
            Err(e) if e.is_unavailable() => {
                info!("Terminated before the listener started");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.start_forwarders().await;

        info!(
            addr = %local_addr,
            canonical_url = %self.config.canonical_url,
            "Server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await
            .map_err(ServerError::Serve)?;

        info!("Server stopped");
        Ok(())
    }

    /// Terminates the hub, stops every forwarder and then the listener.
    ///
    /// # Errors
    ///
    /// A second call returns `ServerError::Hub` with the hub's
    /// `Terminating` / `Terminated` condition.
    pub async fn terminate(&self) -> Result<(), ServerError> {
        let forwarders = self.forwarders.lock().await.take().unwrap_or_default();
        for forwarder in &forwarders {
            forwarder.stop();
        }

        let result = self.hub.terminate().await;

        for forwarder in &forwarders {
            forwarder.drained().await;
        }
        self.shutdown.cancel();

        result.map_err(ServerError::from)
    }

    async fn start_forwarders(&self) {
        let mut guard = self.forwarders.lock().await;
        let Some(forwarders) = guard.as_mut() else {
            return;
        };
        for address in &self.config.forward {
            forwarders.push(Forwarder::with_config(
                address,
                self.hub.clone(),
                self.config.forwarder,
            ));
        }
    }
}

fn render_home(canonical_url: &str) -> String {
    HOME_TEMPLATE.replace("{{canonical_url}}", canonical_url)
}

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] io::Error),

    #[error(transparent)]
    Hub(#[from] HubError),
}
