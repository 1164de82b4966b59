//! HTTP surface of the relay.
//!
//! A thin axum router over the broker: the WebSocket upgrade, a raw publish
//! endpoint, and the chat message endpoints that persist before they
//! broadcast. Every route except `/healthcheck` requires a bearer token.

pub mod auth;
pub mod error;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerHandle};
use crate::config::Settings;
use crate::notifications::NotificationHook;
use crate::persistence::{MessageStore, NotificationSource};
use crate::transport::PumpSettings;
use crate::utils::error::RelayError;

pub use auth::{AuthUser, JwtKeys};
pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub broker: BrokerHandle,
    pub store: Arc<dyn MessageStore>,
    pub jwt: Arc<JwtKeys>,
    pub pump: PumpSettings,
}

impl AppState {
    pub fn new(broker: BrokerHandle, store: Arc<dyn MessageStore>, settings: &Settings) -> Self {
        Self {
            broker,
            store,
            jwt: Arc::new(JwtKeys::from_secret(&settings.server.jwt_secret)),
            pump: PumpSettings::from_settings(settings),
        }
    }
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/ws", get(handlers::ws_upgrade))
        .route("/publish", post(handlers::publish))
        .route("/message", post(handlers::create_message))
        .route("/message/{id}", delete(handlers::delete_message))
        .layer(cors(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS over the explicit origins. A wildcard cannot be
/// combined with credentials, so it is dropped rather than allowed.
fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|origin| {
            let wildcard = origin.trim() == "*";
            if wildcard {
                warn!("ignoring wildcard CORS origin");
            }
            !wildcard
        })
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

/// Run the relay on `listener` until `shutdown` resolves: one broker with the
/// notification hook, and the router over it.
pub async fn serve<S>(
    listener: TcpListener,
    settings: &Settings,
    store: Arc<S>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), RelayError>
where
    S: NotificationSource + MessageStore + 'static,
{
    let source: Arc<dyn NotificationSource> = store.clone();
    let hook = Arc::new(NotificationHook::new(source));
    let (broker, handle) = Broker::new(hook, &settings.broker);
    let broker_task = tokio::spawn(broker.run());

    let state = AppState::new(handle.clone(), store, settings);
    let app = router(state, &settings.server.allowed_origins);

    // upgraded sockets outlive graceful shutdown, so stop the broker as soon
    // as the signal fires; that closes them
    let stop = async move {
        shutdown.await;
        if handle.shutdown().await.is_err() {
            warn!("broker already stopped");
        }
    };

    info!(addr = %listener.local_addr()?, "relay listening");
    axum::serve(listener, app).with_graceful_shutdown(stop).await?;

    let _ = broker_task.await;
    info!("relay stopped");
    Ok(())
}
