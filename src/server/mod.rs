// Connection server: route table, upgrade gatekeeping, connection lifecycle

mod connection;

use crate::auth::offered_token_protocol;
use crate::channel::ChannelManager;
use crate::config::ServerConfig;
use crate::route::RouteEntry;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Relay server. Routes are matched in registration order; the first match
/// wins even if a later route is more specific.
pub struct Server {
    config: ServerConfig,
    channels: Arc<dyn ChannelManager>,
    routes: RwLock<Vec<Arc<dyn RouteEntry>>>,
}

impl Server {
    pub fn new(config: ServerConfig, channels: Arc<dyn ChannelManager>) -> Self {
        Self {
            config,
            channels,
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Append a route to the table
    pub fn use_route<R: RouteEntry + 'static>(&self, route: R) {
        info!(route = %route.pattern(), "Route registered");
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(route));
    }

    pub fn route_count(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn channels(&self) -> &Arc<dyn ChannelManager> {
        &self.channels
    }

    /// Router that treats every request path as a potential upgrade
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .fallback(upgrade_handler)
            .with_state(Arc::clone(self))
    }

    /// Serve on an already bound listener until the listener fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        let router = self.router();
        axum::serve(listener, router).await
    }

    /// First route matching `path`, with its captured params
    fn find_route(
        &self,
        path: &str,
    ) -> Option<(Arc<dyn RouteEntry>, crate::route::RouteParams)> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes.iter().find_map(|route| {
            route
                .match_path(path)
                .map(|params| (Arc::clone(route), params))
        })
    }
}

/// Strip the configured prefix, keeping a leading '/'.
///
/// Returns `None` when the path lies outside the prefix.
fn strip_path_prefix(prefix: &str, path: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;

    if rest.is_empty() {
        return Some("/".to_string());
    }
    if !rest.starts_with('/') {
        return None;
    }
    Some(rest.to_string())
}

fn reject(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("Rejected");
    (status, [(header::CONNECTION, "close")], reason).into_response()
}

/// Route lookup, auth and upgrade for every incoming request
async fn upgrade_handler(
    State(server): State<Arc<Server>>,
    ws: Option<WebSocketUpgrade>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Some(path) = strip_path_prefix(&server.config.path_prefix, uri.path()) else {
        debug!(path = %uri.path(), "Request outside path prefix");
        return reject(StatusCode::NOT_FOUND);
    };

    let Some((route, params)) = server.find_route(&path) else {
        debug!(path = %path, "No route matched");
        return reject(StatusCode::NOT_FOUND);
    };

    let Some(session) = route.authorize(params, &headers).await else {
        info!(path = %path, route = %route.pattern(), "Connection unauthorized");
        return reject(StatusCode::UNAUTHORIZED);
    };

    let Some(ws) = ws else {
        debug!(path = %path, "Authorized request is not a WebSocket upgrade");
        return reject(StatusCode::UPGRADE_REQUIRED);
    };

    // Clients that authenticate through a token subprotocol require it echoed
    let ws = match offered_token_protocol(&headers) {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    let channels = Arc::clone(&server.channels);
    let config = server.config.clone();
    ws.on_upgrade(move |socket| connection::run(socket, channels, session, config))
}
