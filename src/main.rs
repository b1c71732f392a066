use anyhow::{Context, Result};
use axum::http::HeaderMap;
use serde_json::{json, Value};
use statecast::auth::extract_token;
use statecast::config::{load_config, StatecastConfig};
use statecast::route::RouteParams;
use statecast::{
    register, CallContext, ChannelManager, ClientFunctions, InMemoryChannelManager, NodeSchema,
    Route, Server, StateTemplate,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Authenticated room member. The demo treats the token as a display name.
struct Member {
    name: String,
}

fn room_template() -> StateTemplate {
    StateTemplate::new()
        .root(
            "board",
            NodeSchema::new()
                .operations(["draw", "clear"])
                .child("cursor", NodeSchema::new().operation("move")),
        )
        .root("chat", NodeSchema::new().operation("say"))
}

async fn authenticate(_params: RouteParams, headers: HeaderMap) -> Result<Option<Member>> {
    match extract_token(&headers) {
        Ok(name) => Ok(Some(Member { name })),
        Err(e) => {
            debug!(error = %e, "Rejecting room connection");
            Ok(None)
        }
    }
}

async fn initial_state(params: RouteParams, member: Arc<Member>) -> Result<Value> {
    Ok(json!({
        "room": params.get("room").cloned().unwrap_or_default(),
        "member": member.name,
    }))
}

async fn draw(call: CallContext<Member>, args: Vec<Value>) -> Result<()> {
    call.state.node("board")?.call("draw", args)?;
    Ok(())
}

async fn clear(call: CallContext<Member>, _args: Vec<Value>) -> Result<()> {
    call.state.node("board")?.call("clear", Vec::new())?;
    Ok(())
}

async fn move_cursor(call: CallContext<Member>, args: Vec<Value>) -> Result<()> {
    let mut cursor = vec![json!(call.context.name)];
    cursor.extend(args);
    call.state.node("board")?.node("cursor")?.call("move", cursor)?;
    Ok(())
}

async fn say(call: CallContext<Member>, args: Vec<Value>) -> Result<()> {
    let text = args
        .first()
        .and_then(Value::as_str)
        .context("say expects a message string")?;
    call.state
        .node("chat")?
        .call("say", vec![json!(call.context.name), json!(text)])?;
    Ok(())
}

fn room_route() -> Result<Route<Member>> {
    let route = register("/rooms/:room", |params| params.get("room").cloned(), room_template())?
        .build(
            authenticate,
            initial_state,
            ClientFunctions::new()
                .function("draw", draw)
                .function("clear", clear)
                .function("moveCursor", move_cursor)
                .function("say", say),
        );
    Ok(route)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statecast=info".into()),
        )
        .init();

    info!("Statecast starting...");

    let config = match std::env::var("STATECAST_CONFIG") {
        Ok(path) => {
            load_config(&path).with_context(|| format!("Failed to load config from {path}"))?
        }
        Err(_) => StatecastConfig::default(),
    };
    let server_config = config.server.apply_env();

    let channels: Arc<dyn ChannelManager> = Arc::new(InMemoryChannelManager::new());
    let server = Arc::new(Server::new(server_config.clone(), channels));
    server.use_route(room_route()?);

    let listener = TcpListener::bind(&server_config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.bind_address))?;

    info!(
        address = %listener.local_addr()?,
        path_prefix = %server_config.path_prefix,
        routes = server.route_count(),
        "Statecast listening"
    );

    server.serve(listener).await?;

    Ok(())
}
