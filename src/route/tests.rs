use super::*;
use axum::http::HeaderMap;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct User {
    name: String,
}

fn template() -> StateTemplate {
    StateTemplate::new()
        .root(
            "root",
            NodeSchema::new().child("mid", NodeSchema::new().child("leaf", NodeSchema::new().operation("method"))),
        )
        .root("chat", NodeSchema::new().operation("say"))
}

async fn auth_by_header(_params: RouteParams, headers: HeaderMap) -> anyhow::Result<Option<User>> {
    let name = match headers.get("x-user").and_then(|v| v.to_str().ok()) {
        Some(name) => name,
        None => return Ok(None),
    };
    if name == "explode" {
        anyhow::bail!("auth backend unavailable");
    }
    Ok(Some(User {
        name: name.to_string(),
    }))
}

async fn initial_state(params: RouteParams, user: Arc<User>) -> anyhow::Result<Value> {
    Ok(json!({ "id": params["id"], "user": user.name }))
}

async fn nested(call: CallContext<User>, args: Vec<Value>) -> anyhow::Result<()> {
    call.state
        .node("root")?
        .node("mid")?
        .node("leaf")?
        .call("method", args)?;
    Ok(())
}

async fn noop(_call: CallContext<User>, _args: Vec<Value>) -> anyhow::Result<()> {
    Ok(())
}

async fn chatter(call: CallContext<User>, _args: Vec<Value>) -> anyhow::Result<()> {
    let chat = call.state.node("chat")?;
    chat.call("say", vec![json!(call.context.name)])?;
    tokio::task::yield_now().await;
    chat.call("say", vec![json!(call.params["id"])])?;
    Ok(())
}

async fn half_then_fail(call: CallContext<User>, _args: Vec<Value>) -> anyhow::Result<()> {
    call.state.node("chat")?.call("say", vec![json!("partial")])?;
    anyhow::bail!("gave up halfway")
}

fn build_route() -> Route<User> {
    register("/a/:id", |params| params.get("id").map(|id| format!("room-{id}")), template())
        .unwrap()
        .build(
            auth_by_header,
            initial_state,
            ClientFunctions::new()
                .function("nested", nested)
                .function("noop", noop)
                .function("chatter", chatter)
                .function("halfThenFail", half_then_fail),
        )
}

fn headers(user: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-user", user.parse().unwrap());
    headers
}

fn call_context(handler: &StateHandler) -> CallContext<User> {
    let mut params = RouteParams::new();
    params.insert("id".to_string(), "42".to_string());
    CallContext {
        params: Arc::new(params),
        context: Arc::new(User {
            name: "ada".to_string(),
        }),
        state: handler.state(),
    }
}

#[test]
fn test_register_rejects_bad_pattern() {
    let result = register("no-slash", |_| None, StateTemplate::new());
    assert!(matches!(result, Err(RegistrationError::Pattern(_))));
}

#[test]
fn test_register_rejects_bad_template() {
    let bad = StateTemplate::new().root(
        "board",
        NodeSchema::new().operation("x").child("x", NodeSchema::new()),
    );
    let result = register("/board", |_| None, bad);
    assert!(matches!(result, Err(RegistrationError::Template(_))));
}

#[test]
fn test_match_path() {
    let route = build_route();
    let params = route.match_path("/a/42").unwrap();
    assert_eq!(params["id"], "42");
    assert!(route.match_path("/b/42").is_none());
}

#[tokio::test]
async fn test_auth_success_derives_channel() {
    let route = build_route();
    let params = route.match_path("/a/42").unwrap();

    let authorized = route.auth(&params, &headers("ada")).await.unwrap();

    assert_eq!(authorized.channel.as_deref(), Some("room-42"));
    assert_eq!(authorized.context.name, "ada");
}

#[tokio::test]
async fn test_auth_rejection() {
    let route = build_route();
    let params = route.match_path("/a/42").unwrap();

    assert!(route.auth(&params, &HeaderMap::new()).await.is_none());
}

#[tokio::test]
async fn test_auth_error_becomes_rejection() {
    let route = build_route();
    let params = route.match_path("/a/42").unwrap();

    assert!(route.auth(&params, &headers("explode")).await.is_none());
}

#[tokio::test]
async fn test_auth_panic_becomes_rejection() {
    let route: Route<User> = register("/p", |_| None, StateTemplate::new())
        .unwrap()
        .build(
            |_params: RouteParams, _headers: HeaderMap| async move {
                let missing: Option<User> = None;
                Ok::<_, anyhow::Error>(Some(missing.unwrap()))
            },
            initial_state,
            ClientFunctions::new(),
        );

    assert!(route.auth(&RouteParams::new(), &HeaderMap::new()).await.is_none());
}

#[tokio::test]
async fn test_unknown_function_is_none() {
    let route = build_route();
    let handler = route.create_state_handler();
    let call = call_context(&handler);

    assert!(route.get_function(call, &handler, "doesNotExist").is_none());
}

#[tokio::test]
async fn test_nested_invocation_yields_nested_command() {
    let route = build_route();
    let handler = route.create_state_handler();
    let call = call_context(&handler);

    let commands = route
        .get_function(call, &handler, "nested")
        .unwrap()
        .invoke(vec![json!(1), json!(2)])
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&commands).unwrap(),
        json!([{"root": {"mid": {"leaf": ["method", [1, 2]]}}}])
    );
    assert_eq!(handler.command_count(), 0);
}

#[tokio::test]
async fn test_function_without_calls_yields_empty_list() {
    let route = build_route();
    let handler = route.create_state_handler();
    let call = call_context(&handler);

    let commands = route
        .get_function(call, &handler, "noop")
        .unwrap()
        .invoke(vec![])
        .await
        .unwrap();

    assert!(commands.is_empty());
}

#[tokio::test]
async fn test_multiple_commands_flush_together_in_order() {
    let route = build_route();
    let handler = route.create_state_handler();
    let call = call_context(&handler);

    let commands = route
        .get_function(call, &handler, "chatter")
        .unwrap()
        .invoke(vec![])
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&commands).unwrap(),
        json!([{"chat": ["say", ["ada"]]}, {"chat": ["say", ["42"]]}])
    );
}

#[tokio::test]
async fn test_failed_function_discards_partial_commands() {
    let route = build_route();
    let handler = route.create_state_handler();

    let result = route
        .get_function(call_context(&handler), &handler, "halfThenFail")
        .unwrap()
        .invoke(vec![])
        .await;
    assert!(result.is_err());
    assert_eq!(handler.command_count(), 0);

    // The next invocation only sees its own commands
    let commands = route
        .get_function(call_context(&handler), &handler, "noop")
        .unwrap()
        .invoke(vec![])
        .await
        .unwrap();
    assert!(commands.is_empty());
}

#[tokio::test]
async fn test_initial_state() {
    let route = build_route();
    let params = route.match_path("/a/7").unwrap();
    let context = Arc::new(User {
        name: "grace".to_string(),
    });

    let state = route.get_initial_state(&params, context).await.unwrap();
    assert_eq!(state, json!({"id": "7", "user": "grace"}));
}

#[tokio::test]
async fn test_session_invoke_through_route_entry() {
    let route = build_route();
    let entry: &dyn RouteEntry = &route;
    let params = entry.match_path("/a/9").unwrap();
    let hdrs = headers("ada");

    let session = entry.authorize(params, &hdrs).await.unwrap();
    assert_eq!(session.channel(), Some("room-9"));
    assert_eq!(session.params()["id"], "9");

    let commands = session.invoke("nested", vec![json!("x")]).unwrap().await.unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].path, vec!["root", "mid", "leaf"]);
    assert!(session.invoke("missing", vec![]).is_none());
}

#[tokio::test]
async fn test_sessions_have_separate_recorders() {
    let route = build_route();
    let hdrs = headers("ada");
    let first = RouteEntry::authorize(&route, route.match_path("/a/1").unwrap(), &hdrs)
        .await
        .unwrap();
    let second = RouteEntry::authorize(&route, route.match_path("/a/1").unwrap(), &hdrs)
        .await
        .unwrap();

    let a = first.invoke("chatter", vec![]).unwrap();
    let b = second.invoke("noop", vec![]).unwrap();
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.unwrap().len(), 2);
    assert!(b.unwrap().is_empty());
}
