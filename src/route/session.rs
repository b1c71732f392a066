use super::functions::CallContext;
use super::path::RouteParams;
use super::recorder::{Command, StateHandler};
use super::Route;
use axum::http::HeaderMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a successful auth check
pub struct Authorized<C> {
    pub channel: Option<String>,
    pub context: Arc<C>,
}

/// Object-safe view of a route, so routes with different context types can
/// share one route table
pub trait RouteEntry: Send + Sync {
    fn pattern(&self) -> &str;

    fn match_path(&self, path: &str) -> Option<RouteParams>;

    /// Authenticate and, on success, open a session holding the connection's
    /// params, context and fresh recorder
    fn authorize<'a>(
        &'a self,
        params: RouteParams,
        headers: &'a HeaderMap,
    ) -> BoxFuture<'a, Option<Box<dyn Session>>>;
}

/// Per-connection route state once auth has succeeded
pub trait Session: Send + Sync {
    fn channel(&self) -> Option<&str>;

    fn params(&self) -> &RouteParams;

    fn initial_state(&self) -> BoxFuture<'static, anyhow::Result<Value>>;

    /// Bind `name` to this connection. `None` if the route has no such function.
    fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> Option<BoxFuture<'static, anyhow::Result<Vec<Command>>>>;
}

impl<C: Send + Sync + 'static> RouteEntry for Route<C> {
    fn pattern(&self) -> &str {
        Route::pattern(self)
    }

    fn match_path(&self, path: &str) -> Option<RouteParams> {
        Route::match_path(self, path)
    }

    fn authorize<'a>(
        &'a self,
        params: RouteParams,
        headers: &'a HeaderMap,
    ) -> BoxFuture<'a, Option<Box<dyn Session>>> {
        async move {
            let authorized = self.auth(&params, headers).await?;
            let session: Box<dyn Session> = Box::new(RouteSession {
                route: self.clone(),
                handler: self.create_state_handler(),
                params: Arc::new(params),
                authorized,
            });
            Some(session)
        }
        .boxed()
    }
}

struct RouteSession<C> {
    route: Route<C>,
    handler: StateHandler,
    params: Arc<RouteParams>,
    authorized: Authorized<C>,
}

impl<C: Send + Sync + 'static> Session for RouteSession<C> {
    fn channel(&self) -> Option<&str> {
        self.authorized.channel.as_deref()
    }

    fn params(&self) -> &RouteParams {
        &self.params
    }

    fn initial_state(&self) -> BoxFuture<'static, anyhow::Result<Value>> {
        self.route
            .get_initial_state(&self.params, Arc::clone(&self.authorized.context))
    }

    fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> Option<BoxFuture<'static, anyhow::Result<Vec<Command>>>> {
        let call = CallContext {
            params: Arc::clone(&self.params),
            context: Arc::clone(&self.authorized.context),
            state: self.handler.state(),
        };
        let bound = self.route.get_function(call, &self.handler, name)?;
        Some(bound.invoke(args).boxed())
    }
}
