// Route registration and command capture
//
// A route pairs a path pattern with everything needed to serve a connection:
// the channel it joins, the auth predicate, the initial snapshot, and the
// client functions it may call. Client functions never mutate server state;
// they invoke operations on a recorded view of the state template, and the
// resulting commands are what gets broadcast.

mod functions;
mod path;
mod recorder;
mod session;
mod template;

pub use functions::{BoundFunction, CallContext, ClientFunctions};
pub use path::{PathPattern, PatternError, RouteParams};
pub use recorder::{Command, StateError, StateHandler, StateNode};
pub use session::{Authorized, RouteEntry, Session};
pub use template::{NodeSchema, StateTemplate, TemplateError, OPERATION_MARKER};

use axum::http::HeaderMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

#[cfg(test)]
mod tests;

/// Route registration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid path pattern: {0}")]
    Pattern(#[from] PatternError),
    #[error("invalid state template: {0}")]
    Template(#[from] TemplateError),
}

type ChannelFn = Arc<dyn Fn(&RouteParams) -> Option<String> + Send + Sync>;
type AuthFn<C> =
    Arc<dyn Fn(RouteParams, HeaderMap) -> BoxFuture<'static, anyhow::Result<Option<C>>> + Send + Sync>;
type InitialStateFn<C> =
    Arc<dyn Fn(RouteParams, Arc<C>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Start registering a route.
///
/// `channel` derives the broadcast channel from the matched params; `None`
/// keeps the connection private. The returned factory completes the route
/// with [`RouteFactory::build`].
pub fn register<F>(
    pattern: &str,
    channel: F,
    template: StateTemplate,
) -> Result<RouteFactory, RegistrationError>
where
    F: Fn(&RouteParams) -> Option<String> + Send + Sync + 'static,
{
    let pattern = PathPattern::parse(pattern)?;
    template.validate()?;

    Ok(RouteFactory {
        pattern,
        channel_fn: Arc::new(channel),
        template: Arc::new(template),
    })
}

/// First registration stage: path, channel deriver and state template
#[derive(Clone)]
pub struct RouteFactory {
    pattern: PathPattern,
    channel_fn: ChannelFn,
    template: Arc<StateTemplate>,
}

impl RouteFactory {
    /// Complete the route with its auth predicate, initial-state producer and
    /// client functions.
    ///
    /// `auth` resolves to `Ok(Some(context))` to accept; `Ok(None)`, an error
    /// or a panic rejects the connection.
    pub fn build<C, A, AFut, I, IFut>(
        self,
        auth: A,
        initial_state: I,
        functions: ClientFunctions<C>,
    ) -> Route<C>
    where
        C: Send + Sync + 'static,
        A: Fn(RouteParams, HeaderMap) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = anyhow::Result<Option<C>>> + Send + 'static,
        I: Fn(RouteParams, Arc<C>) -> IFut + Send + Sync + 'static,
        IFut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let auth: AuthFn<C> = Arc::new(move |params, headers| auth(params, headers).boxed());
        let initial_state: InitialStateFn<C> =
            Arc::new(move |params, context| initial_state(params, context).boxed());

        Route {
            pattern: Arc::new(self.pattern),
            channel_fn: self.channel_fn,
            template: self.template,
            auth,
            initial_state,
            functions: Arc::new(functions),
        }
    }
}

/// A fully registered route. Immutable once built; cloning is cheap.
pub struct Route<C> {
    pattern: Arc<PathPattern>,
    channel_fn: ChannelFn,
    template: Arc<StateTemplate>,
    auth: AuthFn<C>,
    initial_state: InitialStateFn<C>,
    functions: Arc<ClientFunctions<C>>,
}

impl<C> Clone for Route<C> {
    fn clone(&self) -> Self {
        Self {
            pattern: Arc::clone(&self.pattern),
            channel_fn: Arc::clone(&self.channel_fn),
            template: Arc::clone(&self.template),
            auth: Arc::clone(&self.auth),
            initial_state: Arc::clone(&self.initial_state),
            functions: Arc::clone(&self.functions),
        }
    }
}

impl<C: Send + Sync + 'static> Route<C> {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn template(&self) -> &StateTemplate {
        &self.template
    }

    /// Match a prefix-stripped request path against this route
    pub fn match_path(&self, path: &str) -> Option<RouteParams> {
        self.pattern.matches(path)
    }

    /// Run the auth predicate. Every failure mode maps to `None`.
    pub async fn auth(&self, params: &RouteParams, headers: &HeaderMap) -> Option<Authorized<C>> {
        let call = std::panic::catch_unwind(AssertUnwindSafe(|| {
            (self.auth)(params.clone(), headers.clone())
        }));

        let outcome = match call {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        let context = match outcome {
            Ok(Ok(Some(context))) => context,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(route = %self.pattern(), error = %e, "Auth failed");
                return None;
            }
            Err(_) => {
                error!(route = %self.pattern(), "Auth predicate panicked");
                return None;
            }
        };

        Some(Authorized {
            channel: (self.channel_fn)(params),
            context: Arc::new(context),
        })
    }

    /// Fresh recorder for a new connection
    pub fn create_state_handler(&self) -> StateHandler {
        StateHandler::new(Arc::clone(&self.template))
    }

    /// Look up a client function and bind it to a connection.
    ///
    /// Returns `None` when no function is registered under `name`.
    pub fn get_function(
        &self,
        call: CallContext<C>,
        handler: &StateHandler,
        name: &str,
    ) -> Option<BoundFunction<C>> {
        let f = self.functions.get(name)?;
        Some(BoundFunction {
            f,
            call,
            handler: handler.clone(),
        })
    }

    /// Produce the snapshot sent once when a connection is established
    pub fn get_initial_state(
        &self,
        params: &RouteParams,
        context: Arc<C>,
    ) -> BoxFuture<'static, anyhow::Result<Value>> {
        (self.initial_state)(params.clone(), context)
    }
}
