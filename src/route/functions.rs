use super::path::RouteParams;
use super::recorder::{Command, StateHandler, StateNode};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Route params, auth context and recorded state handed to every client
/// function
pub struct CallContext<C> {
    pub params: Arc<RouteParams>,
    pub context: Arc<C>,
    /// Root of the connection's recorded state
    pub state: StateNode,
}

impl<C> Clone for CallContext<C> {
    fn clone(&self) -> Self {
        Self {
            params: Arc::clone(&self.params),
            context: Arc::clone(&self.context),
            state: self.state.clone(),
        }
    }
}

pub(crate) type ClientFn<C> =
    Arc<dyn Fn(CallContext<C>, Vec<Value>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Named operations a connection may invoke remotely
pub struct ClientFunctions<C> {
    functions: HashMap<String, ClientFn<C>>,
}

impl<C: Send + Sync + 'static> ClientFunctions<C> {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register `name`. A later registration under the same name replaces the
    /// earlier one.
    pub fn function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallContext<C>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: ClientFn<C> = Arc::new(move |call, args| f(call, args).boxed());
        self.functions.insert(name.into(), handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub(crate) fn get(&self, name: &str) -> Option<ClientFn<C>> {
        self.functions.get(name).cloned()
    }
}

impl<C: Send + Sync + 'static> Default for ClientFunctions<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// A client function bound to one connection's call context and recorder
pub struct BoundFunction<C> {
    pub(crate) f: ClientFn<C>,
    pub(crate) call: CallContext<C>,
    pub(crate) handler: StateHandler,
}

impl<C: Send + Sync + 'static> BoundFunction<C> {
    /// Run the function to completion, then drain and return every command it
    /// recorded (possibly none).
    ///
    /// On failure the recorded commands are discarded so they never leak into
    /// the next invocation.
    pub async fn invoke(self, args: Vec<Value>) -> anyhow::Result<Vec<Command>> {
        let result = (self.f)(self.call, args).await;
        let commands = self.handler.drain();
        result.map(|()| commands)
    }
}
