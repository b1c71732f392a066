use super::template::StateTemplate;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};

/// One captured operation invocation
///
/// Serializes as a tree mirroring the node path, with `[method, args]` at the
/// leaf: `root.mid.leaf.method(1, 2)` becomes
/// `{"root":{"mid":{"leaf":["method",[1,2]]}}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub path: Vec<String>,
    pub method: String,
    pub args: Vec<Value>,
}

impl Command {
    pub fn to_value(&self) -> Value {
        let mut tree = Value::Array(vec![
            Value::String(self.method.clone()),
            Value::Array(self.args.clone()),
        ]);
        for name in self.path.iter().rev() {
            let mut wrapper = Map::new();
            wrapper.insert(name.clone(), tree);
            tree = Value::Object(wrapper);
        }
        tree
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Errors raised while navigating or invoking the recorded state
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("no node '{name}' under '{parent}'")]
    UnknownNode { parent: String, name: String },
    #[error("node '{path}' has no operation '{operation}'")]
    UnknownOperation { path: String, operation: String },
}

/// Per-connection recorder: the instrumented view of the route's state plus
/// the ordered list of commands captured since the last drain
#[derive(Clone)]
pub struct StateHandler {
    template: Arc<StateTemplate>,
    commands: Arc<Mutex<Vec<Command>>>,
}

impl StateHandler {
    pub fn new(template: Arc<StateTemplate>) -> Self {
        Self {
            template,
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Root of the recorded state
    pub fn state(&self) -> StateNode {
        StateNode {
            handler: self.clone(),
            path: Vec::new(),
        }
    }

    /// Number of commands waiting to be drained
    pub fn command_count(&self) -> usize {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Take every captured command, in invocation order, leaving the list empty
    pub fn drain(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, command: Command) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

/// Handle to one node of the recorded state.
///
/// The root handle (empty path) only gives access to top-level nodes;
/// operations live on named nodes.
#[derive(Clone)]
pub struct StateNode {
    handler: StateHandler,
    path: Vec<String>,
}

impl StateNode {
    /// Descend into a nested node
    pub fn node(&self, name: &str) -> Result<StateNode, StateError> {
        let exists = if self.path.is_empty() {
            self.handler.template.get_root(name).is_some()
        } else {
            self.handler
                .template
                .resolve(&self.path)
                .and_then(|schema| schema.get_child(name))
                .is_some()
        };

        if !exists {
            return Err(StateError::UnknownNode {
                parent: self.path_string(),
                name: name.to_string(),
            });
        }

        let mut path = self.path.clone();
        path.push(name.to_string());
        Ok(StateNode {
            handler: self.handler.clone(),
            path,
        })
    }

    /// Invoke an operation on this node, recording it as a command
    pub fn call(&self, operation: &str, args: Vec<Value>) -> Result<(), StateError> {
        let declared = self
            .handler
            .template
            .resolve(&self.path)
            .is_some_and(|schema| schema.has_operation(operation));

        if !declared {
            return Err(StateError::UnknownOperation {
                path: self.path_string(),
                operation: operation.to_string(),
            });
        }

        self.handler.record(Command {
            path: self.path.clone(),
            method: operation.to_string(),
            args,
        });
        Ok(())
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    fn path_string(&self) -> String {
        self.path.join(".")
    }
}
