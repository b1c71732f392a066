use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Marker value declaring an operation in a JSON template
pub const OPERATION_MARKER: &str = "op";

/// Template authoring errors, reported at registration time
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("state template must be an object")]
    NotAnObject,
    #[error("property '{path}' is a {kind}, expected a node object or \"op\"")]
    InvalidProperty { path: String, kind: &'static str },
    #[error("'{path}' is declared both as an operation and as a node")]
    DuplicateName { path: String },
    #[error("empty name under '{parent}'")]
    EmptyName { parent: String },
}

/// Schema of one state node: the operations it accepts and its nested nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSchema {
    operations: BTreeSet<String>,
    children: BTreeMap<String, NodeSchema>,
}

impl NodeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an operation callable on this node
    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operations.insert(name.into());
        self
    }

    /// Declare several operations at once
    pub fn operations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare a nested node
    pub fn child(mut self, name: impl Into<String>, schema: NodeSchema) -> Self {
        self.children.insert(name.into(), schema);
        self
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains(name)
    }

    pub fn get_child(&self, name: &str) -> Option<&NodeSchema> {
        self.children.get(name)
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(String::as_str)
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    fn validate(&self, path: &str) -> Result<(), TemplateError> {
        for op in &self.operations {
            if op.is_empty() {
                return Err(TemplateError::EmptyName {
                    parent: path.to_string(),
                });
            }
            if self.children.contains_key(op) {
                return Err(TemplateError::DuplicateName {
                    path: format!("{path}.{op}"),
                });
            }
        }
        for (name, child) in &self.children {
            if name.is_empty() {
                return Err(TemplateError::EmptyName {
                    parent: path.to_string(),
                });
            }
            child.validate(&format!("{path}.{name}"))?;
        }
        Ok(())
    }

    fn from_json(path: &str, map: &serde_json::Map<String, Value>) -> Result<Self, TemplateError> {
        let mut schema = NodeSchema::new();
        for (key, value) in map {
            let child_path = format!("{path}.{key}");
            match value {
                Value::Object(inner) => {
                    let child = NodeSchema::from_json(&child_path, inner)?;
                    schema.children.insert(key.clone(), child);
                }
                Value::String(marker) if marker == OPERATION_MARKER => {
                    schema.operations.insert(key.clone());
                }
                other => {
                    return Err(TemplateError::InvalidProperty {
                        path: child_path,
                        kind: json_kind(other),
                    });
                }
            }
        }
        Ok(schema)
    }
}

/// Declarative shape of a route's state: named root nodes, each with its
/// own operations and nested nodes.
///
/// Every connection gets a recorder built from this schema; invoking an
/// operation at some path yields a command describing that path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTemplate {
    roots: BTreeMap<String, NodeSchema>,
}

impl StateTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level node
    pub fn root(mut self, name: impl Into<String>, schema: NodeSchema) -> Self {
        self.roots.insert(name.into(), schema);
        self
    }

    /// Build a template from JSON, where an object is a node and the string
    /// `"op"` declares an operation:
    ///
    /// ```text
    /// { "board": { "draw": "op", "layers": { "add": "op" } } }
    /// ```
    pub fn from_json(value: &Value) -> Result<Self, TemplateError> {
        let Value::Object(map) = value else {
            return Err(TemplateError::NotAnObject);
        };

        let mut template = StateTemplate::new();
        for (key, value) in map {
            match value {
                Value::Object(inner) => {
                    let schema = NodeSchema::from_json(key, inner)?;
                    template.roots.insert(key.clone(), schema);
                }
                other => {
                    return Err(TemplateError::InvalidProperty {
                        path: key.clone(),
                        kind: json_kind(other),
                    });
                }
            }
        }
        template.validate()?;
        Ok(template)
    }

    /// Check names are non-empty and never shared between an operation and a
    /// node at the same level
    pub fn validate(&self) -> Result<(), TemplateError> {
        for (name, schema) in &self.roots {
            if name.is_empty() {
                return Err(TemplateError::EmptyName {
                    parent: String::new(),
                });
            }
            schema.validate(name)?;
        }
        Ok(())
    }

    pub fn get_root(&self, name: &str) -> Option<&NodeSchema> {
        self.roots.get(name)
    }

    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    /// Resolve the schema at `path` (first element is a root name)
    pub fn resolve(&self, path: &[String]) -> Option<&NodeSchema> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.get(first)?;
        for name in rest {
            node = node.get_child(name)?;
        }
        Some(node)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_resolves_nested_path() {
        let template = StateTemplate::new().root(
            "root",
            NodeSchema::new().child("mid", NodeSchema::new().child("leaf", NodeSchema::new().operation("method"))),
        );

        let path = vec!["root".to_string(), "mid".to_string(), "leaf".to_string()];
        let leaf = template.resolve(&path).unwrap();
        assert!(leaf.has_operation("method"));
        assert!(template.resolve(&["root".to_string(), "nope".to_string()]).is_none());
        assert!(template.resolve(&[]).is_none());
    }

    #[test]
    fn test_from_json() {
        let template = StateTemplate::from_json(&json!({
            "board": { "draw": "op", "clear": "op", "layers": { "add": "op" } },
            "chat": { "say": "op" }
        }))
        .unwrap();

        let names: Vec<&str> = template.root_names().collect();
        assert_eq!(names, vec!["board", "chat"]);

        let board = template.get_root("board").unwrap();
        let ops: Vec<&str> = board.operation_names().collect();
        assert_eq!(ops, vec!["clear", "draw"]);
        assert!(board.get_child("layers").unwrap().has_operation("add"));
    }

    #[test]
    fn test_from_json_rejects_scalar_property() {
        let err = StateTemplate::from_json(&json!({
            "board": { "size": 12 }
        }))
        .unwrap_err();

        assert_eq!(
            err,
            TemplateError::InvalidProperty {
                path: "board.size".to_string(),
                kind: "number"
            }
        );
    }

    #[test]
    fn test_from_json_rejects_scalar_root() {
        let err = StateTemplate::from_json(&json!({ "score": "op" })).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidProperty { .. }));
        assert_eq!(
            StateTemplate::from_json(&json!([1, 2])).unwrap_err(),
            TemplateError::NotAnObject
        );
    }

    #[test]
    fn test_validate_rejects_name_clash() {
        let template = StateTemplate::new().root(
            "board",
            NodeSchema::new()
                .operation("layers")
                .child("layers", NodeSchema::new()),
        );

        assert_eq!(
            template.validate().unwrap_err(),
            TemplateError::DuplicateName {
                path: "board.layers".to_string()
            }
        );
    }

    #[test]
    fn test_validate_rejects_empty_operation_name() {
        let template = StateTemplate::new().root("board", NodeSchema::new().operation(""));
        assert!(matches!(
            template.validate(),
            Err(TemplateError::EmptyName { .. })
        ));
    }
}
