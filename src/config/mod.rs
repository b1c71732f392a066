use serde::Deserialize;
use std::path::Path;

/// Complete Statecast configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatecastConfig {
    #[serde(default)]
    pub server: ServerConfig,
}

/// Connection server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the binary listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Prefix stripped from request paths before route matching
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Close a connection whose client function fails, instead of only
    /// dropping that invocation's commands
    #[serde(default)]
    pub close_on_function_error: bool,
    /// Outbound frames buffered per connection; a reader that falls this far
    /// behind is disconnected
    #[serde(default = "default_send_queue_limit")]
    pub send_queue_limit: usize,
    /// Inbound invocations waiting per connection; a client that exceeds it
    /// is disconnected
    #[serde(default = "default_task_queue_limit")]
    pub task_queue_limit: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_send_queue_limit() -> usize {
    1000
}

fn default_task_queue_limit() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            path_prefix: default_path_prefix(),
            close_on_function_error: false,
            send_queue_limit: default_send_queue_limit(),
            task_queue_limit: default_task_queue_limit(),
        }
    }
}

impl ServerConfig {
    /// Override fields from env vars. Unparsable values are ignored.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("STATECAST_BIND_ADDRESS") {
            if !v.is_empty() {
                self.bind_address = v;
            }
        }
        if let Ok(v) = std::env::var("STATECAST_PATH_PREFIX") {
            if !v.is_empty() {
                self.path_prefix = v;
            }
        }
        if let Ok(v) = std::env::var("STATECAST_CLOSE_ON_FUNCTION_ERROR") {
            if let Ok(b) = v.parse::<bool>() {
                self.close_on_function_error = b;
            }
        }
        if let Ok(v) = std::env::var("STATECAST_SEND_QUEUE_LIMIT") {
            if let Ok(n) = v.parse::<usize>() {
                self.send_queue_limit = n;
            }
        }
        if let Ok(v) = std::env::var("STATECAST_TASK_QUEUE_LIMIT") {
            if let Ok(n) = v.parse::<usize>() {
                self.task_queue_limit = n;
            }
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<StatecastConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: StatecastConfig = toml::from_str(&contents)?;
    Ok(config)
}
