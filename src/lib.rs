// Channel pub/sub registry
pub mod channel;

// Per-connection FIFO task serialization
pub mod queue;

// Route registration, state templates and command capture
pub mod route;

// Wire message shapes
pub mod protocol;

// Header helpers for auth predicates
pub mod auth;

// Connection server and upgrade handling
pub mod server;

// TOML + env configuration
pub mod config;

pub use channel::{ChannelManager, InMemoryChannelManager};
pub use route::{register, CallContext, ClientFunctions, NodeSchema, Route, StateTemplate};
pub use server::Server;
