// Channel pub/sub registry

mod manager;

pub use manager::{ChannelManager, ConnectionId, InMemoryChannelManager, Outbound, Subscriber};

#[cfg(test)]
mod tests;
