pub mod client;
pub mod types;

pub use client::A2aClient;
pub use types::{AgentEntry, AgentProtocol};
