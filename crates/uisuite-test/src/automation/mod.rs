pub mod server;

pub use server::{AutomationServerManager, ServerConfig, ServerHandle, ServerKind};
