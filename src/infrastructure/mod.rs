// Infrastructure layer: configuration, logging and the gRPC server

pub mod config;
pub mod logging;
#[cfg(feature = "server")]
pub mod server;

pub use config::EngineConfig;
#[cfg(feature = "server")]
pub use server::{start_server, ServerConfig};
