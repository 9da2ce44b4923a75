// Infrastructure: Server setup and configuration
// Single Responsibility: Manage server lifecycle and configuration

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{info, warn};

use super::config::EngineConfig;
use crate::application::mappers::pb::optimization_tools_server::OptimizationToolsServer;
use crate::application::{OptimizationToolsService, Tools, TOOLS};

pub const DEFAULT_ADDRESS: &str = "0.0.0.0:50051";

pub struct ServerConfig {
    pub address: SocketAddr,
    pub engine: Arc<EngineConfig>,
}

impl ServerConfig {
    pub fn new(address: SocketAddr, engine: Arc<EngineConfig>) -> Self {
        Self { address, engine }
    }

    /// Address from `CONSTRAINED_OPT_ADDR`, engine settings from the
    /// `CONSTRAINED_OPT_*` variables.
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        let address = std::env::var("CONSTRAINED_OPT_ADDR")
            .unwrap_or_else(|_| DEFAULT_ADDRESS.to_string())
            .parse()?;
        Ok(Self::new(address, Arc::new(EngineConfig::from_env())))
    }
}

pub async fn start_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !config.engine.smt.is_available().await {
        warn!(
            program = %config.engine.smt.program,
            "SMT engine not found; constraint-satisfaction and constraint-programming tools will report engine failures"
        );
    }

    let tools = Arc::new(Tools::new(config.engine.clone()));
    let service = OptimizationToolsService::new(tools);

    log_banner(&config);

    Server::builder()
        .add_service(OptimizationToolsServer::new(service))
        .serve_with_shutdown(config.address, shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn log_banner(config: &ServerConfig) {
    let engine = &config.engine;
    info!(address = %config.address, "constrained-opt listening");
    info!(
        smt = %engine.smt.engine_name(),
        linear = %engine.linear_backend(engine.lp_backend),
        convex = "clarabel",
        "engines"
    );
    info!(
        default_time_limit_s = engine.default_time_limit.as_secs_f64(),
        max_time_limit_s = engine.max_time_limit.as_secs_f64(),
        max_set_size = engine.max_set_size,
        "limits"
    );
    for tool in TOOLS {
        info!(tool = tool.name, family = tool.family, "tool available");
    }
}
