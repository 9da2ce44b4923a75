use constrained_opt::infrastructure::logging;
use constrained_opt::{start_server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    // Address and engine settings from the environment
    let config = ServerConfig::from_env()?;

    start_server(config).await?;

    Ok(())
}
