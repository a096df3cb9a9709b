use anyhow::Result;
use homestat_agent::{Agent, AgentConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting homestat agent");

    let config = AgentConfig::from_env()?;
    let agent = Agent::new(config)?;

    tracing::info!(agent_id = %agent.agent_id(), "Agent initialized");

    agent.run().await?;

    Ok(())
}
