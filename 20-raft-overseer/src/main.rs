use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::{TcpListener, lookup_host};
use tracing::{error, info, warn};

use raft_overseer::{
    cli::{Cli, Command, NodeArgs, OverseerArgs},
    election::ElectionConfig,
    node::RaftNode,
    overseer::{Overseer, OverseerConfig},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_env("RAFTEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Overseer(args) => run_overseer(args).await,
        Command::Node(args) => run_node(args).await,
    }
}

async fn run_overseer(args: OverseerArgs) -> Result<()> {
    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    let overseer = Overseer::new(
        listener,
        OverseerConfig {
            max_consecutive_failures: args.max_failures,
        },
    );
    let addr = overseer.local_addr()?;
    info!("overseer listening on {}", addr);

    if let Err(err) = overseer.run_until_ctrl_c().await {
        warn!("overseer exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let addr = lookup_host((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to resolve {}:{}", args.host, args.port))?
        .next()
        .with_context(|| format!("no address found for {}:{}", args.host, args.port))?;

    let config = ElectionConfig {
        election_timeout: Duration::from_millis(args.election_timeout),
        keep_alive_interval: Duration::from_millis(args.keep_alive),
    };

    let mut node = RaftNode::connect(addr, config)
        .await
        .with_context(|| format!("failed to connect to overseer at {addr}"))?;
    node.login().await.context("login failed")?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
    };
    if let Err(err) = node.run_until(shutdown).await {
        error!(error = %err, "node stopped");
        return Err(err.into());
    }
    Ok(())
}
