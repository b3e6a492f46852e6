use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rendezvous overseer and cluster nodes for a Raft playground")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the overseer that nodes log in to.
    Overseer(OverseerArgs),
    /// Run a cluster node against an overseer.
    Node(NodeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct OverseerArgs {
    /// Address the overseer binds to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port the overseer listens on. Use 0 for an ephemeral port.
    #[arg(long, short = 'p')]
    pub port: u16,

    /// Consecutive rejected transactions before a client is disconnected.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_failures: u32,
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// How long to wait for a leader heartbeat, in milliseconds.
    #[arg(long, short = 'e', default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    pub election_timeout: u64,

    /// Time between keep-alives to the overseer, in milliseconds.
    #[arg(long, short = 'k', default_value_t = 3_000, value_parser = clap::value_parser!(u64).range(1..))]
    pub keep_alive: u64,

    /// Host address of the overseer.
    #[arg(long, short = 'H')]
    pub host: String,

    /// Port the overseer listens on.
    #[arg(long, short = 'p')]
    pub port: u16,
}
