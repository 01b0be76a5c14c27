mod connect;
mod open;
mod term;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warp_protocol::DEFAULT_ADDRESS;

#[derive(Parser)]
#[command(name = "warp", about = "Share your terminal through a warp daemon")]
struct Cli {
    /// Daemon address (host:port)
    #[arg(long, global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a new warp hosting your shell
    Open {
        /// Warp ID to open under (random when omitted)
        id: Option<String>,
    },

    /// Connect to an existing warp
    Connect {
        /// Warp ID
        id: String,

        /// Observe only, never send keystrokes to the host
        #[arg(long)]
        read_only: bool,
    },
}

/// Flag beats environment beats the compiled-in default.
fn resolve_address(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("WARPD_ADDRESS").ok())
        .unwrap_or_else(|| DEFAULT_ADDRESS.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let address = resolve_address(cli.address);

    match cli.command {
        Commands::Open { id } => open::run(&address, id).await,
        Commands::Connect { id, read_only } => connect::run(&address, &id, read_only).await,
    }
}
