use replikv::config::Config;
use replikv::persistence::rdb;
use replikv::server::{self, ServerContext};
use replikv::store::Keyspace;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Parse command line args
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args);

    // RUST_LOG wins over --loglevel
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.loglevel));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load the snapshot if there is one
    let snapshot_path = config.snapshot_path();
    let keyspace = if snapshot_path.exists() {
        info!("Loading snapshot from {}...", snapshot_path.display());
        match rdb::load(&snapshot_path) {
            Ok(keyspace) => {
                info!("Snapshot loaded, {} keys", keyspace.len());
                keyspace
            }
            Err(e) => {
                warn!("Failed to load snapshot: {e}, starting with empty keyspace");
                Keyspace::new()
            }
        }
    } else {
        Keyspace::new()
    };

    server::run_server(ServerContext::new(config, keyspace)).await
}
