use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use cl_relay::{build_router, spawn_sweepers, AppState};

#[derive(Parser)]
#[command(name = "cl-relay", about = "Cipherlink relay server")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "LISTEN_ADDR")]
    addr: SocketAddr,

    /// SQLite database path
    #[arg(long, default_value = "cipherlink-relay.db", env = "RELAY_DB")]
    db: PathBuf,

    /// Directory for the daily audit logs
    #[arg(long, default_value = "audit", env = "AUDIT_DIR")]
    audit_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let state = AppState::open(&args.db, &args.audit_dir).await?;
    spawn_sweepers(&state);
    let app = build_router(state);

    info!(addr = %args.addr, db = %args.db.display(), "starting cl-relay");
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
