//! Thin demonstration binary: parse a `.torrent` path or a magnet URI,
//! print the resolved [`torrent_engine::torrent::TorrentInfo`], and
//! optionally drive a single-torrent download to completion against
//! caller-supplied peer addresses. This is demonstration glue, not part of
//! the library's core surface — the teacher's own `rstc` binary plays the
//! same role for its single hardcoded download.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use torrent_engine::config::EngineConfig;
use torrent_engine::torrent::TorrentController;
use torrent_engine::tracker::generate_peer_id;

#[derive(Parser, Debug)]
#[command(name = "engine-cli", about = "Demonstration client for the torrent engine library")]
struct Cli {
    /// Path to a .torrent metainfo file.
    #[arg(long, conflicts_with = "magnet")]
    torrent: Option<PathBuf>,

    /// A magnet: URI to bootstrap from instead of a metainfo file.
    #[arg(long, conflicts_with = "torrent")]
    magnet: Option<String>,

    /// Peer addresses to connect to (`host:port`), may be repeated.
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Drive the download to completion instead of just resolving metadata.
    #[arg(long)]
    download: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        error!(error = %e, "engine-cli exiting on fatal error");
        return Err(e);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::default();
    let peer_id = generate_peer_id();

    let mut controller = match (&cli.torrent, &cli.magnet) {
        (Some(path), None) => {
            let data = std::fs::read(path).with_context(|| format!("reading torrent file {}", path.display()))?;
            TorrentController::from_metainfo_bytes(&data, peer_id, config.peer.clone())
                .context("parsing torrent metainfo")?
        }
        (None, Some(uri)) => {
            TorrentController::from_magnet_uri(uri, peer_id, config.peer.clone()).context("parsing magnet URI")?
        }
        _ => anyhow::bail!("exactly one of --torrent or --magnet is required"),
    };

    if let Some(info) = controller.info() {
        info!(name = %info.name, pieces = info.piece_count(), total_size = info.total_size, "resolved torrent metadata");
    } else {
        info!("magnet link accepted; metadata will be fetched from peers");
    }

    for addr in &cli.peers {
        controller.add_peer(*addr).await;
    }

    if cli.download {
        if cli.peers.is_empty() {
            anyhow::bail!("--download requires at least one --peer");
        }
        controller.run_until_complete().await;
        info!(status = ?controller.status(), "download loop ended");
    }

    Ok(())
}
