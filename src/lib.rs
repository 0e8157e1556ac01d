pub mod burrow;
#[cfg(test)]
mod tests;

pub use crate::burrow::*;

use std::io;
use std::path::Path;

use tokio::runtime::{Builder, Runtime};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::burrow::common::Result;

pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Like init_tracing but appends to a log file instead of stdout.
pub fn init_tracing_to_file(max_level: Level, path: &Path) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(max_level)
        .with_ansi(false)
        .with_writer(move || file.try_clone().expect("cloning log file handle"))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
    Ok(())
}

/// The tunnel is cooperatively scheduled: one driver task per tunnel plus
/// one task per substream, all on a single thread.
pub fn init_runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

pub async fn run_client(config: &'static crate::burrow::config::ClientConfig) -> Result<()> {
    let mut client = TunnelClient::new(config).await?;
    client.run().await
}

pub async fn run_server(config: &'static crate::burrow::config::ServerConfig) -> Result<()> {
    let mut server = TunnelServer::new(config)?;
    server.run().await;
    Ok(())
}
