use tokio::net::TcpStream;
use tracing::debug;

use crate::burrow::common::{Error, Result};
use crate::burrow::config::RedirectConfig;

/// Terminates every substream by opening a plain TCP connection to one
/// configured host:port.
pub struct RedirectFrontend {
    server: String,
    port: u16,
}

impl RedirectFrontend {
    pub fn new(config: &RedirectConfig) -> Self {
        RedirectFrontend {
            server: config.server.clone(),
            port: config.port,
        }
    }

    pub async fn open(&self) -> Result<TcpStream> {
        match TcpStream::connect((self.server.as_str(), self.port)).await {
            Ok(stream) => {
                debug!(server = %self.server, port = self.port, "frontend connected");
                Ok(stream)
            }
            Err(e) => Err(Error::frontend_unavailable(format!(
                "connection to {}:{} failed: {}",
                self.server, self.port, e
            ))),
        }
    }
}
