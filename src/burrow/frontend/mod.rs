mod redirect;

pub use self::redirect::RedirectFrontend;

use tokio::net::TcpStream;

use crate::burrow::common::Result;
use crate::burrow::config::FrontendConfig;

/// The server-side endpoint factory. Each SYN asks it for a fresh socket to
/// terminate that substream.
pub enum Frontend {
    Redirect(RedirectFrontend),
}

impl Frontend {
    pub fn new(config: &FrontendConfig) -> Frontend {
        match config {
            FrontendConfig::Redirect(redirect) => {
                Frontend::Redirect(RedirectFrontend::new(redirect))
            }
        }
    }

    pub async fn open(&self) -> Result<TcpStream> {
        match self {
            Frontend::Redirect(redirect) => redirect.open().await,
        }
    }
}
