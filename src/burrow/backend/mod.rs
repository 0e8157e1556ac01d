mod multi_tcp;
mod plain_tcp;

pub use self::multi_tcp::{MultiTcpAcceptor, MultiTcpBackend};
pub use self::plain_tcp::{PlainTcpAcceptor, PlainTcpBackend};

use bytes::Bytes;

use crate::burrow::common::Result;
use crate::burrow::config::BackendConfig;

/// The transport under one tunnel session. Both variants share the same
/// contract: buffered urgent/non-urgent sends, a readiness pump, and a
/// peer-closed sentinel (None) on orderly EOF.
pub enum Backend {
    Plain(PlainTcpBackend),
    Multi(MultiTcpBackend),
}

impl Backend {
    /// Dial the configured server (client side).
    pub async fn connect(config: &BackendConfig) -> Result<Backend> {
        match config {
            BackendConfig::PlainTcp(plain) => {
                Ok(Backend::Plain(PlainTcpBackend::connect(plain).await?))
            }
            BackendConfig::MultiTcp(multi) => {
                Ok(Backend::Multi(MultiTcpBackend::connect(multi).await?))
            }
        }
    }

    pub fn send(&mut self, data: &[u8], urgent: bool) {
        match self {
            Backend::Plain(b) => b.send(data, urgent),
            Backend::Multi(b) => b.send(data, urgent),
        }
    }

    pub fn try_flush(&mut self) -> Result<bool> {
        match self {
            Backend::Plain(b) => b.try_flush(),
            Backend::Multi(b) => b.try_flush(),
        }
    }

    pub fn available_for_writing(&self) -> bool {
        match self {
            Backend::Plain(b) => b.available_for_writing(),
            Backend::Multi(b) => b.available_for_writing(),
        }
    }

    pub fn has_pending(&self) -> bool {
        match self {
            Backend::Plain(b) => b.has_pending(),
            Backend::Multi(b) => b.has_pending(),
        }
    }

    pub async fn transfer(&mut self) -> Result<Option<Bytes>> {
        match self {
            Backend::Plain(b) => b.transfer().await,
            Backend::Multi(b) => b.transfer().await,
        }
    }

    pub async fn drain(&mut self) -> Result<()> {
        match self {
            Backend::Plain(b) => b.drain().await,
            Backend::Multi(b) => b.drain().await,
        }
    }
}

/// Server-side factory producing one Backend per connecting client.
pub enum Acceptor {
    Plain(PlainTcpAcceptor),
    Multi(MultiTcpAcceptor),
}

impl Acceptor {
    pub fn bind(config: &BackendConfig) -> Result<Acceptor> {
        match config {
            BackendConfig::PlainTcp(plain) => Ok(Acceptor::Plain(PlainTcpAcceptor::bind(plain)?)),
            BackendConfig::MultiTcp(multi) => Ok(Acceptor::Multi(MultiTcpAcceptor::bind(multi)?)),
        }
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        match self {
            Acceptor::Plain(a) => a.local_addr(),
            Acceptor::Multi(a) => a.local_addr(),
        }
    }

    pub async fn accept(&mut self) -> Option<Backend> {
        match self {
            Acceptor::Plain(a) => a.accept().await.map(Backend::Plain),
            Acceptor::Multi(a) => a.accept().await.map(Backend::Multi),
        }
    }
}
