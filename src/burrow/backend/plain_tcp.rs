use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::debug;

use crate::burrow::common::Result;
use crate::burrow::config::{PlainTcpConfig, PLAIN_BUFFER_SIZE, RECV_BUFFER_SIZE};
use crate::burrow::net::Listener;

/// One TCP socket carrying the whole encrypted stream, with a buffered
/// outbound side so callers never block on a slow peer.
pub struct PlainTcpBackend {
    stream: TcpStream,
    send_buf: BytesMut,
    urgent: bool,
}

impl PlainTcpBackend {
    pub async fn connect(config: &PlainTcpConfig) -> Result<Self> {
        let stream = TcpStream::connect((config.server.as_str(), config.port)).await?;
        debug!(server = %config.server, port = config.port, "plain backend connected");
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        PlainTcpBackend {
            stream,
            send_buf: BytesMut::new(),
            urgent: true,
        }
    }

    /// Queue data. Urgent data gets one eager write attempt; non-urgent data
    /// waits in the buffer until urgent output arrives behind it, which lets
    /// the record layer batch its handshake block with the first real frame.
    pub fn send(&mut self, data: &[u8], urgent: bool) {
        if urgent && !data.is_empty() {
            self.urgent = true;
        } else if !urgent && self.send_buf.is_empty() {
            self.urgent = false;
        }
        self.send_buf.extend_from_slice(data);
        if urgent {
            let _ = self.try_flush();
        }
    }

    /// One non-blocking send from the head of the buffer. Returns whether
    /// the buffer is still under its high-water mark.
    pub fn try_flush(&mut self) -> Result<bool> {
        if !self.send_buf.is_empty() {
            match self.stream.try_write(&self.send_buf) {
                Ok(n) => self.send_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.send_buf.len() < PLAIN_BUFFER_SIZE)
    }

    pub fn available_for_writing(&self) -> bool {
        self.send_buf.len() < PLAIN_BUFFER_SIZE
    }

    pub fn has_pending(&self) -> bool {
        !self.send_buf.is_empty()
    }

    /// Readiness pump. Resolves with inbound bytes, an empty chunk once all
    /// pending output drained (so the caller can re-check backpressure), or
    /// None on orderly EOF.
    pub async fn transfer(&mut self) -> Result<Option<Bytes>> {
        loop {
            let mut interest = Interest::READABLE;
            if !self.send_buf.is_empty() && self.urgent {
                interest = interest | Interest::WRITABLE;
            }
            let ready = self.stream.ready(interest).await?;
            if ready.is_writable() {
                self.try_flush()?;
                if self.send_buf.is_empty() {
                    return Ok(Some(Bytes::new()));
                }
            }
            if ready.is_readable() {
                let mut buf = [0u8; RECV_BUFFER_SIZE];
                match self.stream.try_read(&mut buf) {
                    Ok(0) => return Ok(None),
                    Ok(n) => return Ok(Some(Bytes::copy_from_slice(&buf[..n]))),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    /// Flush everything, urgent or not. Used at shutdown.
    pub async fn drain(&mut self) -> Result<()> {
        while !self.send_buf.is_empty() {
            self.stream.ready(Interest::WRITABLE).await?;
            self.try_flush()?;
        }
        Ok(())
    }
}

pub struct PlainTcpAcceptor {
    listener: Listener,
}

impl PlainTcpAcceptor {
    pub fn bind(config: &PlainTcpConfig) -> Result<Self> {
        let address = if config.address.is_empty() {
            "0.0.0.0"
        } else {
            config.address.as_str()
        };
        Ok(PlainTcpAcceptor {
            listener: Listener::new(format!("{}:{}", address, config.port))?,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Every accepted connection is a complete backend instance.
    pub async fn accept(&mut self) -> Option<PlainTcpBackend> {
        self.listener.accept().await.map(PlainTcpBackend::new)
    }
}
