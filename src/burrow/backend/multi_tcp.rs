use std::collections::HashMap;
use std::io;
use std::net::IpAddr;

use bytes::{Buf, Bytes, BytesMut};
use futures::future::select_all;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::debug;

use crate::burrow::common::Result;
use crate::burrow::config::{MultiTcpConfig, MULTI_BUFFER_SIZE};
use crate::burrow::net::Listener;

/// N parallel sockets carrying one aggregate stream, striped in fixed-size
/// blocks to defeat per-connection throughput shaping. Socket i carries
/// exactly blocks i, i+N, i+2N, ... of the aggregate stream; the receive
/// side dequeues blocksize bytes per socket round-robin to reconstruct it.
/// Stripe count and blocksize must match on both peers.
pub struct MultiTcpBackend {
    conns: Vec<TcpStream>,
    send_bufs: Vec<BytesMut>,
    cur_filling: usize,
    filled_bytes: usize,
    cur_recving: usize,
    remaining_bytes: usize,
    blocksize: usize,
    urgent: bool,
}

impl MultiTcpBackend {
    pub async fn connect(config: &MultiTcpConfig) -> Result<Self> {
        let mut conns = Vec::with_capacity(config.number);
        for _ in 0..config.number {
            conns.push(TcpStream::connect((config.server.as_str(), config.port)).await?);
        }
        debug!(server = %config.server, port = config.port, number = config.number,
               "multi backend connected");
        Ok(Self::new(conns, config.blocksize))
    }

    pub fn new(conns: Vec<TcpStream>, blocksize: usize) -> Self {
        assert!(!conns.is_empty());
        assert!(blocksize > 0);
        MultiTcpBackend {
            send_bufs: conns.iter().map(|_| BytesMut::new()).collect(),
            conns,
            cur_filling: 0,
            filled_bytes: 0,
            cur_recving: 0,
            remaining_bytes: blocksize,
            blocksize,
            urgent: true,
        }
    }

    pub fn send(&mut self, mut data: &[u8], urgent: bool) {
        if urgent && !data.is_empty() {
            self.urgent = true;
        } else if !urgent && self.send_bufs.iter().all(|b| b.is_empty()) {
            self.urgent = false;
        }
        while !data.is_empty() {
            let left = self.blocksize - self.filled_bytes;
            if data.len() >= left {
                self.send_bufs[self.cur_filling].extend_from_slice(&data[..left]);
                self.cur_filling = (self.cur_filling + 1) % self.conns.len();
                self.filled_bytes = 0;
                data = &data[left..];
            } else {
                self.send_bufs[self.cur_filling].extend_from_slice(data);
                self.filled_bytes += data.len();
                break;
            }
        }
        if urgent {
            let _ = self.try_flush();
        }
    }

    /// One non-blocking send on every socket with queued output. Returns
    /// whether every buffer is still under its high-water mark.
    pub fn try_flush(&mut self) -> Result<bool> {
        let mut available = true;
        for (conn, buf) in self.conns.iter().zip(self.send_bufs.iter_mut()) {
            if buf.is_empty() {
                continue;
            }
            match conn.try_write(buf) {
                Ok(n) => buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
            if buf.len() >= MULTI_BUFFER_SIZE {
                available = false;
            }
        }
        Ok(available)
    }

    pub fn available_for_writing(&self) -> bool {
        self.send_bufs.iter().all(|b| b.len() < MULTI_BUFFER_SIZE)
    }

    pub fn has_pending(&self) -> bool {
        self.send_bufs.iter().any(|b| !b.is_empty())
    }

    /// Drain whole blocks from the current stripe socket onward. A partial
    /// read or would-block ends the round so block boundaries stay exact.
    fn try_recv(&mut self) -> Result<Option<Bytes>> {
        let mut data = BytesMut::new();
        loop {
            let conn = &self.conns[self.cur_recving];
            let mut buf = vec![0u8; self.remaining_bytes];
            match conn.try_read(&mut buf) {
                Ok(0) => {
                    if data.is_empty() {
                        return Ok(None); // EOF
                    }
                    break;
                }
                Ok(n) => {
                    data.extend_from_slice(&buf[..n]);
                    self.remaining_bytes -= n;
                    if self.remaining_bytes == 0 {
                        self.cur_recving = (self.cur_recving + 1) % self.conns.len();
                        self.remaining_bytes = self.blocksize;
                    } else {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(data.freeze()))
    }

    /// Readiness pump with the same contract as the plain backend: inbound
    /// bytes, an empty chunk once pending output drained, None on EOF.
    /// Only the current stripe socket is watched for reading; the aggregate
    /// stream cannot continue from any other socket.
    pub async fn transfer(&mut self) -> Result<Option<Bytes>> {
        loop {
            let want_write = self.urgent && self.has_pending();
            let ready = {
                let mut futs = vec![Box::pin(
                    self.conns[self.cur_recving].ready(Interest::READABLE),
                )];
                if want_write {
                    for (conn, buf) in self.conns.iter().zip(self.send_bufs.iter()) {
                        if !buf.is_empty() {
                            futs.push(Box::pin(conn.ready(Interest::WRITABLE)));
                        }
                    }
                }
                let (ready, _, _) = select_all(futs).await;
                ready
            };
            ready?;
            if want_write {
                self.try_flush()?;
                if !self.has_pending() {
                    return Ok(Some(Bytes::new()));
                }
            }
            match self.try_recv()? {
                None => return Ok(None),
                Some(data) if !data.is_empty() => return Ok(Some(data)),
                Some(_) => continue,
            }
        }
    }

    pub async fn drain(&mut self) -> Result<()> {
        while self.has_pending() {
            let futs: Vec<_> = self
                .conns
                .iter()
                .zip(self.send_bufs.iter())
                .filter(|(_, buf)| !buf.is_empty())
                .map(|(conn, _)| Box::pin(conn.ready(Interest::WRITABLE)))
                .collect();
            let (ready, _, _) = select_all(futs).await;
            ready?;
            self.try_flush()?;
        }
        Ok(())
    }
}

pub struct MultiTcpAcceptor {
    listener: Listener,
    number: usize,
    blocksize: usize,
    // Sockets waiting for the rest of their stripe group, keyed by peer ip.
    // TODO stale groups from clients that died mid-connect should expire
    waiting: HashMap<IpAddr, Vec<TcpStream>>,
}

impl MultiTcpAcceptor {
    pub fn bind(config: &MultiTcpConfig) -> Result<Self> {
        let address = if config.address.is_empty() {
            "0.0.0.0"
        } else {
            config.address.as_str()
        };
        Ok(MultiTcpAcceptor {
            listener: Listener::new(format!("{}:{}", address, config.port))?,
            number: config.number,
            blocksize: config.blocksize,
            waiting: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Collect accepted sockets by peer address until a full stripe group
    /// has arrived, then hand the group over as one backend instance.
    pub async fn accept(&mut self) -> Option<MultiTcpBackend> {
        loop {
            let stream = self.listener.accept().await?;
            let peer = match stream.peer_addr() {
                Ok(addr) => addr.ip(),
                Err(_) => continue, // already dead
            };
            let group = self.waiting.entry(peer).or_default();
            group.push(stream);
            if group.len() == self.number {
                let conns = self.waiting.remove(&peer).unwrap();
                debug!(%peer, number = self.number, "stripe group complete");
                return Some(MultiTcpBackend::new(conns, self.blocksize));
            }
        }
    }
}
