use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::burrow::config::RECV_BUFFER_SIZE;

/// Commands from substream tasks to the tunnel driver. The channel is
/// bounded: once the driver stops consuming because the backend is over its
/// high-water mark, senders park in send() and stop reading their sockets.
#[derive(Debug)]
pub enum TunnelCmd {
    Data(u16, Bytes),
    Close(u16),
    Reset(u16),
}

/// Events from the driver to one substream task. The channel is unbounded;
/// it plays the role of the unbounded outgoing byte buffer a non-blocking
/// socket wrapper would keep.
#[derive(Debug)]
pub enum SubstreamEvent {
    Data(Bytes),
    Fin,
    Rst,
}

/// One local socket (a client connection or a dialed frontend) pumped by its
/// own task. Local reads become tunnel commands; tunnel events become local
/// writes or teardown.
pub struct Substream {
    conn_id: u16,
    stream: TcpStream,
    events: mpsc::UnboundedReceiver<SubstreamEvent>,
    commands: mpsc::Sender<TunnelCmd>,
}

impl Substream {
    /// Spawn the pump task and return the driver's handle to it.
    pub fn spawn(
        conn_id: u16,
        stream: TcpStream,
        commands: mpsc::Sender<TunnelCmd>,
    ) -> mpsc::UnboundedSender<SubstreamEvent> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let substream = Substream {
            conn_id,
            stream,
            events,
            commands,
        };
        tokio::spawn(substream.run());
        events_tx
    }

    async fn run(mut self) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(SubstreamEvent::Data(data)) => {
                        trace!(conn_id = self.conn_id, len = data.len(), "substream write");
                        if self.stream.write_all(&data).await.is_err() {
                            self.reset().await;
                            return;
                        }
                    }
                    Some(SubstreamEvent::Fin) | None => {
                        let _ = self.stream.shutdown().await;
                        return;
                    }
                    Some(SubstreamEvent::Rst) => {
                        self.abort();
                        return;
                    }
                },
                result = self.stream.read(&mut buf) => match result {
                    Ok(0) => {
                        let _ = self.commands.send(TunnelCmd::Close(self.conn_id)).await;
                        return;
                    }
                    Ok(n) => {
                        trace!(conn_id = self.conn_id, len = n, "substream read");
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if self.commands.send(TunnelCmd::Data(self.conn_id, data)).await.is_err() {
                            return;
                        }
                    }
                    // ECONNRESET and kin: tell the peer to do the same
                    Err(_) => {
                        self.reset().await;
                        return;
                    }
                },
            }
        }
    }

    async fn reset(&mut self) {
        self.abort();
        let _ = self.commands.send(TunnelCmd::Reset(self.conn_id)).await;
    }

    /// Arrange for an RST on the wire when the socket drops.
    fn abort(&self) {
        let _ = self.stream.set_linger(Some(Duration::from_secs(0)));
    }
}
