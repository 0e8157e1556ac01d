use std::collections::HashMap;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::burrow::backend::Backend;
use crate::burrow::common::{ErrorKind, Result};
use crate::burrow::config::{ClientConfig, COMMAND_QUEUE_DEPTH};
use crate::burrow::net::{Listener, Substream, SubstreamEvent, TunnelCmd};
use crate::burrow::tunnel::{Control, Tunnel, TunnelPacket};

/// The client multiplexer: accepts local connections and drives one tunnel
/// to the server. This task is the only thing that touches the tunnel;
/// substream tasks talk to it through the bounded command queue.
pub struct TunnelClient {
    listener: Listener,
    tunnel: Tunnel,
    streams: HashMap<u16, mpsc::UnboundedSender<SubstreamEvent>>,
    commands: mpsc::Receiver<TunnelCmd>,
    commands_tx: mpsc::Sender<TunnelCmd>,
}

impl TunnelClient {
    pub async fn new(config: &ClientConfig) -> Result<Self> {
        let listener = Listener::new(format!("0.0.0.0:{}", config.port))?;
        let backend = Backend::connect(&config.backend).await?;
        let tunnel = Tunnel::new(&config.key, backend, true);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Ok(TunnelClient {
            listener,
            tunnel,
            streams: HashMap::new(),
            commands,
            commands_tx,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until the tunnel dies or the process is interrupted.
    pub async fn run(&mut self) -> Result<()> {
        info!(address = %self.listener.address, "tunnel client listening");
        let result = self.process().await;
        match result {
            Ok(()) => {
                info!("shutting down");
                let _ = self.tunnel.shutdown().await;
                Ok(())
            }
            Err(e) => {
                // a queued reset frame still deserves a send attempt
                let _ = self.tunnel.flush().await;
                match e.kind() {
                    ErrorKind::ConnectionClosed => {
                        info!("remote host has closed the tunnel");
                        Ok(())
                    }
                    ErrorKind::InsecureClosing => {
                        warn!("backend closed without a secure close, possibly tampered with");
                        Err(e)
                    }
                    _ => {
                        warn!(%e, "tunnel failed");
                        Err(e)
                    }
                }
            }
        }
    }

    async fn process(&mut self) -> Result<()> {
        loop {
            // captured before select so the backpressure gate doesn't touch
            // the tunnel while receive_packets borrows it
            let writable = self.tunnel.available_for_writing();
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                maybe = self.listener.accept() => match maybe {
                    Some(stream) => self.start_substream(stream),
                    None => return Ok(()),
                },
                maybe = self.commands.recv(), if writable => {
                    // we hold a sender ourselves, so the channel cannot close
                    let cmd = maybe.expect("command channel closed");
                    self.handle_command(cmd);
                }
                result = self.tunnel.receive_packets() => {
                    for packet in result? {
                        self.dispatch(packet);
                    }
                }
            }
        }
    }

    fn start_substream(&mut self, stream: TcpStream) {
        let conn_id = match self.tunnel.new_connection() {
            Ok(conn_id) => conn_id,
            Err(e) => {
                warn!(%e, "refusing local connection");
                return;
            }
        };
        let events = Substream::spawn(conn_id, stream, self.commands_tx.clone());
        self.streams.insert(conn_id, events);
    }

    fn handle_command(&mut self, cmd: TunnelCmd) {
        match cmd {
            TunnelCmd::Data(conn_id, data) => self.tunnel.send_packet(conn_id, &data),
            TunnelCmd::Close(conn_id) => {
                self.streams.remove(&conn_id);
                self.tunnel.close_connection(conn_id);
            }
            TunnelCmd::Reset(conn_id) => {
                self.streams.remove(&conn_id);
                self.tunnel.reset_connection(conn_id);
            }
        }
    }

    fn dispatch(&mut self, packet: TunnelPacket) {
        let conn_id = packet.conn_id;
        if packet.control & Control::RST != 0 {
            if let Some(events) = self.streams.remove(&conn_id) {
                let _ = events.send(SubstreamEvent::Rst);
            }
            return;
        }
        if packet.control & Control::DAT != 0 && !packet.data.is_empty() {
            if let Some(events) = self.streams.get(&conn_id) {
                if events.send(SubstreamEvent::Data(packet.data.clone())).is_err() {
                    self.streams.remove(&conn_id);
                }
            }
        }
        if packet.control & Control::FIN != 0 {
            if let Some(events) = self.streams.remove(&conn_id) {
                let _ = events.send(SubstreamEvent::Fin);
            }
        }
    }
}
