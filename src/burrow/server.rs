use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::burrow::backend::Acceptor;
use crate::burrow::common::{ErrorKind, Result};
use crate::burrow::config::{FrontendConfig, ServerConfig, COMMAND_QUEUE_DEPTH};
use crate::burrow::frontend::Frontend;
use crate::burrow::net::{Substream, SubstreamEvent, TunnelCmd};
use crate::burrow::tunnel::{Control, Tunnel, TunnelPacket};

/// Accepts tunnel clients and runs one session task per tunnel. A session
/// failure kills only that session; the accept loop keeps serving.
pub struct TunnelServer {
    acceptor: Acceptor,
    key: String,
    frontend: FrontendConfig,
}

impl TunnelServer {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        Ok(TunnelServer {
            acceptor: Acceptor::bind(&config.backend)?,
            key: config.key.clone(),
            frontend: config.frontend.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.acceptor.local_addr()
    }

    pub async fn run(&mut self) {
        info!("tunnel server accepting backends");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    return;
                }
                maybe = self.acceptor.accept() => {
                    let backend = match maybe {
                        Some(backend) => backend,
                        None => return,
                    };
                    let tunnel = Tunnel::new(&self.key, backend, false);
                    let frontend = Frontend::new(&self.frontend);
                    tokio::spawn(async move {
                        let mut session = ServerSession::new(tunnel, frontend);
                        session.run().await;
                    });
                }
            }
        }
    }
}

/// One tunnel session: the server-side multiplexer. Symmetric to the client
/// driver, except substreams are born from SYN packets instead of accepts.
struct ServerSession {
    tunnel: Tunnel,
    frontend: Frontend,
    streams: HashMap<u16, mpsc::UnboundedSender<SubstreamEvent>>,
    commands: mpsc::Receiver<TunnelCmd>,
    commands_tx: mpsc::Sender<TunnelCmd>,
}

impl ServerSession {
    fn new(tunnel: Tunnel, frontend: Frontend) -> Self {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        ServerSession {
            tunnel,
            frontend,
            streams: HashMap::new(),
            commands,
            commands_tx,
        }
    }

    async fn run(&mut self) {
        match self.process().await {
            Ok(()) => {}
            Err(e) => {
                let _ = self.tunnel.flush().await;
                match e.kind() {
                    ErrorKind::ConnectionClosed => info!("tunnel closed by client"),
                    ErrorKind::InsecureClosing => {
                        warn!("backend closed without a secure close, possibly tampered with")
                    }
                    ErrorKind::FirstPacketIncorrect => {
                        warn!("dropping connection that speaks another protocol")
                    }
                    _ => warn!(%e, "tunnel session failed"),
                }
            }
        }
    }

    async fn process(&mut self) -> Result<()> {
        loop {
            let writable = self.tunnel.available_for_writing();
            tokio::select! {
                maybe = self.commands.recv(), if writable => {
                    let cmd = maybe.expect("command channel closed");
                    self.handle_command(cmd);
                }
                result = self.tunnel.receive_packets() => {
                    for packet in result? {
                        self.dispatch(packet).await;
                    }
                }
            }
        }
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

    async fn dispatch(&mut self, packet: TunnelPacket) {
        let conn_id = packet.conn_id;
        if packet.control & Control::RST != 0 {
            if let Some(events) = self.streams.remove(&conn_id) {
                let _ = events.send(SubstreamEvent::Rst);
            }
            return;
        }
        if packet.control & Control::SYN != 0 {
            // a reused id replaces whatever was there
            if let Some(old) = self.streams.remove(&conn_id) {
                let _ = old.send(SubstreamEvent::Rst);
            }
            match self.frontend.open().await {
                Ok(stream) => {
                    let events = Substream::spawn(conn_id, stream, self.commands_tx.clone());
                    self.streams.insert(conn_id, events);
                }
                Err(e) => {
                    warn!(%e, conn_id, "resetting substream");
                    self.tunnel.reset_connection(conn_id);
                    return;
                }
            }
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
