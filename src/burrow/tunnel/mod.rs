mod id_alloc;

pub use self::id_alloc::{IdAllocator, MAX_CONN_ID, MIN_CONN_ID};

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use strum::Display;
use tracing::{debug, trace};

use crate::burrow::backend::Backend;
use crate::burrow::common::{Error, Result};
use crate::burrow::record::RecordLayer;

pub const VERSION: u8 = 1;
pub const TUNNEL_HEADER_SIZE: usize = 4;

/// Control bits of the tunnel header.
pub struct Control;

impl Control {
    /// first packet of a substream
    pub const SYN: u8 = 1;
    /// data transmission
    pub const DAT: u8 = 2;
    /// orderly close
    pub const FIN: u8 = 4;
    /// abortive close
    pub const RST: u8 = 8;
}

#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnState {
    /// id allocated, nothing on the wire yet
    New,
    Connected,
    /// we sent FIN and hold the id until the peer's FIN comes back
    Closing,
    /// we sent RST and hold the id until the peer's RST comes back
    Resetting,
}

/// A packet surfaced to the multiplexer: substream id, remaining control
/// bits and whatever data survived the state machine.
#[derive(Debug)]
pub struct TunnelPacket {
    pub conn_id: u16,
    pub control: u8,
    pub data: Bytes,
}

fn parse_packet(payload: Bytes) -> Result<TunnelPacket> {
    if payload.len() < TUNNEL_HEADER_SIZE {
        return Err(Error::new("truncated tunnel header"));
    }
    if payload[0] != VERSION {
        return Err(Error::unsupported_version(payload[0]));
    }
    Ok(TunnelPacket {
        conn_id: u16::from_be_bytes([payload[2], payload[3]]),
        control: payload[1],
        data: payload.slice(TUNNEL_HEADER_SIZE..),
    })
}

/// Multiplexes substreams over one record-layer stream. Owns the codec, the
/// backend and every per-substream state; exactly one driver task may hold
/// it.
pub struct Tunnel {
    record: RecordLayer,
    backend: Backend,
    alloc: IdAllocator,
    states: HashMap<u16, ConnState>,
    /// true on the side that allocates connection ids (the client)
    initiator: bool,
}

impl Tunnel {
    pub fn new(key: &str, mut backend: Backend, initiator: bool) -> Self {
        let (record, handshake) = RecordLayer::new(key);
        // non-urgent: the handshake block may ride along with the first frame
        backend.send(&handshake, false);
        Tunnel {
            record,
            backend,
            alloc: IdAllocator::new(),
            states: HashMap::new(),
            initiator,
        }
    }

    /// Allocate an id for a fresh substream. No wire traffic until the
    /// first data is sent.
    pub fn new_connection(&mut self) -> Result<u16> {
        let conn_id = self.alloc.allocate()?;
        self.states.insert(conn_id, ConnState::New);
        debug!(conn_id, "substream opened");
        Ok(conn_id)
    }

    /// Send substream data. The first packet of a substream carries SYN.
    pub fn send_packet(&mut self, conn_id: u16, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut control = Control::DAT;
        match self.states.get(&conn_id) {
            Some(ConnState::New) => {
                control |= Control::SYN;
                self.states.insert(conn_id, ConnState::Connected);
            }
            Some(ConnState::Connected) => {}
            // closing, resetting or already gone: nothing left to say
            _ => return,
        }
        self.emit(conn_id, control, data);
    }

    /// Announce an orderly close. The id stays allocated until the peer's
    /// FIN echo arrives.
    pub fn close_connection(&mut self, conn_id: u16) {
        match self.states.get(&conn_id) {
            Some(ConnState::Connected) => {
                self.emit(conn_id, Control::FIN, &[]);
                self.states.insert(conn_id, ConnState::Closing);
            }
            Some(ConnState::New) => {
                // never sent SYN, the peer has no idea this id existed
                self.release(conn_id);
            }
            _ => {}
        }
    }

    /// Announce an abortive close. The id stays allocated until the peer's
    /// RST echo arrives.
    pub fn reset_connection(&mut self, conn_id: u16) {
        match self.states.get(&conn_id) {
            Some(ConnState::Connected) => {
                self.emit(conn_id, Control::RST, &[]);
                self.states.insert(conn_id, ConnState::Resetting);
            }
            Some(ConnState::New) => {
                self.release(conn_id);
            }
            _ => {}
        }
    }

    /// Pump the backend once and run every decoded packet through the
    /// substream state machine. Suppressed packets (teardown echoes, data
    /// for dead substreams) are consumed here; the rest surface.
    pub async fn receive_packets(&mut self) -> Result<Vec<TunnelPacket>> {
        let chunk = match self.backend.transfer().await? {
            Some(chunk) => chunk,
            None => return Err(self.record.eof_error()),
        };
        let payloads = match self.record.open(&chunk) {
            Ok(payloads) => payloads,
            Err(e) => {
                if e.wants_reset_reply() {
                    let wire = self.record.seal_reset();
                    self.backend.send(&wire, true);
                }
                return Err(e);
            }
        };
        let mut packets = Vec::new();
        for payload in payloads {
            if let Some(packet) = self.process_packet(payload)? {
                packets.push(packet);
            }
        }
        Ok(packets)
    }

    fn process_packet(&mut self, payload: Bytes) -> Result<Option<TunnelPacket>> {
        let mut packet = parse_packet(payload)?;
        let conn_id = packet.conn_id;
        trace!(conn_id, control = packet.control, len = packet.data.len(), "tunnel packet");

        // An RST kills the substream on the spot. Only a connected substream
        // owes the peer an echo; in any other state this is our own echo
        // coming back, which both sides agree retires the id.
        if packet.control & Control::RST != 0 {
            let old = self.release(conn_id);
            if old != Some(ConnState::Connected) {
                return Ok(None);
            }
            self.emit(conn_id, Control::RST, &[]);
            packet.control = Control::RST;
            packet.data = Bytes::new();
            return Ok(Some(packet));
        }

        // SYN establishes the substream (the id was chosen by the peer)
        let mut state = self.states.get(&conn_id).copied();
        if packet.control & Control::SYN != 0 {
            self.states.insert(conn_id, ConnState::Connected);
            state = Some(ConnState::Connected);
        }

        // data from a not-yet-established or teardown-pending substream is dropped
        if state != Some(ConnState::Connected) {
            packet.control &= !Control::DAT;
        }
        if packet.control & Control::DAT == 0 {
            packet.data = Bytes::new();
        }

        // FIN: same echo rule as RST, but the packet still surfaces so the
        // multiplexer can tear down its local side
        if packet.control & Control::FIN != 0 {
            let old = self.release(conn_id);
            if old != Some(ConnState::Connected) {
                return Ok(None);
            }
            self.emit(conn_id, Control::FIN, &[]);
        }

        if packet.control == 0 {
            return Ok(None);
        }
        Ok(Some(packet))
    }

    fn emit(&mut self, conn_id: u16, control: u8, data: &[u8]) {
        let mut payload = BytesMut::with_capacity(TUNNEL_HEADER_SIZE + data.len());
        payload.put_u8(VERSION);
        payload.put_u8(control);
        payload.put_u16(conn_id);
        payload.extend_from_slice(data);
        let wire = self.record.seal(&payload);
        self.backend.send(&wire, true);
    }

    /// Drop a substream and, on the allocating side, return its id to the
    /// pool. Safe to call for ids we never knew about.
    fn release(&mut self, conn_id: u16) -> Option<ConnState> {
        let old = self.states.remove(&conn_id);
        if old.is_some() {
            debug!(conn_id, "substream retired");
            if self.initiator {
                self.alloc.recycle(conn_id);
            }
        }
        old
    }

    pub fn state(&self, conn_id: u16) -> Option<ConnState> {
        self.states.get(&conn_id).copied()
    }

    pub fn live_substreams(&self) -> usize {
        self.states.len()
    }

    /// False while the backend sits at or over its high-water mark; the
    /// multiplexer must not feed more substream data until this recovers.
    pub fn available_for_writing(&self) -> bool {
        self.backend.available_for_writing()
    }

    /// Push out anything still queued without saying goodbye. Used after a
    /// fatal error that may have queued a reset frame.
    pub async fn flush(&mut self) -> Result<()> {
        self.backend.drain().await
    }

    /// Announce the secure close and flush the outbound queue. Dropping the
    /// tunnel afterwards closes the backend sockets.
    pub async fn shutdown(&mut self) -> Result<()> {
        let wire = self.record.seal_close();
        self.backend.send(&wire, true);
        self.backend.drain().await
    }
}
