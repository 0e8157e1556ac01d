use bytes::{Buf, Bytes, BytesMut};
use rand::Rng;

use crate::burrow::common::{Error, Result};
use crate::burrow::record::cipher::{derive_key, CbcDecrypt, CbcEncrypt};
use crate::burrow::record::frame::{
    frame_digest, Header, PacketType, BLOCK_SIZE, DIGEST_SIZE, HEADER_SIZE, MAX_DATA_LEN,
    PART_DATA_LEN,
};

/// The record codec: framing, padding, MD5 integrity and the two CBC chains.
///
/// This is pure state-machine code; it never touches a socket. The tunnel
/// feeds it ciphertext from the backend and writes whatever it seals back
/// out through the backend.
pub struct RecordLayer {
    send_cipher: CbcEncrypt,
    recv_cipher: CbcDecrypt,
    /// ciphertext waiting for a whole block
    cipher_buf: BytesMut,
    /// decrypted bytes waiting for a whole frame
    plain_buf: BytesMut,
    /// reassembly buffer for part frames
    part_buf: BytesMut,
    /// parsed header of a frame whose body has not fully arrived
    pending_header: Option<Header>,
    recv_synchronized: bool,
    first_packet_checked: bool,
    secure_closed: bool,
    closed: bool,
}

impl RecordLayer {
    /// Build the codec for one tunnel session. Returns the codec and the
    /// encrypted handshake block, which must be queued (non-urgent) before
    /// any frame: the receiver discards its first decrypted block, which
    /// synchronizes the self-synchronizing CBC chain without ever putting
    /// the IV on the wire.
    pub fn new(preshared: &str) -> (Self, BytesMut) {
        let key = derive_key(preshared);
        let mut rng = rand::thread_rng();
        // The IV never leaves this process; CBC resynchronizes off the
        // discarded first block, so the two sides may use different IVs.
        let iv: [u8; BLOCK_SIZE] = rng.gen();
        let mut layer = RecordLayer {
            send_cipher: CbcEncrypt::new(&key, iv),
            recv_cipher: CbcDecrypt::new(&key, iv),
            cipher_buf: BytesMut::new(),
            plain_buf: BytesMut::new(),
            part_buf: BytesMut::new(),
            pending_header: None,
            recv_synchronized: false,
            first_packet_checked: false,
            secure_closed: false,
            closed: false,
        };
        let first_block: [u8; BLOCK_SIZE] = rng.gen();
        let mut handshake = BytesMut::with_capacity(BLOCK_SIZE);
        layer.send_cipher.encrypt(&first_block, &mut handshake);
        (layer, handshake)
    }

    /// Encrypt an upper-layer payload into one or more frames. Payloads over
    /// MAX_DATA_LEN are cut into part frames of PART_DATA_LEN bytes each,
    /// terminated by a data frame with the remainder.
    pub fn seal(&mut self, mut payload: &[u8]) -> BytesMut {
        let mut out = BytesMut::with_capacity(payload.len() + 2 * BLOCK_SIZE);
        while payload.len() > MAX_DATA_LEN {
            self.seal_frame(PacketType::Part, &payload[..PART_DATA_LEN], &[], &mut out);
            payload = &payload[PART_DATA_LEN..];
        }
        let pad_len =
            (BLOCK_SIZE - (payload.len() + HEADER_SIZE + DIGEST_SIZE) % BLOCK_SIZE) % BLOCK_SIZE;
        let padding = vec![pad_len as u8; pad_len];
        self.seal_frame(PacketType::Data, payload, &padding, &mut out);
        out
    }

    pub fn seal_reset(&mut self) -> BytesMut {
        self.seal_control(PacketType::Reset)
    }

    /// Encrypt a close frame. This only announces the close; shutting down
    /// the backend stays the caller's job.
    pub fn seal_close(&mut self) -> BytesMut {
        self.seal_control(PacketType::Close)
    }

    fn seal_control(&mut self, packet_type: PacketType) -> BytesMut {
        let pad_len = (BLOCK_SIZE - (HEADER_SIZE + DIGEST_SIZE) % BLOCK_SIZE) % BLOCK_SIZE;
        let mut padding = vec![0u8; pad_len];
        rand::thread_rng().fill(&mut padding[..]);
        let mut out = BytesMut::with_capacity(BLOCK_SIZE);
        self.seal_frame(packet_type, &[], &padding, &mut out);
        out
    }

    fn seal_frame(
        &mut self,
        packet_type: PacketType,
        data: &[u8],
        padding: &[u8],
        out: &mut BytesMut,
    ) {
        let header = Header {
            data_len: data.len(),
            pad_len: padding.len(),
            packet_type,
        };
        let mut frame = BytesMut::with_capacity(header.frame_len());
        header.encode(&mut frame);
        frame.extend_from_slice(data);
        frame.extend_from_slice(padding);
        let digest = frame_digest(&frame);
        frame.extend_from_slice(&digest);
        self.send_cipher.encrypt(&frame, out);
    }

    /// Feed ciphertext from the backend and collect every payload that is
    /// now complete. Close frames only flip secure_closed; reset frames and
    /// integrity failures surface as errors and poison the codec.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<Bytes>> {
        if self.closed {
            return Err(Error::closed());
        }
        self.cipher_buf.extend_from_slice(ciphertext);
        let whole = self.cipher_buf.len() - self.cipher_buf.len() % BLOCK_SIZE;
        if whole > 0 {
            let chunk = self.cipher_buf.split_to(whole);
            self.recv_cipher.decrypt(&chunk, &mut self.plain_buf);
            if !self.recv_synchronized {
                // drop the peer's handshake block
                self.plain_buf.advance(BLOCK_SIZE);
                self.recv_synchronized = true;
            }
        }
        match self.extract_packets() {
            Ok(packets) => Ok(packets),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    fn extract_packets(&mut self) -> Result<Vec<Bytes>> {
        let mut packets = Vec::new();
        loop {
            if self.pending_header.is_none() {
                match Header::parse(&self.plain_buf) {
                    Ok(None) => break,
                    Ok(Some(header)) => self.pending_header = Some(header),
                    Err(e) => return Err(self.first_packet_policy(e)),
                }
            }
            let frame_len = self.pending_header.as_ref().unwrap().frame_len();
            if self.plain_buf.len() < frame_len {
                break;
            }
            let header = self.pending_header.take().unwrap();
            let frame = self.plain_buf.split_to(frame_len).freeze();
            let covered = frame_len - DIGEST_SIZE;
            if frame_digest(&frame[..covered])[..] != frame[covered..] {
                return Err(self.first_packet_policy(Error::hashfail()));
            }
            self.first_packet_checked = true;
            let data = frame.slice(HEADER_SIZE..HEADER_SIZE + header.data_len);
            match header.packet_type {
                PacketType::NoData => {}
                PacketType::Reset => return Err(Error::remote_reset()),
                PacketType::Close => self.secure_closed = true,
                PacketType::Part => self.part_buf.extend_from_slice(&data),
                PacketType::Data => {
                    if self.part_buf.is_empty() {
                        packets.push(data);
                    } else {
                        let mut whole = std::mem::take(&mut self.part_buf);
                        whole.extend_from_slice(&data);
                        packets.push(whole.freeze());
                    }
                }
            }
        }
        Ok(packets)
    }

    /// Before the first frame checks out, a malformed frame most likely
    /// means the peer speaks another protocol, and answering it would only
    /// leak that we don't.
    fn first_packet_policy(&self, e: Error) -> Error {
        if self.first_packet_checked {
            e
        } else {
            Error::first_packet_incorrect()
        }
    }

    /// The error to surface when the backend reports EOF.
    pub fn eof_error(&self) -> Error {
        if self.secure_closed {
            Error::connection_closed()
        } else {
            Error::insecure_closing()
        }
    }

    pub fn secure_closed(&self) -> bool {
        self.secure_closed
    }

    pub fn first_packet_checked(&self) -> bool {
        self.first_packet_checked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burrow::common::ErrorKind;

    fn pair(key: &str) -> (RecordLayer, RecordLayer) {
        let (mut a, hs_a) = RecordLayer::new(key);
        let (mut b, hs_b) = RecordLayer::new(key);
        // exchange handshake blocks; nothing may come out of them
        assert!(b.open(&hs_a).unwrap().is_empty());
        assert!(a.open(&hs_b).unwrap().is_empty());
        (a, b)
    }

    #[test]
    fn test_handshake_roundtrip() {
        let (mut a, mut b) = pair("k");
        let wire = a.seal(b"hello");
        let packets = b.open(&wire).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..], b"hello");
    }

    #[test]
    fn test_frames_are_block_aligned() {
        let (mut a, _) = RecordLayer::new("k");
        for size in [0usize, 1, 5, 15, 16, 17, 4096, 65535, 65536, 200000] {
            let wire = a.seal(&vec![0x41u8; size]);
            assert_eq!(wire.len() % BLOCK_SIZE, 0, "size {}", size);
        }
        assert_eq!(a.seal_reset().len(), BLOCK_SIZE);
        assert_eq!(a.seal_close().len(), BLOCK_SIZE);
    }

    #[test]
    fn test_large_payload_fragmentation() {
        let (mut a, mut b) = pair("k");
        let payload = vec![0x41u8; 200000];
        let wire = a.seal(&payload);
        // three part frames of PART_DATA_LEN plus one data frame, zero waste
        let remainder = 200000 - 3 * PART_DATA_LEN;
        let data_frame_len = HEADER_SIZE + remainder + DIGEST_SIZE;
        assert_eq!(data_frame_len % BLOCK_SIZE, 0);
        assert_eq!(wire.len(), 3 * (HEADER_SIZE + PART_DATA_LEN + DIGEST_SIZE) + data_frame_len);
        let packets = b.open(&wire).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 200000);
        assert!(packets[0].iter().all(|&b| b == 0x41));
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let (mut a, mut b) = pair("k");
        let wire = a.seal(b"trickle");
        let mut packets = Vec::new();
        for byte in wire.iter() {
            packets.extend(b.open(&[*byte]).unwrap());
        }
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..], b"trickle");
    }

    #[test]
    fn test_two_packets_one_read() {
        let (mut a, mut b) = pair("k");
        let mut wire = a.seal(b"first");
        wire.extend_from_slice(&a.seal(b"second"));
        let packets = b.open(&wire).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][..], b"first");
        assert_eq!(&packets[1][..], b"second");
    }

    #[test]
    fn test_tamper_detection() {
        let (mut a, mut b) = pair("k");
        b.open(&a.seal(b"good")).unwrap();
        let mut wire = a.seal(b"tampered");
        // corrupting the last block leaves the header intact but not the digest
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        let err = b.open(&wire).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Hashfail);
        assert!(err.wants_reset_reply());
        // the codec is poisoned afterwards
        assert_eq!(b.open(&[]).unwrap_err().kind(), &ErrorKind::ClosedError);
    }

    #[test]
    fn test_first_packet_incorrect() {
        let (mut a, mut b) = pair("k");
        let mut wire = a.seal(b"never arrives");
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        // no frame decoded yet, so the failure must not ask for a reset reply
        let err = b.open(&wire).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::FirstPacketIncorrect);
        assert!(!err.wants_reset_reply());
    }

    #[test]
    fn test_remote_reset() {
        let (mut a, mut b) = pair("k");
        let err = b.open(&a.seal_reset()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::RemoteReset);
        assert!(!err.wants_reset_reply());
    }

    #[test]
    fn test_tamper_reply_reaches_sender_as_reset() {
        let (mut a, mut b) = pair("k");
        b.open(&a.seal(b"good")).unwrap();

        let mut wire = a.seal(b"tampered");
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        let err = b.open(&wire).unwrap_err();
        assert!(err.wants_reset_reply());

        // the reset b answers with must surface on a's side as RemoteReset
        let reply = b.seal_reset();
        let err = a.open(&reply).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::RemoteReset);
    }

    #[test]
    fn test_secure_close() {
        let (mut a, mut b) = pair("k");
        assert!(!b.secure_closed());
        assert_eq!(b.eof_error().kind(), &ErrorKind::InsecureClosing);
        assert!(b.open(&a.seal_close()).unwrap().is_empty());
        assert!(b.secure_closed());
        assert_eq!(b.eof_error().kind(), &ErrorKind::ConnectionClosed);
    }

    #[test]
    fn test_data_still_flows_after_close_frame() {
        // close only announces intent; frames behind it still decode
        let (mut a, mut b) = pair("k");
        let mut wire = a.seal_close();
        wire.extend_from_slice(&a.seal(b"parting words"));
        let packets = b.open(&wire).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..], b"parting words");
    }

    #[test]
    fn test_wrong_key_is_first_packet_incorrect() {
        let (mut a, hs_a) = RecordLayer::new("right key");
        let (mut b, _) = RecordLayer::new("wrong key");
        // b decrypts everything to garbage; a garbage header either fails
        // parsing outright or waits for a frame whose digest cannot check
        // out, so a few KiB in the stream must be rejected, and rejected
        // without a reset reply because nothing ever decoded
        let mut fed = b.open(&hs_a).map(|p| assert!(p.is_empty()));
        for _ in 0..200 {
            if fed.is_err() {
                break;
            }
            let chunk = a.seal(&[0u8; 1024]);
            fed = b.open(&chunk).map(|p| assert!(p.is_empty()));
        }
        let err = fed.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::FirstPacketIncorrect);
        assert!(!err.wants_reset_reply());
    }
}
