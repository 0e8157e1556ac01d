use bytes::{BufMut, BytesMut};
use crypto::digest::Digest;
use crypto::md5::Md5;
use strum::Display;

use crate::burrow::common::{Error, Result};

/// AES block size; every frame is an integer number of blocks.
pub const BLOCK_SIZE: usize = 16;
/// DataLen:u16 | PadLen:u8 | Type:u8
pub const HEADER_SIZE: usize = 4;
/// MD5 truncated to 8 bytes. Both peers must agree; with 8 the largest part
/// frame is exactly 65536 bytes with zero padding.
pub const DIGEST_SIZE: usize = 8;
/// The most data one frame can carry.
pub const MAX_DATA_LEN: usize = 65535;
/// Part frames carry exactly this much so that
/// (HEADER_SIZE + PART_DATA_LEN + DIGEST_SIZE) % BLOCK_SIZE == 0.
pub const PART_DATA_LEN: usize = 65524;

#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum PacketType {
    /// Carries upper-layer data, completing any preceding part frames.
    Data = 1,
    /// A fragment of an oversized payload; reassembled until a data frame.
    Part = 2,
    /// Traffic padding, dropped on receipt.
    NoData = 3,
    Reset = 254,
    Close = 255,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(b: u8) -> Result<PacketType> {
        match b {
            1 => Ok(PacketType::Data),
            2 => Ok(PacketType::Part),
            3 => Ok(PacketType::NoData),
            254 => Ok(PacketType::Reset),
            255 => Ok(PacketType::Close),
            _ => Err(Error::invalid_header()),
        }
    }
}

pub struct Header {
    pub data_len: usize,
    pub pad_len: usize,
    pub packet_type: PacketType,
}

impl Header {
    /// Parse a frame header from the start of bytes.
    /// Returns None until HEADER_SIZE bytes are buffered.
    pub fn parse(bytes: &[u8]) -> Result<Option<Header>> {
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        let header = Header {
            data_len: u16::from_be_bytes([bytes[0], bytes[1]]) as usize,
            pad_len: bytes[2] as usize,
            packet_type: PacketType::from_u8(bytes[3])?,
        };
        if header.frame_len() % BLOCK_SIZE != 0 {
            return Err(Error::invalid_header());
        }
        match header.packet_type {
            PacketType::Data | PacketType::Part => {}
            _ if header.data_len != 0 => return Err(Error::invalid_header()),
            _ => {}
        }
        Ok(Some(header))
    }

    /// Total frame length including header, data, padding and digest.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.data_len + self.pad_len + DIGEST_SIZE
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u16(self.data_len as u16);
        out.put_u8(self.pad_len as u8);
        out.put_u8(self.packet_type.as_u8());
    }
}

/// MD5 of header ‖ data ‖ padding, truncated to DIGEST_SIZE bytes.
pub fn frame_digest(covered: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Md5::new();
    hasher.input(covered);
    let mut full = [0u8; 16];
    hasher.result(&mut full);
    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(&full[..DIGEST_SIZE]);
    digest
}
