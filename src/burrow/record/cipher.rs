use bytes::{BufMut, BytesMut};
use crypto::aessafe::{AesSafe128Decryptor, AesSafe128Encryptor};
use crypto::digest::Digest;
use crypto::md5::Md5;
use crypto::symmetriccipher::{BlockDecryptor, BlockEncryptor};

use crate::burrow::record::frame::BLOCK_SIZE;

/// Session key is the MD5 digest of the preshared key string.
pub fn derive_key(preshared: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.input(preshared.as_bytes());
    let mut key = [0u8; 16];
    hasher.result(&mut key);
    key
}

/// One direction of the CBC chain. The chain value persists across calls, so
/// all frames in one direction form a single continuous CBC stream and are
/// not independently decryptable.
pub struct CbcEncrypt {
    aes: AesSafe128Encryptor,
    chain: [u8; BLOCK_SIZE],
}

impl CbcEncrypt {
    pub fn new(key: &[u8; 16], iv: [u8; BLOCK_SIZE]) -> Self {
        CbcEncrypt {
            aes: AesSafe128Encryptor::new(key),
            chain: iv,
        }
    }

    /// Encrypt plain (length must be a multiple of BLOCK_SIZE) appending to out.
    pub fn encrypt(&mut self, plain: &[u8], out: &mut BytesMut) {
        debug_assert_eq!(plain.len() % BLOCK_SIZE, 0);
        let mut input = [0u8; BLOCK_SIZE];
        let mut output = [0u8; BLOCK_SIZE];
        for block in plain.chunks(BLOCK_SIZE) {
            for (i, b) in block.iter().enumerate() {
                input[i] = b ^ self.chain[i];
            }
            self.aes.encrypt_block(&input, &mut output);
            self.chain = output;
            out.put_slice(&output);
        }
    }
}

pub struct CbcDecrypt {
    aes: AesSafe128Decryptor,
    chain: [u8; BLOCK_SIZE],
}

impl CbcDecrypt {
    pub fn new(key: &[u8; 16], iv: [u8; BLOCK_SIZE]) -> Self {
        CbcDecrypt {
            aes: AesSafe128Decryptor::new(key),
            chain: iv,
        }
    }

    /// Decrypt cipher (length must be a multiple of BLOCK_SIZE) appending to out.
    pub fn decrypt(&mut self, cipher: &[u8], out: &mut BytesMut) {
        debug_assert_eq!(cipher.len() % BLOCK_SIZE, 0);
        let mut output = [0u8; BLOCK_SIZE];
        for block in cipher.chunks(BLOCK_SIZE) {
            self.aes.decrypt_block(block, &mut output);
            for (i, o) in output.iter_mut().enumerate() {
                *o ^= self.chain[i];
            }
            self.chain.copy_from_slice(block);
            out.put_slice(&output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // CBC-AES128 vectors from NIST SP 800-38A, F.2.1/F.2.2
    const KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6,
        0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
    ];
    const IV: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
        0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    ];
    const PLAIN: [u8; 32] = [
        0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96,
        0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17, 0x2a,
        0xae, 0x2d, 0x8a, 0x57, 0x1e, 0x03, 0xac, 0x9c,
        0x9e, 0xb7, 0x6f, 0xac, 0x45, 0xaf, 0x8e, 0x51,
    ];
    const CIPHER: [u8; 32] = [
        0x76, 0x49, 0xab, 0xac, 0x81, 0x19, 0xb2, 0x46,
        0xce, 0xe9, 0x8e, 0x9b, 0x12, 0xe9, 0x19, 0x7d,
        0x50, 0x86, 0xcb, 0x9b, 0x50, 0x72, 0x19, 0xee,
        0x95, 0xdb, 0x11, 0x3a, 0x91, 0x76, 0x78, 0xb2,
    ];

    #[test]
    fn test_nist_vectors() {
        let mut enc = CbcEncrypt::new(&KEY, IV);
        let mut out = BytesMut::new();
        enc.encrypt(&PLAIN, &mut out);
        assert_eq!(&out[..], &CIPHER[..]);

        let mut dec = CbcDecrypt::new(&KEY, IV);
        let mut plain = BytesMut::new();
        dec.decrypt(&CIPHER, &mut plain);
        assert_eq!(&plain[..], &PLAIN[..]);
    }

    #[test]
    fn test_chain_continues_across_calls() {
        // Encrypting block-by-block must produce the same stream as one call.
        let mut whole = BytesMut::new();
        CbcEncrypt::new(&KEY, IV).encrypt(&PLAIN, &mut whole);

        let mut split = BytesMut::new();
        let mut enc = CbcEncrypt::new(&KEY, IV);
        enc.encrypt(&PLAIN[..16], &mut split);
        enc.encrypt(&PLAIN[16..], &mut split);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_derive_key() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(
            derive_key(""),
            [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04,
                0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8, 0x42, 0x7e,
            ]
        );
    }
}
