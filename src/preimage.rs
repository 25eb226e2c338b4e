//! Fingerprint preimage construction and manual SHA-1 padding.
//!
//! A v4 fingerprint is `SHA-1(0x99 || be16(len) || body)`. The body starts
//! with the version byte followed by the big-endian creation time, so the
//! timestamp always lands on bytes 4..8 of the preimage: exactly the second
//! message word. The search substitutes that word per candidate.

use crate::error::{Error, Result};

/// Leading byte of a public-key fingerprint preimage.
pub const PREIMAGE_TAG: u8 = 0x99;

/// Only v4 key bodies carry a SHA-1 fingerprint.
pub const KEY_VERSION: u8 = 4;

/// Index of the message word holding the creation time.
pub const TIMESTAMP_WORD: usize = 1;

/// SHA-1 block size in bytes.
pub const BLOCK_LEN: usize = 64;

/// Words per SHA-1 block.
pub const BLOCK_WORDS: usize = BLOCK_LEN / 4;

/// `0x99 || be16(len(body)) || body`.
pub fn fingerprint_preimage(body: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(body.len()).map_err(|_| {
        Error::UnsupportedPacket(format!("key packet body of {} bytes", body.len()))
    })?;
    let mut preimage = Vec::with_capacity(body.len() + 3);
    preimage.push(PREIMAGE_TAG);
    preimage.extend_from_slice(&len.to_be_bytes());
    preimage.extend_from_slice(body);
    Ok(preimage)
}

/// Length of the padded message for a preimage of `len` bytes.
pub fn padded_len(len: usize) -> usize {
    (len + 1 + 8).div_ceil(BLOCK_LEN) * BLOCK_LEN
}

/// Applies SHA-1 padding: `0x80`, zeros, then the 64-bit big-endian bit length.
pub fn pad(preimage: &[u8]) -> Vec<u8> {
    let mut padded = vec![0u8; padded_len(preimage.len())];
    padded[..preimage.len()].copy_from_slice(preimage);
    padded[preimage.len()] = 0x80;
    let bits = (preimage.len() as u64) * 8;
    let end = padded.len();
    padded[end - 8..].copy_from_slice(&bits.to_be_bytes());
    padded
}

/// Decodes big-endian bytes into host-order words. `bytes.len()` must be a
/// multiple of four; a trailing partial word is ignored.
pub fn be_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A padded fingerprint preimage as SHA-1 message words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedMessage {
    words: Vec<u32>,
    preimage_len: usize,
}

impl PaddedMessage {
    /// Builds the padded message for a v4 public-key packet body.
    pub fn build(body: &[u8]) -> Result<Self> {
        if body.len() < 5 || body[0] != KEY_VERSION {
            return Err(Error::UnsupportedPacket(
                "fingerprint search needs a v4 key packet body".into(),
            ));
        }
        let preimage = fingerprint_preimage(body)?;
        Ok(Self::from_preimage(&preimage))
    }

    /// Pads an arbitrary preimage.
    pub fn from_preimage(preimage: &[u8]) -> Self {
        Self {
            words: be_words(&pad(preimage)),
            preimage_len: preimage.len(),
        }
    }

    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn blocks(&self) -> usize {
        self.words.len() / BLOCK_WORDS
    }

    pub fn preimage_len(&self) -> usize {
        self.preimage_len
    }

    /// Creation time currently encoded in the message.
    pub fn timestamp(&self) -> u32 {
        self.words[TIMESTAMP_WORD]
    }

    /// Overwrites the creation time in place.
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.words[TIMESTAMP_WORD] = timestamp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preimage_header() {
        let body = [4u8, 0x5F, 0x00, 0x00, 0x01, 22, 1, 2, 3];
        let preimage = fingerprint_preimage(&body).unwrap();
        assert_eq!(&preimage[..3], &[0x99, 0x00, 0x09]);
        assert_eq!(&preimage[3..], &body);
    }

    #[test]
    fn test_preimage_too_large() {
        assert!(fingerprint_preimage(&vec![0u8; 65535]).is_ok());
        assert!(matches!(
            fingerprint_preimage(&vec![0u8; 65536]),
            Err(Error::UnsupportedPacket(_))
        ));
    }

    #[test]
    fn test_padding_lengths() {
        for len in [0, 1, 3, 51, 55, 56, 63, 64, 100, 119, 120, 1000] {
            let padded = pad(&vec![0xAB; len]);
            let expected = (0..).map(|k| k * 64).find(|&n| n >= len + 9).unwrap();
            assert_eq!(padded.len(), expected, "length {}", len);
            assert_eq!(padded.len() % 64, 0);
            assert_eq!(padded[len], 0x80);
            assert!(padded[len + 1..padded.len() - 8].iter().all(|&b| b == 0));

            let tail: [u8; 8] = padded[padded.len() - 8..].try_into().unwrap();
            assert_eq!(u64::from_be_bytes(tail), 8 * len as u64);
        }
    }

    #[test]
    fn test_be_words() {
        assert_eq!(
            be_words(&[0x01, 0x02, 0x03, 0x04, 0xFF, 0x00, 0x00, 0x80]),
            vec![0x01020304, 0xFF000080]
        );
    }

    #[test]
    fn test_timestamp_word() {
        let created: u32 = 0x6543_2100;
        let mut body = vec![KEY_VERSION];
        body.extend_from_slice(&created.to_be_bytes());
        body.extend_from_slice(&[22, 9, 0x2B, 0x06]);

        let mut message = PaddedMessage::build(&body).unwrap();
        assert_eq!(message.timestamp(), created);
        assert_eq!(message.preimage_len(), body.len() + 3);
        assert_eq!(message.blocks(), 1);

        message.set_timestamp(7);
        assert_eq!(message.words()[TIMESTAMP_WORD], 7);
        assert_eq!(message.words()[0] >> 8, 0x99_0009);
    }

    #[test]
    fn test_rejects_non_v4_body() {
        assert!(PaddedMessage::build(&[5, 0, 0, 0, 0, 22]).is_err());
        assert!(PaddedMessage::build(&[4, 0, 0]).is_err());
    }
}
