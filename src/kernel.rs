//! The per-lane search kernel: SHA-1 over a padded message with a candidate
//! timestamp substituted, followed by the filter.
//!
//! Everything here is pure. Lanes share the message read-only and keep
//! their timestamp-bearing first block on the stack.

use crate::pattern::{Digest, Filter};
use crate::preimage::{BLOCK_WORDS, TIMESTAMP_WORD};

/// Lane result meaning "no match". Timestamp zero is therefore unreachable.
pub const NO_MATCH: u32 = 0;

const H0: Digest = [0x67452301, 0xEFCDAB89, 0x98BADCFE, 0x10325476, 0xC3D2E1F0];

/// SHA-1 compression of one 16-word block into `state`.
#[inline(always)]
pub fn compress(state: &mut Digest, block: &[u32; BLOCK_WORDS]) {
    let mut w = [0u32; 80];
    w[..BLOCK_WORDS].copy_from_slice(block);
    for t in BLOCK_WORDS..80 {
        w[t] = (w[t - 3] ^ w[t - 8] ^ w[t - 14] ^ w[t - 16]).rotate_left(1);
    }

    let [mut a, mut b, mut c, mut d, mut e] = *state;
    for (t, &wt) in w.iter().enumerate() {
        let (f, k) = match t {
            0..=19 => ((b & c) | (!b & d), 0x5A827999),
            20..=39 => (b ^ c ^ d, 0x6ED9EBA1),
            40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1BBCDC),
            _ => (b ^ c ^ d, 0xCA62C1D6),
        };
        let temp = a
            .rotate_left(5)
            .wrapping_add(f)
            .wrapping_add(e)
            .wrapping_add(k)
            .wrapping_add(wt);
        e = d;
        d = c;
        c = b.rotate_left(30);
        b = a;
        a = temp;
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
    state[4] = state[4].wrapping_add(e);
}

#[inline(always)]
fn block_at(words: &[u32], index: usize) -> [u32; BLOCK_WORDS] {
    let mut block = [0u32; BLOCK_WORDS];
    block.copy_from_slice(&words[index * BLOCK_WORDS..(index + 1) * BLOCK_WORDS]);
    block
}

/// Digest of a padded message as it stands.
pub fn digest(words: &[u32]) -> Digest {
    let mut state = H0;
    for i in 0..words.len() / BLOCK_WORDS {
        compress(&mut state, &block_at(words, i));
    }
    state
}

/// Digest of a padded message with `timestamp` in the creation-time word.
#[inline]
pub fn digest_at(words: &[u32], timestamp: u32) -> Digest {
    let mut state = H0;
    let mut first = block_at(words, 0);
    first[TIMESTAMP_WORD] = timestamp;
    compress(&mut state, &first);
    for i in 1..words.len() / BLOCK_WORDS {
        compress(&mut state, &block_at(words, i));
    }
    state
}

/// Evaluates one lane: the timestamp if its digest passes the filter,
/// otherwise [`NO_MATCH`].
#[inline]
pub fn evaluate(words: &[u32], filter: &Filter, timestamp: u32) -> u32 {
    if filter.accepts(&digest_at(words, timestamp)) {
        timestamp
    } else {
        NO_MATCH
    }
}

/// Big-endian bytes of a digest.
pub fn digest_bytes(h: &Digest) -> [u8; 20] {
    let mut out = [0u8; 20];
    for (chunk, word) in out.chunks_exact_mut(4).zip(h) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}
