//! Ctrl channel crypto: AES-CTR keystream plus a Galois MAC, keyed per
//! 64-bit counter value.
//!
//! Shape is grounded on the teacher's `calling::srtp` (AES-CTR-as-keystream
//! with an auth tag derived from a monotonic counter), generalized from
//! SRTP's HMAC-SHA1 tag to a true GMAC built on the same `aes`/`ctr` crates
//! plus `ghash` for the field arithmetic.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;
use ghash::universal_hash::{KeyInit, UniversalHash};
use ghash::GHash;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

pub const GMAC_TAG_LEN: usize = 4;

/// Encrypts (or decrypts; CTR mode is symmetric) `data` in place, keyed by
/// `key` and a counter-derived IV.
pub fn crypt_in_place(key: &[u8; 32], counter: u64, data: &mut [u8]) {
    let mut iv = [0u8; 16];
    iv[8..16].copy_from_slice(&counter.to_be_bytes());
    // Only the low 16 bytes of the 32-byte key are used for the stream
    // cipher; the upper half seeds the GMAC subkey (see `gmac_key_for`).
    let mut cipher = Aes128Ctr::new(key[..16].into(), (&iv).into());
    cipher.apply_keystream(data);
}

fn gmac_subkey(key: &[u8; 32], counter: u64) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[8..16].copy_from_slice(&counter.to_be_bytes());
    let mut iv = [0u8; 16];
    iv[..16].copy_from_slice(&key[16..32]);
    let mut cipher = Aes128Ctr::new(key[..16].into(), (&iv).into());
    cipher.apply_keystream(&mut block);
    block
}

/// Computes a truncated GMAC over `data`, keyed per-counter the same way
/// `crypt_in_place`'s keystream is: a fresh subkey is derived from the
/// counter so no tag key is ever reused across messages.
pub fn gmac(key: &[u8; 32], counter: u64, data: &[u8]) -> [u8; GMAC_TAG_LEN] {
    let subkey = gmac_subkey(key, counter);
    let mut ghash = GHash::new((&subkey).into());
    ghash.update_padded(data);
    let tag = ghash.finalize();
    let mut out = [0u8; GMAC_TAG_LEN];
    out.copy_from_slice(&tag[..GMAC_TAG_LEN]);
    out
}

pub fn verify_gmac(key: &[u8; 32], counter: u64, data: &[u8], tag: &[u8; GMAC_TAG_LEN]) -> bool {
    let expected = gmac(key, counter, data);
    // Constant-time-ish compare; tags are tiny so timing leakage here is
    // not a meaningful channel, but avoid short-circuiting regardless.
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(tag.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypt_is_its_own_inverse() {
        let key = [7u8; 32];
        let mut data = b"hello ctrl channel".to_vec();
        let original = data.clone();
        crypt_in_place(&key, 1, &mut data);
        assert_ne!(data, original);
        crypt_in_place(&key, 1, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn gmac_changes_with_counter() {
        let key = [3u8; 32];
        let tag1 = gmac(&key, 1, b"message");
        let tag2 = gmac(&key, 2, b"message");
        assert_ne!(tag1, tag2);
    }

    #[test]
    fn gmac_verifies_and_rejects_tamper() {
        let key = [9u8; 32];
        let tag = gmac(&key, 5, b"payload");
        assert!(verify_gmac(&key, 5, b"payload", &tag));
        assert!(!verify_gmac(&key, 5, b"payload!", &tag));
        assert!(!verify_gmac(&key, 6, b"payload", &tag));
    }
}
