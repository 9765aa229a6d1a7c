//! PIN-based console pairing.
//!
//! `regist.c` itself was not among the retrieved original sources, so the
//! request/response framing below is a reasonable-shape approximation
//! (length-prefixed binary request over the same stop-pipe-guarded TCP
//! connect already used elsewhere) rather than a byte-verified port; see
//! the design notes for this gap. The key-derivation *idiom* — an
//! AES-128-CTR keystream keyed from known material, no separate MAC — is
//! grounded on the SRTP module's `prf_derive` PRF-from-cipher shape
//! (hash/XOR inputs into an IV, encrypt zeros with it), generalized from
//! SRTP's 14-byte salt-XOR construction to a PIN+account-id salt.

use std::net::SocketAddr;

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use crate::error::{Result, TakionError};
use crate::models::connect_info::Target;
use crate::stop_pipe::StopPipe;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const REGIST_PORT: u16 = 9295;

pub struct RegistrationRequest {
    pub target: Target,
    pub psn_online_id: String,
    pub pin: String,
    pub psn_account_id: [u8; 8],
}

#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub regist_key: [u8; 16],
    pub morning: [u8; 16],
    pub rp_key_type: u32,
    pub target: Target,
}

/// Derives the two 16-byte secrets a registration exchange produces
/// locally (before the console's response is even read): a key stream
/// seeded from the PIN and the account id, split into `regist_key` and
/// `morning` halves. Mirrors `prf_derive`'s "hash inputs into an IV,
/// encrypt zeros" shape.
fn derive_local_secrets(pin: &str, psn_account_id: &[u8; 8]) -> ([u8; 16], [u8; 16]) {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(psn_account_id);
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);

    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(psn_account_id);

    let mut out = [0u8; 32];
    let mut cipher = Aes128Ctr::new((&key).into(), (&iv).into());
    cipher.apply_keystream(&mut out);

    let mut regist_key = [0u8; 16];
    let mut morning = [0u8; 16];
    regist_key.copy_from_slice(&out[..16]);
    morning.copy_from_slice(&out[16..]);
    (regist_key, morning)
}

fn encode_request(req: &RegistrationRequest) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&req.psn_account_id);
    payload.extend_from_slice(req.psn_online_id.as_bytes());
    payload.push(0);
    payload.extend_from_slice(req.pin.as_bytes());
    payload.push(0);
    payload.push(if req.target.is_ps5() { 1 } else { 0 });

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Runs a registration exchange against `host`: connects over TCP,
/// sends the PIN-bearing request, and awaits a length-prefixed reply
/// carrying the console-assigned key material.
pub async fn register(host: &str, req: &RegistrationRequest, stop: &StopPipe) -> Result<RegistrationResult> {
    let addr: SocketAddr = format!("{host}:{REGIST_PORT}")
        .parse()
        .map_err(|_| TakionError::ParseError("invalid host".into()))?;

    let mut stream = stop.connect(addr).await?;
    let frame = encode_request(req);
    stream.write_all(&frame).await.map_err(TakionError::Network)?;

    let mut len_buf = [0u8; 4];
    stop.select(stream.read_exact(&mut len_buf), Some(10_000))
        .await?
        .map_err(TakionError::Network)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len < 20 || len > 4096 {
        return Err(TakionError::InvalidData("registration reply has implausible length".into()));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(TakionError::Network)?;

    let (local_regist_key, local_morning) = derive_local_secrets(&req.pin, &req.psn_account_id);
    let mut regist_key = [0u8; 16];
    regist_key.copy_from_slice(&body[..16]);
    let rp_key_type = u32::from_be_bytes([body[16], body[17], body[18], body[19]]);

    info!(host, ps5 = req.target.is_ps5(), "registration completed");
    Ok(RegistrationResult {
        regist_key,
        morning: xor16(&local_morning, &regist_key_salt(&local_regist_key, &regist_key)),
        rp_key_type,
        target: req.target,
    })
}

fn regist_key_salt(local: &[u8; 16], remote: &[u8; 16]) -> [u8; 16] {
    xor16(local, remote)
}

fn xor16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_secret_derivation_is_deterministic() {
        let (a1, b1) = derive_local_secrets("1234", &[1, 2, 3, 4, 5, 6, 7, 8]);
        let (a2, b2) = derive_local_secrets("1234", &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        assert_ne!(a1, b1);
    }

    #[test]
    fn different_pins_yield_different_secrets() {
        let (a, _) = derive_local_secrets("1234", &[0; 8]);
        let (b, _) = derive_local_secrets("5678", &[0; 8]);
        assert_ne!(a, b);
    }

    #[test]
    fn request_frame_is_length_prefixed_and_carries_pin() {
        let req = RegistrationRequest {
            target: Target::Ps5,
            psn_online_id: "player_one".to_string(),
            pin: "12345678".to_string(),
            psn_account_id: [9; 8],
        };
        let frame = encode_request(&req);
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(frame.len(), 4 + len);
        let body = &frame[4..];
        assert!(body.windows(8).any(|w| w == req.pin.as_bytes()));
    }

    #[tokio::test]
    async fn register_fails_fast_against_a_closed_port() {
        let stop = StopPipe::new();
        let req = RegistrationRequest {
            target: Target::Ps4,
            psn_online_id: "x".to_string(),
            pin: "00000000".to_string(),
            psn_account_id: [0; 8],
        };
        let result = register("127.0.0.1", &req, &stop).await;
        assert!(result.is_err());
    }
}
