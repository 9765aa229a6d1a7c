//! Ctrl channel: encrypted, authenticated control-message exchange.
//!
//! Carried over Takion's reliable sub-channel. Driver shape follows the
//! teacher's `trouter::mod` frame-type dispatch (`handle_frame`/event loop)
//! generalized from socket.io frames to Ctrl's binary message types.

pub mod crypto;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::error::{Result, TakionError};
use crate::transport::takion::Takion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    SessionIdSet = 1,
    LoginPinRequest = 2,
    LoginPinReply = 3,
    GotoBed = 4,
    KeyboardSetText = 5,
    KeyboardAccept = 6,
    KeyboardReject = 7,
    ToggleMicrophone = 8,
    ConnectMicrophone = 9,
    GoHome = 10,
    EnableFeatures = 11,
    CantDisplay = 12,
}

impl MessageType {
    fn from_u16(v: u16) -> Result<Self> {
        Ok(match v {
            1 => MessageType::SessionIdSet,
            2 => MessageType::LoginPinRequest,
            3 => MessageType::LoginPinReply,
            4 => MessageType::GotoBed,
            5 => MessageType::KeyboardSetText,
            6 => MessageType::KeyboardAccept,
            7 => MessageType::KeyboardReject,
            8 => MessageType::ToggleMicrophone,
            9 => MessageType::ConnectMicrophone,
            10 => MessageType::GoHome,
            11 => MessageType::EnableFeatures,
            12 => MessageType::CantDisplay,
            other => return Err(TakionError::InvalidData(format!("unknown ctrl message type {other}"))),
        })
    }
}

/// Frame: `type_be16 | payload_size_be32 | payload`.
pub fn encode_message(ty: MessageType, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + payload.len());
    buf.extend_from_slice(&(ty as u16).to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub fn decode_message(buf: &[u8]) -> Result<(MessageType, &[u8])> {
    if buf.len() < 6 {
        return Err(TakionError::InvalidData("ctrl message too short".into()));
    }
    let ty = MessageType::from_u16(u16::from_be_bytes([buf[0], buf[1]]))?;
    let len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as usize;
    let end = (6 + len).min(buf.len());
    Ok((ty, &buf[6..end]))
}

/// Events the session driver consumes, pushed by the Ctrl read loop.
/// Ctrl never holds a back-pointer to the session — it only has this
/// sender, matching the pointer-graph note in the design notes.
#[derive(Debug)]
pub enum CtrlEvent {
    LoginPinRequested,
    LoginPinResult { correct: bool },
    CantDisplay { a: bool, b: bool },
    Closed,
}

struct CryptState {
    key: [u8; 32],
    counter_local: AtomicU64,
    counter_remote: AtomicU64,
}

pub struct Ctrl {
    takion: Arc<Takion>,
    crypt: CryptState,
    events: mpsc::Sender<CtrlEvent>,
    cant_display: Mutex<(bool, bool)>,
}

impl Ctrl {
    pub fn new(takion: Arc<Takion>, key: [u8; 32]) -> (Self, mpsc::Receiver<CtrlEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (
            Self {
                takion,
                crypt: CryptState {
                    key,
                    counter_local: AtomicU64::new(0),
                    counter_remote: AtomicU64::new(0),
                },
                events: tx,
                cant_display: Mutex::new((false, false)),
            },
            rx,
        )
    }

    /// Encrypts+authenticates a message and sends it on Takion's reliable
    /// sub-channel. Counters are never reused.
    pub async fn send(&self, ty: MessageType, payload: &[u8]) -> Result<()> {
        let counter = self.crypt.counter_local.fetch_add(1, Ordering::SeqCst);
        let mut frame = encode_message(ty, payload);
        crypto::crypt_in_place(&self.crypt.key, counter, &mut frame);
        let tag = crypto::gmac(&self.crypt.key, counter, &frame);

        let mut wire = Vec::with_capacity(frame.len() + crypto::GMAC_TAG_LEN);
        wire.extend_from_slice(&tag);
        wire.extend_from_slice(&frame);

        self.takion.send_reliable(wire).await?;
        Ok(())
    }

    /// Decrypts and authenticates an inbound Ctrl frame, dispatching to the
    /// session via `events`.
    pub async fn handle_inbound(&self, wire: &[u8]) -> Result<()> {
        if wire.len() < crypto::GMAC_TAG_LEN {
            return Err(TakionError::InvalidData("ctrl frame too short".into()));
        }
        let mut tag = [0u8; crypto::GMAC_TAG_LEN];
        tag.copy_from_slice(&wire[..crypto::GMAC_TAG_LEN]);
        let mut frame = wire[crypto::GMAC_TAG_LEN..].to_vec();

        let counter = self.crypt.counter_remote.fetch_add(1, Ordering::SeqCst);
        if !crypto::verify_gmac(&self.crypt.key, counter, &frame, &tag) {
            warn!("ctrl message failed gmac verification");
            return Err(TakionError::InvalidData("gmac mismatch".into()));
        }
        crypto::crypt_in_place(&self.crypt.key, counter, &mut frame);

        let (ty, payload) = decode_message(&frame)?;
        match ty {
            MessageType::LoginPinRequest => {
                info!("console requested login pin");
                let _ = self.events.send(CtrlEvent::LoginPinRequested).await;
            }
            MessageType::LoginPinReply => {
                let correct = payload.first().copied().unwrap_or(0) != 0;
                let _ = self.events.send(CtrlEvent::LoginPinResult { correct }).await;
            }
            MessageType::CantDisplay => {
                let a = payload.first().copied().unwrap_or(0) != 0;
                let b = payload.get(1).copied().unwrap_or(0) != 0;
                let mut state = self.cant_display.lock().await;
                if *state != (a, b) {
                    *state = (a, b);
                    let _ = self.events.send(CtrlEvent::CantDisplay { a, b }).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn submit_login_pin(&self, pin: &str) -> Result<()> {
        self.send(MessageType::LoginPinReply, pin.as_bytes()).await
    }

    pub async fn goto_bed(&self) -> Result<()> {
        self.send(MessageType::GotoBed, &[]).await
    }
}
