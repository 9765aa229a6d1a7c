//! RUDP: a thin reliable-over-UDP layer for the relay/holepunch path.
//!
//! Send-buffer shape is grounded on the reference `rudpsendbuffer.c`
//! resend loop; the socket/timeout plumbing mirrors the teacher's
//! `calling::turn::TurnClient` (bind a UDP socket, build big-endian wire
//! headers by hand, await a matching response with a bounded retry).

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::seq_num_16_lt;
use crate::error::{Result, TakionError};

const CONST_MAGIC: u32 = 0x244F_244F;
const RESEND_TIMEOUT: Duration = Duration::from_millis(400);
const RESEND_WAKEUP: Duration = Duration::from_millis(200);
const RESEND_TRIES_MAX: u64 = 10;
pub const SEND_BUFFER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RudpPacketType {
    InitRequest = 1,
    InitResponse = 2,
    CookieRequest = 3,
    CookieResponse = 4,
    SessionMessage = 5,
    StreamConnectionSwitchAck = 6,
    Ack = 7,
    CtrlMessage = 8,
    Unknown = 0xff,
    Finish = 9,
}

/// Wraps a payload in the RUDP frame: `size_be16 | magic_be32 | type_be16 | payload`.
pub fn encode_frame(ptype: RudpPacketType, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    let size = (8 + payload.len()) as u16;
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(&CONST_MAGIC.to_be_bytes());
    buf.extend_from_slice(&(ptype as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Parses one RUDP frame, returning `(type, payload)`.
pub fn decode_frame(buf: &[u8]) -> Result<(u16, &[u8])> {
    if buf.len() < 8 {
        return Err(TakionError::InvalidData("rudp frame too short".into()));
    }
    let size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let magic = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
    if magic != CONST_MAGIC {
        return Err(TakionError::InvalidData("bad rudp magic".into()));
    }
    let ptype = u16::from_be_bytes([buf[6], buf[7]]);
    let end = size.min(buf.len());
    Ok((ptype, &buf[8..end]))
}

struct BufferedPacket {
    seq_num: u16,
    tries: u64,
    last_send: Instant,
    buf: Vec<u8>,
}

/// Tracks in-flight reliable RUDP packets and retransmits them on a timer,
/// matching the reference send-buffer's wakeup/timeout/give-up sequence.
pub struct RudpSendBuffer {
    socket: std::sync::Arc<UdpSocket>,
    peer: std::net::SocketAddr,
    packets: Mutex<Vec<BufferedPacket>>,
}

impl RudpSendBuffer {
    pub fn new(socket: std::sync::Arc<UdpSocket>, peer: std::net::SocketAddr) -> Self {
        Self {
            socket,
            peer,
            packets: Mutex::new(Vec::with_capacity(SEND_BUFFER_SIZE)),
        }
    }

    pub async fn push(&self, seq_num: u16, buf: Vec<u8>) -> Result<()> {
        let mut packets = self.packets.lock().await;
        if packets.len() >= SEND_BUFFER_SIZE {
            return Err(TakionError::Overflow);
        }
        if packets.iter().any(|p| p.seq_num == seq_num) {
            return Err(TakionError::InvalidData("duplicate seqnum".into()));
        }
        self.socket.send_to(&buf, self.peer).await.map_err(TakionError::Network)?;
        packets.push(BufferedPacket {
            seq_num,
            tries: 0,
            last_send: Instant::now(),
            buf,
        });
        Ok(())
    }

    /// Acknowledges every buffered packet with `seq_num <= ack`, mod-2^16
    /// aware. Returns the seqnums removed.
    pub async fn ack(&self, ack: u16) -> Vec<u16> {
        let mut packets = self.packets.lock().await;
        let mut acked = Vec::new();
        packets.retain(|p| {
            if p.seq_num == ack || seq_num_16_lt(p.seq_num, ack) {
                acked.push(p.seq_num);
                false
            } else {
                true
            }
        });
        acked
    }

    /// One resend pass: call on a `RESEND_WAKEUP` tick. Packets past
    /// [`RESEND_TRIES_MAX`] are locally dropped (treated as locally acked)
    /// and returned so the caller can react.
    pub async fn resend_tick(&self) -> Vec<u16> {
        let mut dropped = Vec::new();
        let mut packets = self.packets.lock().await;
        let now = Instant::now();
        let mut i = 0;
        while i < packets.len() {
            let elapsed = now.saturating_duration_since(packets[i].last_send);
            if elapsed > RESEND_TIMEOUT {
                if packets[i].tries >= RESEND_TRIES_MAX {
                    info!(seq_num = packets[i].seq_num, "giving up on rudp packet after max retries");
                    dropped.push(packets[i].seq_num);
                    packets.remove(i);
                    continue;
                }
                debug!(seq_num = packets[i].seq_num, tries = packets[i].tries, "resending rudp packet");
                packets[i].last_send = now;
                packets[i].tries += 1;
                let _ = self.socket.send_to(&packets[i].buf, self.peer).await;
            }
            i += 1;
        }
        dropped
    }

    pub fn resend_interval() -> Duration {
        RESEND_WAKEUP
    }

    pub async fn len(&self) -> usize {
        self.packets.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_pair() -> (std::sync::Arc<UdpSocket>, std::net::SocketAddr) {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        (std::sync::Arc::new(sock), addr)
    }

    #[test]
    fn frame_round_trips() {
        let payload = b"hello";
        let frame = encode_frame(RudpPacketType::Ack, payload);
        let (ptype, body) = decode_frame(&frame).unwrap();
        assert_eq!(ptype, RudpPacketType::Ack as u16);
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn ack_removes_all_lower_or_equal_seqnums() {
        let (sock, addr) = make_pair().await;
        let buf = RudpSendBuffer::new(sock, addr);
        buf.push(1, vec![1]).await.unwrap();
        buf.push(2, vec![2]).await.unwrap();
        buf.push(3, vec![3]).await.unwrap();
        let acked = buf.ack(2).await;
        assert_eq!(acked.len(), 2);
        assert_eq!(buf.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_seqnum_rejected() {
        let (sock, addr) = make_pair().await;
        let buf = RudpSendBuffer::new(sock, addr);
        buf.push(7, vec![0]).await.unwrap();
        let err = buf.push(7, vec![0]).await.unwrap_err();
        assert!(matches!(err, TakionError::InvalidData(_)));
    }

    #[tokio::test]
    async fn resend_tick_is_noop_before_timeout() {
        let (sock, addr) = make_pair().await;
        let buf = RudpSendBuffer::new(sock, addr);
        buf.push(1, vec![0]).await.unwrap();
        let dropped = buf.resend_tick().await;
        assert!(dropped.is_empty());
        assert_eq!(buf.len().await, 1);
    }
}
