//! Takion: the primary reliable/unreliable multiplexed transport.
//!
//! Architecture is grounded on the teacher's `calling::media::MediaSession`:
//! one `Arc<UdpSocket>` shared between a spawned send loop and a spawned
//! recv loop, `JoinHandle`s stored on a handle struct so `stop()` can abort
//! them, and a `Drop` impl that aborts as a backstop.

pub mod fec;
pub mod packet;
pub mod reassembly;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hkdf::Hkdf;
use sha2::Sha256;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::congestion::PacketStats;
use crate::error::{Result, TakionError};
use crate::stop_pipe::StopPipe;
use crate::transport::seq_num_16_lt;
use packet::{ControlPacket, DataHeader, PacketType, UnitsNumber};
use reassembly::{ReassembledFrame, ReassemblyWindow};

const INIT_RETRY_MAX: u32 = 5;
const INIT_TIMEOUT_MS: u64 = 5_000;
const RELIABLE_RTO_MIN: Duration = Duration::from_millis(200);
const RELIABLE_RTO_MAX: Duration = Duration::from_millis(2_000);
const RELIABLE_RETRY_MAX: u32 = 8;
const REASSEMBLY_MAX_GAP: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakionState {
    Closed,
    Connecting,
    Handshake,
    Established,
    Closing,
}

/// A frame delivered to the upper layer from an established transport.
pub struct DeliveredFrame {
    pub packet_type: PacketType,
    pub frame: ReassembledFrame,
}

struct ReliablePacket {
    seq_num: u32,
    payload: Vec<u8>,
    last_send: Instant,
    rto: Duration,
    tries: u32,
}

/// Derives the two independent per-direction stream keys from the
/// session's root key and the handshake nonce exchange, via HKDF-SHA256.
pub fn derive_session_keys(morning: &[u8; 16], local_nonce: &[u8; 16], remote_nonce: &[u8; 16]) -> ([u8; 32], [u8; 32]) {
    let mut salt = Vec::with_capacity(32);
    salt.extend_from_slice(local_nonce);
    salt.extend_from_slice(remote_nonce);
    let hk = Hkdf::<Sha256>::new(Some(&salt), morning);

    let mut tx = [0u8; 32];
    hk.expand(b"takion-tx", &mut tx).expect("32 <= 255*32");
    let mut rx = [0u8; 32];
    hk.expand(b"takion-rx", &mut rx).expect("32 <= 255*32");
    (tx, rx)
}

/// Owns the UDP socket and per-direction sequence/reassembly state for one
/// Takion connection.
pub struct Takion {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    state: Mutex<TakionState>,
    tx_key: [u8; 32],
    rx_key: [u8; 32],
    reliable_seq: AtomicU32,
    reliable_inflight: Mutex<HashMap<u32, ReliablePacket>>,
    reassembly: Mutex<HashMap<u8, ReassemblyWindow>>,
    stats: Arc<PacketStats>,
    frame_tx: mpsc::Sender<DeliveredFrame>,
    mic_frame_index: AtomicU16,
}

pub struct TakionHandle {
    pub takion: Arc<Takion>,
    pub frames: mpsc::Receiver<DeliveredFrame>,
    send_loop: tokio::task::JoinHandle<()>,
    recv_loop: tokio::task::JoinHandle<()>,
}

impl Takion {
    /// Binds the socket and runs the `Connecting`/`Handshake` phases,
    /// returning a running transport. `local_nonce`/`remote_nonce` are the
    /// 16-byte handshake nonces exchanged during INIT/INIT-ACK.
    pub async fn connect(
        bind_addr: SocketAddr,
        peer: SocketAddr,
        morning: [u8; 16],
        local_nonce: [u8; 16],
        remote_nonce: [u8; 16],
        stop: StopPipe,
    ) -> Result<TakionHandle> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await.map_err(TakionError::Network)?);
        socket.connect(peer).await.map_err(TakionError::Network)?;

        let mut tries = 0;
        loop {
            socket.send(b"INIT").await.map_err(TakionError::Network)?;
            let mut buf = [0u8; 64];
            let wait = stop.select(socket.recv(&mut buf), Some(INIT_TIMEOUT_MS)).await;
            match wait {
                Ok(Ok(_)) => break,
                _ => {
                    tries += 1;
                    if tries >= INIT_RETRY_MAX {
                        return Err(TakionError::Timeout);
                    }
                }
            }
        }

        let (tx_key, rx_key) = derive_session_keys(&morning, &local_nonce, &remote_nonce);
        let (frame_tx, frame_rx) = mpsc::channel(64);

        let takion = Arc::new(Takion {
            socket: socket.clone(),
            peer,
            state: Mutex::new(TakionState::Established),
            tx_key,
            rx_key,
            reliable_seq: AtomicU32::new(0),
            reliable_inflight: Mutex::new(HashMap::new()),
            reassembly: Mutex::new(HashMap::new()),
            stats: Arc::new(PacketStats::default()),
            frame_tx,
            mic_frame_index: AtomicU16::new(0),
        });

        let recv_loop = tokio::spawn(Self::recv_loop(takion.clone(), stop.clone()));
        let send_loop = tokio::spawn(Self::retransmit_loop(takion.clone(), stop.clone()));

        Ok(TakionHandle {
            takion,
            frames: frame_rx,
            send_loop,
            recv_loop,
        })
    }

    pub fn stats(&self) -> Arc<PacketStats> {
        self.stats.clone()
    }

    pub async fn state(&self) -> TakionState {
        *self.state.lock().await
    }

    /// Sends an unreliable data packet (audio/video/mic); no retransmit,
    /// no ack bookkeeping.
    pub async fn send_data(&self, header: DataHeader, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(DataHeader::WIRE_LEN + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(payload);
        self.socket.send(&buf).await.map_err(TakionError::Network)?;
        Ok(())
    }

    pub async fn send_mic_packet(&self, packet: &[u8]) -> Result<()> {
        self.socket.send(packet).await.map_err(TakionError::Network)?;
        Ok(())
    }

    /// Sends a reliable control message; stored for retransmission until
    /// acked or the retry budget is spent.
    pub async fn send_reliable(&self, payload: Vec<u8>) -> Result<u32> {
        let seq_num = self.reliable_seq.fetch_add(1, Ordering::SeqCst);
        let packet = ControlPacket {
            seq_num,
            key_pos: 0,
            gmac: [0; 4],
            payload: payload.clone(),
        };
        let encoded = packet.encode();
        self.socket.send(&encoded).await.map_err(TakionError::Network)?;
        self.reliable_inflight.lock().await.insert(
            seq_num,
            ReliablePacket {
                seq_num,
                payload,
                last_send: Instant::now(),
                rto: RELIABLE_RTO_MIN,
                tries: 0,
            },
        );
        Ok(seq_num)
    }

    /// Processes an incoming cumulative-ack for the reliable sub-channel.
    pub async fn ack_reliable(&self, up_to_seq: u32) {
        let mut inflight = self.reliable_inflight.lock().await;
        inflight.retain(|seq, _| !(*seq == up_to_seq || *seq < up_to_seq));
    }

    async fn retransmit_loop(takion: Arc<Takion>, stop: StopPipe) {
        let mut interval = tokio::time::interval(RELIABLE_RTO_MIN);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Instant::now();
            let mut inflight = takion.reliable_inflight.lock().await;
            let mut drop_seqs = Vec::new();
            for (seq, packet) in inflight.iter_mut() {
                if now.saturating_duration_since(packet.last_send) >= packet.rto {
                    if packet.tries >= RELIABLE_RETRY_MAX {
                        warn!(seq_num = seq, "reliable packet exhausted retries");
                        drop_seqs.push(*seq);
                        continue;
                    }
                    let control = ControlPacket {
                        seq_num: packet.seq_num,
                        key_pos: 0,
                        gmac: [0; 4],
                        payload: packet.payload.clone(),
                    };
                    let _ = takion.socket.send(&control.encode()).await;
                    packet.last_send = now;
                    packet.tries += 1;
                    packet.rto = (packet.rto * 2).min(RELIABLE_RTO_MAX);
                }
            }
            for seq in drop_seqs {
                inflight.remove(&seq);
            }
        }
    }

    async fn recv_loop(takion: Arc<Takion>, stop: StopPipe) {
        let mut buf = vec![0u8; 65536];
        loop {
            let recv = takion.socket.recv(&mut buf);
            let n = match stop.select(recv, None).await {
                Ok(Ok(n)) => n,
                _ => break,
            };
            if n == 0 {
                continue;
            }
            if let Err(e) = takion.handle_packet(&buf[..n]).await {
                debug!(error = %e, "dropping malformed takion packet");
            }
        }
    }

    async fn handle_packet(&self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(TakionError::InvalidData("empty packet".into()));
        }
        let ptype = PacketType::from_u8(buf[0])?;
        match ptype {
            PacketType::Audio | PacketType::Video | PacketType::Mic => {
                let header = DataHeader::decode(buf)?;
                let payload = &buf[DataHeader::WIRE_LEN..];
                self.stats.record_received(1);
                let mut windows = self.reassembly.lock().await;
                let window = windows
                    .entry(header.packet_type as u8)
                    .or_insert_with(|| ReassemblyWindow::new(payload.len(), REASSEMBLY_MAX_GAP));
                window.push_unit(
                    header.frame_index,
                    header.units.unit_index,
                    header.units.units_total,
                    payload.to_vec(),
                );
                for frame in window.drain_ready() {
                    let _ = self
                        .frame_tx
                        .send(DeliveredFrame {
                            packet_type: header.packet_type,
                            frame,
                        })
                        .await;
                }
                Ok(())
            }
            PacketType::Control => {
                let packet = ControlPacket::decode(buf)?;
                self.ack_reliable(packet.seq_num).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn next_mic_frame_index(&self) -> u16 {
        self.mic_frame_index.fetch_add(1, Ordering::SeqCst)
    }
}

impl TakionHandle {
    pub async fn stop(&self) {
        self.send_loop.abort();
        self.recv_loop.abort();
    }
}

impl Drop for TakionHandle {
    fn drop(&mut self) {
        self.send_loop.abort();
        self.recv_loop.abort();
    }
}

/// Whether `a` should be considered delivered-before `b` for duplicate
/// detection within the 64-wide reliable window.
pub fn reliable_duplicate_window(seen_highest: u32, candidate: u32) -> bool {
    seen_highest.wrapping_sub(candidate) < 64 && seq_num_16_lt((candidate & 0xffff) as u16, (seen_highest & 0xffff) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_derivation_is_deterministic_and_direction_distinct() {
        let morning = [1u8; 16];
        let a = [2u8; 16];
        let b = [3u8; 16];
        let (tx1, rx1) = derive_session_keys(&morning, &a, &b);
        let (tx2, rx2) = derive_session_keys(&morning, &a, &b);
        assert_eq!(tx1, tx2);
        assert_eq!(rx1, rx2);
        assert_ne!(tx1, rx1);
    }

    #[tokio::test]
    async fn data_packet_round_trips_through_handle_packet() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = socket.local_addr().unwrap();
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let takion = Takion {
            socket: socket.clone(),
            peer,
            state: Mutex::new(TakionState::Established),
            tx_key: [0; 32],
            rx_key: [0; 32],
            reliable_seq: AtomicU32::new(0),
            reliable_inflight: Mutex::new(HashMap::new()),
            reassembly: Mutex::new(HashMap::new()),
            stats: Arc::new(PacketStats::default()),
            frame_tx,
            mic_frame_index: AtomicU16::new(0),
        };

        let header = DataHeader {
            packet_type: PacketType::Audio,
            packet_index: 0,
            frame_index: 0,
            units: UnitsNumber { fec_raw: 10273, units_total: 1, unit_index: 0 },
        };
        let mut buf = header.encode().to_vec();
        buf.extend_from_slice(b"payload!");
        takion.handle_packet(&buf).await.unwrap();

        let delivered = frame_rx.recv().await.unwrap();
        assert_eq!(delivered.frame.data, b"payload!");
    }
}
