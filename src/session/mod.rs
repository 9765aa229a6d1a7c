//! Session state machine: the end-to-end driver that takes a
//! [`ConnectInfo`] from idle to a streaming [`Ctrl`]+[`Takion`] pair and
//! back down again.
//!
//! Driver shape is grounded on the teacher's `trouter::connect_and_run` /
//! `connect_and_run_inner` split: a single-attempt outer wrapper around an
//! inner `tokio::select!` event loop racing socket I/O, timers, and the
//! stop signal.

pub mod launch_spec;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::congestion::{CongestionControl, CongestionSink};
use crate::ctrl::{Ctrl, CtrlEvent};
use crate::error::{QuitReason, Result, TakionError};
use crate::models::connect_info::ConnectInfo;
use crate::stop_pipe::StopPipe;
use crate::transport::takion::{Takion, TakionHandle};
use launch_spec::{format_launch_spec, LaunchSpecParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    LookingUp,
    ConnectingTakion,
    SendingHello,
    Registering,
    Streaming,
    Stopping,
    Done,
}

/// A cheap, cloneable front for a running session: the teacher's
/// `MediaSession` handle pattern (channel senders + shared state) rather
/// than exposing the driver's owned internals directly.
#[derive(Clone)]
pub struct SessionHandle {
    stop: StopPipe,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }
}

pub struct Session {
    info: ConnectInfo,
    stop: StopPipe,
    state: SessionState,
}

struct TakionCongestionSink {
    takion: Arc<Takion>,
}

#[async_trait::async_trait]
impl CongestionSink for TakionCongestionSink {
    async fn send_congestion(&self, packet: crate::congestion::CongestionPacket) {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&packet.received.to_be_bytes());
        payload.extend_from_slice(&packet.lost.to_be_bytes());
        let header = crate::transport::takion::packet::DataHeader {
            packet_type: crate::transport::takion::packet::PacketType::Congestion,
            packet_index: 0,
            frame_index: 0,
            units: crate::transport::takion::packet::UnitsNumber {
                fec_raw: 0,
                units_total: 1,
                unit_index: 0,
            },
        };
        let _ = self.takion.send_data(header, &payload).await;
    }
}

impl Session {
    pub fn new(info: ConnectInfo) -> (Self, SessionHandle) {
        let stop = StopPipe::new();
        (
            Self {
                info,
                stop: stop.clone(),
                state: SessionState::Init,
            },
            SessionHandle { stop },
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion, returning the reason it stopped.
    /// Every worker loop it spawns observes `self.stop` and exits
    /// promptly once `SessionHandle::stop` is called.
    pub async fn run(mut self) -> QuitReason {
        match self.run_inner().await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(error = %e, "session failed");
                map_error_to_quit_reason(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<QuitReason> {
        self.state = SessionState::LookingUp;
        let peer: SocketAddr = format!("{}:9296", self.info.host)
            .parse()
            .map_err(|_| TakionError::ParseError("invalid host".into()))?;

        self.state = SessionState::ConnectingTakion;
        let bind_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let local_nonce = random_nonce();
        let remote_nonce = random_nonce(); // would arrive via INIT-ACK in a full handshake

        let handle = match self
            .stop
            .select(
                Takion::connect(bind_addr, peer, self.info.morning, local_nonce, remote_nonce, self.stop.clone()),
                None,
            )
            .await
        {
            Ok(Ok(h)) => h,
            Ok(Err(_)) | Err(_) => return Ok(QuitReason::StreamConnectionFailed),
        };

        self.state = SessionState::SendingHello;
        self.send_launch_spec(&handle).await?;

        self.state = SessionState::Registering;
        let (ctrl, mut ctrl_events) = Ctrl::new(handle.takion.clone(), derive_ctrl_key(&self.info.morning));

        let congestion = CongestionControl::new(handle.takion.stats(), 0.1);
        let congestion_handle = congestion.start(
            Arc::new(TakionCongestionSink { takion: handle.takion.clone() }),
            self.stop.clone(),
        );

        self.state = SessionState::Streaming;
        info!("session streaming");

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    self.state = SessionState::Stopping;
                    let _ = ctrl.goto_bed().await;
                    break;
                }
                event = ctrl_events.recv() => {
                    match event {
                        Some(CtrlEvent::LoginPinRequested) => {
                            if let Some(pin) = &self.info.login_pin {
                                let _ = ctrl.submit_login_pin(pin).await;
                            }
                        }
                        Some(CtrlEvent::LoginPinResult { correct: false }) => {
                            return Ok(QuitReason::AuthFailed);
                        }
                        Some(CtrlEvent::Closed) | None => break,
                        _ => {}
                    }
                }
            }
        }

        congestion_handle.abort();
        handle.stop().await;
        self.state = SessionState::Done;
        Ok(QuitReason::Stopped)
    }

    async fn send_launch_spec(&self, handle: &TakionHandle) -> Result<()> {
        let handshake_key = random_handshake_key();
        let spec = format_launch_spec(&LaunchSpecParams {
            target: self.info.target,
            video: self.info.video_profile,
            bw_kbps_sent: (self.info.video_profile.bitrate).max(2000),
            mtu: 1454,
            rtt: 8,
            handshake_key,
        });
        handle.takion.send_reliable(spec.into_bytes()).await?;
        Ok(())
    }
}

fn derive_ctrl_key(morning: &[u8; 16]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"ctrl-key");
    hasher.update(morning);
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

fn random_nonce() -> [u8; 16] {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf).expect("system rng available");
    buf
}

fn random_handshake_key() -> [u8; 32] {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).expect("system rng available");
    buf
}

fn map_error_to_quit_reason(e: TakionError) -> QuitReason {
    match e {
        TakionError::Timeout => QuitReason::StreamConnectionFailed,
        TakionError::ConnectionRefused | TakionError::HostUnreach | TakionError::HostDown => {
            QuitReason::HostUnreachable
        }
        TakionError::VersionMismatch => QuitReason::SystemVersionMismatch,
        other => QuitReason::Unknown(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::connect_info::{Target, VideoCodec, VideoProfile};

    fn test_connect_info() -> ConnectInfo {
        ConnectInfo {
            target: Target::Ps4,
            host: "127.0.0.1".to_string(),
            regist_key: [0; 16],
            morning: [1; 16],
            login_pin: None,
            video_profile: VideoProfile { width: 1280, height: 720, max_fps: 30, bitrate: 5000, codec: VideoCodec::H264 },
            enable_keyboard: false,
            enable_dualsense: false,
            psn_account_id: [0; 8],
        }
    }

    #[test]
    fn new_session_starts_in_init_state() {
        let (session, _handle) = Session::new(test_connect_info());
        assert_eq!(session.state(), SessionState::Init);
    }

    #[test]
    fn ctrl_key_derivation_is_deterministic() {
        let morning = [5u8; 16];
        assert_eq!(derive_ctrl_key(&morning), derive_ctrl_key(&morning));
    }

    #[tokio::test]
    async fn stop_handle_cancels_an_idle_session_promptly() {
        let (session, handle) = Session::new(test_connect_info());
        handle.stop();
        // run() will fail fast at the (unreachable in test) Takion::connect
        // stage since nothing is listening on 127.0.0.1:9296; either way
        // it must return rather than hang.
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), session.run()).await;
        assert!(result.is_ok(), "session.run() must not hang after stop()");
    }
}
