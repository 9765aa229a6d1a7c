//! LAN discovery probes and wakeup packets.
//!
//! Grounded on `switch/src/discoverymanager.cpp` (`PING_MS`/`HOSTS_MAX`/
//! `DROP_PINGS` constants, broadcast-then-track service loop) and
//! `cli/src/wakeup.c` (single fire-and-forget wakeup send, registkey
//! parsed as an up-to-8-hex-digit credential). The on-wire discovery
//! packet itself (`discovery.c`) was not part of the retrieved source,
//! so the textual `SRCH`/`WAKEUP` request-line format below follows the
//! publicly documented shape of the protocol rather than a byte-verified
//! port; see the design notes for this gap.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, TakionError};
use crate::models::connect_info::Target;
use crate::stop_pipe::StopPipe;

const PING_MS: u64 = 500;
const HOSTS_MAX: usize = 16;
const DROP_PINGS: u32 = 3;
const PROTOCOL_VERSION: &str = "00020020";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Ready,
    Standby,
}

#[derive(Debug, Clone)]
pub struct DiscoveredHost {
    pub addr: SocketAddr,
    pub state: HostState,
    pub host_name: Option<String>,
    pub host_id: Option<String>,
    pub system_version: Option<String>,
    pub running_app_name: Option<String>,
    pub target: Option<Target>,
}

impl DiscoveredHost {
    /// Formats `host_id` (a bare hex string like `AABBCCDDEEFF`) as a
    /// colon-separated MAC address, the conventional display form for the
    /// host identifier.
    pub fn mac(&self) -> Option<String> {
        let id = self.host_id.as_deref()?;
        if id.len() != 12 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(
            id.as_bytes()
                .chunks(2)
                .map(|pair| std::str::from_utf8(pair).unwrap())
                .collect::<Vec<_>>()
                .join(":"),
        )
    }
}

fn search_packet() -> Vec<u8> {
    format!(
        "SRCH * HTTP/1.1\r\ndevice-discovery-protocol-version:{PROTOCOL_VERSION}\r\n\r\n"
    )
    .into_bytes()
}

fn wakeup_packet(credential: u64, ps5: bool) -> Vec<u8> {
    let protocol_version = if ps5 { "00030010" } else { PROTOCOL_VERSION };
    format!(
        "WAKEUP * HTTP/1.1\r\nclient-type:vr\r\nauth-type:R\r\nuser-credential:{credential}\r\ndevice-discovery-protocol-version:{protocol_version}\r\n\r\n"
    )
    .into_bytes()
}

/// Parses a discovery response's `HTTP/1.1 200 Ok` / key:value body into a
/// [`DiscoveredHost`]. Unknown or absent fields are left `None` rather
/// than rejecting the packet, mirroring the original's field-by-field
/// `if(discovered_host->field)` guards.
fn parse_response(buf: &[u8], from: SocketAddr) -> Option<DiscoveredHost> {
    let text = std::str::from_utf8(buf).ok()?;
    let mut lines = text.split("\r\n");
    let status = lines.next()?;
    let state = if status.contains("200") {
        HostState::Ready
    } else if status.contains("620") {
        HostState::Standby
    } else {
        return None;
    };

    let mut fields = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            fields.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }

    let system_version = fields.get("system-version").cloned();
    let target = system_version.as_deref().and_then(guess_target);

    Some(DiscoveredHost {
        addr: from,
        state,
        host_name: fields.get("host-name").cloned(),
        host_id: fields.get("host-id").cloned(),
        system_version,
        running_app_name: fields.get("running-app-name").cloned(),
        target,
    })
}

/// Maps a reported system-version string's leading digits to a console
/// family, the way `chiaki_discovery_host_system_version_target` buckets
/// on the version prefix (e.g. `"07020001"` -> PS5, below that -> PS4).
fn guess_target(system_version: &str) -> Option<Target> {
    let major = system_version.get(0..2)?;
    match major.parse::<u32>().ok()? {
        0..=6 => Some(Target::Ps4),
        _ => Some(Target::Ps5),
    }
}

/// Sends one `SRCH` probe to `host` and waits up to `timeout` for a
/// reply. Used by the one-shot `discover --host` CLI verb.
pub async fn probe_host(host: &str, port: u16, timeout: Duration) -> Result<Option<DiscoveredHost>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(TakionError::Network)?;
    let target_addr = format!("{host}:{port}");
    socket.send_to(&search_packet(), &target_addr).await.map_err(TakionError::Network)?;

    let mut buf = [0u8; 1024];
    match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, from))) => Ok(parse_response(&buf[..n], from)),
        Ok(Err(e)) => Err(TakionError::Network(e)),
        Err(_) => Ok(None),
    }
}

/// Sends a single wakeup datagram; matches `chiaki_discovery_wakeup`'s
/// fire-and-forget, no-response-expected semantics.
pub async fn wakeup(host: &str, target: Target, credential: u64) -> Result<()> {
    let port = target.discovery_port();
    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(TakionError::Network)?;
    let addr = format!("{host}:{port}");
    socket
        .send_to(&wakeup_packet(credential, target.is_ps5()), &addr)
        .await
        .map_err(TakionError::Network)?;
    info!(host, ps5 = target.is_ps5(), "sent wakeup packet");
    Ok(())
}

/// Parses an up-to-8-hex-digit registration key into the credential the
/// wakeup packet carries, rejecting longer input the same as the
/// original CLI's `strlen(registkey) > 8` guard.
pub fn parse_registkey(hex: &str) -> Result<u64> {
    if hex.len() > 8 {
        return Err(TakionError::ParseError("registkey is too long".into()));
    }
    u64::from_str_radix(hex, 16).map_err(|e| TakionError::ParseError(e.to_string()))
}

struct TrackedHost {
    missed: u32,
    host: DiscoveredHost,
}

/// A standing broadcast-and-track service: periodically broadcasts
/// `SRCH`, keeps up to [`HOSTS_MAX`] hosts, and drops any host silent
/// for [`DROP_PINGS`] consecutive intervals.
pub struct DiscoveryService {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    events: mpsc::Sender<DiscoveredHost>,
}

impl DiscoveryService {
    pub async fn bind(broadcast_addr: SocketAddr) -> Result<(Self, mpsc::Receiver<DiscoveredHost>)> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(TakionError::Network)?;
        socket.set_broadcast(true).map_err(TakionError::Network)?;
        let (tx, rx) = mpsc::channel(HOSTS_MAX);
        Ok((
            Self {
                socket,
                broadcast_addr,
                events: tx,
            },
            rx,
        ))
    }

    /// Runs the broadcast/track loop until `stop` is signaled.
    pub async fn run(self, stop: StopPipe) {
        let mut tracked: HashMap<SocketAddr, TrackedHost> = HashMap::new();
        let mut interval = tokio::time::interval(Duration::from_millis(PING_MS));
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.socket.send_to(&search_packet(), self.broadcast_addr).await {
                        warn!(error = %e, "discovery broadcast failed");
                    }
                    let mut stale = Vec::new();
                    for (addr, tracked_host) in tracked.iter_mut() {
                        tracked_host.missed += 1;
                        if tracked_host.missed >= DROP_PINGS {
                            stale.push(*addr);
                        }
                    }
                    for addr in stale {
                        tracked.remove(&addr);
                        debug!(%addr, "dropped host after missed pings");
                    }
                }
                recv = self.socket.recv_from(&mut buf) => {
                    let Ok((n, from)) = recv else { continue };
                    let Some(host) = parse_response(&buf[..n], from) else { continue };
                    if !tracked.contains_key(&from) && tracked.len() >= HOSTS_MAX {
                        continue;
                    }
                    tracked.insert(from, TrackedHost { missed: 0, host: host.clone() });
                    let _ = self.events.send(host).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_packet_has_request_line_and_version() {
        let packet = search_packet();
        let text = std::str::from_utf8(&packet).unwrap();
        assert!(text.starts_with("SRCH * HTTP/1.1"));
        assert!(text.contains("device-discovery-protocol-version"));
    }

    #[test]
    fn wakeup_packet_carries_credential_and_distinguishes_target() {
        let ps4 = wakeup_packet(0xdeadbeef, false);
        let ps5 = wakeup_packet(0xdeadbeef, true);
        let ps4_text = std::str::from_utf8(&ps4).unwrap();
        let ps5_text = std::str::from_utf8(&ps5).unwrap();
        assert!(ps4_text.contains("user-credential:3735928559"));
        assert_ne!(ps4_text, ps5_text);
    }

    #[test]
    fn parse_registkey_rejects_overlong_input() {
        assert!(parse_registkey("123456789").is_err());
        assert_eq!(parse_registkey("abcd1234").unwrap(), 0xabcd1234);
    }

    #[test]
    fn parse_response_reads_ready_state_and_fields() {
        let raw = b"HTTP/1.1 200 Ok\r\nhost-name:My PS4\r\nhost-id:ABCDEF123456\r\nsystem-version:03020001\r\n\r\n";
        let addr: SocketAddr = "192.168.1.5:987".parse().unwrap();
        let host = parse_response(raw, addr).expect("should parse");
        assert_eq!(host.state, HostState::Ready);
        assert_eq!(host.host_name.as_deref(), Some("My PS4"));
        assert_eq!(host.target, Some(Target::Ps4));
    }

    #[test]
    fn discovery_decode_reports_ps5_and_formats_mac() {
        let raw = b"HTTP/1.1 200 Ok\r\nsystem-version:07020001\r\nhost-id:AABBCCDDEEFF\r\n\r\n";
        let addr: SocketAddr = "192.168.1.5:9302".parse().unwrap();
        let host = parse_response(raw, addr).expect("should parse");
        assert_eq!(host.state, HostState::Ready);
        assert_eq!(host.target, Some(Target::Ps5));
        assert_eq!(host.mac().as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn parse_response_reads_standby_state() {
        let raw = b"HTTP/1.1 620 Server Standby\r\n\r\n";
        let addr: SocketAddr = "192.168.1.5:987".parse().unwrap();
        let host = parse_response(raw, addr).expect("should parse");
        assert_eq!(host.state, HostState::Standby);
    }

    #[test]
    fn parse_response_rejects_garbage() {
        let addr: SocketAddr = "192.168.1.5:987".parse().unwrap();
        assert!(parse_response(b"not a discovery reply", addr).is_none());
    }

    #[tokio::test]
    async fn probe_host_times_out_when_nobody_answers() {
        let result = probe_host("127.0.0.1", 1, Duration::from_millis(50)).await;
        assert!(matches!(result, Ok(None)) || result.is_err());
    }
}
