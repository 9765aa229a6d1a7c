//! Periodic loss reporting loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::stop_pipe::StopPipe;

const INTERVAL_MS: u64 = 200;

/// Cumulative received/lost counters updated by the transport's recv loop.
#[derive(Default)]
pub struct PacketStats {
    received: AtomicU64,
    lost: AtomicU64,
}

impl PacketStats {
    pub fn record_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_lost(&self, n: u64) {
        self.lost.fetch_add(n, Ordering::Relaxed);
    }

    /// Reads (received, lost) since the last call, resetting the counters.
    pub fn take(&self) -> (u64, u64) {
        (
            self.received.swap(0, Ordering::Relaxed),
            self.lost.swap(0, Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionPacket {
    pub received: u16,
    pub lost: u16,
}

/// A channel the controller reports through; the Takion transport
/// implements this to turn reports into wire packets.
#[async_trait::async_trait]
pub trait CongestionSink: Send + Sync {
    async fn send_congestion(&self, packet: CongestionPacket);
}

pub struct CongestionControl {
    stats: Arc<PacketStats>,
    packet_loss_max: f64,
}

impl CongestionControl {
    pub fn new(stats: Arc<PacketStats>, packet_loss_max: f64) -> Self {
        Self {
            stats,
            packet_loss_max,
        }
    }

    /// Spawns the reporting loop; the returned handle finishes once
    /// `stop` is signaled.
    pub fn start(self, sink: Arc<dyn CongestionSink>, stop: StopPipe) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let (mut received, mut lost) = self.stats.take();
                let total = received + lost;
                let loss = if total > 0 { lost as f64 / total as f64 } else { 0.0 };
                if loss > self.packet_loss_max {
                    warn!("increasing received packets to reduce hit on stream quality");
                    lost = (total as f64 * self.packet_loss_max) as u64;
                    received = total - lost;
                }
                let packet = CongestionPacket {
                    received: received.min(u16::MAX as u64) as u16,
                    lost: lost.min(u16::MAX as u64) as u16,
                };
                debug!(received = packet.received, lost = packet.lost, "congestion report");
                sink.send_congestion(packet).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<CongestionPacket>>);

    #[async_trait::async_trait]
    impl CongestionSink for RecordingSink {
        async fn send_congestion(&self, packet: CongestionPacket) {
            self.0.lock().unwrap().push(packet);
        }
    }

    #[tokio::test]
    async fn clamps_loss_to_configured_max() {
        let stats = Arc::new(PacketStats::default());
        stats.record_received(10);
        stats.record_lost(90);
        let control = CongestionControl::new(stats, 0.1);
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let stop = StopPipe::new();
        let handle = control.start(sink.clone(), stop.clone());
        tokio::time::sleep(Duration::from_millis(250)).await;
        stop.stop();
        handle.await.unwrap();
        let packets = sink.0.lock().unwrap();
        assert!(!packets.is_empty());
        let p = packets[0];
        assert_eq!(p.received + p.lost, 100);
        assert!(p.lost as f64 / 100.0 <= 0.1 + 1e-9);
    }
}
