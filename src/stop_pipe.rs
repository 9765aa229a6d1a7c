//! Cancellable waits composed with socket I/O.
//!
//! The original primitive is a pipe/event object raced against a socket fd
//! via `select()`. In Tokio that's a cancellation token raced against the
//! I/O future with `tokio::select!` — no separate fd is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

use crate::error::{Result, TakionError};

#[derive(Clone, Default)]
pub struct StopPipe {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: multiple calls are fine, later ones are no-ops.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once `stop()` has been called. Safe to await repeatedly
    /// and from multiple tasks.
    pub async fn cancelled(&self) {
        if self.is_stopped() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }

    /// Races an arbitrary future against cancellation and a timeout,
    /// mirroring `chiaki_stop_pipe_select_single`'s three-way outcome.
    pub async fn select<F, T>(&self, fut: F, timeout_ms: Option<u64>) -> Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(TakionError::Canceled),
            res = Self::with_optional_timeout(fut, timeout_ms) => res,
        }
    }

    async fn with_optional_timeout<F, T>(fut: F, timeout_ms: Option<u64>) -> Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        match timeout_ms {
            None => Ok(fut.await),
            Some(ms) => timeout(Duration::from_millis(ms), fut)
                .await
                .map_err(|_| TakionError::Timeout),
        }
    }

    /// Connects a TCP stream, racing the attempt against cancellation.
    /// Error mapping follows `chiaki_stop_pipe_connect`'s socket-error
    /// translation (refused/timeout/host-down/host-unreachable/network).
    pub async fn connect(
        &self,
        addr: std::net::SocketAddr,
    ) -> Result<tokio::net::TcpStream> {
        let connect = tokio::net::TcpStream::connect(addr);
        match self.select(connect, None).await? {
            Ok(stream) => Ok(stream),
            Err(e) => Err(map_connect_error(e)),
        }
    }
}

fn map_connect_error(e: std::io::Error) -> TakionError {
    use std::io::ErrorKind::*;
    match e.kind() {
        ConnectionRefused => TakionError::ConnectionRefused,
        TimedOut => TakionError::Timeout,
        HostUnreachable => TakionError::HostUnreach,
        _ => TakionError::Network(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_wakes_pending_select() {
        let pipe = StopPipe::new();
        let pipe2 = pipe.clone();
        let handle = tokio::spawn(async move {
            pipe2
                .select(std::future::pending::<()>(), None)
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipe.stop();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(TakionError::Canceled)));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_sticky() {
        let pipe = StopPipe::new();
        pipe.stop();
        pipe.stop();
        assert!(pipe.is_stopped());
        // cancelled() resolves immediately even though notify already fired.
        tokio::time::timeout(Duration::from_millis(50), pipe.cancelled())
            .await
            .expect("cancelled() should resolve immediately once stopped");
    }

    #[tokio::test]
    async fn select_times_out_without_stop() {
        let pipe = StopPipe::new();
        let res: Result<()> = pipe.select(std::future::pending::<()>(), Some(10)).await;
        assert!(matches!(res, Err(TakionError::Timeout)));
    }
}
