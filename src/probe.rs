//! Peer reachability probing.
//!
//! A probe is a single TCP connect against a node's NameNode port. Probes
//! never retry; callers that need to wait for a peer use [`wait_reachable`],
//! which polls on a fixed interval, gives up after a bounded time and can be
//! cancelled through a watch channel.

use crate::error::{HaError, Result};
use crate::types::NodeId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

/// Reachability check against a node's storage port.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns `true` when a connection could be established. Never errors.
    async fn probe(&self, node: &NodeId, port: u16) -> bool;
}

/// Prober that opens (and immediately drops) a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProber {
    connect_timeout: Duration,
}

impl TcpProber {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, node: &NodeId, port: u16) -> bool {
        let addr = format!("{}:{}", node, port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(node = %node, port, error = %e, "Probe refused");
                false
            }
            Err(_) => {
                debug!(node = %node, port, "Probe timed out");
                false
            }
        }
    }
}

/// Polling policy for [`wait_reachable`].
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Poll `node` until it answers, the policy's timeout elapses or `cancel`
/// flips to `true`.
///
/// Returns [`HaError::TimedOut`] on exhaustion and [`HaError::Cancelled`]
/// when cancelled, so callers can tell the two apart.
pub async fn wait_reachable(
    prober: Arc<dyn Prober>,
    node: NodeId,
    port: u16,
    policy: WaitPolicy,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + policy.timeout;

    loop {
        if *cancel.borrow() {
            return Err(HaError::Cancelled(format!("wait for {}", node)));
        }

        if prober.probe(&node, port).await {
            info!(node = %node, waited_ms = started.elapsed().as_millis() as u64, "Peer reachable");
            return Ok(());
        }

        let next = tokio::time::Instant::now() + policy.poll_interval;
        if next > deadline {
            return Err(HaError::TimedOut {
                what: format!("{}:{}", node, port),
                after_ms: started.elapsed().as_millis() as u64,
            });
        }

        tokio::select! {
            _ = tokio::time::sleep_until(next) => {}
            changed = cancel.changed() => {
                // A dropped sender also ends the wait.
                if changed.is_err() || *cancel.borrow() {
                    return Err(HaError::Cancelled(format!("wait for {}", node)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProber {
        reachable_after: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FlakyProber {
        async fn probe(&self, _node: &NodeId, _port: u16) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.reachable_after
        }
    }

    struct SetProber(Mutex<HashSet<NodeId>>);

    #[async_trait]
    impl Prober for SetProber {
        async fn probe(&self, node: &NodeId, _port: u16) -> bool {
            self.0.lock().contains(node)
        }
    }

    fn fast_policy() -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = TcpProber::new(Duration::from_millis(500));
        assert!(prober.probe(&NodeId::new("127.0.0.1"), port).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_closed_port() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let prober = TcpProber::new(Duration::from_millis(500));
        assert!(!prober.probe(&NodeId::new("127.0.0.1"), port).await);
    }

    #[tokio::test]
    async fn test_wait_succeeds_once_reachable() {
        let prober = Arc::new(FlakyProber {
            reachable_after: 3,
            calls: AtomicUsize::new(0),
        });
        let (_tx, rx) = watch::channel(false);
        let result = wait_reachable(prober.clone(), "nn-1".into(), 8020, fast_policy(), rx).await;
        assert!(result.is_ok());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let prober = Arc::new(SetProber(Mutex::new(HashSet::new())));
        let (_tx, rx) = watch::channel(false);
        let policy = WaitPolicy {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(30),
        };
        let result = wait_reachable(prober, "nn-1".into(), 8020, policy, rx).await;
        assert!(matches!(result, Err(HaError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let prober = Arc::new(SetProber(Mutex::new(HashSet::new())));
        let (tx, rx) = watch::channel(false);
        let policy = WaitPolicy {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(10),
        };
        let handle = tokio::spawn(wait_reachable(prober, "nn-1".into(), 8020, policy, rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(HaError::Cancelled(_))));
    }
}
