// MIT License - Copyright (c) 2026 Peter Wright
// Liveness clock and heartbeat loop

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::protocol::OutboundCommand;
use crate::transport::Transport;

/// Time of the last heartbeat seen in either direction.
///
/// Keeps a monotonic instant for threshold checks and a wall-clock
/// timestamp for status reports.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    last: Arc<Mutex<Option<(Instant, DateTime<Utc>)>>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), Utc::now()));
    }

    /// True when nothing was seen for longer than `threshold`, or ever.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        match *self.last.lock().unwrap_or_else(PoisonError::into_inner) {
            Some((at, _)) => at.elapsed() > threshold,
            None => true,
        }
    }

    /// Wall-clock time of the last heartbeat.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|(_, at)| at)
    }
}

/// Send a heartbeat whenever the link has been quiet for `threshold`,
/// checking every `interval`. Returns once the transport reports the link
/// down.
pub async fn run_heartbeat<T: Transport>(
    transport: &T,
    liveness: &Liveness,
    interval: Duration,
    threshold: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !transport.is_connected() {
            debug!("Heartbeat loop exiting: link down");
            break;
        }

        if liveness.is_stale(threshold) {
            match transport.send(&OutboundCommand::Heartbeat).await {
                Ok(()) => {
                    debug!("Heartbeat sent");
                    liveness.touch();
                }
                Err(e) => warn!("Heartbeat send failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::error::{BridgeError, Result};

    #[derive(Default)]
    struct MockTransport {
        sent: AtomicUsize,
        fail: AtomicBool,
        down: AtomicBool,
    }

    impl Transport for MockTransport {
        async fn send(&self, command: &OutboundCommand) -> Result<()> {
            assert_eq!(command, &OutboundCommand::Heartbeat);
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(BridgeError::NotConnected)
            } else {
                Ok(())
            }
        }

        fn is_connected(&self) -> bool {
            !self.down.load(Ordering::SeqCst)
        }
    }

    const INTERVAL: Duration = Duration::from_secs(5);
    const THRESHOLD: Duration = Duration::from_secs(15);

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sent_after_silence() {
        let transport = Arc::new(MockTransport::default());
        let liveness = Liveness::new();
        liveness.touch();

        let t = Arc::clone(&transport);
        let l = liveness.clone();
        let task = tokio::spawn(async move { run_heartbeat(&*t, &l, INTERVAL, THRESHOLD).await });

        // Ticks at 5, 10 and 15 s are within the threshold.
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);

        // Tick at 20 s sends and refreshes the clock.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
        assert!(!liveness.is_stale(THRESHOLD));

        transport.down.store(true, Ordering::SeqCst);
        tokio::time::sleep(INTERVAL).await;
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_heartbeat_retried_next_tick() {
        let transport = Arc::new(MockTransport::default());
        transport.fail.store(true, Ordering::SeqCst);
        let liveness = Liveness::new();

        let t = Arc::clone(&transport);
        let l = liveness.clone();
        let task = tokio::spawn(async move { run_heartbeat(&*t, &l, INTERVAL, THRESHOLD).await });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(transport.sent.load(Ordering::SeqCst), 2);
        assert!(liveness.last_seen().is_none());

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_heartbeat_suppresses_send() {
        let transport = Arc::new(MockTransport::default());
        let liveness = Liveness::new();
        liveness.touch();

        let t = Arc::clone(&transport);
        let l = liveness.clone();
        let task = tokio::spawn(async move { run_heartbeat(&*t, &l, INTERVAL, THRESHOLD).await });

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            liveness.touch();
        }
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);

        task.abort();
    }

    #[test]
    fn test_liveness_starts_stale() {
        let liveness = Liveness::new();
        assert!(liveness.is_stale(THRESHOLD));
        assert!(liveness.last_seen().is_none());
    }
}
