// MIT License - Copyright (c) 2026 Peter Wright
// Socket lifecycle: connect, read loop, reconnection, serialised writes

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeConfig, backoff_delay};
use crate::constants::READ_BUFFER_SIZE;
use crate::dispatcher::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::event::{BridgeEvent, EventBus};
use crate::heartbeat::{Liveness, run_heartbeat};
use crate::protocol::{FrameBuffer, OutboundCommand};
use crate::transport::Transport;

/// Lifecycle of the link to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Entered only through `stop()`; nothing reconnects from here.
    Stopped,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Tasks {
    supervisor: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    announce: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for handle in [
            self.supervisor.take(),
            self.heartbeat.take(),
            self.announce.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Shared {
    config: BridgeConfig,
    state_tx: watch::Sender<ConnectionState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    tasks: Mutex<Tasks>,
    dispatcher: Dispatcher,
    liveness: Liveness,
    events: EventBus,
}

/// Owns the single socket of a bridge and everything that runs on it.
///
/// One supervisor task drives the read loop and, after a disconnect, the
/// reconnection cycle. One heartbeat task runs per live connection.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        config: BridgeConfig,
        dispatcher: Dispatcher,
        liveness: Liveness,
        events: EventBus,
    ) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                state_tx,
                writer: tokio::sync::Mutex::new(None),
                tasks: Mutex::new(Tasks::default()),
                dispatcher,
                liveness,
                events,
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Connect, start the background tasks and send the initial state
    /// queries.
    ///
    /// Returns true once connected. A no-op while already connected,
    /// connecting, or recovering from a disconnect.
    pub async fn start(&self) -> bool {
        let shared = &self.shared;

        {
            let tasks = shared.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if tasks.supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
                debug!("{}: supervisor already running", shared.config.name);
                return shared.is_connected();
            }
        }

        shared.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Stopped {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });

        if !shared.begin_connecting() {
            debug!("{}: start ignored, link is {}", shared.config.name, self.state());
            return shared.is_connected();
        }

        let Some(stream) = shared.connect_with_retry(shared.config.connect_attempts).await else {
            return false;
        };
        let Some(reader) = shared.attach(stream).await else {
            return false;
        };

        let supervisor = tokio::spawn(supervise(Arc::clone(shared), reader));
        shared.tasks.lock().unwrap_or_else(PoisonError::into_inner).supervisor = Some(supervisor);

        shared.announce().await;
        shared.is_connected()
    }

    /// Stop for good: cancel every task and close the socket.
    ///
    /// Idempotent. `start()` may be called again afterwards.
    pub async fn stop(&self) {
        let previous = self.shared.state_tx.send_replace(ConnectionState::Stopped);
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();

        match tokio::time::timeout(Duration::from_secs(1), self.shared.writer.lock()).await {
            Ok(mut writer) => {
                if let Some(mut writer) = writer.take() {
                    let _ = writer.shutdown().await;
                }
            }
            Err(_) => warn!("{}: writer busy, socket will close when released", self.shared.config.name),
        }

        if previous != ConnectionState::Stopped {
            info!("{}: stopped", self.shared.config.name);
        }
    }

    /// Write one command. Concurrent callers are serialised.
    pub async fn send(&self, command: &OutboundCommand) -> Result<()> {
        self.shared.send(command).await
    }

    /// One-shot reachability probe, independent of any persistent
    /// connection.
    pub async fn test_connection(host: &str, port: u16, timeout: Duration) -> bool {
        let address = format!("{}:{}", host, port);
        match open(&address, timeout).await {
            Ok(_) => {
                debug!("Connection test to {} succeeded", address);
                true
            }
            Err(e) => {
                warn!("Connection test to {} failed: {}", address, e);
                false
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.state_tx.send_replace(ConnectionState::Stopped);
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.shared.config.address())
            .field("state", &self.state())
            .finish()
    }
}

impl Transport for Shared {
    async fn send(&self, command: &OutboundCommand) -> Result<()> {
        let state = *self.state_tx.borrow();
        match state {
            ConnectionState::Connected => {}
            ConnectionState::Stopped => return Err(BridgeError::Stopped),
            _ => return Err(BridgeError::NotConnected),
        }
        let bytes = command.encode()?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(BridgeError::NotConnected)?;
        let written = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        // stop() may have given up waiting for the lock while we wrote.
        if self.is_stopped() {
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        }

        match written {
            Ok(()) => {
                debug!("Sent: {}", command);
                Ok(())
            }
            Err(e) => {
                error!("{}: failed to send {}: {}", self.config.name, command.message_type(), e);
                guard.take();
                drop(guard);
                self.mark_disconnected();
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }
}

impl Shared {
    fn is_stopped(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Stopped
    }

    /// Disconnected -> Connecting. Fails from any other state.
    fn begin_connecting(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Connected -> Disconnected. Wakes the read loop.
    fn mark_disconnected(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        })
    }

    /// Connecting -> Disconnected, after a failed cycle.
    fn abandon_connecting(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    /// Sleep for `duration`; false if `stop()` was called meanwhile.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => !self.is_stopped(),
            _ = wait_stopped(self.state_tx.subscribe()) => false,
        }
    }

    /// Try up to `attempts` connects, backing off exponentially between
    /// them.
    async fn connect_with_retry(&self, attempts: u32) -> Option<TcpStream> {
        let address = self.config.address();

        for attempt in 1..=attempts {
            if self.is_stopped() {
                return None;
            }
            info!(
                "{}: connecting to {} (attempt {}/{})",
                self.config.name, address, attempt, attempts
            );

            match open(&address, self.config.connect_timeout).await {
                Ok(stream) => return Some(stream),
                Err(e) if !e.is_retryable() => {
                    error!("{}: cannot connect to {}: {}", self.config.name, address, e);
                    self.abandon_connecting();
                    return None;
                }
                Err(e) => {
                    warn!("{}: connection attempt {} failed: {}", self.config.name, attempt, e);
                    if attempt < attempts {
                        let delay = backoff_delay(self.config.backoff_base, attempt);
                        info!("{}: retrying in {:.1}s", self.config.name, delay.as_secs_f64());
                        if !self.pause(delay).await {
                            return None;
                        }
                    }
                }
            }
        }

        error!(
            "{}: failed to connect to {} after {} attempts",
            self.config.name, address, attempts
        );
        self.abandon_connecting();
        None
    }

    /// Install a fresh socket: store the write half, go Connected and start
    /// the heartbeat. Returns the read half for the supervisor.
    async fn attach(self: &Arc<Self>, stream: TcpStream) -> Option<OwnedReadHalf> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }
        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);

        let attached = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !attached {
            // Stopped while connecting.
            self.writer.lock().await.take();
            return None;
        }

        self.liveness.touch();
        info!("{}: connected to {}", self.config.name, self.config.address());

        let shared = Arc::clone(self);
        let heartbeat = tokio::spawn(async move {
            run_heartbeat(
                &*shared,
                &shared.liveness,
                shared.config.heartbeat_interval,
                shared.config.heartbeat_threshold,
            )
            .await;
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = tasks.heartbeat.replace(heartbeat) {
            old.abort();
        }

        Some(reader)
    }

    /// Ask for the current relay and backlight states, then announce the
    /// connection.
    async fn announce(&self) {
        if !self.pause(self.config.initial_query_delay).await {
            return;
        }
        if let Err(e) = self.send(&OutboundCommand::RelayQuery).await {
            warn!("{}: relay query failed: {}", self.config.name, e);
        }
        if !self.pause(self.config.query_spacing).await {
            return;
        }
        if let Err(e) = self.send(&OutboundCommand::BacklightQuery).await {
            warn!("{}: backlight query failed: {}", self.config.name, e);
        }

        if self.is_connected() {
            self.events.publish(BridgeEvent::Connected { timestamp: Utc::now() });
        }
    }

    /// Read and dispatch frames until the socket closes or the link leaves
    /// Connected.
    async fn read_loop(&self, reader: &mut OwnedReadHalf) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut frames = FrameBuffer::new();
        let mut state_rx = self.state_tx.subscribe();

        loop {
            if *state_rx.borrow_and_update() != ConnectionState::Connected {
                break;
            }

            let read = tokio::select! {
                read = tokio::time::timeout(self.config.read_timeout, reader.read(&mut buf)) => read,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match read {
                Err(_) => debug!("{}: read timeout, continue listening", self.config.name),
                Ok(Ok(0)) => {
                    warn!("{}: connection closed by panel", self.config.name);
                    break;
                }
                Ok(Ok(n)) => {
                    for line in frames.feed(&buf[..n]) {
                        self.dispatcher.process_line(&line).await;
                    }
                }
                Ok(Err(e)) => {
                    warn!("{}: read error: {}", self.config.name, e);
                    break;
                }
            }
        }
    }

    /// Tear down a lost connection and run one reconnection cycle.
    ///
    /// Returns the new read half, or `None` when the bridge was stopped or
    /// the retry budget ran out.
    async fn recover(self: &Arc<Self>) -> Option<OwnedReadHalf> {
        self.mark_disconnected();
        if self.is_stopped() {
            return None;
        }
        warn!("{}: disconnected, scheduling reconnect", self.config.name);

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            for handle in [tasks.heartbeat.take(), tasks.announce.take()].into_iter().flatten() {
                handle.abort();
            }
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.events.publish(BridgeEvent::Disconnected { timestamp: Utc::now() });

        if !self.pause(self.config.reconnect_cooldown).await {
            return None;
        }
        if !self.begin_connecting() {
            return None;
        }
        info!("{}: attempting to reconnect", self.config.name);

        let stream = self.connect_with_retry(self.config.reconnect_attempts).await?;
        let reader = self.attach(stream).await?;

        let shared = Arc::clone(self);
        let announce = tokio::spawn(async move { shared.announce().await });
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).announce = Some(announce);

        Some(reader)
    }
}

/// Supervisor task: read until the link drops, then reconnect and repeat.
async fn supervise(shared: Arc<Shared>, mut reader: OwnedReadHalf) {
    loop {
        shared.read_loop(&mut reader).await;
        match shared.recover().await {
            Some(next) => reader = next,
            None => break,
        }
    }
    debug!("{}: supervisor finished", shared.config.name);
}

/// Resolves once the state becomes Stopped.
async fn wait_stopped(mut state_rx: watch::Receiver<ConnectionState>) {
    while *state_rx.borrow_and_update() != ConnectionState::Stopped {
        if state_rx.changed().await.is_err() {
            return;
        }
    }
}

/// One TCP connect bounded by `timeout`.
async fn open(address: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(BridgeError::Io(e)),
        Err(_) => Err(BridgeError::ConnectTimeout {
            seconds: timeout.as_secs_f64(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::RwLock;

    use crate::devices::DeviceState;

    fn manager(config: BridgeConfig) -> ConnectionManager {
        let events = EventBus::new(16);
        let liveness = Liveness::new();
        let dispatcher = Dispatcher::new(
            Arc::new(RwLock::new(DeviceState::new())),
            events.clone(),
            liveness.clone(),
        );
        ConnectionManager::new(config, dispatcher, liveness, events)
    }

    /// An address nothing listens on.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_send_when_disconnected() {
        let conn = manager(BridgeConfig::default());
        assert!(matches!(
            conn.send(&OutboundCommand::ScreenWake).await,
            Err(BridgeError::NotConnected)
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_exhausts_attempts() {
        let port = closed_port().await;
        let conn = manager(
            BridgeConfig::builder()
                .host("127.0.0.1")
                .port(port)
                .connect_attempts(3)
                .backoff_base(Duration::from_millis(10))
                .build(),
        );

        let begun = std::time::Instant::now();
        assert!(!conn.start().await);
        // 10 ms + 20 ms of backoff between the three attempts.
        assert!(begun.elapsed() >= Duration::from_millis(30));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    /// Manager attached to a loopback socket, plus the peer end.
    async fn attached(config: BridgeConfig) -> (Arc<ConnectionManager>, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (stream, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
        let conn = Arc::new(manager(config));
        assert!(conn.shared.begin_connecting());
        assert!(conn.shared.attach(stream.unwrap()).await.is_some());
        (conn, accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_send_after_stop() {
        let (conn, _peer) = attached(BridgeConfig::default()).await;
        conn.stop().await;
        assert!(matches!(
            conn.send(&OutboundCommand::ScreenWake).await,
            Err(BridgeError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_stop_during_slow_write_closes_socket() {
        let (conn, mut peer) = attached(BridgeConfig::default()).await;

        // Hold the writer so the send queues behind it and stop() times out.
        let held = conn.shared.writer.lock().await;
        let sender = Arc::clone(&conn);
        let send = tokio::spawn(async move { sender.send(&OutboundCommand::ScreenWake).await });
        sleep(Duration::from_millis(50)).await;
        let stopping = Arc::clone(&conn);
        let stop = tokio::spawn(async move { stopping.stop().await });
        sleep(Duration::from_millis(1100)).await;
        assert!(stop.is_finished());
        drop(held);

        send.await.unwrap().unwrap();
        assert!(conn.shared.writer.lock().await.is_none());

        // The queued frame arrives, then EOF.
        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), peer.read_to_end(&mut received))
            .await
            .expect("socket closed")
            .unwrap();
        assert_eq!(received, b"{\"type\":20}\n");
    }

    #[tokio::test]
    async fn test_peer_close_cancels_heartbeat_until_cooldown() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = manager(
            BridgeConfig::builder()
                .host("127.0.0.1")
                .port(port)
                .reconnect_cooldown(Duration::from_millis(300))
                .initial_query_delay(Duration::from_millis(1))
                .query_spacing(Duration::from_millis(1))
                .build(),
        );
        let (started, accepted) = tokio::join!(conn.start(), listener.accept());
        assert!(started);
        assert!(conn.shared.tasks.lock().unwrap().heartbeat.is_some());

        let mut state = conn.watch_state();
        drop(accepted.unwrap());
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        sleep(Duration::from_millis(50)).await;

        // Inside the cooldown: no heartbeat task and no new connection.
        assert!(conn.shared.tasks.lock().unwrap().heartbeat.is_none());
        assert!(conn.shared.writer.lock().await.is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let (_stream, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(conn.shared.tasks.lock().unwrap().heartbeat.is_some());
        conn.stop().await;
    }

    #[tokio::test]
    async fn test_unusable_address_is_not_retried() {
        let conn = manager(
            BridgeConfig::builder()
                .host("bad\0host")
                .connect_attempts(5)
                .backoff_base(Duration::from_secs(10))
                .build(),
        );
        let started = tokio::time::timeout(Duration::from_secs(5), conn.start())
            .await
            .expect("gives up without backing off");
        assert!(!started);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let conn = manager(BridgeConfig::default());
        conn.stop().await;
        conn.stop().await;
        assert_eq!(conn.state(), ConnectionState::Stopped);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let port = closed_port().await;
        let conn = Arc::new(manager(
            BridgeConfig::builder()
                .host("127.0.0.1")
                .port(port)
                .connect_attempts(5)
                .backoff_base(Duration::from_secs(60))
                .build(),
        ));

        let c = Arc::clone(&conn);
        let start = tokio::spawn(async move { c.start().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        conn.stop().await;

        let started = tokio::time::timeout(Duration::from_secs(2), start)
            .await
            .expect("start returns promptly after stop")
            .unwrap();
        assert!(!started);
        assert_eq!(conn.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(ConnectionManager::test_connection("127.0.0.1", port, Duration::from_secs(1)).await);

        let port = closed_port().await;
        assert!(!ConnectionManager::test_connection("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            serde_json::to_value(ConnectionState::Stopped).unwrap(),
            serde_json::json!("stopped")
        );
    }
}
