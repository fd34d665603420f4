// MIT License - Copyright (c) 2026 telenot-bridge authors
// Connection lifecycle and the public bridge handle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ArmMode, BridgeConfig};
use crate::engine::{spawn_reader_task, CommandEngine, ProtocolState};
use crate::error::{Result, TelenotError};
use crate::event::{event_channel, BridgeEvent, DiscoveredAddresses, EventReceiver, EventSender};
use crate::protocol::Command;
use crate::transport::{self, BoxedReader, BoxedWriter};

/// Where the bridge's connection to the panel stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting to reconnect until the given instant
    RetryScheduled { at: Instant },
}

/// The main public API for a Telenot panel on its GMS interface.
///
/// The bridge owns a supervisor task that connects, runs the reader and the
/// periodic jobs, and reconnects after transport failures. Commands wait for
/// the panel's readiness handshake and fail with
/// [`TelenotError::CommandTimeout`] if it never comes.
///
/// # Example
///
/// ```no_run
/// use telenot_bridge::{ArmMode, BridgeConfig, BridgeEvent, TelenotBridge};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = BridgeConfig::builder()
///         .host("192.168.0.100")
///         .port(4116)
///         .discovery(true)
///         .build();
///
///     let mut bridge = TelenotBridge::start(config);
///     let mut events = bridge.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             if let BridgeEvent::SecurityArea(area) = event {
///                 println!("Area {}: {:?}", area.area, area.status().names());
///             }
///         }
///     });
///
///     bridge.wait_connected(std::time::Duration::from_secs(30)).await?;
///     bridge.arm_area(1, ArmMode::External).await?;
///
///     tokio::signal::ctrl_c().await?;
///     bridge.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct TelenotBridge {
    config: BridgeConfig,
    event_tx: EventSender,
    state_rx: watch::Receiver<ConnectionState>,
    protocol: Arc<Mutex<ProtocolState>>,
    engine: Arc<RwLock<Option<Arc<CommandEngine>>>>,
    supervisor_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TelenotBridge {
    /// Start the bridge. Connecting happens in the background; watch
    /// [`state`](Self::state) or the event channel to follow it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: BridgeConfig) -> Self {
        let (event_tx, _) = event_channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let protocol = Arc::new(Mutex::new(ProtocolState::new()));
        let engine = Arc::new(RwLock::new(None));

        let supervisor = Supervisor {
            discovery_pending: Arc::new(AtomicBool::new(config.discovery)),
            config: config.clone(),
            event_tx: event_tx.clone(),
            state_tx,
            protocol: protocol.clone(),
            engine: engine.clone(),
            shutdown_rx,
        };
        let supervisor_handle = tokio::spawn(supervisor.run());

        Self {
            config,
            event_tx,
            state_rx,
            protocol,
            engine,
            supervisor_handle: Some(supervisor_handle),
            shutdown_tx,
        }
    }

    /// Subscribe to bridge events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Wait until the bridge is connected.
    ///
    /// Fails with [`TelenotError::ChannelClosed`] if the supervisor gave up
    /// (for example a serial port that does not exist).
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        let result = match tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Connected)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TelenotError::ChannelClosed),
            Err(_) => Err(TelenotError::ConnectionTimeout),
        };
        result
    }

    async fn engine(&self) -> Result<Arc<CommandEngine>> {
        self.engine
            .read()
            .await
            .clone()
            .ok_or(TelenotError::Disconnected)
    }

    /// Send one command through the readiness gate.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.engine().await?.send_command(&command).await
    }

    // --- Commands ---

    /// Arm a security area (1-8).
    pub async fn arm_area(&self, area: u8, mode: ArmMode) -> Result<()> {
        debug!("Arming area {} ({:?})", area, mode);
        self.send(Command::arm(area, mode)).await
    }

    /// Disarm a security area (1-8).
    pub async fn disarm_area(&self, area: u8) -> Result<()> {
        debug!("Disarming area {}", area);
        self.send(Command::DisarmArea { area }).await
    }

    /// Reset the alarm of a security area (1-8).
    pub async fn reset_alarm(&self, area: u8) -> Result<()> {
        debug!("Resetting alarm of area {}", area);
        self.send(Command::ResetAlarm { area }).await
    }

    /// Enable a reporting point (1-128).
    pub async fn enable_reporting_point(&self, point: u16) -> Result<()> {
        self.send(Command::EnableReportingPoint { point }).await
    }

    /// Disable a reporting point (1-128).
    pub async fn disable_reporting_point(&self, point: u16) -> Result<()> {
        self.send(Command::DisableReportingPoint { point }).await
    }

    /// Set the panel clock.
    pub async fn set_date_time(&self, at: NaiveDateTime) -> Result<()> {
        self.send(Command::SetDateTime(at)).await
    }

    /// Set the panel clock to the local time of this host.
    pub async fn sync_clock(&self) -> Result<()> {
        self.set_date_time(Local::now().naive_local()).await
    }

    /// Enumerate used addresses and their names again.
    pub async fn request_used_state(&self) -> Result<()> {
        self.engine().await?.request_used_state().await
    }

    /// Re-announce every address with the next `MP` and `SB` telegrams.
    pub async fn refresh(&self) {
        self.protocol.lock().await.request_refresh();
    }

    /// Addresses and names found by the last discovery so far.
    pub async fn discovered(&self) -> DiscoveredAddresses {
        self.protocol.lock().await.discovered()
    }

    /// Ask the supervisor to tear the connection down without waiting for it.
    ///
    /// Commands already waiting for the panel fail once the connection is gone.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Disconnect from the panel and stop reconnecting.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from panel");
        let _ = self.shutdown_tx.send(true);
        if let Some(h) = self.supervisor_handle.take() {
            if let Err(e) = h.await {
                warn!("Supervisor task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for TelenotBridge {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(h) = self.supervisor_handle.take() {
            h.abort();
        }
    }
}

/// Resolves once shutdown is signalled or the bridge handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Tasks tied to one connection. Dropping the guard aborts all of them, so
/// none outlives the connection even when the supervisor itself is aborted.
struct ConnectionTasks {
    reader: JoinHandle<TelenotError>,
    jobs: Vec<JoinHandle<()>>,
}

impl Drop for ConnectionTasks {
    fn drop(&mut self) {
        self.reader.abort();
        for job in &self.jobs {
            job.abort();
        }
    }
}

/// Why a connection ended.
enum Teardown {
    Shutdown,
    Stale,
    Lost(TelenotError),
}

/// Background owner of the transport and every job tied to it.
struct Supervisor {
    config: BridgeConfig,
    discovery_pending: Arc<AtomicBool>,
    event_tx: EventSender,
    state_tx: watch::Sender<ConnectionState>,
    protocol: Arc<Mutex<ProtocolState>>,
    engine: Arc<RwLock<Option<Arc<CommandEngine>>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let endpoint = self.config.transport.describe();

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.state_tx.send_replace(ConnectionState::Connecting);
            info!("Connecting to panel at {}", endpoint);

            let err = match transport::connect(&self.config.transport, connect_timeout).await {
                Ok((reader, writer)) => match self.run_connection(reader, writer).await {
                    Teardown::Shutdown => break,
                    Teardown::Stale => {
                        // reconnect right away
                        continue;
                    }
                    Teardown::Lost(e) => {
                        if self.config.transport.is_serial() {
                            error!("Serial connection to {} lost: {}", endpoint, e);
                            self.give_up(&e);
                            break;
                        }
                        e
                    }
                },
                Err(e) => {
                    warn!("Connecting to {} failed: {}", endpoint, e);
                    e
                }
            };

            if !err.is_retryable() {
                error!("Not retrying connection to {}: {}", endpoint, err);
                self.give_up(&err);
                break;
            }
            let _ = self.event_tx.send(BridgeEvent::ConnectionFailed {
                reason: err.to_string(),
                retrying: true,
            });
            if !self.wait_retry().await {
                break;
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        debug!("Supervisor stopped");
    }

    fn give_up(&self, err: &TelenotError) {
        let _ = self.event_tx.send(BridgeEvent::ConnectionFailed {
            reason: err.to_string(),
            retrying: false,
        });
    }

    /// Sleep until the next connection attempt. Returns `false` on shutdown.
    async fn wait_retry(&mut self) -> bool {
        let delay = Duration::from_millis(self.config.reconnect_interval_ms);
        let at = Instant::now() + delay;
        self.state_tx.send_replace(ConnectionState::RetryScheduled { at });
        info!("Reconnecting in {:.1}s", delay.as_secs_f64());

        tokio::select! {
            _ = tokio::time::sleep_until(at) => true,
            _ = shutdown_requested(&mut self.shutdown_rx) => false,
        }
    }

    async fn run_connection(&mut self, reader: BoxedReader, writer: BoxedWriter) -> Teardown {
        self.protocol.lock().await.reset_snapshots();
        let engine = Arc::new(CommandEngine::new(
            writer,
            self.protocol.clone(),
            Duration::from_millis(self.config.send_timeout_ms),
        ));
        *self.engine.write().await = Some(engine.clone());
        let mut tasks = ConnectionTasks {
            reader: spawn_reader_task(reader, engine.clone(), self.event_tx.clone()),
            jobs: Vec::new(),
        };

        self.state_tx.send_replace(ConnectionState::Connected);
        let _ = self.event_tx.send(BridgeEvent::Connected);
        info!("Connected to panel at {}", self.config.transport.describe());

        tasks.jobs = self.spawn_jobs(&engine);
        let teardown = self.watch_connection(&engine, &mut tasks.reader).await;

        drop(tasks);
        *self.engine.write().await = None;
        engine.close().await;
        let _ = self.event_tx.send(BridgeEvent::Disconnected);
        info!("Disconnected from panel");
        teardown
    }

    fn spawn_jobs(&self, engine: &Arc<CommandEngine>) -> Vec<JoinHandle<()>> {
        let mut jobs = Vec::new();

        if self.discovery_pending.load(Ordering::SeqCst) {
            let engine = engine.clone();
            let pending = self.discovery_pending.clone();
            jobs.push(tokio::spawn(async move {
                match engine.request_used_state().await {
                    Ok(()) => pending.store(false, Ordering::SeqCst),
                    Err(e) => warn!("Discovery request failed: {}", e),
                }
            }));
        }

        if self.config.refresh_interval_ms > 0 {
            let protocol = self.protocol.clone();
            let period = Duration::from_millis(self.config.refresh_interval_ms);
            jobs.push(tokio::spawn(async move {
                loop {
                    sleep(period).await;
                    debug!("Requesting full state refresh");
                    protocol.lock().await.request_refresh();
                }
            }));
        }

        if self.config.clock_sync_interval_ms > 0 {
            let engine = engine.clone();
            let period = Duration::from_millis(self.config.clock_sync_interval_ms);
            jobs.push(tokio::spawn(async move {
                // once right after connecting, then on the period
                loop {
                    let now = Local::now().naive_local();
                    match engine.send_command(&Command::SetDateTime(now)).await {
                        Ok(()) => info!("Panel clock set to {}", now.format("%Y-%m-%d %H:%M:%S")),
                        Err(e) => warn!("Clock sync failed: {}", e),
                    }
                    sleep(period).await;
                }
            }));
        }

        jobs
    }

    /// Run until the connection has to go: reader ended, a write failed,
    /// the panel went silent or shutdown was requested.
    async fn watch_connection(
        &mut self,
        engine: &Arc<CommandEngine>,
        reader_handle: &mut JoinHandle<TelenotError>,
    ) -> Teardown {
        let period = Duration::from_millis(self.config.reconnect_interval_ms.max(1));
        let stale_after = Duration::from_millis(self.config.stale_timeout_ms);
        let mut check = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                result = &mut *reader_handle => {
                    return match result {
                        Ok(e) => Teardown::Lost(e),
                        Err(e) => {
                            error!("Reader task failed: {}", e);
                            Teardown::Lost(TelenotError::Disconnected)
                        }
                    };
                }
                _ = engine.failed() => {
                    return Teardown::Lost(TelenotError::Disconnected);
                }
                _ = check.tick() => {
                    if stale_after.is_zero() {
                        continue;
                    }
                    let silent = engine.last_received().await.elapsed();
                    if silent > stale_after {
                        warn!(
                            "No telegram for {:.0}s, reconnecting",
                            silent.as_secs_f64()
                        );
                        return Teardown::Stale;
                    }
                }
                _ = shutdown_requested(&mut self.shutdown_rx) => {
                    return Teardown::Shutdown;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_commands_fail_while_disconnected() {
        let port = unused_port().await;
        let config = BridgeConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .reconnect_interval_ms(60_000)
            .build();
        let mut bridge = TelenotBridge::start(config);

        assert!(matches!(
            bridge.disarm_area(1).await,
            Err(TelenotError::Disconnected)
        ));
        assert!(matches!(
            bridge.request_used_state().await,
            Err(TelenotError::Disconnected)
        ));
        bridge.disconnect().await.unwrap();
        assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_refused_connection_schedules_retry() {
        let port = unused_port().await;
        let config = BridgeConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .reconnect_interval_ms(60_000)
            .build();
        let bridge = TelenotBridge::start(config);
        let mut events = bridge.subscribe();

        let mut state = bridge.state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| matches!(s, ConnectionState::RetryScheduled { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        match events.recv().await.unwrap() {
            BridgeEvent::ConnectionFailed { retrying, .. } => assert!(retrying),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_panel_is_reconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = BridgeConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .reconnect_interval_ms(50)
            .stale_timeout_ms(200)
            .build();
        let bridge = TelenotBridge::start(config);
        let mut events = bridge.subscribe();

        let (_first, _) = listener.accept().await.unwrap();
        let (_second, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(events.recv().await.unwrap());
        }
        assert!(matches!(
            &seen[..],
            [
                BridgeEvent::Connected,
                BridgeEvent::Disconnected,
                BridgeEvent::Connected
            ]
        ));
    }

    #[tokio::test]
    async fn test_dropped_bridge_stops_connection_tasks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = BridgeConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .refresh_interval_ms(50)
            .clock_sync_interval_ms(3_600_000)
            .build();
        let bridge = TelenotBridge::start(config);
        let (mut panel, _) = listener.accept().await.unwrap();
        bridge.wait_connected(Duration::from_secs(5)).await.unwrap();
        let protocol = bridge.protocol.clone();

        drop(bridge);

        // the reader and the clock-sync job both hold the connection
        let mut buf = [0u8; 32];
        let read = tokio::time::timeout(Duration::from_secs(5), panel.read(&mut buf))
            .await
            .expect("connection still open after drop");
        assert!(matches!(read, Ok(0)), "unexpected read {read:?}");

        // the refresh job held the protocol state too
        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&protocol) > 1 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection tasks outlived the bridge");
    }

    #[tokio::test]
    async fn test_stop_closes_connection_while_command_waits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = BridgeConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .send_timeout_ms(2_000)
            .build();
        let bridge = Arc::new(TelenotBridge::start(config));
        let (mut panel, _) = listener.accept().await.unwrap();
        bridge.wait_connected(Duration::from_secs(5)).await.unwrap();

        let waiting = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.disarm_area(1).await })
        };
        sleep(Duration::from_millis(50)).await;
        bridge.stop();

        let mut buf = [0u8; 32];
        let read = tokio::time::timeout(Duration::from_secs(5), panel.read(&mut buf))
            .await
            .expect("connection still open after stop");
        assert!(matches!(read, Ok(0)), "unexpected read {read:?}");
        assert!(waiting.await.unwrap().is_err());
    }

    #[cfg(feature = "serial")]
    #[tokio::test]
    async fn test_missing_serial_port_is_not_retried() {
        let config = BridgeConfig::builder()
            .serial_port("/dev/telenot-does-not-exist")
            .build();
        let bridge = TelenotBridge::start(config);
        let mut events = bridge.subscribe();

        assert!(matches!(
            bridge.wait_connected(Duration::from_secs(5)).await,
            Err(TelenotError::ChannelClosed)
        ));
        match events.recv().await.unwrap() {
            BridgeEvent::ConnectionFailed { retrying, .. } => assert!(!retrying),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
