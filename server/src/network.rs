//! Server network layer: accepting peers and driving the game loop

use crate::config::{ConfigError, ServerConfig};
use crate::connection::{send_and_close, Connection, ServerEvent};
use crate::game::{GameState, ServerStats};
use log::{debug, error, info, warn};
use shared::Message;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};

const LISTEN_BACKLOG: u32 = 1024;
/// Capacity of the channel connection tasks report into
const EVENT_QUEUE: usize = 1024;
/// How long shutdown waits for queued KICK frames to drain
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
pub const SHUTDOWN_REASON: &str = "Server shutting down";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Converts tick wakeups into the number of ticks that are due
///
/// The interval skips deadlines it could not meet and reports the stale one,
/// so the gap is measured between the actual wakeup times instead.
#[derive(Debug)]
pub struct TickSchedule {
    period: Duration,
    last: Option<Instant>,
}

impl TickSchedule {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Returns how many ticks are due on a wakeup at `now`. Always at least
    /// one.
    pub fn due(&mut self, now: Instant) -> u64 {
        let due = match self.last {
            Some(last) if !self.period.is_zero() => {
                let elapsed = now.saturating_duration_since(last).as_nanos();
                let period = self.period.as_nanos();
                // Round to the nearest whole period.
                ((elapsed + period / 2) / period).max(1) as u64
            }
            _ => 1,
        };
        self.last = Some(now);
        due
    }
}

/// Authoritative game server bound to a TCP listener
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    game: GameState,
    events_tx: mpsc::Sender<ServerEvent>,
    events_rx: mpsc::Receiver<ServerEvent>,
}

impl Server {
    /// Validates `config` and binds the listening socket
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_addr;
        let listener = listen(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        Ok(Server {
            listener,
            game: GameState::new(&config),
            config,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs until Ctrl-C
    pub async fn run(self) -> Result<ServerStats, ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Main server loop, runs until `shutdown` completes
    ///
    /// Every state change happens on this task. It only suspends in the
    /// `select!` below, so the handling of one event (a JOIN handshake, a
    /// tick) is never interleaved with another.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<ServerStats, ServerError>
    where
        F: Future<Output = ()>,
    {
        let period = self.config.tick_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut schedule = TickSchedule::new(period);
        tokio::pin!(shutdown);

        info!(
            "Server listening on {} ({} Hz, up to {} players)",
            self.local_addr()?,
            self.config.tick_rate,
            self.config.max_players
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.accept(stream, peer),
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }

                _ = ticker.tick() => {
                    // Anything already received is handled before the tick.
                    while let Ok(event) = self.events_rx.try_recv() {
                        self.handle_event(event);
                    }

                    let due = schedule.due(Instant::now());
                    if due > 1 {
                        warn!("Server fell behind, running {} missed tick(s)", due - 1);
                        self.game.note_missed_ticks(due - 1);
                    }
                    for _ in 0..due {
                        self.game.tick(std::time::Instant::now());
                    }

                    self.log_stats();
                }
            }
        }

        let writers = self.game.shutdown(SHUTDOWN_REASON);
        let grace = Instant::now() + SHUTDOWN_GRACE;
        for writer in writers {
            if timeout_at(grace, writer).await.is_err() {
                warn!("Gave up waiting for connections to flush");
                break;
            }
        }

        let stats = self.game.stats().clone();
        info!(
            "Server stopped after {} ticks ({} missed)",
            stats.ticks, stats.missed_ticks
        );
        Ok(stats)
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.game.is_full() {
            info!("Rejecting {}: game is full", peer);
            self.game.note_rejected();
            match Message::game_full().encode() {
                Ok(bytes) => {
                    tokio::spawn(async move {
                        if let Err(e) = send_and_close(stream, bytes.into()).await {
                            debug!("Failed to send rejection to {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("Failed to encode JOIN_ERROR: {}", e),
            }
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let queue_len = self.config.outbound_queue;
        let events = self.events_tx.clone();
        match self
            .game
            .accept(|id| Connection::spawn(id, stream, peer, queue_len, events))
        {
            Ok(id) => info!("Connection {} accepted from {}", id, peer),
            Err(e) => warn!("Refusing connection from {}: {}", peer, e),
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Received { id, data } => self.game.handle_bytes(id, &data),
            ServerEvent::PeerClosed { id } => self.game.disconnect(id, "connection closed"),
            ServerEvent::ReadFailed { id, error } => {
                warn!("Read from connection {} failed: {}", id, error);
                self.game.disconnect(id, "read error");
            }
            ServerEvent::WriteFailed { id, error } => {
                warn!("Write to connection {} failed: {}", id, error);
                self.game.disconnect(id, "write error");
            }
        }
    }

    /// Logs the counters about once a second
    fn log_stats(&self) {
        let stats = self.game.stats();
        if stats.ticks % self.config.tick_rate as u64 != 0 {
            return;
        }
        match serde_json::to_string(stats) {
            Ok(json) => debug!(
                "{} connected, {} joined: {}",
                self.game.registry().len(),
                self.game.registry().joined_count(),
                json
            ),
            Err(e) => debug!("Failed to serialize stats: {}", e),
        }
    }
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_schedule_counts_skipped_deadlines() {
        let period = Duration::from_millis(50);
        let mut schedule = TickSchedule::new(period);
        let start = Instant::now();

        assert_eq!(schedule.due(start), 1);
        assert_eq!(schedule.due(start + period), 1);
        assert_eq!(schedule.due(start + period * 4), 3);
        assert_eq!(schedule.due(start + period * 5), 1);
    }

    #[test]
    fn test_tick_schedule_tolerates_jitter() {
        let period = Duration::from_millis(50);
        let mut schedule = TickSchedule::new(period);
        let start = Instant::now();

        schedule.due(start);
        assert_eq!(schedule.due(start + Duration::from_millis(52)), 1);
        assert_eq!(schedule.due(start + Duration::from_millis(90)), 1);
    }

    #[test]
    fn test_tick_schedule_catches_up_on_late_wakeup() {
        let period = Duration::from_millis(50);
        let mut schedule = TickSchedule::new(period);
        let start = Instant::now();

        schedule.due(start);
        // Stalled past three deadlines; all of them run on this wakeup.
        assert_eq!(schedule.due(start + Duration::from_millis(165)), 3);
        // The next aligned deadline is only 35ms later.
        assert_eq!(schedule.due(start + Duration::from_millis(200)), 1);
        assert_eq!(schedule.due(start + Duration::from_millis(250)), 1);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            Server::bind(config),
            Err(ServerError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        };
        let server = Server::bind(first).unwrap();
        let taken = server.local_addr().unwrap();

        let second = ServerConfig {
            bind_addr: taken,
            ..ServerConfig::default()
        };
        match Server::bind(second) {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Second bind on {} succeeded", taken),
        }
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        };
        let server = Server::bind(config).unwrap();
        let stats = server
            .run_until(tokio::time::sleep(Duration::from_millis(120)))
            .await
            .unwrap();
        assert!(stats.ticks >= 1);
        assert_eq!(stats.connections_accepted, 0);
    }
}
