use crate::config::ServerConfig;
use crate::connection::{Connection, Frame, SendError};
use crate::registry::{Registry, RegistryError};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use shared::Message;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Counters reported in the periodic stats line and at shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub ticks: u64,
    pub missed_ticks: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub frames_rejected: u64,
    pub slow_consumers_dropped: u64,
}

/// Authoritative game state and the protocol logic driving it
///
/// Holds no sockets of its own: outbound traffic goes through each player's
/// [`Connection`] queue, and inbound bytes are handed in by the event loop.
pub struct GameState {
    registry: Registry<Connection>,
    move_step: f32,
    snap_distance: f32,
    join_timeout: Duration,
    stats: ServerStats,
    /// Peers whose queue refused a frame, disconnected once the current
    /// fan-out is over
    doomed: Vec<(u32, SendError)>,
}

impl GameState {
    pub fn new(config: &ServerConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            registry: Registry::new(config.max_players, config.start_mass, rng),
            move_step: config.move_step,
            snap_distance: config.snap_distance,
            join_timeout: config.join_timeout(),
            stats: ServerStats::default(),
            doomed: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Registry<Connection> {
        &self.registry
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn is_full(&self) -> bool {
        self.registry.is_full()
    }

    /// Registers a new connection built by `make_connection` from its id
    pub fn accept<F>(&mut self, make_connection: F) -> Result<u32, RegistryError>
    where
        F: FnOnce(u32) -> Connection,
    {
        let id = self.registry.connect_with(make_connection)?;
        self.stats.connections_accepted += 1;
        Ok(id)
    }

    /// Records a peer that was turned away before getting a connection
    pub fn note_rejected(&mut self) {
        self.stats.connections_rejected += 1;
    }

    pub fn note_missed_ticks(&mut self, missed: u64) {
        self.stats.missed_ticks += missed;
    }

    /// Processes bytes read from connection `id`
    ///
    /// Every complete message is handled in arrival order. A stream that can
    /// no longer be framed is disconnected after the messages before the bad
    /// header have been handled.
    pub fn handle_bytes(&mut self, id: u32, data: &[u8]) {
        let mut messages = Vec::new();
        let result = match self.registry.get_mut(id) {
            Some(player) => player.handle.receive(data, &mut messages),
            None => return,
        };

        for message in messages {
            // An earlier message may have ended the connection.
            if self.registry.get(id).is_none() {
                return;
            }
            self.handle_message(id, message);
        }

        match result {
            Ok(0) => {}
            Ok(skipped) => {
                warn!("Skipped {} malformed frame(s) from player {}", skipped, id);
                self.stats.frames_rejected += skipped as u64;
            }
            Err(e) => {
                warn!("Player {}: {}", id, e);
                self.disconnect(id, "protocol error");
            }
        }
    }

    pub fn handle_message(&mut self, id: u32, message: Message) {
        match message {
            Message::Join { name } => self.handle_join(id, &name),
            Message::SetTarget { x, y } => {
                if !self.registry.set_target(id, x, y) {
                    debug!("Ignoring SET_TARGET from connection {} before JOIN", id);
                }
            }
            Message::Leave => {
                if self.registry.get(id).is_some_and(|player| player.is_joined()) {
                    self.disconnect(id, "left the game");
                } else {
                    debug!("Ignoring LEAVE from connection {} before JOIN", id);
                }
            }
            // Rejoin sessions are not kept, so there is nothing to resume.
            other => debug!("Ignoring {} from player {}", other.kind(), id),
        }
    }

    /// Runs the join handshake for `id`: JOIN_ACK to the joiner, PLAYER_JOIN
    /// to everyone joined (joiner included), then CURRENT_PLAYERS to the
    /// joiner
    fn handle_join(&mut self, id: u32, name: &str) {
        let (ack, announcement) = match self.registry.join(id, name) {
            Ok(player) => (
                Message::JoinAck {
                    player_id: id,
                    token: player.token,
                },
                Message::PlayerJoin(player.info()),
            ),
            Err(e) => {
                warn!("Rejected JOIN: {}", e);
                return;
            }
        };

        if let Message::PlayerJoin(info) = &announcement {
            info!("Player {} joined as {:?}", id, info.name);
        }

        self.send_to(id, &ack);
        self.broadcast(&announcement);
        let current = Message::CurrentPlayers {
            players: self.registry.snapshot(),
        };
        self.send_to(id, &current);

        self.reap();
    }

    /// Removes a connection, announcing the departure if it had joined
    ///
    /// Unknown ids are ignored, so a connection may be disconnected from
    /// several places without harm.
    pub fn disconnect(&mut self, id: u32, reason: &str) {
        self.drop_player(id, reason);
        self.reap();
    }

    /// Advances the simulation by one tick
    pub fn tick(&mut self, now: Instant) {
        self.registry.advance(self.move_step, self.snap_distance);

        for id in self.registry.expired_handshakes(now, self.join_timeout) {
            self.send_to(
                id,
                &Message::Kick {
                    reason: "Join timed out".to_string(),
                },
            );
            self.drop_player(id, "join timed out");
        }

        let positions = self.registry.positions();
        if !positions.is_empty() {
            self.broadcast(&Message::PlayerPositions { positions });
        }

        self.reap();
        self.stats.ticks += 1;
    }

    /// Kicks every connection with `reason` and empties the registry
    ///
    /// Returns the writer tasks of the dropped connections; they finish once
    /// the KICK (and anything queued before it) has been flushed.
    pub fn shutdown(&mut self, reason: &str) -> Vec<JoinHandle<()>> {
        let kick = encode(&Message::Kick {
            reason: reason.to_string(),
        });
        let mut writers = Vec::new();

        for id in self.registry.ids() {
            let Some(mut player) = self.registry.disconnect(id) else {
                continue;
            };
            if let Some(frame) = &kick {
                if let Err(e) = player.handle.send(frame) {
                    debug!("Could not queue KICK for player {}: {}", id, e);
                }
            }
            writers.extend(player.handle.take_writer());
        }

        self.doomed.clear();
        info!("Disconnected all players: {}", reason);
        writers
    }

    fn drop_player(&mut self, id: u32, reason: &str) {
        let Some(player) = self.registry.disconnect(id) else {
            return;
        };

        if player.is_joined() {
            info!("Player {} ({}) left: {}", id, player.name(), reason);
            self.broadcast(&Message::PlayerLeave { player_id: id });
        } else {
            info!("Connection {} from {} closed: {}", id, player.handle.peer(), reason);
        }
    }

    /// Disconnects every peer that failed a send, including peers that fail
    /// while the earlier ones are being announced
    fn reap(&mut self) {
        while let Some((id, err)) = self.doomed.pop() {
            if self.registry.get(id).is_none() {
                continue;
            }
            if err == SendError::Backpressure {
                warn!("Player {} is not draining its queue, dropping it", id);
                self.stats.slow_consumers_dropped += 1;
            }
            self.drop_player(id, &err.to_string());
        }
    }

    fn send_to(&mut self, id: u32, message: &Message) {
        let Some(frame) = encode(message) else {
            return;
        };
        if let Some(player) = self.registry.get(id) {
            if let Err(e) = player.handle.send(&frame) {
                self.doomed.push((id, e));
            }
        }
    }

    /// Queues `message` for every joined player
    fn broadcast(&mut self, message: &Message) {
        let Some(frame) = encode(message) else {
            return;
        };
        let doomed = &mut self.doomed;
        self.registry.for_each_joined(|player| {
            if let Err(e) = player.handle.send(&frame) {
                doomed.push((player.id, e));
            }
        });
    }
}

fn encode(message: &Message) -> Option<Frame> {
    match message.encode() {
        Ok(bytes) => Some(bytes.into()),
        Err(e) => {
            error!("Failed to encode {}: {}", message.kind(), e);
            None
        }
    }
}
