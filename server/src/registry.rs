//! Player registry for the game server
//!
//! This module tracks everyone connected to the server, from the moment a
//! socket is accepted until it goes away:
//! - Player id allocation (monotonic, never reused)
//! - Capacity enforcement
//! - Promotion from "connected" to "joined" on a valid join
//! - Movement targets and the per-tick pursuit step
//! - Protocol-ready snapshots in ascending id order
//!
//! The registry is generic over the connection handle it stores, so the
//! bookkeeping can be exercised without any sockets.

use crate::ordered_map::OrderedMap;
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use shared::{
    PlayerInfo, PlayerPosition, RejoinToken, Vector2, DEFAULT_PLAYER_NAME, FIELD_HEIGHT,
    FIELD_WIDTH, MAX_PLAYER_NAME_LEN,
};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("server is at capacity ({capacity} connections)")]
    CapacityExceeded { capacity: usize },
    #[error("player {0} has already joined")]
    AlreadyJoined(u32),
    #[error("no player with id {0}")]
    UnknownPlayer(u32),
    #[error("player ids exhausted")]
    IdsExhausted,
}

/// A connected peer and, once joined, its in-game entity
///
/// Everything but `id`, `handle` and `connected_at` is assigned when the
/// player joins. Before that the entity is invisible to other players.
#[derive(Debug)]
pub struct Player<H> {
    /// Unique id, assigned when the connection is accepted
    pub id: u32,
    /// The owning connection
    pub handle: H,
    /// When the connection was accepted
    pub connected_at: Instant,
    /// Display name, `None` while the join handshake is pending
    pub name: Option<String>,
    /// Capability handed out in JOIN_ACK
    pub token: RejoinToken,
    pub position: Vector2,
    pub target: Vector2,
    pub mass: u32,
}

impl<H> Player<H> {
    fn new(id: u32, handle: H) -> Self {
        Self {
            id,
            handle,
            connected_at: Instant::now(),
            name: None,
            token: RejoinToken::default(),
            position: Vector2::default(),
            target: Vector2::default(),
            mass: 0,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.name.is_some()
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_PLAYER_NAME)
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.id,
            name: self.name().to_string(),
        }
    }

    pub fn position_record(&self) -> PlayerPosition {
        PlayerPosition {
            player_id: self.id,
            x: self.position.x,
            y: self.position.y,
            mass: self.mass,
        }
    }

    /// Moves one `step` toward the target unless already within
    /// `snap_distance` of it
    ///
    /// Returns whether the player moved. The pursuit never teleports, so the
    /// distance covered per tick is bounded by `step`.
    pub fn advance(&mut self, step: f32, snap_distance: f32) -> bool {
        let offset = self.target.sub(&self.position);
        if offset.magnitude() <= snap_distance {
            return false;
        }

        self.position = self
            .position
            .add(&offset.normalize().scale(step))
            .clamp_to(FIELD_WIDTH, FIELD_HEIGHT);
        true
    }

    /// Checks whether the join handshake has been pending for `timeout`
    pub fn is_handshake_expired(&self, now: Instant, timeout: Duration) -> bool {
        !self.is_joined() && now.saturating_duration_since(self.connected_at) >= timeout
    }
}

/// Tracks every connected player, keyed by id in an [`OrderedMap`]
///
/// Iteration, snapshots and broadcasts always run in ascending id order,
/// which is also join order.
pub struct Registry<H> {
    players: OrderedMap<Player<H>>,
    /// Next id to hand out
    next_id: u32,
    /// Maximum number of concurrent connections, joined or not
    capacity: usize,
    joined: usize,
    start_mass: u32,
    rng: StdRng,
}

impl<H> Registry<H> {
    /// Creates an empty registry that admits up to `capacity` connections
    ///
    /// `rng` drives tokens and spawn positions; seed it for reproducible runs.
    pub fn new(capacity: usize, start_mass: u32, rng: StdRng) -> Self {
        Self {
            players: OrderedMap::new(),
            next_id: 1,
            capacity,
            joined: 0,
            start_mass,
            rng,
        }
    }

    /// Registers a new, not yet joined connection
    pub fn connect(&mut self, handle: H) -> Result<u32, RegistryError> {
        self.connect_with(|_| handle)
    }

    /// Registers a new connection whose handle is built from its id
    ///
    /// `make_handle` only runs once the id has been allocated, so nothing is
    /// built for a connection that gets refused.
    pub fn connect_with<F>(&mut self, make_handle: F) -> Result<u32, RegistryError>
    where
        F: FnOnce(u32) -> H,
    {
        if self.is_full() {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        // Keys are i32, so ids stop at i32::MAX.
        if self.next_id > i32::MAX as u32 {
            return Err(RegistryError::IdsExhausted);
        }

        let id = self.next_id;
        self.next_id += 1;

        self.players.insert(key(id), Player::new(id, make_handle(id)));
        debug!("Registered connection {} ({} connected)", id, self.len());
        Ok(id)
    }

    /// Promotes a connection to a joined player
    ///
    /// Assigns the start mass, a fresh rejoin token and a random spawn point,
    /// and points the movement target at the spawn point. An empty name is
    /// replaced by the default name; an overlong one is cut at the length cap.
    pub fn join(&mut self, id: u32, name: &str) -> Result<&Player<H>, RegistryError> {
        let player = self
            .players
            .get_mut(key(id))
            .ok_or(RegistryError::UnknownPlayer(id))?;
        if player.is_joined() {
            return Err(RegistryError::AlreadyJoined(id));
        }

        let spawn = Vector2::new(
            self.rng.gen_range(0.0..=FIELD_WIDTH),
            self.rng.gen_range(0.0..=FIELD_HEIGHT),
        );

        player.name = Some(display_name(name));
        player.token = self.rng.gen();
        player.mass = self.start_mass;
        player.position = spawn;
        player.target = spawn;
        self.joined += 1;

        Ok(player)
    }

    /// Sets the movement target of a joined player, clamped to the field
    ///
    /// Returns false if the id is unknown or has not joined yet.
    pub fn set_target(&mut self, id: u32, x: f32, y: f32) -> bool {
        match self.players.get_mut(key(id)) {
            Some(player) if player.is_joined() => {
                player.target = Vector2::new(x, y).clamp_to(FIELD_WIDTH, FIELD_HEIGHT);
                true
            }
            _ => false,
        }
    }

    /// Removes a connection and hands back its entry
    ///
    /// A PLAYER_LEAVE broadcast is owed exactly when the returned player
    /// `is_joined()`. Calling this again for the same id returns `None`.
    pub fn disconnect(&mut self, id: u32) -> Option<Player<H>> {
        let player = self.players.remove(key(id))?;
        if player.is_joined() {
            self.joined -= 1;
        }
        debug!("Removed connection {} ({} connected)", id, self.len());
        Some(player)
    }

    /// Lists joined players for the CURRENT_PLAYERS handshake reply
    pub fn snapshot(&self) -> Vec<PlayerInfo> {
        let mut players = Vec::with_capacity(self.joined);
        self.for_each_joined(|player| players.push(player.info()));
        players
    }

    /// Lists joined players for the per-tick position broadcast
    pub fn positions(&self) -> Vec<PlayerPosition> {
        let mut positions = Vec::with_capacity(self.joined);
        self.for_each_joined(|player| positions.push(player.position_record()));
        positions
    }

    /// Runs one pursuit step for every joined player
    pub fn advance(&mut self, step: f32, snap_distance: f32) {
        self.players.for_each_mut(|_, player| {
            if player.is_joined() {
                player.advance(step, snap_distance);
            }
        });
    }

    /// Lists connections whose join handshake has been pending for at least
    /// `timeout`
    ///
    /// The connections are not removed; the caller disconnects them.
    pub fn expired_handshakes(&self, now: Instant, timeout: Duration) -> Vec<u32> {
        self.players
            .values()
            .filter(|player| player.is_handshake_expired(now, timeout))
            .map(|player| player.id)
            .collect()
    }

    pub fn for_each_joined<F: FnMut(&Player<H>)>(&self, mut f: F) {
        for player in self.players.values() {
            if player.is_joined() {
                f(player);
            }
        }
    }

    /// Ids of every connection, joined or not, in ascending order
    pub fn ids(&self) -> Vec<u32> {
        self.players.values().map(|player| player.id).collect()
    }

    pub fn get(&self, id: u32) -> Option<&Player<H>> {
        self.players.get(key(id))
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Player<H>> {
        self.players.get_mut(key(id))
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn joined_count(&self) -> usize {
        self.joined
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity
    }
}

/// Map key for a player id. Ids never exceed `i32::MAX`.
fn key(id: u32) -> i32 {
    id as i32
}

fn display_name(name: &str) -> String {
    if name.is_empty() {
        return DEFAULT_PLAYER_NAME.to_string();
    }
    let mut end = name.len().min(MAX_PLAYER_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
