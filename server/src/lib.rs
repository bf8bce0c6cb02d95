//! # Game Server Library
//!
//! This library provides the authoritative server for a multiplayer blob game
//! played over TCP. It keeps the canonical list of players, moves them toward
//! the targets their clients pick and streams the resulting positions back to
//! every joined client at a fixed tick rate.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Clients only send intentions (join, leave, where to steer). Positions are
//! computed here, one bounded step per tick, and clients render whatever the
//! server broadcasts.
//!
//! ### Player Lifecycle
//! Handles every stage of a connection:
//! - Accepting the socket and assigning a player id
//! - The join handshake (JOIN_ACK, PLAYER_JOIN, CURRENT_PLAYERS)
//! - Leaving, disconnects and I/O failures, announced with PLAYER_LEAVE
//! - Turning peers away with JOIN_ERROR when the game is full
//!
//! ### State Broadcasting
//! Every tick the positions of all joined players are encoded once and the
//! same frame is queued for every joined connection.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! The server runs on a current-thread tokio runtime. One task owns all game
//! state and suspends only while waiting for the next accept, connection
//! event, tick or shutdown signal, so no locking is needed and a multi-step
//! operation like the join handshake is never interleaved with a tick.
//!
//! ### Per-Connection Tasks
//! Each socket gets a reader task, which forwards received bytes to the loop,
//! and a writer task, which drains a bounded queue of encoded frames. A peer
//! that lets its queue fill up is disconnected instead of stalling everyone
//! else.
//!
//! ## Module Organization
//!
//! ### Ordered Map (`ordered_map`)
//! AVL tree keyed by `i32` that stores players in id order.
//!
//! ### Registry (`registry`)
//! Player bookkeeping on top of the ordered map:
//! - Id allocation and capacity limits
//! - Join promotion with spawn point, mass and rejoin token
//! - Movement targets and the pursuit step
//! - Snapshots for handshakes and position broadcasts
//!
//! ### Connection (`connection`)
//! Reader and writer tasks and the non-blocking outbound queue.
//!
//! ### Game (`game`)
//! Protocol handling and the tick, independent of any socket.
//!
//! ### Network (`network`)
//! The listener and the event loop tying everything together.
//!
//! ### Config (`config`)
//! Defaults, JSON configuration files and validation.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:2000".parse()?,
//!         tick_rate: 20,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until Ctrl-C, then kicks every player and returns the counters.
//!     let stats = Server::bind(config)?.run().await?;
//!     println!("{} ticks", stats.ticks);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod game;
pub mod network;
pub mod ordered_map;
pub mod registry;
