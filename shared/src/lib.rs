//! # Shared Protocol Library
//!
//! Everything a server and a client must agree on to talk to each other:
//! the binary message codec, frame reassembly for stream transports, the
//! playfield constants and the small amount of vector math used to move
//! players across the field.
//!
//! ## Wire Format
//!
//! Messages travel as length-prefixed frames. All integers are big-endian,
//! coordinates use unsigned fixed point with 6 fractional bits and strings
//! are UTF-8 with a one byte length prefix. See [`protocol`] for the frame
//! layout and the per-message payloads.
//!
//! ## Modules
//!
//! - [`protocol`]: message types, encoding and validating decoder
//! - [`framing`]: turns a byte stream into a sequence of messages
//! - [`wire`]: big-endian reader and writer primitives
//! - [`geometry`]: 2D vectors

pub mod framing;
pub mod geometry;
pub mod protocol;
pub mod wire;

pub use framing::{FrameBuffer, FramingError};
pub use geometry::Vector2;
pub use protocol::{
    decode, DecodeError, EncodeError, FoodPosition, JoinErrorCode, Message, PlayerInfo,
    PlayerPosition, RejoinToken,
};

pub const FIELD_WIDTH: f32 = 1000.0;
pub const FIELD_HEIGHT: f32 = 1000.0;

pub const MAX_PLAYER_NAME_LEN: usize = 20;
pub const DEFAULT_PLAYER_NAME: &str = "Unnamed Player";
pub const REJOIN_TOKEN_LEN: usize = 16;
pub const START_MASS: u32 = 10;

/// Largest frame the length prefix can describe, header included.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;
/// Cap on the JOIN_ERROR message and the KICK reason.
pub const MAX_REASON_LEN: usize = u8::MAX as usize;

/// Most players a single CURRENT_PLAYERS frame can list when every name is
/// at the length cap.
pub const MAX_PLAYERS_PER_FRAME: usize =
    (MAX_FRAME_LEN - protocol::HEADER_LEN - 2) / (4 + 1 + MAX_PLAYER_NAME_LEN);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_list_limit() {
        assert_eq!(MAX_PLAYERS_PER_FRAME, 2621);

        let players: Vec<PlayerInfo> = (0..MAX_PLAYERS_PER_FRAME as u32)
            .map(|player_id| PlayerInfo {
                player_id,
                name: "n".repeat(MAX_PLAYER_NAME_LEN),
            })
            .collect();
        let msg = Message::CurrentPlayers { players };
        assert!(msg.encode().is_ok());
    }

    #[test]
    fn test_field_fits_fixed_point() {
        assert!(wire::to_fixed(FIELD_WIDTH) < u32::MAX);
        assert_eq!(wire::from_fixed(wire::to_fixed(FIELD_HEIGHT)), FIELD_HEIGHT);
    }
}
