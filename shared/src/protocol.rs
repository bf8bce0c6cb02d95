//! Length-prefixed binary wire protocol.
//!
//! Every frame starts with a big-endian `u16` holding the total frame length
//! (header included), followed by a one byte message tag and a tag specific
//! payload:
//!
//! ```text
//! +--------+-----+-------------------+
//! | len:u16| tag | payload (len - 3) |
//! +--------+-----+-------------------+
//! ```
//!
//! Decoding runs in two passes. The first pass walks the whole payload and
//! checks every length, count and cap without allocating; only a frame that
//! passes is parsed into an owned [`Message`]. A truncated frame therefore
//! reports [`DecodeError::Incomplete`] and can simply be retried once more
//! bytes have arrived.

use crate::wire::{WireReader, WireWriter};
use crate::{MAX_FRAME_LEN, MAX_PLAYER_NAME_LEN, MAX_REASON_LEN, REJOIN_TOKEN_LEN};
use thiserror::Error;

/// Length prefix plus message tag.
pub const HEADER_LEN: usize = 3;

// Messages from client
pub const MSG_JOIN: u8 = 1;
pub const MSG_REJOIN: u8 = 2;
pub const MSG_LEAVE: u8 = 3;
pub const MSG_SET_TARGET: u8 = 4;

// Messages from server
pub const MSG_JOIN_ACK: u8 = 33;
pub const MSG_CURRENT_PLAYERS: u8 = 34;
pub const MSG_PLAYER_JOIN: u8 = 35;
pub const MSG_PLAYER_LEAVE: u8 = 36;
pub const MSG_PLAYER_POSITIONS: u8 = 37;
pub const MSG_SPAWNED_FOOD: u8 = 38;
pub const MSG_EATEN_FOOD: u8 = 39;
pub const MSG_JOIN_ERROR: u8 = 40;
pub const MSG_KICK: u8 = 41;

const PLAYER_POSITION_LEN: usize = 4 + 4 + 4 + 4;
const FOOD_POSITION_LEN: usize = 4 + 4 + 4;
const FOOD_ID_LEN: usize = 4;

/// Text sent along with [`JoinErrorCode::GameFull`].
pub const GAME_FULL_MESSAGE: &str = "The game is full";

pub type RejoinToken = [u8; REJOIN_TOKEN_LEN];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub player_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerPosition {
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub mass: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoodPosition {
    pub food_id: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinErrorCode {
    GameFull = 1,
}

impl JoinErrorCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(JoinErrorCode::GameFull),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One decoded frame. Each variant carries exactly the fields of its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Join { name: String },
    Rejoin { player_id: u32, token: RejoinToken },
    Leave,
    SetTarget { x: f32, y: f32 },

    JoinAck { player_id: u32, token: RejoinToken },
    CurrentPlayers { players: Vec<PlayerInfo> },
    PlayerJoin(PlayerInfo),
    PlayerLeave { player_id: u32 },
    PlayerPositions { positions: Vec<PlayerPosition> },
    SpawnedFood { food: Vec<FoodPosition> },
    EatenFood { food_ids: Vec<u32> },
    JoinError { code: JoinErrorCode, message: String },
    Kick { reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("message too large: {0} bytes exceeds the 65535 byte frame limit")]
    TooLarge(usize),
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("{field} is {len} bytes long, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{0} entries do not fit in a u16 count")]
    TooManyEntries(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("incomplete frame: have {available} of {needed} bytes")]
    Incomplete { needed: usize, available: usize },
    #[error("invalid frame length {0}")]
    InvalidLength(u16),
    #[error("unknown message type {tag}")]
    UnknownType { tag: u8, frame_len: usize },
    #[error("malformed message type {tag}: {reason}")]
    Malformed {
        tag: u8,
        reason: &'static str,
        frame_len: usize,
    },
}

impl DecodeError {
    /// Declared length of the offending frame, when the frame boundary can
    /// still be trusted and the frame may be skipped.
    pub fn frame_len(&self) -> Option<usize> {
        match self {
            DecodeError::UnknownType { frame_len, .. }
            | DecodeError::Malformed { frame_len, .. } => Some(*frame_len),
            DecodeError::Incomplete { .. } | DecodeError::InvalidLength(_) => None,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete { .. })
    }
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Join { .. } => MSG_JOIN,
            Message::Rejoin { .. } => MSG_REJOIN,
            Message::Leave => MSG_LEAVE,
            Message::SetTarget { .. } => MSG_SET_TARGET,
            Message::JoinAck { .. } => MSG_JOIN_ACK,
            Message::CurrentPlayers { .. } => MSG_CURRENT_PLAYERS,
            Message::PlayerJoin(_) => MSG_PLAYER_JOIN,
            Message::PlayerLeave { .. } => MSG_PLAYER_LEAVE,
            Message::PlayerPositions { .. } => MSG_PLAYER_POSITIONS,
            Message::SpawnedFood { .. } => MSG_SPAWNED_FOOD,
            Message::EatenFood { .. } => MSG_EATEN_FOOD,
            Message::JoinError { .. } => MSG_JOIN_ERROR,
            Message::Kick { .. } => MSG_KICK,
        }
    }

    /// Short human readable name, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join { .. } => "JOIN",
            Message::Rejoin { .. } => "REJOIN",
            Message::Leave => "LEAVE",
            Message::SetTarget { .. } => "SET_TARGET",
            Message::JoinAck { .. } => "JOIN_ACK",
            Message::CurrentPlayers { .. } => "CURRENT_PLAYERS",
            Message::PlayerJoin(_) => "PLAYER_JOIN",
            Message::PlayerLeave { .. } => "PLAYER_LEAVE",
            Message::PlayerPositions { .. } => "PLAYER_POSITIONS",
            Message::SpawnedFood { .. } => "SPAWNED_FOOD",
            Message::EatenFood { .. } => "EATEN_FOOD",
            Message::JoinError { .. } => "JOIN_ERROR",
            Message::Kick { .. } => "KICK",
        }
    }

    /// The rejection sent to a peer that connects while the game is full.
    pub fn game_full() -> Self {
        Message::JoinError {
            code: JoinErrorCode::GameFull,
            message: GAME_FULL_MESSAGE.to_string(),
        }
    }

    /// Total frame length this message encodes to.
    pub fn encoded_len(&self) -> Result<usize, EncodeError> {
        let payload = match self {
            Message::Join { name } => 1 + checked_len("name", name, MAX_PLAYER_NAME_LEN)?,
            Message::Rejoin { .. } | Message::JoinAck { .. } => 4 + REJOIN_TOKEN_LEN,
            Message::Leave => 0,
            Message::SetTarget { .. } => 4 + 4,
            Message::CurrentPlayers { players } => {
                checked_count(players.len())?;
                let mut len = 2;
                for info in players {
                    len += 4 + 1 + checked_len("name", &info.name, MAX_PLAYER_NAME_LEN)?;
                }
                len
            }
            Message::PlayerJoin(info) => {
                4 + 1 + checked_len("name", &info.name, MAX_PLAYER_NAME_LEN)?
            }
            Message::PlayerLeave { .. } => 4,
            Message::PlayerPositions { positions } => {
                2 + checked_count(positions.len())? * PLAYER_POSITION_LEN
            }
            Message::SpawnedFood { food } => 2 + checked_count(food.len())? * FOOD_POSITION_LEN,
            Message::EatenFood { food_ids } => 2 + checked_count(food_ids.len())? * FOOD_ID_LEN,
            Message::JoinError { message, .. } => {
                2 + checked_len("error message", message, MAX_REASON_LEN)?
            }
            Message::Kick { reason } => 1 + checked_len("kick reason", reason, MAX_REASON_LEN)?,
        };

        let total = HEADER_LEN + payload;
        if total > MAX_FRAME_LEN {
            return Err(EncodeError::TooLarge(total));
        }
        Ok(total)
    }

    /// Encodes the message into a freshly allocated frame of exact length.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = vec![0u8; self.encoded_len()?];
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encodes the message into the front of `buf` and returns the number of
    /// bytes written.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let len = self.encoded_len()?;
        if buf.len() < len {
            return Err(EncodeError::BufferTooSmall {
                needed: len,
                available: buf.len(),
            });
        }

        let mut w = WireWriter::new(&mut buf[..len]);
        // `encoded_len` caps the total at MAX_FRAME_LEN, which is u16::MAX.
        w.put_u16(len as u16)?;
        w.put_u8(self.tag())?;

        match self {
            Message::Join { name } => w.put_short_str(name)?,
            Message::Rejoin { player_id, token } | Message::JoinAck { player_id, token } => {
                w.put_u32(*player_id)?;
                w.put_bytes(token)?;
            }
            Message::Leave => {}
            Message::SetTarget { x, y } => {
                w.put_fixed(*x)?;
                w.put_fixed(*y)?;
            }
            Message::CurrentPlayers { players } => {
                w.put_u16(players.len() as u16)?;
                for info in players {
                    w.put_u32(info.player_id)?;
                    w.put_short_str(&info.name)?;
                }
            }
            Message::PlayerJoin(info) => {
                w.put_u32(info.player_id)?;
                w.put_short_str(&info.name)?;
            }
            Message::PlayerLeave { player_id } => w.put_u32(*player_id)?,
            Message::PlayerPositions { positions } => {
                w.put_u16(positions.len() as u16)?;
                for p in positions {
                    w.put_u32(p.player_id)?;
                    w.put_fixed(p.x)?;
                    w.put_fixed(p.y)?;
                    w.put_u32(p.mass)?;
                }
            }
            Message::SpawnedFood { food } => {
                w.put_u16(food.len() as u16)?;
                for f in food {
                    w.put_u32(f.food_id)?;
                    w.put_fixed(f.x)?;
                    w.put_fixed(f.y)?;
                }
            }
            Message::EatenFood { food_ids } => {
                w.put_u16(food_ids.len() as u16)?;
                for id in food_ids {
                    w.put_u32(*id)?;
                }
            }
            Message::JoinError { code, message } => {
                w.put_u8(code.as_u8())?;
                w.put_short_str(message)?;
            }
            Message::Kick { reason } => w.put_short_str(reason)?,
        }

        debug_assert_eq!(w.position(), len);
        Ok(len)
    }
}

fn checked_len(field: &'static str, value: &str, max: usize) -> Result<usize, EncodeError> {
    if value.len() > max {
        return Err(EncodeError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(value.len())
}

fn checked_count(count: usize) -> Result<usize, EncodeError> {
    if count > u16::MAX as usize {
        return Err(EncodeError::TooManyEntries(count));
    }
    Ok(count)
}

/// Decodes the first frame in `buf`.
///
/// Returns the message together with the number of bytes it occupied. Any
/// bytes after the frame are left alone, so a buffer may hold several frames
/// followed by a partial one.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), DecodeError> {
    if buf.len() >= 2 {
        let declared = u16::from_be_bytes([buf[0], buf[1]]);
        if (declared as usize) < HEADER_LEN {
            return Err(DecodeError::InvalidLength(declared));
        }
    }
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Incomplete {
            needed: HEADER_LEN,
            available: buf.len(),
        });
    }

    let frame_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < frame_len {
        return Err(DecodeError::Incomplete {
            needed: frame_len,
            available: buf.len(),
        });
    }

    let tag = buf[2];
    let payload = &buf[HEADER_LEN..frame_len];
    let malformed = |reason| DecodeError::Malformed {
        tag,
        reason,
        frame_len,
    };

    match validate(tag, payload) {
        Ok(true) => {}
        Ok(false) => return Err(DecodeError::UnknownType { tag, frame_len }),
        Err(reason) => return Err(malformed(reason)),
    }

    let message = parse(tag, payload).ok_or_else(|| malformed("inconsistent payload"))?;
    Ok((message, frame_len))
}

/// First pass: checks the payload shape without allocating.
///
/// `Ok(false)` means the tag is unknown.
fn validate(tag: u8, payload: &[u8]) -> Result<bool, &'static str> {
    let mut r = WireReader::new(payload);

    match tag {
        MSG_JOIN => {
            check_name(&mut r)?;
        }
        MSG_REJOIN | MSG_JOIN_ACK => expect_len(payload, 4 + REJOIN_TOKEN_LEN)?,
        MSG_LEAVE => expect_len(payload, 0)?,
        MSG_SET_TARGET => expect_len(payload, 4 + 4)?,
        MSG_CURRENT_PLAYERS => {
            let count = r.read_u16().ok_or("missing player count")?;
            for _ in 0..count {
                r.read_u32().ok_or("truncated player info")?;
                check_name(&mut r)?;
            }
        }
        MSG_PLAYER_JOIN => {
            r.read_u32().ok_or("truncated player info")?;
            check_name(&mut r)?;
        }
        MSG_PLAYER_LEAVE => expect_len(payload, 4)?,
        MSG_PLAYER_POSITIONS => check_records(payload, PLAYER_POSITION_LEN)?,
        MSG_SPAWNED_FOOD => check_records(payload, FOOD_POSITION_LEN)?,
        MSG_EATEN_FOOD => check_records(payload, FOOD_ID_LEN)?,
        MSG_JOIN_ERROR => {
            let code = r.read_u8().ok_or("missing error code")?;
            JoinErrorCode::from_u8(code).ok_or("unknown error code")?;
            check_text(&mut r, "truncated error message")?;
        }
        MSG_KICK => {
            check_text(&mut r, "truncated kick reason")?;
        }
        _ => return Ok(false),
    }

    if matches!(
        tag,
        MSG_JOIN | MSG_CURRENT_PLAYERS | MSG_PLAYER_JOIN | MSG_JOIN_ERROR | MSG_KICK
    ) && !r.is_empty()
    {
        return Err("trailing bytes after payload");
    }
    Ok(true)
}

fn expect_len(payload: &[u8], len: usize) -> Result<(), &'static str> {
    if payload.len() != len {
        return Err("payload length does not match message type");
    }
    Ok(())
}

fn check_records(payload: &[u8], record_len: usize) -> Result<(), &'static str> {
    let mut r = WireReader::new(payload);
    let count = r.read_u16().ok_or("missing entry count")? as usize;
    if r.remaining() != count * record_len {
        return Err("entry count does not match payload length");
    }
    Ok(())
}

fn check_name(r: &mut WireReader<'_>) -> Result<(), &'static str> {
    let len = r.read_u8().ok_or("missing name length")? as usize;
    if len > MAX_PLAYER_NAME_LEN {
        return Err("player name too long");
    }
    let bytes = r.read_bytes(len).ok_or("truncated player name")?;
    std::str::from_utf8(bytes).map_err(|_| "player name is not UTF-8")?;
    Ok(())
}

fn check_text(r: &mut WireReader<'_>, truncated: &'static str) -> Result<(), &'static str> {
    let bytes = r.read_short_str().ok_or(truncated)?;
    std::str::from_utf8(bytes).map_err(|_| "text is not UTF-8")?;
    Ok(())
}

/// Second pass: builds the owned message from an already validated payload.
fn parse(tag: u8, payload: &[u8]) -> Option<Message> {
    let mut r = WireReader::new(payload);

    let message = match tag {
        MSG_JOIN => Message::Join {
            name: read_string(&mut r)?,
        },
        MSG_REJOIN => Message::Rejoin {
            player_id: r.read_u32()?,
            token: r.read_array()?,
        },
        MSG_LEAVE => Message::Leave,
        MSG_SET_TARGET => Message::SetTarget {
            x: r.read_fixed()?,
            y: r.read_fixed()?,
        },
        MSG_JOIN_ACK => Message::JoinAck {
            player_id: r.read_u32()?,
            token: r.read_array()?,
        },
        MSG_CURRENT_PLAYERS => {
            let count = r.read_u16()? as usize;
            let mut players = Vec::with_capacity(count);
            for _ in 0..count {
                players.push(PlayerInfo {
                    player_id: r.read_u32()?,
                    name: read_string(&mut r)?,
                });
            }
            Message::CurrentPlayers { players }
        }
        MSG_PLAYER_JOIN => Message::PlayerJoin(PlayerInfo {
            player_id: r.read_u32()?,
            name: read_string(&mut r)?,
        }),
        MSG_PLAYER_LEAVE => Message::PlayerLeave {
            player_id: r.read_u32()?,
        },
        MSG_PLAYER_POSITIONS => {
            let count = r.read_u16()? as usize;
            let mut positions = Vec::with_capacity(count);
            for _ in 0..count {
                positions.push(PlayerPosition {
                    player_id: r.read_u32()?,
                    x: r.read_fixed()?,
                    y: r.read_fixed()?,
                    mass: r.read_u32()?,
                });
            }
            Message::PlayerPositions { positions }
        }
        MSG_SPAWNED_FOOD => {
            let count = r.read_u16()? as usize;
            let mut food = Vec::with_capacity(count);
            for _ in 0..count {
                food.push(FoodPosition {
                    food_id: r.read_u32()?,
                    x: r.read_fixed()?,
                    y: r.read_fixed()?,
                });
            }
            Message::SpawnedFood { food }
        }
        MSG_EATEN_FOOD => {
            let count = r.read_u16()? as usize;
            let mut food_ids = Vec::with_capacity(count);
            for _ in 0..count {
                food_ids.push(r.read_u32()?);
            }
            Message::EatenFood { food_ids }
        }
        MSG_JOIN_ERROR => Message::JoinError {
            code: JoinErrorCode::from_u8(r.read_u8()?)?,
            message: read_string(&mut r)?,
        },
        MSG_KICK => Message::Kick {
            reason: read_string(&mut r)?,
        },
        _ => return None,
    };
    Some(message)
}

fn read_string(r: &mut WireReader<'_>) -> Option<String> {
    let bytes = r.read_short_str()?;
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}
