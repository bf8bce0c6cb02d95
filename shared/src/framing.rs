//! Reassembly of frames from an unframed byte stream.

use crate::protocol::{decode, DecodeError, Message};
use crate::MAX_FRAME_LEN;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The stream carried a length prefix that cannot start a frame. Nothing
    /// after it can be trusted.
    #[error("stream desynchronised: {0}")]
    Desync(#[source] DecodeError),
}

/// Inbound byte accumulator for one connection.
///
/// Holds at most one maximum-size frame worth of bytes. Anything beyond a
/// complete frame is decoded before more input is accepted.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    /// Bytes of an incomplete frame waiting for the rest of it.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends `data` and pushes every frame it completes onto `out`, in
    /// arrival order.
    ///
    /// Complete frames that fail to decode are skipped; the return value is
    /// how many were skipped.
    pub fn push(&mut self, mut data: &[u8], out: &mut Vec<Message>) -> Result<usize, FramingError> {
        let mut rejected = 0;

        while !data.is_empty() {
            let room = MAX_FRAME_LEN - self.buf.len();
            let take = room.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];

            rejected += self.drain(out)?;
        }

        Ok(rejected)
    }

    fn drain(&mut self, out: &mut Vec<Message>) -> Result<usize, FramingError> {
        let mut offset = 0;
        let mut rejected = 0;

        loop {
            match decode(&self.buf[offset..]) {
                Ok((message, used)) => {
                    out.push(message);
                    offset += used;
                }
                Err(e) if e.is_incomplete() => break,
                Err(e) => match e.frame_len() {
                    Some(len) => {
                        rejected += 1;
                        offset += len;
                    }
                    None => {
                        self.buf.clear();
                        return Err(FramingError::Desync(e));
                    }
                },
            }
        }

        // Move the partial frame (if any) to the front.
        self.buf.drain(..offset);
        Ok(rejected)
    }
}
