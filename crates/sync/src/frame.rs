//! Object stream framing (4-byte big-endian length + payload)
//!
//! One frame per connection. The decoder is an explicit state machine fed
//! with whatever chunks the socket returns, so short reads and timeouts are
//! handled by the caller rather than hidden in blocking exact-size reads.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

pub const LENGTH_PREFIX_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: max {max} got {got}")]
    TooLarge { max: usize, got: usize },

    #[error("frame truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("frame already complete")]
    AlreadyComplete,
}

/// Length header for a payload of `len` bytes
pub fn encode_header(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN], FrameError> {
    let len = u32::try_from(len).map_err(|_| FrameError::TooLarge {
        max: u32::MAX as usize,
        got: len,
    })?;
    Ok(len.to_be_bytes())
}

#[derive(Debug)]
enum State {
    AwaitLength {
        header: [u8; LENGTH_PREFIX_LEN],
        filled: usize,
    },
    AwaitPayload {
        payload: BytesMut,
        expected: usize,
    },
    Complete,
}

/// Result of feeding a chunk
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    NeedMore,
    Complete(Bytes),
}

#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            state: State::AwaitLength {
                header: [0u8; LENGTH_PREFIX_LEN],
                filled: 0,
            },
            max_len,
        }
    }

    /// Consume a chunk. Bytes past the end of the frame are ignored.
    pub fn feed(&mut self, mut input: &[u8]) -> Result<Progress, FrameError> {
        loop {
            match &mut self.state {
                State::AwaitLength { header, filled } => {
                    let take = (LENGTH_PREFIX_LEN - *filled).min(input.len());
                    header[*filled..*filled + take].copy_from_slice(&input[..take]);
                    *filled += take;
                    input = &input[take..];
                    if *filled < LENGTH_PREFIX_LEN {
                        return Ok(Progress::NeedMore);
                    }

                    let expected = u32::from_be_bytes(*header) as usize;
                    if expected > self.max_len {
                        return Err(FrameError::TooLarge {
                            max: self.max_len,
                            got: expected,
                        });
                    }
                    self.state = State::AwaitPayload {
                        payload: BytesMut::with_capacity(expected),
                        expected,
                    };
                }
                State::AwaitPayload { payload, expected } => {
                    let take = (*expected - payload.len()).min(input.len());
                    payload.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if payload.len() < *expected {
                        return Ok(Progress::NeedMore);
                    }

                    if !input.is_empty() {
                        tracing::debug!("Ignoring {} bytes after object frame", input.len());
                    }
                    let blob = std::mem::take(payload).freeze();
                    self.state = State::Complete;
                    return Ok(Progress::Complete(blob));
                }
                State::Complete => return Err(FrameError::AlreadyComplete),
            }
        }
    }

    /// Called at end of stream: a frame that has not completed is truncated
    pub fn finish(&self) -> Result<(), FrameError> {
        match &self.state {
            State::Complete => Ok(()),
            State::AwaitLength { filled, .. } => Err(FrameError::Truncated {
                expected: LENGTH_PREFIX_LEN,
                got: *filled,
            }),
            State::AwaitPayload { payload, expected } => Err(FrameError::Truncated {
                expected: *expected,
                got: payload.len(),
            }),
        }
    }
}
