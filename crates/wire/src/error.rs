//! Wire decoding errors

use crate::record::Kind;
use thiserror::Error;

/// Reasons an inbound datagram is rejected
///
/// None of these are fatal: the receiver logs and drops the offending
/// datagram and keeps going.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("malformed tuple: {0}")]
    Decode(#[from] std::io::Error),

    #[error("unknown record kind {0}")]
    UnknownKind(u8),

    #[error("{kind:?} expects {expected} fields, got {got}")]
    FieldCount {
        kind: Kind,
        expected: usize,
        got: usize,
    },

    #[error("{kind:?} field `{field}` out of range")]
    FieldRange { kind: Kind, field: &'static str },
}
