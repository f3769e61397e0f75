//! Shared wire model for whiteboard peers
//!
//! Every datagram exchanged between peers, on the multicast group or on the
//! history-replication port, is one [`Envelope`]: a tagged integer tuple whose
//! leading fields are always `(origin, kind)`. The kind space is split between
//! drawing actions (replicated into every peer's log) and control records
//! (discovery, leave notices, replication requests).

pub mod codec;
pub mod error;
pub mod record;
pub mod types;

pub use codec::{MAX_DATAGRAM_BYTES, MIN_RECV_BUFFER};
pub use error::WireError;
pub use record::{Action, ActionRecord, Control, ControlRecord, Envelope, Kind};
pub use types::{PeerAddr, PeerId};
