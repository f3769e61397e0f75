//! Action and control records

use crate::types::{PeerAddr, PeerId};
use crate::WireError;
use serde::{Deserialize, Serialize};

/// Record kind, the second field of every tuple
///
/// Values 0..=4 are drawing actions, 5..=10 are control records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Kind {
    Draw = 0,
    Clear = 1,
    Text = 2,
    Circle = 3,
    Image = 4,
    PeerQuery = 5,
    PeerAnswer = 6,
    Leave = 7,
    HistoryRequest = 8,
    ClearRequest = 9,
    ObjectRequest = 10,
}

impl Kind {
    /// Number of kind-specific fields following `(origin, kind)`
    pub fn field_count(self) -> usize {
        match self {
            Kind::Draw => 6,
            Kind::Clear => 0,
            Kind::Text => 5,
            Kind::Circle => 5,
            Kind::Image => 8,
            Kind::PeerQuery | Kind::PeerAnswer => 6,
            Kind::Leave => 5,
            Kind::HistoryRequest => 6,
            Kind::ClearRequest => 0,
            Kind::ObjectRequest => 7,
        }
    }

    pub fn is_action(self) -> bool {
        (self as u8) <= Kind::Image as u8
    }
}

impl TryFrom<u8> for Kind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Kind::Draw,
            1 => Kind::Clear,
            2 => Kind::Text,
            3 => Kind::Circle,
            4 => Kind::Image,
            5 => Kind::PeerQuery,
            6 => Kind::PeerAnswer,
            7 => Kind::Leave,
            8 => Kind::HistoryRequest,
            9 => Kind::ClearRequest,
            10 => Kind::ObjectRequest,
            other => return Err(WireError::UnknownKind(other)),
        })
    }
}

/// A drawing instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Line segment
    Draw {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        color: i32,
        thickness: i32,
    },

    /// Wipe the surface
    Clear,

    /// Single character at a position
    Text {
        x: i32,
        y: i32,
        ch: u32,
        color: i32,
        size: i32,
    },

    Circle {
        cx: i32,
        cy: i32,
        radius: i32,
        color: i32,
        thickness: i32,
    },

    /// Image placement. The blob itself travels out of band; `key` is scoped
    /// to the record's origin and `holder` is where that origin serves it.
    Image {
        x: i32,
        y: i32,
        key: u32,
        holder: PeerAddr,
    },
}

impl Action {
    pub fn kind(&self) -> Kind {
        match self {
            Action::Draw { .. } => Kind::Draw,
            Action::Clear => Kind::Clear,
            Action::Text { .. } => Kind::Text,
            Action::Circle { .. } => Kind::Circle,
            Action::Image { .. } => Kind::Image,
        }
    }
}

/// A committed drawing action together with the peer that produced it
///
/// Records are immutable once built and keep their original `origin` when
/// forwarded through history replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub origin: PeerId,
    pub action: Action,
}

impl ActionRecord {
    pub fn new(origin: PeerId, action: Action) -> Self {
        Self { origin, action }
    }

    pub fn kind(&self) -> Kind {
        self.action.kind()
    }
}

/// Session management messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    /// Discovery query, carrying the sender's own history length
    PeerQuery { addr: PeerAddr, history_len: u64 },

    /// Reply to a discovery query
    PeerAnswer { addr: PeerAddr, history_len: u64 },

    /// Sender is leaving the network
    Leave { addr: PeerAddr },

    /// Ask `target` to stream its log to `reply_to`
    HistoryRequest { target: PeerId, reply_to: PeerAddr },

    /// Ask every peer to clear its surface
    ClearRequest,

    /// Ask `target` to push object `key` to `reply_to`
    ObjectRequest {
        target: PeerId,
        key: u32,
        reply_to: PeerAddr,
    },
}

impl Control {
    pub fn kind(&self) -> Kind {
        match self {
            Control::PeerQuery { .. } => Kind::PeerQuery,
            Control::PeerAnswer { .. } => Kind::PeerAnswer,
            Control::Leave { .. } => Kind::Leave,
            Control::HistoryRequest { .. } => Kind::HistoryRequest,
            Control::ClearRequest => Kind::ClearRequest,
            Control::ObjectRequest { .. } => Kind::ObjectRequest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub origin: PeerId,
    pub control: Control,
}

impl ControlRecord {
    pub fn new(origin: PeerId, control: Control) -> Self {
        Self { origin, control }
    }

    pub fn kind(&self) -> Kind {
        self.control.kind()
    }
}

/// One datagram's worth of data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Action(ActionRecord),
    Control(ControlRecord),
}

impl Envelope {
    pub fn origin(&self) -> PeerId {
        match self {
            Envelope::Action(record) => record.origin,
            Envelope::Control(record) => record.origin,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Envelope::Action(record) => record.kind(),
            Envelope::Control(record) => record.kind(),
        }
    }

    /// Whether this envelope claims to come from `local`
    pub fn is_from(&self, local: PeerId) -> bool {
        self.origin() == local
    }
}

impl From<ActionRecord> for Envelope {
    fn from(record: ActionRecord) -> Self {
        Envelope::Action(record)
    }
}

impl From<ControlRecord> for Envelope {
    fn from(record: ControlRecord) -> Self {
        Envelope::Control(record)
    }
}
