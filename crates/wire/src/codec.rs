//! Tuple codec
//!
//! On the wire every envelope is a borsh-encoded `(origin, kind, fields)`
//! tuple. Decoding consumes one tuple from the front of the buffer and
//! ignores whatever follows, so receivers can hand over a whole receive
//! buffer without trimming it.

use crate::record::{Action, ActionRecord, Control, ControlRecord, Envelope, Kind};
use crate::types::{PeerAddr, PeerId};
use crate::WireError;
use borsh::{BorshDeserialize, BorshSerialize};
use std::net::Ipv4Addr;

/// Smallest receive buffer a peer may use
pub const MIN_RECV_BUFFER: usize = 1024;

/// Encoded size of the largest record (origin + kind + length prefix + 8 fields)
pub const MAX_DATAGRAM_BYTES: usize = 8 + 1 + 4 + 8 * 8;

#[derive(BorshSerialize, BorshDeserialize)]
struct WireTuple {
    origin: u64,
    kind: u8,
    fields: Vec<i64>,
}

impl Envelope {
    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let (kind, fields) = match self {
            Envelope::Action(record) => (record.kind(), action_fields(&record.action)),
            Envelope::Control(record) => (record.kind(), control_fields(&record.control)),
        };
        let tuple = WireTuple {
            origin: self.origin().as_u64(),
            kind: kind as u8,
            fields,
        };
        borsh::to_vec(&tuple).expect("WireTuple serialization should not fail")
    }

    /// Deserialize from network, tolerating trailing bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let mut cursor = data;
        let tuple = WireTuple::deserialize(&mut cursor)?;
        let kind = Kind::try_from(tuple.kind)?;

        if tuple.fields.len() != kind.field_count() {
            return Err(WireError::FieldCount {
                kind,
                expected: kind.field_count(),
                got: tuple.fields.len(),
            });
        }

        let origin = PeerId(tuple.origin);
        let mut reader = FieldReader {
            kind,
            fields: tuple.fields.iter(),
        };

        let envelope = match kind {
            Kind::Draw => Envelope::Action(ActionRecord::new(
                origin,
                Action::Draw {
                    x1: reader.i32("x1")?,
                    y1: reader.i32("y1")?,
                    x2: reader.i32("x2")?,
                    y2: reader.i32("y2")?,
                    color: reader.i32("color")?,
                    thickness: reader.i32("thickness")?,
                },
            )),
            Kind::Clear => Envelope::Action(ActionRecord::new(origin, Action::Clear)),
            Kind::Text => Envelope::Action(ActionRecord::new(
                origin,
                Action::Text {
                    x: reader.i32("x")?,
                    y: reader.i32("y")?,
                    ch: reader.u32("ch")?,
                    color: reader.i32("color")?,
                    size: reader.i32("size")?,
                },
            )),
            Kind::Circle => Envelope::Action(ActionRecord::new(
                origin,
                Action::Circle {
                    cx: reader.i32("cx")?,
                    cy: reader.i32("cy")?,
                    radius: reader.i32("radius")?,
                    color: reader.i32("color")?,
                    thickness: reader.i32("thickness")?,
                },
            )),
            Kind::Image => Envelope::Action(ActionRecord::new(
                origin,
                Action::Image {
                    x: reader.i32("x")?,
                    y: reader.i32("y")?,
                    key: reader.u32("key")?,
                    holder: reader.addr()?,
                },
            )),
            Kind::PeerQuery => Envelope::Control(ControlRecord::new(
                origin,
                Control::PeerQuery {
                    addr: reader.addr()?,
                    history_len: reader.len("history_len")?,
                },
            )),
            Kind::PeerAnswer => Envelope::Control(ControlRecord::new(
                origin,
                Control::PeerAnswer {
                    addr: reader.addr()?,
                    history_len: reader.len("history_len")?,
                },
            )),
            Kind::Leave => Envelope::Control(ControlRecord::new(
                origin,
                Control::Leave {
                    addr: reader.addr()?,
                },
            )),
            Kind::HistoryRequest => Envelope::Control(ControlRecord::new(
                origin,
                Control::HistoryRequest {
                    target: reader.id()?,
                    reply_to: reader.addr()?,
                },
            )),
            Kind::ClearRequest => {
                Envelope::Control(ControlRecord::new(origin, Control::ClearRequest))
            }
            Kind::ObjectRequest => Envelope::Control(ControlRecord::new(
                origin,
                Control::ObjectRequest {
                    target: reader.id()?,
                    key: reader.u32("key")?,
                    reply_to: reader.addr()?,
                },
            )),
        };

        Ok(envelope)
    }
}

fn action_fields(action: &Action) -> Vec<i64> {
    let mut out = Vec::with_capacity(action.kind().field_count());
    match *action {
        Action::Draw {
            x1,
            y1,
            x2,
            y2,
            color,
            thickness,
        } => out.extend([x1, y1, x2, y2, color, thickness].map(i64::from)),
        Action::Clear => {}
        Action::Text {
            x,
            y,
            ch,
            color,
            size,
        } => {
            out.extend([x, y].map(i64::from));
            out.push(i64::from(ch));
            out.extend([color, size].map(i64::from));
        }
        Action::Circle {
            cx,
            cy,
            radius,
            color,
            thickness,
        } => out.extend([cx, cy, radius, color, thickness].map(i64::from)),
        Action::Image { x, y, key, holder } => {
            out.extend([x, y].map(i64::from));
            out.push(i64::from(key));
            push_addr(&mut out, holder);
        }
    }
    out
}

fn control_fields(control: &Control) -> Vec<i64> {
    let mut out = Vec::with_capacity(control.kind().field_count());
    match *control {
        Control::PeerQuery { addr, history_len } | Control::PeerAnswer { addr, history_len } => {
            push_addr(&mut out, addr);
            out.push(history_len as i64);
        }
        Control::Leave { addr } => push_addr(&mut out, addr),
        Control::HistoryRequest { target, reply_to } => {
            out.push(target.as_u64() as i64);
            push_addr(&mut out, reply_to);
        }
        Control::ClearRequest => {}
        Control::ObjectRequest {
            target,
            key,
            reply_to,
        } => {
            out.push(target.as_u64() as i64);
            out.push(i64::from(key));
            push_addr(&mut out, reply_to);
        }
    }
    out
}

fn push_addr(out: &mut Vec<i64>, addr: PeerAddr) {
    out.extend(addr.ip().octets().map(i64::from));
    out.push(i64::from(addr.port()));
}

struct FieldReader<'a> {
    kind: Kind,
    fields: std::slice::Iter<'a, i64>,
}

impl FieldReader<'_> {
    fn raw(&mut self, field: &'static str) -> Result<i64, WireError> {
        self.fields.next().copied().ok_or(WireError::FieldRange {
            kind: self.kind,
            field,
        })
    }

    fn range(&self, field: &'static str) -> WireError {
        WireError::FieldRange {
            kind: self.kind,
            field,
        }
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, WireError> {
        let raw = self.raw(field)?;
        i32::try_from(raw).map_err(|_| self.range(field))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, WireError> {
        let raw = self.raw(field)?;
        u32::try_from(raw).map_err(|_| self.range(field))
    }

    fn len(&mut self, field: &'static str) -> Result<u64, WireError> {
        let raw = self.raw(field)?;
        u64::try_from(raw).map_err(|_| self.range(field))
    }

    // Ids are full 64-bit values stored bit-for-bit in a signed field
    fn id(&mut self) -> Result<PeerId, WireError> {
        Ok(PeerId(self.raw("target")? as u64))
    }

    fn addr(&mut self) -> Result<PeerAddr, WireError> {
        let mut octets = [0u8; 4];
        for octet in octets.iter_mut() {
            let raw = self.raw("addr")?;
            *octet = u8::try_from(raw).map_err(|_| self.range("addr"))?;
        }
        let raw = self.raw("port")?;
        let port = u16::try_from(raw).map_err(|_| self.range("port"))?;
        Ok(PeerAddr::new(Ipv4Addr::from(octets), port))
    }
}
