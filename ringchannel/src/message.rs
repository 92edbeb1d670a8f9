//! Message model carried by the ring.
//!
//! A [`Message`] is a 16-bit identifier plus one small scalar [`Payload`]. The
//! payload carries its own discriminant, so a receiver can match on it instead
//! of relying on an out-of-band convention keyed on the id.
//!
//! Records produced by firmware that only knows the untagged C layout arrive as
//! [`Payload::Untyped`]; [`Message::decode_as`] reinterprets the raw bits once
//! the receiver has picked the payload kind for that id.

use std::fmt;

use thiserror::Error;

/// Identifier attached to every message.
///
/// The ring never interprets it; sender and receiver agree on its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct MsgId(pub u16);

impl From<u16> for MsgId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl From<MsgId> for u16 {
    fn from(id: MsgId) -> Self {
        id.0
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant of a [`Payload`], as stored in the slot tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    /// Written without a tag (foreign C writer).
    Untyped = 0,
    F32 = 1,
    U16 = 2,
    U32 = 3,
    I16 = 4,
    I32 = 5,
}

/// Error returned when a tag byte names no known payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown payload tag 0x{0:02x}")]
pub struct DecodeError(pub u8);

impl TryFrom<u8> for PayloadKind {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Untyped),
            1 => Ok(Self::F32),
            2 => Ok(Self::U16),
            3 => Ok(Self::U32),
            4 => Ok(Self::I16),
            5 => Ok(Self::I32),
            other => Err(DecodeError(other)),
        }
    }
}

/// One scalar value. Only a single interpretation is valid per message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    F32(f32),
    U16(u16),
    U32(u32),
    I16(i16),
    I32(i32),
    /// Raw 32-bit word from a writer that does not tag its payloads.
    Untyped(u32),
}

impl Payload {
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::F32(_) => PayloadKind::F32,
            Self::U16(_) => PayloadKind::U16,
            Self::U32(_) => PayloadKind::U32,
            Self::I16(_) => PayloadKind::I16,
            Self::I32(_) => PayloadKind::I32,
            Self::Untyped(_) => PayloadKind::Untyped,
        }
    }

    /// Returns the 32-bit word this payload occupies in a slot.
    ///
    /// 16-bit values are zero-extended (`I16` via its two's complement bits),
    /// matching what a little-endian C union write leaves in the low half.
    #[must_use]
    pub const fn to_bits(self) -> u32 {
        match self {
            Self::F32(v) => v.to_bits(),
            Self::U16(v) => v as u32,
            Self::U32(v) => v,
            Self::I16(v) => v as u16 as u32,
            Self::I32(v) => v as u32,
            Self::Untyped(v) => v,
        }
    }

    /// Rebuilds a payload from its slot word.
    ///
    /// The upper half of the word is ignored for 16-bit kinds.
    #[must_use]
    pub const fn from_bits(kind: PayloadKind, bits: u32) -> Self {
        match kind {
            PayloadKind::F32 => Self::F32(f32::from_bits(bits)),
            PayloadKind::U16 => Self::U16(bits as u16),
            PayloadKind::U32 => Self::U32(bits),
            PayloadKind::I16 => Self::I16(bits as u16 as i16),
            PayloadKind::I32 => Self::I32(bits as i32),
            PayloadKind::Untyped => Self::Untyped(bits),
        }
    }

    #[must_use]
    pub const fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(&self) -> Option<u16> {
        match *self {
            Self::U16(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::U32(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i16(&self) -> Option<i16> {
        match *self {
            Self::I16(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::I32(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! payload_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

payload_from! {
    f32 => F32,
    u16 => U16,
    u32 => U32,
    i16 => I16,
    i32 => I32,
}

/// A message as delivered to a parser.
///
/// Parsers receive a snapshot of the slot; the ring may reuse the slot as
/// soon as the parser returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Message {
    pub id: MsgId,
    pub payload: Payload,
}

impl Message {
    #[must_use]
    pub fn new(id: impl Into<MsgId>, payload: impl Into<Payload>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// Reinterprets the payload bits as `kind`.
    ///
    /// This is how an untagged record from the C layout is read: the receiver
    /// looks up the kind it expects for [`Message::id`] and decodes with it.
    /// Re-decoding an already tagged payload is allowed and is a plain bit cast.
    #[must_use]
    pub const fn decode_as(&self, kind: PayloadKind) -> Self {
        Self {
            id: self.id,
            payload: Payload::from_bits(kind, self.payload.to_bits()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tag_roundtrip() {
        for tag in 0u8..=5 {
            let kind = PayloadKind::try_from(tag).unwrap();
            assert_eq!(kind as u8, tag);
        }
        assert_eq!(PayloadKind::try_from(6), Err(DecodeError(6)));
        assert_eq!(PayloadKind::try_from(0xff), Err(DecodeError(0xff)));
    }

    #[test]
    fn test_sixteen_bit_values_zero_extend() {
        assert_eq!(Payload::I16(-1).to_bits(), 0x0000_ffff);
        assert_eq!(Payload::U16(65535).to_bits(), 0x0000_ffff);
        assert_eq!(Payload::I32(-1).to_bits(), 0xffff_ffff);
    }

    #[test]
    fn test_from_bits_ignores_upper_half_for_short_kinds() {
        assert_eq!(Payload::from_bits(PayloadKind::U16, 0xdead_0007), Payload::U16(7));
        assert_eq!(Payload::from_bits(PayloadKind::I16, 0x1234_fffe), Payload::I16(-2));
    }

    #[test]
    fn test_decode_untyped_by_convention() {
        let raw = Message {
            id: MsgId(3),
            payload: Payload::Untyped(3.5f32.to_bits()),
        };
        let decoded = raw.decode_as(PayloadKind::F32);
        assert_eq!(decoded.id, MsgId(3));
        assert_eq!(decoded.payload.as_f32(), Some(3.5));
    }

    #[test]
    fn test_accessors_reject_other_kinds() {
        let p = Payload::from(-7i32);
        assert_eq!(p.as_i32(), Some(-7));
        assert_eq!(p.as_u32(), None);
        assert_eq!(p.as_f32(), None);
        assert_eq!(p.kind(), PayloadKind::I32);
    }

    #[test]
    fn test_msg_id_display() {
        assert_eq!(MsgId(42).to_string(), "#42");
    }
}
