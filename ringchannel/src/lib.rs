//! Fixed-capacity single-producer/single-consumer message ring.
//!
//! Two contexts that share memory but cannot call each other (two cores, two
//! processes, an interrupt handler and a poll loop) exchange small typed
//! [`Message`]s through a ring of slots and two shared cursors. The producer
//! writes a slot and then publishes `head`; the consumer polls
//! [`Receiver::drain`], which advances `tail` and hands each message to a
//! [`Parser`].
//!
//! The ring never blocks and keeps no backpressure on the default send path:
//! a producer that outruns the consumer overwrites the oldest unread slots.
//! [`Transmitter::try_send`] opts into refusing instead.
//!
//! ```
//! use ringchannel::{ChannelStorage, Message, Payload};
//!
//! let storage = ChannelStorage::<8>::new();
//! let tx = storage.transmit_only();
//! let mut last = None;
//! let mut rx = storage.receive_only(|msg: &Message| last = Some(msg.payload));
//!
//! tx.send_u16(1, 65535);
//! rx.drain();
//! drop(rx);
//! assert_eq!(last, Some(Payload::U16(65535)));
//! ```

pub mod channel;
pub mod ipc;
pub mod message;
pub mod ring;
pub mod storage;
mod trace;

pub use channel::{Loopback, Parser, Receiver, SendError, Transmitter};
pub use message::{DecodeError, Message, MsgId, Payload, PayloadKind};
pub use ring::{Cursor, MAX_CAPACITY, Slot};
pub use storage::{CacheAligned, ChannelStorage};
pub use trace::init_tracing;
