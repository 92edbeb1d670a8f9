//! Typed endpoints over a configured ring.
//!
//! - [`Transmitter`] - send side, configured transmit-only (resets head)
//! - [`Receiver`] - drain side, configured receive-only (resets tail)
//! - [`Loopback`] - both sides in one context (resets head and tail)
//!
//! A receiver always owns a [`Parser`], so draining a channel that was never
//! given one does not compile.
//!
//! # Example
//!
//! ```
//! use ringchannel::{ChannelStorage, Message};
//!
//! static LINK: ChannelStorage<16> = ChannelStorage::new();
//!
//! let mut seen = Vec::new();
//! let mut link = LINK.combined(|msg: &Message| seen.push(*msg));
//!
//! link.send_f32(7, 3.5);
//! link.send_i16(8, -1);
//! assert_eq!(link.drain(), 2);
//! drop(link);
//!
//! assert_eq!(seen[0].payload.as_f32(), Some(3.5));
//! assert_eq!(seen[1].payload.as_i16(), Some(-1));
//! ```

use std::cell::Cell;
use std::marker::PhantomData;

use thiserror::Error;

use crate::message::{Message, MsgId, Payload};
use crate::ring::{Cursor, Mode, Ring, Slot};
use crate::trace::warn;

/// Receive-side dispatch capability.
///
/// Called once per message, inline in [`Receiver::drain`]. The message is a
/// snapshot; the slot it came from may be reused once `parse` returns. Keep
/// parsers short: drain does not return until they do.
pub trait Parser {
    fn parse(&mut self, message: &Message);
}

impl<F> Parser for F
where
    F: FnMut(&Message),
{
    #[inline]
    fn parse(&mut self, message: &Message) {
        self(message);
    }
}

/// Error returned by the checked send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// Writing would have overwritten an unread message; nothing was written.
    #[error("channel full: message {id} refused with {pending} pending")]
    Full { id: MsgId, pending: usize },
}

/// Marker type to opt out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Send end of a channel.
///
/// Exactly one transmitter may exist per channel. It is [`Send`] but not
/// [`Sync`], so a single thread drives it at a time.
pub struct Transmitter<'a> {
    ring: Ring<'a>,
    rejected: Cell<u64>,
    _unsync: PhantomUnsync,
}

/// Typed wrappers over `send` and `try_send`, shared by both sending ends.
macro_rules! typed_send {
    ($($(#[$doc:meta])* $name:ident / $try_name:ident($ty:ty);)*) => {
        $(
            $(#[$doc])*
            #[inline]
            pub fn $name(&self, id: u16, value: $ty) {
                self.send(id, value);
            }

            #[doc = concat!("Checked [`", stringify!($name), "`](Self::", stringify!($name), ").")]
            ///
            /// # Errors
            ///
            /// See [`Transmitter::try_send`].
            #[inline]
            pub fn $try_name(&self, id: u16, value: $ty) -> Result<(), SendError> {
                self.try_send(id, value)
            }
        )*
    };
}

impl<'a> Transmitter<'a> {
    /// Configures a transmit-only channel and resets `head` to 0.
    ///
    /// `tail` belongs to the receiving side and is left untouched. Nothing
    /// stops a second call on the same cursors; [`ChannelStorage`] hands each
    /// role out once.
    ///
    /// [`ChannelStorage`]: crate::ChannelStorage
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, larger than `slots.len()`, or larger than
    /// [`MAX_CAPACITY`](crate::MAX_CAPACITY).
    pub fn transmit_only(slots: &'a [Slot], head: &'a Cursor, tail: &'a Cursor, capacity: usize) -> Self {
        Self::from_ring(Ring::configure(slots, head, tail, capacity, Mode::TransmitOnly))
    }

    fn from_ring(ring: Ring<'a>) -> Self {
        Self {
            ring,
            rejected: Cell::new(0),
            _unsync: PhantomData,
        }
    }

    /// Writes the next slot and publishes it.
    ///
    /// Never fails. When `capacity - 1` messages are already pending the
    /// oldest unread slots are overwritten and the receiver cannot tell.
    #[inline]
    pub fn send(&self, id: u16, payload: impl Into<Payload>) {
        self.ring.publish(Message {
            id: MsgId(id),
            payload: payload.into(),
        });
    }

    typed_send! {
        /// Sends a 16-bit unsigned value.
        send_u16 / try_send_u16(u16);
        /// Sends a 16-bit signed value.
        send_i16 / try_send_i16(i16);
        /// Sends a 32-bit unsigned value.
        send_u32 / try_send_u32(u32);
        /// Sends a 32-bit signed value.
        send_i32 / try_send_i32(i32);
        /// Sends a 32-bit float.
        send_f32 / try_send_f32(f32);
    }

    /// Sends only if an unread message would not be overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Full`] when `capacity - 1` messages are pending.
    /// The refusal is counted in [`rejected`](Self::rejected).
    #[inline]
    pub fn try_send(&self, id: u16, payload: impl Into<Payload>) -> Result<(), SendError> {
        let message = Message {
            id: MsgId(id),
            payload: payload.into(),
        };
        self.ring.try_publish(message).map_err(|pending| {
            self.rejected.set(self.rejected.get() + 1);
            warn!(id = message.id.0, pending, "send refused, channel full");
            SendError::Full {
                id: message.id,
                pending,
            }
        })
    }

    /// Number of messages refused by [`try_send`](Self::try_send) so far.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.get()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Messages published but not yet consumed, as seen by this side.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ring.pending()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

/// Drain end of a channel.
///
/// Exactly one receiver may exist per channel.
pub struct Receiver<'a, P: Parser> {
    ring: Ring<'a>,
    parser: P,
    _unsync: PhantomUnsync,
}

impl<'a, P: Parser> Receiver<'a, P> {
    /// Configures a receive-only channel and resets `tail` to 0.
    ///
    /// `head` belongs to the sending side and is left untouched.
    ///
    /// # Panics
    ///
    /// See [`Transmitter::transmit_only`].
    pub fn receive_only(
        slots: &'a [Slot],
        head: &'a Cursor,
        tail: &'a Cursor,
        capacity: usize,
        parser: P,
    ) -> Self {
        Self::from_ring(Ring::configure(slots, head, tail, capacity, Mode::ReceiveOnly), parser)
    }

    fn from_ring(ring: Ring<'a>, parser: P) -> Self {
        Self {
            ring,
            parser,
            _unsync: PhantomData,
        }
    }

    /// Hands every pending message to the parser, oldest first.
    ///
    /// Returns the number delivered. Never blocks: once head and tail meet the
    /// call returns, so poll it from the consuming context's loop.
    #[inline]
    pub fn drain(&mut self) -> usize {
        let parser = &mut self.parser;
        self.ring.drain(|message| parser.parse(message))
    }

    #[must_use]
    pub const fn parser(&self) -> &P {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut P {
        &mut self.parser
    }

    /// Releases the channel and returns the parser.
    #[must_use]
    pub fn into_parser(self) -> P {
        self.parser
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.ring.pending()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

/// Send and drain from the same context.
pub struct Loopback<'a, P: Parser> {
    tx: Transmitter<'a>,
    rx: Receiver<'a, P>,
}

impl<'a, P: Parser> Loopback<'a, P> {
    /// Configures a combined channel and resets both cursors to 0.
    ///
    /// # Panics
    ///
    /// See [`Transmitter::transmit_only`].
    pub fn combined(
        slots: &'a [Slot],
        head: &'a Cursor,
        tail: &'a Cursor,
        capacity: usize,
        parser: P,
    ) -> Self {
        let ring = Ring::configure(slots, head, tail, capacity, Mode::Combined);
        Self {
            tx: Transmitter::from_ring(ring),
            rx: Receiver::from_ring(ring, parser),
        }
    }

    /// Splits into independent ends, e.g. to move the receiver to another thread.
    #[must_use]
    pub fn split(self) -> (Transmitter<'a>, Receiver<'a, P>) {
        (self.tx, self.rx)
    }

    #[must_use]
    pub const fn transmitter(&self) -> &Transmitter<'a> {
        &self.tx
    }

    #[inline]
    pub fn send(&self, id: u16, payload: impl Into<Payload>) {
        self.tx.send(id, payload);
    }

    /// # Errors
    ///
    /// See [`Transmitter::try_send`].
    #[inline]
    pub fn try_send(&self, id: u16, payload: impl Into<Payload>) -> Result<(), SendError> {
        self.tx.try_send(id, payload)
    }

    typed_send! {
        send_u16 / try_send_u16(u16);
        send_i16 / try_send_i16(i16);
        send_u32 / try_send_u32(u32);
        send_i32 / try_send_i32(i32);
        send_f32 / try_send_f32(f32);
    }

    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.tx.rejected()
    }

    #[inline]
    pub fn drain(&mut self) -> usize {
        self.rx.drain()
    }

    #[must_use]
    pub const fn parser(&self) -> &P {
        self.rx.parser()
    }

    #[must_use]
    pub fn into_parser(self) -> P {
        self.rx.into_parser()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.pending()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PayloadKind;

    #[derive(Default)]
    struct Recorder(Vec<Message>);

    impl Parser for Recorder {
        fn parse(&mut self, message: &Message) {
            self.0.push(*message);
        }
    }

    struct Parts<const N: usize> {
        slots: [Slot; N],
        head: Cursor,
        tail: Cursor,
    }

    impl<const N: usize> Parts<N> {
        fn new() -> Self {
            Self {
                slots: [const { Slot::new() }; N],
                head: Cursor::new(0),
                tail: Cursor::new(0),
            }
        }

        fn loopback(&self) -> Loopback<'_, Recorder> {
            Loopback::combined(&self.slots, &self.head, &self.tail, N, Recorder::default())
        }
    }

    #[test]
    fn test_single_round_trip() {
        let parts = Parts::<8>::new();
        let mut link = parts.loopback();

        link.send_f32(7, 3.5);
        assert_eq!(link.drain(), 1);

        let seen = &link.parser().0;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, MsgId(7));
        assert_eq!(seen[0].payload, Payload::F32(3.5));
        assert_eq!(parts.head.snapshot(), parts.tail.snapshot());
    }

    #[test]
    fn test_fifo_across_payload_types() {
        let parts = Parts::<8>::new();
        let mut link = parts.loopback();

        link.send_u32(1, 100);
        link.send_f32(2, -0.25);
        link.send_i16(3, -300);
        link.drain();

        let ids: Vec<u16> = link.parser().0.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[test]
    fn test_empty_drain_is_noop() {
        let parts = Parts::<8>::new();
        let mut link = parts.loopback();

        assert_eq!(link.drain(), 0);
        assert!(link.parser().0.is_empty());
        assert_eq!(parts.head.snapshot(), 0);
        assert_eq!(parts.tail.snapshot(), 0);
    }

    #[test]
    fn test_wraparound_keeps_pairs() {
        const N: usize = 5;
        let parts = Parts::<N>::new();
        let mut link = parts.loopback();

        for round in 0..2u16 {
            for i in 0..(N as u16 - 1) {
                let id = round * 10 + i;
                link.send_u32(id, u32::from(id) * 1000);
            }
            assert_eq!(link.pending(), N - 1);
            assert_eq!(link.drain(), N - 1);
        }

        let seen = link.into_parser().0;
        assert_eq!(seen.len(), 2 * (N - 1));
        let expected: Vec<u16> = (0..4).chain(10..14).collect();
        for (message, id) in seen.iter().zip(expected) {
            assert_eq!(message.id, MsgId(id));
            assert_eq!(message.payload, Payload::U32(u32::from(id) * 1000));
        }
    }

    #[test]
    fn test_sixteen_bit_payloads_do_not_mix() {
        let parts = Parts::<4>::new();
        let mut link = parts.loopback();

        link.send_i16(1, -1);
        link.send_u16(2, 65535);
        link.drain();

        let seen = &link.parser().0;
        assert_eq!(seen[0].payload, Payload::I16(-1));
        assert_eq!(seen[1].payload, Payload::U16(65535));
        assert_eq!(seen[0].payload.as_u16(), None);
        assert_eq!(seen[1].payload.as_i16(), None);
    }

    #[test]
    fn test_overrun_overwrites_oldest_silently() {
        // Capacity 4 holds 3 pending. The 4th send makes head == tail (all
        // three look consumed) and the 5th leaves only itself visible.
        let parts = Parts::<4>::new();
        let mut link = parts.loopback();

        for id in 1..=4u16 {
            link.send_u16(id, id);
        }
        assert!(link.is_empty());
        assert_eq!(link.drain(), 0);

        link.send_u16(5, 5);
        assert_eq!(link.drain(), 1);
        assert_eq!(link.parser().0, [Message::new(5u16, 5u16)]);
    }

    #[test]
    fn test_overrun_between_drains_loses_history() {
        let parts = Parts::<4>::new();
        let mut link = parts.loopback();

        link.send_u16(1, 1);
        link.drain();
        for id in 2..=7u16 {
            link.send_u16(id, id);
        }
        // head advanced six times from 1: (1 + 6) mod 4 = 3; tail is 1.
        assert_eq!(link.drain(), 2);

        let ids: Vec<u16> = link.parser().0.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, [1, 6, 7]);
    }

    #[test]
    fn test_try_send_refuses_when_full() {
        let parts = Parts::<4>::new();
        let mut link = parts.loopback();

        for id in 0..3u16 {
            link.try_send(id, u32::from(id)).unwrap();
        }
        assert_eq!(
            link.try_send(3, 3u32),
            Err(SendError::Full {
                id: MsgId(3),
                pending: 3
            })
        );
        assert_eq!(link.transmitter().rejected(), 1);

        assert_eq!(link.drain(), 3);
        link.try_send(4, 4u32).unwrap();
        assert_eq!(link.drain(), 1);

        let ids: Vec<u16> = link.parser().0.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, [0, 1, 2, 4]);
    }

    #[test]
    fn test_typed_try_sends_refuse_and_count() {
        let parts = Parts::<4>::new();
        let mut link = parts.loopback();

        link.try_send_u16(1, 7).unwrap();
        link.try_send_i16(2, -7).unwrap();
        link.try_send_f32(3, 0.5).unwrap();
        assert_eq!(
            link.try_send_i32(4, -1),
            Err(SendError::Full {
                id: MsgId(4),
                pending: 3
            })
        );
        assert!(link.try_send_u32(5, 1).is_err());
        assert_eq!(link.rejected(), 2);

        assert_eq!(link.drain(), 3);
        link.try_send_u32(6, 60).unwrap();
        link.drain();

        let payloads: Vec<Payload> = link.parser().0.iter().map(|m| m.payload).collect();
        assert_eq!(
            payloads,
            [Payload::U16(7), Payload::I16(-7), Payload::F32(0.5), Payload::U32(60)]
        );
        assert_eq!(link.rejected(), 2);
    }

    #[test]
    fn test_send_error_display() {
        let err = SendError::Full {
            id: MsgId(12),
            pending: 7,
        };
        assert_eq!(err.to_string(), "channel full: message #12 refused with 7 pending");
    }

    #[test]
    fn test_split_ends_share_storage() {
        let parts = Parts::<8>::new();
        let (tx, mut rx) = parts.loopback().split();

        tx.send_i32(4, i32::MIN);
        assert_eq!(rx.pending(), 1);
        assert_eq!(rx.drain(), 1);
        assert_eq!(rx.parser().0[0].payload, Payload::I32(i32::MIN));
        assert!(tx.is_empty());
    }

    #[test]
    fn test_separate_configuration_modes() {
        let parts = Parts::<8>::new();
        let tx = Transmitter::transmit_only(&parts.slots, &parts.head, &parts.tail, 8);
        let mut rx = Receiver::receive_only(&parts.slots, &parts.head, &parts.tail, 8, Recorder::default());

        tx.send_u16(1, 11);
        tx.send(2, Payload::Untyped(22));
        assert_eq!(rx.drain(), 2);

        let seen = rx.into_parser().0;
        assert_eq!(seen[0].payload, Payload::U16(11));
        assert_eq!(seen[1].payload.kind(), PayloadKind::Untyped);
    }

    #[test]
    fn test_late_receiver_still_drains_published_backlog() {
        // The receiver resets only tail; the backlog already published ahead
        // of tail is still delivered.
        let parts = Parts::<8>::new();
        let tx = Transmitter::transmit_only(&parts.slots, &parts.head, &parts.tail, 8);
        tx.send_u16(1, 1);
        tx.send_u16(2, 2);

        let mut rx = Receiver::receive_only(&parts.slots, &parts.head, &parts.tail, 8, Recorder::default());
        assert_eq!(rx.drain(), 2);
    }

    #[test]
    fn test_closure_and_boxed_parsers() {
        let parts = Parts::<4>::new();
        let mut total = 0u32;
        {
            let mut link = Loopback::combined(&parts.slots, &parts.head, &parts.tail, 4, |m: &Message| {
                total += m.payload.as_u32().unwrap_or(0);
            });
            link.send_u32(1, 5);
            link.send_u32(2, 6);
            link.drain();
        }
        assert_eq!(total, 11);

        let mut count = 0;
        let boxed: Box<dyn FnMut(&Message) + '_> = Box::new(|_: &Message| count += 1);
        let mut link = Loopback::combined(&parts.slots, &parts.head, &parts.tail, 4, boxed);
        link.send_u16(3, 3);
        assert_eq!(link.drain(), 1);
        drop(link);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_parser_sees_messages_published_during_drain() {
        struct Echo<'t> {
            tx: &'t Transmitter<'t>,
            seen: Vec<u16>,
        }

        impl Parser for Echo<'_> {
            fn parse(&mut self, message: &Message) {
                self.seen.push(message.id.0);
                if message.id.0 < 3 {
                    self.tx.send_u16(message.id.0 + 1, 0);
                }
            }
        }

        let parts = Parts::<4>::new();
        let tx = Transmitter::transmit_only(&parts.slots, &parts.head, &parts.tail, 4);
        let echo = Echo { tx: &tx, seen: Vec::new() };
        let mut rx = Receiver::receive_only(&parts.slots, &parts.head, &parts.tail, 4, echo);

        tx.send_u16(1, 0);
        assert_eq!(rx.drain(), 3);
        assert_eq!(rx.parser().seen, [1, 2, 3]);
    }
}
