//! Core ring algorithm shared by every endpoint.
//!
//! The ring is a view over three externally owned pieces of memory: the slot
//! array, the head cursor and the tail cursor. `head` names the slot written
//! most recently, `tail` the slot consumed most recently, and `head == tail`
//! means empty. At most `capacity - 1` messages can be pending.
//!
//! # Memory Layout
//!
//! Each [`Slot`] is two 32-bit words:
//!
//! ```text
//! offset 0            2      3      4                    8
//! ┌───────────────────┬──────┬──────┬────────────────────┐
//! │ id (u16)          │ tag  │ 0    │ payload (u32 bits) │
//! └───────────────────┴──────┴──────┴────────────────────┘
//! ```
//!
//! On little-endian targets this is byte-compatible with the untagged C record
//! `{ uint16_t id; union { float; uint16_t; uint32_t; int16_t; int32_t; } }`:
//! the tag occupies what C treats as padding. A C writer leaves the tag at
//! zero, which decodes as [`Payload::Untyped`].
//!
//! # Ordering
//!
//! The producer stores the payload word, then the header word, then publishes
//! the new head with `Release`. The consumer loads head with `Acquire` before
//! reading the slot. Slot words are atomics, so an overrun that lands on a slot
//! while it is being read yields a stale or mixed message, never undefined
//! behavior.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use crate::message::{Message, MsgId, Payload, PayloadKind};
use crate::trace::{debug, trace};

/// Largest supported capacity. Cursors are 16-bit, as in the C layout.
pub const MAX_CAPACITY: usize = u16::MAX as usize;

/// Shared index cell.
///
/// One side owns writes to it; the other side only reads.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct Cursor(AtomicU16);

impl Cursor {
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(AtomicU16::new(index))
    }

    /// Current value, acquired.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> u16 {
        self.0.load(order)
    }

    #[inline]
    pub(crate) fn publish(&self, index: u16) {
        self.0.store(index, Ordering::Release);
    }
}

const TAG_SHIFT: u32 = 16;

/// One message slot.
#[derive(Debug, Default)]
#[repr(C)]
pub struct Slot {
    header: AtomicU32,
    payload: AtomicU32,
}

impl Slot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            header: AtomicU32::new(0),
            payload: AtomicU32::new(0),
        }
    }

    /// Writes `message` into the slot, payload first.
    #[inline]
    pub(crate) fn store(&self, message: Message) {
        let header = u32::from(message.id.0) | (u32::from(message.payload.kind() as u8) << TAG_SHIFT);
        self.payload
            .store(message.payload.to_bits(), Ordering::Relaxed);
        self.header.store(header, Ordering::Relaxed);
    }

    /// Reads the slot into an owned snapshot.
    ///
    /// An unknown tag byte is treated as untyped so the raw bits stay
    /// available to the parser.
    #[inline]
    pub(crate) fn load(&self) -> Message {
        let header = self.header.load(Ordering::Relaxed);
        let bits = self.payload.load(Ordering::Relaxed);
        let kind = PayloadKind::try_from((header >> TAG_SHIFT) as u8).unwrap_or(PayloadKind::Untyped);
        Message {
            id: MsgId(header as u16),
            payload: Payload::from_bits(kind, bits),
        }
    }

    /// Writes an untagged record the way C firmware does.
    #[cfg(test)]
    pub(crate) fn store_untagged(&self, id: u16, bits: u32) {
        self.payload.store(bits, Ordering::Relaxed);
        self.header.store(u32::from(id), Ordering::Relaxed);
    }
}

/// Which cursors configuration resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Resets head. The receiving side owns tail.
    TransmitOnly,
    /// Resets tail. The sending side owns head.
    ReceiveOnly,
    /// Resets both; one context sends and receives.
    Combined,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::TransmitOnly => "transmit-only",
            Self::ReceiveOnly => "receive-only",
            Self::Combined => "combined",
        })
    }
}

/// Borrowed view over slots and cursors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ring<'a> {
    slots: &'a [Slot],
    head: &'a Cursor,
    tail: &'a Cursor,
    capacity: u16,
}

impl<'a> Ring<'a> {
    /// Binds the view and resets the cursors `mode` owns.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, exceeds [`MAX_CAPACITY`], or exceeds the
    /// number of slots supplied.
    pub(crate) fn configure(
        slots: &'a [Slot],
        head: &'a Cursor,
        tail: &'a Cursor,
        capacity: usize,
        mode: Mode,
    ) -> Self {
        assert!(capacity > 0, "ring capacity must be greater than 0");
        assert!(
            capacity <= MAX_CAPACITY,
            "ring capacity {capacity} exceeds the 16-bit cursor range ({MAX_CAPACITY})"
        );
        assert!(
            capacity <= slots.len(),
            "ring capacity {capacity} exceeds the {} slots supplied",
            slots.len()
        );

        match mode {
            Mode::TransmitOnly => head.publish(0),
            Mode::ReceiveOnly => tail.publish(0),
            Mode::Combined => {
                head.publish(0);
                tail.publish(0);
            }
        }

        debug!(%mode, capacity, "ring configured");

        Self {
            slots,
            head,
            tail,
            capacity: capacity as u16,
        }
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Next slot index, wrapping to 0 at capacity.
    ///
    /// An out-of-range index left behind by a peer also wraps to 0.
    #[inline]
    pub(crate) const fn bump(&self, index: u16) -> u16 {
        if index >= self.capacity - 1 { 0 } else { index + 1 }
    }

    /// Forward circular distance from tail to head.
    #[inline]
    pub(crate) fn pending(&self) -> usize {
        let head = usize::from(self.head.load(Ordering::Acquire));
        let tail = usize::from(self.tail.load(Ordering::Acquire));
        let cap = self.capacity();
        (head + cap - tail) % cap
    }

    /// Write-then-publish. Overwrites unread slots when the ring is saturated.
    ///
    /// Only the single producer may call this.
    #[inline]
    pub(crate) fn publish(&self, message: Message) {
        let next = self.bump(self.head.load(Ordering::Relaxed));
        self.slots[usize::from(next)].store(message);
        self.head.publish(next);
    }

    /// Write-then-publish, refusing when the write would collide with tail.
    ///
    /// Returns the backlog seen when refusing.
    #[inline]
    pub(crate) fn try_publish(&self, message: Message) -> Result<(), usize> {
        let head = self.head.load(Ordering::Relaxed);
        let next = self.bump(head);
        if next == self.tail.load(Ordering::Acquire) {
            return Err(self.capacity() - 1);
        }
        self.slots[usize::from(next)].store(message);
        self.head.publish(next);
        Ok(())
    }

    /// Delivers every visible message to `sink`, oldest first.
    ///
    /// Head is re-read on every iteration, so messages published while the
    /// loop runs are delivered too. Only the single consumer may call this.
    #[inline]
    pub(crate) fn drain(&self, mut sink: impl FnMut(&Message)) -> usize {
        let mut delivered = 0;
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Relaxed);
            debug_assert!(head < self.capacity, "head {head} out of range");
            if head == tail {
                break;
            }
            let next = self.bump(tail);
            self.tail.publish(next);
            let message = self.slots[usize::from(next)].load();
            sink(&message);
            delivered += 1;
        }
        if delivered > 0 {
            trace!(delivered, "ring drained");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<const N: usize>() -> ([Slot; N], Cursor, Cursor) {
        ([const { Slot::new() }; N], Cursor::new(0), Cursor::new(0))
    }

    #[test]
    fn test_slot_layout_matches_c_record() {
        use std::mem::{align_of, offset_of, size_of};

        assert_eq!(size_of::<Slot>(), 8);
        assert_eq!(align_of::<Slot>(), 4);
        assert_eq!(offset_of!(Slot, payload), 4);
        assert_eq!(size_of::<Cursor>(), 2);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn test_slot_bytes_little_endian() {
        let slot = Slot::new();
        slot.store(Message::new(0x0102u16, 0x0a0b_0c0du32));
        // SAFETY: Slot is repr(C) with two initialized u32 words, no padding.
        let bytes: [u8; 8] = unsafe { std::mem::transmute_copy(&slot) };
        assert_eq!(bytes, [0x02, 0x01, PayloadKind::U32 as u8, 0, 0x0d, 0x0c, 0x0b, 0x0a]);
    }

    #[test]
    fn test_untagged_slot_decodes_untyped() {
        let slot = Slot::new();
        slot.store_untagged(9, 0xffff_fffe);
        let message = slot.load();
        assert_eq!(message.id, MsgId(9));
        assert_eq!(message.payload, Payload::Untyped(0xffff_fffe));
        assert_eq!(message.decode_as(PayloadKind::I32).payload, Payload::I32(-2));
    }

    #[test]
    fn test_bump_wraps_at_capacity() {
        let (slots, head, tail) = parts::<3>();
        let ring = Ring::configure(&slots, &head, &tail, 3, Mode::Combined);
        assert_eq!(ring.bump(0), 1);
        assert_eq!(ring.bump(1), 2);
        assert_eq!(ring.bump(2), 0);
    }

    #[test]
    fn test_bump_wraps_foreign_cursor_values() {
        let (slots, head, tail) = parts::<3>();
        let ring = Ring::configure(&slots, &head, &tail, 3, Mode::Combined);
        assert_eq!(ring.bump(7), 0);
        assert_eq!(ring.bump(u16::MAX), 0);
    }

    #[test]
    fn test_publish_writes_slot_after_head() {
        let (slots, head, tail) = parts::<4>();
        let ring = Ring::configure(&slots, &head, &tail, 4, Mode::Combined);

        ring.publish(Message::new(1u16, 10u32));
        assert_eq!(head.snapshot(), 1);
        assert_eq!(slots[1].load(), Message::new(1u16, 10u32));
        assert_eq!(ring.pending(), 1);
    }

    #[test]
    fn test_capacity_smaller_than_slice() {
        let (slots, head, tail) = parts::<8>();
        let ring = Ring::configure(&slots, &head, &tail, 2, Mode::Combined);
        ring.publish(Message::new(1u16, 1u16));
        ring.publish(Message::new(2u16, 2u16));
        assert_eq!(head.snapshot(), 0);
        assert_eq!(slots[0].load().id, MsgId(2));
    }

    #[test]
    fn test_capacity_one_is_always_empty() {
        let (slots, head, tail) = parts::<1>();
        let ring = Ring::configure(&slots, &head, &tail, 1, Mode::Combined);
        ring.publish(Message::new(1u16, 1u32));
        assert_eq!(ring.pending(), 0);
        assert_eq!(ring.drain(|_| panic!("nothing is pending")), 0);
        assert_eq!(ring.try_publish(Message::new(2u16, 2u32)), Err(0));
    }

    #[test]
    fn test_try_publish_reports_backlog() {
        let (slots, head, tail) = parts::<4>();
        let ring = Ring::configure(&slots, &head, &tail, 4, Mode::Combined);
        for id in 0..3u16 {
            assert!(ring.try_publish(Message::new(id, 0u32)).is_ok());
        }
        assert_eq!(ring.try_publish(Message::new(9u16, 0u32)), Err(3));
        assert_eq!(ring.pending(), 3);
    }

    #[test]
    fn test_configure_resets_owned_cursors_only() {
        let (slots, head, tail) = parts::<4>();
        head.publish(2);
        tail.publish(3);

        let _ = Ring::configure(&slots, &head, &tail, 4, Mode::TransmitOnly);
        assert_eq!((head.snapshot(), tail.snapshot()), (0, 3));

        head.publish(2);
        let _ = Ring::configure(&slots, &head, &tail, 4, Mode::ReceiveOnly);
        assert_eq!((head.snapshot(), tail.snapshot()), (2, 0));

        tail.publish(1);
        let _ = Ring::configure(&slots, &head, &tail, 4, Mode::Combined);
        assert_eq!((head.snapshot(), tail.snapshot()), (0, 0));
    }

    #[test]
    #[should_panic(expected = "greater than 0")]
    fn test_zero_capacity_panics() {
        let (slots, head, tail) = parts::<4>();
        let _ = Ring::configure(&slots, &head, &tail, 0, Mode::Combined);
    }

    #[test]
    #[should_panic(expected = "slots supplied")]
    fn test_undersized_buffer_panics() {
        let (slots, head, tail) = parts::<4>();
        let _ = Ring::configure(&slots, &head, &tail, 5, Mode::Combined);
    }

    #[test]
    #[should_panic(expected = "16-bit cursor range")]
    fn test_capacity_beyond_cursor_range_panics() {
        let (slots, head, tail) = parts::<4>();
        let _ = Ring::configure(&slots, &head, &tail, MAX_CAPACITY + 1, Mode::Combined);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::TransmitOnly.to_string(), "transmit-only");
        assert_eq!(Mode::ReceiveOnly.to_string(), "receive-only");
        assert_eq!(Mode::Combined.to_string(), "combined");
    }
}
