//! Owned, fixed-size backing memory for one channel.
//!
//! [`ChannelStorage`] groups the cursors and slot array into a single
//! `#[repr(C)]` block that can be built in a `const` context. Place it in a
//! `static` (or a linker section both cores map) on embedded targets, or in a
//! shared memory region via [`crate::ipc::region`].
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ head            (64-byte aligned)      │
//! ├────────────────────────────────────────┤
//! │ tail            (64-byte aligned)      │
//! ├────────────────────────────────────────┤
//! │ slots: [Slot; N]                       │
//! ├────────────────────────────────────────┤
//! │ claimed roles   (AtomicU8)             │
//! └────────────────────────────────────────┘
//! ```
//!
//! Each role is handed out once per storage, so safe code cannot build a
//! second transmitter or reset a cursor under a live peer.

use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::channel::{Loopback, Parser, Receiver, Transmitter};
use crate::ring::{Cursor, MAX_CAPACITY, Slot};

/// Keeps a cursor on its own cache line so the two sides do not false-share.
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    /// Compile-time assertion that the capacity fits the cursor range.
    const OK: () = assert!(
        N > 0 && N <= MAX_CAPACITY,
        "channel capacity must be in 1..=65535"
    );
}

const TRANSMITTER: u8 = 1 << 0;
const RECEIVER: u8 = 1 << 1;

fn role_name(roles: u8) -> &'static str {
    match roles {
        TRANSMITTER => "transmitter",
        RECEIVER => "receiver",
        _ => "transmitter and receiver",
    }
}

/// Cursors plus `N` slots.
#[derive(Debug)]
#[repr(C)]
pub struct ChannelStorage<const N: usize> {
    head: CacheAligned<Cursor>,
    tail: CacheAligned<Cursor>,
    slots: [Slot; N],
    claimed: AtomicU8,
}

impl<const N: usize> ChannelStorage<N> {
    /// Zeroed storage. Fails to compile if `N` is 0 or above 65535.
    #[must_use]
    pub const fn new() -> Self {
        let () = CapacityCheck::<N>::OK;
        Self {
            head: CacheAligned(Cursor::new(0)),
            tail: CacheAligned(Cursor::new(0)),
            slots: [const { Slot::new() }; N],
            claimed: AtomicU8::new(0),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[must_use]
    pub const fn head(&self) -> &Cursor {
        &self.head.0
    }

    #[must_use]
    pub const fn tail(&self) -> &Cursor {
        &self.tail.0
    }

    #[must_use]
    pub const fn slots(&self) -> &[Slot; N] {
        &self.slots
    }

    /// Marks `roles` as taken, panicking if any of them already was.
    ///
    /// The flag lives in the storage itself, so in a shared region it also
    /// holds across processes.
    fn claim(&self, roles: u8) {
        let taken = self.claimed.fetch_or(roles, Ordering::AcqRel) & roles;
        assert!(
            taken == 0,
            "{} already claimed on this channel storage",
            role_name(taken)
        );
    }

    /// `true` once a transmitter has been handed out.
    #[must_use]
    pub fn transmitter_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire) & TRANSMITTER != 0
    }

    /// `true` once a receiver has been handed out.
    #[must_use]
    pub fn receiver_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire) & RECEIVER != 0
    }

    /// Configures the sending side. Resets head.
    ///
    /// # Panics
    ///
    /// If a transmitter was already taken from this storage, directly or
    /// through [`combined`](Self::combined).
    #[must_use]
    pub fn transmit_only(&self) -> Transmitter<'_> {
        self.claim(TRANSMITTER);
        Transmitter::transmit_only(&self.slots, &self.head, &self.tail, N)
    }

    /// Configures the draining side. Resets tail.
    ///
    /// # Panics
    ///
    /// If a receiver was already taken from this storage.
    #[must_use]
    pub fn receive_only<P: Parser>(&self, parser: P) -> Receiver<'_, P> {
        self.claim(RECEIVER);
        Receiver::receive_only(&self.slots, &self.head, &self.tail, N, parser)
    }

    /// Configures both sides for one context. Resets head and tail.
    ///
    /// # Panics
    ///
    /// If either side was already taken from this storage.
    #[must_use]
    pub fn combined<P: Parser>(&self, parser: P) -> Loopback<'_, P> {
        self.claim(TRANSMITTER | RECEIVER);
        Loopback::combined(&self.slots, &self.head, &self.tail, N, parser)
    }
}

impl<const N: usize> Default for ChannelStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}
