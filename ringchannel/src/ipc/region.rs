//! Channel storage placed in a named shared memory region.
//!
//! One process creates the region, another opens it, and each configures its
//! own end:
//!
//! ```no_run
//! use ringchannel::Message;
//! use ringchannel::ipc::region::SharedChannel;
//! use ringchannel::ipc::shmem::ShmPath;
//!
//! let path = ShmPath::new("/sensor-link")?;
//!
//! // Process A: sender
//! let region = SharedChannel::<256, _>::create(path.clone())?;
//! let tx = region.transmit_only();
//! tx.send_f32(1, 21.5);
//!
//! // Process B: receiver
//! let region = SharedChannel::<256, _>::open(path)?;
//! let mut rx = region.receive_only(|msg: &Message| println!("{msg:?}"));
//! rx.drain();
//! # Ok::<(), ringchannel::ipc::shmem::ShmError>(())
//! ```
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ InitMarker      (64-byte aligned)      │
//! ├────────────────────────────────────────┤
//! │ ChannelStorage<N>                      │
//! │   head, tail, [Slot; N]                │
//! └────────────────────────────────────────┘
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::shmem::{Creator, Opener, SharedMemorySafe, Shm, ShmError, ShmMode, ShmPath};
use crate::storage::ChannelStorage;
use crate::trace::debug;

const INIT_MAGIC: u64 = 0x5249_4E47_4348_414E; // "RINGCHAN" in ASCII
const INIT_TIMEOUT: Duration = Duration::from_secs(1);

// SAFETY: repr(C) of two cache-aligned AtomicU16 cursors, repr(C) slots of
// two AtomicU32 words and an AtomicU8 claim mask. All-zero is the empty,
// unclaimed ring.
unsafe impl<const N: usize> SharedMemorySafe for ChannelStorage<N> {}

#[repr(C, align(64))]
#[derive(Default)]
struct InitMarker(AtomicU64);

#[repr(C)]
#[derive(Default)]
struct RegionLayout<const N: usize> {
    init: InitMarker,
    storage: ChannelStorage<N>,
}

// SAFETY: repr(C) of an atomic marker and a shared-memory-safe storage block.
unsafe impl<const N: usize> SharedMemorySafe for RegionLayout<N> {}

impl<const N: usize> RegionLayout<N> {
    /// Spins until the creator has published the init marker.
    fn wait_for_init(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.init.0.load(Ordering::Acquire) == INIT_MAGIC {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::hint::spin_loop();
        }
    }
}

/// A [`ChannelStorage`] mapped from a named POSIX shared memory object.
///
/// Derefs to the storage, so endpoints are configured with
/// [`ChannelStorage::transmit_only`], [`ChannelStorage::receive_only`] or
/// [`ChannelStorage::combined`]. Role claims live in the mapped storage, so a
/// second process asking for a role already taken panics instead of resetting
/// the peer's cursor.
pub struct SharedChannel<const N: usize, Mode: ShmMode> {
    shm: Shm<RegionLayout<N>, Mode>,
}

impl<const N: usize> SharedChannel<N, Creator> {
    /// Creates the region with both cursors at 0 and publishes the init marker.
    ///
    /// Unlinks the name on drop.
    ///
    /// # Errors
    ///
    /// See [`Shm::create`].
    pub fn create(path: ShmPath) -> Result<Self, ShmError> {
        let shm = Shm::<RegionLayout<N>, Creator>::create(path)?;
        shm.init.0.store(INIT_MAGIC, Ordering::Release);
        debug!(path = %shm.path(), capacity = N, "shared channel ready");
        Ok(Self { shm })
    }
}

impl<const N: usize> SharedChannel<N, Opener> {
    /// Opens a region created elsewhere, waiting up to 1s for its init marker.
    ///
    /// # Errors
    ///
    /// See [`Shm::open`]; additionally [`ShmError::InitTimeout`].
    pub fn open(path: ShmPath) -> Result<Self, ShmError> {
        let shm = Shm::<RegionLayout<N>, Opener>::open(path)?;
        if !shm.wait_for_init(INIT_TIMEOUT) {
            debug!(path = %shm.path(), timeout = ?INIT_TIMEOUT, "init marker never published");
            return Err(ShmError::InitTimeout {
                path: shm.path().to_string(),
            });
        }
        debug!(path = %shm.path(), capacity = N, "shared channel opened");
        Ok(Self { shm })
    }
}

impl<const N: usize, Mode: ShmMode> SharedChannel<N, Mode> {
    #[must_use]
    pub fn storage(&self) -> &ChannelStorage<N> {
        &self.shm.storage
    }

    #[must_use]
    pub fn path(&self) -> &ShmPath {
        self.shm.path()
    }
}

impl<const N: usize, Mode: ShmMode> Deref for SharedChannel<N, Mode> {
    type Target = ChannelStorage<N>;

    fn deref(&self) -> &ChannelStorage<N> {
        self.storage()
    }
}
