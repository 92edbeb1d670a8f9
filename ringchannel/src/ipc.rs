//! Cross-process transport over POSIX shared memory.
//!
//! - [`shmem`] - typed mapping of a named shared memory object
//! - [`region`] - a [`ChannelStorage`](crate::ChannelStorage) laid out in such a mapping

pub mod region;
pub mod shmem;
