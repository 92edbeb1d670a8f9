//! POSIX shared memory mapping for channel storage.
//!
//! [`Shm<T, Mode>`] maps one named object (`shm_open` + `mmap`) sized exactly
//! for `T` and derefs to it. The `Mode` typestate picks cleanup:
//!
//! | Mode        | On drop                       |
//! |-------------|-------------------------------|
//! | [`Creator`] | `munmap()` + `shm_unlink()`   |
//! | [`Opener`]  | `munmap()` only               |
//!
//! Only types marked [`SharedMemorySafe`] can be mapped.
//!
//! After a crash the name leaks; remove it before re-creating:
//!
//! ```no_run
//! # use rustix::shm;
//! let _ = shm::unlink("/sensor-link");
//! ```

use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::ptr::{NonNull, null_mut};

use rustix::fs::{Mode, fstat, ftruncate};
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};
use rustix::{io, shm};
use thiserror::Error;

use crate::trace::debug;

/// Result alias for shared memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors produced while creating or opening a region.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The name is not a portable POSIX shared memory name.
    #[error("invalid shared memory path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    /// A system call failed.
    #[error("{op} failed for `{path}`: {source}")]
    Posix {
        op: &'static str,
        path: String,
        #[source]
        source: io::Errno,
    },
    /// The existing object was created for a different layout.
    #[error("shared memory `{path}` size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: usize,
        actual: i64,
    },
    /// The creator never published its init marker.
    #[error("timed out waiting for `{path}` to be initialized")]
    InitTimeout { path: String },
}

impl ShmError {
    fn posix(op: &'static str, path: &ShmPath, source: io::Errno) -> Self {
        Self::Posix {
            op,
            path: path.to_string(),
            source,
        }
    }

    /// True when the environment forbids shared memory altogether.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Posix { source, .. } if *source == io::Errno::ACCESS)
    }
}

const POSIX_NAME_MAX: usize = 255;

/// A validated POSIX shared memory name.
///
/// Must start with `/`, contain no other `/`, and be at most 255 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShmPath(String);

impl ShmPath {
    /// # Errors
    ///
    /// Returns [`ShmError::InvalidPath`] if the name is not portable.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let reason = if !path.starts_with('/') {
            Some("path must start with '/'")
        } else if path[1..].contains('/') {
            Some("path must not contain additional '/' characters")
        } else if path.len() > POSIX_NAME_MAX {
            Some("path length must be <= 255 bytes")
        } else if path.len() == 1 {
            Some("path must name an object after '/'")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ShmError::InvalidPath { path, reason }),
            None => Ok(Self(path)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShmPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ShmPath> for String {
    fn from(path: ShmPath) -> Self {
        path.0
    }
}

/// Cleanup behavior of a mapping.
pub trait ShmMode {
    /// Whether dropping the mapping removes the name.
    const SHOULD_UNLINK: bool;
}

/// Created the object; unlinks the name on drop.
pub struct Creator;
impl ShmMode for Creator {
    const SHOULD_UNLINK: bool = true;
}

/// Opened an existing object; leaves the name on drop.
pub struct Opener;
impl ShmMode for Opener {
    const SHOULD_UNLINK: bool = false;
}

/// Types that may live in memory mapped by two processes.
///
/// # Safety
///
/// Implementers guarantee that the type:
/// - has `#[repr(C)]` or `#[repr(transparent)]` layout,
/// - holds no pointers, references or heap handles,
/// - is valid when every byte is zero (a freshly truncated object),
/// - stays sound if `Drop` never runs,
/// - synchronizes all shared mutation through atomics.
pub unsafe trait SharedMemorySafe: Send + Sync {}

/// Mapping of one `T` in a named POSIX shared memory object.
///
/// Invariant: `ptr` addresses `size_of::<T>()` mapped, initialized bytes for
/// the whole life of the value.
pub struct Shm<T: SharedMemorySafe, Mode: ShmMode> {
    ptr: NonNull<T>,
    path: ShmPath,
    _mode: PhantomData<Mode>,
}

// SAFETY: T: SharedMemorySafe implies Send + Sync, and the pointer targets a
// process-wide mapping rather than thread-local memory.
unsafe impl<T: SharedMemorySafe, Mode: ShmMode> Send for Shm<T, Mode> {}
unsafe impl<T: SharedMemorySafe, Mode: ShmMode> Sync for Shm<T, Mode> {}

/// Maps `fd` read-write and shared.
///
/// # Safety
///
/// `fd` must refer to an object of at least `size_of::<T>()` bytes.
unsafe fn map<T>(fd: &rustix::fd::OwnedFd, path: &ShmPath) -> Result<NonNull<T>> {
    // SAFETY: a fresh mapping of a correctly sized object aliases nothing in
    // this process; mmap returns page-aligned memory, enough for any T.
    let ptr = unsafe {
        mmap(
            null_mut(),
            size_of::<T>(),
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
    }
    .map_err(|err| ShmError::posix("mmap", path, err))?;

    NonNull::new(ptr.cast::<T>()).ok_or_else(|| ShmError::posix("mmap", path, io::Errno::NOMEM))
}

impl<T: SharedMemorySafe + Default> Shm<T, Creator> {
    /// Creates a new object, sizes it for `T`, maps it, and writes `T::default()`.
    ///
    /// # Errors
    ///
    /// `EEXIST` if the name is taken, `EACCES` on permissions, `ENOMEM` on
    /// resources, or an mmap failure. The object is unlinked on every error.
    ///
    /// # Panics
    ///
    /// If `T::default()` panics the object is unmapped and unlinked before the
    /// panic resumes.
    pub fn create(path: ShmPath) -> Result<Self> {
        let fd = shm::open(
            path.as_str(),
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|err| ShmError::posix("shm_open", &path, err))?;

        let mapped = ftruncate(&fd, size_of::<T>() as u64)
            .map_err(|err| ShmError::posix("ftruncate", &path, err))
            // SAFETY: ftruncate just sized the object for T.
            .and_then(|()| unsafe { map::<T>(&fd, &path) });
        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(err) => {
                drop(fd);
                let _ = shm::unlink(path.as_str());
                return Err(err);
            }
        };

        debug!(path = %path, bytes = size_of::<T>(), "shared memory created");

        let shm = Self {
            ptr,
            path,
            _mode: PhantomData,
        };

        // SAFETY: the mapping is exclusively ours until `create` returns.
        let init = catch_unwind(AssertUnwindSafe(|| unsafe {
            std::ptr::write(shm.ptr.as_ptr(), T::default());
        }));
        match init {
            Ok(()) => Ok(shm),
            Err(payload) => {
                drop(shm);
                resume_unwind(payload);
            }
        }
    }
}

impl<T: SharedMemorySafe> Shm<T, Opener> {
    /// Maps an object another process created.
    ///
    /// # Errors
    ///
    /// `ENOENT` if missing, `EACCES` on permissions, [`ShmError::SizeMismatch`]
    /// when the object was created for a different `T`.
    pub fn open(path: ShmPath) -> Result<Self> {
        let fd = shm::open(path.as_str(), shm::OFlags::RDWR, Mode::empty())
            .map_err(|err| ShmError::posix("shm_open", &path, err))?;

        let stat = fstat(&fd).map_err(|err| ShmError::posix("fstat", &path, err))?;
        if stat.st_size != size_of::<T>() as i64 {
            return Err(ShmError::SizeMismatch {
                path: path.into(),
                expected: size_of::<T>(),
                actual: stat.st_size,
            });
        }

        // SAFETY: fstat confirmed the object holds exactly one T.
        let ptr = unsafe { map::<T>(&fd, &path) }?;

        debug!(path = %path, bytes = size_of::<T>(), "shared memory opened");

        Ok(Self {
            ptr,
            path,
            _mode: PhantomData,
        })
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Shm<T, Mode> {
    #[must_use]
    pub fn path(&self) -> &ShmPath {
        &self.path
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Drop for Shm<T, Mode> {
    fn drop(&mut self) {
        // SAFETY: ptr/size came from a successful mmap and are unmapped once.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), size_of::<T>());
        }

        if Mode::SHOULD_UNLINK {
            let _ = shm::unlink(self.path.as_str());
        }
    }
}

impl<T: SharedMemorySafe, Mode: ShmMode> Deref for Shm<T, Mode> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the mapping stays valid until drop, and T is safe to share.
        unsafe { self.ptr.as_ref() }
    }
}
