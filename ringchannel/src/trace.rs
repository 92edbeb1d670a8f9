//! Diagnostics for ringchannel.
//!
//! Enable with `--features tracing`. Without the feature every macro below
//! expands to nothing, so send and drain carry no logging cost.

/// Install a compact tracing subscriber for test binaries and the bench.
///
/// The filter comes from `RUST_LOG` and defaults to `ringchannel=trace`.
/// Producer and consumer usually log from different threads, so every line
/// carries the thread id next to an uptime stamp. Safe to call more than
/// once: later calls keep the first subscriber. Does nothing when the
/// `tracing` feature is disabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ringchannel=trace"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use warn_noop as warn;

#[cfg(test)]
mod tests {
    use super::debug;

    #[test]
    fn test_init_tracing_twice() {
        super::init_tracing();
        super::init_tracing();
        debug!(capacity = 4, "after init");
    }
}
