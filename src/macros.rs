//! Crate-local logging macros.
//!
//! These expand to [`tracing`] events when the `tracing` feature is enabled
//! and to nothing otherwise, so call sites stay free of `cfg` noise.

#[cfg(feature = "tracing")]
macro_rules! rtrace {
    ($($arg:tt)*) => { tracing::trace!(target: "realizer", $($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! rtrace {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "tracing")]
macro_rules! rdebug {
    ($($arg:tt)*) => { tracing::debug!(target: "realizer", $($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! rdebug {
    ($($arg:tt)*) => {{}};
}

#[cfg(feature = "tracing")]
macro_rules! rwarn {
    ($($arg:tt)*) => { tracing::warn!(target: "realizer", $($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! rwarn {
    ($($arg:tt)*) => {{}};
}

pub(crate) use {rdebug, rtrace, rwarn};
