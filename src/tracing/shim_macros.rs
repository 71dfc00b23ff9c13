// Forward to `tracing` when the `build-tracing` feature is enabled, otherwise the
// arguments are discarded without being evaluated.

#[cfg(feature = "build-tracing")]
macro_rules! trace {
    ($($any:tt)*) => {
        ::tracing::trace!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! trace {
    ($($any:tt)*) => {};
}
pub(crate) use trace;

#[cfg(feature = "build-tracing")]
macro_rules! debug {
    ($($any:tt)*) => {
        ::tracing::debug!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! debug {
    ($($any:tt)*) => {};
}
pub(crate) use debug;

#[cfg(feature = "build-tracing")]
macro_rules! info {
    ($($any:tt)*) => {
        ::tracing::info!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! info {
    ($($any:tt)*) => {};
}
pub(crate) use info;

// `warn` collides with the builtin lint attribute when defined directly
#[cfg(feature = "build-tracing")]
macro_rules! warn_ {
    ($($any:tt)*) => {
        ::tracing::warn!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! warn_ {
    ($($any:tt)*) => {};
}
pub(crate) use warn_ as warn;
