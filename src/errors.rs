//! Error Types
//!
//! The crate distinguishes two failure layers:
//!
//! - [`DriverError`]: a wrapped native-driver primitive failed. These are
//!   produced by [`GlDriver`](crate::driver::GlDriver) implementations and are
//!   logged and translated to sentinel returns (`0` handle / `false`) at the
//!   registry boundary.
//! - [`MuxError`]: a fatal condition during construction/initialization,
//!   where a `Result` is the right shape. A running registry never surfaces
//!   these; bad handles and data-plane validation failures are reported as
//!   sentinel values, never as errors.

use thiserror::Error;

/// Errors produced by the native-driver facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// An operation referenced a native id the driver does not know.
    #[error("unknown native {0} id")]
    UnknownId(&'static str),

    /// An operation referenced a configuration id the driver does not know.
    #[error("unknown config id")]
    UnknownConfig,

    /// The driver rejected a current-state switch.
    #[error("make-current rejected by the native driver")]
    MakeCurrentRejected,

    /// An operation that requires a current context/surface ran without one.
    #[error("no current context")]
    NoCurrent,

    /// The driver could not allocate a native object.
    #[error("native allocation failed: {0}")]
    Allocation(&'static str),

    /// The driver does not implement the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Result alias for driver-facade calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// The main error type for the multiplexer.
///
/// Only construction and initialization return these; see the module docs
/// for the propagation policy on a running registry.
#[derive(Error, Debug)]
pub enum MuxError {
    // ========================================================================
    // Initialization errors
    // ========================================================================
    /// A capability the registry cannot run without is missing.
    #[error("required capability missing: {0}")]
    MissingCapability(&'static str),

    /// The driver exposes no configuration usable by legacy-API clients.
    #[error("no framebuffer config supports the legacy API")]
    NoLegacyConfig,

    // ========================================================================
    // Native layer
    // ========================================================================
    /// A native-driver call failed during initialization.
    #[error("native driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Result alias used by fallible constructors.
pub type Result<T> = std::result::Result<T, MuxError>;
