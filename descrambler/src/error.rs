//! Top-level error type for the descrambler library
//!
//! Variants are granular, but they fall into a small number of classes
//! that callers dispatch on: invalid caller input ([`Error::SubsampleCount`],
//! [`Error::SubsampleArrayTooShort`], [`Error::SubsampleTotalOverflow`],
//! [`Error::InvalidWindow`]), out-of-range buffer access
//! ([`Error::ByteRangeOutOfBounds`]), allocation failure
//! ([`Error::OutOfMemory`]), transport-level delivery failure
//! ([`Error::Transport`]), an error reported by the service itself
//! ([`Error::Service`]), and session lifecycle misuse
//! ([`Error::UnresolvedDescrambler`], [`Error::SessionReleased`]).

use crate::cas::CasStatus;
use crate::cas::TransportError;

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A checked buffer access fell outside the window's `[offset, limit)`
    /// range, or the offset plus required length overflowed.
    #[error("byte range out of bounds: offset {offset} + required {required} exceeds limit {limit}")]
    ByteRangeOutOfBounds {
        /// Start of the access within the underlying storage.
        offset: usize,
        /// Exclusive upper bound of the window.
        limit: usize,
        /// Number of bytes the operation needed.
        required: u64,
    },
    /// A buffer window was constructed with an inconsistent offset/limit
    /// pair.
    #[error("invalid buffer window: offset {offset}, limit {limit}, storage length {len}")]
    InvalidWindow {
        /// Requested start of the window.
        offset: usize,
        /// Requested exclusive upper bound of the window.
        limit: usize,
        /// Length of the underlying storage.
        len: usize,
    },
    /// Growing the shared transport buffer failed. Carries the requested
    /// size in bytes, before any rounding. The previously allocated region,
    /// if any, is still intact and usable.
    #[error("could not grow the shared transport buffer to {0} bytes")]
    OutOfMemory(usize),
    /// The descrambling service executed the request and reported a non-OK
    /// status.
    #[error("descrambling service error ({status}): {detail}")]
    Service {
        /// Status reported by the service.
        status: CasStatus,
        /// Human-readable diagnostic supplied by the service.
        detail: String,
    },
    /// The session was released; no further transforms are possible.
    #[error("descrambling session has been released")]
    SessionReleased,
    /// A subsample length array was present but shorter than the declared
    /// subsample count.
    #[error("subsample length array holds {len} entries but {needed} are required")]
    SubsampleArrayTooShort {
        /// Entries required by the declared subsample count.
        needed: usize,
        /// Entries actually present.
        len: usize,
    },
    /// The declared subsample count was out of range.
    #[error("subsample count out of range: {0}")]
    SubsampleCount(i32),
    /// The running total of subsample lengths turned negative, which means
    /// the caller-supplied lengths overflowed the transform size.
    #[error("subsample lengths overflowed the total transform size: {0}")]
    SubsampleTotalOverflow(i64),
    /// The remote call could not be delivered or completed at the transport
    /// level. Distinct from every status the service can report.
    #[error("descrambler transport failure: {0}")]
    Transport(#[source] TransportError),
    /// The descrambler binding did not resolve to a live service capability.
    #[error("descrambler binding did not resolve to a service")]
    UnresolvedDescrambler,
}
