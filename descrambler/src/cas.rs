//! # Conditional-access service interface
//!
//! Vocabulary types and capability traits for the external descrambling
//! service. The service lives outside this crate, behind a transport we do
//! not manage; everything here mirrors the records that cross that
//! boundary: the scrambling-control selector, the service status codes, the
//! shared-memory descriptors, and the outcome of one descramble call.

use crate::shmem::SharedHeap;
use crate::subsample::Subsample;

/// Key/mode selector for one transform, as carried in the scrambling
/// control field of a transport stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScramblingControl {
    /// The payload is not scrambled.
    Unscrambled = 0,
    /// Reserved value; services treat it as they see fit.
    Reserved = 1,
    /// Payload scrambled with the even key.
    EvenKey = 2,
    /// Payload scrambled with the odd key.
    OddKey = 3,
}

impl ScramblingControl {
    /// Maps a raw scrambling-control field value to the selector.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Unscrambled),
            1 => Some(Self::Reserved),
            2 => Some(Self::EvenKey),
            3 => Some(Self::OddKey),
            _ => None,
        }
    }

    /// The raw scrambling-control field value.
    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

/// Status codes a conditional-access service can report.
///
/// The numeric codes are part of the service contract and must not be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CasStatus {
    /// The call succeeded.
    Ok = 0,
    /// No license is available for the content.
    NoLicense = 1,
    /// The license for the content has expired.
    LicenseExpired = 2,
    /// The referenced descrambling session was never opened.
    SessionNotOpened = 3,
    /// The service cannot handle the request as given.
    CannotHandle = 4,
    /// The service is in a state where the operation is not permitted.
    InvalidState = 5,
    /// An argument was rejected by the service.
    BadValue = 6,
    /// The device has not been provisioned for this service.
    NotProvisioned = 7,
    /// A required service resource is busy.
    ResourceBusy = 8,
    /// The output protection level is insufficient for the content.
    InsufficientOutputProtection = 9,
    /// The service detected tampering.
    TamperDetected = 10,
    /// The device has been revoked and can no longer descramble.
    DeviceRevoked = 11,
    /// The decrypt unit has not been initialized.
    DecryptUnitNotInitialized = 12,
    /// Decryption failed.
    Decrypt = 13,
    /// Failure with no more specific code. Also used locally when the
    /// service claims success but its reported output size is implausible.
    Unknown = 14,
}

impl CasStatus {
    /// The wire code for this status.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Maps a wire code back to a status.
    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => Self::Ok,
            1 => Self::NoLicense,
            2 => Self::LicenseExpired,
            3 => Self::SessionNotOpened,
            4 => Self::CannotHandle,
            5 => Self::InvalidState,
            6 => Self::BadValue,
            7 => Self::NotProvisioned,
            8 => Self::ResourceBusy,
            9 => Self::InsufficientOutputProtection,
            10 => Self::TamperDetected,
            11 => Self::DeviceRevoked,
            12 => Self::DecryptUnitNotInitialized,
            13 => Self::Decrypt,
            14 => Self::Unknown,
            _ => return None,
        };
        Some(status)
    }

    /// Whether this status reports success.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl std::fmt::Display for CasStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (code {})", self, self.code())
    }
}

/// Descriptor for a byte range inside a shared transport region.
///
/// The layout, a heap reference plus offset and size, mirrors the record
/// the service consumes. The descriptor always spans the region it was
/// built over; the subsample list bounds how much of it a transform uses.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    /// Handle to the region the bytes live in.
    pub heap: SharedHeap,
    /// Start of the range within the region.
    pub offset: u64,
    /// Length of the range in bytes.
    pub size: u64,
}

impl SharedBuffer {
    /// A descriptor spanning the whole of `heap`.
    pub fn whole(heap: SharedHeap) -> Self {
        let size = heap.size() as u64;
        Self { heap, offset: 0, size }
    }
}

/// Where the service writes its output.
///
/// Secure pipelines deliver output through an opaque platform handle
/// instead of shared memory; that arm is not modeled here, hence the
/// non-exhaustive marker.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum DestinationBuffer {
    /// Output goes to shared memory readable by the caller.
    NonSecure(SharedBuffer),
}

/// Result of one descramble call that reached the service.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DescrambleOutcome {
    /// Status the service reported.
    pub status: CasStatus,
    /// Number of output bytes the service claims to have produced.
    pub bytes_written: u32,
    /// Human-readable diagnostic accompanying a non-OK status. Usually
    /// empty on success.
    pub detail: String,
}

impl DescrambleOutcome {
    /// A successful outcome with `bytes_written` output bytes and no
    /// diagnostic.
    pub fn success(bytes_written: u32) -> Self {
        Self {
            status: CasStatus::Ok,
            bytes_written,
            detail: String::new(),
        }
    }
}

/// A delivery failure between this process and the service.
///
/// Distinct from every [`CasStatus`]: the service either never saw the
/// request or its answer never arrived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    /// A transport error carrying `message` as its diagnostic.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The remote descrambling capability.
///
/// One call performs one transform over bytes the caller has staged in the
/// source descriptor's region. Implementations may read and write the
/// descriptor regions only between invocation and completion of the
/// returned future; the caller guarantees nothing else touches the regions
/// in that span, and assumes the regions are untouched outside it.
#[cfg_attr(any(test, feature = "testing"), mockall::automock())]
pub trait Descrambler: Sync + Send {
    /// Descrambles `subsamples`-described bytes read from `src` at
    /// `src_offset`, writing output to `dst` at `dst_offset`, using the key
    /// selected by `control`.
    ///
    /// `Err` is a transport-level delivery failure. A service-level failure
    /// is an `Ok` outcome with a non-OK status.
    fn descramble<'a>(
        &'a self,
        control: ScramblingControl,
        subsamples: &'a [Subsample],
        src: &'a SharedBuffer,
        src_offset: u64,
        dst: &'a DestinationBuffer,
        dst_offset: u64,
    ) -> impl std::future::Future<Output = Result<DescrambleOutcome, TransportError>> + Send;
}

impl<D: Descrambler> Descrambler for std::sync::Arc<D> {
    fn descramble<'a>(
        &'a self,
        control: ScramblingControl,
        subsamples: &'a [Subsample],
        src: &'a SharedBuffer,
        src_offset: u64,
        dst: &'a DestinationBuffer,
        dst_offset: u64,
    ) -> impl std::future::Future<Output = Result<DescrambleOutcome, TransportError>> + Send {
        self.as_ref()
            .descramble(control, subsamples, src, src_offset, dst, dst_offset)
    }
}

/// Resolves an opaque descrambler handle into a callable service.
///
/// Bindings come from the process's capability registration layer, which
/// stays outside this crate. A binding can go stale, in which case it
/// resolves to nothing.
pub trait DescramblerBinding {
    /// The service type the binding resolves to.
    type Service: Descrambler;

    /// The bound service capability, if the binding is still live.
    fn resolve(&self) -> Option<Self::Service>;
}
