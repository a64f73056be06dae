//! In-memory implementations of the [`Descrambler`] trait.
//!
//! [`EchoDescrambler`] behaves like a well-mannered service: it copies the
//! staged bytes from the source descriptor to the destination descriptor
//! and reports every byte written, with a scheduling point in the middle so
//! overlapping callers would be caught. [`FixedOutcomeDescrambler`] and
//! [`FailingDescrambler`] answer without touching any region, for driving
//! the outcome-handling paths.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::cas::Descrambler;
use crate::cas::DescrambleOutcome;
use crate::cas::DestinationBuffer;
use crate::cas::ScramblingControl;
use crate::cas::SharedBuffer;
use crate::cas::TransportError;
use crate::subsample::Subsample;

/// A service that echoes the staged bytes back as its output.
#[derive(Debug, Default)]
pub struct EchoDescrambler {
    calls: AtomicUsize,
    in_flight: AtomicBool,
    overlap: AtomicBool,
}

impl EchoDescrambler {
    /// A fresh echo service with no calls recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of descramble calls the service has received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether two descramble calls were ever in flight at once. The
    /// session contract promises this never happens.
    pub fn saw_overlapping_calls(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }
}

impl Descrambler for EchoDescrambler {
    async fn descramble<'a>(
        &'a self,
        _control: ScramblingControl,
        subsamples: &'a [Subsample],
        src: &'a SharedBuffer,
        src_offset: u64,
        dst: &'a DestinationBuffer,
        dst_offset: u64,
    ) -> Result<DescrambleOutcome, TransportError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        // Hold the call open across a scheduling point so an overlapping
        // caller would be observed.
        tokio::task::yield_now().await;

        let total: u64 = subsamples
            .iter()
            .map(|subsample| u64::from(subsample.clear_bytes) + u64::from(subsample.encrypted_bytes))
            .sum();
        let len = usize::try_from(total).expect("echo transform too large for this platform");

        let DestinationBuffer::NonSecure(out) = dst;
        let src_start = usize::try_from(src.offset + src_offset).expect("source offset overflow");
        let dst_start = usize::try_from(out.offset + dst_offset).expect("destination offset overflow");

        // SAFETY: we are inside a descramble invocation, so the caller
        // guarantees exclusive access to the descriptor regions until the
        // returned future completes.
        unsafe {
            if src.heap.id() == out.heap.id() {
                out.heap
                    .bytes_mut()
                    .copy_within(src_start..src_start + len, dst_start);
            } else {
                out.heap.bytes_mut()[dst_start..dst_start + len]
                    .copy_from_slice(&src.heap.bytes()[src_start..src_start + len]);
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
        Ok(DescrambleOutcome::success(
            u32::try_from(total).expect("echo transform larger than a u32"),
        ))
    }
}

/// A service that answers every call with one fixed outcome and never
/// touches the descriptor regions.
#[derive(Debug)]
pub struct FixedOutcomeDescrambler {
    outcome: DescrambleOutcome,
    calls: AtomicUsize,
}

impl FixedOutcomeDescrambler {
    /// A service that always answers with `outcome`.
    pub fn new(outcome: DescrambleOutcome) -> Self {
        Self { outcome, calls: AtomicUsize::new(0) }
    }

    /// Number of descramble calls the service has received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Descrambler for FixedOutcomeDescrambler {
    async fn descramble<'a>(
        &'a self,
        _control: ScramblingControl,
        _subsamples: &'a [Subsample],
        _src: &'a SharedBuffer,
        _src_offset: u64,
        _dst: &'a DestinationBuffer,
        _dst_offset: u64,
    ) -> Result<DescrambleOutcome, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// A service whose calls always fail at the transport level.
#[derive(Debug)]
pub struct FailingDescrambler {
    message: String,
}

impl FailingDescrambler {
    /// A service whose calls fail with `message` as the transport
    /// diagnostic.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl Descrambler for FailingDescrambler {
    async fn descramble<'a>(
        &'a self,
        _control: ScramblingControl,
        _subsamples: &'a [Subsample],
        _src: &'a SharedBuffer,
        _src_offset: u64,
        _dst: &'a DestinationBuffer,
        _dst_offset: u64,
    ) -> Result<DescrambleOutcome, TransportError> {
        Err(TransportError::new(self.message.clone()))
    }
}
