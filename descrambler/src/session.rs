//! # Descrambling session
//!
//! A [`DescrambleSession`] owns one shared transport region and one remote
//! service capability, and drives one transform at a time: validate the
//! caller's subsample layout and buffer windows, stage the input bytes in
//! the region, make the single remote call, sanity-check the reported
//! output size, and copy the result back out.
//!
//! One async mutex serializes everything from staging to copy-out, which is
//! the sole concurrency control; the region is a pool of exactly one, and a
//! deeper pool keyed by in-flight call would slot in behind the capacity
//! check without changing the call contract. Distinct sessions share
//! nothing.
//!
//! The remote call is awaited while the lock is held. Callers that need
//! parallel transforms use multiple sessions.

use tokio::sync::Mutex;

use crate::buffer::BufferWindow;
use crate::buffer::BufferWindowMut;
use crate::cas::CasStatus;
use crate::cas::Descrambler;
use crate::cas::DescramblerBinding;
use crate::cas::DestinationBuffer;
use crate::cas::ScramblingControl;
use crate::cas::SharedBuffer;
use crate::error::Error;
use crate::shmem::TransportBuffer;
use crate::subsample::SubsampleBatch;
use crate::subsample::SubsampleInfo;

/// Session state guarded by the mutex.
struct State {
    transport: TransportBuffer,
    released: bool,
}

/// A descrambling session over one remote service capability.
pub struct DescrambleSession<D> {
    service: D,
    state: Mutex<State>,
}

/// The caller buffers of one transform, in either split or in-place form.
///
/// The source and destination windows borrow independent storages, so each
/// carries its own storage lifetime.
enum Buffers<'a, 's, 'd> {
    Split {
        src: &'a BufferWindow<'s>,
        dst: &'a mut BufferWindowMut<'d>,
    },
    InPlace {
        buffer: &'a mut BufferWindowMut<'d>,
    },
}

impl<D: Descrambler> DescrambleSession<D> {
    /// A session over `service` with no transport region allocated yet.
    pub fn new(service: D) -> Self {
        Self {
            service,
            state: Mutex::new(State {
                transport: TransportBuffer::new(),
                released: false,
            }),
        }
    }

    /// A session over the service a binding resolves to.
    ///
    /// ## Errors
    ///
    /// [`Error::UnresolvedDescrambler`] if the binding has gone stale and
    /// no longer resolves to a live capability.
    pub fn bind<B>(binding: &B) -> Result<Self, Error>
    where
        B: DescramblerBinding<Service = D>,
    {
        let service = binding.resolve().ok_or(Error::UnresolvedDescrambler)?;
        Ok(Self::new(service))
    }

    /// A session with the transport region pre-grown to hold `capacity`
    /// bytes, so the first transforms up to that size never allocate.
    pub fn with_capacity(service: D, capacity: usize) -> Result<Self, Error> {
        let mut transport = TransportBuffer::new();
        if capacity > 0 {
            transport.ensure_capacity(capacity)?;
        }
        Ok(Self {
            service,
            state: Mutex::new(State { transport, released: false }),
        })
    }

    /// Runs one descrambling transform from `src` into `dst`.
    ///
    /// Returns the number of bytes written into `dst` on success. On any
    /// error the destination window is untouched.
    ///
    /// ## Errors
    ///
    /// Subsample validation failures and window bounds failures surface
    /// before the service is invoked. [`Error::OutOfMemory`] means the
    /// transport region could not grow. [`Error::Transport`] means the call
    /// never completed at the delivery level. [`Error::Service`] carries a
    /// non-OK service status verbatim; a service that claims success with
    /// an implausible output size surfaces as [`CasStatus::Unknown`].
    #[tracing::instrument(skip_all, fields(control = ?control, subsamples = info.count))]
    pub async fn descramble(
        &self,
        control: ScramblingControl,
        info: SubsampleInfo<'_>,
        src: &BufferWindow<'_>,
        dst: &mut BufferWindowMut<'_>,
    ) -> Result<u32, Error> {
        let batch = SubsampleBatch::from_info(info)?;
        self.drive(control, &batch, Buffers::Split { src, dst }).await
    }

    /// Runs one transform reading from and writing to the same window.
    ///
    /// Equivalent to [`DescrambleSession::descramble`] with the destination
    /// window equal to the source window.
    #[tracing::instrument(skip_all, fields(control = ?control, subsamples = info.count))]
    pub async fn descramble_in_place(
        &self,
        control: ScramblingControl,
        info: SubsampleInfo<'_>,
        buffer: &mut BufferWindowMut<'_>,
    ) -> Result<u32, Error> {
        let batch = SubsampleBatch::from_info(info)?;
        self.drive(control, &batch, Buffers::InPlace { buffer }).await
    }

    /// Releases the session: the transport region is dropped and every
    /// later transform fails with [`Error::SessionReleased`].
    ///
    /// Waits for an in-flight transform to finish. Releasing an already
    /// released session is a no-op.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        if !state.released {
            tracing::debug!("releasing descrambling session");
            state.released = true;
            state.transport = TransportBuffer::new();
        }
    }

    /// Current transport region capacity in bytes.
    #[cfg(any(test, feature = "testing"))]
    pub async fn transport_capacity(&self) -> usize {
        self.state.lock().await.transport.capacity()
    }

    async fn drive(
        &self,
        control: ScramblingControl,
        batch: &SubsampleBatch,
        mut buffers: Buffers<'_, '_, '_>,
    ) -> Result<u32, Error> {
        let total = batch.total_length();
        match &buffers {
            Buffers::Split { src, dst } => {
                src.check(total)?;
                dst.check(total)?;
            }
            Buffers::InPlace { buffer } => buffer.check(total)?,
        }

        // A zero-byte transform has exactly one plausible outcome, and the
        // service's answer for it would collide with the invalid-output
        // check below. Answer locally.
        if total == 0 {
            return Ok(0);
        }
        // The window checks above bound the total by a slice length.
        let staged_len = total as usize;

        let mut state = self.state.lock().await;
        if state.released {
            return Err(Error::SessionReleased);
        }

        let heap = state.transport.ensure_capacity(staged_len)?;
        let src_buffer = SharedBuffer::whole(heap.clone());

        let staged = match &buffers {
            Buffers::Split { src, .. } => src.require(total)?,
            Buffers::InPlace { buffer } => buffer.require(total)?,
        };
        // SAFETY: the session lock is held and no call is in flight, so
        // this session holds the region's access slot exclusively.
        unsafe {
            src_buffer.heap.bytes_mut()[..staged_len].copy_from_slice(staged);
        }

        let dst_buffer = DestinationBuffer::NonSecure(src_buffer.clone());
        let outcome = match self
            .service
            .descramble(control, batch.subsamples(), &src_buffer, 0, &dst_buffer, 0)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%error, "descramble call failed at the transport level");
                return Err(Error::Transport(error));
            }
        };

        if !outcome.status.is_ok() {
            return Err(Error::Service {
                status: outcome.status,
                detail: outcome.detail,
            });
        }

        let written = u64::from(outcome.bytes_written);
        if outcome.bytes_written == 0 || written > total {
            // The service vouched for an output size that cannot be right,
            // so the region contents cannot be trusted either.
            tracing::warn!(
                bytes_written = outcome.bytes_written,
                total_length = total,
                "service claimed success with an implausible output size"
            );
            return Err(Error::Service {
                status: CasStatus::Unknown,
                detail: format!(
                    "service claimed success but reported {} of {} bytes written",
                    outcome.bytes_written, total
                ),
            });
        }

        let output = match &mut buffers {
            Buffers::Split { dst, .. } => dst.require_mut(written)?,
            Buffers::InPlace { buffer } => buffer.require_mut(written)?,
        };
        // SAFETY: still under the session lock, and the service call has
        // completed, so the access slot is back with this session.
        unsafe {
            output.copy_from_slice(&src_buffer.heap.bytes()[..outcome.bytes_written as usize]);
        }

        Ok(outcome.bytes_written)
    }
}
