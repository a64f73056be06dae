//! # Subsample layout computation
//!
//! A scrambled elementary stream is described to the descrambling service as
//! a sequence of *subsamples*: pairs of byte lengths where the first run of
//! bytes is clear and the second is encrypted. Callers hand us the raw form
//! of that description, a declared count plus up to two parallel signed
//! length arrays, and this module turns it into a validated
//! [`SubsampleBatch`] plus the total transform length.
//!
//! ## Validation
//!
//! The caller-supplied arrays are untrusted. The count must be positive and
//! below [`MAX_SUBSAMPLE_COUNT`], present arrays must hold at least `count`
//! entries, and the running byte total must stay non-negative while it is
//! accumulated in a signed 64-bit counter.
//!
//! ## Overflow detection
//!
//! Each signed 32-bit entry is sign-extended into the 64-bit running total,
//! so a negative entry drags the total negative and the batch is rejected.
//! Batch records store the same entry reinterpreted as an unsigned 32-bit
//! field, which is the type the service consumes. The detector is
//! deliberately conservative rather than precise: a mixture of positive and
//! negative entries whose running total never dips below zero will pass.

use crate::error::Error;

/// Upper bound (exclusive) on the number of subsamples in one transform.
///
/// Chosen so that `count * size_of::<Subsample>()` always fits in a signed
/// 32-bit byte count, which is what the service-side record array is sized
/// with.
pub const MAX_SUBSAMPLE_COUNT: usize = i32::MAX as usize / std::mem::size_of::<Subsample>();

/// One clear/encrypted run pair of a scrambled stream.
///
/// The in-memory layout, two unsigned 32-bit words, mirrors the record the
/// descrambling service consumes and must not change.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Subsample {
    /// Number of leading clear (not scrambled) bytes in this run.
    pub clear_bytes: u32,
    /// Number of scrambled bytes following the clear bytes.
    pub encrypted_bytes: u32,
}

/// Raw, unvalidated subsample description as supplied by a caller.
///
/// `count` declares how many entries to read from each array. A missing
/// array contributes zero for every entry. Arrays are read positionally,
/// so a present array must hold at least `count` entries.
#[derive(Debug, Clone, Copy)]
pub struct SubsampleInfo<'a> {
    /// Declared number of subsamples.
    pub count: i32,
    /// Per-subsample clear byte lengths, if any.
    pub clear: Option<&'a [i32]>,
    /// Per-subsample encrypted byte lengths, if any.
    pub encrypted: Option<&'a [i32]>,
}

/// A validated, ordered subsample list together with its total byte length.
///
/// Construction through [`SubsampleBatch::from_info`] is the only way to get
/// one, so holding a batch implies the count and total have already been
/// checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsampleBatch {
    subsamples: Vec<Subsample>,
    total_length: u64,
}

impl SubsampleBatch {
    /// Validates raw caller input and computes the subsample layout.
    ///
    /// ## Errors
    ///
    /// - [`Error::SubsampleCount`] if the declared count is not positive or
    ///   is `MAX_SUBSAMPLE_COUNT` or more.
    /// - [`Error::SubsampleArrayTooShort`] if a present length array has
    ///   fewer than `count` entries.
    /// - [`Error::SubsampleTotalOverflow`] if the sign-extended running
    ///   total of all lengths ever turns negative.
    pub fn from_info(info: SubsampleInfo<'_>) -> Result<Self, Error> {
        if info.count <= 0 || info.count as usize >= MAX_SUBSAMPLE_COUNT {
            tracing::warn!(count = info.count, "invalid subsample count");
            return Err(Error::SubsampleCount(info.count));
        }
        let count = info.count as usize;

        for lengths in [info.clear, info.encrypted].into_iter().flatten() {
            if lengths.len() < count {
                return Err(Error::SubsampleArrayTooShort {
                    needed: count,
                    len: lengths.len(),
                });
            }
        }

        let mut subsamples = Vec::with_capacity(count);
        let mut total_length: i64 = 0;

        for index in 0..count {
            let clear = info.clear.map_or(0, |lengths| lengths[index]);
            let encrypted = info.encrypted.map_or(0, |lengths| lengths[index]);

            // Sign-extended accumulation; the stored records reinterpret the
            // same values as the unsigned fields the service reads.
            total_length += i64::from(clear) + i64::from(encrypted);
            if total_length < 0 {
                return Err(Error::SubsampleTotalOverflow(total_length));
            }

            subsamples.push(Subsample {
                clear_bytes: clear as u32,
                encrypted_bytes: encrypted as u32,
            });
        }

        Ok(Self {
            subsamples,
            total_length: total_length as u64,
        })
    }

    /// The validated subsample records, in caller order.
    pub fn subsamples(&self) -> &[Subsample] {
        &self.subsamples
    }

    /// Total number of bytes the transform covers, clear plus encrypted.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Number of subsamples in the batch.
    pub fn len(&self) -> usize {
        self.subsamples.len()
    }

    /// Whether the batch holds no subsamples. Never true for a batch built
    /// by [`SubsampleBatch::from_info`], which rejects empty counts.
    pub fn is_empty(&self) -> bool {
        self.subsamples.is_empty()
    }
}
