//! # Caller buffer windows
//!
//! Transform input and output are carved out of caller-owned byte storage as
//! `[offset, limit)` windows. A window is validated once at construction
//! (`offset <= limit <= storage length`) and every per-operation access goes
//! through a checked `require` that proves `offset + required <= limit` in
//! overflow-safe 64-bit arithmetic before any byte is touched.
//!
//! Windows borrow their storage, so access is scoped to one operation and
//! ends on every exit path by construction; there is no acquire/release
//! pairing to get wrong.

use crate::error::Error;

/// A validated read-only `[offset, limit)` window over caller bytes.
#[derive(Debug, Clone, Copy)]
pub struct BufferWindow<'a> {
    bytes: &'a [u8],
    offset: usize,
    limit: usize,
}

impl<'a> BufferWindow<'a> {
    /// Creates a window after checking `offset <= limit <= bytes.len()`.
    pub fn new(bytes: &'a [u8], offset: usize, limit: usize) -> Result<Self, Error> {
        check_window(bytes.len(), offset, limit)?;
        Ok(Self { bytes, offset, limit })
    }

    /// A window spanning the entire slice.
    pub fn full(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0, limit: bytes.len() }
    }

    /// Start of the window within the underlying storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Exclusive upper bound of the window.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of addressable bytes in the window.
    pub fn remaining(&self) -> usize {
        self.limit - self.offset
    }

    /// Checks that `required` bytes fit in the window without touching them.
    pub fn check(&self, required: u64) -> Result<(), Error> {
        check_range(self.offset, self.limit, required)
    }

    /// Returns exactly `required` bytes from the window start, or fails
    /// without reading anything.
    pub fn require(&self, required: u64) -> Result<&'a [u8], Error> {
        check_range(self.offset, self.limit, required)?;
        Ok(&self.bytes[self.offset..self.offset + required as usize])
    }
}

/// A validated mutable `[offset, limit)` window over caller bytes.
#[derive(Debug)]
pub struct BufferWindowMut<'a> {
    bytes: &'a mut [u8],
    offset: usize,
    limit: usize,
}

impl<'a> BufferWindowMut<'a> {
    /// Creates a window after checking `offset <= limit <= bytes.len()`.
    pub fn new(bytes: &'a mut [u8], offset: usize, limit: usize) -> Result<Self, Error> {
        check_window(bytes.len(), offset, limit)?;
        Ok(Self { bytes, offset, limit })
    }

    /// A window spanning the entire slice.
    pub fn full(bytes: &'a mut [u8]) -> Self {
        let limit = bytes.len();
        Self { bytes, offset: 0, limit }
    }

    /// Start of the window within the underlying storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Exclusive upper bound of the window.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of addressable bytes in the window.
    pub fn remaining(&self) -> usize {
        self.limit - self.offset
    }

    /// Checks that `required` bytes fit in the window without touching them.
    pub fn check(&self, required: u64) -> Result<(), Error> {
        check_range(self.offset, self.limit, required)
    }

    /// Returns exactly `required` bytes from the window start for reading,
    /// or fails without reading anything.
    pub fn require(&self, required: u64) -> Result<&[u8], Error> {
        check_range(self.offset, self.limit, required)?;
        Ok(&self.bytes[self.offset..self.offset + required as usize])
    }

    /// Returns exactly `required` bytes from the window start for writing,
    /// or fails without writing anything.
    pub fn require_mut(&mut self, required: u64) -> Result<&mut [u8], Error> {
        check_range(self.offset, self.limit, required)?;
        Ok(&mut self.bytes[self.offset..self.offset + required as usize])
    }
}

fn check_window(len: usize, offset: usize, limit: usize) -> Result<(), Error> {
    if offset > limit || limit > len {
        return Err(Error::InvalidWindow { offset, limit, len });
    }
    Ok(())
}

fn check_range(offset: usize, limit: usize, required: u64) -> Result<(), Error> {
    let out_of_bounds = Error::ByteRangeOutOfBounds { offset, limit, required };
    match (offset as u64).checked_add(required) {
        Some(end) if end <= limit as u64 => Ok(()),
        _ => Err(out_of_bounds),
    }
}
