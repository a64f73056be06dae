#![deny(missing_docs)]

//! # Descrambler sessions library
//!
//! This library drives one-shot descrambling transforms against an external
//! conditional-access service that exchanges bytes through shared memory.
//! [`session::DescrambleSession`] is the entry point: it validates the
//! caller's subsample layout ([`subsample`]) and buffer windows
//! ([`buffer`]), stages input in a lazily grown shared region ([`shmem`]),
//! makes exactly one remote call per transform over the [`cas::Descrambler`]
//! capability, and copies the validated output back out.
//!
//! The descrambling algorithm, the service lifecycle, and the process-wide
//! capability registry all live outside this crate.

pub mod buffer;
pub mod cas;
pub mod error;
pub mod session;
pub mod shmem;
pub mod subsample;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
