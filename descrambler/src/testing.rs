//! Test utilities.
//!
//! In-memory descrambling services for exercising sessions without a real
//! conditional-access backend. For interaction-style assertions (call
//! counts, argument shapes) use the generated `MockDescrambler` instead.

pub mod service;
