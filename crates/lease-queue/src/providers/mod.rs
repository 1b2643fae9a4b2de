//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueProvider`
//! trait for different backing stores.

pub mod memory;

pub use memory::InMemoryProvider;
