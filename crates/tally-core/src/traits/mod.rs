//! Core traits for the tally system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`CountSource`]: Fetch one source's current count
//! - [`Publisher`]: Persist a changed aggregate

pub mod count_source;
pub mod publisher;

pub use count_source::{CountSource, CountSourceFactory};
pub use publisher::Publisher;
