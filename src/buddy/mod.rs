// src/buddy/mod.rs
//! Power-of-two buddy allocation over an abstract memory region.

pub(crate) mod allocator;

pub use allocator::{BuddyAllocator, BuddyBlock, BuddyConfig};
