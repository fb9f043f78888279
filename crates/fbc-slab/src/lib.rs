//! Fixed-size slab allocator and scope-aware memory manager.
//!
//! [`pool`] implements the slab pool (free-list allocator with per-pool
//! statistics and leak detection). [`samm`] implements the scope-aware
//! memory manager built on top of a handful of pools, used by the code
//! generator to decide where allocations are tracked and released.

pub mod pool;
pub mod samm;

pub use pool::{PoolError, PoolStats, SlabPool};
pub use samm::{Samm, SammError, TrackedClass};
