//! In-memory sorted index for a write-optimized storage engine: a
//! probabilistic skip list whose nodes live in a bump-pointer arena.
//! Lookups and iteration are lock-free and may run concurrently with a
//! single in-flight insert.

pub mod comparator;
pub mod mem_allocator;
pub mod skip_list;

pub mod prelude {
    #![allow(unused)]

    pub use crate::comparator::prelude::*;
    pub use crate::mem_allocator::prelude::*;
    pub use crate::skip_list::{SkipList, SkipListIter};
}
