use std::{alloc::Layout, sync::Arc};

mod block_arena;
mod default_allocator;

pub mod prelude {
    #![allow(unused)]

    pub use super::MemAllocator;
    pub use super::block_arena::BlockArena;
    pub use super::default_allocator::DefaultAllocator;
}

/// Allocation seam between the skip list and whatever owns its memory.
///
/// Implementations hand out raw memory that stays at a fixed address until
/// the allocator itself is dropped. There is no per-object free; a failed
/// underlying allocation is fatal, never a recoverable error.
pub trait MemAllocator: Send + Sync {
    /// # Safety
    ///
    /// `layout` must have a non-zero size. The returned pointer is never
    /// null, satisfies `layout.align()`, and stays valid until `self` is
    /// dropped. The caller runs destructors for anything it constructs in
    /// the allocation; the allocator only reclaims raw bytes.
    unsafe fn allocate(&self, layout: Layout) -> *mut u8;

    /// Cumulative bytes claimed from the underlying allocator. Never
    /// decreases while `self` is alive.
    fn mem_usage(&self) -> usize;
}

impl<'a, A: MemAllocator> MemAllocator for &'a A {
    unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        unsafe { (**self).allocate(layout) }
    }

    fn mem_usage(&self) -> usize {
        (**self).mem_usage()
    }
}

impl<A: MemAllocator> MemAllocator for Arc<A> {
    unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        unsafe { (**self).allocate(layout) }
    }

    fn mem_usage(&self) -> usize {
        (**self).mem_usage()
    }
}
