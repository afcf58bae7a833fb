use std::{
    alloc::Layout,
    sync::atomic::{AtomicUsize, Ordering::*},
};

use parking_lot::Mutex;

use super::MemAllocator;

/// Plain-heap allocator with the same allocate-only contract as the arena:
/// every allocation lives until the allocator drops, then everything is
/// released in one pass. Mostly useful to exercise the allocator seam.
#[derive(Debug, Default)]
pub struct DefaultAllocator {
    allocations: Mutex<Vec<(*mut u8, Layout)>>,
    mem_alloc: AtomicUsize,
}

unsafe impl Send for DefaultAllocator {}
unsafe impl Sync for DefaultAllocator {}

impl MemAllocator for DefaultAllocator {
    unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { std::alloc::alloc(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        self.allocations.lock().push((ptr, layout));
        self.mem_alloc.fetch_add(layout.size(), SeqCst);
        ptr
    }

    fn mem_usage(&self) -> usize {
        self.mem_alloc.load(SeqCst)
    }
}

impl Drop for DefaultAllocator {
    fn drop(&mut self) {
        for (ptr, layout) in self.allocations.get_mut().iter() {
            unsafe {
                std::alloc::dealloc(*ptr, *layout);
            }
        }
    }
}
