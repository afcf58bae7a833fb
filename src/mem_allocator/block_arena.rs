use std::{alloc::Layout, mem, ptr::NonNull};

use parking_lot::Mutex;
use tracing::trace;

use super::MemAllocator;

const BLOCK_SIZE: usize = 4096;
const ITEM_SIZE: usize = mem::size_of::<u64>();

// Each block is tracked by one pointer-sized slot in `blocks`; charge that
// to usage along with the payload.
const BLOCK_OVERHEAD: usize = mem::size_of::<usize>();

struct BlockArenaInner {
    blocks: Vec<Vec<u64>>,
    ptr: *mut u8,
    remaining: usize,
    memory_usage: usize,
}

impl BlockArenaInner {
    fn alloc(&mut self, bytes: usize) -> NonNull<u8> {
        if bytes <= self.remaining {
            let result = self.ptr;
            self.ptr = self.ptr.wrapping_add(bytes);
            self.remaining -= bytes;
            return non_null(result);
        }
        self.alloc_fallback(bytes)
    }

    fn alloc_fallback(&mut self, bytes: usize) -> NonNull<u8> {
        if bytes > BLOCK_SIZE / 4 {
            // More than a quarter of a block. A dedicated block keeps the
            // tail of the current one usable for smaller requests.
            return self.new_block(bytes);
        }

        // Abandon whatever is left of the current block.
        let block = self.new_block(BLOCK_SIZE);
        self.ptr = block.as_ptr().wrapping_add(bytes);
        self.remaining = BLOCK_SIZE - bytes;
        block
    }

    fn alloc_aligned(&mut self, bytes: usize, align: usize) -> NonNull<u8> {
        assert!(align.is_power_of_two());

        let slop = align_slop(self.ptr as usize, align);
        if bytes + slop <= self.remaining {
            let result = self.ptr.wrapping_add(slop);
            self.ptr = result.wrapping_add(bytes);
            self.remaining -= bytes + slop;
            return aligned_non_null(result, align);
        }

        // Fresh blocks sit on a u64 boundary; anything wider folds padding
        // headroom into the request.
        let headroom = align.saturating_sub(ITEM_SIZE);
        if bytes + headroom > BLOCK_SIZE / 4 {
            let block = self.new_block(bytes + headroom);
            let slop = align_slop(block.as_ptr() as usize, align);
            return aligned_non_null(block.as_ptr().wrapping_add(slop), align);
        }

        let block = self.new_block(BLOCK_SIZE);
        let slop = align_slop(block.as_ptr() as usize, align);
        let result = block.as_ptr().wrapping_add(slop);
        self.ptr = result.wrapping_add(bytes);
        self.remaining = BLOCK_SIZE - bytes - slop;
        aligned_non_null(result, align)
    }

    fn new_block(&mut self, block_bytes: usize) -> NonNull<u8> {
        let items = block_bytes.div_ceil(ITEM_SIZE);
        let block = vec![0u64; items];
        let ptr = block.as_ptr() as *mut u8;

        // The Vec's buffer never moves once pushed; only the tracking
        // vector reallocates as the arena grows.
        self.blocks.push(block);
        self.memory_usage += items * ITEM_SIZE + BLOCK_OVERHEAD;

        trace!(bytes = items * ITEM_SIZE, "arena claimed a new block");
        non_null(ptr)
    }
}

fn align_slop(addr: usize, align: usize) -> usize {
    let current_mod = addr & (align - 1);
    if current_mod == 0 { 0 } else { align - current_mod }
}

fn non_null(ptr: *mut u8) -> NonNull<u8> {
    NonNull::new(ptr).expect("arena handed out a null pointer")
}

fn aligned_non_null(ptr: *mut u8, align: usize) -> NonNull<u8> {
    assert_eq!(ptr as usize & (align - 1), 0);
    non_null(ptr)
}

/// Bump-pointer arena. Dispenses byte ranges out of 4 KiB blocks (oversized
/// requests get a dedicated block) and frees everything in one pass when
/// dropped. Every returned address stays fixed for the arena's lifetime.
pub struct BlockArena {
    inner: Mutex<BlockArenaInner>,
}

// The cursor in `inner` points into blocks owned by the same inner value,
// and all access goes through the mutex.
unsafe impl Send for BlockArena {}
unsafe impl Sync for BlockArena {}

impl BlockArena {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BlockArenaInner {
                blocks: Vec::new(),
                ptr: std::ptr::null_mut(),
                remaining: 0,
                memory_usage: 0,
            }),
        }
    }

    /// Returns `bytes` fresh bytes with no particular alignment.
    pub fn alloc(&self, bytes: usize) -> NonNull<u8> {
        assert!(bytes > 0);
        self.inner.lock().alloc(bytes)
    }

    /// As [`alloc`](Self::alloc), but the result is pointer-size aligned.
    pub fn alloc_aligned(&self, bytes: usize) -> NonNull<u8> {
        assert!(bytes > 0);
        self.inner.lock().alloc_aligned(bytes, mem::size_of::<usize>())
    }

    /// Cumulative bytes claimed across all blocks, bookkeeping included.
    pub fn memory_usage(&self) -> usize {
        self.inner.lock().memory_usage
    }
}

impl Default for BlockArena {
    fn default() -> Self {
        Self::new()
    }
}

impl MemAllocator for BlockArena {
    unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        assert!(layout.size() > 0);
        self.inner
            .lock()
            .alloc_aligned(layout.size(), layout.align())
            .as_ptr()
    }

    fn mem_usage(&self) -> usize {
        self.memory_usage()
    }
}
