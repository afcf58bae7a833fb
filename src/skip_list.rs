use std::{
    alloc::Layout,
    cmp::Ordering::*,
    mem,
    ptr::{self, NonNull, addr_of_mut, null_mut},
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering::*},
};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tracing::trace;

use crate::{comparator::Comparator, mem_allocator::MemAllocator};

const MAX_HEIGHT: usize = 20;
const BRANCHING: u32 = 4;

/// A tower of forward pointers plus the key, allocated in one piece.
///
/// The struct is declared with the full `MAX_HEIGHT` tower, but a node of
/// height `h` is allocated with only `h` trailing slots; levels past the
/// sampled height must never be touched. Key and height are immutable once
/// the node is built, only tower slots are rewritten as later inserts
/// splice in ahead of it.
#[repr(C)]
struct Node<K> {
    key: K,
    tower: [AtomicPtr<Self>; MAX_HEIGHT],
}

impl<K> Node<K> {
    /// Pairs with the `Release` store in [`set_next`](Self::set_next): a
    /// reader that observes the pointer also observes the fully written
    /// node behind it.
    fn next(&self, level: usize) -> *mut Self {
        self.tower[level].load(Acquire)
    }

    fn set_next(&self, level: usize, node: *mut Self) {
        self.tower[level].store(node, Release);
    }

    // Writer-only accessors. The single writer is the only thread that
    // mutates the list, so its own reads and pre-publication writes need
    // no ordering of their own.
    fn next_relaxed(&self, level: usize) -> *mut Self {
        self.tower[level].load(Relaxed)
    }

    fn set_next_relaxed(&self, level: usize, node: *mut Self) {
        self.tower[level].store(node, Relaxed);
    }

    fn layout(height: usize) -> Layout {
        assert!((1..=MAX_HEIGHT).contains(&height));
        let size =
            mem::size_of::<Self>() - mem::size_of::<AtomicPtr<Self>>() * (MAX_HEIGHT - height);
        let align = mem::align_of::<Self>();
        Layout::from_size_align(size, align)
            .unwrap_or_else(|_| panic!("bad node layout, size: {size}, align: {align}"))
    }

    fn new_in(key: K, height: usize, allocator: &impl MemAllocator) -> *mut Self {
        unsafe {
            let p = allocator.allocate(Self::layout(height)) as *mut Self;
            assert!(!p.is_null());

            ptr::write(addr_of_mut!((*p).key), key);
            ptr::write_bytes(addr_of_mut!((*p).tower) as *mut AtomicPtr<Self>, 0, height);
            p
        }
    }

    /// Head sentinel: full tower, key left uninitialized and never read.
    fn new_head(allocator: &impl MemAllocator) -> *mut Self {
        unsafe {
            let p = allocator.allocate(Self::layout(MAX_HEIGHT)) as *mut Self;
            assert!(!p.is_null());

            ptr::write_bytes(
                addr_of_mut!((*p).tower) as *mut AtomicPtr<Self>,
                0,
                MAX_HEIGHT,
            );
            p
        }
    }
}

/// Probabilistically balanced ordered list over arena-allocated nodes.
///
/// One insert may be in flight at a time; callers serialize writers.
/// Any number of threads may run [`contains`](Self::contains) or iterate
/// concurrently with that insert, without locks. Nodes are never removed;
/// the backing memory is released only when the allocator is torn down,
/// so the list must not outlive `A`'s target.
pub struct SkipList<K, C, A> {
    head: NonNull<Node<K>>,
    /// Effective height. Only grows, never past `MAX_HEIGHT`.
    height: AtomicUsize,
    cmp: C,
    allocator: A,
    rng: Mutex<SmallRng>,
}

unsafe impl<K, C, A> Send for SkipList<K, C, A>
where
    K: Send,
    C: Send,
    A: Send,
{
}

unsafe impl<K, C, A> Sync for SkipList<K, C, A>
where
    K: Sync,
    C: Sync,
    A: Sync,
{
}

impl<K, C, A> SkipList<K, C, A>
where
    C: Comparator<Item = K>,
    A: MemAllocator,
{
    pub fn new(cmp: C, allocator: A) -> Self {
        Self::with_seed(cmp, allocator, rand::random())
    }

    /// Seeds the height sampler, making node heights (and therefore arena
    /// usage) reproducible for a given insert sequence.
    pub fn with_seed(cmp: C, allocator: A, seed: u64) -> Self {
        let head = Node::new_head(&allocator);
        SkipList {
            head: NonNull::new(head).expect("allocator returned a null head"),
            height: AtomicUsize::new(1),
            cmp,
            allocator,
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    fn height(&self) -> usize {
        self.height.load(Acquire)
    }

    /// Geometric height in `1..=MAX_HEIGHT`, branching factor 4.
    fn random_height(&self) -> usize {
        let mut rng = self.rng.lock();
        let mut h = 1;
        while h < MAX_HEIGHT && rng.random::<u32>() % BRANCHING == 0 {
            h += 1;
        }
        h
    }

    /// Inserts `key` into the list.
    ///
    /// Requires that no equal key is present (uniqueness is the caller's
    /// contract, checked only in debug builds) and that no other insert
    /// is in flight.
    pub fn insert(&self, key: K) {
        let mut prev = [null_mut(); MAX_HEIGHT];
        let next = self.find_greater_or_equal(&key, Some(&mut prev));
        debug_assert!(
            next.is_null() || self.cmp.compare(unsafe { &(*next).key }, &key) != Equal,
            "duplicate key inserted into skip list"
        );

        let height = self.random_height();
        let list_height = self.height();
        if height > list_height {
            for slot in prev.iter_mut().take(height).skip(list_height) {
                *slot = self.head.as_ptr();
            }
            // Readers that still see the old height just start their
            // descent one level lower; readers that see the new one find
            // null head slots until the node below is published.
            self.height.store(height, Release);
            trace!(from = list_height, to = height, "raised skip list height");
        }

        let node_ptr = Node::new_in(key, height, &self.allocator);
        let node = unsafe { &*node_ptr };
        for (level, &pred) in prev.iter().enumerate().take(height) {
            unsafe {
                // The new node is unreachable until the predecessor slot
                // is released below, so its own link can be a plain store.
                node.set_next_relaxed(level, (*pred).next_relaxed(level));
                (*pred).set_next(level, node_ptr);
            }
        }
    }

    /// Lock-free point lookup: true iff a key comparing equal is present.
    pub fn contains(&self, key: &K) -> bool {
        let node = self.find_greater_or_equal(key, None);
        !node.is_null() && self.cmp.compare(unsafe { &(*node).key }, key) == Equal
    }

    /// Bytes claimed by the backing allocator so far.
    pub fn mem_usage(&self) -> usize {
        self.allocator.mem_usage()
    }

    pub fn iter(&self) -> SkipListIter<'_, K, C, A> {
        SkipListIter::new(self)
    }

    /// First node with key >= `key`, or null. When `prev` is given, records
    /// the predecessor at every level on the way down; this is the search
    /// phase shared by insert, lookup and seek.
    fn find_greater_or_equal(
        &self,
        key: &K,
        mut prev: Option<&mut [*mut Node<K>; MAX_HEIGHT]>,
    ) -> *mut Node<K> {
        unsafe {
            let mut cur = self.head.as_ptr();
            let mut level = self.height() - 1;
            loop {
                let next = (*cur).next(level);
                if !next.is_null() && self.cmp.compare(&(*next).key, key) == Less {
                    cur = next;
                    continue;
                }

                if let Some(prev) = prev.as_mut() {
                    prev[level] = cur;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Last node with key < `key`, or null if every key is >= `key`.
    fn find_less_than(&self, key: &K) -> *mut Node<K> {
        unsafe {
            let head = self.head.as_ptr();
            let mut cur = head;
            let mut level = self.height() - 1;
            loop {
                let next = (*cur).next(level);
                if !next.is_null() && self.cmp.compare(&(*next).key, key) == Less {
                    cur = next;
                    continue;
                }

                if level == 0 {
                    return if ptr::eq(cur, head) { null_mut() } else { cur };
                }
                level -= 1;
            }
        }
    }

    /// Rightmost node, or null if the list is empty.
    fn find_last(&self) -> *mut Node<K> {
        unsafe {
            let head = self.head.as_ptr();
            let mut cur = head;
            let mut level = self.height() - 1;
            loop {
                let next = (*cur).next(level);
                if !next.is_null() {
                    cur = next;
                    continue;
                }

                if level == 0 {
                    return if ptr::eq(cur, head) { null_mut() } else { cur };
                }
                level -= 1;
            }
        }
    }
}

impl<K, C, A> Drop for SkipList<K, C, A> {
    fn drop(&mut self) {
        // The allocator reclaims raw node memory but never runs key
        // destructors; walk level 0 and drop every key by hand. The head's
        // key slot was never initialized and must stay untouched.
        unsafe {
            let mut cur = (*self.head.as_ptr()).next_relaxed(0);
            while !cur.is_null() {
                let next = (*cur).next_relaxed(0);
                ptr::drop_in_place(addr_of_mut!((*cur).key));
                cur = next;
            }
        }
    }
}

/// Cursor over a [`SkipList`]. Starts invalid; every positioning call on an
/// empty list leaves it invalid.
pub struct SkipListIter<'a, K, C, A> {
    list: &'a SkipList<K, C, A>,
    node: *mut Node<K>,
}

unsafe impl<K, C, A> Send for SkipListIter<'_, K, C, A>
where
    K: Sync,
    C: Sync,
    A: Sync,
{
}

unsafe impl<K, C, A> Sync for SkipListIter<'_, K, C, A>
where
    K: Sync,
    C: Sync,
    A: Sync,
{
}

impl<'a, K, C, A> SkipListIter<'a, K, C, A>
where
    C: Comparator<Item = K>,
    A: MemAllocator,
{
    pub fn new(list: &'a SkipList<K, C, A>) -> Self {
        SkipListIter {
            list,
            node: null_mut(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Key under the cursor, `None` while invalid. The reference stays
    /// usable after the cursor moves on; nodes are immutable once linked.
    pub fn key(&self) -> Option<&'a K> {
        if self.is_valid() {
            unsafe { Some(&(*self.node).key) }
        } else {
            None
        }
    }

    pub fn next(&mut self) {
        assert!(self.is_valid());
        self.node = unsafe { (*self.node).next(0) };
    }

    /// Steps back by re-searching from the head; nodes carry no back
    /// links, so this is O(log n) rather than O(1).
    pub fn prev(&mut self) {
        assert!(self.is_valid());
        self.node = self.list.find_less_than(unsafe { &(*self.node).key });
    }

    /// Positions on the first key >= `target`, invalid if none.
    pub fn seek(&mut self, target: &K) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    pub fn seek_to_first(&mut self) {
        self.node = unsafe { (*self.list.head.as_ptr()).next(0) };
    }

    pub fn seek_to_last(&mut self) {
        self.node = self.list.find_last();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering::*},
    };

    use bytes::Bytes;
    use rand::{SeedableRng, rngs::SmallRng, seq::SliceRandom};

    use crate::{comparator::prelude::*, mem_allocator::prelude::*};

    use super::SkipList;

    fn init_tracing() {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    }

    #[test]
    fn empty_list() {
        let arena = BlockArena::new();
        let list = SkipList::new(DefaultComparator::<u64>::default(), &arena);

        assert!(!list.contains(&10));

        let mut iter = list.iter();
        assert!(!iter.is_valid());
        iter.seek_to_first();
        assert!(!iter.is_valid());
        iter.seek(&100);
        assert!(!iter.is_valid());
        iter.seek_to_last();
        assert!(!iter.is_valid());
        assert_eq!(iter.key(), None);
    }

    #[test]
    fn point_and_range_queries_small() {
        let arena = BlockArena::new();
        let list = SkipList::new(DefaultComparator::<u64>::default(), &arena);
        for key in [5, 1, 3] {
            list.insert(key);
        }

        assert!(list.contains(&3));
        assert!(!list.contains(&2));

        let mut iter = list.iter();
        iter.seek_to_first();
        assert_eq!(iter.key(), Some(&1));
        iter.next();
        assert_eq!(iter.key(), Some(&3));
        iter.next();
        assert_eq!(iter.key(), Some(&5));
        iter.next();
        assert!(!iter.is_valid());

        iter.seek_to_last();
        assert_eq!(iter.key(), Some(&5));
    }

    #[test]
    fn insert_shuffled_then_scan() {
        const N: u64 = 10_000;
        let arena = BlockArena::new();
        let list = SkipList::with_seed(DefaultComparator::<u64>::default(), &arena, 1);

        let mut keys: Vec<u64> = (0..N).collect();
        keys.shuffle(&mut SmallRng::seed_from_u64(2));
        for &key in &keys {
            list.insert(key);
        }

        for key in 0..N {
            assert!(list.contains(&key));
        }
        assert!(!list.contains(&N));

        let mut iter = list.iter();
        iter.seek_to_first();
        for expect in 0..N {
            assert_eq!(iter.key(), Some(&expect));
            iter.next();
        }
        assert!(!iter.is_valid());

        assert!(list.mem_usage() > 0);
        assert_eq!(list.mem_usage(), arena.memory_usage());
    }

    #[test]
    fn seek_lands_on_smallest_greater_or_equal() {
        let arena = BlockArena::new();
        let list = SkipList::new(DefaultComparator::<u64>::default(), &arena);
        for key in (0..200).step_by(2) {
            list.insert(key);
        }

        let mut iter = list.iter();
        iter.seek(&3);
        assert_eq!(iter.key(), Some(&4));
        iter.seek(&4);
        assert_eq!(iter.key(), Some(&4));
        iter.seek(&0);
        assert_eq!(iter.key(), Some(&0));
        iter.seek(&198);
        assert_eq!(iter.key(), Some(&198));
        iter.seek(&199);
        assert!(!iter.is_valid());
    }

    #[test]
    fn prev_rewalks_from_head() {
        const N: u64 = 100;
        let arena = BlockArena::new();
        let list = SkipList::new(DefaultComparator::<u64>::default(), &arena);
        for key in 0..N {
            list.insert(key);
        }

        let mut iter = list.iter();
        iter.seek_to_last();
        for expect in (0..N).rev() {
            assert_eq!(iter.key(), Some(&expect));
            iter.prev();
        }
        assert!(!iter.is_valid());
    }

    #[test]
    fn bytes_keys_through_bytewise_comparator() {
        let arena = BlockArena::new();
        let list = SkipList::new(BytewiseComparator, &arena);
        for key in [&b"delta"[..], b"alpha", b"echo", b"bravo", b"charlie"] {
            list.insert(Bytes::copy_from_slice(key));
        }

        assert!(list.contains(&Bytes::from_static(b"bravo")));
        assert!(!list.contains(&Bytes::from_static(b"foxtrot")));

        let mut iter = list.iter();
        iter.seek_to_first();
        let mut got = Vec::new();
        while let Some(key) = iter.key() {
            got.push(key.clone());
            iter.next();
        }
        assert_eq!(
            got,
            vec![
                Bytes::from_static(b"alpha"),
                Bytes::from_static(b"bravo"),
                Bytes::from_static(b"charlie"),
                Bytes::from_static(b"delta"),
                Bytes::from_static(b"echo"),
            ]
        );
    }

    #[test]
    fn same_seed_same_heights() {
        let arena_a = BlockArena::new();
        let arena_b = BlockArena::new();
        let a = SkipList::with_seed(DefaultComparator::<u64>::default(), &arena_a, 42);
        let b = SkipList::with_seed(DefaultComparator::<u64>::default(), &arena_b, 42);

        for key in 0..512 {
            a.insert(key);
            b.insert(key);
        }
        assert_eq!(arena_a.memory_usage(), arena_b.memory_usage());
    }

    #[test]
    fn heap_backed_allocator() {
        let list = SkipList::new(DefaultComparator::<usize>::default(), DefaultAllocator::default());
        for key in 0..1000 {
            list.insert(key);
        }

        let mut iter = list.iter();
        iter.seek_to_first();
        for expect in 0..1000usize {
            assert_eq!(iter.key(), Some(&expect));
            iter.next();
        }
        assert!(!iter.is_valid());
        assert!(list.mem_usage() > 0);
    }

    #[test]
    fn arc_shared_arena() {
        let arena = Arc::new(BlockArena::new());
        let list = SkipList::new(DefaultComparator::<u64>::default(), arena.clone());
        list.insert(1);
        list.insert(2);
        assert_eq!(list.mem_usage(), arena.memory_usage());
    }

    #[test]
    fn drop_runs_key_destructors() {
        static DROP_COUNTER: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
        struct DropItem {
            key: usize,
        }

        impl DropItem {
            fn new(key: usize) -> Self {
                DROP_COUNTER.fetch_add(1, SeqCst);
                Self { key }
            }
        }

        impl Drop for DropItem {
            fn drop(&mut self) {
                DROP_COUNTER.fetch_sub(1, SeqCst);
            }
        }

        let arena = BlockArena::new();
        let list = SkipList::new(DefaultComparator::<DropItem>::default(), &arena);
        for key in 0..5 {
            list.insert(DropItem::new(key));
        }

        assert_eq!(DROP_COUNTER.load(SeqCst), 5);
        drop(list);
        assert_eq!(DROP_COUNTER.load(SeqCst), 0);
    }

    #[test]
    fn concurrent_reads_during_one_writer() {
        init_tracing();

        const N: u64 = 2000;
        let arena = BlockArena::new();
        let list = SkipList::with_seed(DefaultComparator::<u64>::default(), &arena, 97);
        let done = AtomicBool::new(false);

        crossbeam::scope(|s| {
            s.spawn(|_| {
                let mut keys: Vec<u64> = (0..N).collect();
                keys.shuffle(&mut SmallRng::seed_from_u64(7));
                for key in keys {
                    list.insert(key);
                }
                done.store(true, Release);
            });

            for _ in 0..3 {
                s.spawn(|_| {
                    while !done.load(Acquire) {
                        let mut iter = list.iter();
                        iter.seek_to_first();
                        let mut last = None;
                        while let Some(&key) = iter.key() {
                            if let Some(last) = last {
                                assert!(last < key, "scan went backwards: {last} >= {key}");
                            }
                            assert!(key < N);
                            last = Some(key);
                            iter.next();
                        }
                    }
                });
            }
        })
        .unwrap();

        for key in 0..N {
            assert!(list.contains(&key));
        }
    }
}
