use std::{cell::RefCell, fmt::Debug, sync::OnceLock};

use fixedbitset::FixedBitSet;

use super::uint::{ceil_log2, OptionalU32};

/// A `(chunk, slot)` pair packed as `chunk << chunk_bits | slot`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    #[inline]
    pub(crate) fn new(chunk: u32, slot: u32, chunk_bits: u32) -> Self {
        debug_assert!(slot < (1 << chunk_bits));
        Self((chunk << chunk_bits) | slot)
    }
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
    #[inline]
    pub fn to_raw(&self) -> u32 {
        self.0
    }
    #[inline(always)]
    pub fn chunk(&self, chunk_bits: u32) -> u32 {
        self.0 >> chunk_bits
    }
    #[inline(always)]
    pub fn slot(&self, chunk_bits: u32) -> u32 {
        self.0 & ((1 << chunk_bits) - 1)
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Bookkeeping of a pool which may only be touched while holding its [`AssignLock`].
pub struct PoolState {
    // intrusive free list, one link for every slot that has been handed out at least once
    next_free: Vec<OptionalU32>,
    free_head: OptionalU32,
    assigned: FixedBitSet,
    // first slot that has never been handed out
    watermark: u32,
    live: u32,
}

impl PoolState {
    fn new() -> Self {
        Self {
            next_free: Vec::new(),
            free_head: OptionalU32::NONE,
            assigned: FixedBitSet::new(),
            watermark: 0,
            live: 0,
        }
    }
    fn is_assigned(&self, index: u32) -> bool {
        let index = index as usize;
        index < self.assigned.len() && self.assigned.contains(index)
    }
}

/// Guards the assign/unassign operations of a [`ChunkedPool`], [`ChunkedPool::get`] never
/// takes it.
pub trait AssignLock {
    fn new(state: PoolState) -> Self;
    fn with_locked<R, F: FnOnce(&mut PoolState) -> R>(&self, fun: F) -> R;
    fn get_mut(&mut self) -> &mut PoolState;
}

/// No-op lock for pools owned by a single thread.
pub struct LocalLock(RefCell<PoolState>);

impl AssignLock for LocalLock {
    fn new(state: PoolState) -> Self {
        Self(RefCell::new(state))
    }
    #[inline]
    fn with_locked<R, F: FnOnce(&mut PoolState) -> R>(&self, fun: F) -> R {
        fun(&mut self.0.borrow_mut())
    }
    fn get_mut(&mut self) -> &mut PoolState {
        self.0.get_mut()
    }
}

/// Mutex for pools shared between worker threads.
pub struct SharedLock(parking_lot::Mutex<PoolState>);

impl AssignLock for SharedLock {
    fn new(state: PoolState) -> Self {
        Self(parking_lot::Mutex::new(state))
    }
    #[inline]
    fn with_locked<R, F: FnOnce(&mut PoolState) -> R>(&self, fun: F) -> R {
        fun(&mut self.0.lock())
    }
    fn get_mut(&mut self) -> &mut PoolState {
        self.0.get_mut()
    }
}

pub type LocalPool<T> = ChunkedPool<T, LocalLock>;
pub type SharedPool<T> = ChunkedPool<T, SharedLock>;

type Chunk<T> = OnceLock<Box<[T]>>;

/// A slab of fixed size chunks, growing never moves an already allocated slot.
///
/// Every slot of a created chunk holds a `T::default()` value, allocating and releasing
/// only flips occupancy. Chunks are found through a two level directory whose pages are
/// created on demand, the directory itself never moves so concurrent readers don't
/// observe it being reallocated.
pub struct ChunkedPool<T, L: AssignLock = LocalLock> {
    lock: L,
    pages: Box<[OnceLock<Box<[Chunk<T>]>>]>,
    max_chunks: u64,
    chunk_bits: u32,
    page_bits: u32,
}

impl<T: Default, L: AssignLock> ChunkedPool<T, L> {
    /// A pool which can grow until the handle bits run out.
    pub fn new(chunk_size: u32) -> Self {
        Self::with_max_chunks(chunk_size, u32::MAX)
    }
    pub fn with_max_chunks(chunk_size: u32, max_chunks: u32) -> Self {
        // a single slot chunk would make the slot mask empty
        let chunk_bits = ceil_log2(chunk_size).max(1);
        assert!(
            chunk_bits < u32::BITS,
            "Chunk size {chunk_size} leaves no bits for the chunk index"
        );
        let addressable = 1u64 << (u32::BITS - chunk_bits);
        let max_chunks = (max_chunks as u64).min(addressable);
        assert!(max_chunks > 0);

        // split the chunk index bits evenly between the directory and its pages
        let directory_bits = u64::BITS - (max_chunks - 1).leading_zeros();
        let page_bits = (directory_bits + 1) / 2;
        let page_count = ((max_chunks - 1) >> page_bits) + 1;

        Self {
            lock: L::new(PoolState::new()),
            pages: (0..page_count).map(|_| OnceLock::new()).collect(),
            max_chunks,
            chunk_bits,
            page_bits,
        }
    }
    fn new_chunk(&self) -> Box<[T]> {
        (0..self.chunk_size()).map(|_| T::default()).collect()
    }
    fn new_page(&self) -> Box<[Chunk<T>]> {
        (0..1u64 << self.page_bits).map(|_| OnceLock::new()).collect()
    }
    #[inline]
    fn page_mask(&self) -> u32 {
        ((1u64 << self.page_bits) - 1) as u32
    }
    fn chunk(&self, chunk: u32) -> Option<&[T]> {
        let page = self.pages.get((chunk >> self.page_bits) as usize)?.get()?;
        let chunk = page.get((chunk & self.page_mask()) as usize)?.get()?;
        Some(&chunk[..])
    }
    pub fn allocate(&self) -> Handle {
        let chunk_bits = self.chunk_bits;
        let slot_mask = (1u32 << chunk_bits) - 1;

        let index = self.lock.with_locked(|state| {
            let index = if let Some(free) = state.free_head.get() {
                state.free_head = state.next_free[free as usize];
                free
            } else {
                let index = state.watermark;
                let chunk = index >> chunk_bits;
                // u32::MAX is the niche of the free list links
                assert!(
                    (chunk as u64) < self.max_chunks && index != u32::MAX,
                    "ChunkedPool exhausted its {} chunks of {} slots",
                    self.max_chunks,
                    self.chunk_size()
                );

                if index & slot_mask == 0 {
                    let page = self.pages[(chunk >> self.page_bits) as usize]
                        .get_or_init(|| self.new_page());
                    page[(chunk & self.page_mask()) as usize].get_or_init(|| self.new_chunk());

                    let len = ((chunk as usize) + 1) << chunk_bits;
                    state.next_free.resize(len, OptionalU32::NONE);
                    state.assigned.grow(len);

                    crate::tracing::shim_macros::trace!(
                        "ChunkedPool grew to {} chunks",
                        chunk + 1
                    );
                }

                state.watermark += 1;
                index
            };

            state.assigned.insert(index as usize);
            state.live += 1;
            index
        });

        Handle::new(index >> chunk_bits, index & slot_mask, chunk_bits)
    }
    pub fn release(&self, handle: Handle) {
        let index = handle.to_raw();
        self.lock.with_locked(|state| {
            debug_assert!(
                state.is_assigned(index),
                "Releasing {handle:?} which is not assigned"
            );

            state.assigned.set(index as usize, false);
            state.next_free[index as usize] = state.free_head;
            state.free_head = OptionalU32::new_some(index);
            state.live -= 1;
        });
    }
    pub fn is_assigned(&self, handle: Handle) -> bool {
        self.lock
            .with_locked(|state| state.is_assigned(handle.to_raw()))
    }
    /// The slot of `handle`, `None` if its chunk was never created.
    ///
    /// Occupancy isn't checked, a released slot still holds whatever was last stored in it.
    #[inline]
    pub fn try_get(&self, handle: Handle) -> Option<&T> {
        let chunk = self.chunk(handle.chunk(self.chunk_bits))?;
        chunk.get(handle.slot(self.chunk_bits) as usize)
    }
    #[inline]
    pub fn get(&self, handle: Handle) -> &T {
        self.try_get(handle)
            .expect("Handle does not belong to this pool")
    }
    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> &mut T {
        debug_assert!(
            self.lock.get_mut().is_assigned(handle.to_raw()),
            "{handle:?} is not assigned"
        );

        let chunk = handle.chunk(self.chunk_bits);
        let slot = handle.slot(self.chunk_bits) as usize;
        let page_mask = self.page_mask();
        let chunk = self
            .pages
            .get_mut((chunk >> self.page_bits) as usize)
            .and_then(OnceLock::get_mut)
            .and_then(|page| page.get_mut((chunk & page_mask) as usize))
            .and_then(OnceLock::get_mut)
            .expect("Handle does not belong to this pool");
        &mut chunk[slot]
    }
    pub fn insert(&mut self, value: T) -> Handle {
        let handle = self.allocate();
        *self.get_mut(handle) = value;
        handle
    }
    pub fn remove(&mut self, handle: Handle) -> T {
        let value = std::mem::take(self.get_mut(handle));
        self.release(handle);
        value
    }
    pub fn clear(&mut self) {
        *self.lock.get_mut() = PoolState::new();
        for page in self.pages.iter_mut() {
            page.take();
        }
    }
    pub fn len(&self) -> usize {
        self.lock.with_locked(|state| state.live as usize)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn chunk_size(&self) -> u32 {
        1 << self.chunk_bits
    }
    pub fn chunk_bits(&self) -> u32 {
        self.chunk_bits
    }
    /// Most chunks the pool may grow to.
    pub fn max_chunks(&self) -> u64 {
        self.max_chunks
    }
    pub fn chunk_count(&self) -> usize {
        self.lock.with_locked(|state| {
            let slot_mask = (1u64 << self.chunk_bits) - 1;
            ((state.watermark as u64 + slot_mask) >> self.chunk_bits) as usize
        })
    }
    pub fn capacity(&self) -> usize {
        self.chunk_count() << self.chunk_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_packing() {
        let handle = Handle::new(3, 5, 4);
        assert_eq!(handle.to_raw(), 3 << 4 | 5);
        assert_eq!(handle.chunk(4), 3);
        assert_eq!(handle.slot(4), 5);
    }

    #[test]
    fn test_chunk_size_rounding() {
        let pool: LocalPool<u32> = ChunkedPool::new(5);
        assert_eq!(pool.chunk_size(), 8);
        let pool: LocalPool<u32> = ChunkedPool::new(1);
        assert_eq!(pool.chunk_size(), 2);
    }

    #[test]
    fn test_growth_keeps_handles() {
        let mut pool: LocalPool<u64> = ChunkedPool::new(4);

        let handles = (0..10u64).map(|i| pool.insert(i * 10)).collect::<Vec<_>>();
        let addresses = handles
            .iter()
            .map(|&h| pool.get(h) as *const u64)
            .collect::<Vec<_>>();
        assert_eq!(pool.chunk_count(), 3);

        let more = (0..100u64).map(|i| pool.insert(1000 + i)).collect::<Vec<_>>();
        assert!(pool.chunk_count() > 3);

        for (i, (&h, &address)) in handles.iter().zip(&addresses).enumerate() {
            assert_eq!(*pool.get(h), i as u64 * 10);
            assert_eq!(pool.get(h) as *const u64, address);
        }
        for (i, &h) in more.iter().enumerate() {
            assert_eq!(*pool.get(h), 1000 + i as u64);
        }
        assert_eq!(pool.len(), 110);
    }

    #[test]
    fn test_release_never_hands_out_live_handles() {
        let pool: LocalPool<()> = ChunkedPool::new(8);

        let mut live = (0..20).map(|_| pool.allocate()).collect::<Vec<_>>();
        let released = live
            .iter()
            .copied()
            .enumerate()
            .filter(|(i, _)| i % 3 == 0)
            .map(|(_, h)| h)
            .collect::<Vec<_>>();
        live.retain(|h| !released.contains(h));
        for &h in &released {
            pool.release(h);
            assert!(!pool.is_assigned(h));
        }

        for _ in 0..30 {
            let new = pool.allocate();
            assert!(!live.contains(&new));
            live.push(new);
        }
        for &h in &live {
            assert!(pool.is_assigned(h));
        }
        assert_eq!(pool.len(), live.len());
    }

    #[test]
    fn test_released_slots_are_reused() {
        let pool: LocalPool<()> = ChunkedPool::new(4);
        let a = pool.allocate();
        let _b = pool.allocate();
        pool.release(a);
        assert_eq!(pool.allocate(), a);
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn test_is_assigned_out_of_range() {
        let pool: LocalPool<()> = ChunkedPool::new(4);
        assert!(!pool.is_assigned(Handle::from_raw(1234)));
        let h = pool.allocate();
        assert!(pool.is_assigned(h));
    }

    #[test]
    fn test_remove_resets_slot() {
        let mut pool: LocalPool<String> = ChunkedPool::new(2);
        let h = pool.insert("hello".to_owned());
        assert_eq!(pool.remove(h), "hello");
        let h2 = pool.allocate();
        assert_eq!(h, h2);
        assert_eq!(pool.get(h2), "");
    }

    #[test]
    fn test_grows_until_handle_bits_run_out() {
        let pool: LocalPool<u32> = ChunkedPool::new(2);
        assert_eq!(pool.max_chunks(), 1 << 31);

        let handles = (0..3000).map(|_| pool.allocate()).collect::<Vec<_>>();
        assert_eq!(pool.chunk_count(), 1500);
        let last = *handles.last().unwrap();
        assert_eq!(last.chunk(pool.chunk_bits()), 1499);
        assert_eq!(*pool.get(last), 0);
        assert!(pool.try_get(Handle::from_raw(1 << 20)).is_none());

        let pool: SharedPool<()> = ChunkedPool::new(256);
        assert_eq!(pool.max_chunks(), 1 << 24);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_exhaustion_is_fatal() {
        let pool: LocalPool<()> = ChunkedPool::with_max_chunks(2, 2);
        for _ in 0..5 {
            pool.allocate();
        }
    }

    #[test]
    fn test_clear() {
        let mut pool: LocalPool<u8> = ChunkedPool::new(2);
        pool.insert(1);
        pool.insert(2);
        pool.insert(3);
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.chunk_count(), 0);
        let h = pool.insert(7);
        assert_eq!(h.to_raw(), 0);
        assert_eq!(*pool.get(h), 7);
    }

    #[test]
    fn test_shared_pool_concurrent_allocate() {
        let pool: SharedPool<u32> = ChunkedPool::new(16);

        let handles = std::thread::scope(|s| {
            let workers = (0..4)
                .map(|_| s.spawn(|| (0..64).map(|_| pool.allocate()).collect::<Vec<_>>()))
                .collect::<Vec<_>>();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect::<Vec<_>>()
        });

        let mut sorted = handles.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 256);
        assert_eq!(pool.len(), 256);
        assert_eq!(pool.chunk_count(), 16);
    }
}
