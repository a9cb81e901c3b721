use crate::{
    config::ALLOCATION_CHUNK_SIZE,
    job::Job,
    sync::{AtomicU32, Ordering},
    types::SyncUnsafeCell,
};
use core::{
    cell::Cell,
    ptr::{self, NonNull},
};
use std::sync::Arc;

/// A contiguous slab of job records, handed out to one worker at a time.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct JobChunk {
    jobs: [Job; ALLOCATION_CHUNK_SIZE],
}

impl JobChunk {
    const EMPTY: Self = Self {
        jobs: [Job::EMPTY; ALLOCATION_CHUNK_SIZE],
    };
}

/// Lock-free linear allocator of [`JobChunk`]s, shared by every worker's
/// [`JobAllocator`].
///
/// The pool is sized up front and never grows during a run; an allocation is
/// a single relaxed `fetch_add`. Storage is recycled in bulk by `reset`
/// between runs, which is why individual jobs never need destruction.
#[derive(Debug)]
pub(crate) struct JobChunkAllocator {
    chunks: Box<[SyncUnsafeCell<JobChunk>]>,
    next_index: AtomicU32,
}

impl JobChunkAllocator {
    pub(crate) fn new(chunk_amount: u32) -> Self {
        let chunks = (0..chunk_amount)
            .map(|_| SyncUnsafeCell::new(JobChunk::EMPTY))
            .collect();
        Self {
            chunks,
            next_index: AtomicU32::new(0),
        }
    }

    /// Hand out the next unused chunk as a pointer to its first job slot, or
    /// `None` once every chunk has been handed out.
    pub(crate) fn allocate(&self) -> Option<NonNull<Job>> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        debug_assert!(index < u32::MAX, "JobChunkAllocator::allocate: overflow");
        let chunk = self.chunks.get(index as usize)?;
        // SAFETY: the cell's pointer is valid; the owning JobAllocator walks
        // the slots by offset from this base.
        let base = unsafe { ptr::addr_of_mut!((*chunk.get()).jobs) };
        NonNull::new(base.cast::<Job>())
    }

    /// Make every chunk available again. Only called between runs, from a
    /// quiescent state.
    pub(crate) fn reset(&self) {
        self.next_index.store(0, Ordering::SeqCst);
    }
}

/// Linear allocator of jobs, owned by exactly one worker and never shared
/// between threads. Cuts slots out of the current chunk and refills from the
/// shared [`JobChunkAllocator`] on exhaustion or first use.
#[derive(Debug)]
pub(crate) struct JobAllocator {
    chunk_allocator: Arc<JobChunkAllocator>,
    chunk: Cell<*mut Job>,
    next_index: Cell<u32>,
}

impl JobAllocator {
    pub(crate) fn new(chunk_allocator: Arc<JobChunkAllocator>) -> Self {
        Self {
            chunk_allocator,
            chunk: Cell::new(ptr::null_mut()),
            next_index: Cell::new(0),
        }
    }

    /// The next free job slot, or `None` when the shared pool is exhausted.
    pub(crate) fn allocate(&self) -> Option<NonNull<Job>> {
        let mut chunk = self.chunk.get();
        if chunk.is_null() {
            chunk = self.chunk_allocator.allocate()?.as_ptr();
            self.chunk.set(chunk);
            self.next_index.set(0);
        }
        let index = self.next_index.get();
        // SAFETY: `index < ALLOCATION_CHUNK_SIZE`, so the offset stays inside
        // the current chunk.
        let job = unsafe { chunk.add(index as usize) };
        if index as usize + 1 == ALLOCATION_CHUNK_SIZE {
            self.chunk.set(ptr::null_mut());
        } else {
            self.next_index.set(index + 1);
        }
        NonNull::new(job)
    }

    /// Drop the cursor into the current chunk. The backing storage is reused
    /// once the chunk allocator itself has been reset.
    pub(crate) fn reset(&self) {
        self.chunk.set(ptr::null_mut());
    }
}
