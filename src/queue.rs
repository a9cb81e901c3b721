use crate::{
    config::QUEUE_CAPACITY,
    job::Job,
    sync::{fence, AtomicI64, AtomicPtr, Ordering},
};
use core::ptr::{self, NonNull};
use crossbeam_utils::CachePadded;

/// Fixed-capacity lock-free work-stealing deque.
///
/// The owning worker pushes and pops at the bottom; every other worker takes
/// from the top. Based on the Chase-Lev deque with the memory-ordering
/// discipline of Lê, Pop, Cohen and Zappa Nardelli ("Correct and Efficient
/// Work-Stealing for Weak Memory Models").
///
/// `top` and `bottom` increase monotonically and index the ring buffer
/// through a mask; `bottom - top` is the current length, which is why they
/// are signed. Only `steal` and the last-element branch of `pop` use CAS, so
/// the owner's common path is wait-free.
///
/// The push/pop side is an owner-only contract, not a typed one: every slot
/// and counter access is atomic, so violating it loses work but cannot
/// corrupt memory.
#[must_use]
#[derive(Debug)]
pub struct JobQueue {
    ring_buffer: Box<[AtomicPtr<Job>]>,
    mask: i64,
    top: CachePadded<AtomicI64>,
    bottom: CachePadded<AtomicI64>,
}

impl JobQueue {
    /// A queue with the default [`QUEUE_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    /// A queue holding at most `capacity` jobs.
    ///
    /// # Panics
    /// If `capacity` is not a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "JobQueue capacity has to be a power of two"
        );
        let ring_buffer = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            ring_buffer,
            mask: capacity as i64 - 1,
            top: CachePadded::new(AtomicI64::new(0)),
            bottom: CachePadded::new(AtomicI64::new(0)),
        }
    }

    #[inline]
    fn capacity(&self) -> i64 {
        self.mask + 1
    }

    #[inline]
    fn slot(&self, index: i64) -> &AtomicPtr<Job> {
        &self.ring_buffer[(index & self.mask) as usize]
    }

    /// Owner-only: append a job at the bottom. Returns `false` when the
    /// queue is full.
    #[inline]
    pub fn push(&self, job: NonNull<Job>) -> bool {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        if bottom - top == self.capacity() {
            return false;
        }
        self.slot(bottom).store(job.as_ptr(), Ordering::Relaxed);
        // Publish the slot contents before the new bottom becomes visible to
        // thieves.
        fence(Ordering::Release);
        self.bottom.store(bottom + 1, Ordering::Relaxed);
        true
    }

    /// Owner-only: take the most recently pushed job, or `None` if the queue
    /// is empty.
    #[inline]
    pub fn pop(&self) -> Option<NonNull<Job>> {
        let bottom = self.bottom.load(Ordering::Relaxed) - 1;
        // Speculatively claim the bottom slot, then order that claim against
        // concurrent `top` increments by thieves.
        self.bottom.store(bottom, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let top = self.top.load(Ordering::Relaxed);
        if bottom < top {
            // Queue was empty; undo the claim.
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            return None;
        }
        let job = self.slot(bottom).load(Ordering::Relaxed);
        if bottom > top {
            return NonNull::new(job);
        }
        // Exactly one element left: either we advance `top` past it, or a
        // thief already did.
        let job = if self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            NonNull::new(job)
        } else {
            None
        };
        self.bottom.store(bottom + 1, Ordering::Relaxed);
        job
    }

    /// Take the least recently pushed job out of another worker's queue, or
    /// `None` if it is empty or the attempt raced with someone else.
    #[inline]
    pub fn steal(&self) -> Option<NonNull<Job>> {
        let top = self.top.load(Ordering::Acquire);
        // Order the `top` read against the owner's speculative bottom claim.
        fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);
        if top >= bottom {
            return None;
        }
        let job = self.slot(top).load(Ordering::Relaxed);
        if self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            // Lost the race; the caller picks another victim.
            return None;
        }
        NonNull::new(job)
    }

    /// Store zero to both counters. Only called between runs, from a
    /// quiescent state.
    pub fn reset(&self) {
        self.bottom.store(0, Ordering::SeqCst);
        self.top.store(0, Ordering::SeqCst);
    }

    /// Current number of queued jobs. Only meaningful to the owner.
    #[must_use]
    pub fn len(&self) -> usize {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        usize::try_from(bottom - top).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    fn new_job() -> NonNull<Job> {
        NonNull::new(Box::into_raw(Box::new(Job::default()))).unwrap()
    }

    unsafe fn free_job(job: NonNull<Job>) {
        drop(unsafe { Box::from_raw(job.as_ptr()) });
    }

    #[test]
    fn owner_pops_lifo_thieves_steal_fifo() {
        let queue = JobQueue::with_capacity(8);
        let jobs = [new_job(), new_job(), new_job()];
        for job in jobs {
            assert!(queue.push(job));
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.steal(), Some(jobs[0]));
        assert_eq!(queue.pop(), Some(jobs[2]));
        assert_eq!(queue.pop(), Some(jobs[1]));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.steal(), None);
        assert!(queue.is_empty());

        for job in jobs {
            unsafe { free_job(job) };
        }
    }

    #[test]
    fn push_reports_overflow() {
        let queue = JobQueue::with_capacity(2);
        let jobs = [new_job(), new_job(), new_job()];
        assert!(queue.push(jobs[0]));
        assert!(queue.push(jobs[1]));
        assert!(!queue.push(jobs[2]));

        assert_eq!(queue.pop(), Some(jobs[1]));
        assert!(queue.push(jobs[2]));

        while queue.pop().is_some() {}
        for job in jobs {
            unsafe { free_job(job) };
        }
    }

    #[test]
    fn reset_empties_the_ring() {
        let queue = JobQueue::with_capacity(4);
        let job = new_job();
        assert!(queue.push(job));
        queue.reset();
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.len(), 0);
        unsafe { free_job(job) };
    }

    #[test]
    fn wraps_around_the_ring_buffer() {
        let queue = JobQueue::with_capacity(2);
        let jobs = [new_job(), new_job()];
        for _ in 0..5 {
            assert!(queue.push(jobs[0]));
            assert!(queue.push(jobs[1]));
            assert_eq!(queue.steal(), Some(jobs[0]));
            assert_eq!(queue.pop(), Some(jobs[1]));
            assert!(queue.is_empty());
        }
        for job in jobs {
            unsafe { free_job(job) };
        }
    }
}
