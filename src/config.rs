//! Compile-time capacities shared by the allocator and the queues.

/// Maximum number of jobs held in one `JobQueue` at any given moment.
/// A power of two, so the ring buffer can index with a mask.
pub const QUEUE_CAPACITY: usize = 4096;

/// Number of jobs in one inter-thread allocation. In other words, how many
/// jobs a worker can allocate locally between visits to the shared pool.
pub const ALLOCATION_CHUNK_SIZE: usize = 2048;

/// Minimum size of a job's inline parameter buffer. The actual size is
/// whatever rounds the whole job record up to a multiple of `CACHELINE_SIZE`.
pub const MIN_PARAM_BUFFER_SIZE: usize = 32;

/// Used for sizing and aligning job records and the queue counters, to keep
/// independently-written data off shared cachelines. Adjust per target
/// platform if needed.
pub const CACHELINE_SIZE: usize = 64;

const _: () = assert!(QUEUE_CAPACITY.is_power_of_two());
const _: () = assert!(ALLOCATION_CHUNK_SIZE > 0);
