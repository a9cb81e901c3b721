use crate::{alloc::JobAllocator, graph::JobGraphNode, job::JobFunction, queue::JobQueue};
use core::ptr;

/// Capability handed to running jobs for spawning new jobs safely.
///
/// The spawner is bound to the executing worker's allocator and queue, plus
/// the graph node that owns the currently running job (null for jobs outside
/// the graph). It takes care of wiring all three correctly, so dependent
/// nodes can never start before the sub-jobs they wait on are accounted for.
#[derive(Debug, Clone, Copy)]
pub struct JobSpawner<'a> {
    allocator: &'a JobAllocator,
    queue: &'a JobQueue,
    node: *const JobGraphNode,
}

impl<'a> JobSpawner<'a> {
    pub(crate) fn new(
        allocator: &'a JobAllocator,
        queue: &'a JobQueue,
        node: *const JobGraphNode,
    ) -> Self {
        Self {
            allocator,
            queue,
            node,
        }
    }

    /// Spawn a new job onto the current worker's queue.
    ///
    /// With `is_sub_job` set, the job is charged to the node owning the
    /// currently executing job: that node is not considered complete, and no
    /// dependent node starts, until the spawned job has run too. Without it
    /// (or when the current job belongs to no node) the job is not part of
    /// the dependency graph, but still finishes before the run returns.
    ///
    /// # Panics
    /// When the job pool or the worker's queue is out of capacity. Both are
    /// provisioning errors: capacities must be sized so that spawns cannot
    /// fail mid-run.
    pub fn spawn<P: Copy + 'static>(&self, function: JobFunction, params: P, is_sub_job: bool) {
        let job = self
            .allocator
            .allocate()
            .expect("JobSpawner::spawn: job pool exhausted");
        let node = if is_sub_job { self.node } else { ptr::null() };
        // SAFETY: the slot was just handed out by this worker's allocator
        // and is not visible to any other thread yet.
        unsafe { (*job.as_ptr()).init(function, params, node) };
        if !node.is_null() {
            // SAFETY: non-null only when the executing job belongs to a node
            // of the graph currently being run.
            unsafe { (*node).add_unfinished_job() };
        }
        let pushed = self.queue.push(job);
        assert!(pushed, "JobSpawner::spawn: job queue overflow");
    }
}
