use crate::{
    alloc::JobAllocator,
    config::{CACHELINE_SIZE, MIN_PARAM_BUFFER_SIZE},
    graph::JobGraphNode,
    queue::JobQueue,
    spawner::JobSpawner,
    stats::WorkerInfo,
};
use core::{mem, ptr};

/// Entry point of a job.
///
/// Jobs use a plain function pointer plus an inline parameter buffer instead
/// of a closure object, so running one is a single indirect call with no
/// allocation. The function receives the parameters copied in at spawn time,
/// a [`JobSpawner`] bound to the executing worker, and that worker's
/// [`WorkerInfo`].
pub type JobFunction = fn(params: &ParamBuffer, spawner: &JobSpawner<'_>, info: &mut WorkerInfo);

const JOB_CORE_SIZE: usize =
    mem::size_of::<Option<JobFunction>>() + mem::size_of::<*const JobGraphNode>();
const MIN_JOB_SIZE: usize = MIN_PARAM_BUFFER_SIZE + JOB_CORE_SIZE;

/// Total size of a [`Job`] record: the smallest cacheline multiple that fits
/// the core fields plus at least [`MIN_PARAM_BUFFER_SIZE`] parameter bytes.
pub const JOB_SIZE: usize = (MIN_JOB_SIZE + CACHELINE_SIZE - 1) / CACHELINE_SIZE * CACHELINE_SIZE;

/// Size of the inline parameter buffer of a [`Job`].
pub const PARAM_BUFFER_SIZE: usize = JOB_SIZE - JOB_CORE_SIZE;

/// Inline parameter storage of a job.
///
/// Parameter values are bounded by [`PARAM_BUFFER_SIZE`] and have to be
/// `Copy + 'static`: they are moved around as raw bytes and are never
/// dropped. Data that does not fit has to live elsewhere and be pointed to
/// from the parameter value.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct ParamBuffer([u8; PARAM_BUFFER_SIZE]);

impl ParamBuffer {
    pub(crate) const EMPTY: Self = Self([0; PARAM_BUFFER_SIZE]);

    /// Read the parameter value back out of the buffer.
    ///
    /// # Safety
    /// `P` must be the exact type that was stored into this buffer when the
    /// job was created.
    #[must_use]
    pub unsafe fn get<P: Copy + 'static>(&self) -> P {
        const {
            assert!(
                mem::size_of::<P>() <= PARAM_BUFFER_SIZE,
                "parameter value does not fit into a job's inline buffer"
            );
        }
        // SAFETY: the caller guarantees these bytes hold a valid `P`.
        unsafe { ptr::read_unaligned(self.0.as_ptr().cast::<P>()) }
    }

    pub(crate) fn set<P: Copy + 'static>(&mut self, params: P) {
        const {
            assert!(
                mem::size_of::<P>() <= PARAM_BUFFER_SIZE,
                "parameter value does not fit into a job's inline buffer"
            );
        }
        // SAFETY: the size is checked above; `P: Copy` means a raw byte copy
        // loses no drop logic.
        unsafe { ptr::write_unaligned(self.0.as_mut_ptr().cast::<P>(), params) }
    }
}

/// One unit of scheduled work: a function pointer, an inline parameter
/// buffer, and an optional back-reference to the graph node the job is
/// charged to.
///
/// The parameter bytes come first so they get the record's full cacheline
/// alignment, and the record is sized to a cacheline multiple so neighboring
/// jobs in a chunk never share a line.
#[derive(Debug)]
#[repr(C, align(64))]
pub struct Job {
    params: ParamBuffer,
    function: Option<JobFunction>,
    node: *const JobGraphNode,
}

const _: () = assert!(
    mem::size_of::<Job>() == JOB_SIZE,
    "JOB_CORE_SIZE is out of sync with the actual Job layout"
);
const _: () = assert!(
    mem::offset_of!(Job, params) == 0,
    "parameter bytes have to come first so they get the record's alignment"
);
const _: () = assert!(mem::align_of::<Job>() == CACHELINE_SIZE);

// SAFETY: a job is an inert record (bytes, a function pointer, a node
// pointer). Cross-thread handoff is synchronized by the queue it travels
// through, and the node it points to only exposes atomic operations.
unsafe impl Send for Job {}
unsafe impl Sync for Job {}

impl Job {
    pub(crate) const EMPTY: Self = Self {
        params: ParamBuffer::EMPTY,
        function: None,
        node: ptr::null(),
    };

    pub(crate) fn init<P: Copy + 'static>(
        &mut self,
        function: JobFunction,
        params: P,
        node: *const JobGraphNode,
    ) {
        self.params.set(params);
        self.function = Some(function);
        self.node = node;
    }

    /// Run the job's function, then drive the owning node's completion
    /// protocol if the job is charged to one.
    ///
    /// # Safety
    /// - `self.node`, when non-null, must point to a node that outlives the
    ///   current run.
    /// - `allocator` and `queue` must belong to the worker executing the job.
    pub(crate) unsafe fn run(
        &self,
        allocator: &JobAllocator,
        queue: &JobQueue,
        info: &mut WorkerInfo,
    ) {
        let function = self.function.expect("Job::run: job has no function");
        let spawner = JobSpawner::new(allocator, queue, self.node);
        function(&self.params, &spawner, info);
        // SAFETY: live for the whole run per the caller's contract.
        if let Some(node) = unsafe { self.node.as_ref() } {
            node.complete_job(queue);
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::EMPTY
    }
}
