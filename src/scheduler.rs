use crate::{
    alloc::{JobAllocator, JobChunkAllocator},
    graph::JobGraph,
    queue::JobQueue,
    stats::{Timer, WorkerStatistics},
    sync::{yield_now, AtomicU32, Ordering},
    types::SyncUnsafeCell,
};
use parking_lot::{Condvar, Mutex};
use rand::{
    distributions::{Distribution, Uniform},
    rngs::SmallRng,
    SeedableRng,
};
use std::{
    io::{self, Write},
    sync::{Arc, Barrier},
    thread::JoinHandle,
};
use thiserror::Error;
use tracing::{debug, trace};

/// Error returned by [`Scheduler::run`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunError {
    /// `run` was called before any job graph was installed.
    #[error("no job graph is installed")]
    NoJobGraph,
}

/// Lifecycle state shared between the pool's threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Wait,
    Work,
    Quit,
}

/// Work-stealing scheduler that drives a [`JobGraph`] to completion over a
/// fixed pool of worker threads.
///
/// The calling thread is worker 0 and participates in every run; the
/// remaining workers live on dedicated threads that park between runs. Each
/// worker drains its own queue first and steals from randomly chosen victims
/// when it runs dry; a two-counter protocol over the number of stealing and
/// active workers detects when no more work can appear anywhere, at which
/// point all workers rendezvous and [`run`](Self::run) returns.
#[must_use]
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    num_workers: u32,
    workers: Box<[Worker]>,
    chunk_allocator: Arc<JobChunkAllocator>,
    job_graph: Mutex<Option<Arc<JobGraph>>>,
    /// Rendezvous of all workers at the beginning and end of every run.
    sync_point: Barrier,
    state: Mutex<State>,
    state_changed: Condvar,
    /// Workers currently in the stealing phase. `num_workers + 1` is the
    /// sentinel meaning the run is complete.
    num_stealers: AtomicU32,
    /// Workers that are working or stealing. A worker drops out only right
    /// before parking on the termination condition, never just because a
    /// single steal failed.
    num_active: AtomicU32,
    /// Pairs `num_stealers` with `stealers_changed` so a notifier cannot
    /// slip between a waiter's predicate check and its wait.
    park_lock: Mutex<()>,
    stealers_changed: Condvar,
}

#[derive(Debug)]
struct Worker {
    job_queue: JobQueue,
    local: SyncUnsafeCell<WorkerLocal>,
}

#[derive(Debug)]
struct WorkerLocal {
    job_allocator: JobAllocator,
    random_generator: SmallRng,
    steal_distribution: Uniform<u32>,
    statistics: WorkerStatistics,
}

// SAFETY: the local half of a worker is only ever touched by the thread
// currently driving that worker's index; handoff between runs is serialized
// by the scheduler barriers.
unsafe impl Send for WorkerLocal {}
unsafe impl Sync for WorkerLocal {}

impl Worker {
    fn new(index: u32, num_workers: u32, chunk_allocator: Arc<JobChunkAllocator>) -> Self {
        // The victim distribution is seeded away from the worker's own index;
        // the final `% num_workers` in the steal loop wraps it back into
        // range, so a worker never picks itself (unless it is alone).
        let low = index + 1;
        let high = num_workers.saturating_sub(1).max(1) + index;
        Self {
            job_queue: JobQueue::new(),
            local: SyncUnsafeCell::new(WorkerLocal {
                job_allocator: JobAllocator::new(chunk_allocator),
                random_generator: SmallRng::seed_from_u64(u64::from(index) + 1),
                steal_distribution: Uniform::new_inclusive(low, high),
                statistics: WorkerStatistics::new(index),
            }),
        }
    }
}

impl Scheduler {
    /// Create a pool with `desired_worker_amount` workers (clamped to at
    /// least 1) and a job pool of `desired_chunk_amount` chunks (clamped to
    /// at least the worker count).
    ///
    /// The calling thread becomes worker 0, so `desired_worker_amount - 1`
    /// threads are spawned.
    ///
    /// # Panics
    /// If a worker thread cannot be spawned.
    pub fn new(desired_worker_amount: u32, desired_chunk_amount: u32) -> Self {
        let num_workers = desired_worker_amount.max(1);
        let chunk_amount = desired_chunk_amount.max(num_workers);
        let chunk_allocator = Arc::new(JobChunkAllocator::new(chunk_amount));
        let workers = (0..num_workers)
            .map(|index| Worker::new(index, num_workers, Arc::clone(&chunk_allocator)))
            .collect();
        let shared = Arc::new(Shared {
            num_workers,
            workers,
            chunk_allocator,
            job_graph: Mutex::new(None),
            sync_point: Barrier::new(num_workers as usize),
            state: Mutex::new(State::Wait),
            state_changed: Condvar::new(),
            num_stealers: AtomicU32::new(0),
            num_active: AtomicU32::new(0),
            park_lock: Mutex::new(()),
            stealers_changed: Condvar::new(),
        });
        let threads = (1..num_workers)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("wsdag-worker-{index}"))
                    .spawn(move || shared.thread_loop(index))
                    .expect("Scheduler::new: failed to spawn a worker thread")
            })
            .collect();
        debug!(num_workers, chunk_amount, "scheduler created");
        Self { shared, threads }
    }

    /// Install the dependency graph to be run. May be swapped for a
    /// different graph between calls to [`run`](Self::run).
    pub fn set_job_graph(&mut self, graph: Arc<JobGraph>) {
        *self.shared.job_graph.lock() = Some(graph);
    }

    /// Number of workers, the calling thread included.
    #[must_use]
    pub fn num_workers(&self) -> u32 {
        self.shared.num_workers
    }

    /// Run the installed graph. Blocks until every root job and every
    /// spawned sub-job has executed; the calling thread participates as
    /// worker 0.
    ///
    /// # Errors
    /// [`RunError::NoJobGraph`] when no graph has been installed.
    pub fn run(&mut self) -> Result<(), RunError> {
        if self.shared.job_graph.lock().is_none() {
            return Err(RunError::NoJobGraph);
        }
        trace!("run started");
        {
            let mut state = self.shared.state.lock();
            *state = State::Work;
        }
        self.shared.state_changed.notify_all();
        self.shared.num_stealers.store(0, Ordering::SeqCst);
        self.shared
            .num_active
            .store(self.shared.num_workers, Ordering::SeqCst);

        // Workers only pass the entry barrier once worker 0 arrives, so the
        // stores above are always in place before any work happens.
        self.shared.run_worker(0);

        self.shared.chunk_allocator.reset();
        trace!("run finished");
        Ok(())
    }

    /// Write every worker's statistics to `out`, labeled per worker.
    ///
    /// # Errors
    /// Forwards errors of the underlying writer.
    pub fn write_statistics(&self, out: &mut dyn Write) -> io::Result<()> {
        for worker in &*self.shared.workers {
            // SAFETY: no run is in flight (`run` borrows the scheduler
            // exclusively), and workers only touch statistics inside a run.
            let statistics = unsafe { &(*worker.local.get()).statistics };
            statistics.write(out)?;
        }
        Ok(())
    }

    /// Snapshot of one worker's statistics, `None` when out of range.
    #[must_use]
    pub fn worker_statistics(&self, index: u32) -> Option<WorkerStatistics> {
        let worker = self.shared.workers.get(index as usize)?;
        // SAFETY: as in `write_statistics`.
        Some(unsafe { (*worker.local.get()).statistics.clone() })
    }

    /// Zero all workers' statistics.
    pub fn reset_statistics(&mut self) {
        for worker in &*self.shared.workers {
            // SAFETY: as in `write_statistics`.
            unsafe { (*worker.local.get()).statistics.reset() };
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            *state = State::Quit;
        }
        self.shared.state_changed.notify_all();
        for thread in self.threads.drain(..) {
            // A worker that panicked has already printed its message;
            // joining best-effort keeps shutdown orderly.
            let _ = thread.join();
        }
        debug!("scheduler shut down");
    }
}

impl Shared {
    fn thread_loop(&self, index: u32) {
        loop {
            {
                let mut state = self.state.lock();
                while *state == State::Wait {
                    self.state_changed.wait(&mut state);
                }
                if *state == State::Quit {
                    return;
                }
            }
            self.run_worker(index);
        }
    }

    fn run_worker(&self, index: u32) {
        self.sync_point.wait();
        let graph = self
            .job_graph
            .lock()
            .clone()
            .expect("Shared::run_worker: no job graph installed");
        let worker = &self.workers[index as usize];
        // SAFETY: this thread is the only one driving worker `index`.
        let local = unsafe { &mut *worker.local.get() };
        let total_timer = Timer::start();

        // Seed this worker's queue by running the root jobs of every
        // `num_workers`-th root node, starting at the worker's own index.
        let work_timer = Timer::start();
        let mut root_index = index;
        while let Some(root_job) = graph.get_root_job(root_index) {
            // SAFETY: the graph outlives the run; allocator and queue belong
            // to this worker.
            unsafe {
                root_job.run(
                    &local.job_allocator,
                    &worker.job_queue,
                    &mut local.statistics.info,
                );
            }
            local.statistics.record_own_job();
            root_index += self.num_workers;
        }
        local.statistics.record_work_time(&work_timer);

        self.work_loop(worker, local);

        if index == 0 {
            // Every worker is between the work loop and the exit barrier and
            // none of them reads `state` there, so worker 0 can re-arm it
            // for the next run.
            *self.state.lock() = State::Wait;
        }
        local.statistics.record_total_time(&total_timer);
        self.sync_point.wait();
        worker.job_queue.reset();
        local.job_allocator.reset();
    }

    fn work_loop(&self, worker: &Worker, local: &mut WorkerLocal) {
        loop {
            // Drain the own queue first: newest jobs first, which executes
            // freshly spawned sub-jobs depth-first while their data is hot.
            let work_timer = Timer::start();
            while let Some(own_job) = worker.job_queue.pop() {
                // SAFETY: job pointers in a queue stay valid for the whole
                // run; allocator and queue belong to this worker.
                unsafe {
                    own_job.as_ref().run(
                        &local.job_allocator,
                        &worker.job_queue,
                        &mut local.statistics.info,
                    );
                }
                local.statistics.record_own_job();
            }
            local.statistics.record_work_time(&work_timer);

            // Own queue is empty; move into the stealing phase.
            self.num_stealers.fetch_add(1, Ordering::Relaxed);
            loop {
                let target_index = local
                    .steal_distribution
                    .sample(&mut local.random_generator)
                    % self.num_workers;
                if let Some(stolen_job) = self.workers[target_index as usize].job_queue.steal() {
                    // Leaving the stealing phase may unblock workers parked
                    // on the everyone-is-stealing condition: this worker is
                    // about to produce stealable work again.
                    if self.num_stealers.fetch_sub(1, Ordering::Relaxed) == self.num_workers {
                        self.notify_stealers_changed();
                    }
                    let work_timer = Timer::start();
                    // SAFETY: as for own jobs above.
                    unsafe {
                        stolen_job.as_ref().run(
                            &local.job_allocator,
                            &worker.job_queue,
                            &mut local.statistics.info,
                        );
                    }
                    local.statistics.record_stolen_job();
                    local.statistics.record_work_time(&work_timer);
                    // Back to the own queue.
                    break;
                }
                local.statistics.record_failed_steal();

                // When every worker is stealing there is most likely no work
                // left anywhere; get ready to finish the run.
                if self.num_stealers.load(Ordering::Relaxed) >= self.num_workers {
                    if self.num_active.fetch_sub(1, Ordering::SeqCst) == 1 {
                        // Last worker standing: everyone agrees the run is
                        // over. Publish the sentinel.
                        self.num_stealers
                            .store(self.num_workers + 1, Ordering::SeqCst);
                        self.notify_stealers_changed();
                    }
                    self.wait_for_stealers_change();
                    if self.num_stealers.load(Ordering::SeqCst) > self.num_workers {
                        return;
                    }
                    // A peer stole successfully and may produce new work.
                    local.statistics.record_false_wait();
                    self.num_active.fetch_add(1, Ordering::SeqCst);
                }

                // Honest work takes priority over stealing.
                yield_now();
            }
        }
    }

    /// Park until `num_stealers` moves away from `num_workers`: either up to
    /// the completion sentinel, or down because a peer stole successfully
    /// and may produce more work.
    fn wait_for_stealers_change(&self) {
        let mut guard = self.park_lock.lock();
        while self.num_stealers.load(Ordering::SeqCst) == self.num_workers {
            self.stealers_changed.wait(&mut guard);
        }
    }

    fn notify_stealers_changed(&self) {
        // Taking the park lock orders this notification after any waiter's
        // predicate check, so the wakeup cannot be missed.
        drop(self.park_lock.lock());
        self.stealers_changed.notify_all();
    }
}
