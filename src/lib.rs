//! Work-stealing scheduler for directed acyclic graphs of jobs.
//!
//! This crate executes a user-built DAG of coarse-grained jobs over a fixed
//! pool of worker threads. It:
//! - Runs each graph node's root job once all of the node's predecessors
//!   have completed, and lets running jobs fan out sub-jobs that are charged
//!   to the same node.
//! - Keeps workers busy through one fixed-capacity lock-free Chase-Lev deque
//!   per worker: the owner pushes and pops at the bottom, thieves take from
//!   the top.
//! - Detects run completion with a two-counter protocol over the stealing
//!   and active worker counts, so nobody spins once all work is done.
//! - Serves job records out of thread-local slabs cut from one shared pool,
//!   making a spawn a handful of plain writes plus a queue push.
//!
//! Key modules:
//! - `graph`: the dependency graph: nodes, the completion counters, and
//!   redundant-edge filtering at construction time.
//! - `scheduler`: the worker pool, the run lifecycle, and termination
//!   detection.
//! - `queue`: the work-stealing deque and its memory-ordering discipline.
//! - `spawner`: the capability handed to running jobs for spawning more.
//! - `stats`: per-worker statistics and the scoped user-job timer.
//!
//! Quick start:
//! 1. Create a `scheduler::Scheduler` with a worker count and a chunk count.
//! 2. Build a `graph::JobGraph`: `new_node` for the roots, `new_node_after`
//!    for dependents, each taking a job function and a small `Copy`
//!    parameter value that is stored inline.
//! 3. Install the graph with `set_job_graph` and call `run`; it blocks until
//!    the whole graph has executed and can be called again, with the same
//!    graph or another one.
//!
//! Job functions receive their copied-in parameters, a `spawner::JobSpawner`
//! for fanning out further work, and the `stats::WorkerInfo` of the worker
//! executing them.

mod alloc;
/// Compile-time capacities shared by the allocator and the queues.
pub mod config;
/// The job dependency graph: nodes, completion counters, successor wiring.
pub mod graph;
/// The job record: inline parameters, entry point, owning node.
pub mod job;
/// Fixed-capacity lock-free work-stealing deque.
pub mod queue;
/// The worker pool and the run lifecycle.
pub mod scheduler;
/// Capability object for spawning jobs from inside job functions.
pub mod spawner;
/// Per-worker statistics and timers.
pub mod stats;
mod sync;
/// Common types used across the crate.
pub mod types;
