use crate::{
    job::{Job, JobFunction},
    queue::JobQueue,
    sync::{AtomicU32, Ordering},
    types::{HashSet, IndexSet, NodeId},
};
use core::ptr::NonNull;

/// A vertex of a [`JobGraph`].
///
/// Each node carries one root job, run when every predecessor node has
/// completed. The root job may spawn sub-jobs charged to the same node; the
/// node completes, and fires its successors, only once the root job and all
/// of its sub-jobs have finished.
///
/// Two atomic counters coordinate this without locks:
/// - `predecessors_left` gates when the root job becomes runnable. The
///   predecessor that decrements it to zero pushes the root job onto its own
///   queue.
/// - `unfinished_jobs` counts the root job plus outstanding sub-jobs. The
///   worker that retires the last one fires the successors.
#[derive(Debug)]
pub(crate) struct JobGraphNode {
    root_job: Job,
    /// Number of non-redundant predecessors, fixed once the node is built.
    predecessors_total: u32,
    /// Predecessors that have not completed yet in the current run.
    predecessors_left: AtomicU32,
    /// The root job plus every outstanding sub-job charged to this node.
    /// At least 1 until the node fires its successors.
    unfinished_jobs: AtomicU32,
    successors: Vec<NonNull<JobGraphNode>>,
}

impl JobGraphNode {
    fn new() -> Self {
        Self {
            root_job: Job::EMPTY,
            predecessors_total: 0,
            predecessors_left: AtomicU32::new(0),
            unfinished_jobs: AtomicU32::new(1),
            successors: Vec::new(),
        }
    }

    pub(crate) fn root_job(&self) -> &Job {
        &self.root_job
    }

    /// Called by the spawner whenever a sub-job is charged to this node.
    pub(crate) fn add_unfinished_job(&self) {
        self.unfinished_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Called after any job belonging to this node has run. The caller that
    /// retires the last unfinished job fires the successors and re-arms the
    /// counters, which is what lets the same graph run again without being
    /// rebuilt.
    pub(crate) fn complete_job(&self, queue: &JobQueue) {
        // Seq-cst so the retirement happens-before the successor root jobs
        // become stealable through `queue`.
        let old_unfinished = self.unfinished_jobs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(old_unfinished > 0, "JobGraphNode::complete_job: underflow");
        if old_unfinished > 1 {
            return;
        }
        for successor in &self.successors {
            // SAFETY: successors point at boxed nodes of the same graph,
            // which outlives every run.
            let successor = unsafe { successor.as_ref() };
            // Relaxed is enough here: the queue push itself provides the
            // release synchronization towards whoever takes the job.
            let old_left = successor.predecessors_left.fetch_sub(1, Ordering::Relaxed);
            debug_assert!(old_left > 0, "JobGraphNode::complete_job: no predecessors left");
            if old_left == 1 {
                let pushed = queue.push(NonNull::from(&successor.root_job));
                assert!(
                    pushed,
                    "JobGraphNode::complete_job: queue overflow while firing a successor"
                );
            }
        }
        // Re-arm for the next run. The single-decrementer rule makes these
        // stores happen exactly once per run; relaxed suffices because
        // between-run access is serialized by the scheduler's barriers.
        self.unfinished_jobs.store(1, Ordering::Relaxed);
        self.predecessors_left
            .store(self.predecessors_total, Ordering::Relaxed);
    }
}

/// Dependency graph of jobs.
///
/// The graph owns its nodes exclusively and hands out [`NodeId`] indices.
/// It is acyclic by construction: a node can only name predecessors that
/// already exist, and there is no way to add successors after the fact.
///
/// A graph is not meant to be modified while it is running; dynamic behavior
/// is instead achieved by job functions spawning sub-jobs into their own
/// node based on state external to the scheduler.
#[must_use]
#[derive(Debug, Default)]
pub struct JobGraph {
    nodes: Vec<Box<JobGraphNode>>,
    root_nodes: Vec<NodeId>,
}

// SAFETY: after construction (`&mut self` methods) the graph is structurally
// immutable; the only cross-thread mutable state is the two atomic counters
// on each node. The internal pointers target boxed nodes whose addresses are
// stable for the graph's lifetime.
unsafe impl Send for JobGraph {}
unsafe impl Sync for JobGraph {}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node with no prior dependencies. The root jobs of all such
    /// nodes begin executing as soon as the scheduler runs this graph.
    pub fn new_node<P: Copy + 'static>(
        &mut self,
        root_job_function: JobFunction,
        params: P,
    ) -> NodeId {
        let id = self.insert_node(root_job_function, params);
        self.root_nodes.push(id);
        id
    }

    /// Create a node that runs only after every node in `predecessors` has
    /// completed. Passing all predecessors at once is what keeps the graph
    /// acyclic.
    ///
    /// Duplicate ids are counted once, and a predecessor that is already
    /// implied transitively by another one (it can reach it through
    /// successor edges) is dropped, so no completion is ever waited on
    /// twice.
    ///
    /// # Panics
    /// If `predecessors` is empty or names a node that does not belong to
    /// this graph.
    pub fn new_node_after<P: Copy + 'static>(
        &mut self,
        root_job_function: JobFunction,
        params: P,
        predecessors: &[NodeId],
    ) -> NodeId {
        assert!(
            !predecessors.is_empty(),
            "JobGraph::new_node_after: empty predecessor list"
        );
        for &predecessor in predecessors {
            assert!(
                (predecessor.0 as usize) < self.nodes.len(),
                "JobGraph::new_node_after: predecessor does not belong to this graph"
            );
        }
        let unique: IndexSet<NodeId> = predecessors.iter().copied().collect();
        let id = self.insert_node(root_job_function, params);
        for &predecessor in &unique {
            let redundant = unique
                .iter()
                .any(|&other| other != predecessor && self.reaches(predecessor, other));
            if !redundant {
                self.link(predecessor, id);
            }
        }
        // The deepest surviving predecessor cannot reach any other one, so
        // at least one link is always made.
        debug_assert!(
            self.nodes[id.0 as usize].predecessors_total > 0,
            "JobGraph::new_node_after: every predecessor was dropped"
        );
        id
    }

    /// Root job of the `index`-th root node, `None` once out of range. Used
    /// by workers to stride-seed their queues at the start of a run.
    #[must_use]
    pub fn get_root_job(&self, index: u32) -> Option<&Job> {
        let &id = self.root_nodes.get(index as usize)?;
        Some(self.nodes[id.0 as usize].root_job())
    }

    fn insert_node<P: Copy + 'static>(&mut self, function: JobFunction, params: P) -> NodeId {
        let id = NodeId(
            u32::try_from(self.nodes.len()).expect("JobGraph::insert_node: too many nodes"),
        );
        let mut node = Box::new(JobGraphNode::new());
        let node_ptr: *const JobGraphNode = &*node;
        node.root_job.init(function, params, node_ptr);
        self.nodes.push(node);
        id
    }

    fn link(&mut self, predecessor: NodeId, successor: NodeId) {
        let successor_ptr = NonNull::from(&*self.nodes[successor.0 as usize]);
        self.nodes[predecessor.0 as usize]
            .successors
            .push(successor_ptr);
        let successor = &mut self.nodes[successor.0 as usize];
        successor.predecessors_total += 1;
        // Not shared with any other thread yet; the store just mirrors the
        // new total.
        successor
            .predecessors_left
            .store(successor.predecessors_total, Ordering::Relaxed);
    }

    /// Whether `to` can be reached from `from` through successor edges.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let target: *const JobGraphNode = &*self.nodes[to.0 as usize];
        let mut visited = HashSet::default();
        reaches_target(&self.nodes[from.0 as usize], target, &mut visited)
    }
}

fn reaches_target(
    node: &JobGraphNode,
    target: *const JobGraphNode,
    visited: &mut HashSet<*const JobGraphNode>,
) -> bool {
    for successor in &node.successors {
        let successor_ptr = successor.as_ptr().cast_const();
        if successor_ptr == target {
            return true;
        }
        if !visited.insert(successor_ptr) {
            continue;
        }
        // SAFETY: successors point at boxed nodes of the same graph.
        if reaches_target(unsafe { successor.as_ref() }, target, visited) {
            return true;
        }
    }
    false
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::{job::ParamBuffer, spawner::JobSpawner, stats::WorkerInfo};

    fn noop(_: &ParamBuffer, _: &JobSpawner<'_>, _: &mut WorkerInfo) {}

    #[test]
    fn transitive_predecessors_are_dropped() {
        let mut graph = JobGraph::new();
        let a = graph.new_node(noop, ());
        let b = graph.new_node_after(noop, (), &[a]);
        let c = graph.new_node_after(noop, (), &[a, b]);

        // A -> C is implied by A -> B -> C, so only B keeps C as successor.
        assert_eq!(graph.nodes[c.0 as usize].predecessors_total, 1);
        assert_eq!(graph.nodes[a.0 as usize].successors.len(), 1);
        assert_eq!(graph.nodes[b.0 as usize].successors.len(), 1);
    }

    #[test]
    fn redundancy_filtering_ignores_argument_order() {
        let mut graph = JobGraph::new();
        let a = graph.new_node(noop, ());
        let b = graph.new_node_after(noop, (), &[a]);
        let c = graph.new_node_after(noop, (), &[b, a]);

        assert_eq!(graph.nodes[c.0 as usize].predecessors_total, 1);
        assert_eq!(graph.nodes[a.0 as usize].successors.len(), 1);
    }

    #[test]
    fn duplicate_predecessors_count_once() {
        let mut graph = JobGraph::new();
        let a = graph.new_node(noop, ());
        let b = graph.new_node_after(noop, (), &[a, a]);

        assert_eq!(graph.nodes[b.0 as usize].predecessors_total, 1);
        assert_eq!(graph.nodes[a.0 as usize].successors.len(), 1);
    }

    #[test]
    fn only_independent_nodes_are_roots() {
        let mut graph = JobGraph::new();
        let a = graph.new_node(noop, ());
        let b = graph.new_node(noop, ());
        let _c = graph.new_node_after(noop, (), &[a, b]);

        assert!(graph.get_root_job(0).is_some());
        assert!(graph.get_root_job(1).is_some());
        assert!(graph.get_root_job(2).is_none());
    }

    #[test]
    fn completion_fires_ready_successors() {
        let mut graph = JobGraph::new();
        let a = graph.new_node(noop, ());
        let b = graph.new_node_after(noop, (), &[a]);
        let queue = JobQueue::with_capacity(8);

        graph.nodes[a.0 as usize].complete_job(&queue);
        let fired = queue.pop().expect("successor fired");
        assert!(core::ptr::eq(
            fired.as_ptr().cast_const(),
            graph.nodes[b.0 as usize].root_job(),
        ));

        // The firing node re-armed itself for the next run.
        let a_node = &graph.nodes[a.0 as usize];
        assert_eq!(a_node.unfinished_jobs.load(Ordering::Relaxed), 1);
        assert_eq!(a_node.predecessors_left.load(Ordering::Relaxed), 0);

        // The fired node re-arms once its own jobs complete.
        graph.nodes[b.0 as usize].complete_job(&queue);
        let b_node = &graph.nodes[b.0 as usize];
        assert_eq!(b_node.predecessors_left.load(Ordering::Relaxed), 1);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn outstanding_sub_jobs_defer_the_successors() {
        let mut graph = JobGraph::new();
        let a = graph.new_node(noop, ());
        let _b = graph.new_node_after(noop, (), &[a]);
        let queue = JobQueue::with_capacity(8);

        let a_node = &graph.nodes[a.0 as usize];
        a_node.add_unfinished_job();
        a_node.complete_job(&queue);
        assert!(queue.pop().is_none(), "a sub-job is still outstanding");

        a_node.complete_job(&queue);
        assert!(queue.pop().is_some(), "last completion fires the successor");
    }

    #[test]
    fn multi_predecessor_node_waits_for_all() {
        let mut graph = JobGraph::new();
        let a = graph.new_node(noop, ());
        let b = graph.new_node(noop, ());
        let _c = graph.new_node_after(noop, (), &[a, b]);
        let queue = JobQueue::with_capacity(8);

        graph.nodes[a.0 as usize].complete_job(&queue);
        assert!(queue.pop().is_none());
        graph.nodes[b.0 as usize].complete_job(&queue);
        assert!(queue.pop().is_some());
    }
}

#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use crate::{job::ParamBuffer, spawner::JobSpawner, stats::WorkerInfo};
    use loom::{sync::Arc, thread};

    fn noop(_: &ParamBuffer, _: &JobSpawner<'_>, _: &mut WorkerInfo) {}

    #[test]
    fn racing_completions_fire_the_successor_exactly_once() {
        loom::model(|| {
            let mut graph = JobGraph::new();
            let a = graph.new_node(noop, ());
            let _b = graph.new_node_after(noop, (), &[a]);
            {
                // Two sub-jobs are outstanding on top of the root job.
                let a_node = &graph.nodes[a.0 as usize];
                a_node.add_unfinished_job();
                a_node.add_unfinished_job();
            }
            let graph = Arc::new(graph);

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let graph = Arc::clone(&graph);
                    thread::spawn(move || {
                        let queue = JobQueue::with_capacity(4);
                        graph.nodes[a.0 as usize].complete_job(&queue);
                        queue.pop().is_some()
                    })
                })
                .collect();

            let queue = JobQueue::with_capacity(4);
            graph.nodes[a.0 as usize].complete_job(&queue);
            let mut fired = usize::from(queue.pop().is_some());
            for handle in handles {
                fired += usize::from(handle.join().unwrap());
            }

            assert_eq!(fired, 1, "whoever retires the last job fires the successor");
            let a_node = &graph.nodes[a.0 as usize];
            assert_eq!(a_node.unfinished_jobs.load(Ordering::Relaxed), 1);
        });
    }
}
