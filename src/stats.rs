use std::{
    io::{self, Write},
    time::{Duration, Instant},
};

/// Monotonic stopwatch for the run/work/user timings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timer {
    start_time: Instant,
}

impl Timer {
    pub(crate) fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Per-worker information passed to job functions.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    worker_index: u32,
    user_jobs: u32,
    user_job_duration: Duration,
}

impl WorkerInfo {
    pub(crate) fn new(worker_index: u32) -> Self {
        Self {
            worker_index,
            user_jobs: 0,
            user_job_duration: Duration::ZERO,
        }
    }

    /// Index of the worker executing the current job.
    #[must_use]
    pub fn worker_index(&self) -> u32 {
        self.worker_index
    }

    fn credit_user_job(&mut self, duration: Duration) {
        self.user_jobs += 1;
        self.user_job_duration += duration;
    }
}

/// Scoped timer for the user-space portion of a job function.
///
/// Most bookkeeping (own/stolen counts, work time) is tracked automatically,
/// but only the job function knows when it is doing actual payload work as
/// opposed to just fanning out further jobs. Create one of these when the
/// payload work starts; one user job and its elapsed time are credited to
/// the worker when the timer goes out of scope.
#[derive(Debug)]
#[must_use = "credits the worker when dropped; bind it to a variable"]
pub struct UserJobTimer<'a> {
    info: &'a mut WorkerInfo,
    timer: Timer,
}

impl<'a> UserJobTimer<'a> {
    pub fn new(info: &'a mut WorkerInfo) -> Self {
        Self {
            info,
            timer: Timer::start(),
        }
    }
}

impl Drop for UserJobTimer<'_> {
    fn drop(&mut self) {
        self.info.credit_user_job(self.timer.elapsed());
    }
}

/// Counters and timings for a single worker, covering every run since the
/// last reset.
#[derive(Debug, Clone)]
pub struct WorkerStatistics {
    pub(crate) info: WorkerInfo,
    own_jobs: u32,
    stolen_jobs: u32,
    failed_steals: u64,
    false_waits: u64,
    total_duration: Duration,
    work_duration: Duration,
}

impl WorkerStatistics {
    pub(crate) fn new(worker_index: u32) -> Self {
        Self {
            info: WorkerInfo::new(worker_index),
            own_jobs: 0,
            stolen_jobs: 0,
            failed_steals: 0,
            false_waits: 0,
            total_duration: Duration::ZERO,
            work_duration: Duration::ZERO,
        }
    }

    pub(crate) fn record_own_job(&mut self) {
        self.own_jobs += 1;
    }

    pub(crate) fn record_stolen_job(&mut self) {
        self.stolen_jobs += 1;
    }

    pub(crate) fn record_failed_steal(&mut self) {
        self.failed_steals += 1;
    }

    pub(crate) fn record_false_wait(&mut self) {
        self.false_waits += 1;
    }

    pub(crate) fn record_work_time(&mut self, timer: &Timer) {
        self.work_duration += timer.elapsed();
    }

    pub(crate) fn record_total_time(&mut self, timer: &Timer) {
        self.total_duration += timer.elapsed();
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.info.worker_index);
    }

    #[must_use]
    pub fn worker_index(&self) -> u32 {
        self.info.worker_index
    }

    /// Jobs executed by this worker, own and stolen together.
    #[must_use]
    pub fn total_jobs(&self) -> u32 {
        self.own_jobs + self.stolen_jobs
    }

    /// Jobs popped from the worker's own queue (root jobs included).
    #[must_use]
    pub fn own_jobs(&self) -> u32 {
        self.own_jobs
    }

    /// Jobs taken from other workers' queues.
    #[must_use]
    pub fn stolen_jobs(&self) -> u32 {
        self.stolen_jobs
    }

    /// Jobs that did payload work, as reported through [`UserJobTimer`].
    #[must_use]
    pub fn user_jobs(&self) -> u32 {
        self.info.user_jobs
    }

    /// Jobs that only did scheduling work (total minus user).
    #[must_use]
    pub fn admin_jobs(&self) -> u32 {
        self.total_jobs() - self.info.user_jobs
    }

    /// Steal attempts that came back empty-handed.
    #[must_use]
    pub fn failed_steals(&self) -> u64 {
        self.failed_steals
    }

    /// Times this worker parked on the end-of-run condition only to discover
    /// a peer had found more work.
    #[must_use]
    pub fn false_waits(&self) -> u64 {
        self.false_waits
    }

    /// Wall time spent inside runs.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// Wall time spent actually executing jobs.
    #[must_use]
    pub fn work_duration(&self) -> Duration {
        self.work_duration
    }

    /// Wall time spent in user payload work.
    #[must_use]
    pub fn user_job_duration(&self) -> Duration {
        self.info.user_job_duration
    }

    /// Write the statistics to `out`, labeled, one block per worker.
    pub fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "Worker {}", self.worker_index())?;
        writeln!(out, "\tExecuted {} jobs", self.total_jobs())?;
        writeln!(
            out,
            "\t\t* {} own, {} stolen",
            self.own_jobs, self.stolen_jobs
        )?;
        writeln!(
            out,
            "\t\t* {} user jobs, {} admin jobs",
            self.user_jobs(),
            self.admin_jobs()
        )?;
        writeln!(out, "\tFailed to steal {} times", self.failed_steals)?;
        writeln!(
            out,
            "\tFalsely waited {} times for the run to end",
            self.false_waits
        )?;
        writeln!(
            out,
            "\tSpent {:.3?} in total, of which {:.3?} working, of which {:.3?} on user jobs",
            self.total_duration,
            self.work_duration,
            self.info.user_job_duration
        )?;
        Ok(())
    }
}
