//! Job scheduler: queues future and repeating acquisition runs, guarding
//! against overlapping intervals and executing jobs against the one-session
//! semaphore shared with the Session Coordinator.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::error::{NetError, Result};

pub type TaskId = u64;

/// One scheduled acquisition: `[start, stop)` in wall-clock seconds since
/// the scheduler was created, optionally repeating every `repeat` seconds.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub task_id: TaskId,
    pub start: f64,
    pub stop: f64,
    pub repeat: Option<f64>,
    pub parameters: Value,
}

impl ScheduledJob {
    fn overlaps(&self, other: &ScheduledJob) -> bool {
        self.start < other.stop && other.start < self.stop
    }
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.task_id == other.task_id
    }
}
impl Eq for ScheduledJob {}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start.partial_cmp(&other.start).unwrap_or(std::cmp::Ordering::Equal).then(self.task_id.cmp(&other.task_id))
    }
}

struct Inner {
    queue: BinaryHeap<Reverse<ScheduledJob>>,
    next_id: TaskId,
}

/// A job executor, invoked by the scheduler's background task once a
/// job's start time arrives.
pub type JobRunner = Box<dyn Fn(Value) + Send + Sync>;

/// Queues and dispatches scheduled acquisition jobs on a background
/// `tokio` task. `epoch` anchors the relative `sched_start_time`/
/// `sched_stop_time` values carried on the wire to wall-clock seconds.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    epoch: Instant,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            inner: Arc::new(Mutex::new(Inner {
                queue: BinaryHeap::new(),
                next_id: 1,
            })),
            epoch: Instant::now(),
        }
    }

    fn insert(&self, start: f64, stop: f64, repeat: Option<f64>, parameters: Value) -> Result<TaskId> {
        let mut inner = self.inner.lock().unwrap();
        let task_id = inner.next_id;
        let candidate = ScheduledJob { task_id, start, stop, repeat, parameters };
        if let Some(Reverse(conflict)) = inner.queue.iter().find(|Reverse(job)| job.overlaps(&candidate)) {
            return Err(NetError::JobConflict { task_id, conflicts_with: conflict.task_id });
        }
        inner.next_id += 1;
        inner.queue.push(Reverse(candidate));
        Ok(task_id)
    }

    pub fn run(&self, start: f64, stop: f64, parameters: Value) -> Result<TaskId> {
        self.insert(start, stop, None, parameters)
    }

    pub fn prun(&self, start: f64, stop: f64, repeat: f64, parameters: Value) -> Result<TaskId> {
        self.insert(start, stop, Some(repeat), parameters)
    }

    pub fn lsjob(&self) -> Vec<ScheduledJob> {
        let inner = self.inner.lock().unwrap();
        let mut jobs: Vec<_> = inner.queue.iter().map(|Reverse(job)| job.clone()).collect();
        jobs.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
        jobs
    }

    pub fn rmjob(&self, task_id: TaskId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.queue.len();
        inner.queue = inner.queue.drain().filter(|Reverse(job)| job.task_id != task_id).collect();
        if inner.queue.len() == before {
            return Err(NetError::JobNotFound(task_id));
        }
        Ok(())
    }

    /// Spawns the background dispatch loop. Pops the earliest job once its
    /// start time arrives, invokes `runner`, and reschedules it if it
    /// repeats. Stops when `shutdown` fires.
    pub fn spawn_dispatcher(&self, runner: JobRunner, mut shutdown: mpsc::Receiver<()>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                let next_wait = {
                    let inner = scheduler.inner.lock().unwrap();
                    inner.queue.peek().map(|Reverse(job)| job.start)
                };
                let wait = match next_wait {
                    Some(start) => {
                        let target = scheduler.epoch + Duration::from_secs_f64(start.max(0.0));
                        target.saturating_duration_since(Instant::now())
                    }
                    None => Duration::from_millis(200),
                };

                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = shutdown.recv() => {
                        info!("scheduler dispatcher shutting down");
                        return;
                    }
                }

                let due = {
                    let mut inner = scheduler.inner.lock().unwrap();
                    match inner.queue.peek() {
                        Some(Reverse(job)) if job.start <= scheduler.elapsed() => {
                            let Reverse(job) = inner.queue.pop().unwrap();
                            Some(job)
                        }
                        _ => None,
                    }
                };

                if let Some(job) = due {
                    info!(task_id = job.task_id, "dispatching scheduled job");
                    runner(job.parameters.clone());
                    if let Some(repeat) = job.repeat {
                        let duration = job.stop - job.start;
                        let next = ScheduledJob {
                            task_id: job.task_id,
                            start: job.start + repeat,
                            stop: job.start + repeat + duration,
                            repeat: job.repeat,
                            parameters: job.parameters,
                        };
                        let mut inner = scheduler.inner.lock().unwrap();
                        inner.queue.push(Reverse(next));
                    }
                }
            }
        });
    }

    fn elapsed(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_overlapping_interval() {
        let scheduler = Scheduler::new();
        scheduler.run(10.0, 20.0, json!({})).unwrap();
        let result = scheduler.run(15.0, 25.0, json!({}));
        assert!(matches!(result, Err(NetError::JobConflict { .. })));
    }

    #[test]
    fn accepts_adjacent_non_overlapping_intervals() {
        let scheduler = Scheduler::new();
        scheduler.run(10.0, 20.0, json!({})).unwrap();
        scheduler.run(20.0, 30.0, json!({})).unwrap();
        assert_eq!(scheduler.lsjob().len(), 2);
    }

    #[test]
    fn rmjob_removes_existing_job() {
        let scheduler = Scheduler::new();
        let id = scheduler.run(10.0, 20.0, json!({})).unwrap();
        scheduler.rmjob(id).unwrap();
        assert!(scheduler.lsjob().is_empty());
    }

    #[test]
    fn rmjob_unknown_id_errors() {
        let scheduler = Scheduler::new();
        let result = scheduler.rmjob(999);
        assert!(matches!(result, Err(NetError::JobNotFound(999))));
    }

    #[test]
    fn lsjob_orders_by_start_time() {
        let scheduler = Scheduler::new();
        scheduler.run(30.0, 40.0, json!({})).unwrap();
        scheduler.run(10.0, 20.0, json!({})).unwrap();
        let jobs = scheduler.lsjob();
        assert_eq!(jobs[0].start, 10.0);
        assert_eq!(jobs[1].start, 30.0);
    }
}
