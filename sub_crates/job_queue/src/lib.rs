//! Runs load/export style jobs one at a time on a background thread,
//! tracking progress and collecting a log of what went wrong.

use std::{
    collections::VecDeque,
    fmt::Display,
    sync::{Arc, Condvar, Mutex},
};

use scheduled_thread_pool::{JobHandle, ScheduledThreadPool};

type UpdateFn = Box<dyn Fn() + Send + Sync>;

/// A job queue that uses a single thread to process jobs.
pub struct JobQueue {
    runner: ScheduledThreadPool,
    shared: Arc<Shared>,
}

struct Shared {
    job_status: Mutex<JobStatus>,
    idle: Condvar,
    update_fn: Mutex<Option<UpdateFn>>,
}

impl Shared {
    fn notify_update(&self) {
        if let Some(ref f) = *self.update_fn.lock().unwrap() {
            f();
        }
    }
}

impl JobQueue {
    pub fn new() -> JobQueue {
        JobQueue {
            runner: ScheduledThreadPool::new(1),
            shared: Arc::new(Shared {
                job_status: Mutex::new(JobStatus {
                    jobs: VecDeque::new(),
                    job_progress: None,
                    log: VecDeque::new(),
                    do_cancel: false,
                }),
                idle: Condvar::new(),
                update_fn: Mutex::new(None),
            }),
        }
    }

    /// Sets a callback that's invoked whenever a job makes progress,
    /// logs something, or finishes.
    pub fn set_update_fn<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        *self.shared.update_fn.lock().unwrap() = Some(Box::new(f));
    }

    /// Queues a job.  Returns false if the job was rejected because the
    /// queue is in the middle of canceling.
    ///
    /// An `Err` returned by the job is recorded in the log.
    pub fn add_job<F, E>(&self, name: &str, job: F) -> bool
    where
        F: FnOnce(&JobContext) -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let job_name = name.to_string();
        let mut job_status = self.shared.job_status.lock().unwrap();
        if job_status.do_cancel {
            // Don't allow adding jobs when in the middle of canceling.
            return false;
        }

        // Add the job.
        let shared = Arc::clone(&self.shared);
        job_status.jobs.push_back(self.runner.execute(move || {
            tracing::debug!("job \"{}\" started", job_name);
            let context = JobContext {
                shared: Arc::clone(&shared),
            };

            // Actually run the job.
            let message = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&context))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{}: {}", job_name, e)),
                Err(_) => Some(format!("job \"{}\" panicked!", job_name)),
            };
            if let Some(message) = message {
                context.log_error(message);
            }

            // Cleanup.
            {
                let mut job_status = shared.job_status.lock().unwrap();
                job_status.jobs.pop_front(); // This job.
                if job_status.do_cancel {
                    for job in job_status.jobs.drain(..) {
                        job.cancel();
                    }
                    job_status.do_cancel = false;
                }
                job_status.clear_progress();
                if job_status.jobs.is_empty() {
                    shared.idle.notify_all();
                }
            }
            tracing::debug!("job \"{}\" finished", job_name);
            shared.notify_update();
        }));

        true
    }

    pub fn progress(&self) -> Option<(String, f32)> {
        self.shared.job_status.lock().unwrap().job_progress.clone()
    }

    pub fn job_count(&self) -> usize {
        self.shared.job_status.lock().unwrap().jobs.len()
    }

    pub fn cancel_all_jobs(&self) {
        let mut job_status = self.shared.job_status.lock().unwrap();
        if !job_status.jobs.is_empty() {
            job_status.do_cancel = true;
        }
    }

    /// Blocks until every queued job has finished or been canceled.
    pub fn wait_idle(&self) {
        let mut job_status = self.shared.job_status.lock().unwrap();
        while !job_status.jobs.is_empty() {
            job_status = self.shared.idle.wait(job_status).unwrap();
        }
    }

    pub fn log_count(&self) -> usize {
        self.shared.job_status.lock().unwrap().log.len()
    }

    /// Index zero is the most recent entry.
    pub fn get_log(&self, index: usize) -> (String, LogLevel) {
        self.shared.job_status.lock().unwrap().log[index].clone()
    }

    pub fn clear_log(&self) {
        self.shared.job_status.lock().unwrap().log.clear()
    }
}

impl Default for JobQueue {
    fn default() -> JobQueue {
        JobQueue::new()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LogLevel {
    Error,
    Warning,
    Note,
}

struct JobStatus {
    jobs: VecDeque<JobHandle>,
    job_progress: Option<(String, f32)>,
    log: VecDeque<(String, LogLevel)>,
    do_cancel: bool,
}

impl JobStatus {
    fn clear_progress(&mut self) {
        self.job_progress = None;
    }
}

/// Handed to a running job for reporting back to the queue.
pub struct JobContext {
    shared: Arc<Shared>,
}

impl JobContext {
    pub fn is_canceled(&self) -> bool {
        self.shared.job_status.lock().unwrap().do_cancel
    }

    pub fn set_progress(&self, text: String, ratio: f32) {
        self.shared.job_status.lock().unwrap().job_progress = Some((text, ratio));
        self.shared.notify_update();
    }

    pub fn log_error(&self, message: String) {
        tracing::error!("{}", message);
        self.push_log(message, LogLevel::Error);
    }

    pub fn log_warning(&self, message: String) {
        tracing::warn!("{}", message);
        self.push_log(message, LogLevel::Warning);
    }

    pub fn log_note(&self, message: String) {
        tracing::info!("{}", message);
        self.push_log(message, LogLevel::Note);
    }

    fn push_log(&self, message: String, level: LogLevel) {
        self.shared
            .job_status
            .lock()
            .unwrap()
            .log
            .push_front((message, level));
        self.shared.notify_update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_in_order() {
        let queue = JobQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            assert!(queue.add_job("push", move |_| -> Result<(), String> {
                order.lock().unwrap().push(i);
                Ok(())
            }));
        }
        queue.wait_idle();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(queue.job_count(), 0);
        assert_eq!(queue.log_count(), 0);
    }

    #[test]
    fn errors_and_panics_are_logged() {
        let queue = JobQueue::new();
        queue.add_job("fails", |_| Err("disk full"));
        queue.add_job("panics", |_| -> Result<(), String> { panic!("boom") });
        queue.add_job("warns", |ctx| -> Result<(), String> {
            ctx.log_warning("no exif".into());
            Ok(())
        });
        queue.wait_idle();

        assert_eq!(queue.log_count(), 3);
        assert_eq!(queue.get_log(0), ("no exif".to_string(), LogLevel::Warning));
        assert_eq!(queue.get_log(1).1, LogLevel::Error);
        assert!(queue.get_log(1).0.contains("panics"));
        assert_eq!(
            queue.get_log(2),
            ("fails: disk full".to_string(), LogLevel::Error)
        );

        queue.clear_log();
        assert_eq!(queue.log_count(), 0);
    }

    #[test]
    fn update_fn_is_called() {
        let queue = JobQueue::new();
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        queue.set_update_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queue.add_job("progress", |ctx| -> Result<(), String> {
            ctx.set_progress("halfway".into(), 0.5);
            Ok(())
        });
        queue.wait_idle();
        // The completion update may land after `wait_idle()` returns.
        assert!(updates.load(Ordering::SeqCst) >= 1);
        assert_eq!(queue.progress(), None);
    }
}
