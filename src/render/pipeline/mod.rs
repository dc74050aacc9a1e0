mod cancel;
mod pool;

pub use cancel::CancelToken;
pub use pool::BufferPool;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};

/// Non-blocking completion probe for a scheduled job.
#[derive(Clone, Debug)]
pub(crate) struct JobHandle {
    done: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// One scheduled unit of stage work.
///
/// The body is skipped when the batch's token is already cancelled; the
/// completion callback runs unconditionally so pooled buffers always make it
/// back and downstream stages can be chained from it.
struct Job {
    cancel: CancelToken,
    body: Box<dyn FnOnce() + Send>,
    on_complete: Box<dyn FnOnce() + Send>,
    done: Arc<AtomicBool>,
}

impl Job {
    fn run(self) {
        if !self.cancel.is_cancelled() {
            (self.body)();
        }
        (self.on_complete)();
        self.done.store(true, Ordering::Release);
    }
}

/// FIFO job queue drained by one dedicated worker thread.
#[derive(Debug)]
pub(crate) struct Stage {
    name: &'static str,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    outstanding: Arc<AtomicUsize>,
}

impl Stage {
    pub fn spawn(name: &'static str) -> Stage {
        let (sender, receiver) = mpsc::channel::<Job>();
        let outstanding = Arc::new(AtomicUsize::new(0));

        let worker_outstanding = Arc::clone(&outstanding);
        let worker = thread::Builder::new()
            .name(format!("stage-{name}"))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job.run();
                    worker_outstanding.fetch_sub(1, Ordering::AcqRel);
                }
            })
            .expect("spawning a stage worker never fails");

        Stage {
            name,
            sender: Some(sender),
            worker: Some(worker),
            outstanding,
        }
    }

    pub fn handle(&self) -> StageHandle {
        StageHandle {
            name: self.name,
            sender: self
                .sender
                .clone()
                .expect("handle requested after shutdown"),
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    /// Jobs submitted but not yet completed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Stops accepting work and blocks until the queue has drained.
    /// Queued jobs still run to completion (bodies skipped if their token is
    /// cancelled), so no buffer is ever stranded.
    pub fn shutdown(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            worker.join().expect("stage worker panicked");
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable submission endpoint for a stage; completion callbacks capture
/// these to enqueue downstream work.
#[derive(Clone)]
pub(crate) struct StageHandle {
    name: &'static str,
    sender: mpsc::Sender<Job>,
    outstanding: Arc<AtomicUsize>,
}

impl StageHandle {
    pub fn submit(
        &self,
        cancel: CancelToken,
        body: impl FnOnce() + Send + 'static,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> JobHandle {
        let done = Arc::new(AtomicBool::new(false));
        let job = Job {
            cancel,
            body: Box::new(body),
            on_complete: Box::new(on_complete),
            done: Arc::clone(&done),
        };

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if let Err(mpsc::SendError(job)) = self.sender.send(job) {
            // The stage is shutting down. Run the completion inline (skipping
            // the body) so owned buffers are still released.
            log::warn!("stage {} rejected a job during shutdown", self.name);
            (job.on_complete)();
            job.done.store(true, Ordering::Release);
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }

        JobHandle { done }
    }
}

/// The four resolve stages, each with its own FIFO worker.
#[derive(Debug)]
pub(crate) struct Pipeline {
    pub accumulate: Stage,
    pub combine: Stage,
    pub denoise: Stage,
    pub finalize: Stage,
}

impl Pipeline {
    pub fn spawn() -> Pipeline {
        Pipeline {
            accumulate: Stage::spawn("accumulate"),
            combine: Stage::spawn("combine"),
            denoise: Stage::spawn("denoise"),
            finalize: Stage::spawn("finalize"),
        }
    }

    pub fn outstanding_jobs(&self) -> usize {
        self.accumulate.outstanding()
            + self.combine.outstanding()
            + self.denoise.outstanding()
            + self.finalize.outstanding()
    }

    pub fn shutdown(&mut self) {
        self.accumulate.shutdown();
        self.combine.shutdown();
        self.denoise.shutdown();
        self.finalize.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use std::sync::Mutex;
    use std::time::Duration;

    fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition never became true");
    }

    #[test]
    fn job_runs_body_then_completion() {
        let stage = Stage::spawn("test");
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let handle = stage.handle().submit(
            CancelToken::new(),
            {
                let log = Arc::clone(&log);
                move || log.lock().unwrap().push("body")
            },
            {
                let log = Arc::clone(&log);
                move || log.lock().unwrap().push("complete")
            },
        );

        wait_until(|| handle.is_finished());
        assert!(*log.lock().unwrap() == vec!["body", "complete"]);
        assert!(stage.outstanding() == 0);
    }

    #[test]
    fn cancelled_job_skips_body_but_completes() {
        let stage = Stage::spawn("test");
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let token = CancelToken::new();
        token.cancel();
        let handle = stage.handle().submit(
            token,
            {
                let log = Arc::clone(&log);
                move || log.lock().unwrap().push("body")
            },
            {
                let log = Arc::clone(&log);
                move || log.lock().unwrap().push("complete")
            },
        );

        wait_until(|| handle.is_finished());
        assert!(*log.lock().unwrap() == vec!["complete"]);
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let stage = Stage::spawn("test");
        let log: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        let mut last = None;
        for i in 0..10 {
            let log = Arc::clone(&log);
            last = Some(stage.handle().submit(
                CancelToken::new(),
                move || log.lock().unwrap().push(i),
                || {},
            ));
        }

        wait_until(|| last.as_ref().unwrap().is_finished());
        assert!(*log.lock().unwrap() == (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn completion_can_chain_into_another_stage() {
        let first = Stage::spawn("first");
        let second = Stage::spawn("second");
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let second_handle = second.handle();
        let chained_done: Arc<Mutex<Option<JobHandle>>> = Arc::new(Mutex::new(None));

        first.handle().submit(
            CancelToken::new(),
            {
                let log = Arc::clone(&log);
                move || log.lock().unwrap().push("first-body")
            },
            {
                let log = Arc::clone(&log);
                let chained_done = Arc::clone(&chained_done);
                move || {
                    let handle = second_handle.submit(
                        CancelToken::new(),
                        move || log.lock().unwrap().push("second-body"),
                        || {},
                    );
                    *chained_done.lock().unwrap() = Some(handle);
                }
            },
        );

        wait_until(|| {
            chained_done
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|handle| handle.is_finished())
        });
        assert!(*log.lock().unwrap() == vec!["first-body", "second-body"]);
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let mut stage = Stage::spawn("test");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            stage.handle().submit(
                CancelToken::new(),
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                },
                || {},
            );
        }

        stage.shutdown();
        assert!(counter.load(Ordering::Relaxed) == 20);
        assert!(stage.outstanding() == 0);
    }
}
