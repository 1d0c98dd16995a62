//! Per-device execution streams.
//!
//! A [`Stream`] is a FIFO work queue with an owned worker thread, giving
//! launches the ordering semantics of an accelerator stream: submission is
//! asynchronous relative to the caller, queued work executes strictly in
//! order, and [`Stream::synchronize`] blocks until everything submitted so
//! far has completed. Each device gets its own stream, so counterpart
//! rounds on two devices run concurrently and can rendezvous.

use crate::error::{LinkError, Result};
use crossbeam_queue::SegQueue;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Op {
    Run(Task),
    Shutdown,
}

struct Shared {
    queue: SegQueue<Op>,
}

/// A FIFO execution queue backed by one worker thread.
pub struct Stream {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
        });
        let inner = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("peerlink-stream".into())
            .spawn(move || loop {
                match inner.queue.pop() {
                    Some(Op::Run(task)) => task(),
                    Some(Op::Shutdown) => break,
                    None => thread::park(),
                }
            })?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue a task behind everything already submitted.
    pub(crate) fn submit(&self, task: Task) {
        self.shared.queue.push(Op::Run(task));
        self.unpark();
    }

    /// Block until all previously submitted work has completed.
    ///
    /// Fails with [`LinkError::StreamDead`] if the worker died first, which
    /// happens when a queued launch aborted (e.g. the opt-in handshake
    /// watchdog fired).
    pub fn synchronize(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.submit(Box::new(move || {
            let _ = tx.send(());
        }));
        // A dead worker never runs the rendezvous task, so poll liveness
        // instead of blocking on the channel forever.
        loop {
            match rx.recv_timeout(std::time::Duration::from_millis(20)) {
                Ok(()) => return Ok(()),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.worker.as_ref().map_or(true, |w| w.is_finished()) {
                        return Err(LinkError::StreamDead);
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(LinkError::StreamDead),
            }
        }
    }

    fn unpark(&self) {
        if let Some(worker) = &self.worker {
            worker.thread().unpark();
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.queue.push(Op::Shutdown);
        self.unpark();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let stream = Stream::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..32 {
            let seen = Arc::clone(&seen);
            stream.submit(Box::new(move || seen.lock().unwrap().push(i)));
        }
        stream.synchronize().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_synchronize_waits_for_slow_task() {
        let stream = Stream::new().unwrap();
        let done = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&done);
        stream.submit(Box::new(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            *flag.lock().unwrap() = true;
        }));
        stream.synchronize().unwrap();
        assert!(*done.lock().unwrap());
    }

    #[test]
    fn test_synchronize_reports_dead_worker() {
        let stream = Stream::new().unwrap();
        stream.submit(Box::new(|| panic!("launch aborted")));
        assert!(matches!(
            stream.synchronize(),
            Err(LinkError::StreamDead)
        ));
    }

    #[test]
    fn test_empty_synchronize() {
        let stream = Stream::new().unwrap();
        stream.synchronize().unwrap();
        stream.synchronize().unwrap();
    }
}
