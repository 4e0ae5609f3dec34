//! A small, bounded worker pool for ephemeral RPC fan-out (election probes,
//! clock-sync samples). spec.md §9 redesign flag: "Thread-spawning for
//! every ephemeral RPC (current source pattern) re-architects to a bounded
//! worker pool or cooperative tasks." A fixed set of threads, reused across
//! every election round and clock-sync attempt for the life of the process,
//! replaces the original one-thread-per-RPC churn.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct EphemeralPool {
    sender: Sender<Job>,
    _workers: Vec<JoinHandle<()>>,
}

impl EphemeralPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size.max(1))
            .map(|_| {
                let receiver: Arc<Mutex<Receiver<Job>>> = receiver.clone();
                thread::spawn(move || loop {
                    let job = {
                        let rx = receiver.lock().unwrap();
                        rx.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
            })
            .collect();
        Self {
            sender,
            _workers: workers,
        }
    }

    /// Queue `job` to run on the next free worker. Never blocks the caller
    /// waiting for a worker to become free; if every worker is busy the job
    /// simply waits in the channel.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        // A full channel send only fails if every worker thread has
        // panicked and exited; there is nothing useful to do but drop the
        // job, matching "ephemeral tasks ... swallowed" in spec.md §7.
        let _ = self.sender.send(Box::new(job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn jobs_run_on_worker_threads() {
        let pool = EphemeralPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(5, counter.load(Ordering::SeqCst));
    }
}
