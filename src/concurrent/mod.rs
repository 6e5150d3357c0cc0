// Copyright (c) 2025 RustyDB Contributors
//
// Job scheduler: a fixed-size worker pool draining a shared job queue in
// barrier-synchronized batches (submit a batch, execute_all, wait_all).
//
// Unlike a work-stealing pool, jobs here are unordered and run-to-completion
// with no inter-job dependencies; the scheduler's only contract is that every
// job submitted before `execute_all` happens-before the return of the
// following `wait_all`. This is deliberately not lock-free: correctness here
// rests on the queue, the "available" flag, and the in-flight counter always
// being read and written under the same mutex, never on an atomic read raced
// against a lock holder.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// A unit of work submitted to the scheduler. Each variant owns its closure's
/// captured state directly, replacing the source's `(fn pointer, void* args)`
/// pair with Rust's native closure capture.
pub enum Job {
    Histogram(Box<dyn FnOnce() + Send + 'static>),
    Building(Box<dyn FnOnce() + Send + 'static>),
    Probe(Box<dyn FnOnce() + Send + 'static>),
}

impl Job {
    fn run(self) {
        match self {
            Job::Histogram(f) | Job::Building(f) | Job::Probe(f) => f(),
        }
    }
}

struct QueueState {
    queue: VecDeque<Job>,
    is_available: bool,
    in_flight: usize,
    terminate: bool,
}

/// Fixed-size worker pool with a barrier-style execute/wait job queue.
///
/// Modeled directly on the scheduler in the SIGMOD contest reference: a mutex
/// + condvar pair guards the queue and the "a batch is ready" flag, and a
/// second mutex + condvar pair guards the in-flight job counter.
pub struct JobScheduler {
    state: Arc<Mutex<QueueState>>,
    queue_available: Arc<Condvar>,
    jobs_completed: Arc<Condvar>,
    workers: Vec<JoinHandle<()>>,
}

impl JobScheduler {
    pub fn new(execution_threads: usize) -> Self {
        let state = Arc::new(Mutex::new(QueueState {
            queue: VecDeque::new(),
            is_available: false,
            in_flight: 0,
            terminate: false,
        }));
        let queue_available = Arc::new(Condvar::new());
        let jobs_completed = Arc::new(Condvar::new());

        let workers = (0..execution_threads.max(1))
            .map(|_| {
                let state = Arc::clone(&state);
                let queue_available = Arc::clone(&queue_available);
                let jobs_completed = Arc::clone(&jobs_completed);
                std::thread::spawn(move || worker_loop(state, queue_available, jobs_completed))
            })
            .collect();

        Self {
            state,
            queue_available,
            jobs_completed,
            workers,
        }
    }

    /// Appends a job to the queue and marks one more job in-flight. Must be
    /// called before `execute_all` for the job to be picked up by the
    /// following batch (submitting after `execute_all` is still safe — it
    /// simply joins the currently-draining batch).
    pub fn submit(&self, job: Job) {
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.queue.push_back(job);
    }

    /// Wakes every worker to begin draining the queue.
    pub fn execute_all(&self) {
        let mut state = self.state.lock();
        state.is_available = true;
        self.queue_available.notify_all();
    }

    /// Blocks until every job submitted before the matching `execute_all` has
    /// completed. Resets the batch so the scheduler is ready for the next one.
    pub fn wait_all(&self) {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            self.jobs_completed.wait(&mut state);
        }
        state.is_available = false;
        state.queue.clear();
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            state.terminate = true;
        }
        self.queue_available.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    state: Arc<Mutex<QueueState>>,
    queue_available: Arc<Condvar>,
    jobs_completed: Arc<Condvar>,
) {
    loop {
        let job = {
            let mut guard = state.lock();
            while !guard.is_available && !guard.terminate {
                queue_available.wait(&mut guard);
            }

            if guard.terminate {
                drop(guard);
                queue_available.notify_all();
                return;
            }

            let job = guard.queue.pop_front();
            if job.is_none() {
                guard.is_available = false;
            }
            job
        };
        queue_available.notify_all();

        if let Some(job) = job {
            job.run();

            let mut guard = state.lock();
            guard.in_flight -= 1;
            if guard.in_flight == 0 {
                guard.is_available = false;
            }
            drop(guard);
            jobs_completed.notify_one();
        }
    }
}
