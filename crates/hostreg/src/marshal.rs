//! Host thread marshaller
//!
//! Host-managed objects may only be created and destroyed on the host's
//! designated thread. Other threads submit closures to a single-consumer
//! queue which the host drains once per update with [`HostThread::tick`].
//! Submissions from the host thread itself run inline.
//!
//! A headless marshaller (no host thread) runs every job inline; it is what
//! tests and hosts without thread affinity use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned when a marshalled job cannot deliver its result
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("host thread dropped the operation before completing it")]
    Dropped,
}

/// Handle to the host thread's work queue. Cloning shares the queue.
#[derive(Clone)]
pub struct HostThread {
    inner: Arc<HostThreadInner>,
}

struct HostThreadInner {
    host: Option<ThreadId>,
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<mpsc::UnboundedReceiver<Job>>,
    pending: AtomicUsize,
}

impl HostThread {
    /// Bind the marshaller to the calling thread
    pub fn current() -> Self {
        Self::bound_to(thread::current().id())
    }

    pub fn bound_to(host: ThreadId) -> Self {
        Self::with_host(Some(host))
    }

    /// Marshaller without a host thread: every job runs inline
    pub fn headless() -> Self {
        Self::with_host(None)
    }

    fn with_host(host: Option<ThreadId>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HostThreadInner {
                host,
                sender,
                receiver: Mutex::new(receiver),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    pub fn is_headless(&self) -> bool {
        self.inner.host.is_none()
    }

    /// Whether jobs submitted from the calling thread run inline
    pub fn is_host_thread(&self) -> bool {
        match self.inner.host {
            Some(host) => thread::current().id() == host,
            None => true,
        }
    }

    /// Jobs queued and not yet drained
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Run `job` on the host thread without waiting for it
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_host_thread() {
            job();
        } else {
            self.enqueue(Box::new(job));
        }
    }

    /// Run `job` on the host thread and block until it completes
    pub fn run_blocking<F, R>(&self, job: F) -> Result<R, MarshalError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_host_thread() {
            return Ok(job());
        }

        let (tx, rx) = std_mpsc::sync_channel(1);
        self.enqueue(Box::new(move || {
            let _ = tx.send(job());
        }));
        rx.recv().map_err(|_| MarshalError::Dropped)
    }

    /// Run `job` on the host thread and await its completion
    pub async fn run_async<F, R>(&self, job: F) -> Result<R, MarshalError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_host_thread() {
            return Ok(job());
        }

        let (tx, rx) = oneshot::channel();
        self.enqueue(Box::new(move || {
            let _ = tx.send(job());
        }));
        rx.await.map_err(|_| MarshalError::Dropped)
    }

    /// Drain and run every queued job. Must be called on the host thread.
    ///
    /// Jobs queued while draining run on the next tick. Returns the number
    /// of jobs executed.
    pub fn tick(&self) -> usize {
        if !self.is_host_thread() {
            warn!("HostThread::tick called off the host thread; ignoring");
            return 0;
        }

        let jobs: Vec<Job> = {
            let mut receiver = self.inner.receiver.lock();
            let mut jobs = Vec::new();
            while let Ok(job) = receiver.try_recv() {
                jobs.push(job);
            }
            jobs
        };

        let count = jobs.len();
        self.inner.pending.fetch_sub(count, Ordering::AcqRel);
        for job in jobs {
            job();
        }
        if count > 0 {
            debug!("Host tick ran {} marshalled jobs", count);
        }
        count
    }

    fn enqueue(&self, job: Job) {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        if self.inner.sender.send(job).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
            warn!("Host queue closed; dropping marshalled job");
        }
    }
}

impl std::fmt::Debug for HostThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostThread")
            .field("host", &self.inner.host)
            .field("pending", &self.pending())
            .finish()
    }
}
