//! Worker pool for CPU-bound command work, and the single delivery thread
//! every response passes through.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread;
use crate::bridge::handle::{CallerHandle, CommandResponse};
use crate::common::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads draining one job queue. Workers exit once the pool is
/// dropped and the queue is empty.
pub struct WorkerPool {
    sender: Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BridgeError::Config("Worker pool needs at least one thread".into()));
        }

        let (sender, receiver) = unbounded::<Job>();
        for index in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("bridge-worker-{}", index))
                .spawn(move || work(receiver))?;
        }
        tracing::debug!("Started {} bridge workers", size);

        Ok(Self { sender, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            tracing::error!("Worker pool is gone, dropping job");
        }
    }
}

fn work(receiver: Receiver<Job>) {
    for job in receiver.iter() {
        job();
    }
}

/// FIFO ordering point for responses. Cloning shares the same thread.
#[derive(Clone)]
pub struct Delivery {
    sender: Sender<(CallerHandle, CommandResponse)>,
}

impl Delivery {
    pub fn start() -> Result<Self> {
        let (sender, receiver) = unbounded::<(CallerHandle, CommandResponse)>();
        thread::Builder::new()
            .name("bridge-delivery".into())
            .spawn(move || {
                for (caller, response) in receiver.iter() {
                    tracing::trace!("Delivering response to {}", caller.id());
                    caller.deliver(response);
                }
            })?;
        Ok(Self { sender })
    }

    pub fn post(&self, caller: CallerHandle, response: CommandResponse) {
        if let Err(e) = self.sender.send((caller, response)) {
            let (caller, _) = e.into_inner();
            tracing::error!("Delivery thread is gone, response for {} lost", caller.id());
        }
    }
}
