//! Strictly serial execution contexts.
//!
//! A [`SerialQueue`] owns a piece of state on one dedicated thread and runs submitted jobs
//! against it in submission order, one at a time. Jobs return [`ControlFlow::Break`] to shut the
//! queue down; anything still queued at that point is dropped without running.

use std::ops::ControlFlow;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::foundation::error::{MuxError, MuxResult};

type Job<S> = Box<dyn FnOnce(&mut S) -> ControlFlow<()> + Send>;

pub struct SerialQueue<S> {
    label: String,
    tx: Sender<Job<S>>,
    handle: Option<JoinHandle<()>>,
}

/// Cloneable submission handle for a [`SerialQueue`].
///
/// Submitting after the queue has shut down is a silent no-op (reported as `false`).
pub struct Dispatcher<S> {
    tx: Sender<Job<S>>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> Dispatcher<S> {
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut S) -> ControlFlow<()> + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }
}

impl<S: Send + 'static> SerialQueue<S> {
    pub fn spawn(label: impl Into<String>, state: S) -> MuxResult<Self> {
        let label = label.into();
        let (tx, rx) = crossbeam_channel::unbounded::<Job<S>>();
        let handle = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || run(state, rx))
            .map_err(|e| MuxError::construction(format!("failed to spawn queue thread: {e}")))?;
        Ok(Self {
            label,
            tx,
            handle: Some(handle),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut S) -> ControlFlow<()> + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }

    pub fn dispatcher(&self) -> Dispatcher<S> {
        Dispatcher {
            tx: self.tx.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Block until the queue thread exits.
    pub fn join(&mut self) -> MuxResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| MuxError::Other(anyhow::anyhow!("queue '{}' panicked", self.label)))
    }

    /// Drop our own sender and join. The thread exits once no dispatcher remains or a job breaks.
    pub fn shutdown(mut self) -> MuxResult<()> {
        let (dead_tx, _) = crossbeam_channel::bounded(0);
        drop(std::mem::replace(&mut self.tx, dead_tx));
        self.join()
    }
}

fn run<S>(mut state: S, rx: Receiver<Job<S>>) {
    for job in rx.iter() {
        if job(&mut state).is_break() {
            break;
        }
    }
}
