use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::foundation::error::{MuxError, MuxResult};
use crate::sink::ReadyNotifier;

/// Bounded hand-off from a sink to its background worker.
///
/// The pump is "ready" while fewer than `depth` items are in flight. Whenever the worker
/// finishes an item and that moves the pump from not-ready to ready, the registered notifier
/// is invoked on the worker thread. A failed pump reports ready so the producer runs again and
/// observes the failure on its next `submit`.
pub struct FramePump<T> {
    shared: Arc<PumpShared>,
    tx: Option<Sender<T>>,
    worker: Option<JoinHandle<MuxResult<()>>>,
}

struct PumpShared {
    depth: usize,
    state: Mutex<PumpState>,
}

#[derive(Default)]
struct PumpState {
    in_flight: usize,
    closed: bool,
    failure: Option<String>,
    notifier: Option<ReadyNotifier>,
}

impl PumpState {
    fn ready(&self, depth: usize) -> bool {
        !self.closed && (self.failure.is_some() || self.in_flight < depth)
    }
}

impl PumpShared {
    fn complete_one(&self) {
        let notify = {
            let mut st = self.state.lock();
            let was_ready = st.ready(self.depth);
            st.in_flight = st.in_flight.saturating_sub(1);
            if !was_ready && st.ready(self.depth) {
                st.notifier.clone()
            } else {
                None
            }
        };
        if let Some(notify) = notify {
            notify();
        }
    }

    fn fail(&self, err: &MuxError) {
        let notify = {
            let mut st = self.state.lock();
            let was_ready = st.ready(self.depth);
            st.failure.get_or_insert_with(|| err.to_string());
            if !was_ready { st.notifier.clone() } else { None }
        };
        if let Some(notify) = notify {
            notify();
        }
    }
}

impl<T: Send + 'static> FramePump<T> {
    pub fn spawn<F>(label: &str, depth: usize, mut handler: F) -> MuxResult<Self>
    where
        F: FnMut(T) -> MuxResult<()> + Send + 'static,
    {
        let depth = depth.max(1);
        let shared = Arc::new(PumpShared {
            depth,
            state: Mutex::new(PumpState::default()),
        });
        let (tx, rx) = crossbeam_channel::bounded::<T>(depth);

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                let mut result = Ok(());
                for item in rx.iter() {
                    if result.is_ok()
                        && let Err(err) = handler(item)
                    {
                        worker_shared.fail(&err);
                        result = Err(err);
                    }
                    worker_shared.complete_one();
                }
                result
            })
            .map_err(|e| MuxError::construction(format!("failed to spawn sink worker: {e}")))?;

        Ok(Self {
            shared,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Register the callback fired on each not-ready to ready transition.
    pub fn set_notifier(&self, notifier: ReadyNotifier) {
        self.shared.state.lock().notifier = Some(notifier);
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().ready(self.shared.depth)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    pub fn submit(&self, item: T) -> MuxResult<()> {
        let Some(tx) = &self.tx else {
            return Err(MuxError::append_rejected("sink input is closed"));
        };
        {
            let mut st = self.shared.state.lock();
            if let Some(failure) = &st.failure {
                return Err(MuxError::sink(failure.clone()));
            }
            st.in_flight += 1;
        }
        if tx.send(item).is_err() {
            self.shared.state.lock().in_flight -= 1;
            return Err(MuxError::append_rejected("sink worker is gone"));
        }
        Ok(())
    }

    /// Stop accepting items, wait for the worker to drain, and report its first error.
    ///
    /// Idempotent; later calls return `Ok(())`.
    pub fn close(&mut self) -> MuxResult<()> {
        {
            let mut st = self.shared.state.lock();
            st.closed = true;
            st.notifier = None;
        }
        drop(self.tx.take());
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker
            .join()
            .map_err(|_| MuxError::sink("sink worker panicked"))?
    }
}

impl<T> Drop for FramePump<T> {
    fn drop(&mut self) {
        self.shared.state.lock().closed = true;
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
