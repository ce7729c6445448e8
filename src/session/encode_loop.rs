use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::foundation::core::{MediaTime, PixelFormat};
use crate::foundation::error::{MuxError, MuxResult};
use crate::session::cleanup;
use crate::session::continuation::Completion;
use crate::sink::{ReadyNotifier, Sink, SinkStatus};
use crate::source::{Frame, FrameSource, FrameTiming};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Driving,
    Draining,
    Cancelled,
    Failed,
    Terminal,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        self == Self::Terminal
    }
}

/// Readiness-driven pump from one [`FrameSource`] into one [`Sink`].
///
/// Every method runs on the session's serial queue. [`EncodeLoop::step`] is the body of the
/// sink's readiness callback: it appends while the sink is ready and returns
/// `ControlFlow::Continue` to suspend, or `ControlFlow::Break` once the terminal transition ran.
pub struct EncodeLoop {
    source: Box<dyn FrameSource>,
    sink: Box<dyn Sink>,
    output: PathBuf,
    input_format: PixelFormat,
    state: LoopState,
    observed: Arc<Mutex<LoopState>>,
    step_pending: Arc<AtomicBool>,
    running: MediaTime,
    end_time: MediaTime,
    appended: usize,
    cause: Option<MuxError>,
    completion: Completion,
}

impl EncodeLoop {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn Sink>,
        input_format: PixelFormat,
        completion: Completion,
        observed: Arc<Mutex<LoopState>>,
        step_pending: Arc<AtomicBool>,
    ) -> Self {
        let output = sink.output_path().to_path_buf();
        let start = source.start_time();
        *observed.lock() = LoopState::Idle;
        Self {
            source,
            sink,
            output,
            input_format,
            state: LoopState::Idle,
            observed,
            step_pending,
            running: start,
            end_time: start,
            appended: 0,
            cause: None,
            completion,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn appended(&self) -> usize {
        self.appended
    }

    fn set_state(&mut self, state: LoopState) {
        self.state = state;
        *self.observed.lock() = state;
    }

    pub(crate) fn arm(&mut self, notifier: ReadyNotifier) -> ControlFlow<()> {
        self.sink.request_media_data_when_ready(notifier);
        ControlFlow::Continue(())
    }

    /// One readiness callback: append while the sink has capacity, then suspend.
    pub fn step(&mut self) -> ControlFlow<()> {
        self.step_pending.store(false, Ordering::SeqCst);
        match self.state {
            LoopState::Idle => {
                self.set_state(LoopState::Driving);
                tracing::debug!(output = %self.output.display(), "encode loop driving");
            }
            LoopState::Driving => {}
            LoopState::Terminal => return ControlFlow::Break(()),
            LoopState::Draining | LoopState::Cancelled | LoopState::Failed => {
                return ControlFlow::Continue(());
            }
        }

        while self.sink.is_ready_for_more_data() {
            if !self.source.has_next() {
                return self.drain();
            }
            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    if let Err(err) = self.append(frame) {
                        return self.fail(Some(err));
                    }
                }
                Ok(None) => return self.drain(),
                Err(err) => return self.fail(Some(err)),
            }
        }

        if matches!(self.sink.status(), SinkStatus::Failed | SinkStatus::Cancelled) {
            return self.fail(None);
        }
        tracing::debug!(appended = self.appended, "sink not ready, suspending");
        ControlFlow::Continue(())
    }

    fn append(&mut self, frame: Frame) -> MuxResult<()> {
        let buffer = if frame.buffer.format == self.input_format {
            frame.buffer
        } else {
            frame.buffer.converted(self.input_format)
        };
        let (pts, next) = match frame.timing {
            FrameTiming::Duration(d) => (self.running, self.running.add(d)),
            FrameTiming::Timestamp { pts, duration } => (pts, pts.add(duration)),
        };

        self.sink.append(buffer, pts)?;
        self.appended += 1;
        self.running = match frame.timing {
            FrameTiming::Duration(_) => next,
            FrameTiming::Timestamp { pts, .. } => pts,
        };
        if next > self.end_time {
            self.end_time = next;
        }
        Ok(())
    }

    fn drain(&mut self) -> ControlFlow<()> {
        self.set_state(LoopState::Draining);
        tracing::debug!(appended = self.appended, end = %self.end_time, "source exhausted, draining sink");
        self.sink.mark_as_finished();
        self.sink.end_session(self.end_time);
        self.sink.finish_writing();
        self.complete()
    }

    fn fail(&mut self, cause: Option<MuxError>) -> ControlFlow<()> {
        if let Some(err) = &cause {
            tracing::warn!(output = %self.output.display(), error = %err, "encode loop failed");
        }
        self.set_state(LoopState::Failed);
        self.cause = cause;
        self.source.cancel();
        if self.sink.status() == SinkStatus::Writing {
            self.sink.cancel_writing();
        }
        self.complete()
    }

    /// Explicit cancellation; a no-op once terminal.
    pub fn cancel(&mut self) -> ControlFlow<()> {
        if self.state.is_terminal() {
            return ControlFlow::Break(());
        }
        tracing::debug!(output = %self.output.display(), state = ?self.state, "cancelling session");
        self.set_state(LoopState::Cancelled);
        self.cause = None;
        self.source.cancel();
        self.sink.cancel_writing();
        self.complete()
    }

    /// Terminal transition: named cleanup steps, then exactly one continuation.
    fn complete(&mut self) -> ControlFlow<()> {
        if self.completion.is_spent() {
            self.set_state(LoopState::Terminal);
            return ControlFlow::Break(());
        }
        let status = self.sink.status();
        let cancelled = self.state == LoopState::Cancelled;
        self.set_state(LoopState::Terminal);

        match status {
            SinkStatus::Completed => {
                let swept = cleanup::sweep_sidecars(&self.output);
                tracing::info!(output = %self.output.display(), frames = self.appended, swept, "session completed");
                self.completion.succeed();
            }
            SinkStatus::Failed | SinkStatus::Cancelled => {
                cleanup::remove_output(&self.output);
                let err = self.cause.take().or_else(|| self.sink.take_error());
                if cancelled {
                    tracing::info!(output = %self.output.display(), "session cancelled");
                } else {
                    tracing::info!(output = %self.output.display(), error = ?err, "session failed");
                }
                self.completion.fail(err);
            }
            other => {
                self.sink.cancel_writing();
                cleanup::remove_output(&self.output);
                let err = self.cause.take().or_else(|| self.sink.take_error());
                tracing::warn!(output = %self.output.display(), status = ?other, "sink ended in an unexpected state");
                self.completion.fail(err);
            }
        }
        ControlFlow::Break(())
    }
}
