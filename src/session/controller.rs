use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::config::ExportConfig;
use crate::foundation::error::{MuxError, MuxResult};
use crate::queue::SerialQueue;
use crate::session::cleanup;
use crate::session::continuation::Completion;
use crate::session::encode_loop::{EncodeLoop, LoopState};
use crate::sink::{FfmpegSink, ReadyNotifier, Sink, VideoInputSettings};
use crate::source::{FrameSource, SourceSpec, open_source};

/// Owns one export session: its serial input queue and the encode loop running on it.
///
/// Construction errors are returned synchronously and no continuation fires. Once constructed,
/// exactly one of the completion's callbacks fires, whether the session finishes, fails, is
/// cancelled, or the controller is dropped early.
pub struct SessionController {
    output: PathBuf,
    queue: SerialQueue<EncodeLoop>,
    state: Arc<Mutex<LoopState>>,
    step_pending: Arc<AtomicBool>,
    started: AtomicBool,
}

impl SessionController {
    /// Open the source described by `spec` and an ffmpeg sink at `output`.
    #[tracing::instrument(skip(cfg, completion), fields(source = %spec.describe()))]
    pub fn open(
        spec: &SourceSpec,
        output: &Path,
        cfg: &ExportConfig,
        completion: Completion,
    ) -> MuxResult<Self> {
        Self::build(
            output,
            cfg,
            completion,
            |out| Ok(Box::new(FfmpegSink::open(out, cfg)?) as Box<dyn Sink>),
            || open_source(spec, cfg),
        )
    }

    /// Assemble a session from already-opened parts. The output location is the sink's.
    pub fn with_parts(
        source: Box<dyn FrameSource>,
        sink: Box<dyn Sink>,
        cfg: &ExportConfig,
        completion: Completion,
    ) -> MuxResult<Self> {
        let output = sink.output_path().to_path_buf();
        Self::build(&output, cfg, completion, move |_| Ok(sink), move || Ok(source))
    }

    fn build<K, S>(
        output: &Path,
        cfg: &ExportConfig,
        completion: Completion,
        open_sink: K,
        open_source: S,
    ) -> MuxResult<Self>
    where
        K: FnOnce(&Path) -> MuxResult<Box<dyn Sink>>,
        S: FnOnce() -> MuxResult<Box<dyn FrameSource>>,
    {
        cfg.validate()?;
        cleanup::prepare_output(output).map_err(|e| e.into_construction("prepare output location"))?;

        let mut sink = open_sink(output).map_err(|e| e.into_construction("open sink"))?;
        let source = match open_source() {
            Ok(source) => source,
            Err(err) => {
                sink.cancel_writing();
                return Err(err.into_construction("open source"));
            }
        };

        let size = source.output_size();
        let settings = VideoInputSettings::new(size, cfg.codec, cfg.quality);
        let configured = sink
            .add_video_input(settings)
            .and_then(|()| sink.start_writing());
        if let Err(err) = configured {
            sink.cancel_writing();
            cleanup::remove_output(output);
            return Err(err.into_construction("configure sink"));
        }
        let start = source.start_time();
        sink.start_session(start);

        let state = Arc::new(Mutex::new(LoopState::Idle));
        let step_pending = Arc::new(AtomicBool::new(false));
        let encode_loop = EncodeLoop::new(
            source,
            sink,
            settings.pixel_format,
            completion,
            Arc::clone(&state),
            Arc::clone(&step_pending),
        );
        let queue = SerialQueue::spawn("alphamux-session", encode_loop)
            .map_err(|e| e.into_construction("spawn session queue"))?;

        tracing::info!(output = %output.display(), %size, %start, codec = ?cfg.codec, "session constructed");
        Ok(Self {
            output: output.to_path_buf(),
            queue,
            state,
            step_pending,
            started: AtomicBool::new(false),
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Last state the encode loop reported.
    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    /// Arm the sink's readiness callback and run the first step. Later calls are ignored.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let dispatcher = self.queue.dispatcher();
        let pending = Arc::clone(&self.step_pending);
        let notifier: ReadyNotifier = Arc::new(move || {
            if !pending.swap(true, Ordering::SeqCst) {
                dispatcher.dispatch(EncodeLoop::step);
            }
        });
        let armed = Arc::clone(&notifier);
        self.queue.dispatch(move |lp: &mut EncodeLoop| lp.arm(armed));
        notifier();
    }

    /// Enqueue cancellation. Safe at any point; a no-op once the session is terminal.
    pub fn cancel(&self) {
        self.queue.dispatch(EncodeLoop::cancel);
    }

    pub fn is_finished(&self) -> bool {
        self.queue.is_finished()
    }

    /// Block until the terminal continuation has fired.
    ///
    /// A session that was neither started nor cancelled is started first.
    pub fn wait(&mut self) -> MuxResult<()> {
        self.start();
        self.queue.join()
    }

    /// Start the session and block until it is terminal.
    pub fn run(mut self) -> MuxResult<()> {
        self.wait()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.queue.is_finished() {
            return;
        }
        self.queue.dispatch(EncodeLoop::cancel);
        if let Err(err) = self.queue.join() {
            tracing::warn!(
                queue = self.queue.label(),
                output = %self.output.display(),
                error = %err,
                "session queue did not exit cleanly"
            );
        }
    }
}

/// Run one session to completion and turn its continuation into a `Result`.
///
/// Cancellation surfaces as [`MuxError::Cancelled`].
pub fn run_session(spec: &SourceSpec, output: &Path, cfg: &ExportConfig) -> MuxResult<()> {
    let (tx, rx) = crossbeam_channel::bounded::<MuxResult<()>>(1);
    let ok_tx = tx.clone();
    let completion = Completion::new(
        move || {
            let _ = ok_tx.send(Ok(()));
        },
        move |err| {
            let _ = tx.send(Err(err.unwrap_or(MuxError::Cancelled)));
        },
    );
    SessionController::open(spec, output, cfg, completion)?.run()?;
    rx.recv()
        .map_err(|_| MuxError::Other(anyhow::anyhow!("session ended without a result")))?
}
