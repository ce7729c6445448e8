use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender};

use crate::composite::{CompositionInstruction, TrackId};
use crate::decode::track::{Sample, TrackReader};
use crate::foundation::core::{MediaTime, Size, TimeRange};
use crate::foundation::error::{MuxError, MuxResult};
use crate::queue::SerialQueue;
use crate::source::{Frame, FrameSource, FrameTiming, source_gone};

const COLOR_TRACK: TrackId = TrackId(1);
const MASK_TRACK: TrackId = TrackId(2);

type ComposeResult = MuxResult<Option<Frame>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadState {
    Reading,
    Exhausted,
    Failed,
    Cancelled,
}

/// Color track + luminance mask track, read together and composited into premultiplied BGRA frames.
///
/// Reading and compositing run on a dedicated serial queue; the source keeps at most one frame
/// in flight ahead of the consumer. The color track is the reference: its time range bounds the
/// output and its timestamps are the output timestamps.
pub struct TrackPairSource {
    size: Size,
    time_range: TimeRange,
    composer: Option<SerialQueue<Composer>>,
    results: Receiver<ComposeResult>,
    in_flight: usize,
    state: ReadState,
    cancelled: Arc<AtomicBool>,
}

impl TrackPairSource {
    pub fn new(color: Box<dyn TrackReader>, mask: Box<dyn TrackReader>) -> MuxResult<Self> {
        let size = color.natural_size();
        if size.is_empty() {
            return Err(MuxError::construction("color track has no picture"));
        }
        if mask.natural_size() != size {
            return Err(MuxError::construction(format!(
                "mask track is {} but color track is {size}",
                mask.natural_size()
            )));
        }
        let time_range = color.time_range();
        let instruction = CompositionInstruction::new(time_range, COLOR_TRACK, MASK_TRACK);

        let (results_tx, results) = crossbeam_channel::unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        let composer = Composer {
            color,
            mask,
            mask_cursor: None,
            instruction,
            results_tx,
            cancelled: Arc::clone(&cancelled),
        };
        let composer = SerialQueue::spawn("alphamux-compositor", composer)?;

        tracing::debug!(%size, start = %time_range.start, end = %time_range.end(), "track pair source ready");
        let mut source = Self {
            size,
            time_range,
            composer: Some(composer),
            results,
            in_flight: 0,
            state: ReadState::Reading,
            cancelled,
        };
        source.request();
        Ok(source)
    }

    fn request(&mut self) {
        let Some(composer) = &self.composer else {
            return;
        };
        if composer.dispatch(Composer::compose_job) {
            self.in_flight += 1;
        }
    }

    fn stop_composer(&mut self) {
        let Some(composer) = self.composer.take() else {
            return;
        };
        composer.dispatch(|c: &mut Composer| {
            c.color.cancel();
            c.mask.cancel();
            ControlFlow::Break(())
        });
        if let Err(err) = composer.shutdown() {
            tracing::warn!(error = %err, "compositor queue did not shut down cleanly");
        }
        self.in_flight = 0;
    }
}

impl FrameSource for TrackPairSource {
    fn output_size(&self) -> Size {
        self.size
    }

    fn start_time(&self) -> MediaTime {
        self.time_range.start
    }

    fn has_next(&self) -> bool {
        self.state == ReadState::Reading
    }

    fn next_frame(&mut self) -> MuxResult<Option<Frame>> {
        if self.state != ReadState::Reading {
            return Ok(None);
        }
        if self.in_flight == 0 {
            self.request();
        }
        let result = match self.results.recv() {
            Ok(result) => result,
            Err(_) => {
                self.state = ReadState::Failed;
                self.stop_composer();
                return Err(source_gone());
            }
        };
        self.in_flight = self.in_flight.saturating_sub(1);

        match result {
            Ok(Some(frame)) => {
                self.request();
                Ok(Some(frame))
            }
            Ok(None) => {
                self.state = ReadState::Exhausted;
                self.stop_composer();
                Ok(None)
            }
            Err(err) => {
                self.state = ReadState::Failed;
                self.stop_composer();
                Err(err)
            }
        }
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if self.state == ReadState::Reading {
            self.state = ReadState::Cancelled;
        }
        self.stop_composer();
    }
}

impl Drop for TrackPairSource {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Composer {
    color: Box<dyn TrackReader>,
    mask: Box<dyn TrackReader>,
    /// Most recent mask sample read; reused while it still covers the color timestamps.
    mask_cursor: Option<Sample>,
    instruction: CompositionInstruction,
    results_tx: Sender<ComposeResult>,
    cancelled: Arc<AtomicBool>,
}

enum MaskPosition {
    Covered,
    Gap,
    Behind,
}

impl Composer {
    fn compose_job(&mut self) -> ControlFlow<()> {
        let result = self.compose_next();
        let _ = self.results_tx.send(result);
        ControlFlow::Continue(())
    }

    fn compose_next(&mut self) -> ComposeResult {
        let range = self.instruction.time_range;
        let color = loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let Some(sample) = self.color.copy_next_sample()? else {
                return Ok(None);
            };
            if sample.pts >= range.end() {
                return Ok(None);
            }
            if range.contains(sample.pts) {
                break sample;
            }
        };

        self.seek_mask(color.pts)?;
        let mask = self
            .mask_cursor
            .as_ref()
            .ok_or_else(|| MuxError::missing_sample("mask", color.pts))?;

        let pts = color.pts;
        let duration = color.duration;
        let buffer = self.instruction.render(color.buffer, &mask.buffer);
        Ok(Some(Frame {
            buffer,
            timing: FrameTiming::Timestamp { pts, duration },
        }))
    }

    /// Advance the mask cursor to the sample covering `t`.
    fn seek_mask(&mut self, t: MediaTime) -> MuxResult<()> {
        loop {
            let position = match &self.mask_cursor {
                Some(s) if s.covers(t) => MaskPosition::Covered,
                Some(s) if s.pts > t => MaskPosition::Gap,
                _ => MaskPosition::Behind,
            };
            match position {
                MaskPosition::Covered => return Ok(()),
                MaskPosition::Gap => return Err(MuxError::missing_sample("mask", t)),
                MaskPosition::Behind => match self.mask.copy_next_sample()? {
                    Some(next) => self.mask_cursor = Some(next),
                    None => {
                        self.mask_cursor = None;
                        return Err(MuxError::missing_sample("mask", t));
                    }
                },
            }
        }
    }
}
