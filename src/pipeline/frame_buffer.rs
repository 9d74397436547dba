use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::av::decoder::{DecoderOutput, FrameCallback, VideoDecoder};
use crate::av::{DecodedVideoFrame, TrackKind};
use crate::config::PlaybackConfig;
use crate::error::{ClipError, Result};
use crate::format::PullDemuxer;

/// Fill level of the decoded frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPhase {
    /// Nothing buffered.
    Empty,
    /// Below target and refilling.
    Filling,
    /// Target reached or the track ended.
    TargetReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefillState {
    Idle,
    Filling,
    /// A trigger arrived while filling; run another pass when done.
    FillingWithPendingRetry,
}

#[derive(Default)]
struct FrameState {
    frames: VecDeque<DecodedVideoFrame>,
    end_of_track: bool,
    fault: Option<String>,
    fault_error: Option<ClipError>,
}

impl FrameState {
    fn settled(&self, target: usize) -> bool {
        self.frames.len() >= target || self.end_of_track || self.fault.is_some()
    }
}

struct Inner {
    demuxer: Arc<PullDemuxer>,
    // Lock order: decoder before frames. The output callback only touches
    // frames and refill since it may run inline inside `decode`.
    decoder: Mutex<Option<Box<dyn VideoDecoder>>>,
    frames: Mutex<FrameState>,
    refill: Mutex<RefillState>,
    refill_task: Mutex<Option<JoinHandle<()>>>,
    phase: watch::Sender<BufferPhase>,
    progress: Notify,
    handle: Handle,
    target: usize,
    closed: AtomicBool,
}

/// Keeps a short run of decoded frames ahead of the playhead and serves the
/// one nearest to a requested time.
///
/// Encoded samples are pulled from the demuxer and submitted to the decoder
/// until `buffered + decoder.decode_queue_size()` reaches the target, so the
/// buffer never holds more than `frame_buffer_target` frames. Refills are
/// triggered by [`render`](Self::render) and coalesced: at most one refill
/// runs at a time and a trigger arriving mid-refill schedules exactly one
/// more pass.
pub struct FrameBufferPipeline {
    inner: Arc<Inner>,
}

impl FrameBufferPipeline {
    /// Must be called from within a tokio runtime. Refills run on that
    /// runtime even when the decoder calls back from its own threads.
    pub fn new(
        demuxer: Arc<PullDemuxer>,
        decoder: Box<dyn VideoDecoder>,
        config: &PlaybackConfig,
    ) -> Self {
        let (phase, _) = watch::channel(BufferPhase::Empty);
        Self {
            inner: Arc::new(Inner {
                demuxer,
                decoder: Mutex::new(Some(decoder)),
                frames: Mutex::new(FrameState::default()),
                refill: Mutex::new(RefillState::Idle),
                refill_task: Mutex::new(None),
                phase,
                progress: Notify::new(),
                handle: Handle::current(),
                target: config.frame_buffer_target.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Configures the decoder for the demuxer's video track and waits until
    /// the buffer first reaches its target or the track ends.
    ///
    /// Fails with [`ClipError::UnsupportedCodec`] when the decoder rejects
    /// the track, or with the error that stopped the first fill.
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let track = inner
            .demuxer
            .track(TrackKind::Video)
            .ok_or(ClipError::NoSuchTrack(TrackKind::Video))?;

        let mut decoder = inner.decoder.lock().take().ok_or(ClipError::Closed)?;
        let weak = Arc::downgrade(inner);
        let callback: FrameCallback = Arc::new(move |output| on_output(&weak, output));
        let configured = decoder.configure(&track, callback).await;

        if inner.closed.load(Ordering::Acquire) {
            decoder.close();
            return Err(ClipError::Closed);
        }
        *inner.decoder.lock() = Some(decoder);
        configured?;
        debug!(
            "video decoder configured for {} ({}x{})",
            track.codec,
            track.width.unwrap_or(0),
            track.height.unwrap_or(0)
        );

        trigger_refill(inner);
        loop {
            let notified = inner.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = inner.frames.lock();
                if let Some(e) = state.fault_error.take() {
                    return Err(e);
                }
                if let Some(reason) = &state.fault {
                    return Err(ClipError::Decode(reason.clone()));
                }
                if state.settled(inner.target) {
                    return Ok(());
                }
            }
            if inner.closed.load(Ordering::Acquire) {
                return Err(ClipError::Closed);
            }
            notified.await;
        }
    }

    /// Returns the buffered frame closest to `timestamp_us`, or `None` when
    /// the buffer is empty. Frames older than the returned one are released.
    pub fn render(&self, timestamp_us: i64) -> Option<DecodedVideoFrame> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return None;
        }

        let (chosen, wants_refill) = {
            let mut state = inner.frames.lock();
            let chosen = choose_frame(&mut state.frames, timestamp_us);
            let wants_refill = state.frames.len() < inner.target
                && !state.end_of_track
                && state.fault.is_none();
            (chosen, wants_refill)
        };
        if chosen.is_none() {
            trace!("frame buffer underrun at {}us", timestamp_us);
        }

        if wants_refill {
            trigger_refill(inner);
        } else {
            inner.publish_phase();
        }
        chosen
    }

    /// Current fill phase.
    pub fn phase(&self) -> BufferPhase {
        *self.inner.phase.borrow()
    }

    /// Receives every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<BufferPhase> {
        self.inner.phase.subscribe()
    }

    /// Decoded frames held.
    pub fn buffered(&self) -> usize {
        self.inner.frames.lock().frames.len()
    }

    /// Timestamps of the held frames, oldest first.
    pub fn buffered_timestamps(&self) -> Vec<i64> {
        self.inner
            .frames
            .lock()
            .frames
            .iter()
            .map(|f| f.timestamp_us)
            .collect()
    }

    /// Frames kept ahead of the playhead.
    pub fn target(&self) -> usize {
        self.inner.target
    }

    /// Whether the video track has been fully decoded.
    pub fn is_end_of_track(&self) -> bool {
        self.inner.frames.lock().end_of_track
    }

    /// Why the pipeline stopped filling, if it did.
    pub fn fault(&self) -> Option<String> {
        self.inner.frames.lock().fault.clone()
    }

    /// Whether [`close`](Self::close) ran.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops refilling, closes the decoder without flushing and releases
    /// every buffered frame. Output arriving afterwards is dropped.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = inner.refill_task.lock().take() {
            task.abort();
        }
        if let Some(mut decoder) = inner.decoder.lock().take() {
            decoder.close();
        }
        {
            let mut state = inner.frames.lock();
            for frame in state.frames.drain(..) {
                frame.close();
            }
        }
        *inner.refill.lock() = RefillState::Idle;
        inner.publish_phase();
        inner.progress.notify_waiters();
        debug!("frame buffer closed");
    }
}

impl Drop for FrameBufferPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn publish_phase(&self) {
        let len = self.frames.lock().frames.len();
        let refilling = *self.refill.lock() != RefillState::Idle;
        let phase = if len >= self.target {
            BufferPhase::TargetReached
        } else if len == 0 && !refilling {
            BufferPhase::Empty
        } else {
            BufferPhase::Filling
        };
        self.phase.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                trace!("frame buffer phase {:?} -> {:?}", current, phase);
                *current = phase;
                true
            }
        });
    }

    fn record_fault(&self, e: ClipError) {
        error!("frame buffer stopped: {}", e);
        let mut state = self.frames.lock();
        state.fault = Some(e.to_string());
        state.fault_error = Some(e);
    }

    fn pending_decodes(&self) -> Option<usize> {
        self.decoder.lock().as_ref().map(|d| d.decode_queue_size())
    }

    /// One refill pass: pull and submit until the target is covered.
    async fn fill(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            let (buffered, settled) = {
                let state = self.frames.lock();
                (state.frames.len(), state.end_of_track || state.fault.is_some())
            };
            if settled {
                return;
            }
            let Some(pending) = self.pending_decodes() else {
                return;
            };
            if buffered + pending >= self.target {
                return;
            }

            match self.demuxer.get_next_chunk(TrackKind::Video).await {
                Ok(Some(sample)) => {
                    if self.is_closed() {
                        return;
                    }
                    let pts = sample.pts_us;
                    let submitted = match self.decoder.lock().as_mut() {
                        Some(decoder) => decoder.decode(sample),
                        None => return,
                    };
                    match submitted {
                        Ok(()) => trace!("submitted video sample at {}us", pts),
                        Err(e) if e.is_fatal() => {
                            self.record_fault(e);
                            self.progress.notify_waiters();
                            return;
                        }
                        Err(e) => warn!("skipping video sample at {}us: {}", pts, e),
                    }
                }
                Ok(None) => {
                    debug!("video track ended");
                    self.frames.lock().end_of_track = true;
                    self.progress.notify_waiters();
                    return;
                }
                Err(e) => {
                    if !self.is_closed() {
                        self.record_fault(e);
                        self.progress.notify_waiters();
                    }
                    return;
                }
            }
        }
    }
}

fn on_output(inner: &Weak<Inner>, output: DecoderOutput) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.is_closed() {
        return;
    }
    match output {
        DecoderOutput::Frame(frame) => {
            let below_target = {
                let mut state = inner.frames.lock();
                state.frames.push_back(frame);
                state.frames.len() < inner.target
            };
            inner.publish_phase();
            inner.progress.notify_waiters();
            if below_target {
                trigger_refill(&inner);
            }
        }
        DecoderOutput::Error(e) => {
            warn!("video decode failed, frame skipped: {}", e);
            trigger_refill(&inner);
        }
    }
}

fn trigger_refill(inner: &Arc<Inner>) {
    if inner.is_closed() {
        return;
    }
    {
        let mut state = inner.refill.lock();
        match *state {
            RefillState::Idle => *state = RefillState::Filling,
            RefillState::Filling => {
                *state = RefillState::FillingWithPendingRetry;
                return;
            }
            RefillState::FillingWithPendingRetry => return,
        }
    }
    inner.publish_phase();

    let task = inner.handle.spawn(refill_loop(inner.clone()));
    let mut slot = inner.refill_task.lock();
    if inner.is_closed() {
        task.abort();
    } else {
        *slot = Some(task);
    }
}

async fn refill_loop(inner: Arc<Inner>) {
    loop {
        inner.fill().await;

        let again = {
            let mut state = inner.refill.lock();
            if *state == RefillState::FillingWithPendingRetry && !inner.is_closed() {
                *state = RefillState::Filling;
                true
            } else {
                *state = RefillState::Idle;
                false
            }
        };
        if !again {
            break;
        }
        tokio::task::yield_now().await;
    }
    inner.publish_phase();
}

/// Picks the frame nearest to `timestamp_us` and drops everything before it.
///
/// Frames are in presentation order, so the scan stops as soon as the
/// distance grows. Ties keep the earlier frame.
fn choose_frame(
    frames: &mut VecDeque<DecodedVideoFrame>,
    timestamp_us: i64,
) -> Option<DecodedVideoFrame> {
    let first = frames.front()?;
    let mut best = 0;
    let mut best_delta = first.timestamp_us.abs_diff(timestamp_us);
    for (index, frame) in frames.iter().enumerate().skip(1) {
        let delta = frame.timestamp_us.abs_diff(timestamp_us);
        if delta < best_delta {
            best = index;
            best_delta = delta;
        } else {
            break;
        }
    }

    for stale in frames.drain(..best) {
        stale.close();
    }
    frames.front().cloned()
}
