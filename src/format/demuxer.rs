use bytes::Bytes;
use futures::stream::{self, Stream};
use log::{debug, error, info, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::mp4::Mp4Source;
use super::{SourceEvent, TrackSource};
use crate::av::{EncodedSample, TrackDescriptor, TrackKind};
use crate::config::PlaybackConfig;
use crate::error::{ClipError, Result};

type Waiter = oneshot::Sender<Result<Option<EncodedSample>>>;

#[derive(Default)]
struct TrackQueue {
    track: Option<TrackDescriptor>,
    samples: VecDeque<EncodedSample>,
    waiter: Option<Waiter>,
    ended: bool,
    /// The source skips this track until the queue drains.
    held: bool,
}

impl TrackQueue {
    /// A dropped pull leaves a closed sender behind; it does not count.
    fn has_waiter(&self) -> bool {
        self.waiter.as_ref().map_or(false, |w| !w.is_closed())
    }

    /// Whether the source still has to deliver for this track.
    fn is_live(&self) -> bool {
        self.track.is_some() && !self.ended && !self.held
    }

    fn release(&mut self, source: &dyn TrackSource) {
        if let (true, Some(track)) = (self.held, self.track.as_ref()) {
            self.held = false;
            source.hold_track(track.id, false);
        }
    }
}

#[derive(Default)]
struct DemuxState {
    queues: [TrackQueue; 2],
    source_running: bool,
    failure: Option<String>,
    closed: bool,
}

impl DemuxState {
    fn slot_for(&self, track_id: u32) -> Option<usize> {
        self.queues
            .iter()
            .position(|q| q.track.as_ref().map(|t| t.id) == Some(track_id))
    }

    fn fail_waiters(&mut self, make: impl Fn() -> ClipError) {
        for queue in &mut self.queues {
            if let Some(waiter) = queue.waiter.take() {
                let _ = waiter.send(Err(make()));
            }
        }
    }
}

/// Per-track pull interface over a push-style [`TrackSource`].
///
/// Samples pushed by the source are queued per track kind. A pull takes
/// the head of its queue, or arms the source and waits for the next batch.
/// Only one pull per track kind may be outstanding; a second one fails with
/// [`ClipError::ConcurrentRead`].
///
/// Backpressure is per track. A batch that leaves its queue at or above the
/// high water mark holds that track at the source while the other keeps
/// flowing; once every remaining track is held the source is stopped. A
/// pull that drains a queue below the low water mark releases the track and
/// arms the source again.
pub struct PullDemuxer {
    source: Arc<dyn TrackSource>,
    state: Arc<Mutex<DemuxState>>,
    pump: JoinHandle<()>,
    low_water: usize,
}

impl PullDemuxer {
    /// Wraps a source and the receiving end of its event channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        source: Arc<dyn TrackSource>,
        events: mpsc::UnboundedReceiver<SourceEvent>,
        config: &PlaybackConfig,
    ) -> Self {
        let state = Arc::new(Mutex::new(DemuxState::default()));
        let pump = tokio::spawn(pump(
            state.clone(),
            source.clone(),
            events,
            config.sample_high_water,
        ));

        Self {
            source,
            state,
            pump,
            low_water: config.sample_low_water,
        }
    }

    /// Demuxes an MP4 byte stream.
    pub fn open<R>(reader: R, config: &PlaybackConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (source, events) = Mp4Source::new(reader, config);
        Self::new(Arc::new(source), events, config)
    }

    /// Waits for container metadata and selects the first video and the
    /// first audio track.
    pub async fn initialize(&self) -> Result<Vec<TrackDescriptor>> {
        if self.state.lock().closed {
            return Err(ClipError::Closed);
        }
        let tracks = self.source.tracks().await?;
        let video = tracks.iter().find(|t| t.is_video()).cloned();
        let audio = tracks.iter().find(|t| t.is_audio()).cloned();
        if video.is_none() && audio.is_none() {
            return Err(ClipError::ContainerParse("no audio or video track".into()));
        }

        for track in video.iter().chain(audio.iter()) {
            self.source.select_track(track.id)?;
        }
        info!(
            "demuxer ready: video={}, audio={}",
            video.as_ref().map_or("none", |t| t.codec.as_str()),
            audio.as_ref().map_or("none", |t| t.codec.as_str())
        );

        let mut state = self.state.lock();
        state.queues[TrackKind::Video.index()].track = video;
        state.queues[TrackKind::Audio.index()].track = audio;
        Ok(tracks)
    }

    /// Next encoded sample of the track, or `None` once the track has ended.
    pub async fn get_next_chunk(&self, kind: TrackKind) -> Result<Option<EncodedSample>> {
        let receiver = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(ClipError::Closed);
            }
            let queue = &mut state.queues[kind.index()];
            if queue.track.is_none() {
                return Err(ClipError::NoSuchTrack(kind));
            }

            if let Some(sample) = queue.samples.pop_front() {
                let rearm = !queue.ended && queue.samples.len() < self.low_water;
                if rearm {
                    queue.release(self.source.as_ref());
                    if !state.source_running {
                        self.arm(state);
                    }
                }
                return Ok(Some(sample));
            }
            if queue.ended {
                return Ok(None);
            }
            if queue.has_waiter() {
                error!("second {} pull issued while one is pending", kind);
                return Err(ClipError::ConcurrentRead(kind));
            }
            if let Some(reason) = &state.failure {
                return Err(ClipError::ContainerParse(reason.clone()));
            }

            let (tx, rx) = oneshot::channel();
            queue.waiter = Some(tx);
            queue.release(self.source.as_ref());
            if !state.source_running {
                self.arm(state);
            }
            rx
        };

        receiver.await.unwrap_or(Err(ClipError::Closed))
    }

    /// Successive pulls of one track as a stream. It ends after the last
    /// sample, or after yielding the first error.
    pub fn samples(&self, kind: TrackKind) -> impl Stream<Item = Result<EncodedSample>> + '_ {
        stream::unfold(Some(self), move |demuxer| async move {
            let demuxer = demuxer?;
            match demuxer.get_next_chunk(kind).await {
                Ok(Some(sample)) => Some((Ok(sample), Some(demuxer))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    fn arm(&self, state: &mut DemuxState) {
        state.source_running = true;
        self.source.start();
    }

    /// Descriptor of the selected track of this kind.
    pub fn track(&self, kind: TrackKind) -> Option<TrackDescriptor> {
        self.state.lock().queues[kind.index()].track.clone()
    }

    /// Selected tracks, video first.
    pub fn tracks(&self) -> Vec<TrackDescriptor> {
        self.state
            .lock()
            .queues
            .iter()
            .filter_map(|q| q.track.clone())
            .collect()
    }

    /// Decoder configuration record of the selected track of this kind.
    pub fn decoder_config(&self, kind: TrackKind) -> Option<Bytes> {
        self.state.lock().queues[kind.index()]
            .track
            .as_ref()
            .and_then(|t| t.decoder_config.clone())
    }

    /// Samples queued and not yet pulled.
    pub fn queued(&self, kind: TrackKind) -> usize {
        self.state.lock().queues[kind.index()].samples.len()
    }

    /// Whether the source has signalled the end of this track.
    pub fn is_end_of_track(&self, kind: TrackKind) -> bool {
        self.state.lock().queues[kind.index()].ended
    }

    /// Whether the source is armed.
    pub fn is_source_running(&self) -> bool {
        self.state.lock().source_running
    }

    /// Stops the source, drops queued samples and fails pending pulls.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for queue in &mut state.queues {
            queue.samples.clear();
        }
        state.fail_waiters(|| ClipError::Closed);
        if state.source_running {
            state.source_running = false;
            self.source.stop();
        }
        drop(state);
        self.pump.abort();
        debug!("demuxer closed");
    }
}

impl Drop for PullDemuxer {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(
    state: Arc<Mutex<DemuxState>>,
    source: Arc<dyn TrackSource>,
    mut events: mpsc::UnboundedReceiver<SourceEvent>,
    high_water: usize,
) {
    while let Some(event) = events.recv().await {
        let mut guard = state.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }

        match event {
            SourceEvent::Samples { track_id, samples } => {
                let Some(slot) = state.slot_for(track_id) else {
                    trace!("dropping {} samples of unselected track {}", samples.len(), track_id);
                    continue;
                };
                let queue = &mut state.queues[slot];
                if let Some(first) = samples.first() {
                    debug!(
                        "adding {} samples (first = {} µs), total = {}",
                        samples.len(),
                        first.pts_us,
                        queue.samples.len() + samples.len()
                    );
                }
                queue.samples.extend(samples);

                if let Some(waiter) = queue.waiter.take() {
                    if let Some(sample) = queue.samples.pop_front() {
                        if let Err(Ok(Some(sample))) = waiter.send(Ok(Some(sample))) {
                            queue.samples.push_front(sample);
                        }
                    }
                }

                let queued = queue.samples.len();
                if queued >= high_water && !queue.held && !queue.has_waiter() {
                    debug!("{} samples queued for track {}, holding it", queued, track_id);
                    queue.held = true;
                    source.hold_track(track_id, true);
                }
                if state.source_running && !state.queues.iter().any(TrackQueue::is_live) {
                    debug!("every track is held, pausing source");
                    state.source_running = false;
                    source.stop();
                }
            }
            SourceEvent::TrackEnd { track_id } => {
                let Some(slot) = state.slot_for(track_id) else {
                    continue;
                };
                let queue = &mut state.queues[slot];
                queue.ended = true;
                if let Some(waiter) = queue.waiter.take() {
                    let _ = waiter.send(Ok(queue.samples.pop_front()));
                }
                debug!("track {} ended", track_id);

                let all_ended = state
                    .queues
                    .iter()
                    .all(|q| q.track.is_none() || q.ended);
                if all_ended && state.source_running {
                    state.source_running = false;
                    source.stop();
                }
            }
            SourceEvent::Failed(reason) => {
                error!("track source failed: {}", reason);
                state.fail_waiters(|| ClipError::ContainerParse(reason.clone()));
                state.failure = Some(reason);
            }
        }
    }

    let mut state = state.lock();
    if !state.closed && state.failure.is_none() {
        let reason = String::from("track source closed");
        state.fail_waiters(|| ClipError::ContainerParse(reason.clone()));
        state.failure = Some(reason);
    }
}
