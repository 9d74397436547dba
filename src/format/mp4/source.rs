use async_trait::async_trait;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use super::index::BoxIndex;
use crate::av::TrackDescriptor;
use crate::config::PlaybackConfig;
use crate::error::{ClipError, Result};
use crate::format::{SourceEvent, TrackSource};

#[derive(Debug, Clone)]
enum Metadata {
    Pending,
    Ready(Vec<TrackDescriptor>),
    Failed(String),
}

#[derive(Debug)]
struct Selected {
    track_id: u32,
    next: usize,
    ended: bool,
    held: bool,
}

struct Shared {
    index: Mutex<BoxIndex>,
    selected: Mutex<Vec<Selected>>,
    armed: AtomicBool,
    wake: Notify,
}

impl Shared {
    /// Sends at most one batch per selected track that is not held.
    /// Returns whether anything was sent, or `None` once the receiver is
    /// gone.
    fn deliver_round(
        &self,
        events: &mpsc::UnboundedSender<SourceEvent>,
        batch_size: usize,
    ) -> Option<bool> {
        let mut index = self.index.lock();
        let mut selected = self.selected.lock();
        let mut sent = false;

        for track in selected.iter_mut().filter(|t| !t.ended && !t.held) {
            let samples = index.ready_samples(track.track_id, track.next, batch_size);
            let total = index.sample_count(track.track_id);

            if !samples.is_empty() {
                track.next += samples.len();
                sent = true;
                events
                    .send(SourceEvent::Samples {
                        track_id: track.track_id,
                        samples,
                    })
                    .ok()?;
            }

            let exhausted = track.next >= total;
            let truncated = index.is_finished() && !has_ready(&index, track);
            if exhausted || truncated {
                if !exhausted {
                    warn!(
                        "track {} ends early: {} of {} samples present",
                        track.track_id, track.next, total
                    );
                }
                track.ended = true;
                events
                    .send(SourceEvent::TrackEnd {
                        track_id: track.track_id,
                    })
                    .ok()?;
                debug!("track {} delivered completely", track.track_id);
            }
        }

        if sent {
            release_delivered(&mut index, &selected);
        }
        Some(sent)
    }
}

/// Drops bytes every selected track has moved past.
fn release_delivered(index: &mut BoxIndex, selected: &[Selected]) {
    let floor = selected
        .iter()
        .filter(|t| !t.ended)
        .filter_map(|t| index.sample_offset(t.track_id, t.next))
        .min()
        .unwrap_or(u64::MAX);
    index.discard_before(floor);
}

/// Whether more samples of the track are readable right now.
fn has_ready(index: &BoxIndex, track: &Selected) -> bool {
    !index.ready_samples(track.track_id, track.next, 1).is_empty()
}

/// Track source over a streamed MP4 byte source.
///
/// A background task reads the byte source in chunks, feeds the
/// [`BoxIndex`](super::BoxIndex) and, while armed, pushes ready samples of
/// the selected tracks as [`SourceEvent`]s. The task is aborted when the
/// source is dropped.
pub struct Mp4Source {
    shared: Arc<Shared>,
    metadata: watch::Receiver<Metadata>,
    task: JoinHandle<()>,
}

impl Mp4Source {
    /// Spawns the reader task on the current runtime.
    pub fn new<R>(
        reader: R,
        config: &PlaybackConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SourceEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (metadata_tx, metadata) = watch::channel(Metadata::Pending);
        let shared = Arc::new(Shared {
            index: Mutex::new(BoxIndex::new()),
            selected: Mutex::new(Vec::new()),
            armed: AtomicBool::new(false),
            wake: Notify::new(),
        });

        let task = tokio::spawn(run(
            reader,
            shared.clone(),
            events_tx,
            metadata_tx,
            config.read_chunk_size.max(1),
            config.source_batch_size.max(1),
        ));

        (
            Self {
                shared,
                metadata,
                task,
            },
            events_rx,
        )
    }
}

impl Drop for Mp4Source {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl TrackSource for Mp4Source {
    async fn tracks(&self) -> Result<Vec<TrackDescriptor>> {
        let mut metadata = self.metadata.clone();
        loop {
            let state = metadata.borrow_and_update().clone();
            match state {
                Metadata::Ready(tracks) => return Ok(tracks),
                Metadata::Failed(reason) => return Err(ClipError::ContainerParse(reason)),
                Metadata::Pending => {}
            }
            if metadata.changed().await.is_err() {
                return Err(ClipError::ContainerParse(
                    "track source stopped before metadata was parsed".into(),
                ));
            }
        }
    }

    fn select_track(&self, track_id: u32) -> Result<()> {
        let index = self.shared.index.lock();
        if !index.has_track(track_id) {
            return Err(ClipError::InvalidData(format!("no track with id {}", track_id)));
        }
        let mut selected = self.shared.selected.lock();
        if !selected.iter().any(|t| t.track_id == track_id) {
            let first = index.sample_offset(track_id, 0).unwrap_or(u64::MAX);
            if first < index.retained_from() {
                return Err(ClipError::InvalidData(format!(
                    "track {} selected after its first samples were released",
                    track_id
                )));
            }
            selected.push(Selected {
                track_id,
                next: 0,
                ended: false,
                held: false,
            });
        }
        drop(selected);
        drop(index);
        self.shared.wake.notify_one();
        Ok(())
    }

    fn start(&self) {
        if !self.shared.armed.swap(true, Ordering::AcqRel) {
            debug!("source armed");
            self.shared.wake.notify_one();
        }
    }

    fn stop(&self) {
        if self.shared.armed.swap(false, Ordering::AcqRel) {
            debug!("source disarmed");
        }
    }

    fn is_started(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }

    fn hold_track(&self, track_id: u32, held: bool) {
        let mut selected = self.shared.selected.lock();
        let Some(track) = selected.iter_mut().find(|t| t.track_id == track_id) else {
            return;
        };
        if track.held != held {
            track.held = held;
            debug!("track {} {}", track_id, if held { "held" } else { "released" });
            drop(selected);
            if !held {
                self.shared.wake.notify_one();
            }
        }
    }
}

async fn run<R>(
    mut reader: R,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<SourceEvent>,
    metadata: watch::Sender<Metadata>,
    chunk_size: usize,
    batch_size: usize,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut chunk = vec![0u8; chunk_size];
    let mut eof = false;

    loop {
        if shared.armed.load(Ordering::Acquire) {
            match shared.deliver_round(&events, batch_size) {
                None => return,
                Some(true) => {
                    // re-check the armed flag between batches
                    tokio::task::yield_now().await;
                    continue;
                }
                Some(false) => {}
            }
        }

        // Once metadata is known a disarmed source stops pulling bytes.
        let idle = !shared.armed.load(Ordering::Acquire) && shared.index.lock().is_ready();
        if eof || idle {
            shared.wake.notified().await;
            continue;
        }

        tokio::select! {
            read = reader.read(&mut chunk) => {
                let outcome = match read {
                    Ok(0) => {
                        eof = true;
                        shared.index.lock().finish()
                    }
                    Ok(n) => shared.index.lock().append(&chunk[..n]),
                    Err(e) => Err(ClipError::Io(e)),
                };
                match outcome {
                    Ok(true) => {
                        let tracks = shared.index.lock().tracks().unwrap_or_default();
                        metadata.send_replace(Metadata::Ready(tracks));
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("track source failed: {}", e);
                        if matches!(*metadata.borrow(), Metadata::Pending) {
                            metadata.send_replace(Metadata::Failed(e.to_string()));
                        }
                        let _ = events.send(SourceEvent::Failed(e.to_string()));
                        return;
                    }
                }
            }
            _ = shared.wake.notified() => {}
        }
    }
}
