//! Decode-side producer for the audio ring.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::ring::RingProducer;
use super::sink::SinkStats;
use crate::av::decoder::AudioDecoder;
use crate::av::TrackKind;
use crate::config::PlaybackConfig;
use crate::error::{ClipError, Result};
use crate::format::PullDemuxer;

/// What one [`AudioFeeder::fill`] pass achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillStatus {
    /// Frames written to the ring during this pass.
    pub frames_pushed: usize,
    /// Frames readable in the ring afterwards.
    pub frames_buffered: usize,
    /// Whether the ring had no room left for the next frame.
    pub ring_full: bool,
    /// The audio track ended and everything decoded has been pushed.
    pub drained: bool,
}

/// Pulls audio samples from the demuxer, decodes them and keeps the ring
/// topped up with interleaved `f32` frames.
///
/// Only whole frames are pushed. Decoded samples that do not fit are kept
/// and pushed first on the next pass.
pub struct AudioFeeder {
    demuxer: Arc<PullDemuxer>,
    decoder: Box<dyn AudioDecoder>,
    producer: RingProducer<f32>,
    channels: usize,
    pending: Vec<f32>,
    pending_pos: usize,
    fill_target: usize,
    interval: Duration,
    sink_stats: Option<Arc<SinkStats>>,
    underruns_seen: u64,
    configured: bool,
    end_of_track: bool,
}

impl AudioFeeder {
    /// Binds a demuxer's audio track to the producer end of a ring.
    pub fn new(
        demuxer: Arc<PullDemuxer>,
        decoder: Box<dyn AudioDecoder>,
        producer: RingProducer<f32>,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            demuxer,
            decoder,
            producer,
            channels: 1,
            pending: Vec::new(),
            pending_pos: 0,
            fill_target: config.audio_fill_target_frames().max(1),
            interval: config.audio_fill_interval,
            sink_stats: None,
            underruns_seen: 0,
            configured: false,
            end_of_track: false,
        }
    }

    /// Underruns counted by this sink are reported from the feeder side.
    pub fn with_sink_stats(mut self, stats: Arc<SinkStats>) -> Self {
        self.sink_stats = Some(stats);
        self
    }

    /// Configures the decoder from the demuxer's audio track and returns
    /// the channel count the ring is interleaved with.
    pub async fn configure(&mut self) -> Result<u16> {
        let track = self
            .demuxer
            .track(TrackKind::Audio)
            .ok_or(ClipError::NoSuchTrack(TrackKind::Audio))?;
        self.decoder.configure(&track).await?;
        let channels = track.channels.unwrap_or(2).max(1);
        self.channels = usize::from(channels);
        self.configured = true;
        info!(
            "audio feeder configured: {} ({} ch)",
            track.codec, channels
        );
        Ok(channels)
    }

    /// Channel count of the interleaved frames pushed, once configured.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether the track has ended and every decoded frame was pushed.
    pub fn is_drained(&self) -> bool {
        self.end_of_track && self.pending_len() == 0
    }

    fn pending_len(&self) -> usize {
        self.pending.len() - self.pending_pos
    }

    /// Tops the ring up to the fill target. Stops early when the ring is
    /// full or the track has ended.
    pub async fn fill(&mut self) -> Result<FillStatus> {
        if !self.configured {
            self.configure().await?;
        }
        self.report_underruns();

        let mut status = FillStatus::default();
        loop {
            status.frames_pushed += self.flush_pending();
            if self.pending_len() > 0 {
                status.ring_full = true;
                break;
            }
            if self.buffered_frames() >= self.fill_target || self.end_of_track {
                break;
            }

            match self.demuxer.get_next_chunk(TrackKind::Audio).await? {
                None => {
                    debug!("audio track ended");
                    self.end_of_track = true;
                }
                Some(sample) => {
                    let pts = sample.pts_us;
                    match self.decoder.decode(sample).await {
                        Ok(Some(data)) => {
                            if usize::from(data.channels) != self.channels {
                                warn!(
                                    "dropping audio at {}us: {} channels, ring carries {}",
                                    data.timestamp_us, data.channels, self.channels
                                );
                                continue;
                            }
                            self.pending = data.samples;
                            self.pending_pos = 0;
                        }
                        Ok(None) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!("skipping audio sample at {}us: {}", pts, e),
                    }
                }
            }
        }

        status.frames_buffered = self.buffered_frames();
        status.drained = self.is_drained();
        Ok(status)
    }

    /// Runs fill passes on the configured interval until `shutdown` turns
    /// true or is dropped, or the track is drained.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.fill().await?.drained {
                        info!("audio feeder drained");
                        return Ok(());
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("audio feeder shutting down");
                        self.decoder.close();
                        return Ok(());
                    }
                }
            }
        }
    }

    fn buffered_frames(&self) -> usize {
        self.producer.ring().available_read() / self.channels
    }

    fn flush_pending(&mut self) -> usize {
        let remaining = self.pending_len();
        if remaining == 0 {
            return 0;
        }
        let space = self.producer.ring().available_write() / self.channels * self.channels;
        let count = remaining.min(space);
        let end = self.pending_pos + count;
        let written = self.producer.push(&self.pending[self.pending_pos..end]);
        self.pending_pos += written;
        if self.pending_len() == 0 {
            self.pending.clear();
            self.pending_pos = 0;
        }
        written / self.channels
    }

    fn report_underruns(&mut self) {
        let Some(stats) = &self.sink_stats else {
            return;
        };
        let total = stats.underruns();
        if total > self.underruns_seen {
            warn!(
                "audio underrun: {} short render quanta since last fill",
                total - self.underruns_seen
            );
            self.underruns_seen = total;
        }
    }
}
