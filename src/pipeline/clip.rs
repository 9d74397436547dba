use log::{error, info, trace};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;

use super::frame_buffer::FrameBufferPipeline;
use crate::av::decoder::VideoDecoder;
use crate::av::DecodedVideoFrame;
use crate::clock::ClockHandle;
use crate::config::PlaybackConfig;
use crate::error::{ClipError, Result};
use crate::format::PullDemuxer;

/// Lifecycle of a [`Clip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipStatus {
    /// Metadata or the first frames are still loading.
    Opening,
    /// Frames can be rendered.
    Ready,
    /// Unusable. Carries the parse or codec error that stopped it.
    Faulted(String),
    /// Closed by the owner.
    Closed,
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipStatus::Opening => f.write_str("opening"),
            ClipStatus::Ready => f.write_str("ready"),
            ClipStatus::Faulted(reason) => write!(f, "faulted: {}", reason),
            ClipStatus::Closed => f.write_str("closed"),
        }
    }
}

/// One clip on the timeline: a demuxer feeding a frame-buffer pipeline.
///
/// Parse and codec errors fault only this clip. Frame underruns repeat the
/// last frame served.
pub struct Clip {
    demuxer: Arc<PullDemuxer>,
    pipeline: FrameBufferPipeline,
    status: RwLock<ClipStatus>,
    last_frame: Mutex<Option<DecodedVideoFrame>>,
}

impl Clip {
    /// Must be called from within a tokio runtime.
    pub fn new<R>(reader: R, decoder: Box<dyn VideoDecoder>, config: &PlaybackConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let demuxer = Arc::new(PullDemuxer::open(reader, config));
        Self::with_demuxer(demuxer, decoder, config)
    }

    /// Binds an existing demuxer, for sharing it with an audio path.
    pub fn with_demuxer(
        demuxer: Arc<PullDemuxer>,
        decoder: Box<dyn VideoDecoder>,
        config: &PlaybackConfig,
    ) -> Self {
        let pipeline = FrameBufferPipeline::new(demuxer.clone(), decoder, config);
        Self {
            demuxer,
            pipeline,
            status: RwLock::new(ClipStatus::Opening),
            last_frame: Mutex::new(None),
        }
    }

    /// Opens and initializes a clip in one step.
    pub async fn open<R>(
        reader: R,
        decoder: Box<dyn VideoDecoder>,
        config: &PlaybackConfig,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let clip = Self::new(reader, decoder, config);
        clip.initialize().await?;
        Ok(clip)
    }

    /// Reads container metadata, configures the decoder and pre-rolls the
    /// frame buffer. Failures leave the clip [`ClipStatus::Faulted`].
    pub async fn initialize(&self) -> Result<()> {
        match self.try_initialize().await {
            Ok(()) => {
                let mut status = self.status.write();
                if *status == ClipStatus::Opening {
                    *status = ClipStatus::Ready;
                }
                Ok(())
            }
            Err(e) => {
                if !matches!(e, ClipError::Closed) {
                    error!("clip faulted: {}", e);
                    *self.status.write() = ClipStatus::Faulted(e.to_string());
                    self.pipeline.close();
                    self.demuxer.close();
                }
                Err(e)
            }
        }
    }

    async fn try_initialize(&self) -> Result<()> {
        let tracks = self.demuxer.initialize().await?;
        info!("clip opened with {} track(s)", tracks.len());
        self.pipeline.initialize().await
    }

    /// Frame for `timestamp_us`. On underrun the previous frame is
    /// repeated; `None` only before the first frame or when not ready.
    pub fn render(&self, timestamp_us: i64) -> Option<DecodedVideoFrame> {
        if *self.status.read() != ClipStatus::Ready {
            return None;
        }
        let mut last = self.last_frame.lock();
        match self.pipeline.render(timestamp_us) {
            Some(frame) => {
                *last = Some(frame.clone());
                Some(frame)
            }
            None => {
                trace!("repeating last frame at {}us", timestamp_us);
                last.clone()
            }
        }
    }

    /// Renders at the clock's current (extrapolated) time.
    pub fn render_at(&self, clock: &ClockHandle) -> Option<DecodedVideoFrame> {
        self.render(clock.current_time_us())
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ClipStatus {
        self.status.read().clone()
    }

    /// The demuxer feeding this clip.
    pub fn demuxer(&self) -> &Arc<PullDemuxer> {
        &self.demuxer
    }

    /// The video frame buffer.
    pub fn pipeline(&self) -> &FrameBufferPipeline {
        &self.pipeline
    }

    /// Releases frames, stops decoding and the source. Idempotent.
    pub fn close(&self) {
        {
            let mut status = self.status.write();
            if *status == ClipStatus::Closed {
                return;
            }
            *status = ClipStatus::Closed;
        }
        self.last_frame.lock().take();
        self.pipeline.close();
        self.demuxer.close();
    }
}

impl Drop for Clip {
    fn drop(&mut self) {
        self.close();
    }
}
