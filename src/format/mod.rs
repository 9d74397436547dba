//! # Container formats and sample delivery
//!
//! A [`TrackSource`] pushes batches of encoded samples while it is armed.
//! [`PullDemuxer`](demuxer::PullDemuxer) turns that push stream into one
//! awaitable "next sample" call per track kind, with backpressure.

use async_trait::async_trait;

use crate::av::{EncodedSample, TrackDescriptor};
use crate::Result;

/// Pull demuxer over a [`TrackSource`]
pub mod demuxer;
/// MP4 box index and streaming track source
pub mod mp4;

pub use demuxer::PullDemuxer;

/// Notifications a track source pushes to its consumer.
#[derive(Debug)]
pub enum SourceEvent {
    /// Samples of one track in decode order.
    Samples {
        /// Container track id.
        track_id: u32,
        /// The batch, oldest first.
        samples: Vec<EncodedSample>,
    },
    /// The track has no further samples.
    TrackEnd {
        /// Container track id.
        track_id: u32,
    },
    /// The byte source or the container failed; nothing more will arrive.
    Failed(String),
}

/// Push-style source of encoded samples.
///
/// Implementations deliver [`SourceEvent`]s on a channel handed out at
/// construction. `start` and `stop` are idempotent and only gate delivery;
/// they never block.
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// Resolves once container metadata is parsed.
    async fn tracks(&self) -> Result<Vec<TrackDescriptor>>;

    /// Adds a track to the set whose samples are delivered.
    fn select_track(&self, track_id: u32) -> Result<()>;

    /// Arms delivery.
    fn start(&self);

    /// Disarms delivery. Batches already sent stay queued downstream.
    fn stop(&self);

    /// Whether delivery is armed.
    fn is_started(&self) -> bool;

    /// Skips (`true`) or resumes (`false`) one selected track while the
    /// others keep flowing. Sources without per-track control ignore it.
    fn hold_track(&self, _track_id: u32, _held: bool) {}
}
