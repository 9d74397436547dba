use async_trait::async_trait;
use std::sync::Arc;

use super::{AudioData, DecodedVideoFrame, EncodedSample, TrackDescriptor};
use crate::error::{ClipError, Result};

/// Output delivered by a video decoder, possibly from another thread.
#[derive(Debug)]
pub enum DecoderOutput {
    /// A decoded picture.
    Frame(DecodedVideoFrame),
    /// A sample failed to decode. The decoder stays usable.
    Error(ClipError),
}

/// Receives decoder output. May be called from any thread.
pub type FrameCallback = Arc<dyn Fn(DecoderOutput) + Send + Sync>;

/// Callback-driven video decoder.
///
/// `decode` only submits work; frames come back through the callback handed
/// to `configure`, in presentation order. The callback may run inline inside
/// `decode` or later on a decoder thread.
#[async_trait]
pub trait VideoDecoder: Send {
    /// Fails with [`ClipError::UnsupportedCodec`] when the configuration is rejected.
    async fn configure(&mut self, track: &TrackDescriptor, output: FrameCallback) -> Result<()>;
    /// Submits one sample. Output arrives through the callback.
    fn decode(&mut self, sample: EncodedSample) -> Result<()>;
    /// Samples submitted whose output has not been delivered yet.
    fn decode_queue_size(&self) -> usize;
    /// Drops pending work without flushing. No callbacks fire afterwards.
    fn close(&mut self);
}

/// Audio decoder producing interleaved `f32` frames.
#[async_trait]
pub trait AudioDecoder: Send {
    /// Fails with [`ClipError::UnsupportedCodec`] when the track cannot be decoded.
    async fn configure(&mut self, track: &TrackDescriptor) -> Result<()>;
    /// Decodes one sample. `None` when the sample yields no audio yet.
    async fn decode(&mut self, sample: EncodedSample) -> Result<Option<AudioData>>;
    /// Releases decoder resources.
    fn close(&mut self);
}
