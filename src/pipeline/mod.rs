//! Decode side of playback: the frame-buffer pipeline and the per-clip
//! binding of demuxer, decoder and pipeline.

/// Per-clip binding of demuxer and frame buffer
pub mod clip;
/// Decoded frame lookahead
pub mod frame_buffer;

pub use clip::{Clip, ClipStatus};
pub use frame_buffer::{BufferPhase, FrameBufferPipeline};
