#![doc(html_root_url = "https://docs.rs/clipstream/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # clipstream - clip playback engine
//!
//! `clipstream` plays MP4 clips for timeline editors. It reads container
//! bytes as they stream in, exposes each track as a pull stream of encoded
//! samples, keeps a short run of decoded video frames ahead of a playback
//! clock, and moves decoded audio to a real-time render callback through a
//! lock-free ring buffer.
//!
//! ## Data flow
//!
//! ```text
//! Mp4Source -> PullDemuxer -+-> FrameBufferPipeline -> render(clock time)
//!                           |
//!                           +-> AudioFeeder -> RingBuffer -> AudioSink
//! ```
//!
//! The [`PlaybackClock`](clock::PlaybackClock) drives frame queries. The
//! audio sink runs at its own cadence and only underruns when the ring
//! starves.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clipstream::av::decoder::VideoDecoder;
//! use clipstream::clock::PlaybackClock;
//! use clipstream::config::PlaybackConfig;
//! use clipstream::pipeline::Clip;
//!
//! # async fn example(decoder: Box<dyn VideoDecoder>) -> clipstream::Result<()> {
//! let config = PlaybackConfig::default();
//! let file = tokio::fs::File::open("clip.mp4").await?;
//! let clip = Clip::open(file, decoder, &config).await?;
//!
//! let clock = PlaybackClock::new(&config);
//! let time = clock.subscribe();
//! clock.play();
//!
//! if let Some(frame) = clip.render_at(&time) {
//!     println!("showing frame at {}us", frame.timestamp_us);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: track descriptors, encoded samples, decoded frames and the
//!   decoder traits
//! - `codec`: codec configuration parsing (avcC, esds) and a PCM decoder
//! - `format`: the MP4 track source and the pull demuxer
//! - `pipeline`: the frame-buffer pipeline and per-clip binding
//! - `audio`: ring buffer, feeder and real-time sink
//! - `clock`: playback clock and its cross-context handles
//! - `config`: tunables loaded from file and environment
//! - `error`: the crate error type

/// Audio/video base types and decoder traits
pub mod av;

/// Audio transport to the real-time render context
pub mod audio;

/// Playback clock
pub mod clock;

/// Codec configuration parsing and software decoders
pub mod codec;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Container parsing and demuxing
pub mod format;

/// Video decode and frame buffering
pub mod pipeline;

/// Common utilities and helper functions
pub mod utils;

pub use error::{ClipError, Result};
