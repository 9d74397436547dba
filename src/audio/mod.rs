//! Audio transport from the decode context to the real-time render context.
//!
//! The [`AudioFeeder`] owns the producing end of a [`RingBuffer`] and the
//! [`AudioSink`] owns the consuming end. The ring's two atomic cursors are
//! the only state the two contexts share.
//!
//! ```no_run
//! use clipstream::audio::{AudioFeeder, AudioSink, RingBuffer};
//! use clipstream::codec::PcmDecoder;
//! use clipstream::config::PlaybackConfig;
//! use clipstream::format::PullDemuxer;
//! use std::sync::Arc;
//!
//! # async fn run() -> clipstream::Result<()> {
//! let config = PlaybackConfig::default();
//! let file = tokio::fs::File::open("clip.mov").await?;
//! let demuxer = Arc::new(PullDemuxer::open(file, &config));
//! demuxer.initialize().await?;
//!
//! let channels = 2;
//! let (producer, consumer) = RingBuffer::split(config.ring_capacity_frames() * channels);
//! let mut feeder = AudioFeeder::new(demuxer, Box::new(PcmDecoder::new()), producer, &config);
//! feeder.configure().await?;
//!
//! let mut sink = AudioSink::new(consumer, channels as u16, config.render_quantum);
//! feeder.fill().await?;
//! let mut left = vec![0.0; config.render_quantum];
//! let mut right = vec![0.0; config.render_quantum];
//! sink.process(&mut [&mut left[..], &mut right[..]]);
//! # Ok(())
//! # }
//! ```

pub mod feeder;
pub mod ring;
pub mod sink;

pub use feeder::{AudioFeeder, FillStatus};
pub use ring::{RingBuffer, RingConsumer, RingProducer};
pub use sink::{AudioSink, SinkStats};
