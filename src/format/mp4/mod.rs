//! # MP4 track source
//!
//! Incremental parsing of ISO base media files delivered as a byte stream.
//!
//! - [`boxes`]: box headers, `moov` and sample description parsing
//! - [`sample_table`]: per-sample offsets, timing and sync flags
//! - [`BoxIndex`]: the incremental index over the bytes received so far
//! - [`Mp4Source`]: a [`TrackSource`](crate::format::TrackSource) that
//!   reads any `AsyncRead` and pushes ready samples
//!
//! ## Example
//!
//! ```rust,no_run
//! use clipstream::config::PlaybackConfig;
//! use clipstream::format::mp4::Mp4Source;
//! use clipstream::format::TrackSource;
//!
//! # async fn example() -> clipstream::Result<()> {
//! let file = tokio::fs::File::open("clip.mp4").await?;
//! let (source, mut events) = Mp4Source::new(file, &PlaybackConfig::default());
//!
//! for track in source.tracks().await? {
//!     println!("{} track {}: {}", track.kind, track.id, track.codec);
//!     source.select_track(track.id)?;
//! }
//! source.start();
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

/// Box headers, `moov` parsing and sample descriptions
pub mod boxes;
mod index;
pub mod sample_table;
mod source;

pub use boxes::{BoxHeader, FourCC, ParsedTrack};
pub use index::{to_micros, BoxIndex};
pub use sample_table::{SampleEntry, SampleTableBuilder};
pub use source::Mp4Source;
