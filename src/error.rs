use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

use crate::av::TrackKind;

/// Errors surfaced by the playback core.
///
/// Parse and codec failures are fatal to the clip that produced them.
/// Decode failures are recovered by skipping the affected sample. Buffer
/// underruns are never errors: they show up as `None` from a frame query or
/// as short counts from the audio ring.
#[derive(Error, Debug)]
pub enum ClipError {
    /// Reading the byte source failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Container metadata is malformed or missing.
    #[error("container parse error: {0}")]
    ContainerParse(String),

    /// No decoder accepts the track's codec configuration.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A pull is already outstanding for this track kind.
    #[error("pending {0} read already exists")]
    ConcurrentRead(TrackKind),

    /// One sample failed to decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// The clip has no track of this kind.
    #[error("no {0} track")]
    NoSuchTrack(TrackKind),

    /// The component was closed.
    #[error("closed")]
    Closed,

    /// Bad argument or bitstream data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// An integer config value failed to parse.
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    /// A float config value failed to parse.
    #[error("parse float error: {0}")]
    ParseFloat(#[from] ParseFloatError),
}

impl ClipError {
    /// Whether the error should take the whole clip down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClipError::Io(_)
                | ClipError::ContainerParse(_)
                | ClipError::UnsupportedCodec(_)
                | ClipError::NoSuchTrack(_)
                | ClipError::Closed
        )
    }
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, ClipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ClipError::ContainerParse("no moov".into()).is_fatal());
        assert!(ClipError::UnsupportedCodec("hev1".into()).is_fatal());
        assert!(!ClipError::Decode("corrupt slice".into()).is_fatal());
        assert!(!ClipError::ConcurrentRead(TrackKind::Video).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = ClipError::ConcurrentRead(TrackKind::Audio);
        assert_eq!(err.to_string(), "pending audio read already exists");
    }
}
