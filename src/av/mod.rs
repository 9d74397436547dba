use std::fmt;

/// Elementary stream kind carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Picture track.
    Video,
    /// Sound track.
    Audio,
}

impl TrackKind {
    pub(crate) fn index(self) -> usize {
        match self {
            TrackKind::Video => 0,
            TrackKind::Audio => 1,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// Codec family of a track, from its sample entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    /// H.264/AVC (`avc1`, `avc3`).
    H264,
    /// H.265/HEVC (`hvc1`, `hev1`).
    H265,
    /// VP8 (`vp08`).
    VP8,
    /// VP9 (`vp09`).
    VP9,
    /// AV1 (`av01`).
    AV1,
    /// MPEG-4 AAC (`mp4a`).
    AAC,
    /// Opus (`Opus`).
    OPUS,
    /// Uncompressed sample entries (`sowt`, `twos`, `fl32`, ...).
    PCM,
    /// Any sample entry not listed above.
    Unknown,
}

impl CodecType {
    /// Maps an MP4 sample entry fourcc to a codec.
    pub fn from_sample_entry(fourcc: &[u8; 4]) -> Self {
        match fourcc {
            b"avc1" | b"avc3" => CodecType::H264,
            b"hvc1" | b"hev1" => CodecType::H265,
            b"vp08" => CodecType::VP8,
            b"vp09" => CodecType::VP9,
            b"av01" => CodecType::AV1,
            b"mp4a" => CodecType::AAC,
            b"Opus" => CodecType::OPUS,
            b"sowt" | b"twos" | b"fl32" | b"fl64" | b"in24" | b"lpcm" => CodecType::PCM,
            _ => CodecType::Unknown,
        }
    }

    /// Track kind the codec belongs to.
    pub fn kind(&self) -> Option<TrackKind> {
        match self {
            CodecType::H264
            | CodecType::H265
            | CodecType::VP8
            | CodecType::VP9
            | CodecType::AV1 => Some(TrackKind::Video),
            CodecType::AAC | CodecType::OPUS | CodecType::PCM => Some(TrackKind::Audio),
            CodecType::Unknown => None,
        }
    }
}

/// Codec parameters a decoder needs before it can accept samples.
pub trait CodecData: Send + Sync {
    /// Codec family.
    fn codec_type(&self) -> CodecType;
    /// Picture width, for video.
    fn width(&self) -> Option<u32>;
    /// Picture height, for video.
    fn height(&self) -> Option<u32>;
    /// Codec configuration record, if any.
    fn extra_data(&self) -> Option<&[u8]>;
}

/// Decoder traits and output plumbing
pub mod decoder;
/// Decoded video and audio payloads
pub mod frame;
mod sample;
mod track;

pub use decoder::{AudioDecoder, DecoderOutput, FrameCallback, VideoDecoder};
pub use frame::{AudioData, DecodedVideoFrame, FrameImage, PixelFormat, PlanarImage};
pub use sample::*;
pub use track::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_entry_mapping() {
        assert_eq!(CodecType::from_sample_entry(b"avc1"), CodecType::H264);
        assert_eq!(CodecType::from_sample_entry(b"vp08"), CodecType::VP8);
        assert_eq!(CodecType::from_sample_entry(b"sowt"), CodecType::PCM);
        assert_eq!(CodecType::from_sample_entry(b"xyz1"), CodecType::Unknown);
        assert_eq!(CodecType::AAC.kind(), Some(TrackKind::Audio));
        assert_eq!(CodecType::AV1.kind(), Some(TrackKind::Video));
    }
}
