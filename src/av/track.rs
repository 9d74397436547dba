use bytes::Bytes;

use super::{CodecData, CodecType, TrackKind};

/// Everything known about a track once container metadata is parsed.
///
/// Immutable after the box index resolves it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    /// Container track id.
    pub id: u32,
    /// Video or audio.
    pub kind: TrackKind,
    /// Codec family.
    pub codec_type: CodecType,
    /// Codec string in the usual `avc1.64001f` / `mp4a.40.2` form.
    pub codec: String,
    /// Picture width, for video.
    pub width: Option<u32>,
    /// Picture height, for video.
    pub height: Option<u32>,
    /// Samples per second, for audio.
    pub sample_rate: Option<u32>,
    /// Channel count, for audio.
    pub channels: Option<u16>,
    /// Bits per sample for uncompressed audio.
    pub sample_size: Option<u16>,
    /// Media timescale in units per second.
    pub timescale: u32,
    /// Track duration in microseconds.
    pub duration_us: i64,
    /// Samples listed in the sample table.
    pub sample_count: usize,
    /// Opaque decoder configuration (avcC/hvcC/vpcC/av1C body, or the
    /// AudioSpecificConfig for AAC).
    pub decoder_config: Option<Bytes>,
    /// Raw sample entry fourcc.
    pub sample_entry: [u8; 4],
}

impl TrackDescriptor {
    /// Whether this is a video track.
    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }

    /// Whether this is an audio track.
    pub fn is_audio(&self) -> bool {
        self.kind == TrackKind::Audio
    }
}

impl CodecData for TrackDescriptor {
    fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    fn width(&self) -> Option<u32> {
        self.width
    }

    fn height(&self) -> Option<u32> {
        self.height
    }

    fn extra_data(&self) -> Option<&[u8]> {
        self.decoder_config.as_deref()
    }
}
