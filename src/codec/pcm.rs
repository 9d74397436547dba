use async_trait::async_trait;
use log::debug;

use crate::av::{AudioData, AudioDecoder, CodecType, EncodedSample, TrackDescriptor};
use crate::error::{ClipError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcmLayout {
    S8,
    S16Le,
    S16Be,
    S24Be,
    F32Be,
    F64Be,
}

impl PcmLayout {
    fn bytes_per_sample(self) -> usize {
        match self {
            PcmLayout::S8 => 1,
            PcmLayout::S16Le | PcmLayout::S16Be => 2,
            PcmLayout::S24Be => 3,
            PcmLayout::F32Be => 4,
            PcmLayout::F64Be => 8,
        }
    }

    fn read(self, b: &[u8]) -> f32 {
        match self {
            PcmLayout::S8 => b[0] as i8 as f32 / 128.0,
            PcmLayout::S16Le => i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
            PcmLayout::S16Be => i16::from_be_bytes([b[0], b[1]]) as f32 / 32768.0,
            PcmLayout::S24Be => {
                let v = i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8;
                v as f32 / 8_388_608.0
            }
            PcmLayout::F32Be => f32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            PcmLayout::F64Be => {
                f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            }
        }
    }
}

/// Software decoder for uncompressed MP4 audio sample entries.
///
/// Produces interleaved `f32`. Handles `sowt`, `twos`, `in24`, `fl32` and `fl64`.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    layout: Option<PcmLayout>,
    channels: u16,
    sample_rate: u32,
}

impl PcmDecoder {
    /// An unconfigured decoder.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioDecoder for PcmDecoder {
    async fn configure(&mut self, track: &TrackDescriptor) -> Result<()> {
        if track.codec_type != CodecType::PCM {
            return Err(ClipError::UnsupportedCodec(track.codec.clone()));
        }
        let bits = track.sample_size.unwrap_or(16);
        let layout = match (&track.sample_entry, bits) {
            (b"sowt", 16) => PcmLayout::S16Le,
            (b"twos", 8) | (b"sowt", 8) => PcmLayout::S8,
            (b"twos", 16) => PcmLayout::S16Be,
            (b"in24", _) => PcmLayout::S24Be,
            (b"fl32", _) => PcmLayout::F32Be,
            (b"fl64", _) => PcmLayout::F64Be,
            _ => {
                return Err(ClipError::UnsupportedCodec(format!(
                    "{} with {} bits per sample",
                    track.codec, bits
                )))
            }
        };
        let channels = track.channels.filter(|c| *c > 0).ok_or_else(|| {
            ClipError::UnsupportedCodec(format!("{} without a channel count", track.codec))
        })?;
        let sample_rate = track.sample_rate.filter(|r| *r > 0).ok_or_else(|| {
            ClipError::UnsupportedCodec(format!("{} without a sample rate", track.codec))
        })?;

        debug!(
            "pcm decoder configured: {:?}, {} ch @ {} Hz",
            layout, channels, sample_rate
        );
        self.layout = Some(layout);
        self.channels = channels;
        self.sample_rate = sample_rate;
        Ok(())
    }

    async fn decode(&mut self, sample: EncodedSample) -> Result<Option<AudioData>> {
        let layout = self
            .layout
            .ok_or_else(|| ClipError::Decode("decoder is not configured".into()))?;
        let frame_bytes = layout.bytes_per_sample() * self.channels as usize;
        if sample.data.len() % frame_bytes != 0 {
            return Err(ClipError::Decode(format!(
                "{} byte sample is not a whole number of {} byte frames",
                sample.data.len(),
                frame_bytes
            )));
        }
        if sample.data.is_empty() {
            return Ok(None);
        }

        let samples = sample
            .data
            .chunks_exact(layout.bytes_per_sample())
            .map(|b| layout.read(b))
            .collect();

        Ok(Some(AudioData {
            timestamp_us: sample.pts_us,
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
        }))
    }

    fn close(&mut self) {
        self.layout = None;
    }
}
