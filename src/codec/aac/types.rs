/// MPEG-4 audio object types the core cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    /// AAC Main.
    Main,
    /// AAC Low Complexity.
    LC,
    /// AAC Scalable Sample Rate.
    SSR,
    /// AAC Long Term Prediction.
    LTP,
    /// HE-AAC (SBR).
    HeAac,
    /// HE-AAC v2 (SBR + PS).
    HeAacV2,
    /// Any other audio object type.
    Other(u8),
}

impl From<u8> for ProfileType {
    fn from(value: u8) -> Self {
        match value {
            1 => ProfileType::Main,
            2 => ProfileType::LC,
            3 => ProfileType::SSR,
            4 => ProfileType::LTP,
            5 => ProfileType::HeAac,
            29 => ProfileType::HeAacV2,
            other => ProfileType::Other(other),
        }
    }
}

/// Object type indication for MPEG-4 audio in a DecoderConfigDescriptor.
pub const OTI_MPEG4_AUDIO: u8 = 0x40;

/// Decoded AudioSpecificConfig fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AACConfig {
    /// Audio object type, e.g. 2 for AAC-LC.
    pub object_type: u8,
    /// Index into the sampling frequency table, `15` for an explicit rate.
    pub sample_rate_index: u8,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel configuration, `0` when defined in-band.
    pub channel_configuration: u8,
    /// Samples per frame, 1024 or 960.
    pub frame_length: u16,
}

impl AACConfig {
    /// Audio object type as a profile.
    pub fn profile(&self) -> ProfileType {
        ProfileType::from(self.object_type)
    }

    /// Channel count implied by the channel configuration, if standard.
    pub fn channels(&self) -> Option<u16> {
        match self.channel_configuration {
            1..=6 => Some(self.channel_configuration as u16),
            7 => Some(8),
            _ => None,
        }
    }
}

impl Default for AACConfig {
    fn default() -> Self {
        Self {
            object_type: 2,
            sample_rate_index: 4, // 44100 Hz
            sample_rate: 44_100,
            channel_configuration: 2, // Stereo
            frame_length: 1024,
        }
    }
}

/// Sample rate for a sampling frequency index.
pub fn sample_rate_from_index(index: u8) -> Option<u32> {
    match index {
        0 => Some(96000),
        1 => Some(88200),
        2 => Some(64000),
        3 => Some(48000),
        4 => Some(44100),
        5 => Some(32000),
        6 => Some(24000),
        7 => Some(22050),
        8 => Some(16000),
        9 => Some(12000),
        10 => Some(11025),
        11 => Some(8000),
        12 => Some(7350),
        _ => None,
    }
}
