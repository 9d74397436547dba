use bytes::{Buf, Bytes};

use super::parser::parse_sps;
use super::types::SPSInfo;
use crate::error::{ClipError, Result};

/// AVCDecoderConfigurationRecord, the body of an `avcC` box.
#[derive(Debug, Clone, PartialEq)]
pub struct AvcDecoderConfig {
    /// AVCProfileIndication.
    pub profile_idc: u8,
    /// Profile compatibility flags.
    pub profile_compatibility: u8,
    /// AVCLevelIndication.
    pub level_idc: u8,
    /// Size in bytes of the length prefix in front of each NAL unit.
    pub nal_length_size: u8,
    /// Sequence parameter set NAL units.
    pub sps: Vec<Bytes>,
    /// Picture parameter set NAL units.
    pub pps: Vec<Bytes>,
}

impl AvcDecoderConfig {
    /// Parses an `avcC` box body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        if buf.remaining() < 6 {
            return Err(ClipError::InvalidData("avcC record too short".into()));
        }
        let version = buf.get_u8();
        if version != 1 {
            return Err(ClipError::InvalidData(format!("avcC version {}", version)));
        }
        let profile_idc = buf.get_u8();
        let profile_compatibility = buf.get_u8();
        let level_idc = buf.get_u8();
        let nal_length_size = (buf.get_u8() & 0x03) + 1;

        let sps_count = buf.get_u8() & 0x1F;
        let sps = read_parameter_sets(&mut buf, sps_count as usize)?;
        let pps = if buf.has_remaining() {
            let pps_count = buf.get_u8();
            read_parameter_sets(&mut buf, pps_count as usize)?
        } else {
            Vec::new()
        };

        Ok(Self {
            profile_idc,
            profile_compatibility,
            level_idc,
            nal_length_size,
            sps,
            pps,
        })
    }

    /// `avc1.PPCCLL` in lowercase hex.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_idc, self.profile_compatibility, self.level_idc
        )
    }

    /// Parses the first sequence parameter set.
    pub fn first_sps(&self) -> Result<SPSInfo> {
        let sps = self
            .sps
            .first()
            .ok_or_else(|| ClipError::InvalidData("avcC carries no SPS".into()))?;
        parse_sps(sps)
    }

    /// Cropped picture size from the first SPS.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.first_sps().ok().map(|sps| (sps.width, sps.height))
    }
}

fn read_parameter_sets(buf: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 2 {
            return Err(ClipError::InvalidData("truncated avcC parameter set".into()));
        }
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(ClipError::InvalidData("truncated avcC parameter set".into()));
        }
        sets.push(buf.split_to(len));
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::parser::tests::SPS_720P_BASELINE;
    use pretty_assertions::assert_eq;

    fn record(sps: &[u8]) -> Vec<u8> {
        let mut out = vec![0x01, sps[1], sps[2], sps[3], 0xFF, 0xE1];
        out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        out.extend_from_slice(sps);
        out.push(1);
        out.extend_from_slice(&[0x00, 0x04, 0x68, 0xce, 0x38, 0x80]);
        out
    }

    #[test]
    fn test_parse_record() {
        let config = AvcDecoderConfig::parse(&record(&SPS_720P_BASELINE)).unwrap();
        assert_eq!(config.nal_length_size, 4);
        assert_eq!(config.sps.len(), 1);
        assert_eq!(config.pps.len(), 1);
        assert_eq!(config.codec_string(), "avc1.42001f");
        assert_eq!(config.dimensions(), Some((1280, 720)));
    }

    #[test]
    fn test_truncated_record() {
        let mut data = record(&SPS_720P_BASELINE);
        data.truncate(10);
        assert!(AvcDecoderConfig::parse(&data).is_err());
        assert!(AvcDecoderConfig::parse(&[0x02, 0, 0, 0, 0, 0]).is_err());
    }
}
