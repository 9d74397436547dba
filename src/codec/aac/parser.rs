use bytes::{Buf, Bytes};

use super::types::{sample_rate_from_index, AACConfig};
use crate::error::{ClipError, Result};
use crate::utils::BitReader;

const ES_DESCRIPTOR: u8 = 0x03;
const DECODER_CONFIG_DESCRIPTOR: u8 = 0x04;
const DECODER_SPECIFIC_INFO: u8 = 0x05;

/// What an `esds` box says about the elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EsdsInfo {
    /// Object type indication, `0x40` for MPEG-4 audio.
    pub object_type_indication: u8,
    /// Average bitrate in bits per second, `0` when variable.
    pub avg_bitrate: u32,
    /// DecoderSpecificInfo payload. For MPEG-4 audio this is the
    /// AudioSpecificConfig.
    pub decoder_specific_info: Option<Bytes>,
}

impl EsdsInfo {
    /// Parses the DecoderSpecificInfo as an AudioSpecificConfig, if present.
    pub fn audio_specific_config(&self) -> Result<Option<AACConfig>> {
        match &self.decoder_specific_info {
            Some(dsi) => parse_audio_specific_config(dsi).map(Some),
            None => Ok(None),
        }
    }

    /// `mp4a.OO[.A]` codec string, with the audio object type when known.
    pub fn codec_string(&self) -> String {
        match self.audio_specific_config() {
            Ok(Some(asc)) => format!(
                "mp4a.{:02x}.{}",
                self.object_type_indication, asc.object_type
            ),
            _ => format!("mp4a.{:02x}", self.object_type_indication),
        }
    }
}

/// Parses the body of an `esds` full box (version and flags included).
pub fn parse_esds(body: &[u8]) -> Result<EsdsInfo> {
    let mut buf = Bytes::copy_from_slice(body);
    if buf.remaining() < 4 {
        return Err(ClipError::InvalidData("esds too short".into()));
    }
    buf.advance(4);

    let (tag, mut es) = read_descriptor(&mut buf)?;
    if tag != ES_DESCRIPTOR {
        return Err(ClipError::InvalidData(format!("expected ES descriptor, got tag {:#x}", tag)));
    }
    if es.remaining() < 3 {
        return Err(ClipError::InvalidData("ES descriptor too short".into()));
    }
    es.advance(2); // ES_ID
    let flags = es.get_u8();
    if flags & 0x80 != 0 {
        skip(&mut es, 2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = take_u8(&mut es)? as usize;
        skip(&mut es, url_len)?;
    }
    if flags & 0x20 != 0 {
        skip(&mut es, 2)?;
    }

    while es.has_remaining() {
        let (tag, mut desc) = read_descriptor(&mut es)?;
        if tag != DECODER_CONFIG_DESCRIPTOR {
            continue;
        }
        if desc.remaining() < 13 {
            return Err(ClipError::InvalidData("DecoderConfigDescriptor too short".into()));
        }
        let object_type_indication = desc.get_u8();
        desc.advance(1 + 3 + 4); // streamType, bufferSizeDB, maxBitrate
        let avg_bitrate = desc.get_u32();

        let mut decoder_specific_info = None;
        while desc.has_remaining() {
            let (tag, payload) = read_descriptor(&mut desc)?;
            if tag == DECODER_SPECIFIC_INFO {
                decoder_specific_info = Some(payload);
                break;
            }
        }

        return Ok(EsdsInfo {
            object_type_indication,
            avg_bitrate,
            decoder_specific_info,
        });
    }

    Err(ClipError::InvalidData("esds has no DecoderConfigDescriptor".into()))
}

/// Parses an AudioSpecificConfig (ISO 14496-3 1.6.2.1), up to the frame length flag.
pub fn parse_audio_specific_config(data: &[u8]) -> Result<AACConfig> {
    let mut reader = BitReader::new(data);

    let mut object_type = read_object_type(&mut reader)?;
    let (mut sample_rate_index, mut sample_rate) = read_sample_rate(&mut reader)?;
    let channel_configuration = reader.read_u8(4)?;

    // Explicit SBR/PS signalling carries the extension rate and the core type.
    if object_type == 5 || object_type == 29 {
        let (index, rate) = read_sample_rate(&mut reader)?;
        sample_rate_index = index;
        sample_rate = rate;
        object_type = read_object_type(&mut reader)?;
    }

    let frame_length = match object_type {
        1..=4 | 6 | 7 | 17 | 19..=23 => {
            if reader.read_flag()? {
                960
            } else {
                1024
            }
        }
        _ => 1024,
    };

    Ok(AACConfig {
        object_type,
        sample_rate_index,
        sample_rate,
        channel_configuration,
        frame_length,
    })
}

fn read_object_type(reader: &mut BitReader) -> Result<u8> {
    let object_type = reader.read_u8(5)?;
    if object_type == 31 {
        return Ok(32 + reader.read_u8(6)?);
    }
    Ok(object_type)
}

fn read_sample_rate(reader: &mut BitReader) -> Result<(u8, u32)> {
    let index = reader.read_u8(4)?;
    if index == 0x0F {
        return Ok((index, reader.read_bits(24)?));
    }
    let rate = sample_rate_from_index(index)
        .ok_or_else(|| ClipError::InvalidData(format!("reserved sample rate index {}", index)))?;
    Ok((index, rate))
}

fn read_descriptor(buf: &mut Bytes) -> Result<(u8, Bytes)> {
    let tag = take_u8(buf)?;
    let mut size = 0usize;
    for _ in 0..4 {
        let byte = take_u8(buf)?;
        size = (size << 7) | (byte & 0x7F) as usize;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if buf.remaining() < size {
        return Err(ClipError::InvalidData(format!(
            "descriptor {:#x} claims {} bytes, {} left",
            tag,
            size,
            buf.remaining()
        )));
    }
    Ok((tag, buf.split_to(size)))
}

fn take_u8(buf: &mut Bytes) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(ClipError::InvalidData("descriptor truncated".into()));
    }
    Ok(buf.get_u8())
}

fn skip(buf: &mut Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(ClipError::InvalidData("descriptor truncated".into()));
    }
    buf.advance(n);
    Ok(())
}
