use bytes::{Buf, Bytes};
use log::{debug, trace};

use super::sample_table::{SampleEntry, SampleTableBuilder};
use crate::av::{CodecType, TrackDescriptor, TrackKind};
use crate::codec::aac::{parse_esds, OTI_MPEG4_AUDIO};
use crate::codec::h264::AvcDecoderConfig;
use crate::error::{ClipError, Result};

/// Four-character code naming a box or sample entry.
pub type FourCC = [u8; 4];

/// Box types the index understands.
pub(crate) mod box_type {
    use super::FourCC;

    pub(crate) const MOOV: FourCC = *b"moov";
    pub(crate) const MVHD: FourCC = *b"mvhd";
    pub(crate) const TRAK: FourCC = *b"trak";
    pub(crate) const TKHD: FourCC = *b"tkhd";
    pub(crate) const MDIA: FourCC = *b"mdia";
    pub(crate) const MDHD: FourCC = *b"mdhd";
    pub(crate) const HDLR: FourCC = *b"hdlr";
    pub(crate) const MINF: FourCC = *b"minf";
    pub(crate) const STBL: FourCC = *b"stbl";
    pub(crate) const STSD: FourCC = *b"stsd";
    pub(crate) const STTS: FourCC = *b"stts";
    pub(crate) const CTTS: FourCC = *b"ctts";
    pub(crate) const STSS: FourCC = *b"stss";
    pub(crate) const STSC: FourCC = *b"stsc";
    pub(crate) const STSZ: FourCC = *b"stsz";
    pub(crate) const STCO: FourCC = *b"stco";
    pub(crate) const CO64: FourCC = *b"co64";
    pub(crate) const UUID: FourCC = *b"uuid";
    pub(crate) const AVCC: FourCC = *b"avcC";
    pub(crate) const HVCC: FourCC = *b"hvcC";
    pub(crate) const VPCC: FourCC = *b"vpcC";
    pub(crate) const AV1C: FourCC = *b"av1C";
    pub(crate) const ESDS: FourCC = *b"esds";
    pub(crate) const DOPS: FourCC = *b"dOps";
    pub(crate) const WAVE: FourCC = *b"wave";
}

pub(crate) const HANDLER_VIDEO: FourCC = *b"vide";
pub(crate) const HANDLER_AUDIO: FourCC = *b"soun";

pub(crate) fn fourcc_str(fourcc: &FourCC) -> String {
    String::from_utf8_lossy(fourcc).into_owned()
}

/// A box header: type, header length and total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Four-character box type.
    pub box_type: FourCC,
    /// Header length: 8, or 16 with a 64-bit size.
    pub header_size: u64,
    /// Total size including the header. `None` means the box runs to the end
    /// of its container (or of the file, at top level).
    pub size: Option<u64>,
}

impl BoxHeader {
    /// Parses a header from the front of `data`.
    ///
    /// Returns `Ok(None)` when `data` is too short to hold the whole header.
    pub fn parse(data: &[u8]) -> Result<Option<BoxHeader>> {
        if data.len() < 8 {
            return Ok(None);
        }
        let mut buf = data;
        let size32 = buf.get_u32();
        let mut box_type = [0u8; 4];
        buf.copy_to_slice(&mut box_type);

        let mut header_size = 8u64;
        let size = match size32 {
            0 => None,
            1 => {
                if buf.remaining() < 8 {
                    return Ok(None);
                }
                header_size = 16;
                Some(buf.get_u64())
            }
            n => Some(n as u64),
        };

        if box_type == box_type::UUID {
            if buf.remaining() < 16 {
                return Ok(None);
            }
            header_size += 16;
        }

        if let Some(size) = size {
            if size < header_size {
                return Err(ClipError::ContainerParse(format!(
                    "box '{}' has size {} smaller than its header",
                    fourcc_str(&box_type),
                    size
                )));
            }
        }

        Ok(Some(BoxHeader {
            box_type,
            header_size,
            size,
        }))
    }

    /// Payload length, when the size is known.
    pub fn payload_size(&self) -> Option<u64> {
        self.size.map(|s| s - self.header_size)
    }
}

/// Splits a container payload into its child boxes.
///
/// Zero padding shorter than a box header at the end is ignored.
pub fn children(mut data: &[u8]) -> Result<Vec<(FourCC, &[u8])>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        if data.len() < 8 && data.iter().all(|b| *b == 0) {
            break;
        }
        let header = BoxHeader::parse(data)?.ok_or_else(|| {
            ClipError::ContainerParse(format!("{} trailing bytes inside a box", data.len()))
        })?;
        let size = match header.size {
            Some(size) => size,
            None => data.len() as u64,
        };
        if size > data.len() as u64 {
            return Err(ClipError::ContainerParse(format!(
                "box '{}' overruns its parent ({} > {})",
                fourcc_str(&header.box_type),
                size,
                data.len()
            )));
        }
        out.push((
            header.box_type,
            &data[header.header_size as usize..size as usize],
        ));
        data = &data[size as usize..];
    }
    Ok(out)
}

fn child<'a>(boxes: &[(FourCC, &'a [u8])], box_type: FourCC) -> Option<&'a [u8]> {
    boxes.iter().find(|(t, _)| *t == box_type).map(|(_, b)| *b)
}

fn require<'a>(boxes: &[(FourCC, &'a [u8])], box_type: FourCC, parent: &str) -> Result<&'a [u8]> {
    child(boxes, box_type).ok_or_else(|| {
        ClipError::ContainerParse(format!("'{}' is missing from {}", fourcc_str(&box_type), parent))
    })
}

fn need(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(ClipError::ContainerParse(format!("{} is truncated", what)));
    }
    Ok(())
}

/// Reads version and flags of a full box.
fn full_box(buf: &mut &[u8], what: &str) -> Result<(u8, u32)> {
    need(buf, 4, what)?;
    let word = buf.get_u32();
    Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
}

#[derive(Debug, Clone, Copy, Default)]
struct TrackHeader {
    track_id: u32,
    width: u32,
    height: u32,
}

fn parse_tkhd(mut buf: &[u8]) -> Result<TrackHeader> {
    let (version, _) = full_box(&mut buf, "tkhd")?;
    let track_id = if version == 1 {
        need(buf, 36, "tkhd")?;
        buf.advance(16);
        let id = buf.get_u32();
        buf.advance(4 + 8);
        id
    } else {
        need(buf, 24, "tkhd")?;
        buf.advance(8);
        let id = buf.get_u32();
        buf.advance(4 + 4);
        id
    };
    // reserved, layer, alternate group, volume, reserved, matrix
    need(buf, 8 + 8 + 36 + 8, "tkhd")?;
    buf.advance(8 + 8 + 36);
    let width = buf.get_u32() >> 16;
    let height = buf.get_u32() >> 16;
    Ok(TrackHeader {
        track_id,
        width,
        height,
    })
}

fn parse_mdhd(mut buf: &[u8]) -> Result<(u32, u64)> {
    let (version, _) = full_box(&mut buf, "mdhd")?;
    let (timescale, duration) = if version == 1 {
        need(buf, 28, "mdhd")?;
        buf.advance(16);
        (buf.get_u32(), buf.get_u64())
    } else {
        need(buf, 16, "mdhd")?;
        buf.advance(8);
        (buf.get_u32(), buf.get_u32() as u64)
    };
    if timescale == 0 {
        return Err(ClipError::ContainerParse("mdhd timescale is zero".into()));
    }
    Ok((timescale, duration))
}

fn parse_hdlr(mut buf: &[u8]) -> Result<FourCC> {
    full_box(&mut buf, "hdlr")?;
    need(buf, 8, "hdlr")?;
    buf.advance(4);
    let mut handler = [0u8; 4];
    buf.copy_to_slice(&mut handler);
    Ok(handler)
}

/// First sample entry of an `stsd` box.
#[derive(Debug, Clone, Default)]
pub(crate) struct SampleDescription {
    pub entry: FourCC,
    pub width: u32,
    pub height: u32,
    pub channels: u16,
    pub sample_size: u16,
    pub sample_rate: u32,
    pub codec: String,
    pub decoder_config: Option<Bytes>,
    pub config_dimensions: Option<(u32, u32)>,
}

const VISUAL_ENTRY_SIZE: usize = 78;
const AUDIO_ENTRY_SIZE: usize = 28;

fn parse_stsd(mut buf: &[u8], handler: FourCC) -> Result<SampleDescription> {
    full_box(&mut buf, "stsd")?;
    need(buf, 4, "stsd")?;
    let count = buf.get_u32();
    if count == 0 {
        return Err(ClipError::ContainerParse("stsd has no sample entries".into()));
    }
    let entries = children(buf)?;
    let (entry, body) = entries
        .first()
        .copied()
        .ok_or_else(|| ClipError::ContainerParse("stsd has no sample entries".into()))?;

    let mut desc = SampleDescription {
        entry,
        codec: fourcc_str(&entry),
        ..SampleDescription::default()
    };

    if handler == HANDLER_VIDEO {
        need(body, VISUAL_ENTRY_SIZE, "visual sample entry")?;
        let mut fields = &body[24..];
        desc.width = fields.get_u16() as u32;
        desc.height = fields.get_u16() as u32;
        parse_codec_boxes(&mut desc, children(&body[VISUAL_ENTRY_SIZE..])?)?;
    } else {
        need(body, AUDIO_ENTRY_SIZE, "audio sample entry")?;
        let mut fields = &body[8..];
        let version = fields.get_u16();
        fields.advance(6);
        desc.channels = fields.get_u16();
        desc.sample_size = fields.get_u16();
        fields.advance(4);
        desc.sample_rate = fields.get_u32() >> 16;

        // QuickTime sound description extensions
        let extra = match version {
            1 => 16,
            2 => 36,
            _ => 0,
        };
        need(body, AUDIO_ENTRY_SIZE + extra, "audio sample entry")?;
        if version == 2 {
            let mut v2 = &body[AUDIO_ENTRY_SIZE..];
            v2.advance(4);
            desc.sample_rate = v2.get_f64().round() as u32;
            desc.channels = v2.get_u32() as u16;
            v2.advance(4);
            desc.sample_size = v2.get_u32() as u16;
        }
        parse_codec_boxes(&mut desc, children(&body[AUDIO_ENTRY_SIZE + extra..])?)?;
    }

    Ok(desc)
}

fn parse_codec_boxes(desc: &mut SampleDescription, boxes: Vec<(FourCC, &[u8])>) -> Result<()> {
    match CodecType::from_sample_entry(&desc.entry) {
        CodecType::H264 => {
            let avcc = require(&boxes, box_type::AVCC, "avc1 sample entry")?;
            let record = AvcDecoderConfig::parse(avcc)
                .map_err(|e| ClipError::ContainerParse(format!("bad avcC: {}", e)))?;
            desc.codec = record.codec_string().replacen("avc1", &fourcc_str(&desc.entry), 1);
            desc.config_dimensions = record.dimensions();
            desc.decoder_config = Some(Bytes::copy_from_slice(avcc));
        }
        CodecType::H265 => {
            let hvcc = require(&boxes, box_type::HVCC, "hevc sample entry")?;
            desc.codec = hevc_codec_string(&desc.entry, hvcc)?;
            desc.decoder_config = Some(Bytes::copy_from_slice(hvcc));
        }
        CodecType::VP8 => {
            desc.codec = "vp8".to_string();
            desc.decoder_config = child(&boxes, box_type::VPCC).map(Bytes::copy_from_slice);
        }
        CodecType::VP9 => {
            let vpcc = require(&boxes, box_type::VPCC, "vp09 sample entry")?;
            desc.codec = vp9_codec_string(vpcc)?;
            desc.decoder_config = Some(Bytes::copy_from_slice(vpcc));
        }
        CodecType::AV1 => {
            let av1c = require(&boxes, box_type::AV1C, "av01 sample entry")?;
            desc.codec = av1_codec_string(av1c)?;
            desc.decoder_config = Some(Bytes::copy_from_slice(av1c));
        }
        CodecType::AAC => {
            // QuickTime files nest esds inside a wave box
            let esds = match child(&boxes, box_type::ESDS) {
                Some(esds) => esds,
                None => {
                    let wave = require(&boxes, box_type::WAVE, "mp4a sample entry")?;
                    let inner = children(wave)?;
                    require(&inner, box_type::ESDS, "wave")?
                }
            };
            let info = parse_esds(esds)
                .map_err(|e| ClipError::ContainerParse(format!("bad esds: {}", e)))?;
            desc.codec = info.codec_string();
            if info.object_type_indication == OTI_MPEG4_AUDIO {
                if let Ok(Some(asc)) = info.audio_specific_config() {
                    desc.sample_rate = asc.sample_rate;
                    if let Some(channels) = asc.channels() {
                        desc.channels = channels;
                    }
                }
            }
            desc.decoder_config = info.decoder_specific_info;
        }
        CodecType::OPUS => {
            desc.codec = "opus".to_string();
            desc.decoder_config = child(&boxes, box_type::DOPS).map(Bytes::copy_from_slice);
        }
        CodecType::PCM | CodecType::Unknown => {}
    }
    Ok(())
}

fn hevc_codec_string(entry: &FourCC, hvcc: &[u8]) -> Result<String> {
    need(hvcc, 13, "hvcC")?;
    let mut buf = &hvcc[1..];
    let byte = buf.get_u8();
    let profile_space = byte >> 6;
    let tier = (byte >> 5) & 1;
    let profile_idc = byte & 0x1F;
    let compat = buf.get_u32().reverse_bits();
    let mut constraints = [0u8; 6];
    buf.copy_to_slice(&mut constraints);
    let level = buf.get_u8();

    let space = match profile_space {
        1 => "A",
        2 => "B",
        3 => "C",
        _ => "",
    };
    let mut codec = format!(
        "{}.{}{}.{:x}.{}{}",
        fourcc_str(entry),
        space,
        profile_idc,
        compat,
        if tier == 1 { 'H' } else { 'L' },
        level
    );
    let used = constraints
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |i| i + 1);
    for b in &constraints[..used] {
        codec.push_str(&format!(".{:02X}", b));
    }
    Ok(codec)
}

fn vp9_codec_string(vpcc: &[u8]) -> Result<String> {
    need(vpcc, 7, "vpcC")?;
    let profile = vpcc[4];
    let level = vpcc[5];
    let bit_depth = vpcc[6] >> 4;
    Ok(format!("vp09.{:02}.{:02}.{:02}", profile, level, bit_depth))
}

fn av1_codec_string(av1c: &[u8]) -> Result<String> {
    need(av1c, 3, "av1C")?;
    let profile = av1c[1] >> 5;
    let level = av1c[1] & 0x1F;
    let tier = if av1c[2] & 0x80 != 0 { 'H' } else { 'M' };
    let high_bitdepth = av1c[2] & 0x40 != 0;
    let twelve_bit = av1c[2] & 0x20 != 0;
    let bit_depth = match (high_bitdepth, twelve_bit) {
        (true, true) => 12,
        (true, false) => 10,
        _ => 8,
    };
    Ok(format!("av01.{}.{:02}{}.{:02}", profile, level, tier, bit_depth))
}

fn parse_stts(mut buf: &[u8]) -> Result<Vec<(u32, u32)>> {
    full_box(&mut buf, "stts")?;
    read_pairs(buf, "stts")
}

fn parse_ctts(mut buf: &[u8]) -> Result<Vec<(u32, i32)>> {
    // Version 0 offsets are unsigned in theory but written signed in practice.
    full_box(&mut buf, "ctts")?;
    Ok(read_pairs(buf, "ctts")?
        .into_iter()
        .map(|(count, offset)| (count, offset as i32))
        .collect())
}

fn read_pairs(mut buf: &[u8], what: &str) -> Result<Vec<(u32, u32)>> {
    need(buf, 4, what)?;
    let count = buf.get_u32() as usize;
    need(buf, count.saturating_mul(8), what)?;
    Ok((0..count).map(|_| (buf.get_u32(), buf.get_u32())).collect())
}

fn parse_u32_list(mut buf: &[u8], what: &str) -> Result<Vec<u32>> {
    full_box(&mut buf, what)?;
    need(buf, 4, what)?;
    let count = buf.get_u32() as usize;
    need(buf, count.saturating_mul(4), what)?;
    Ok((0..count).map(|_| buf.get_u32()).collect())
}

fn parse_stsc(mut buf: &[u8]) -> Result<Vec<(u32, u32, u32)>> {
    full_box(&mut buf, "stsc")?;
    need(buf, 4, "stsc")?;
    let count = buf.get_u32() as usize;
    need(buf, count.saturating_mul(12), "stsc")?;
    Ok((0..count)
        .map(|_| (buf.get_u32(), buf.get_u32(), buf.get_u32()))
        .collect())
}

fn parse_stsz(mut buf: &[u8]) -> Result<(u32, u32, Vec<u32>)> {
    full_box(&mut buf, "stsz")?;
    need(buf, 8, "stsz")?;
    let uniform = buf.get_u32();
    let count = buf.get_u32();
    if uniform != 0 {
        return Ok((uniform, count, Vec::new()));
    }
    need(buf, (count as usize).saturating_mul(4), "stsz")?;
    Ok((0, count, (0..count).map(|_| buf.get_u32()).collect()))
}

fn parse_co64(mut buf: &[u8]) -> Result<Vec<u64>> {
    full_box(&mut buf, "co64")?;
    need(buf, 4, "co64")?;
    let count = buf.get_u32() as usize;
    need(buf, count.saturating_mul(8), "co64")?;
    Ok((0..count).map(|_| buf.get_u64()).collect())
}

/// A track resolved from `moov`: its descriptor and its sample table.
#[derive(Debug, Clone)]
pub struct ParsedTrack {
    /// What consumers see of the track.
    pub descriptor: TrackDescriptor,
    /// Every sample in decode order.
    pub samples: Vec<SampleEntry>,
}

/// Parses a complete `moov` payload into its audio and video tracks.
///
/// Tracks with other handlers (hints, text, timecode) are skipped.
pub fn parse_moov(payload: &[u8]) -> Result<Vec<ParsedTrack>> {
    let boxes = children(payload)?;
    require(&boxes, box_type::MVHD, "moov")?;

    let mut tracks = Vec::new();
    for (kind, trak) in &boxes {
        if *kind != box_type::TRAK {
            continue;
        }
        if let Some(track) = parse_trak(trak)? {
            tracks.push(track);
        }
    }

    if tracks.is_empty() {
        return Err(ClipError::ContainerParse("moov has no audio or video track".into()));
    }
    Ok(tracks)
}

fn parse_trak(trak: &[u8]) -> Result<Option<ParsedTrack>> {
    let boxes = children(trak)?;
    let header = parse_tkhd(require(&boxes, box_type::TKHD, "trak")?)?;
    let mdia = children(require(&boxes, box_type::MDIA, "trak")?)?;
    let (timescale, duration) = parse_mdhd(require(&mdia, box_type::MDHD, "mdia")?)?;
    let handler = parse_hdlr(require(&mdia, box_type::HDLR, "mdia")?)?;

    let kind = match handler {
        HANDLER_VIDEO => TrackKind::Video,
        HANDLER_AUDIO => TrackKind::Audio,
        other => {
            trace!("skipping track {} with handler '{}'", header.track_id, fourcc_str(&other));
            return Ok(None);
        }
    };

    let minf = children(require(&mdia, box_type::MINF, "mdia")?)?;
    let stbl = children(require(&minf, box_type::STBL, "minf")?)?;
    let desc = parse_stsd(require(&stbl, box_type::STSD, "stbl")?, handler)?;

    let mut table = SampleTableBuilder::new();
    table.set_stts(parse_stts(require(&stbl, box_type::STTS, "stbl")?)?);
    if let Some(ctts) = child(&stbl, box_type::CTTS) {
        table.set_ctts(parse_ctts(ctts)?);
    }
    if let Some(stss) = child(&stbl, box_type::STSS) {
        table.set_sync_samples(parse_u32_list(stss, "stss")?);
    }
    table.set_stsc(parse_stsc(require(&stbl, box_type::STSC, "stbl")?)?);
    let (uniform, count, sizes) = parse_stsz(require(&stbl, box_type::STSZ, "stbl")?)?;
    table.set_stsz(uniform, count, sizes);
    let offsets: Vec<u64> = match child(&stbl, box_type::STCO) {
        Some(stco) => parse_u32_list(stco, "stco")?
            .into_iter()
            .map(u64::from)
            .collect(),
        None => parse_co64(require(&stbl, box_type::CO64, "stbl")?)?,
    };
    table.set_chunk_offsets(offsets);
    let samples = table.build()?;

    let codec_type = CodecType::from_sample_entry(&desc.entry);
    let (width, height) = match kind {
        TrackKind::Video => {
            let (w, h) = if header.width > 0 && header.height > 0 {
                (header.width, header.height)
            } else if let Some(dims) = desc.config_dimensions {
                dims
            } else {
                (desc.width, desc.height)
            };
            (Some(w), Some(h))
        }
        TrackKind::Audio => (None, None),
    };

    let descriptor = TrackDescriptor {
        id: header.track_id,
        kind,
        codec_type,
        codec: desc.codec,
        width,
        height,
        sample_rate: (kind == TrackKind::Audio).then_some(desc.sample_rate),
        channels: (kind == TrackKind::Audio).then_some(desc.channels),
        sample_size: (kind == TrackKind::Audio).then_some(desc.sample_size),
        timescale,
        duration_us: (duration as i128 * 1_000_000 / timescale as i128) as i64,
        sample_count: samples.len(),
        decoder_config: desc.decoder_config,
        sample_entry: desc.entry,
    };
    debug!(
        "track {}: {} {} ({} samples)",
        descriptor.id,
        descriptor.kind,
        descriptor.codec,
        descriptor.sample_count
    );

    Ok(Some(ParsedTrack {
        descriptor,
        samples,
    }))
}
