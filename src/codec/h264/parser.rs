use log::trace;

use super::types::{SPSInfo, NAL_TYPE_SPS};
use crate::error::{ClipError, Result};
use crate::utils::BitReader;

const HIGH_PROFILES: [u8; 10] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138];

/// Strips `00 00 03` emulation prevention bytes from a NAL unit payload.
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x03 {
            out.push(0x00);
            out.push(0x00);
            i += 3;
            continue;
        }
        out.push(data[i]);
        i += 1;
    }

    out
}

/// Parses a sequence parameter set NAL unit, header byte included.
///
/// Only the fields needed to size the picture are kept; VUI is not read.
pub fn parse_sps(nal: &[u8]) -> Result<SPSInfo> {
    let header = nal
        .first()
        .ok_or_else(|| ClipError::InvalidData("empty SPS".into()))?;
    if header & 0x1F != NAL_TYPE_SPS {
        return Err(ClipError::InvalidData(format!(
            "NAL type {} is not an SPS",
            header & 0x1F
        )));
    }

    let rbsp = remove_emulation_prevention(&nal[1..]);
    let mut reader = BitReader::new(&rbsp);

    let profile_idc = reader.read_u8(8)?;
    let constraint_flags = reader.read_u8(8)?;
    let level_idc = reader.read_u8(8)?;
    reader.read_golomb()?; // seq_parameter_set_id
    trace!("sps profile_idc={} level_idc={}", profile_idc, level_idc);

    let mut chroma_format_idc = 1;
    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = reader.read_golomb()?;
        if chroma_format_idc == 3 {
            reader.read_bits(1)?; // separate_colour_plane_flag
        }
        reader.read_golomb()?; // bit_depth_luma_minus8
        reader.read_golomb()?; // bit_depth_chroma_minus8
        reader.read_bits(1)?; // qpprime_y_zero_transform_bypass_flag

        if reader.read_flag()? {
            let count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..count {
                if reader.read_flag()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.read_golomb()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = reader.read_golomb()?;
    if pic_order_cnt_type == 0 {
        reader.read_golomb()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        reader.read_bits(1)?; // delta_pic_order_always_zero_flag
        reader.read_signed_golomb()?; // offset_for_non_ref_pic
        reader.read_signed_golomb()?; // offset_for_top_to_bottom_field
        let cycle = reader.read_golomb()?;
        for _ in 0..cycle {
            reader.read_signed_golomb()?;
        }
    }

    reader.read_golomb()?; // max_num_ref_frames
    reader.read_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = reader.read_golomb()?;
    let pic_height_in_map_units = reader.read_golomb()?;
    let frame_mbs_only_flag = reader.read_bits(1)?;
    if frame_mbs_only_flag == 0 {
        reader.read_bits(1)?; // mb_adaptive_frame_field_flag
    }
    reader.read_bits(1)?; // direct_8x8_inference_flag

    let field_factor = 2 - frame_mbs_only_flag;
    let mut width = scaled(&[pic_width_in_mbs as u64 + 1, 16])?;
    let mut height = scaled(&[field_factor as u64, pic_height_in_map_units as u64 + 1, 16])?;

    if reader.read_flag()? {
        let left = reader.read_golomb()? as u64;
        let right = reader.read_golomb()? as u64;
        let top = reader.read_golomb()? as u64;
        let bottom = reader.read_golomb()? as u64;
        let (unit_x, unit_y) = match chroma_format_idc {
            0 => (1, field_factor),
            1 => (2, 2 * field_factor),
            2 => (2, field_factor),
            _ => (1, field_factor),
        };
        width = width.saturating_sub(scaled(&[left + right, unit_x as u64])?);
        height = height.saturating_sub(scaled(&[top + bottom, unit_y as u64])?);
    }

    Ok(SPSInfo {
        profile_idc,
        constraint_flags,
        level_idc,
        chroma_format_idc,
        width,
        height,
    })
}

/// Product of the factors, rejected when it does not fit a `u32`.
fn scaled(factors: &[u64]) -> Result<u32> {
    factors
        .iter()
        .try_fold(1u64, |acc, f| acc.checked_mul(*f))
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| ClipError::InvalidData("SPS picture size out of range".into()))
}

fn skip_scaling_list(reader: &mut BitReader, size: usize) -> Result<()> {
    let mut last_scale = 8;
    let mut next_scale = 8;

    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.read_signed_golomb()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        last_scale = if next_scale == 0 { last_scale } else { next_scale };
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) const SPS_720P_BASELINE: [u8; 9] =
        [0x67, 0x42, 0x00, 0x1f, 0xda, 0x01, 0x40, 0x16, 0xe4];
    pub(crate) const SPS_1080P_HIGH: [u8; 11] = [
        0x67, 0x64, 0x00, 0x28, 0xac, 0xb4, 0x03, 0xc0, 0x11, 0x3f, 0x2a,
    ];

    #[test]
    fn test_remove_emulation_prevention() {
        let input = vec![0x00, 0x00, 0x03, 0x01];
        assert_eq!(remove_emulation_prevention(&input), vec![0x00, 0x00, 0x01]);

        let input = vec![0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x02];
        assert_eq!(
            remove_emulation_prevention(&input),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x02]
        );

        let input = vec![0x00, 0x01, 0x02, 0x03];
        assert_eq!(remove_emulation_prevention(&input), input);
    }

    #[test]
    fn test_baseline_dimensions() {
        let sps = parse_sps(&SPS_720P_BASELINE).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 31);
        assert_eq!((sps.width, sps.height), (1280, 720));
    }

    #[test]
    fn test_high_profile_cropping() {
        let sps = parse_sps(&SPS_1080P_HIGH).unwrap();
        assert_eq!(sps.profile_idc, 100);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!((sps.width, sps.height), (1920, 1080));
    }

    #[test]
    fn test_oversized_picture_is_rejected() {
        // baseline profile, pic_width_in_mbs_minus1 = 2^31 - 1
        let mut fields: Vec<(u64, u32)> = vec![(0x67, 8), (66, 8), (0, 8), (31, 8)];
        fields.extend([ue(0), ue(0), ue(0), ue(0), ue(1), (0, 1)]);
        fields.extend([ue((1 << 31) - 1), ue(0), (1, 1), (1, 1), (0, 1), (1, 1)]);
        let sps = pack(&fields);

        let err = parse_sps(&sps).unwrap_err();
        assert!(matches!(err, ClipError::InvalidData(_)));
    }

    fn ue(value: u32) -> (u64, u32) {
        let code = value as u64 + 1;
        let width = 64 - code.leading_zeros();
        (code, width * 2 - 1)
    }

    /// MSB-first packing; long runs of zero bytes get emulation prevention.
    fn pack(fields: &[(u64, u32)]) -> Vec<u8> {
        let mut bits = Vec::new();
        for &(value, width) in fields {
            bits.extend((0..width).rev().map(|i| (value >> i) & 1 == 1));
        }
        let mut raw: Vec<u8> = bits
            .chunks(8)
            .map(|c| c.iter().enumerate().fold(0u8, |b, (i, bit)| b | ((*bit as u8) << (7 - i))))
            .collect();
        let mut out = vec![raw.remove(0)];
        let mut zeros = 0;
        for byte in raw {
            if zeros == 2 && byte <= 3 {
                out.push(3);
                zeros = 0;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            out.push(byte);
        }
        out
    }

    #[test]
    fn test_rejects_non_sps() {
        assert!(parse_sps(&[0x68, 0xce, 0x38, 0x80]).is_err());
        assert!(parse_sps(&[]).is_err());
        assert!(parse_sps(&[0x67, 0x42]).is_err());
    }
}
