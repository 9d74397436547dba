/// Sequence parameter set fields needed to size the picture.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SPSInfo {
    /// `profile_idc`.
    pub profile_idc: u8,
    /// `constraint_set` flags byte.
    pub constraint_flags: u8,
    /// `level_idc`.
    pub level_idc: u8,
    /// `chroma_format_idc`, `1` (4:2:0) unless signalled.
    pub chroma_format_idc: u32,
    /// Luma width after frame cropping.
    pub width: u32,
    /// Luma height after frame cropping.
    pub height: u32,
}

/// `nal_unit_type` of a sequence parameter set.
pub const NAL_TYPE_SPS: u8 = 7;
