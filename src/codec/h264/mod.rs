//! # H.264/AVC configuration parsing
//!
//! The playback core never decodes H.264 itself; it only needs what the
//! container says about the stream:
//!
//! - the `avcC` decoder configuration record handed to the platform decoder
//! - the `avc1.PPCCLL` codec string
//! - picture dimensions from the first SPS, when `tkhd` carries none
//!
//! ```rust
//! use clipstream::codec::h264::parse_sps;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sps = [0x67, 0x42, 0x00, 0x1f, 0xda, 0x01, 0x40, 0x16, 0xe4];
//! let info = parse_sps(&sps)?;
//! assert_eq!((info.width, info.height), (1280, 720));
//! # Ok(())
//! # }
//! ```

/// avcC decoder configuration record
pub mod avcc;
/// NAL unit and SPS parsing
pub mod parser;
mod types;

pub use avcc::AvcDecoderConfig;
pub use parser::{parse_sps, remove_emulation_prevention};
pub use types::*;
