//! AAC configuration: `esds` descriptor walking and AudioSpecificConfig parsing.

/// esds and AudioSpecificConfig parsing
pub mod parser;
mod types;

pub use parser::{parse_audio_specific_config, parse_esds, EsdsInfo};
pub use types::*;
