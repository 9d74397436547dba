/// AAC configuration parsing
pub mod aac;
/// H.264 configuration parsing
pub mod h264;
/// Uncompressed audio decoding
pub mod pcm;

pub use pcm::PcmDecoder;
