use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Drop a config template next to the build output if possible
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../clipstream.template.toml");

    let template = r#"# Clipstream Configuration Template
# Copy this file to 'clipstream.toml' and adjust the values you need.
# Every key can also be set through a CLIPSTREAM_<KEY> environment variable.

# Decoded video frames kept ahead of the playhead
frame_buffer_target = 3

# Per-track encoded sample queue that pauses the source / re-arms it
sample_high_water = 50
sample_low_water = 10

# Samples per source delivery batch
source_batch_size = 16

# Bytes requested per read from the byte source
read_chunk_size = 65536

# Audio ring buffer length in seconds and render quantum in frames
ring_buffer_seconds = 0.5
render_quantum = 128
sample_rate = 48000

# Clock tick period and audio feeder period, in milliseconds
tick_interval_ms = 16.667
audio_fill_interval_ms = 10

# Seconds of audio the feeder keeps queued in the ring
audio_fill_target_seconds = 0.25
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
