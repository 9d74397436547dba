use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Memory layout of a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar Y, U, V at 4:2:0.
    I420,
    /// Y plane followed by interleaved UV at 4:2:0.
    Nv12,
    /// Packed 8-bit RGBA.
    Rgba,
}

/// Decoder-allocated image memory.
///
/// Implementations release their backing storage on drop, so the last
/// [`DecodedVideoFrame`] handle going away frees the image.
pub trait FrameImage: Send + Sync + fmt::Debug {
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Plane layout.
    fn format(&self) -> PixelFormat;
    /// Plane data in layout order.
    fn planes(&self) -> &[Bytes];
}

/// Plain in-memory image, used by software decoders.
#[derive(Debug, Clone)]
pub struct PlanarImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Plane layout.
    pub format: PixelFormat,
    /// Plane data in layout order.
    pub planes: Vec<Bytes>,
}

impl FrameImage for PlanarImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn planes(&self) -> &[Bytes] {
        &self.planes
    }
}

/// A decoded picture with its presentation time.
///
/// The frame-buffer pipeline owns buffered frames. A frame handed out by
/// `render` is a shared handle to the same image and must not be kept past
/// the next query; call [`close`](DecodedVideoFrame::close) or drop it.
#[derive(Clone)]
pub struct DecodedVideoFrame {
    /// Presentation time in microseconds.
    pub timestamp_us: i64,
    /// Display duration in microseconds.
    pub duration_us: i64,
    image: Arc<dyn FrameImage>,
}

impl DecodedVideoFrame {
    /// Wraps a decoded image with its timing.
    pub fn new(timestamp_us: i64, duration_us: i64, image: Arc<dyn FrameImage>) -> Self {
        Self {
            timestamp_us,
            duration_us,
            image,
        }
    }

    /// The decoded image.
    pub fn image(&self) -> &dyn FrameImage {
        self.image.as_ref()
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Number of live handles to the underlying image.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.image)
    }

    /// Releases this handle.
    pub fn close(self) {}
}

impl fmt::Debug for DecodedVideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedVideoFrame")
            .field("timestamp_us", &self.timestamp_us)
            .field("duration_us", &self.duration_us)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

/// Decoded PCM, interleaved `f32` in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    /// Presentation time of the first frame in microseconds.
    pub timestamp_us: i64,
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Interleaved samples, `channels` per frame.
    pub samples: Vec<f32>,
}

impl AudioData {
    /// Whole frames held.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length in microseconds.
    pub fn duration_us(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as i64 * 1_000_000 / self.sample_rate as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_releases_handle() {
        let image: Arc<dyn FrameImage> = Arc::new(PlanarImage {
            width: 4,
            height: 2,
            format: PixelFormat::Rgba,
            planes: vec![Bytes::from(vec![0u8; 32])],
        });
        let frame = DecodedVideoFrame::new(0, 33_333, image.clone());
        let copy = frame.clone();
        assert_eq!(Arc::strong_count(&image), 3);
        copy.close();
        frame.close();
        assert_eq!(Arc::strong_count(&image), 1);
    }

    #[test]
    fn test_audio_frames() {
        let data = AudioData {
            timestamp_us: 0,
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0.0; 960],
        };
        assert_eq!(data.frames(), 480);
        assert_eq!(data.duration_us(), 10_000);
    }
}
