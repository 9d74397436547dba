mod common;

use async_trait::async_trait;
use clipstream::audio::{AudioFeeder, AudioSink, RingBuffer};
use clipstream::av::decoder::{DecoderOutput, FrameCallback, VideoDecoder};
use clipstream::av::frame::{PixelFormat, PlanarImage};
use clipstream::av::{DecodedVideoFrame, EncodedSample, TrackDescriptor, TrackKind};
use clipstream::clock::PlaybackClock;
use clipstream::codec::PcmDecoder;
use clipstream::config::PlaybackConfig;
use clipstream::format::PullDemuxer;
use clipstream::pipeline::{BufferPhase, Clip, ClipStatus};
use clipstream::{ClipError, Result};
use common::{audio_values, build_mp4, Layout, AUDIO_FRAMES_PER_SAMPLE};
use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Stands in for a platform decoder: one frame per sample, delivered
/// inline. Rejects anything that is not H.264.
struct SoftwareDecoder {
    output: Option<FrameCallback>,
    size: (u32, u32),
}

impl SoftwareDecoder {
    fn boxed() -> Box<dyn VideoDecoder> {
        Box::new(Self {
            output: None,
            size: (0, 0),
        })
    }
}

#[async_trait]
impl VideoDecoder for SoftwareDecoder {
    async fn configure(&mut self, track: &TrackDescriptor, output: FrameCallback) -> Result<()> {
        if !track.codec.starts_with("avc1") || track.decoder_config.is_none() {
            return Err(ClipError::UnsupportedCodec(track.codec.clone()));
        }
        self.size = (track.width.unwrap_or(0), track.height.unwrap_or(0));
        self.output = Some(output);
        Ok(())
    }

    fn decode(&mut self, sample: EncodedSample) -> Result<()> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| ClipError::Decode("not configured".into()))?;
        let image = Arc::new(PlanarImage {
            width: self.size.0,
            height: self.size.1,
            format: PixelFormat::I420,
            planes: vec![sample.data.clone()],
        });
        output(DecoderOutput::Frame(DecodedVideoFrame::new(
            sample.pts_us,
            sample.duration_us,
            image,
        )));
        Ok(())
    }

    fn decode_queue_size(&self) -> usize {
        0
    }

    fn close(&mut self) {
        self.output = None;
    }
}

fn pcm(value: i16) -> f32 {
    value as f32 / 32768.0
}

#[tokio::test]
async fn test_clip_renders_nearest_frame() {
    let config = PlaybackConfig::default();
    let data = build_mp4(Layout::default());
    let clip = Clip::open(Cursor::new(data), SoftwareDecoder::boxed(), &config)
        .await
        .unwrap();
    assert_eq!(clip.status(), ClipStatus::Ready);
    assert_eq!(clip.pipeline().phase(), BufferPhase::TargetReached);

    let frame = clip.render(40_000).unwrap();
    assert_eq!(frame.timestamp_us, 33_000);
    assert_eq!((frame.width(), frame.height()), (1280, 720));
    assert_eq!(frame.image().planes()[0].as_ref(), common::video_payload(1));

    // non-decreasing queries never go backwards
    let mut last = frame.timestamp_us;
    for t in (50_000..400_000).step_by(10_000) {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let frame = clip.render(t).unwrap();
        assert!(frame.timestamp_us >= last);
        last = frame.timestamp_us;
    }
    assert_eq!(last, 297_000);
    clip.close();
    assert_eq!(clip.status(), ClipStatus::Closed);
    assert!(clip.render(0).is_none());
}

#[tokio::test]
async fn test_clip_holds_unplayed_audio_track() {
    let config = PlaybackConfig {
        sample_high_water: 8,
        sample_low_water: 2,
        source_batch_size: 2,
        ..PlaybackConfig::default()
    };
    let layout = Layout {
        video_samples: 40,
        audio_samples: 40,
        moov_last: false,
    };
    let clip = Clip::open(Cursor::new(build_mp4(layout)), SoftwareDecoder::boxed(), &config)
        .await
        .unwrap();

    let mut last = 0;
    let mut max_audio = 0;
    for t in (0..1_400_000).step_by(33_000) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        last = clip.render(t).unwrap().timestamp_us;
        max_audio = max_audio.max(clip.demuxer().queued(TrackKind::Audio));
    }
    assert_eq!(last, 39 * 33_000);
    assert!(max_audio <= 2 * 8, "audio queue grew to {}", max_audio);
    assert!(!clip.demuxer().is_end_of_track(TrackKind::Audio));
}

#[tokio::test(start_paused = true)]
async fn test_clip_follows_clock() {
    let config = PlaybackConfig::default();
    let clip = Clip::open(
        Cursor::new(build_mp4(Layout::default())),
        SoftwareDecoder::boxed(),
        &config,
    )
    .await
    .unwrap();

    let clock = PlaybackClock::new(&config);
    let time = clock.subscribe();
    assert_eq!(clip.render_at(&time).unwrap().timestamp_us, 0);

    clock.play();
    tokio::time::advance(Duration::from_millis(40)).await;
    assert_eq!(clip.render_at(&time).unwrap().timestamp_us, 33_000);

    clock.pause();
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(clip.render_at(&time).unwrap().timestamp_us, 33_000);
}

#[tokio::test]
async fn test_unsupported_codec_faults_clip() {
    struct Rejecting;

    #[async_trait]
    impl VideoDecoder for Rejecting {
        async fn configure(
            &mut self,
            track: &TrackDescriptor,
            _output: FrameCallback,
        ) -> Result<()> {
            Err(ClipError::UnsupportedCodec(track.codec.clone()))
        }
        fn decode(&mut self, _sample: EncodedSample) -> Result<()> {
            Ok(())
        }
        fn decode_queue_size(&self) -> usize {
            0
        }
        fn close(&mut self) {}
    }

    let config = PlaybackConfig::default();
    let clip = Clip::new(
        Cursor::new(build_mp4(Layout::default())),
        Box::new(Rejecting),
        &config,
    );
    let err = clip.initialize().await.unwrap_err();
    assert!(matches!(err, ClipError::UnsupportedCodec(_)));
    assert_eq!(
        clip.status(),
        ClipStatus::Faulted("unsupported codec: avc1.42001f".into())
    );
}

#[tokio::test]
async fn test_audio_reaches_sink_then_underruns() {
    let config = PlaybackConfig::default();
    let layout = Layout {
        video_samples: 3,
        audio_samples: 3,
        moov_last: false,
    };
    let demuxer = Arc::new(PullDemuxer::open(Cursor::new(build_mp4(layout)), &config));
    demuxer.initialize().await.unwrap();

    let (producer, consumer) = RingBuffer::split(64);
    let mut sink = AudioSink::new(consumer, 2, AUDIO_FRAMES_PER_SAMPLE);
    let mut feeder = AudioFeeder::new(demuxer, Box::new(PcmDecoder::new()), producer, &config)
        .with_sink_stats(sink.stats());
    assert_eq!(feeder.configure().await.unwrap(), 2);

    let status = feeder.fill().await.unwrap();
    assert_eq!(status.frames_pushed, 3 * AUDIO_FRAMES_PER_SAMPLE);
    assert!(status.drained);

    for index in 0..3 {
        let mut left = [0.0; AUDIO_FRAMES_PER_SAMPLE];
        let mut right = [0.0; AUDIO_FRAMES_PER_SAMPLE];
        assert!(sink.process(&mut [&mut left[..], &mut right[..]]));
        for frame in 0..AUDIO_FRAMES_PER_SAMPLE {
            let (l, r) = audio_values(index, frame);
            assert_eq!(left[frame], pcm(l));
            assert_eq!(right[frame], pcm(r));
        }
    }
    assert_eq!(sink.stats().underruns(), 0);

    let mut left = [1.0; AUDIO_FRAMES_PER_SAMPLE];
    let mut right = [1.0; AUDIO_FRAMES_PER_SAMPLE];
    sink.process(&mut [&mut left[..], &mut right[..]]);
    assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));
    assert_eq!(sink.stats().underruns(), 1);
}

#[tokio::test]
async fn test_audio_and_video_share_one_demuxer() {
    let config = PlaybackConfig::default();
    let demuxer = Arc::new(PullDemuxer::open(
        Cursor::new(build_mp4(Layout::default())),
        &config,
    ));
    let clip = Clip::with_demuxer(demuxer.clone(), SoftwareDecoder::boxed(), &config);
    clip.initialize().await.unwrap();

    let (producer, consumer) = RingBuffer::split(1024);
    let mut sink = AudioSink::new(consumer, 2, 128);
    let mut feeder = AudioFeeder::new(demuxer, Box::new(PcmDecoder::new()), producer, &config);
    let status = feeder.fill().await.unwrap();
    assert_eq!(status.frames_pushed, 10 * AUDIO_FRAMES_PER_SAMPLE);

    let mut left = vec![0.0; 128];
    let mut right = vec![0.0; 128];
    sink.process(&mut [&mut left[..], &mut right[..]]);
    assert_eq!(left[5], pcm(audio_values(1, 1).0));

    assert_eq!(clip.render(0).unwrap().timestamp_us, 0);
}
