//! In-memory MP4 files for integration tests.
#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// 1280x720 constrained baseline SPS and a matching PPS.
pub const SPS: [u8; 9] = [0x67, 0x42, 0x00, 0x1f, 0xda, 0x01, 0x40, 0x16, 0xe4];
pub const PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];

pub const VIDEO_TRACK_ID: u32 = 1;
pub const AUDIO_TRACK_ID: u32 = 2;
/// Video timescale 1000, 33 ms per frame.
pub const FRAME_DELTA: u32 = 33;
/// Stereo 16-bit frames per audio sample.
pub const AUDIO_FRAMES_PER_SAMPLE: usize = 4;
pub const AUDIO_RATE: u32 = 48_000;

pub fn boxed(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0, 0, 0, 0];
    body.extend_from_slice(payload);
    boxed(kind, &body)
}

fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn ftyp() -> Vec<u8> {
    boxed(b"ftyp", b"isom\0\0\x02\0isomavc1")
}

fn mvhd() -> Vec<u8> {
    full_box(b"mvhd", &[0u8; 96])
}

fn tkhd(track_id: u32, width: u32, height: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&u32s(&[0, 0, track_id, 0, 0]));
    body.extend_from_slice(&[0u8; 8 + 8 + 36]);
    body.extend_from_slice(&u32s(&[width << 16, height << 16]));
    full_box(b"tkhd", &body)
}

fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = u32s(&[0, 0, timescale, duration]);
    body.extend_from_slice(&[0x55, 0xc4, 0, 0]);
    full_box(b"mdhd", &body)
}

fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut body = vec![0u8; 4];
    body.extend_from_slice(handler);
    body.extend_from_slice(&[0u8; 12]);
    body.extend_from_slice(b"clip\0");
    full_box(b"hdlr", &body)
}

fn avcc() -> Vec<u8> {
    let mut body = vec![1, SPS[1], SPS[2], SPS[3], 0xff, 0xe1];
    body.extend_from_slice(&(SPS.len() as u16).to_be_bytes());
    body.extend_from_slice(&SPS);
    body.push(1);
    body.extend_from_slice(&(PPS.len() as u16).to_be_bytes());
    body.extend_from_slice(&PPS);
    boxed(b"avcC", &body)
}

fn avc1_entry(width: u16, height: u16) -> Vec<u8> {
    let mut body = vec![0u8; 6];
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&[0u8; 16]);
    body.extend_from_slice(&width.to_be_bytes());
    body.extend_from_slice(&height.to_be_bytes());
    body.extend_from_slice(&u32s(&[0x0048_0000, 0x0048_0000, 0]));
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&[0u8; 32]);
    body.extend_from_slice(&0x18u16.to_be_bytes());
    body.extend_from_slice(&0xffffu16.to_be_bytes());
    body.extend_from_slice(&avcc());
    boxed(b"avc1", &body)
}

fn sowt_entry(channels: u16, rate: u32) -> Vec<u8> {
    let mut body = vec![0u8; 6];
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&[0u8; 8]);
    body.extend_from_slice(&channels.to_be_bytes());
    body.extend_from_slice(&16u16.to_be_bytes());
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(&(rate << 16).to_be_bytes());
    boxed(b"sowt", &body)
}

struct TrackLayout {
    id: u32,
    handler: [u8; 4],
    timescale: u32,
    delta: u32,
    entry: Vec<u8>,
    tkhd_size: (u32, u32),
    sizes: Vec<u32>,
    sync: Option<Vec<u32>>,
}

fn trak(track: &TrackLayout, offsets: &[u32]) -> Vec<u8> {
    let count = track.sizes.len() as u32;
    let mut stsd = u32s(&[1]);
    stsd.extend_from_slice(&track.entry);

    let mut stbl = vec![
        full_box(b"stsd", &stsd),
        full_box(b"stts", &u32s(&[1, count, track.delta])),
    ];
    if let Some(sync) = &track.sync {
        let mut body = u32s(&[sync.len() as u32]);
        body.extend_from_slice(&u32s(sync));
        stbl.push(full_box(b"stss", &body));
    }
    stbl.push(full_box(b"stsc", &u32s(&[1, 1, 1, 1])));
    let mut stsz = u32s(&[0, count]);
    stsz.extend_from_slice(&u32s(&track.sizes));
    stbl.push(full_box(b"stsz", &stsz));
    let mut stco = u32s(&[offsets.len() as u32]);
    stco.extend_from_slice(&u32s(offsets));
    stbl.push(full_box(b"stco", &stco));

    let minf = boxed(b"minf", &boxed(b"stbl", &concat(&stbl)));
    let mdia = boxed(
        b"mdia",
        &concat(&[
            mdhd(track.timescale, count * track.delta),
            hdlr(&track.handler),
            minf,
        ]),
    );
    boxed(
        b"trak",
        &concat(&[tkhd(track.id, track.tkhd_size.0, track.tkhd_size.1), mdia]),
    )
}

/// Payload of video sample `index`: a length-prefixed slice NAL tagged
/// with the index.
pub fn video_payload(index: usize) -> Vec<u8> {
    let nal_type = if index == 0 { 0x65 } else { 0x41 };
    let nal = [nal_type, 0x88, index as u8, 0x42];
    let mut out = (nal.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&nal);
    out
}

/// Left and right values of frame `frame` in audio sample `index`.
pub fn audio_values(index: usize, frame: usize) -> (i16, i16) {
    let v = (index * 100 + frame) as i16 * 8;
    (v, -v)
}

pub fn audio_payload(index: usize) -> Vec<u8> {
    (0..AUDIO_FRAMES_PER_SAMPLE)
        .flat_map(|frame| {
            let (l, r) = audio_values(index, frame);
            let mut bytes = l.to_le_bytes().to_vec();
            bytes.extend_from_slice(&r.to_le_bytes());
            bytes
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub video_samples: usize,
    pub audio_samples: usize,
    /// Put `moov` after `mdat`, as files written without fast start do.
    pub moov_last: bool,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            video_samples: 10,
            audio_samples: 10,
            moov_last: false,
        }
    }
}

/// Builds a file with an H.264 video track and a stereo `sowt` audio track,
/// samples interleaved one video, one audio in `mdat`.
pub fn build_mp4(layout: Layout) -> Vec<u8> {
    let video: Vec<Vec<u8>> = (0..layout.video_samples).map(video_payload).collect();
    let audio: Vec<Vec<u8>> = (0..layout.audio_samples).map(audio_payload).collect();

    let tracks = [
        TrackLayout {
            id: VIDEO_TRACK_ID,
            handler: *b"vide",
            timescale: 1000,
            delta: FRAME_DELTA,
            entry: avc1_entry(1280, 720),
            tkhd_size: (1280, 720),
            sizes: video.iter().map(|s| s.len() as u32).collect(),
            sync: Some(vec![1]),
        },
        TrackLayout {
            id: AUDIO_TRACK_ID,
            handler: *b"soun",
            timescale: AUDIO_RATE,
            delta: AUDIO_FRAMES_PER_SAMPLE as u32,
            entry: sowt_entry(2, AUDIO_RATE),
            tkhd_size: (0, 0),
            sizes: audio.iter().map(|s| s.len() as u32).collect(),
            sync: None,
        },
    ];

    // mdat payload and per-sample positions relative to its start
    let mut mdat = Vec::new();
    let mut video_pos = Vec::new();
    let mut audio_pos = Vec::new();
    for i in 0..video.len().max(audio.len()) {
        if let Some(sample) = video.get(i) {
            video_pos.push(mdat.len() as u32);
            mdat.extend_from_slice(sample);
        }
        if let Some(sample) = audio.get(i) {
            audio_pos.push(mdat.len() as u32);
            mdat.extend_from_slice(sample);
        }
    }

    let moov_for = |base: u32| {
        let shift = |pos: &Vec<u32>| pos.iter().map(|p| p + base).collect::<Vec<_>>();
        boxed(
            b"moov",
            &concat(&[
                mvhd(),
                trak(&tracks[0], &shift(&video_pos)),
                trak(&tracks[1], &shift(&audio_pos)),
            ]),
        )
    };

    let ftyp = ftyp();
    let mdat_box = boxed(b"mdat", &mdat);
    if layout.moov_last {
        let base = (ftyp.len() + 8) as u32;
        concat(&[ftyp, mdat_box, moov_for(base)])
    } else {
        let moov_len = moov_for(0).len();
        let base = (ftyp.len() + moov_len + 8) as u32;
        concat(&[ftyp, moov_for(base), mdat_box])
    }
}

/// Reader that hands out at most `chunk` bytes per read and yields between
/// reads, like a slow network fetch.
pub struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    yield_next: bool,
    consumed: Arc<AtomicUsize>,
}

impl ChunkedReader {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk: chunk.max(1),
            yield_next: false,
            consumed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bytes handed out so far, readable after the reader is moved.
    pub fn consumed(&self) -> Arc<AtomicUsize> {
        self.consumed.clone()
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.yield_next {
            self.yield_next = false;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        let end = (self.pos + self.chunk)
            .min(self.data.len())
            .min(self.pos + buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..end]);
        self.pos = end;
        self.consumed.fetch_add(end - start, Ordering::SeqCst);
        self.yield_next = true;
        Poll::Ready(Ok(()))
    }
}
