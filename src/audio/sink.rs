//! Real-time render processor.
//!
//! [`AudioSink::process`] runs inside the platform audio callback. It drains
//! one render quantum of interleaved samples from the ring, deinterleaves
//! them into the per-channel output buffers and pads any shortfall with
//! silence. It never locks, never allocates and never logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::ring::RingConsumer;

/// Counters shared between the render context and observers.
#[derive(Debug, Default)]
pub struct SinkStats {
    frames_rendered: AtomicU64,
    underruns: AtomicU64,
    silent_frames: AtomicU64,
}

impl SinkStats {
    /// Frames written to the output, silence included.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Number of quanta that could not be filled completely.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Output frames zero-filled because the ring ran dry.
    pub fn silent_frames(&self) -> u64 {
        self.silent_frames.load(Ordering::Relaxed)
    }
}

/// Real-time audio processor draining the consumer end of the ring.
///
/// Never allocates, locks or logs inside `process`.
pub struct AudioSink {
    consumer: RingConsumer<f32>,
    channels: usize,
    quantum: usize,
    scratch: Box<[f32]>,
    stats: Arc<SinkStats>,
}

impl AudioSink {
    /// `channels` is the interleaving of the ring contents, `quantum` the
    /// number of frames per render call.
    pub fn new(consumer: RingConsumer<f32>, channels: u16, quantum: usize) -> Self {
        let channels = usize::from(channels.max(1));
        let quantum = quantum.max(1);
        Self {
            consumer,
            channels,
            quantum,
            scratch: vec![0.0; channels * quantum].into_boxed_slice(),
            stats: Arc::new(SinkStats::default()),
        }
    }

    /// Counters shared with the non-real-time side.
    pub fn stats(&self) -> Arc<SinkStats> {
        self.stats.clone()
    }

    /// Interleaved channels expected in the ring.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames per render callback.
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Fills every output channel buffer. All buffers are expected to have
    /// the same length; the shortest one decides how many frames are
    /// rendered. Returns `true` so the host keeps the processor alive.
    pub fn process(&mut self, outputs: &mut [&mut [f32]]) -> bool {
        let Some(frames) = outputs.iter().map(|out| out.len()).min() else {
            return true;
        };

        let mut done = 0;
        let mut short = false;
        while done < frames {
            let block = (frames - done).min(self.quantum);
            let wanted = self.whole_frames_ready(block);
            let read = self.consumer.pop(&mut self.scratch[..wanted]);
            let whole = read / self.channels;
            if whole < block {
                short = true;
            }

            for (index, out) in outputs.iter_mut().enumerate() {
                let source = self.source_channel(index);
                let dest = &mut out[done..done + block];
                match source {
                    Some(channel) => {
                        for (frame, sample) in dest[..whole].iter_mut().enumerate() {
                            *sample = self.scratch[frame * self.channels + channel];
                        }
                        dest[whole..].fill(0.0);
                    }
                    None => dest.fill(0.0),
                }
            }

            self.stats
                .frames_rendered
                .fetch_add(block as u64, Ordering::Relaxed);
            self.stats
                .silent_frames
                .fetch_add((block - whole) as u64, Ordering::Relaxed);
            done += block;
        }

        if short {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Same as [`process`](Self::process) for an output stage that takes
    /// interleaved samples with `out_channels` channels.
    pub fn process_interleaved(&mut self, output: &mut [f32], out_channels: usize) -> bool {
        let out_channels = out_channels.max(1);
        let frames = output.len() / out_channels;

        let mut done = 0;
        let mut short = false;
        while done < frames {
            let block = (frames - done).min(self.quantum);
            let wanted = self.whole_frames_ready(block);
            let read = self.consumer.pop(&mut self.scratch[..wanted]);
            let whole = read / self.channels;
            if whole < block {
                short = true;
            }

            for frame in 0..block {
                let base = (done + frame) * out_channels;
                for index in 0..out_channels {
                    output[base + index] = match self.source_channel(index) {
                        Some(channel) if frame < whole => {
                            self.scratch[frame * self.channels + channel]
                        }
                        _ => 0.0,
                    };
                }
            }

            self.stats
                .frames_rendered
                .fetch_add(block as u64, Ordering::Relaxed);
            self.stats
                .silent_frames
                .fetch_add((block - whole) as u64, Ordering::Relaxed);
            done += block;
        }
        output[frames * out_channels..].fill(0.0);

        if short {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    // Never take a partial frame off the ring; it would shift the channels
    // of everything after it.
    fn whole_frames_ready(&self, frames: usize) -> usize {
        let ready = self.consumer.ring().available_read() / self.channels;
        ready.min(frames) * self.channels
    }

    // Mono sources feed every output; otherwise outputs past the source
    // channel count are silent.
    fn source_channel(&self, output: usize) -> Option<usize> {
        if self.channels == 1 {
            Some(0)
        } else if output < self.channels {
            Some(output)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ring::RingBuffer;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deinterleaves_stereo() {
        let (mut producer, consumer) = RingBuffer::split(64);
        producer.push(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3, 0.4, -0.4]);
        let mut sink = AudioSink::new(consumer, 2, 4);

        let mut left = [9.0; 4];
        let mut right = [9.0; 4];
        assert!(sink.process(&mut [&mut left[..], &mut right[..]]));

        assert_eq!(left, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(right, [-0.1, -0.2, -0.3, -0.4]);
        assert_eq!(sink.stats().underruns(), 0);
        assert_eq!(sink.stats().frames_rendered(), 4);
    }

    #[test]
    fn test_short_read_is_silence() {
        let (mut producer, consumer) = RingBuffer::split(64);
        producer.push(&[0.5, 0.5, 0.25, 0.25]);
        let mut sink = AudioSink::new(consumer, 2, 4);

        let mut left = [9.0; 4];
        let mut right = [9.0; 4];
        sink.process(&mut [&mut left[..], &mut right[..]]);

        assert_eq!(left, [0.5, 0.25, 0.0, 0.0]);
        assert_eq!(right, [0.5, 0.25, 0.0, 0.0]);
        let stats = sink.stats();
        assert_eq!(stats.underruns(), 1);
        assert_eq!(stats.silent_frames(), 2);
    }

    #[test]
    fn test_empty_ring_renders_silence() {
        let (_producer, consumer) = RingBuffer::split(64);
        let mut sink = AudioSink::new(consumer, 2, 128);

        let mut left = [1.0; 128];
        let mut right = [1.0; 128];
        assert!(sink.process(&mut [&mut left[..], &mut right[..]]));
        assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));
        assert_eq!(sink.stats().underruns(), 1);
    }

    #[test]
    fn test_mono_upmix() {
        let (mut producer, consumer) = RingBuffer::split(16);
        producer.push(&[0.1, 0.2]);
        let mut sink = AudioSink::new(consumer, 1, 2);

        let mut left = [0.0; 2];
        let mut right = [0.0; 2];
        sink.process(&mut [&mut left[..], &mut right[..]]);
        assert_eq!(left, [0.1, 0.2]);
        assert_eq!(right, [0.1, 0.2]);
    }

    #[test]
    fn test_extra_outputs_are_silent() {
        let (mut producer, consumer) = RingBuffer::split(16);
        producer.push(&[0.1, 0.2, 0.3, 0.4]);
        let mut sink = AudioSink::new(consumer, 2, 2);

        let mut a = [9.0; 2];
        let mut b = [9.0; 2];
        let mut c = [9.0; 2];
        sink.process(&mut [&mut a[..], &mut b[..], &mut c[..]]);
        assert_eq!(a, [0.1, 0.3]);
        assert_eq!(b, [0.2, 0.4]);
        assert_eq!(c, [0.0, 0.0]);
    }

    #[test]
    fn test_output_longer_than_quantum() {
        let (mut producer, consumer) = RingBuffer::split(64);
        let data: Vec<f32> = (0..6).map(|v| v as f32).collect();
        producer.push(&data);
        let mut sink = AudioSink::new(consumer, 1, 2);

        let mut out = [9.0; 6];
        sink.process(&mut [&mut out[..]]);
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(sink.stats().underruns(), 0);
    }

    #[test]
    fn test_partial_frame_is_not_split() {
        let (mut producer, consumer) = RingBuffer::split(16);
        producer.push(&[0.1, 0.2, 0.3]);
        let mut sink = AudioSink::new(consumer, 2, 2);

        let mut left = [9.0; 2];
        let mut right = [9.0; 2];
        sink.process(&mut [&mut left[..], &mut right[..]]);
        assert_eq!(left, [0.1, 0.0]);
        assert_eq!(right, [0.2, 0.0]);
        assert_eq!(sink.consumer.ring().available_read(), 1);
    }

    #[test]
    fn test_process_interleaved() {
        let (mut producer, consumer) = RingBuffer::split(16);
        producer.push(&[0.1, 0.2, 0.3]);
        let mut sink = AudioSink::new(consumer, 1, 4);

        let mut out = [9.0; 8];
        sink.process_interleaved(&mut out, 2);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0, 0.0]);
        assert_eq!(sink.stats().underruns(), 1);
    }
}
