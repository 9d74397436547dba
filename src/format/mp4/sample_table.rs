//! Sample table resolution.
//!
//! The `stbl` boxes describe samples column by column:
//! - stts: decode durations
//! - ctts: composition offsets
//! - stss: sync samples (all samples are sync when absent)
//! - stsc: sample-to-chunk runs
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//!
//! [`SampleTableBuilder`] turns them into one row per sample.

use std::collections::HashSet;

use crate::error::{ClipError, Result};

/// One resolved sample, in media timescale units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// File offset of the first byte.
    pub offset: u64,
    /// Size in bytes.
    pub size: u32,
    /// Decode time in media timescale units.
    pub dts: u64,
    /// Composition offset from `ctts`.
    pub cts_offset: i32,
    /// Duration in media timescale units.
    pub duration: u32,
    /// Whether `stss` lists the sample, or every sample when it is absent.
    pub is_sync: bool,
}

impl SampleEntry {
    /// Composition (presentation) time.
    pub fn cts(&self) -> i64 {
        self.dts as i64 + self.cts_offset as i64
    }

    /// File offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

/// Collects the `stbl` child tables and expands them per sample.
#[derive(Debug, Default)]
pub struct SampleTableBuilder {
    stts: Vec<(u32, u32)>,
    ctts: Vec<(u32, i32)>,
    sync_samples: Option<Vec<u32>>,
    stsc: Vec<(u32, u32, u32)>,
    uniform_size: u32,
    sample_count: u32,
    sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
}

impl SampleTableBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// (sample_count, sample_delta) runs.
    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts = entries;
    }

    /// (sample_count, offset) runs.
    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts = entries;
    }

    /// 1-based sync sample numbers.
    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    /// (first_chunk, samples_per_chunk, sample_description_index) runs.
    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc = entries;
    }

    /// A non-zero `uniform_size` applies to all `sample_count` samples.
    pub fn set_stsz(&mut self, uniform_size: u32, sample_count: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sample_count = sample_count;
        self.sizes = sizes;
    }

    /// Sets chunk offsets from `stco` or `co64`.
    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    /// Resolves every sample. Fails when the tables disagree.
    pub fn build(self) -> Result<Vec<SampleEntry>> {
        let count = if self.uniform_size > 0 {
            self.sample_count as usize
        } else {
            self.sizes.len()
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        let size_of = |i: usize| {
            if self.uniform_size > 0 {
                self.uniform_size
            } else {
                self.sizes[i]
            }
        };

        let offsets = self.resolve_offsets(count, &size_of)?;
        let (dts, durations) = self.resolve_timing(count)?;
        let cts = self.resolve_cts(count);
        let sync: Option<HashSet<u32>> = self
            .sync_samples
            .as_ref()
            .map(|s| s.iter().copied().collect());

        Ok((0..count)
            .map(|i| SampleEntry {
                offset: offsets[i],
                size: size_of(i),
                dts: dts[i],
                cts_offset: cts[i],
                duration: durations[i],
                is_sync: sync
                    .as_ref()
                    .map_or(true, |set| set.contains(&(i as u32 + 1))),
            })
            .collect())
    }

    fn resolve_offsets(&self, count: usize, size_of: &dyn Fn(usize) -> u32) -> Result<Vec<u64>> {
        let mut offsets = Vec::with_capacity(count);
        let chunk_count = self.chunk_offsets.len() as u32;

        for (i, &(first_chunk, per_chunk, _)) in self.stsc.iter().enumerate() {
            if first_chunk == 0 {
                return Err(ClipError::ContainerParse("stsc chunk numbers start at 1".into()));
            }
            let last_chunk = self
                .stsc
                .get(i + 1)
                .map_or(chunk_count, |next| next.0.saturating_sub(1));

            for chunk in first_chunk..=last_chunk.min(chunk_count) {
                let mut offset = self.chunk_offsets[(chunk - 1) as usize];
                for _ in 0..per_chunk {
                    if offsets.len() == count {
                        return Ok(offsets);
                    }
                    offsets.push(offset);
                    offset += size_of(offsets.len() - 1) as u64;
                }
            }
        }

        if offsets.len() < count {
            return Err(ClipError::ContainerParse(format!(
                "chunk tables place {} of {} samples",
                offsets.len(),
                count
            )));
        }
        Ok(offsets)
    }

    fn resolve_timing(&self, count: usize) -> Result<(Vec<u64>, Vec<u32>)> {
        let mut dts = Vec::with_capacity(count);
        let mut durations = Vec::with_capacity(count);
        let mut time = 0u64;

        'runs: for &(run, delta) in &self.stts {
            for _ in 0..run {
                if dts.len() == count {
                    break 'runs;
                }
                dts.push(time);
                durations.push(delta);
                time += delta as u64;
            }
        }

        if dts.len() < count {
            return Err(ClipError::ContainerParse(format!(
                "stts covers {} of {} samples",
                dts.len(),
                count
            )));
        }
        Ok((dts, durations))
    }

    fn resolve_cts(&self, count: usize) -> Vec<i32> {
        let mut cts = Vec::with_capacity(count);
        'runs: for &(run, offset) in &self.ctts {
            for _ in 0..run {
                if cts.len() == count {
                    break 'runs;
                }
                cts.push(offset);
            }
        }
        cts.resize(count, 0);
        cts
    }
}
