use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};

use super::boxes::{box_type, fourcc_str, parse_moov, BoxHeader, ParsedTrack};
use super::sample_table::SampleEntry;
use crate::av::{EncodedSample, TrackDescriptor};
use crate::error::{ClipError, Result};

/// Incremental index over a streamed MP4 file.
///
/// Bytes are appended as they arrive. Top-level boxes are walked as soon as
/// their headers are readable; `moov` is parsed once it is complete and
/// everything else (including `mdat`) is skipped without waiting for its
/// payload. Samples become readable once their bytes have arrived, so
/// delivery can start before the download finishes. Once metadata is
/// parsed, bytes below the lowest offset still needed can be released with
/// [`discard_before`](BoxIndex::discard_before).
#[derive(Debug, Default)]
pub struct BoxIndex {
    data: BytesMut,
    /// File offset of `data[0]`.
    base: u64,
    scan_pos: u64,
    /// Set when a top-level box runs to end of file; scanning stops there.
    open_ended: Option<(BoxHeader, u64)>,
    tracks: Option<Vec<ParsedTrack>>,
    finished: bool,
}

impl BoxIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next bytes of the file.
    ///
    /// Returns `true` when this call completed the metadata.
    pub fn append(&mut self, bytes: &[u8]) -> Result<bool> {
        if self.finished {
            return Err(ClipError::InvalidData("append after end of stream".into()));
        }
        self.data.extend_from_slice(bytes);
        let was_ready = self.is_ready();
        self.scan()?;
        Ok(!was_ready && self.is_ready())
    }

    /// Marks end of stream. Fails if metadata never arrived.
    ///
    /// Returns `true` when this call completed the metadata.
    pub fn finish(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        self.finished = true;
        let was_ready = self.is_ready();

        if !was_ready {
            if let Some((header, pos)) = self.open_ended {
                if header.box_type == box_type::MOOV {
                    let start = (pos + header.header_size - self.base) as usize;
                    let tracks = parse_moov(&self.data[start..])?;
                    self.set_tracks(tracks);
                }
            }
        }

        if !self.is_ready() {
            let received = self.received();
            return Err(ClipError::ContainerParse(match self.scan_pos {
                pos if pos > received => format!(
                    "stream ended after {} bytes inside a top-level box, before moov",
                    received
                ),
                _ => format!("stream ended after {} bytes without a moov box", received),
            }));
        }
        Ok(!was_ready)
    }

    fn scan(&mut self) -> Result<()> {
        while self.open_ended.is_none() && self.scan_pos < self.received() {
            let pos = self.scan_pos;
            let available = &self.data[(pos - self.base) as usize..];
            let Some(header) = BoxHeader::parse(available)? else {
                break;
            };

            if pos == 0 && !header.box_type.iter().all(|b| (0x20..=0x7E).contains(b)) {
                return Err(ClipError::ContainerParse(
                    "input does not start with an MP4 box".into(),
                ));
            }

            let Some(size) = header.size else {
                trace!("'{}' at {} runs to end of file", fourcc_str(&header.box_type), pos);
                self.open_ended = Some((header, pos));
                break;
            };

            if header.box_type == box_type::MOOV && !self.is_ready() {
                if (available.len() as u64) < size {
                    break;
                }
                let payload = &available[header.header_size as usize..size as usize];
                let tracks = parse_moov(payload)?;
                self.set_tracks(tracks);
            } else {
                trace!("skipping '{}' ({} bytes) at {}", fourcc_str(&header.box_type), size, pos);
            }
            self.scan_pos = pos + size;
        }
        Ok(())
    }

    fn set_tracks(&mut self, tracks: Vec<ParsedTrack>) {
        debug!("moov parsed: {} tracks", tracks.len());
        self.tracks = Some(tracks);
    }

    /// Whether `moov` has been parsed.
    pub fn is_ready(&self) -> bool {
        self.tracks.is_some()
    }

    /// Whether end of stream was signalled.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    /// File offset of the first byte still held.
    pub fn retained_from(&self) -> u64 {
        self.base
    }

    /// Bytes currently held.
    pub fn buffered(&self) -> usize {
        self.data.len()
    }

    /// Releases every byte below `offset`. Ignored before metadata is
    /// parsed, and never releases bytes the top-level scan still needs.
    pub fn discard_before(&mut self, offset: u64) {
        if !self.is_ready() {
            return;
        }
        // A stream that ends in an open-ended box needs no further scanning.
        let scan_floor = match self.open_ended {
            Some(_) => u64::MAX,
            None => self.scan_pos,
        };
        let limit = offset.min(scan_floor).min(self.received());
        if limit <= self.base {
            return;
        }
        self.data.advance((limit - self.base) as usize);
        trace!("released bytes below {}", limit);
        self.base = limit;
    }

    /// Track descriptors, once metadata is parsed.
    pub fn tracks(&self) -> Option<Vec<TrackDescriptor>> {
        self.tracks
            .as_ref()
            .map(|t| t.iter().map(|t| t.descriptor.clone()).collect())
    }

    fn track(&self, track_id: u32) -> Option<&ParsedTrack> {
        self.tracks
            .as_ref()?
            .iter()
            .find(|t| t.descriptor.id == track_id)
    }

    /// Whether `moov` lists a track with this id.
    pub fn has_track(&self, track_id: u32) -> bool {
        self.track(track_id).is_some()
    }

    /// Samples in the track's sample table.
    pub fn sample_count(&self, track_id: u32) -> usize {
        self.track(track_id).map_or(0, |t| t.samples.len())
    }

    /// File offset of sample `n` of a track.
    pub fn sample_offset(&self, track_id: u32, n: usize) -> Option<u64> {
        self.track(track_id)?.samples.get(n).map(|s| s.offset)
    }

    /// Up to `max` consecutive samples of a track starting at `from`, stopping
    /// at the first one whose bytes have not fully arrived or were released.
    pub fn ready_samples(&self, track_id: u32, from: usize, max: usize) -> Vec<EncodedSample> {
        let Some(track) = self.track(track_id) else {
            return Vec::new();
        };
        let received = self.received();
        let timescale = track.descriptor.timescale;

        track
            .samples
            .iter()
            .skip(from)
            .take(max)
            .take_while(|s| s.offset >= self.base && s.end() <= received)
            .map(|s| self.encoded(track, s, timescale))
            .collect()
    }

    fn encoded(&self, track: &ParsedTrack, s: &SampleEntry, timescale: u32) -> EncodedSample {
        let start = (s.offset - self.base) as usize;
        let end = (s.end() - self.base) as usize;
        let payload = Bytes::copy_from_slice(&self.data[start..end]);
        EncodedSample::new(track.descriptor.kind, payload)
            .with_track_id(track.descriptor.id)
            .with_pts(to_micros(s.cts(), timescale))
            .with_dts(to_micros(s.dts as i64, timescale))
            .with_duration(to_micros(s.duration as i64, timescale))
            .with_key_flag(s.is_sync)
    }
}

/// Converts media timescale units to microseconds.
pub fn to_micros(value: i64, timescale: u32) -> i64 {
    (value as i128 * 1_000_000 / timescale as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_micros() {
        assert_eq!(to_micros(3003, 90_000), 33_366);
        assert_eq!(to_micros(1024, 48_000), 21_333);
        assert_eq!(to_micros(-1000, 1000), -1_000_000);
    }

    #[test]
    fn test_no_moov_is_parse_error() {
        let mut index = BoxIndex::new();
        let mut ftyp = vec![0, 0, 0, 16];
        ftyp.extend_from_slice(b"ftypisom\0\0\x02\0");
        assert!(!index.append(&ftyp).unwrap());
        assert!(matches!(index.finish(), Err(ClipError::ContainerParse(_))));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let mut index = BoxIndex::new();
        let err = index.append(&[0x00, 0x00, 0x00, 0x10, 0xFF, 0x00, 0x13, 0x37]).unwrap_err();
        assert!(matches!(err, ClipError::ContainerParse(_)));
    }

    #[test]
    fn test_skips_unparsed_mdat() {
        let mut index = BoxIndex::new();
        let mut mdat = vec![0, 0, 0x10, 0x08];
        mdat.extend_from_slice(b"mdat");
        mdat.extend_from_slice(&[0u8; 16]);
        index.append(&mdat).unwrap();
        assert_eq!(index.scan_pos, 0x1008);
        assert!(!index.is_ready());
    }
}
