use bytes::Bytes;

use super::TrackKind;

/// One encoded access unit as stored in the container.
///
/// Timestamps are in microseconds. A sample is produced once by the track
/// source and consumed once by a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    /// Track kind the sample belongs to.
    pub kind: TrackKind,
    /// Container track id.
    pub track_id: u32,
    /// Presentation time in microseconds.
    pub pts_us: i64,
    /// Decode time in microseconds.
    pub dts_us: i64,
    /// Duration in microseconds.
    pub duration_us: i64,
    /// Whether decoding can start at this sample.
    pub is_key: bool,
    /// Encoded payload.
    pub data: Bytes,
}

impl EncodedSample {
    /// A sample at time zero with no track id.
    pub fn new(kind: TrackKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            track_id: 0,
            pts_us: 0,
            dts_us: 0,
            duration_us: 0,
            is_key: false,
            data: data.into(),
        }
    }

    /// Sets the presentation time.
    pub fn with_pts(mut self, pts_us: i64) -> Self {
        self.pts_us = pts_us;
        self
    }

    /// Sets the decode time.
    pub fn with_dts(mut self, dts_us: i64) -> Self {
        self.dts_us = dts_us;
        self
    }

    /// Sets the container track id.
    pub fn with_track_id(mut self, track_id: u32) -> Self {
        self.track_id = track_id;
        self
    }

    /// Marks the sample as a sync point.
    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration_us: i64) -> Self {
        self.duration_us = duration_us;
        self
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
