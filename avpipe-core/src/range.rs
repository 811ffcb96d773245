//! Time ranges over [`MediaTime`].
//!
//! Used to express the span an audio chunk occupies: `[start, end)` at
//! the chunk's sample rate.

use crate::time::MediaTime;

/// A half-open interval of media time.
///
/// The structure does not require `start <= end`; a range whose duration
/// is zero or negative reports itself as empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    pub start: MediaTime,
    pub end: MediaTime,
}

impl TimeRange {
    /// The empty range [0, 0).
    pub const ZERO: TimeRange = TimeRange {
        start: MediaTime::ZERO,
        end: MediaTime::ZERO,
    };

    /// Create a range from start and end times.
    pub fn new(start: MediaTime, end: MediaTime) -> Self {
        Self { start, end }
    }

    /// The exact duration, `end - start`. May be negative.
    pub fn duration(&self) -> MediaTime {
        self.end - self.start
    }

    /// True when the duration is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.duration() <= MediaTime::ZERO
    }

    /// The overlap of two ranges, or [`TimeRange::ZERO`] when they do
    /// not overlap.
    pub fn intersection(&self, other: TimeRange) -> TimeRange {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end {
            TimeRange { start, end }
        } else {
            TimeRange::ZERO
        }
    }

    /// True when `time` lies within the range, inclusive of both ends.
    pub fn contains_time(&self, time: MediaTime) -> bool {
        time >= self.start && time <= self.end
    }

    /// Project an arbitrary time into `[start, end]`.
    pub fn clamp(&self, time: MediaTime) -> MediaTime {
        time.min(self.end).max(self.start)
    }
}
