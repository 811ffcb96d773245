//! Compressed media packets.
//!
//! A packet is one compressed unit read from a demuxer or produced by an
//! encoder, with timestamps expressed in integer ticks of an attached
//! time base.

use std::borrow::Cow;
use std::fmt;

use bitflags::bitflags;

use crate::time::MediaTime;

bitflags! {
    /// Packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet data is corrupted.
        const CORRUPT = 0x0002;
    }
}

/// An encoded media packet.
///
/// Packets can own their data or reference external data.
#[derive(Clone)]
pub struct Packet<'a> {
    data: Cow<'a, [u8]>,
    /// Presentation timestamp in ticks of `time_base`.
    pub pts: i64,
    /// Decode timestamp in ticks of `time_base`.
    pub dts: i64,
    /// Duration in ticks of `time_base`.
    pub duration: i64,
    /// Time base the timestamps are expressed against.
    pub time_base: MediaTime,
    /// Stream this packet belongs to.
    pub stream_index: u32,
    /// Packet flags.
    pub flags: PacketFlags,
}

impl<'a> Packet<'a> {
    /// Sentinel for an undefined timestamp.
    pub const NO_TS: i64 = i64::MIN;

    /// Create a packet with owned data.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Cow::Owned(data),
            pts: Self::NO_TS,
            dts: Self::NO_TS,
            duration: 0,
            time_base: MediaTime::new(1, 1),
            stream_index: 0,
            flags: PacketFlags::empty(),
        }
    }

    /// Create a packet referencing external data.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self {
            data: Cow::Borrowed(data),
            pts: Self::NO_TS,
            dts: Self::NO_TS,
            duration: 0,
            time_base: MediaTime::new(1, 1),
            stream_index: 0,
            flags: PacketFlags::empty(),
        }
    }

    /// The packet payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this is a keyframe packet.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Make the packet own its data.
    pub fn into_owned(self) -> Packet<'static> {
        Packet {
            data: Cow::Owned(self.data.into_owned()),
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
            time_base: self.time_base,
            stream_index: self.stream_index,
            flags: self.flags,
        }
    }

    /// Rescale pts, dts and duration from the current time base into
    /// `target`, truncating toward zero, and retag the packet.
    pub fn rescale_ts(&mut self, target: MediaTime) {
        if self.pts != Self::NO_TS {
            self.pts = MediaTime::rescale_value(self.pts, self.time_base, target);
        }
        if self.dts != Self::NO_TS {
            self.dts = MediaTime::rescale_value(self.dts, self.time_base, target);
        }
        self.duration = MediaTime::rescale_value(self.duration, self.time_base, target);
        self.time_base = target;
    }

    /// Builder-style timestamp assignment.
    pub fn with_timestamps(mut self, pts: i64, dts: i64, time_base: MediaTime) -> Self {
        self.pts = pts;
        self.dts = dts;
        self.time_base = time_base;
        self
    }

    /// Builder-style stream index assignment.
    pub fn with_stream_index(mut self, index: u32) -> Self {
        self.stream_index = index;
        self
    }

    /// Builder-style flag assignment.
    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("time_base", &self.time_base)
            .field("stream_index", &self.stream_index)
            .field("flags", &self.flags)
            .finish()
    }
}

/// An owned packet suitable for storage.
pub type OwnedPacket = Packet<'static>;
