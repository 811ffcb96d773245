//! Audio format descriptors and decoded PCM buffers.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::MediaTime;

bitflags! {
    /// Flags describing how PCM samples are laid out.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AudioFormatFlags: u32 {
        /// Samples are IEEE floats.
        const FLOAT = 0x0001;
        /// Samples are signed integers.
        const SIGNED_INTEGER = 0x0002;
        /// One buffer per channel instead of a single interleaved block.
        const NON_INTERLEAVED = 0x0004;
    }
}

/// Description of a PCM stream: sample layout, rate and channel count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channels per frame.
    pub channels_per_frame: u32,
    /// Bits in one channel's sample.
    pub bits_per_channel: u32,
    /// Frames per compressed packet; 1 for raw PCM.
    pub frames_per_packet: u32,
    /// Layout flags.
    pub flags: AudioFormatFlags,
}

impl AudioFormat {
    /// Check if samples are floats.
    pub fn is_float(&self) -> bool {
        self.flags.contains(AudioFormatFlags::FLOAT)
    }

    /// Check if samples are signed integers.
    pub fn is_signed_integer(&self) -> bool {
        self.flags.contains(AudioFormatFlags::SIGNED_INTEGER)
    }

    /// Check if storage is one buffer per channel.
    pub fn is_non_interleaved(&self) -> bool {
        self.flags.contains(AudioFormatFlags::NON_INTERLEAVED)
    }

    /// Bytes occupied by one channel's sample.
    pub fn bytes_per_channel_sample(&self) -> usize {
        (self.bits_per_channel / 8) as usize
    }

    /// Resolve the concrete sample format for this descriptor.
    ///
    /// Only the combinations a PCM pipeline actually produces are
    /// supported: signed 16/32-bit integers and 32/64-bit floats, each
    /// packed or planar.
    pub fn sample_format(&self) -> Result<SampleFormat> {
        let planar = self.is_non_interleaved();
        let fmt = match (self.is_signed_integer(), self.is_float(), self.bits_per_channel) {
            (true, false, 16) => {
                if planar {
                    SampleFormat::S16p
                } else {
                    SampleFormat::S16
                }
            }
            (true, false, 32) => {
                if planar {
                    SampleFormat::S32p
                } else {
                    SampleFormat::S32
                }
            }
            (false, true, 32) => {
                if planar {
                    SampleFormat::F32p
                } else {
                    SampleFormat::F32
                }
            }
            (false, true, 64) => {
                if planar {
                    SampleFormat::F64p
                } else {
                    SampleFormat::F64
                }
            }
            _ => {
                return Err(Error::Unsupported(format!(
                    "no sample format for {} bits, flags {:?}",
                    self.bits_per_channel, self.flags
                )))
            }
        };
        Ok(fmt)
    }

    /// Build a descriptor from a concrete sample format.
    pub fn from_sample_format(format: SampleFormat, sample_rate: u32, channels: u32) -> Self {
        let mut flags = AudioFormatFlags::empty();
        if format.is_float() {
            flags |= AudioFormatFlags::FLOAT;
        } else {
            flags |= AudioFormatFlags::SIGNED_INTEGER;
        }
        if format.is_planar() {
            flags |= AudioFormatFlags::NON_INTERLEAVED;
        }
        Self {
            sample_rate,
            channels_per_frame: channels,
            bits_per_channel: (format.bytes_per_sample() * 8) as u32,
            frames_per_packet: 1,
            flags,
        }
    }
}

/// Concrete PCM sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit, interleaved.
    S16,
    /// Signed 16-bit, planar.
    S16p,
    /// Signed 32-bit, interleaved.
    S32,
    /// Signed 32-bit, planar.
    S32p,
    /// 32-bit float, interleaved.
    F32,
    /// 32-bit float, planar.
    F32p,
    /// 64-bit float, interleaved.
    F64,
    /// 64-bit float, planar.
    F64p,
}

impl SampleFormat {
    /// Bytes per sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::F32 | Self::F32p => 4,
            Self::F64 | Self::F64p => 8,
        }
    }

    /// Check if this is a planar format.
    pub fn is_planar(&self) -> bool {
        matches!(self, Self::S16p | Self::S32p | Self::F32p | Self::F64p)
    }

    /// Check if this is a floating-point format.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F32p | Self::F64 | Self::F64p)
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S16 => write!(f, "s16"),
            Self::S16p => write!(f, "s16p"),
            Self::S32 => write!(f, "s32"),
            Self::S32p => write!(f, "s32p"),
            Self::F32 => write!(f, "flt"),
            Self::F32p => write!(f, "fltp"),
            Self::F64 => write!(f, "dbl"),
            Self::F64p => write!(f, "dblp"),
        }
    }
}

/// One decoded audio chunk.
///
/// Planar storage holds one buffer per channel; interleaved storage a
/// single block. Same exclusive-ownership rule as
/// [`PixelBuffer`](crate::pixel::PixelBuffer).
#[derive(Clone)]
pub struct AudioPcmBuffer {
    format: AudioFormat,
    frames: usize,
    data: Vec<Vec<u8>>,
}

impl AudioPcmBuffer {
    /// Allocate a silent buffer of `frames` frames in the given format.
    pub fn new(format: AudioFormat, frames: usize) -> Self {
        let bytes = format.bytes_per_channel_sample();
        let channels = format.channels_per_frame as usize;
        let data = if format.is_non_interleaved() {
            (0..channels).map(|_| vec![0u8; frames * bytes]).collect()
        } else {
            vec![vec![0u8; frames * channels * bytes]]
        };
        Self {
            format,
            frames,
            data,
        }
    }

    /// The buffer's audio format.
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Channel count.
    pub fn channels(&self) -> u32 {
        self.format.channels_per_frame
    }

    /// The exact duration of this chunk at its sample rate.
    pub fn duration(&self) -> MediaTime {
        MediaTime::new(self.frames as i64, self.format.sample_rate as i64)
    }

    /// A channel's buffer for planar storage; the interleaved block is
    /// channel 0.
    pub fn channel_data(&self, channel: usize) -> Option<&[u8]> {
        self.data.get(channel).map(|d| d.as_slice())
    }

    /// Mutable access to a channel's buffer.
    pub fn channel_data_mut(&mut self, channel: usize) -> Option<&mut [u8]> {
        self.data.get_mut(channel).map(|d| d.as_mut_slice())
    }

    /// All storage buffers.
    pub fn buffers(&self) -> &[Vec<u8>] {
        &self.data
    }

    /// Total storage size in bytes.
    pub fn total_size(&self) -> usize {
        self.data.iter().map(|d| d.len()).sum()
    }

    /// Fill all channels with silence.
    pub fn silence(&mut self) {
        for channel in &mut self.data {
            channel.fill(0);
        }
    }
}

impl fmt::Debug for AudioPcmBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioPcmBuffer")
            .field("frames", &self.frames)
            .field("sample_rate", &self.format.sample_rate)
            .field("channels", &self.format.channels_per_frame)
            .field("flags", &self.format.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32p_stereo(rate: u32) -> AudioFormat {
        AudioFormat {
            sample_rate: rate,
            channels_per_frame: 2,
            bits_per_channel: 32,
            frames_per_packet: 1,
            flags: AudioFormatFlags::FLOAT | AudioFormatFlags::NON_INTERLEAVED,
        }
    }

    #[test]
    fn test_sample_format_mapping() {
        assert_eq!(f32p_stereo(44100).sample_format().unwrap(), SampleFormat::F32p);

        let s16 = AudioFormat {
            sample_rate: 48000,
            channels_per_frame: 2,
            bits_per_channel: 16,
            frames_per_packet: 1,
            flags: AudioFormatFlags::SIGNED_INTEGER,
        };
        assert_eq!(s16.sample_format().unwrap(), SampleFormat::S16);
    }

    #[test]
    fn test_sample_format_unsupported() {
        let odd = AudioFormat {
            sample_rate: 48000,
            channels_per_frame: 2,
            bits_per_channel: 24,
            frames_per_packet: 1,
            flags: AudioFormatFlags::SIGNED_INTEGER,
        };
        assert!(odd.sample_format().is_err());
    }

    #[test]
    fn test_from_sample_format_roundtrip() {
        let fmt = AudioFormat::from_sample_format(SampleFormat::S32p, 48000, 6);
        assert_eq!(fmt.sample_format().unwrap(), SampleFormat::S32p);
        assert_eq!(fmt.channels_per_frame, 6);
        assert_eq!(fmt.bits_per_channel, 32);
    }

    #[test]
    fn test_planar_buffer_layout() {
        let buf = AudioPcmBuffer::new(f32p_stereo(44100), 1024);
        assert_eq!(buf.channel_data(0).unwrap().len(), 1024 * 4);
        assert_eq!(buf.channel_data(1).unwrap().len(), 1024 * 4);
        assert!(buf.channel_data(2).is_none());
    }

    #[test]
    fn test_interleaved_buffer_layout() {
        let fmt = AudioFormat::from_sample_format(SampleFormat::S16, 48000, 2);
        let buf = AudioPcmBuffer::new(fmt, 1024);
        assert_eq!(buf.channel_data(0).unwrap().len(), 1024 * 2 * 2);
        assert!(buf.channel_data(1).is_none());
    }

    #[test]
    fn test_duration() {
        let buf = AudioPcmBuffer::new(f32p_stereo(44100), 44100);
        assert_eq!(buf.duration(), MediaTime::new(1, 1));
    }
}
