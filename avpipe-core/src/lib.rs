//! # avpipe-core
//!
//! Core types for the avpipe transcoding pipeline:
//! - Exact rational media time and time ranges
//! - Pixel and PCM buffer abstractions
//! - Compressed packet type with time-base-aware rescaling
//! - Error handling types

pub mod audio;
pub mod error;
pub mod packet;
pub mod pixel;
pub mod range;
pub mod time;

pub use audio::{AudioFormat, AudioFormatFlags, AudioPcmBuffer, SampleFormat};
pub use error::{Error, Result};
pub use packet::{OwnedPacket, Packet, PacketFlags};
pub use pixel::{PixelBuffer, PixelFormat};
pub use range::TimeRange;
pub use time::MediaTime;
