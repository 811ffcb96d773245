//! # avpipe
//!
//! A time-synchronized transcoding pipeline: read compressed audio and
//! video from a container, decode to raw buffers with exact rational
//! timestamps, convert pixel/sample formats, and re-encode into a new
//! container while keeping the two independently clocked streams
//! aligned.
//!
//! The pipeline drives an external [`MediaEngine`] for codec and
//! container work; [`avpipe_engine::RawEngine`] is the built-in
//! passthrough implementation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use avpipe::{AudioStreamDecoder, FileEncoder, VideoEncodeAttribute, VideoStreamDecoder};
//! use avpipe_core::audio::{AudioFormat, SampleFormat};
//! use avpipe_core::pixel::PixelFormat;
//! use avpipe_core::time::MediaTime;
//! use avpipe_engine::RawEngine;
//!
//! # fn main() -> avpipe_core::Result<()> {
//! let engine = Arc::new(RawEngine::new());
//! let mut video = VideoStreamDecoder::open(engine.as_ref(), "in.rawc".as_ref(), PixelFormat::Yuv420p)
//!     .expect("no video stream");
//! let audio_format = AudioFormat::from_sample_format(SampleFormat::S16, 48000, 2);
//! let mut audio = AudioStreamDecoder::open(engine.as_ref(), "in.rawc".as_ref(), audio_format.clone())
//!     .expect("no audio stream");
//!
//! let attr = VideoEncodeAttribute {
//!     pixel_format: PixelFormat::Yuv420p,
//!     width: video.width(),
//!     height: video.height(),
//!     fps: video.fps(),
//!     time_base: MediaTime::new(1, 600),
//!     bit_rate: 2_000_000,
//!     gop_size: 12,
//! };
//! let mut encoder = FileEncoder::open(engine, "out.rawc".as_ref(), attr, audio_format)
//!     .expect("cannot open encoder");
//!
//! while let Some((frame, pts)) = video.next_frame()? {
//!     encoder.encode_video(&frame, pts)?;
//! }
//! while let Some((chunk, range)) = audio.next_chunk()? {
//!     encoder.encode_audio(&chunk, range.start)?;
//! }
//! encoder.encode_tail()?;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod encoder;

pub use decoder::{AudioStreamDecoder, VideoStreamDecoder};
pub use encoder::{EncoderError, FileEncoder, VideoEncodeAttribute};

pub use avpipe_core::{Error, Result};
pub use avpipe_engine::traits::MediaEngine;
