//! # avpipe-engine
//!
//! The boundary between the avpipe pipeline and whatever does the
//! actual codec and container work:
//! - Traits for demuxers, muxers, decoders, encoders and conversion
//!   contexts
//! - [`RawEngine`], a pure-Rust passthrough engine with a simple
//!   length-prefixed container, used as the reference implementation
//!   and by the test suite
//! - CPU pixel conversion and linear resampling

pub mod convert;
pub mod raw;
pub mod traits;

pub use convert::{CpuPixelConverter, LinearResampler};
pub use raw::{RawDemuxer, RawEngine, RawMuxer, RawPcmDecoder, RawPcmEncoder, RawVideoDecoder, RawVideoEncoder};
pub use traits::{
    AudioEncoderConfig, AudioParameters, CodecId, CodecParameters, DecodedFrame, Demuxer,
    EncoderConfig, FrameContent, FrameDecoder, FrameEncoder, MediaEngine, MediaKind, Muxer,
    PixelConverter, PixelSpec, Receive, Resampler, StreamInfo, VideoEncoderConfig,
    VideoParameters,
};
