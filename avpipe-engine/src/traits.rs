//! Interfaces of the external collaborators.
//!
//! The pipeline never performs entropy coding or container parsing
//! itself; it drives implementations of these traits. The codec traits
//! follow the asynchronous push/pull protocol: submit input with
//! `send_*`, drain outputs with `receive_*` until a [`Receive::TryAgain`]
//! or [`Receive::Eof`] sentinel.

use std::fmt;
use std::path::Path;

use avpipe_core::audio::{AudioFormat, SampleFormat};
use avpipe_core::packet::{OwnedPacket, Packet};
use avpipe_core::pixel::{PixelBuffer, PixelFormat};
use avpipe_core::time::MediaTime;
use avpipe_core::{AudioPcmBuffer, Result};

/// Kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video stream.
    Video,
    /// Audio stream.
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Codec identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// Uncompressed video frames.
    RawVideo,
    /// Uncompressed PCM audio.
    Pcm,
    /// MPEG-1 video.
    Mpeg1Video,
    /// MPEG-2 video.
    Mpeg2Video,
    /// H.264/AVC.
    H264,
    /// AAC.
    Aac,
    /// Codec known to the container but not to this engine.
    Unknown(String),
}

/// Result of a `receive_*` call on a codec context.
#[derive(Debug)]
pub enum Receive<T> {
    /// An output unit is ready.
    Ready(T),
    /// The codec needs more input before it can produce output.
    TryAgain,
    /// The codec is fully drained; no further output will come.
    Eof,
}

/// Video-specific codec parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParameters {
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Native pixel format of decoded frames.
    pub pixel_format: PixelFormat,
    /// Declared frame rate, if the stream carries one.
    pub frame_rate: Option<MediaTime>,
}

/// Audio-specific codec parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioParameters {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Native sample format of decoded chunks.
    pub sample_format: SampleFormat,
}

/// Parameters needed to open a codec context for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParameters {
    /// The codec.
    pub codec: CodecId,
    /// Codec-specific configuration blob.
    pub extra_data: Option<Vec<u8>>,
    /// Present for video streams.
    pub video: Option<VideoParameters>,
    /// Present for audio streams.
    pub audio: Option<AudioParameters>,
}

/// Description of one elementary stream in a container.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Stream index within the container.
    pub index: usize,
    /// Stream kind.
    pub kind: MediaKind,
    /// Time base of the stream's packet timestamps.
    pub time_base: MediaTime,
    /// Average frame rate, if known.
    pub avg_frame_rate: Option<MediaTime>,
    /// Codec parameters for opening a decoder.
    pub parameters: CodecParameters,
}

/// Extent and format of a video frame, used to build conversion
/// contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl PixelSpec {
    /// The spec describing an existing buffer.
    pub fn of(buffer: &PixelBuffer) -> Self {
        Self {
            width: buffer.width(),
            height: buffer.height(),
            format: buffer.format(),
        }
    }
}

/// One decoded unit handed across the codec boundary.
#[derive(Debug)]
pub struct DecodedFrame {
    /// The decoded payload.
    pub content: FrameContent,
    /// Presentation timestamp in ticks of the producing context's time
    /// base.
    pub pts: i64,
}

/// Decoded payload of a frame.
#[derive(Debug)]
pub enum FrameContent {
    /// A video frame.
    Video(PixelBuffer),
    /// An audio chunk.
    Audio(AudioPcmBuffer),
}

/// Configuration applied to an encoder context before opening it.
#[derive(Debug, Clone)]
pub enum EncoderConfig {
    Video(VideoEncoderConfig),
    Audio(AudioEncoderConfig),
}

/// Video encoder settings.
#[derive(Debug, Clone)]
pub struct VideoEncoderConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Target frame rate.
    pub frame_rate: MediaTime,
    /// Time base frames will be stamped in.
    pub time_base: MediaTime,
    pub bit_rate: i64,
    /// Keyframe interval.
    pub gop_size: u32,
    /// Maximum consecutive B-frames; legacy-codec quirk, usually 0.
    pub max_b_frames: u32,
    /// Macroblock decision mode; legacy-codec quirk, usually 0.
    pub mb_decision: u32,
}

/// Audio encoder settings.
#[derive(Debug, Clone)]
pub struct AudioEncoderConfig {
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_format: SampleFormat,
    pub bit_rate: i64,
    /// Time base frames will be stamped in, normally 1/sample_rate.
    pub time_base: MediaTime,
}

/// Open container-read handle.
pub trait Demuxer {
    /// The streams found in the container.
    fn streams(&self) -> &[StreamInfo];

    /// Read the next packet in container order, from any stream.
    /// `Ok(None)` signals end of input.
    fn read_packet(&mut self) -> Result<Option<OwnedPacket>>;

    /// Reposition the given stream to `ticks` in its time base.
    /// With `backward` set, lands at or before the target.
    fn seek(&mut self, stream_index: usize, ticks: i64, backward: bool) -> Result<()>;
}

/// Open container-write handle.
pub trait Muxer {
    /// The codec this container format prefers for the given kind.
    fn default_codec(&self, kind: MediaKind) -> Option<CodecId>;

    /// Create a new elementary stream, returning its index.
    fn new_stream(&mut self, kind: MediaKind) -> Result<usize>;

    /// Transfer codec parameters onto a stream and declare its time
    /// base.
    fn set_stream_parameters(
        &mut self,
        index: usize,
        parameters: &CodecParameters,
        time_base: MediaTime,
    ) -> Result<()>;

    /// The time base a stream's packets must be written in. Valid after
    /// [`Muxer::set_stream_parameters`]; the muxer may adjust it when
    /// the header is written.
    fn stream_time_base(&self, index: usize) -> Option<MediaTime>;

    /// Open the output file for writing.
    fn open_output(&mut self) -> Result<()>;

    /// Write the container header.
    fn write_header(&mut self) -> Result<()>;

    /// Write one packet, interleaving across streams. Timestamps must
    /// already be in the stream's time base.
    fn write_interleaved(&mut self, packet: &Packet<'_>) -> Result<()>;

    /// Finalize the container. A container without its trailer is
    /// invalid.
    fn write_trailer(&mut self) -> Result<()>;
}

/// Open decode context for one stream.
pub trait FrameDecoder {
    /// Transfer stream parameters into the context.
    fn configure(&mut self, parameters: &CodecParameters) -> Result<()>;

    /// Open the context. Must be configured first.
    fn open(&mut self) -> Result<()>;

    /// Submit one compressed unit. `None` enters draining mode: after
    /// it, `receive_frame` will yield buffered frames then
    /// [`Receive::Eof`].
    fn send_packet(&mut self, packet: Option<&Packet<'_>>) -> Result<()>;

    /// Retrieve one decoded unit, or a sentinel.
    fn receive_frame(&mut self) -> Result<Receive<DecodedFrame>>;

    /// Discard internal decode state, e.g. after a seek.
    fn flush(&mut self);
}

/// Open encode context for one stream.
pub trait FrameEncoder {
    /// Apply settings. Must precede [`FrameEncoder::open`].
    fn configure(&mut self, config: &EncoderConfig) -> Result<()>;

    /// Open the context.
    fn open(&mut self) -> Result<()>;

    /// Extract the parameters a muxer needs to describe this stream.
    fn parameters(&self) -> Result<CodecParameters>;

    /// The time base submitted frames are stamped in.
    fn time_base(&self) -> MediaTime;

    /// Required frames per submitted audio chunk; 0 when the codec
    /// imposes none. Always 0 for video.
    fn frame_size(&self) -> u32;

    /// Submit one raw frame. `None` enters draining mode.
    fn send_frame(&mut self, frame: Option<&DecodedFrame>) -> Result<()>;

    /// Retrieve one compressed packet, or a sentinel. Timestamps are in
    /// the encoder's time base.
    fn receive_packet(&mut self) -> Result<Receive<OwnedPacket>>;
}

/// Pixel-format/size conversion context, built for a fixed source and
/// destination spec.
pub trait PixelConverter {
    /// Convert `src` into `dst`. Both must match the specs the context
    /// was built with; arbitrary source extents are handled by building
    /// the context for them.
    fn convert(&mut self, src: &PixelBuffer, dst: &mut PixelBuffer) -> Result<()>;
}

/// Sample-format/rate/layout conversion context.
pub trait Resampler {
    /// Convert `src` into `dst`, producing exactly `dst.frames()`
    /// output frames.
    fn convert(&mut self, src: &AudioPcmBuffer, dst: &mut AudioPcmBuffer) -> Result<()>;
}

/// Factory for all engine objects. One engine instance serves any
/// number of pipelines.
pub trait MediaEngine {
    /// Open a container for reading.
    fn open_input(&self, path: &Path) -> Result<Box<dyn Demuxer>>;

    /// Find a decoder for the codec, unconfigured and unopened.
    /// `None` when the engine has no decoder for it.
    fn find_decoder(&self, codec: &CodecId) -> Option<Box<dyn FrameDecoder>>;

    /// Allocate an output container for the path. The container format
    /// is chosen from the path; no file is created yet.
    fn alloc_output(&self, path: &Path) -> Result<Box<dyn Muxer>>;

    /// Find an encoder for the codec, unconfigured and unopened.
    fn find_encoder(&self, codec: &CodecId) -> Option<Box<dyn FrameEncoder>>;

    /// Build a pixel conversion context.
    fn pixel_converter(&self, src: PixelSpec, dst: PixelSpec) -> Result<Box<dyn PixelConverter>>;

    /// Build a resampling context.
    fn resampler(&self, src: &AudioFormat, dst: &AudioFormat) -> Result<Box<dyn Resampler>>;
}
