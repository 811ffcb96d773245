//! Output file encoder.
//!
//! [`FileEncoder`] owns the output container and one encoder context
//! per elementary stream. Construction runs the whole setup sequence
//! through to the container header, so a successfully built encoder is
//! ready to accept frames; each failure step has its own
//! [`EncoderError`] variant. Finalizing the file is the caller's job
//! via [`FileEncoder::encode_tail`] — an encoder dropped without it
//! leaves an invalid file behind.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::debug;

use avpipe_core::audio::AudioFormat;
use avpipe_core::pixel::{PixelBuffer, PixelFormat};
use avpipe_core::time::MediaTime;
use avpipe_core::{AudioPcmBuffer, Error, Result};
use avpipe_engine::traits::{
    AudioEncoderConfig, CodecId, DecodedFrame, EncoderConfig, FrameContent, FrameEncoder,
    MediaEngine, MediaKind, Muxer, PixelSpec, Receive, VideoEncoderConfig,
};

/// Audio frame size assumed when the codec imposes none.
const DEFAULT_AUDIO_FRAME_SIZE: u32 = 1024;

/// Audio bit rate applied to every output, matching the fixed-quality
/// policy of the original tool chain this pipeline replaces.
const AUDIO_BIT_RATE: i64 = 128_000;

/// Which setup step failed while building a [`FileEncoder`].
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderError {
    #[error("failed to allocate output container")]
    OutputContextAlloc,
    #[error("failed to create {0} stream")]
    StreamCreation(MediaKind),
    #[error("no encoder for the container's {0} codec")]
    EncoderLookup(MediaKind),
    #[error("failed to open {0} codec")]
    CodecOpen(MediaKind),
    #[error("failed to transfer {0} stream parameters")]
    ParameterTransfer(MediaKind),
    #[error("failed to open output file")]
    OutputOpen,
    #[error("failed to write container header")]
    HeaderWrite,
}

/// Video encoding attributes supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEncodeAttribute {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Target frame rate as a rational (frames per second).
    pub fps: MediaTime,
    /// Time base the video codec stamps frames in.
    pub time_base: MediaTime,
    pub bit_rate: i64,
    /// Keyframe interval in frames.
    pub gop_size: u32,
}

struct EncoderStream {
    encoder: Box<dyn FrameEncoder>,
    stream_index: usize,
}

/// Encoder writing one video and one audio stream into an output
/// container.
pub struct FileEncoder {
    engine: Arc<dyn MediaEngine>,
    muxer: Box<dyn Muxer>,
    video: EncoderStream,
    audio: EncoderStream,
    video_attr: VideoEncodeAttribute,
    audio_format: AudioFormat,
    finalized: bool,
}

impl FileEncoder {
    /// Build the full output pipeline: container, one stream and codec
    /// context per media kind, output file, container header.
    ///
    /// On failure the partially acquired contexts are dropped and the
    /// variant names the failing step.
    pub fn open(
        engine: Arc<dyn MediaEngine>,
        path: &Path,
        video_attr: VideoEncodeAttribute,
        audio_format: AudioFormat,
    ) -> std::result::Result<Self, EncoderError> {
        let mut muxer = engine
            .alloc_output(path)
            .map_err(|_| EncoderError::OutputContextAlloc)?;

        let video = Self::open_video_stream(engine.as_ref(), muxer.as_mut(), &video_attr)?;
        let audio = Self::open_audio_stream(engine.as_ref(), muxer.as_mut(), &audio_format)?;

        muxer.open_output().map_err(|_| EncoderError::OutputOpen)?;
        muxer.write_header().map_err(|_| EncoderError::HeaderWrite)?;

        debug!(path = %path.display(), "file encoder open");
        Ok(Self {
            engine,
            muxer,
            video,
            audio,
            video_attr,
            audio_format,
            finalized: false,
        })
    }

    fn open_video_stream(
        engine: &dyn MediaEngine,
        muxer: &mut dyn Muxer,
        attr: &VideoEncodeAttribute,
    ) -> std::result::Result<EncoderStream, EncoderError> {
        let kind = MediaKind::Video;
        let codec = muxer
            .default_codec(kind)
            .ok_or(EncoderError::EncoderLookup(kind))?;
        let mut encoder = engine
            .find_encoder(&codec)
            .ok_or(EncoderError::EncoderLookup(kind))?;
        let stream_index = muxer
            .new_stream(kind)
            .map_err(|_| EncoderError::StreamCreation(kind))?;

        let config = EncoderConfig::Video(VideoEncoderConfig {
            width: attr.width,
            height: attr.height,
            pixel_format: attr.pixel_format,
            frame_rate: attr.fps,
            time_base: attr.time_base,
            bit_rate: attr.bit_rate,
            gop_size: attr.gop_size,
            // Legacy MPEG codecs need their historical quirks.
            max_b_frames: if codec == CodecId::Mpeg2Video { 2 } else { 0 },
            mb_decision: if codec == CodecId::Mpeg1Video { 2 } else { 0 },
        });
        encoder
            .configure(&config)
            .and_then(|_| encoder.open())
            .map_err(|_| EncoderError::CodecOpen(kind))?;

        let parameters = encoder
            .parameters()
            .map_err(|_| EncoderError::ParameterTransfer(kind))?;
        muxer
            .set_stream_parameters(stream_index, &parameters, encoder.time_base())
            .map_err(|_| EncoderError::ParameterTransfer(kind))?;

        Ok(EncoderStream {
            encoder,
            stream_index,
        })
    }

    fn open_audio_stream(
        engine: &dyn MediaEngine,
        muxer: &mut dyn Muxer,
        format: &AudioFormat,
    ) -> std::result::Result<EncoderStream, EncoderError> {
        let kind = MediaKind::Audio;
        let codec = muxer
            .default_codec(kind)
            .ok_or(EncoderError::EncoderLookup(kind))?;
        let mut encoder = engine
            .find_encoder(&codec)
            .ok_or(EncoderError::EncoderLookup(kind))?;
        let stream_index = muxer
            .new_stream(kind)
            .map_err(|_| EncoderError::StreamCreation(kind))?;

        let sample_format = format
            .sample_format()
            .map_err(|_| EncoderError::CodecOpen(kind))?;
        let config = EncoderConfig::Audio(AudioEncoderConfig {
            sample_rate: format.sample_rate,
            channels: format.channels_per_frame,
            sample_format,
            bit_rate: AUDIO_BIT_RATE,
            time_base: MediaTime::new(1, format.sample_rate as i64),
        });
        encoder
            .configure(&config)
            .and_then(|_| encoder.open())
            .map_err(|_| EncoderError::CodecOpen(kind))?;

        let parameters = encoder
            .parameters()
            .map_err(|_| EncoderError::ParameterTransfer(kind))?;
        muxer
            .set_stream_parameters(stream_index, &parameters, encoder.time_base())
            .map_err(|_| EncoderError::ParameterTransfer(kind))?;

        Ok(EncoderStream {
            encoder,
            stream_index,
        })
    }

    /// Frames the audio codec requires per [`FileEncoder::encode_audio`]
    /// call; 1024 when it imposes none.
    pub fn audio_frame_size(&self) -> u32 {
        match self.audio.encoder.frame_size() {
            0 => DEFAULT_AUDIO_FRAME_SIZE,
            n => n,
        }
    }

    /// Encode one video frame stamped at `pts`.
    ///
    /// The frame is converted from its own format and size to the
    /// configured output; mismatched dimensions are scaled, not
    /// rejected. Errors here are fatal for the encode session.
    pub fn encode_video(&mut self, frame: &PixelBuffer, pts: MediaTime) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_param("encoder already finalized"));
        }
        let dst_spec = PixelSpec {
            width: self.video_attr.width,
            height: self.video_attr.height,
            format: self.video_attr.pixel_format,
        };
        let mut converter = self
            .engine
            .pixel_converter(PixelSpec::of(frame), dst_spec)?;
        let mut converted = PixelBuffer::new(dst_spec.width, dst_spec.height, dst_spec.format);
        converter.convert(frame, &mut converted)?;

        let ticks = rescale_to_base(pts, self.video.encoder.time_base());
        let frame = DecodedFrame {
            content: FrameContent::Video(converted),
            pts: ticks,
        };
        Self::encode_and_mux(self.muxer.as_mut(), &mut self.video, Some(&frame))
    }

    /// Encode one audio chunk stamped at `pts`.
    ///
    /// The chunk is resampled from its own format into the configured
    /// output format through a conversion context built for this call.
    ///
    /// # Panics
    ///
    /// The chunk must hold exactly [`FileEncoder::audio_frame_size`]
    /// frames; callers feeding variable-size chunks must pre-buffer to
    /// that size. Violating this is a caller bug, not a recoverable
    /// condition.
    pub fn encode_audio(&mut self, chunk: &AudioPcmBuffer, pts: MediaTime) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_param("encoder already finalized"));
        }
        let frames = self.audio_frame_size() as usize;
        assert_eq!(
            chunk.frames(),
            frames,
            "audio chunk must hold exactly the codec frame size"
        );

        let mut resampler = self.engine.resampler(chunk.format(), &self.audio_format)?;
        let mut converted = AudioPcmBuffer::new(self.audio_format.clone(), frames);
        resampler.convert(chunk, &mut converted)?;

        let ticks = rescale_to_base(pts, self.audio.encoder.time_base());
        let frame = DecodedFrame {
            content: FrameContent::Audio(converted),
            pts: ticks,
        };
        Self::encode_and_mux(self.muxer.as_mut(), &mut self.audio, Some(&frame))
    }

    /// Drain both codecs and write the container trailer.
    ///
    /// Must be called after the last real frame and before drop.
    /// Calling it again is a no-op; the file is finalized once.
    pub fn encode_tail(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        Self::encode_and_mux(self.muxer.as_mut(), &mut self.video, None)?;
        Self::encode_and_mux(self.muxer.as_mut(), &mut self.audio, None)?;
        self.muxer.write_trailer()?;
        self.finalized = true;
        debug!("output finalized");
        Ok(())
    }

    /// Submit a frame (or the drain signal) and move every packet the
    /// codec has ready into the container, rescaled to the stream's
    /// time base.
    fn encode_and_mux(
        muxer: &mut dyn Muxer,
        stream: &mut EncoderStream,
        frame: Option<&DecodedFrame>,
    ) -> Result<()> {
        stream.encoder.send_frame(frame)?;
        loop {
            match stream.encoder.receive_packet()? {
                Receive::Ready(mut packet) => {
                    let target = muxer
                        .stream_time_base(stream.stream_index)
                        .ok_or_else(|| Error::container("stream has no time base"))?;
                    packet.rescale_ts(target);
                    packet.stream_index = stream.stream_index as u32;
                    muxer.write_interleaved(&packet)?;
                }
                Receive::TryAgain | Receive::Eof => return Ok(()),
            }
        }
    }
}

/// Rescale a rational time into integer ticks of a codec time base,
/// truncating toward zero.
fn rescale_to_base(time: MediaTime, time_base: MediaTime) -> i64 {
    MediaTime::rescale_value(time.value(), MediaTime::new(1, time.scale()), time_base)
}
