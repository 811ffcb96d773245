//! Stream decoders.
//!
//! Each decoder owns one container-read handle, one codec context and
//! one conversion context, follows the first elementary stream of its
//! kind, and hands out decoded buffers tagged with exact rational
//! timestamps. Construction is all-or-nothing: every failure path drops
//! the resources acquired so far and reports plain unavailability.

use std::path::Path;

use tracing::{debug, warn};

use avpipe_core::audio::AudioFormat;
use avpipe_core::pixel::{PixelBuffer, PixelFormat};
use avpipe_core::range::TimeRange;
use avpipe_core::time::MediaTime;
use avpipe_core::{AudioPcmBuffer, Error, Result};
use avpipe_engine::traits::{
    Demuxer, FrameContent, FrameDecoder, MediaEngine, MediaKind, PixelConverter, PixelSpec,
    Receive, Resampler, StreamInfo,
};

/// Frame rate sentinel for streams that do not declare one.
const FPS_UNKNOWN: (i64, i64) = (-1, 600);

fn find_stream(streams: &[StreamInfo], kind: MediaKind) -> Option<&StreamInfo> {
    streams.iter().find(|s| s.kind == kind)
}

/// Convert a rational time into integer ticks of a stream time base,
/// truncating toward zero.
fn to_ticks(time: MediaTime, time_base: MediaTime) -> i64 {
    MediaTime::rescale_value(time.value(), MediaTime::new(1, time.scale()), time_base)
}

/// The exact presentation time of `ticks` in `time_base`.
fn tick_time(ticks: i64, time_base: MediaTime) -> MediaTime {
    MediaTime::new(ticks, 1) * time_base
}

/// Decoder for the first video stream of a container.
///
/// Frames come out in the caller-requested pixel format at the stream's
/// native dimensions.
pub struct VideoStreamDecoder {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn FrameDecoder>,
    converter: Box<dyn PixelConverter>,
    stream_index: usize,
    time_base: MediaTime,
    avg_frame_rate: Option<MediaTime>,
    width: u32,
    height: u32,
    output_format: PixelFormat,
    draining: bool,
    last_display_time: Option<MediaTime>,
}

impl VideoStreamDecoder {
    /// Open the first video stream of the container at `path`, decoding
    /// into `output_format`.
    ///
    /// Returns `None` when the container cannot be opened, has no video
    /// stream, or no decoder/conversion context is available. The exact
    /// reason is traced, not reported.
    pub fn open(
        engine: &dyn MediaEngine,
        path: &Path,
        output_format: PixelFormat,
    ) -> Option<Self> {
        let demuxer = match engine.open_input(path) {
            Ok(d) => d,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot open input");
                return None;
            }
        };
        let stream = match find_stream(demuxer.streams(), MediaKind::Video) {
            Some(s) => s.clone(),
            None => {
                debug!(path = %path.display(), "no video stream");
                return None;
            }
        };
        let video = stream.parameters.video.as_ref()?;

        let mut decoder = match engine.find_decoder(&stream.parameters.codec) {
            Some(d) => d,
            None => {
                debug!(codec = ?stream.parameters.codec, "no video decoder");
                return None;
            }
        };
        if let Err(e) = decoder
            .configure(&stream.parameters)
            .and_then(|_| decoder.open())
        {
            debug!(error = %e, "cannot open video decoder");
            return None;
        }

        let native = PixelSpec {
            width: video.width,
            height: video.height,
            format: video.pixel_format,
        };
        let output = PixelSpec {
            format: output_format,
            ..native
        };
        let converter = match engine.pixel_converter(native, output) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "cannot build pixel conversion context");
                return None;
            }
        };

        Some(Self {
            demuxer,
            decoder,
            converter,
            stream_index: stream.index,
            time_base: stream.time_base,
            avg_frame_rate: stream.avg_frame_rate,
            width: video.width,
            height: video.height,
            output_format,
            draining: false,
            last_display_time: None,
        })
    }

    /// Decode the next frame of the stream.
    ///
    /// `Ok(None)` means the container is exhausted; that is the normal
    /// terminal condition. A failed decode of a single unit is logged
    /// and skipped, so the stream keeps going over damaged input.
    pub fn next_frame(&mut self) -> Result<Option<(PixelBuffer, MediaTime)>> {
        loop {
            match self.decoder.receive_frame() {
                Ok(Receive::Ready(frame)) => {
                    let FrameContent::Video(decoded) = frame.content else {
                        return Err(Error::engine("video decoder produced audio"));
                    };
                    let mut out =
                        PixelBuffer::new(self.width, self.height, self.output_format);
                    self.converter.convert(&decoded, &mut out)?;
                    let pts = tick_time(frame.pts, self.time_base);
                    self.last_display_time = Some(pts);
                    return Ok(Some((out, pts)));
                }
                Ok(Receive::Eof) => return Ok(None),
                Ok(Receive::TryAgain) => {}
                Err(e) => {
                    // Transient only while real units remain; an error
                    // during the final drain is unrecoverable.
                    if self.draining {
                        return Err(e);
                    }
                    warn!(stream = self.stream_index, error = %e, "video decode failed, skipping unit");
                }
            }

            if self.draining {
                continue;
            }
            match self.demuxer.read_packet()? {
                Some(packet) => {
                    if packet.stream_index as usize != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(Some(&packet)) {
                        warn!(stream = self.stream_index, error = %e, "video decode failed, skipping unit");
                    }
                }
                None => {
                    self.decoder.send_packet(None)?;
                    self.draining = true;
                }
            }
        }
    }

    /// Seek to `time`, biased backward so decoding can resume from a
    /// sync point at or before the target. Codec state is flushed only
    /// when the container seek succeeds.
    pub fn seek(&mut self, time: MediaTime) -> Result<()> {
        let ticks = to_ticks(time, self.time_base);
        self.demuxer.seek(self.stream_index, ticks, true)?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }

    /// Display time of the most recently decoded frame, if any.
    pub fn last_decoded_display_time(&self) -> Option<MediaTime> {
        self.last_display_time
    }

    /// Average frame rate of the stream, or the negative sentinel when
    /// unknown.
    pub fn fps(&self) -> MediaTime {
        self.avg_frame_rate
            .unwrap_or_else(|| MediaTime::new(FPS_UNKNOWN.0, FPS_UNKNOWN.1))
    }

    /// Native frame width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Native frame height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Time base of the stream's packet timestamps.
    pub fn time_base(&self) -> MediaTime {
        self.time_base
    }
}

/// Decoder for the first audio stream of a container.
///
/// Chunks come out resampled into the caller-requested format; each is
/// tagged with the time range it spans at the output sample rate.
pub struct AudioStreamDecoder {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn FrameDecoder>,
    resampler: Box<dyn Resampler>,
    stream_index: usize,
    time_base: MediaTime,
    native_rate: u32,
    output_format: AudioFormat,
    draining: bool,
    last_display_time: Option<MediaTime>,
}

impl AudioStreamDecoder {
    /// Open the first audio stream of the container at `path`,
    /// resampling into `output_format`.
    ///
    /// Same unavailability contract as
    /// [`VideoStreamDecoder::open`].
    pub fn open(
        engine: &dyn MediaEngine,
        path: &Path,
        output_format: AudioFormat,
    ) -> Option<Self> {
        let demuxer = match engine.open_input(path) {
            Ok(d) => d,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot open input");
                return None;
            }
        };
        let stream = match find_stream(demuxer.streams(), MediaKind::Audio) {
            Some(s) => s.clone(),
            None => {
                debug!(path = %path.display(), "no audio stream");
                return None;
            }
        };
        let audio = stream.parameters.audio.as_ref()?;

        let mut decoder = match engine.find_decoder(&stream.parameters.codec) {
            Some(d) => d,
            None => {
                debug!(codec = ?stream.parameters.codec, "no audio decoder");
                return None;
            }
        };
        if let Err(e) = decoder
            .configure(&stream.parameters)
            .and_then(|_| decoder.open())
        {
            debug!(error = %e, "cannot open audio decoder");
            return None;
        }

        let native = AudioFormat::from_sample_format(
            audio.sample_format,
            audio.sample_rate,
            audio.channels,
        );
        let resampler = match engine.resampler(&native, &output_format) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "cannot build resampling context");
                return None;
            }
        };

        Some(Self {
            demuxer,
            decoder,
            resampler,
            stream_index: stream.index,
            time_base: stream.time_base,
            native_rate: audio.sample_rate,
            output_format,
            draining: false,
            last_display_time: None,
        })
    }

    /// Decode and resample the next audio chunk.
    ///
    /// The returned range is `[pts, pts + frames)` expressed at the
    /// output sample rate. Same terminal and skip semantics as
    /// [`VideoStreamDecoder::next_frame`].
    pub fn next_chunk(&mut self) -> Result<Option<(AudioPcmBuffer, TimeRange)>> {
        loop {
            match self.decoder.receive_frame() {
                Ok(Receive::Ready(frame)) => {
                    let FrameContent::Audio(decoded) = frame.content else {
                        return Err(Error::engine("audio decoder produced video"));
                    };
                    let out_rate = self.output_format.sample_rate;
                    let out_frames = MediaTime::rescale_value(
                        decoded.frames() as i64,
                        MediaTime::new(1, self.native_rate as i64),
                        MediaTime::new(1, out_rate as i64),
                    ) as usize;
                    let mut out = AudioPcmBuffer::new(self.output_format.clone(), out_frames);
                    self.resampler.convert(&decoded, &mut out)?;

                    let start = tick_time(frame.pts, self.time_base)
                        .convert_scale(out_rate as i64);
                    let range = TimeRange {
                        start,
                        end: start + MediaTime::new(out_frames as i64, out_rate as i64),
                    };
                    self.last_display_time = Some(range.start);
                    return Ok(Some((out, range)));
                }
                Ok(Receive::Eof) => return Ok(None),
                Ok(Receive::TryAgain) => {}
                Err(e) => {
                    // Transient only while real units remain; an error
                    // during the final drain is unrecoverable.
                    if self.draining {
                        return Err(e);
                    }
                    warn!(stream = self.stream_index, error = %e, "audio decode failed, skipping unit");
                }
            }

            if self.draining {
                continue;
            }
            match self.demuxer.read_packet()? {
                Some(packet) => {
                    if packet.stream_index as usize != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(Some(&packet)) {
                        warn!(stream = self.stream_index, error = %e, "audio decode failed, skipping unit");
                    }
                }
                None => {
                    self.decoder.send_packet(None)?;
                    self.draining = true;
                }
            }
        }
    }

    /// Seek to `time`; same contract as [`VideoStreamDecoder::seek`].
    pub fn seek(&mut self, time: MediaTime) -> Result<()> {
        let ticks = to_ticks(time, self.time_base);
        self.demuxer.seek(self.stream_index, ticks, true)?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }

    /// Start time of the most recently decoded chunk, if any.
    pub fn last_decoded_display_time(&self) -> Option<MediaTime> {
        self.last_display_time
    }

    /// The format chunks are delivered in.
    pub fn output_format(&self) -> &AudioFormat {
        &self.output_format
    }

    /// Time base of the stream's packet timestamps.
    pub fn time_base(&self) -> MediaTime {
        self.time_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_ticks() {
        // 1.5 s into a 1/600 time base.
        let t = MediaTime::new(3, 2);
        assert_eq!(to_ticks(t, MediaTime::new(1, 600)), 900);
    }

    #[test]
    fn test_tick_time_is_exact() {
        let t = tick_time(900, MediaTime::new(1, 600));
        assert_eq!(t, MediaTime::new(3, 2));
    }

    #[test]
    fn test_fps_sentinel_is_negative() {
        let sentinel = MediaTime::new(FPS_UNKNOWN.0, FPS_UNKNOWN.1);
        assert!(sentinel.is_negative());
    }
}
