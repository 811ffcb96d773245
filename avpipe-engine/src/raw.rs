//! Pure-Rust reference engine.
//!
//! [`RawEngine`] backs the pipeline with a simple length-prefixed
//! container (`RAWC`) and passthrough codecs: video packets carry the
//! concatenated planes of a frame, audio packets the raw PCM bytes.
//! It exists so the pipeline can be exercised end to end without an
//! external codec library; real deployments plug in their own
//! [`MediaEngine`].

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use avpipe_core::audio::{AudioFormat, SampleFormat};
use avpipe_core::packet::{OwnedPacket, Packet, PacketFlags};
use avpipe_core::pixel::{PixelBuffer, PixelFormat};
use avpipe_core::time::MediaTime;
use avpipe_core::{AudioPcmBuffer, Error, Result};

use crate::convert::{CpuPixelConverter, LinearResampler};
use crate::traits::{
    AudioEncoderConfig, AudioParameters, CodecId, CodecParameters, DecodedFrame, Demuxer,
    EncoderConfig, FrameContent, FrameDecoder, FrameEncoder, MediaEngine, MediaKind, Muxer,
    PixelConverter, PixelSpec, Receive, Resampler, StreamInfo, VideoEncoderConfig,
    VideoParameters,
};

const MAGIC: &[u8; 4] = b"RAWC";
const FORMAT_VERSION: u16 = 1;

const TAG_PACKET: u8 = 1;
const TAG_TRAILER: u8 = 2;

const KIND_VIDEO: u8 = 0;
const KIND_AUDIO: u8 = 1;

fn pixel_format_tag(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Rgba8 => 0,
        PixelFormat::Bgra8 => 1,
        PixelFormat::Rgb8 => 2,
        PixelFormat::Bgr8 => 3,
        PixelFormat::Yuv420p => 4,
        PixelFormat::Gray8 => 5,
    }
}

fn pixel_format_from_tag(tag: u8) -> Result<PixelFormat> {
    Ok(match tag {
        0 => PixelFormat::Rgba8,
        1 => PixelFormat::Bgra8,
        2 => PixelFormat::Rgb8,
        3 => PixelFormat::Bgr8,
        4 => PixelFormat::Yuv420p,
        5 => PixelFormat::Gray8,
        _ => return Err(Error::container(format!("unknown pixel format tag {tag}"))),
    })
}

fn sample_format_tag(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::S16 => 0,
        SampleFormat::S16p => 1,
        SampleFormat::S32 => 2,
        SampleFormat::S32p => 3,
        SampleFormat::F32 => 4,
        SampleFormat::F32p => 5,
        SampleFormat::F64 => 6,
        SampleFormat::F64p => 7,
    }
}

fn sample_format_from_tag(tag: u8) -> Result<SampleFormat> {
    Ok(match tag {
        0 => SampleFormat::S16,
        1 => SampleFormat::S16p,
        2 => SampleFormat::S32,
        3 => SampleFormat::S32p,
        4 => SampleFormat::F32,
        5 => SampleFormat::F32p,
        6 => SampleFormat::F64,
        7 => SampleFormat::F64p,
        _ => return Err(Error::container(format!("unknown sample format tag {tag}"))),
    })
}

/// Demuxer for the `RAWC` container.
pub struct RawDemuxer {
    reader: BufReader<File>,
    streams: Vec<StreamInfo>,
    data_start: u64,
    at_end: bool,
}

impl RawDemuxer {
    /// Open and parse the container header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::container(format!(
                "{}: not a RAWC container",
                path.display()
            )));
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(Error::container(format!(
                "unsupported container version {version}"
            )));
        }
        let stream_count = reader.read_u16::<LittleEndian>()? as usize;

        let mut streams = Vec::with_capacity(stream_count);
        for index in 0..stream_count {
            streams.push(Self::read_stream_entry(&mut reader, index)?);
        }
        let data_start = reader.stream_position()?;
        debug!(
            path = %path.display(),
            streams = stream_count,
            "opened raw container"
        );
        Ok(Self {
            reader,
            streams,
            data_start,
            at_end: false,
        })
    }

    fn read_stream_entry(reader: &mut BufReader<File>, index: usize) -> Result<StreamInfo> {
        let kind = reader.read_u8()?;
        let tb_num = reader.read_i64::<LittleEndian>()?;
        let tb_den = reader.read_i64::<LittleEndian>()?;
        if tb_den == 0 {
            return Err(Error::container("stream has zero time base"));
        }
        let time_base = MediaTime::new(tb_num, tb_den);

        match kind {
            KIND_VIDEO => {
                let width = reader.read_u32::<LittleEndian>()?;
                let height = reader.read_u32::<LittleEndian>()?;
                let pixel_format = pixel_format_from_tag(reader.read_u8()?)?;
                let fr_num = reader.read_i64::<LittleEndian>()?;
                let fr_den = reader.read_i64::<LittleEndian>()?;
                let frame_rate = (fr_den != 0).then(|| MediaTime::new(fr_num, fr_den));
                Ok(StreamInfo {
                    index,
                    kind: MediaKind::Video,
                    time_base,
                    avg_frame_rate: frame_rate,
                    parameters: CodecParameters {
                        codec: CodecId::RawVideo,
                        extra_data: None,
                        video: Some(VideoParameters {
                            width,
                            height,
                            pixel_format,
                            frame_rate,
                        }),
                        audio: None,
                    },
                })
            }
            KIND_AUDIO => {
                let sample_rate = reader.read_u32::<LittleEndian>()?;
                let channels = reader.read_u32::<LittleEndian>()?;
                let sample_format = sample_format_from_tag(reader.read_u8()?)?;
                Ok(StreamInfo {
                    index,
                    kind: MediaKind::Audio,
                    time_base,
                    avg_frame_rate: None,
                    parameters: CodecParameters {
                        codec: CodecId::Pcm,
                        extra_data: None,
                        video: None,
                        audio: Some(AudioParameters {
                            sample_rate,
                            channels,
                            sample_format,
                        }),
                    },
                })
            }
            other => Err(Error::container(format!("unknown stream kind {other}"))),
        }
    }

    /// Read one record at the current position. `Ok(None)` means the
    /// trailer was reached.
    fn read_record(&mut self) -> Result<Option<OwnedPacket>> {
        let tag = match self.reader.read_u8() {
            Ok(tag) => tag,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::container("truncated container: missing trailer"));
            }
            Err(e) => return Err(e.into()),
        };
        match tag {
            TAG_TRAILER => Ok(None),
            TAG_PACKET => {
                let stream_index = self.reader.read_u32::<LittleEndian>()?;
                let pts = self.reader.read_i64::<LittleEndian>()?;
                let dts = self.reader.read_i64::<LittleEndian>()?;
                let duration = self.reader.read_i64::<LittleEndian>()?;
                let flags = self.reader.read_u32::<LittleEndian>()?;
                let len = self.reader.read_u32::<LittleEndian>()? as usize;
                let mut data = vec![0u8; len];
                self.reader.read_exact(&mut data)?;

                let time_base = self
                    .streams
                    .get(stream_index as usize)
                    .map(|s| s.time_base)
                    .ok_or_else(|| {
                        Error::container(format!("packet for unknown stream {stream_index}"))
                    })?;
                let mut packet = Packet::new(data)
                    .with_timestamps(pts, dts, time_base)
                    .with_stream_index(stream_index)
                    .with_flags(PacketFlags::from_bits_truncate(flags));
                packet.duration = duration;
                Ok(Some(packet))
            }
            other => Err(Error::container(format!("unknown record tag {other}"))),
        }
    }

    /// Skip the payload of the packet record whose header was consumed,
    /// returning its (stream, pts).
    fn skim_packet(&mut self) -> Result<(u32, i64)> {
        let stream_index = self.reader.read_u32::<LittleEndian>()?;
        let pts = self.reader.read_i64::<LittleEndian>()?;
        let _dts = self.reader.read_i64::<LittleEndian>()?;
        let _duration = self.reader.read_i64::<LittleEndian>()?;
        let _flags = self.reader.read_u32::<LittleEndian>()?;
        let len = self.reader.read_u32::<LittleEndian>()? as i64;
        self.reader.seek(SeekFrom::Current(len))?;
        Ok((stream_index, pts))
    }
}

impl Demuxer for RawDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<OwnedPacket>> {
        if self.at_end {
            return Ok(None);
        }
        let record = self.read_record()?;
        if record.is_none() {
            self.at_end = true;
        }
        Ok(record)
    }

    fn seek(&mut self, stream_index: usize, ticks: i64, backward: bool) -> Result<()> {
        if stream_index >= self.streams.len() {
            return Err(Error::invalid_param(format!(
                "no stream {stream_index} to seek"
            )));
        }
        // Every raw packet is a sync point, so scan from the start and
        // land on the best candidate for the target stream.
        self.reader.seek(SeekFrom::Start(self.data_start))?;
        let mut candidate: Option<u64> = None;
        loop {
            let offset = self.reader.stream_position()?;
            let tag = match self.reader.read_u8() {
                Ok(tag) => tag,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            if tag != TAG_PACKET {
                break;
            }
            let (stream, pts) = self.skim_packet()?;
            if stream as usize != stream_index {
                continue;
            }
            if backward {
                if pts <= ticks {
                    candidate = Some(offset);
                } else {
                    break;
                }
            } else if pts >= ticks {
                candidate = Some(offset);
                break;
            }
        }
        let target = candidate.unwrap_or(self.data_start);
        self.reader.seek(SeekFrom::Start(target))?;
        self.at_end = false;
        debug!(stream = stream_index, ticks, backward, "seek");
        Ok(())
    }
}

#[derive(Default)]
struct MuxStream {
    kind: Option<MediaKind>,
    parameters: Option<CodecParameters>,
    time_base: Option<MediaTime>,
    queued: usize,
    finished: bool,
}

/// Muxer for the `RAWC` container.
///
/// Packets are interleaved by decode timestamp: a packet is committed to
/// disk once every stream has at least one later packet queued, so the
/// stored order is globally monotonic in seconds.
pub struct RawMuxer {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    streams: Vec<MuxStream>,
    pending: VecDeque<OwnedPacket>,
    header_written: bool,
}

impl RawMuxer {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: None,
            streams: Vec::new(),
            pending: VecDeque::new(),
            header_written: false,
        }
    }

    fn write_packet_record(writer: &mut BufWriter<File>, packet: &Packet<'_>) -> Result<()> {
        writer.write_u8(TAG_PACKET)?;
        writer.write_u32::<LittleEndian>(packet.stream_index)?;
        writer.write_i64::<LittleEndian>(packet.pts)?;
        writer.write_i64::<LittleEndian>(packet.dts)?;
        writer.write_i64::<LittleEndian>(packet.duration)?;
        writer.write_u32::<LittleEndian>(packet.flags.bits())?;
        writer.write_u32::<LittleEndian>(packet.data().len() as u32)?;
        writer.write_all(packet.data())?;
        Ok(())
    }

    /// Pop the queued packet with the earliest decode time, measured in
    /// seconds so streams with different time bases compare correctly.
    fn pop_earliest(&mut self) -> Option<OwnedPacket> {
        let best = self
            .pending
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let at = MediaTime::new(a.dts, 1) * a.time_base;
                let bt = MediaTime::new(b.dts, 1) * b.time_base;
                at.partial_cmp(&bt).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)?;
        let packet = self.pending.remove(best)?;
        self.streams[packet.stream_index as usize].queued -= 1;
        Some(packet)
    }

    /// Commit packets while every unfinished stream has something
    /// queued.
    fn drain_ready(&mut self) -> Result<()> {
        loop {
            let all_covered = self
                .streams
                .iter()
                .all(|s| s.finished || s.queued > 0);
            if !all_covered || self.pending.is_empty() {
                return Ok(());
            }
            let packet = match self.pop_earliest() {
                Some(p) => p,
                None => return Ok(()),
            };
            let writer = self
                .writer
                .as_mut()
                .ok_or_else(|| Error::container("output not open"))?;
            Self::write_packet_record(writer, &packet)?;
        }
    }
}

impl Muxer for RawMuxer {
    fn default_codec(&self, kind: MediaKind) -> Option<CodecId> {
        match kind {
            MediaKind::Video => Some(CodecId::RawVideo),
            MediaKind::Audio => Some(CodecId::Pcm),
        }
    }

    fn new_stream(&mut self, kind: MediaKind) -> Result<usize> {
        if self.header_written {
            return Err(Error::container("cannot add stream after header"));
        }
        self.streams.push(MuxStream {
            kind: Some(kind),
            ..Default::default()
        });
        Ok(self.streams.len() - 1)
    }

    fn set_stream_parameters(
        &mut self,
        index: usize,
        parameters: &CodecParameters,
        time_base: MediaTime,
    ) -> Result<()> {
        let stream = self
            .streams
            .get_mut(index)
            .ok_or_else(|| Error::invalid_param(format!("no stream {index}")))?;
        stream.parameters = Some(parameters.clone());
        stream.time_base = Some(time_base);
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<MediaTime> {
        self.streams.get(index).and_then(|s| s.time_base)
    }

    fn open_output(&mut self) -> Result<()> {
        let file = File::create(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        debug!(path = %self.path.display(), "opened raw output");
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::container("output not open"))?;
        writer.write_all(MAGIC)?;
        writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u16::<LittleEndian>(self.streams.len() as u16)?;

        for (index, stream) in self.streams.iter().enumerate() {
            let parameters = stream.parameters.as_ref().ok_or_else(|| {
                Error::container(format!("stream {index} has no parameters"))
            })?;
            let time_base = stream
                .time_base
                .ok_or_else(|| Error::container(format!("stream {index} has no time base")))?;
            match stream.kind {
                Some(MediaKind::Video) => {
                    let video = parameters.video.as_ref().ok_or_else(|| {
                        Error::container(format!("video stream {index} missing parameters"))
                    })?;
                    writer.write_u8(KIND_VIDEO)?;
                    writer.write_i64::<LittleEndian>(time_base.value())?;
                    writer.write_i64::<LittleEndian>(time_base.scale())?;
                    writer.write_u32::<LittleEndian>(video.width)?;
                    writer.write_u32::<LittleEndian>(video.height)?;
                    writer.write_u8(pixel_format_tag(video.pixel_format))?;
                    let (fr_num, fr_den) = match video.frame_rate {
                        Some(fr) => (fr.value(), fr.scale()),
                        None => (0, 0),
                    };
                    writer.write_i64::<LittleEndian>(fr_num)?;
                    writer.write_i64::<LittleEndian>(fr_den)?;
                }
                Some(MediaKind::Audio) => {
                    let audio = parameters.audio.as_ref().ok_or_else(|| {
                        Error::container(format!("audio stream {index} missing parameters"))
                    })?;
                    writer.write_u8(KIND_AUDIO)?;
                    writer.write_i64::<LittleEndian>(time_base.value())?;
                    writer.write_i64::<LittleEndian>(time_base.scale())?;
                    writer.write_u32::<LittleEndian>(audio.sample_rate)?;
                    writer.write_u32::<LittleEndian>(audio.channels)?;
                    writer.write_u8(sample_format_tag(audio.sample_format))?;
                }
                None => return Err(Error::container(format!("stream {index} has no kind"))),
            }
        }
        self.header_written = true;
        Ok(())
    }

    fn write_interleaved(&mut self, packet: &Packet<'_>) -> Result<()> {
        if !self.header_written {
            return Err(Error::container("header not written"));
        }
        let index = packet.stream_index as usize;
        let stream = self
            .streams
            .get_mut(index)
            .ok_or_else(|| Error::invalid_param(format!("no stream {index}")))?;
        stream.queued += 1;
        self.pending.push_back(packet.clone().into_owned());
        self.drain_ready()
    }

    fn write_trailer(&mut self) -> Result<()> {
        for stream in &mut self.streams {
            stream.finished = true;
        }
        while !self.pending.is_empty() {
            let packet = match self.pop_earliest() {
                Some(p) => p,
                None => break,
            };
            let writer = self
                .writer
                .as_mut()
                .ok_or_else(|| Error::container("output not open"))?;
            Self::write_packet_record(writer, &packet)?;
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::container("output not open"))?;
        writer.write_u8(TAG_TRAILER)?;
        writer.flush()?;
        Ok(())
    }
}

/// Passthrough video decoder: each packet holds one frame's planes.
#[derive(Default)]
pub struct RawVideoDecoder {
    parameters: Option<VideoParameters>,
    opened: bool,
    pending: Option<DecodedFrame>,
    draining: bool,
}

impl RawVideoDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for RawVideoDecoder {
    fn configure(&mut self, parameters: &CodecParameters) -> Result<()> {
        let video = parameters
            .video
            .as_ref()
            .ok_or_else(|| Error::invalid_param("video decoder given non-video parameters"))?;
        self.parameters = Some(video.clone());
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.parameters.is_none() {
            return Err(Error::engine("decoder opened before configure"));
        }
        self.opened = true;
        Ok(())
    }

    fn send_packet(&mut self, packet: Option<&Packet<'_>>) -> Result<()> {
        if !self.opened {
            return Err(Error::engine("decoder not open"));
        }
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        if self.pending.is_some() {
            return Err(Error::engine("decoder output not drained"));
        }
        let video = self
            .parameters
            .as_ref()
            .ok_or_else(|| Error::engine("decoder not configured"))?;
        let mut frame = PixelBuffer::new(video.width, video.height, video.pixel_format);
        if packet.size() != frame.total_size() {
            return Err(Error::engine(format!(
                "raw video packet of {} bytes, expected {}",
                packet.size(),
                frame.total_size()
            )));
        }
        let mut offset = 0;
        for plane in 0..frame.num_planes() {
            let dst = frame.plane_mut(plane).unwrap();
            let len = dst.len();
            dst.copy_from_slice(&packet.data()[offset..offset + len]);
            offset += len;
        }
        self.pending = Some(DecodedFrame {
            content: FrameContent::Video(frame),
            pts: packet.pts,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Receive<DecodedFrame>> {
        match self.pending.take() {
            Some(frame) => Ok(Receive::Ready(frame)),
            None if self.draining => Ok(Receive::Eof),
            None => Ok(Receive::TryAgain),
        }
    }

    fn flush(&mut self) {
        self.pending = None;
        self.draining = false;
    }
}

/// Passthrough PCM decoder.
#[derive(Default)]
pub struct RawPcmDecoder {
    format: Option<AudioFormat>,
    opened: bool,
    pending: Option<DecodedFrame>,
    draining: bool,
}

impl RawPcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for RawPcmDecoder {
    fn configure(&mut self, parameters: &CodecParameters) -> Result<()> {
        let audio = parameters
            .audio
            .as_ref()
            .ok_or_else(|| Error::invalid_param("audio decoder given non-audio parameters"))?;
        self.format = Some(AudioFormat::from_sample_format(
            audio.sample_format,
            audio.sample_rate,
            audio.channels,
        ));
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(Error::engine("decoder opened before configure"));
        }
        self.opened = true;
        Ok(())
    }

    fn send_packet(&mut self, packet: Option<&Packet<'_>>) -> Result<()> {
        if !self.opened {
            return Err(Error::engine("decoder not open"));
        }
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        if self.pending.is_some() {
            return Err(Error::engine("decoder output not drained"));
        }
        let format = self
            .format
            .clone()
            .ok_or_else(|| Error::engine("decoder not configured"))?;
        let frame_bytes =
            format.bytes_per_channel_sample() * format.channels_per_frame as usize;
        if frame_bytes == 0 || packet.size() % frame_bytes != 0 {
            return Err(Error::engine(format!(
                "raw pcm packet of {} bytes is not a whole number of frames",
                packet.size()
            )));
        }
        let frames = packet.size() / frame_bytes;
        let mut chunk = AudioPcmBuffer::new(format.clone(), frames);
        if format.is_non_interleaved() {
            // Payload stores the channel planes back to back.
            let plane = frames * format.bytes_per_channel_sample();
            for ch in 0..format.channels_per_frame as usize {
                chunk
                    .channel_data_mut(ch)
                    .unwrap()
                    .copy_from_slice(&packet.data()[ch * plane..(ch + 1) * plane]);
            }
        } else {
            chunk.channel_data_mut(0).unwrap().copy_from_slice(packet.data());
        }
        self.pending = Some(DecodedFrame {
            content: FrameContent::Audio(chunk),
            pts: packet.pts,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Receive<DecodedFrame>> {
        match self.pending.take() {
            Some(frame) => Ok(Receive::Ready(frame)),
            None if self.draining => Ok(Receive::Eof),
            None => Ok(Receive::TryAgain),
        }
    }

    fn flush(&mut self) {
        self.pending = None;
        self.draining = false;
    }
}

/// Passthrough video encoder: serializes a frame's planes into one
/// keyframe packet.
#[derive(Default)]
pub struct RawVideoEncoder {
    config: Option<VideoEncoderConfig>,
    opened: bool,
    queue: VecDeque<OwnedPacket>,
    draining: bool,
}

impl RawVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameEncoder for RawVideoEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        match config {
            EncoderConfig::Video(video) => {
                if video.width == 0 || video.height == 0 {
                    return Err(Error::invalid_param("zero frame dimensions"));
                }
                self.config = Some(video.clone());
                Ok(())
            }
            EncoderConfig::Audio(_) => {
                Err(Error::invalid_param("video encoder given audio config"))
            }
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.config.is_none() {
            return Err(Error::engine("encoder opened before configure"));
        }
        self.opened = true;
        Ok(())
    }

    fn parameters(&self) -> Result<CodecParameters> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::engine("encoder not configured"))?;
        Ok(CodecParameters {
            codec: CodecId::RawVideo,
            extra_data: None,
            video: Some(VideoParameters {
                width: config.width,
                height: config.height,
                pixel_format: config.pixel_format,
                frame_rate: Some(config.frame_rate),
            }),
            audio: None,
        })
    }

    fn time_base(&self) -> MediaTime {
        self.config
            .as_ref()
            .map(|c| c.time_base)
            .unwrap_or(MediaTime::new(1, 1))
    }

    fn frame_size(&self) -> u32 {
        0
    }

    fn send_frame(&mut self, frame: Option<&DecodedFrame>) -> Result<()> {
        if !self.opened {
            return Err(Error::engine("encoder not open"));
        }
        let Some(frame) = frame else {
            self.draining = true;
            return Ok(());
        };
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::engine("encoder not configured"))?;
        let FrameContent::Video(buffer) = &frame.content else {
            return Err(Error::engine("video encoder given audio frame"));
        };
        if buffer.width() != config.width
            || buffer.height() != config.height
            || buffer.format() != config.pixel_format
        {
            return Err(Error::engine(format!(
                "frame {}x{} {} does not match encoder {}x{} {}",
                buffer.width(),
                buffer.height(),
                buffer.format(),
                config.width,
                config.height,
                config.pixel_format
            )));
        }
        let mut data = Vec::with_capacity(buffer.total_size());
        for plane in buffer.planes() {
            data.extend_from_slice(plane);
        }
        // One frame occupies 1/frame_rate seconds.
        let duration =
            MediaTime::rescale_value(1, config.frame_rate.invert(), config.time_base);
        let mut packet = Packet::new(data)
            .with_timestamps(frame.pts, frame.pts, config.time_base)
            .with_flags(PacketFlags::KEYFRAME);
        packet.duration = duration;
        self.queue.push_back(packet);
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Receive<OwnedPacket>> {
        match self.queue.pop_front() {
            Some(packet) => Ok(Receive::Ready(packet)),
            None if self.draining => Ok(Receive::Eof),
            None => Ok(Receive::TryAgain),
        }
    }
}

/// Passthrough PCM encoder. Imposes no fixed chunk size
/// ([`FrameEncoder::frame_size`] is 0).
#[derive(Default)]
pub struct RawPcmEncoder {
    config: Option<AudioEncoderConfig>,
    opened: bool,
    queue: VecDeque<OwnedPacket>,
    draining: bool,
}

impl RawPcmEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameEncoder for RawPcmEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        match config {
            EncoderConfig::Audio(audio) => {
                if audio.sample_rate == 0 || audio.channels == 0 {
                    return Err(Error::invalid_param("zero sample rate or channel count"));
                }
                self.config = Some(audio.clone());
                Ok(())
            }
            EncoderConfig::Video(_) => {
                Err(Error::invalid_param("audio encoder given video config"))
            }
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.config.is_none() {
            return Err(Error::engine("encoder opened before configure"));
        }
        self.opened = true;
        Ok(())
    }

    fn parameters(&self) -> Result<CodecParameters> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::engine("encoder not configured"))?;
        Ok(CodecParameters {
            codec: CodecId::Pcm,
            extra_data: None,
            video: None,
            audio: Some(AudioParameters {
                sample_rate: config.sample_rate,
                channels: config.channels,
                sample_format: config.sample_format,
            }),
        })
    }

    fn time_base(&self) -> MediaTime {
        self.config
            .as_ref()
            .map(|c| c.time_base)
            .unwrap_or(MediaTime::new(1, 1))
    }

    fn frame_size(&self) -> u32 {
        0
    }

    fn send_frame(&mut self, frame: Option<&DecodedFrame>) -> Result<()> {
        if !self.opened {
            return Err(Error::engine("encoder not open"));
        }
        let Some(frame) = frame else {
            self.draining = true;
            return Ok(());
        };
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::engine("encoder not configured"))?;
        let FrameContent::Audio(chunk) = &frame.content else {
            return Err(Error::engine("audio encoder given video frame"));
        };
        let format = chunk.format();
        if format.sample_rate != config.sample_rate
            || format.channels_per_frame != config.channels
            || format.sample_format()? != config.sample_format
        {
            return Err(Error::engine("chunk format does not match encoder"));
        }
        let mut data = Vec::with_capacity(chunk.total_size());
        for buffer in chunk.buffers() {
            data.extend_from_slice(buffer);
        }
        let duration = MediaTime::rescale_value(
            chunk.frames() as i64,
            MediaTime::new(1, config.sample_rate as i64),
            config.time_base,
        );
        let mut packet = Packet::new(data)
            .with_timestamps(frame.pts, frame.pts, config.time_base)
            .with_flags(PacketFlags::KEYFRAME);
        packet.duration = duration;
        self.queue.push_back(packet);
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Receive<OwnedPacket>> {
        match self.queue.pop_front() {
            Some(packet) => Ok(Receive::Ready(packet)),
            None if self.draining => Ok(Receive::Eof),
            None => Ok(Receive::TryAgain),
        }
    }
}

/// The built-in engine: `RAWC` containers, passthrough codecs, CPU
/// conversion contexts.
#[derive(Default)]
pub struct RawEngine;

impl RawEngine {
    pub fn new() -> Self {
        Self
    }
}

impl MediaEngine for RawEngine {
    fn open_input(&self, path: &Path) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(RawDemuxer::open(path)?))
    }

    fn find_decoder(&self, codec: &CodecId) -> Option<Box<dyn FrameDecoder>> {
        match codec {
            CodecId::RawVideo => Some(Box::new(RawVideoDecoder::new())),
            CodecId::Pcm => Some(Box::new(RawPcmDecoder::new())),
            _ => None,
        }
    }

    fn alloc_output(&self, path: &Path) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(RawMuxer::new(path)))
    }

    fn find_encoder(&self, codec: &CodecId) -> Option<Box<dyn FrameEncoder>> {
        match codec {
            CodecId::RawVideo => Some(Box::new(RawVideoEncoder::new())),
            CodecId::Pcm => Some(Box::new(RawPcmEncoder::new())),
            _ => None,
        }
    }

    fn pixel_converter(&self, src: PixelSpec, dst: PixelSpec) -> Result<Box<dyn PixelConverter>> {
        Ok(Box::new(CpuPixelConverter::new(src, dst)))
    }

    fn resampler(&self, src: &AudioFormat, dst: &AudioFormat) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(LinearResampler::new(src, dst)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn video_config() -> VideoEncoderConfig {
        VideoEncoderConfig {
            width: 4,
            height: 2,
            pixel_format: PixelFormat::Rgba8,
            frame_rate: MediaTime::new(30, 1),
            time_base: MediaTime::new(1, 600),
            bit_rate: 0,
            gop_size: 12,
            max_b_frames: 0,
            mb_decision: 0,
        }
    }

    fn encode_one_frame(pts: i64) -> OwnedPacket {
        let mut enc = RawVideoEncoder::new();
        enc.configure(&EncoderConfig::Video(video_config())).unwrap();
        enc.open().unwrap();
        let frame = DecodedFrame {
            content: FrameContent::Video(PixelBuffer::new(4, 2, PixelFormat::Rgba8)),
            pts,
        };
        enc.send_frame(Some(&frame)).unwrap();
        match enc.receive_packet().unwrap() {
            Receive::Ready(p) => p,
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn test_video_encode_decode_roundtrip() {
        let packet = encode_one_frame(600);
        assert_eq!(packet.pts, 600);
        assert!(packet.is_keyframe());
        // 1/30 s in 1/600 ticks.
        assert_eq!(packet.duration, 20);

        let mut dec = RawVideoDecoder::new();
        dec.configure(&CodecParameters {
            codec: CodecId::RawVideo,
            extra_data: None,
            video: Some(VideoParameters {
                width: 4,
                height: 2,
                pixel_format: PixelFormat::Rgba8,
                frame_rate: None,
            }),
            audio: None,
        })
        .unwrap();
        dec.open().unwrap();
        dec.send_packet(Some(&packet)).unwrap();
        match dec.receive_frame().unwrap() {
            Receive::Ready(frame) => {
                assert_eq!(frame.pts, 600);
                match frame.content {
                    FrameContent::Video(buf) => {
                        assert_eq!(buf.width(), 4);
                        assert_eq!(buf.format(), PixelFormat::Rgba8);
                    }
                    FrameContent::Audio(_) => panic!("expected video"),
                }
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decoder_drain_protocol() {
        let mut dec = RawVideoDecoder::new();
        dec.configure(&CodecParameters {
            codec: CodecId::RawVideo,
            extra_data: None,
            video: Some(VideoParameters {
                width: 4,
                height: 2,
                pixel_format: PixelFormat::Rgba8,
                frame_rate: None,
            }),
            audio: None,
        })
        .unwrap();
        dec.open().unwrap();
        assert!(matches!(dec.receive_frame().unwrap(), Receive::TryAgain));
        dec.send_packet(None).unwrap();
        assert!(matches!(dec.receive_frame().unwrap(), Receive::Eof));
    }

    #[test]
    fn test_container_roundtrip_with_interleaving() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.rawc");

        let mut muxer = RawMuxer::new(&path);
        let vs = muxer.new_stream(MediaKind::Video).unwrap();
        let as_ = muxer.new_stream(MediaKind::Audio).unwrap();
        muxer
            .set_stream_parameters(
                vs,
                &CodecParameters {
                    codec: CodecId::RawVideo,
                    extra_data: None,
                    video: Some(VideoParameters {
                        width: 4,
                        height: 2,
                        pixel_format: PixelFormat::Rgba8,
                        frame_rate: Some(MediaTime::new(30, 1)),
                    }),
                    audio: None,
                },
                MediaTime::new(1, 600),
            )
            .unwrap();
        muxer
            .set_stream_parameters(
                as_,
                &CodecParameters {
                    codec: CodecId::Pcm,
                    extra_data: None,
                    video: None,
                    audio: Some(AudioParameters {
                        sample_rate: 48000,
                        channels: 1,
                        sample_format: SampleFormat::S16,
                    }),
                },
                MediaTime::new(1, 48000),
            )
            .unwrap();
        muxer.open_output().unwrap();
        muxer.write_header().unwrap();

        // Audio at 0.5s, video at 0s and 1s. Interleave must order them
        // by time across the two time bases.
        let video0 = Packet::new(vec![0u8; 32])
            .with_timestamps(0, 0, MediaTime::new(1, 600))
            .with_stream_index(vs as u32)
            .with_flags(PacketFlags::KEYFRAME);
        let video1 = Packet::new(vec![1u8; 32])
            .with_timestamps(600, 600, MediaTime::new(1, 600))
            .with_stream_index(vs as u32)
            .with_flags(PacketFlags::KEYFRAME);
        let audio = Packet::new(vec![2u8; 4])
            .with_timestamps(24000, 24000, MediaTime::new(1, 48000))
            .with_stream_index(as_ as u32)
            .with_flags(PacketFlags::KEYFRAME);
        muxer.write_interleaved(&video0).unwrap();
        muxer.write_interleaved(&video1).unwrap();
        muxer.write_interleaved(&audio).unwrap();
        muxer.write_trailer().unwrap();

        let mut demuxer = RawDemuxer::open(&path).unwrap();
        assert_eq!(demuxer.streams().len(), 2);
        assert_eq!(demuxer.streams()[0].kind, MediaKind::Video);
        assert_eq!(demuxer.streams()[1].time_base, MediaTime::new(1, 48000));

        let order: Vec<(u32, i64)> = std::iter::from_fn(|| {
            demuxer.read_packet().unwrap().map(|p| (p.stream_index, p.pts))
        })
        .collect();
        assert_eq!(
            order,
            vec![(0, 0), (1, 24000), (0, 600)],
            "packets must be stored in global time order"
        );
        assert!(demuxer.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_demuxer_seek_backward() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seek.rawc");

        let mut muxer = RawMuxer::new(&path);
        let vs = muxer.new_stream(MediaKind::Video).unwrap();
        muxer
            .set_stream_parameters(
                vs,
                &CodecParameters {
                    codec: CodecId::RawVideo,
                    extra_data: None,
                    video: Some(VideoParameters {
                        width: 1,
                        height: 1,
                        pixel_format: PixelFormat::Gray8,
                        frame_rate: Some(MediaTime::new(10, 1)),
                    }),
                    audio: None,
                },
                MediaTime::new(1, 10),
            )
            .unwrap();
        muxer.open_output().unwrap();
        muxer.write_header().unwrap();
        for pts in 0..10 {
            let packet = Packet::new(vec![pts as u8])
                .with_timestamps(pts, pts, MediaTime::new(1, 10))
                .with_stream_index(0)
                .with_flags(PacketFlags::KEYFRAME);
            muxer.write_interleaved(&packet).unwrap();
        }
        muxer.write_trailer().unwrap();

        let mut demuxer = RawDemuxer::open(&path).unwrap();
        // Backward seek lands at or before the target.
        demuxer.seek(0, 7, true).unwrap();
        let p = demuxer.read_packet().unwrap().unwrap();
        assert_eq!(p.pts, 7);

        // Seeking past the end with backward lands on the last packet.
        demuxer.seek(0, 100, true).unwrap();
        let p = demuxer.read_packet().unwrap().unwrap();
        assert_eq!(p.pts, 9);

        // Re-reading after a seek reaches the trailer cleanly.
        assert!(demuxer.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_truncated_container_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trunc.rawc");

        let mut muxer = RawMuxer::new(&path);
        let vs = muxer.new_stream(MediaKind::Video).unwrap();
        muxer
            .set_stream_parameters(
                vs,
                &CodecParameters {
                    codec: CodecId::RawVideo,
                    extra_data: None,
                    video: Some(VideoParameters {
                        width: 1,
                        height: 1,
                        pixel_format: PixelFormat::Gray8,
                        frame_rate: None,
                    }),
                    audio: None,
                },
                MediaTime::new(1, 10),
            )
            .unwrap();
        muxer.open_output().unwrap();
        muxer.write_header().unwrap();
        // Dropped without write_trailer.
        drop(muxer);

        let mut demuxer = RawDemuxer::open(&path).unwrap();
        assert!(demuxer.read_packet().is_err());
    }

    #[test]
    fn test_pcm_roundtrip_planar() {
        let format = AudioFormat::from_sample_format(SampleFormat::F32p, 48000, 2);
        let mut chunk = AudioPcmBuffer::new(format, 16);
        chunk.channel_data_mut(1).unwrap()[0] = 0x42;

        let mut enc = RawPcmEncoder::new();
        enc.configure(&EncoderConfig::Audio(AudioEncoderConfig {
            sample_rate: 48000,
            channels: 2,
            sample_format: SampleFormat::F32p,
            bit_rate: 128_000,
            time_base: MediaTime::new(1, 48000),
        }))
        .unwrap();
        enc.open().unwrap();
        enc.send_frame(Some(&DecodedFrame {
            content: FrameContent::Audio(chunk),
            pts: 1024,
        }))
        .unwrap();
        let packet = match enc.receive_packet().unwrap() {
            Receive::Ready(p) => p,
            other => panic!("expected packet, got {other:?}"),
        };
        assert_eq!(packet.pts, 1024);
        assert_eq!(packet.duration, 16);

        let mut dec = RawPcmDecoder::new();
        dec.configure(&enc.parameters().unwrap()).unwrap();
        dec.open().unwrap();
        dec.send_packet(Some(&packet)).unwrap();
        match dec.receive_frame().unwrap() {
            Receive::Ready(frame) => match frame.content {
                FrameContent::Audio(buf) => {
                    assert_eq!(buf.frames(), 16);
                    assert_eq!(buf.channel_data(1).unwrap()[0], 0x42);
                }
                FrameContent::Video(_) => panic!("expected audio"),
            },
            other => panic!("expected frame, got {other:?}"),
        }
    }
}
