//! End-to-end pipeline tests against the built-in passthrough engine.

use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use avpipe::{AudioStreamDecoder, FileEncoder, VideoEncodeAttribute, VideoStreamDecoder};
use avpipe_core::audio::{AudioFormat, SampleFormat};
use avpipe_core::packet::{Packet, PacketFlags};
use avpipe_core::pixel::PixelFormat;
use avpipe_core::time::MediaTime;
use avpipe_engine::traits::{
    AudioParameters, CodecId, CodecParameters, MediaEngine, MediaKind, Muxer, VideoParameters,
};
use avpipe_engine::{RawEngine, RawMuxer};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 8;
const SAMPLE_RATE: u32 = 48000;
const AUDIO_CHUNK: usize = 1024;
const VIDEO_TB: i64 = 600;
const FRAME_TICKS: i64 = 20; // 30 fps in a 1/600 time base

fn audio_format() -> AudioFormat {
    AudioFormat::from_sample_format(SampleFormat::S16, SAMPLE_RATE, 1)
}

fn video_parameters() -> CodecParameters {
    CodecParameters {
        codec: CodecId::RawVideo,
        extra_data: None,
        video: Some(VideoParameters {
            width: WIDTH,
            height: HEIGHT,
            pixel_format: PixelFormat::Rgba8,
            frame_rate: Some(MediaTime::new(30, 1)),
        }),
        audio: None,
    }
}

fn audio_parameters() -> CodecParameters {
    CodecParameters {
        codec: CodecId::Pcm,
        extra_data: None,
        video: None,
        audio: Some(AudioParameters {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            sample_format: SampleFormat::S16,
        }),
    }
}

/// Write a container with `frames` video frames at 30 fps and `chunks`
/// audio packets of [`AUDIO_CHUNK`] frames each.
fn write_input(path: &Path, frames: usize, chunks: usize) {
    let mut muxer = RawMuxer::new(path);
    let video = muxer.new_stream(MediaKind::Video).unwrap();
    let audio = muxer.new_stream(MediaKind::Audio).unwrap();
    muxer
        .set_stream_parameters(video, &video_parameters(), MediaTime::new(1, VIDEO_TB))
        .unwrap();
    muxer
        .set_stream_parameters(
            audio,
            &audio_parameters(),
            MediaTime::new(1, SAMPLE_RATE as i64),
        )
        .unwrap();
    muxer.open_output().unwrap();
    muxer.write_header().unwrap();

    for i in 0..frames {
        let pts = i as i64 * FRAME_TICKS;
        let payload = vec![i as u8; (WIDTH * HEIGHT * 4) as usize];
        let mut packet = Packet::new(payload)
            .with_timestamps(pts, pts, MediaTime::new(1, VIDEO_TB))
            .with_stream_index(video as u32)
            .with_flags(PacketFlags::KEYFRAME);
        packet.duration = FRAME_TICKS;
        muxer.write_interleaved(&packet).unwrap();
    }
    for i in 0..chunks {
        let pts = (i * AUDIO_CHUNK) as i64;
        let payload = vec![0u8; AUDIO_CHUNK * 2];
        let mut packet = Packet::new(payload)
            .with_timestamps(pts, pts, MediaTime::new(1, SAMPLE_RATE as i64))
            .with_stream_index(audio as u32)
            .with_flags(PacketFlags::KEYFRAME);
        packet.duration = AUDIO_CHUNK as i64;
        muxer.write_interleaved(&packet).unwrap();
    }
    muxer.write_trailer().unwrap();
}

/// Write a container holding only a video stream.
fn write_video_only(path: &Path, frames: usize) {
    let mut muxer = RawMuxer::new(path);
    let video = muxer.new_stream(MediaKind::Video).unwrap();
    muxer
        .set_stream_parameters(video, &video_parameters(), MediaTime::new(1, VIDEO_TB))
        .unwrap();
    muxer.open_output().unwrap();
    muxer.write_header().unwrap();
    for i in 0..frames {
        let pts = i as i64 * FRAME_TICKS;
        let mut packet = Packet::new(vec![0u8; (WIDTH * HEIGHT * 4) as usize])
            .with_timestamps(pts, pts, MediaTime::new(1, VIDEO_TB))
            .with_stream_index(video as u32)
            .with_flags(PacketFlags::KEYFRAME);
        packet.duration = FRAME_TICKS;
        muxer.write_interleaved(&packet).unwrap();
    }
    muxer.write_trailer().unwrap();
}

fn encode_attr() -> VideoEncodeAttribute {
    VideoEncodeAttribute {
        pixel_format: PixelFormat::Rgba8,
        width: WIDTH,
        height: HEIGHT,
        fps: MediaTime::new(30, 1),
        time_base: MediaTime::new(1, VIDEO_TB),
        bit_rate: 2_000_000,
        gop_size: 12,
    }
}

#[test]
fn decoder_yields_exact_frame_timestamps() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rawc");
    write_input(&input, 5, 0);

    let engine = RawEngine::new();
    let mut video = VideoStreamDecoder::open(&engine, &input, PixelFormat::Rgba8).unwrap();
    assert_eq!(video.fps(), MediaTime::new(30, 1));

    let mut timestamps = Vec::new();
    while let Some((frame, pts)) = video.next_frame().unwrap() {
        assert_eq!(frame.width(), WIDTH);
        assert_eq!(frame.height(), HEIGHT);
        timestamps.push(pts);
    }
    assert_eq!(timestamps.len(), 5);
    assert_eq!(timestamps[0], MediaTime::ZERO);
    assert_eq!(timestamps[1], MediaTime::new(1, 30));
    assert_eq!(timestamps[4], MediaTime::new(4, 30));
}

#[test]
fn audio_decoder_reports_ranges_at_output_rate() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rawc");
    write_input(&input, 1, 3);

    let engine = RawEngine::new();
    let mut audio = AudioStreamDecoder::open(&engine, &input, audio_format()).unwrap();

    let mut end = MediaTime::ZERO;
    let mut total_frames = 0usize;
    while let Some((chunk, range)) = audio.next_chunk().unwrap() {
        assert_eq!(range.start, end, "chunks must be contiguous");
        assert_eq!(range.duration(), chunk.duration());
        total_frames += chunk.frames();
        end = range.end;
    }
    assert_eq!(total_frames, 3 * AUDIO_CHUNK);
    assert_eq!(end, MediaTime::new((3 * AUDIO_CHUNK) as i64, SAMPLE_RATE as i64));
}

#[test]
fn open_without_matching_stream_is_unavailable() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("video_only.rawc");
    write_video_only(&input, 2);

    let engine = RawEngine::new();
    assert!(AudioStreamDecoder::open(&engine, &input, audio_format()).is_none());
    assert!(VideoStreamDecoder::open(&engine, &input, PixelFormat::Rgba8).is_some());

    let missing = dir.path().join("does_not_exist.rawc");
    assert!(VideoStreamDecoder::open(&engine, &missing, PixelFormat::Rgba8).is_none());
}

#[test]
fn full_transcode_preserves_geometry_and_duration() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rawc");
    let output = dir.path().join("out.rawc");
    write_input(&input, 6, 4);

    let engine = Arc::new(RawEngine::new());
    let mut video = VideoStreamDecoder::open(engine.as_ref(), &input, PixelFormat::Rgba8).unwrap();
    let mut audio = AudioStreamDecoder::open(engine.as_ref(), &input, audio_format()).unwrap();

    let mut encoder =
        FileEncoder::open(engine.clone(), &output, encode_attr(), audio_format()).unwrap();
    assert_eq!(encoder.audio_frame_size() as usize, AUDIO_CHUNK);

    while let Some((frame, pts)) = video.next_frame().unwrap() {
        encoder.encode_video(&frame, pts).unwrap();
    }
    while let Some((chunk, range)) = audio.next_chunk().unwrap() {
        encoder.encode_audio(&chunk, range.start).unwrap();
    }
    encoder.encode_tail().unwrap();

    // Decode the output and verify it round-trips.
    let mut video_out =
        VideoStreamDecoder::open(engine.as_ref(), &output, PixelFormat::Rgba8).unwrap();
    let mut frames = 0usize;
    let mut last_pts = MediaTime::ZERO;
    while let Some((frame, pts)) = video_out.next_frame().unwrap() {
        assert_eq!(frame.width(), WIDTH);
        assert_eq!(frame.height(), HEIGHT);
        assert_eq!(frame.format(), PixelFormat::Rgba8);
        last_pts = pts;
        frames += 1;
    }
    assert_eq!(frames, 6);
    assert_eq!(last_pts, MediaTime::new(5, 30));

    let mut audio_out =
        AudioStreamDecoder::open(engine.as_ref(), &output, audio_format()).unwrap();
    let mut end = MediaTime::ZERO;
    while let Some((_, range)) = audio_out.next_chunk().unwrap() {
        end = range.end;
    }
    // N chunks of the codec frame size give exactly N * size / rate.
    assert_eq!(end, MediaTime::new((4 * AUDIO_CHUNK) as i64, SAMPLE_RATE as i64));
}

#[test]
fn encode_tail_is_idempotent() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rawc");
    let output = dir.path().join("out.rawc");
    write_input(&input, 2, 0);

    let engine = Arc::new(RawEngine::new());
    let mut video = VideoStreamDecoder::open(engine.as_ref(), &input, PixelFormat::Rgba8).unwrap();
    let mut encoder =
        FileEncoder::open(engine.clone(), &output, encode_attr(), audio_format()).unwrap();
    while let Some((frame, pts)) = video.next_frame().unwrap() {
        encoder.encode_video(&frame, pts).unwrap();
    }
    encoder.encode_tail().unwrap();
    encoder.encode_tail().unwrap();

    // A second tail must not corrupt the file.
    let mut demuxer = engine.open_input(&output).unwrap();
    let mut packets = 0;
    while demuxer.read_packet().unwrap().is_some() {
        packets += 1;
    }
    assert_eq!(packets, 2);
}

#[test]
fn encoding_after_tail_is_rejected() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.rawc");
    let engine = Arc::new(RawEngine::new());
    let mut encoder =
        FileEncoder::open(engine, &output, encode_attr(), audio_format()).unwrap();
    encoder.encode_tail().unwrap();

    let frame = avpipe_core::pixel::PixelBuffer::new(WIDTH, HEIGHT, PixelFormat::Rgba8);
    assert!(encoder.encode_video(&frame, MediaTime::ZERO).is_err());
}

#[test]
fn seek_resumes_at_or_before_target() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rawc");
    write_input(&input, 10, 0);

    let engine = RawEngine::new();
    let mut video = VideoStreamDecoder::open(&engine, &input, PixelFormat::Rgba8).unwrap();

    // Consume everything, then rewind to 0.2 s.
    while video.next_frame().unwrap().is_some() {}
    video.seek(MediaTime::new(1, 5)).unwrap();
    let (_, pts) = video.next_frame().unwrap().unwrap();
    assert_eq!(pts, MediaTime::new(6, 30));

    // Seeking between frame times lands on the earlier frame.
    video.seek(MediaTime::new(5, 60)).unwrap();
    let (_, pts) = video.next_frame().unwrap().unwrap();
    assert_eq!(pts, MediaTime::new(2, 30));
}

#[test]
fn video_is_scaled_to_encoder_dimensions() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rawc");
    let output = dir.path().join("out.rawc");
    write_input(&input, 2, 0);

    let engine = Arc::new(RawEngine::new());
    let mut video = VideoStreamDecoder::open(engine.as_ref(), &input, PixelFormat::Rgba8).unwrap();

    // Output at twice the input size; mismatched frames are scaled.
    let attr = VideoEncodeAttribute {
        width: WIDTH * 2,
        height: HEIGHT * 2,
        ..encode_attr()
    };
    let mut encoder =
        FileEncoder::open(engine.clone(), &output, attr, audio_format()).unwrap();
    while let Some((frame, pts)) = video.next_frame().unwrap() {
        encoder.encode_video(&frame, pts).unwrap();
    }
    encoder.encode_tail().unwrap();

    let mut out = VideoStreamDecoder::open(engine.as_ref(), &output, PixelFormat::Rgba8).unwrap();
    let (frame, _) = out.next_frame().unwrap().unwrap();
    assert_eq!(frame.width(), WIDTH * 2);
    assert_eq!(frame.height(), HEIGHT * 2);
}
