//! Minimal driver: synthesize a short clip, then transcode it.
//!
//! ```sh
//! cargo run --example transcode_file
//! ```

use std::path::Path;
use std::sync::Arc;

use avpipe::{AudioStreamDecoder, FileEncoder, VideoEncodeAttribute, VideoStreamDecoder};
use avpipe_core::audio::{AudioFormat, SampleFormat};
use avpipe_core::AudioPcmBuffer;
use avpipe_core::packet::{Packet, PacketFlags};
use avpipe_core::pixel::PixelFormat;
use avpipe_core::time::MediaTime;
use avpipe_engine::traits::{
    AudioParameters, CodecId, CodecParameters, MediaKind, Muxer, VideoParameters,
};
use avpipe_engine::{RawEngine, RawMuxer};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;
const SAMPLE_RATE: u32 = 48000;
const CHUNK: usize = 1024;
const SECONDS: usize = 2;

fn synthesize_input(path: &Path) -> avpipe_core::Result<()> {
    let mut muxer = RawMuxer::new(path);
    let video = muxer.new_stream(MediaKind::Video)?;
    let audio = muxer.new_stream(MediaKind::Audio)?;
    muxer.set_stream_parameters(
        video,
        &CodecParameters {
            codec: CodecId::RawVideo,
            extra_data: None,
            video: Some(VideoParameters {
                width: WIDTH,
                height: HEIGHT,
                pixel_format: PixelFormat::Rgba8,
                frame_rate: Some(MediaTime::new(30, 1)),
            }),
            audio: None,
        },
        MediaTime::new(1, 600),
    )?;
    muxer.set_stream_parameters(
        audio,
        &CodecParameters {
            codec: CodecId::Pcm,
            extra_data: None,
            video: None,
            audio: Some(AudioParameters {
                sample_rate: SAMPLE_RATE,
                channels: 1,
                sample_format: SampleFormat::S16,
            }),
        },
        MediaTime::new(1, SAMPLE_RATE as i64),
    )?;
    muxer.open_output()?;
    muxer.write_header()?;

    // Moving gradient video at 30 fps.
    for i in 0..(SECONDS * 30) {
        let mut payload = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
        for (p, px) in payload.chunks_exact_mut(4).enumerate() {
            px[0] = ((p + i * 7) % 256) as u8;
            px[1] = ((p / 3) % 256) as u8;
            px[2] = (i * 4 % 256) as u8;
            px[3] = 255;
        }
        let pts = i as i64 * 20;
        let mut packet = Packet::new(payload)
            .with_timestamps(pts, pts, MediaTime::new(1, 600))
            .with_stream_index(video as u32)
            .with_flags(PacketFlags::KEYFRAME);
        packet.duration = 20;
        muxer.write_interleaved(&packet)?;
    }

    // 440 Hz sine in fixed-size chunks.
    let chunks = SECONDS * SAMPLE_RATE as usize / CHUNK;
    for i in 0..chunks {
        let mut payload = Vec::with_capacity(CHUNK * 2);
        for n in 0..CHUNK {
            let t = (i * CHUNK + n) as f32 / SAMPLE_RATE as f32;
            let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 12000.0) as i16;
            payload.extend_from_slice(&sample.to_le_bytes());
        }
        let pts = (i * CHUNK) as i64;
        let mut packet = Packet::new(payload)
            .with_timestamps(pts, pts, MediaTime::new(1, SAMPLE_RATE as i64))
            .with_stream_index(audio as u32)
            .with_flags(PacketFlags::KEYFRAME);
        packet.duration = CHUNK as i64;
        muxer.write_interleaved(&packet)?;
    }
    muxer.write_trailer()
}

fn main() -> avpipe_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let dir = std::env::temp_dir();
    let input = dir.join("avpipe_demo_in.rawc");
    let output = dir.join("avpipe_demo_out.rawc");
    synthesize_input(&input)?;

    let engine = Arc::new(RawEngine::new());
    let output_audio = AudioFormat::from_sample_format(SampleFormat::S16, SAMPLE_RATE, 1);
    let mut video = VideoStreamDecoder::open(engine.as_ref(), &input, PixelFormat::Rgba8)
        .expect("input has no usable video stream");
    let mut audio = AudioStreamDecoder::open(engine.as_ref(), &input, output_audio.clone())
        .expect("input has no usable audio stream");

    let attr = VideoEncodeAttribute {
        pixel_format: PixelFormat::Rgba8,
        width: video.width() / 2,
        height: video.height() / 2,
        fps: video.fps(),
        time_base: MediaTime::new(1, 600),
        bit_rate: 2_000_000,
        gop_size: 12,
    };
    let mut encoder = FileEncoder::open(engine, &output, attr, output_audio.clone())
        .expect("cannot open output encoder");

    let mut frames = 0usize;
    while let Some((frame, pts)) = video.next_frame()? {
        encoder.encode_video(&frame, pts)?;
        frames += 1;
    }

    // The audio codec wants fixed-size chunks, so pre-buffer the decoded
    // samples and emit whole chunks. A trailing partial chunk is dropped.
    let chunk_frames = encoder.audio_frame_size() as usize;
    let chunk_bytes = chunk_frames * output_audio.bytes_per_channel_sample();
    let mut pending: Vec<u8> = Vec::new();
    let mut emitted: i64 = 0;
    let mut chunks = 0usize;
    while let Some((chunk, _)) = audio.next_chunk()? {
        pending.extend_from_slice(chunk.channel_data(0).expect("interleaved chunk"));
        while pending.len() >= chunk_bytes {
            let rest = pending.split_off(chunk_bytes);
            let mut buf = AudioPcmBuffer::new(output_audio.clone(), chunk_frames);
            buf.channel_data_mut(0)
                .expect("interleaved chunk")
                .copy_from_slice(&pending);
            encoder.encode_audio(&buf, MediaTime::new(emitted, SAMPLE_RATE as i64))?;
            emitted += chunk_frames as i64;
            pending = rest;
            chunks += 1;
        }
    }
    encoder.encode_tail()?;

    println!(
        "transcoded {frames} frames and {chunks} audio chunks into {}",
        output.display()
    );
    Ok(())
}
