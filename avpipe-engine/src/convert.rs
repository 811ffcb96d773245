//! CPU-based conversion contexts.
//!
//! [`CpuPixelConverter`] rescales and converts pixel formats through a
//! packed RGBA intermediate: any supported source expands to RGBA, gets
//! nearest-neighbor scaled when the extents differ, then collapses into
//! the destination format. [`LinearResampler`] converts PCM through a
//! normalized f32 intermediate with linear interpolation between source
//! frames.

use byteorder::{ByteOrder, LittleEndian};

use avpipe_core::audio::{AudioFormat, SampleFormat};
use avpipe_core::pixel::{PixelBuffer, PixelFormat};
use avpipe_core::{AudioPcmBuffer, Error, Result};

use crate::traits::{PixelConverter, PixelSpec, Resampler};

/// Software pixel conversion context.
pub struct CpuPixelConverter {
    src: PixelSpec,
    dst: PixelSpec,
}

impl CpuPixelConverter {
    pub fn new(src: PixelSpec, dst: PixelSpec) -> Self {
        Self { src, dst }
    }
}

impl PixelConverter for CpuPixelConverter {
    fn convert(&mut self, src: &PixelBuffer, dst: &mut PixelBuffer) -> Result<()> {
        if PixelSpec::of(src) != self.src {
            return Err(Error::invalid_param(format!(
                "source frame {}x{} {} does not match context",
                src.width(),
                src.height(),
                src.format()
            )));
        }
        if PixelSpec::of(dst) != self.dst {
            return Err(Error::invalid_param(format!(
                "destination frame {}x{} {} does not match context",
                dst.width(),
                dst.height(),
                dst.format()
            )));
        }

        let rgba = to_rgba(src);
        let rgba = if self.src.width != self.dst.width || self.src.height != self.dst.height {
            scale_rgba(
                &rgba,
                self.src.width,
                self.src.height,
                self.dst.width,
                self.dst.height,
            )
        } else {
            rgba
        };
        from_rgba(&rgba, dst);
        Ok(())
    }
}

/// Expand a frame into packed RGBA.
fn to_rgba(src: &PixelBuffer) -> Vec<u8> {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let mut out = vec![0u8; w * h * 4];

    match src.format() {
        PixelFormat::Rgba8 => {
            out.copy_from_slice(src.plane(0).unwrap_or(&[]));
        }
        PixelFormat::Bgra8 => {
            let data = src.plane(0).unwrap_or(&[]);
            for (o, i) in out.chunks_exact_mut(4).zip(data.chunks_exact(4)) {
                o[0] = i[2];
                o[1] = i[1];
                o[2] = i[0];
                o[3] = i[3];
            }
        }
        PixelFormat::Rgb8 => {
            let data = src.plane(0).unwrap_or(&[]);
            for (o, &v) in out.chunks_exact_mut(4).zip(data.iter()) {
                // 3:3:2 packed: RRRGGGBB
                o[0] = expand_bits(v >> 5, 3);
                o[1] = expand_bits((v >> 2) & 0x07, 3);
                o[2] = expand_bits(v & 0x03, 2);
                o[3] = 255;
            }
        }
        PixelFormat::Bgr8 => {
            let data = src.plane(0).unwrap_or(&[]);
            for (o, &v) in out.chunks_exact_mut(4).zip(data.iter()) {
                // 2:3:3 packed: BBGGGRRR
                o[0] = expand_bits(v & 0x07, 3);
                o[1] = expand_bits((v >> 3) & 0x07, 3);
                o[2] = expand_bits(v >> 6, 2);
                o[3] = 255;
            }
        }
        PixelFormat::Gray8 => {
            let data = src.plane(0).unwrap_or(&[]);
            for (o, &v) in out.chunks_exact_mut(4).zip(data.iter()) {
                o[0] = v;
                o[1] = v;
                o[2] = v;
                o[3] = 255;
            }
        }
        PixelFormat::Yuv420p => {
            let yp = src.plane(0).unwrap_or(&[]);
            let up = src.plane(1).unwrap_or(&[]);
            let vp = src.plane(2).unwrap_or(&[]);
            let cw = w.div_ceil(2);
            for row in 0..h {
                for col in 0..w {
                    let y = yp[row * w + col] as i32;
                    let u = up[(row / 2) * cw + col / 2] as i32;
                    let v = vp[(row / 2) * cw + col / 2] as i32;
                    let (r, g, b) = yuv_to_rgb(y, u, v);
                    let o = (row * w + col) * 4;
                    out[o] = r;
                    out[o + 1] = g;
                    out[o + 2] = b;
                    out[o + 3] = 255;
                }
            }
        }
    }
    out
}

/// Collapse packed RGBA into the destination's format.
fn from_rgba(rgba: &[u8], dst: &mut PixelBuffer) {
    let w = dst.width() as usize;
    let h = dst.height() as usize;

    match dst.format() {
        PixelFormat::Rgba8 => {
            dst.plane_mut(0).unwrap_or(&mut []).copy_from_slice(rgba);
        }
        PixelFormat::Bgra8 => {
            let plane = dst.plane_mut(0).unwrap_or(&mut []);
            for (o, i) in plane.chunks_exact_mut(4).zip(rgba.chunks_exact(4)) {
                o[0] = i[2];
                o[1] = i[1];
                o[2] = i[0];
                o[3] = i[3];
            }
        }
        PixelFormat::Rgb8 => {
            let plane = dst.plane_mut(0).unwrap_or(&mut []);
            for (o, i) in plane.iter_mut().zip(rgba.chunks_exact(4)) {
                *o = (i[0] & 0xe0) | ((i[1] >> 3) & 0x1c) | (i[2] >> 6);
            }
        }
        PixelFormat::Bgr8 => {
            let plane = dst.plane_mut(0).unwrap_or(&mut []);
            for (o, i) in plane.iter_mut().zip(rgba.chunks_exact(4)) {
                *o = (i[2] & 0xc0) | ((i[1] >> 2) & 0x38) | (i[0] >> 5);
            }
        }
        PixelFormat::Gray8 => {
            let plane = dst.plane_mut(0).unwrap_or(&mut []);
            for (o, i) in plane.iter_mut().zip(rgba.chunks_exact(4)) {
                *o = rgb_to_luma(i[0] as i32, i[1] as i32, i[2] as i32);
            }
        }
        PixelFormat::Yuv420p => {
            let cw = w.div_ceil(2);
            let ch = h.div_ceil(2);
            // Luma per pixel.
            {
                let yp = dst.plane_mut(0).unwrap_or(&mut []);
                for (o, i) in yp.iter_mut().zip(rgba.chunks_exact(4)) {
                    *o = rgb_to_luma(i[0] as i32, i[1] as i32, i[2] as i32);
                }
            }
            // Chroma averaged over each 2x2 block.
            for crow in 0..ch {
                for ccol in 0..cw {
                    let (mut ru, mut gu, mut bu, mut n) = (0i32, 0i32, 0i32, 0i32);
                    for dy in 0..2usize {
                        for dx in 0..2usize {
                            let row = crow * 2 + dy;
                            let col = ccol * 2 + dx;
                            if row < h && col < w {
                                let p = (row * w + col) * 4;
                                ru += rgba[p] as i32;
                                gu += rgba[p + 1] as i32;
                                bu += rgba[p + 2] as i32;
                                n += 1;
                            }
                        }
                    }
                    let (r, g, b) = (ru / n, gu / n, bu / n);
                    let u = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
                    let v = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
                    if let Some(up) = dst.plane_mut(1) {
                        up[crow * cw + ccol] = u;
                    }
                    if let Some(vp) = dst.plane_mut(2) {
                        vp[crow * cw + ccol] = v;
                    }
                }
            }
        }
    }
}

/// Nearest-neighbor rescale of a packed RGBA image.
fn scale_rgba(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    let (sw, sh, dw, dh) = (sw as usize, sh as usize, dw as usize, dh as usize);
    let mut out = vec![0u8; dw * dh * 4];
    for row in 0..dh {
        let sy = row * sh / dh;
        for col in 0..dw {
            let sx = col * sw / dw;
            let s = (sy * sw + sx) * 4;
            let d = (row * dw + col) * 4;
            out[d..d + 4].copy_from_slice(&src[s..s + 4]);
        }
    }
    out
}

/// Widen an n-bit channel value to 8 bits by bit replication.
fn expand_bits(value: u8, bits: u32) -> u8 {
    match bits {
        2 => value << 6 | value << 4 | value << 2 | value,
        3 => value << 5 | value << 2 | value >> 1,
        _ => value,
    }
}

/// BT.601 integer YUV to RGB.
fn yuv_to_rgb(y: i32, u: i32, v: i32) -> (u8, u8, u8) {
    let c = y - 16;
    let d = u - 128;
    let e = v - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    (
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    )
}

/// BT.601 integer luma.
fn rgb_to_luma(r: i32, g: i32, b: i32) -> u8 {
    ((((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255)) as u8
}

/// Linear-interpolation resampling context.
///
/// Handles sample-format, layout, rate and basic channel-count changes.
/// Mono fans out to every destination channel; any-to-mono averages;
/// other mismatches map channels by index and repeat the last source
/// channel.
pub struct LinearResampler {
    src: AudioFormat,
    dst: AudioFormat,
    src_sample: SampleFormat,
    dst_sample: SampleFormat,
}

impl LinearResampler {
    pub fn new(src: &AudioFormat, dst: &AudioFormat) -> Result<Self> {
        if src.sample_rate == 0 || dst.sample_rate == 0 {
            return Err(Error::invalid_param("zero sample rate"));
        }
        if src.channels_per_frame == 0 || dst.channels_per_frame == 0 {
            return Err(Error::invalid_param("zero channel count"));
        }
        Ok(Self {
            src: src.clone(),
            dst: dst.clone(),
            src_sample: src.sample_format()?,
            dst_sample: dst.sample_format()?,
        })
    }

    /// Decode the source into one normalized f32 vector per channel.
    fn decode(&self, src: &AudioPcmBuffer) -> Vec<Vec<f32>> {
        let channels = self.src.channels_per_frame as usize;
        let frames = src.frames();
        let mut out = vec![vec![0f32; frames]; channels];
        for (ch, samples) in out.iter_mut().enumerate() {
            for (frame, sample) in samples.iter_mut().enumerate() {
                *sample = read_sample(src, self.src_sample, ch, frame);
            }
        }
        out
    }
}

impl Resampler for LinearResampler {
    fn convert(&mut self, src: &AudioPcmBuffer, dst: &mut AudioPcmBuffer) -> Result<()> {
        if src.format() != &self.src {
            return Err(Error::invalid_param(
                "source buffer format does not match context",
            ));
        }
        if dst.format() != &self.dst {
            return Err(Error::invalid_param(
                "destination buffer format does not match context",
            ));
        }
        if src.frames() == 0 {
            dst.silence();
            return Ok(());
        }

        let decoded = self.decode(src);
        let mixed = mix_channels(&decoded, self.dst.channels_per_frame as usize);

        let in_frames = src.frames();
        let out_frames = dst.frames();
        if out_frames == 0 {
            return Ok(());
        }
        // Position advances by the ratio of input to output length so the
        // chunk's duration is preserved at the new rate.
        let step = in_frames as f64 / out_frames as f64;

        for frame in 0..out_frames {
            let pos = frame as f64 * step;
            let i0 = pos as usize;
            let i1 = (i0 + 1).min(in_frames - 1);
            let frac = (pos - i0 as f64) as f32;
            for (ch, samples) in mixed.iter().enumerate() {
                let a = samples[i0.min(in_frames - 1)];
                let b = samples[i1];
                let value = a + (b - a) * frac;
                write_sample(dst, self.dst_sample, ch, frame, value);
            }
        }
        Ok(())
    }
}

/// Adapt a per-channel sample matrix to the requested channel count.
fn mix_channels(src: &[Vec<f32>], channels: usize) -> Vec<Vec<f32>> {
    if src.len() == channels {
        return src.to_vec();
    }
    let frames = src.first().map(|c| c.len()).unwrap_or(0);
    if channels == 1 {
        let mut mono = vec![0f32; frames];
        for channel in src {
            for (acc, &s) in mono.iter_mut().zip(channel.iter()) {
                *acc += s;
            }
        }
        let scale = 1.0 / src.len() as f32;
        for s in &mut mono {
            *s *= scale;
        }
        return vec![mono];
    }
    (0..channels)
        .map(|ch| src[ch.min(src.len() - 1)].clone())
        .collect()
}

/// Read one channel sample as a normalized f32.
fn read_sample(buf: &AudioPcmBuffer, format: SampleFormat, channel: usize, frame: usize) -> f32 {
    let bytes = format.bytes_per_sample();
    let (data, index) = if format.is_planar() {
        match buf.channel_data(channel) {
            Some(d) => (d, frame),
            None => return 0.0,
        }
    } else {
        match buf.channel_data(0) {
            Some(d) => (d, frame * buf.channels() as usize + channel),
            None => return 0.0,
        }
    };
    let off = index * bytes;
    if off + bytes > data.len() {
        return 0.0;
    }
    match format {
        SampleFormat::S16 | SampleFormat::S16p => {
            LittleEndian::read_i16(&data[off..]) as f32 / 32768.0
        }
        SampleFormat::S32 | SampleFormat::S32p => {
            LittleEndian::read_i32(&data[off..]) as f32 / 2_147_483_648.0
        }
        SampleFormat::F32 | SampleFormat::F32p => LittleEndian::read_f32(&data[off..]),
        SampleFormat::F64 | SampleFormat::F64p => LittleEndian::read_f64(&data[off..]) as f32,
    }
}

/// Write one normalized f32 as a channel sample, clamping to range.
fn write_sample(
    buf: &mut AudioPcmBuffer,
    format: SampleFormat,
    channel: usize,
    frame: usize,
    value: f32,
) {
    let bytes = format.bytes_per_sample();
    let channels = buf.channels() as usize;
    let (data, index) = if format.is_planar() {
        match buf.channel_data_mut(channel) {
            Some(d) => (d, frame),
            None => return,
        }
    } else {
        match buf.channel_data_mut(0) {
            Some(d) => (d, frame * channels + channel),
            None => return,
        }
    };
    let off = index * bytes;
    if off + bytes > data.len() {
        return;
    }
    match format {
        SampleFormat::S16 | SampleFormat::S16p => {
            let v = (value.clamp(-1.0, 1.0) * 32767.0) as i16;
            LittleEndian::write_i16(&mut data[off..], v);
        }
        SampleFormat::S32 | SampleFormat::S32p => {
            let v = (value.clamp(-1.0, 1.0) as f64 * 2_147_483_647.0) as i32;
            LittleEndian::write_i32(&mut data[off..], v);
        }
        SampleFormat::F32 | SampleFormat::F32p => {
            LittleEndian::write_f32(&mut data[off..], value);
        }
        SampleFormat::F64 | SampleFormat::F64p => {
            LittleEndian::write_f64(&mut data[off..], value as f64);
        }
    }
}
