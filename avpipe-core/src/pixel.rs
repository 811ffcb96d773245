//! Pixel formats and decoded video frame buffers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pixel format of a decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed RGBA, 32bpp.
    Rgba8,
    /// Packed BGRA, 32bpp.
    Bgra8,
    /// Packed RGB 3:3:2, 8bpp.
    Rgb8,
    /// Packed BGR 2:3:3, 8bpp.
    Bgr8,
    /// Planar YUV 4:2:0, 12bpp.
    Yuv420p,
    /// Grayscale, 8bpp.
    Gray8,
}

impl PixelFormat {
    /// Number of planes for this format.
    pub fn num_planes(&self) -> usize {
        match self {
            Self::Yuv420p => 3,
            _ => 1,
        }
    }

    /// Check if this is a planar format.
    pub fn is_planar(&self) -> bool {
        matches!(self, Self::Yuv420p)
    }

    /// Bytes per pixel of the packed plane, for packed formats.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Rgba8 | Self::Bgra8 => Some(4),
            Self::Rgb8 | Self::Bgr8 | Self::Gray8 => Some(1),
            Self::Yuv420p => None,
        }
    }

    /// Size in bytes of one plane for the given frame dimensions.
    pub fn plane_size(&self, plane: usize, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::Yuv420p => {
                if plane == 0 {
                    w * h
                } else {
                    w.div_ceil(2) * h.div_ceil(2)
                }
            }
            Self::Rgba8 | Self::Bgra8 => w * h * 4,
            Self::Rgb8 | Self::Bgr8 | Self::Gray8 => w * h,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgba8 => write!(f, "rgba8"),
            Self::Bgra8 => write!(f, "bgra8"),
            Self::Rgb8 => write!(f, "rgb8"),
            Self::Bgr8 => write!(f, "bgr8"),
            Self::Yuv420p => write!(f, "yuv420p"),
            Self::Gray8 => write!(f, "gray8"),
        }
    }
}

/// One decoded video frame: dimensions, format, and per-plane storage.
///
/// The buffer is exclusively owned by whichever component holds it and
/// is only mutated through that owner.
#[derive(Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Vec<u8>>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer for the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let planes = (0..format.num_planes())
            .map(|p| vec![0u8; format.plane_size(p, width, height)])
            .collect();
        Self {
            width,
            height,
            format,
            planes,
        }
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Number of planes.
    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// A plane's data.
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(|p| p.as_slice())
    }

    /// Mutable access to a plane's data.
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.planes.get_mut(index).map(|p| p.as_mut_slice())
    }

    /// All planes.
    pub fn planes(&self) -> &[Vec<u8>] {
        &self.planes
    }

    /// Total size of all planes in bytes.
    pub fn total_size(&self) -> usize {
        self.planes.iter().map(|p| p.len()).sum()
    }

    /// Fill all planes with a value.
    pub fn fill(&mut self, value: u8) {
        for plane in &mut self.planes {
            plane.fill(value);
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("planes", &self.planes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_counts() {
        assert_eq!(PixelFormat::Yuv420p.num_planes(), 3);
        assert_eq!(PixelFormat::Rgba8.num_planes(), 1);
        assert_eq!(PixelFormat::Gray8.num_planes(), 1);
    }

    #[test]
    fn test_rgba_layout() {
        let buf = PixelBuffer::new(320, 240, PixelFormat::Rgba8);
        assert_eq!(buf.num_planes(), 1);
        assert_eq!(buf.plane(0).unwrap().len(), 320 * 240 * 4);
        assert!(buf.plane(1).is_none());
    }

    #[test]
    fn test_yuv420p_layout() {
        let buf = PixelBuffer::new(320, 240, PixelFormat::Yuv420p);
        assert_eq!(buf.num_planes(), 3);
        assert_eq!(buf.plane(0).unwrap().len(), 320 * 240);
        assert_eq!(buf.plane(1).unwrap().len(), 160 * 120);
        assert_eq!(buf.plane(2).unwrap().len(), 160 * 120);
    }

    #[test]
    fn test_yuv420p_odd_dimensions() {
        let buf = PixelBuffer::new(3, 3, PixelFormat::Yuv420p);
        assert_eq!(buf.plane(0).unwrap().len(), 9);
        assert_eq!(buf.plane(1).unwrap().len(), 4);
    }

    #[test]
    fn test_rgb8_is_single_byte() {
        let buf = PixelBuffer::new(10, 10, PixelFormat::Rgb8);
        assert_eq!(buf.plane(0).unwrap().len(), 100);
    }
}
