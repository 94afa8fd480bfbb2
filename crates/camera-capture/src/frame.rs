//! Video frame types and processing

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};

/// Decoded RGB video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the capture thread started)
    pub timestamp_ns: u64,
    /// Frame sequence number, assigned by the capture thread (1-based)
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Create a frame filled with a single color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = (width * height) as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, 0, 0)
    }

    /// Wrap an RGB image
    pub fn from_rgb_image(image: RgbImage, timestamp_ns: u64, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Copy into an RGB image (None if the buffer does not match the dimensions)
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Check that the buffer length matches width * height * 3
    pub fn is_valid(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Resize frame (triangle filter). Returns None for a malformed buffer.
    pub fn resize(&self, new_width: u32, new_height: u32) -> Option<VideoFrame> {
        if new_width == self.width && new_height == self.height {
            return self.is_valid().then(|| self.clone());
        }

        let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(self.width, self.height, self.data.as_slice())?;
        let resized = imageops::resize(&view, new_width, new_height, FilterType::Triangle);

        Some(VideoFrame::from_rgb_image(resized, self.timestamp_ns, self.sequence))
    }

    /// Mirror the frame left-to-right (selfie view)
    pub fn flip_horizontal(&self) -> VideoFrame {
        let row_bytes = self.width as usize * 3;
        let mut flipped = Vec::with_capacity(self.data.len());

        for row in self.data.chunks(row_bytes.max(1)) {
            for pixel in row.chunks(3).rev() {
                flipped.extend_from_slice(pixel);
            }
        }

        VideoFrame {
            data: flipped,
            ..self.clone_meta()
        }
    }

    /// Mean intensity per channel
    pub fn mean_rgb(&self) -> [f32; 3] {
        let mut sums = [0u64; 3];
        let mut count = 0u64;
        for pixel in self.data.chunks_exact(3) {
            sums[0] += pixel[0] as u64;
            sums[1] += pixel[1] as u64;
            sums[2] += pixel[2] as u64;
            count += 1;
        }
        if count == 0 {
            return [0.0; 3];
        }
        [
            sums[0] as f32 / count as f32,
            sums[1] as f32 / count as f32,
            sums[2] as f32 / count as f32,
        ]
    }

    fn clone_meta(&self) -> VideoFrame {
        VideoFrame {
            data: Vec::new(),
            width: self.width,
            height: self.height,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        }
    }
}
