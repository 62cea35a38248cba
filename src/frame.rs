//! Decoded frames and frame sets.
//!
//! A [`VideoFrame`] is one image from one stream, holding the raw pixel
//! buffer exactly as recorded. A [`FrameSet`] groups the frames captured at
//! the same instant across streams, the way the capture pipeline delivers
//! them.

use std::time::Duration;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};

use crate::error::BagFramesError;
use crate::message::ImageMessage;
use crate::stream::{FrameFormat, StreamKind};

/// A single frame from one stream.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Stream the frame belongs to.
    pub kind: StreamKind,
    /// Stream index (infrared imagers are 1 and 2, others 0).
    pub stream_index: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub stride: usize,
    /// Pixel layout of `data`.
    pub format: FrameFormat,
    /// Frame counter reported by the device.
    pub frame_number: u64,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Build a frame from a recorded `sensor_msgs/Image`.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::FrameDecode`] if the encoding is unknown or
    /// the buffer is shorter than `step * height`.
    pub fn from_image_message(
        message: ImageMessage,
        kind: StreamKind,
        stream_index: u32,
    ) -> Result<Self, BagFramesError> {
        let format = FrameFormat::from_ros_encoding(&message.encoding, kind).ok_or_else(|| {
            BagFramesError::FrameDecode(format!("unknown image encoding '{}'", message.encoding))
        })?;
        let stride = message.step as usize;
        let expected = stride * message.height as usize;
        if message.data.len() < expected {
            return Err(BagFramesError::FrameDecode(format!(
                "{kind} frame {} has {} bytes, expected {expected}",
                message.header.seq,
                message.data.len(),
            )));
        }
        if let Some(bpp) = format.bytes_per_pixel() {
            if stride < message.width as usize * bpp {
                return Err(BagFramesError::FrameDecode(format!(
                    "{kind} frame stride {stride} too small for {} pixels of {format}",
                    message.width,
                )));
            }
        }

        let mut data = message.data;
        if message.is_bigendian != 0 && format.is_u16_sample() {
            for pair in data.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }

        Ok(Self {
            kind,
            stream_index,
            width: message.width,
            height: message.height,
            stride,
            format,
            frame_number: u64::from(message.header.seq),
            timestamp: message.header.stamp.as_duration(),
            data,
        })
    }

    /// Copy pixel rows into a tightly packed buffer, dropping row padding.
    pub(crate) fn packed_rows(&self, bytes_per_pixel: usize) -> Vec<u8> {
        let row_len = self.width as usize * bytes_per_pixel;
        if self.stride == row_len {
            return self.data[..row_len * self.height as usize].to_vec();
        }
        let mut buffer = Vec::with_capacity(row_len * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * self.stride;
            buffer.extend_from_slice(&self.data[start..start + row_len]);
        }
        buffer
    }

    /// Read 16-bit little-endian samples (Z16 / Y16).
    pub fn u16_samples(&self) -> Vec<u16> {
        self.packed_rows(2)
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Convert to an image.
    ///
    /// Color formats become RGB(A), 8-bit luma stays 8-bit, 16-bit depth and
    /// infrared become 16-bit luma. YUYV/UYVY are converted to RGB.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::FrameDecode`] for formats that have no image
    /// representation (motion data, compressed or packed raw formats).
    pub fn to_image(&self) -> Result<DynamicImage, BagFramesError> {
        let (width, height) = (self.width, self.height);
        let too_short = || {
            BagFramesError::FrameDecode(format!("{} frame buffer too short", self.kind))
        };

        match self.format {
            FrameFormat::Rgb8 => RgbImage::from_raw(width, height, self.packed_rows(3))
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(too_short),
            FrameFormat::Bgr8 => {
                let mut pixels = self.packed_rows(3);
                for pixel in pixels.chunks_exact_mut(3) {
                    pixel.swap(0, 2);
                }
                RgbImage::from_raw(width, height, pixels)
                    .map(DynamicImage::ImageRgb8)
                    .ok_or_else(too_short)
            }
            FrameFormat::Rgba8 => RgbaImage::from_raw(width, height, self.packed_rows(4))
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(too_short),
            FrameFormat::Bgra8 => {
                let mut pixels = self.packed_rows(4);
                for pixel in pixels.chunks_exact_mut(4) {
                    pixel.swap(0, 2);
                }
                RgbaImage::from_raw(width, height, pixels)
                    .map(DynamicImage::ImageRgba8)
                    .ok_or_else(too_short)
            }
            FrameFormat::Y8 | FrameFormat::Raw8 => {
                GrayImage::from_raw(width, height, self.packed_rows(1))
                    .map(DynamicImage::ImageLuma8)
                    .ok_or_else(too_short)
            }
            format if format.is_u16_sample() => {
                ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, self.u16_samples())
                    .map(DynamicImage::ImageLuma16)
                    .ok_or_else(too_short)
            }
            FrameFormat::Yuyv | FrameFormat::Uyvy => {
                let rgb = yuv422_to_rgb(&self.packed_rows(2), self.format == FrameFormat::Uyvy);
                RgbImage::from_raw(width, height, rgb)
                    .map(DynamicImage::ImageRgb8)
                    .ok_or_else(too_short)
            }
            other => Err(BagFramesError::FrameDecode(format!(
                "format {other} cannot be converted to an image"
            ))),
        }
    }
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// BT.601 limited-range YUV 4:2:2 to packed RGB.
fn yuv422_to_rgb(packed: &[u8], uyvy: bool) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(packed.len() / 2 * 3);
    for macro_pixel in packed.chunks_exact(4) {
        let (y0, u, y1, v) = if uyvy {
            (macro_pixel[1], macro_pixel[0], macro_pixel[3], macro_pixel[2])
        } else {
            (macro_pixel[0], macro_pixel[1], macro_pixel[2], macro_pixel[3])
        };
        let d = i32::from(u) - 128;
        let e = i32::from(v) - 128;
        for y in [y0, y1] {
            let c = i32::from(y) - 16;
            rgb.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }
    rgb
}

/// Frames that belong to the same capture instant, at most one per stream.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    frames: Vec<VideoFrame>,
}

impl FrameSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a frame of this stream is already in the set.
    pub fn contains(&self, kind: StreamKind, stream_index: u32) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.kind == kind && frame.stream_index == stream_index)
    }

    /// Add or replace the frame for its stream.
    pub fn insert(&mut self, frame: VideoFrame) {
        if let Some(existing) = self
            .frames
            .iter_mut()
            .find(|existing| existing.kind == frame.kind && existing.stream_index == frame.stream_index)
        {
            *existing = frame;
        } else {
            self.frames.push(frame);
        }
    }

    /// Number of frames in the set.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if the set holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All frames in the set.
    pub fn frames(&self) -> &[VideoFrame] {
        &self.frames
    }

    /// The first frame of the given kind (lowest stream index).
    pub fn first_of(&self, kind: StreamKind) -> Option<&VideoFrame> {
        self.frames
            .iter()
            .filter(|frame| frame.kind == kind)
            .min_by_key(|frame| frame.stream_index)
    }

    /// The color frame, if present.
    pub fn color_frame(&self) -> Option<&VideoFrame> {
        self.first_of(StreamKind::Color)
    }

    /// The depth frame, if present.
    pub fn depth_frame(&self) -> Option<&VideoFrame> {
        self.first_of(StreamKind::Depth)
    }

    /// The infrared frame with the lowest index, if present.
    pub fn infrared_frame(&self) -> Option<&VideoFrame> {
        self.first_of(StreamKind::Infrared)
    }

    /// Earliest timestamp in the set.
    pub fn timestamp(&self) -> Option<Duration> {
        self.frames.iter().map(|frame| frame.timestamp).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: StreamKind, index: u32, format: FrameFormat, width: u32, stride: usize, data: Vec<u8>) -> VideoFrame {
        VideoFrame {
            kind,
            stream_index: index,
            width,
            height: (data.len() / stride) as u32,
            stride,
            format,
            frame_number: 0,
            timestamp: Duration::ZERO,
            data,
        }
    }

    #[test]
    fn bgr_frames_become_rgb() {
        let bgr = frame(StreamKind::Color, 0, FrameFormat::Bgr8, 1, 3, vec![1, 2, 3]);
        let image = bgr.to_image().unwrap().to_rgb8();
        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
    }

    #[test]
    fn row_padding_is_dropped() {
        let gray = frame(StreamKind::Infrared, 1, FrameFormat::Y8, 2, 4, vec![1, 2, 0, 0, 3, 4, 0, 0]);
        let image = gray.to_image().unwrap().to_luma8();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.as_raw(), &vec![1, 2, 3, 4]);
    }

    #[test]
    fn depth_frames_become_luma16() {
        let depth = frame(StreamKind::Depth, 0, FrameFormat::Z16, 2, 4, vec![0x10, 0x00, 0xff, 0x01]);
        assert_eq!(depth.u16_samples(), vec![16, 511]);
        assert!(matches!(depth.to_image().unwrap(), DynamicImage::ImageLuma16(_)));
    }

    #[test]
    fn yuyv_gray_converts_to_gray_rgb() {
        let yuyv = frame(StreamKind::Color, 0, FrameFormat::Yuyv, 2, 4, vec![235, 128, 16, 128]);
        let image = yuyv.to_image().unwrap().to_rgb8();
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0]);
    }

    fn image_message(encoding: &str, is_bigendian: u8, data: Vec<u8>) -> ImageMessage {
        ImageMessage {
            header: crate::message::Header::default(),
            height: 1,
            width: 2,
            encoding: encoding.to_string(),
            is_bigendian,
            step: 4,
            data,
        }
    }

    #[test]
    fn big_endian_depth_samples_are_swapped() {
        let message = image_message("mono16", 1, vec![0x01, 0xff, 0x00, 0x10]);
        let depth = VideoFrame::from_image_message(message, StreamKind::Depth, 0).unwrap();
        assert_eq!(depth.format, FrameFormat::Z16);
        assert_eq!(depth.u16_samples(), vec![511, 16]);
    }

    #[test]
    fn big_endian_flag_leaves_packed_yuv_alone() {
        let bytes = vec![235, 128, 16, 128];
        let message = image_message("yuyv", 1, bytes.clone());
        let color = VideoFrame::from_image_message(message, StreamKind::Color, 0).unwrap();
        assert_eq!(color.format, FrameFormat::Yuyv);
        assert_eq!(color.data, bytes);
    }

    #[test]
    fn motion_formats_are_rejected() {
        let motion = frame(StreamKind::Color, 0, FrameFormat::MotionXyz32f, 1, 12, vec![0; 12]);
        assert!(matches!(motion.to_image(), Err(BagFramesError::FrameDecode(_))));
    }

    #[test]
    fn frame_set_accessors() {
        let mut set = FrameSet::new();
        set.insert(frame(StreamKind::Infrared, 2, FrameFormat::Y8, 1, 1, vec![2]));
        set.insert(frame(StreamKind::Infrared, 1, FrameFormat::Y8, 1, 1, vec![1]));
        set.insert(frame(StreamKind::Depth, 0, FrameFormat::Z16, 1, 2, vec![0, 0]));
        assert_eq!(set.len(), 3);
        assert!(set.color_frame().is_none());
        assert!(set.depth_frame().is_some());
        assert_eq!(set.infrared_frame().unwrap().stream_index, 1);
        assert!(set.contains(StreamKind::Infrared, 2));

        set.insert(frame(StreamKind::Depth, 0, FrameFormat::Z16, 1, 2, vec![9, 0]));
        assert_eq!(set.len(), 3);
        assert_eq!(set.depth_frame().unwrap().data, vec![9, 0]);
    }
}
