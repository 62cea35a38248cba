//! Video encoding: append frames to an MP4 or AVI file.
//!
//! [`VideoWriter`] is a streaming encoder: create it once, push frames with
//! [`write_frame`](VideoWriter::write_frame) as they are produced, then
//! [`finish`](VideoWriter::finish) it. A writer that is dropped without being
//! finished finalizes itself, so the container is always left playable.
//! [`VideoEncoder`] wraps the same machinery for a slice of frames already in
//! memory.
//!
//! # Example
//!
//! ```no_run
//! use bagframes::{BagFramesError, VideoEncoderOptions, VideoWriter};
//! use image::{DynamicImage, RgbImage};
//!
//! let options = VideoEncoderOptions::default().fps(15).resolution(640, 480);
//! let mut writer = VideoWriter::create("out.mp4", &options, 640, 480)?;
//! writer.write_frame(&DynamicImage::ImageRgb8(RgbImage::new(640, 480)))?;
//! writer.finish()?;
//! # Ok::<(), BagFramesError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::encoder::video::Encoder as OpenedVideoEncoder;
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as FfmpegFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Packet, Rational};
use image::DynamicImage;
use image::imageops::FilterType;

use crate::error::BagFramesError;

/// Supported output video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// MPEG-4 Part 2 (`mp4v`), used for `.mp4` output.
    Mpeg4,
    /// Motion JPEG, used for `.avi` output.
    Mjpeg,
}

impl VideoCodec {
    /// Pick the codec for an output file extension (`mp4` or `avi`).
    pub fn for_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "mp4" => Some(VideoCodec::Mpeg4),
            "avi" => Some(VideoCodec::Mjpeg),
            _ => None,
        }
    }

    fn to_codec_id(self) -> Id {
        match self {
            VideoCodec::Mpeg4 => Id::MPEG4,
            VideoCodec::Mjpeg => Id::MJPEG,
        }
    }

    fn input_pixel_format(self) -> Pixel {
        match self {
            VideoCodec::Mpeg4 => Pixel::YUV420P,
            // The MJPEG encoder only takes full-range YUV.
            VideoCodec::Mjpeg => Pixel::YUVJ420P,
        }
    }
}

/// Options for the video encoder.
///
/// Controls the output codec, frame rate, resolution, and bitrate.
#[derive(Debug, Clone)]
pub struct VideoEncoderOptions {
    /// Target frames per second (default: 30).
    pub fps: u32,
    /// Output width. If `None`, inferred from the first frame.
    pub width: Option<u32>,
    /// Output height. If `None`, inferred from the first frame.
    pub height: Option<u32>,
    /// Codec to use. Default is MPEG-4 Part 2.
    pub codec: VideoCodec,
    /// Bitrate in bits per second. If `None`, derived from the resolution.
    pub bitrate: Option<usize>,
}

impl Default for VideoEncoderOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            width: None,
            height: None,
            codec: VideoCodec::Mpeg4,
            bitrate: None,
        }
    }
}

impl VideoEncoderOptions {
    /// Set the frame rate.
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set the output resolution.
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set the codec.
    pub fn codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the target bitrate in bits per second.
    pub fn bitrate(mut self, bitrate: usize) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    /// Bitrate to use for a given resolution: the configured one, or about
    /// 0.15 bits per pixel per frame.
    pub(crate) fn effective_bitrate(&self, width: u32, height: u32) -> usize {
        self.bitrate.unwrap_or_else(|| {
            let pixels_per_second = width as usize * height as usize * self.fps.max(1) as usize;
            (pixels_per_second * 15 / 100).max(400_000)
        })
    }
}

/// A streaming video encoder bound to one output file.
pub struct VideoWriter {
    path: PathBuf,
    output: Output,
    encoder: OpenedVideoEncoder,
    scaler: ScalingContext,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    frames_written: u64,
    finished: bool,
}

impl Debug for VideoWriter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoWriter")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frames_written", &self.frames_written)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl VideoWriter {
    /// Open `path` for writing and set up the encoder.
    ///
    /// The container format is inferred from the file extension.
    ///
    /// # Errors
    ///
    /// - [`BagFramesError::VideoEncodeError`] if the frame rate or size is
    ///   zero, or the codec cannot be found or opened.
    /// - [`BagFramesError::VideoWriteError`] if the output cannot be created.
    pub fn create<P: AsRef<Path>>(
        path: P,
        options: &VideoEncoderOptions,
        width: u32,
        height: u32,
    ) -> Result<Self, BagFramesError> {
        let path = path.as_ref();
        if options.fps == 0 {
            return Err(BagFramesError::VideoEncodeError(
                "frame rate must be greater than zero".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(BagFramesError::VideoEncodeError(format!(
                "invalid output size {width}x{height}"
            )));
        }

        ffmpeg_next::init()?;

        log::info!(
            "Opening video writer {} (codec={:?}, fps={}, {}x{})",
            path.display(),
            options.codec,
            options.fps,
            width,
            height,
        );

        let codec_id = options.codec.to_codec_id();
        let target_pixel = options.codec.input_pixel_format();
        let encoder_time_base = Rational::new(1, options.fps as i32);

        let mut output = ffmpeg_next::format::output(&path)
            .map_err(|e| BagFramesError::VideoWriteError(format!("cannot open output: {e}")))?;

        // Check if we need global header before adding the stream (avoids borrow conflict).
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let encoder_codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            BagFramesError::VideoEncodeError(format!("codec {codec_id:?} not available"))
        })?;

        let mut stream = output
            .add_stream(encoder_codec)
            .map_err(|e| BagFramesError::VideoWriteError(format!("cannot add stream: {e}")))?;
        let stream_index = stream.index();

        let mut encoder = CodecContext::from_parameters(stream.parameters())
            .map_err(|e| {
                BagFramesError::VideoEncodeError(format!("cannot create codec context: {e}"))
            })?
            .encoder()
            .video()
            .map_err(|e| {
                BagFramesError::VideoEncodeError(format!("cannot open video encoder: {e}"))
            })?;

        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(target_pixel);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(Rational::new(options.fps as i32, 1)));
        encoder.set_bit_rate(options.effective_bitrate(width, height));

        if needs_global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |=
                    ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let opened_encoder = encoder
            .open_as(encoder_codec)
            .map_err(|e| BagFramesError::VideoEncodeError(format!("cannot open encoder: {e}")))?;

        stream.set_parameters(&opened_encoder);
        stream.set_time_base(encoder_time_base);

        output
            .write_header()
            .map_err(|e| BagFramesError::VideoWriteError(format!("cannot write header: {e}")))?;

        // The muxer may pick its own time base while writing the header.
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| BagFramesError::VideoWriteError("output stream vanished".to_string()))?;

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            width,
            height,
            target_pixel,
            width,
            height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|e| BagFramesError::VideoWriteError(format!("cannot create scaler: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder: opened_encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width,
            height,
            frames_written: 0,
            finished: false,
        })
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames encoded so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Returns `true` once the trailer has been written.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Encode one frame, resizing it to the output resolution if needed.
    ///
    /// # Errors
    ///
    /// - [`BagFramesError::VideoWriteError`] if the writer is finished or a
    ///   packet cannot be written.
    /// - [`BagFramesError::VideoEncodeError`] if the encoder rejects the frame.
    pub fn write_frame(&mut self, image: &DynamicImage) -> Result<(), BagFramesError> {
        if self.finished {
            return Err(BagFramesError::VideoWriteError(
                "writer already finished".to_string(),
            ));
        }

        let (width, height) = (self.width, self.height);
        let rgb = if image.width() != width || image.height() != height {
            image.resize_exact(width, height, FilterType::Triangle).to_rgb8()
        } else {
            image.to_rgb8()
        };

        let mut src_frame = FfmpegFrame::new(Pixel::RGB24, width, height);
        let stride = src_frame.stride(0);
        let src_data = src_frame.data_mut(0);
        let rgb_bytes = rgb.as_raw();
        let row_len = (width as usize) * 3;
        for y in 0..height as usize {
            let src_start = y * row_len;
            let dst_start = y * stride;
            src_data[dst_start..dst_start + row_len]
                .copy_from_slice(&rgb_bytes[src_start..src_start + row_len]);
        }

        let mut dst_frame = FfmpegFrame::empty();
        self.scaler
            .run(&src_frame, &mut dst_frame)
            .map_err(|e| BagFramesError::VideoWriteError(format!("scaling failed: {e}")))?;
        dst_frame.set_pts(Some(self.frames_written as i64));

        self.encoder
            .send_frame(&dst_frame)
            .map_err(|e| BagFramesError::VideoEncodeError(format!("send_frame failed: {e}")))?;
        self.drain_packets()?;

        self.frames_written += 1;
        Ok(())
    }

    fn drain_packets(&mut self) -> Result<(), BagFramesError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| BagFramesError::VideoWriteError(format!("write packet failed: {e}")))?;
        }
        Ok(())
    }

    /// Flush the encoder and write the container trailer.
    ///
    /// Calling `finish` more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::VideoEncodeError`] or
    /// [`BagFramesError::VideoWriteError`] if flushing fails.
    pub fn finish(&mut self) -> Result<(), BagFramesError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.encoder
            .send_eof()
            .map_err(|e| BagFramesError::VideoEncodeError(format!("send_eof failed: {e}")))?;
        self.drain_packets()?;

        self.output
            .write_trailer()
            .map_err(|e| BagFramesError::VideoWriteError(format!("cannot write trailer: {e}")))?;

        log::info!(
            "Finished {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
        Ok(())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(error) = self.finish() {
                log::error!("Failed to finalize {}: {error}", self.path.display());
            }
        }
    }
}

/// Encodes a slice of frames into a video file in one call.
///
/// Create via [`VideoEncoder::new`], then call [`write`](VideoEncoder::write).
pub struct VideoEncoder {
    config: VideoEncoderOptions,
}

impl VideoEncoder {
    /// Create a new video encoder with the given options.
    pub fn new(config: VideoEncoderOptions) -> Self {
        Self { config }
    }

    /// Write frames to the output path.
    ///
    /// # Errors
    ///
    /// - [`BagFramesError::VideoWriteError`] if `frames` is empty, or on
    ///   encoding or I/O failure.
    /// - [`BagFramesError::VideoEncodeError`] if the codec cannot be opened.
    pub fn write<P: AsRef<Path>>(
        &self,
        path: P,
        frames: &[DynamicImage],
    ) -> Result<(), BagFramesError> {
        let first = frames
            .first()
            .ok_or_else(|| BagFramesError::VideoWriteError("no frames to write".to_string()))?;
        let width = self.config.width.unwrap_or(first.width());
        let height = self.config.height.unwrap_or(first.height());

        let mut writer = VideoWriter::create(path, &self.config, width, height)?;
        for frame in frames {
            writer.write_frame(frame)?;
        }
        writer.finish()
    }
}
