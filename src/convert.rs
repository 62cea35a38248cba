//! Capture-to-frames conversion.
//!
//! [`BagConverter`] plays a recording back, drops the warm-up frame sets,
//! picks the selected stream out of every remaining frame set and hands the
//! resulting image to an [`OutputTarget`]: a numbered JPEG sequence or a
//! video file. [`ConversionOptions`] threads the stream selection, encoder
//! settings, progress callback and cancellation token through the run.
//!
//! # Example
//!
//! ```no_run
//! use bagframes::{BagConverter, BagFramesError, ConversionOptions, OutputTarget, StreamSelection};
//!
//! let options = ConversionOptions::new()
//!     .with_stream(StreamSelection::AlignedDepth)
//!     .with_fps(15);
//! let target = OutputTarget::from_path("depth.avi")?;
//! let summary = BagConverter::new("recording.bag", options).run(&target)?;
//! println!("{} frames written", summary.frames_written);
//! # Ok::<(), BagFramesError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;

use crate::encode::{VideoCodec, VideoEncoderOptions, VideoWriter};
use crate::error::BagFramesError;
use crate::frame::FrameSet;
use crate::output::{ImageSequenceWriter, OutputTarget, validate_input_path};
use crate::playback::Pipeline;
use crate::processing::{Align, Colorizer};
use crate::progress::{CancellationToken, NoOpProgress, OperationType, ProgressCallback, ProgressTracker};
use crate::stream::{FrameFormat, StreamKind, StreamSelection};

/// Default video frame rate.
pub const DEFAULT_FPS: u32 = 30;
/// Default video width.
pub const DEFAULT_WIDTH: u32 = 1280;
/// Default video height.
pub const DEFAULT_HEIGHT: u32 = 720;
/// Frame sets dropped at the start of playback while auto-exposure settles.
pub const DEFAULT_WARMUP: u64 = 5;

/// Why a conversion loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The recording was fully played back.
    EndOfStream,
    /// A playback, decode or write error ended the loop early.
    Error(String),
    /// The cancellation token was triggered.
    Cancelled,
}

/// Outcome of a conversion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Images or video frames written.
    pub frames_written: u64,
    /// Frame sets that did not contain the selected stream.
    pub frames_skipped: u64,
    /// Why the loop ended.
    pub stop_reason: StopReason,
    /// Output directory or video file.
    pub output: PathBuf,
}

impl ConversionSummary {
    /// Returns `true` if the whole recording was converted.
    pub fn is_complete(&self) -> bool {
        self.stop_reason == StopReason::EndOfStream
    }
}

/// Settings for a conversion run.
///
/// All fields have defaults matching the command line: color stream, `rgb8`,
/// 30 fps at 1280x720, five warm-up frame sets, no progress callback and no
/// cancellation.
#[derive(Clone)]
pub struct ConversionOptions {
    pub(crate) stream: StreamSelection,
    pub(crate) format: FrameFormat,
    pub(crate) fps: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) warmup: u64,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) batch_size: u64,
}

impl Debug for ConversionOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConversionOptions")
            .field("stream", &self.stream)
            .field("format", &self.format)
            .field("fps", &self.fps)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("warmup", &self.warmup)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            stream: StreamSelection::default(),
            format: FrameFormat::default(),
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            warmup: DEFAULT_WARMUP,
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
        }
    }

    /// Select the stream to convert.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamSelection) -> Self {
        self.stream = stream;
        self
    }

    /// Set the expected pixel format of the selected stream.
    ///
    /// A mismatch with the recorded format is logged as a warning; the
    /// recorded format is always used.
    #[must_use]
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the video frame rate.
    #[must_use]
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set the video resolution. Frames are resized to it.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set how many frame sets to drop before writing.
    #[must_use]
    pub fn with_warmup(mut self, frame_sets: u64) -> Self {
        self.warmup = frame_sets;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token, checked before every frame set.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires (every N frame sets).
    /// Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Selected stream.
    pub fn stream(&self) -> StreamSelection {
        self.stream
    }

    /// Expected pixel format.
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Video frame rate.
    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Video resolution.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Warm-up frame sets.
    pub fn warmup(&self) -> u64 {
        self.warmup
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    pub(crate) fn encoder_options(&self, codec: VideoCodec) -> VideoEncoderOptions {
        VideoEncoderOptions::default()
            .fps(self.fps)
            .resolution(self.width, self.height)
            .codec(codec)
    }
}

/// Turns selected frames of a frame set into images.
enum FrameRenderer {
    Plain(StreamKind),
    AlignedDepth { align: Align, colorizer: Colorizer },
}

impl FrameRenderer {
    fn new(selection: StreamSelection, pipeline: &Pipeline) -> Result<Self, BagFramesError> {
        match selection {
            StreamSelection::AlignedDepth => Ok(FrameRenderer::AlignedDepth {
                align: Align::new(StreamKind::Color, pipeline)?,
                colorizer: Colorizer::new().with_depth_units(pipeline.depth_units()),
            }),
            other => {
                let kind = other.source_kind();
                if pipeline.profile(kind).is_none() {
                    return Err(BagFramesError::MissingStream(kind.to_string()));
                }
                Ok(FrameRenderer::Plain(kind))
            }
        }
    }

    /// `None` when the frame set lacks a frame the selection needs.
    fn render(&self, frames: &FrameSet) -> Result<Option<DynamicImage>, BagFramesError> {
        match self {
            FrameRenderer::Plain(kind) => frames
                .first_of(*kind)
                .map(|frame| frame.to_image())
                .transpose(),
            FrameRenderer::AlignedDepth { align, colorizer } => {
                if frames.depth_frame().is_none() || frames.color_frame().is_none() {
                    return Ok(None);
                }
                let aligned = align.process(frames)?;
                aligned
                    .depth_frame()
                    .map(|depth| colorizer.colorize(depth)?.to_image())
                    .transpose()
            }
        }
    }
}

/// Destination the converted images are written to.
enum FrameSink {
    Images(ImageSequenceWriter),
    Video(VideoWriter),
}

impl FrameSink {
    fn open(target: &OutputTarget, options: &ConversionOptions) -> Result<Self, BagFramesError> {
        target.prepare()?;
        match target {
            OutputTarget::Images { dir } => Ok(FrameSink::Images(ImageSequenceWriter::create(dir)?)),
            OutputTarget::Video { path, codec } => Ok(FrameSink::Video(VideoWriter::create(
                path,
                &options.encoder_options(*codec),
                options.width,
                options.height,
            )?)),
        }
    }

    fn write(&mut self, image: DynamicImage) -> Result<(), BagFramesError> {
        match self {
            FrameSink::Images(writer) => writer.write(image).map(|_| ()),
            FrameSink::Video(writer) => writer.write_frame(&image),
        }
    }

    fn frames_written(&self) -> u64 {
        match self {
            FrameSink::Images(writer) => writer.frames_written(),
            FrameSink::Video(writer) => writer.frames_written(),
        }
    }

    fn finish(&mut self) -> Result<(), BagFramesError> {
        match self {
            FrameSink::Images(_) => Ok(()),
            FrameSink::Video(writer) => writer.finish(),
        }
    }
}

/// Converts one capture file.
#[derive(Debug, Clone)]
pub struct BagConverter {
    input: PathBuf,
    options: ConversionOptions,
}

impl BagConverter {
    /// Create a converter for `input`. Nothing is opened until
    /// [`run`](BagConverter::run).
    pub fn new<P: AsRef<Path>>(input: P, options: ConversionOptions) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            options,
        }
    }

    /// Capture file path.
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Conversion settings.
    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// Convert the recording into `target`.
    ///
    /// Errors raised inside the frame loop do not fail the call: they are
    /// logged and reported through [`ConversionSummary::stop_reason`]. The
    /// pipeline is stopped and a video writer is finalized on every path.
    ///
    /// # Errors
    ///
    /// - [`BagFramesError::InvalidInputExtension`] if the input is not a
    ///   `.bag` file (nothing is created).
    /// - [`BagFramesError::FileOpen`], [`BagFramesError::BagFormat`] or
    ///   [`BagFramesError::NoStreams`] if the recording cannot be played.
    /// - [`BagFramesError::MissingStream`] if the recording does not hold
    ///   the selected stream (nothing is created).
    /// - [`BagFramesError::Processing`] if aligned depth is requested from a
    ///   recording without color or calibration.
    /// - [`BagFramesError::IoError`], [`BagFramesError::VideoEncodeError`] or
    ///   [`BagFramesError::VideoWriteError`] if the output cannot be created.
    pub fn run(&self, target: &OutputTarget) -> Result<ConversionSummary, BagFramesError> {
        validate_input_path(&self.input)?;
        let options = &self.options;

        let mut pipeline = Pipeline::start(&self.input)?;
        self.warn_on_format_mismatch(&pipeline);
        let renderer = FrameRenderer::new(options.stream, &pipeline)?;
        let mut sink = FrameSink::open(target, options)?;

        log::info!(
            "Converting {} stream of {} into {}",
            options.stream,
            self.input.display(),
            target.path().display()
        );

        let total = pipeline
            .profile(options.stream.source_kind())
            .map(|profile| profile.frame_count.saturating_sub(options.warmup));
        let mut tracker = ProgressTracker::new(
            Arc::clone(&options.progress),
            OperationType::Conversion,
            total,
            options.batch_size,
        );

        let mut warmup_remaining = options.warmup;
        let mut frames_skipped = 0;
        let stop_reason = loop {
            if options.is_cancelled() {
                log::info!("Conversion cancelled");
                break StopReason::Cancelled;
            }

            let frames = match pipeline.wait_for_frames() {
                Ok(frames) => frames,
                Err(BagFramesError::EndOfStream) => break StopReason::EndOfStream,
                Err(error) => {
                    log::error!("{error} happened");
                    break StopReason::Error(error.to_string());
                }
            };

            if warmup_remaining > 0 {
                warmup_remaining -= 1;
                log::debug!("Skipping warm-up frame set");
                continue;
            }

            let written = match renderer.render(&frames) {
                Ok(Some(image)) => sink.write(image).map(|()| true),
                Ok(None) => Ok(false),
                Err(error) => Err(error),
            };
            match written {
                Ok(true) => {}
                Ok(false) => {
                    frames_skipped += 1;
                    log::debug!("Frame set without a {} frame skipped", options.stream);
                }
                Err(error) => {
                    log::error!("{error} happened");
                    break StopReason::Error(error.to_string());
                }
            }
            tracker.advance(Some(sink.frames_written()), frames.timestamp());
        };

        pipeline.stop();
        let stop_reason = match sink.finish() {
            Ok(()) => stop_reason,
            Err(error) => {
                log::error!("{error} happened");
                match stop_reason {
                    StopReason::EndOfStream => StopReason::Error(error.to_string()),
                    other => other,
                }
            }
        };
        tracker.finish();

        let summary = ConversionSummary {
            frames_written: sink.frames_written(),
            frames_skipped,
            stop_reason,
            output: target.path().to_path_buf(),
        };
        log::info!(
            "Wrote {} frames to {} ({} skipped)",
            summary.frames_written,
            summary.output.display(),
            summary.frames_skipped
        );
        Ok(summary)
    }

    fn warn_on_format_mismatch(&self, pipeline: &Pipeline) {
        let requested = self.options.format;
        let produced = match self.options.stream {
            StreamSelection::AlignedDepth => Some(FrameFormat::Rgb8),
            other => pipeline
                .profile(other.source_kind())
                .and_then(|profile| profile.format),
        };
        if let Some(produced) = produced.filter(|&produced| produced != requested) {
            log::warn!(
                "Requested format {requested} but the {} stream is {produced}; using {produced}",
                self.options.stream
            );
        }
    }
}

/// Assemble every `.jpg` image in `dir`, in file-name order, into a video.
///
/// Images are resized to the configured resolution. Returns the number of
/// frames written.
///
/// # Errors
///
/// - [`BagFramesError::UnsupportedOutput`] if `output` is not a `.mp4` or
///   `.avi` path.
/// - [`BagFramesError::VideoWriteError`] if `dir` holds no `.jpg` files.
/// - [`BagFramesError::ImageError`] if an image cannot be read.
/// - [`BagFramesError::Cancelled`] if the token is triggered; the frames
///   written so far are finalized.
pub fn images_to_video<P: AsRef<Path>, Q: AsRef<Path>>(
    dir: P,
    output: Q,
    options: &ConversionOptions,
) -> Result<u64, BagFramesError> {
    let dir = dir.as_ref();
    let target = OutputTarget::from_path(output.as_ref())?;
    let OutputTarget::Video { path, codec } = &target else {
        return Err(BagFramesError::UnsupportedOutput {
            path: output.as_ref().to_path_buf(),
        });
    };

    let mut images: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jpg"))
        .collect();
    images.sort();
    if images.is_empty() {
        return Err(BagFramesError::VideoWriteError(format!(
            "no .jpg images in {}",
            dir.display()
        )));
    }

    target.prepare()?;
    let mut writer = VideoWriter::create(
        path,
        &options.encoder_options(*codec),
        options.width,
        options.height,
    )?;
    let mut tracker = ProgressTracker::new(
        Arc::clone(&options.progress),
        OperationType::Assembly,
        Some(images.len() as u64),
        options.batch_size,
    );

    for image_path in &images {
        if options.is_cancelled() {
            writer.finish()?;
            return Err(BagFramesError::Cancelled);
        }
        let image = image::open(image_path)?;
        writer.write_frame(&image)?;
        tracker.advance(Some(writer.frames_written()), None);
    }

    writer.finish()?;
    tracker.finish();
    Ok(writer.frames_written())
}
