//! # bagframes
//!
//! Convert depth-camera recordings to still images or video.
//!
//! `bagframes` plays back an Intel RealSense `.bag` recording frame set by
//! frame set, picks the color, depth, infrared or color-aligned colorized
//! depth stream out of each set, and writes the frames either as a numbered
//! JPEG sequence or as an MP4 / AVI video encoded through FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Convert a recording
//!
//! ```no_run
//! use bagframes::{BagConverter, ConversionOptions, OutputTarget, StreamSelection};
//!
//! let options = ConversionOptions::new().with_stream(StreamSelection::Depth);
//! std::fs::create_dir_all("frames").unwrap();
//! let target = OutputTarget::from_path("frames").unwrap();
//! let summary = BagConverter::new("recording.bag", options).run(&target).unwrap();
//! println!("{} images", summary.frames_written);
//! ```
//!
//! ### Walk frame sets yourself
//!
//! ```no_run
//! use bagframes::{Align, Colorizer, Pipeline, StreamKind};
//!
//! let mut pipeline = Pipeline::start("recording.bag").unwrap();
//! let align = Align::new(StreamKind::Color, &pipeline).unwrap();
//! let colorizer = Colorizer::new().with_depth_units(pipeline.depth_units());
//!
//! while let Ok(frames) = pipeline.wait_for_frames() {
//!     let aligned = align.process(&frames).unwrap();
//!     if let Some(depth) = aligned.depth_frame() {
//!         let image = colorizer.colorize(depth).unwrap().to_image().unwrap();
//!         image.save(format!("depth_{}.png", depth.frame_number)).unwrap();
//!     }
//! }
//! ```
//!
//! ### Inspect a recording
//!
//! ```no_run
//! use bagframes::CaptureMetadata;
//!
//! let metadata = CaptureMetadata::probe("recording.bag").unwrap();
//! println!("{:?}, {} frames", metadata.duration, metadata.total_frames());
//! ```
//!
//! ## Features
//!
//! - **Playback**: ROS bag v2.0 reader (uncompressed and LZ4 chunks), stream
//!   profiles with calibration, frame-set grouping
//! - **Processing**: depth-to-color alignment and histogram-equalized depth
//!   colorization
//! - **Output**: zero-padded JPEG sequences, MPEG-4 (`.mp4`) and Motion-JPEG
//!   (`.avi`) video
//! - **Progress & cancellation**: callbacks and `CancellationToken`
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod bag;
pub mod convert;
pub mod encode;
pub mod error;
pub mod frame;
pub mod logging;
pub mod message;
pub mod metadata;
pub mod output;
pub mod playback;
pub mod processing;
pub mod progress;
pub mod stream;

pub use bag::{BagFile, Connection, MessageRecord, RosTime};
pub use convert::{
    BagConverter, ConversionOptions, ConversionSummary, StopReason, images_to_video,
};
pub use encode::{VideoCodec, VideoEncoder, VideoEncoderOptions, VideoWriter};
pub use error::BagFramesError;
pub use frame::{FrameSet, VideoFrame};
pub use logging::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use metadata::CaptureMetadata;
pub use output::{ImageSequenceWriter, OutputTarget, frame_file_name, validate_input_path};
pub use playback::{DEFAULT_DEPTH_UNITS, Pipeline, StreamProfile};
pub use processing::{Align, ColorScheme, Colorizer};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use stream::{DistortionModel, Extrinsics, FrameFormat, Intrinsics, StreamKind, StreamSelection};
