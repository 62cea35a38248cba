//! Error types for the `bagframes` crate.
//!
//! This module defines [`BagFramesError`], the unified error type returned by
//! all fallible operations in the crate. Variants fall in two groups: input
//! validation errors, raised before any file is opened or created, and
//! playback/encoding errors raised while frames are being processed.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `bagframes` operations.
///
/// Every public method that can fail returns `Result<T, BagFramesError>`.
/// Variants carry enough context to diagnose the problem without needing
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BagFramesError {
    /// The input path does not carry the `.bag` extension.
    #[error("The given file is not of correct file format: {path} (only .bag files are accepted)")]
    InvalidInputExtension {
        /// Path that was rejected.
        path: PathBuf,
    },

    /// The stream name is not one of `color`, `depth`, `infrared`, `rgbd`.
    #[error("Unknown stream: {0} (expected color, depth, infrared or rgbd)")]
    UnknownStream(String),

    /// The pixel format name is not a known format.
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    /// The output path has an extension other than `mp4` or `avi`.
    #[error("Unsupported output: {path} (use a directory, or a .mp4 / .avi file)")]
    UnsupportedOutput {
        /// Path that was rejected.
        path: PathBuf,
    },

    /// The capture file could not be opened.
    #[error("Failed to open capture file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to the pipeline.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The bag container is truncated or malformed.
    #[error("Malformed bag data at offset {offset}: {reason}")]
    BagFormat {
        /// Byte offset of the offending record (or 0 inside a message body).
        offset: u64,
        /// What was wrong.
        reason: String,
    },

    /// A chunk uses a compression scheme this crate cannot read.
    #[error("Unsupported chunk compression: {0}")]
    UnsupportedCompression(String),

    /// The recording contains no color, depth or infrared image stream.
    #[error("No image streams found in capture file")]
    NoStreams,

    /// The recording holds no stream of the selected kind.
    #[error("The capture file has no {0} stream")]
    MissingStream(String),

    /// The recording has been fully played back.
    #[error("End of stream reached")]
    EndOfStream,

    /// A frame could not be decoded into an image.
    #[error("Failed to decode frame: {0}")]
    FrameDecode(String),

    /// Align or colorize could not process a frame set.
    #[error("Frame processing error: {0}")]
    Processing(String),

    /// Video encoding failed (codec setup or packet encoding).
    #[error("Video encoding error: {0}")]
    VideoEncodeError(String),

    /// Video writer failed (container or I/O).
    #[error("Video write error: {0}")]
    VideoWriteError(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while writing a still image.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<FfmpegError> for BagFramesError {
    fn from(error: FfmpegError) -> Self {
        BagFramesError::FfmpegError(error.to_string())
    }
}

impl BagFramesError {
    pub(crate) fn bag_format(offset: u64, reason: impl Into<String>) -> Self {
        BagFramesError::BagFormat {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors raised by input validation, before any
    /// capture file is opened or any output is created.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BagFramesError::InvalidInputExtension { .. }
                | BagFramesError::UnknownStream(_)
                | BagFramesError::UnknownFormat(_)
                | BagFramesError::UnsupportedOutput { .. }
        )
    }
}
