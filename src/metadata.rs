//! Capture file metadata.
//!
//! [`CaptureMetadata::probe`] summarizes a recording (its streams, their
//! resolution, frame rate, format and frame count, and the overall duration)
//! without decoding any frame beyond the first of each stream.
//!
//! # Example
//!
//! ```no_run
//! use bagframes::CaptureMetadata;
//!
//! let metadata = CaptureMetadata::probe("recording.bag")?;
//! println!("Duration: {:?}", metadata.duration);
//! for stream in &metadata.streams {
//!     println!("{} #{}: {}x{}", stream.kind, stream.index, stream.width, stream.height);
//! }
//! # Ok::<(), bagframes::BagFramesError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bag::BagFile;
use crate::error::BagFramesError;
use crate::playback::{StreamProfile, scan_recording};
use crate::stream::StreamKind;

/// Summary of a capture file.
#[derive(Debug, Clone)]
#[must_use]
pub struct CaptureMetadata {
    /// Path that was probed.
    pub path: PathBuf,
    /// Time between the first and last recorded image.
    pub duration: Duration,
    /// Recorded image streams, ordered by kind then index.
    pub streams: Vec<StreamProfile>,
    /// Meters per depth unit.
    pub depth_units: f32,
    /// Number of chunk records in the bag.
    pub chunk_count: u32,
}

impl CaptureMetadata {
    /// Read the metadata of a capture file.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::FileOpen`] or [`BagFramesError::BagFormat`]
    /// if the file cannot be read.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Self, BagFramesError> {
        let bag = BagFile::open(path.as_ref())?;
        let scan = scan_recording(&bag)?;

        let first = scan
            .profiles
            .iter()
            .filter_map(|profile| profile.first_timestamp)
            .min();
        let last = scan
            .profiles
            .iter()
            .filter_map(|profile| profile.last_timestamp)
            .max();
        let duration = match (first, last) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => Duration::ZERO,
        };

        Ok(Self {
            path: bag.path().to_path_buf(),
            duration,
            streams: scan.profiles,
            depth_units: scan.depth_units,
            chunk_count: bag.header().chunk_count,
        })
    }

    /// The lowest-index stream of the given kind.
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamProfile> {
        self.streams.iter().find(|stream| stream.kind == kind)
    }

    /// Total number of recorded image frames across all streams.
    pub fn total_frames(&self) -> u64 {
        self.streams.iter().map(|stream| stream.frame_count).sum()
    }
}
