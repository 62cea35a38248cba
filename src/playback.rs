//! Playback of a recorded capture file.
//!
//! [`Pipeline`] plays a RealSense recording back frame set by frame set, the
//! way the camera SDK's playback device does: [`Pipeline::start`] reads the
//! stream configuration stored in the file, then each call to
//! [`wait_for_frames`](Pipeline::wait_for_frames) returns the next
//! [`FrameSet`]. Playback never repeats; once the recording is exhausted every
//! further call returns [`BagFramesError::EndOfStream`].
//!
//! # Example
//!
//! ```no_run
//! use bagframes::{BagFramesError, Pipeline};
//!
//! let mut pipeline = Pipeline::start("recording.bag")?;
//! loop {
//!     match pipeline.wait_for_frames() {
//!         Ok(frames) => {
//!             if let Some(color) = frames.color_frame() {
//!                 println!("color frame {}", color.frame_number);
//!             }
//!         }
//!         Err(BagFramesError::EndOfStream) => break,
//!         Err(error) => return Err(error),
//!     }
//! }
//! pipeline.stop();
//! # Ok::<(), BagFramesError>(())
//! ```

use std::{
    collections::HashMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    mem,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    bag::{BagFile, Messages},
    error::BagFramesError,
    frame::{FrameSet, VideoFrame},
    message::{CameraInfoMessage, ImageMessage, StreamInfoMessage, TransformMessage, decode_float32},
    stream::{Extrinsics, FrameFormat, Intrinsics, StreamKind, TopicKind, parse_topic},
};

/// Depth scale used when the recording does not store one (1 mm per unit).
pub const DEFAULT_DEPTH_UNITS: f32 = 0.001;

/// Configuration of one recorded stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamProfile {
    /// Stream kind.
    pub kind: StreamKind,
    /// Stream index.
    pub index: u32,
    /// Sensor the stream belongs to.
    pub sensor: u32,
    /// Frame width in pixels (0 if no frame was recorded).
    pub width: u32,
    /// Frame height in pixels (0 if no frame was recorded).
    pub height: u32,
    /// Nominal frame rate (0 if not recorded).
    pub fps: u32,
    /// Recorded pixel format.
    pub format: Option<FrameFormat>,
    /// Calibration, if the recording carries camera info.
    pub intrinsics: Option<Intrinsics>,
    /// Transform from this stream to the device's reference stream.
    pub extrinsics: Option<Extrinsics>,
    /// Number of recorded frames.
    pub frame_count: u64,
    /// Timestamp of the first recorded frame.
    pub first_timestamp: Option<Duration>,
    /// Timestamp of the last recorded frame.
    pub last_timestamp: Option<Duration>,
}

impl StreamProfile {
    fn new(kind: StreamKind, index: u32, sensor: u32) -> Self {
        Self {
            kind,
            index,
            sensor,
            width: 0,
            height: 0,
            fps: 0,
            format: None,
            intrinsics: None,
            extrinsics: None,
            frame_count: 0,
            first_timestamp: None,
            last_timestamp: None,
        }
    }
}

/// Result of reading a recording's stream configuration.
#[derive(Debug, Clone)]
pub(crate) struct RecordingScan {
    pub(crate) profiles: Vec<StreamProfile>,
    pub(crate) depth_units: f32,
}

/// Read the stream configuration and frame counts of a recording.
///
/// Only the first image message of each stream is decoded (for its size and
/// encoding); the rest are counted.
pub(crate) fn scan_recording(bag: &BagFile) -> Result<RecordingScan, BagFramesError> {
    let mut profiles: HashMap<(StreamKind, u32), StreamProfile> = HashMap::new();
    let mut depth_units = None;
    let mut topics: HashMap<u32, Option<TopicKind>> = HashMap::new();
    let mut messages = bag.messages()?;

    while let Some(message) = messages.next() {
        let message = message?;
        let topic = topics
            .entry(message.conn)
            .or_insert_with(|| {
                messages
                    .connection(message.conn)
                    .and_then(|connection| parse_topic(&connection.topic))
            })
            .clone();

        match topic {
            Some(TopicKind::DepthUnits { .. }) => {
                depth_units = Some(decode_float32(&message.data)?);
            }
            Some(TopicKind::Stream {
                sensor,
                kind,
                index,
                suffix,
            }) => {
                let profile = profiles
                    .entry((kind, index))
                    .or_insert_with(|| StreamProfile::new(kind, index, sensor));
                match suffix.as_str() {
                    "image/data" => {
                        if profile.frame_count == 0 {
                            let image = ImageMessage::decode(&message.data)?;
                            profile.width = image.width;
                            profile.height = image.height;
                            if profile.format.is_none() {
                                profile.format = FrameFormat::from_ros_encoding(&image.encoding, kind);
                            }
                            profile.first_timestamp = Some(message.time.as_duration());
                        }
                        profile.frame_count += 1;
                        profile.last_timestamp = Some(message.time.as_duration());
                    }
                    "info" => {
                        let info = StreamInfoMessage::decode(&message.data)?;
                        profile.fps = info.fps;
                        if let Some(format) = FrameFormat::from_ros_encoding(&info.encoding, kind) {
                            profile.format = Some(format);
                        }
                    }
                    "info/camera_info" => {
                        let info = CameraInfoMessage::decode(&message.data)?;
                        profile.intrinsics = Some(Intrinsics::from_camera_info(&info));
                    }
                    "tf/0" => {
                        let transform = TransformMessage::decode(&message.data)?;
                        profile.extrinsics = Some(Extrinsics::from_transform(&transform));
                    }
                    _ => {}
                }
            }
            None => {}
        }
    }

    let mut profiles: Vec<StreamProfile> = profiles
        .into_values()
        .filter(|profile| profile.frame_count > 0)
        .collect();
    profiles.sort_by_key(|profile| (profile.kind, profile.index));

    Ok(RecordingScan {
        profiles,
        depth_units: depth_units.unwrap_or(DEFAULT_DEPTH_UNITS),
    })
}

/// A running playback of a capture file.
///
/// Stopping is idempotent and also happens when the pipeline is dropped.
pub struct Pipeline {
    path: PathBuf,
    profiles: Vec<StreamProfile>,
    depth_units: f32,
    messages: Option<Messages>,
    /// Connection id to image stream, `None` for non-image topics.
    image_topics: HashMap<u32, Option<(StreamKind, u32)>>,
    pending: FrameSet,
    frame_sets_delivered: u64,
}

impl Debug for Pipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Pipeline")
            .field("path", &self.path)
            .field("profiles", &self.profiles)
            .field("depth_units", &self.depth_units)
            .field("running", &self.messages.is_some())
            .field("frame_sets_delivered", &self.frame_sets_delivered)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Open a recording and start playback with every recorded stream
    /// enabled.
    ///
    /// # Errors
    ///
    /// - [`BagFramesError::FileOpen`] if the file cannot be opened or is not
    ///   a bag.
    /// - [`BagFramesError::NoStreams`] if the recording holds no color, depth
    ///   or infrared frames.
    /// - [`BagFramesError::BagFormat`] if the file is malformed.
    pub fn start<P: AsRef<Path>>(path: P) -> Result<Self, BagFramesError> {
        let bag = BagFile::open(path.as_ref())?;
        let scan = scan_recording(&bag)?;
        if scan.profiles.is_empty() {
            return Err(BagFramesError::NoStreams);
        }

        for profile in &scan.profiles {
            log::debug!(
                "Stream {} #{}: {}x{} @ {} fps, {} frames",
                profile.kind,
                profile.index,
                profile.width,
                profile.height,
                profile.fps,
                profile.frame_count,
            );
        }

        let messages = bag.messages()?;
        log::info!("Started playback of {}", bag.path().display());

        Ok(Self {
            path: bag.path().to_path_buf(),
            profiles: scan.profiles,
            depth_units: scan.depth_units,
            messages: Some(messages),
            image_topics: HashMap::new(),
            pending: FrameSet::new(),
            frame_sets_delivered: 0,
        })
    }

    /// Path of the recording being played.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every recorded image stream.
    pub fn profiles(&self) -> &[StreamProfile] {
        &self.profiles
    }

    /// The lowest-index stream of the given kind.
    pub fn profile(&self, kind: StreamKind) -> Option<&StreamProfile> {
        self.profiles.iter().find(|profile| profile.kind == kind)
    }

    /// Meters per depth unit.
    pub fn depth_units(&self) -> f32 {
        self.depth_units
    }

    /// Transform from one stream's coordinates to another's.
    ///
    /// Streams without recorded extrinsics are treated as sitting at the
    /// reference origin.
    pub fn extrinsics(&self, from: StreamKind, to: StreamKind) -> Extrinsics {
        let to_reference = |kind| {
            self.profile(kind)
                .and_then(|profile| profile.extrinsics)
                .unwrap_or(Extrinsics::IDENTITY)
        };
        to_reference(from).then(&to_reference(to).inverse())
    }

    /// Number of frame sets returned so far.
    pub fn frame_sets_delivered(&self) -> u64 {
        self.frame_sets_delivered
    }

    /// Returns `true` until [`stop`](Pipeline::stop) is called.
    pub fn is_running(&self) -> bool {
        self.messages.is_some()
    }

    fn image_stream(&mut self, conn: u32) -> Option<(StreamKind, u32)> {
        let messages = self.messages.as_ref()?;
        *self.image_topics.entry(conn).or_insert_with(|| {
            match messages
                .connection(conn)
                .and_then(|connection| parse_topic(&connection.topic))
            {
                Some(TopicKind::Stream {
                    kind,
                    index,
                    suffix,
                    ..
                }) if suffix == "image/data" => Some((kind, index)),
                _ => None,
            }
        })
    }

    fn deliver(&mut self, frames: FrameSet) -> FrameSet {
        self.frame_sets_delivered += 1;
        frames
    }

    /// Block until the next frame set is available and return it.
    ///
    /// A frame set closes when a second frame arrives for a stream it
    /// already holds.
    ///
    /// # Errors
    ///
    /// - [`BagFramesError::EndOfStream`] once the recording is exhausted or
    ///   the pipeline has been stopped.
    /// - [`BagFramesError::BagFormat`] / [`BagFramesError::FrameDecode`] if a
    ///   message cannot be decoded.
    pub fn wait_for_frames(&mut self) -> Result<FrameSet, BagFramesError> {
        loop {
            let next = match self.messages.as_mut() {
                Some(messages) => messages.next(),
                None => return Err(BagFramesError::EndOfStream),
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(error)) => return Err(error),
                None => {
                    if self.pending.is_empty() {
                        return Err(BagFramesError::EndOfStream);
                    }
                    let last = mem::take(&mut self.pending);
                    return Ok(self.deliver(last));
                }
            };

            let Some((kind, index)) = self.image_stream(message.conn) else {
                continue;
            };
            let image = ImageMessage::decode(&message.data)?;
            let frame = VideoFrame::from_image_message(image, kind, index)?;

            if self.pending.contains(kind, index) {
                let mut ready = FrameSet::new();
                ready.insert(frame);
                mem::swap(&mut ready, &mut self.pending);
                return Ok(self.deliver(ready));
            }
            self.pending.insert(frame);
        }
    }

    /// Stop playback and release the file. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.messages.take().is_some() {
            self.pending = FrameSet::new();
            log::debug!(
                "Stopped playback of {} after {} frame sets",
                self.path.display(),
                self.frame_sets_delivered
            );
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
