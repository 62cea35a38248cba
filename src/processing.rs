//! Frame processing blocks: depth alignment and depth colorization.
//!
//! [`Align`] reprojects a depth frame into another stream's viewpoint so
//! that depth pixel `(x, y)` lines up with color pixel `(x, y)`.
//! [`Colorizer`] turns a Z16 depth frame into an RGB visualization.
//!
//! # Example
//!
//! ```no_run
//! use bagframes::{Align, Colorizer, Pipeline, StreamKind};
//!
//! let mut pipeline = Pipeline::start("recording.bag")?;
//! let align = Align::new(StreamKind::Color, &pipeline)?;
//! let colorizer = Colorizer::new();
//!
//! let frames = align.process(&pipeline.wait_for_frames()?)?;
//! if let Some(depth) = frames.depth_frame() {
//!     colorizer.colorize(depth)?.to_image()?.save("depth.png")?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::BagFramesError;
use crate::frame::{FrameSet, VideoFrame};
use crate::playback::Pipeline;
use crate::stream::{Extrinsics, FrameFormat, Intrinsics, StreamKind};

/// Reprojects depth frames into the viewpoint of a target stream.
#[derive(Debug, Clone)]
pub struct Align {
    target: StreamKind,
    depth_intrinsics: Intrinsics,
    target_intrinsics: Intrinsics,
    depth_to_target: Extrinsics,
    depth_units: f32,
}

impl Align {
    /// Create an align block for `target` from a pipeline's calibration.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::Processing`] if the recording lacks a depth
    /// or target stream, or their intrinsics.
    pub fn new(target: StreamKind, pipeline: &Pipeline) -> Result<Self, BagFramesError> {
        let intrinsics_of = |kind: StreamKind| {
            let profile = pipeline.profile(kind).ok_or_else(|| {
                BagFramesError::Processing(format!("recording has no {kind} stream to align with"))
            })?;
            profile.intrinsics.ok_or_else(|| {
                BagFramesError::Processing(format!("recording has no calibration for the {kind} stream"))
            })
        };

        Ok(Self::with_calibration(
            target,
            intrinsics_of(StreamKind::Depth)?,
            intrinsics_of(target)?,
            pipeline.extrinsics(StreamKind::Depth, target),
            pipeline.depth_units(),
        ))
    }

    /// Create an align block from explicit calibration.
    pub fn with_calibration(
        target: StreamKind,
        depth_intrinsics: Intrinsics,
        target_intrinsics: Intrinsics,
        depth_to_target: Extrinsics,
        depth_units: f32,
    ) -> Self {
        Self {
            target,
            depth_intrinsics,
            target_intrinsics,
            depth_to_target,
            depth_units,
        }
    }

    /// Return a copy of `frames` whose depth frame is aligned to the target.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::Processing`] if the set lacks a depth frame
    /// or a frame of the target stream, or the depth frame is not Z16.
    pub fn process(&self, frames: &FrameSet) -> Result<FrameSet, BagFramesError> {
        let depth = frames
            .depth_frame()
            .ok_or_else(|| BagFramesError::Processing("frame set has no depth frame".to_string()))?;
        if frames.first_of(self.target).is_none() {
            return Err(BagFramesError::Processing(format!(
                "frame set has no {} frame to align to",
                self.target
            )));
        }

        let aligned = self.align_depth(depth)?;
        let mut output = FrameSet::new();
        for frame in frames.frames() {
            if frame.kind != StreamKind::Depth {
                output.insert(frame.clone());
            }
        }
        output.insert(aligned);
        Ok(output)
    }

    /// Reproject a single Z16 depth frame.
    pub fn align_depth(&self, depth: &VideoFrame) -> Result<VideoFrame, BagFramesError> {
        if depth.format != FrameFormat::Z16 {
            return Err(BagFramesError::Processing(format!(
                "cannot align depth frame in {} format",
                depth.format
            )));
        }

        let out_width = self.target_intrinsics.width as usize;
        let out_height = self.target_intrinsics.height as usize;
        let mut aligned = vec![0u16; out_width * out_height];
        let samples = depth.u16_samples();
        let in_width = depth.width as usize;

        for (index, &raw) in samples.iter().enumerate() {
            if raw == 0 {
                continue;
            }
            let meters = f32::from(raw) * self.depth_units;
            let (x, y) = ((index % in_width) as f32, (index / in_width) as f32);

            // Map both corners of the source pixel to find the target pixel
            // centers its footprint covers.
            let corner = |dx: f32, dy: f32| {
                let point = self.depth_intrinsics.deproject([x + dx, y + dy], meters);
                let moved = self.depth_to_target.transform_point(point);
                (moved[2] > 0.0).then(|| self.target_intrinsics.project(moved))
            };
            let (Some(a), Some(b)) = (corner(-0.5, -0.5), corner(0.5, 0.5)) else {
                continue;
            };
            let x0 = (a[0].min(b[0]).ceil() as i64).max(0);
            let y0 = (a[1].min(b[1]).ceil() as i64).max(0);
            let x1 = (a[0].max(b[0]).ceil() as i64 - 1).min(out_width as i64 - 1);
            let y1 = (a[1].max(b[1]).ceil() as i64 - 1).min(out_height as i64 - 1);
            if x0 > x1 || y0 > y1 {
                continue;
            }

            for target_y in y0..=y1 {
                for target_x in x0..=x1 {
                    let slot = &mut aligned[target_y as usize * out_width + target_x as usize];
                    *slot = if *slot == 0 { raw } else { (*slot).min(raw) };
                }
            }
        }

        Ok(VideoFrame {
            kind: StreamKind::Depth,
            stream_index: depth.stream_index,
            width: out_width as u32,
            height: out_height as u32,
            stride: out_width * 2,
            format: FrameFormat::Z16,
            frame_number: depth.frame_number,
            timestamp: depth.timestamp,
            data: aligned.iter().flat_map(|value| value.to_le_bytes()).collect(),
        })
    }
}

/// Color map applied by the [`Colorizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorScheme {
    /// Blue (near) through cyan, yellow and red to dark red (far).
    #[default]
    Jet,
    /// White (near) to black (far).
    WhiteToBlack,
    /// Black (near) to white (far).
    BlackToWhite,
}

impl ColorScheme {
    fn stops(self) -> &'static [[f32; 3]] {
        match self {
            ColorScheme::Jet => &[
                [0.0, 0.0, 255.0],
                [0.0, 255.0, 255.0],
                [255.0, 255.0, 0.0],
                [255.0, 0.0, 0.0],
                [50.0, 0.0, 0.0],
            ],
            ColorScheme::WhiteToBlack => &[[255.0, 255.0, 255.0], [0.0, 0.0, 0.0]],
            ColorScheme::BlackToWhite => &[[0.0, 0.0, 0.0], [255.0, 255.0, 255.0]],
        }
    }

    /// Color for a normalized value in `[0, 1]`.
    pub fn color_at(self, value: f32) -> [u8; 3] {
        let stops = self.stops();
        let scaled = value.clamp(0.0, 1.0) * (stops.len() - 1) as f32;
        let low = (scaled.floor() as usize).min(stops.len() - 2);
        let t = scaled - low as f32;
        let (a, b) = (stops[low], stops[low + 1]);
        [
            (a[0] + (b[0] - a[0]) * t).round() as u8,
            (a[1] + (b[1] - a[1]) * t).round() as u8,
            (a[2] + (b[2] - a[2]) * t).round() as u8,
        ]
    }
}

/// Turns Z16 depth frames into RGB8 visualizations.
///
/// By default the colorizer equalizes the depth histogram, so that the
/// full color range is spread over the depths present in each frame. With
/// equalization off, depth is mapped linearly between
/// [`min_distance`](Colorizer::with_range) and `max_distance`.
#[derive(Debug, Clone)]
pub struct Colorizer {
    scheme: ColorScheme,
    histogram_equalization: bool,
    min_distance: f32,
    max_distance: f32,
    depth_units: f32,
}

impl Default for Colorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Colorizer {
    /// Jet color scheme with histogram equalization.
    pub fn new() -> Self {
        Self {
            scheme: ColorScheme::Jet,
            histogram_equalization: true,
            min_distance: 0.0,
            max_distance: 6.0,
            depth_units: crate::playback::DEFAULT_DEPTH_UNITS,
        }
    }

    /// Select the color map.
    #[must_use]
    pub fn with_scheme(mut self, scheme: ColorScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Enable or disable histogram equalization.
    #[must_use]
    pub fn with_histogram_equalization(mut self, enabled: bool) -> Self {
        self.histogram_equalization = enabled;
        self
    }

    /// Set the distance range (meters) used without equalization.
    #[must_use]
    pub fn with_range(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.min_distance = min_distance.max(0.0);
        self.max_distance = max_distance.max(self.min_distance + f32::EPSILON);
        self
    }

    /// Set meters per depth unit (used without equalization).
    #[must_use]
    pub fn with_depth_units(mut self, depth_units: f32) -> Self {
        self.depth_units = depth_units;
        self
    }

    /// Colorize a Z16 frame.
    ///
    /// Pixels with no depth (value 0) are black.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::Processing`] if the frame is not Z16.
    pub fn colorize(&self, depth: &VideoFrame) -> Result<VideoFrame, BagFramesError> {
        if depth.format != FrameFormat::Z16 {
            return Err(BagFramesError::Processing(format!(
                "cannot colorize frame in {} format",
                depth.format
            )));
        }

        let samples = depth.u16_samples();
        let normalize: Box<dyn Fn(u16) -> f32> = if self.histogram_equalization {
            let mut histogram = vec![0u32; 0x10000];
            for &value in &samples {
                histogram[value as usize] += 1;
            }
            histogram[0] = 0;
            for index in 1..histogram.len() {
                histogram[index] += histogram[index - 1];
            }
            let total = histogram[0xFFFF].max(1) as f32;
            Box::new(move |value| histogram[value as usize] as f32 / total)
        } else {
            let (min, range, units) = (
                self.min_distance,
                self.max_distance - self.min_distance,
                self.depth_units,
            );
            Box::new(move |value| (f32::from(value) * units - min) / range)
        };

        let mut rgb = Vec::with_capacity(samples.len() * 3);
        for &value in &samples {
            if value == 0 {
                rgb.extend_from_slice(&[0, 0, 0]);
            } else {
                rgb.extend_from_slice(&self.scheme.color_at(normalize(value)));
            }
        }

        Ok(VideoFrame {
            kind: depth.kind,
            stream_index: depth.stream_index,
            width: depth.width,
            height: depth.height,
            stride: depth.width as usize * 3,
            format: FrameFormat::Rgb8,
            frame_number: depth.frame_number,
            timestamp: depth.timestamp,
            data: rgb,
        })
    }
}
