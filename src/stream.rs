//! Stream kinds, pixel formats, and camera calibration.
//!
//! These types describe what a recording contains: which sensor channel a
//! frame came from ([`StreamKind`]), how its pixels are laid out
//! ([`FrameFormat`]), and the calibration needed to reproject one stream into
//! another ([`Intrinsics`], [`Extrinsics`]).

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::BagFramesError;
use crate::message::{CameraInfoMessage, TransformMessage};

/// The sensor channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    /// Depth (Z16) stream.
    Depth,
    /// RGB color stream.
    Color,
    /// Infrared imager (left = index 1, right = index 2).
    Infrared,
}

impl StreamKind {
    /// Name used in RealSense topic paths (`Depth`, `Color`, `Infrared`).
    pub fn topic_name(self) -> &'static str {
        match self {
            StreamKind::Depth => "Depth",
            StreamKind::Color => "Color",
            StreamKind::Infrared => "Infrared",
        }
    }

    fn from_topic_name(name: &str) -> Option<Self> {
        match name {
            "Depth" => Some(StreamKind::Depth),
            "Color" => Some(StreamKind::Color),
            "Infrared" => Some(StreamKind::Infrared),
            _ => None,
        }
    }
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            StreamKind::Depth => "depth",
            StreamKind::Color => "color",
            StreamKind::Infrared => "infrared",
        })
    }
}

/// Which frames a conversion extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamSelection {
    /// Color frames, written as RGB.
    #[default]
    Color,
    /// Raw depth frames, written as grayscale.
    Depth,
    /// Infrared frames, written as grayscale.
    Infrared,
    /// Depth aligned to the color viewpoint and colorized.
    AlignedDepth,
}

impl StreamSelection {
    /// The recorded stream this selection reads from.
    pub fn source_kind(self) -> StreamKind {
        match self {
            StreamSelection::Color => StreamKind::Color,
            StreamSelection::Depth | StreamSelection::AlignedDepth => StreamKind::Depth,
            StreamSelection::Infrared => StreamKind::Infrared,
        }
    }
}

impl FromStr for StreamSelection {
    type Err = BagFramesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "color" => Ok(StreamSelection::Color),
            "depth" => Ok(StreamSelection::Depth),
            "infrared" => Ok(StreamSelection::Infrared),
            "rgbd" => Ok(StreamSelection::AlignedDepth),
            _ => Err(BagFramesError::UnknownStream(value.to_string())),
        }
    }
}

impl Display for StreamSelection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            StreamSelection::Color => "color",
            StreamSelection::Depth => "depth",
            StreamSelection::Infrared => "infrared",
            StreamSelection::AlignedDepth => "rgbd",
        })
    }
}

macro_rules! frame_formats {
    ($($(#[$attr:meta])* $variant:ident => $name:literal),+ $(,)?) => {
        /// Pixel formats known to the RealSense SDK.
        ///
        /// Only a handful can be turned into images (see
        /// [`VideoFrame::to_image`](crate::VideoFrame::to_image)); the rest
        /// are accepted by name so that any SDK format string validates.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum FrameFormat {
            $(
                #[doc = concat!("`", $name, "`")]
                $(#[$attr])*
                $variant,
            )+
        }

        impl FrameFormat {
            /// Every known format, in SDK enumeration order.
            pub const ALL: &'static [FrameFormat] = &[$(FrameFormat::$variant),+];

            /// The SDK's lowercase name for this format.
            pub fn name(self) -> &'static str {
                match self {
                    $(FrameFormat::$variant => $name,)+
                }
            }
        }
    };
}

frame_formats! {
    Any => "any",
    Z16 => "z16",
    Disparity16 => "disparity16",
    Xyz32f => "xyz32f",
    Yuyv => "yuyv",
    #[default]
    Rgb8 => "rgb8",
    Bgr8 => "bgr8",
    Rgba8 => "rgba8",
    Bgra8 => "bgra8",
    Y8 => "y8",
    Y16 => "y16",
    Raw10 => "raw10",
    Raw16 => "raw16",
    Raw8 => "raw8",
    Uyvy => "uyvy",
    MotionRaw => "motion_raw",
    MotionXyz32f => "motion_xyz32f",
    GpioRaw => "gpio_raw",
    SixDof => "six_dof",
    Disparity32 => "disparity32",
    Y10bpack => "y10bpack",
    Distance => "distance",
    Mjpeg => "mjpeg",
    Y8i => "y8i",
    Y12i => "y12i",
    Inzi => "inzi",
    Invi => "invi",
    W10 => "w10",
    Z16h => "z16h",
    Fg => "fg",
    Y411 => "y411",
    Y16i => "y16i",
    M420 => "m420",
    CombinedMotion => "combined_motion",
    Z16i => "z16i",
}

impl FrameFormat {
    /// Map a ROS image encoding to a format.
    ///
    /// RealSense writes Z16 depth as `mono16`, so the stream kind is needed
    /// to tell depth apart from 16-bit infrared.
    pub fn from_ros_encoding(encoding: &str, kind: StreamKind) -> Option<Self> {
        let lower = encoding.to_ascii_lowercase();
        match lower.as_str() {
            "mono16" | "16uc1" if kind == StreamKind::Depth => Some(FrameFormat::Z16),
            "mono16" | "16uc1" => Some(FrameFormat::Y16),
            "mono8" | "8uc1" => Some(FrameFormat::Y8),
            "rgb8" => Some(FrameFormat::Rgb8),
            "bgr8" => Some(FrameFormat::Bgr8),
            "rgba8" => Some(FrameFormat::Rgba8),
            "bgra8" => Some(FrameFormat::Bgra8),
            "yuv422" | "yuyv" => Some(FrameFormat::Yuyv),
            "uyvy" => Some(FrameFormat::Uyvy),
            other => other.parse().ok(),
        }
    }

    /// Formats whose pixels are single 16-bit samples.
    pub fn is_u16_sample(self) -> bool {
        matches!(
            self,
            FrameFormat::Z16 | FrameFormat::Y16 | FrameFormat::Raw16 | FrameFormat::Disparity16
        )
    }

    /// Bytes per pixel for formats with a packed, fixed-size layout.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            FrameFormat::Y8 | FrameFormat::Raw8 => Some(1),
            FrameFormat::Z16
            | FrameFormat::Y16
            | FrameFormat::Raw16
            | FrameFormat::Disparity16
            | FrameFormat::Yuyv
            | FrameFormat::Uyvy => Some(2),
            FrameFormat::Rgb8 | FrameFormat::Bgr8 => Some(3),
            FrameFormat::Rgba8 | FrameFormat::Bgra8 | FrameFormat::Disparity32 => Some(4),
            _ => None,
        }
    }
}

impl FromStr for FrameFormat {
    type Err = BagFramesError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_ascii_lowercase();
        FrameFormat::ALL
            .iter()
            .copied()
            .find(|format| format.name() == lower)
            .ok_or_else(|| BagFramesError::UnknownFormat(value.to_string()))
    }
}

impl Display for FrameFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Lens distortion model of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistortionModel {
    /// Rectilinear images, no distortion.
    #[default]
    None,
    /// Brown-Conrady, projection only.
    ModifiedBrownConrady,
    /// Brown-Conrady, deprojection only.
    InverseBrownConrady,
    /// Full Brown-Conrady.
    BrownConrady,
}

impl DistortionModel {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().replace(['_', '-'], " ").as_str() {
            "modified brown conrady" => DistortionModel::ModifiedBrownConrady,
            "inverse brown conrady" => DistortionModel::InverseBrownConrady,
            "brown conrady" | "plumb bob" => DistortionModel::BrownConrady,
            _ => DistortionModel::None,
        }
    }
}

/// Pinhole camera intrinsics with an optional distortion model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Focal length along x, in pixels.
    pub fx: f32,
    /// Focal length along y, in pixels.
    pub fy: f32,
    /// Principal point x.
    pub ppx: f32,
    /// Principal point y.
    pub ppy: f32,
    /// Distortion model.
    pub model: DistortionModel,
    /// Distortion coefficients `k1, k2, p1, p2, k3`.
    pub coeffs: [f32; 5],
}

impl Intrinsics {
    /// Build from a `sensor_msgs/CameraInfo` message.
    pub fn from_camera_info(info: &CameraInfoMessage) -> Self {
        let mut coeffs = [0.0f32; 5];
        for (slot, value) in coeffs.iter_mut().zip(&info.d) {
            *slot = *value as f32;
        }
        Self {
            width: info.width,
            height: info.height,
            fx: info.k[0] as f32,
            fy: info.k[4] as f32,
            ppx: info.k[2] as f32,
            ppy: info.k[5] as f32,
            model: DistortionModel::from_name(&info.distortion_model),
            coeffs,
        }
    }

    /// Project a 3D point (meters, camera coordinates) to a pixel.
    pub fn project(&self, point: [f32; 3]) -> [f32; 2] {
        let mut x = point[0] / point[2];
        let mut y = point[1] / point[2];

        if matches!(
            self.model,
            DistortionModel::ModifiedBrownConrady | DistortionModel::BrownConrady
        ) {
            let c = &self.coeffs;
            let r2 = x * x + y * y;
            let f = 1.0 + c[0] * r2 + c[1] * r2 * r2 + c[4] * r2 * r2 * r2;
            x *= f;
            y *= f;
            let dx = x + 2.0 * c[2] * x * y + c[3] * (r2 + 2.0 * x * x);
            let dy = y + 2.0 * c[3] * x * y + c[2] * (r2 + 2.0 * y * y);
            x = dx;
            y = dy;
        }

        [x * self.fx + self.ppx, y * self.fy + self.ppy]
    }

    /// Deproject a pixel at the given depth (meters) to a 3D point.
    pub fn deproject(&self, pixel: [f32; 2], depth: f32) -> [f32; 3] {
        let mut x = (pixel[0] - self.ppx) / self.fx;
        let mut y = (pixel[1] - self.ppy) / self.fy;
        let c = &self.coeffs;

        match self.model {
            DistortionModel::InverseBrownConrady => {
                let r2 = x * x + y * y;
                let f = 1.0 + c[0] * r2 + c[1] * r2 * r2 + c[4] * r2 * r2 * r2;
                let ux = x * f + 2.0 * c[2] * x * y + c[3] * (r2 + 2.0 * x * x);
                let uy = y * f + 2.0 * c[3] * x * y + c[2] * (r2 + 2.0 * y * y);
                x = ux;
                y = uy;
            }
            DistortionModel::BrownConrady => {
                // Iterative undistortion.
                let (x0, y0) = (x, y);
                for _ in 0..10 {
                    let r2 = x * x + y * y;
                    let icdist = 1.0 / (1.0 + ((c[4] * r2 + c[1]) * r2 + c[0]) * r2);
                    let delta_x = 2.0 * c[2] * x * y + c[3] * (r2 + 2.0 * x * x);
                    let delta_y = 2.0 * c[3] * x * y + c[2] * (r2 + 2.0 * y * y);
                    x = (x0 - delta_x) * icdist;
                    y = (y0 - delta_y) * icdist;
                }
            }
            DistortionModel::None | DistortionModel::ModifiedBrownConrady => {}
        }

        [depth * x, depth * y, depth]
    }
}

/// Rigid transform between two stream coordinate systems.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    /// Column-major 3x3 rotation.
    pub rotation: [f32; 9],
    /// Translation in meters.
    pub translation: [f32; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Extrinsics {
    /// The transform that leaves points unchanged.
    pub const IDENTITY: Extrinsics = Extrinsics {
        rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        translation: [0.0, 0.0, 0.0],
    };

    /// Build from a `geometry_msgs/Transform` (quaternion + translation).
    pub fn from_transform(transform: &TransformMessage) -> Self {
        let [x, y, z, w] = transform.rotation;
        let norm = (x * x + y * y + z * z + w * w).sqrt();
        let (x, y, z, w) = if norm > 0.0 {
            (x / norm, y / norm, z / norm, w / norm)
        } else {
            (0.0, 0.0, 0.0, 1.0)
        };

        // Row-major entries of the rotation matrix.
        let m = [
            [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - z * w), 2.0 * (x * z + y * w)],
            [2.0 * (x * y + z * w), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - x * w)],
            [2.0 * (x * z - y * w), 2.0 * (y * z + x * w), 1.0 - 2.0 * (x * x + y * y)],
        ];
        let mut rotation = [0.0f32; 9];
        for column in 0..3 {
            for row in 0..3 {
                rotation[column * 3 + row] = m[row][column] as f32;
            }
        }

        Self {
            rotation,
            translation: transform.translation.map(|value| value as f32),
        }
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, point: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0] * point[0] + r[3] * point[1] + r[6] * point[2] + t[0],
            r[1] * point[0] + r[4] * point[1] + r[7] * point[2] + t[1],
            r[2] * point[0] + r[5] * point[1] + r[8] * point[2] + t[2],
        ]
    }

    /// The transform mapping back from the target to the source frame.
    pub fn inverse(&self) -> Self {
        let r = &self.rotation;
        // Transpose of a column-major matrix.
        let rotation = [r[0], r[3], r[6], r[1], r[4], r[7], r[2], r[5], r[8]];
        let t = &self.translation;
        let translation = [
            -(rotation[0] * t[0] + rotation[3] * t[1] + rotation[6] * t[2]),
            -(rotation[1] * t[0] + rotation[4] * t[1] + rotation[7] * t[2]),
            -(rotation[2] * t[0] + rotation[5] * t[1] + rotation[8] * t[2]),
        ];
        Self {
            rotation,
            translation,
        }
    }

    /// Compose: apply `self`, then `next`.
    pub fn then(&self, next: &Extrinsics) -> Self {
        let a = &self.rotation;
        let b = &next.rotation;
        let mut rotation = [0.0f32; 9];
        for column in 0..3 {
            for row in 0..3 {
                rotation[column * 3 + row] = (0..3)
                    .map(|k| b[k * 3 + row] * a[column * 3 + k])
                    .sum();
            }
        }
        Self {
            rotation,
            translation: next.transform_point(self.translation),
        }
    }
}

/// Where a RealSense topic sits in the recording's device tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TopicKind {
    /// `.../<Stream>_<index>/<suffix>`
    Stream {
        sensor: u32,
        kind: StreamKind,
        index: u32,
        suffix: String,
    },
    /// `.../option/Depth Units/value`
    DepthUnits { sensor: u32 },
}

/// Parse a RealSense topic path such as
/// `/device_0/sensor_1/Color_0/image/data`.
pub(crate) fn parse_topic(topic: &str) -> Option<TopicKind> {
    let mut segments = topic.trim_start_matches('/').split('/');
    let device = segments.next()?;
    if !device.starts_with("device_") {
        return None;
    }
    let sensor = segments.next()?.strip_prefix("sensor_")?.parse().ok()?;
    let node = segments.next()?;
    let rest: Vec<&str> = segments.collect();

    if node == "option" {
        return match rest.as_slice() {
            ["Depth Units", "value"] => Some(TopicKind::DepthUnits { sensor }),
            _ => None,
        };
    }

    let (name, index) = node.rsplit_once('_')?;
    Some(TopicKind::Stream {
        sensor,
        kind: StreamKind::from_topic_name(name)?,
        index: index.parse().ok()?,
        suffix: rest.join("/"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_selection_names() {
        assert_eq!("color".parse::<StreamSelection>().unwrap(), StreamSelection::Color);
        assert_eq!("DEPTH".parse::<StreamSelection>().unwrap(), StreamSelection::Depth);
        assert_eq!("Infrared".parse::<StreamSelection>().unwrap(), StreamSelection::Infrared);
        assert_eq!("rgbd".parse::<StreamSelection>().unwrap(), StreamSelection::AlignedDepth);
        assert!(matches!(
            "fisheye".parse::<StreamSelection>(),
            Err(BagFramesError::UnknownStream(_))
        ));
        assert_eq!(StreamSelection::AlignedDepth.source_kind(), StreamKind::Depth);
    }

    #[test]
    fn frame_format_names_round_trip() {
        for format in FrameFormat::ALL {
            assert_eq!(format.name().parse::<FrameFormat>().unwrap(), *format);
        }
        assert_eq!("RGB8".parse::<FrameFormat>().unwrap(), FrameFormat::Rgb8);
        assert_eq!("six_dof".parse::<FrameFormat>().unwrap(), FrameFormat::SixDof);
        assert_eq!("combined_motion".parse::<FrameFormat>().unwrap(), FrameFormat::CombinedMotion);
        assert_eq!("z16i".parse::<FrameFormat>().unwrap(), FrameFormat::Z16i);
        assert_eq!(FrameFormat::default(), FrameFormat::Rgb8);
        assert!(FrameFormat::Z16.is_u16_sample());
        assert!(!FrameFormat::Yuyv.is_u16_sample());
        assert!(matches!(
            "rgb9".parse::<FrameFormat>(),
            Err(BagFramesError::UnknownFormat(_))
        ));
    }

    #[test]
    fn ros_encodings_depend_on_stream_kind() {
        assert_eq!(
            FrameFormat::from_ros_encoding("mono16", StreamKind::Depth),
            Some(FrameFormat::Z16)
        );
        assert_eq!(
            FrameFormat::from_ros_encoding("mono16", StreamKind::Infrared),
            Some(FrameFormat::Y16)
        );
        assert_eq!(
            FrameFormat::from_ros_encoding("yuv422", StreamKind::Color),
            Some(FrameFormat::Yuyv)
        );
        assert_eq!(FrameFormat::from_ros_encoding("weird", StreamKind::Color), None);
    }

    #[test]
    fn topics_are_parsed() {
        assert_eq!(
            parse_topic("/device_0/sensor_1/Color_0/image/data"),
            Some(TopicKind::Stream {
                sensor: 1,
                kind: StreamKind::Color,
                index: 0,
                suffix: "image/data".to_string(),
            })
        );
        assert_eq!(
            parse_topic("/device_0/sensor_0/option/Depth Units/value"),
            Some(TopicKind::DepthUnits { sensor: 0 })
        );
        assert_eq!(parse_topic("/device_0/sensor_2/Accel_0/imu/data"), None);
        assert_eq!(parse_topic("/file_version"), None);
    }

    #[test]
    fn project_inverts_deproject_without_distortion() {
        let intrinsics = Intrinsics {
            width: 640,
            height: 480,
            fx: 600.0,
            fy: 600.0,
            ppx: 320.0,
            ppy: 240.0,
            model: DistortionModel::None,
            coeffs: [0.0; 5],
        };
        let point = intrinsics.deproject([100.0, 50.0], 2.0);
        let pixel = intrinsics.project(point);
        assert!((pixel[0] - 100.0).abs() < 1e-3);
        assert!((pixel[1] - 50.0).abs() < 1e-3);
    }

    #[test]
    fn extrinsics_inverse_and_compose() {
        let transform = TransformMessage {
            translation: [0.1, -0.2, 0.3],
            // 90 degrees about z.
            rotation: [0.0, 0.0, std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2],
        };
        let extrinsics = Extrinsics::from_transform(&transform);
        let moved = extrinsics.transform_point([1.0, 0.0, 0.0]);
        assert!((moved[0] - 0.1).abs() < 1e-5);
        assert!((moved[1] - 0.8).abs() < 1e-5);

        let round_trip = extrinsics.then(&extrinsics.inverse());
        let point = round_trip.transform_point([0.5, 0.25, 2.0]);
        assert!((point[0] - 0.5).abs() < 1e-5);
        assert!((point[1] - 0.25).abs() < 1e-5);
        assert!((point[2] - 2.0).abs() < 1e-5);
    }
}
