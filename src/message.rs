//! Deserializers for the ROS messages found in RealSense recordings.
//!
//! ROS1 serialization is little-endian and unpadded: strings and
//! variable-length arrays carry a `u32` length prefix, fixed-size arrays do
//! not.

use crate::bag::RosTime;
use crate::error::BagFramesError;

/// Sequential little-endian reader over a message payload.
pub(crate) struct MessageReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
    what: &'static str,
}

impl<'a> MessageReader<'a> {
    pub(crate) fn new(bytes: &'a [u8], what: &'static str) -> Self {
        Self {
            bytes,
            cursor: 0,
            what,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BagFramesError> {
        if self.bytes.len() - self.cursor < len {
            return Err(BagFramesError::bag_format(
                0,
                format!(
                    "{} payload truncated at byte {} (needed {len} more)",
                    self.what, self.cursor
                ),
            ));
        }
        let slice = &self.bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, BagFramesError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32, BagFramesError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn f32(&mut self) -> Result<f32, BagFramesError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub(crate) fn f64(&mut self) -> Result<f64, BagFramesError> {
        let bytes = self.take(8)?;
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(array))
    }

    pub(crate) fn time(&mut self) -> Result<RosTime, BagFramesError> {
        Ok(RosTime {
            sec: self.u32()?,
            nsec: self.u32()?,
        })
    }

    pub(crate) fn string(&mut self) -> Result<String, BagFramesError> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    pub(crate) fn bytes(&mut self) -> Result<Vec<u8>, BagFramesError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn f64_array<const N: usize>(&mut self) -> Result<[f64; N], BagFramesError> {
        let mut values = [0.0; N];
        for value in &mut values {
            *value = self.f64()?;
        }
        Ok(values)
    }

    pub(crate) fn f64_vec(&mut self) -> Result<Vec<f64>, BagFramesError> {
        let len = self.u32()? as usize;
        (0..len).map(|_| self.f64()).collect()
    }
}

/// `std_msgs/Header`.
#[derive(Debug, Clone, Default)]
pub struct Header {
    /// Sequence number; RealSense stores the frame number here.
    pub seq: u32,
    /// Capture timestamp.
    pub stamp: RosTime,
    /// Coordinate frame id.
    pub frame_id: String,
}

impl Header {
    fn read(reader: &mut MessageReader<'_>) -> Result<Self, BagFramesError> {
        Ok(Self {
            seq: reader.u32()?,
            stamp: reader.time()?,
            frame_id: reader.string()?,
        })
    }
}

/// `sensor_msgs/Image`.
#[derive(Debug, Clone)]
pub struct ImageMessage {
    /// Message header.
    pub header: Header,
    /// Rows.
    pub height: u32,
    /// Columns.
    pub width: u32,
    /// Pixel encoding, e.g. `rgb8`, `mono16`.
    pub encoding: String,
    /// Non-zero if multi-byte pixels are big-endian.
    pub is_bigendian: u8,
    /// Row length in bytes.
    pub step: u32,
    /// Pixel data, `step * height` bytes.
    pub data: Vec<u8>,
}

impl ImageMessage {
    /// Decode a serialized `sensor_msgs/Image`.
    pub fn decode(bytes: &[u8]) -> Result<Self, BagFramesError> {
        let mut reader = MessageReader::new(bytes, "sensor_msgs/Image");
        Ok(Self {
            header: Header::read(&mut reader)?,
            height: reader.u32()?,
            width: reader.u32()?,
            encoding: reader.string()?,
            is_bigendian: reader.u8()?,
            step: reader.u32()?,
            data: reader.bytes()?,
        })
    }
}

/// `sensor_msgs/CameraInfo`, reduced to the fields used for alignment.
#[derive(Debug, Clone)]
pub struct CameraInfoMessage {
    /// Message header.
    pub header: Header,
    /// Image rows.
    pub height: u32,
    /// Image columns.
    pub width: u32,
    /// Distortion model name.
    pub distortion_model: String,
    /// Distortion coefficients.
    pub d: Vec<f64>,
    /// Row-major 3x3 intrinsic matrix.
    pub k: [f64; 9],
}

impl CameraInfoMessage {
    /// Decode a serialized `sensor_msgs/CameraInfo`.
    ///
    /// Trailing fields (`R`, `P`, binning, ROI) are not needed and are not
    /// read.
    pub fn decode(bytes: &[u8]) -> Result<Self, BagFramesError> {
        let mut reader = MessageReader::new(bytes, "sensor_msgs/CameraInfo");
        Ok(Self {
            header: Header::read(&mut reader)?,
            height: reader.u32()?,
            width: reader.u32()?,
            distortion_model: reader.string()?,
            d: reader.f64_vec()?,
            k: reader.f64_array::<9>()?,
        })
    }
}

/// `geometry_msgs/Transform`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMessage {
    /// Translation in meters.
    pub translation: [f64; 3],
    /// Rotation quaternion `(x, y, z, w)`.
    pub rotation: [f64; 4],
}

impl TransformMessage {
    /// Decode a serialized `geometry_msgs/Transform`.
    pub fn decode(bytes: &[u8]) -> Result<Self, BagFramesError> {
        let mut reader = MessageReader::new(bytes, "geometry_msgs/Transform");
        Ok(Self {
            translation: reader.f64_array::<3>()?,
            rotation: reader.f64_array::<4>()?,
        })
    }
}

/// `realsense_msgs/StreamInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfoMessage {
    /// Nominal frame rate.
    pub fps: u32,
    /// Recorded pixel encoding.
    pub encoding: String,
    /// Whether the profile was the SDK's recommended default.
    pub is_recommended: bool,
}

impl StreamInfoMessage {
    /// Decode a serialized `realsense_msgs/StreamInfo`.
    pub fn decode(bytes: &[u8]) -> Result<Self, BagFramesError> {
        let mut reader = MessageReader::new(bytes, "realsense_msgs/StreamInfo");
        Ok(Self {
            fps: reader.u32()?,
            encoding: reader.string()?,
            is_recommended: reader.u8()? != 0,
        })
    }
}

/// Decode a serialized `std_msgs/Float32`.
pub fn decode_float32(bytes: &[u8]) -> Result<f32, BagFramesError> {
    MessageReader::new(bytes, "std_msgs/Float32").f32()
}
