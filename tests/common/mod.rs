//! Synthetic RealSense recordings for integration tests.
//!
//! [`CaptureBuilder`] writes a small ROS bag v2.0 file laid out the way the
//! RealSense recorder lays one out: stream info, camera info and extrinsics
//! topics up front, then one chunk per frame set holding a depth, a color and
//! optionally an infrared image, followed by the index section.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const OP_MESSAGE_DATA: u8 = 0x02;
const OP_BAG_HEADER: u8 = 0x03;
const OP_INDEX_DATA: u8 = 0x04;
const OP_CHUNK: u8 = 0x05;
const OP_CHUNK_INFO: u8 = 0x06;
const OP_CONNECTION: u8 = 0x07;

/// Nanoseconds between frame sets (30 fps).
pub const FRAME_INTERVAL_NS: u64 = 33_333_333;

/// Chunk compression used by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
    Bz2,
}

impl Compression {
    fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Bz2 => "bz2",
        }
    }
}

fn field(name: &str, value: &[u8]) -> Vec<u8> {
    let mut out = ((name.len() + 1 + value.len()) as u32).to_le_bytes().to_vec();
    out.extend_from_slice(name.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out
}

fn record(header_fields: &[Vec<u8>], data: &[u8]) -> Vec<u8> {
    let header: Vec<u8> = header_fields.concat();
    let mut out = (header.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&header);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn time_bytes(ns: u64) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&((ns / 1_000_000_000) as u32).to_le_bytes());
    out[4..].copy_from_slice(&((ns % 1_000_000_000) as u32).to_le_bytes());
    out
}

/// Little-endian ROS1 message serializer.
#[derive(Default)]
struct RosWriter(Vec<u8>);

impl RosWriter {
    fn u8(mut self, value: u8) -> Self {
        self.0.push(value);
        self
    }
    fn u32(mut self, value: u32) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }
    fn f32(mut self, value: f32) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }
    fn f64s(mut self, values: &[f64]) -> Self {
        for value in values {
            self.0.extend_from_slice(&value.to_le_bytes());
        }
        self
    }
    fn string(mut self, value: &str) -> Self {
        self.0.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.0.extend_from_slice(value.as_bytes());
        self
    }
    fn bytes(mut self, value: &[u8]) -> Self {
        self.0.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.0.extend_from_slice(value);
        self
    }
    fn header(self, seq: u32, stamp_ns: u64, frame_id: &str) -> Self {
        let mut writer = self.u32(seq);
        writer.0.extend_from_slice(&time_bytes(stamp_ns));
        writer.string(frame_id)
    }
}

/// One image stream of the synthetic recording.
#[derive(Debug, Clone)]
pub struct StreamFixture {
    pub topic: &'static str,
    pub width: u32,
    pub height: u32,
    pub encoding: &'static str,
    pub bytes_per_pixel: u32,
    /// Frame sets (0-based) in which this stream has no frame.
    pub missing: Vec<u32>,
}

impl StreamFixture {
    fn prefix(&self) -> &str {
        self.topic.trim_end_matches("/image/data")
    }

    fn pixels(&self, set: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity((self.width * self.height * self.bytes_per_pixel) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                match self.encoding {
                    "mono16" => {
                        let depth_mm = 1000 + 100 * x as u16 + 10 * y as u16;
                        data.extend_from_slice(&depth_mm.to_le_bytes());
                    }
                    "mono8" => data.push((x * 16 + y) as u8),
                    _ => data.extend_from_slice(&[(x * 30) as u8, (y * 40) as u8, (set * 20) as u8]),
                }
            }
        }
        data
    }
}

/// Depth stream at `Depth_0` of sensor 0.
pub fn depth_stream(width: u32, height: u32) -> StreamFixture {
    StreamFixture {
        topic: "/device_0/sensor_0/Depth_0/image/data",
        width,
        height,
        encoding: "mono16",
        bytes_per_pixel: 2,
        missing: Vec::new(),
    }
}

/// Color stream at `Color_0` of sensor 1.
pub fn color_stream(width: u32, height: u32) -> StreamFixture {
    StreamFixture {
        topic: "/device_0/sensor_1/Color_0/image/data",
        width,
        height,
        encoding: "rgb8",
        bytes_per_pixel: 3,
        missing: Vec::new(),
    }
}

/// Left infrared stream at `Infrared_1` of sensor 0.
pub fn infrared_stream(width: u32, height: u32) -> StreamFixture {
    StreamFixture {
        topic: "/device_0/sensor_0/Infrared_1/image/data",
        width,
        height,
        encoding: "mono8",
        bytes_per_pixel: 1,
        missing: Vec::new(),
    }
}

/// Builds a synthetic `.bag` capture.
#[derive(Debug, Clone)]
pub struct CaptureBuilder {
    frame_sets: u32,
    streams: Vec<StreamFixture>,
    compression: Compression,
    depth_units: Option<f32>,
    fps: u32,
    corrupt_set: Option<u32>,
}

impl CaptureBuilder {
    /// `frame_sets` frame sets of 8x6 depth and color.
    pub fn new(frame_sets: u32) -> Self {
        Self {
            frame_sets,
            streams: vec![depth_stream(8, 6), color_stream(8, 6)],
            compression: Compression::None,
            depth_units: Some(0.001),
            fps: 30,
            corrupt_set: None,
        }
    }

    pub fn streams(mut self, streams: Vec<StreamFixture>) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_stream(mut self, stream: StreamFixture) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn depth_units(mut self, depth_units: Option<f32>) -> Self {
        self.depth_units = depth_units;
        self
    }

    /// Give the last stream's image in frame set `set` a pixel buffer
    /// shorter than `step * height`.
    pub fn corrupt_frame(mut self, set: u32) -> Self {
        self.corrupt_set = Some(set);
        self
    }

    fn connection_record(conn: u32, topic: &str, datatype: &str) -> Vec<u8> {
        let details = [
            field("topic", topic.as_bytes()),
            field("type", datatype.as_bytes()),
            field("md5sum", b"00000000000000000000000000000000"),
        ]
        .concat();
        record(
            &[
                field("op", &[OP_CONNECTION]),
                field("conn", &conn.to_le_bytes()),
                field("topic", topic.as_bytes()),
            ],
            &details,
        )
    }

    fn message_record(conn: u32, time_ns: u64, data: &[u8]) -> Vec<u8> {
        record(
            &[
                field("op", &[OP_MESSAGE_DATA]),
                field("conn", &conn.to_le_bytes()),
                field("time", &time_bytes(time_ns)),
            ],
            data,
        )
    }

    fn camera_info(stream: &StreamFixture) -> Vec<u8> {
        let fx = f64::from(stream.width);
        let ppx = (f64::from(stream.width) - 1.0) / 2.0;
        let ppy = (f64::from(stream.height) - 1.0) / 2.0;
        let k = [fx, 0.0, ppx, 0.0, fx, ppy, 0.0, 0.0, 1.0];
        RosWriter::default()
            .header(0, 0, "")
            .u32(stream.height)
            .u32(stream.width)
            .string("Brown Conrady")
            .u32(5)
            .f64s(&[0.0; 5])
            .f64s(&k)
            .f64s(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
            .f64s(&[fx, 0.0, ppx, 0.0, 0.0, fx, ppy, 0.0, 0.0, 0.0, 1.0, 0.0])
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(0)
            .u32(0)
            .u8(0)
            .0
    }

    fn image(stream: &StreamFixture, set: u32, stamp_ns: u64, corrupt: bool) -> Vec<u8> {
        let mut pixels = stream.pixels(set);
        if corrupt {
            pixels.truncate(pixels.len() / 2);
        }
        RosWriter::default()
            .header(set, stamp_ns, "")
            .u32(stream.height)
            .u32(stream.width)
            .string(stream.encoding)
            .u8(0)
            .u32(stream.width * stream.bytes_per_pixel)
            .bytes(&pixels)
            .0
    }

    fn compress(&self, raw: &[u8]) -> Vec<u8> {
        match self.compression {
            Compression::Lz4 => {
                let mut encoder = lz4::EncoderBuilder::new().build(Vec::new()).unwrap();
                encoder.write_all(raw).unwrap();
                let (compressed, result) = encoder.finish();
                result.unwrap();
                compressed
            }
            Compression::None | Compression::Bz2 => raw.to_vec(),
        }
    }

    /// Serialize the recording.
    pub fn build(&self) -> Vec<u8> {
        let base_ns = 1_600_000_000 * 1_000_000_000u64;
        let mut connections: Vec<(u32, String, &'static str)> = Vec::new();
        let mut next_conn = 0u32;
        let mut add = |topic: String, datatype: &'static str| {
            let conn = next_conn;
            next_conn += 1;
            connections.push((conn, topic, datatype));
            conn
        };

        // Static metadata, recorded before the first frame.
        let mut metadata: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut image_conns = Vec::new();
        for stream in &self.streams {
            let info = add(format!("{}/info", stream.prefix()), "realsense_msgs/StreamInfo");
            metadata.push((
                info,
                RosWriter::default().u32(self.fps).string(stream.encoding).u8(1).0,
            ));
            let camera = add(format!("{}/info/camera_info", stream.prefix()), "sensor_msgs/CameraInfo");
            metadata.push((camera, Self::camera_info(stream)));
            let tf = add(format!("{}/tf/0", stream.prefix()), "geometry_msgs/Transform");
            metadata.push((tf, RosWriter::default().f64s(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]).0));
            image_conns.push(add(stream.topic.to_string(), "sensor_msgs/Image"));
        }
        if let Some(units) = self.depth_units {
            let conn = add(
                "/device_0/sensor_0/option/Depth Units/value".to_string(),
                "std_msgs/Float32",
            );
            metadata.push((conn, RosWriter::default().f32(units).0));
        }

        let mut chunks: Vec<Vec<u8>> = Vec::new();
        let mut declared = vec![false; connections.len()];
        let mut chunk_of = |records: Vec<(u32, u64, Vec<u8>)>| {
            let mut raw = Vec::new();
            for (conn, time_ns, data) in records {
                if !declared[conn as usize] {
                    declared[conn as usize] = true;
                    let (_, topic, datatype) = &connections[conn as usize];
                    raw.extend(Self::connection_record(conn, topic, datatype));
                }
                raw.extend(Self::message_record(conn, time_ns, &data));
            }
            raw
        };

        let mut raw_chunks = vec![chunk_of(
            metadata
                .into_iter()
                .map(|(conn, data)| (conn, base_ns, data))
                .collect(),
        )];
        for set in 0..self.frame_sets {
            let stamp = base_ns + u64::from(set + 1) * FRAME_INTERVAL_NS;
            let records = self
                .streams
                .iter()
                .zip(&image_conns)
                .enumerate()
                .filter(|(_, (stream, _))| !stream.missing.contains(&set))
                .map(|(position, (stream, conn))| {
                    let corrupt = position + 1 == self.streams.len() && self.corrupt_set == Some(set);
                    (*conn, stamp + position as u64 * 1_000, Self::image(stream, set, stamp, corrupt))
                })
                .collect();
            raw_chunks.push(chunk_of(records));
        }

        for raw in &raw_chunks {
            let compressed = self.compress(raw);
            let chunk = record(
                &[
                    field("op", &[OP_CHUNK]),
                    field("compression", self.compression.name().as_bytes()),
                    field("size", &(raw.len() as u32).to_le_bytes()),
                ],
                &compressed,
            );
            chunks.push(chunk);
        }

        let mut body = Vec::new();
        let mut chunk_positions = Vec::new();
        let header_placeholder_len = {
            let header = Self::bag_header(0, 0, 0);
            b"#ROSBAG V2.0\n".len() + header.len()
        };
        for chunk in &chunks {
            chunk_positions.push((header_placeholder_len + body.len()) as u64);
            body.extend_from_slice(chunk);
            body.extend(record(
                &[
                    field("op", &[OP_INDEX_DATA]),
                    field("ver", &1u32.to_le_bytes()),
                    field("conn", &0u32.to_le_bytes()),
                    field("count", &0u32.to_le_bytes()),
                ],
                &[],
            ));
        }

        let index_pos = (header_placeholder_len + body.len()) as u64;
        for (conn, topic, datatype) in &connections {
            body.extend(Self::connection_record(*conn, topic, datatype));
        }
        for position in &chunk_positions {
            body.extend(record(
                &[
                    field("op", &[OP_CHUNK_INFO]),
                    field("ver", &1u32.to_le_bytes()),
                    field("chunk_pos", &position.to_le_bytes()),
                    field("start_time", &time_bytes(base_ns)),
                    field("end_time", &time_bytes(base_ns)),
                    field("count", &0u32.to_le_bytes()),
                ],
                &[],
            ));
        }

        let mut file = b"#ROSBAG V2.0\n".to_vec();
        file.extend(Self::bag_header(
            index_pos,
            connections.len() as u32,
            chunks.len() as u32,
        ));
        file.extend(body);
        file
    }

    fn bag_header(index_pos: u64, conn_count: u32, chunk_count: u32) -> Vec<u8> {
        record(
            &[
                field("op", &[OP_BAG_HEADER]),
                field("index_pos", &index_pos.to_le_bytes()),
                field("conn_count", &conn_count.to_le_bytes()),
                field("chunk_count", &chunk_count.to_le_bytes()),
            ],
            &[b' '; 64],
        )
    }

    /// Write the recording to `dir/name` and return its path.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, self.build()).unwrap();
        path
    }
}

/// Create an empty `frames` directory under `root` for image output.
pub fn frames_dir(root: &Path) -> PathBuf {
    let dir = root.join("frames");
    fs::create_dir(&dir).expect("Failed to create frames dir");
    dir
}

/// Sorted file names in a directory.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Returns `true` if an error message says the local FFmpeg lacks an encoder.
pub fn encoder_unavailable(message: &str) -> bool {
    message.contains("cannot open encoder") || message.contains("not available") || message.contains("codec")
}
