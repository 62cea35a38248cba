//! ROS1 bag (format 2.0) container reader.
//!
//! RealSense recordings are ROS bags: a version line followed by a sequence
//! of length-prefixed records. Message and connection records are normally
//! grouped into chunks, which may be compressed. This module walks the file
//! front to back, decompressing one chunk at a time, and yields every message
//! record it finds without interpreting the payload.
//!
//! # Example
//!
//! ```no_run
//! use bagframes::bag::BagFile;
//!
//! let bag = BagFile::open("recording.bag")?;
//! let mut messages = bag.messages()?;
//! while let Some(message) = messages.next() {
//!     let message = message?;
//!     if let Some(connection) = messages.connection(message.conn) {
//!         println!("{} @ {:?}", connection.topic, message.time);
//!     }
//! }
//! # Ok::<(), bagframes::BagFramesError>(())
//! ```

use std::{
    collections::{HashMap, VecDeque},
    fs::File,
    io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::BagFramesError;

/// Magic line every version 2.0 bag starts with.
pub const BAG_MAGIC: &[u8] = b"#ROSBAG V2.0\n";

const OP_MESSAGE_DATA: u8 = 0x02;
const OP_BAG_HEADER: u8 = 0x03;
const OP_INDEX_DATA: u8 = 0x04;
const OP_CHUNK: u8 = 0x05;
const OP_CHUNK_INFO: u8 = 0x06;
const OP_CONNECTION: u8 = 0x07;

/// A ROS timestamp: seconds and nanoseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RosTime {
    /// Whole seconds.
    pub sec: u32,
    /// Nanoseconds within the second.
    pub nsec: u32,
}

impl RosTime {
    pub(crate) fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 8 {
            return None;
        }
        Some(Self {
            sec: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            nsec: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Convert to a [`Duration`] measured from the epoch.
    pub fn as_duration(self) -> Duration {
        Duration::new(u64::from(self.sec), self.nsec)
    }
}

/// A topic connection declared in the bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Connection id referenced by message records.
    pub id: u32,
    /// Topic name, e.g. `/device_0/sensor_1/Color_0/image/data`.
    pub topic: String,
    /// ROS message type, e.g. `sensor_msgs/Image`.
    pub datatype: String,
    /// MD5 of the message definition.
    pub md5sum: String,
}

/// One serialized message.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Connection id; resolve with [`Messages::connection`].
    pub conn: u32,
    /// Receive time recorded by the bag writer.
    pub time: RosTime,
    /// Serialized message payload.
    pub data: Vec<u8>,
}

/// Values from the bag header record.
#[derive(Debug, Clone, Copy, Default)]
pub struct BagHeader {
    /// Offset of the first index record; 0 if the bag was never closed.
    pub index_pos: u64,
    /// Number of unique connections.
    pub conn_count: u32,
    /// Number of chunk records.
    pub chunk_count: u32,
}

/// A `name=value` field list, the header format shared by every record.
#[derive(Debug, Default)]
pub(crate) struct FieldList {
    fields: Vec<(String, Vec<u8>)>,
}

impl FieldList {
    pub(crate) fn parse(bytes: &[u8], offset: u64) -> Result<Self, BagFramesError> {
        let mut fields = Vec::new();
        let mut cursor = 0usize;
        while cursor < bytes.len() {
            if bytes.len() - cursor < 4 {
                return Err(BagFramesError::bag_format(offset, "truncated header field length"));
            }
            let len = u32::from_le_bytes([
                bytes[cursor],
                bytes[cursor + 1],
                bytes[cursor + 2],
                bytes[cursor + 3],
            ]) as usize;
            cursor += 4;
            if bytes.len() - cursor < len {
                return Err(BagFramesError::bag_format(offset, "header field overruns header"));
            }
            let field = &bytes[cursor..cursor + len];
            cursor += len;

            let separator = field
                .iter()
                .position(|&b| b == b'=')
                .ok_or_else(|| BagFramesError::bag_format(offset, "header field without '='"))?;
            let name = String::from_utf8_lossy(&field[..separator]).into_owned();
            fields.push((name, field[separator + 1..].to_vec()));
        }
        Ok(Self { fields })
    }

    pub(crate) fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_slice())
    }

    fn require(&self, name: &str, offset: u64) -> Result<&[u8], BagFramesError> {
        self.get(name)
            .ok_or_else(|| BagFramesError::bag_format(offset, format!("missing '{name}' field")))
    }

    fn op(&self, offset: u64) -> Result<u8, BagFramesError> {
        match self.require("op", offset)? {
            [op] => Ok(*op),
            _ => Err(BagFramesError::bag_format(offset, "'op' field must be one byte")),
        }
    }

    fn u32(&self, name: &str, offset: u64) -> Result<u32, BagFramesError> {
        let value = self.require(name, offset)?;
        let bytes: [u8; 4] = value
            .try_into()
            .map_err(|_| BagFramesError::bag_format(offset, format!("'{name}' is not a u32")))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&self, name: &str, offset: u64) -> Result<u64, BagFramesError> {
        let value = self.require(name, offset)?;
        let bytes: [u8; 8] = value
            .try_into()
            .map_err(|_| BagFramesError::bag_format(offset, format!("'{name}' is not a u64")))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn string(&self, name: &str, offset: u64) -> Result<String, BagFramesError> {
        Ok(String::from_utf8_lossy(self.require(name, offset)?).into_owned())
    }

    fn time(&self, name: &str, offset: u64) -> Result<RosTime, BagFramesError> {
        RosTime::from_le_bytes(self.require(name, offset)?)
            .ok_or_else(|| BagFramesError::bag_format(offset, format!("'{name}' is not a time")))
    }
}

struct Record {
    offset: u64,
    header_len: u32,
    header: FieldList,
    data: Vec<u8>,
}

impl Record {
    /// Bytes this record occupies on disk, length prefixes included.
    fn size(&self) -> u64 {
        8 + u64::from(self.header_len) + self.data.len() as u64
    }
}

/// Read a little-endian u32, returning `Ok(None)` on a clean end of input.
fn read_length<R: Read>(reader: &mut R, offset: u64) -> Result<Option<u32>, BagFramesError> {
    let mut buffer = [0u8; 4];
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(BagFramesError::bag_format(offset, "truncated record length")),
            Ok(n) => filled += n,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error.into()),
        }
    }
    Ok(Some(u32::from_le_bytes(buffer)))
}

fn read_block<R: Read>(
    reader: &mut R,
    len: u32,
    remaining: u64,
    offset: u64,
    what: &str,
) -> Result<Vec<u8>, BagFramesError> {
    if u64::from(len) > remaining {
        return Err(BagFramesError::bag_format(
            offset,
            format!("{what} of {len} bytes runs past end of data"),
        ));
    }
    let mut block = vec![0u8; len as usize];
    reader.read_exact(&mut block).map_err(|error| {
        if error.kind() == ErrorKind::UnexpectedEof {
            BagFramesError::bag_format(offset, format!("truncated {what}"))
        } else {
            error.into()
        }
    })?;
    Ok(block)
}

/// Read one record. `remaining` bounds allocations by the bytes left in the
/// enclosing file or chunk.
fn read_record<R: Read>(
    reader: &mut R,
    offset: u64,
    remaining: u64,
) -> Result<Option<Record>, BagFramesError> {
    let Some(header_len) = read_length(reader, offset)? else {
        return Ok(None);
    };
    let remaining = remaining.saturating_sub(4);
    let header_bytes = read_block(reader, header_len, remaining, offset, "record header")?;
    let remaining = remaining - u64::from(header_len);

    let data_len = read_length(reader, offset)?
        .ok_or_else(|| BagFramesError::bag_format(offset, "missing record data length"))?;
    let data = read_block(reader, data_len, remaining.saturating_sub(4), offset, "record data")?;

    Ok(Some(Record {
        offset,
        header_len,
        header: FieldList::parse(&header_bytes, offset)?,
        data,
    }))
}

/// Expand a chunk body to the `size` bytes its header declares.
///
/// The lz4 stream is read through a `size + 1` byte window, so a corrupt
/// header cannot trigger an allocation beyond what the chunk really holds.
fn decompress_chunk(
    compression: &str,
    data: Vec<u8>,
    size: u32,
    offset: u64,
) -> Result<Vec<u8>, BagFramesError> {
    let raw = match compression {
        "none" => data,
        "lz4" => {
            let decoder = lz4::Decoder::new(Cursor::new(data))?;
            let mut buffer = Vec::new();
            decoder.take(u64::from(size) + 1).read_to_end(&mut buffer)?;
            buffer
        }
        other => return Err(BagFramesError::UnsupportedCompression(other.to_string())),
    };
    if raw.len() != size as usize {
        return Err(BagFramesError::bag_format(
            offset,
            format!("chunk decompressed to {} bytes, expected {size}", raw.len()),
        ));
    }
    Ok(raw)
}

/// An opened bag file.
#[derive(Debug)]
pub struct BagFile {
    path: PathBuf,
    header: BagHeader,
    file_len: u64,
    /// Offset of the first record after the bag header.
    records_start: u64,
}

impl BagFile {
    /// Open a bag and read its header record.
    ///
    /// # Errors
    ///
    /// - [`BagFramesError::FileOpen`] if the file cannot be read or does not
    ///   start with the `#ROSBAG V2.0` magic.
    /// - [`BagFramesError::BagFormat`] if the header record is malformed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BagFramesError> {
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening bag file: {}", path.display());

        let file = File::open(&path).map_err(|error| BagFramesError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; BAG_MAGIC.len()];
        if reader.read_exact(&mut magic).is_err() || magic != BAG_MAGIC {
            return Err(BagFramesError::FileOpen {
                path,
                reason: "not a ROS bag version 2.0 file".to_string(),
            });
        }

        let offset = BAG_MAGIC.len() as u64;
        let record = read_record(&mut reader, offset, file_len - offset)?
            .ok_or_else(|| BagFramesError::bag_format(offset, "missing bag header record"))?;
        if record.header.op(offset)? != OP_BAG_HEADER {
            return Err(BagFramesError::bag_format(offset, "first record is not a bag header"));
        }
        let header = BagHeader {
            index_pos: record.header.u64("index_pos", offset)?,
            conn_count: record.header.u32("conn_count", offset)?,
            chunk_count: record.header.u32("chunk_count", offset)?,
        };
        if header.index_pos == 0 {
            log::warn!(
                "Bag {} has no index (recording was not closed cleanly); reading sequentially",
                path.display()
            );
        }
        let records_start = offset + record.size();

        log::debug!(
            "Bag header: {} connections, {} chunks",
            header.conn_count,
            header.chunk_count
        );

        Ok(Self {
            path,
            header,
            file_len,
            records_start,
        })
    }

    /// Path this bag was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed bag header.
    pub fn header(&self) -> BagHeader {
        self.header
    }

    /// Start a fresh pass over every message record in the file.
    ///
    /// Each call reopens the file, so several passes may run one after
    /// another.
    pub fn messages(&self) -> Result<Messages, BagFramesError> {
        let mut file = File::open(&self.path).map_err(|error| BagFramesError::FileOpen {
            path: self.path.clone(),
            reason: error.to_string(),
        })?;
        file.seek(SeekFrom::Start(self.records_start))?;
        Ok(Messages {
            reader: BufReader::new(file),
            position: self.records_start,
            file_len: self.file_len,
            connections: HashMap::new(),
            pending: VecDeque::new(),
            done: false,
        })
    }
}

/// Lazy iterator over the message records of a bag.
///
/// Connection records encountered along the way are collected and can be
/// looked up with [`connection`](Messages::connection).
pub struct Messages {
    reader: BufReader<File>,
    position: u64,
    file_len: u64,
    connections: HashMap<u32, Connection>,
    pending: VecDeque<MessageRecord>,
    done: bool,
}

impl Messages {
    /// Look up a connection declared so far.
    pub fn connection(&self, id: u32) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// All connections declared so far.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    fn add_connection(&mut self, record: &Record) -> Result<(), BagFramesError> {
        let offset = record.offset;
        let id = record.header.u32("conn", offset)?;
        if self.connections.contains_key(&id) {
            return Ok(());
        }
        let topic = record.header.string("topic", offset)?;
        let details = FieldList::parse(&record.data, offset)?;
        let datatype = details
            .get("type")
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default();
        let md5sum = details
            .get("md5sum")
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default();
        log::trace!("Connection {id}: {topic} [{datatype}]");
        self.connections.insert(
            id,
            Connection {
                id,
                topic,
                datatype,
                md5sum,
            },
        );
        Ok(())
    }

    fn message_from(record: Record) -> Result<MessageRecord, BagFramesError> {
        let offset = record.offset;
        Ok(MessageRecord {
            conn: record.header.u32("conn", offset)?,
            time: record.header.time("time", offset)?,
            data: record.data,
        })
    }

    fn load_chunk(&mut self, record: Record) -> Result<(), BagFramesError> {
        let offset = record.offset;
        let compression = record.header.string("compression", offset)?;
        let size = record.header.u32("size", offset)?;
        let raw = decompress_chunk(&compression, record.data, size, offset)?;

        let total = raw.len() as u64;
        let mut cursor = Cursor::new(raw);
        let mut messages = Vec::new();
        loop {
            let remaining = total - cursor.position();
            let Some(inner) = read_record(&mut cursor, offset, remaining)? else {
                break;
            };
            match inner.header.op(offset)? {
                OP_CONNECTION => self.add_connection(&inner)?,
                OP_MESSAGE_DATA => messages.push(Self::message_from(inner)?),
                op => log::trace!("Skipping record op 0x{op:02x} inside chunk"),
            }
        }
        messages.sort_by_key(|message| message.time);
        self.pending.extend(messages);
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<MessageRecord>, BagFramesError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            let offset = self.position;
            let Some(record) = read_record(
                &mut self.reader,
                offset,
                self.file_len.saturating_sub(offset),
            )?
            else {
                return Ok(None);
            };
            self.position += record.size();

            match record.header.op(offset)? {
                OP_CHUNK => self.load_chunk(record)?,
                OP_CONNECTION => self.add_connection(&record)?,
                OP_MESSAGE_DATA => return Ok(Some(Self::message_from(record)?)),
                OP_INDEX_DATA | OP_CHUNK_INFO | OP_BAG_HEADER => {}
                op => log::debug!("Skipping unknown record op 0x{op:02x} at offset {offset}"),
            }
        }
    }
}

impl Iterator for Messages {
    type Item = Result<MessageRecord, BagFramesError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
