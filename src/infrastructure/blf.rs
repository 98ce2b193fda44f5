// Binary logging format (BLF) reader and writer for classic CAN frames
use crate::domain::frame::{Frame, TimestampDomain, MAX_CLASSIC_PAYLOAD};
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom, Write};
use thiserror::Error;

const FILE_SIGNATURE: &[u8; 4] = b"LOGG";
const OBJ_SIGNATURE: &[u8; 4] = b"LOBJ";
const FILE_HEADER_SIZE: usize = 144;
/// Signature, sizes, counts and the two SYSTEMTIME fields.
const FILE_HEADER_FIXED: usize = 72;
const OBJ_BASE_SIZE: usize = 16;
const OBJ_V1_SIZE: usize = 16;
const CONTAINER_HEADER_SIZE: usize = 16;
const CAN_MSG_SIZE: usize = 16;
/// Uncompressed bytes collected before a container is flushed.
const MAX_CONTAINER_SIZE: usize = 128 * 1024;

const CAN_MESSAGE: u32 = 1;
const LOG_CONTAINER: u32 = 10;
const CAN_MESSAGE2: u32 = 86;

const NO_COMPRESSION: u16 = 0;
const ZLIB_DEFLATE: u16 = 2;

const TIME_TEN_MICS: u32 = 0x0000_0001;
const TIME_ONE_NANS: u32 = 0x0000_0002;

const CAN_MSG_EXT: u32 = 0x8000_0000;
const REMOTE_FLAG: u8 = 0x80;

const APPLICATION_ID: u8 = 5;

#[derive(Debug, Error)]
pub enum LogFormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad signature: expected {expected}, found {found:?}")]
    BadSignature { expected: &'static str, found: [u8; 4] },
    #[error("unsupported container compression method {0}")]
    UnsupportedCompression(u16),
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("corrupt log: {0}")]
    Corrupt(String),
}

/// Fixed portion of the BLF file header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHeader {
    pub header_size: u32,
    pub file_size: u64,
    pub uncompressed_size: u64,
    pub object_count: u32,
    pub start: [u16; 8],
    pub stop: [u16; 8],
}

impl FileHeader {
    fn decode(mut buf: &[u8]) -> Result<Self, LogFormatError> {
        if buf.len() < FILE_HEADER_FIXED {
            return Err(LogFormatError::Truncated("file header"));
        }
        let signature = read_signature(&mut buf);
        if &signature != FILE_SIGNATURE {
            return Err(LogFormatError::BadSignature {
                expected: "LOGG",
                found: signature,
            });
        }

        let header_size = buf.get_u32_le();
        buf.advance(8); // application and format version bytes
        let file_size = buf.get_u64_le();
        let uncompressed_size = buf.get_u64_le();
        let object_count = buf.get_u32_le();
        let _objects_read = buf.get_u32_le();
        let start = read_systemtime(&mut buf);
        let stop = read_systemtime(&mut buf);

        Ok(Self {
            header_size,
            file_size,
            uncompressed_size,
            object_count,
            start,
            stop,
        })
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FILE_HEADER_SIZE);
        buf.put_slice(FILE_SIGNATURE);
        buf.put_u32_le(FILE_HEADER_SIZE as u32);
        buf.put_u8(APPLICATION_ID);
        buf.put_slice(&[0, 0, 0]); // application version
        buf.put_slice(&[4, 6, 1, 0]); // binlog library version
        buf.put_u64_le(self.file_size);
        buf.put_u64_le(self.uncompressed_size);
        buf.put_u32_le(self.object_count);
        buf.put_u32_le(0);
        for field in self.start.iter().chain(self.stop.iter()) {
            buf.put_u16_le(*field);
        }
        buf.put_bytes(0, FILE_HEADER_SIZE - buf.len());
        buf
    }
}

fn read_signature(buf: &mut &[u8]) -> [u8; 4] {
    let mut signature = [0u8; 4];
    buf.copy_to_slice(&mut signature);
    signature
}

fn read_systemtime(buf: &mut &[u8]) -> [u16; 8] {
    let mut fields = [0u16; 8];
    for field in &mut fields {
        *field = buf.get_u16_le();
    }
    fields
}

/// Unix seconds (UTC) of a SYSTEMTIME; 0 when the fields are unset or invalid.
pub fn systemtime_to_unix(st: &[u16; 8]) -> f64 {
    let [year, month, _day_of_week, day, hour, minute, second, millis] = *st;
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
        .and_then(|d| {
            d.and_hms_milli_opt(
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
                u32::from(millis),
            )
        })
        .map(|dt| dt.and_utc().timestamp_millis() as f64 / 1000.0)
        .unwrap_or(0.0)
}

/// SYSTEMTIME (UTC, millisecond resolution, truncated) of Unix seconds.
pub fn unix_to_systemtime(timestamp: f64) -> [u16; 8] {
    let millis = (timestamp * 1000.0).floor() as i64;
    match DateTime::from_timestamp_millis(millis) {
        Some(dt) => [
            dt.year() as u16,
            dt.month() as u16,
            dt.weekday().num_days_from_sunday() as u16,
            dt.day() as u16,
            dt.hour() as u16,
            dt.minute() as u16,
            dt.second() as u16,
            dt.timestamp_subsec_millis() as u16,
        ],
        None => [0; 8],
    }
}

struct ObjectHeader {
    header_size: usize,
    obj_size: usize,
    obj_type: u32,
}

impl ObjectHeader {
    fn decode(mut buf: &[u8]) -> Result<Self, LogFormatError> {
        let signature = read_signature(&mut buf);
        if &signature != OBJ_SIGNATURE {
            return Err(LogFormatError::BadSignature {
                expected: "LOBJ",
                found: signature,
            });
        }
        let header_size = buf.get_u16_le() as usize;
        let _header_version = buf.get_u16_le();
        let obj_size = buf.get_u32_le() as usize;
        let obj_type = buf.get_u32_le();

        if obj_size < OBJ_BASE_SIZE || header_size < OBJ_BASE_SIZE || header_size > obj_size {
            return Err(LogFormatError::Corrupt(format!(
                "object size {} with header size {}",
                obj_size, header_size
            )));
        }

        Ok(Self {
            header_size,
            obj_size,
            obj_type,
        })
    }
}

/// Streaming BLF reader yielding classic CAN frames in file order.
///
/// Only one log container is held in memory at a time; objects that straddle
/// container boundaries are carried over.
pub struct BlfReader<R: Read> {
    inner: R,
    header: FileHeader,
    start_timestamp: f64,
    pending: VecDeque<Frame>,
    tail: Vec<u8>,
    skipped_objects: usize,
    finished: bool,
}

impl<R: Read> BlfReader<R> {
    pub fn new(mut inner: R) -> Result<Self, LogFormatError> {
        let mut fixed = [0u8; FILE_HEADER_FIXED];
        inner
            .read_exact(&mut fixed)
            .map_err(|_| LogFormatError::Truncated("file header"))?;
        let header = FileHeader::decode(&fixed)?;

        let remaining = (header.header_size as usize).saturating_sub(FILE_HEADER_FIXED);
        std::io::copy(&mut (&mut inner).take(remaining as u64), &mut std::io::sink())?;

        let start_timestamp = systemtime_to_unix(&header.start);
        Ok(Self {
            inner,
            header,
            start_timestamp,
            pending: VecDeque::new(),
            tail: Vec::new(),
            skipped_objects: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Objects that were not classic CAN frames.
    pub fn skipped_objects(&self) -> usize {
        self.skipped_objects
    }

    /// Read the next top-level object. Returns `false` at a clean end of file.
    fn read_object(&mut self) -> Result<bool, LogFormatError> {
        let mut base = [0u8; OBJ_BASE_SIZE];
        match read_up_to(&mut self.inner, &mut base)? {
            0 => return Ok(false),
            OBJ_BASE_SIZE => {}
            _ => return Err(LogFormatError::Truncated("object header")),
        }
        let header = ObjectHeader::decode(&base)?;

        let mut body = vec![0u8; header.obj_size - OBJ_BASE_SIZE];
        self.inner
            .read_exact(&mut body)
            .map_err(|_| LogFormatError::Truncated("object body"))?;

        // Top-level objects are padded to a 4-byte boundary; the last one may not be.
        let mut padding = [0u8; 3];
        read_up_to(&mut self.inner, &mut padding[..header.obj_size % 4])?;

        if header.obj_type != LOG_CONTAINER {
            self.skipped_objects += 1;
            return Ok(true);
        }

        let data = decompress_container(&body)?;
        let mut combined = std::mem::take(&mut self.tail);
        combined.extend_from_slice(&data);
        let consumed = self.parse_objects(&combined)?;
        self.tail = combined[consumed..].to_vec();
        Ok(true)
    }

    /// Parse the inner objects of a container; returns how many bytes were consumed.
    fn parse_objects(&mut self, data: &[u8]) -> Result<usize, LogFormatError> {
        let mut pos = 0;
        loop {
            if pos + OBJ_BASE_SIZE > data.len() {
                return Ok(pos);
            }
            // Inner objects may be followed by up to three padding bytes.
            let search_end = (pos + 8).min(data.len() - OBJ_SIGNATURE.len() + 1);
            let found = (pos..search_end).find(|&p| &data[p..p + 4] == OBJ_SIGNATURE);
            let Some(start) = found else {
                return Err(LogFormatError::Corrupt(format!(
                    "no object signature near container offset {}",
                    pos
                )));
            };
            if start + OBJ_BASE_SIZE > data.len() {
                return Ok(start);
            }

            let header = ObjectHeader::decode(&data[start..start + OBJ_BASE_SIZE])?;
            let next = start + header.obj_size;
            if next > data.len() {
                // Continues in the next container.
                return Ok(start);
            }

            match header.obj_type {
                CAN_MESSAGE | CAN_MESSAGE2 => {
                    let frame = self.decode_can_message(&data[start..next], header.header_size)?;
                    self.pending.push_back(frame);
                }
                _ => self.skipped_objects += 1,
            }
            pos = next;
        }
    }

    fn decode_can_message(&self, object: &[u8], header_size: usize) -> Result<Frame, LogFormatError> {
        if header_size < OBJ_BASE_SIZE + OBJ_V1_SIZE || object.len() < header_size + CAN_MSG_SIZE {
            return Err(LogFormatError::Corrupt("short CAN message object".to_string()));
        }

        let mut obj_header = &object[OBJ_BASE_SIZE..];
        let flags = obj_header.get_u32_le();
        obj_header.advance(4);
        let raw_timestamp = obj_header.get_u64_le();
        let factor = if flags & TIME_TEN_MICS != 0 { 1e-5 } else { 1e-9 };

        let mut body = &object[header_size..];
        let channel = body.get_u16_le();
        let msg_flags = body.get_u8();
        let dlc = body.get_u8() as usize;
        let raw_id = body.get_u32_le();
        let data = &body[..MAX_CLASSIC_PAYLOAD];

        let length = if msg_flags & REMOTE_FLAG != 0 {
            0
        } else {
            dlc.min(MAX_CLASSIC_PAYLOAD)
        };

        Ok(Frame {
            timestamp: raw_timestamp as f64 * factor + self.start_timestamp,
            arbitration_id: raw_id & 0x1FFF_FFFF,
            payload: bytes::Bytes::copy_from_slice(&data[..length]),
            channel,
            is_extended: raw_id & CAN_MSG_EXT != 0,
        })
    }
}

impl<R: Read> Iterator for BlfReader<R> {
    type Item = Result<Frame, LogFormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.finished {
                return None;
            }
            match self.read_object() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    if !self.tail.is_empty() {
                        tracing::warn!("{} trailing bytes after the last object", self.tail.len());
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn decompress_container(body: &[u8]) -> Result<Vec<u8>, LogFormatError> {
    if body.len() < CONTAINER_HEADER_SIZE {
        return Err(LogFormatError::Truncated("log container header"));
    }
    let mut header = body;
    let method = header.get_u16_le();
    header.advance(6);
    let uncompressed_size = header.get_u32_le() as usize;
    let payload = &body[CONTAINER_HEADER_SIZE..];

    match method {
        NO_COMPRESSION => Ok(payload.to_vec()),
        ZLIB_DEFLATE => {
            let mut out = Vec::with_capacity(uncompressed_size);
            ZlibDecoder::new(payload).read_to_end(&mut out)?;
            Ok(out)
        }
        other => Err(LogFormatError::UnsupportedCompression(other)),
    }
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// BLF writer emitting `CAN_MESSAGE` objects in zlib-compressed containers.
///
/// The file header is rewritten with final sizes and counts by [`BlfWriter::finish`].
pub struct BlfWriter<W: Write + Seek> {
    inner: W,
    buffer: BytesMut,
    start_timestamp: Option<f64>,
    start: [u16; 8],
    stop: [u16; 8],
    object_count: u32,
    uncompressed_size: u64,
}

impl<W: Write + Seek> BlfWriter<W> {
    pub fn new(mut inner: W) -> Result<Self, LogFormatError> {
        inner.write_all(&FileHeader::default().encode())?;
        Ok(Self {
            inner,
            buffer: BytesMut::with_capacity(MAX_CONTAINER_SIZE),
            start_timestamp: None,
            start: [0; 8],
            stop: [0; 8],
            object_count: 0,
            uncompressed_size: FILE_HEADER_SIZE as u64,
        })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), LogFormatError> {
        let start = *self.start_timestamp.get_or_insert_with(|| {
            match TimestampDomain::classify(frame.timestamp) {
                TimestampDomain::Absolute => (frame.timestamp * 1000.0).floor() / 1000.0,
                TimestampDomain::Relative => 0.0,
            }
        });
        if start > 0.0 {
            if self.object_count == 0 {
                self.start = unix_to_systemtime(start);
            }
            self.stop = unix_to_systemtime(frame.timestamp);
        }

        let offset_ns = ((frame.timestamp - start) * 1e9).round().max(0.0) as u64;
        let length = frame.payload.len().min(MAX_CLASSIC_PAYLOAD);
        let mut id = frame.arbitration_id;
        if frame.is_extended {
            id |= CAN_MSG_EXT;
        }

        let obj_size = OBJ_BASE_SIZE + OBJ_V1_SIZE + CAN_MSG_SIZE;
        self.buffer.put_slice(OBJ_SIGNATURE);
        self.buffer.put_u16_le((OBJ_BASE_SIZE + OBJ_V1_SIZE) as u16);
        self.buffer.put_u16_le(1);
        self.buffer.put_u32_le(obj_size as u32);
        self.buffer.put_u32_le(CAN_MESSAGE);
        self.buffer.put_u32_le(TIME_ONE_NANS);
        self.buffer.put_u16_le(0); // client index
        self.buffer.put_u16_le(0); // object version
        self.buffer.put_u64_le(offset_ns);
        self.buffer.put_u16_le(frame.channel);
        self.buffer.put_u8(0);
        self.buffer.put_u8(length as u8);
        self.buffer.put_u32_le(id);
        self.buffer.put_slice(&frame.payload[..length]);
        self.buffer.put_bytes(0, MAX_CLASSIC_PAYLOAD - length);

        self.object_count += 1;
        if self.buffer.len() >= MAX_CONTAINER_SIZE {
            self.flush_container()?;
        }
        Ok(())
    }

    fn flush_container(&mut self) -> Result<(), LogFormatError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let uncompressed = self.buffer.split();

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&uncompressed)?;
        let compressed = encoder.finish()?;

        let obj_size = OBJ_BASE_SIZE + CONTAINER_HEADER_SIZE + compressed.len();
        let mut header = BytesMut::with_capacity(OBJ_BASE_SIZE + CONTAINER_HEADER_SIZE);
        header.put_slice(OBJ_SIGNATURE);
        header.put_u16_le(OBJ_BASE_SIZE as u16);
        header.put_u16_le(1);
        header.put_u32_le(obj_size as u32);
        header.put_u32_le(LOG_CONTAINER);
        header.put_u16_le(ZLIB_DEFLATE);
        header.put_bytes(0, 6);
        header.put_u32_le(uncompressed.len() as u32);
        header.put_bytes(0, 4);

        self.inner.write_all(&header)?;
        self.inner.write_all(&compressed)?;
        self.inner.write_all(&[0u8; 3][..obj_size % 4])?;

        self.uncompressed_size += (OBJ_BASE_SIZE + CONTAINER_HEADER_SIZE + uncompressed.len()) as u64;
        Ok(())
    }

    /// Flush the last container and patch the file header. Returns frames written.
    pub fn finish(mut self) -> Result<u32, LogFormatError> {
        self.flush_container()?;
        let file_size = self.inner.stream_position()?;

        let header = FileHeader {
            header_size: FILE_HEADER_SIZE as u32,
            file_size,
            uncompressed_size: self.uncompressed_size,
            object_count: self.object_count,
            start: self.start,
            stop: self.stop,
        };
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(&header.encode())?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(self.object_count)
    }
}
