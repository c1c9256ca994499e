//! Streaming ZIP archive of the most recent daily logs.
//!
//! The archive is produced piecewise so a multi-day download never needs more
//! than one read buffer in RAM. Local headers are written before the entry
//! size is known (general purpose flag bit 3), each entry is followed by a
//! data descriptor, and the central directory goes out last.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use chrono::{Datelike, NaiveDate};
use crc32fast::Hasher;
use log::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::storage::daily_log::parse_log_name;
use crate::storage::{FileEntry, StorageError, StorageManager, Volume};
use crate::storage::volume::join_path;
use crate::time::LocalZone;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const VERSION: u16 = 20;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Bytes read from the volume per step.
pub const READ_CHUNK: usize = 1024;

/// Compression collaborator for archive entries.
///
/// `encode` may buffer internally; whatever remains is flushed by `finish` at
/// the end of each entry.
pub trait ArchiveCodec {
    /// ZIP compression method id written into the headers
    fn method(&self) -> u16;
    fn encode(&mut self, input: &[u8], out: &mut Vec<u8>);
    fn finish(&mut self, out: &mut Vec<u8>);
}

/// No compression (method 0).
#[derive(Debug, Default, Clone, Copy)]
pub struct Stored;

impl ArchiveCodec for Stored {
    fn method(&self) -> u16 {
        0
    }

    fn encode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(input);
    }

    fn finish(&mut self, _out: &mut Vec<u8>) {}
}

/// `weather_<YYYYMMDD>_<n>d.zip`, or `weather_<n>d.zip` before the clock is set
pub fn archive_name(today: Option<NaiveDate>, days: usize) -> String {
    let mut name = String::with_capacity(24);
    let _ = match today {
        Some(today) => write!(
            name,
            "weather_{:04}{:02}{:02}_{}d.zip",
            today.year(),
            today.month(),
            today.day(),
            days
        ),
        None => write!(name, "weather_{}d.zip", days),
    };
    name
}

/// MS-DOS `(time, date)` for midnight of the day a log covers.
fn dos_timestamp(name: &str) -> (u16, u16) {
    let Some(date) = parse_log_name(name) else {
        // 1980-01-01
        return (0, (1 << 5) | 1);
    };
    let year = (date.year() - 1980).clamp(0, 127) as u16;
    (0, (year << 9) | ((date.month() as u16) << 5) | date.day() as u16)
}

struct CentralRecord {
    name: String,
    crc: u32,
    compressed: u32,
    uncompressed: u32,
    offset: u32,
    dos_time: u16,
    dos_date: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveState {
    Header,
    Data,
    Descriptor,
    Central,
    Done,
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Archive being streamed out, one step per call to [`ArchiveStream::fill`].
pub struct ArchiveStream<C: ArchiveCodec = Stored> {
    dir: String,
    files: Vec<FileEntry>,
    codec: C,
    state: ArchiveState,
    next_file: usize,
    offset: u64,
    hasher: Hasher,
    compressed: u64,
    uncompressed: u64,
    written: u64,
    entry_offset: u64,
    central: Vec<CentralRecord>,
    buf: [u8; READ_CHUNK],
}

impl<C: ArchiveCodec> ArchiveStream<C> {
    /// `files` are written in the order given.
    pub fn new(dir: &str, files: Vec<FileEntry>, codec: C) -> Self {
        Self {
            dir: String::from(dir),
            central: Vec::with_capacity(files.len()),
            files,
            codec,
            state: ArchiveState::Header,
            next_file: 0,
            offset: 0,
            hasher: Hasher::new(),
            compressed: 0,
            uncompressed: 0,
            written: 0,
            entry_offset: 0,
            buf: [0; READ_CHUNK],
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_done(&self) -> bool {
        self.state == ArchiveState::Done
    }

    /// Append archive bytes to `out` until it holds at least `min_len` bytes
    /// or the archive is complete.
    pub fn fill<V: Volume>(
        &mut self,
        volume: &mut V,
        out: &mut Vec<u8>,
        min_len: usize,
    ) -> Result<(), StorageError> {
        while out.len() < min_len && !self.is_done() {
            let before = out.len();
            self.step(volume, out)?;
            self.written += (out.len() - before) as u64;
        }
        Ok(())
    }

    fn step<V: Volume>(&mut self, volume: &mut V, out: &mut Vec<u8>) -> Result<(), StorageError> {
        match self.state {
            ArchiveState::Header => {
                let Some(entry) = self.files.get(self.next_file) else {
                    self.state = ArchiveState::Central;
                    return Ok(());
                };
                let path = join_path(&self.dir, &entry.name);
                match volume.size(&path) {
                    Ok(_) => {}
                    Err(StorageError::NotFound(_)) => {
                        warn!("{} vanished before archiving, skipping", entry.name);
                        self.next_file += 1;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
                let (dos_time, dos_date) = dos_timestamp(&entry.name);
                self.entry_offset = self.written;
                put_u32(out, LOCAL_HEADER_SIG);
                put_u16(out, VERSION);
                put_u16(out, FLAG_DATA_DESCRIPTOR);
                put_u16(out, self.codec.method());
                put_u16(out, dos_time);
                put_u16(out, dos_date);
                // crc and sizes follow in the data descriptor
                put_u32(out, 0);
                put_u32(out, 0);
                put_u32(out, 0);
                put_u16(out, entry.name.len() as u16);
                put_u16(out, 0);
                out.extend_from_slice(entry.name.as_bytes());

                self.offset = 0;
                self.hasher = Hasher::new();
                self.compressed = 0;
                self.uncompressed = 0;
                self.state = ArchiveState::Data;
            }
            ArchiveState::Data => {
                let path = join_path(&self.dir, &self.files[self.next_file].name);
                let n = volume.read_at(&path, self.offset, &mut self.buf)?;
                let before = out.len();
                if n == 0 {
                    self.codec.finish(out);
                    self.state = ArchiveState::Descriptor;
                } else {
                    let data = &self.buf[..n];
                    self.hasher.update(data);
                    self.codec.encode(data, out);
                    self.offset += n as u64;
                    self.uncompressed += n as u64;
                }
                self.compressed += (out.len() - before) as u64;
            }
            ArchiveState::Descriptor => {
                let crc = core::mem::take(&mut self.hasher).finalize();
                put_u32(out, DATA_DESCRIPTOR_SIG);
                put_u32(out, crc);
                put_u32(out, self.compressed as u32);
                put_u32(out, self.uncompressed as u32);

                let name = self.files[self.next_file].name.clone();
                let (dos_time, dos_date) = dos_timestamp(&name);
                debug!("Archived {} ({} bytes)", name, self.uncompressed);
                self.central.push(CentralRecord {
                    name,
                    crc,
                    compressed: self.compressed as u32,
                    uncompressed: self.uncompressed as u32,
                    offset: self.entry_offset as u32,
                    dos_time,
                    dos_date,
                });
                self.next_file += 1;
                self.state = ArchiveState::Header;
            }
            ArchiveState::Central => {
                let start = self.written;
                let mut size = 0u32;
                for record in &self.central {
                    let before = out.len();
                    put_u32(out, CENTRAL_HEADER_SIG);
                    put_u16(out, VERSION);
                    put_u16(out, VERSION);
                    put_u16(out, FLAG_DATA_DESCRIPTOR);
                    put_u16(out, self.codec.method());
                    put_u16(out, record.dos_time);
                    put_u16(out, record.dos_date);
                    put_u32(out, record.crc);
                    put_u32(out, record.compressed);
                    put_u32(out, record.uncompressed);
                    put_u16(out, record.name.len() as u16);
                    // extra, comment, disk start, internal attributes
                    put_u16(out, 0);
                    put_u16(out, 0);
                    put_u16(out, 0);
                    put_u16(out, 0);
                    put_u32(out, 0);
                    put_u32(out, record.offset);
                    out.extend_from_slice(record.name.as_bytes());
                    size += (out.len() - before) as u32;
                }

                let count = self.central.len() as u16;
                put_u32(out, END_OF_CENTRAL_DIR_SIG);
                put_u16(out, 0);
                put_u16(out, 0);
                put_u16(out, count);
                put_u16(out, count);
                put_u32(out, size);
                put_u32(out, start as u32);
                put_u16(out, 0);

                info!("Archive complete: {} entries", count);
                self.state = ArchiveState::Done;
            }
            ArchiveState::Done => {}
        }
        Ok(())
    }
}

/// Chooses which logs go into an archive download.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    default_days: usize,
    max_days: usize,
}

impl ArchiveBuilder {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            default_days: config.default_days.max(1),
            max_days: config.max_days.max(1),
        }
    }

    /// Number of days for a request, defaulting and clamping the raw field.
    pub fn days_for(&self, requested: Option<&str>) -> usize {
        requested
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .unwrap_or(self.default_days)
            .clamp(1, self.max_days)
    }

    /// Stream the `days` most recent logs, oldest entry first.
    ///
    /// Fewer logs than requested simply yields a smaller archive.
    pub fn build<V: Volume, Z: LocalZone, C: ArchiveCodec>(
        &self,
        storage: &mut StorageManager<V, Z>,
        days: usize,
        codec: C,
    ) -> Result<ArchiveStream<C>, StorageError> {
        let mut files = storage.recent_logs(days)?;
        files.reverse();
        info!("Building archive of {} logs ({} requested)", files.len(), days);
        Ok(ArchiveStream::new(storage.daily_log().dir(), files, codec))
    }
}
