//! Fixed-slot single-producer / single-consumer ring in a shared memory file.
//!
//! ```text
//! 0x00 i32 magic 'SHMR' | 0x04 i32 version | 0x08 i32 slotSize | 0x0C i32 slotCount
//! 0x10 i32 head         | 0x14 i32 tail    | 0x18..0x20 reserved
//! slot i at 0x20 + i * slotSize: [i32 len][payload]
//! ```
//!
//! `<name>.free` counts empty slots, `<name>.items` counts filled ones and
//! `<name>.init` (one permit) serializes header initialization across processes.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;
use tracing::{debug, info, instrument, trace};

use crate::error::{AggError, AggResult};
use crate::transport::semaphore::NamedSemaphore;

pub const RING_MAGIC: u32 = 0x5348_4D52;
pub const RING_VERSION: i32 = 1;
pub const HEADER_LEN: usize = 32;
/// Bytes of each slot taken by the length prefix.
pub const SLOT_PREFIX: usize = 4;

const OFF_MAGIC: usize = 0x00;
const OFF_VERSION: usize = 0x04;
const OFF_SLOT_SIZE: usize = 0x08;
const OFF_SLOT_COUNT: usize = 0x0C;
const OFF_HEAD: usize = 0x10;
const OFF_TAIL: usize = 0x14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub slot_size: usize,
    pub slot_count: usize,
}

impl Geometry {
    fn validate(self, name: &str) -> AggResult<Self> {
        let ok = self.slot_size > SLOT_PREFIX
            && self.slot_size <= i32::MAX as usize
            && self.slot_count > 0
            && self.slot_count <= i32::MAX as usize
            && self.slot_size.checked_mul(self.slot_count).is_some();
        if ok {
            Ok(self)
        } else {
            Err(AggError::InvalidConfig(format!(
                "ring `{name}`: bad geometry {}x{}",
                self.slot_size, self.slot_count
            )))
        }
    }

    pub fn max_payload(&self) -> usize {
        self.slot_size - SLOT_PREFIX
    }

    fn file_len(&self) -> usize {
        HEADER_LEN + self.slot_size * self.slot_count
    }

    fn slot_offset(&self, index: usize) -> usize {
        HEADER_LEN + index * self.slot_size
    }
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// No free slot within the timeout; the frame was not written.
    Timeout,
    /// Payload exceeds `slot_size - 4`; the frame was not written.
    TooLarge,
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Written => "written",
            WriteOutcome::Timeout => "timeout",
            WriteOutcome::TooLarge => "too_large",
        }
    }
}

pub fn ring_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.ring"))
}

fn sem_name(name: &str, role: &str) -> String {
    format!("/{name}.{role}")
}

fn read_i32(map: &[u8], off: usize) -> i32 {
    LittleEndian::read_i32(&map[off..off + 4])
}

fn write_i32(map: &mut [u8], off: usize, value: i32) {
    LittleEndian::write_i32(&mut map[off..off + 4], value);
}

fn read_header(map: &[u8], name: &str) -> AggResult<Geometry> {
    if map.len() < HEADER_LEN {
        return Err(AggError::RingMagic { name: name.to_string(), found: 0 });
    }
    let magic = LittleEndian::read_u32(&map[OFF_MAGIC..OFF_MAGIC + 4]);
    if magic != RING_MAGIC {
        return Err(AggError::RingMagic { name: name.to_string(), found: magic });
    }
    let version = read_i32(map, OFF_VERSION);
    if version != RING_VERSION {
        return Err(AggError::RingVersion { name: name.to_string(), found: version });
    }
    let slot_size = usize::try_from(read_i32(map, OFF_SLOT_SIZE)).unwrap_or(0);
    let slot_count = usize::try_from(read_i32(map, OFF_SLOT_COUNT)).unwrap_or(0);
    Geometry { slot_size, slot_count }.validate(name)
}

// cursor stored in the header, reduced into range in case the peer wrote garbage
fn cursor(map: &[u8], off: usize, slot_count: usize) -> usize {
    (read_i32(map, off) as i64).rem_euclid(slot_count as i64) as usize
}

pub struct ShmRingWriter {
    name: String,
    geometry: Geometry,
    map: MmapMut,
    free: NamedSemaphore,
    items: NamedSemaphore,
}

impl ShmRingWriter {
    /// Create the ring, or attach to an existing one with the same geometry.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn create(dir: impl AsRef<Path>, name: &str, slot_size: usize, slot_count: usize) -> AggResult<Self> {
        let geometry = Geometry { slot_size, slot_count }.validate(name)?;
        let path = ring_path(dir.as_ref(), name);

        let init = NamedSemaphore::open_or_create(&sem_name(name, "init"), 1)?;
        let _guard = init.lock()?;

        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        let existing = file.metadata()?.len();

        if existing >= HEADER_LEN as u64 {
            // SAFETY: the file stays mapped only through this handle; the peer touches
            // only the slots and tail the protocol hands it
            let map = unsafe { MmapMut::map_mut(&file)? };
            if LittleEndian::read_u32(&map[OFF_MAGIC..OFF_MAGIC + 4]) == RING_MAGIC {
                let found = read_header(&map, name)?;
                if found != geometry || (existing as usize) < geometry.file_len() {
                    return Err(AggError::RingGeometry {
                        name: name.to_string(),
                        expected_slot_size: slot_size as i32,
                        expected_slot_count: slot_count as i32,
                        found_slot_size: found.slot_size as i32,
                        found_slot_count: found.slot_count as i32,
                    });
                }
                let free = NamedSemaphore::open_or_create(&sem_name(name, "free"), slot_count as u32)?;
                let items = NamedSemaphore::open_or_create(&sem_name(name, "items"), 0)?;
                info!(path = %path.display(), "attached to existing ring");
                return Ok(Self { name: name.to_string(), geometry, map, free, items });
            }
        }

        file.set_len(geometry.file_len() as u64)?;
        // SAFETY: as above
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        map[..HEADER_LEN].fill(0);
        write_i32(&mut map, OFF_VERSION, RING_VERSION);
        write_i32(&mut map, OFF_SLOT_SIZE, slot_size as i32);
        write_i32(&mut map, OFF_SLOT_COUNT, slot_count as i32);
        write_i32(&mut map, OFF_HEAD, 0);
        write_i32(&mut map, OFF_TAIL, 0);
        // magic last: a reader never sees a half-written header as valid
        LittleEndian::write_u32(&mut map[OFF_MAGIC..OFF_MAGIC + 4], RING_MAGIC);
        map.flush_range(0, HEADER_LEN)?;

        let free = NamedSemaphore::recreate(&sem_name(name, "free"), slot_count as u32)?;
        let items = NamedSemaphore::recreate(&sem_name(name, "items"), 0)?;
        info!(path = %path.display(), slot_size, slot_count, "ring initialized");
        Ok(Self { name: name.to_string(), geometry, map, free, items })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Write one frame. `None` waits indefinitely for a free slot.
    pub fn try_write(&mut self, payload: &[u8], timeout: Option<Duration>) -> AggResult<WriteOutcome> {
        let outcome = self.write_inner(payload, timeout)?;
        metrics::counter!("mdagg_ring_frames_total", "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }

    fn write_inner(&mut self, payload: &[u8], timeout: Option<Duration>) -> AggResult<WriteOutcome> {
        if payload.len() > self.geometry.max_payload() {
            trace!(ring = %self.name, len = payload.len(), "frame too large for slot");
            return Ok(WriteOutcome::TooLarge);
        }
        match timeout {
            None => self.free.wait()?,
            Some(t) => {
                if !self.free.wait_timeout(t)? {
                    return Ok(WriteOutcome::Timeout);
                }
            }
        }

        let head = cursor(&self.map, OFF_HEAD, self.geometry.slot_count);
        let off = self.geometry.slot_offset(head);
        write_i32(&mut self.map, off, payload.len() as i32);
        self.map[off + SLOT_PREFIX..off + SLOT_PREFIX + payload.len()].copy_from_slice(payload);
        write_i32(&mut self.map, OFF_HEAD, ((head + 1) % self.geometry.slot_count) as i32);
        self.items.post()?;
        Ok(WriteOutcome::Written)
    }
}

pub struct ShmRingReader {
    name: String,
    geometry: Geometry,
    map: MmapMut,
    free: NamedSemaphore,
    items: NamedSemaphore,
}

impl ShmRingReader {
    /// Attach to a ring created by a writer; geometry comes from its header.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>, name: &str) -> AggResult<Self> {
        let path = ring_path(dir.as_ref(), name);
        let init = NamedSemaphore::open_or_create(&sem_name(name, "init"), 1)?;
        let _guard = init.lock()?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        // SAFETY: the reader only writes the tail cursor; slots are handed over by semaphores
        let map = unsafe { MmapMut::map_mut(&file)? };
        let geometry = read_header(&map, name)?;
        if map.len() < geometry.file_len() {
            return Err(AggError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("ring `{name}` file shorter than its header declares"),
            )));
        }
        let free = NamedSemaphore::open_existing(&sem_name(name, "free"))?;
        let items = NamedSemaphore::open_existing(&sem_name(name, "items"))?;
        debug!(path = %path.display(), slot_size = geometry.slot_size, slot_count = geometry.slot_count, "ring opened");
        Ok(Self { name: name.to_string(), geometry, map, free, items })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Read the next frame into `buf`. Returns false on timeout; `None` waits indefinitely.
    ///
    /// A slot with a corrupt length yields an empty `buf` and is still consumed.
    pub fn read_next(&mut self, buf: &mut Vec<u8>, timeout: Option<Duration>) -> AggResult<bool> {
        match timeout {
            None => self.items.wait()?,
            Some(t) => {
                if !self.items.wait_timeout(t)? {
                    return Ok(false);
                }
            }
        }

        let tail = cursor(&self.map, OFF_TAIL, self.geometry.slot_count);
        let off = self.geometry.slot_offset(tail);
        let len = usize::try_from(read_i32(&self.map, off))
            .ok()
            .filter(|len| *len <= self.geometry.max_payload())
            .unwrap_or_else(|| {
                debug!(ring = %self.name, slot = tail, "corrupt slot length, skipping");
                0
            });
        buf.clear();
        buf.extend_from_slice(&self.map[off + SLOT_PREFIX..off + SLOT_PREFIX + len]);
        write_i32(&mut self.map, OFF_TAIL, ((tail + 1) % self.geometry.slot_count) as i32);
        self.free.post()?;
        Ok(true)
    }
}

/// Remove the backing file and the named semaphores of ring `name`.
pub fn unlink(dir: impl AsRef<Path>, name: &str) -> AggResult<()> {
    match fs::remove_file(ring_path(dir.as_ref(), name)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    for role in ["free", "items", "init"] {
        NamedSemaphore::unlink(&sem_name(name, role))?;
    }
    Ok(())
}
