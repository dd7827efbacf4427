//! # Write-Ahead Log
//!
//! The WAL makes a committed atomic operation durable before its pages reach
//! the data files. Every commit appends the operation's frames followed by a
//! commit frame; recovery replays exactly the operations whose commit frame
//! made it to disk.
//!
//! ```text
//! store_dir/
//! └── wal/
//!     └── wal.000001
//! ```
//!
//! ## Frame Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | Frame Header (40 B)  | Page Image (16384 B)       |
//! |                      | present for Page frames    |
//! +----------------------+----------------------------+
//!
//! Header (little-endian):
//! Offset  Size  Field
//! 0       8     file_id     xxh3 of the file name
//! 8       8     op_id       atomic operation the frame belongs to
//! 16      4     page_no     page the image replaces (Page frames)
//! 20      4     file_pages  file length in pages after the operation
//! 24      1     kind        1 = Page, 2 = Resize, 3 = Commit
//! 25      7     reserved
//! 32      8     checksum    CRC-64/ECMA-182 over bytes 0..32 and the image
//! ```
//!
//! ## Commit Protocol
//!
//! 1. One Resize frame per file whose length changed
//! 2. One Page frame per staged page that survives the final length
//! 3. One Commit frame
//! 4. fsync when the store syncs on commit
//!
//! ## Recovery
//!
//! Frames are read in order and buffered per operation. A Commit frame
//! releases its operation's frames to the files; frames of operations with
//! no Commit frame are discarded. A checksum mismatch or short read ends the
//! scan (a torn tail). After replay the files are synced and the WAL is
//! truncated.
//!
//! ## Failed Appends
//!
//! A frame write that fails partway is cut off again, so the segment always
//! ends on a frame boundary. A failed commit rewinds the segment to where the
//! operation started. When the cut itself fails the segment is poisoned and
//! refuses appends until the next truncate.
//!
//! ## Thread Safety
//!
//! `Wal` is `Send + Sync`; appends are serialized by a `parking_lot::Mutex`
//! around the segment.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::file_store::{FileId, FileStore, PageKey};
use crate::config::{PAGE_SIZE, WAL_FRAME_HEADER_SIZE, WAL_SEGMENT_NAME};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Bytes of the header covered by the checksum.
const CHECKSUMMED_HEADER_LEN: usize = 32;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Page = 1,
    Resize = 2,
    Commit = 3,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FrameKind::Page),
            2 => Some(FrameKind::Resize),
            3 => Some(FrameKind::Commit),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct WalFrameHeader {
    file_id: U64,
    op_id: U64,
    page_no: U32,
    file_pages: U32,
    kind: u8,
    _reserved: [u8; 7],
    checksum: U64,
}

const _: () = assert!(
    std::mem::size_of::<WalFrameHeader>() == WAL_FRAME_HEADER_SIZE,
    "WalFrameHeader must match WAL_FRAME_HEADER_SIZE"
);

impl WalFrameHeader {
    pub fn new(kind: FrameKind, op_id: u64, file_id: FileId, page_no: u32, file_pages: u32) -> Self {
        Self {
            file_id: U64::new(file_id.raw()),
            op_id: U64::new(op_id),
            page_no: U32::new(page_no),
            file_pages: U32::new(file_pages),
            kind: kind as u8,
            _reserved: [0; 7],
            checksum: U64::new(0),
        }
    }

    zerocopy_accessors! {
        op_id: u64,
        page_no: u32,
        file_pages: u32,
        checksum: u64,
    }

    pub fn file_id(&self) -> FileId {
        FileId::from_raw(self.file_id.get())
    }

    pub fn kind(&self) -> Option<FrameKind> {
        FrameKind::from_byte(self.kind)
    }
}

pub fn compute_checksum(header: &WalFrameHeader, page_data: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&header.as_bytes()[..CHECKSUMMED_HEADER_LEN]);
    digest.update(page_data);
    digest.finalize()
}

pub fn validate_checksum(header: &WalFrameHeader, page_data: &[u8]) -> bool {
    compute_checksum(header, page_data) == header.checksum()
}

pub struct Wal {
    dir: PathBuf,
    segment: Mutex<WalSegment>,
}

impl Wal {
    pub fn open(dir: &Path) -> Result<Self> {
        create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create WAL directory at {:?}", dir))?;

        let segment_path = dir.join(WAL_SEGMENT_NAME);
        let segment = WalSegment::open_or_create(&segment_path)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            segment: Mutex::new(segment),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn append_page(&self, op_id: u64, key: PageKey, file_pages: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == PAGE_SIZE,
            "page data must be exactly {} bytes, got {}",
            PAGE_SIZE,
            data.len()
        );
        let header = WalFrameHeader::new(FrameKind::Page, op_id, key.file_id, key.page_no, file_pages);
        self.segment.lock().write_frame(header, data)
    }

    pub fn append_resize(&self, op_id: u64, file_id: FileId, file_pages: u32) -> Result<()> {
        let header = WalFrameHeader::new(FrameKind::Resize, op_id, file_id, 0, file_pages);
        self.segment.lock().write_frame(header, &[])
    }

    pub fn append_commit(&self, op_id: u64) -> Result<()> {
        let header = WalFrameHeader::new(FrameKind::Commit, op_id, FileId::from_raw(0), 0, 0);
        self.segment.lock().write_frame(header, &[])
    }

    pub fn sync(&self) -> Result<()> {
        self.segment.lock().sync()
    }

    /// Drops every frame written after `offset`.
    pub fn rewind(&self, offset: u64) -> Result<()> {
        self.segment.lock().cut_to(offset)
    }

    /// True when a failed cut left bytes of unknown shape at the end of the segment.
    pub fn is_poisoned(&self) -> bool {
        self.segment.lock().poisoned
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        self.segment.lock().poisoned = true;
    }

    /// Replays committed operations into `store`, then truncates the log.
    ///
    /// Returns the number of operations replayed.
    pub fn recover(&self, store: &FileStore) -> Result<u32> {
        let path = self.dir.join(WAL_SEGMENT_NAME);
        let file = File::open(&path)
            .wrap_err_with(|| format!("failed to open WAL segment at {:?} for recovery", path))?;
        let mut reader = BufReader::new(file);

        let mut pending: HashMap<u64, Vec<(WalFrameHeader, Vec<u8>)>> = HashMap::new();
        let mut replayed = 0u32;

        loop {
            let (header, data) = match read_frame(&mut reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "WAL ends in a torn frame, ignoring the tail");
                    break;
                }
            };

            match header.kind() {
                Some(FrameKind::Commit) => {
                    let frames = pending.remove(&header.op_id()).unwrap_or_default();
                    apply_frames(store, &frames)?;
                    replayed += 1;
                }
                Some(FrameKind::Page | FrameKind::Resize) => {
                    pending.entry(header.op_id()).or_default().push((header, data));
                }
                None => continue,
            }
        }

        if !pending.is_empty() {
            warn!(
                operations = pending.len(),
                "discarding WAL frames of operations that never committed"
            );
        }

        store.sync_all()?;
        self.truncate()?;

        if replayed > 0 {
            info!(operations = replayed, "replayed committed operations from WAL");
        }

        Ok(replayed)
    }

    pub fn truncate(&self) -> Result<()> {
        self.segment.lock().truncate()
    }

    pub fn needs_checkpoint(&self, threshold_bytes: u64) -> bool {
        self.current_offset() >= threshold_bytes
    }

    pub fn current_offset(&self) -> u64 {
        self.segment.lock().offset()
    }
}

fn apply_frames(store: &FileStore, frames: &[(WalFrameHeader, Vec<u8>)]) -> Result<()> {
    for (header, data) in frames {
        let file_id = header.file_id();
        if !store.is_registered(file_id) {
            warn!(
                file_id = file_id.raw(),
                "skipping WAL frame for a file that no longer exists"
            );
            continue;
        }

        match header.kind() {
            Some(FrameKind::Resize) => store.set_page_count(file_id, header.file_pages())?,
            Some(FrameKind::Page) => {
                if store.page_count(file_id)? <= header.page_no() {
                    store.set_page_count(file_id, header.file_pages())?;
                }
                store.write_page(PageKey::new(file_id, header.page_no()), data)?;
            }
            _ => bail!("unexpected frame kind in operation"),
        }
    }
    debug!(frames = frames.len(), "applied committed WAL frames");
    Ok(())
}

/// Reads the next frame. `Ok(None)` marks a clean end of the log.
fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(WalFrameHeader, Vec<u8>)>> {
    let mut header_bytes = [0u8; WAL_FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).wrap_err("failed to read WAL frame header"),
    }

    let header = WalFrameHeader::read_from_bytes(&header_bytes)
        .map_err(|e| eyre::eyre!("invalid WAL frame header: {:?}", e))?;

    let Some(kind) = header.kind() else {
        bail!("unknown WAL frame kind {}", header.kind);
    };

    let mut page_data = Vec::new();
    if kind == FrameKind::Page {
        page_data.resize(PAGE_SIZE, 0);
        reader
            .read_exact(&mut page_data)
            .wrap_err("failed to read WAL frame page data")?;
    }

    if !validate_checksum(&header, &page_data) {
        bail!("WAL frame checksum validation failed");
    }

    Ok(Some((header, page_data)))
}

pub struct WalSegment {
    file: File,
    offset: u64,
    poisoned: bool,
}

impl WalSegment {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open WAL segment at {:?}", path))?;

        let offset = file
            .seek(SeekFrom::End(0))
            .wrap_err("failed to seek to end of WAL segment")?;

        Ok(Self {
            file,
            offset,
            poisoned: false,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn write_frame(&mut self, mut header: WalFrameHeader, page_data: &[u8]) -> Result<()> {
        ensure!(
            !self.poisoned,
            "WAL segment ends in a torn frame and must be truncated before appending"
        );
        header.set_checksum(compute_checksum(&header, page_data));

        let start = self.offset;
        if let Err(e) = self.write_bytes(header.as_bytes(), page_data) {
            if let Err(cut) = self.cut_to(start) {
                warn!(offset = start, error = %cut, "failed to cut a torn WAL frame");
            }
            return Err(e);
        }

        self.offset += (WAL_FRAME_HEADER_SIZE + page_data.len()) as u64;
        Ok(())
    }

    fn write_bytes(&mut self, header: &[u8], page_data: &[u8]) -> Result<()> {
        self.file
            .write_all(header)
            .wrap_err("failed to write WAL frame header")?;

        if !page_data.is_empty() {
            self.file
                .write_all(page_data)
                .wrap_err("failed to write WAL frame page data")?;
        }
        Ok(())
    }

    /// Shortens the segment to `offset` and moves the write cursor there.
    ///
    /// Poisons the segment when either step fails.
    pub fn cut_to(&mut self, offset: u64) -> Result<()> {
        self.poisoned = true;
        self.file
            .set_len(offset)
            .wrap_err_with(|| format!("failed to cut WAL segment to {} bytes", offset))?;
        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err("failed to move WAL cursor after cut")?;
        self.offset = offset;
        self.poisoned = false;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .wrap_err("failed to sync WAL segment to disk")
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .wrap_err("failed to truncate WAL segment file")?;
        self.file
            .seek(SeekFrom::Start(0))
            .wrap_err("failed to rewind WAL segment after truncate")?;
        self.file
            .sync_all()
            .wrap_err("failed to sync WAL segment after truncate")?;
        self.offset = 0;
        self.poisoned = false;
        Ok(())
    }
}
