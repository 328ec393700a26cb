//! Memory-mapped artifact format for glimpse series.
//!
//! Each series owns exactly one slab file holding everything the store needs
//! to resume after a process restart: header metadata, per-source ingestion
//! state, and, per archive, a consolidation state block plus fixed-size f64
//! ring columns (one column per data source).
//!
//! # File Format
//!
//! ```text
//! [0..64)          Header (SlabHeader)
//! [64..64+40*S)    Per-source ingestion state (S = source count)
//! then, per archive:
//!   [..+32)        Archive header (cursor, points written, last step)
//!   [..+16*S)      Per-source consolidation accumulators
//!   [..+8*R*S)     Ring data, column-major (R = ring rows)
//! ```
//!
//! Unwritten ring slots hold NaN — the unknown sentinel. The file size is
//! fully determined by the schema and never changes, which is what bounds
//! on-disk usage regardless of history length.
//!
//! # Safety
//!
//! This module uses unsafe operations for direct memory access to the mmap'd
//! region. All unsafe blocks are documented and the layout is bounds-checked
//! at create/open time. Hot-path accessors assume valid indices.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr;

use memmap2::MmapMut;

use crate::error::{ArtifactError, Result};

/// Magic bytes identifying a glimpse slab file.
const SLAB_MAGIC: [u8; 4] = *b"GLMS";

/// Current slab format version.
const SLAB_VERSION: u32 = 1;

/// Size of the slab header in bytes.
const HEADER_SIZE: usize = 64;

/// Size of one per-source ingestion state block in bytes.
const SOURCE_STATE_SIZE: usize = 40;

/// Size of one archive header in bytes.
const ARCHIVE_HEADER_SIZE: usize = 32;

/// Size of one per-source consolidation accumulator in bytes.
const CDP_STATE_SIZE: usize = 16;

/// Size of one ring value in bytes.
const VALUE_SIZE: usize = 8;

/// Header flag: the series has accepted at least one sample, so
/// `current_step` is meaningful.
pub const FLAG_STEP_INITIALIZED: u32 = 1;

/// Header structure for slab files.
///
/// The repr(C) layout ensures a consistent binary format.
#[repr(C)]
#[derive(Debug, Clone)]
struct SlabHeader {
    /// Magic bytes for file type identification.
    magic: [u8; 4],
    /// Slab format version number.
    version: u32,
    /// Stable hash of the series schema.
    schema_hash: u64,
    /// Primary step duration in seconds.
    step_secs: u64,
    /// Number of data sources (ring columns).
    source_count: u32,
    /// Number of archives.
    archive_count: u32,
    /// Timestamp of the most recently accepted sample.
    last_update: u64,
    /// Step index currently accumulating samples.
    current_step: u64,
    /// State flags (see `FLAG_*` constants).
    flags: u32,
    /// Reserved space (padding to 64 bytes).
    _reserved: [u8; 12],
}

impl SlabHeader {
    fn new(schema_hash: u64, step_secs: u64, source_count: u32, archive_count: u32) -> Self {
        Self {
            magic: SLAB_MAGIC,
            version: SLAB_VERSION,
            schema_hash,
            step_secs,
            source_count,
            archive_count,
            last_update: 0,
            current_step: 0,
            flags: 0,
            _reserved: [0; 12],
        }
    }

    /// Validates the header magic and version.
    fn validate(&self, path: &str) -> Result<()> {
        if self.magic != SLAB_MAGIC {
            return Err(ArtifactError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "invalid magic bytes: expected {:?}, found {:?}",
                    SLAB_MAGIC, self.magic
                ),
            }
            .into());
        }

        if self.version != SLAB_VERSION {
            return Err(ArtifactError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "unsupported version: expected {}, found {}",
                    SLAB_VERSION, self.version
                ),
            }
            .into());
        }

        Ok(())
    }
}

/// Per-source ingestion state, persisted so that a once-per-cycle collector
/// process resumes differencing and step accumulation exactly where the
/// previous invocation stopped.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SourceState {
    /// Raw value of the previous accepted sample (NaN before the first).
    pub prev_raw: f64,
    /// Timestamp of the previous accepted sample (0 before the first).
    pub prev_time: u64,
    /// Running sum of known processed values within the current step.
    pub step_sum: f64,
    /// Number of known processed values within the current step.
    pub step_count: u32,
    /// Non-zero once a previous raw value exists (counters need two points).
    pub has_prev: u32,
    /// Last known finalized primary value, used for jitter gap filling.
    pub last_known: f64,
}

impl SourceState {
    fn empty() -> Self {
        Self {
            prev_raw: f64::NAN,
            prev_time: 0,
            step_sum: 0.0,
            step_count: 0,
            has_prev: 0,
            last_known: f64::NAN,
        }
    }
}

/// Per-archive ring state.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArchiveState {
    /// Primary steps consolidated into one point of this archive.
    pub points_per_step: u32,
    /// Ring size in rows.
    pub rows: u32,
    /// Slot of the most recently written point.
    pub write_cursor: u32,
    /// Padding for alignment.
    _pad: u32,
    /// Total points written over the archive's lifetime.
    pub points_written: u64,
    /// Primary step index one past the last finalized window.
    pub last_step: u64,
}

/// Per-archive per-source consolidation accumulator: the running window that
/// has not yet produced a consolidated point.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CdpState {
    /// Sum of known primary values in the open window.
    pub sum: f64,
    /// Number of known primary values in the open window.
    pub known: u32,
    /// Padding for alignment.
    _pad: u32,
}

impl CdpState {
    /// An empty accumulator.
    pub fn empty() -> Self {
        Self {
            sum: 0.0,
            known: 0,
            _pad: 0,
        }
    }
}

/// Pre-computed byte offsets for one archive region.
#[derive(Debug, Clone, Copy)]
struct ArchiveRegion {
    header_offset: usize,
    cdp_offset: usize,
    data_offset: usize,
    rows: usize,
}

/// Helper for computing slab layout sizes and offsets.
#[derive(Debug, Clone)]
struct SlabLayout {
    file_size: usize,
    source_state_offset: usize,
    archives: Vec<ArchiveRegion>,
}

impl SlabLayout {
    /// Computes the layout for the given dimensions.
    ///
    /// `dims` holds `(points_per_step, rows)` per archive, finest first.
    fn new(source_count: u32, dims: &[(u32, u32)]) -> Self {
        let sources = source_count as usize;
        let source_state_offset = HEADER_SIZE;
        let mut offset = source_state_offset + sources * SOURCE_STATE_SIZE;

        let mut archives = Vec::with_capacity(dims.len());
        for &(_, rows) in dims {
            let header_offset = offset;
            let cdp_offset = header_offset + ARCHIVE_HEADER_SIZE;
            let data_offset = cdp_offset + sources * CDP_STATE_SIZE;
            offset = data_offset + sources * rows as usize * VALUE_SIZE;
            archives.push(ArchiveRegion {
                header_offset,
                cdp_offset,
                data_offset,
                rows: rows as usize,
            });
        }

        Self {
            file_size: offset,
            source_state_offset,
            archives,
        }
    }

    /// Byte offset of a ring value.
    fn value_offset(&self, archive: usize, column: u32, slot: u32) -> usize {
        let region = &self.archives[archive];
        region.data_offset + (column as usize * region.rows + slot as usize) * VALUE_SIZE
    }
}

/// Memory-mapped slab file holding one series.
///
/// # Thread Safety
///
/// A slab is owned by exactly one writer for its lifetime; readers of other
/// series never share a mapping with it. Individual header and slot writes
/// are single properly-aligned stores, so a concurrent reader of this slab
/// observes either the pre- or post-write value of each point, never a torn
/// one.
#[derive(Debug)]
pub struct Slab {
    /// Memory mapping of the slab file.
    mmap: MmapMut,
    /// Pre-computed layout information for fast offset calculations.
    layout: SlabLayout,
    /// Path to the slab file (for error reporting).
    path: String,
}

// SAFETY: Slab is designed for single-writer access patterns with proper
// external synchronization. The memory mapping itself is thread-safe.
unsafe impl Send for Slab {}

// SAFETY: All access goes through validated offsets and the single-writer
// pattern ensures no data races. Read operations are naturally thread-safe.
unsafe impl Sync for Slab {}

impl Slab {
    /// Creates a new slab file for a series.
    ///
    /// The file is pre-allocated to its final size and initialized: NaN ring
    /// values, empty ingestion and consolidation state, archive dimensions
    /// from `dims` (`(points_per_step, rows)` per archive, finest first).
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if file creation or memory mapping fails.
    pub fn create<P: AsRef<Path>>(
        path: P,
        schema_hash: u64,
        step_secs: u64,
        source_count: u32,
        dims: &[(u32, u32)],
    ) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let layout = SlabLayout::new(source_count, dims);

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ArtifactError::Io {
                path: path_str.clone(),
                source: e,
            })?;

        file.set_len(layout.file_size as u64)
            .map_err(|e| ArtifactError::Io {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: The file was just created with the correct size and we have
        // exclusive access to the descriptor.
        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| ArtifactError::Io {
                path: path_str.clone(),
                source: e,
            })?
        };

        let header = SlabHeader::new(
            schema_hash,
            step_secs,
            source_count,
            u32::try_from(dims.len()).unwrap_or(u32::MAX),
        );
        // SAFETY: The mapping is at least HEADER_SIZE bytes and the mapping
        // base is suitably aligned for SlabHeader (page-aligned).
        unsafe {
            ptr::write(mmap.as_mut_ptr().cast::<SlabHeader>(), header);
        }

        // SAFETY: source_state_offset + source_count * SOURCE_STATE_SIZE is
        // within the mapped region by construction of the layout.
        let state_ptr = unsafe {
            mmap.as_mut_ptr()
                .add(layout.source_state_offset)
                .cast::<SourceState>()
        };
        for i in 0..source_count as usize {
            // SAFETY: i is bounded by source_count; the region was sized for it.
            unsafe {
                ptr::write(state_ptr.add(i), SourceState::empty());
            }
        }

        for (index, &(points_per_step, rows)) in dims.iter().enumerate() {
            let region = layout.archives[index];
            let state = ArchiveState {
                points_per_step,
                rows,
                write_cursor: 0,
                _pad: 0,
                points_written: 0,
                last_step: 0,
            };
            // SAFETY: header_offset is within the mapped region and 8-aligned
            // by construction of the layout.
            unsafe {
                ptr::write(
                    mmap.as_mut_ptr().add(region.header_offset).cast::<ArchiveState>(),
                    state,
                );
            }

            // SAFETY: cdp_offset + source_count * CDP_STATE_SIZE is within
            // the mapped region.
            let cdp_ptr = unsafe { mmap.as_mut_ptr().add(region.cdp_offset).cast::<CdpState>() };
            for i in 0..source_count as usize {
                // SAFETY: i is bounded by source_count.
                unsafe {
                    ptr::write(cdp_ptr.add(i), CdpState::empty());
                }
            }

            // SAFETY: the data region spans source_count * rows values inside
            // the mapped region.
            let data_ptr = unsafe { mmap.as_mut_ptr().add(region.data_offset).cast::<u64>() };
            let nan_bits = f64::NAN.to_bits();
            for i in 0..(source_count as usize * region.rows) {
                // SAFETY: i is bounded by the data region size computed above.
                unsafe {
                    ptr::write(data_ptr.add(i), nan_bits);
                }
            }
        }

        Ok(Self {
            mmap,
            layout,
            path: path_str,
        })
    }

    /// Opens an existing slab file, validating magic, version, and size.
    ///
    /// Schema-hash validation against the expected schema is the caller's
    /// responsibility (see [`Slab::schema_hash`]) so that the caller can
    /// produce a schema-mismatch error with full context.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if the file cannot be opened, is corrupted,
    /// or memory mapping fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ArtifactError::Io {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: The file was successfully opened with read/write access.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| ArtifactError::Io {
                path: path_str.clone(),
                source: e,
            })?
        };

        if mmap.len() < HEADER_SIZE {
            return Err(ArtifactError::Corrupted {
                path: path_str,
                reason: format!(
                    "file too small: {} bytes, expected at least {HEADER_SIZE}",
                    mmap.len()
                ),
            }
            .into());
        }

        // SAFETY: The file is at least HEADER_SIZE bytes and the mapping base
        // is aligned for SlabHeader.
        let header = unsafe { ptr::read(mmap.as_ptr().cast::<SlabHeader>()) };
        header.validate(&path_str)?;

        // The archive dimensions live in archive headers whose offsets depend
        // on the dimensions of the archives before them, so reconstruct the
        // layout by walking the regions sequentially.
        let sources = header.source_count as usize;
        let mut dims = Vec::with_capacity(header.archive_count as usize);
        let mut offset = HEADER_SIZE + sources * SOURCE_STATE_SIZE;
        for index in 0..header.archive_count {
            if offset + ARCHIVE_HEADER_SIZE > mmap.len() {
                return Err(ArtifactError::Corrupted {
                    path: path_str,
                    reason: format!("truncated before archive {index} header"),
                }
                .into());
            }
            // SAFETY: offset + ARCHIVE_HEADER_SIZE was bounds-checked above
            // and offsets stay 8-aligned by construction.
            let state =
                unsafe { ptr::read(mmap.as_ptr().add(offset).cast::<ArchiveState>()) };
            if state.rows == 0 || state.points_per_step == 0 {
                return Err(ArtifactError::Corrupted {
                    path: path_str,
                    reason: format!("archive {index} has zero dimensions"),
                }
                .into());
            }
            dims.push((state.points_per_step, state.rows));
            offset += ARCHIVE_HEADER_SIZE
                + sources * CDP_STATE_SIZE
                + sources * state.rows as usize * VALUE_SIZE;
        }

        let layout = SlabLayout::new(header.source_count, &dims);
        if mmap.len() != layout.file_size {
            return Err(ArtifactError::Corrupted {
                path: path_str,
                reason: format!(
                    "file size mismatch: {} bytes, expected {}",
                    mmap.len(),
                    layout.file_size
                ),
            }
            .into());
        }

        Ok(Self {
            mmap,
            layout,
            path: path_str,
        })
    }

    fn header(&self) -> SlabHeader {
        // SAFETY: The slab was validated during open/create, so the header
        // region is present and aligned.
        unsafe { ptr::read(self.mmap.as_ptr().cast::<SlabHeader>()) }
    }

    /// Returns the schema hash from the header.
    pub fn schema_hash(&self) -> u64 {
        self.header().schema_hash
    }

    /// Returns the primary step duration in seconds.
    pub fn step_secs(&self) -> u64 {
        self.header().step_secs
    }

    /// Returns the number of data sources (ring columns).
    pub fn source_count(&self) -> u32 {
        self.header().source_count
    }

    /// Returns the number of archives.
    pub fn archive_count(&self) -> u32 {
        self.header().archive_count
    }

    /// Returns the timestamp of the most recently accepted sample.
    pub fn last_update(&self) -> u64 {
        self.header().last_update
    }

    /// Sets the timestamp of the most recently accepted sample.
    pub fn set_last_update(&mut self, at: u64) {
        let header_ptr = self.mmap.as_mut_ptr().cast::<SlabHeader>();
        // SAFETY: We write a single aligned u64 field of the validated header.
        unsafe {
            ptr::write(&mut (*header_ptr).last_update, at);
        }
    }

    /// Returns the step index currently accumulating samples.
    pub fn current_step(&self) -> u64 {
        self.header().current_step
    }

    /// Sets the step index currently accumulating samples.
    pub fn set_current_step(&mut self, step: u64) {
        let header_ptr = self.mmap.as_mut_ptr().cast::<SlabHeader>();
        // SAFETY: We write a single aligned u64 field of the validated header.
        unsafe {
            ptr::write(&mut (*header_ptr).current_step, step);
        }
    }

    /// Returns the header flags.
    pub fn flags(&self) -> u32 {
        self.header().flags
    }

    /// Sets the header flags.
    pub fn set_flags(&mut self, flags: u32) {
        let header_ptr = self.mmap.as_mut_ptr().cast::<SlabHeader>();
        // SAFETY: We write a single aligned u32 field of the validated header.
        unsafe {
            ptr::write(&mut (*header_ptr).flags, flags);
        }
    }

    /// Reads the ingestion state for a source.
    ///
    /// The caller must ensure `source < source_count`.
    pub fn source_state(&self, source: u32) -> SourceState {
        let offset = self.layout.source_state_offset + source as usize * SOURCE_STATE_SIZE;
        // SAFETY: The offset is within the region sized for source_count
        // entries; the caller guarantees the index.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<SourceState>()) }
    }

    /// Writes the ingestion state for a source.
    ///
    /// The caller must ensure `source < source_count`.
    pub fn set_source_state(&mut self, source: u32, state: &SourceState) {
        let offset = self.layout.source_state_offset + source as usize * SOURCE_STATE_SIZE;
        // SAFETY: Same bounds argument as `source_state`.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset).cast::<SourceState>(), *state);
        }
    }

    /// Reads the ring state of an archive.
    ///
    /// The caller must ensure `archive < archive_count`.
    pub fn archive_state(&self, archive: usize) -> ArchiveState {
        let offset = self.layout.archives[archive].header_offset;
        // SAFETY: header_offset is within the mapped region by layout
        // construction.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<ArchiveState>()) }
    }

    /// Updates the mutable ring state of an archive (cursor, points written,
    /// last consolidated step). The dimensions are fixed at creation and
    /// never rewritten.
    pub fn set_archive_progress(
        &mut self,
        archive: usize,
        write_cursor: u32,
        points_written: u64,
        last_step: u64,
    ) {
        let offset = self.layout.archives[archive].header_offset;
        // SAFETY: offset is within the mapped region by layout construction;
        // each write is a single aligned store into the validated ArchiveState.
        unsafe {
            let state = self.mmap.as_mut_ptr().add(offset).cast::<ArchiveState>();
            ptr::write(&mut (*state).write_cursor, write_cursor);
            ptr::write(&mut (*state).points_written, points_written);
            ptr::write(&mut (*state).last_step, last_step);
        }
    }

    /// Reads the consolidation accumulator for `(archive, source)`.
    pub fn cdp_state(&self, archive: usize, source: u32) -> CdpState {
        let offset =
            self.layout.archives[archive].cdp_offset + source as usize * CDP_STATE_SIZE;
        // SAFETY: The cdp region was sized for source_count entries.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<CdpState>()) }
    }

    /// Writes the consolidation accumulator for `(archive, source)`.
    pub fn set_cdp_state(&mut self, archive: usize, source: u32, state: &CdpState) {
        let offset =
            self.layout.archives[archive].cdp_offset + source as usize * CDP_STATE_SIZE;
        // SAFETY: Same bounds argument as `cdp_state`.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset).cast::<CdpState>(), *state);
        }
    }

    /// Reads a ring value.
    ///
    /// The caller must ensure all indices are within bounds.
    pub fn read_value(&self, archive: usize, column: u32, slot: u32) -> f64 {
        let offset = self.layout.value_offset(archive, column, slot);
        // SAFETY: The offset is computed from the validated layout and the
        // caller guarantees the indices.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<f64>()) }
    }

    /// Writes a ring value.
    ///
    /// The caller must ensure all indices are within bounds.
    pub fn write_value(&mut self, archive: usize, column: u32, slot: u32, value: f64) {
        let offset = self.layout.value_offset(archive, column, slot);
        // SAFETY: Same bounds argument as `read_value`.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset).cast::<f64>(), value);
        }
    }

    /// Syncs the memory mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::SyncFailed`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            ArtifactError::SyncFailed {
                path: self.path.clone(),
                source: e,
            }
            .into()
        })
    }

    /// Returns the path to this slab file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the fixed on-disk size of this slab in bytes.
    pub fn file_size(&self) -> usize {
        self.layout.file_size
    }
}
