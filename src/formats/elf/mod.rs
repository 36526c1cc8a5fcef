//! ELF (Executable and Linkable Format) images
//!
//! Only what a loaded image needs is parsed: the header, the program header
//! table and the notes. Virtual addresses resolve through LOAD segments with
//! the `[filesz, memsz)` tail of each segment reading as zeros.

pub mod dynamic;
pub mod headers;
pub mod notes;
pub mod segments;
pub mod types;
pub mod utils;

use memchr::memmem;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

use crate::backend::Permissions;
use crate::config::{InspectorConfig, ModuleConfig};
use crate::error::{MemscopeError, Result};
use crate::io::ImageBytes;
use headers::parse_header;
pub use dynamic::{DynamicEntry, DynamicSection, Relocation, Symbol};
pub use notes::Note;
pub use segments::Segment;
pub use types::*;
use utils::ByteReader;

/// A module recorded in an image's notes: where it was loaded and its build
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub base: u64,
    pub size: u64,
    pub build_id: Vec<u8>,
}

/// A parsed static image.
#[derive(Debug)]
pub struct ElfImage {
    bytes: ImageBytes,
    header: ElfHeader,
    segments: Vec<Segment>,
    notes: Vec<Note>,
    module: ModuleConfig,
}

impl ElfImage {
    /// Map and parse the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: &InspectorConfig) -> Result<Self> {
        let bytes = ImageBytes::open(path, config.limits.max_file_size)?;
        Self::parse(bytes, config)
    }

    /// Parse an in-memory image with the default configuration.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::parse(bytes.into(), &InspectorConfig::default())
    }

    pub fn from_bytes_with_config(bytes: Vec<u8>, config: &InspectorConfig) -> Result<Self> {
        Self::parse(bytes.into(), config)
    }

    fn parse(bytes: ImageBytes, config: &InspectorConfig) -> Result<Self> {
        let header = parse_header(&bytes)?;
        let segments = segments::parse_segments(&bytes, &header)?;

        let mut notes = Vec::new();
        for seg in &segments {
            if seg.p_type == PT_LOAD {
                check_segment(seg, bytes.len(), config.limits.max_segment_size)?;
            }
            if seg.p_type == PT_NOTE {
                let start = seg.offset as usize;
                let data = start
                    .checked_add(seg.filesz as usize)
                    .and_then(|end| bytes.get(start..end))
                    .ok_or_else(|| {
                        MemscopeError::format(seg.offset, "note segment outside file")
                    })?;
                notes.extend(notes::parse_notes(
                    data,
                    seg.offset,
                    header.ident.class,
                    header.ident.data,
                )?);
            }
        }

        debug!(
            size = bytes.len(),
            segments = segments.len(),
            notes = notes.len(),
            "Parsed ELF image"
        );

        Ok(Self {
            bytes,
            header,
            segments,
            notes,
            module: config.module.clone(),
        })
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn load_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_load())
    }

    /// First LOAD segment whose memory range contains `address`.
    pub fn segment_at(&self, address: u64) -> Option<&Segment> {
        self.load_segments().find(|s| s.contains(address))
    }

    pub fn permissions(&self, address: u64) -> Result<Permissions> {
        self.segment_at(address)
            .map(Segment::permissions)
            .ok_or_else(|| MemscopeError::unmapped(address, 1))
    }

    /// Read `length` bytes at virtual address `address`.
    ///
    /// Ranges may span adjacent LOAD segments; bytes past a segment's file
    /// size read as zero. Any gap fails with `AddressOutOfRange`, as does an
    /// unmapped start even when `length` is zero.
    pub fn read(&self, address: u64, length: u64) -> Result<Vec<u8>> {
        let end = address
            .checked_add(length)
            .ok_or_else(|| MemscopeError::unmapped(address, length))?;
        if self.segment_at(address).is_none() {
            return Err(MemscopeError::unmapped(address, length));
        }
        // Grows per segment; `length` is caller-supplied.
        let mut out = Vec::new();
        let mut cursor = address;
        while cursor < end {
            let seg = self
                .segment_at(cursor)
                .ok_or_else(|| MemscopeError::unmapped(address, length))?;
            let seg_offset = cursor - seg.vaddr;
            let take = (end - cursor).min(seg.memsz - seg_offset);
            let chunk_start = out.len();
            if seg_offset < seg.filesz {
                let file_take = take.min(seg.filesz - seg_offset) as usize;
                let start = seg_offset as usize;
                out.extend_from_slice(&seg.file_bytes(&self.bytes)[start..start + file_take]);
            }
            out.resize(chunk_start + take as usize, 0);
            cursor += take;
        }
        Ok(out)
    }

    pub fn read_u8(&self, address: u64) -> Result<u8> {
        Ok(self.read(address, 1)?[0])
    }

    pub fn read_u16(&self, address: u64) -> Result<u16> {
        let b = self.read(address, 2)?;
        ByteReader::new(&b, 0, self.header.ident.class, self.header.ident.data).read_u16()
    }

    pub fn read_u32(&self, address: u64) -> Result<u32> {
        let b = self.read(address, 4)?;
        ByteReader::new(&b, 0, self.header.ident.class, self.header.ident.data).read_u32()
    }

    pub fn read_u64(&self, address: u64) -> Result<u64> {
        let b = self.read(address, 8)?;
        ByteReader::new(&b, 0, self.header.ident.class, self.header.ident.data).read_u64()
    }

    /// Segment contents as mapped: file bytes followed by the zero tail.
    pub fn segment_view(&self, seg: &Segment) -> Cow<'_, [u8]> {
        let file = seg.file_bytes(&self.bytes);
        if file.len() as u64 >= seg.memsz {
            Cow::Borrowed(&file[..seg.memsz as usize])
        } else {
            let mut view = file.to_vec();
            view.resize(seg.memsz as usize, 0);
            Cow::Owned(view)
        }
    }

    /// Addresses where `pattern` occurs at a `stride`-aligned offset from a
    /// segment start.
    ///
    /// Only segments of `p_type` (LOAD when `None`) whose flags equal
    /// `flags` exactly are searched. Matches inside zero-filled tails count.
    pub fn search(
        &self,
        pattern: &[u8],
        stride: u64,
        flags: Option<u32>,
        p_type: Option<u32>,
    ) -> Vec<u64> {
        let p_type = p_type.unwrap_or(PT_LOAD);
        let stride = stride.max(1) as usize;
        let mut hits = Vec::new();
        if pattern.is_empty() {
            return hits;
        }
        let finder = memmem::Finder::new(pattern);
        for seg in &self.segments {
            if seg.p_type != p_type || flags.is_some_and(|f| seg.flags != f) {
                continue;
            }
            let view = self.segment_view(seg);
            let mut pos = 0usize;
            while let Some(found) = finder.find(&view[pos..]) {
                let at = pos + found;
                if at % stride == 0 {
                    hits.push(seg.vaddr + at as u64);
                }
                pos = at + 1;
            }
        }
        debug!(pattern_len = pattern.len(), stride, hits = hits.len(), "Segment search");
        hits
    }

    /// Classic 16-bytes-per-line dump of `length` bytes at `address`.
    pub fn hexdump(&self, address: u64, length: u64) -> Result<String> {
        let bytes = self.read(address, length)?;
        let mut out = String::new();
        for (i, line) in bytes.chunks(16).enumerate() {
            let _ = write!(out, "{:016x} ", address + (i as u64) * 16);
            for col in 0..16 {
                match line.get(col) {
                    Some(b) => {
                        let _ = write!(out, " {:02x}", b);
                    }
                    None => out.push_str("   "),
                }
            }
            out.push_str("  |");
            out.extend(line.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            }));
            out.push_str("|\n");
        }
        Ok(out)
    }

    /// GNU build ID note, if present.
    pub fn build_id(&self) -> Option<&[u8]> {
        notes::build_id(&self.notes)
    }

    /// Modules recorded in this image's notes.
    pub fn loaded_modules(&self) -> Result<Vec<ModuleRecord>> {
        let mut modules = Vec::new();
        for note in &self.notes {
            if !note.is(&self.module.note_owner, self.module.note_type) {
                continue;
            }
            if note.desc.len() < 16 {
                return Err(MemscopeError::format(
                    0,
                    format!("module note descriptor has {} bytes", note.desc.len()),
                ));
            }
            modules.push(ModuleRecord {
                base: utils::le_u64(&note.desc[0..8]),
                size: utils::le_u64(&note.desc[8..16]),
                build_id: note.desc[16..].to_vec(),
            });
        }
        Ok(modules)
    }
}

fn check_segment(seg: &Segment, file_len: usize, max_memsz: u64) -> Result<()> {
    if seg.memsz > max_memsz {
        return Err(MemscopeError::format(
            seg.offset,
            format!(
                "segment at {:#x} has memsz {:#x} above limit {:#x}",
                seg.vaddr, seg.memsz, max_memsz
            ),
        ));
    }
    if seg.filesz > seg.memsz {
        return Err(MemscopeError::format(
            seg.offset,
            format!(
                "segment at {:#x} has filesz {:#x} > memsz {:#x}",
                seg.vaddr, seg.filesz, seg.memsz
            ),
        ));
    }
    let fits = seg
        .offset
        .checked_add(seg.filesz)
        .is_some_and(|end| end <= file_len as u64);
    if !fits {
        return Err(MemscopeError::format(
            seg.offset,
            format!("segment at {:#x} extends past end of file", seg.vaddr),
        ));
    }
    Ok(())
}
