//! Memory mapping utilities for process address space analysis
//!
//! This module parses `/proc/self/maps` to find every file-backed object
//! loaded into the process, along with the runtime address it was mapped
//! at, which is needed to translate return addresses from
//! position-independent code back to link-time addresses.

use anyhow::{Context, Result};
use log::debug;
use std::fs;

/// Memory range of a loaded binary in the process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// A file mapped into the process, merged across all its mappings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedObject {
    /// Path as shown in the maps file
    pub path: String,
    /// Lowest start to highest end over all mappings of `path`
    pub range: MemoryRange,
    /// Runtime address of the mapping that starts at file offset 0
    pub base: Option<u64>,
    /// Whether any mapping of `path` is executable
    pub executable: bool,
}

/// Read and parse `/proc/self/maps`
///
/// # Errors
/// Returns an error if the maps file cannot be read
pub fn read_mapped_objects() -> Result<Vec<MappedObject>> {
    let maps_path = "/proc/self/maps";
    let maps = fs::read_to_string(maps_path).context(format!("Failed to read {maps_path}"))?;
    let objects = parse_mapped_objects(&maps);
    debug!("Found {} file-backed objects in {maps_path}", objects.len());
    Ok(objects)
}

/// Parse the contents of a maps file into per-file objects
///
/// Anonymous and pseudo mappings (`[heap]`, `[vdso]`, ...) and deleted files
/// are skipped. Objects keep the order in which they first appear.
#[must_use]
pub fn parse_mapped_objects(maps: &str) -> Vec<MappedObject> {
    let mut objects: Vec<MappedObject> = Vec::new();

    for line in maps.lines() {
        let Some(mapping) = parse_line(line) else {
            continue;
        };

        match objects.iter_mut().find(|obj| obj.path == mapping.path) {
            Some(obj) => {
                // Track the minimum start and maximum end
                obj.range.start = obj.range.start.min(mapping.start);
                obj.range.end = obj.range.end.max(mapping.end);
                obj.executable |= mapping.executable;
                if mapping.offset == 0 && obj.base.is_none() {
                    obj.base = Some(mapping.start);
                }
            }
            None => objects.push(MappedObject {
                path: mapping.path.to_string(),
                range: MemoryRange { start: mapping.start, end: mapping.end },
                base: (mapping.offset == 0).then_some(mapping.start),
                executable: mapping.executable,
            }),
        }
    }

    objects
}

struct Mapping<'a> {
    start: u64,
    end: u64,
    offset: u64,
    executable: bool,
    path: &'a str,
}

/// Parse one line: "start-end perms offset dev inode pathname"
///
/// The first five fields are single-space separated; the pathname is
/// padded and may itself contain spaces.
fn parse_line(line: &str) -> Option<Mapping<'_>> {
    let mut fields = line.splitn(6, ' ');
    let range = fields.next()?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.next()?.trim_start();

    if !path.starts_with('/') || path.ends_with(" (deleted)") {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    Some(Mapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
        executable: perms.as_bytes().get(2) == Some(&b'x'),
        path,
    })
}
