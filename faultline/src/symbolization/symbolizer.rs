use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{debug, info};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use super::memory_maps::{read_mapped_objects, MappedObject, MemoryRange};
use crate::stack::page_size;

/// Symbolizer for resolving instruction pointers to function names
///
/// All ELF and DWARF parsing happens when the symbolizer is built. The
/// result is a set of immutable sorted tables, so [`Symbolizer::resolve`]
/// is a pair of binary searches that never allocates and is safe to call
/// from a signal handler or from several threads at once.
pub struct Symbolizer {
    /// Indexed objects sorted by runtime start address
    images: Vec<ObjectImage>,
}

struct ObjectImage {
    path: String,
    range: MemoryRange,
    /// Runtime address minus link-time address
    bias: u64,
    table: SymbolTable,
}

impl Symbolizer {
    /// Create a symbolizer for a single binary at its link-time addresses
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let path = binary_path.as_ref();
        let binary_data = fs::read(path).context("Failed to read binary file")?;
        let table = SymbolTable::parse(&binary_data, true)?;

        Ok(Self {
            images: vec![ObjectImage {
                path: path.display().to_string(),
                range: MemoryRange { start: 0, end: u64::MAX },
                bias: 0,
                table,
            }],
        })
    }

    /// Index the objects currently mapped into this process
    ///
    /// At most `capacity` objects are indexed, in `/proc/self/maps` order.
    /// Line tables are loaded for the main executable only.
    ///
    /// # Errors
    /// Returns an error if `/proc/self/maps` cannot be read
    pub fn from_current_process(capacity: usize, line_tables: bool) -> Result<Self> {
        let objects = read_mapped_objects()?;
        let main_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.to_str().map(std::string::ToString::to_string));
        Ok(Self::from_objects(&objects, capacity, main_exe.as_deref(), line_tables))
    }

    /// Index a set of mapped objects; unreadable objects are skipped
    #[must_use]
    pub fn from_objects(
        objects: &[MappedObject],
        capacity: usize,
        main_exe: Option<&str>,
        line_tables: bool,
    ) -> Self {
        let mut images = Vec::new();

        for object in objects.iter().filter(|obj| obj.executable) {
            if images.len() >= capacity {
                debug!("Symbol cache full ({capacity} objects), not indexing {}", object.path);
                continue;
            }
            let with_lines = line_tables && main_exe == Some(object.path.as_str());
            match load_image(object, with_lines) {
                Ok(image) => images.push(image),
                Err(e) => debug!("Skipping {}: {e:#}", object.path),
            }
        }

        images.sort_by_key(|image| image.range.start);
        info!(
            "Symbolizer indexed {} objects ({} symbols, {} line entries)",
            images.len(),
            images.iter().map(|image| image.table.symbols.len()).sum::<usize>(),
            images.iter().map(|image| image.table.lines.len()).sum::<usize>(),
        );

        Self { images }
    }

    /// Resolve an exact instruction address
    #[must_use]
    pub fn resolve(&self, addr: u64) -> SymbolizedFrame<'_> {
        self.lookup(addr, addr)
    }

    /// Resolve a return address by looking up the call instruction before it
    #[must_use]
    pub fn resolve_return_address(&self, addr: u64) -> SymbolizedFrame<'_> {
        self.lookup(addr, addr.saturating_sub(1))
    }

    /// Number of indexed objects
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.images.len()
    }

    /// Demangle a Rust symbol name
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }

    fn lookup(&self, addr: u64, probe: u64) -> SymbolizedFrame<'_> {
        let mut frame = SymbolizedFrame::unknown(addr);

        let idx = self.images.partition_point(|image| image.range.start <= probe);
        let Some(image) = idx.checked_sub(1).map(|i| &self.images[i]) else {
            return frame;
        };
        if !image.range.contains(probe) {
            return frame;
        }

        frame.object = Some(&image.path);
        let link_probe = probe.wrapping_sub(image.bias);

        if let Some(symbol) = image.table.find_symbol(link_probe) {
            frame.name = Some(&symbol.name);
            frame.offset = addr.wrapping_sub(image.bias).wrapping_sub(symbol.start);
        }
        if let Some((file, line)) = image.table.find_line(link_probe) {
            frame.file = Some(file);
            frame.line = Some(line);
        }

        frame
    }
}

fn load_image(object: &MappedObject, line_tables: bool) -> Result<ObjectImage> {
    let data = fs::read(&object.path).context("Failed to read object file")?;
    let table = SymbolTable::parse(&data, line_tables)?;

    let page_mask = !(page_size() as u64 - 1);
    let base = object.base.unwrap_or(object.range.start);
    let bias = base.wrapping_sub(table.link_base & page_mask);

    Ok(ObjectImage { path: object.path.clone(), range: object.range, bias, table })
}

/// A resolved address; every part beyond `addr` is best effort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolizedFrame<'a> {
    pub addr: u64,
    /// Demangled function name
    pub name: Option<&'a str>,
    /// Distance from the start of the function
    pub offset: u64,
    pub file: Option<&'a str>,
    pub line: Option<u32>,
    /// Path of the object containing `addr`
    pub object: Option<&'a str>,
}

impl SymbolizedFrame<'_> {
    fn unknown(addr: u64) -> Self {
        Self { addr, name: None, offset: 0, file: None, line: None, object: None }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        self.name.is_some()
    }
}

/// Sorted symbol and line tables for one ELF object
pub struct SymbolTable {
    symbols: Vec<SymbolEntry>,
    lines: Vec<LineEntry>,
    files: Vec<String>,
    /// Lowest `PT_LOAD` virtual address
    link_base: u64,
}

struct SymbolEntry {
    start: u64,
    end: u64,
    name: Box<str>,
}

struct LineEntry {
    start: u64,
    end: u64,
    file: u32,
    line: u32,
}

impl SymbolTable {
    /// Build tables from ELF bytes
    ///
    /// Missing or broken DWARF is not an error: the table simply has no
    /// line information.
    ///
    /// # Errors
    /// Returns an error if `data` is not a parseable object file
    pub fn parse(data: &[u8], line_tables: bool) -> Result<Self> {
        let obj_file = object::File::parse(data).context("Failed to parse object file")?;

        let symbols = collect_symbols(&obj_file);
        let (lines, files) = if line_tables {
            load_line_table(&obj_file).unwrap_or_else(|e| {
                debug!("No line table: {e:#}");
                (Vec::new(), Vec::new())
            })
        } else {
            (Vec::new(), Vec::new())
        };
        let link_base = obj_file.segments().map(|segment| segment.address()).min().unwrap_or(0);

        Ok(Self { symbols, lines, files, link_base })
    }

    fn find_symbol(&self, addr: u64) -> Option<&SymbolEntry> {
        let idx = self.symbols.partition_point(|symbol| symbol.start <= addr);
        let symbol = &self.symbols[idx.checked_sub(1)?];
        (addr < symbol.end).then_some(symbol)
    }

    fn find_line(&self, addr: u64) -> Option<(&str, u32)> {
        let idx = self.lines.partition_point(|line| line.start <= addr);
        let entry = &self.lines[idx.checked_sub(1)?];
        if addr >= entry.end {
            return None;
        }
        let file = self.files.get(entry.file as usize)?;
        Some((file.as_str(), entry.line))
    }
}

/// Defined text symbols from `.symtab` and `.dynsym`, sorted by address
fn collect_symbols(obj_file: &object::File<'_>) -> Vec<SymbolEntry> {
    let mut symbols: Vec<SymbolEntry> = obj_file
        .symbols()
        .chain(obj_file.dynamic_symbols())
        .filter(|symbol| {
            symbol.kind() == SymbolKind::Text && symbol.is_definition() && symbol.address() != 0
        })
        .filter_map(|symbol| {
            let name = symbol.name().ok().filter(|name| !name.is_empty())?;
            Some(SymbolEntry {
                start: symbol.address(),
                end: symbol.address().saturating_add(symbol.size()),
                name: Symbolizer::demangle_symbol(name).into_boxed_str(),
            })
        })
        .collect();

    // Prefer the widest symbol at each address (.symtab and .dynsym overlap)
    symbols.sort_by_key(|symbol| (symbol.start, std::cmp::Reverse(symbol.end)));
    symbols.dedup_by_key(|symbol| symbol.start);

    // Zero-sized symbols extend to the next symbol
    for idx in 0..symbols.len() {
        if symbols[idx].end <= symbols[idx].start {
            let start = symbols[idx].start;
            symbols[idx].end = symbols.get(idx + 1).map_or(start + 1, |next| next.start);
        }
    }

    symbols
}

/// Address → file:line table for the whole object, adjacent rows merged
fn load_line_table(obj_file: &object::File<'_>) -> Result<(Vec<LineEntry>, Vec<String>)> {
    // Load DWARF debug info
    let endian =
        if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

    let load_section =
        |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
            let data = obj_file
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
            Ok(EndianRcSlice::new(Rc::from(&*data), endian))
        };

    let dwarf = gimli::Dwarf::load(&load_section)?;
    let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

    let mut files: Vec<String> = Vec::new();
    let mut file_ids: HashMap<String, u32> = HashMap::new();
    let mut lines: Vec<LineEntry> = Vec::new();

    for (addr, len, location) in ctx.find_location_range(0, u64::MAX)? {
        let (Some(file), Some(line)) = (location.file, location.line) else {
            continue;
        };
        let file = if let Some(&id) = file_ids.get(file) {
            id
        } else {
            let id = u32::try_from(files.len()).context("Too many source files")?;
            files.push(file.to_string());
            file_ids.insert(file.to_string(), id);
            id
        };
        lines.push(LineEntry { start: addr, end: addr.saturating_add(len), file, line });
    }

    lines.sort_by_key(|entry| entry.start);
    lines.dedup_by(|next, prev| {
        let merge = prev.file == next.file && prev.line == next.line && prev.end == next.start;
        if merge {
            prev.end = next.end;
        }
        merge
    });

    Ok((lines, files))
}
