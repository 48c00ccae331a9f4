//! In-memory tree of folders and files, mirroring the on-disk pointer graph
//! of absolute byte offsets (§3/§4.1).
//!
//! Ownership follows the decision recorded in DESIGN.md: each node owns its
//! next sibling and its first children by value (`Option<Box<_>>`); parent
//! and cross-tree references are resolved through the archive's `lookup_id`
//! map rather than held directly, so there are no back-pointers and no
//! reference counting.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::block::{self, Progress};
use crate::error::{ArchiveError, Result};

pub const FOLDER_HEADER_SIZE: u64 = 33;
pub const FILE_HEADER_SIZE: u64 = 43;

/// bits 13/14/15 (checksum selection), 6 (encrypted), 9-12 (block size).
pub mod flags {
    pub const BWT: u16 = 1 << 0;
    pub const MTF: u16 = 1 << 1;
    pub const RLE: u16 = 1 << 2;
    pub const AC_ORDER0: u16 = 1 << 3;
    pub const AC_ORDER1: u16 = 1 << 4;
    pub const RANS: u16 = 1 << 5;
    pub const ENCRYPTED: u16 = 1 << 6;
    pub const SHA256: u16 = 1 << 13;
    pub const CRC32: u16 = 1 << 14;
    pub const SHA1: u16 = 1 << 15;
}

fn read_name<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u8()?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| ArchiveError::Format(format!("node name is not valid UTF-8: {e}")))
}

fn write_name<W: Write>(w: &mut W, name: &str) -> Result<()> {
    if name.len() > 255 {
        return Err(ArchiveError::Format(format!("node name {name:?} exceeds 255 bytes")));
    }
    w.write_u8(name.len() as u8)?;
    w.write_all(name.as_bytes())?;
    Ok(())
}

/// Splits `"<stem>.<ext>"` into `(stem, ext-with-dot)`; a name with no `.`
/// has an empty extension. Used by the duplicate-name policy.
fn split_stem_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(i) => (&name[..i], &name[i..]),
    }
}

/// Produce `name`, or `"<stem> (k)<ext>"` for the smallest `k` not already
/// present in `existing`.
pub fn disambiguate_name(name: &str, existing: &[&str]) -> String {
    if !existing.contains(&name) {
        return name.to_string();
    }
    let (stem, ext) = split_stem_ext(name);
    let mut k = 1u32;
    loop {
        let candidate = format!("{stem} ({k}){ext}");
        if !existing.contains(&candidate.as_str()) {
            return candidate;
        }
        k += 1;
    }
}

impl std::fmt::Display for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.recursive_string())
    }
}

#[derive(Debug)]
pub struct Folder {
    pub lookup_id: u64,
    pub name: String,
    pub location: u64,
    pub parent_offset: u64,
    pub first_child_folder: Option<Box<Folder>>,
    pub next_sibling_folder: Option<Box<Folder>>,
    pub first_child_file: Option<Box<File>>,
    pub already_saved: bool,
    pub ptr_already_gotten: bool,
}

impl Folder {
    pub fn new(lookup_id: u64, name: String) -> Self {
        Self {
            lookup_id,
            name,
            location: 0,
            parent_offset: 0,
            first_child_folder: None,
            next_sibling_folder: None,
            first_child_file: None,
            already_saved: false,
            ptr_already_gotten: false,
        }
    }

    fn field_offset_parent(&self) -> u64 {
        self.location + 1 + self.name.len() as u64
    }
    fn field_offset_first_child_folder(&self) -> u64 {
        self.field_offset_parent() + 8
    }
    fn field_offset_next_sibling_folder(&self) -> u64 {
        self.field_offset_first_child_folder() + 8
    }
    fn field_offset_first_child_file(&self) -> u64 {
        self.field_offset_next_sibling_folder() + 8
    }

    /// Reads the folder header at `offset` and recursively parses every
    /// non-zero child/sibling link. `parent_offset` becomes this folder's
    /// own `parent_offset` field only when the link it was reached through
    /// is non-zero (the root is reached with `parent_offset = 0`).
    pub fn parse<R: Read + Seek>(stream: &mut R, offset: u64, next_id: &mut u64) -> Result<Box<Folder>> {
        stream.seek(SeekFrom::Start(offset))?;
        let name = read_name(stream)?;
        let parent_offset = stream.read_u64::<LittleEndian>()?;
        let first_child_folder_offset = stream.read_u64::<LittleEndian>()?;
        let next_sibling_folder_offset = stream.read_u64::<LittleEndian>()?;
        let first_child_file_offset = stream.read_u64::<LittleEndian>()?;

        let lookup_id = *next_id;
        *next_id += 1;

        let mut folder = Box::new(Folder::new(lookup_id, name));
        folder.location = offset;
        folder.parent_offset = parent_offset;
        folder.already_saved = true;

        if first_child_folder_offset != 0 {
            folder.first_child_folder = Some(Folder::parse(stream, first_child_folder_offset, next_id)?);
        }
        if next_sibling_folder_offset != 0 {
            folder.next_sibling_folder = Some(Folder::parse(stream, next_sibling_folder_offset, next_id)?);
        }
        if first_child_file_offset != 0 {
            folder.first_child_file = Some(File::parse(stream, first_child_file_offset, next_id)?);
        }
        Ok(folder)
    }

    /// Appends this folder (and its whole chain of siblings/children) to
    /// the end of `stream`, back-patching the link at `backpatch_at` (if
    /// any) to point at this folder's freshly assigned location. `sources`
    /// supplies the not-yet-written plaintext for any file reached, keyed
    /// by `lookup_id`; a file absent from the map is written header-only
    /// (used when re-saving a tree that already has on-disk payloads).
    pub fn write<W: Write + Seek>(
        &mut self,
        stream: &mut W,
        backpatch_at: Option<u64>,
        sources: &HashMap<u64, Vec<u8>>,
        cancel: &(dyn Fn() -> bool + Sync),
        progress: &Progress,
    ) -> Result<()> {
        let location = stream.seek(SeekFrom::End(0))?;
        self.location = location;
        if let Some(field_offset) = backpatch_at {
            patch_u64(stream, field_offset, location)?;
            stream.seek(SeekFrom::Start(location))?;
        }

        write_name(stream, &self.name)?;
        stream.write_u64::<LittleEndian>(self.parent_offset)?;
        stream.write_u64::<LittleEndian>(0)?; // first_child_folder, back-patched below
        stream.write_u64::<LittleEndian>(0)?; // next_sibling_folder, back-patched below
        stream.write_u64::<LittleEndian>(0)?; // first_child_file, back-patched below
        self.already_saved = true;

        let next_sibling_folder_offset = self.field_offset_next_sibling_folder();
        if let Some(sibling) = self.next_sibling_folder.as_mut() {
            sibling.parent_offset = self.parent_offset;
            sibling.write(stream, Some(next_sibling_folder_offset), sources, cancel, progress)?;
        }
        let first_child_file_offset = self.field_offset_first_child_file();
        write_file_chain(
            &mut self.first_child_file,
            stream,
            Some(first_child_file_offset),
            self.location,
            sources,
            cancel,
            progress,
        )?;
        let first_child_folder_offset = self.field_offset_first_child_folder();
        if let Some(child) = self.first_child_folder.as_mut() {
            child.parent_offset = self.location;
            child.write(stream, Some(first_child_folder_offset), sources, cancel, progress)?;
        }
        Ok(())
    }

    /// Streams this folder's surviving subtree (skipping any node marked
    /// `ptr_already_gotten`, and the whole subtree under it) into `dst`.
    /// `sources` supplies plaintext for any file reached that has never been
    /// materialized on disk (staged by `add_file` but not yet saved); every
    /// other file's existing payload is streamed byte-for-byte.
    pub fn copy_to<R: Read + Seek, W: Write + Seek>(
        &mut self,
        src: &mut R,
        dst: &mut W,
        backpatch_at: Option<u64>,
        sources: &HashMap<u64, Vec<u8>>,
        cancel: &(dyn Fn() -> bool + Sync),
        progress: &Progress,
    ) -> Result<()> {
        if self.ptr_already_gotten {
            // Skipped: the caller must redirect its back-patch to the next
            // surviving sibling, which we cannot see from here, so callers
            // walk the sibling chain themselves rather than recursing blindly.
            return Ok(());
        }

        let location = dst.seek(SeekFrom::End(0))?;
        self.location = location;
        if let Some(field_offset) = backpatch_at {
            patch_u64(dst, field_offset, location)?;
            dst.seek(SeekFrom::Start(location))?;
        }

        write_name(dst, &self.name)?;
        dst.write_u64::<LittleEndian>(self.parent_offset)?;
        dst.write_u64::<LittleEndian>(0)?;
        dst.write_u64::<LittleEndian>(0)?;
        dst.write_u64::<LittleEndian>(0)?;
        self.already_saved = true;

        let next_sibling_folder_offset = self.field_offset_next_sibling_folder();
        if let Some(sibling) = next_surviving_folder(&mut self.next_sibling_folder) {
            sibling.parent_offset = self.parent_offset;
            sibling.copy_to(src, dst, Some(next_sibling_folder_offset), sources, cancel, progress)?;
        }
        let first_child_file_offset = self.field_offset_first_child_file();
        if let Some(file) = next_surviving_file(&mut self.first_child_file) {
            file.parent_offset = self.location;
            file.copy_to(src, dst, Some(first_child_file_offset), sources, cancel, progress)?;
        }
        let first_child_folder_offset = self.field_offset_first_child_folder();
        if let Some(child) = next_surviving_folder(&mut self.first_child_folder) {
            child.parent_offset = self.location;
            child.copy_to(src, dst, Some(first_child_folder_offset), sources, cancel, progress)?;
        }
        Ok(())
    }

    /// Appends only the nodes under this folder that are not yet
    /// materialized on disk (`already_saved == false`), leaving every
    /// already-saved node's bytes untouched. Used by `Archive::save` when
    /// saving back over an archive that was loaded or previously saved, so
    /// `add_file`/`add_folder` never re-encodes or truncates existing
    /// payloads.
    pub fn write_new<W: Write + Seek>(
        &mut self,
        stream: &mut W,
        sources: &HashMap<u64, Vec<u8>>,
        cancel: &(dyn Fn() -> bool + Sync),
        progress: &Progress,
    ) -> Result<()> {
        let first_child_folder_offset = self.field_offset_first_child_folder();
        write_new_folder_chain(
            &mut self.first_child_folder,
            stream,
            Some(first_child_folder_offset),
            self.location,
            sources,
            cancel,
            progress,
        )?;
        let first_child_file_offset = self.field_offset_first_child_file();
        write_new_file_chain(
            &mut self.first_child_file,
            stream,
            Some(first_child_file_offset),
            self.location,
            sources,
            cancel,
            progress,
        )
    }

    /// Walks this folder and its whole subtree, calling `f` on every folder
    /// and file reached (used to populate the `lookup_id` map after load,
    /// and to collect ids for removal).
    pub fn walk(&self, f: &mut dyn FnMut(NodeRef)) {
        f(NodeRef::Folder(self.lookup_id, self.location));
        if let Some(child) = &self.first_child_folder {
            child.walk(f);
        }
        if let Some(file) = &self.first_child_file {
            file.walk(f);
        }
        if let Some(sibling) = &self.next_sibling_folder {
            sibling.walk(f);
        }
    }

    /// Renders this folder and its whole subtree as an indented listing,
    /// one node per line, folders first then files at each level.
    pub fn recursive_string(&self) -> String {
        let mut out = String::new();
        self.write_recursive(&mut out, 0);
        out
    }

    fn write_recursive(&self, out: &mut String, depth: usize) {
        use std::fmt::Write as _;
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}{}/ (id={})", self.name, self.lookup_id);
        if let Some(child) = &self.first_child_folder {
            child.write_recursive(out, depth + 1);
        }
        let mut file = self.first_child_file.as_deref();
        while let Some(f) = file {
            let _ = writeln!(out, "{indent}  {} (id={})", f.name, f.lookup_id);
            file = f.next_sibling_file.as_deref();
        }
        if let Some(sibling) = &self.next_sibling_folder {
            sibling.write_recursive(out, depth);
        }
    }

    /// Marks every node in `ids` and its whole subtree as a tombstone.
    pub fn mark_removed(&mut self, ids: &std::collections::HashSet<u64>) {
        if ids.contains(&self.lookup_id) {
            self.ptr_already_gotten = true;
            mark_subtree(self);
        } else {
            if let Some(child) = &mut self.first_child_folder {
                child.mark_removed(ids);
            }
            if let Some(file) = &mut self.first_child_file {
                file.mark_removed(ids);
            }
        }
        if let Some(sibling) = &mut self.next_sibling_folder {
            sibling.mark_removed(ids);
        }
    }
}

fn mark_subtree(folder: &mut Folder) {
    folder.ptr_already_gotten = true;
    if let Some(child) = &mut folder.first_child_folder {
        mark_subtree(child);
    }
    if let Some(file) = &mut folder.first_child_file {
        mark_file_subtree(file);
    }
}

fn mark_file_subtree(file: &mut File) {
    file.ptr_already_gotten = true;
}

fn next_surviving_folder(slot: &mut Option<Box<Folder>>) -> Option<&mut Box<Folder>> {
    while let Some(node) = slot {
        if node.ptr_already_gotten {
            *slot = node.next_sibling_folder.take();
            continue;
        }
        return slot.as_mut();
    }
    None
}

fn next_surviving_file(slot: &mut Option<Box<File>>) -> Option<&mut Box<File>> {
    while let Some(node) = slot {
        if node.ptr_already_gotten {
            *slot = node.next_sibling_file.take();
            continue;
        }
        return slot.as_mut();
    }
    None
}

#[derive(Debug)]
pub struct File {
    pub lookup_id: u64,
    pub name: String,
    pub location: u64,
    pub parent_offset: u64,
    pub next_sibling_file: Option<Box<File>>,
    pub flags: u16,
    pub data_offset: u64,
    pub compressed_size: u64,
    pub original_size: u64,
    pub already_saved: bool,
    pub ptr_already_gotten: bool,
}

impl File {
    pub fn new(lookup_id: u64, name: String, flags: u16) -> Self {
        Self {
            lookup_id,
            name,
            location: 0,
            parent_offset: 0,
            next_sibling_file: None,
            flags,
            data_offset: 0,
            compressed_size: 0,
            original_size: 0,
            already_saved: false,
            ptr_already_gotten: false,
        }
    }

    fn field_offset_parent(&self) -> u64 {
        self.location + 1 + self.name.len() as u64
    }
    fn field_offset_next_sibling_file(&self) -> u64 {
        self.field_offset_parent() + 8
    }
    fn field_offset_flags(&self) -> u64 {
        self.field_offset_next_sibling_file() + 8
    }
    fn field_offset_data_offset(&self) -> u64 {
        self.field_offset_flags() + 2
    }
    fn field_offset_compressed_size(&self) -> u64 {
        self.field_offset_data_offset() + 8
    }

    pub fn parse<R: Read + Seek>(stream: &mut R, offset: u64, next_id: &mut u64) -> Result<Box<File>> {
        stream.seek(SeekFrom::Start(offset))?;
        let name = read_name(stream)?;
        let parent_offset = stream.read_u64::<LittleEndian>()?;
        let next_sibling_file_offset = stream.read_u64::<LittleEndian>()?;
        let flags = stream.read_u16::<LittleEndian>()?;
        let data_offset = stream.read_u64::<LittleEndian>()?;
        let compressed_size = stream.read_u64::<LittleEndian>()?;
        let original_size = stream.read_u64::<LittleEndian>()?;

        let lookup_id = *next_id;
        *next_id += 1;

        let mut file = Box::new(File::new(lookup_id, name, flags));
        file.location = offset;
        file.parent_offset = parent_offset;
        file.data_offset = data_offset;
        file.compressed_size = compressed_size;
        file.original_size = original_size;
        file.already_saved = true;

        if next_sibling_file_offset != 0 {
            file.next_sibling_file = Some(File::parse(stream, next_sibling_file_offset, next_id)?);
        }
        Ok(file)
    }

    fn walk(&self, f: &mut dyn FnMut(NodeRef)) {
        f(NodeRef::File(self.lookup_id, self.location));
        if let Some(sibling) = &self.next_sibling_file {
            sibling.walk(f);
        }
    }

    fn mark_removed(&mut self, ids: &std::collections::HashSet<u64>) {
        if ids.contains(&self.lookup_id) {
            self.ptr_already_gotten = true;
        }
        if let Some(sibling) = &mut self.next_sibling_file {
            sibling.mark_removed(ids);
        }
    }

    /// Writes this file's header alone (no sibling recursion), then if
    /// `data` is given, the encoded block payload and checksum trailer,
    /// back-patching `data_offset` and `compressed_size` once the payload
    /// length is known. Used by [`write_file_chain`], which supplies each
    /// sibling's own source bytes.
    fn write_single<W: Write + Seek>(
        &mut self,
        stream: &mut W,
        backpatch_at: Option<u64>,
        data: Option<&[u8]>,
        cancel: &(dyn Fn() -> bool + Sync),
        progress: &Progress,
    ) -> Result<()> {
        let location = stream.seek(SeekFrom::End(0))?;
        self.location = location;
        if let Some(field_offset) = backpatch_at {
            patch_u64(stream, field_offset, location)?;
            stream.seek(SeekFrom::Start(location))?;
        }

        write_name(stream, &self.name)?;
        stream.write_u64::<LittleEndian>(self.parent_offset)?;
        stream.write_u64::<LittleEndian>(0)?; // next_sibling_file, back-patched by the caller
        stream.write_u16::<LittleEndian>(self.flags)?;
        stream.write_u64::<LittleEndian>(0)?; // data_offset, back-patched below
        stream.write_u64::<LittleEndian>(0)?; // compressed_size, back-patched below
        stream.write_u64::<LittleEndian>(self.original_size)?;
        self.already_saved = true;

        if let Some(data) = data {
            let data_offset = stream.stream_position()?;
            let compressed_size = block::encode_file(stream, data, self.flags, cancel, progress)?;
            self.data_offset = data_offset;
            self.compressed_size = compressed_size;
            patch_u64(stream, self.field_offset_data_offset(), data_offset)?;
            patch_u64(stream, self.field_offset_compressed_size(), compressed_size)?;
            stream.seek(SeekFrom::End(0))?;
        }
        Ok(())
    }

    /// Whether this file's content is AES-128-CTR encrypted on disk.
    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    /// Whether unpacking this file requires a key. In this tree there is no
    /// separate unlocked-in-memory state to track, so this aliases
    /// [`File::is_encrypted`].
    pub fn is_locked(&self) -> bool {
        self.is_encrypted()
    }

    fn checksum_trailer_len(&self) -> u64 {
        crate::hashing::ChecksumKind::from_flags(self.flags).map(|k| k.trailer_len() as u64).unwrap_or(0)
    }

    /// Streams this file's header and payload into `dst`. A file already
    /// materialized on disk is copied byte-for-byte (no re-encode),
    /// including its checksum trailer; a file only staged in `sources`
    /// (added but never yet saved) is encoded fresh, the same as a first
    /// save would.
    pub fn copy_to<R: Read + Seek, W: Write + Seek>(
        &mut self,
        src: &mut R,
        dst: &mut W,
        backpatch_at: Option<u64>,
        sources: &HashMap<u64, Vec<u8>>,
        cancel: &(dyn Fn() -> bool + Sync),
        progress: &Progress,
    ) -> Result<()> {
        let location = dst.seek(SeekFrom::End(0))?;
        self.location = location;
        if let Some(field_offset) = backpatch_at {
            patch_u64(dst, field_offset, location)?;
            dst.seek(SeekFrom::Start(location))?;
        }

        write_name(dst, &self.name)?;
        dst.write_u64::<LittleEndian>(self.parent_offset)?;
        dst.write_u64::<LittleEndian>(0)?;
        dst.write_u16::<LittleEndian>(self.flags)?;
        dst.write_u64::<LittleEndian>(0)?;
        dst.write_u64::<LittleEndian>(0)?;
        dst.write_u64::<LittleEndian>(self.original_size)?;

        let new_data_offset = dst.stream_position()?;
        if let Some(data) = sources.get(&self.lookup_id) {
            self.compressed_size = block::encode_file(dst, data, self.flags, cancel, progress)?;
        } else {
            let payload_len = self.compressed_size + self.checksum_trailer_len();
            stream_copy(src, dst, self.data_offset, payload_len)?;
        }
        self.data_offset = new_data_offset;
        self.already_saved = true;
        patch_u64(dst, self.field_offset_data_offset(), new_data_offset)?;
        patch_u64(dst, self.field_offset_compressed_size(), self.compressed_size)?;
        dst.seek(SeekFrom::End(0))?;

        let next_sibling_file_offset = self.field_offset_next_sibling_file();
        if let Some(sibling) = next_surviving_file(&mut self.next_sibling_file) {
            sibling.parent_offset = self.parent_offset;
            sibling.copy_to(src, dst, Some(next_sibling_file_offset), sources, cancel, progress)?;
        }
        Ok(())
    }
}

/// Copies `len` bytes starting at `offset` in `src` into `dst` at its
/// current position, 32 KiB at a time (§4.6).
fn stream_copy<R: Read + Seek, W: Write>(src: &mut R, dst: &mut W, offset: u64, len: u64) -> Result<()> {
    const CHUNK: usize = 32 * 1024;
    src.seek(SeekFrom::Start(offset))?;
    let mut remaining = len;
    let mut buf = [0u8; CHUNK];
    while remaining > 0 {
        let to_read = remaining.min(CHUNK as u64) as usize;
        src.read_exact(&mut buf[..to_read])?;
        dst.write_all(&buf[..to_read])?;
        remaining -= to_read as u64;
    }
    Ok(())
}

/// Iteratively writes a sibling chain of files (avoiding recursion, since
/// each sibling needs its own source bytes looked up by `lookup_id`).
fn write_file_chain<W: Write + Seek>(
    head: &mut Option<Box<File>>,
    stream: &mut W,
    mut backpatch_at: Option<u64>,
    parent_offset: u64,
    sources: &HashMap<u64, Vec<u8>>,
    cancel: &(dyn Fn() -> bool + Sync),
    progress: &Progress,
) -> Result<()> {
    let mut current = head;
    while let Some(node) = current {
        node.parent_offset = parent_offset;
        let data = sources.get(&node.lookup_id).map(|d| d.as_slice());
        node.write_single(stream, backpatch_at, data, cancel, progress)?;
        backpatch_at = Some(node.field_offset_next_sibling_file());
        current = &mut node.next_sibling_file;
    }
    Ok(())
}

/// Walks an existing (already-saved) folder sibling chain without writing
/// anything, until it reaches either the end of the chain or the first
/// not-yet-saved folder — which, since new folders are always appended at
/// the tail, marks the start of an entire fresh subtree handed off to
/// [`Folder::write`]. Each already-saved folder still has its own children
/// recursively checked for a fresh tail of their own.
fn write_new_folder_chain<W: Write + Seek>(
    head: &mut Option<Box<Folder>>,
    stream: &mut W,
    mut backpatch_at: Option<u64>,
    parent_location: u64,
    sources: &HashMap<u64, Vec<u8>>,
    cancel: &(dyn Fn() -> bool + Sync),
    progress: &Progress,
) -> Result<()> {
    let mut current = head;
    while let Some(node) = current {
        if !node.already_saved {
            node.parent_offset = parent_location;
            return node.write(stream, backpatch_at, sources, cancel, progress);
        }
        node.write_new(stream, sources, cancel, progress)?;
        backpatch_at = Some(node.field_offset_next_sibling_folder());
        current = &mut node.next_sibling_folder;
    }
    Ok(())
}

/// Same idea as [`write_new_folder_chain`] but for a file sibling chain,
/// where the first not-yet-saved file hands the rest of the chain off to
/// [`write_file_chain`] (files have no children of their own to recurse
/// into, so there is nothing else to check once a saved file is skipped).
fn write_new_file_chain<W: Write + Seek>(
    head: &mut Option<Box<File>>,
    stream: &mut W,
    mut backpatch_at: Option<u64>,
    parent_location: u64,
    sources: &HashMap<u64, Vec<u8>>,
    cancel: &(dyn Fn() -> bool + Sync),
    progress: &Progress,
) -> Result<()> {
    let mut current = head;
    while current.is_some() {
        if !current.as_ref().unwrap().already_saved {
            return write_file_chain(current, stream, backpatch_at, parent_location, sources, cancel, progress);
        }
        let node = current.as_mut().unwrap();
        backpatch_at = Some(node.field_offset_next_sibling_file());
        current = &mut node.next_sibling_file;
    }
    Ok(())
}

fn patch_u64<S: Write + Seek>(stream: &mut S, field_offset: u64, value: u64) -> Result<()> {
    let pos = stream.stream_position()?;
    stream.seek(SeekFrom::Start(field_offset))?;
    stream.write_u64::<LittleEndian>(value)?;
    stream.seek(SeekFrom::Start(pos))?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum NodeRef {
    Folder(u64, u64),
    File(u64, u64),
}

#[derive(Default)]
pub struct LookupMap {
    pub folders: HashMap<u64, u64>,
    pub files: HashMap<u64, u64>,
}

impl LookupMap {
    pub fn rebuild(&mut self, root: &Folder) {
        self.folders.clear();
        self.files.clear();
        root.walk(&mut |node| match node {
            NodeRef::Folder(id, loc) => {
                self.folders.insert(id, loc);
            }
            NodeRef::File(id, loc) => {
                self.files.insert(id, loc);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disambiguate_name_appends_smallest_unique_suffix() {
        assert_eq!(disambiguate_name("f", &[]), "f");
        assert_eq!(disambiguate_name("f", &["f"]), "f (1)");
        assert_eq!(disambiguate_name("f.txt", &["f.txt", "f (1).txt"]), "f (2).txt");
    }

    #[test]
    fn disambiguate_name_preserves_extension() {
        assert_eq!(disambiguate_name("report.tar.gz", &["report.tar.gz"]), "report.tar (1).gz");
    }

    #[test]
    fn folder_header_field_offsets_match_spec_layout() {
        let mut folder = Folder::new(1, "docs".to_string());
        folder.location = 100;
        assert_eq!(folder.field_offset_parent(), 100 + 1 + 4);
        assert_eq!(folder.field_offset_first_child_folder(), 100 + 1 + 4 + 8);
        assert_eq!(folder.field_offset_next_sibling_folder(), 100 + 1 + 4 + 16);
        assert_eq!(folder.field_offset_first_child_file(), 100 + 1 + 4 + 24);
    }

    #[test]
    fn is_encrypted_and_is_locked_track_the_encrypted_flag_bit() {
        let plain = File::new(1, "a.bin".to_string(), flags::BWT | flags::MTF);
        assert!(!plain.is_encrypted());
        assert!(!plain.is_locked());

        let locked = File::new(2, "b.bin".to_string(), flags::ENCRYPTED);
        assert!(locked.is_encrypted());
        assert!(locked.is_locked());
    }

    #[test]
    fn recursive_string_lists_folders_before_files_and_nests_children() {
        let mut root = Folder::new(1, "root".to_string());
        let mut sub = Box::new(Folder::new(2, "sub".to_string()));
        sub.first_child_file = Some(Box::new(File::new(3, "nested.bin".to_string(), 0)));
        root.first_child_folder = Some(sub);
        root.first_child_file = Some(Box::new(File::new(4, "top.bin".to_string(), 0)));

        let dump = root.recursive_string();
        let root_line = dump.find("root/").unwrap();
        let sub_line = dump.find("sub/").unwrap();
        let nested_line = dump.find("nested.bin").unwrap();
        let top_line = dump.find("top.bin").unwrap();
        assert!(root_line < sub_line);
        assert!(sub_line < nested_line);
        assert!(nested_line < top_line);
    }

    #[test]
    fn file_header_field_offsets_match_spec_layout() {
        let mut file = File::new(1, "a.bin".to_string(), 0);
        file.location = 200;
        assert_eq!(file.field_offset_parent(), 200 + 1 + 5);
        assert_eq!(file.field_offset_next_sibling_file(), 200 + 1 + 5 + 8);
        assert_eq!(file.field_offset_flags(), 200 + 1 + 5 + 16);
        assert_eq!(file.field_offset_data_offset(), 200 + 1 + 5 + 18);
        assert_eq!(file.field_offset_compressed_size(), 200 + 1 + 5 + 26);
    }
}
