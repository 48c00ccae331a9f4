//! Archive facade — open/close/save/load/add/remove/unpack orchestration,
//! and the `lookup_id → node` map external collaborators address nodes
//! through (§4.2).

use std::collections::{HashMap, HashSet};
use std::fs::{self, File as StdFile};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::block::{self, Progress};
use crate::error::{ArchiveError, Result};
use crate::tree::{self, File, Folder, LookupMap};

/// Root folders live at offset 1; offset 0 is the reserved `0x00` byte.
pub const ROOT_OFFSET: u64 = 1;

pub struct Archive {
    pub root: Box<Folder>,
    path: Option<PathBuf>,
    backing: Option<StdFile>,
    next_lookup_id: u64,
    lookup: LookupMap,
    sources: HashMap<u64, Vec<u8>>,
    pub progress: Arc<Progress>,
    aborting: Arc<AtomicBool>,
}

impl Archive {
    /// `open-empty(name)`: a root folder at offset 1 named `name`, with no
    /// backing stream yet.
    pub fn open_empty(name: &str) -> Self {
        let root = Box::new(Folder::new(1, name.to_string()));
        Self {
            root,
            path: None,
            backing: None,
            next_lookup_id: 2,
            lookup: LookupMap::default(),
            sources: HashMap::new(),
            progress: Arc::new(Progress::default()),
            aborting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A shared cancellation flag; an external collaborator sets it to
    /// cancel the operation currently in flight.
    pub fn aborting_flag(&self) -> Arc<AtomicBool> {
        self.aborting.clone()
    }

    /// `(partial, total)` block counters for the operation currently in
    /// flight, readable by a UI at any time (§6).
    pub fn progress(&self) -> (u32, u32) {
        (self.progress.partial.load(Ordering::SeqCst), self.progress.total.load(Ordering::SeqCst))
    }

    fn cancel_fn(flag: &Arc<AtomicBool>) -> impl Fn() -> bool {
        let flag = flag.clone();
        move || flag.load(Ordering::SeqCst)
    }

    /// `save(path)`: materializes every staged change.
    ///
    /// - If this archive has never been saved before (fresh from
    ///   `open_empty`), every node in the tree is new, so the whole tree is
    ///   written top-down into a freshly created `path`.
    /// - If `path` is the archive's own backing file, only the nodes not yet
    ///   marked `already_saved` (anything inserted by `add_folder`/
    ///   `add_file` since the last save) are appended; every already-saved
    ///   node's bytes are left untouched. This is what makes `load` →
    ///   `add_file` → `save` safe to call on an archive that already holds
    ///   other files.
    /// - If `path` names a different file, the whole surviving tree is
    ///   repacked into it, streaming existing payloads byte-for-byte and
    ///   encoding any staged-but-unsaved files fresh.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let cancel = Self::cancel_fn(&self.aborting);

        if self.backing.is_none() {
            let mut file = StdFile::options().read(true).write(true).create(true).truncate(true).open(path)?;
            file.write_all(&[0u8])?;
            self.root.write(&mut file, None, &self.sources, &cancel, &self.progress)?;
            if self.aborting.load(Ordering::SeqCst) {
                return Err(ArchiveError::Cancelled);
            }
            self.lookup.rebuild(&self.root);
            self.sources.clear();
            self.path = Some(path.to_path_buf());
            self.backing = Some(file);
            return Ok(());
        }

        if self.path.as_deref() == Some(path) {
            let mut file = self.backing.take().ok_or_else(|| ArchiveError::Format("archive is not open".into()))?;
            let result = self.root.write_new(&mut file, &self.sources, &cancel, &self.progress);
            self.backing = Some(file);
            result?;
            if self.aborting.load(Ordering::SeqCst) {
                return Err(ArchiveError::Cancelled);
            }
            self.lookup.rebuild(&self.root);
            self.sources.clear();
            return Ok(());
        }

        let mut src = self.backing.take().ok_or_else(|| ArchiveError::Format("archive is not open".into()))?;
        let mut dst = StdFile::options().read(true).write(true).create(true).truncate(true).open(path)?;
        dst.write_all(&[0u8])?;
        let result = self.root.copy_to(&mut src, &mut dst, None, &self.sources, &cancel, &self.progress);
        result?;
        if self.aborting.load(Ordering::SeqCst) {
            self.backing = Some(src);
            return Err(ArchiveError::Cancelled);
        }
        self.lookup.rebuild(&self.root);
        self.sources.clear();
        self.path = Some(path.to_path_buf());
        self.backing = Some(dst);
        Ok(())
    }

    /// `load(path)`: opens the file read-write, parses the root at offset
    /// 1, walks the tree to assign `lookup_id`s, then rebinds the root's
    /// name to the archive's current filename.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = StdFile::options().read(true).write(true).open(path)?;

        let mut reserved = [0u8; 1];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut reserved)?;
        if reserved[0] != 0x00 {
            return Err(ArchiveError::Format("byte 0 of the archive is not the reserved 0x00".into()));
        }

        let mut next_id = 1u64;
        let mut root = Folder::parse(&mut file, ROOT_OFFSET, &mut next_id)?;
        root.name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ArchiveError::Format("archive path has no file name".into()))?;

        let mut lookup = LookupMap::default();
        lookup.rebuild(&root);

        Ok(Self {
            root,
            path: Some(path.to_path_buf()),
            backing: Some(file),
            next_lookup_id: next_id,
            lookup,
            sources: HashMap::new(),
            progress: Arc::new(Progress::default()),
            aborting: Arc::new(AtomicBool::new(false)),
        })
    }

    /// `close()`: drops the backing stream; the tree remains queryable.
    pub fn close(&mut self) {
        self.backing = None;
    }

    pub fn lookup_folder_ids(&self) -> Vec<u64> {
        self.lookup.folders.keys().copied().collect()
    }

    pub fn lookup_file_ids(&self) -> Vec<u64> {
        self.lookup.files.keys().copied().collect()
    }

    // ── Mutation ─────────────────────────────────────────────────────────

    pub fn add_folder(&mut self, parent_id: u64, name: &str) -> Result<u64> {
        let parent = find_folder_mut(&mut self.root, parent_id)
            .ok_or_else(|| ArchiveError::Format(format!("no folder with lookup_id {parent_id}")))?;

        let id = self.next_lookup_id;
        self.next_lookup_id += 1;
        let new_folder = Box::new(Folder::new(id, name.to_string()));
        insert_folder_at_tail(parent, new_folder);
        Ok(id)
    }

    /// `add_file(parent_id, path, flags)`: applies the duplicate-name
    /// policy, records `original_size`, and stages the file's bytes for
    /// the next `save`.
    pub fn add_file<P: AsRef<Path>>(&mut self, parent_id: u64, path: P, flags: u16) -> Result<u64> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let leaf_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ArchiveError::Format("source path has no file name".into()))?;

        let parent = find_folder_mut(&mut self.root, parent_id)
            .ok_or_else(|| ArchiveError::Format(format!("no folder with lookup_id {parent_id}")))?;

        let existing = sibling_file_names(&parent.first_child_file);
        let name = tree::disambiguate_name(&leaf_name, &existing.iter().map(String::as_str).collect::<Vec<_>>());

        let id = self.next_lookup_id;
        self.next_lookup_id += 1;
        let mut new_file = Box::new(File::new(id, name, flags));
        new_file.original_size = data.len() as u64;
        self.sources.insert(id, data);
        insert_file_at_tail(parent, new_file);
        Ok(id)
    }

    /// `remove_nodes(ids)`: tombstones every node in `ids` and its whole
    /// subtree, then repacks into a fresh file that atomically replaces
    /// the original.
    pub fn remove_nodes(&mut self, ids: &[u64]) -> Result<()> {
        let path = self.path.clone().ok_or_else(|| ArchiveError::Format("archive has no backing path".into()))?;
        let id_set: HashSet<u64> = ids.iter().copied().collect();
        self.root.mark_removed(&id_set);

        let tmp_path = path.with_extension("tk2k.tmp");
        let mut src = self.backing.take().ok_or_else(|| ArchiveError::Format("archive is not open".into()))?;
        let mut dst = StdFile::options().read(true).write(true).create(true).truncate(true).open(&tmp_path)?;
        dst.write_all(&[0u8])?;

        let cancel = Self::cancel_fn(&self.aborting);
        self.root.copy_to(&mut src, &mut dst, None, &self.sources, &cancel, &self.progress)?;
        drop(src);
        drop(dst);

        fs::rename(&tmp_path, &path)?;
        self.backing = Some(StdFile::options().read(true).write(true).open(&path)?);

        for id in &id_set {
            self.lookup.folders.remove(id);
            self.lookup.files.remove(id);
        }
        self.lookup.rebuild(&self.root);
        Ok(())
    }

    /// `unpack_all(out_dir)`: recreates the tree under `out_dir`, using the
    /// archive's filename stem as the root folder's directory name.
    pub fn unpack_all<P: AsRef<Path>>(&mut self, out_dir: P) -> Result<()> {
        let backing = self.backing.as_mut().ok_or_else(|| ArchiveError::Format("archive is not open".into()))?;
        let stem = self
            .path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.name.clone());

        let root_dir = out_dir.as_ref().join(stem);
        fs::create_dir_all(&root_dir)?;

        let cancel = {
            let flag = self.aborting.clone();
            move || flag.load(Ordering::SeqCst)
        };
        unpack_folder(backing, &self.root, &root_dir, &cancel, &self.progress)
    }
}

fn find_folder_mut(folder: &mut Folder, id: u64) -> Option<&mut Folder> {
    if folder.lookup_id == id {
        return Some(folder);
    }
    if let Some(child) = folder.first_child_folder.as_deref_mut() {
        if let Some(found) = find_folder_mut(child, id) {
            return Some(found);
        }
    }
    if let Some(sibling) = folder.next_sibling_folder.as_deref_mut() {
        return find_folder_mut(sibling, id);
    }
    None
}

fn insert_folder_at_tail(parent: &mut Folder, new_folder: Box<Folder>) {
    match parent.first_child_folder.as_mut() {
        None => parent.first_child_folder = Some(new_folder),
        Some(mut current) => {
            while current.next_sibling_folder.is_some() {
                current = current.next_sibling_folder.as_mut().unwrap();
            }
            current.next_sibling_folder = Some(new_folder);
        }
    }
}

fn insert_file_at_tail(parent: &mut Folder, new_file: Box<File>) {
    match parent.first_child_file.as_mut() {
        None => parent.first_child_file = Some(new_file),
        Some(mut current) => {
            while current.next_sibling_file.is_some() {
                current = current.next_sibling_file.as_mut().unwrap();
            }
            current.next_sibling_file = Some(new_file);
        }
    }
}

fn sibling_file_names(head: &Option<Box<File>>) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = head;
    while let Some(node) = current {
        names.push(node.name.clone());
        current = &node.next_sibling_file;
    }
    names
}

fn unpack_folder<S: Read + Seek>(
    stream: &mut S,
    folder: &Folder,
    dir: &Path,
    cancel: &(dyn Fn() -> bool + Sync),
    progress: &Progress,
) -> Result<()> {
    let mut file_cursor = &folder.first_child_file;
    while let Some(file) = file_cursor {
        unpack_file(stream, file, dir, cancel, progress)?;
        file_cursor = &file.next_sibling_file;
    }

    let mut folder_cursor = &folder.first_child_folder;
    while let Some(child) = folder_cursor {
        let child_dir = dir.join(&child.name);
        fs::create_dir_all(&child_dir)?;
        unpack_folder(stream, child, &child_dir, cancel, progress)?;
        folder_cursor = &child.next_sibling_folder;
    }
    Ok(())
}

fn unpack_file<S: Read + Seek>(
    stream: &mut S,
    file: &File,
    dir: &Path,
    cancel: &(dyn Fn() -> bool + Sync),
    progress: &Progress,
) -> Result<()> {
    if file.data_offset == 0 {
        return Err(ArchiveError::Format(format!("file {:?} has no data_offset", file.name)));
    }
    if file.is_encrypted() {
        return Err(ArchiveError::EncryptionRequired);
    }
    let decoded = block::decode_file(
        stream,
        file.data_offset,
        file.compressed_size,
        file.original_size,
        file.flags,
        cancel,
        progress,
    )?;
    let dest_path = dir.join(&file.name);
    std::fs::write(dest_path, decoded)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_empty_then_save_then_load_round_trips_structure() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("a.tk2k");

        let mut archive = Archive::open_empty("a.tk2k");
        let src_path = dir.path().join("hello.txt");
        fs::write(&src_path, b"hello, archive").unwrap();
        archive.add_file(1, &src_path, 0).unwrap();
        archive.save(&archive_path).unwrap();
        archive.close();

        let mut reopened = Archive::load(&archive_path).unwrap();
        assert_eq!(reopened.root.name, "a.tk2k");
        assert_eq!(reopened.root.first_child_file.as_ref().unwrap().name, "hello.txt");

        let out_dir = dir.path().join("out");
        reopened.unpack_all(&out_dir).unwrap();
        let unpacked = fs::read(out_dir.join("a").join("hello.txt")).unwrap();
        assert_eq!(unpacked, b"hello, archive");
    }

    #[test]
    fn progress_reports_completed_blocks_after_a_save() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("p.tk2k");
        let src_path = dir.path().join("data.bin");
        fs::write(&src_path, vec![7u8; 17 * 1024 * 1024]).unwrap();

        let mut archive = Archive::open_empty("p.tk2k");
        archive.add_file(1, &src_path, 0).unwrap();
        archive.save(&archive_path).unwrap();

        let (partial, total) = archive.progress();
        assert_eq!(partial, total);
        assert!(total > 1);
    }

    #[test]
    fn adding_a_file_to_a_loaded_archive_preserves_the_existing_one() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("inplace.tk2k");
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        fs::write(&first, b"first file content").unwrap();
        fs::write(&second, b"second file content").unwrap();

        let mut archive = Archive::open_empty("inplace.tk2k");
        archive.add_file(1, &first, 0).unwrap();
        archive.save(&archive_path).unwrap();

        let mut reloaded = Archive::load(&archive_path).unwrap();
        reloaded.add_file(1, &second, 0).unwrap();
        reloaded.save(&archive_path).unwrap();

        let mut final_load = Archive::load(&archive_path).unwrap();
        let out_dir = dir.path().join("out");
        final_load.unpack_all(&out_dir).unwrap();
        assert_eq!(fs::read(out_dir.join("inplace").join("first.txt")).unwrap(), b"first file content");
        assert_eq!(fs::read(out_dir.join("inplace").join("second.txt")).unwrap(), b"second file content");
    }

    #[test]
    fn unpacking_an_encrypted_file_returns_encryption_required_without_decoding() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("locked.tk2k");
        let src = dir.path().join("secret.bin");
        fs::write(&src, b"top secret payload").unwrap();

        let mut archive = Archive::open_empty("locked.tk2k");
        archive.add_file(1, &src, tree::flags::ENCRYPTED).unwrap();
        archive.save(&archive_path).unwrap();

        let mut reloaded = Archive::load(&archive_path).unwrap();
        let out_dir = dir.path().join("out");
        let err = reloaded.unpack_all(&out_dir).unwrap_err();
        assert!(matches!(err, ArchiveError::EncryptionRequired));
    }

    #[test]
    fn duplicate_file_names_get_disambiguated() {
        let dir = tempdir().unwrap();
        let a_path = dir.path().join("f");
        fs::write(&a_path, b"one").unwrap();

        let mut archive = Archive::open_empty("r.tk2k");
        archive.add_file(1, &a_path, 0).unwrap();
        archive.add_file(1, &a_path, 0).unwrap();

        let names = sibling_file_names(&archive.root.first_child_file);
        assert_eq!(names, vec!["f".to_string(), "f (1)".to_string()]);
    }

    #[test]
    fn remove_nodes_drops_the_subtree_and_reloads_clean() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("r.tk2k");
        let f1 = dir.path().join("f1");
        let f2 = dir.path().join("f2");
        let f3 = dir.path().join("f3.txt");
        fs::write(&f1, b"one").unwrap();
        fs::write(&f2, b"two").unwrap();
        fs::write(&f3, b"three").unwrap();

        let mut archive = Archive::open_empty("r.tk2k");
        let id1 = archive.add_file(1, &f1, 0).unwrap();
        let id2 = archive.add_file(1, &f2, 0).unwrap();
        let id3 = archive.add_file(1, &f3, 0).unwrap();
        archive.save(&archive_path).unwrap();

        archive.remove_nodes(&[id2]).unwrap();
        assert!(!archive.lookup_file_ids().contains(&id2));
        assert!(archive.lookup_file_ids().contains(&id1));
        assert!(archive.lookup_file_ids().contains(&id3));

        let names = sibling_file_names(&archive.root.first_child_file);
        assert_eq!(names, vec!["f1".to_string(), "f3.txt".to_string()]);
    }
}
