use std::fs;
use tempfile::tempdir;
use tk2k::archive::Archive;
use tk2k::tree::flags;

#[test]
fn save_then_load_round_trips_a_single_file() {
    let dir = tempdir().unwrap();
    let src_path = dir.path().join("hello.txt");
    fs::write(&src_path, b"Hello, tk2k format!").unwrap();

    let archive_path = dir.path().join("a.tk2k");
    let mut archive = Archive::open_empty("a.tk2k");
    archive.add_file(1, &src_path, 0).unwrap();
    archive.save(&archive_path).unwrap();

    let mut reloaded = Archive::load(&archive_path).unwrap();
    assert_eq!(reloaded.root.name, "a.tk2k");
    assert_eq!(reloaded.lookup_file_ids().len(), 1);

    let out_dir = dir.path().join("out");
    reloaded.unpack_all(&out_dir).unwrap();
    let unpacked = fs::read(out_dir.join("a").join("hello.txt")).unwrap();
    assert_eq!(unpacked, b"Hello, tk2k format!");
}

#[test]
fn full_pipeline_with_checksum_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let src_path = dir.path().join("data.bin");
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&src_path, &payload).unwrap();

    let pipeline_flags = flags::BWT | flags::MTF | flags::RLE | flags::AC_ORDER0 | flags::SHA256;

    let archive_path = dir.path().join("data.tk2k");
    let mut archive = Archive::open_empty("data.tk2k");
    archive.add_file(1, &src_path, pipeline_flags).unwrap();
    archive.save(&archive_path).unwrap();

    let mut reloaded = Archive::load(&archive_path).unwrap();
    let out_dir = dir.path().join("out");
    reloaded.unpack_all(&out_dir).unwrap();
    let unpacked = fs::read(out_dir.join("data").join("data.bin")).unwrap();
    assert_eq!(unpacked, payload);
}

#[test]
fn folders_and_nested_files_survive_a_save_load_cycle() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, b"file a").unwrap();
    fs::write(&b, b"file b").unwrap();

    let archive_path = dir.path().join("tree.tk2k");
    let mut archive = Archive::open_empty("tree.tk2k");
    let sub_id = archive.add_folder(1, "sub").unwrap();
    archive.add_file(1, &a, 0).unwrap();
    archive.add_file(sub_id, &b, 0).unwrap();
    archive.save(&archive_path).unwrap();

    let mut reloaded = Archive::load(&archive_path).unwrap();
    assert_eq!(reloaded.lookup_folder_ids().len(), 2); // root + sub
    assert_eq!(reloaded.lookup_file_ids().len(), 2);

    let out_dir = dir.path().join("out");
    reloaded.unpack_all(&out_dir).unwrap();
    assert_eq!(fs::read(out_dir.join("tree").join("a.txt")).unwrap(), b"file a");
    assert_eq!(fs::read(out_dir.join("tree").join("sub").join("b.txt")).unwrap(), b"file b");
}

#[test]
fn removing_a_file_shrinks_the_archive_and_keeps_the_rest() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("keep.txt");
    let b = dir.path().join("drop.txt");
    fs::write(&a, b"keep me").unwrap();
    fs::write(&b, vec![9u8; 50_000]).unwrap();

    let archive_path = dir.path().join("r.tk2k");
    let mut archive = Archive::open_empty("r.tk2k");
    archive.add_file(1, &a, 0).unwrap();
    let drop_id = archive.add_file(1, &b, 0).unwrap();
    archive.save(&archive_path).unwrap();
    let size_before = fs::metadata(&archive_path).unwrap().len();

    archive.remove_nodes(&[drop_id]).unwrap();
    let size_after = fs::metadata(&archive_path).unwrap().len();
    assert!(size_after < size_before);

    let out_dir = dir.path().join("out");
    archive.unpack_all(&out_dir).unwrap();
    assert_eq!(fs::read(out_dir.join("r").join("keep.txt")).unwrap(), b"keep me");
    assert!(!out_dir.join("r").join("drop.txt").exists());
}

#[test]
fn duplicate_names_in_the_same_folder_get_disambiguated_on_disk() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("note.txt");
    fs::write(&src, b"v1").unwrap();

    let archive_path = dir.path().join("dup.tk2k");
    let mut archive = Archive::open_empty("dup.tk2k");
    archive.add_file(1, &src, 0).unwrap();
    fs::write(&src, b"v2, longer content than before").unwrap();
    archive.add_file(1, &src, 0).unwrap();
    archive.save(&archive_path).unwrap();

    let mut reloaded = Archive::load(&archive_path).unwrap();
    let out_dir = dir.path().join("out");
    reloaded.unpack_all(&out_dir).unwrap();
    assert_eq!(fs::read(out_dir.join("dup").join("note.txt")).unwrap(), b"v1");
    assert_eq!(fs::read(out_dir.join("dup").join("note (1).txt")).unwrap(), b"v2, longer content than before");
}

#[test]
fn adding_a_file_through_the_add_workflow_does_not_destroy_earlier_ones() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("grown.tk2k");
    let original = dir.path().join("original.txt");
    let added = dir.path().join("added.txt");
    fs::write(&original, b"content present before the add").unwrap();
    fs::write(&added, b"content added in a later session").unwrap();

    let mut archive = Archive::open_empty("grown.tk2k");
    archive.add_file(1, &original, 0).unwrap();
    archive.save(&archive_path).unwrap();

    // Mirrors the `tk2k add` CLI subcommand: load the existing archive,
    // stage one more file, save back over the same path.
    let mut reloaded = Archive::load(&archive_path).unwrap();
    reloaded.add_file(1, &added, 0).unwrap();
    reloaded.save(&archive_path).unwrap();

    let mut final_load = Archive::load(&archive_path).unwrap();
    let out_dir = dir.path().join("out");
    final_load.unpack_all(&out_dir).unwrap();
    assert_eq!(fs::read(out_dir.join("grown").join("original.txt")).unwrap(), b"content present before the add");
    assert_eq!(fs::read(out_dir.join("grown").join("added.txt")).unwrap(), b"content added in a later session");
}

#[test]
fn empty_file_round_trips_as_a_single_empty_block() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("empty.bin");
    fs::write(&src, b"").unwrap();

    let archive_path = dir.path().join("empty.tk2k");
    let mut archive = Archive::open_empty("empty.tk2k");
    archive.add_file(1, &src, flags::BWT | flags::MTF | flags::RLE).unwrap();
    archive.save(&archive_path).unwrap();

    let mut reloaded = Archive::load(&archive_path).unwrap();
    let out_dir = dir.path().join("out");
    reloaded.unpack_all(&out_dir).unwrap();
    assert_eq!(fs::read(out_dir.join("empty").join("empty.bin")).unwrap(), b"");
}
