// File creation, reading and writing.

use rand::{Rng, rngs::ThreadRng};
// We want to see logs while testing.
use test_log::test;

use wafer_fs::error_types::fs::FsError;
use wafer_fs::fs::OpenFlags;


#[test]
// Make a small file (512 bytes), read it back, contents must match.
fn make_and_read_file_small() {
    let (fs, root, _disk) = test_common::fresh_fs();

    let mut random: ThreadRng = rand::rng();
    let mut bytes = [0u8; 512];
    random.fill(&mut bytes[..]);

    let file = fs
        .open("/test", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /test should work");
    let wrote = fs.write_at(&file, 0, &bytes);
    assert_eq!(wrote, 512, "the whole buffer should land");

    let back = fs.read_at(&file, 0, 512);
    assert_eq!(back, bytes.to_vec(), "read must return what write stored");

    let st = fs.fstat(&file);
    assert_eq!(st.size, 512, "size tracks the write");
    fs.close(file);
}

#[test]
// Make a file big enough to walk the indirect chain (128 KB needs 256
// blocks: 10 direct, the rest through several chained indirect blocks).
fn make_and_read_file_large() {
    let (fs, root, _disk) = test_common::fresh_fs();

    let mut random: ThreadRng = rand::rng();
    let mut bytes = vec![0u8; 128 * 1024];
    random.fill(&mut bytes[..]);

    let file = fs
        .open("/big", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /big should work");
    let wrote = fs.write_at(&file, 0, &bytes);
    assert_eq!(wrote, bytes.len(), "the whole buffer should land");

    let back = fs.read_at(&file, 0, bytes.len());
    assert_eq!(back, bytes, "read must return what write stored");

    // and a fresh descriptor sees the same thing
    let again = fs
        .open("/big", OpenFlags::empty(), 0, &root, 0, 0)
        .expect("reopening /big should work");
    let back = fs.read_at(&again, 100_000, 1000);
    assert_eq!(back, bytes[100_000..101_000].to_vec(), "offset reads match");

    fs.close(file);
    fs.close(again);
}

#[test]
// Successive appends produce a file whose size is the sum of the appends.
fn append_monotonicity() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let file = fs
        .open("/log", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /log should work");

    let mut expected = Vec::new();
    for i in 0..20u8 {
        let chunk = vec![i; 100];
        let wrote = fs.append(&file, &chunk);
        assert_eq!(wrote, 100, "append lands whole");
        expected.extend_from_slice(&chunk);
        assert_eq!(fs.fstat(&file).size, expected.len() as u64, "size is the sum");
    }

    let back = fs.read_at(&file, 0, expected.len());
    assert_eq!(back, expected, "appends concatenate in order");
    fs.close(file);
}

#[test]
// Writing past the end of the file zero-fills the hole, both in the
// direct slots and out in the indirect chain.
fn holes_read_as_zeros() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let file = fs
        .open("/holey", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /holey should work");

    // a direct-slot hole
    let _ = fs.write_at(&file, 3000, b"direct");
    assert_eq!(fs.fstat(&file).size, 3006, "size reaches past the hole");
    let hole = fs.read_at(&file, 0, 3000);
    assert_eq!(hole, vec![0u8; 3000], "the hole is all zeros");

    // an indirect hole: far past the 10 direct blocks
    let far = 40_000u64;
    let _ = fs.write_at(&file, far, b"indirect");
    let hole = fs.read_at(&file, 3006, (far - 3006) as usize);
    assert_eq!(hole, vec![0u8; (far - 3006) as usize], "still all zeros");
    let tail = fs.read_at(&file, far, 8);
    assert_eq!(tail, b"indirect".to_vec(), "the far write landed");

    fs.close(file);
}

#[test]
// Reads past the end of the file return nothing, not an error.
fn read_past_eof_is_empty() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let file = fs
        .open("/short", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /short should work");
    let _ = fs.write_at(&file, 0, b"abc");

    assert_eq!(fs.read_at(&file, 3, 10), Vec::<u8>::new(), "at EOF");
    assert_eq!(fs.read_at(&file, 100, 10), Vec::<u8>::new(), "past EOF");
    assert_eq!(fs.read_at(&file, 0, 10), b"abc".to_vec(), "short read at 0");
    fs.close(file);
}

#[test]
// Scatter-gather: several source ranges in one write, several destination
// ranges in one read.
fn scatter_gather_round_trip() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let file = fs
        .open("/sg", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /sg should work");

    let wrote = fs.write(&file, &[b"one", b"twotwo", b"three"], 0, false);
    assert_eq!(wrote, 14, "all three ranges land");

    let mut a = [0u8; 3];
    let mut b = [0u8; 6];
    let mut c = [0u8; 5];
    let got = fs.read(&file, &mut [&mut a, &mut b, &mut c], 0);
    assert_eq!(got, 14, "all three ranges fill");
    assert_eq!(&a, b"one", "first range");
    assert_eq!(&b, b"twotwo", "second range");
    assert_eq!(&c, b"three", "third range");
    fs.close(file);
}

#[test]
// Overwriting the middle of a file leaves the rest alone.
fn overwrite_in_place() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let file = fs
        .open("/over", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /over should work");
    let _ = fs.write_at(&file, 0, b"aaaaaaaaaa");
    let _ = fs.write_at(&file, 4, b"BB");

    assert_eq!(fs.read_at(&file, 0, 10), b"aaaaBBaaaa".to_vec(), "spliced");
    assert_eq!(fs.fstat(&file).size, 10, "size unchanged by an overwrite");
    fs.close(file);
}

#[test]
// O_EXCL means exclusive.
fn exclusive_create_fails_on_existing() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let file = fs
        .open("/once", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /once should work");
    fs.close(file);

    let again = fs.open(
        "/once",
        OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR,
        0,
        &root,
        0,
        0,
    );
    assert_eq!(
        again.expect_err("O_EXCL on an existing file must fail"),
        FsError::AlreadyExists,
        "the error is EEXIST"
    );

    // without O_EXCL, the same open just opens the existing file
    let third = fs
        .open("/once", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("re-create without O_EXCL opens the file");
    fs.close(third);
}

#[test]
// O_TRUNC drops the old contents and the old blocks.
fn truncate_on_open() {
    let (fs, root, disk) = test_common::fresh_fs();
    let file = fs
        .open("/t", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /t should work");
    let _ = fs.write_at(&file, 0, &[7u8; 2048]);
    fs.close(file);
    fs.sync();

    let ino = fs.stat("/t", &root).expect("stat /t").ino;
    let old_block = test_common::raw_first_data_block(&disk, ino);
    assert_ne!(old_block, 0, "the file had a data block");

    let file = fs
        .open("/t", OpenFlags::RDWR | OpenFlags::TRUNC, 0, &root, 0, 0)
        .expect("reopening with O_TRUNC should work");
    assert_eq!(fs.fstat(&file).size, 0, "truncate zeroed the size");
    assert_eq!(fs.read_at(&file, 0, 16), Vec::<u8>::new(), "nothing to read");

    fs.sync();
    assert!(
        test_common::raw_block_is_free(&disk, old_block),
        "truncate freed the old data block"
    );

    // writing after the truncate starts from scratch
    let _ = fs.write_at(&file, 0, b"fresh");
    assert_eq!(fs.read_at(&file, 0, 5), b"fresh".to_vec(), "new contents");
    fs.close(file);
}

#[test]
// Directories cannot be opened for writing, and O_DIRECTORY rejects files.
fn directory_open_flags() {
    let (fs, root, _disk) = test_common::fresh_fs();
    fs.mkdir("/d", 0, &root).expect("mkdir /d should work");

    let writable = fs.open("/d", OpenFlags::RDWR, 0, &root, 0, 0);
    assert_eq!(
        writable.expect_err("writable open of a directory must fail"),
        FsError::IsADirectory,
        "the error is EISDIR"
    );

    let file = fs
        .open("/f", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("creating /f should work");
    fs.close(file);
    let as_dir = fs.open("/f", OpenFlags::DIRECTORY, 0, &root, 0, 0);
    assert_eq!(
        as_dir.expect_err("O_DIRECTORY on a file must fail"),
        FsError::NotADirectory,
        "the error is ENOTDIR"
    );

    // and a read-only open of a directory is fine
    let dir = fs
        .open("/d", OpenFlags::DIRECTORY, 0, &root, 0, 0)
        .expect("read-only open of a directory works");
    fs.close(dir);
}

#[test]
// Device nodes carry their numbers through create, stat and reopen.
fn device_nodes() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let dev = fs
        .open("/null", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 1, 3)
        .expect("creating a device node should work");
    assert!(dev.is_dev(), "the handle knows it is a device");
    assert_eq!((dev.major, dev.minor), (1, 3), "numbers preserved");
    fs.close(dev);

    let st = fs.stat("/null", &root).expect("stat /null");
    assert_eq!(st.rdev, (1u64 << 32) | 3, "rdev packs major/minor");

    // re-creating a device node that exists fails even without O_EXCL
    let again = fs.open("/null", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 1, 3);
    assert_eq!(
        again.expect_err("device re-create must fail"),
        FsError::AlreadyExists,
        "the error is EEXIST"
    );

    // but a plain open picks the numbers back up
    let reopened = fs
        .open("/null", OpenFlags::empty(), 0, &root, 0, 0)
        .expect("plain open of the device works");
    assert_eq!((reopened.major, reopened.minor), (1, 3), "numbers inherited");
    fs.close(reopened);
}
