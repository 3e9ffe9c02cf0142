// Journal behavior: durability at commit, and crash recovery.

// We want to see logs while testing.
use test_log::test;

use wafer_fs::fs::OpenFlags;
use wafer_fs::layout::{BLOCK_SIZE, Block};


#[test]
// After sync, the data is on the raw pages, not just in the cache.
fn committed_writes_are_on_the_medium() {
    let (fs, root, disk) = test_common::fresh_fs();
    let f = fs
        .open("/durable", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /durable");
    let _ = fs.write_at(&f, 0, b"must hit the disk");
    fs.close(f);
    fs.sync();

    let ino = test_common::raw_root_entry(&disk, "durable").expect("entry on disk");
    let data_block = test_common::raw_first_data_block(&disk, ino);
    let page = disk.read_page(data_block);
    assert_eq!(
        &page[..17],
        b"must hit the disk",
        "the bytes are in the data block itself"
    );
    assert_eq!(
        test_common::raw_recover_num(&disk),
        0,
        "a finished commit leaves no recovery flag"
    );
}

#[test]
// Everything survives a remount of the same pages.
fn remount_sees_everything() {
    let (fs, root, disk) = test_common::fresh_fs();
    fs.mkdir("/a", 0, &root).expect("mkdir /a");
    let f = fs
        .open("/a/f", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /a/f");
    let _ = fs.write_at(&f, 0, b"persistent");
    fs.close(f);
    fs.sync();

    let (fs2, root2) = test_common::remount(&disk);
    let f2 = fs2
        .open("/a/f", OpenFlags::empty(), 0, &root2, 0, 0)
        .expect("open after remount");
    assert_eq!(
        fs2.read_at(&f2, 0, 10),
        b"persistent".to_vec(),
        "contents intact across the remount"
    );
    fs2.close(f2);
}

#[test]
// Scenario: crash after the commit point but before any in-place
// writeback. Recovery at mount installs the logged blocks, and the result
// is exactly a completed commit.
fn recovery_installs_a_committed_epoch() {
    let (fs, root, disk) = test_common::fresh_fs();
    let f = fs
        .open("/victim", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /victim");
    let _ = fs.write_at(&f, 0, &[b'A'; BLOCK_SIZE]);
    fs.close(f);
    fs.sync();

    let ino = test_common::raw_root_entry(&disk, "victim").expect("entry on disk");
    let data_block = test_common::raw_first_data_block(&disk, ino);

    // fabricate the crash state: new contents fully in the log, the
    // header's recover_num set, the home location still holding the old
    // bytes
    let replacement: Block = [b'B'; BLOCK_SIZE];
    test_common::fake_committed_log(&disk, &[(data_block, replacement)]);
    assert_eq!(disk.read_page(data_block)[0], b'A', "home still old");

    // "reboot"
    let (fs2, root2) = test_common::remount(&disk);
    assert_eq!(
        disk.read_page(data_block)[0],
        b'B',
        "recovery installed the logged block"
    );
    assert_eq!(
        test_common::raw_recover_num(&disk),
        0,
        "recovery cleared the flag"
    );
    let f2 = fs2
        .open("/victim", OpenFlags::empty(), 0, &root2, 0, 0)
        .expect("open after recovery");
    assert_eq!(
        fs2.read_at(&f2, 0, BLOCK_SIZE),
        vec![b'B'; BLOCK_SIZE],
        "the filesystem sees the committed write"
    );
    fs2.close(f2);
}

#[test]
// Recovery is idempotent: interrupting it and running it again lands in
// the same state.
fn recovery_runs_twice_the_same() {
    let (fs, root, disk) = test_common::fresh_fs();
    let f = fs
        .open("/twice", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /twice");
    let _ = fs.write_at(&f, 0, &[b'X'; BLOCK_SIZE]);
    fs.close(f);
    fs.sync();

    let ino = test_common::raw_root_entry(&disk, "twice").expect("entry on disk");
    let data_block = test_common::raw_first_data_block(&disk, ino);
    let replacement: Block = [b'Y'; BLOCK_SIZE];

    // first crash + recovery
    test_common::fake_committed_log(&disk, &[(data_block, replacement)]);
    let _mounted = test_common::remount(&disk);
    assert_eq!(disk.read_page(data_block)[0], b'Y', "first recovery ran");

    // a recovery that was itself interrupted before clearing the header
    // replays identically: same log, same destinations, same result
    test_common::fake_committed_log(&disk, &[(data_block, replacement)]);
    let _mounted = test_common::remount(&disk);
    assert_eq!(disk.read_page(data_block)[0], b'Y', "second recovery agrees");
    assert_eq!(test_common::raw_recover_num(&disk), 0, "flag clear again");
}

#[test]
// A multi-block epoch recovers wholesale.
fn recovery_installs_several_blocks() {
    let (fs, root, disk) = test_common::fresh_fs();
    let f = fs
        .open("/multi", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /multi");
    let _ = fs.write_at(&f, 0, &vec![b'0'; 3 * BLOCK_SIZE]);
    fs.close(f);
    fs.sync();

    let ino = test_common::raw_root_entry(&disk, "multi").expect("entry on disk");

    // stage replacements for all three of the file's blocks
    let mut entries = Vec::new();
    for (i, fill) in [(0usize, b'1'), (1, b'2'), (2, b'3')] {
        let blkno = test_common::raw_data_block_at(&disk, ino, i);
        assert_ne!(blkno, 0, "the file has its three blocks");
        entries.push((blkno, [fill; BLOCK_SIZE]));
    }
    test_common::fake_committed_log(&disk, &entries);

    let (fs2, root2) = test_common::remount(&disk);
    let f2 = fs2
        .open("/multi", OpenFlags::empty(), 0, &root2, 0, 0)
        .expect("open after recovery");
    let mut expected = Vec::new();
    expected.extend_from_slice(&[b'1'; BLOCK_SIZE]);
    expected.extend_from_slice(&[b'2'; BLOCK_SIZE]);
    expected.extend_from_slice(&[b'3'; BLOCK_SIZE]);
    assert_eq!(
        fs2.read_at(&f2, 0, 3 * BLOCK_SIZE),
        expected,
        "all three blocks recovered"
    );
    fs2.close(f2);
}
