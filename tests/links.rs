// Hard links and the life cycle of an inode's reference counts.

use std::thread;
use std::time::Duration;

// We want to see logs while testing.
use test_log::test;

use wafer_fs::error_types::fs::FsError;
use wafer_fs::fs::OpenFlags;
use wafer_fs::layout::inode_block::InodeKind;


#[test]
// The full link-count story: 1 after create, 2 after link, 1 after the
// first unlink, and a dead on-disk slot after the second.
fn link_count_life_cycle() {
    let (fs, root, disk) = test_common::fresh_fs();

    // a second file keeps the inode block from being freed wholesale when
    // /f dies, so the slot itself stays inspectable
    let f = fs
        .open("/f", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /f");
    let keep = fs
        .open("/keep", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /keep");
    fs.close(keep);

    let ino = fs.fstat(&f).ino;
    fs.close(f);

    assert_eq!(fs.stat("/f", &root).expect("stat /f").nlink, 1, "fresh file");

    fs.link("/f", "/g", &root).expect("link /f /g");
    assert_eq!(fs.stat("/f", &root).expect("stat /f").nlink, 2, "after link");
    assert_eq!(
        fs.stat("/g", &root).expect("stat /g").ino,
        ino,
        "both names share the inode"
    );

    fs.unlink("/f", &root).expect("unlink /f");
    assert_eq!(
        fs.stat("/g", &root).expect("stat /g").nlink,
        1,
        "one name left"
    );
    assert_eq!(
        fs.stat("/f", &root).expect_err("first name is gone"),
        FsError::NotFound,
        "stat /f is ENOENT"
    );

    fs.unlink("/g", &root).expect("unlink /g");
    assert_eq!(
        fs.stat("/g", &root).expect_err("second name is gone"),
        FsError::NotFound,
        "stat /g is ENOENT"
    );

    // and on disk, the slot is marked invalid
    fs.sync();
    assert_eq!(
        test_common::raw_inode_kind(&disk, ino),
        InodeKind::Invalid,
        "the inode slot is free for reuse"
    );
}

#[test]
// Content is shared between the names, because the inode is.
fn links_share_content() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let f = fs
        .open("/orig", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /orig");
    let _ = fs.write_at(&f, 0, b"written via orig");
    fs.close(f);

    fs.link("/orig", "/alias", &root).expect("link");
    let alias = fs
        .open("/alias", OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("open /alias");
    assert_eq!(
        fs.read_at(&alias, 0, 16),
        b"written via orig".to_vec(),
        "the alias reads the first name's bytes"
    );
    let _ = fs.write_at(&alias, 0, b"WRITTEN");
    fs.close(alias);

    let orig = fs
        .open("/orig", OpenFlags::empty(), 0, &root, 0, 0)
        .expect("reopen /orig");
    assert_eq!(
        fs.read_at(&orig, 0, 7),
        b"WRITTEN".to_vec(),
        "and writes through the alias show up"
    );
    fs.close(orig);
}

#[test]
fn link_errors() {
    let (fs, root, _disk) = test_common::fresh_fs();
    fs.mkdir("/dir", 0, &root).expect("mkdir /dir");
    let f = fs
        .open("/file", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /file");
    fs.close(f);

    assert_eq!(
        fs.link("/dir", "/dir2", &root)
            .expect_err("hard links on directories are forbidden"),
        FsError::NotPermitted,
        "the error is EPERM"
    );
    assert_eq!(
        fs.link("/missing", "/x", &root).expect_err("missing source"),
        FsError::NotFound,
        "the error is ENOENT"
    );
    assert_eq!(
        fs.link("/file", "/dir", &root)
            .expect_err("target name already exists"),
        FsError::AlreadyExists,
        "the error is EEXIST"
    );
    // the failed link must not leak a reference
    assert_eq!(
        fs.stat("/file", &root).expect("stat /file").nlink,
        1,
        "link count rolled back after the failure"
    );
}

#[test]
// Scenario: thread A holds /f open while thread B unlinks it. The name
// disappears, A keeps reading, and the inode is only freed once A closes.
fn concurrent_unlink_vs_open() {
    let (fs, root, disk) = test_common::fresh_fs();

    let f = fs
        .open("/f", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /f");
    let _ = fs.write_at(&f, 0, b"survives unlink");
    let ino = fs.fstat(&f).ino;
    let iblock = wafer_fs::layout::inode_block::Inum(ino).block();

    let fs_b = fs.clone();
    let root_b = root.clone();
    let unlinker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        fs_b.unlink("/f", &root_b).expect("unlink while open");
    });
    unlinker.join().expect("unlinker must not panic");

    // the name is gone...
    assert_eq!(
        fs.stat("/f", &root).expect_err("name is gone"),
        FsError::NotFound,
        "stat is ENOENT"
    );
    // ...but the open descriptor still works
    assert_eq!(
        fs.read_at(&f, 0, 15),
        b"survives unlink".to_vec(),
        "reads keep working through the handle"
    );

    // the inode lives until the last descriptor closes
    fs.close(f);
    fs.sync();
    assert!(
        test_common::raw_block_is_free(&disk, iblock),
        "the inode block went back to the bitmap"
    );
}

#[test]
// memref duplicates a descriptor: both must be closed before the inode of
// an unlinked file can die.
fn memref_duplicates_handle() {
    let (fs, root, disk) = test_common::fresh_fs();
    let f = fs
        .open("/dup", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /dup");
    let _ = fs.write_at(&f, 0, b"shared");
    let twin = fs.memref(&f);
    let iblock = wafer_fs::layout::inode_block::Inum(fs.fstat(&f).ino).block();

    fs.unlink("/dup", &root).expect("unlink /dup");
    fs.close(f);
    fs.sync();
    assert!(
        !test_common::raw_block_is_free(&disk, iblock),
        "the twin still pins the inode"
    );

    assert_eq!(fs.read_at(&twin, 0, 6), b"shared".to_vec(), "twin reads");
    fs.close(twin);
    fs.sync();
    assert!(
        test_common::raw_block_is_free(&disk, iblock),
        "last close frees the inode block"
    );
}
