// Concurrency: many threads hammering one filesystem. These tests care
// about outcomes (nothing lost, nothing doubled, no deadlock), not about
// any particular interleaving.

use std::thread;

// We want to see logs while testing.
use test_log::test;

use wafer_fs::fs::OpenFlags;


#[test]
// Every thread creates its own files in the same directory; all of them
// must exist afterwards.
fn concurrent_creates_in_one_directory() {
    let (fs, root, _disk) = test_common::fresh_fs();
    fs.mkdir("/shared", 0, &root).expect("mkdir /shared");

    let mut workers = Vec::new();
    for t in 0..4 {
        let fs = fs.clone();
        let root = root.clone();
        workers.push(thread::spawn(move || {
            for i in 0..8 {
                let name = format!("/shared/t{t}-f{i}");
                let f = fs
                    .open(&name, OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
                    .expect("concurrent create");
                let _ = fs.write_at(&f, 0, name.as_bytes());
                fs.close(f);
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker must not panic");
    }

    for t in 0..4 {
        for i in 0..8 {
            let name = format!("/shared/t{t}-f{i}");
            let f = fs
                .open(&name, OpenFlags::empty(), 0, &root, 0, 0)
                .expect("every file made it");
            assert_eq!(
                fs.read_at(&f, 0, name.len()),
                name.as_bytes().to_vec(),
                "with its own contents"
            );
            fs.close(f);
        }
    }
}

#[test]
// Writers on distinct files don't interfere.
fn concurrent_writers_distinct_files() {
    let (fs, root, _disk) = test_common::fresh_fs();

    let mut workers = Vec::new();
    for t in 0..4u8 {
        let fs = fs.clone();
        let root = root.clone();
        workers.push(thread::spawn(move || {
            let name = format!("/w{t}");
            let f = fs
                .open(&name, OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
                .expect("create per-thread file");
            let payload = vec![t; 6000];
            let wrote = fs.write_at(&f, 0, &payload);
            assert_eq!(wrote, 6000, "whole payload lands");
            fs.close(f);
        }));
    }
    for worker in workers {
        worker.join().expect("worker must not panic");
    }

    for t in 0..4u8 {
        let name = format!("/w{t}");
        let f = fs
            .open(&name, OpenFlags::empty(), 0, &root, 0, 0)
            .expect("reopen per-thread file");
        assert_eq!(
            fs.read_at(&f, 0, 6000),
            vec![t; 6000],
            "no cross-talk between files"
        );
        fs.close(f);
    }
}

#[test]
// Two appenders on one file: the final size is the sum, every byte
// belongs to one appender or the other.
fn concurrent_appends_one_file() {
    let (fs, root, _disk) = test_common::fresh_fs();
    let f = fs
        .open("/applog", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /applog");

    let mut workers = Vec::new();
    for t in 0..2u8 {
        let fs = fs.clone();
        let handle = fs.memref(&f);
        workers.push(thread::spawn(move || {
            for _ in 0..50 {
                let wrote = fs.append(&handle, &[t + 1; 10]);
                assert_eq!(wrote, 10, "appends land whole");
            }
            fs.close(handle);
        }));
    }
    for worker in workers {
        worker.join().expect("worker must not panic");
    }

    let st = fs.fstat(&f);
    assert_eq!(st.size, 1000, "sizes add up, nothing overwrote anything");

    let bytes = fs.read_at(&f, 0, 1000);
    let ones = bytes.iter().filter(|b| **b == 1).count();
    let twos = bytes.iter().filter(|b| **b == 2).count();
    assert_eq!((ones, twos), (500, 500), "both writers' bytes all present");
    fs.close(f);
}

#[test]
// rename ping-pong against concurrent lookups: the name is always one of
// the two, and the transaction machinery never wedges.
fn rename_versus_lookup() {
    let (fs, root, _disk) = test_common::fresh_fs();
    fs.mkdir("/d", 0, &root).expect("mkdir /d");
    let f = fs
        .open("/d/x", OpenFlags::CREAT | OpenFlags::RDWR, 0, &root, 0, 0)
        .expect("create /d/x");
    fs.close(f);

    let renamer = {
        let fs = fs.clone();
        let root = root.clone();
        thread::spawn(move || {
            for i in 0..40 {
                let (from, to) = if i % 2 == 0 {
                    ("/d/x", "/d/y")
                } else {
                    ("/d/y", "/d/x")
                };
                fs.rename(from, to, &root).expect("ping-pong rename");
            }
        })
    };

    let looker = {
        let fs = fs.clone();
        let root = root.clone();
        thread::spawn(move || {
            let mut hits = 0u32;
            for _ in 0..200 {
                if fs.stat("/d/x", &root).is_ok() || fs.stat("/d/y", &root).is_ok() {
                    hits += 1;
                }
            }
            hits
        })
    };

    renamer.join().expect("renamer must not panic");
    let hits = looker.join().expect("looker must not panic");
    assert!(hits > 0, "lookups kept working throughout");

    // after an even number of swaps the file is back at /d/x
    let _ = fs.stat("/d/x", &root).expect("the file ends where it started");
}

#[test]
// Concurrent unlinks and creates of the same name: exactly one of each
// pair of racing creates wins, and the survivors are consistent.
fn create_unlink_churn() {
    let (fs, root, _disk) = test_common::fresh_fs();

    let mut workers = Vec::new();
    for _ in 0..2 {
        let fs = fs.clone();
        let root = root.clone();
        workers.push(thread::spawn(move || {
            for i in 0..30 {
                let name = format!("/churn{}", i % 3);
                match fs.open(
                    &name,
                    OpenFlags::CREAT | OpenFlags::RDWR,
                    0,
                    &root,
                    0,
                    0,
                ) {
                    Ok(f) => {
                        fs.close(f);
                        // racing threads may have deleted it already; both
                        // outcomes are legal
                        let _ = fs.unlink(&name, &root);
                    }
                    Err(err) => panic!("create without O_EXCL cannot fail: {err}"),
                }
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker must not panic");
    }

    // whatever remains must be coherent
    for i in 0..3 {
        let name = format!("/churn{i}");
        if let Ok(st) = fs.stat(&name, &root) {
            assert_eq!(st.nlink, 1, "a surviving file has exactly one link");
        }
    }
}
