// A little tour of the filesystem on an in-memory disk: format, mount,
// make a directory, write a file, read it back, and dump the superblock.

use wafer_fs::device::device_structs::{DeviceHandle, DiskMedia, MemDisk};
use wafer_fs::fs::{Fs, MkfsOptions, OpenFlags, mkfs};
use wafer_fs::hex_view;

fn main() {
    env_logger::init();

    // a 2MB disk made of pages
    let disk = MemDisk::new(4096);
    let dev = DeviceHandle::start(DiskMedia::Memory(disk.clone()));
    mkfs(
        &dev,
        &MkfsOptions {
            nblocks: 4096,
            log_len: 63,
        },
    );

    let (fs, root) = Fs::mount(DiskMedia::Memory(disk.clone()));

    fs.mkdir("/demo", 0o755, &root).expect("mkdir /demo");
    let file = fs
        .open(
            "/demo/hello.txt",
            OpenFlags::CREAT | OpenFlags::RDWR,
            0o644,
            &root,
            0,
            0,
        )
        .expect("create /demo/hello.txt");

    let wrote = fs.append(&file, b"Hello from a tiny journaled filesystem!\n");
    println!("wrote {wrote} bytes");

    let back = fs.read_at(&file, 0, 128);
    print!("read back: {}", String::from_utf8_lossy(&back));

    let st = fs.stat("/demo/hello.txt", &root).expect("stat");
    println!("ino {} size {} nlink {}", st.ino, st.size, st.nlink);

    fs.close(file);
    fs.sync();

    // what the superblock actually looks like on disk
    println!("{}", hex_view(&disk.read_page(1)[..64]));
}
