// The gateway thread. Exactly one request is in flight at a time; callers
// queue on the channel and block on their ack. Device failures are fatal to
// the filesystem, so everything in here panics rather than reporting.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use log::debug;

use crate::device::device_structs::{DeviceHandle, DiskMedia, DiskRequest};
use crate::layout::{BLOCK_SIZE, Block};

impl DeviceHandle {
    /// Spin up the gateway over a medium and hand back the request side.
    pub fn start(media: DiskMedia) -> DeviceHandle {
        let (tx, rx) = mpsc::channel::<DiskRequest>();
        let spawned = thread::Builder::new()
            .name("disk-gateway".to_owned())
            .spawn(move || gateway(media, rx));
        let _joiner = spawned.expect("could not spawn the disk gateway thread");
        debug!("Disk gateway started.");
        DeviceHandle { tx }
    }

    /// Read one block, blocking until the device has filled the buffer.
    pub fn read(&self, blkno: u64) -> Box<Block> {
        let (ack, done) = mpsc::sync_channel(1);
        let req = DiskRequest {
            blkno,
            data: Box::new([0; BLOCK_SIZE]),
            write: false,
            ack,
        };
        self.tx.send(req).expect("disk gateway is gone");
        done.recv().expect("disk gateway is gone")
    }

    /// Write one block, blocking until the device has taken it.
    pub fn write(&self, blkno: u64, data: &Block) {
        let (ack, done) = mpsc::sync_channel(1);
        let req = DiskRequest {
            blkno,
            data: Box::new(*data),
            write: true,
            ack,
        };
        self.tx.send(req).expect("disk gateway is gone");
        let _returned = done.recv().expect("disk gateway is gone");
    }
}

// The gateway itself. Runs until every handle is dropped.
fn gateway(mut media: DiskMedia, rx: Receiver<DiskRequest>) {
    while let Ok(mut req) = rx.recv() {
        if req.write {
            media_write(&mut media, req.blkno, &req.data);
        } else {
            media_read(&mut media, req.blkno, &mut req.data);
        }
        // A dropped requester just means nobody wants the result anymore.
        let _ = req.ack.send(req.data);
    }
    debug!("Disk gateway shutting down.");
}

fn media_read(media: &mut DiskMedia, blkno: u64, data: &mut Block) {
    match media {
        DiskMedia::Memory(pages) => *data = pages.read_page(blkno),
        DiskMedia::Image(file) => {
            seek_to(file, blkno);
            file.read_exact(data)
                .expect("short read from the disk image");
        }
    }
}

fn media_write(media: &mut DiskMedia, blkno: u64, data: &Block) {
    match media {
        DiskMedia::Memory(pages) => pages.write_page(blkno, data),
        DiskMedia::Image(file) => {
            seek_to(file, blkno);
            file.write_all(data).expect("short write to the disk image");
        }
    }
}

fn seek_to(file: &mut std::fs::File, blkno: u64) {
    let at = blkno * BLOCK_SIZE as u64;
    let landed = file
        .seek(SeekFrom::Start(at))
        .expect("could not seek the disk image");
    assert!(landed == at, "seek landed somewhere else entirely");
}
