//! Buffer cache: caches disk blocks in memory, giving `fs.rs`/`log.rs` a synchronization
//! point for blocks shared across processes and cutting down on disk I/O.
//!
//! Mirrors `file.rs`'s split: small fixed metadata behind a spinlock (`meta`), the
//! block payload itself behind a per-slot sleeplock, so waiting for disk I/O blocks the
//! caller instead of spinning and only one process at a time touches a given buffer.

use crate::param::NBUF;
use crate::proc::{self, Channel};
use crate::sleeplock::SleepLock;
use crate::spinlock::SpinLock;

pub const BSIZE: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct BufMeta {
    valid: bool,
    /// set while a disk request owns this buffer; cleared by `virtio_disk::handle_interrupt`.
    disk: bool,
    dev: u32,
    block_no: u32,
    ref_count: usize,
    /// monotonic recency stamp; eviction picks the lowest with `ref_count == 0`.
    recency: u64,
}

impl BufMeta {
    const fn new() -> Self {
        Self { valid: false, disk: false, dev: 0, block_no: 0, ref_count: 0, recency: 0 }
    }
}

struct BCache {
    meta: [BufMeta; NBUF],
    clock: u64,
}

static META: SpinLock<BCache> =
    SpinLock::new(BCache { meta: [const { BufMeta::new() }; NBUF], clock: 0 }, "bcache");

static DATA: [SleepLock<[u8; BSIZE]>; NBUF] = [const { SleepLock::new([0; BSIZE], "buf") }; NBUF];

/// Sleep-channel identity for "a buffer slot became free" / "this buffer's I/O finished".
fn chan(id: usize) -> Channel {
    Channel::Buffer(0xB00_0000 + id)
}

/// An owned handle to a cached block; holds its slot's ref count up until `brelse`.
pub struct Buf {
    pub id: usize,
    pub block_no: u32,
}

/// Finds (or evicts into) a cached slot for `(dev, block_no)`, bumping its ref count,
/// and loads it from disk if not already valid. Blocks if every slot is pinned.
pub fn bread(dev: u32, block_no: u32) -> Buf {
    let id = loop {
        let mut cache = META.lock();

        if let Some(id) = cache.meta.iter().position(|m| m.dev == dev && m.block_no == block_no) {
            cache.meta[id].ref_count += 1;
            cache.clock += 1;
            cache.meta[id].recency = cache.clock;
            break id;
        }

        if let Some(id) = cache
            .meta
            .iter()
            .enumerate()
            .filter(|(_, m)| m.ref_count == 0)
            .min_by_key(|(_, m)| m.recency)
            .map(|(i, _)| i)
        {
            cache.clock += 1;
            cache.meta[id] = BufMeta { dev, block_no, ref_count: 1, recency: cache.clock, ..BufMeta::new() };
            break id;
        }

        panic!("bread: no free buffers");
    };

    if !META.lock().meta[id].valid {
        crate::virtio_disk::rw(id, false);
        META.lock().meta[id].valid = true;
    }

    Buf { id, block_no }
}

/// Runs `f` against the block's payload, holding its sleeplock for the duration.
pub fn with_data<R>(buf: &Buf, f: impl FnOnce(&mut [u8; BSIZE]) -> R) -> R {
    let mut guard = DATA[buf.id].lock();
    f(&mut guard)
}

/// # Safety
/// Only `virtio_disk::rw` may use this, while it owns exclusive DMA access to the slot.
pub(crate) unsafe fn raw_data(id: usize) -> &'static mut [u8; BSIZE] {
    unsafe { DATA[id].get_mut_unchecked() }
}

/// Writes the buffer back to disk. Caller must already hold it (i.e. have it from `bread`).
pub fn bwrite(buf: &Buf) {
    crate::virtio_disk::rw(buf.id, true);
}

/// Releases a buffer obtained from `bread`, waking anyone waiting for a free slot.
pub fn brelse(buf: Buf) {
    META.lock().meta[buf.id].ref_count -= 1;
    proc::wakeup(chan(buf.id));
}

pub(crate) fn current_block_no(id: usize) -> u32 {
    META.lock().meta[id].block_no
}

pub(crate) fn mark_disk_owned(id: usize, owned: bool) {
    META.lock().meta[id].disk = owned;
}

pub(crate) fn is_disk_owned(id: usize) -> bool {
    META.lock().meta[id].disk
}

pub(crate) fn wait_chan(id: usize) -> Channel {
    chan(id)
}
