//! virtio-mmio block driver, for both the control registers and the virtqueue
//! descriptor/avail/used rings. Tested against qemu's `virtio-blk-device` only.
//! <https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.pdf>

use core::mem::size_of;
use core::ptr;

use crate::buf::BSIZE;
use crate::memlayout::VIRTIO0;
use crate::proc::{self, Channel};
use crate::spinlock::SpinLock;

const VIRTIO_MMIO_MAGIC_VALUE: u32 = 0x000;
const VIRTIO_MMIO_VERSION: u32 = 0x004;
const VIRTIO_MMIO_DEVICE_ID: u32 = 0x008;
const VIRTIO_MMIO_VENDOR_ID: u32 = 0x00c;
const VIRTIO_MMIO_DEVICE_FEATURES: u32 = 0x010;
const VIRTIO_MMIO_DRIVER_FEATURES: u32 = 0x020;
const VIRTIO_MMIO_QUEUE_SEL: u32 = 0x030;
const VIRTIO_MMIO_QUEUE_NUM_MAX: u32 = 0x034;
const VIRTIO_MMIO_QUEUE_NUM: u32 = 0x038;
const VIRTIO_MMIO_QUEUE_READY: u32 = 0x044;
const VIRTIO_MMIO_QUEUE_NOTIFY: u32 = 0x050;
const VIRTIO_MMIO_INTERRUPT_STATUS: u32 = 0x060;
const VIRTIO_MMIO_INTERRUPT_ACK: u32 = 0x064;
const VIRTIO_MMIO_STATUS: u32 = 0x070;
const VIRTIO_MMIO_QUEUE_DESC_LOW: u32 = 0x080;
const VIRTIO_MMIO_QUEUE_DESC_HIGH: u32 = 0x084;
const VIRTIO_MMIO_DRIVER_DESC_LOW: u32 = 0x090;
const VIRTIO_MMIO_DRIVER_DESC_HIGH: u32 = 0x094;
const VIRTIO_MMIO_DEVICE_DESC_LOW: u32 = 0x0a0;
const VIRTIO_MMIO_DEVICE_DESC_HIGH: u32 = 0x0a4;

const VIRTIO_CONFIG_S_ACKNOWLEDGE: u32 = 1;
const VIRTIO_CONFIG_S_DRIVER: u32 = 2;
const VIRTIO_CONFIG_S_DRIVER_OK: u32 = 4;
const VIRTIO_CONFIG_S_FEATURES_OK: u32 = 8;

const VIRTIO_BLK_F_RO: u32 = 5;
const VIRTIO_BLK_F_SCSI: u32 = 7;
const VIRTIO_BLK_F_CONFIG_WCE: u32 = 11;
const VIRTIO_BLK_F_MQ: u32 = 12;
const VIRTIO_F_ANY_LAYOUT: u32 = 27;
const VIRTIO_RING_F_INDIRECT_DESC: u32 = 28;
const VIRTIO_RING_F_EVENT_IDX: u32 = 29;

const VRING_DESC_F_NEXT: u16 = 1;
const VRING_DESC_F_WRITE: u16 = 2;

const NUM: usize = 8;

const VIRTIO_BLK_T_IN: u32 = 0;
const VIRTIO_BLK_T_OUT: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[repr(C)]
#[derive(Debug, Clone)]
struct VirtqAvail {
    flags: u16,
    idx: u16,
    ring: [u16; NUM],
    unused: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct VirtqUsedElem {
    id: u32,
    len: u32,
}

#[repr(C)]
#[derive(Debug, Clone)]
struct VirtqUsed {
    flags: u16,
    idx: u16,
    ring: [VirtqUsedElem; NUM],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct BlockReq {
    r#type: u32,
    reserved: u32,
    sector: u64,
}

#[derive(Debug, Clone, Copy)]
struct Info {
    buf_id: usize,
    status: u8,
}

struct Disk {
    desc: [VirtqDesc; NUM],
    avail: VirtqAvail,
    used: VirtqUsed,
    free: [bool; NUM],
    used_idx: u16,
    info: [Info; NUM],
    ops: [BlockReq; NUM],
}

impl Disk {
    const fn new() -> Self {
        Self {
            desc: [VirtqDesc { addr: 0, len: 0, flags: 0, next: 0 }; NUM],
            avail: VirtqAvail { flags: 0, idx: 0, ring: [0; NUM], unused: 0 },
            used: VirtqUsed { flags: 0, idx: 0, ring: [VirtqUsedElem { id: 0, len: 0 }; NUM] },
            free: [true; NUM],
            used_idx: 0,
            info: [Info { buf_id: usize::MAX, status: 0 }; NUM],
            ops: [BlockReq { r#type: 0, reserved: 0, sector: 0 }; NUM],
        }
    }

    fn read(&self, reg: u32) -> u32 {
        unsafe { ptr::read_volatile((VIRTIO0 + reg as usize) as *const u32) }
    }

    fn write(&self, reg: u32, value: u32) {
        unsafe { ptr::write_volatile((VIRTIO0 + reg as usize) as *mut u32, value) }
    }

    fn alloc_desc(&mut self) -> Option<usize> {
        let i = self.free.iter().position(|f| *f)?;
        self.free[i] = false;
        Some(i)
    }

    fn free_desc(&mut self, i: usize) {
        self.desc[i] = VirtqDesc { addr: 0, len: 0, flags: 0, next: 0 };
        self.free[i] = true;
        proc::wakeup(Channel::Buffer(DESC_FREE_CHAN));
    }

    fn free_chain(&mut self, i: usize) {
        let mut i = i;
        loop {
            let flags = self.desc[i].flags;
            let next = self.desc[i].next;
            self.free_desc(i);
            if flags & VRING_DESC_F_NEXT == 0 {
                break;
            }
            i = next as usize;
        }
    }

    fn alloc3_desc(&mut self) -> Option<[usize; 3]> {
        let mut out = [0usize; 3];
        for (n, slot) in out.iter_mut().enumerate() {
            match self.alloc_desc() {
                Some(id) => *slot = id,
                None => {
                    for &id in &out[..n] {
                        self.free_desc(id);
                    }
                    return None;
                }
            }
        }
        Some(out)
    }
}

unsafe impl Send for Disk {}

static VIRTIO_DISK: SpinLock<Disk> = SpinLock::new(Disk::new(), "virtio_disk");

const DESC_FREE_CHAN: usize = 0xD15C_0000;

/// Reads (`write = false`) or writes (`write = true`) the buffer cache slot `buf_id`'s
/// block through a three-descriptor virtio chain (request header, data, status byte),
/// blocking the caller until the device's completion interrupt wakes it.
pub fn rw(buf_id: usize, write: bool) {
    let block_no = {
        // the buffer cache records which block a slot holds; `bread`/`bwrite` already
        // pinned it, so this is stable for the duration of this call.
        crate::buf::current_block_no(buf_id)
    };
    let sector = block_no as u64 * (BSIZE as u64 / 512);

    let mut disk = VIRTIO_DISK.lock();

    let ids = loop {
        if let Some(ids) = disk.alloc3_desc() {
            break ids;
        }
        disk = proc::sleep(Channel::Buffer(DESC_FREE_CHAN), disk);
    };

    disk.ops[ids[0]] = BlockReq {
        r#type: if write { VIRTIO_BLK_T_OUT } else { VIRTIO_BLK_T_IN },
        reserved: 0,
        sector,
    };

    disk.desc[ids[0]].addr = &disk.ops[ids[0]] as *const _ as u64;
    disk.desc[ids[0]].len = size_of::<BlockReq>() as u32;
    disk.desc[ids[0]].flags = VRING_DESC_F_NEXT;
    disk.desc[ids[0]].next = ids[1] as u16;

    let data = unsafe { crate::buf::raw_data(buf_id) };
    disk.desc[ids[1]].addr = data.as_ptr() as u64;
    disk.desc[ids[1]].len = BSIZE as u32;
    disk.desc[ids[1]].flags = (if write { 0 } else { VRING_DESC_F_WRITE }) | VRING_DESC_F_NEXT;
    disk.desc[ids[1]].next = ids[2] as u16;

    disk.info[ids[0]].status = 0xff;
    disk.desc[ids[2]].addr = &disk.info[ids[0]].status as *const _ as u64;
    disk.desc[ids[2]].len = 1;
    disk.desc[ids[2]].flags = VRING_DESC_F_WRITE;
    disk.desc[ids[2]].next = 0;

    disk.info[ids[0]].buf_id = buf_id;
    crate::buf::mark_disk_owned(buf_id, true);

    let avail_index = disk.avail.idx as usize % NUM;
    disk.avail.ring[avail_index] = ids[0] as u16;
    disk.avail.idx += 1;

    disk.write(VIRTIO_MMIO_QUEUE_NOTIFY, 0);

    while crate::buf::is_disk_owned(buf_id) {
        disk = proc::sleep(crate::buf::wait_chan(buf_id), disk);
    }

    disk.info[ids[0]].buf_id = usize::MAX;
    disk.free_chain(ids[0]);
}

pub fn handle_interrupt() {
    let mut disk = VIRTIO_DISK.lock();

    let intr_status = disk.read(VIRTIO_MMIO_INTERRUPT_STATUS);
    disk.write(VIRTIO_MMIO_INTERRUPT_ACK, intr_status & 3);

    while disk.used_idx != disk.used.idx {
        let id = disk.used.ring[disk.used_idx as usize % NUM].id;
        let buf_id = disk.info[id as usize].buf_id;

        crate::buf::mark_disk_owned(buf_id, false);
        proc::wakeup(crate::buf::wait_chan(buf_id));

        disk.used_idx += 1;
    }
}

/// # Safety
/// Must be called exactly once during kernel bring-up, before any buffer cache access.
pub unsafe fn init() {
    let disk = VIRTIO_DISK.lock();
    let mut status = 0;

    assert!(
        disk.read(VIRTIO_MMIO_MAGIC_VALUE) == 0x7472_6976
            && disk.read(VIRTIO_MMIO_VERSION) == 2
            && disk.read(VIRTIO_MMIO_DEVICE_ID) == 2
            && disk.read(VIRTIO_MMIO_VENDOR_ID) == 0x554d_4551,
        "could not find virtio disk"
    );

    disk.write(VIRTIO_MMIO_STATUS, status);

    status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
    disk.write(VIRTIO_MMIO_STATUS, status);

    status |= VIRTIO_CONFIG_S_DRIVER;
    disk.write(VIRTIO_MMIO_STATUS, status);

    let mut features = disk.read(VIRTIO_MMIO_DEVICE_FEATURES);
    features &= !(1 << VIRTIO_BLK_F_RO);
    features &= !(1 << VIRTIO_BLK_F_SCSI);
    features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
    features &= !(1 << VIRTIO_BLK_F_MQ);
    features &= !(1 << VIRTIO_F_ANY_LAYOUT);
    features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
    features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
    disk.write(VIRTIO_MMIO_DRIVER_FEATURES, features);

    status |= VIRTIO_CONFIG_S_FEATURES_OK;
    disk.write(VIRTIO_MMIO_STATUS, status);

    status = disk.read(VIRTIO_MMIO_STATUS);
    assert_ne!(status & VIRTIO_CONFIG_S_FEATURES_OK, 0, "virtio disk feature negotiation failed");

    disk.write(VIRTIO_MMIO_QUEUE_SEL, 0);
    assert_eq!(disk.read(VIRTIO_MMIO_QUEUE_READY), 0, "virtio disk queue 0 in use");

    let max = disk.read(VIRTIO_MMIO_QUEUE_NUM_MAX);
    assert_ne!(max, 0, "virtio disk has no queue 0");
    assert!(max as usize >= NUM, "virtio disk max queue too short");

    disk.write(VIRTIO_MMIO_QUEUE_NUM, NUM as u32);

    let desc_addr = &disk.desc as *const _ as usize;
    disk.write(VIRTIO_MMIO_QUEUE_DESC_LOW, desc_addr as u32);
    disk.write(VIRTIO_MMIO_QUEUE_DESC_HIGH, (desc_addr >> 32) as u32);

    let avail_addr = &disk.avail as *const _ as usize;
    disk.write(VIRTIO_MMIO_DRIVER_DESC_LOW, avail_addr as u32);
    disk.write(VIRTIO_MMIO_DRIVER_DESC_HIGH, (avail_addr >> 32) as u32);

    let used_addr = &disk.used as *const _ as usize;
    disk.write(VIRTIO_MMIO_DEVICE_DESC_LOW, used_addr as u32);
    disk.write(VIRTIO_MMIO_DEVICE_DESC_HIGH, (used_addr >> 32) as u32);

    disk.write(VIRTIO_MMIO_QUEUE_READY, 1);

    status |= VIRTIO_CONFIG_S_DRIVER_OK;
    disk.write(VIRTIO_MMIO_STATUS, status);
}
