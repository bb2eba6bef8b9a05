//! Write-ahead redo log: batches the disk writes of concurrent filesystem syscalls into
//! transactions, so a crash mid-syscall never leaves the on-disk filesystem half
//! updated. On-disk layout: a header block (block count + block numbers) followed by
//! that many logged data blocks, all within a fixed region of the disk.
//!
//! A system call brackets its writes with `Operation::begin()` / drop. `begin` merely
//! counts the call in unless the log looks close to full, in which case it sleeps until
//! the last outstanding operation commits.

use core::mem::size_of;

use crate::buf::{self, BSIZE};
use crate::param::LOGBLOCKS;
use crate::proc::{self, Channel};
use crate::spinlock::SpinLock;

#[repr(C)]
struct LogHeader {
    n: u32,
    block: [u32; LOGBLOCKS],
}

struct LogState {
    start: u32,
    size: u32,
    outstanding: u32,
    committing: bool,
    dev: u32,
    header: LogHeader,
}

static LOG: SpinLock<LogState> = SpinLock::new(
    LogState { start: 0, size: 0, outstanding: 0, committing: false, dev: 0, header: LogHeader { n: 0, block: [0; LOGBLOCKS] } },
    "log",
);

fn install_trans(recovering: bool) {
    let (dev, start, n) = {
        let log = LOG.lock();
        (log.dev, log.start, log.header.n)
    };

    for tail in 0..n {
        let lbuf = buf::bread(dev, start + tail + 1);
        let block_no = LOG.lock().header.block[tail as usize];
        let dbuf = buf::bread(dev, block_no);

        let payload = buf::with_data(&lbuf, |b| *b);
        buf::with_data(&dbuf, |b| *b = payload);
        buf::bwrite(&dbuf);

        let _ = recovering;
        buf::brelse(lbuf);
        buf::brelse(dbuf);
    }
}

fn read_head() {
    let dev = LOG.lock().dev;
    let start = LOG.lock().start;
    let hbuf = buf::bread(dev, start);

    buf::with_data(&hbuf, |raw| {
        let header = unsafe { &*(raw.as_ptr() as *const LogHeader) };
        let mut log = LOG.lock();
        log.header.n = header.n;
        for i in 0..header.n as usize {
            log.header.block[i] = header.block[i];
        }
    });

    buf::brelse(hbuf);
}

fn write_head() {
    let (dev, start) = {
        let log = LOG.lock();
        (log.dev, log.start)
    };
    let hbuf = buf::bread(dev, start);

    buf::with_data(&hbuf, |raw| {
        let header = unsafe { &mut *(raw.as_mut_ptr() as *mut LogHeader) };
        let log = LOG.lock();
        header.n = log.header.n;
        for i in 0..header.n as usize {
            header.block[i] = log.header.block[i];
        }
    });

    buf::bwrite(&hbuf);
    buf::brelse(hbuf);
}

fn write_log() {
    let (dev, start, n) = {
        let log = LOG.lock();
        (log.dev, log.start, log.header.n)
    };

    for tail in 0..n {
        let block_no = LOG.lock().header.block[tail as usize];
        let to = buf::bread(dev, start + tail + 1);
        let from = buf::bread(dev, block_no);

        let payload = buf::with_data(&from, |b| *b);
        buf::with_data(&to, |b| *b = payload);
        buf::bwrite(&to);

        buf::brelse(to);
        buf::brelse(from);
    }
}

fn commit() {
    let n = LOG.lock().header.n;
    if n == 0 {
        return;
    }

    write_log();
    write_head();
    install_trans(false);
    LOG.lock().header.n = 0;
    write_head();
}

/// An in-progress filesystem transaction. `begin()` brackets the start; dropping it
/// brackets the end and, if it was the last outstanding one, commits.
pub struct Operation;

impl Operation {
    /// Must be called at the start of every filesystem syscall that writes to disk.
    pub fn begin() -> Self {
        let mut log = LOG.lock();
        loop {
            if log.committing {
                log = proc::sleep(Channel::Log, log);
            } else if log.header.n as usize + (log.outstanding as usize + 1) * crate::param::MAXOPBLOCKS
                > LOGBLOCKS
            {
                log = proc::sleep(Channel::Log, log);
            } else {
                log.outstanding += 1;
                break;
            }
        }
        Operation
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        let mut do_commit = false;
        {
            let mut log = LOG.lock();
            log.outstanding -= 1;
            assert!(!log.committing, "end_op: already committing");
            if log.outstanding == 0 {
                do_commit = true;
                log.committing = true;
            } else {
                proc::wakeup(Channel::Log);
            }
        }

        if do_commit {
            commit();
            let mut log = LOG.lock();
            log.committing = false;
            proc::wakeup(Channel::Log);
        }
    }
}

/// Records that `b` was modified as part of the current operation, deferring the
/// actual disk write to the next commit. Replaces a direct `buf::bwrite` for any block
/// touched inside an `Operation`.
pub fn write(b: &buf::Buf) {
    let mut log = LOG.lock();
    assert!(log.outstanding >= 1, "log::write: outside of transaction");
    assert!((log.header.n as usize) < LOGBLOCKS && log.header.n < log.size.max(1) - 1, "log::write: transaction too big");

    let mut i = 0;
    while i < log.header.n as usize {
        if log.header.block[i] == b.block_no {
            break;
        }
        i += 1;
    }
    log.header.block[i] = b.block_no;
    if i == log.header.n as usize {
        log.header.n += 1;
    }
}

/// Must run exactly once, at filesystem bring-up, after `fs::init` has read the
/// superblock and learned the log region's location and size.
pub fn init(dev: u32, start: u32, size: u32) {
    assert!(size_of::<LogHeader>() < BSIZE, "log header too big for a block");
    assert!(size as usize <= LOGBLOCKS + 1, "log::init: log region larger than LOGBLOCKS");

    {
        let mut log = LOG.lock();
        log.dev = dev;
        log.start = start;
        log.size = size;
    }

    read_head();
    install_trans(true);
    LOG.lock().header.n = 0;
    write_head();
}
