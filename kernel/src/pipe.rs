//! Anonymous in-memory pipes: a fixed-size ring buffer shared between a read end and
//! a write end, each held alive by one slot in the open-file table.

use alloc::sync::Arc;

use crate::error::KernelError;
use crate::file::File;
use crate::proc::{self, Channel, current_proc_and_data_mut};
use crate::spinlock::SpinLock;
use crate::vm::VA;

const PIPESIZE: usize = 512;

struct PipeInner {
    data: [u8; PIPESIZE],
    num_read: usize,
    num_write: usize,
    read_open: bool,
    write_open: bool,
}

pub struct Pipe {
    inner: SpinLock<PipeInner>,
}

impl Pipe {
    /// Allocates a pipe and a pair of file descriptors, read end first.
    pub fn alloc() -> Result<(usize, usize), KernelError> {
        let read_fd = File::alloc()?;
        let write_fd = match File::alloc() {
            Ok(fd) => fd,
            Err(e) => {
                File::close(read_fd);
                return Err(e);
            }
        };

        let pipe = Arc::new(Pipe {
            inner: SpinLock::new(
                PipeInner {
                    data: [0; PIPESIZE],
                    num_read: 0,
                    num_write: 0,
                    read_open: true,
                    write_open: true,
                },
                "pipe",
            ),
        });

        File::set_pipe_read(read_fd, pipe.clone());
        File::set_pipe_write(write_fd, pipe);

        Ok((read_fd, write_fd))
    }

    /// The `Arc`'s address, stable and unique for the pipe's lifetime: its identity as
    /// a sleep channel.
    fn id(&self) -> usize {
        self as *const Pipe as usize
    }

    /// Closes this pipe's read or write end, waking anyone blocked on the other.
    pub fn close(&self, writable: bool) {
        let mut inner = self.inner.lock();
        if writable {
            inner.write_open = false;
            proc::wakeup(Channel::PipeRead(self.id()));
        } else {
            inner.read_open = false;
            proc::wakeup(Channel::PipeWrite(self.id()));
        }
    }

    pub fn write(&self, addr: VA, n: usize) -> Result<usize, KernelError> {
        let idx = proc::current_proc();
        let mut inner = self.inner.lock();

        let mut i = 0;
        while i < n {
            if !inner.read_open || proc::is_killed(idx) {
                return Err(KernelError::Io);
            }

            if inner.num_write == inner.num_read + PIPESIZE {
                proc::wakeup(Channel::PipeRead(self.id()));
                inner = proc::sleep(Channel::PipeWrite(self.id()), inner);
                continue;
            }

            let (_idx, data) = current_proc_and_data_mut();
            let mut byte = [0u8; 1];
            let Some(pagetable) = data.pagetable.as_mut() else { break };
            if pagetable.copy_from_user(addr + i, &mut byte).is_err() {
                break;
            }

            let slot = inner.num_write % PIPESIZE;
            inner.data[slot] = byte[0];
            inner.num_write += 1;
            i += 1;
        }

        proc::wakeup(Channel::PipeRead(self.id()));
        Ok(i)
    }

    pub fn read(&self, addr: VA, n: usize) -> Result<usize, KernelError> {
        let idx = proc::current_proc();
        let mut inner = self.inner.lock();

        while inner.num_read == inner.num_write && inner.write_open {
            if proc::is_killed(idx) {
                return Err(KernelError::Io);
            }
            inner = proc::sleep(Channel::PipeRead(self.id()), inner);
        }

        let mut i = 0;
        while i < n && inner.num_read != inner.num_write {
            let byte = inner.data[inner.num_read % PIPESIZE];

            let (_idx, data) = current_proc_and_data_mut();
            let Some(pagetable) = data.pagetable.as_mut() else { break };
            if pagetable.copy_to_user(addr + i, &[byte]).is_err() {
                break;
            }

            inner.num_read += 1;
            i += 1;
        }

        proc::wakeup(Channel::PipeWrite(self.id()));
        Ok(i)
    }
}
