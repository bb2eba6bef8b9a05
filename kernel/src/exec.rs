//! Minimal ELF64 loader: builds a fresh address space from an on-disk (or embedded)
//! ELF image and lays out `argv` on the new user stack. Backs `sys_exec` and the very
//! first process's image (see `proc::user_init`, which bypasses this for a flat binary
//! instead of an ELF one).

use core::mem::size_of;

use crate::error::KernelError;
use crate::fs::{Inode, InodeType, Path};
use crate::param::{MAXARG, USERSTACK};
use crate::proc::{self, create_pagetable};
use crate::riscv::{PGSIZE, PTE_R, PTE_W, PTE_X, pg_round_up};
use crate::vm::VA;

const ELF_MAGIC: u32 = 0x464C457F; // "\x7FELF", little-endian

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ElfHeader {
    magic: u32,
    ident: [u8; 12],
    r#type: u16,
    machine: u16,
    version: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

impl ElfHeader {
    const SIZE: usize = size_of::<Self>();

    fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Self) }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
    r#type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    paddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

impl ProgramHeader {
    const SIZE: usize = size_of::<Self>();
    const PT_LOAD: u32 = 1;

    fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Self) }
    }

    fn perms(&self) -> usize {
        let mut perm = PTE_R;
        if self.flags & 0x1 != 0 {
            perm |= PTE_X;
        }
        if self.flags & 0x2 != 0 {
            perm |= PTE_W;
        }
        perm
    }
}

/// Copies `inode`'s bytes starting at `file_off` into user virtual memory at `va`, one
/// page at a time through a kernel-side scratch buffer (the inode layer has no direct
/// disk-to-user-pagetable path).
fn load_segment(
    pagetable: &mut crate::vm::Uvm,
    inode: &Inode,
    va: VA,
    file_off: u32,
    len: usize,
) -> Result<(), KernelError> {
    let mut done = 0;
    let mut scratch = [0u8; PGSIZE];

    while done < len {
        let chunk = (len - done).min(PGSIZE);
        let read = inode.read_kernel(file_off + done as u32, &mut scratch[..chunk])?;
        if read != chunk {
            return Err(KernelError::BadExec);
        }
        pagetable.copy_to_user(va + done, &scratch[..chunk])?;
        done += chunk;
    }

    Ok(())
}

/// Parses and loads `path` as an ELF64 executable, replacing the calling process's
/// address space and laying out `argv` on the new stack. Returns `argc`, which ends up
/// in `a0` as `sys_exec`'s result (argv pointer goes in `a1`, set on the trapframe
/// directly).
pub fn exec(path: &str, argv: &[&str]) -> Result<usize, KernelError> {
    let idx = proc::current_proc();
    let (_idx, caller_data) = proc::current_proc_and_data_mut();
    let inode = Path(path).resolve(caller_data.cwd)?;

    if inode.r#type() != InodeType::File {
        inode.put();
        return Err(KernelError::BadExec);
    }

    let mut header_buf = [0u8; ElfHeader::SIZE];
    if inode.read_kernel(0, &mut header_buf)? != header_buf.len() {
        inode.put();
        return Err(KernelError::BadExec);
    }
    let header = ElfHeader::from_bytes(&header_buf);
    if header.magic != ELF_MAGIC {
        inode.put();
        return Err(KernelError::BadExec);
    }

    let mut pagetable = match create_pagetable(idx) {
        Ok(pt) => pt,
        Err(e) => {
            inode.put();
            return Err(e);
        }
    };

    let mut size = 0usize;
    let mut offset = header.phoff;

    for _ in 0..header.phnum {
        let mut ph_buf = [0u8; ProgramHeader::SIZE];
        if inode.read_kernel(offset as u32, &mut ph_buf)? != ph_buf.len() {
            pagetable.proc_free(size);
            inode.put();
            return Err(KernelError::BadExec);
        }
        let ph = ProgramHeader::from_bytes(&ph_buf);
        offset += ProgramHeader::SIZE as u64;

        if ph.r#type != ProgramHeader::PT_LOAD {
            continue;
        }
        if ph.memsz < ph.filesz || !ph.vaddr.is_multiple_of(PGSIZE as u64) {
            pagetable.proc_free(size);
            inode.put();
            return Err(KernelError::BadExec);
        }

        size = match pagetable.alloc(size, (ph.vaddr + ph.memsz) as usize, ph.perms()) {
            Ok(s) => s,
            Err(_) => {
                pagetable.proc_free(size);
                inode.put();
                return Err(KernelError::Alloc);
            }
        };

        if load_segment(
            &mut pagetable,
            &inode,
            VA(ph.vaddr as usize),
            ph.offset as u32,
            ph.filesz as usize,
        )
        .is_err()
        {
            pagetable.proc_free(size);
            inode.put();
            return Err(KernelError::BadExec);
        }
    }

    inode.put();

    size = pg_round_up(size);
    size = match pagetable.alloc(size, size + (USERSTACK + 1) * PGSIZE, PTE_W | PTE_R) {
        Ok(s) => s,
        Err(_) => {
            pagetable.proc_free(size);
            return Err(KernelError::Alloc);
        }
    };
    // guard page: unmapped, so a stack overflow faults instead of corrupting the heap.
    pagetable.unmap(VA(size - (USERSTACK + 1) * PGSIZE), 1, true);

    let mut sp = size;
    let stackbase = sp - USERSTACK * PGSIZE;

    let mut ustack = [0usize; MAXARG + 1];
    let mut argc = 0;

    for &arg in argv {
        if argc >= MAXARG {
            pagetable.proc_free(size);
            return Err(KernelError::BadExec);
        }

        sp -= arg.len() + 1;
        sp -= sp % 16;
        if sp < stackbase {
            pagetable.proc_free(size);
            return Err(KernelError::BadExec);
        }

        if pagetable.copy_to_user(VA(sp), arg.as_bytes()).is_err()
            || pagetable.copy_to_user(VA(sp + arg.len()), &[0u8]).is_err()
        {
            pagetable.proc_free(size);
            return Err(KernelError::BadExec);
        }

        ustack[argc] = sp;
        argc += 1;
    }
    ustack[argc] = 0;

    sp -= (argc + 1) * size_of::<usize>();
    sp -= sp % 16;
    if sp < stackbase {
        pagetable.proc_free(size);
        return Err(KernelError::BadExec);
    }

    let ustack_bytes = unsafe {
        core::slice::from_raw_parts(ustack.as_ptr() as *const u8, (argc + 1) * size_of::<usize>())
    };
    if pagetable.copy_to_user(VA(sp), ustack_bytes).is_err() {
        pagetable.proc_free(size);
        return Err(KernelError::BadExec);
    }

    let (_idx, data) = proc::current_proc_and_data_mut();
    let old_size = data.size;
    let old_pagetable = data.pagetable.replace(pagetable);

    data.set_name(path.rsplit_once('/').map_or(path, |(_, name)| name));
    data.size = size;

    let trapframe = data.trapframe.as_mut().unwrap();
    trapframe.epc = header.entry as usize;
    trapframe.sp = sp;
    trapframe.a1 = sp;

    if let Some(old) = old_pagetable {
        old.proc_free(old_size);
    }

    Ok(argc)
}
