//! Process control blocks, per-state lists, the table lock, and the scheduler.
//!
//! The PCB pool is a fixed-size arena (`NPROC` slots) addressed by small integer index,
//! never by pointer. Exactly one spinlock — the "table lock" — guards every PCB's
//! `state`/`pid`/`parent`/`chan`/`killed`/`next` field and the six per-state lists that
//! thread the pool together. A process's `ProcData` (kernel stack, page table, trap
//! frame, saved context, open files, cwd, name) is touched only by the process itself
//! or by whoever is transitioning it through EMBRYO, so it lives outside the lock.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use alloc::boxed::Box;

use crate::error::KernelError;
use crate::file::File;
use crate::fs::Inode;
use crate::memlayout::{TRAMPOLINE, TRAPFRAME, kstack};
use crate::param::{NCPU, NOFILE, NPROC, PROCNAME};
use crate::riscv::{PGSIZE, PTE_R, PTE_W, PTE_X, interrupts};
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::swtch::swtch;
use crate::sync::OnceLock;
use crate::trap::current_ticks;
use crate::vm::{Kvm, Uvm, VA};

/// One slot per lifecycle state; doubles as the index into `ProcAdmin::lists`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ProcState {
    Unused = 0,
    Embryo = 1,
    Sleeping = 2,
    Runnable = 3,
    Running = 4,
    Zombie = 5,
}

const NSTATES: usize = 6;

impl ProcState {
    fn as_str(&self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Embryo => "embryo",
            ProcState::Sleeping => "sleep",
            ProcState::Runnable => "runnable",
            ProcState::Running => "run",
            ProcState::Zombie => "zombie",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Pid(pub u32);

/// An opaque wakeup key. Equality is structural identity of the thing being waited on —
/// there is no map from channel to sleeper list, `wakeup` just scans the SLEEPING list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Proc(usize),
    Ticks,
    Buffer(usize),
    Lock(usize),
    Log,
    PipeRead(usize),
    PipeWrite(usize),
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn zero() -> Self {
        // Safety: all-zero bit pattern is a valid Context (plain usize fields).
        unsafe { core::mem::zeroed() }
    }
}

/// Per-process trapframe, mapped at the fixed user virtual address TRAPFRAME and
/// shared in layout with `trampoline.rs`'s hand-written offsets.
#[repr(C, align(4096))]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub kernel_satp: usize,   // 0
    pub kernel_sp: usize,     // 8
    pub kernel_trap: usize,   // 16
    pub kernel_hartid: usize, // 24
    pub epc: usize,           // 32 (note: offsets below follow trampoline.rs's own sd/ld map)
    pub ra: usize,
    pub sp: usize,
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
}

impl TrapFrame {
    fn try_new() -> Result<Box<Self>, KernelError> {
        let frame: Box<core::mem::MaybeUninit<Self>> = Box::try_new_zeroed()?;
        Ok(unsafe { frame.assume_init() })
    }
}

/// Singly-linked list of PCB indices in one lifecycle state, threaded through each
/// `Proc`'s own `next` field. `tail.next == None`; every member's `state` equals this
/// list's tag.
#[derive(Debug, Clone, Copy, Default)]
struct StateList {
    head: Option<usize>,
    tail: Option<usize>,
}

impl StateList {
    const fn empty() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    /// Appends `idx` at the tail. O(1).
    fn add(&mut self, table: &ProcTable, idx: usize) {
        table.inner_mut(idx).next = None;
        match self.tail {
            Some(t) => table.inner_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Unhooks `idx`, a linear scan. Panics if `idx` is not a member (programmer bug).
    fn remove(&mut self, table: &ProcTable, idx: usize) {
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;

        while let Some(cur) = cursor {
            let next = table.inner_mut(cur).next;

            if cur == idx {
                match prev {
                    Some(p) => table.inner_mut(p).next = next,
                    None => self.head = next,
                }
                if self.tail == Some(cur) {
                    self.tail = prev;
                }
                table.inner_mut(cur).next = None;
                return;
            }

            prev = Some(cur);
            cursor = next;
        }

        panic!("StateList::remove: element not found");
    }
}

/// State-list heads/tails plus the pid counter — everything the table lock protects
/// beyond the PCB fields themselves.
pub struct ProcAdmin {
    lists: [StateList; NSTATES],
    next_pid: u32,
}

impl ProcAdmin {
    const fn new() -> Self {
        Self {
            lists: [StateList::empty(); NSTATES],
            next_pid: 1,
        }
    }
}

/// Table-lock-guarded fields: touching any of these without holding the guard is the
/// one invariant this module cannot express at the type level for cross-PCB fields, so
/// every accessor below requires a `&SpinLockGuard<ProcAdmin>` witness.
#[derive(Debug)]
struct ProcInner {
    state: ProcState,
    pid: Pid,
    parent: Option<usize>,
    chan: Option<Channel>,
    killed: bool,
    xstate: isize,
    next: Option<usize>,
    start_ticks: usize,
    cpu_ticks_in: usize,
    cpu_ticks_total: usize,
    uid: u32,
    gid: u32,
}

impl ProcInner {
    const fn unused() -> Self {
        Self {
            state: ProcState::Unused,
            pid: Pid(0),
            parent: None,
            chan: None,
            killed: false,
            xstate: 0,
            next: None,
            start_ticks: 0,
            cpu_ticks_in: 0,
            cpu_ticks_total: 0,
            uid: 0,
            gid: 0,
        }
    }
}

/// Everything a process or its allocator touches without needing the table lock: owned
/// kernel stack, address space, trap frame, saved context, open files, cwd, name.
pub struct ProcData {
    pub kstack: VA,
    pub size: usize,
    pub pagetable: Option<Uvm>,
    pub trapframe: Option<Box<TrapFrame>>,
    pub context: Context,
    pub open_files: [Option<usize>; NOFILE],
    pub cwd: Option<Inode>,
    pub name: [u8; PROCNAME],
}

impl ProcData {
    const fn empty() -> Self {
        Self {
            kstack: VA(0),
            size: 0,
            pagetable: None,
            trapframe: None,
            context: Context::zero(),
            open_files: [None; NOFILE],
            cwd: None,
            name: [0; PROCNAME],
        }
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = [0; PROCNAME];
        let bytes = name.as_bytes();
        let n = bytes.len().min(PROCNAME - 1);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(PROCNAME);
        core::str::from_utf8(&self.name[..end]).unwrap_or("?")
    }
}

pub struct Proc {
    pub index: usize,
    inner: UnsafeCell<ProcInner>,
    data: UnsafeCell<ProcData>,
}

// Safety: `inner` is only touched through accessors that require a table-lock witness;
// `data` is only touched by the owning process or by code holding the table lock during
// an EMBRYO<->UNUSED transition (enforced by convention, as in the teacher's own
// `data_mut`).
unsafe impl Sync for Proc {}

impl Proc {
    const fn new(index: usize) -> Self {
        Self {
            index,
            inner: UnsafeCell::new(ProcInner::unused()),
            data: UnsafeCell::new(ProcData::empty()),
        }
    }

    /// Safety: caller must not alias this with another live `&mut ProcData` for the
    /// same slot (true for the owning process's own kernel execution, and for the
    /// allocator/reaper while the slot is not yet/no-longer runnable).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_mut(&self) -> &mut ProcData {
        unsafe { &mut *self.data.get() }
    }

    pub fn data(&self) -> &ProcData {
        unsafe { &*self.data.get() }
    }
}

pub struct ProcTable {
    procs: [Proc; NPROC],
    admin: SpinLock<ProcAdmin>,
}

impl ProcTable {
    #[allow(clippy::mut_from_ref)]
    fn inner_mut(&self, idx: usize) -> &mut ProcInner {
        unsafe { &mut *self.procs[idx].inner.get() }
    }

    fn inner(&self, idx: usize) -> &ProcInner {
        unsafe { &*self.procs[idx].inner.get() }
    }

    pub fn get(&self, idx: usize) -> &Proc {
        &self.procs[idx]
    }

    /// Safety: called exactly once, before any other hart is running, to map each
    /// process's kernel stack into kernel virtual memory at its fixed slot.
    pub unsafe fn map_stacks(&self, kvm: &mut Kvm) {
        for idx in 0..NPROC {
            let page: Box<[u8; PGSIZE]> = Box::try_new_zeroed()
                .expect("map_stacks: alloc")
                .assume_init_read()
                .into();
            let pa = Box::into_raw(page) as usize;
            let va = kstack(idx);
            kvm.map(VA(va), pa.into(), PGSIZE, PTE_R | PTE_W);
            self.procs[idx].data_mut().kstack = VA(va);
        }
    }

    fn lock(&self) -> SpinLockGuard<'_, ProcAdmin> {
        self.admin.lock()
    }

    /// See `SpinLock::force_unlock`. Used once, by `fork_ret`, to drop the table lock a
    /// freshly dispatched process inherits from `scheduler` without ever having a guard
    /// value of its own to drop.
    ///
    /// # Safety
    /// Caller must be a kernel thread's first-ever dispatch, immediately after
    /// `scheduler` swtch'd into it with the table lock held.
    unsafe fn force_unlock(&self) {
        unsafe { self.admin.force_unlock() }
    }
}

pub static PROC_TABLE: ProcTable = ProcTable {
    procs: [const { Proc::new(0) }; NPROC],
    admin: SpinLock::new(ProcAdmin::new(), "proc_table"),
};

pub static INIT_PROC: OnceLock<usize> = OnceLock::new();

static FIRST_SCHED: AtomicBool = AtomicBool::new(true);

/// Seeds the UNUSED list with every slot; must run once at boot before any other
/// `proc` operation.
///
/// # Safety
/// Must be called exactly once, before any hart other than 0 is running.
pub unsafe fn init() {
    let mut guard = PROC_TABLE.lock();
    for idx in 0..NPROC {
        PROC_TABLE.inner_mut(idx).pid = Pid(0);
        guard.lists[ProcState::Unused as usize].add(&PROC_TABLE, idx);
    }
}

// ---------------------------------------------------------------------------
// Per-CPU state
// ---------------------------------------------------------------------------

pub struct Cpu {
    proc: Option<usize>,
    pub context: Context,
    pub num_off: isize,
    pub interrupts_enabled: bool,
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: None,
            context: Context::zero(),
            num_off: 0,
            interrupts_enabled: false,
        }
    }
}

pub struct CpuTable([UnsafeCell<Cpu>; NCPU]);

unsafe impl Sync for CpuTable {}

pub static CPU_TABLE: CpuTable = CpuTable([const { UnsafeCell::new(Cpu::new()) }; NCPU]);

/// Safety: reads `tp`, which `start.rs` sets to the hart id before entering `main`, and
/// which is otherwise stable for the lifetime of a kernel execution (interrupts must be
/// disabled by the caller if the result must remain valid, since a reschedule can move
/// a kernel thread to a different hart).
pub unsafe fn current_id() -> usize {
    unsafe { crate::riscv::tp::read() }
}

#[allow(clippy::mut_from_ref)]
pub unsafe fn current_cpu() -> &'static mut Cpu {
    unsafe { &mut *CPU_TABLE.0[current_id()].get() }
}

pub unsafe fn current_cpu_ptr() -> *mut Cpu {
    unsafe { CPU_TABLE.0[current_id()].get() }
}

/// Returns the slot index of the process running on this CPU, if any. Safety: caller
/// must have interrupts disabled, or accept that the answer may be stale by the time
/// it's used.
pub unsafe fn current_proc_opt() -> Option<usize> {
    unsafe { current_cpu().proc }
}

pub fn current_proc() -> usize {
    unsafe { current_proc_opt() }.expect("current_proc: no process on this cpu")
}

#[allow(clippy::mut_from_ref)]
pub fn current_proc_and_data_mut() -> (usize, &'static mut ProcData) {
    let idx = current_proc();
    (idx, unsafe { PROC_TABLE.get(idx).data_mut() })
}

pub fn is_killed(idx: usize) -> bool {
    let guard = PROC_TABLE.lock();
    PROC_TABLE.inner(idx).killed
}

pub fn pid_of(idx: usize) -> Pid {
    let _guard = PROC_TABLE.lock();
    PROC_TABLE.inner(idx).pid
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Pops the first UNUSED entry, assigns a pid, transitions to EMBRYO, and lays out a
/// fresh kernel stack / trapframe / context whose resume address is `fork_ret`. Rolls
/// back to UNUSED on any allocation failure (stack allocation happens with the table
/// lock released, so a failing allocator call never blocks other CPUs).
fn alloc() -> Result<usize, KernelError> {
    let idx = {
        let mut guard = PROC_TABLE.lock();
        let idx = match guard.lists[ProcState::Unused as usize].head {
            Some(idx) => idx,
            None => return Err(KernelError::OutOfProc),
        };
        guard.lists[ProcState::Unused as usize].remove(&PROC_TABLE, idx);

        let pid = Pid(guard.next_pid);
        guard.next_pid += 1;

        let inner = PROC_TABLE.inner_mut(idx);
        *inner = ProcInner::unused();
        inner.pid = pid;
        inner.state = ProcState::Embryo;
        inner.start_ticks = current_ticks();
        guard.lists[ProcState::Embryo as usize].add(&PROC_TABLE, idx);
        idx
    };

    if let Err(e) = setup_proc(idx) {
        let mut guard = PROC_TABLE.lock();
        guard.lists[ProcState::Embryo as usize].remove(&PROC_TABLE, idx);
        PROC_TABLE.inner_mut(idx).state = ProcState::Unused;
        PROC_TABLE.inner_mut(idx).pid = Pid(0);
        guard.lists[ProcState::Unused as usize].add(&PROC_TABLE, idx);
        return Err(e);
    }

    Ok(idx)
}

fn setup_proc(idx: usize) -> Result<(), KernelError> {
    let proc = PROC_TABLE.get(idx);
    let data = unsafe { proc.data_mut() };

    data.trapframe = Some(TrapFrame::try_new()?);
    data.pagetable = Some(create_pagetable(idx)?);

    data.context = Context::zero();
    data.context.ra = fork_ret as usize;
    data.context.sp = (data.kstack + PGSIZE).as_usize();

    Ok(())
}

pub(crate) fn create_pagetable(idx: usize) -> Result<Uvm, KernelError> {
    let mut pagetable = Uvm::try_new()?;
    let proc = PROC_TABLE.get(idx);
    let data = unsafe { proc.data_mut() };
    let trapframe = data.trapframe.as_ref().unwrap().as_ref() as *const TrapFrame as usize;

    if pagetable
        .map_pages(TRAMPOLINE.into(), crate::trampoline::trampoline_pa(), PGSIZE, PTE_R | PTE_X)
        .is_err()
    {
        return Err(KernelError::Alloc);
    }

    if pagetable
        .map_pages(TRAPFRAME.into(), trapframe.into(), PGSIZE, PTE_R | PTE_W)
        .is_err()
    {
        pagetable.unmap(TRAMPOLINE.into(), 1, false);
        return Err(KernelError::Alloc);
    }

    Ok(pagetable)
}

/// Frees the kernel stack's mapped frame, the address space, and the trapframe, and
/// resets identity fields. Called only as part of a ZOMBIE -> UNUSED reap, table lock
/// NOT held (the reap site releases it around this call, matching `wait`'s contract).
fn free_proc_data(idx: usize) {
    let proc = PROC_TABLE.get(idx);
    let data = unsafe { proc.data_mut() };

    data.trapframe = None;
    if let Some(pagetable) = data.pagetable.take() {
        pagetable.proc_free(data.size);
    }
    data.size = 0;
    data.name = [0; PROCNAME];
}

// ---------------------------------------------------------------------------
// Lifecycle: userinit, fork, exit, wait
// ---------------------------------------------------------------------------

/// Sets up the very first process: an address space containing the embedded init
/// binary, a trapframe configured for user-mode entry at VA 0 with a one-page stack.
/// Transitions EMBRYO -> RUNNABLE.
pub fn user_init(init_code: &[u8]) {
    let idx = alloc().expect("user_init: alloc");
    let proc = PROC_TABLE.get(idx);
    let data = unsafe { proc.data_mut() };

    let pagetable = data.pagetable.as_mut().unwrap();
    pagetable
        .alloc(0, init_code.len().max(PGSIZE), PTE_W | PTE_X | PTE_R)
        .expect("user_init: alloc user image");
    pagetable
        .copy_to_user(VA(0), init_code)
        .expect("user_init: copy init code");
    data.size = PGSIZE;

    let trapframe = data.trapframe.as_mut().unwrap();
    trapframe.epc = 0;
    trapframe.sp = PGSIZE;

    data.set_name("initcode");
    data.cwd = Some(crate::fs::Inode::root());

    {
        let mut guard = PROC_TABLE.lock();
        guard.lists[ProcState::Embryo as usize].remove(&PROC_TABLE, idx);
        PROC_TABLE.inner_mut(idx).state = ProcState::Runnable;
        guard.lists[ProcState::Runnable as usize].add(&PROC_TABLE, idx);
    }

    INIT_PROC.initialize(|| Ok::<usize, ()>(idx));
}

/// Creates a child of the current process, copying its address space, open files, cwd,
/// and name; sets the child's syscall return value to 0. Returns the child pid, or an
/// error if the table is full or the address-space copy fails.
pub fn fork() -> Result<Pid, KernelError> {
    let (parent_idx, parent_data) = current_proc_and_data_mut();
    let child_idx = alloc()?;
    let child_proc = PROC_TABLE.get(child_idx);
    let child_data = unsafe { child_proc.data_mut() };

    if let Err(e) = parent_data
        .pagetable
        .as_mut()
        .unwrap()
        .copy(child_data.pagetable.as_mut().unwrap(), parent_data.size)
    {
        let mut guard = PROC_TABLE.lock();
        guard.lists[ProcState::Embryo as usize].remove(&PROC_TABLE, child_idx);
        PROC_TABLE.inner_mut(child_idx).state = ProcState::Unused;
        PROC_TABLE.inner_mut(child_idx).pid = Pid(0);
        guard.lists[ProcState::Unused as usize].add(&PROC_TABLE, child_idx);
        return Err(e);
    }

    child_data.size = parent_data.size;
    **child_data.trapframe.as_mut().unwrap() = **parent_data.trapframe.as_ref().unwrap();
    child_data.trapframe.as_mut().unwrap().a0 = 0;

    for (slot, file) in child_data.open_files.iter_mut().zip(parent_data.open_files.iter()) {
        *slot = file.map(File::dup);
    }
    child_data.cwd = parent_data.cwd.map(Inode::dup);
    child_data.set_name(parent_data.name());

    let child_pid;
    {
        let mut guard = PROC_TABLE.lock();
        let parent_pid = PROC_TABLE.inner(parent_idx).pid;
        let parent_uid = PROC_TABLE.inner(parent_idx).uid;
        let parent_gid = PROC_TABLE.inner(parent_idx).gid;

        let inner = PROC_TABLE.inner_mut(child_idx);
        inner.parent = Some(parent_idx);
        inner.uid = parent_uid;
        inner.gid = parent_gid;
        child_pid = inner.pid;
        let _ = parent_pid;

        guard.lists[ProcState::Embryo as usize].remove(&PROC_TABLE, child_idx);
        PROC_TABLE.inner_mut(child_idx).state = ProcState::Runnable;
        guard.lists[ProcState::Runnable as usize].add(&PROC_TABLE, child_idx);
    }

    Ok(child_pid)
}

/// Terminates the calling process: closes its open files, releases its cwd, wakes its
/// parent, reparents its own children to `INIT_PROC` (waking init for any that are
/// already ZOMBIE), transitions RUNNING -> ZOMBIE, and hands off to the scheduler. Never
/// returns.
pub fn exit(status: isize) -> ! {
    let idx = current_proc();
    let data = unsafe { PROC_TABLE.get(idx).data_mut() };

    assert!(Some(idx) != INIT_PROC.get().copied(), "init exiting");

    for slot in data.open_files.iter_mut() {
        if let Some(fd) = slot.take() {
            File::close(fd);
        }
    }
    if let Some(cwd) = data.cwd.take() {
        cwd.put();
    }

    let mut guard = PROC_TABLE.lock();

    let parent = PROC_TABLE.inner(idx).parent;
    if let Some(parent_idx) = parent {
        wakeup1(&mut guard, Channel::Proc(parent_idx));
    }

    reparent(&mut guard, idx);

    PROC_TABLE.inner_mut(idx).xstate = status;
    guard.lists[ProcState::Running as usize].remove(&PROC_TABLE, idx);
    PROC_TABLE.inner_mut(idx).state = ProcState::Zombie;
    guard.lists[ProcState::Zombie as usize].add(&PROC_TABLE, idx);

    let data = unsafe { PROC_TABLE.get(idx).data_mut() };
    let guard = sched(guard, idx, &mut data.context);
    drop(guard);
    unreachable!("exit: returned from sched");
}

/// Walks every non-UNUSED list; any PCB whose parent is `idx` is reparented to
/// `INIT_PROC`. If such a child is already ZOMBIE, wakes init so it can reap it.
fn reparent(guard: &mut SpinLockGuard<'_, ProcAdmin>, idx: usize) {
    let init_idx = match INIT_PROC.get() {
        Some(i) => *i,
        None => return,
    };

    for state in [
        ProcState::Embryo,
        ProcState::Sleeping,
        ProcState::Runnable,
        ProcState::Running,
        ProcState::Zombie,
    ] {
        let mut cursor = guard.lists[state as usize].head;
        while let Some(child) = cursor {
            let next = PROC_TABLE.inner(child).next;
            if PROC_TABLE.inner(child).parent == Some(idx) {
                PROC_TABLE.inner_mut(child).parent = Some(init_idx);
                if PROC_TABLE.inner(child).state == ProcState::Zombie {
                    wakeup1(guard, Channel::Proc(init_idx));
                }
            }
            cursor = next;
        }
    }
}

/// Scans for a ZOMBIE child of the caller and reaps it, freeing its kernel stack and
/// address space and returning its pid and exit status. Blocks (via `sleep_on_table`)
/// if children exist but none are ready yet. Returns `None` if the caller has no
/// children, or if the caller has been killed while waiting.
pub fn wait() -> Option<(Pid, isize)> {
    let idx = current_proc();
    let mut guard = PROC_TABLE.lock();

    loop {
        let mut have_children = false;

        for state in [
            ProcState::Embryo,
            ProcState::Sleeping,
            ProcState::Runnable,
            ProcState::Running,
            ProcState::Zombie,
        ] {
            let mut cursor = guard.lists[state as usize].head;
            while let Some(child) = cursor {
                let next = PROC_TABLE.inner(child).next;

                if PROC_TABLE.inner(child).parent == Some(idx) {
                    have_children = true;

                    if PROC_TABLE.inner(child).state == ProcState::Zombie {
                        let pid = PROC_TABLE.inner(child).pid;
                        let xstate = PROC_TABLE.inner(child).xstate;
                        guard.lists[ProcState::Zombie as usize].remove(&PROC_TABLE, child);
                        free_proc_data(child);
                        PROC_TABLE.inner_mut(child).state = ProcState::Unused;
                        PROC_TABLE.inner_mut(child).pid = Pid(0);
                        PROC_TABLE.inner_mut(child).parent = None;
                        guard.lists[ProcState::Unused as usize].add(&PROC_TABLE, child);
                        return Some((pid, xstate));
                    }
                }

                cursor = next;
            }
        }

        if !have_children || PROC_TABLE.inner(idx).killed {
            return None;
        }

        guard = sleep_on_table(Channel::Proc(idx), idx, guard);
    }
}

// ---------------------------------------------------------------------------
// Scheduler core
// ---------------------------------------------------------------------------

/// Per-CPU dispatch loop. Never returns, owns no PCB of its own. Each pass takes the
/// table lock once, walks the RUNNABLE list head-to-tail, and context-switches into
/// every entry found in that single snapshot; new entries appended mid-pass are picked
/// up on the next pass, preserving FCFS order.
///
/// # Safety
/// Must run as the bottom of each hart's call stack, after all other `proc::init*`
/// calls have completed.
pub unsafe fn scheduler() -> ! {
    let cpu = unsafe { current_cpu() };
    cpu.proc = None;

    loop {
        interrupts::enable();

        let mut guard = PROC_TABLE.lock();
        let mut found = false;
        let mut cursor = guard.lists[ProcState::Runnable as usize].head;

        while let Some(idx) = cursor {
            let next_in_pass = PROC_TABLE.inner(idx).next;

            assert_eq!(
                PROC_TABLE.inner(idx).state,
                ProcState::Runnable,
                "scheduler: not runnable"
            );

            guard.lists[ProcState::Runnable as usize].remove(&PROC_TABLE, idx);
            PROC_TABLE.inner_mut(idx).state = ProcState::Running;
            guard.lists[ProcState::Running as usize].add(&PROC_TABLE, idx);
            PROC_TABLE.inner_mut(idx).cpu_ticks_in = current_ticks();

            cpu.proc = Some(idx);
            let proc = PROC_TABLE.get(idx);
            let data = unsafe { proc.data_mut() };
            crate::vm::switch_uvm(data.pagetable.as_ref().unwrap());

            unsafe { swtch(&mut cpu.context, &data.context) };

            crate::vm::switch_kvm();
            cpu.proc = None;
            found = true;

            cursor = next_in_pass;
        }

        drop(guard);

        if !found {
            unsafe { core::arch::asm!("wfi") };
        }
    }
}

/// Cooperative hand-off: switches from the calling process's context to this CPU's
/// scheduler context. The table lock must be held (`ncli == 1`), the process must
/// already be off RUNNING, and interrupts must be disabled. Accumulates
/// `cpu_ticks_total` and preserves the CPU's `interrupts_enabled` flag across the
/// switch, since that flag is a property of the kernel thread, not of the CPU.
pub fn sched<'a>(
    guard: SpinLockGuard<'a, ProcAdmin>,
    idx: usize,
    context: &mut Context,
) -> SpinLockGuard<'a, ProcAdmin> {
    let cpu = unsafe { current_cpu() };

    assert_eq!(cpu.num_off, 1, "sched: locks held");
    assert_ne!(
        PROC_TABLE.inner(idx).state,
        ProcState::Running,
        "sched: still running"
    );
    assert!(!interrupts::get(), "sched: interruptible");

    PROC_TABLE.inner_mut(idx).cpu_ticks_total +=
        current_ticks().saturating_sub(PROC_TABLE.inner(idx).cpu_ticks_in);

    let interrupts_enabled = cpu.interrupts_enabled;
    unsafe { swtch(context, &cpu.context) };
    let cpu = unsafe { current_cpu() };
    cpu.interrupts_enabled = interrupts_enabled;

    guard
}

/// Gives up the CPU for one scheduling round: RUNNING -> RUNNABLE (tail), hand off,
/// resume once rescheduled.
pub fn r#yield() {
    let (idx, data) = current_proc_and_data_mut();
    let mut guard = PROC_TABLE.lock();

    guard.lists[ProcState::Running as usize].remove(&PROC_TABLE, idx);
    PROC_TABLE.inner_mut(idx).state = ProcState::Runnable;
    guard.lists[ProcState::Runnable as usize].add(&PROC_TABLE, idx);

    let guard = sched(guard, idx, &mut data.context);
    drop(guard);
}

/// First thing ever run on a freshly allocated process's kernel stack. Releases the
/// table lock handed off by `scheduler` (mirroring the C original's `forkret`), runs
/// the filesystem/log one-time bring-up exactly once across the whole kernel, then
/// returns to user mode.
///
/// # Safety
/// Only ever reached via `context.ra` on a process's very first dispatch.
extern "C" fn fork_ret() {
    unsafe { PROC_TABLE.force_unlock() };

    if FIRST_SCHED.swap(false, Ordering::AcqRel) {
        unsafe { crate::fs::init() };
    }

    unsafe { crate::trap::usertrapret() };
}

// ---------------------------------------------------------------------------
// Sleep / wakeup
// ---------------------------------------------------------------------------

/// Atomically (from the sleeper's perspective) gives up `condition_lock` and goes to
/// sleep on `chan`, guaranteed not to miss a `wakeup(chan)` that happens after this call
/// starts, because the table lock is acquired before `condition_lock` is released.
pub fn sleep<'a, T>(chan: Channel, condition_lock: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
    let (idx, data) = current_proc_and_data_mut();
    let condition_mutex;

    {
        let mut guard = PROC_TABLE.lock();
        condition_mutex = SpinLock::unlock(condition_lock);

        guard.lists[ProcState::Running as usize].remove(&PROC_TABLE, idx);
        PROC_TABLE.inner_mut(idx).chan = Some(chan);
        PROC_TABLE.inner_mut(idx).state = ProcState::Sleeping;
        guard.lists[ProcState::Sleeping as usize].add(&PROC_TABLE, idx);

        let guard = sched(guard, idx, &mut data.context);
        PROC_TABLE.inner_mut(idx).chan = None;
        drop(guard);
    }

    condition_mutex.lock()
}

/// `sleep`'s self-referential special case: the caller already holds the table lock
/// itself (as in `wait`), so there is no separate condition lock to swap out — the
/// guard is simply reused across the transition and handed back to the caller.
fn sleep_on_table<'a>(
    chan: Channel,
    idx: usize,
    mut guard: SpinLockGuard<'a, ProcAdmin>,
) -> SpinLockGuard<'a, ProcAdmin> {
    guard.lists[ProcState::Running as usize].remove(&PROC_TABLE, idx);
    PROC_TABLE.inner_mut(idx).chan = Some(chan);
    PROC_TABLE.inner_mut(idx).state = ProcState::Sleeping;
    guard.lists[ProcState::Sleeping as usize].add(&PROC_TABLE, idx);

    let data = unsafe { PROC_TABLE.get(idx).data_mut() };
    let guard = sched(guard, idx, &mut data.context);
    PROC_TABLE.inner_mut(idx).chan = None;
    guard
}

/// Wakes every process sleeping on `chan`. Table-lock-held internal form, used by
/// `exit`/`reparent` which already hold the guard. Split out from `wakeup1` so the
/// scan can be exercised against a `fresh_table()` in tests without touching the
/// global `PROC_TABLE`.
fn wakeup1_on(table: &ProcTable, guard: &mut SpinLockGuard<'_, ProcAdmin>, chan: Channel) {
    let mut cursor = guard.lists[ProcState::Sleeping as usize].head;

    while let Some(idx) = cursor {
        let next = table.inner(idx).next;

        if table.inner(idx).chan == Some(chan) {
            guard.lists[ProcState::Sleeping as usize].remove(table, idx);
            table.inner_mut(idx).state = ProcState::Runnable;
            guard.lists[ProcState::Runnable as usize].add(table, idx);
        }

        cursor = next;
    }
}

fn wakeup1(guard: &mut SpinLockGuard<'_, ProcAdmin>, chan: Channel) {
    wakeup1_on(&PROC_TABLE, guard, chan);
}

pub fn wakeup(chan: Channel) {
    let mut guard = PROC_TABLE.lock();
    wakeup1(&mut guard, chan);
}

/// Sets `killed` on the process with the given pid; if it is SLEEPING, makes it
/// RUNNABLE so it observes `killed` on its next return to user mode. Returns `false` if
/// no non-UNUSED process has that pid. Split out from `kill` so the scan can be
/// exercised against a `fresh_table()` in tests without touching the global
/// `PROC_TABLE`.
fn kill_on(table: &ProcTable, guard: &mut SpinLockGuard<'_, ProcAdmin>, pid: Pid) -> bool {
    for state in [
        ProcState::Embryo,
        ProcState::Sleeping,
        ProcState::Runnable,
        ProcState::Running,
        ProcState::Zombie,
    ] {
        let mut cursor = guard.lists[state as usize].head;
        while let Some(idx) = cursor {
            let next = table.inner(idx).next;

            if table.inner(idx).pid == pid {
                table.inner_mut(idx).killed = true;

                if table.inner(idx).state == ProcState::Sleeping {
                    guard.lists[ProcState::Sleeping as usize].remove(table, idx);
                    table.inner_mut(idx).state = ProcState::Runnable;
                    guard.lists[ProcState::Runnable as usize].add(table, idx);
                }

                return true;
            }

            cursor = next;
        }
    }

    false
}

pub fn kill(pid: Pid) -> bool {
    let mut guard = PROC_TABLE.lock();
    kill_on(&PROC_TABLE, &mut guard, pid)
}

/// Grows or shrinks the current process's user image by `delta` bytes. Not
/// lock-protected against concurrent growth of the same process — a process only ever
/// grows itself.
pub fn growproc(delta: isize) -> Result<(), KernelError> {
    let (_idx, data) = current_proc_and_data_mut();
    let old_size = data.size;

    let new_size = if delta > 0 {
        data.pagetable
            .as_mut()
            .unwrap()
            .alloc(old_size, old_size + delta as usize, PTE_W)?
    } else if delta < 0 {
        data.pagetable
            .as_mut()
            .unwrap()
            .dealloc(old_size, old_size.saturating_sub((-delta) as usize))
    } else {
        old_size
    };

    data.size = new_size;
    crate::vm::switch_uvm(data.pagetable.as_ref().unwrap());
    Ok(())
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// A filtered, owned snapshot of one PCB, for `getprocs`/`ps`. Never aliases the live
/// PCB once copied out. `state` is `'static` (one of the fixed lifecycle-name strings),
/// so this is cheap to copy but not itself safe to hand to user space byte-for-byte;
/// `sysproc::sys_getprocs` packs it into `abi::RawProc` for that.
#[derive(Debug, Clone, Copy)]
pub struct UProc {
    pub pid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: usize,
    pub state: &'static str,
    pub start_ticks: usize,
    pub cpu_ticks: usize,
    pub name: [u8; PROCNAME],
}

/// Lock-free walk of the PCB pool, used from a panic-adjacent console handler: reads
/// may race a concurrent mutation, but never dereferences a pointer, so the worst case
/// is a torn snapshot, not a crash.
pub fn procdump() {
    crate::println!("PID\tSTATE\tNAME");
    for idx in 0..NPROC {
        let inner = PROC_TABLE.inner(idx);
        if inner.state == ProcState::Unused {
            continue;
        }
        let data = PROC_TABLE.get(idx).data();
        crate::println!("{}\t{}\t{}", inner.pid.0, inner.state.as_str(), data.name());
    }
}

/// Copies a filtered snapshot (skip UNUSED and EMBRYO) of up to `max` PCBs, under the
/// table lock. Returns the count copied; silently caps at `max` (the documented `ps`
/// contract, not a bug).
pub fn getprocs(max: usize, out: &mut [UProc]) -> usize {
    let guard = PROC_TABLE.lock();
    let mut count = 0;

    for idx in 0..NPROC {
        if count >= max || count >= out.len() {
            break;
        }

        let inner = PROC_TABLE.inner(idx);
        if matches!(inner.state, ProcState::Unused | ProcState::Embryo) {
            continue;
        }

        let data = PROC_TABLE.get(idx).data();
        let ppid = inner
            .parent
            .map(|p| PROC_TABLE.inner(p).pid.0)
            .unwrap_or(0);

        out[count] = UProc {
            pid: inner.pid.0,
            ppid,
            uid: inner.uid,
            gid: inner.gid,
            size: data.size,
            state: inner.state.as_str(),
            start_ticks: inner.start_ticks,
            cpu_ticks: inner.cpu_ticks_total,
            name: data.name,
        };
        count += 1;
    }

    drop(guard);
    count
}

fn dump_list(name: &str, state: ProcState) {
    let guard = PROC_TABLE.lock();
    crate::println!("{name}:");
    let mut cursor = guard.lists[state as usize].head;
    while let Some(idx) = cursor {
        let inner = PROC_TABLE.inner(idx);
        crate::println!("  pid {} ({})", inner.pid.0, PROC_TABLE.get(idx).data().name());
        cursor = inner.next;
    }
    drop(guard);
}

pub fn readydump() {
    dump_list("runnable", ProcState::Runnable);
}

pub fn freedump() {
    dump_list("unused", ProcState::Unused);
}

pub fn sleepdump() {
    dump_list("sleeping", ProcState::Sleeping);
}

pub fn zombiedump() {
    dump_list("zombie", ProcState::Zombie);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests exercise the pure list/bookkeeping algorithms directly against a
    // fresh `ProcTable` value (not the global `PROC_TABLE`), so they need neither a
    // booted kernel nor `PROC_TABLE`'s process-lifetime statics.

    fn fresh_table() -> ProcTable {
        ProcTable {
            procs: [const { Proc::new(0) }; NPROC],
            admin: SpinLock::new(ProcAdmin::new(), "test_proc_table"),
        }
    }

    fn seed_unused(table: &ProcTable) {
        let mut guard = table.admin.lock();
        for idx in 0..NPROC {
            guard.lists[ProcState::Unused as usize].add(table, idx);
        }
    }

    #[test]
    fn unused_list_seeds_every_slot() {
        let table = fresh_table();
        seed_unused(&table);
        let guard = table.admin.lock();

        let mut count = 0;
        let mut cursor = guard.lists[ProcState::Unused as usize].head;
        while let Some(idx) = cursor {
            count += 1;
            cursor = table.inner(idx).next;
        }
        assert_eq!(count, NPROC);
    }

    #[test]
    fn add_then_remove_restores_empty_list() {
        let table = fresh_table();
        let mut guard = table.admin.lock();

        guard.lists[ProcState::Runnable as usize].add(&table, 3);
        guard.lists[ProcState::Runnable as usize].add(&table, 7);
        assert_eq!(guard.lists[ProcState::Runnable as usize].head, Some(3));
        assert_eq!(guard.lists[ProcState::Runnable as usize].tail, Some(7));

        guard.lists[ProcState::Runnable as usize].remove(&table, 3);
        assert_eq!(guard.lists[ProcState::Runnable as usize].head, Some(7));

        guard.lists[ProcState::Runnable as usize].remove(&table, 7);
        assert_eq!(guard.lists[ProcState::Runnable as usize].head, None);
        assert_eq!(guard.lists[ProcState::Runnable as usize].tail, None);
    }

    #[test]
    fn fifo_order_is_preserved_across_interior_removal() {
        let table = fresh_table();
        let mut guard = table.admin.lock();

        for idx in [1usize, 2, 3, 4] {
            guard.lists[ProcState::Runnable as usize].add(&table, idx);
        }
        // remove an interior element
        guard.lists[ProcState::Runnable as usize].remove(&table, 2);

        let mut order = alloc::vec::Vec::new();
        let mut cursor = guard.lists[ProcState::Runnable as usize].head;
        while let Some(idx) = cursor {
            order.push(idx);
            cursor = table.inner(idx).next;
        }
        assert_eq!(order, alloc::vec![1, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "element not found")]
    fn remove_of_absent_element_panics() {
        let table = fresh_table();
        let mut guard = table.admin.lock();
        guard.lists[ProcState::Runnable as usize].add(&table, 1);
        guard.lists[ProcState::Runnable as usize].remove(&table, 99);
    }

    #[test]
    fn pid_allocation_is_monotonic() {
        let table = fresh_table();
        seed_unused(&table);

        let mut pids = alloc::vec::Vec::new();
        for _ in 0..5 {
            let mut guard = table.admin.lock();
            let idx = guard.lists[ProcState::Unused as usize].head.unwrap();
            guard.lists[ProcState::Unused as usize].remove(&table, idx);
            let pid = guard.next_pid;
            guard.next_pid += 1;
            pids.push(pid);
        }

        for window in pids.windows(2) {
            assert!(window[1] > window[0]);
        }
    }

    #[test]
    fn kill_sets_killed_and_requeues_sleeping_victim() {
        let table = fresh_table();
        let mut guard = table.admin.lock();

        table.inner_mut(2).pid = Pid(5);
        table.inner_mut(2).state = ProcState::Sleeping;
        table.inner_mut(2).chan = Some(Channel::Ticks);
        guard.lists[ProcState::Sleeping as usize].add(&table, 2);

        assert!(kill_on(&table, &mut guard, Pid(5)));
        assert!(table.inner(2).killed);
        assert_eq!(table.inner(2).state, ProcState::Runnable);
        assert_eq!(guard.lists[ProcState::Sleeping as usize].head, None);
        assert_eq!(guard.lists[ProcState::Runnable as usize].head, Some(2));

        // killed is monotonic: a second kill of the same pid is a harmless no-op that
        // leaves it set rather than clearing it.
        assert!(kill_on(&table, &mut guard, Pid(5)));
        assert!(table.inner(2).killed);
    }

    #[test]
    fn kill_of_unknown_pid_returns_false() {
        let table = fresh_table();
        let mut guard = table.admin.lock();
        assert!(!kill_on(&table, &mut guard, Pid(999)));
    }

    #[test]
    fn wakeup1_moves_only_matching_channel_from_sleeping() {
        let table = fresh_table();
        let mut guard = table.admin.lock();

        table.inner_mut(1).state = ProcState::Sleeping;
        table.inner_mut(1).chan = Some(Channel::Proc(10));
        guard.lists[ProcState::Sleeping as usize].add(&table, 1);

        table.inner_mut(2).state = ProcState::Sleeping;
        table.inner_mut(2).chan = Some(Channel::Proc(20));
        guard.lists[ProcState::Sleeping as usize].add(&table, 2);

        table.inner_mut(3).state = ProcState::Sleeping;
        table.inner_mut(3).chan = Some(Channel::Proc(10));
        guard.lists[ProcState::Sleeping as usize].add(&table, 3);

        wakeup1_on(&table, &mut guard, Channel::Proc(10));

        assert_eq!(table.inner(1).state, ProcState::Runnable);
        assert_eq!(table.inner(2).state, ProcState::Sleeping);
        assert_eq!(table.inner(3).state, ProcState::Runnable);

        assert_eq!(guard.lists[ProcState::Sleeping as usize].head, Some(2));
        assert_eq!(guard.lists[ProcState::Sleeping as usize].tail, Some(2));

        let mut order = alloc::vec::Vec::new();
        let mut cursor = guard.lists[ProcState::Runnable as usize].head;
        while let Some(idx) = cursor {
            order.push(idx);
            cursor = table.inner(idx).next;
        }
        assert_eq!(order, alloc::vec![1, 3]);
    }
}
