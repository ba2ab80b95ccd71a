//! The `Vm`: the single owner of guest memory, the register file, the
//! block cache, and the pending-fixup table (see the ownership summary
//! in the data model). Ties the interpreter, the ECALL bridge, and an
//! optional JIT backend into the engine API a driver programs against.

use std::fmt;
use std::time::Instant;

use crate::blockcache::{BlockCache, PendingFixups};
use crate::fault::{Fault, FaultLog, FaultLogEntry, VmError};
use crate::fb::DirtyRect;
use crate::hotpath::{HotPathEntry, HotPathTracker};
use crate::input::{InputEvent, InputQueue};
use crate::interp::{self, StepOutcome};
use crate::memory::GuestMemory;
use crate::regs::RegisterFile;
use crate::sbi;
use crate::syscall::{self, SyscallHandler};

const FAULT_LOG_CAPACITY: usize = 256;

/// Lifecycle state of a [`Vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// `new()` has run but `init()` has not: memory is unpopulated and PC
    /// is undefined.
    Uninitialized,
    /// `init()` has run (or `stop()` was called); `step`/`step_jit` are
    /// no-ops in this state.
    Halted,
    /// `start()` has run; `step`/`step_jit` execute instructions.
    Running,
    /// A fault was raised; `last_error()` records which one. The engine
    /// performs no recovery — the driver decides whether to `restore_state`
    /// from a snapshot, `init` again, or give up.
    Errored,
}

/// The seam a template JIT plugs into. `rv64-jit` implements this trait;
/// `rv64-core` never depends on it, so an interpreter-only build never
/// pulls in the JIT's `libc`/mmap dependency.
///
/// A backend owns its code arena and is handed the `Vm`'s block cache and
/// fixup table (which the `Vm`, not the backend, owns) on every call so
/// the interpreter and the JIT always observe the same cache.
pub trait JitBackend {
    /// Translate the block at `regs.pc` if it is not already cached, then
    /// run it, mutating `regs` and `mem` in place until the block's
    /// terminating control transfer (or the instruction cap) returns
    /// control here.
    ///
    /// Returns `Err` if the block could not be translated (including the
    /// case where the very first instruction is an ECALL, which the JIT
    /// never translates). The caller's response to `Err` is always a
    /// silent fallback to one interpreter step; it is never surfaced as
    /// a `Fault`.
    ///
    /// A successfully translated block can still fault at run time (the
    /// inlined address-translation sequence's bounds check catches a
    /// load/store outside every window — see `DESIGN.md`'s bounds-check
    /// note). That is reported as
    /// `Ok(JitBlockOutcome::Faulted(..))`, not a translation `Err`: the
    /// block itself was valid code, it just touched bad memory while
    /// running, exactly as an interpreted load/store would.
    fn run_block(
        &mut self,
        cache: &mut BlockCache,
        fixups: &mut PendingFixups,
        regs: &mut RegisterFile,
        mem: &mut GuestMemory,
    ) -> Result<JitBlockOutcome, JitTranslateError>;
}

/// How a JIT-executed block finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitBlockOutcome {
    /// Ran to its terminating control transfer (or instruction cap)
    /// without incident; `regs.pc` is the next block's entry.
    Completed,
    /// The block's inlined bounds check caught an out-of-window load or
    /// store. `regs.pc` is left at the faulting instruction, matching
    /// the interpreter's contract for `Fault`.
    Faulted(Fault),
}

/// Why a block failed to translate. Never surfaced to the driver as a
/// `Fault` — only counted (`Vm::jit_fallback_count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitTranslateError {
    /// The block's first instruction is ECALL; the JIT never translates
    /// environment calls.
    EcallAtEntry,
    /// The decoder faulted while scanning the block.
    Undecodable,
    /// The code arena has no room left for this block.
    ArenaFull,
}

impl fmt::Display for JitTranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EcallAtEntry => write!(f, "block begins with ecall"),
            Self::Undecodable => write!(f, "block contains an undecodable instruction"),
            Self::ArenaFull => write!(f, "JIT code arena is full"),
        }
    }
}

impl std::error::Error for JitTranslateError {}

/// Which edge of a mouse button event fired, or whether the pointer
/// simply moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Move,
    ButtonDown,
    ButtonUp,
}

/// Mouse buttons the host can report. Encoded as a single byte (0/1/2) in
/// the wire record the guest reads via the `read_input_event` syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn code(self) -> u8 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Middle => 2,
        }
    }
}

/// Which edge of a key event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Down,
    Up,
}

/// Host modifier-key state accompanying an input event. The guest wire
/// record (§6) has no modifier field, so these are accepted for a richer
/// host-side API but are not threaded through to the guest; see
/// `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

/// A no-op kernel-call handler, installed until the driver calls
/// `set_syscall_handler`. Returns `-2` (not supported) for every call not
/// already claimed by the engine's internal subset (60/70/71/72).
struct NullSyscallHandler;

impl SyscallHandler for NullSyscallHandler {
    fn handle(&mut self, _num: u64, _a1: u64, _a2: u64, _a3: u64, _a4: u64) -> u64 {
        (-2i64) as u64
    }
}

/// Complete architectural state, captured by [`Vm::save_state`] and
/// applied by [`Vm::restore_state`]. Block cache, pending fixups, the
/// hot-path tracker, and the fault log are all advisory or JIT-private
/// and are **not** part of the snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    regs: RegisterFile,
    mem: GuestMemory,
    state: VmState,
    last_error: Option<Fault>,
    fault_counts: [u64; 4],
    jit_fallback_count: u64,
}

/// Index a `Fault` into the 4-slot exception-statistics array.
fn fault_slot(fault: Fault) -> usize {
    match fault {
        Fault::InvalidInstruction => 0,
        Fault::InvalidMemoryAccess => 1,
        Fault::UnalignedInstruction => 2,
        Fault::UnalignedMemoryAccess => 3,
    }
}

/// The execution engine: register file, guest memory, block cache,
/// pending fixups, and the ECALL bridge to SBI and the host kernel.
pub struct Vm {
    regs: RegisterFile,
    mem: GuestMemory,
    block_cache: BlockCache,
    fixups: PendingFixups,
    hotpath: HotPathTracker,
    input: InputQueue,
    dirty: DirtyRect,
    fault_log: FaultLog,
    fault_counts: [u64; 4],
    state: VmState,
    last_error: Option<Fault>,
    started_at: Option<Instant>,
    jit_fallback_count: u64,
    syscall_handler: Box<dyn SyscallHandler>,
    serial_output: Box<dyn FnMut(u8)>,
    jit: Option<Box<dyn JitBackend>>,
}

impl Vm {
    /// Allocate a VM with `memory_size` bytes of guest memory, the tail
    /// `framebuffer_size` bytes of which are the framebuffer window.
    /// The VM starts `Uninitialized`; call `init` before `start`.
    #[must_use]
    pub fn new(memory_size: usize, framebuffer_size: usize) -> Self {
        Self {
            regs: RegisterFile::new(),
            mem: GuestMemory::new(memory_size, framebuffer_size),
            block_cache: BlockCache::new(),
            fixups: PendingFixups::new(),
            hotpath: HotPathTracker::new(),
            input: InputQueue::new(),
            dirty: DirtyRect::default(),
            fault_log: FaultLog::new(FAULT_LOG_CAPACITY),
            fault_counts: [0; 4],
            state: VmState::Uninitialized,
            last_error: None,
            started_at: None,
            jit_fallback_count: 0,
            syscall_handler: Box::new(NullSyscallHandler),
            serial_output: Box::new(|_: u8| {}),
            jit: None,
        }
    }

    /// Write `image` at `load_address` (must be 4-aligned and fit inside
    /// guest memory), zero the remainder, set PC, and transition to
    /// `Halted`. `image: None` just zeroes memory and sets PC.
    pub fn init(&mut self, image: Option<&[u8]>, load_address: u64) -> Result<(), VmError> {
        if load_address % 4 != 0 {
            return Err(VmError::UnalignedLoadAddress(load_address));
        }
        match image {
            Some(bytes) => {
                if self.mem.translate_checked(load_address, bytes.len() as u64).is_none() {
                    return Err(VmError::ImageTooLarge {
                        load_address,
                        image_len: bytes.len(),
                        memory_size: self.mem.memory_size(),
                    });
                }
                self.mem.load_image(bytes, load_address).map_err(|_| VmError::ImageTooLarge {
                    load_address,
                    image_len: bytes.len(),
                    memory_size: self.mem.memory_size(),
                })?;
            }
            None => {
                self.mem = GuestMemory::new(self.mem.memory_size(), self.mem.framebuffer_size());
            }
        }
        self.regs = RegisterFile::new();
        self.regs.pc = load_address;
        self.state = VmState::Halted;
        self.last_error = None;
        self.started_at = None;
        Ok(())
    }

    /// Install a JIT backend. Requires `init` to have already run and
    /// `enable_jit` not to have been called before.
    pub fn enable_jit(&mut self, backend: Box<dyn JitBackend>) -> Result<(), VmError> {
        if self.state == VmState::Uninitialized {
            return Err(VmError::NotInitialized);
        }
        if self.jit.is_some() {
            return Err(VmError::JitAlreadyEnabled);
        }
        self.jit = Some(backend);
        Ok(())
    }

    #[must_use]
    pub fn jit_enabled(&self) -> bool {
        self.jit.is_some()
    }

    pub fn set_syscall_handler(&mut self, handler: Box<dyn SyscallHandler>) {
        self.syscall_handler = handler;
    }

    pub fn set_serial_output(&mut self, sink: Box<dyn FnMut(u8)>) {
        self.serial_output = sink;
    }

    pub fn start(&mut self) {
        if self.state == VmState::Halted {
            self.state = VmState::Running;
            self.started_at.get_or_insert_with(Instant::now);
        }
    }

    pub fn stop(&mut self) {
        if self.state == VmState::Running {
            self.state = VmState::Halted;
        }
    }

    #[must_use]
    pub fn state(&self) -> VmState {
        self.state
    }

    #[must_use]
    pub fn last_error(&self) -> Option<Fault> {
        self.last_error
    }

    #[must_use]
    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    #[must_use]
    pub fn memory(&self) -> &GuestMemory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.mem
    }

    pub fn block_cache_mut(&mut self) -> (&mut BlockCache, &mut PendingFixups) {
        (&mut self.block_cache, &mut self.fixups)
    }

    /// Discard every translated block and pending fixup. The only
    /// invalidation the JIT supports: there is no
    /// self-modifying-code detection, so a driver that lets the guest
    /// overwrite already-translated code must call this itself or a
    /// stale translation will keep running in its place.
    pub fn clear_jit_cache(&mut self) {
        self.block_cache.clear();
        self.fixups.clear();
    }

    /// Execute exactly one instruction via the interpreter. A no-op
    /// (`Ok(())`) unless the VM is `Running`.
    pub fn step(&mut self) -> Result<(), Fault> {
        if self.state != VmState::Running {
            return Ok(());
        }
        let pc_before = self.regs.pc;
        match interp::step(&mut self.regs, &mut self.mem) {
            Ok(StepOutcome::Retired) => {
                self.hotpath.record(pc_before);
                Ok(())
            }
            Ok(StepOutcome::Ecall) => {
                self.hotpath.record(pc_before);
                self.dispatch_ecall();
                Ok(())
            }
            Err(fault) => {
                self.raise_fault(fault, pc_before);
                Err(fault)
            }
        }
    }

    /// Execute one block via the JIT if enabled, else fall back to
    /// `step`. On a JIT translation failure, bumps the fallback counter
    /// and degrades that step to the interpreter rather than surfacing a
    /// `Fault` — translation failures are never architectural faults.
    pub fn step_jit(&mut self) -> Result<(), Fault> {
        if self.state != VmState::Running {
            return Ok(());
        }
        let Some(jit) = self.jit.as_mut() else {
            return self.step();
        };
        let pc_before = self.regs.pc;
        match jit.run_block(&mut self.block_cache, &mut self.fixups, &mut self.regs, &mut self.mem)
        {
            Ok(JitBlockOutcome::Completed) => {
                self.hotpath.record(pc_before);
                Ok(())
            }
            Ok(JitBlockOutcome::Faulted(fault)) => {
                let pc = self.regs.pc;
                self.raise_fault(fault, pc);
                Err(fault)
            }
            Err(_) => {
                self.jit_fallback_count += 1;
                self.step()
            }
        }
    }

    fn dispatch_ecall(&mut self) {
        let number = self.regs.get(17); // a7
        let a0 = self.regs.get(10);
        let a1 = self.regs.get(11);
        let a2 = self.regs.get(12);
        let a3 = self.regs.get(13);

        // Kernel exit (a7 == 2) is checked before the legacy-SBI split: it
        // collides with SBI's own call number 2 (console getchar), but per
        // the kernel-call contract exit always forwards to the host
        // callback and halts, never falling into `sbi::handle`.
        if number < 10 && number != syscall::EXIT {
            let result = sbi::handle(number, a0, &mut *self.serial_output);
            self.regs.set(10, result.a0);
            if result.halt {
                self.state = VmState::Halted;
            }
        } else {
            let outcome = syscall::dispatch(
                number,
                a0,
                a1,
                a2,
                a3,
                &mut self.mem,
                &mut self.input,
                &mut self.dirty,
                &mut *self.syscall_handler,
            );
            self.regs.set(10, outcome.a0);
            if outcome.halt {
                self.state = VmState::Halted;
            }
        }
    }

    fn raise_fault(&mut self, fault: Fault, pc: u64) {
        self.state = VmState::Errored;
        self.last_error = Some(fault);
        self.fault_counts[fault_slot(fault)] += 1;
        let ts = self.started_at.map_or(0, |t| t.elapsed().as_millis() as u64);
        self.fault_log.record(fault, pc, ts);
    }

    pub fn inject_mouse_event(
        &mut self,
        kind: MouseEventKind,
        button: MouseButton,
        x: i32,
        y: i32,
        _mods: Modifiers,
    ) {
        let event = match kind {
            MouseEventKind::Move => InputEvent::MouseMove { x, y },
            MouseEventKind::ButtonDown => {
                InputEvent::MouseButton { button: button.code(), pressed: true }
            }
            MouseEventKind::ButtonUp => {
                InputEvent::MouseButton { button: button.code(), pressed: false }
            }
        };
        self.input.push(event);
    }

    pub fn inject_keyboard_event(
        &mut self,
        kind: KeyEventKind,
        key: u32,
        _ch: Option<char>,
        _mods: Modifiers,
    ) {
        self.input.push(InputEvent::Key { code: key, pressed: kind == KeyEventKind::Down });
    }

    #[must_use]
    pub fn framebuffer(&self) -> &[u8] {
        self.mem.framebuffer_slice()
    }

    /// The smallest rectangle touched by framebuffer draw calls since the
    /// last call to this method, if any.
    pub fn take_dirty_rect(&mut self) -> Option<(u32, u32, u32, u32)> {
        self.dirty.take()
    }

    #[must_use]
    pub fn hot_path_entries(&self) -> &[HotPathEntry] {
        self.hotpath.entries()
    }

    #[must_use]
    pub fn fault_log(&self) -> Vec<FaultLogEntry> {
        self.fault_log.entries()
    }

    #[must_use]
    pub fn jit_fallback_count(&self) -> u64 {
        self.jit_fallback_count
    }

    #[must_use]
    pub fn block_cache_len(&self) -> usize {
        self.block_cache.len()
    }

    /// Capture complete architectural state (registers, memory, VM state,
    /// last error, exception counters) for later `restore_state`.
    #[must_use]
    pub fn save_state(&self) -> Snapshot {
        Snapshot {
            regs: self.regs,
            mem: self.mem.clone(),
            state: self.state,
            last_error: self.last_error,
            fault_counts: self.fault_counts,
            jit_fallback_count: self.jit_fallback_count,
        }
    }

    /// Overwrite architectural state from `snapshot`. The block cache,
    /// pending fixups, hot-path tracker, and fault log are untouched —
    /// they are not architectural state (see `Snapshot`'s doc comment).
    pub fn restore_state(&mut self, snapshot: &Snapshot) {
        self.regs = snapshot.regs;
        self.mem = snapshot.mem.clone();
        self.state = snapshot.state;
        self.last_error = snapshot.last_error;
        self.fault_counts = snapshot.fault_counts;
        self.jit_fallback_count = snapshot.jit_fallback_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockcache::FixupRecord;
    use crate::memory::{DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE};

    fn vm() -> Vm {
        let mut vm = Vm::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
        vm.init(None, 0).unwrap();
        vm.start();
        vm
    }

    #[test]
    fn init_rejects_unaligned_load_address() {
        let mut vm = Vm::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
        assert_eq!(vm.init(None, 1), Err(VmError::UnalignedLoadAddress(1)));
    }

    #[test]
    fn init_rejects_oversized_image() {
        let mut vm = Vm::new(1024, 0);
        let image = vec![0u8; 2048];
        assert!(matches!(vm.init(Some(&image), 0), Err(VmError::ImageTooLarge { .. })));
    }

    #[test]
    fn step_is_noop_before_start() {
        let mut vm = Vm::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
        vm.init(None, 0).unwrap();
        assert_eq!(vm.step(), Ok(()));
        assert_eq!(vm.regs().pc, 0);
    }

    #[test]
    fn clear_jit_cache_drops_entries_and_pending_fixups() {
        let mut vm = vm();
        {
            let (cache, fixups) = vm.block_cache_mut();
            cache.insert(0x1000, 64);
            fixups.register(0x2000, FixupRecord { branch_site: 4, conditional: false });
        }
        vm.clear_jit_cache();
        let (cache, fixups) = vm.block_cache_mut();
        assert!(cache.is_empty());
        assert_eq!(fixups.pending_count(), 0);
    }

    #[test]
    fn sbi_putchar_writes_byte_and_keeps_running() {
        let mut vm = vm();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        vm.set_serial_output(Box::new(move |b| seen2.borrow_mut().push(b)));
        vm.regs_mut().set(17, 1); // a7 = putchar
        vm.regs_mut().set(10, 0x41); // a0 = 'A'
        vm.memory_mut().write32(0, 0x0000_0073).unwrap(); // ecall
        vm.step().unwrap();
        assert_eq!(*seen.borrow(), vec![0x41]);
        assert_eq!(vm.regs().get(10), 0);
        assert_eq!(vm.state(), VmState::Running);
    }

    #[test]
    fn sbi_shutdown_halts_vm() {
        let mut vm = vm();
        vm.regs_mut().set(17, 8); // a7 = shutdown
        vm.memory_mut().write32(0, 0x0000_0073).unwrap();
        vm.step().unwrap();
        assert_eq!(vm.state(), VmState::Halted);
    }

    fn asm_sh(rs1: u32, rs2: u32, imm: i32) -> u32 {
        let imm = imm as u32;
        (((imm >> 5) & 0x7F) << 25)
            | (rs2 << 20)
            | (rs1 << 15)
            | (0b001 << 12)
            | ((imm & 0x1F) << 7)
            | 0x23
    }

    #[test]
    fn fault_transitions_to_errored_and_records_log() {
        let mut vm = vm();
        // sh x1, 1(x0) — misaligned halfword store.
        vm.memory_mut().write32(0, asm_sh(0, 1, 1)).unwrap();
        let err = vm.step().unwrap_err();
        assert_eq!(err, Fault::UnalignedMemoryAccess);
        assert_eq!(vm.state(), VmState::Errored);
        assert_eq!(vm.last_error(), Some(Fault::UnalignedMemoryAccess));
        assert_eq!(vm.fault_log().len(), 1);
    }

    #[test]
    fn snapshot_round_trips_architectural_state() {
        let mut vm = vm();
        vm.regs_mut().set(5, 0xCAFE);
        vm.memory_mut().write64(0x100, 0xDEAD_BEEF).unwrap();
        let snap = vm.save_state();

        vm.regs_mut().set(5, 0);
        vm.memory_mut().write64(0x100, 0).unwrap();
        vm.restore_state(&snap);

        assert_eq!(vm.regs().get(5), 0xCAFE);
        assert_eq!(vm.memory().read64(0x100).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn unhandled_kernel_call_returns_not_supported() {
        let mut vm = vm();
        vm.regs_mut().set(17, 999); // a7: unclaimed kernel number
        vm.memory_mut().write32(0, 0x0000_0073).unwrap();
        vm.step().unwrap();
        assert_eq!(vm.regs().get(10) as i64, -2);
    }

    struct RecordingKernel {
        next_return: u64,
    }

    impl SyscallHandler for RecordingKernel {
        fn handle(&mut self, _num: u64, _a1: u64, _a2: u64, _a3: u64, _a4: u64) -> u64 {
            self.next_return
        }
    }

    #[test]
    fn exit_ecall_forwards_then_halts_with_callback_value_in_a0() {
        let mut vm = vm();
        vm.set_syscall_handler(Box::new(RecordingKernel { next_return: 0xAB }));
        vm.regs_mut().set(17, 2); // a7 = kernel exit, collides with SBI call number 2
        vm.memory_mut().write32(0, 0x0000_0073).unwrap(); // ecall
        vm.step().unwrap();
        assert_eq!(vm.regs().get(10), 0xAB);
        assert_eq!(vm.state(), VmState::Halted);
    }

    /// A fake backend that reports a fixed outcome for every call,
    /// standing in for a real JIT for `step_jit`'s dispatch logic.
    struct FakeJit(Result<JitBlockOutcome, JitTranslateError>);

    impl JitBackend for FakeJit {
        fn run_block(
            &mut self,
            _cache: &mut BlockCache,
            _fixups: &mut PendingFixups,
            _regs: &mut RegisterFile,
            _mem: &mut GuestMemory,
        ) -> Result<JitBlockOutcome, JitTranslateError> {
            self.0
        }
    }

    #[test]
    fn step_jit_completed_records_hot_path_without_fault() {
        let mut vm = vm();
        vm.enable_jit(Box::new(FakeJit(Ok(JitBlockOutcome::Completed)))).unwrap();
        assert_eq!(vm.step_jit(), Ok(()));
        assert_eq!(vm.state(), VmState::Running);
        assert_eq!(vm.hot_path_entries().len(), 1);
    }

    #[test]
    fn step_jit_faulted_transitions_to_errored() {
        let mut vm = vm();
        vm.enable_jit(Box::new(FakeJit(Ok(JitBlockOutcome::Faulted(
            Fault::InvalidMemoryAccess,
        )))))
        .unwrap();
        let err = vm.step_jit().unwrap_err();
        assert_eq!(err, Fault::InvalidMemoryAccess);
        assert_eq!(vm.state(), VmState::Errored);
        assert_eq!(vm.fault_log().len(), 1);
    }

    #[test]
    fn step_jit_translate_error_falls_back_to_interpreter() {
        let mut vm = vm();
        vm.enable_jit(Box::new(FakeJit(Err(JitTranslateError::Undecodable)))).unwrap();
        // addi x0, x0, 0 at pc 0 — interpreter retires it normally.
        vm.memory_mut().write32(0, 0x0000_0013).unwrap();
        assert_eq!(vm.step_jit(), Ok(()));
        assert_eq!(vm.jit_fallback_count(), 1);
        assert_eq!(vm.regs().pc, 4);
    }
}
