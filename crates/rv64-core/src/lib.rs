//! Execution engine for a RISC-V64 (RV64GC-subset) user/supervisor-mode
//! emulator: register file, address space, decoder, interpreter, ECALL
//! dispatch, block cache, and hot-path tracking.
//!
//! This crate is the core per the design: it owns the register file, the
//! guest address space, the block cache, and the pending-fixup table, and
//! it defines [`JitBackend`] as the seam a template JIT plugs into — it
//! does not itself translate to machine code (that lives in `rv64-jit`,
//! which depends on this crate rather than the other way around, so the
//! interpreter-only configuration never needs to know a JIT exists).

pub mod blockcache;
pub mod decode;
pub mod fault;
pub mod fb;
pub mod hotpath;
pub mod input;
pub mod interp;
pub mod memory;
pub mod regs;
pub mod sbi;
pub mod syscall;
pub mod vm;

pub use blockcache::{BlockCache, FixupRecord, PendingFixups};
pub use fault::{Fault, FaultLog, FaultLogEntry, VmError};
pub use fb::DirtyRect;
pub use hotpath::{HotPathEntry, HotPathTracker};
pub use input::{InputEvent, InputQueue};
pub use memory::GuestMemory;
pub use regs::RegisterFile;
pub use syscall::SyscallHandler;
pub use vm::{
    JitBackend, JitBlockOutcome, JitTranslateError, KeyEventKind, Modifiers, MouseButton,
    MouseEventKind, Snapshot, Vm, VmState,
};
