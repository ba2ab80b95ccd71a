//! Fault taxonomy for the interpreter and JIT.
//!
//! Every fault here is fatal to the instruction that raised it: the VM
//! transitions to `VmState::Errored` and `last_error` records the kind.
//! There is no trap vector; recovery (restart, snapshot restore, abort) is
//! entirely the driver's decision.

use std::fmt;

/// A fault raised while stepping the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The decoder could not classify the instruction word (including
    /// undefined 16-bit compressed encodings).
    InvalidInstruction,
    /// Address translation failed, or the translated physical offset would
    /// run past the end of the host buffer.
    InvalidMemoryAccess,
    /// A branch or jump target was not a multiple of 4 where alignment is
    /// required.
    UnalignedInstruction,
    /// A load or store address was not a multiple of its access width.
    UnalignedMemoryAccess,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInstruction => write!(f, "invalid instruction"),
            Self::InvalidMemoryAccess => write!(f, "invalid memory access"),
            Self::UnalignedInstruction => write!(f, "unaligned instruction"),
            Self::UnalignedMemoryAccess => write!(f, "unaligned memory access"),
        }
    }
}

impl std::error::Error for Fault {}

/// A single entry in the bounded fault ring buffer.
///
/// Advisory only: not restored on snapshot restore, per spec.
#[derive(Debug, Clone, Copy)]
pub struct FaultLogEntry {
    /// The fault kind.
    pub fault: Fault,
    /// Guest PC at the time of the fault.
    pub pc: u64,
    /// Milliseconds since `Vm::start()`.
    pub timestamp_ms: u64,
}

/// Bounded ring buffer of recent faults.
#[derive(Debug, Clone)]
pub struct FaultLog {
    entries: Vec<FaultLogEntry>,
    capacity: usize,
    next: usize,
    len: usize,
}

impl FaultLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![
                FaultLogEntry {
                    fault: Fault::InvalidInstruction,
                    pc: 0,
                    timestamp_ms: 0,
                };
                capacity
            ],
            capacity,
            next: 0,
            len: 0,
        }
    }

    pub fn record(&mut self, fault: Fault, pc: u64, timestamp_ms: u64) {
        self.entries[self.next] = FaultLogEntry {
            fault,
            pc,
            timestamp_ms,
        };
        self.next = (self.next + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    /// Entries in chronological order, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<FaultLogEntry> {
        if self.len < self.capacity {
            self.entries[..self.len].to_vec()
        } else {
            let mut out = Vec::with_capacity(self.capacity);
            out.extend_from_slice(&self.entries[self.next..]);
            out.extend_from_slice(&self.entries[..self.next]);
            out
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Errors returned by engine setup operations (`init`, `enable_jit`, ...).
///
/// Distinct from [`Fault`], which is the per-step taxonomy raised by
/// `step`/`step_jit` once the VM is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The memory image's load address is not 4-byte aligned.
    UnalignedLoadAddress(u64),
    /// The memory image does not fit in guest memory at the requested
    /// load address.
    ImageTooLarge { load_address: u64, image_len: usize, memory_size: usize },
    /// `enable_jit` was called a second time.
    JitAlreadyEnabled,
    /// `enable_jit` was called before `init`.
    NotInitialized,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnalignedLoadAddress(addr) => {
                write!(f, "load address {addr:#x} is not 4-byte aligned")
            }
            Self::ImageTooLarge { load_address, image_len, memory_size } => write!(
                f,
                "image of {image_len} bytes at {load_address:#x} does not fit in {memory_size} bytes of guest memory"
            ),
            Self::JitAlreadyEnabled => write!(f, "JIT is already enabled"),
            Self::NotInitialized => write!(f, "VM has not been initialized"),
        }
    }
}

impl std::error::Error for VmError {}
