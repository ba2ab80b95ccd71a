//! [`JitContext`]: the `rv64-jit` crate's [`JitBackend`] implementation.
//! Owns the code arena, the one-time trampoline that bridges AAPCS64 Rust
//! code into a pinned-register translated block, and the host-owned
//! exit-flag cell a translated block's inline bounds-check failure writes
//! through.

use rv64_core::blockcache::{BlockCache, PendingFixups};
use rv64_core::decode::{self, OP_SYSTEM};
use rv64_core::fault::Fault;
use rv64_core::memory::GuestMemory;
use rv64_core::regs::RegisterFile;
use rv64_core::vm::{JitBackend, JitBlockOutcome, JitTranslateError};

use crate::arena::CodeArena;
use crate::emit::Emitter;
use crate::translate::translate_block;

/// ECALL's 12-bit immediate (`funct12`) encodes as `0` in `imm` once the
/// I-type sign extension runs; `OP_SYSTEM` plus `funct3 == 0` and
/// `imm == 0` is the full ECALL pattern the interpreter recognizes.
fn is_ecall(inst: &decode::DecodedInstruction) -> bool {
    inst.opcode == OP_SYSTEM && inst.funct3 == 0 && inst.imm == 0
}

/// Signature of a translated block once the trampoline has set up the
/// pinned registers: `(state_ptr, mem_ptr, exit_flag_ptr)`. The block
/// itself takes no arguments — the trampoline's `BLR` target is reached
/// with `X19`/`X20`/`X21` already loaded — but the trampoline's own
/// C-callable entry point takes these three plus the block's address so
/// it can be one fixed piece of code serving every block.
type TrampolineFn = unsafe extern "C" fn(*mut u64, *mut u8, *mut u64, *const ()) -> ();

/// The template JIT: translates guest basic blocks into the arena on
/// first encounter, and re-enters already-translated blocks directly.
pub struct JitContext {
    arena: CodeArena,
    trampoline_offset: u32,
    /// Host-owned exit-flag cell. A translated block's pinned `X21`
    /// points at this for its whole run; cleared before each entry,
    /// inspected after. `Box` gives it a stable address independent of
    /// `JitContext`'s own location.
    exit_flag: Box<u64>,
}

impl JitContext {
    pub fn new() -> Result<Self, JitTranslateError> {
        let mut arena = CodeArena::new().map_err(|_| JitTranslateError::ArenaFull)?;
        let trampoline_offset = emit_trampoline(&mut arena).map_err(|_| JitTranslateError::ArenaFull)?;
        Ok(Self { arena, trampoline_offset, exit_flag: Box::new(0) })
    }

    fn trampoline(&self) -> TrampolineFn {
        let ptr = self.arena.entry_ptr(self.trampoline_offset);
        // SAFETY: `emit_trampoline` wrote a valid AAPCS64-compliant entry
        // point at this offset and the arena is RWX for its whole life.
        unsafe { std::mem::transmute::<*const (), TrampolineFn>(ptr) }
    }
}

impl JitBackend for JitContext {
    fn run_block(
        &mut self,
        cache: &mut BlockCache,
        fixups: &mut PendingFixups,
        regs: &mut RegisterFile,
        mem: &mut GuestMemory,
    ) -> Result<JitBlockOutcome, JitTranslateError> {
        let entry_pc = regs.pc;

        // The JIT never translates a block beginning with ECALL — the
        // interpreter's ECALL bridge (SBI/syscall dispatch) has no
        // machine-code equivalent in the arena.
        if let Ok(first) = decode::decode(mem, entry_pc) {
            if is_ecall(&first) {
                return Err(JitTranslateError::EcallAtEntry);
            }
        } else {
            return Err(JitTranslateError::Undecodable);
        }

        let offset = match cache.lookup(entry_pc) {
            Some(offset) => offset,
            None => translate_block(&mut self.arena, mem, cache, fixups, entry_pc)?,
        };

        *self.exit_flag = 0;
        let entry = self.arena.entry_ptr(offset);
        let trampoline = self.trampoline();
        let state_ptr = regs.state_ptr();
        let mem_ptr = mem.base_ptr();
        let exit_ptr: *mut u64 = &mut *self.exit_flag;

        // SAFETY: `state_ptr`/`mem_ptr` point at the live `RegisterFile`/
        // `GuestMemory` borrowed for this call; the translated block and
        // the trampoline only read/write within the bounds the inlined
        // translator already checked, or write through `exit_ptr`/the
        // state's PC slot on failure.
        unsafe {
            trampoline(state_ptr, mem_ptr, exit_ptr, entry);
        }

        if *self.exit_flag != 0 {
            Ok(JitBlockOutcome::Faulted(Fault::InvalidMemoryAccess))
        } else {
            Ok(JitBlockOutcome::Completed)
        }
    }
}

/// Emit the one-time trampoline: an AAPCS64-compliant shim that loads the
/// three pinned registers from its arguments, calls the translated block
/// in `X3`, and restores its own callee-saved registers before
/// returning. Translated blocks need no prologue of their own — they
/// inherit `X19`/`X20`/`X21` already set up — and simply `RET` to come
/// back here.
fn emit_trampoline(arena: &mut CodeArena) -> Result<u32, crate::arena::ArenaError> {
    let mut e = Emitter::new(arena);
    let offset = e.arena.cursor();

    // Save callee-saved X19-X21 and our own LR (X30) on the stack before
    // clobbering them with the block's pinned state.
    e.emit_sub_imm(31, 31, 32)?; // sub sp, sp, #32 (SP is index 31 in this encoding class)
    stp_x19_x20(&mut e, 31, 0)?;
    stp_x21_x30(&mut e, 31, 16)?;

    e.emit_mov_reg(19, 0)?; // x19 = state_ptr (x0)
    e.emit_mov_reg(20, 1)?; // x20 = mem_ptr (x1)
    e.emit_mov_reg(21, 2)?; // x21 = exit_ptr (x2)
    e.emit_blr(3)?; // blr x3 (x3 = block entry)

    ldp_x19_x20(&mut e, 31, 0)?;
    ldp_x21_x30(&mut e, 31, 16)?;
    e.emit_add_imm(31, 31, 32)?; // add sp, sp, #32
    e.emit_ret()?;

    Ok(offset)
}

/// `STP Xt1, Xt2, [Xn, #imm]` (signed offset, scaled by 8) — used only by
/// the trampoline's fixed save/restore sequence, not exposed through
/// [`Emitter`] since no translated block ever needs a pair instruction.
fn stp_x19_x20(e: &mut Emitter<'_>, rn: u32, imm7_scaled: u32) -> Result<u32, crate::arena::ArenaError> {
    let imm7 = (imm7_scaled / 8) & 0x7F;
    e.arena.emit_u32(0xA900_0000 | (imm7 << 15) | (20 << 10) | (rn << 5) | 19)
}

fn stp_x21_x30(e: &mut Emitter<'_>, rn: u32, imm7_scaled: u32) -> Result<u32, crate::arena::ArenaError> {
    let imm7 = (imm7_scaled / 8) & 0x7F;
    e.arena.emit_u32(0xA900_0000 | (imm7 << 15) | (30 << 10) | (rn << 5) | 21)
}

fn ldp_x19_x20(e: &mut Emitter<'_>, rn: u32, imm7_scaled: u32) -> Result<u32, crate::arena::ArenaError> {
    let imm7 = (imm7_scaled / 8) & 0x7F;
    e.arena.emit_u32(0xA940_0000 | (imm7 << 15) | (20 << 10) | (rn << 5) | 19)
}

fn ldp_x21_x30(e: &mut Emitter<'_>, rn: u32, imm7_scaled: u32) -> Result<u32, crate::arena::ArenaError> {
    let imm7 = (imm7_scaled / 8) & 0x7F;
    e.arena.emit_u32(0xA940_0000 | (imm7 << 15) | (30 << 10) | (rn << 5) | 21)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv64_core::memory::{DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE};

    #[test]
    fn ecall_at_entry_is_rejected_before_translation() {
        let mut ctx = JitContext::new().unwrap();
        let mut cache = BlockCache::new();
        let mut fixups = PendingFixups::new();
        let mut regs = RegisterFile::new();
        let mut mem = GuestMemory::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
        mem.write32(0, 0x0000_0073).unwrap(); // ecall
        regs.pc = 0;

        let err = ctx.run_block(&mut cache, &mut fixups, &mut regs, &mut mem).unwrap_err();
        assert_eq!(err, JitTranslateError::EcallAtEntry);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn simple_addi_block_runs_and_advances_pc() {
        let mut ctx = JitContext::new().unwrap();
        let mut cache = BlockCache::new();
        let mut fixups = PendingFixups::new();
        let mut regs = RegisterFile::new();
        let mut mem = GuestMemory::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
        // addi x5, x0, 7; ecall (block ends at the ecall without
        // translating it — BailBeforeThis at the second instruction).
        mem.write32(0, 0x0070_0293).unwrap();
        mem.write32(4, 0x0000_0073).unwrap();
        regs.pc = 0;

        let outcome = ctx.run_block(&mut cache, &mut fixups, &mut regs, &mut mem).unwrap();
        assert_eq!(outcome, JitBlockOutcome::Completed);
        assert_eq!(regs.get(5), 7);
        assert_eq!(regs.pc, 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn out_of_bounds_store_reports_fault_with_resume_pc() {
        let mut ctx = JitContext::new().unwrap();
        let mut cache = BlockCache::new();
        let mut fixups = PendingFixups::new();
        let mut regs = RegisterFile::new();
        let mut mem = GuestMemory::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
        // lui x5, 0xfffff (x5 = 0xffff_f000, far outside every window)
        // sw x0, 0(x5)
        mem.write32(0, 0xFFFF_F2B7).unwrap();
        mem.write32(4, 0x0002_A023).unwrap();
        regs.pc = 0;

        let outcome = ctx.run_block(&mut cache, &mut fixups, &mut regs, &mut mem).unwrap();
        assert_eq!(outcome, JitBlockOutcome::Faulted(Fault::InvalidMemoryAccess));
        assert_eq!(regs.pc, 4);
    }

    #[test]
    fn second_call_reuses_cached_block() {
        let mut ctx = JitContext::new().unwrap();
        let mut cache = BlockCache::new();
        let mut fixups = PendingFixups::new();
        let mut regs = RegisterFile::new();
        let mut mem = GuestMemory::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
        mem.write32(0, 0x0070_0293).unwrap();
        mem.write32(4, 0x0000_0073).unwrap();
        regs.pc = 0;

        ctx.run_block(&mut cache, &mut fixups, &mut regs, &mut mem).unwrap();
        regs.pc = 0;
        regs.set(5, 0);
        ctx.run_block(&mut cache, &mut fixups, &mut regs, &mut mem).unwrap();
        assert_eq!(regs.get(5), 7);
        assert_eq!(cache.len(), 1);
    }
}
