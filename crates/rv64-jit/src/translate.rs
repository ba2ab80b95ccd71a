//! Per-block translator: walks guest instructions from a block's entry
//! PC, emitting AArch64 host code for each, until a JAL, a JALR, the
//! instruction cap, or an interior ECALL/undecodable instruction ends
//! the block.
//!
//! Block discipline: `JAL`/`JALR` and the instruction cap
//! always end a block; conditional branches do not — both `JAL` and a
//! taken conditional branch are inlined as a direct AArch64 branch into
//! the target block's arena offset, resolved immediately if the target
//! is already cached or left as a pending [`FixupRecord`] otherwise (see
//! the forward-fixup protocol below); a not-taken conditional branch
//! falls through to the next guest instruction's translated code in the
//! same host code stream. Guest PC is therefore not written on every
//! instruction, only at a block's true exit points (`JALR`, the
//! instruction cap, or a bail).
//!
//! Because a taken branch jumps directly into another block's machine
//! code rather than returning to the trampoline, one call into the
//! arena can run an entire guest loop — the trampoline is only
//! re-entered when a chain of directly-linked blocks finally reaches a
//! `JALR`, the instruction cap, or a block it cannot safely inline.

use rv64_core::blockcache::{BlockCache, FixupRecord, PendingFixups};
use rv64_core::decode::{self, DecodedInstruction, OP_AUIPC, OP_BRANCH, OP_IMM, OP_JAL, OP_JALR,
    OP_LOAD, OP_LUI, OP_REG, OP_STORE, OP_SYSTEM};
use rv64_core::memory::{FRAMEBUFFER_BASE, KERNEL_BASE};
use rv64_core::regs::RegisterFile;

use rv64_core::vm::JitTranslateError;

use crate::arena::{ArenaError, CodeArena};
use crate::emit::{patch_b, patch_b_cond, Cond, Emitter, XZR};

/// A block never grows past this many guest instructions even if it
/// never hits a control transfer.
const MAX_BLOCK_INSTRUCTIONS: u32 = 100;

// Pinned host registers, live for the whole translated block.
const STATE: u32 = 19;
const MEM: u32 = 20;
const EXIT: u32 = 21;

// Scratch pool. None of these survive past the instruction that uses
// them, except where a helper explicitly documents otherwise.
const T0: u32 = 9;
const T1: u32 = 10;
const T2: u32 = 11;
const T3: u32 = 12;
const T4: u32 = 13;
const T5: u32 = 14;
const T6: u32 = 15;

const PC_OFFSET: u32 = RegisterFile::PC_OFFSET as u32;

fn gpr_offset(idx: u8) -> u32 {
    u32::from(idx) * 8
}

impl From<ArenaError> for JitTranslateError {
    fn from(_: ArenaError) -> Self {
        JitTranslateError::ArenaFull
    }
}

enum InstrOutcome {
    /// Ordinary instruction translated; keep decoding at `next_pc`.
    Continue { next_pc: u64 },
    /// `JAL` (a direct or fixed-up branch to its target) or `JALR` (a
    /// PC-write followed by `RET` to the trampoline) has been emitted —
    /// the block is done.
    Terminated,
    /// This instruction cannot be safely inlined (a statically-known
    /// misaligned branch/JAL target, or an opcode/funct combination the
    /// interpreter would reject). The block must end *before* it so the
    /// interpreter re-decodes and raises the real fault.
    BailBeforeThis,
}

/// Translate the block at `entry_pc`, registering it in `cache` and
/// patching any fixups left by earlier blocks that branch to it.
/// Returns the arena offset of the block's entry point.
pub fn translate_block(
    arena: &mut CodeArena,
    mem: &rv64_core::memory::GuestMemory,
    cache: &mut BlockCache,
    fixups: &mut PendingFixups,
    entry_pc: u64,
) -> Result<u32, JitTranslateError> {
    let entry_offset = arena.cursor();
    let ctx = InstrCtx {
        mem_size: mem.memory_size() as u64,
        fb_size: mem.framebuffer_size() as u64,
    };

    // Reserve the offset and drain any fixups already waiting on this PC
    // before emitting a single instruction: a branch earlier in the
    // arena that targets this entry patches against `entry_offset` here,
    // and a branch inside *this* block that targets its own entry (a
    // tight loop) resolves through `cache.lookup` below instead of
    // falling back to a fixup at all.
    cache.insert(entry_pc, entry_offset);
    for rec in fixups.take(entry_pc) {
        patch_fixup(arena, rec, entry_offset);
    }

    let mut pc = entry_pc;
    let mut index = 0u32;
    loop {
        if index >= MAX_BLOCK_INSTRUCTIONS {
            emit_terminal(arena, pc)?;
            break;
        }
        let decoded = match decode::decode(mem, pc) {
            Ok(d) => d,
            Err(_) => {
                if index == 0 {
                    return Err(JitTranslateError::Undecodable);
                }
                emit_terminal(arena, pc)?;
                break;
            }
        };
        match translate_instruction(arena, cache, fixups, pc, decoded, &ctx)? {
            InstrOutcome::Continue { next_pc } => {
                pc = next_pc;
                index += 1;
            }
            InstrOutcome::Terminated => break,
            InstrOutcome::BailBeforeThis => {
                if index == 0 {
                    return Err(JitTranslateError::Undecodable);
                }
                emit_terminal(arena, pc)?;
                break;
            }
        }
    }

    Ok(entry_offset)
}

/// Emit a branch (unconditional `B`, or `B.cond` when `cond` is `Some`)
/// to `target_pc`: a direct, already-resolved jump if `target_pc` is in
/// `cache`, otherwise a zero-displacement placeholder plus a
/// [`FixupRecord`] that `translate_block` patches the next time
/// `target_pc` is itself translated.
fn branch_to_target(
    e: &mut Emitter<'_>,
    cache: &BlockCache,
    fixups: &mut PendingFixups,
    target_pc: u64,
    cond: Option<Cond>,
) -> Result<(), ArenaError> {
    let site = match cond {
        Some(c) => e.emit_b_cond_placeholder(c)?,
        None => e.emit_b_placeholder()?,
    };
    let record = FixupRecord { branch_site: site, conditional: cond.is_some() };
    match cache.lookup(target_pc) {
        Some(target_offset) => patch_fixup(e.arena, record, target_offset),
        None => fixups.register(target_pc, record),
    }
    Ok(())
}

fn patch_fixup(arena: &mut CodeArena, rec: FixupRecord, target: u32) {
    if rec.conditional {
        patch_b_cond(arena, rec.branch_site, target);
    } else {
        patch_b(arena, rec.branch_site, target);
    }
}

struct InstrCtx {
    mem_size: u64,
    fb_size: u64,
}

/// Write the resume PC for a block that ends without a control transfer
/// (instruction cap, interior ECALL, or an undecodable/un-JIT-able
/// instruction) and return to the trampoline.
fn emit_terminal(arena: &mut CodeArena, resume_pc: u64) -> Result<(), ArenaError> {
    let mut e = Emitter::new(arena);
    e.emit_mov_u64(T0, resume_pc)?;
    e.emit_str_to_state(T0, STATE, PC_OFFSET)?;
    e.emit_ret()?;
    Ok(())
}

/// Write `1` to the block-exit flag and the faulting PC to guest state,
/// then return. Reached only from the inlined bounds check in
/// [`translate_address`]; never falls through.
fn emit_inline_fail(arena: &mut CodeArena, insn_pc: u64) -> Result<(), ArenaError> {
    let mut e = Emitter::new(arena);
    e.emit_mov_u64(T0, insn_pc)?;
    e.emit_str_to_state(T0, STATE, PC_OFFSET)?;
    e.emit_movz(T0, 1, 0)?;
    e.emit_str_to_state(T0, EXIT, 0)?;
    e.emit_ret()?;
    Ok(())
}

fn translate_instruction(
    arena: &mut CodeArena,
    cache: &mut BlockCache,
    fixups: &mut PendingFixups,
    pc: u64,
    inst: DecodedInstruction,
    ctx: &InstrCtx,
) -> Result<InstrOutcome, JitTranslateError> {
    let next_pc = pc.wrapping_add(u64::from(inst.len));

    match inst.opcode {
        OP_LUI => {
            let value = i64::from(inst.imm) as u64;
            let mut e = Emitter::new(arena);
            e.emit_mov_u64(T0, value)?;
            store_gpr(&mut e, inst.rd, T0)?;
            Ok(InstrOutcome::Continue { next_pc })
        }
        OP_AUIPC => {
            let value = pc.wrapping_add(i64::from(inst.imm) as u64);
            let mut e = Emitter::new(arena);
            e.emit_mov_u64(T0, value)?;
            store_gpr(&mut e, inst.rd, T0)?;
            Ok(InstrOutcome::Continue { next_pc })
        }
        OP_JAL => {
            let target = pc.wrapping_add(i64::from(inst.imm) as u64) & !1;
            if target % 4 != 0 {
                return Ok(InstrOutcome::BailBeforeThis);
            }
            let mut e = Emitter::new(arena);
            if inst.rd != 0 {
                e.emit_mov_u64(T0, next_pc)?;
                store_gpr(&mut e, inst.rd, T0)?;
            }
            branch_to_target(&mut e, cache, fixups, target, None)?;
            Ok(InstrOutcome::Terminated)
        }
        OP_JALR => {
            let mut e = Emitter::new(arena);
            load_gpr(&mut e, T0, inst.rs1)?;
            e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
            e.emit_add(T2, T0, T1)?;
            e.emit_mov_u64(T3, !0b11u64)?;
            e.emit_and(T2, T2, T3)?;
            if inst.rd != 0 {
                e.emit_mov_u64(T0, next_pc)?;
                store_gpr(&mut e, inst.rd, T0)?;
            }
            e.emit_str_to_state(T2, STATE, PC_OFFSET)?;
            e.emit_ret()?;
            Ok(InstrOutcome::Terminated)
        }
        OP_BRANCH => {
            let target = pc.wrapping_add(i64::from(inst.imm) as u64);
            if target % 4 != 0 {
                return Ok(InstrOutcome::BailBeforeThis);
            }
            let Some(cond) = branch_cond(inst.funct3) else {
                return Ok(InstrOutcome::BailBeforeThis);
            };
            let mut e = Emitter::new(arena);
            load_gpr(&mut e, T0, inst.rs1)?;
            load_gpr(&mut e, T1, inst.rs2)?;
            e.emit_subs(T2, T0, T1)?;
            branch_to_target(&mut e, cache, fixups, target, Some(cond))?;
            Ok(InstrOutcome::Continue { next_pc })
        }
        OP_LOAD => {
            let width = match inst.funct3 {
                0b000 | 0b100 => 1,
                0b001 | 0b101 => 2,
                0b010 | 0b110 => 4,
                0b011 => 8,
                _ => return Ok(InstrOutcome::BailBeforeThis),
            };
            let signed = matches!(inst.funct3, 0b000 | 0b001 | 0b010);
            let size = width_to_size(width);

            let mut e = Emitter::new(arena);
            load_gpr(&mut e, T0, inst.rs1)?;
            e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
            e.emit_add(T0, T0, T1)?;
            let phys = translate_address(&mut e, T0, width, pc, ctx)?;
            e.emit_ldr_reg(T0, MEM, phys, size)?;
            if signed && width < 8 {
                let shift = 64 - width * 8;
                e.emit_lsl_i(T0, T0, shift)?;
                e.emit_asr_i(T0, T0, shift)?;
            }
            store_gpr(&mut e, inst.rd, T0)?;
            Ok(InstrOutcome::Continue { next_pc })
        }
        OP_STORE => {
            let width = match inst.funct3 {
                0b000 => 1,
                0b001 => 2,
                0b010 => 4,
                0b011 => 8,
                _ => return Ok(InstrOutcome::BailBeforeThis),
            };
            let size = width_to_size(width);

            let mut e = Emitter::new(arena);
            load_gpr(&mut e, T6, inst.rs2)?;
            load_gpr(&mut e, T0, inst.rs1)?;
            e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
            e.emit_add(T0, T0, T1)?;
            let phys = translate_address(&mut e, T0, width, pc, ctx)?;
            e.emit_str_reg(T6, MEM, phys, size)?;
            Ok(InstrOutcome::Continue { next_pc })
        }
        OP_IMM => {
            let mut e = Emitter::new(arena);
            load_gpr(&mut e, T0, inst.rs1)?;
            let shamt = (inst.imm as u32) & 0x3F;
            match inst.funct3 {
                0b000 => {
                    e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
                    e.emit_add(T0, T0, T1)?;
                }
                0b010 => {
                    e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
                    e.emit_subs(T2, T0, T1)?;
                    e.emit_cset(T0, Cond::Lt)?;
                }
                0b011 => {
                    e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
                    e.emit_subs(T2, T0, T1)?;
                    e.emit_cset(T0, Cond::Lo)?;
                }
                0b100 => {
                    e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
                    e.emit_eor(T0, T0, T1)?;
                }
                0b110 => {
                    e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
                    e.emit_orr(T0, T0, T1)?;
                }
                0b111 => {
                    e.emit_mov_u64(T1, i64::from(inst.imm) as u64)?;
                    e.emit_and(T0, T0, T1)?;
                }
                0b001 => {
                    e.emit_lsl_i(T0, T0, shamt)?;
                }
                0b101 => {
                    if inst.funct7 & 0x20 != 0 {
                        e.emit_asr_i(T0, T0, shamt)?;
                    } else {
                        e.emit_lsr_i(T0, T0, shamt)?;
                    }
                }
                _ => unreachable!("funct3 is 3 bits, all 8 values handled"),
            }
            store_gpr(&mut e, inst.rd, T0)?;
            Ok(InstrOutcome::Continue { next_pc })
        }
        OP_REG => {
            // Classify before emitting anything: an unrecognized
            // funct3/funct7 pair must bail without having already
            // written this instruction's operand loads into the arena.
            if reg_op_is_valid(inst.funct3, inst.funct7).is_none() {
                return Ok(InstrOutcome::BailBeforeThis);
            }
            let mut e = Emitter::new(arena);
            load_gpr(&mut e, T0, inst.rs1)?;
            load_gpr(&mut e, T1, inst.rs2)?;
            match (inst.funct3, inst.funct7) {
                (0b000, 0x00) => e.emit_add(T0, T0, T1).map(|_| ())?,
                (0b000, 0x20) => e.emit_sub(T0, T0, T1).map(|_| ())?,
                (0b001, 0x00) => e.emit_lsl_v(T0, T0, T1).map(|_| ())?,
                (0b010, 0x00) => {
                    e.emit_subs(T2, T0, T1)?;
                    e.emit_cset(T0, Cond::Lt)?;
                }
                (0b011, 0x00) => {
                    e.emit_subs(T2, T0, T1)?;
                    e.emit_cset(T0, Cond::Lo)?;
                }
                (0b100, 0x00) => e.emit_eor(T0, T0, T1).map(|_| ())?,
                (0b101, 0x00) => e.emit_lsr_v(T0, T0, T1).map(|_| ())?,
                (0b101, 0x20) => e.emit_asr_v(T0, T0, T1).map(|_| ())?,
                (0b110, 0x00) => e.emit_orr(T0, T0, T1).map(|_| ())?,
                (0b111, 0x00) => e.emit_and(T0, T0, T1).map(|_| ())?,
                _ => unreachable!("validated by reg_op_is_valid above"),
            }
            store_gpr(&mut e, inst.rd, T0)?;
            Ok(InstrOutcome::Continue { next_pc })
        }
        OP_SYSTEM => {
            // Only ECALL is meaningful and it never appears mid-block
            // (index 0 is filtered by the caller before translation
            // starts) — bail so the block ends here and the interpreter
            // re-decodes it, whether it's really an ECALL or the
            // anything-else the interpreter rejects.
            Ok(InstrOutcome::BailBeforeThis)
        }
        _ => Ok(InstrOutcome::BailBeforeThis),
    }
}

/// `Some(())` for every `(funct3, funct7)` pair the `OP_REG` codegen
/// above handles, `None` for anything the interpreter would reject.
fn reg_op_is_valid(funct3: u8, funct7: u8) -> Option<()> {
    matches!(
        (funct3, funct7),
        (0b000, 0x00)
            | (0b000, 0x20)
            | (0b001, 0x00)
            | (0b010, 0x00)
            | (0b011, 0x00)
            | (0b100, 0x00)
            | (0b101, 0x00)
            | (0b101, 0x20)
            | (0b110, 0x00)
            | (0b111, 0x00)
    )
    .then_some(())
}

fn branch_cond(funct3: u8) -> Option<Cond> {
    Some(match funct3 {
        0b000 => Cond::Eq,
        0b001 => Cond::Ne,
        0b100 => Cond::Lt,
        0b101 => Cond::Ge,
        0b110 => Cond::Lo,
        0b111 => Cond::Hs,
        _ => return None,
    })
}

fn width_to_size(width: u32) -> u32 {
    match width {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => unreachable!("memory access width is always 1, 2, 4, or 8"),
    }
}

fn load_gpr(e: &mut Emitter<'_>, dst: u32, idx: u8) -> Result<(), ArenaError> {
    if idx == 0 {
        e.emit_eor(dst, XZR, XZR)?;
    } else {
        e.emit_ldr_from_state(dst, STATE, gpr_offset(idx))?;
    }
    Ok(())
}

fn store_gpr(e: &mut Emitter<'_>, idx: u8, src: u32) -> Result<(), ArenaError> {
    if idx != 0 {
        e.emit_str_to_state(src, STATE, gpr_offset(idx))?;
    }
    Ok(())
}

/// Inline the three-window address translation (framebuffer, kernel,
/// identity; same precedence as [`rv64_core::memory::GuestMemory`]'s
/// interpreter-side translator) plus a bounds check against `width` —
/// the safety improvement over an unchecked translation noted in
/// `DESIGN.md`. `addr_reg` is read but not clobbered; the physical
/// offset is returned in [`T2`]. On an out-of-window address, emits an
/// inline fail stub (sets the exit flag and guest PC, returns) rather
/// than returning to the caller.
fn translate_address(
    e: &mut Emitter<'_>,
    addr_reg: u32,
    width: u32,
    insn_pc: u64,
    ctx: &InstrCtx,
) -> Result<u32, ArenaError> {
    e.emit_add_imm(T5, addr_reg, width)?; // T5 = addr + width

    // --- framebuffer window ---
    e.emit_mov_u64(T1, FRAMEBUFFER_BASE)?;
    e.emit_subs(T3, addr_reg, T1)?; // T3 = addr - fb_start
    let skip_fb_lo = e.emit_b_cond_placeholder(Cond::Lo)?;
    e.emit_mov_u64(T1, FRAMEBUFFER_BASE + ctx.fb_size)?;
    e.emit_subs(T4, T5, T1)?; // T4 = end - fb_end
    let skip_fb_hi = e.emit_b_cond_placeholder(Cond::Hi)?;
    e.emit_mov_u64(T1, ctx.mem_size - ctx.fb_size)?;
    e.emit_add(T2, T1, T3)?; // phys = (mem_size - fb_size) + (addr - fb_start)
    let done_fb = e.emit_b_placeholder()?;
    let after_fb = e.arena.cursor();
    patch_b_cond(e.arena, skip_fb_lo, after_fb);
    patch_b_cond(e.arena, skip_fb_hi, after_fb);

    // --- kernel window ---
    e.emit_mov_u64(T1, KERNEL_BASE)?;
    e.emit_subs(T3, addr_reg, T1)?;
    let skip_k_lo = e.emit_b_cond_placeholder(Cond::Lo)?;
    e.emit_mov_u64(T1, KERNEL_BASE + ctx.mem_size)?;
    e.emit_subs(T4, T5, T1)?;
    let skip_k_hi = e.emit_b_cond_placeholder(Cond::Hi)?;
    e.emit_mov_reg(T2, T3)?; // phys = addr - kernel_start
    let done_k = e.emit_b_placeholder()?;
    let after_k = e.arena.cursor();
    patch_b_cond(e.arena, skip_k_lo, after_k);
    patch_b_cond(e.arena, skip_k_hi, after_k);

    // --- identity window ---
    e.emit_mov_u64(T1, ctx.mem_size)?;
    e.emit_subs(T4, T5, T1)?;
    let fail_site = e.emit_b_cond_placeholder(Cond::Hi)?; // end > mem_size -> fail
    e.emit_mov_reg(T2, addr_reg)?;
    let done_id = e.emit_b_placeholder()?;

    let fail_start = e.arena.cursor();
    patch_b_cond(e.arena, fail_site, fail_start);
    emit_inline_fail(e.arena, insn_pc)?;

    let bounds_done = e.arena.cursor();
    patch_b(e.arena, done_fb, bounds_done);
    patch_b(e.arena, done_k, bounds_done);
    patch_b(e.arena, done_id, bounds_done);

    Ok(T2)
}
