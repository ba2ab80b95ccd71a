//! Cross-cutting JIT scenarios run against the public crate surface:
//! the interpreter and the JIT must agree on architectural state for the
//! same guest program, and a forward branch to a not-yet-translated
//! target leaves an inspectable pending fixup that resolves once that
//! target is translated.

use rv64_core::memory::{DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE};
use rv64_core::{BlockCache, PendingFixups, Vm, VmState};
use rv64_jit::arena::CodeArena;
use rv64_jit::translate::translate_block;
use rv64_jit::JitContext;

fn asm_addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (rd << 7) | 0x13
}

fn asm_add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    (rs2 << 20) | (rs1 << 15) | (rd << 7) | 0x33
}

fn asm_bne(rs1: u32, rs2: u32, imm: i32) -> u32 {
    let b12 = ((imm >> 12) & 1) as u32;
    let b11 = ((imm >> 11) & 1) as u32;
    let b10_5 = ((imm >> 5) & 0x3F) as u32;
    let b4_1 = ((imm >> 1) & 0xF) as u32;
    (b12 << 31) | (b10_5 << 25) | (rs2 << 20) | (rs1 << 15) | (0b001 << 12) | (b4_1 << 8) | (b11 << 7) | 0x63
}

fn asm_jal(rd: u32, imm: i32) -> u32 {
    let b20 = ((imm >> 20) & 1) as u32;
    let b19_12 = ((imm >> 12) & 0xFF) as u32;
    let b11 = ((imm >> 11) & 1) as u32;
    let b10_1 = ((imm >> 1) & 0x3FF) as u32;
    (b20 << 31) | (b10_1 << 21) | (b11 << 20) | (b19_12 << 12) | (rd << 7) | 0x6F
}

const ECALL: u32 = 0x0000_0073;

/// Summation loop whose loop body is one self-contained block: a
/// conditional backward branch to the block's own entry never leaves an
/// unresolved fixup (the entry's cache slot is reserved before the block
/// is translated), so it is safe to run immediately under the JIT. The
/// prologue that seeds `a0`/`a1` runs on the interpreter first.
fn write_loop_program(vm: &mut Vm) {
    let prog = [
        asm_addi(10, 0, 0),   // pc=0: li a0, 0
        asm_addi(11, 0, 10),  // pc=4: li a1, 10
        asm_add(10, 10, 11),  // pc=8: loop head: add a0, a0, a1
        asm_addi(11, 11, -1), // pc=12: addi a1, a1, -1
        asm_bne(11, 0, -8),   // pc=16: bne a1, x0, loop head
        asm_addi(17, 0, 2),   // pc=20: li a7, 2 (exit)
        ECALL,                // pc=24
    ];
    for (i, word) in prog.iter().enumerate() {
        vm.memory_mut().write32((i as u64) * 4, *word).unwrap();
    }
}

#[test]
fn jit_and_interpreter_agree_on_summation_result() {
    let mut interpreted = Vm::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
    interpreted.init(None, 0).unwrap();
    write_loop_program(&mut interpreted);
    interpreted.start();
    for _ in 0..256 {
        if interpreted.state() != VmState::Running {
            break;
        }
        interpreted.step().unwrap();
    }

    let mut jitted = Vm::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);
    jitted.init(None, 0).unwrap();
    write_loop_program(&mut jitted);
    jitted.enable_jit(Box::new(JitContext::new().unwrap())).unwrap();
    jitted.start();

    // Seed a0/a1 on the interpreter so the JIT only ever translates the
    // self-contained loop block, then hand off to step_jit.
    jitted.step().unwrap();
    jitted.step().unwrap();
    assert_eq!(jitted.regs().pc, 8);

    for _ in 0..256 {
        if jitted.state() != VmState::Running {
            break;
        }
        jitted.step_jit().unwrap();
    }

    assert_eq!(interpreted.state(), VmState::Halted);
    assert_eq!(jitted.state(), VmState::Halted);
    assert_eq!(interpreted.regs().get(10), 55);
    assert_eq!(jitted.regs().get(10), interpreted.regs().get(10));
    assert_eq!(jitted.block_cache_len(), 1, "loop body should translate as a single block");
}

/// A forward, unconditional JAL to a target that has not been translated
/// yet registers exactly one pending fixup; translating that target
/// later drains it and patches the branch to the target's arena offset.
#[test]
fn forward_jal_leaves_inspectable_fixup_until_target_translates() {
    let mut arena = CodeArena::new().unwrap();
    let mut cache = BlockCache::new();
    let mut fixups = PendingFixups::new();
    let mut mem = rv64_core::memory::GuestMemory::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE);

    mem.write32(0x0, asm_jal(0, 0x40)).unwrap();
    translate_block(&mut arena, &mem, &mut cache, &mut fixups, 0x0).unwrap();
    assert_eq!(fixups.pending_count(), 1);
    assert_eq!(cache.len(), 1, "the entry block itself is already cached");

    mem.write32(0x40, asm_addi(1, 0, 1)).unwrap();
    let target_offset = translate_block(&mut arena, &mem, &mut cache, &mut fixups, 0x40).unwrap();

    assert_eq!(fixups.pending_count(), 0, "translating the target drains its waiting fixups");
    assert_eq!(cache.lookup(0x40), Some(target_offset));
}
