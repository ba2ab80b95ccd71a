//! RV64I interpreter: fetch, decode, execute, writeback for a single
//! instruction.
//!
//! This is the reference execution path. The JIT (when enabled) competes
//! with it block-by-block but must always be observationally equivalent:
//! the same register and memory state after any given guest instruction
//! count, fault for fault.

use crate::decode::{self, DecodedInstruction, OP_AUIPC, OP_BRANCH, OP_IMM, OP_JAL, OP_JALR,
    OP_LOAD, OP_LUI, OP_REG, OP_STORE, OP_SYSTEM};
use crate::fault::Fault;
use crate::memory::GuestMemory;
use crate::regs::RegisterFile;

/// Outcome of a single `step`. `Ecall` surfaces the pending environment
/// call so the caller (the `Vm`) can dispatch it; everything else is
/// handled entirely within `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One instruction retired normally.
    Retired,
    /// An ECALL was decoded; registers are updated per the interpreter's
    /// PC-advance policy and the syscall number/arguments are in
    /// `a7`/`a0..a6` as usual.
    Ecall,
}

/// Execute exactly one instruction at `regs.pc`, mutating `regs` and
/// `mem` in place.
///
/// PC-advance policy: instructions that do not alter control flow advance
/// PC by their own length (2 or 4). Taken branches, JAL, and JALR set PC
/// to the computed target directly. A fault leaves `regs.pc` exactly at
/// the faulting instruction.
pub fn step(regs: &mut RegisterFile, mem: &mut GuestMemory) -> Result<StepOutcome, Fault> {
    let pc = regs.pc;
    let inst = decode::decode(mem, pc)?;
    execute(regs, mem, pc, inst)
}

fn execute(
    regs: &mut RegisterFile,
    mem: &mut GuestMemory,
    pc: u64,
    inst: DecodedInstruction,
) -> Result<StepOutcome, Fault> {
    let next_pc = pc.wrapping_add(u64::from(inst.len));

    match inst.opcode {
        OP_LUI => {
            regs.set(inst.rd as usize, i64::from(inst.imm) as u64);
            regs.pc = next_pc;
            Ok(StepOutcome::Retired)
        }
        OP_AUIPC => {
            regs.set(inst.rd as usize, pc.wrapping_add(i64::from(inst.imm) as u64));
            regs.pc = next_pc;
            Ok(StepOutcome::Retired)
        }
        OP_JAL => {
            let target = pc.wrapping_add(i64::from(inst.imm) as u64) & !1;
            if target % 4 != 0 {
                return Err(Fault::UnalignedInstruction);
            }
            regs.set(inst.rd as usize, next_pc);
            regs.pc = target;
            Ok(StepOutcome::Retired)
        }
        OP_JALR => {
            let base = regs.get(inst.rs1 as usize);
            let target = (base.wrapping_add(i64::from(inst.imm) as u64) & !1) & !0b11;
            regs.set(inst.rd as usize, next_pc);
            regs.pc = target;
            Ok(StepOutcome::Retired)
        }
        OP_BRANCH => {
            let taken = branch_taken(regs, inst)?;
            if taken {
                let target = pc.wrapping_add(i64::from(inst.imm) as u64);
                if target % 4 != 0 {
                    return Err(Fault::UnalignedInstruction);
                }
                regs.pc = target;
            } else {
                regs.pc = next_pc;
            }
            Ok(StepOutcome::Retired)
        }
        OP_LOAD => {
            let addr = regs.get(inst.rs1 as usize).wrapping_add(i64::from(inst.imm) as u64);
            let value = load(mem, inst.funct3, addr)?;
            regs.set(inst.rd as usize, value);
            regs.pc = next_pc;
            Ok(StepOutcome::Retired)
        }
        OP_STORE => {
            let addr = regs.get(inst.rs1 as usize).wrapping_add(i64::from(inst.imm) as u64);
            let value = regs.get(inst.rs2 as usize);
            store(mem, inst.funct3, addr, value)?;
            regs.pc = next_pc;
            Ok(StepOutcome::Retired)
        }
        OP_IMM => {
            let result = alu_imm(regs, inst)?;
            regs.set(inst.rd as usize, result);
            regs.pc = next_pc;
            Ok(StepOutcome::Retired)
        }
        OP_REG => {
            let result = alu_reg(regs, inst)?;
            regs.set(inst.rd as usize, result);
            regs.pc = next_pc;
            Ok(StepOutcome::Retired)
        }
        OP_SYSTEM => {
            // Only ECALL (funct3=0, imm=0, rd=0, rs1=0) is implemented.
            if inst.funct3 != 0 || inst.imm != 0 {
                return Err(Fault::InvalidInstruction);
            }
            regs.pc = next_pc;
            Ok(StepOutcome::Ecall)
        }
        _ => Err(Fault::InvalidInstruction),
    }
}

fn branch_taken(regs: &RegisterFile, inst: DecodedInstruction) -> Result<bool, Fault> {
    let a = regs.get(inst.rs1 as usize);
    let b = regs.get(inst.rs2 as usize);
    Ok(match inst.funct3 {
        0b000 => a == b,                       // BEQ
        0b001 => a != b,                       // BNE
        0b100 => (a as i64) < (b as i64),      // BLT
        0b101 => (a as i64) >= (b as i64),     // BGE
        0b110 => a < b,                        // BLTU
        0b111 => a >= b,                       // BGEU
        _ => return Err(Fault::InvalidInstruction),
    })
}

fn load(mem: &GuestMemory, funct3: u8, addr: u64) -> Result<u64, Fault> {
    Ok(match funct3 {
        0b000 => i64::from(mem.read8(addr)? as i8) as u64,    // LB
        0b001 => i64::from(mem.read16(addr)? as i16) as u64,  // LH
        0b010 => i64::from(mem.read32(addr)? as i32) as u64,  // LW
        0b011 => mem.read64(addr)?,                           // LD
        0b100 => u64::from(mem.read8(addr)?),                 // LBU
        0b101 => u64::from(mem.read16(addr)?),                // LHU
        0b110 => u64::from(mem.read32(addr)?),                // LWU
        _ => return Err(Fault::InvalidInstruction),
    })
}

fn store(mem: &mut GuestMemory, funct3: u8, addr: u64, value: u64) -> Result<(), Fault> {
    match funct3 {
        0b000 => mem.write8(addr, value as u8),
        0b001 => mem.write16(addr, value as u16),
        0b010 => mem.write32(addr, value as u32),
        0b011 => mem.write64(addr, value),
        _ => Err(Fault::InvalidInstruction),
    }
}

fn alu_imm(regs: &RegisterFile, inst: DecodedInstruction) -> Result<u64, Fault> {
    let a = regs.get(inst.rs1 as usize);
    let imm = i64::from(inst.imm) as u64;
    Ok(match inst.funct3 {
        0b000 => a.wrapping_add(imm),          // ADDI
        0b010 => u64::from((a as i64) < (inst.imm as i64)), // SLTI
        0b011 => u64::from(a < imm),           // SLTIU
        0b100 => a ^ imm,                      // XORI
        0b110 => a | imm,                      // ORI
        0b111 => a & imm,                      // ANDI
        0b001 => a << (inst.imm as u32 & 0x3F), // SLLI
        0b101 => {
            let shamt = (inst.imm as u32) & 0x3F;
            if inst.funct7 & 0x20 != 0 {
                ((a as i64) >> shamt) as u64   // SRAI
            } else {
                a >> shamt                     // SRLI
            }
        }
        _ => return Err(Fault::InvalidInstruction),
    })
}

fn alu_reg(regs: &RegisterFile, inst: DecodedInstruction) -> Result<u64, Fault> {
    let a = regs.get(inst.rs1 as usize);
    let b = regs.get(inst.rs2 as usize);
    Ok(match (inst.funct3, inst.funct7) {
        (0b000, 0x00) => a.wrapping_add(b),              // ADD
        (0b000, 0x20) => a.wrapping_sub(b),              // SUB
        (0b001, 0x00) => a << (b & 0x3F),                // SLL
        (0b010, 0x00) => u64::from((a as i64) < (b as i64)), // SLT
        (0b011, 0x00) => u64::from(a < b),               // SLTU
        (0b100, 0x00) => a ^ b,                          // XOR
        (0b101, 0x00) => a >> (b & 0x3F),                // SRL
        (0b101, 0x20) => ((a as i64) >> (b & 0x3F)) as u64, // SRA
        (0b110, 0x00) => a | b,                          // OR
        (0b111, 0x00) => a & b,                          // AND
        _ => return Err(Fault::InvalidInstruction),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE};

    fn harness() -> (RegisterFile, GuestMemory) {
        (RegisterFile::new(), GuestMemory::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE))
    }

    fn asm_addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (0 << 12) | (rd << 7) | 0x13
    }

    #[test]
    fn addi_writes_register_and_advances_pc() {
        let (mut regs, mut mem) = harness();
        mem.write32(0, asm_addi(1, 0, 41)).unwrap();
        let outcome = step(&mut regs, &mut mem).unwrap();
        assert_eq!(outcome, StepOutcome::Retired);
        assert_eq!(regs.get(1), 41);
        assert_eq!(regs.pc, 4);
    }

    #[test]
    fn summation_loop_converges() {
        // Encodes: li a0,0; li a1,10; loop: add a0,a0,a1; addi a1,a1,-1;
        //          bnez a1,loop; ecall (a7=93 exit convention assumed by caller).
        let (mut regs, mut mem) = harness();
        let prog: [u32; 5] = [
            asm_addi(10, 0, 0),                                   // li a0,0
            asm_addi(11, 0, 10),                                  // li a1,10
            0x00b5_0533,                                          // add a0,a0,a1
            asm_addi(11, 11, -1),                                 // addi a1,a1,-1
            // bne a1,x0,-8 -> opcode 0x63 funct3=001 rs1=11 rs2=0 imm=-8
            {
                let imm: i32 = -8;
                let b12 = ((imm >> 12) & 1) as u32;
                let b11 = ((imm >> 11) & 1) as u32;
                let b10_5 = ((imm >> 5) & 0x3F) as u32;
                let b4_1 = ((imm >> 1) & 0xF) as u32;
                (b12 << 31) | (b10_5 << 25) | (0 << 20) | (11 << 15) | (0b001 << 12)
                    | (b4_1 << 8) | (b11 << 7) | 0x63
            },
        ];
        for (i, word) in prog.iter().enumerate() {
            mem.write32((i as u64) * 4, *word).unwrap();
        }
        // Run until a0 stops changing (loop exits when a1 hits 0).
        for _ in 0..64 {
            if regs.pc >= 20 {
                break;
            }
            step(&mut regs, &mut mem).unwrap();
        }
        assert_eq!(regs.get(10), 55);
    }

    #[test]
    fn unaligned_jal_target_faults() {
        let (mut regs, mut mem) = harness();
        // jal x1, 2 (odd-ish misaligned target relative to pc=0)
        let imm: i32 = 2;
        let b20 = ((imm >> 20) & 1) as u32;
        let b19_12 = ((imm >> 12) & 0xFF) as u32;
        let b11 = ((imm >> 11) & 1) as u32;
        let b10_1 = ((imm >> 1) & 0x3FF) as u32;
        let word = (b20 << 31) | (b19_12 << 12) | (b11 << 20) | (b10_1 << 21) | (1 << 7) | 0x6F;
        mem.write32(0, word).unwrap();
        assert_eq!(step(&mut regs, &mut mem), Err(Fault::UnalignedInstruction));
    }

    #[test]
    fn ecall_surfaces_as_outcome_with_pc_advanced() {
        let (mut regs, mut mem) = harness();
        mem.write32(0, 0x0000_0073).unwrap(); // ecall
        let outcome = step(&mut regs, &mut mem).unwrap();
        assert_eq!(outcome, StepOutcome::Ecall);
        assert_eq!(regs.pc, 4);
    }

    #[test]
    fn compressed_add_executes_inline() {
        let (mut regs, mut mem) = harness();
        regs.set(8, 5);
        regs.set(9, 37);
        // c.add rd=x8, rs2=x9: funct3=100, bit12=1, rd=01000, rs2=01001, op=10
        let inst: u16 = 0b100_1_01000_01001_10;
        mem.write16(0, inst).unwrap();
        let outcome = step(&mut regs, &mut mem).unwrap();
        assert_eq!(outcome, StepOutcome::Retired);
        assert_eq!(regs.get(8), 42);
        assert_eq!(regs.pc, 2);
    }
}
