//! Cross-cutting scenarios run through the public `Vm` API rather than
//! against `interp::step` directly: summation loop to a fixed point,
//! legacy SBI putchar reaching a host sink, an unaligned branch target
//! raising the same fault the decoder would for a raw unaligned fetch,
//! and a compressed instruction mixed into an otherwise 32-bit stream.

use rv64_core::memory::{DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE};
use rv64_core::{Fault, SyscallHandler, Vm, VmState};

struct RecordingKernel {
    exits: Vec<u64>,
}

impl SyscallHandler for RecordingKernel {
    fn handle(&mut self, num: u64, a0: u64, _a1: u64, _a2: u64, _a3: u64) -> u64 {
        if num == 2 {
            self.exits.push(a0);
        }
        0
    }
}

fn asm_addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (rd << 7) | 0x13
}

fn asm_add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    (rs2 << 20) | (rs1 << 15) | (rd << 7) | 0x33
}

fn asm_branch(funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let b12 = ((imm >> 12) & 1) as u32;
    let b11 = ((imm >> 11) & 1) as u32;
    let b10_5 = ((imm >> 5) & 0x3F) as u32;
    let b4_1 = ((imm >> 1) & 0xF) as u32;
    (b12 << 31) | (b10_5 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (b4_1 << 8) | (b11 << 7) | 0x63
}

fn asm_bne(rs1: u32, rs2: u32, imm: i32) -> u32 {
    asm_branch(0b001, rs1, rs2, imm)
}

fn asm_beq(rs1: u32, rs2: u32, imm: i32) -> u32 {
    asm_branch(0b000, rs1, rs2, imm)
}

const ECALL: u32 = 0x0000_0073;

fn make_vm() -> Vm {
    Vm::new(DEFAULT_MEMORY_SIZE, FRAMEBUFFER_SIZE)
}

// ---------------------------------------------------------------------------
// Summation loop: a0 accumulates 10+9+...+1 == 55, then exits via ecall.
// ---------------------------------------------------------------------------

#[test]
fn summation_loop_exits_with_fifty_five_in_a0() {
    let mut vm = make_vm();
    vm.init(None, 0).unwrap();

    let prog = [
        asm_addi(10, 0, 0),  // li a0, 0
        asm_addi(11, 0, 10), // li a1, 10
        asm_add(10, 10, 11), // loop: add a0, a0, a1
        asm_addi(11, 11, -1),// addi a1, a1, -1
        asm_bne(11, 0, -8),  // bne a1, x0, loop
        asm_addi(17, 0, 2),  // li a7, 2 (exit)
        ECALL,
    ];
    for (i, word) in prog.iter().enumerate() {
        vm.memory_mut().write32((i as u64) * 4, *word).unwrap();
    }

    vm.set_syscall_handler(Box::new(RecordingKernel { exits: Vec::new() }));
    vm.start();

    for _ in 0..128 {
        if vm.state() != VmState::Running {
            break;
        }
        vm.step().unwrap();
    }

    assert_eq!(vm.state(), VmState::Halted);
    assert_eq!(vm.regs().get(10), 55);
}

// ---------------------------------------------------------------------------
// Legacy SBI putchar (a7 < 10): bytes reach the host serial sink in order.
// ---------------------------------------------------------------------------

#[test]
fn sbi_putchar_stream_reaches_host_sink() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut vm = make_vm();
    vm.init(None, 0).unwrap();

    let message = b"hi";
    let mut words = Vec::new();
    for &byte in message {
        words.push(asm_addi(17, 0, 1)); // li a7, 1 (sbi putchar)
        words.push(asm_addi(10, 0, i32::from(byte))); // li a0, byte
        words.push(ECALL);
    }
    words.push(asm_addi(17, 0, 8)); // li a7, 8 (sbi shutdown)
    words.push(ECALL);
    for (i, word) in words.iter().enumerate() {
        vm.memory_mut().write32((i as u64) * 4, *word).unwrap();
    }

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    vm.set_serial_output(Box::new(move |b: u8| sink.borrow_mut().push(b)));
    vm.start();

    for _ in 0..64 {
        if vm.state() != VmState::Running {
            break;
        }
        vm.step().unwrap();
    }

    assert_eq!(vm.state(), VmState::Halted);
    assert_eq!(&*received.borrow(), message);
}

// ---------------------------------------------------------------------------
// A compressed add mixed into a 32-bit stream executes inline and the
// following 32-bit instruction still decodes from the right byte offset.
// ---------------------------------------------------------------------------

#[test]
fn compressed_instruction_advances_pc_by_two_not_four() {
    let mut vm = make_vm();
    vm.init(None, 0).unwrap();

    vm.regs_mut().set(8, 5);
    vm.regs_mut().set(9, 37);
    // c.add x8, x9
    let c_add: u16 = 0b100_1_01000_01001_10;
    vm.memory_mut().write16(0, c_add).unwrap();
    vm.memory_mut().write32(2, asm_addi(10, 8, 0)).unwrap(); // mv a0, x8

    vm.start();
    vm.step().unwrap();
    assert_eq!(vm.regs().pc, 2);
    vm.step().unwrap();
    assert_eq!(vm.regs().get(10), 42);
    assert_eq!(vm.regs().pc, 6);
}

// ---------------------------------------------------------------------------
// An unaligned branch target raises the same fault through the Vm's
// ordinary step path that a raw misaligned fetch would.
// ---------------------------------------------------------------------------

#[test]
fn unaligned_branch_target_halts_on_fault() {
    let mut vm = make_vm();
    vm.init(None, 0).unwrap();

    // beq x0, x0, 2: always taken, target pc=2 is not 4-aligned.
    let word = asm_beq(0, 0, 2);
    vm.memory_mut().write32(0, word).unwrap();
    vm.start();

    let err = vm.step();
    assert_eq!(err, Err(Fault::UnalignedInstruction));
    assert_eq!(vm.state(), VmState::Errored);
    assert_eq!(vm.last_error(), Some(Fault::UnalignedInstruction));
}
