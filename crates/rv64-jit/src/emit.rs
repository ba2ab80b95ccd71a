//! AArch64 instruction encoders. Each `emit_*` function appends exactly
//! one host instruction word to the arena (except [`Emitter::emit_mov_u64`],
//! which is a short `MOVZ`/`MOVK` chain) and returns the offset it was
//! written at, so callers needing a later fixup can hold onto it.
//!
//! Register numbers are the plain AArch64 `Xn` indices (`0..=30`, `31`
//! meaning `XZR`/`SP` depending on instruction class — the usual AArch64
//! overload). [`crate::context`] reserves `X19` (guest-state base),
//! `X20` (guest-memory base), and `X21` (block-exit-state pointer) as the
//! pinned registers live for the duration of a translated block; `X9..X15`
//! are the scratch pool the translator draws from per instruction.

use crate::arena::{ArenaError, CodeArena};

pub const XZR: u32 = 31;

/// AArch64 condition codes needed by the translator (branch-on-less-than
/// for BLT/BGE's signed comparisons, -on-unsigned for BLTU/BGEU, and
/// `HS`/`LO` for the JIT's own inlined bounds checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    /// Carry set / unsigned higher-or-same.
    Hs,
    /// Carry clear / unsigned lower.
    Lo,
    /// Unsigned higher (strictly).
    Hi,
    Ge,
    Lt,
}

impl Cond {
    fn bits(self) -> u32 {
        match self {
            Cond::Eq => 0b0000,
            Cond::Ne => 0b0001,
            Cond::Hs => 0b0010,
            Cond::Lo => 0b0011,
            Cond::Hi => 0b1000,
            Cond::Ge => 0b1010,
            Cond::Lt => 0b1011,
        }
    }
}

pub struct Emitter<'a> {
    pub arena: &'a mut CodeArena,
}

impl<'a> Emitter<'a> {
    pub fn new(arena: &'a mut CodeArena) -> Self {
        Self { arena }
    }

    pub fn emit_add(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x8B00_0000 | (rm << 16) | (rn << 5) | rd)
    }

    pub fn emit_sub(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xCB00_0000 | (rm << 16) | (rn << 5) | rd)
    }

    /// `SUBS Xd, Xn, Xm` — subtract and set flags (the compare primitive
    /// the translator's inlined address-window checks build on).
    pub fn emit_subs(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xEB00_0000 | (rm << 16) | (rn << 5) | rd)
    }

    pub fn emit_and(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x8A00_0000 | (rm << 16) | (rn << 5) | rd)
    }

    pub fn emit_orr(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xAA00_0000 | (rm << 16) | (rn << 5) | rd)
    }

    pub fn emit_eor(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xCA00_0000 | (rm << 16) | (rn << 5) | rd)
    }

    /// `MOV Xd, Xm` (alias of `ORR Xd, XZR, Xm`).
    pub fn emit_mov_reg(&mut self, rd: u32, rm: u32) -> Result<u32, ArenaError> {
        self.emit_orr(rd, XZR, rm)
    }

    /// `LSLV Xd, Xn, Xm` — variable (register) shift-left.
    pub fn emit_lsl_v(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x9AC0_2000 | (rm << 16) | (rn << 5) | rd)
    }

    pub fn emit_lsr_v(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x9AC0_2400 | (rm << 16) | (rn << 5) | rd)
    }

    pub fn emit_asr_v(&mut self, rd: u32, rn: u32, rm: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x9AC0_2800 | (rm << 16) | (rn << 5) | rd)
    }

    /// `UBFM Xd, Xn, #shift, #63` — `LSL`/`LSR` by an immediate shamt,
    /// whichever `left` selects.
    pub fn emit_lsl_i(&mut self, rd: u32, rn: u32, shamt: u32) -> Result<u32, ArenaError> {
        let immr = (64 - shamt) % 64;
        let imms = 63 - shamt;
        self.arena.emit_u32(0xD340_0000 | (immr << 16) | (imms << 10) | (rn << 5) | rd)
    }

    pub fn emit_lsr_i(&mut self, rd: u32, rn: u32, shamt: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xD340_0000 | (shamt << 16) | (0x3F << 10) | (rn << 5) | rd)
    }

    /// `SBFM Xd, Xn, #shamt, #63` — `ASR` by an immediate shamt.
    pub fn emit_asr_i(&mut self, rd: u32, rn: u32, shamt: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x9340_0000 | (shamt << 16) | (0x3F << 10) | (rn << 5) | rd)
    }

    /// `CSET Xd, cond` (alias of `CSINC Xd, XZR, XZR, invert(cond)`) —
    /// the SLT/SLTU/SLTI/SLTIU primitive: 1 if `cond` holds given the
    /// flags an immediately preceding `SUBS` left behind, else 0.
    pub fn emit_cset(&mut self, rd: u32, cond: Cond) -> Result<u32, ArenaError> {
        let inv = cond.bits() ^ 1;
        self.arena.emit_u32(0x9A9F_0FE0 | (inv << 12) | rd)
    }

    /// `MOVZ Xd, #imm16, LSL #(hw*16)`.
    pub fn emit_movz(&mut self, rd: u32, imm16: u16, hw: u32) -> Result<u32, ArenaError> {
        self.arena
            .emit_u32(0xD280_0000 | (hw << 21) | (u32::from(imm16) << 5) | rd)
    }

    /// `MOVK Xd, #imm16, LSL #(hw*16)`.
    pub fn emit_movk(&mut self, rd: u32, imm16: u16, hw: u32) -> Result<u32, ArenaError> {
        self.arena
            .emit_u32(0xF280_0000 | (hw << 21) | (u32::from(imm16) << 5) | rd)
    }

    /// Materialize an arbitrary 64-bit constant into `rd` with the
    /// smallest `MOVZ`+`MOVK*` chain that reproduces every nonzero
    /// 16-bit lane (at least one `MOVZ` is always emitted, even for 0).
    pub fn emit_mov_u64(&mut self, rd: u32, value: u64) -> Result<u32, ArenaError> {
        let lanes = [
            (value & 0xFFFF) as u16,
            ((value >> 16) & 0xFFFF) as u16,
            ((value >> 32) & 0xFFFF) as u16,
            ((value >> 48) & 0xFFFF) as u16,
        ];
        let mut first_off = None;
        let mut movz_done = false;
        for (hw, lane) in lanes.iter().enumerate() {
            if *lane == 0 && movz_done {
                continue;
            }
            let off = if movz_done {
                self.emit_movk(rd, *lane, hw as u32)?
            } else {
                movz_done = true;
                self.emit_movz(rd, *lane, hw as u32)?
            };
            first_off.get_or_insert(off);
        }
        Ok(first_off.expect("at least one lane is always emitted"))
    }

    /// `LDR Xt, [state_base, #byte_offset]` — `byte_offset` must be
    /// 8-aligned (the unsigned-offset encoding scales by 8).
    pub fn emit_ldr_from_state(&mut self, rt: u32, state_base: u32, byte_offset: u32) -> Result<u32, ArenaError> {
        debug_assert_eq!(byte_offset % 8, 0);
        self.arena
            .emit_u32(0xF940_0000 | ((byte_offset / 8) << 10) | (state_base << 5) | rt)
    }

    pub fn emit_str_to_state(&mut self, rt: u32, state_base: u32, byte_offset: u32) -> Result<u32, ArenaError> {
        debug_assert_eq!(byte_offset % 8, 0);
        self.arena
            .emit_u32(0xF900_0000 | ((byte_offset / 8) << 10) | (state_base << 5) | rt)
    }

    /// `LDR Wt/Xt, [mem_base, Xn]` register-offset addressing, used for
    /// guest loads once the physical offset has been computed into `rn`.
    /// `size`: 0=byte, 1=halfword, 2=word, 3=doubleword.
    pub fn emit_ldr_reg(&mut self, rt: u32, mem_base: u32, rn: u32, size: u32) -> Result<u32, ArenaError> {
        let opc = match size {
            0 => 0x3864_6800u32, // LDRB Wt, [Xn, Xm]
            1 => 0x7864_6800u32, // LDRH Wt, [Xn, Xm]
            2 => 0xB864_6800u32, // LDR Wt, [Xn, Xm]
            3 => 0xF864_6800u32, // LDR Xt, [Xn, Xm]
            _ => unreachable!("memory access width is 0..=3"),
        };
        self.arena.emit_u32(opc | (rn << 16) | (mem_base << 5) | rt)
    }

    pub fn emit_str_reg(&mut self, rt: u32, mem_base: u32, rn: u32, size: u32) -> Result<u32, ArenaError> {
        let opc = match size {
            0 => 0x3824_6800u32, // STRB Wt, [Xn, Xm]
            1 => 0x7824_6800u32, // STRH Wt, [Xn, Xm]
            2 => 0xB824_6800u32, // STR Wt, [Xn, Xm]
            3 => 0xF824_6800u32, // STR Xt, [Xn, Xm]
            _ => unreachable!("memory access width is 0..=3"),
        };
        self.arena.emit_u32(opc | (rn << 16) | (mem_base << 5) | rt)
    }

    /// Unconditional branch with a placeholder (zero) displacement;
    /// returns the site offset for a later patch via [`patch_b`].
    pub fn emit_b_placeholder(&mut self) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x1400_0000)
    }

    /// `B.cond` with a placeholder displacement; see [`patch_b_cond`].
    pub fn emit_b_cond_placeholder(&mut self, cond: Cond) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x5400_0000 | cond.bits())
    }

    pub fn emit_br(&mut self, rn: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xD61F_0000 | (rn << 5))
    }

    pub fn emit_blr(&mut self, rn: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xD63F_0000 | (rn << 5))
    }

    pub fn emit_ret(&mut self) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xD65F_03C0)
    }

    pub fn emit_sub_imm(&mut self, rd: u32, rn: u32, imm12: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0xD100_0000 | (imm12 << 10) | (rn << 5) | rd)
    }

    pub fn emit_add_imm(&mut self, rd: u32, rn: u32, imm12: u32) -> Result<u32, ArenaError> {
        self.arena.emit_u32(0x9100_0000 | (imm12 << 10) | (rn << 5) | rd)
    }
}

/// Patch the `B` instruction at `site` (offset returned by
/// [`Emitter::emit_b_placeholder`]) so it jumps to `target`, both byte
/// offsets within the same arena.
pub fn patch_b(arena: &mut CodeArena, site: u32, target: u32) {
    let disp = (target as i64 - site as i64) / 4;
    let imm26 = (disp as u32) & 0x03FF_FFFF;
    arena.patch_u32(site, 0x1400_0000 | imm26);
}

/// Patch a `B.cond` instruction, preserving its condition bits.
pub fn patch_b_cond(arena: &mut CodeArena, site: u32, target: u32) {
    let disp = (target as i64 - site as i64) / 4;
    let imm19 = (disp as u32) & 0x0007_FFFF;
    let cond = arena.read_u32(site) & 0xF;
    arena.patch_u32(site, 0x5400_0000 | (imm19 << 5) | cond);
}
