// Static decode tables for the NMOS 6502 and the WDC/Rockwell 65C02.
//
// The cycle matrix below is the canonical per-opcode base cost; page-cross,
// branch-taken and variant-specific penalties are applied by the processor
// when it resolves the operand. Undocumented opcodes decode as NOPs that
// keep the length and cycle count their table slot declares.

use crate::instructions::Mnemonic::{self, *};

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Variant {
    Nmos,
    Cmos,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AddrMode {
    Accumulator,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Immediate,
    Implied,
    Indirect,
    XIndirect,
    IndirectY,
    Relative,
    Zeropage,
    ZeropageX,
    ZeropageY,
    // 65C02 only
    ZpIndirect,
    AbsIndirectX,
    // BBRx/BBSx: a zero-page operand plus a relative offset
    BitBranch,
}

impl AddrMode {
    pub fn length(&self) -> u16 {
        match *self {
            Self::Accumulator | Self::Implied => 1,
            Self::Immediate
            | Self::Relative
            | Self::Zeropage
            | Self::ZeropageX
            | Self::ZeropageY
            | Self::XIndirect
            | Self::IndirectY
            | Self::ZpIndirect => 2,
            Self::Absolute
            | Self::AbsoluteX
            | Self::AbsoluteY
            | Self::Indirect
            | Self::AbsIndirectX
            | Self::BitBranch => 3,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct OpInfo {
    pub op: Mnemonic,
    pub mode: AddrMode,
    pub cycles: u8,
    pub page_penalty: bool,
}

// Base cycles per opcode, NMOS. Branch rows hold the not-taken cost.
#[rustfmt::skip]
const BASE_CYCLES: [u8; 256] = [
 // 0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
    7, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 4, 4, 6, 6, // 0x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 1x
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 4, 4, 6, 6, // 2x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 3x
    6, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 3, 4, 6, 6, // 4x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 5x
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 5, 4, 6, 6, // 6x
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // 7x
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // 8x
    2, 6, 2, 6, 4, 4, 4, 4, 2, 5, 2, 5, 5, 5, 5, 5, // 9x
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4, // ax
    2, 5, 2, 5, 4, 4, 4, 4, 2, 4, 2, 4, 4, 4, 4, 4, // bx
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // cx
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // dx
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6, // ex
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7, // fx
];

/// Addressing shape of an undocumented slot, derived from the standard
/// opcode-column layout so the NOP keeps the declared instruction length.
fn undoc_mode(opcode: u8) -> AddrMode {
    use AddrMode::*;
    let row_even = opcode & 0x10 == 0;
    match opcode {
        0x04 | 0x44 | 0x64 => Zeropage,
        0x0c => Absolute,
        0x14 | 0x34 | 0x54 | 0x74 | 0xd4 | 0xf4 => ZeropageX,
        0x1a | 0x3a | 0x5a | 0x7a | 0xda | 0xfa => Implied,
        0x1c | 0x3c | 0x5c | 0x7c | 0xdc | 0xfc => AbsoluteX,
        0x80 | 0x82 | 0x89 | 0xc2 | 0xe2 => Immediate,
        0x9c => AbsoluteX,
        0x9e => AbsoluteY,
        _ => match opcode & 0x0f {
            0x03 => {
                if row_even {
                    XIndirect
                } else {
                    IndirectY
                }
            }
            0x07 => {
                if row_even {
                    Zeropage
                } else {
                    ZeropageX
                }
            }
            0x0b => {
                if row_even {
                    Immediate
                } else {
                    AbsoluteY
                }
            }
            0x0f => {
                if row_even {
                    Absolute
                } else {
                    AbsoluteX
                }
            }
            // JAM columns and anything else: one-byte slot
            _ => Implied,
        },
    }
}

fn op(m: Mnemonic, mode: AddrMode, cycles: u8) -> OpInfo {
    OpInfo { op: m, mode, cycles, page_penalty: false }
}

// Same, for opcodes that pay one extra cycle on a page crossing.
fn opx(m: Mnemonic, mode: AddrMode, cycles: u8) -> OpInfo {
    OpInfo { op: m, mode, cycles, page_penalty: true }
}

pub fn opcode_table(variant: Variant) -> [OpInfo; 256] {
    use AddrMode::*;
    let mut t = [op(Nop, Implied, 2); 256];
    for (j, entry) in t.iter_mut().enumerate() {
        entry.mode = undoc_mode(j as u8);
        entry.cycles = BASE_CYCLES[j];
        // the undocumented NOP abs,X slots keep their read page penalty
        entry.page_penalty = matches!(j, 0x1c | 0x3c | 0x5c | 0x7c | 0xdc | 0xfc);
    }

    t[0x00] = op(Brk, Implied, 7);
    t[0x01] = op(Ora, XIndirect, 6);
    t[0x05] = op(Ora, Zeropage, 3);
    t[0x06] = op(Asl, Zeropage, 5);
    t[0x08] = op(Php, Implied, 3);
    t[0x09] = op(Ora, Immediate, 2);
    t[0x0a] = op(Asl, Accumulator, 2);
    t[0x0d] = op(Ora, Absolute, 4);
    t[0x0e] = op(Asl, Absolute, 6);
    t[0x10] = op(Bpl, Relative, 2);
    t[0x11] = opx(Ora, IndirectY, 5);
    t[0x15] = op(Ora, ZeropageX, 4);
    t[0x16] = op(Asl, ZeropageX, 6);
    t[0x18] = op(Clc, Implied, 2);
    t[0x19] = opx(Ora, AbsoluteY, 4);
    t[0x1d] = opx(Ora, AbsoluteX, 4);
    t[0x1e] = op(Asl, AbsoluteX, 7);
    t[0x20] = op(Jsr, Absolute, 6);
    t[0x21] = op(And, XIndirect, 6);
    t[0x24] = op(Bit, Zeropage, 3);
    t[0x25] = op(And, Zeropage, 3);
    t[0x26] = op(Rol, Zeropage, 5);
    t[0x28] = op(Plp, Implied, 4);
    t[0x29] = op(And, Immediate, 2);
    t[0x2a] = op(Rol, Accumulator, 2);
    t[0x2c] = op(Bit, Absolute, 4);
    t[0x2d] = op(And, Absolute, 4);
    t[0x2e] = op(Rol, Absolute, 6);
    t[0x30] = op(Bmi, Relative, 2);
    t[0x31] = opx(And, IndirectY, 5);
    t[0x35] = op(And, ZeropageX, 4);
    t[0x36] = op(Rol, ZeropageX, 6);
    t[0x38] = op(Sec, Implied, 2);
    t[0x39] = opx(And, AbsoluteY, 4);
    t[0x3d] = opx(And, AbsoluteX, 4);
    t[0x3e] = op(Rol, AbsoluteX, 7);
    t[0x40] = op(Rti, Implied, 6);
    t[0x41] = op(Eor, XIndirect, 6);
    t[0x45] = op(Eor, Zeropage, 3);
    t[0x46] = op(Lsr, Zeropage, 5);
    t[0x48] = op(Pha, Implied, 3);
    t[0x49] = op(Eor, Immediate, 2);
    t[0x4a] = op(Lsr, Accumulator, 2);
    t[0x4c] = op(Jmp, Absolute, 3);
    t[0x4d] = op(Eor, Absolute, 4);
    t[0x4e] = op(Lsr, Absolute, 6);
    t[0x50] = op(Bvc, Relative, 2);
    t[0x51] = opx(Eor, IndirectY, 5);
    t[0x55] = op(Eor, ZeropageX, 4);
    t[0x56] = op(Lsr, ZeropageX, 6);
    t[0x58] = op(Cli, Implied, 2);
    t[0x59] = opx(Eor, AbsoluteY, 4);
    t[0x5d] = opx(Eor, AbsoluteX, 4);
    t[0x5e] = op(Lsr, AbsoluteX, 7);
    t[0x60] = op(Rts, Implied, 6);
    t[0x61] = op(Adc, XIndirect, 6);
    t[0x65] = op(Adc, Zeropage, 3);
    t[0x66] = op(Ror, Zeropage, 5);
    t[0x68] = op(Pla, Implied, 4);
    t[0x69] = op(Adc, Immediate, 2);
    t[0x6a] = op(Ror, Accumulator, 2);
    t[0x6c] = op(Jmp, Indirect, 5);
    t[0x6d] = op(Adc, Absolute, 4);
    t[0x6e] = op(Ror, Absolute, 6);
    t[0x70] = op(Bvs, Relative, 2);
    t[0x71] = opx(Adc, IndirectY, 5);
    t[0x75] = op(Adc, ZeropageX, 4);
    t[0x76] = op(Ror, ZeropageX, 6);
    t[0x78] = op(Sei, Implied, 2);
    t[0x79] = opx(Adc, AbsoluteY, 4);
    t[0x7d] = opx(Adc, AbsoluteX, 4);
    t[0x7e] = op(Ror, AbsoluteX, 7);
    t[0x81] = op(Sta, XIndirect, 6);
    t[0x84] = op(Sty, Zeropage, 3);
    t[0x85] = op(Sta, Zeropage, 3);
    t[0x86] = op(Stx, Zeropage, 3);
    t[0x88] = op(Dey, Implied, 2);
    t[0x8a] = op(Txa, Implied, 2);
    t[0x8c] = op(Sty, Absolute, 4);
    t[0x8d] = op(Sta, Absolute, 4);
    t[0x8e] = op(Stx, Absolute, 4);
    t[0x90] = op(Bcc, Relative, 2);
    t[0x91] = op(Sta, IndirectY, 6);
    t[0x94] = op(Sty, ZeropageX, 4);
    t[0x95] = op(Sta, ZeropageX, 4);
    t[0x96] = op(Stx, ZeropageY, 4);
    t[0x98] = op(Tya, Implied, 2);
    t[0x99] = op(Sta, AbsoluteY, 5);
    t[0x9a] = op(Txs, Implied, 2);
    t[0x9d] = op(Sta, AbsoluteX, 5);
    t[0xa0] = op(Ldy, Immediate, 2);
    t[0xa1] = op(Lda, XIndirect, 6);
    t[0xa2] = op(Ldx, Immediate, 2);
    t[0xa4] = op(Ldy, Zeropage, 3);
    t[0xa5] = op(Lda, Zeropage, 3);
    t[0xa6] = op(Ldx, Zeropage, 3);
    t[0xa8] = op(Tay, Implied, 2);
    t[0xa9] = op(Lda, Immediate, 2);
    t[0xaa] = op(Tax, Implied, 2);
    t[0xac] = op(Ldy, Absolute, 4);
    t[0xad] = op(Lda, Absolute, 4);
    t[0xae] = op(Ldx, Absolute, 4);
    t[0xb0] = op(Bcs, Relative, 2);
    t[0xb1] = opx(Lda, IndirectY, 5);
    t[0xb4] = op(Ldy, ZeropageX, 4);
    t[0xb5] = op(Lda, ZeropageX, 4);
    t[0xb6] = op(Ldx, ZeropageY, 4);
    t[0xb8] = op(Clv, Implied, 2);
    t[0xb9] = opx(Lda, AbsoluteY, 4);
    t[0xba] = op(Tsx, Implied, 2);
    t[0xbc] = opx(Ldy, AbsoluteX, 4);
    t[0xbd] = opx(Lda, AbsoluteX, 4);
    t[0xbe] = opx(Ldx, AbsoluteY, 4);
    t[0xc0] = op(Cpy, Immediate, 2);
    t[0xc1] = op(Cmp, XIndirect, 6);
    t[0xc4] = op(Cpy, Zeropage, 3);
    t[0xc5] = op(Cmp, Zeropage, 3);
    t[0xc6] = op(Dec, Zeropage, 5);
    t[0xc8] = op(Iny, Implied, 2);
    t[0xc9] = op(Cmp, Immediate, 2);
    t[0xca] = op(Dex, Implied, 2);
    t[0xcc] = op(Cpy, Absolute, 4);
    t[0xcd] = op(Cmp, Absolute, 4);
    t[0xce] = op(Dec, Absolute, 6);
    t[0xd0] = op(Bne, Relative, 2);
    t[0xd1] = opx(Cmp, IndirectY, 5);
    t[0xd5] = op(Cmp, ZeropageX, 4);
    t[0xd6] = op(Dec, ZeropageX, 6);
    t[0xd8] = op(Cld, Implied, 2);
    t[0xd9] = opx(Cmp, AbsoluteY, 4);
    t[0xdd] = opx(Cmp, AbsoluteX, 4);
    t[0xde] = op(Dec, AbsoluteX, 7);
    t[0xe0] = op(Cpx, Immediate, 2);
    t[0xe1] = op(Sbc, XIndirect, 6);
    t[0xe4] = op(Cpx, Zeropage, 3);
    t[0xe5] = op(Sbc, Zeropage, 3);
    t[0xe6] = op(Inc, Zeropage, 5);
    t[0xe8] = op(Inx, Implied, 2);
    t[0xe9] = op(Sbc, Immediate, 2);
    t[0xea] = op(Nop, Implied, 2);
    t[0xec] = op(Cpx, Absolute, 4);
    t[0xed] = op(Sbc, Absolute, 4);
    t[0xee] = op(Inc, Absolute, 6);
    t[0xf0] = op(Beq, Relative, 2);
    t[0xf1] = opx(Sbc, IndirectY, 5);
    t[0xf5] = op(Sbc, ZeropageX, 4);
    t[0xf6] = op(Inc, ZeropageX, 6);
    t[0xf8] = op(Sed, Implied, 2);
    t[0xf9] = opx(Sbc, AbsoluteY, 4);
    t[0xfd] = opx(Sbc, AbsoluteX, 4);
    t[0xfe] = op(Inc, AbsoluteX, 7);

    if variant == Variant::Cmos {
        t[0x04] = op(Tsb, Zeropage, 5);
        t[0x0c] = op(Tsb, Absolute, 6);
        t[0x14] = op(Trb, Zeropage, 5);
        t[0x1c] = op(Trb, Absolute, 6);
        t[0x12] = op(Ora, ZpIndirect, 5);
        t[0x32] = op(And, ZpIndirect, 5);
        t[0x52] = op(Eor, ZpIndirect, 5);
        t[0x72] = op(Adc, ZpIndirect, 5);
        t[0x92] = op(Sta, ZpIndirect, 5);
        t[0xb2] = op(Lda, ZpIndirect, 5);
        t[0xd2] = op(Cmp, ZpIndirect, 5);
        t[0xf2] = op(Sbc, ZpIndirect, 5);
        t[0x1a] = op(Inc, Accumulator, 2);
        t[0x3a] = op(Dec, Accumulator, 2);
        t[0x34] = op(Bit, ZeropageX, 4);
        t[0x3c] = opx(Bit, AbsoluteX, 4);
        t[0x89] = op(Bit, Immediate, 2);
        t[0x5a] = op(Phy, Implied, 3);
        t[0x7a] = op(Ply, Implied, 4);
        t[0xda] = op(Phx, Implied, 3);
        t[0xfa] = op(Plx, Implied, 4);
        t[0x64] = op(Stz, Zeropage, 3);
        t[0x74] = op(Stz, ZeropageX, 4);
        t[0x9c] = op(Stz, Absolute, 4);
        t[0x9e] = op(Stz, AbsoluteX, 5);
        t[0x80] = op(Bra, Relative, 2);
        // the indirect-jump page-wrap fix costs one cycle
        t[0x6c] = op(Jmp, Indirect, 6);
        t[0x7c] = op(Jmp, AbsIndirectX, 6);
        for n in 0..8u8 {
            t[0x0f + 0x10 * n as usize] = op(Bbr(n), BitBranch, 5);
            t[0x8f + 0x10 * n as usize] = op(Bbs(n), BitBranch, 5);
            t[0x07 + 0x10 * n as usize] = op(Rmb(n), Zeropage, 5);
            t[0x87 + 0x10 * n as usize] = op(Smb(n), Zeropage, 5);
        }
        // WAI/STP slots execute as NOPs of their declared cost
        t[0xcb] = op(Nop, Implied, 3);
        t[0xdb] = op(Nop, Implied, 3);
    }
    t
}
