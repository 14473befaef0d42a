// Execution semantics for every mnemonic the decode tables can produce.
// Operand resolution (and all cycle accounting) happens in the processor
// module; by the time execute() runs, the operand is already concrete.

use crate::conversions::{from_bcd, to_bcd};
use crate::processor::{Flag, Operand, CPU};

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx,
    Iny, Jmp, Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp,
    Rol, Ror, Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay,
    Tsx, Txa, Txs, Tya,
    // 65C02 extensions
    Bra, Phx, Phy, Plx, Ply, Stz, Trb, Tsb,
    Bbr(u8), Bbs(u8), Rmb(u8), Smb(u8),
}

/// Whether a conditional branch fires under the current flags. BRA always
/// does; the Rockwell bit branches test their zero-page operand instead and
/// are handled inline in execute().
pub fn condition_met(op: Mnemonic, cpu: &CPU) -> bool {
    match op {
        Mnemonic::Bcc => !cpu.flag(Flag::C),
        Mnemonic::Bcs => cpu.flag(Flag::C),
        Mnemonic::Bne => !cpu.flag(Flag::Z),
        Mnemonic::Beq => cpu.flag(Flag::Z),
        Mnemonic::Bpl => !cpu.flag(Flag::N),
        Mnemonic::Bmi => cpu.flag(Flag::N),
        Mnemonic::Bvc => !cpu.flag(Flag::V),
        Mnemonic::Bvs => cpu.flag(Flag::V),
        Mnemonic::Bra => true,
        _ => false,
    }
}

impl Mnemonic {
    pub fn as_asm(self) -> String {
        match self {
            Self::Bbr(n) => format!("bbr{}", n),
            Self::Bbs(n) => format!("bbs{}", n),
            Self::Rmb(n) => format!("rmb{}", n),
            Self::Smb(n) => format!("smb{}", n),
            other => format!("{:?}", other).to_lowercase(),
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::Bcc
                | Self::Bcs
                | Self::Bne
                | Self::Beq
                | Self::Bpl
                | Self::Bmi
                | Self::Bvc
                | Self::Bvs
                | Self::Bra
        )
    }

    pub fn execute(self, cpu: &mut CPU, operand: Operand) {
        match self {
            Self::Adc => {
                let m = cpu.read_operand(operand);
                adc(cpu, m);
            }
            Self::Sbc => {
                let m = cpu.read_operand(operand);
                sbc(cpu, m);
            }
            Self::And => {
                let m = cpu.read_operand(operand);
                cpu.a &= m;
                cpu.set_nz(cpu.a);
            }
            Self::Ora => {
                let m = cpu.read_operand(operand);
                cpu.a |= m;
                cpu.set_nz(cpu.a);
            }
            Self::Eor => {
                let m = cpu.read_operand(operand);
                cpu.a ^= m;
                cpu.set_nz(cpu.a);
            }
            Self::Asl => {
                let m = cpu.read_operand(operand);
                cpu.set_flag(Flag::C, m & 0x80 != 0);
                let res = m << 1;
                cpu.set_nz(res);
                cpu.write_operand(operand, res);
            }
            Self::Lsr => {
                let m = cpu.read_operand(operand);
                cpu.set_flag(Flag::C, m & 0x01 != 0);
                let res = m >> 1;
                cpu.set_nz(res);
                cpu.write_operand(operand, res);
            }
            Self::Rol => {
                let m = cpu.read_operand(operand);
                let carry_in = cpu.flag(Flag::C) as u8;
                cpu.set_flag(Flag::C, m & 0x80 != 0);
                let res = (m << 1) | carry_in;
                cpu.set_nz(res);
                cpu.write_operand(operand, res);
            }
            Self::Ror => {
                let m = cpu.read_operand(operand);
                let carry_in = (cpu.flag(Flag::C) as u8) << 7;
                cpu.set_flag(Flag::C, m & 0x01 != 0);
                let res = (m >> 1) | carry_in;
                cpu.set_nz(res);
                cpu.write_operand(operand, res);
            }
            Self::Bit => {
                let m = cpu.read_operand(operand);
                cpu.set_flag(Flag::Z, cpu.a & m == 0);
                // BIT #imm leaves N and V alone on the 65C02
                if !matches!(operand, Operand::Immediate(_)) {
                    cpu.set_flag(Flag::N, m & 0x80 != 0);
                    cpu.set_flag(Flag::V, m & 0x40 != 0);
                }
            }
            Self::Trb => {
                let m = cpu.read_operand(operand);
                cpu.set_flag(Flag::Z, cpu.a & m == 0);
                cpu.write_operand(operand, m & !cpu.a);
            }
            Self::Tsb => {
                let m = cpu.read_operand(operand);
                cpu.set_flag(Flag::Z, cpu.a & m == 0);
                cpu.write_operand(operand, m | cpu.a);
            }
            Self::Cmp => {
                let m = cpu.read_operand(operand);
                compare(cpu, cpu.a, m);
            }
            Self::Cpx => {
                let m = cpu.read_operand(operand);
                compare(cpu, cpu.x, m);
            }
            Self::Cpy => {
                let m = cpu.read_operand(operand);
                compare(cpu, cpu.y, m);
            }
            Self::Dec => {
                let res = cpu.read_operand(operand).wrapping_sub(1);
                cpu.set_nz(res);
                cpu.write_operand(operand, res);
            }
            Self::Inc => {
                let res = cpu.read_operand(operand).wrapping_add(1);
                cpu.set_nz(res);
                cpu.write_operand(operand, res);
            }
            Self::Dex => {
                cpu.x = cpu.x.wrapping_sub(1);
                cpu.set_nz(cpu.x);
            }
            Self::Dey => {
                cpu.y = cpu.y.wrapping_sub(1);
                cpu.set_nz(cpu.y);
            }
            Self::Inx => {
                cpu.x = cpu.x.wrapping_add(1);
                cpu.set_nz(cpu.x);
            }
            Self::Iny => {
                cpu.y = cpu.y.wrapping_add(1);
                cpu.set_nz(cpu.y);
            }
            Self::Lda => {
                cpu.a = cpu.read_operand(operand);
                cpu.set_nz(cpu.a);
            }
            Self::Ldx => {
                cpu.x = cpu.read_operand(operand);
                cpu.set_nz(cpu.x);
            }
            Self::Ldy => {
                cpu.y = cpu.read_operand(operand);
                cpu.set_nz(cpu.y);
            }
            Self::Sta => cpu.write_operand(operand, cpu.a),
            Self::Stx => cpu.write_operand(operand, cpu.x),
            Self::Sty => cpu.write_operand(operand, cpu.y),
            Self::Stz => cpu.write_operand(operand, 0),
            Self::Tax => {
                cpu.x = cpu.a;
                cpu.set_nz(cpu.x);
            }
            Self::Tay => {
                cpu.y = cpu.a;
                cpu.set_nz(cpu.y);
            }
            Self::Tsx => {
                cpu.x = cpu.sp;
                cpu.set_nz(cpu.x);
            }
            Self::Txa => {
                cpu.a = cpu.x;
                cpu.set_nz(cpu.a);
            }
            Self::Tya => {
                cpu.a = cpu.y;
                cpu.set_nz(cpu.a);
            }
            Self::Txs => cpu.sp = cpu.x,
            Self::Pha => cpu.push(cpu.a),
            Self::Phx => cpu.push(cpu.x),
            Self::Phy => cpu.push(cpu.y),
            Self::Php => {
                let p = cpu.p | 1 << Flag::B as u8 | 1 << Flag::U as u8;
                cpu.push(p);
            }
            Self::Pla => {
                cpu.a = cpu.pop();
                cpu.set_nz(cpu.a);
            }
            Self::Plx => {
                cpu.x = cpu.pop();
                cpu.set_nz(cpu.x);
            }
            Self::Ply => {
                cpu.y = cpu.pop();
                cpu.set_nz(cpu.y);
            }
            Self::Plp => {
                let p = cpu.pop();
                cpu.p = (p | 1 << Flag::U as u8) & !(1 << Flag::B as u8);
            }
            Self::Jmp => {
                if let Operand::Address(target) = operand {
                    cpu.pc = target;
                }
            }
            Self::Jsr => {
                if let Operand::Address(target) = operand {
                    let ret = cpu.pc.wrapping_sub(1);
                    cpu.push((ret >> 8) as u8);
                    cpu.push(ret as u8);
                    cpu.pc = target;
                }
            }
            Self::Rts => {
                let lo = cpu.pop();
                let hi = cpu.pop();
                cpu.pc = u16::from_le_bytes([lo, hi]).wrapping_add(1);
            }
            Self::Rti => {
                let p = cpu.pop();
                cpu.p = (p | 1 << Flag::U as u8) & !(1 << Flag::B as u8);
                let lo = cpu.pop();
                let hi = cpu.pop();
                cpu.pc = u16::from_le_bytes([lo, hi]);
            }
            Self::Brk => cpu.software_interrupt(),
            Self::Bcc | Self::Bcs | Self::Bne | Self::Beq | Self::Bpl | Self::Bmi
            | Self::Bvc | Self::Bvs | Self::Bra => {
                if let Operand::Relative(offset) = operand {
                    if condition_met(self, cpu) {
                        cpu.pc = cpu.pc.wrapping_add(offset as i16 as u16);
                    }
                }
            }
            Self::Bbr(bit) | Self::Bbs(bit) => {
                if let Operand::BitBranch { zp, offset } = operand {
                    let m = cpu.read_byte(zp as u16);
                    let set = m & (1 << bit) != 0;
                    let wanted = matches!(self, Self::Bbs(_));
                    if set == wanted {
                        cpu.pc = cpu.pc.wrapping_add(offset as i16 as u16);
                    }
                }
            }
            Self::Rmb(bit) => {
                let m = cpu.read_operand(operand);
                cpu.write_operand(operand, m & !(1 << bit));
            }
            Self::Smb(bit) => {
                let m = cpu.read_operand(operand);
                cpu.write_operand(operand, m | 1 << bit);
            }
            Self::Clc => cpu.set_flag(Flag::C, false),
            Self::Sec => cpu.set_flag(Flag::C, true),
            Self::Cli => cpu.set_flag(Flag::I, false),
            Self::Sei => cpu.set_flag(Flag::I, true),
            Self::Cld => cpu.set_flag(Flag::D, false),
            Self::Sed => cpu.set_flag(Flag::D, true),
            Self::Clv => cpu.set_flag(Flag::V, false),
            Self::Nop => {}
        }
    }
}

fn compare(cpu: &mut CPU, reg: u8, m: u8) {
    let res = reg.wrapping_sub(m);
    cpu.set_flag(Flag::C, reg >= m);
    cpu.set_nz(res);
}

fn adc(cpu: &mut CPU, m: u8) {
    let carry = cpu.flag(Flag::C) as u16;
    if cpu.flag(Flag::D) {
        let sum = from_bcd(cpu.a) + from_bcd(m) + carry;
        cpu.set_flag(Flag::C, sum > 99);
        let packed = to_bcd((sum % 100) as u8);
        // binary overflow of the uncorrected sum, as the silicon computes it
        let bin = (cpu.a as u16 + m as u16 + carry) as u8;
        cpu.set_flag(Flag::V, (!(cpu.a ^ m) & (cpu.a ^ bin)) & 0x80 != 0);
        cpu.a = packed;
        cpu.set_nz(packed);
    } else {
        let sum = cpu.a as u16 + m as u16 + carry;
        let res = sum as u8;
        cpu.set_flag(Flag::C, sum > 0xff);
        cpu.set_flag(Flag::V, (!(cpu.a ^ m) & (cpu.a ^ res)) & 0x80 != 0);
        cpu.a = res;
        cpu.set_nz(res);
    }
}

fn sbc(cpu: &mut CPU, m: u8) {
    let borrow = !cpu.flag(Flag::C) as i16;
    if cpu.flag(Flag::D) {
        let diff = from_bcd(cpu.a) as i16 - from_bcd(m) as i16 - borrow;
        cpu.set_flag(Flag::C, diff >= 0);
        let packed = to_bcd(diff.rem_euclid(100) as u8);
        let bin = (cpu.a as i16 - m as i16 - borrow) as u8;
        cpu.set_flag(Flag::V, ((cpu.a ^ m) & (cpu.a ^ bin)) & 0x80 != 0);
        cpu.a = packed;
        cpu.set_nz(packed);
    } else {
        // binary SBC is ADC of the complement
        let carry = cpu.flag(Flag::C) as u16;
        let sum = cpu.a as u16 + (!m) as u16 + carry;
        let res = sum as u8;
        cpu.set_flag(Flag::C, sum > 0xff);
        cpu.set_flag(Flag::V, ((cpu.a ^ m) & (cpu.a ^ res)) & 0x80 != 0);
        cpu.a = res;
        cpu.set_nz(res);
    }
}
