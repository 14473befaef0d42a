// Core CPU behavior: cycle costs against the oracle values, BCD
// arithmetic, stack semantics, interrupt delivery, and the NMOS/CMOS
// variant deltas.

use retro65::machine::Configuration;
use retro65::memory::Bus;
use retro65::opcodes::Variant;
use retro65::processor::{Flag, CPU, IRQ_VECTOR, NMI_VECTOR, RESET_VECTOR};

const CODE: u16 = 0x2000;

/// A CPU over the full machine bus with the given bytes at $2000 and the
/// reset vector pointing there.
fn cpu_with(variant: Variant, code: &[u8]) -> CPU {
    let mut rom = vec![0u8; 0x4000];
    rom[(RESET_VECTOR - 0xc000) as usize] = CODE as u8;
    rom[(RESET_VECTOR - 0xc000) as usize + 1] = (CODE >> 8) as u8;
    rom[(IRQ_VECTOR - 0xc000) as usize] = 0x00;
    rom[(IRQ_VECTOR - 0xc000) as usize + 1] = 0xe0;
    rom[(NMI_VECTOR - 0xc000) as usize] = 0x00;
    rom[(NMI_VECTOR - 0xc000) as usize + 1] = 0xe1;
    let config = Configuration::new(rom);
    let bus = retro65::machine::build_bus(&config);
    let mut cpu = CPU::new(variant, bus);
    cpu.reset(None);
    for (j, &byte) in code.iter().enumerate() {
        cpu.write_byte(CODE + j as u16, byte);
    }
    cpu
}

fn bare_cpu(variant: Variant, code: &[u8]) -> CPU {
    let mut cpu = CPU::new(variant, Bus::new(0xfff0));
    cpu.pc = CODE;
    for (j, &byte) in code.iter().enumerate() {
        cpu.write_byte(CODE + j as u16, byte);
    }
    cpu
}

fn step(cpu: &mut CPU) -> u32 {
    let cost = cpu.clocks_for_next();
    cost + cpu.execute_next()
}

#[test]
fn opcode_cost_oracle() {
    // (code, x, y, expected cycles): spot grid over the documented set
    let cases: &[(&[u8], u8, u8, u32)] = &[
        (&[0xa9, 0x01], 0, 0, 2),             // LDA #imm
        (&[0xa5, 0x10], 0, 0, 3),             // LDA zp
        (&[0xb5, 0x10], 5, 0, 4),             // LDA zp,X
        (&[0xad, 0x00, 0x30], 0, 0, 4),       // LDA abs
        (&[0xbd, 0xf0, 0x30], 0x05, 0, 4),    // LDA abs,X same page
        (&[0xbd, 0xf0, 0x30], 0x20, 0, 5),    // LDA abs,X page cross
        (&[0xb9, 0xf0, 0x30], 0, 0x20, 5),    // LDA abs,Y page cross
        (&[0x9d, 0xf0, 0x30], 0x20, 0, 5),    // STA abs,X never penalized
        (&[0xa1, 0x10], 0, 0, 6),             // LDA (zp,X)
        (&[0xb1, 0x10], 0, 0, 5),             // LDA (zp),Y same page
        (&[0x06, 0x10], 0, 0, 5),             // ASL zp
        (&[0x1e, 0xf0, 0x30], 5, 0, 7),       // ASL abs,X (NMOS, fixed)
        (&[0x48], 0, 0, 3),                   // PHA
        (&[0x68], 0, 0, 4),                   // PLA
        (&[0xea], 0, 0, 2),                   // NOP
        (&[0x4c, 0x00, 0x21], 0, 0, 3),       // JMP abs
        (&[0x6c, 0x00, 0x21], 0, 0, 5),       // JMP (ind), NMOS
    ];
    for (code, x, y, expected) in cases {
        let mut cpu = bare_cpu(Variant::Nmos, code);
        cpu.x = *x;
        cpu.y = *y;
        assert_eq!(step(&mut cpu), *expected, "code {:02x?}", code);
    }
}

#[test]
fn branch_costs_follow_taken_and_page_cross() {
    // BNE not taken: 2
    let mut cpu = bare_cpu(Variant::Nmos, &[0xd0, 0x10]);
    cpu.set_flag(Flag::Z, true);
    assert_eq!(step(&mut cpu), 2);
    assert_eq!(cpu.pc, CODE + 2);

    // BNE taken, same page: 3
    let mut cpu = bare_cpu(Variant::Nmos, &[0xd0, 0x10]);
    cpu.set_flag(Flag::Z, false);
    assert_eq!(step(&mut cpu), 3);
    assert_eq!(cpu.pc, CODE + 2 + 0x10);

    // BNE taken across a page: 4
    let mut cpu = bare_cpu(Variant::Nmos, &[0xd0, 0x7f]);
    cpu.pc = 0x20f0;
    cpu.write_byte(0x20f0, 0xd0);
    cpu.write_byte(0x20f1, 0x7f);
    cpu.set_flag(Flag::Z, false);
    assert_eq!(step(&mut cpu), 4);
    assert_eq!(cpu.pc, 0x20f2 + 0x7f);
}

#[test]
fn jsr_rts_round_trip() {
    let mut cpu = bare_cpu(Variant::Nmos, &[0x20, 0x00, 0x21]); // JSR $2100
    cpu.write_byte(0x2100, 0x60); // RTS
    assert_eq!(step(&mut cpu), 6);
    assert_eq!(cpu.pc, 0x2100);
    assert_eq!(step(&mut cpu), 6);
    assert_eq!(cpu.pc, CODE + 3);
}

#[test]
fn adc_bcd_scenario() {
    // A=$15, D=1, C=0; ADC #$27 gives A=$42, C=0, Z=0, N=0
    let mut cpu = bare_cpu(Variant::Nmos, &[0x69, 0x27]);
    cpu.a = 0x15;
    cpu.set_flag(Flag::D, true);
    cpu.set_flag(Flag::C, false);
    step(&mut cpu);
    assert_eq!(cpu.a, 0x42);
    assert!(!cpu.flag(Flag::C));
    assert!(!cpu.flag(Flag::Z));
    assert!(!cpu.flag(Flag::N));
}

#[test]
fn bcd_add_matches_decimal_arithmetic() {
    for a in 0..100u16 {
        for m in (0..100u16).step_by(7) {
            let mut cpu = bare_cpu(Variant::Nmos, &[0x69, 0x00]);
            cpu.write_byte(CODE + 1, retro65::conversions::to_bcd(m as u8));
            cpu.a = retro65::conversions::to_bcd(a as u8);
            cpu.set_flag(Flag::D, true);
            cpu.set_flag(Flag::C, false);
            step(&mut cpu);
            let sum = a + m;
            assert_eq!(
                retro65::conversions::from_bcd(cpu.a),
                sum % 100,
                "{} + {}",
                a,
                m
            );
            assert_eq!(cpu.flag(Flag::C), sum > 99, "{} + {}", a, m);
        }
    }
}

#[test]
fn bcd_sbc_is_the_inverse() {
    for a in (0..100u16).step_by(3) {
        for m in (0..100u16).step_by(11) {
            let mut cpu = bare_cpu(Variant::Nmos, &[0xe9, 0x00]);
            cpu.write_byte(CODE + 1, retro65::conversions::to_bcd(m as u8));
            cpu.a = retro65::conversions::to_bcd(a as u8);
            cpu.set_flag(Flag::D, true);
            cpu.set_flag(Flag::C, true); // no borrow
            step(&mut cpu);
            let expected = (100 + a - m) % 100;
            assert_eq!(retro65::conversions::from_bcd(cpu.a), expected, "{} - {}", a, m);
            assert_eq!(cpu.flag(Flag::C), a >= m, "{} - {}", a, m);
        }
    }
}

#[test]
fn binary_adc_overflow_flag() {
    let mut cpu = bare_cpu(Variant::Nmos, &[0x69, 0x50]);
    cpu.a = 0x50;
    step(&mut cpu);
    assert_eq!(cpu.a, 0xa0);
    assert!(cpu.flag(Flag::V));
    assert!(cpu.flag(Flag::N));
}

#[test]
fn stack_wraps_through_page_one() {
    let mut cpu = bare_cpu(Variant::Nmos, &[0xea]);
    cpu.sp = 0xfd;
    for j in 0..257u16 {
        cpu.push(j as u8);
    }
    // 257 pushes move SP down by 257 mod 256 = 1
    assert_eq!(cpu.sp, 0xfc);
    // the 257th push wrapped around and overwrote the first slot
    assert_eq!(cpu.read_byte(0x01fd), 0);
    assert_eq!(cpu.read_byte(0x01fc), 1);
    assert_eq!(cpu.read_byte(0x01fe), 255);
}

#[test]
fn irq_delivery_frame() {
    let mut cpu = cpu_with(Variant::Nmos, &[0xea, 0xea]);
    cpu.set_flag(Flag::I, false);
    cpu.set_flag(Flag::D, true);
    cpu.irq_waiting = true;
    let pc_before = cpu.pc;
    let sp_before = cpu.sp;
    let extra = cpu.execute_next();
    assert_eq!(extra, 6, "hardware interrupt entry surcharge");
    assert_eq!(cpu.pc, 0xe000);
    assert!(cpu.flag(Flag::I));
    // NMOS leaves decimal mode alone
    assert!(cpu.flag(Flag::D));
    let status = cpu.read_byte(0x0100 | (sp_before - 2) as u16);
    assert_eq!(status & 1 << Flag::B as u8, 0, "B clear on hardware IRQ");
    assert_ne!(status & 1 << Flag::U as u8, 0, "bit 5 set");
    let lo = cpu.read_byte(0x0100 | (sp_before - 1) as u16);
    let hi = cpu.read_byte(0x0100 | sp_before as u16);
    assert_eq!(u16::from_le_bytes([lo, hi]), pc_before);
}

#[test]
fn irq_masked_by_i_flag_and_nmi_wins() {
    let mut cpu = cpu_with(Variant::Nmos, &[0xea, 0xea]);
    cpu.set_flag(Flag::I, true);
    cpu.irq_waiting = true;
    cpu.execute_next();
    assert_eq!(cpu.pc, 0x2001, "masked IRQ executes the instruction instead");

    let mut cpu = cpu_with(Variant::Nmos, &[0xea, 0xea]);
    cpu.set_flag(Flag::I, false);
    cpu.irq_waiting = true;
    cpu.nmi_waiting = true;
    cpu.execute_next();
    assert_eq!(cpu.pc, 0xe100, "NMI has priority");
}

#[test]
fn brk_pushes_past_signature_byte() {
    let mut cpu = cpu_with(Variant::Nmos, &[0x00, 0xff, 0xea]);
    let sp_before = cpu.sp;
    step(&mut cpu);
    assert_eq!(cpu.pc, 0xe000);
    let status = cpu.read_byte(0x0100 | (sp_before - 2) as u16);
    assert_ne!(status & 1 << Flag::B as u8, 0, "B set on BRK");
    let lo = cpu.read_byte(0x0100 | (sp_before - 1) as u16);
    let hi = cpu.read_byte(0x0100 | sp_before as u16);
    assert_eq!(u16::from_le_bytes([lo, hi]), CODE + 2, "return skips the signature byte");
}

#[test]
fn nmos_indirect_jump_page_bug() {
    let mut cpu = bare_cpu(Variant::Nmos, &[0x6c, 0xff, 0x30]);
    cpu.write_byte(0x30ff, 0x34);
    cpu.write_byte(0x3100, 0x12); // correct high byte
    cpu.write_byte(0x3000, 0x56); // buggy high byte source
    assert_eq!(step(&mut cpu), 5);
    assert_eq!(cpu.pc, 0x5634, "NMOS wraps inside the page");

    let mut cpu = bare_cpu(Variant::Cmos, &[0x6c, 0xff, 0x30]);
    cpu.write_byte(0x30ff, 0x34);
    cpu.write_byte(0x3100, 0x12);
    cpu.write_byte(0x3000, 0x56);
    assert_eq!(step(&mut cpu), 6, "the fix costs a cycle");
    assert_eq!(cpu.pc, 0x1234);
}

#[test]
fn cmos_decimal_absx_penalty() {
    let mut cpu = bare_cpu(Variant::Cmos, &[0x7d, 0x00, 0x30]); // ADC abs,X
    cpu.set_flag(Flag::D, true);
    assert_eq!(step(&mut cpu), 5);

    let mut cpu = bare_cpu(Variant::Cmos, &[0x7d, 0x00, 0x30]);
    cpu.set_flag(Flag::D, false);
    assert_eq!(step(&mut cpu), 4);
}

#[test]
fn cmos_shift_absx_discount() {
    let mut cpu = bare_cpu(Variant::Cmos, &[0x1e, 0x00, 0x30]); // ASL abs,X, no cross
    assert_eq!(step(&mut cpu), 6);

    let mut cpu = bare_cpu(Variant::Cmos, &[0x1e, 0xf0, 0x30]);
    cpu.x = 0x20; // crosses
    assert_eq!(step(&mut cpu), 7);
}

#[test]
fn cmos_extensions_execute() {
    // BRA
    let mut cpu = bare_cpu(Variant::Cmos, &[0x80, 0x10]);
    assert_eq!(step(&mut cpu), 3);
    assert_eq!(cpu.pc, CODE + 2 + 0x10);

    // STZ zp
    let mut cpu = bare_cpu(Variant::Cmos, &[0x64, 0x42]);
    cpu.write_byte(0x42, 0xaa);
    step(&mut cpu);
    assert_eq!(cpu.read_byte(0x42), 0);

    // PHX/PLY pair
    let mut cpu = bare_cpu(Variant::Cmos, &[0xda, 0x7a]);
    cpu.x = 0x5a;
    step(&mut cpu);
    step(&mut cpu);
    assert_eq!(cpu.y, 0x5a);

    // TSB sets bits and Z from the old AND
    let mut cpu = bare_cpu(Variant::Cmos, &[0x04, 0x42]);
    cpu.a = 0x0f;
    cpu.write_byte(0x42, 0xf0);
    step(&mut cpu);
    assert_eq!(cpu.read_byte(0x42), 0xff);
    assert!(cpu.flag(Flag::Z));

    // INC A
    let mut cpu = bare_cpu(Variant::Cmos, &[0x1a]);
    cpu.a = 0x7f;
    step(&mut cpu);
    assert_eq!(cpu.a, 0x80);
    assert!(cpu.flag(Flag::N));

    // (zp) mode
    let mut cpu = bare_cpu(Variant::Cmos, &[0xb2, 0x40]);
    cpu.write_byte(0x40, 0x00);
    cpu.write_byte(0x41, 0x31);
    cpu.write_byte(0x3100, 0x77);
    assert_eq!(step(&mut cpu), 5);
    assert_eq!(cpu.a, 0x77);
}

#[test]
fn rockwell_bit_instructions() {
    // SMB3 then BBS3 taken
    let mut cpu = bare_cpu(Variant::Cmos, &[0xb7, 0x40, 0xbf, 0x40, 0x10]);
    cpu.write_byte(0x40, 0x00);
    step(&mut cpu); // SMB3
    assert_eq!(cpu.read_byte(0x40), 0x08);
    let cycles = step(&mut cpu); // BBS3, taken
    assert_eq!(cycles, 6);
    assert_eq!(cpu.pc, CODE + 5 + 0x10);

    // BBR3 not taken once the bit is set
    let mut cpu = bare_cpu(Variant::Cmos, &[0x3f, 0x40, 0x10]);
    cpu.write_byte(0x40, 0x08);
    assert_eq!(step(&mut cpu), 5);
    assert_eq!(cpu.pc, CODE + 3);

    // RMB clears it again
    let mut cpu = bare_cpu(Variant::Cmos, &[0x37, 0x40]);
    cpu.write_byte(0x40, 0xff);
    step(&mut cpu);
    assert_eq!(cpu.read_byte(0x40), 0xf7);
}

#[test]
fn undocumented_opcodes_are_sized_nops() {
    // $44 NOP zp: length 2, 3 cycles, no state change
    let mut cpu = bare_cpu(Variant::Nmos, &[0x44, 0x42, 0xa9, 0x33]);
    cpu.write_byte(0x42, 0x99);
    assert_eq!(step(&mut cpu), 3);
    assert_eq!(cpu.pc, CODE + 2);
    assert_eq!(cpu.read_byte(0x42), 0x99);
    step(&mut cpu);
    assert_eq!(cpu.a, 0x33);
}

#[test]
fn cmos_interrupt_clears_decimal() {
    let mut cpu = cpu_with(Variant::Cmos, &[0xea]);
    cpu.set_flag(Flag::I, false);
    cpu.set_flag(Flag::D, true);
    cpu.irq_waiting = true;
    cpu.execute_next();
    assert!(!cpu.flag(Flag::D));
}

#[test]
fn prefetch_is_stable_across_both_phases() {
    let mut cpu = bare_cpu(Variant::Nmos, &[0xa9, 0x42]);
    let c1 = cpu.clocks_for_next();
    let c2 = cpu.clocks_for_next();
    assert_eq!(c1, c2, "repeat queries hit the cache");
    cpu.execute_next();
    assert_eq!(cpu.a, 0x42);
}
