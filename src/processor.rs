// The 6502/65C02 core: a two-phase evaluation loop (resolve-and-cost, then
// execute), interrupt delivery between instructions, and the interactive
// monitor. Operand resolution lives here; what each mnemonic does with a
// resolved operand lives in the instructions module.

use crate::conversions::same_page;
use crate::instructions::{condition_met, Mnemonic};
use crate::memory::{Bus, BusPtr};
use crate::opcodes::{opcode_table, AddrMode, OpInfo, Variant};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::io::prelude::*;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use termion::{clear, color, cursor};

pub const NMI_VECTOR: u16 = 0xfffa;
pub const RESET_VECTOR: u16 = 0xfffc;
pub const IRQ_VECTOR: u16 = 0xfffe;

// Hardware interrupt entry is charged on top of the next instruction.
const INTERRUPT_CYCLES: u32 = 6;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Flag {
    C = 0,
    Z = 1,
    I = 2,
    D = 3,
    B = 4,
    U = 5,
    V = 6,
    N = 7,
}

/// A fully resolved operand. Addresses are effective; no further indexing
/// or indirection remains to be done at execute time.
#[derive(Debug, Copy, Clone)]
pub enum Operand {
    Implied,
    Accumulator,
    Immediate(u8),
    Address(u16),
    Relative(i8),
    BitBranch { zp: u8, offset: i8 },
}

#[derive(Copy, Clone)]
struct Prefetch {
    info: OpInfo,
    operand: Operand,
    cycles: u32,
}

pub struct CPU {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub pc: u16,
    pub sp: u8,              // stack lives in page 1, descending, empty-stack
    pub p: u8,
    pub variant: Variant,
    pub irq_waiting: bool,
    pub nmi_waiting: bool,
    pub bus: BusPtr,
    prefetch: Option<Prefetch>,
    table: [OpInfo; 256],
}

impl CPU {
    pub fn new(variant: Variant, bus: Bus) -> Self {
        CPU {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            sp: 0xfd,
            p: 1 << Flag::U as u8 | 1 << Flag::I as u8,
            variant,
            irq_waiting: false,
            nmi_waiting: false,
            bus: Rc::new(RefCell::new(bus)),
            prefetch: None,
            table: opcode_table(variant),
        }
    }

    /// Reset: PC from the reset vector (or an explicit override), I set,
    /// pending interrupts discarded. CMOS parts also clear decimal mode.
    pub fn reset(&mut self, start: Option<u16>) {
        self.pc = match start {
            Some(pc) => pc,
            None => self.read_word(RESET_VECTOR),
        };
        self.sp = 0xfd;
        self.set_flag(Flag::I, true);
        if self.variant == Variant::Cmos {
            self.set_flag(Flag::D, false);
        }
        self.irq_waiting = false;
        self.nmi_waiting = false;
        self.prefetch = None;
    }

    pub fn flag(&self, flag: Flag) -> bool {
        get_bit(self.p, flag as usize)
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        set_bit(&mut self.p, flag as usize, value);
    }

    pub fn set_nz(&mut self, value: u8) {
        self.set_flag(Flag::N, value & 0x80 != 0);
        self.set_flag(Flag::Z, value == 0);
    }

    pub fn read_byte(&mut self, address: u16) -> u8 {
        self.bus.borrow_mut().read(address)
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        self.bus.borrow_mut().write(address, value);
    }

    pub fn read_word(&mut self, address: u16) -> u16 {
        let lo = self.read_byte(address);
        let hi = self.read_byte(address.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub fn push(&mut self, value: u8) {
        self.write_byte(0x0100 | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pop(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.read_byte(0x0100 | self.sp as u16)
    }

    pub fn read_operand(&mut self, operand: Operand) -> u8 {
        match operand {
            Operand::Accumulator => self.a,
            Operand::Immediate(value) => value,
            Operand::Address(address) => self.read_byte(address),
            _ => panic!("operand {:?} is not readable", operand),
        }
    }

    pub fn write_operand(&mut self, operand: Operand, value: u8) {
        match operand {
            Operand::Accumulator => self.a = value,
            Operand::Address(address) => self.write_byte(address, value),
            _ => panic!("operand {:?} is not writable", operand),
        }
    }

    /// Phase one: decode the instruction at PC, resolve its operand, and
    /// return its full cycle cost: base cost plus page-cross, branch-taken
    /// and variant penalties. The resolution is cached for execute_next().
    pub fn clocks_for_next(&mut self) -> u32 {
        if let Some(ref prefetch) = self.prefetch {
            return prefetch.cycles;
        }
        let opcode = self.read_byte(self.pc);
        let info = self.table[opcode as usize];
        let mut cycles = info.cycles as u32;
        let pc1 = self.pc.wrapping_add(1);
        let operand = match info.mode {
            AddrMode::Implied => Operand::Implied,
            AddrMode::Accumulator => Operand::Accumulator,
            AddrMode::Immediate => Operand::Immediate(self.read_byte(pc1)),
            AddrMode::Zeropage => Operand::Address(self.read_byte(pc1) as u16),
            AddrMode::ZeropageX => {
                let zp = self.read_byte(pc1).wrapping_add(self.x);
                Operand::Address(zp as u16)
            }
            AddrMode::ZeropageY => {
                let zp = self.read_byte(pc1).wrapping_add(self.y);
                Operand::Address(zp as u16)
            }
            AddrMode::Absolute => Operand::Address(self.read_word(pc1)),
            AddrMode::AbsoluteX => {
                let base = self.read_word(pc1);
                let address = base.wrapping_add(self.x as u16);
                let crossed = !same_page(base, address);
                if info.page_penalty && crossed {
                    cycles += 1;
                }
                // 65C02 shaves a cycle off shift/rotate abs,X without a cross
                if self.variant == Variant::Cmos
                    && !crossed
                    && matches!(
                        info.op,
                        Mnemonic::Asl | Mnemonic::Lsr | Mnemonic::Rol | Mnemonic::Ror
                    )
                {
                    cycles -= 1;
                }
                Operand::Address(address)
            }
            AddrMode::AbsoluteY => {
                let base = self.read_word(pc1);
                let address = base.wrapping_add(self.y as u16);
                if info.page_penalty && !same_page(base, address) {
                    cycles += 1;
                }
                Operand::Address(address)
            }
            AddrMode::Indirect => {
                let pointer = self.read_word(pc1);
                let lo = self.read_byte(pointer);
                let hi = if self.variant == Variant::Nmos && pointer & 0x00ff == 0x00ff {
                    // the NMOS indirect jump never carries into the high byte
                    self.read_byte(pointer & 0xff00)
                } else {
                    self.read_byte(pointer.wrapping_add(1))
                };
                Operand::Address(u16::from_le_bytes([lo, hi]))
            }
            AddrMode::AbsIndirectX => {
                let pointer = self.read_word(pc1).wrapping_add(self.x as u16);
                Operand::Address(self.read_word(pointer))
            }
            AddrMode::XIndirect => {
                let zp = self.read_byte(pc1).wrapping_add(self.x);
                Operand::Address(self.read_zp_word(zp))
            }
            AddrMode::IndirectY => {
                let zp = self.read_byte(pc1);
                let base = self.read_zp_word(zp);
                let address = base.wrapping_add(self.y as u16);
                if info.page_penalty && !same_page(base, address) {
                    cycles += 1;
                }
                Operand::Address(address)
            }
            AddrMode::ZpIndirect => {
                let zp = self.read_byte(pc1);
                Operand::Address(self.read_zp_word(zp))
            }
            AddrMode::Relative => {
                let offset = self.read_byte(pc1) as i8;
                if condition_met(info.op, self) {
                    cycles += 1;
                    let next = self.pc.wrapping_add(2);
                    let target = next.wrapping_add(offset as i16 as u16);
                    if !same_page(next, target) {
                        cycles += 1;
                    }
                }
                Operand::Relative(offset)
            }
            AddrMode::BitBranch => {
                let zp = self.read_byte(pc1);
                let offset = self.read_byte(self.pc.wrapping_add(2)) as i8;
                let m = self.read_byte(zp as u16);
                let taken = match info.op {
                    Mnemonic::Bbr(bit) => m & (1 << bit) == 0,
                    Mnemonic::Bbs(bit) => m & (1 << bit) != 0,
                    _ => false,
                };
                if taken {
                    cycles += 1;
                    let next = self.pc.wrapping_add(3);
                    if !same_page(next, next.wrapping_add(offset as i16 as u16)) {
                        cycles += 1;
                    }
                }
                Operand::BitBranch { zp, offset }
            }
        };
        if self.variant == Variant::Cmos
            && self.flag(Flag::D)
            && info.mode == AddrMode::AbsoluteX
            && matches!(info.op, Mnemonic::Adc | Mnemonic::Sbc)
        {
            cycles += 1;
        }
        self.prefetch = Some(Prefetch { info, operand, cycles });
        cycles
    }

    fn read_zp_word(&mut self, zp: u8) -> u16 {
        let lo = self.read_byte(zp as u16);
        let hi = self.read_byte(zp.wrapping_add(1) as u16);
        u16::from_le_bytes([lo, hi])
    }

    /// Phase two: deliver a pending interrupt if one is due, otherwise run
    /// the cached instruction. Returns the cycles charged beyond what
    /// clocks_for_next() already reported (6 for hardware interrupt entry).
    pub fn execute_next(&mut self) -> u32 {
        if self.prefetch.is_none() {
            self.clocks_for_next();
        }
        if self.nmi_waiting {
            self.nmi_waiting = false;
            self.prefetch = None;
            self.hardware_interrupt(NMI_VECTOR);
            return INTERRUPT_CYCLES;
        }
        if self.irq_waiting && !self.flag(Flag::I) {
            self.irq_waiting = false;
            self.prefetch = None;
            self.hardware_interrupt(IRQ_VECTOR);
            return INTERRUPT_CYCLES;
        }
        if let Some(prefetch) = self.prefetch.take() {
            self.pc = self.pc.wrapping_add(prefetch.info.mode.length());
            prefetch.info.op.execute(self, prefetch.operand);
        }
        0
    }

    fn hardware_interrupt(&mut self, vector: u16) {
        let ret = self.pc;
        self.push((ret >> 8) as u8);
        self.push(ret as u8);
        let p = (self.p | 1 << Flag::U as u8) & !(1 << Flag::B as u8);
        self.push(p);
        self.set_flag(Flag::I, true);
        if self.variant == Variant::Cmos {
            self.set_flag(Flag::D, false);
        }
        self.pc = self.read_word(vector);
    }

    /// BRK. PC has already advanced past the opcode; the pushed return
    /// address skips the signature byte as well.
    pub fn software_interrupt(&mut self) {
        let ret = self.pc.wrapping_add(1);
        self.push((ret >> 8) as u8);
        self.push(ret as u8);
        let p = self.p | 1 << Flag::B as u8 | 1 << Flag::U as u8;
        self.push(p);
        self.set_flag(Flag::I, true);
        if self.variant == Variant::Cmos {
            self.set_flag(Flag::D, false);
        }
        self.pc = self.read_word(IRQ_VECTOR);
    }

    /// Collect interrupt lines from the bus devices into the pending
    /// latches. Called between instructions by the run loop.
    pub fn serve_interrupt_requests(&mut self) {
        let (irq, nmi) = self.bus.borrow_mut().interrupt_requests();
        if irq {
            self.irq_waiting = true;
        }
        if nmi {
            self.nmi_waiting = true;
        }
    }

    /// One-line disassembly of the instruction at `pc`, for the monitor.
    pub fn disassemble_at(&mut self, pc: u16) -> String {
        let opcode = self.read_byte(pc);
        let info = self.table[opcode as usize];
        let b1 = self.read_byte(pc.wrapping_add(1));
        let b2 = self.read_byte(pc.wrapping_add(2));
        let operand = match info.mode {
            AddrMode::Implied => String::new(),
            AddrMode::Accumulator => String::from(" a"),
            AddrMode::Immediate => format!(" #${:02x}", b1),
            AddrMode::Zeropage => format!(" ${:02x}", b1),
            AddrMode::ZeropageX => format!(" ${:02x},x", b1),
            AddrMode::ZeropageY => format!(" ${:02x},y", b1),
            AddrMode::Absolute => format!(" ${:02x}{:02x}", b2, b1),
            AddrMode::AbsoluteX => format!(" ${:02x}{:02x},x", b2, b1),
            AddrMode::AbsoluteY => format!(" ${:02x}{:02x},y", b2, b1),
            AddrMode::Indirect => format!(" (${:02x}{:02x})", b2, b1),
            AddrMode::AbsIndirectX => format!(" (${:02x}{:02x},x)", b2, b1),
            AddrMode::XIndirect => format!(" (${:02x},x)", b1),
            AddrMode::IndirectY => format!(" (${:02x}),y", b1),
            AddrMode::ZpIndirect => format!(" (${:02x})", b1),
            AddrMode::Relative => {
                let target = pc.wrapping_add(2).wrapping_add(b1 as i8 as i16 as u16);
                format!(" ${:04x}", target)
            }
            AddrMode::BitBranch => {
                let target = pc.wrapping_add(3).wrapping_add(b2 as i8 as i16 as u16);
                format!(" ${:02x},${:04x}", b1, target)
            }
        };
        format!("{}{}", info.op.as_asm(), operand)
    }
}

/// Pause/step latch between a controlling thread and the CPU thread. The
/// CPU parks on the condvar between instructions while `paused` holds; the
/// controller releases it whole (resume) or one instruction at a time
/// (step, which blocks the controller until the instruction retires).
pub struct BreakGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

#[derive(Default)]
struct GateState {
    paused: bool,
    step: bool,
    stepped: bool,
}

impl BreakGate {
    pub fn new() -> Arc<Self> {
        Arc::new(BreakGate { state: Mutex::new(GateState::default()), cv: Condvar::new() })
    }

    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        state.step = false;
        self.cv.notify_all();
    }

    /// Release the CPU for exactly one instruction and wait for it.
    pub fn step(&self) {
        let mut state = self.state.lock().unwrap();
        state.step = true;
        self.cv.notify_all();
        while !state.stepped {
            state = self.cv.wait(state).unwrap();
        }
        state.stepped = false;
    }

    /// CPU-side checkpoint between instructions.
    pub fn checkpoint(&self) {
        let mut state = self.state.lock().unwrap();
        while state.paused && !state.step {
            state = self.cv.wait(state).unwrap();
        }
        if state.step {
            state.step = false;
            state.stepped = true;
            self.cv.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }
}

impl fmt::Display for CPU {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        s.push_str(&format!("{r}╔═══════════════════════════════╗", r = cursor::Goto(1, 2)));
        s.push_str(&format!("{r}║ CPU state                     ║", r = cursor::Goto(1, 3)));
        s.push_str(&format!("{r}╟────┬──────┬────┬──────────────╢", r = cursor::Goto(1, 4)));
        s.push_str(&format!(
            "{r}║ A  │   {a:02x} │ PC │         {pc:04x} ║",
            a = self.a,
            pc = self.pc,
            r = cursor::Goto(1, 5)
        ));
        s.push_str(&format!(
            "{r}║ X  │   {x:02x} │ SP │         01{sp:02x} ║",
            x = self.x,
            sp = self.sp,
            r = cursor::Goto(1, 6)
        ));
        s.push_str(&format!(
            "{r}║ Y  │   {y:02x} │    │              ║",
            y = self.y,
            r = cursor::Goto(1, 7)
        ));
        s.push_str(&format!("{r}╟────┼─┬─┬──┴─┬──┼─┬─┬─┬────────╢", r = cursor::Goto(1, 8)));
        s.push_str(&format!("{r}║    │N│V│ D  │I │Z│C│ │        ║", r = cursor::Goto(1, 9)));
        s.push_str(&format!(
            "{r}║ P  │{n}│{v}│ {d}  │{i} │{z}│{c}│ │        ║",
            n = self.flag(Flag::N) as u8,
            v = self.flag(Flag::V) as u8,
            d = self.flag(Flag::D) as u8,
            i = self.flag(Flag::I) as u8,
            z = self.flag(Flag::Z) as u8,
            c = self.flag(Flag::C) as u8,
            r = cursor::Goto(1, 10)
        ));
        s.push_str(&format!("{r}╚════╧═╧═╧════╧══╧═╧═╧═╧════════╝", r = cursor::Goto(1, 11)));
        write!(f, "{}", s)
    }
}

pub struct Debugger {
    breakpoints: HashSet<u16>,
    code_running: bool,
    last_cmd: DebugCommand,
}

#[derive(PartialEq, Clone)]
enum DebugCommand {
    Quit,
    SetBreakpoint(Option<String>),
    DeleteBreakpoint(Option<String>),
    Continue,
    Step,
}

pub enum DebugAction {
    Run,
    Quit,
}

impl Debugger {
    pub fn new() -> Box<Self> {
        Box::new(Debugger {
            breakpoints: HashSet::new(),
            code_running: false,
            last_cmd: DebugCommand::Step,
        })
    }

    pub fn update(&mut self, cpu: &mut CPU) -> DebugAction {
        if self.code_running && !self.breakpoints.contains(&cpu.pc) {
            return DebugAction::Run;
        }
        self.code_running = false;
        loop {
            self.draw_user_interface(cpu);
            match self.get_command() {
                DebugCommand::Quit => return DebugAction::Quit,
                DebugCommand::SetBreakpoint(a) => {
                    if let Some(address) = parse_address(&a) {
                        self.breakpoints.insert(address);
                        println!("Breakpoint created.");
                    } else {
                        println!("Invalid address!");
                    }
                }
                DebugCommand::DeleteBreakpoint(a) => {
                    if let Some(address) = parse_address(&a) {
                        self.breakpoints.remove(&address);
                        println!("Breakpoint deleted.");
                    } else {
                        println!("Invalid address!");
                    }
                }
                DebugCommand::Continue => {
                    self.code_running = true;
                    return DebugAction::Run;
                }
                DebugCommand::Step => return DebugAction::Run,
            }
        }
    }

    fn get_command(&mut self) -> DebugCommand {
        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            return DebugCommand::Quit;
        }
        let mut cmd = input.split_whitespace();
        match cmd.next() {
            Some("q") => DebugCommand::Quit,
            Some("s") | Some("n") => DebugCommand::Step,
            Some("b") => DebugCommand::SetBreakpoint(cmd.next().map(String::from)),
            Some("d") => DebugCommand::DeleteBreakpoint(cmd.next().map(String::from)),
            Some("c") => DebugCommand::Continue,
            _ => self.last_cmd.clone(),
        }
    }

    fn draw_user_interface(&mut self, cpu: &mut CPU) {
        print!("{c}{tl}{cpu}", c = clear::All, tl = cursor::Goto(1, 1), cpu = cpu);
        let pc = cpu.pc;
        let marker = if self.breakpoints.contains(&pc) {
            format!("{}*{}", color::Fg(color::Red), color::Fg(color::Reset))
        } else {
            String::from(" ")
        };
        println!(
            "{r}{m}{g}{pc:04x}  {asm}{n}",
            r = cursor::Goto(1, 13),
            m = marker,
            g = color::Fg(color::Green),
            pc = pc,
            asm = cpu.disassemble_at(pc),
            n = color::Fg(color::Reset)
        );
        println!(
            "{r}Monitor attached. n steps, c continues, b/d <addr> sets/deletes a breakpoint, q quits.",
            r = cursor::Goto(1, 15)
        );
        print!("{r}> ", r = cursor::Goto(1, 16));
        let _ = io::stdout().flush();
    }
}

fn parse_address(address: &Option<String>) -> Option<u16> {
    match address {
        Some(addr) => u16::from_str_radix(addr, 16).ok(),
        None => None,
    }
}

pub fn set_bit(bitfield: &mut u8, bit: usize, value: bool) {
    if value {
        *bitfield |= 1 << bit;
    } else {
        *bitfield &= !(1 << bit);
    }
}

pub fn get_bit(bitfield: u8, bit: usize) -> bool {
    bitfield & (1 << bit) != 0
}
