// The home65 machine: memory map and bus assembly. The BASIC interpreter
// ROM is an opaque image loaded at $C000 and drives every coprocessor
// through the register windows below.

use crate::clock;
use crate::devices::Timer;
use crate::dma::{Blitter, Dma};
use crate::fio::Fio;
use crate::memory::Bus;
use crate::music::MusicCtl;
use crate::nic::Nic;
use crate::opcodes::Variant;
use crate::sid::Sid;
use crate::vgc::Vgc;
use crate::xmc::Xmc;
use crate::SharedState;
use std::path::PathBuf;

// Memory map
//
//   $0000-$00FF   zero page
//   $0100-$01FF   stack
//   $0200-$027F   system vector table
//     $0200       Ctrl-C latch        $0201   Ctrl-C timeout
//     $0204       ready flag (non-zero at the input prompt)
//     $0210-$021F input/output/load/save vectors
//     $0220-$027F IRQ/NMI trampoline code area
//   $0280-$9FFF   BASIC program RAM
//   $A000-$A01F   VGC core + command registers
//   $A040-$A0BF   sprite registers, 16 × 8 bytes
//                 (X lo, X hi, Y lo, Y hi, shape, flags, priority,
//                  transparent color)
//   $A100-$A13F   NIC registers
//   $AA00-$B1CF   character RAM, 80×25
//   $B1D0-$B99F   color RAM, 80×25
//   $B9A0-$B9EF   FIO registers, filename buffer at $B9B0
//   $BA00-$BA3F   XMC registers, windows at $BA16, name buffer at $BA24
//   $BA40-$BA4F   timer
//   $BA50-$BA5F   music engine: note readback, flags, command port
//   $BA60-$BA7F   DMA engine
//   $BA80-$BA9F   blitter
//   $BC00-$BFFF   XMC window region, 4 × 256 bytes
//   $C000-$FFFF   BASIC ROM; writes dropped except into the SID windows
//     $D400-$D41C SID #1    $D420-$D43C SID #2    $D500-$D51C mirror → #2
//   $FFFA/$FFFC/$FFFE  NMI / RESET / IRQ vectors

pub const ROM_BASE: u16 = 0xc000;
pub const VECTOR_TABLE: u16 = 0x0200;
pub const READY_FLAG: u16 = 0x0204;
pub const BASIC_RAM: u16 = 0x0280;
pub const TIMER_BASE: u16 = 0xba40;

/// Everything the CPU thread needs to assemble the machine. Built on the
/// host side; carried into the thread that owns the bus.
pub struct Configuration {
    pub rom: Vec<u8>,
    pub start_address: Option<u16>,
    pub variant: Variant,
    pub freq: f64,
    pub turbo: bool,
    pub telemetry: bool,
    pub storage_dir: PathBuf,
    pub shared: SharedState,
}

impl Configuration {
    pub fn new(rom: Vec<u8>) -> Self {
        Configuration {
            rom,
            start_address: None,
            variant: Variant::Cmos,
            freq: clock::DEFAULT_FREQ,
            turbo: false,
            telemetry: false,
            storage_dir: PathBuf::from("."),
            shared: SharedState::new(),
        }
    }
}

/// Attach every coprocessor in routing order and load the ROM image.
pub fn build_bus(config: &Configuration) -> Bus {
    let shared = &config.shared;
    let mut bus = Bus::new(ROM_BASE);
    bus.attach(Vgc::new(
        shared.vgc.clone(),
        shared.sid.clone(),
        shared.music.clone(),
        shared.nic.clone(),
    ));
    bus.attach(Nic::new(shared.nic.clone()));
    bus.attach(Fio::new(shared.vgc.clone(), config.storage_dir.clone()));
    bus.attach(Xmc::new(shared.xmc.clone()));
    bus.attach(Timer::new(TIMER_BASE));
    bus.attach(MusicCtl::new(shared.music.clone()));
    bus.attach(Dma::new(shared.vgc.clone(), shared.xmc.clone()));
    bus.attach(Blitter::new(shared.vgc.clone(), shared.xmc.clone()));
    bus.attach(Sid::new(shared.sid.clone()));
    bus.load_rom(&config.rom, ROM_BASE);
    bus
}
