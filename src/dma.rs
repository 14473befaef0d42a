// DMA engine and blitter. Both address six unified memory spaces: CPU RAM,
// the four VGC planes, and the XMC arena. Transfers run to completion
// inside the command write; a mid-transfer range error leaves the progress
// counter at the last good byte.

use crate::devices::{
    Device, ERR_BAD_ARGS, ERR_NONE, ERR_RANGE, ST_ERROR, ST_IDLE, ST_OK,
};
use crate::conversions::{addr24, split24};
use crate::memory::MemoryRange;
use crate::vgc::VgcPtr;
use crate::xmc::XmcPtr;
use log::debug;
use std::sync::MutexGuard;

pub const DMA_BASE: u16 = 0xba60;
pub const BLT_BASE: u16 = 0xba80;

// Unified space selectors.
pub const SPACE_CPU: u8 = 0;
pub const SPACE_CHAR: u8 = 1;
pub const SPACE_COLOR: u8 = 2;
pub const SPACE_GFX: u8 = 3;
pub const SPACE_SHAPES: u8 = 4;
pub const SPACE_XMC: u8 = 5;

// Shared register offsets (both engines).
const REG_CMD: usize = 0x00;
const REG_STATUS: usize = 0x01;
const REG_ERR: usize = 0x02;
const REG_SRCSPACE: usize = 0x03;
const REG_DSTSPACE: usize = 0x04;
const REG_SRC: usize = 0x05; // ..0x07
const REG_DST: usize = 0x08; // ..0x0a

// DMA-specific.
const REG_LEN: usize = 0x0b; // ..0x0d
const REG_DMA_FLAGS: usize = 0x0e;
const REG_DMA_FILL: usize = 0x0f;
const REG_DMA_KEY: usize = 0x10;
const REG_DMA_COUNT: usize = 0x11; // ..0x13, consume-on-read

// Blitter-specific.
const REG_W: usize = 0x0b; // ..0x0c
const REG_H: usize = 0x0d; // ..0x0e
const REG_SRC_STRIDE: usize = 0x0f; // ..0x10
const REG_DST_STRIDE: usize = 0x11; // ..0x12
const REG_BLT_FLAGS: usize = 0x13;
const REG_BLT_FILL: usize = 0x14;
const REG_BLT_KEY: usize = 0x15;
const REG_BLT_COUNT: usize = 0x16; // ..0x18, consume-on-read

pub const CMD_COPY: u8 = 1;
pub const CMD_FILL: u8 = 2;

pub const FLAG_COLOR_KEY: u8 = 0x02;

/// One byte transferred; `Err` carries the coprocessor error code.
type Step = Result<(), u8>;

/// Resolver over the six spaces. Space 5 goes through the XMC arena offset
/// by the default bank; spaces 1–4 are the VGC planes; space 0 is the raw
/// flat RAM byte, which sidesteps read side effects of device registers.
struct Spaces<'a> {
    ram: &'a mut [u8],
    vgc: MutexGuard<'a, crate::vgc::VgcState>,
    xmc: MutexGuard<'a, crate::xmc::XmcState>,
}

impl<'a> Spaces<'a> {
    fn read(&self, space: u8, addr: u32) -> Result<u8, u8> {
        match space {
            SPACE_CPU => self.ram.get(addr as usize).copied().ok_or(ERR_RANGE),
            SPACE_CHAR | SPACE_COLOR | SPACE_GFX | SPACE_SHAPES => {
                self.vgc.space_read(space - 1, addr).ok_or(ERR_RANGE)
            }
            SPACE_XMC => {
                let effective = addr + (self.xmc.default_bank as u32) * 0x1_0000;
                self.xmc.arena.get(effective as usize).copied().ok_or(ERR_RANGE)
            }
            _ => Err(ERR_BAD_ARGS),
        }
    }

    fn write(&mut self, space: u8, addr: u32, value: u8) -> Step {
        match space {
            SPACE_CPU => match self.ram.get_mut(addr as usize) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(ERR_RANGE),
            },
            SPACE_CHAR | SPACE_COLOR | SPACE_GFX | SPACE_SHAPES => {
                if self.vgc.space_write(space - 1, addr, value) {
                    Ok(())
                } else {
                    Err(ERR_RANGE)
                }
            }
            SPACE_XMC => {
                let effective = addr + (self.xmc.default_bank as u32) * 0x1_0000;
                match self.xmc.arena.get_mut(effective as usize) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(ERR_RANGE),
                }
            }
            _ => Err(ERR_BAD_ARGS),
        }
    }
}

/// Register plumbing shared by the two engines.
struct Engine {
    base: u16,
    regs: [u8; 0x20],
    vgc: VgcPtr,
    xmc: XmcPtr,
}

impl Engine {
    fn reg16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.regs[offset], self.regs[offset + 1]])
    }

    fn reg24(&self, offset: usize) -> u32 {
        addr24(&self.regs[offset..offset + 3])
    }

    fn set_count(&mut self, offset: usize, count: u32) {
        self.regs[offset..offset + 3].copy_from_slice(&split24(count));
    }

    fn finish(&mut self, result: Result<(), u8>) {
        match result {
            Ok(()) => {
                self.regs[REG_STATUS] = ST_OK;
                self.regs[REG_ERR] = ERR_NONE;
            }
            Err(code) => {
                self.regs[REG_STATUS] = ST_ERROR;
                self.regs[REG_ERR] = code;
                debug!("dma/blt: transfer error {}", code);
            }
        }
    }

    fn read_reg(&mut self, offset: usize, count_reg: usize) -> u8 {
        if (count_reg..count_reg + 3).contains(&offset) {
            // progress counter bytes consume on read
            let value = self.regs[offset];
            self.regs[offset] = 0;
            return value;
        }
        match offset {
            REG_CMD => 0,
            _ => self.regs[offset],
        }
    }

    fn spaces<'a>(&'a self, ram: &'a mut [u8]) -> Spaces<'a> {
        Spaces { ram, vgc: self.vgc.lock().unwrap(), xmc: self.xmc.lock().unwrap() }
    }
}

pub struct Dma {
    engine: Engine,
}

impl Dma {
    pub fn new(vgc: VgcPtr, xmc: XmcPtr) -> Box<Self> {
        Box::new(Dma { engine: Engine { base: DMA_BASE, regs: [0; 0x20], vgc, xmc } })
    }

    /// Linear copy or fill. The counter advances monotonically; it holds
    /// the final length on ok and the last good byte on error.
    fn execute(&mut self, cmd: u8, ram: &mut [u8]) {
        let engine = &mut self.engine;
        let src_space = engine.regs[REG_SRCSPACE];
        let dst_space = engine.regs[REG_DSTSPACE];
        let src = engine.reg24(REG_SRC);
        let dst = engine.reg24(REG_DST);
        let len = engine.reg24(REG_LEN);
        let flags = engine.regs[REG_DMA_FLAGS];
        let fill = engine.regs[REG_DMA_FILL];
        let key = engine.regs[REG_DMA_KEY];
        engine.set_count(REG_DMA_COUNT, 0);

        let mut count = 0u32;
        let result = (|| -> Result<(), u8> {
            let mut spaces = engine.spaces(ram);
            for j in 0..len {
                match cmd {
                    CMD_COPY => {
                        let byte = spaces.read(src_space, src + j)?;
                        if flags & FLAG_COLOR_KEY == 0 || byte != key {
                            spaces.write(dst_space, dst + j, byte)?;
                        }
                    }
                    CMD_FILL => spaces.write(dst_space, dst + j, fill)?,
                    _ => return Err(ERR_BAD_ARGS),
                }
                count = j + 1;
            }
            Ok(())
        })();
        engine.set_count(REG_DMA_COUNT, count);
        engine.finish(result);
    }
}

impl Device for Dma {
    fn memconfig(&self) -> MemoryRange {
        vec![(DMA_BASE, DMA_BASE + 0x1f)]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        let offset = (address - self.engine.base) as usize;
        self.engine.read_reg(offset, REG_DMA_COUNT)
    }

    fn write(&mut self, address: u16, value: u8, ram: &mut [u8]) {
        let offset = (address - self.engine.base) as usize;
        match offset {
            REG_CMD => self.execute(value, ram),
            REG_STATUS | REG_ERR => {}
            _ => self.engine.regs[offset] = value,
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.engine.regs[REG_STATUS] = ST_IDLE;
        self.engine.regs[REG_ERR] = ERR_NONE;
    }
}

pub struct Blitter {
    engine: Engine,
}

impl Blitter {
    pub fn new(vgc: VgcPtr, xmc: XmcPtr) -> Box<Self> {
        Box::new(Blitter { engine: Engine { base: BLT_BASE, regs: [0; 0x20], vgc, xmc } })
    }

    /// Rectangular copy or fill with independent row strides. In color-key
    /// mode a source byte equal to the key leaves the destination alone;
    /// across spaces with different element meanings that comparison is
    /// byte-equality, nothing more.
    fn execute(&mut self, cmd: u8, ram: &mut [u8]) {
        let engine = &mut self.engine;
        let src_space = engine.regs[REG_SRCSPACE];
        let dst_space = engine.regs[REG_DSTSPACE];
        let src = engine.reg24(REG_SRC);
        let dst = engine.reg24(REG_DST);
        let width = engine.reg16(REG_W) as u32;
        let height = engine.reg16(REG_H) as u32;
        let src_stride = engine.reg16(REG_SRC_STRIDE) as u32;
        let dst_stride = engine.reg16(REG_DST_STRIDE) as u32;
        let flags = engine.regs[REG_BLT_FLAGS];
        let fill = engine.regs[REG_BLT_FILL];
        let key = engine.regs[REG_BLT_KEY];
        engine.set_count(REG_BLT_COUNT, 0);

        let mut count = 0u32;
        let result = (|| -> Result<(), u8> {
            if width == 0 || height == 0 {
                return Err(ERR_BAD_ARGS);
            }
            let mut spaces = engine.spaces(ram);
            for row in 0..height {
                let src_row = src + row * src_stride;
                let dst_row = dst + row * dst_stride;
                for col in 0..width {
                    match cmd {
                        CMD_COPY => {
                            let byte = spaces.read(src_space, src_row + col)?;
                            if flags & FLAG_COLOR_KEY == 0 || byte != key {
                                spaces.write(dst_space, dst_row + col, byte)?;
                            }
                        }
                        CMD_FILL => spaces.write(dst_space, dst_row + col, fill)?,
                        _ => return Err(ERR_BAD_ARGS),
                    }
                    count += 1;
                }
            }
            Ok(())
        })();
        engine.set_count(REG_BLT_COUNT, count);
        engine.finish(result);
    }
}

impl Device for Blitter {
    fn memconfig(&self) -> MemoryRange {
        vec![(BLT_BASE, BLT_BASE + 0x1f)]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        let offset = (address - self.engine.base) as usize;
        self.engine.read_reg(offset, REG_BLT_COUNT)
    }

    fn write(&mut self, address: u16, value: u8, ram: &mut [u8]) {
        let offset = (address - self.engine.base) as usize;
        match offset {
            REG_CMD => self.execute(value, ram),
            REG_STATUS | REG_ERR => {}
            _ => self.engine.regs[offset] = value,
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.engine.regs[REG_STATUS] = ST_IDLE;
        self.engine.regs[REG_ERR] = ERR_NONE;
    }
}
