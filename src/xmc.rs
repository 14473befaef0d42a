// Expansion Memory Controller: a 512 KB arena carved into 256-byte pages,
// a first-fit page allocator, a named-block directory, and four windows
// that map slices of the arena into the CPU address space. The arena is
// shared with the DMA engine and the blitter through the usual lock.

use crate::devices::{
    Device, ERR_BAD_ARGS, ERR_END_OF_DIR, ERR_NAME, ERR_NONE, ERR_NOT_FOUND, ERR_NO_SPACE,
    ERR_RANGE, ST_ERROR, ST_IDLE, ST_OK,
};
use crate::conversions::{addr24, split24};
use crate::memory::MemoryRange;
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const ARENA_SIZE: usize = 512 * 1024;
pub const PAGE_SIZE: usize = 256;
pub const PAGE_COUNT: usize = ARENA_SIZE / PAGE_SIZE;
pub const MAX_NAME: usize = 28;
pub const WINDOW_COUNT: usize = 4;

pub const XMC_BASE: u16 = 0xba00;
pub const WINDOW_BASE: u16 = 0xbc00;

// Command register file offsets from XMC_BASE.
const REG_CMD: usize = 0x00;
const REG_STATUS: usize = 0x01;
const REG_ERR: usize = 0x02;
const REG_ADDR: usize = 0x03; // ..0x05, 24-bit LE
const REG_LEN: usize = 0x06; // ..0x08, 24-bit LE
const REG_CPUADDR: usize = 0x09; // ..0x0a
const REG_HANDLE: usize = 0x0b; // ..0x0c
const REG_FILL: usize = 0x0d;
const REG_BANK: usize = 0x0e;
const REG_FREE: usize = 0x0f; // ..0x10, read-only, refreshed by Stats
const REG_USED: usize = 0x11; // ..0x12
const REG_DIRCNT: usize = 0x13; // ..0x14
const REG_WINEN: usize = 0x16;
const REG_WINBASE: usize = 0x17; // 4 × 3 bytes
const REG_NAME: usize = 0x24; // ..0x3f

pub const CMD_ALLOC: u8 = 1;
pub const CMD_RELEASE: u8 = 2;
pub const CMD_STASH: u8 = 3;
pub const CMD_FETCH: u8 = 4;
pub const CMD_FILL: u8 = 5;
pub const CMD_NSTASH: u8 = 6;
pub const CMD_NFETCH: u8 = 7;
pub const CMD_NDELETE: u8 = 8;
pub const CMD_NDIROPEN: u8 = 9;
pub const CMD_NDIRREAD: u8 = 10;
pub const CMD_STATS: u8 = 11;
pub const CMD_RESET_USAGE: u8 = 12;

pub type XmcPtr = Arc<Mutex<XmcState>>;

#[derive(Debug, Copy, Clone)]
pub struct Block {
    pub start_page: usize,
    pub len: usize,
}

impl Block {
    fn pages(&self) -> usize {
        (self.len + PAGE_SIZE - 1) / PAGE_SIZE
    }
}

pub struct XmcState {
    pub arena: Vec<u8>,
    used: Vec<bool>,
    blocks: BTreeMap<u16, Block>,
    names: BTreeMap<String, u16>,
    next_handle: u16,
    pub default_bank: u8,
    dir_cursor: Option<(Vec<String>, usize)>,
}

impl XmcState {
    pub fn new() -> Self {
        XmcState {
            arena: vec![0; ARENA_SIZE],
            used: vec![false; PAGE_COUNT],
            blocks: BTreeMap::new(),
            names: BTreeMap::new(),
            next_handle: 1,
            default_bank: 0,
            dir_cursor: None,
        }
    }

    pub fn free_pages(&self) -> usize {
        self.used.iter().filter(|&&u| !u).count()
    }

    pub fn used_pages(&self) -> usize {
        PAGE_COUNT - self.free_pages()
    }

    pub fn dir_count(&self) -> usize {
        self.names.len()
    }

    pub fn block(&self, handle: u16) -> Option<Block> {
        self.blocks.get(&handle).copied()
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.names.get(name).copied()
    }

    /// Lowest-address contiguous run of free pages covering `len` bytes.
    /// Returns (address, handle).
    pub fn alloc(&mut self, len: usize) -> Result<(u32, u16), u8> {
        if len == 0 {
            return Err(ERR_BAD_ARGS);
        }
        let pages = (len + PAGE_SIZE - 1) / PAGE_SIZE;
        let mut run = 0;
        let mut start = 0;
        for page in 0..PAGE_COUNT {
            if self.used[page] {
                run = 0;
                start = page + 1;
            } else {
                run += 1;
                if run == pages {
                    return self.claim(start, len);
                }
            }
        }
        Err(ERR_NO_SPACE)
    }

    fn claim(&mut self, start: usize, len: usize) -> Result<(u32, u16), u8> {
        if self.next_handle == u16::MAX {
            return Err(ERR_NO_SPACE);
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        let block = Block { start_page: start, len };
        for page in start..start + block.pages() {
            self.used[page] = true;
        }
        self.blocks.insert(handle, block);
        Ok(((start * PAGE_SIZE) as u32, handle))
    }

    /// Free a byte range and drop every block record overlapping it, along
    /// with any directory names pointing at those records.
    pub fn release(&mut self, addr: u32, len: usize) -> Result<(), u8> {
        let addr = addr as usize;
        if len == 0 || addr + len > ARENA_SIZE {
            return Err(ERR_RANGE);
        }
        let first = addr / PAGE_SIZE;
        let last = (addr + len - 1) / PAGE_SIZE;
        for page in first..=last {
            self.used[page] = false;
        }
        let doomed: Vec<u16> = self
            .blocks
            .iter()
            .filter(|(_, b)| b.start_page <= last && b.start_page + b.pages() > first)
            .map(|(&h, _)| h)
            .collect();
        for handle in &doomed {
            self.blocks.remove(handle);
        }
        self.names.retain(|_, h| !doomed.contains(h));
        Ok(())
    }

    pub fn read_range(&self, addr: u32, len: usize) -> Result<&[u8], u8> {
        let addr = addr as usize;
        if addr + len > ARENA_SIZE {
            return Err(ERR_RANGE);
        }
        Ok(&self.arena[addr..addr + len])
    }

    pub fn write_range(&mut self, addr: u32, data: &[u8]) -> Result<(), u8> {
        let addr = addr as usize;
        if addr + data.len() > ARENA_SIZE {
            return Err(ERR_RANGE);
        }
        self.arena[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, addr: u32, len: usize, value: u8) -> Result<(), u8> {
        let addr = addr as usize;
        if addr + len > ARENA_SIZE {
            return Err(ERR_RANGE);
        }
        self.arena[addr..addr + len].iter_mut().for_each(|b| *b = value);
        Ok(())
    }

    /// Store a payload under a name. An existing block is reused when the
    /// payload still fits its pages, otherwise it is freed and replaced.
    pub fn stash_named(&mut self, name: &str, payload: &[u8]) -> Result<u16, u8> {
        if payload.is_empty() {
            return Err(ERR_BAD_ARGS);
        }
        if let Some(handle) = self.names.get(name).copied() {
            if let Some(block) = self.blocks.get(&handle).copied() {
                if payload.len() <= block.pages() * PAGE_SIZE {
                    let addr = (block.start_page * PAGE_SIZE) as u32;
                    self.write_range(addr, payload)?;
                    self.blocks.insert(handle, Block { start_page: block.start_page, len: payload.len() });
                    return Ok(handle);
                }
                self.release((block.start_page * PAGE_SIZE) as u32, block.len)?;
            }
        }
        let (addr, handle) = self.alloc(payload.len())?;
        self.write_range(addr, payload)?;
        self.names.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn fetch_named(&self, name: &str) -> Result<(u16, &[u8]), u8> {
        let handle = self.names.get(name).copied().ok_or(ERR_NOT_FOUND)?;
        let block = self.blocks.get(&handle).ok_or(ERR_NOT_FOUND)?;
        let addr = (block.start_page * PAGE_SIZE) as u32;
        Ok((handle, self.read_range(addr, block.len)?))
    }

    pub fn delete_named(&mut self, name: &str) -> Result<(), u8> {
        let handle = self.names.remove(name).ok_or(ERR_NOT_FOUND)?;
        if let Some(block) = self.blocks.remove(&handle) {
            for page in block.start_page..block.start_page + block.pages() {
                self.used[page] = false;
            }
        }
        Ok(())
    }

    pub fn dir_open(&mut self) {
        let names: Vec<String> = self.names.keys().cloned().collect();
        self.dir_cursor = Some((names, 0));
    }

    pub fn dir_read(&mut self) -> Result<String, u8> {
        match self.dir_cursor {
            Some((ref names, ref mut index)) => {
                if *index < names.len() {
                    let name = names[*index].clone();
                    *index += 1;
                    Ok(name)
                } else {
                    Err(ERR_END_OF_DIR)
                }
            }
            None => Err(ERR_END_OF_DIR),
        }
    }

    pub fn reset_usage(&mut self) {
        self.used.iter_mut().for_each(|u| *u = false);
        self.blocks.clear();
        self.names.clear();
        self.next_handle = 1;
        self.dir_cursor = None;
    }
}

/// Validate and trim a raw name buffer: NUL-terminated ASCII, surrounding
/// blanks stripped, 1–28 bytes remaining.
pub fn trim_name(raw: &[u8]) -> Result<String, u8> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end]).map_err(|_| ERR_NAME)?;
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_NAME || !trimmed.is_ascii() {
        return Err(ERR_NAME);
    }
    Ok(trimmed.to_string())
}

pub struct Xmc {
    pub state: XmcPtr,
    regs: [u8; 0x40],
}

impl Xmc {
    pub fn new(state: XmcPtr) -> Box<Self> {
        Box::new(Xmc { state, regs: [0; 0x40] })
    }

    fn addr(&self) -> u32 {
        addr24(&self.regs[REG_ADDR..REG_ADDR + 3])
    }

    fn set_addr(&mut self, value: u32) {
        self.regs[REG_ADDR..REG_ADDR + 3].copy_from_slice(&split24(value));
    }

    fn len(&self) -> usize {
        addr24(&self.regs[REG_LEN..REG_LEN + 3]) as usize
    }

    fn set_len(&mut self, value: usize) {
        self.regs[REG_LEN..REG_LEN + 3].copy_from_slice(&split24(value as u32));
    }

    fn cpu_addr(&self) -> usize {
        u16::from_le_bytes([self.regs[REG_CPUADDR], self.regs[REG_CPUADDR + 1]]) as usize
    }

    fn handle(&self) -> u16 {
        u16::from_le_bytes([self.regs[REG_HANDLE], self.regs[REG_HANDLE + 1]])
    }

    fn set_handle(&mut self, handle: u16) {
        self.regs[REG_HANDLE] = handle as u8;
        self.regs[REG_HANDLE + 1] = (handle >> 8) as u8;
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
                debug!("xmc: command failed with error {}", code);
            }
        }
    }

    fn name(&self) -> Result<String, u8> {
        trim_name(&self.regs[REG_NAME..])
    }

    fn write_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        self.regs[REG_NAME..].iter_mut().for_each(|b| *b = 0);
        self.regs[REG_NAME..REG_NAME + bytes.len()].copy_from_slice(bytes);
    }

    fn refresh_stats(&mut self) {
        let state = self.state.lock().unwrap();
        let free = state.free_pages() as u16;
        let used = state.used_pages() as u16;
        let dir = state.dir_count() as u16;
        drop(state);
        self.regs[REG_FREE] = free as u8;
        self.regs[REG_FREE + 1] = (free >> 8) as u8;
        self.regs[REG_USED] = used as u8;
        self.regs[REG_USED + 1] = (used >> 8) as u8;
        self.regs[REG_DIRCNT] = dir as u8;
        self.regs[REG_DIRCNT + 1] = (dir >> 8) as u8;
    }

    fn execute(&mut self, cmd: u8, ram: &mut [u8]) {
        let result = match cmd {
            CMD_ALLOC => {
                let len = self.len();
                let allocated = self.state.lock().unwrap().alloc(len);
                match allocated {
                    Ok((addr, handle)) => {
                        self.set_addr(addr);
                        self.set_handle(handle);
                        Ok(())
                    }
                    Err(code) => Err(code),
                }
            }
            CMD_RELEASE => {
                let (addr, len) = (self.addr(), self.len());
                self.state.lock().unwrap().release(addr, len)
            }
            CMD_STASH => {
                let (addr, len, cpu) = (self.addr(), self.len(), self.cpu_addr());
                if cpu + len > ram.len() {
                    Err(ERR_RANGE)
                } else {
                    self.state.lock().unwrap().write_range(addr, &ram[cpu..cpu + len])
                }
            }
            CMD_FETCH => {
                let (addr, len, cpu) = (self.addr(), self.len(), self.cpu_addr());
                if cpu + len > ram.len() {
                    Err(ERR_RANGE)
                } else {
                    let state = self.state.lock().unwrap();
                    state.read_range(addr, len).map(|data| {
                        ram[cpu..cpu + len].copy_from_slice(data);
                    })
                }
            }
            CMD_FILL => {
                let (addr, len, value) = (self.addr(), self.len(), self.regs[REG_FILL]);
                self.state.lock().unwrap().fill(addr, len, value)
            }
            CMD_NSTASH => match self.name() {
                Ok(name) => {
                    let (len, cpu) = (self.len(), self.cpu_addr());
                    if cpu + len > ram.len() {
                        Err(ERR_RANGE)
                    } else {
                        let payload = ram[cpu..cpu + len].to_vec();
                        let stashed = self.state.lock().unwrap().stash_named(&name, &payload);
                        match stashed {
                            Ok(handle) => {
                                self.set_handle(handle);
                                Ok(())
                            }
                            Err(code) => Err(code),
                        }
                    }
                }
                Err(code) => Err(code),
            },
            CMD_NFETCH => match self.name() {
                Ok(name) => {
                    let cpu = self.cpu_addr();
                    let state = self.state.lock().unwrap();
                    match state.fetch_named(&name) {
                        Ok((handle, data)) => {
                            if cpu + data.len() > ram.len() {
                                Err(ERR_RANGE)
                            } else {
                                ram[cpu..cpu + data.len()].copy_from_slice(data);
                                let len = data.len();
                                drop(state);
                                self.set_handle(handle);
                                self.set_len(len);
                                Ok(())
                            }
                        }
                        Err(code) => Err(code),
                    }
                }
                Err(code) => Err(code),
            },
            CMD_NDELETE => match self.name() {
                Ok(name) => self.state.lock().unwrap().delete_named(&name),
                Err(code) => Err(code),
            },
            CMD_NDIROPEN => {
                self.state.lock().unwrap().dir_open();
                Ok(())
            }
            CMD_NDIRREAD => {
                let mut state = self.state.lock().unwrap();
                match state.dir_read() {
                    Ok(name) => {
                        let handle = state.lookup(&name).unwrap_or(0);
                        let len = state.block(handle).map(|b| b.len).unwrap_or(0);
                        drop(state);
                        self.write_name(&name);
                        self.set_handle(handle);
                        self.set_len(len);
                        Ok(())
                    }
                    Err(code) => Err(code),
                }
            }
            CMD_STATS => {
                self.refresh_stats();
                Ok(())
            }
            CMD_RESET_USAGE => {
                self.state.lock().unwrap().reset_usage();
                Ok(())
            }
            _ => Err(ERR_BAD_ARGS),
        };
        self.finish(result);
    }

    fn window(&self, index: usize) -> (bool, u32) {
        let enabled = self.regs[REG_WINEN] & (1 << index) != 0;
        let base = addr24(&self.regs[REG_WINBASE + index * 3..REG_WINBASE + index * 3 + 3]);
        (enabled, base)
    }
}

impl Device for Xmc {
    fn memconfig(&self) -> MemoryRange {
        vec![(XMC_BASE, XMC_BASE + 0x3f), (WINDOW_BASE, WINDOW_BASE + 0x3ff)]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        if address >= WINDOW_BASE {
            let index = ((address - WINDOW_BASE) / PAGE_SIZE as u16) as usize;
            let offset = (address - WINDOW_BASE) as u32 % PAGE_SIZE as u32;
            let (enabled, base) = self.window(index);
            if !enabled {
                return 0;
            }
            let state = self.state.lock().unwrap();
            return state.arena.get((base + offset) as usize).copied().unwrap_or(0);
        }
        let offset = (address - XMC_BASE) as usize;
        match offset {
            REG_CMD => 0,
            _ => self.regs[offset],
        }
    }

    fn write(&mut self, address: u16, value: u8, ram: &mut [u8]) {
        if address >= WINDOW_BASE {
            let index = ((address - WINDOW_BASE) / PAGE_SIZE as u16) as usize;
            let offset = (address - WINDOW_BASE) as u32 % PAGE_SIZE as u32;
            let (enabled, base) = self.window(index);
            if enabled {
                let mut state = self.state.lock().unwrap();
                if let Some(slot) = state.arena.get_mut((base + offset) as usize) {
                    *slot = value;
                }
            }
            return;
        }
        let offset = (address - XMC_BASE) as usize;
        match offset {
            REG_CMD => self.execute(value, ram),
            REG_BANK => {
                self.regs[REG_BANK] = value;
                self.state.lock().unwrap().default_bank = value;
            }
            REG_STATUS | REG_ERR => {}
            o if (REG_FREE..REG_DIRCNT + 2).contains(&o) => {}
            _ => self.regs[offset] = value,
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.regs[REG_STATUS] = ST_IDLE;
        self.regs[REG_ERR] = ERR_NONE;
        self.regs[REG_WINEN] = 0;
    }
}
