// File I/O Controller. Command-triggered, synchronous against host
// storage: the CPU writes a filename and a command byte, then polls the
// status register. Program files carry a two-byte little-endian load
// address; .sid files use the big-endian PSID header.

use crate::devices::{
    Device, ERR_BAD_ARGS, ERR_END_OF_DIR, ERR_IO, ERR_NONE, ERR_NOT_FOUND, ERR_RANGE, ST_ERROR,
    ST_IDLE, ST_OK,
};
use crate::memory::MemoryRange;
use crate::vgc::{VgcPtr, VgcState};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub const FIO_BASE: u16 = 0xb9a0;
pub const NAME_BUF: usize = 0x10; // ..0x4f relative to FIO_BASE
pub const NAME_MAX: usize = 63;

// Loads may not spill into the ROM half.
const LOAD_CEILING: usize = 0xc000;

const REG_CMD: usize = 0x00;
const REG_STATUS: usize = 0x01;
const REG_ERR: usize = 0x02;
const REG_DTYPE: usize = 0x03;
const REG_SRC: usize = 0x04; // ..0x05
const REG_END: usize = 0x06; // ..0x07
const REG_SIZE: usize = 0x08; // ..0x09
const REG_GSPACE: usize = 0x0a;
const REG_GOFF: usize = 0x0b; // ..0x0c
const REG_GLEN: usize = 0x0d; // ..0x0e

pub const CMD_LOAD: u8 = 1;
pub const CMD_SAVE: u8 = 2;
pub const CMD_GLOAD: u8 = 3;
pub const CMD_GSAVE: u8 = 4;
pub const CMD_DIROPEN: u8 = 5;
pub const CMD_DIRREAD: u8 = 6;
pub const CMD_SIDLOAD: u8 = 7;

pub const DTYPE_PROGRAM: u8 = 0;
pub const DTYPE_SID: u8 = 1;

pub struct Fio {
    vgc: VgcPtr,
    dir: PathBuf,
    regs: [u8; 0x50],
    cursor: Option<(Vec<(String, u8)>, usize)>,
}

/// Parsed PSID header. All multi-byte fields are big-endian on disk.
pub struct PsidHeader {
    pub version: u16,
    pub data_offset: u16,
    pub load: u16,
    pub init: u16,
    pub play: u16,
    pub songs: u16,
    pub start_song: u16,
    pub speed: u32,
}

impl PsidHeader {
    pub fn parse(image: &[u8]) -> Result<PsidHeader, u8> {
        if image.len() < 0x76 || &image[0..4] != b"PSID" {
            return Err(ERR_BAD_ARGS);
        }
        Ok(PsidHeader {
            version: BigEndian::read_u16(&image[0x04..]),
            data_offset: BigEndian::read_u16(&image[0x06..]),
            load: BigEndian::read_u16(&image[0x08..]),
            init: BigEndian::read_u16(&image[0x0a..]),
            play: BigEndian::read_u16(&image[0x0c..]),
            songs: BigEndian::read_u16(&image[0x0e..]),
            start_song: BigEndian::read_u16(&image[0x10..]),
            speed: BigEndian::read_u32(&image[0x12..]),
        })
    }
}

/// Relocation patching for the payload's address table. Driver images open
/// with a run of absolute JMPs (init, play, and friends); every table entry
/// whose target sits inside the original load span moves by the same delta
/// as the image. The table ends at the first byte that is not a JMP into
/// the span, so arbitrary code and data beyond it stay untouched.
pub fn patch_jump_table(payload: &mut [u8], load: u16, delta: u16) {
    let span = load..load.wrapping_add(payload.len() as u16);
    let mut at = 0;
    while at + 3 <= payload.len() && payload[at] == 0x4c {
        let target = u16::from_le_bytes([payload[at + 1], payload[at + 2]]);
        if !span.contains(&target) {
            break;
        }
        let moved = target.wrapping_add(delta);
        payload[at + 1] = moved as u8;
        payload[at + 2] = (moved >> 8) as u8;
        at += 3;
    }
}

impl Fio {
    pub fn new(vgc: VgcPtr, dir: PathBuf) -> Box<Self> {
        Box::new(Fio { vgc, dir, regs: [0; 0x50], cursor: None })
    }

    fn reg16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.regs[offset..])
    }

    fn set_reg16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.regs[offset..offset + 2], value);
    }

    /// Filename from the buffer: NUL-terminated printable ASCII, no path
    /// separators, at most 63 bytes.
    fn filename(&self) -> Result<PathBuf, u8> {
        let raw = &self.regs[NAME_BUF..];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        if end == 0 || end > NAME_MAX {
            return Err(ERR_IO);
        }
        let name = std::str::from_utf8(&raw[..end]).map_err(|_| ERR_IO)?;
        let clean = name.trim();
        if clean.is_empty()
            || clean.contains('/')
            || clean.contains('\\')
            || clean.contains("..")
            || !clean.bytes().all(|b| (0x20..0x7f).contains(&b))
        {
            return Err(ERR_IO);
        }
        Ok(self.dir.join(clean))
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
            }
        }
    }

    fn read_file(&self) -> Result<Vec<u8>, u8> {
        let path = self.filename()?;
        fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ERR_NOT_FOUND
            } else {
                warn!("fio: reading {:?} failed: {}", path, e);
                ERR_IO
            }
        })
    }

    fn load(&mut self, ram: &mut [u8]) -> Result<(), u8> {
        let image = self.read_file()?;
        if image.len() < 2 {
            return Err(ERR_IO);
        }
        // the stored load address gives way to the CPU-provided one
        let payload = &image[2..];
        let dest = self.reg16(REG_SRC) as usize;
        if dest + payload.len() > LOAD_CEILING {
            return Err(ERR_RANGE);
        }
        ram[dest..dest + payload.len()].copy_from_slice(payload);
        self.set_reg16(REG_SIZE, payload.len() as u16);
        debug!("fio: loaded {} bytes at ${:04x}", payload.len(), dest);
        Ok(())
    }

    fn save(&mut self, ram: &[u8]) -> Result<(), u8> {
        let src = self.reg16(REG_SRC) as usize;
        let end = self.reg16(REG_END) as usize;
        if end < src {
            return Err(ERR_IO);
        }
        if end > ram.len() {
            return Err(ERR_RANGE);
        }
        let path = self.filename()?;
        let mut image = Vec::with_capacity(end - src + 2);
        image.push(src as u8);
        image.push((src >> 8) as u8);
        image.extend_from_slice(&ram[src..end]);
        fs::write(&path, &image).map_err(|e| {
            warn!("fio: writing {:?} failed: {}", path, e);
            ERR_IO
        })?;
        self.set_reg16(REG_SIZE, (end - src) as u16);
        Ok(())
    }

    fn gload(&mut self) -> Result<(), u8> {
        let image = self.read_file()?;
        let space = self.regs[REG_GSPACE];
        let offset = self.reg16(REG_GOFF) as usize;
        let len = (self.reg16(REG_GLEN) as usize).min(image.len());
        if offset + len > VgcState::space_len(space) {
            return Err(ERR_RANGE);
        }
        {
            let mut vgc = self.vgc.lock().unwrap();
            for (j, &byte) in image[..len].iter().enumerate() {
                vgc.space_write(space, (offset + j) as u32, byte);
            }
        }
        self.set_reg16(REG_SIZE, len as u16);
        Ok(())
    }

    fn gsave(&mut self) -> Result<(), u8> {
        let space = self.regs[REG_GSPACE];
        let offset = self.reg16(REG_GOFF) as usize;
        let len = self.reg16(REG_GLEN) as usize;
        if offset + len > VgcState::space_len(space) {
            return Err(ERR_RANGE);
        }
        let mut image = Vec::with_capacity(len);
        {
            let vgc = self.vgc.lock().unwrap();
            for j in 0..len {
                image.push(vgc.space_read(space, (offset + j) as u32).unwrap_or(0));
            }
        }
        let path = self.filename()?;
        fs::write(&path, &image).map_err(|e| {
            warn!("fio: writing {:?} failed: {}", path, e);
            ERR_IO
        })?;
        self.set_reg16(REG_SIZE, len as u16);
        Ok(())
    }

    fn dir_open(&mut self) -> Result<(), u8> {
        let entries = fs::read_dir(&self.dir).map_err(|_| ERR_IO)?;
        let mut found: Vec<(String, u8)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let lower = name.to_lowercase();
            let dtype = if lower.ends_with(".prg") {
                DTYPE_PROGRAM
            } else if lower.ends_with(".sid") {
                DTYPE_SID
            } else {
                continue;
            };
            if name.len() <= NAME_MAX {
                found.push((name, dtype));
            }
        }
        found.sort();
        self.cursor = Some((found, 0));
        Ok(())
    }

    fn dir_read(&mut self) -> Result<(), u8> {
        let (name, dtype) = match self.cursor {
            Some((ref entries, ref mut index)) => {
                if *index >= entries.len() {
                    return Err(ERR_END_OF_DIR);
                }
                let item = entries[*index].clone();
                *index += 1;
                item
            }
            None => return Err(ERR_END_OF_DIR),
        };
        self.regs[NAME_BUF..].iter_mut().for_each(|b| *b = 0);
        let bytes = name.as_bytes();
        self.regs[NAME_BUF..NAME_BUF + bytes.len()].copy_from_slice(bytes);
        self.regs[REG_DTYPE] = dtype;
        Ok(())
    }

    /// Load a PSID image. The payload lands at the SRC register when it is
    /// non-zero (relocation), otherwise at the header's load address; init
    /// and play come back through SRC/END adjusted by the same delta, and
    /// the driver's leading jump table is patched to follow the move.
    fn sid_load(&mut self, ram: &mut [u8]) -> Result<(), u8> {
        let image = self.read_file()?;
        let header = PsidHeader::parse(&image)?;
        if header.data_offset as usize > image.len() {
            return Err(ERR_BAD_ARGS);
        }
        let mut raw = &image[header.data_offset as usize..];
        let mut load = header.load;
        if load == 0 {
            // load address embedded ahead of the payload, little-endian
            if raw.len() < 2 {
                return Err(ERR_BAD_ARGS);
            }
            load = LittleEndian::read_u16(raw);
            raw = &raw[2..];
        }
        let requested = self.reg16(REG_SRC);
        let target = if requested != 0 { requested } else { load };
        let delta = target.wrapping_sub(load);
        let dest = target as usize;
        if dest + raw.len() > LOAD_CEILING {
            return Err(ERR_RANGE);
        }
        let mut payload = raw.to_vec();
        if delta != 0 {
            patch_jump_table(&mut payload, load, delta);
        }
        ram[dest..dest + payload.len()].copy_from_slice(&payload);
        let span = load..load.wrapping_add(payload.len() as u16);
        let relocate = |addr: u16| {
            if span.contains(&addr) {
                addr.wrapping_add(delta)
            } else {
                addr
            }
        };
        self.set_reg16(REG_SRC, relocate(header.init));
        self.set_reg16(REG_END, relocate(header.play));
        self.set_reg16(REG_SIZE, payload.len() as u16);
        debug!(
            "fio: sid image v{} loaded at ${:04x}, {} songs",
            header.version, target, header.songs
        );
        Ok(())
    }

    fn execute(&mut self, cmd: u8, ram: &mut [u8]) {
        let result = match cmd {
            CMD_LOAD => self.load(ram),
            CMD_SAVE => self.save(ram),
            CMD_GLOAD => self.gload(),
            CMD_GSAVE => self.gsave(),
            CMD_DIROPEN => self.dir_open(),
            CMD_DIRREAD => self.dir_read(),
            CMD_SIDLOAD => self.sid_load(ram),
            _ => Err(ERR_BAD_ARGS),
        };
        self.finish(result);
    }
}

impl Device for Fio {
    fn memconfig(&self) -> MemoryRange {
        vec![(FIO_BASE, FIO_BASE + 0x4f)]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        let offset = (address - FIO_BASE) as usize;
        match offset {
            REG_CMD => 0,
            _ => self.regs[offset],
        }
    }

    fn write(&mut self, address: u16, value: u8, ram: &mut [u8]) {
        let offset = (address - FIO_BASE) as usize;
        match offset {
            REG_CMD => self.execute(value, ram),
            REG_STATUS | REG_ERR | REG_DTYPE => {}
            _ => self.regs[offset] = value,
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.regs[REG_STATUS] = ST_IDLE;
        self.regs[REG_ERR] = ERR_NONE;
        self.cursor = None;
    }
}
