// Virtual Graphics Controller: an 80×25 text plane, a 320×200 bitmap
// plane, 16 shaped sprites and a copper, all driven through a small
// register file plus a command port. The CPU thread owns the register
// backing store through the bus; the renderer samples it once per frame
// under the shared lock, writing back only the collision masks and the
// frame counter.

use crate::devices::{Device, Interrupt};
use crate::font;
use crate::memory::MemoryRange;
use crate::music::MusicPtr;
use crate::nic::NicPtr;
use crate::sid::SidPtr;
use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const SCREEN_W: usize = 320;
pub const SCREEN_H: usize = 200;
pub const TEXT_COLS: usize = 80;
pub const TEXT_ROWS: usize = 25;
pub const CHAR_RAM_SIZE: usize = TEXT_COLS * TEXT_ROWS;
pub const SHAPE_SLOTS: usize = 256;
pub const SHAPE_BYTES: usize = 128; // 16 rows × 8 bytes, two pixels per byte
pub const SPRITE_COUNT: usize = 16;

// The presented framebuffer is the logical frame scaled 2× in each axis.
pub const FB_W: usize = SCREEN_W * 2;
pub const FB_H: usize = SCREEN_H * 2;

pub const VGC_BASE: u16 = 0xa000;
pub const SPRITE_BASE: u16 = 0xa040;
pub const CHAR_BASE: u16 = 0xaa00;
pub const COLOR_BASE: u16 = 0xb1d0;

// Core register file offsets from VGC_BASE.
pub const REG_MODE: usize = 0x00;
pub const REG_BG: usize = 0x01;
pub const REG_FG: usize = 0x02;
pub const REG_CURSX: usize = 0x03;
pub const REG_CURSY: usize = 0x04;
pub const REG_CURSEN: usize = 0x05;
pub const REG_SCRLX: usize = 0x06;
pub const REG_SCRLY: usize = 0x07;
pub const REG_BORDER: usize = 0x08;
pub const REG_FRAME: usize = 0x09;
pub const REG_SSCOL_LO: usize = 0x0a;
pub const REG_SSCOL_HI: usize = 0x0b;
pub const REG_SBCOL_LO: usize = 0x0c;
pub const REG_SBCOL_HI: usize = 0x0d;
pub const REG_CHROUT: usize = 0x0e; // read returns the raster-IRQ latch
pub const REG_CHRIN: usize = 0x0f;
pub const REG_CMD: usize = 0x10;
pub const REG_PARAMS: usize = 0x11;
pub const REG_RASTERCTL: usize = 0x1f;

// Command opcodes.
pub const CMD_GCOLOR: u8 = 0x01;
pub const CMD_PLOT: u8 = 0x02;
pub const CMD_LINE: u8 = 0x03;
pub const CMD_RECT: u8 = 0x04;
pub const CMD_FRECT: u8 = 0x05;
pub const CMD_CIRCLE: u8 = 0x06;
pub const CMD_FLOOD: u8 = 0x07;
pub const CMD_GCLEAR: u8 = 0x08;
pub const CMD_SHPIX: u8 = 0x10;
pub const CMD_SHROW: u8 = 0x11;
pub const CMD_SHCLR: u8 = 0x12;
pub const CMD_SHCOPY: u8 = 0x13;
pub const CMD_SPRPOS: u8 = 0x18;
pub const CMD_SPREN: u8 = 0x19;
pub const CMD_SPRFLIP: u8 = 0x1a;
pub const CMD_SPRPRI: u8 = 0x1b;
pub const CMD_SPRCOL: u8 = 0x1c;
pub const CMD_MEMRD: u8 = 0x20;
pub const CMD_MEMWR: u8 = 0x21;
pub const CMD_COPADD: u8 = 0x30;
pub const CMD_COPCLR: u8 = 0x31;
pub const CMD_COPON: u8 = 0x32;
pub const CMD_COPOFF: u8 = 0x33;
pub const CMD_COPTARGET: u8 = 0x34;
pub const CMD_COPSWAP: u8 = 0x35;
pub const CMD_COPRESET: u8 = 0x36;
pub const CMD_RASTERLINE: u8 = 0x38;
pub const CMD_RESET: u8 = 0xff;

// Sprite flag bits.
const SPR_ENABLE: u8 = 0x01;
const SPR_XFLIP: u8 = 0x02;
const SPR_YFLIP: u8 = 0x04;

const COPPER_LISTS: usize = 128;
const COPPER_LIST_CAP: usize = 256;

#[rustfmt::skip]
pub const PALETTE: [u32; 16] = [
    0x000000, 0xffffff, 0x880000, 0xaaffee,
    0xcc44cc, 0x00cc55, 0x0000aa, 0xeeee77,
    0xdd8855, 0x664400, 0xff7777, 0x333333,
    0x777777, 0xaaff66, 0x0088ff, 0xbbbbbb,
];

pub type VgcPtr = Arc<Mutex<VgcState>>;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CopperEvent {
    pub pos: u32, // logical pixel offset, y*320+x, in unscrolled space
    pub reg: u8,  // offset from VGC_BASE; $40..$BF targets the sprite file
    pub val: u8,
}

pub struct VgcState {
    pub regs: [u8; 16],
    pub frame: u8,
    pub coll_ss: u16,
    pub coll_sb: u16,
    pub chin: VecDeque<u8>,
    pub params: [u8; 14],
    pub sprite_regs: [u8; 128],
    pub sprites_enabled: u8,
    pub char_ram: Vec<u8>,
    pub color_ram: Vec<u8>,
    pub gfx: Vec<u8>,
    pub shapes: Vec<u8>,
    pub draw_color: u8,
    lists: Vec<Vec<CopperEvent>>,
    pub copper_enabled: bool,
    active_list: usize,
    target_list: usize,
    pending_list: Option<usize>,
    pub raster_enable: bool,
    pub raster_line: u8,
    pub raster_pending: bool,
}

impl VgcState {
    pub fn new() -> Self {
        VgcState {
            regs: [0; 16],
            frame: 0,
            coll_ss: 0,
            coll_sb: 0,
            chin: VecDeque::new(),
            params: [0; 14],
            sprite_regs: [0; 128],
            sprites_enabled: 0,
            char_ram: vec![0x20; CHAR_RAM_SIZE],
            color_ram: vec![0; CHAR_RAM_SIZE],
            gfx: vec![0; SCREEN_W * SCREEN_H],
            shapes: vec![0; SHAPE_SLOTS * SHAPE_BYTES],
            draw_color: 1,
            lists: vec![Vec::new(); COPPER_LISTS],
            copper_enabled: false,
            active_list: 0,
            target_list: 0,
            pending_list: None,
            raster_enable: false,
            raster_line: 0,
            raster_pending: false,
        }
    }

    pub fn clear(&mut self) {
        *self = VgcState::new();
    }

    fn p(&self, index: usize) -> u8 {
        self.params[index]
    }

    fn p16(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.params[index], self.params[index + 1]])
    }

    // ---- bitmap primitives -------------------------------------------------

    pub fn plot(&mut self, x: i32, y: i32, color: u8) {
        if (0..SCREEN_W as i32).contains(&x) && (0..SCREEN_H as i32).contains(&y) {
            self.gfx[y as usize * SCREEN_W + x as usize] = color & 0x0f;
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.gfx[y * SCREEN_W + x]
    }

    pub fn line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: u8) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);
        loop {
            self.plot(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    pub fn circle(&mut self, cx: i32, cy: i32, r: i32, color: u8) {
        let mut x = r;
        let mut y = 0;
        let mut err = 1 - r;
        while x >= y {
            self.plot(cx + x, cy + y, color);
            self.plot(cx + y, cy + x, color);
            self.plot(cx - y, cy + x, color);
            self.plot(cx - x, cy + y, color);
            self.plot(cx - x, cy - y, color);
            self.plot(cx - y, cy - x, color);
            self.plot(cx + y, cy - x, color);
            self.plot(cx + x, cy - y, color);
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
    }

    pub fn rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: u8) {
        if w <= 0 || h <= 0 {
            return;
        }
        self.line(x, y, x + w - 1, y, color);
        self.line(x, y + h - 1, x + w - 1, y + h - 1, color);
        self.line(x, y, x, y + h - 1, color);
        self.line(x + w - 1, y, x + w - 1, y + h - 1, color);
    }

    pub fn filled_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: u8) {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + w).min(SCREEN_W as i32);
        let y1 = (y + h).min(SCREEN_H as i32);
        for yy in y0..y1 {
            for xx in x0..x1 {
                self.gfx[yy as usize * SCREEN_W + xx as usize] = color & 0x0f;
            }
        }
    }

    /// Scanline flood fill. A fill whose target already carries the fill
    /// color terminates immediately.
    pub fn flood(&mut self, x: i32, y: i32, color: u8) {
        if !(0..SCREEN_W as i32).contains(&x) || !(0..SCREEN_H as i32).contains(&y) {
            return;
        }
        let color = color & 0x0f;
        let target = self.pixel(x as usize, y as usize);
        if target == color {
            return;
        }
        let mut queue = VecDeque::new();
        queue.push_back((x as usize, y as usize));
        while let Some((sx, sy)) = queue.pop_front() {
            if self.pixel(sx, sy) != target {
                continue;
            }
            let mut left = sx;
            while left > 0 && self.pixel(left - 1, sy) == target {
                left -= 1;
            }
            let mut right = sx;
            while right + 1 < SCREEN_W && self.pixel(right + 1, sy) == target {
                right += 1;
            }
            for xx in left..=right {
                self.gfx[sy * SCREEN_W + xx] = color;
                for &ny in &[sy.wrapping_sub(1), sy + 1] {
                    if ny < SCREEN_H && self.pixel(xx, ny) == target {
                        queue.push_back((xx, ny));
                    }
                }
            }
        }
    }

    // ---- unified memory spaces --------------------------------------------

    /// Byte length of a VGC memory space: 0 char, 1 color, 2 graphics,
    /// 3 sprite shapes.
    pub fn space_len(space: u8) -> usize {
        match space {
            0 | 1 => CHAR_RAM_SIZE,
            2 => SCREEN_W * SCREEN_H,
            3 => SHAPE_SLOTS * SHAPE_BYTES,
            _ => 0,
        }
    }

    pub fn space_read(&self, space: u8, offset: u32) -> Option<u8> {
        let offset = offset as usize;
        let buffer = match space {
            0 => &self.char_ram,
            1 => &self.color_ram,
            2 => &self.gfx,
            3 => &self.shapes,
            _ => return None,
        };
        buffer.get(offset).copied()
    }

    pub fn space_write(&mut self, space: u8, offset: u32, value: u8) -> bool {
        let offset = offset as usize;
        let buffer = match space {
            0 => &mut self.char_ram,
            1 => &mut self.color_ram,
            2 => &mut self.gfx,
            3 => &mut self.shapes,
            _ => return false,
        };
        match buffer.get_mut(offset) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    // ---- sprite shapes -----------------------------------------------------

    fn shape_pixel(&mut self, slot: u8, x: u8, y: u8, color: u8) {
        if x >= 16 || y >= 16 {
            return;
        }
        let index = slot as usize * SHAPE_BYTES + y as usize * 8 + x as usize / 2;
        let byte = &mut self.shapes[index];
        if x % 2 == 0 {
            *byte = *byte & 0x0f | (color & 0x0f) << 4;
        } else {
            *byte = *byte & 0xf0 | color & 0x0f;
        }
    }

    // ---- the command port --------------------------------------------------

    pub fn execute(&mut self, cmd: u8) {
        match cmd {
            CMD_GCOLOR => self.draw_color = self.p(0) & 0x0f,
            CMD_PLOT => {
                let (x, y) = (self.p16(0) as i32, self.p(2) as i32);
                self.plot(x, y, self.draw_color);
            }
            CMD_LINE => {
                let (x0, y0) = (self.p16(0) as i32, self.p(2) as i32);
                let (x1, y1) = (self.p16(3) as i32, self.p(5) as i32);
                self.line(x0, y0, x1, y1, self.draw_color);
            }
            CMD_RECT => {
                let (x, y) = (self.p16(0) as i32, self.p(2) as i32);
                let (w, h) = (self.p16(3) as i32, self.p(5) as i32);
                self.rect(x, y, w, h, self.draw_color);
            }
            CMD_FRECT => {
                let (x, y) = (self.p16(0) as i32, self.p(2) as i32);
                let (w, h) = (self.p16(3) as i32, self.p(5) as i32);
                self.filled_rect(x, y, w, h, self.draw_color);
            }
            CMD_CIRCLE => {
                let (cx, cy) = (self.p16(0) as i32, self.p(2) as i32);
                self.circle(cx, cy, self.p(3) as i32, self.draw_color);
            }
            CMD_FLOOD => {
                let (x, y) = (self.p16(0) as i32, self.p(2) as i32);
                self.flood(x, y, self.draw_color);
            }
            CMD_GCLEAR => self.gfx.iter_mut().for_each(|p| *p = 0),
            CMD_SHPIX => self.shape_pixel(self.p(0), self.p(1), self.p(2), self.p(3)),
            CMD_SHROW => {
                let slot = self.p(0) as usize;
                let row = (self.p(1) & 0x0f) as usize;
                let start = slot * SHAPE_BYTES + row * 8;
                for j in 0..8 {
                    self.shapes[start + j] = self.params[2 + j];
                }
            }
            CMD_SHCLR => {
                let start = self.p(0) as usize * SHAPE_BYTES;
                self.shapes[start..start + SHAPE_BYTES].iter_mut().for_each(|b| *b = 0);
            }
            CMD_SHCOPY => {
                let src = self.p(0) as usize * SHAPE_BYTES;
                let dst = self.p(1) as usize * SHAPE_BYTES;
                let copy: Vec<u8> = self.shapes[src..src + SHAPE_BYTES].to_vec();
                self.shapes[dst..dst + SHAPE_BYTES].copy_from_slice(&copy);
            }
            CMD_SPRPOS => {
                let base = (self.p(0) as usize & 0x0f) * 8;
                self.sprite_regs[base] = self.p(1);
                self.sprite_regs[base + 1] = self.p(2);
                self.sprite_regs[base + 2] = self.p(3);
                self.sprite_regs[base + 3] = self.p(4);
            }
            CMD_SPREN => {
                let base = (self.p(0) as usize & 0x0f) * 8;
                let was = self.sprite_regs[base + 5] & SPR_ENABLE != 0;
                let now = self.p(1) != 0;
                if now {
                    self.sprite_regs[base + 5] |= SPR_ENABLE;
                } else {
                    self.sprite_regs[base + 5] &= !SPR_ENABLE;
                }
                if was != now {
                    if now {
                        self.sprites_enabled += 1;
                    } else {
                        self.sprites_enabled -= 1;
                    }
                }
            }
            CMD_SPRFLIP => {
                let base = (self.p(0) as usize & 0x0f) * 8;
                let flags = &mut self.sprite_regs[base + 5];
                *flags = *flags & SPR_ENABLE
                    | if self.params[1] != 0 { SPR_XFLIP } else { 0 }
                    | if self.params[2] != 0 { SPR_YFLIP } else { 0 };
            }
            CMD_SPRPRI => {
                let base = (self.p(0) as usize & 0x0f) * 8;
                self.sprite_regs[base + 6] = self.p(1).min(2);
            }
            CMD_SPRCOL => {
                let base = (self.p(0) as usize & 0x0f) * 8;
                self.sprite_regs[base + 7] = self.p(1) & 0x0f;
            }
            CMD_MEMRD => {
                let space = self.p(0);
                let addr = u32::from_le_bytes([self.p(1), self.p(2), self.p(3), 0]);
                self.params[13] = self.space_read(space, addr).unwrap_or(0);
                if self.p(4) != 0 {
                    let next = addr.wrapping_add(1);
                    self.params[1..4].copy_from_slice(&crate::conversions::split24(next));
                }
            }
            CMD_MEMWR => {
                let space = self.p(0);
                let addr = u32::from_le_bytes([self.p(1), self.p(2), self.p(3), 0]);
                self.space_write(space, addr, self.p(4));
                if self.p(5) != 0 {
                    let next = addr.wrapping_add(1);
                    self.params[1..4].copy_from_slice(&crate::conversions::split24(next));
                }
            }
            CMD_COPADD => self.copper_add(self.p16(0) as u32, self.p(2), self.p(3)),
            CMD_COPCLR => self.lists[self.target_list].clear(),
            CMD_COPON => self.copper_enabled = true,
            CMD_COPOFF => self.copper_enabled = false,
            CMD_COPTARGET => self.target_list = self.p(0) as usize % COPPER_LISTS,
            CMD_COPSWAP => self.pending_list = Some(self.p(0) as usize % COPPER_LISTS),
            CMD_COPRESET => {
                self.lists[self.target_list] = self.lists[self.active_list].clone();
            }
            CMD_RASTERLINE => self.raster_line = self.p(0),
            CMD_RESET => {
                // the device wrapper intercepts this to also stop the SID
                // chips, the music engine and the NIC
                self.clear();
            }
            other => debug!("vgc: unknown command ${:02x} ignored", other),
        }
    }

    /// Add an event to the target list. An event at the same position for
    /// the same register is replaced in place; insertion order is otherwise
    /// preserved, and it decides firing order at equal positions.
    fn copper_add(&mut self, pos: u32, reg: u8, val: u8) {
        let list = &mut self.lists[self.target_list];
        if let Some(existing) = list.iter_mut().find(|e| e.pos == pos && e.reg == reg) {
            existing.val = val;
            return;
        }
        if list.len() < COPPER_LIST_CAP {
            list.push(CopperEvent { pos, reg, val });
        }
    }

    pub fn active_events(&self) -> &[CopperEvent] {
        &self.lists[self.active_list]
    }

    // ---- character terminal ------------------------------------------------

    pub fn putchar(&mut self, ch: u8) {
        match ch {
            0x08 => {
                // backspace rubs the character out
                let cx = self.regs[REG_CURSX];
                if cx > 0 {
                    self.regs[REG_CURSX] = cx - 1;
                    self.set_cell(cx as usize - 1, self.regs[REG_CURSY] as usize, 0x20);
                }
            }
            0x0a => self.cursor_down(),
            0x0b => {
                self.regs[REG_CURSX] = 0;
                self.regs[REG_CURSY] = 0;
            }
            0x0c => {
                self.char_ram.iter_mut().for_each(|c| *c = 0x20);
                self.color_ram.iter_mut().for_each(|c| *c = 0);
                self.regs[REG_CURSX] = 0;
                self.regs[REG_CURSY] = 0;
            }
            0x0d => {
                self.regs[REG_CURSX] = 0;
                self.cursor_down();
            }
            ch if ch >= 0x20 => {
                let (cx, cy) = (self.regs[REG_CURSX] as usize, self.regs[REG_CURSY] as usize);
                self.set_cell(cx, cy, ch);
                if cx + 1 >= TEXT_COLS {
                    self.regs[REG_CURSX] = 0;
                    self.cursor_down();
                } else {
                    self.regs[REG_CURSX] = cx as u8 + 1;
                }
            }
            _ => {}
        }
    }

    fn set_cell(&mut self, cx: usize, cy: usize, ch: u8) {
        if cx < TEXT_COLS && cy < TEXT_ROWS {
            self.char_ram[cy * TEXT_COLS + cx] = ch;
            self.color_ram[cy * TEXT_COLS + cx] = self.regs[REG_FG];
        }
    }

    fn cursor_down(&mut self) {
        let cy = self.regs[REG_CURSY] as usize;
        if cy + 1 >= TEXT_ROWS {
            self.scroll_text_up();
            self.regs[REG_CURSY] = TEXT_ROWS as u8 - 1;
        } else {
            self.regs[REG_CURSY] = cy as u8 + 1;
        }
    }

    fn scroll_text_up(&mut self) {
        self.char_ram.copy_within(TEXT_COLS.., 0);
        self.color_ram.copy_within(TEXT_COLS.., 0);
        let last = (TEXT_ROWS - 1) * TEXT_COLS;
        self.char_ram[last..].iter_mut().for_each(|c| *c = 0x20);
        self.color_ram[last..].iter_mut().for_each(|c| *c = 0);
    }

    /// Text-plane sample at logical pixel (x, y) under the given register
    /// snapshot. Returns the foreground index where a glyph pixel is lit.
    pub fn text_pixel(&self, x: usize, y: usize, regs: &[u8; 16]) -> Option<u8> {
        let col = (x / font::GLYPH_W + regs[REG_SCRLX] as usize) % TEXT_COLS;
        let row = (y / font::GLYPH_H + regs[REG_SCRLY] as usize) % TEXT_ROWS;
        let cell = row * TEXT_COLS + col;
        let ch = self.char_ram[cell];
        let bits = font::glyph(ch)[y % font::GLYPH_H];
        let mut on = bits & (0x08 >> (x % font::GLYPH_W)) != 0;
        if regs[REG_CURSEN] != 0
            && col == regs[REG_CURSX] as usize
            && row == regs[REG_CURSY] as usize
            && self.frame & 0x20 != 0
        {
            on = !on;
        }
        if on {
            let fg = self.color_ram[cell] & 0x0f;
            Some(if fg == 0 { regs[REG_FG] & 0x0f } else { fg })
        } else {
            None
        }
    }

    pub fn gfx_pixel(&self, x: usize, y: usize, regs: &[u8; 16]) -> u8 {
        let gx = (x + regs[REG_SCRLX] as usize) % SCREEN_W;
        let gy = (y + regs[REG_SCRLY] as usize) % SCREEN_H;
        self.gfx[gy * SCREEN_W + gx]
    }
}

/// Render one frame into a FB_W×FB_H 0RGB buffer. Runs on the renderer
/// thread with the state lock held: applies the staged copper-list swap
/// (this call is the vblank boundary), plays the copper against register
/// and sprite snapshots, rasterizes, accumulates collisions, and bumps the
/// frame counter.
pub fn render_frame(state: &mut VgcState, fb: &mut [u32]) {
    if let Some(list) = state.pending_list.take() {
        state.active_list = list;
    }
    let mut sprite_events: Vec<CopperEvent> = Vec::new();
    let mut pixel_events: Vec<CopperEvent> = Vec::new();
    if state.copper_enabled {
        for event in state.active_events() {
            if (0x40..0xc0).contains(&event.reg) {
                sprite_events.push(*event);
            } else {
                pixel_events.push(*event);
            }
        }
        sprite_events.sort_by_key(|e| e.pos);
        pixel_events.sort_by_key(|e| e.pos);
    }

    let mut regs = state.regs;
    let mut spr = state.sprite_regs;
    let mut coll_ss: u16 = 0;
    let mut coll_sb: u16 = 0;
    let mut spr_next = 0;
    let mut px_next = 0;

    for y in 0..SCREEN_H {
        // sprite-register events fire ahead of their scanline
        let line_end = ((y + 1) * SCREEN_W) as u32;
        while spr_next < sprite_events.len() && sprite_events[spr_next].pos < line_end {
            let event = sprite_events[spr_next];
            spr[event.reg as usize - 0x40] = event.val;
            spr_next += 1;
        }

        let mut behind = [0xffu8; SCREEN_W];
        let mut between = [0xffu8; SCREEN_W];
        let mut front = [0xffu8; SCREEN_W];
        let mut mask = [0u16; SCREEN_W];

        for s in 0..SPRITE_COUNT {
            let r = &spr[s * 8..s * 8 + 8];
            let flags = r[5];
            if flags & SPR_ENABLE == 0 {
                continue;
            }
            let sx = i16::from_le_bytes([r[0], r[1]]) as i32;
            let sy = i16::from_le_bytes([r[2], r[3]]) as i32;
            let mut row = y as i32 - sy;
            if !(0..16).contains(&row) {
                continue;
            }
            if flags & SPR_YFLIP != 0 {
                row = 15 - row;
            }
            let shape = r[4] as usize;
            let priority = r[6].min(2);
            let transparent = r[7] & 0x0f;
            for px in 0..16 {
                let col = sx + px;
                if !(0..SCREEN_W as i32).contains(&col) {
                    continue;
                }
                let sp = if flags & SPR_XFLIP != 0 { 15 - px } else { px } as usize;
                let byte = state.shapes[shape * SHAPE_BYTES + row as usize * 8 + sp / 2];
                let ci = if sp % 2 == 0 { byte >> 4 } else { byte & 0x0f };
                if ci == transparent {
                    continue;
                }
                let col = col as usize;
                if mask[col] != 0 {
                    coll_ss |= mask[col] | 1 << s;
                }
                if state.gfx_pixel(col, y, &regs) != 0 {
                    coll_sb |= 1 << s;
                }
                mask[col] |= 1 << s;
                let plane = match priority {
                    0 => &mut behind,
                    1 => &mut between,
                    _ => &mut front,
                };
                // first writer wins: the lower sprite number stays on top
                if plane[col] == 0xff {
                    plane[col] = ci;
                }
            }
        }

        for x in 0..SCREEN_W {
            let index = (y * SCREEN_W + x) as u32;
            while px_next < pixel_events.len() && pixel_events[px_next].pos <= index {
                let event = pixel_events[px_next];
                if (event.reg as usize) < REG_FRAME {
                    regs[event.reg as usize] = event.val;
                }
                px_next += 1;
            }

            let mode = regs[REG_MODE] & 3;
            let mut ci = regs[REG_BG] & 0x0f;
            let sprite = |plane: &[u8; SCREEN_W], ci: &mut u8| {
                if plane[x] != 0xff {
                    *ci = plane[x];
                }
            };
            let text = state.text_pixel(x, y, &regs);
            let gfx = match state.gfx_pixel(x, y, &regs) {
                0 => None,
                p => Some(p),
            };
            sprite(&behind, &mut ci);
            match mode {
                0 => {
                    if let Some(t) = text {
                        ci = t;
                    }
                    sprite(&between, &mut ci);
                }
                1 => {
                    if let Some(t) = text {
                        ci = t;
                    }
                    sprite(&between, &mut ci);
                    if let Some(g) = gfx {
                        ci = g;
                    }
                }
                2 => {
                    if let Some(g) = gfx {
                        ci = g;
                    }
                    sprite(&between, &mut ci);
                    if let Some(t) = text {
                        ci = t;
                    }
                }
                _ => {
                    if let Some(g) = gfx {
                        ci = g;
                    }
                    sprite(&between, &mut ci);
                }
            }
            sprite(&front, &mut ci);

            let rgb = PALETTE[ci as usize & 0x0f];
            let fx = x * 2;
            let fy = y * 2;
            fb[fy * FB_W + fx] = rgb;
            fb[fy * FB_W + fx + 1] = rgb;
            fb[(fy + 1) * FB_W + fx] = rgb;
            fb[(fy + 1) * FB_W + fx + 1] = rgb;
        }

        if state.raster_enable && y as u8 == state.raster_line {
            state.raster_pending = true;
        }
    }

    state.coll_ss |= coll_ss;
    state.coll_sb |= coll_sb;
    state.frame = state.frame.wrapping_add(1);
}

/// The bus-facing device. Register reads and writes go straight to the
/// shared state; the reset command fans out to the SID bank, the music
/// engine and the NIC.
pub struct Vgc {
    pub state: VgcPtr,
    sid: SidPtr,
    music: MusicPtr,
    nic: NicPtr,
}

impl Vgc {
    pub fn new(state: VgcPtr, sid: SidPtr, music: MusicPtr, nic: NicPtr) -> Box<Self> {
        Box::new(Vgc { state, sid, music, nic })
    }

    fn system_reset(&mut self) {
        debug!("vgc: system reset");
        self.state.lock().unwrap().clear();
        self.sid.lock().unwrap().stop_all();
        self.music.lock().unwrap().stop();
        self.nic.lock().unwrap().reset();
    }
}

impl Device for Vgc {
    fn memconfig(&self) -> MemoryRange {
        vec![
            (VGC_BASE, VGC_BASE + 0x1f),
            (SPRITE_BASE, SPRITE_BASE + 0x7f),
            (CHAR_BASE, CHAR_BASE + CHAR_RAM_SIZE as u16 - 1),
            (COLOR_BASE, COLOR_BASE + CHAR_RAM_SIZE as u16 - 1),
        ]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        let mut state = self.state.lock().unwrap();
        match address {
            a if (CHAR_BASE..CHAR_BASE + CHAR_RAM_SIZE as u16).contains(&a) => {
                state.char_ram[(a - CHAR_BASE) as usize]
            }
            a if (COLOR_BASE..COLOR_BASE + CHAR_RAM_SIZE as u16).contains(&a) => {
                state.color_ram[(a - COLOR_BASE) as usize]
            }
            a if (SPRITE_BASE..SPRITE_BASE + 0x80).contains(&a) => {
                state.sprite_regs[(a - SPRITE_BASE) as usize]
            }
            a => match (a - VGC_BASE) as usize {
                REG_FRAME => state.frame,
                REG_SSCOL_LO => {
                    let value = state.coll_ss as u8;
                    state.coll_ss &= 0xff00;
                    value
                }
                REG_SSCOL_HI => {
                    let value = (state.coll_ss >> 8) as u8;
                    state.coll_ss &= 0x00ff;
                    value
                }
                REG_SBCOL_LO => {
                    let value = state.coll_sb as u8;
                    state.coll_sb &= 0xff00;
                    value
                }
                REG_SBCOL_HI => {
                    let value = (state.coll_sb >> 8) as u8;
                    state.coll_sb &= 0x00ff;
                    value
                }
                REG_CHROUT => {
                    let pending = state.raster_pending as u8;
                    state.raster_pending = false;
                    pending
                }
                REG_CHRIN => state.chin.pop_front().unwrap_or(0),
                REG_CMD => 0,
                REG_RASTERCTL => 0,
                offset if (REG_PARAMS..REG_PARAMS + 14).contains(&offset) => {
                    state.params[offset - REG_PARAMS]
                }
                offset if offset < 16 => state.regs[offset],
                _ => 0,
            },
        }
    }

    fn write(&mut self, address: u16, value: u8, _ram: &mut [u8]) {
        if address == VGC_BASE + REG_CMD as u16 && value == CMD_RESET {
            self.system_reset();
            return;
        }
        let mut state = self.state.lock().unwrap();
        match address {
            a if (CHAR_BASE..CHAR_BASE + CHAR_RAM_SIZE as u16).contains(&a) => {
                state.char_ram[(a - CHAR_BASE) as usize] = value;
            }
            a if (COLOR_BASE..COLOR_BASE + CHAR_RAM_SIZE as u16).contains(&a) => {
                state.color_ram[(a - COLOR_BASE) as usize] = value;
            }
            a if (SPRITE_BASE..SPRITE_BASE + 0x80).contains(&a) => {
                let offset = (a - SPRITE_BASE) as usize;
                if offset % 8 == 5 {
                    // keep the enabled count in step with direct flag writes
                    let was = state.sprite_regs[offset] & SPR_ENABLE != 0;
                    let now = value & SPR_ENABLE != 0;
                    if was != now {
                        if now {
                            state.sprites_enabled += 1;
                        } else {
                            state.sprites_enabled -= 1;
                        }
                    }
                }
                state.sprite_regs[offset] = value;
            }
            a => match (a - VGC_BASE) as usize {
                REG_CHROUT => state.putchar(value),
                REG_CMD => state.execute(value),
                REG_RASTERCTL => state.raster_enable = value & 0x80 != 0,
                REG_FRAME | REG_SSCOL_LO | REG_SSCOL_HI | REG_SBCOL_LO | REG_SBCOL_HI
                | REG_CHRIN => {}
                offset if (REG_PARAMS..REG_PARAMS + 14).contains(&offset) => {
                    state.params[offset - REG_PARAMS] = value;
                }
                offset if offset < 16 => state.regs[offset] = value,
                _ => {}
            },
        }
    }

    fn interrupt_request(&mut self) -> Option<Interrupt> {
        let state = self.state.lock().unwrap();
        if state.raster_enable && state.raster_pending {
            Some(Interrupt::Irq)
        } else {
            None
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.system_reset();
    }
}
