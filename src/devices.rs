// The bus-facing device contract and the interval timer. Every coprocessor
// implements Device; the bus hands each access the flat CPU RAM so that
// command-triggered transfers (NIC descriptors, FIO, DMA) can move bytes
// without re-entering the bus.

use crate::memory::MemoryRange;
use std::time::Instant;

pub type DeviceList = Vec<(MemoryRange, Box<dyn Device>)>;

// Per-command status register values shared by the coprocessors.
pub const ST_IDLE: u8 = 0;
pub const ST_BUSY: u8 = 1;
pub const ST_OK: u8 = 2;
pub const ST_ERROR: u8 = 3;

// Error-code register values; one taxonomy across all coprocessors.
pub const ERR_NONE: u8 = 0;
pub const ERR_RANGE: u8 = 1;
pub const ERR_BAD_ARGS: u8 = 2;
pub const ERR_NOT_FOUND: u8 = 3;
pub const ERR_NO_SPACE: u8 = 4;
pub const ERR_NAME: u8 = 5;
pub const ERR_END_OF_DIR: u8 = 6;
pub const ERR_IO: u8 = 7;
pub const ERR_NETWORK: u8 = 8;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Interrupt {
    Irq,
    Nmi,
}

pub trait Device {
    fn memconfig(&self) -> MemoryRange;
    fn read(&mut self, address: u16, ram: &mut [u8]) -> u8;
    fn write(&mut self, address: u16, value: u8, ram: &mut [u8]);
    fn interrupt_request(&mut self) -> Option<Interrupt> {
        None
    }
    fn reset(&mut self, _ram: &mut [u8]) {}
}

// Timer register file.
const TIMER_CTRL: u16 = 0;
const TIMER_DIV_LO: u16 = 1;
const TIMER_DIV_HI: u16 = 2;
const TIMER_COUNT_LO: u16 = 3;
const TIMER_COUNT_HI: u16 = 4;
const TIMER_IRQ: u16 = 5;

const CTRL_RUN: u8 = 0x01;
const CTRL_IRQ_EN: u8 = 0x02;

/// Millisecond interval timer. A divisor written mid-interval latches and
/// takes effect when the running interval expires.
pub struct Timer {
    base: u16,
    ctrl: u8,
    divisor: u16,
    latched_divisor: u16,
    started: Instant,
    irq_pending: bool,
}

impl Timer {
    pub fn new(base: u16) -> Box<Self> {
        Box::new(Timer {
            base,
            ctrl: 0,
            divisor: 1000,
            latched_divisor: 1000,
            started: Instant::now(),
            irq_pending: false,
        })
    }

    fn interval_ms(&self) -> u64 {
        self.divisor.max(1) as u64
    }

    fn advance(&mut self) {
        if self.ctrl & CTRL_RUN == 0 {
            return;
        }
        let elapsed = self.started.elapsed().as_millis() as u64;
        if elapsed >= self.interval_ms() {
            self.irq_pending = true;
            self.divisor = self.latched_divisor;
            self.started = Instant::now();
        }
    }

    fn remaining_ms(&mut self) -> u16 {
        self.advance();
        if self.ctrl & CTRL_RUN == 0 {
            return 0;
        }
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.interval_ms().saturating_sub(elapsed) as u16
    }
}

impl Device for Timer {
    fn memconfig(&self) -> MemoryRange {
        vec![(self.base, self.base + 0x0f)]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        match address - self.base {
            TIMER_CTRL => self.ctrl,
            TIMER_DIV_LO => self.latched_divisor as u8,
            TIMER_DIV_HI => (self.latched_divisor >> 8) as u8,
            TIMER_COUNT_LO => self.remaining_ms() as u8,
            TIMER_COUNT_HI => (self.remaining_ms() >> 8) as u8,
            TIMER_IRQ => {
                self.advance();
                let pending = self.irq_pending as u8;
                self.irq_pending = false;
                pending
            }
            _ => 0,
        }
    }

    fn write(&mut self, address: u16, value: u8, _ram: &mut [u8]) {
        match address - self.base {
            TIMER_CTRL => {
                let was_running = self.ctrl & CTRL_RUN != 0;
                self.ctrl = value;
                if !was_running && value & CTRL_RUN != 0 {
                    self.divisor = self.latched_divisor;
                    self.started = Instant::now();
                }
            }
            TIMER_DIV_LO => {
                self.latched_divisor = self.latched_divisor & 0xff00 | value as u16;
            }
            TIMER_DIV_HI => {
                self.latched_divisor = self.latched_divisor & 0x00ff | (value as u16) << 8;
            }
            _ => {}
        }
    }

    fn interrupt_request(&mut self) -> Option<Interrupt> {
        self.advance();
        if self.ctrl & CTRL_IRQ_EN != 0 && self.irq_pending {
            Some(Interrupt::Irq)
        } else {
            None
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.ctrl = 0;
        self.irq_pending = false;
    }
}
