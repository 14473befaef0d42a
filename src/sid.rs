// Two SID synthesizer chips: three voices each with phase-accumulator
// oscillators (triangle, sawtooth, pulse, noise), linear-segment ADSR
// envelopes and a shared state-variable filter. A functional model of the
// register surface, not an analog one. The audio thread pulls mixed
// samples through a rodio source.

use crate::devices::Device;
use crate::memory::MemoryRange;
use rodio::source::Source;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SID1_BASE: u16 = 0xd400;
pub const SID2_BASE: u16 = 0xd420;
pub const SID_MIRROR: u16 = 0xd500;
pub const SID_REGS: u16 = 0x1d;

pub const SAMPLE_RATE: u32 = 44_100;
const SID_CLOCK: f32 = 985_248.0;

// Control register bits.
pub const CTRL_GATE: u8 = 0x01;
pub const CTRL_TRIANGLE: u8 = 0x10;
pub const CTRL_SAW: u8 = 0x20;
pub const CTRL_PULSE: u8 = 0x40;
pub const CTRL_NOISE: u8 = 0x80;

// Nominal segment times per the classic rate table, milliseconds.
const ATTACK_MS: [f32; 16] = [
    2.0, 8.0, 16.0, 24.0, 38.0, 56.0, 68.0, 80.0, 100.0, 250.0, 500.0, 800.0, 1000.0, 3000.0,
    5000.0, 8000.0,
];

pub type SidPtr = Arc<Mutex<SidBank>>;

#[derive(Debug, Copy, Clone, PartialEq)]
enum EnvPhase {
    Idle,
    Attack,
    Decay,
    Release,
}

#[derive(Debug, Copy, Clone)]
pub struct Voice {
    pub freq: u16,
    pub pw: u16,
    pub control: u8,
    pub ad: u8,
    pub sr: u8,
    phase: u32,
    lfsr: u32,
    env: f32,
    env_phase: EnvPhase,
}

impl Voice {
    fn new() -> Self {
        Voice {
            freq: 0,
            pw: 0x800,
            control: 0,
            ad: 0,
            sr: 0,
            phase: 0,
            lfsr: 0x7f_fff8,
            env: 0.0,
            env_phase: EnvPhase::Idle,
        }
    }

    fn set_control(&mut self, value: u8) {
        let was_gated = self.control & CTRL_GATE != 0;
        let gated = value & CTRL_GATE != 0;
        self.control = value;
        if gated && !was_gated {
            self.env_phase = EnvPhase::Attack;
        } else if !gated && was_gated {
            self.env_phase = EnvPhase::Release;
        }
    }

    fn step_envelope(&mut self) {
        let per_sample = |ms: f32| 1.0 / (ms.max(1.0) * SAMPLE_RATE as f32 / 1000.0);
        match self.env_phase {
            EnvPhase::Attack => {
                self.env += per_sample(ATTACK_MS[(self.ad >> 4) as usize]);
                if self.env >= 1.0 {
                    self.env = 1.0;
                    self.env_phase = EnvPhase::Decay;
                }
            }
            EnvPhase::Decay => {
                let sustain = (self.sr >> 4) as f32 / 15.0;
                self.env -= per_sample(3.0 * ATTACK_MS[(self.ad & 0x0f) as usize]);
                if self.env <= sustain {
                    self.env = sustain;
                }
            }
            EnvPhase::Release => {
                self.env -= per_sample(3.0 * ATTACK_MS[(self.sr & 0x0f) as usize]);
                if self.env <= 0.0 {
                    self.env = 0.0;
                    self.env_phase = EnvPhase::Idle;
                }
            }
            EnvPhase::Idle => {}
        }
    }

    /// One output sample in [-1, 1] before enveloping.
    fn oscillate(&mut self) -> f32 {
        let step = (self.freq as f32 * SID_CLOCK / SAMPLE_RATE as f32) as u32;
        let old = self.phase;
        self.phase = self.phase.wrapping_add(step) & 0x00ff_ffff;
        // the noise generator clocks on bit 19 transitions
        if (old ^ self.phase) & 0x0008_0000 != 0 {
            let bit = (self.lfsr >> 22 ^ self.lfsr >> 17) & 1;
            self.lfsr = (self.lfsr << 1 | bit) & 0x007f_ffff;
        }
        let mut out = 0.0f32;
        let mut sources = 0;
        if self.control & CTRL_TRIANGLE != 0 {
            let tri = if self.phase & 0x0080_0000 != 0 {
                0x00ff_ffff - self.phase
            } else {
                self.phase
            };
            out += tri as f32 / 0x007f_ffff as f32 * 2.0 - 1.0;
            sources += 1;
        }
        if self.control & CTRL_SAW != 0 {
            out += self.phase as f32 / 0x00ff_ffff as f32 * 2.0 - 1.0;
            sources += 1;
        }
        if self.control & CTRL_PULSE != 0 {
            let duty = (self.pw & 0x0fff) as u32;
            out += if self.phase >> 12 >= duty { 1.0 } else { -1.0 };
            sources += 1;
        }
        if self.control & CTRL_NOISE != 0 {
            out += (self.lfsr & 0xff) as f32 / 127.5 - 1.0;
            sources += 1;
        }
        if sources > 1 {
            out /= sources as f32;
        }
        out
    }

    pub fn envelope(&self) -> u8 {
        (self.env * 255.0) as u8
    }
}

pub struct SidChip {
    pub voices: [Voice; 3],
    pub fc: u16, // 11-bit cutoff
    pub res_filt: u8,
    pub mode_vol: u8,
    flt_low: f32,
    flt_band: f32,
}

impl SidChip {
    pub fn new() -> Self {
        SidChip {
            voices: [Voice::new(); 3],
            fc: 0,
            res_filt: 0,
            mode_vol: 0,
            flt_low: 0.0,
            flt_band: 0.0,
        }
    }

    pub fn write(&mut self, reg: u16, value: u8) {
        let voice = (reg / 7) as usize;
        match reg {
            0x00 | 0x07 | 0x0e => {
                self.voices[voice].freq = self.voices[voice].freq & 0xff00 | value as u16;
            }
            0x01 | 0x08 | 0x0f => {
                self.voices[voice].freq =
                    self.voices[voice].freq & 0x00ff | (value as u16) << 8;
            }
            0x02 | 0x09 | 0x10 => {
                self.voices[voice].pw = self.voices[voice].pw & 0x0f00 | value as u16;
            }
            0x03 | 0x0a | 0x11 => {
                self.voices[voice].pw =
                    self.voices[voice].pw & 0x00ff | ((value & 0x0f) as u16) << 8;
            }
            0x04 | 0x0b | 0x12 => self.voices[voice].set_control(value),
            0x05 | 0x0c | 0x13 => self.voices[voice].ad = value,
            0x06 | 0x0d | 0x14 => self.voices[voice].sr = value,
            0x15 => self.fc = self.fc & 0x07f8 | (value & 0x07) as u16,
            0x16 => self.fc = self.fc & 0x0007 | (value as u16) << 3,
            0x17 => self.res_filt = value,
            0x18 => self.mode_vol = value,
            _ => {}
        }
    }

    pub fn read(&self, reg: u16) -> u8 {
        match reg {
            // oscillator 3 and envelope 3 readback
            0x1b => (self.voices[2].phase >> 16) as u8,
            0x1c => self.voices[2].envelope(),
            _ => 0,
        }
    }

    pub fn stop(&mut self) {
        for voice in &mut self.voices {
            voice.set_control(voice.control & !CTRL_GATE);
            voice.env = 0.0;
            voice.env_phase = EnvPhase::Idle;
        }
        self.mode_vol &= 0xf0;
    }

    pub fn sample(&mut self) -> f32 {
        let mut filtered = 0.0;
        let mut direct = 0.0;
        for (j, voice) in self.voices.iter_mut().enumerate() {
            voice.step_envelope();
            let s = voice.oscillate() * voice.env;
            if self.res_filt & (1 << j) != 0 {
                filtered += s;
            } else {
                direct += s;
            }
        }
        let cutoff = 30.0 + self.fc as f32 * 5.8;
        let f = (2.0 * (std::f32::consts::PI * cutoff / SAMPLE_RATE as f32).sin()).min(1.0);
        let q = 1.0 - (self.res_filt >> 4) as f32 / 20.0;
        self.flt_low += f * self.flt_band;
        let high = filtered - self.flt_low - q * self.flt_band;
        self.flt_band += f * high;
        let mut flt_out = 0.0;
        if self.mode_vol & 0x10 != 0 {
            flt_out += self.flt_low;
        }
        if self.mode_vol & 0x20 != 0 {
            flt_out += self.flt_band;
        }
        if self.mode_vol & 0x40 != 0 {
            flt_out += high;
        }
        if self.mode_vol & 0x70 == 0 {
            // filter disengaged: routed voices pass through unchanged
            flt_out = filtered;
        }
        let volume = (self.mode_vol & 0x0f) as f32 / 15.0;
        (direct + flt_out) / 3.0 * volume
    }
}

pub struct SidBank {
    pub chips: [SidChip; 2],
}

impl SidBank {
    pub fn new() -> Self {
        SidBank { chips: [SidChip::new(), SidChip::new()] }
    }

    pub fn stop_all(&mut self) {
        for chip in &mut self.chips {
            chip.stop();
        }
    }

    pub fn sample(&mut self) -> f32 {
        (self.chips[0].sample() + self.chips[1].sample()) * 0.5
    }
}

/// Bus window: chip 1 at $D400, chip 2 at $D420, and a transparent mirror
/// of chip 2 at $D500. All three sit inside the ROM region and intercept
/// it.
pub struct Sid {
    pub bank: SidPtr,
}

impl Sid {
    pub fn new(bank: SidPtr) -> Box<Self> {
        Box::new(Sid { bank })
    }

    fn decode(address: u16) -> Option<(usize, u16)> {
        match address {
            a if (SID1_BASE..SID1_BASE + SID_REGS).contains(&a) => Some((0, a - SID1_BASE)),
            a if (SID2_BASE..SID2_BASE + SID_REGS).contains(&a) => Some((1, a - SID2_BASE)),
            a if (SID_MIRROR..SID_MIRROR + SID_REGS).contains(&a) => Some((1, a - SID_MIRROR)),
            _ => None,
        }
    }
}

impl Device for Sid {
    fn memconfig(&self) -> MemoryRange {
        vec![
            (SID1_BASE, SID1_BASE + SID_REGS - 1),
            (SID2_BASE, SID2_BASE + SID_REGS - 1),
            (SID_MIRROR, SID_MIRROR + SID_REGS - 1),
        ]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        match Sid::decode(address) {
            Some((chip, reg)) => self.bank.lock().unwrap().chips[chip].read(reg),
            None => 0,
        }
    }

    fn write(&mut self, address: u16, value: u8, _ram: &mut [u8]) {
        if let Some((chip, reg)) = Sid::decode(address) {
            self.bank.lock().unwrap().chips[chip].write(reg, value);
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.bank.lock().unwrap().stop_all();
    }
}

/// Endless mono sample stream over the shared bank.
pub struct SidSource {
    bank: SidPtr,
}

impl SidSource {
    pub fn new(bank: SidPtr) -> Self {
        SidSource { bank }
    }
}

impl Iterator for SidSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(self.bank.lock().unwrap().sample())
    }
}

impl Source for SidSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
