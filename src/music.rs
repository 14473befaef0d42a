// Six-voice music engine on top of the SID bank. MML text compiles into
// per-voice event lists; the engine ticks once per rendered frame, runs
// the per-frame modulators, and writes the resulting register deltas into
// the owning chip (voices 0–2 on chip 1, 3–5 on chip 2). One-shot sound
// effects steal the lowest-priority active voice and hand it back when
// they finish.

use crate::devices::Device;
use crate::memory::MemoryRange;
use crate::sid::{SidBank, CTRL_GATE, CTRL_NOISE, CTRL_PULSE, CTRL_SAW, CTRL_TRIANGLE};
use log::{debug, warn};
use std::sync::{Arc, Mutex};

pub const MUSIC_BASE: u16 = 0xba50;
pub const VOICES: usize = 6;

// Engine frames are video frames.
pub const FRAME_RATE: f32 = 50.0;

// Register file offsets from MUSIC_BASE.
const REG_NOTES: u16 = 0x00; // ..0x05 current MIDI note per voice, read-only
const REG_FLAGS: u16 = 0x06; // bit0 music playing, bit1 sfx playing
const REG_CMD: u16 = 0x07;
const REG_PTR_LO: u16 = 0x08;
const REG_PTR_HI: u16 = 0x09;
const REG_PARAM: u16 = 0x0a;
const REG_PARAM2: u16 = 0x0b;

pub const CMD_PLAY: u8 = 1;
pub const CMD_STOP: u8 = 2;
pub const CMD_SFX: u8 = 3;
pub const CMD_TEMPO: u8 = 4;
pub const CMD_LOOP: u8 = 5;

const MML_MAX: usize = 4096;

pub type MusicPtr = Arc<Mutex<MusicEngine>>;

#[derive(Debug, Copy, Clone)]
pub struct Instrument {
    pub waveform: u8,
    pub ad: u8,
    pub sr: u8,
    pub pw: u16,
}

// Sixteen presets: lead, bass, pads, percussion and effect colours.
#[rustfmt::skip]
pub const INSTRUMENTS: [Instrument; 16] = [
    Instrument { waveform: CTRL_PULSE,    ad: 0x09, sr: 0xa6, pw: 0x0800 }, // square lead
    Instrument { waveform: CTRL_SAW,      ad: 0x29, sr: 0x95, pw: 0x0800 }, // saw lead
    Instrument { waveform: CTRL_TRIANGLE, ad: 0x18, sr: 0xc8, pw: 0x0800 }, // flute
    Instrument { waveform: CTRL_PULSE,    ad: 0x05, sr: 0x83, pw: 0x0200 }, // thin pulse
    Instrument { waveform: CTRL_SAW,      ad: 0x0a, sr: 0x66, pw: 0x0800 }, // bass saw
    Instrument { waveform: CTRL_TRIANGLE, ad: 0x0b, sr: 0x55, pw: 0x0800 }, // soft bass
    Instrument { waveform: CTRL_PULSE,    ad: 0x4b, sr: 0xb9, pw: 0x0600 }, // pad
    Instrument { waveform: CTRL_SAW,      ad: 0x6c, sr: 0xcb, pw: 0x0800 }, // string pad
    Instrument { waveform: CTRL_NOISE,    ad: 0x02, sr: 0x40, pw: 0x0800 }, // hat
    Instrument { waveform: CTRL_NOISE,    ad: 0x09, sr: 0x70, pw: 0x0800 }, // snare
    Instrument { waveform: CTRL_TRIANGLE, ad: 0x0a, sr: 0x40, pw: 0x0800 }, // kick-ish
    Instrument { waveform: CTRL_PULSE,    ad: 0x00, sr: 0xf0, pw: 0x0800 }, // organ
    Instrument { waveform: CTRL_SAW,      ad: 0x39, sr: 0x87, pw: 0x0800 }, // brass
    Instrument { waveform: CTRL_TRIANGLE, ad: 0x49, sr: 0xa9, pw: 0x0800 }, // bell
    Instrument { waveform: CTRL_PULSE,    ad: 0x17, sr: 0x94, pw: 0x0400 }, // pluck
    Instrument { waveform: CTRL_NOISE,    ad: 0x39, sr: 0x9a, pw: 0x0800 }, // wind
];

#[derive(Debug, Copy, Clone, Default)]
pub struct Modulators {
    pub arpeggio: bool,
    pub vibrato: bool,
    pub portamento: bool,
    pub pw_sweep: bool,
    pub filter_sweep: bool,
}

#[derive(Debug, Copy, Clone)]
struct NoteEvent {
    note: Option<u8>, // MIDI; None is a rest
    frames: u32,
    tie: bool,
}

#[derive(Debug, Clone, Default)]
struct Track {
    events: Vec<NoteEvent>,
    index: usize,
    frames_left: u32,
    instrument: usize,
    volume: u8,
    mods: Modulators,
    note: u8,
    target: f32,
    pitch: f32, // portamento position, MIDI units
    vib_phase: f32,
    sweep_phase: f32,
    active: bool,
}

#[derive(Debug, Clone)]
struct Sfx {
    voice: usize,
    events: Vec<NoteEvent>,
    index: usize,
    frames_left: u32,
    instrument: usize,
}

pub struct MusicEngine {
    tracks: [Track; VOICES],
    pub tempo: u16,
    pub looping: bool,
    pub playing: bool,
    sfx: Option<Sfx>,
}

impl MusicEngine {
    pub fn new() -> Self {
        MusicEngine {
            tracks: Default::default(),
            tempo: 120,
            looping: false,
            playing: false,
            sfx: None,
        }
    }

    pub fn stop(&mut self) {
        for track in &mut self.tracks {
            *track = Track::default();
        }
        self.playing = false;
        self.sfx = None;
    }

    /// Compile an MML score (up to six comma-separated voice tracks) and
    /// start it from the top.
    pub fn play(&mut self, score: &str) -> Result<(), String> {
        let mut tempo = self.tempo;
        let mut tracks: [Track; VOICES] = Default::default();
        for (index, part) in score.split(',').enumerate() {
            if index >= VOICES {
                return Err("more than six voices".into());
            }
            tracks[index] = parse_track(part, &mut tempo)?;
        }
        self.tempo = tempo;
        self.tracks = tracks;
        self.playing = true;
        debug!("music: score started at {} bpm", self.tempo);
        Ok(())
    }

    /// One-shot effect. Steals the lowest-priority active voice (the
    /// highest voice number), or the last voice when all are silent.
    pub fn play_sfx(&mut self, score: &str, instrument: usize) -> Result<(), String> {
        let mut tempo = self.tempo;
        let mut track = parse_track(score, &mut tempo)?;
        track.instrument = instrument % INSTRUMENTS.len();
        let voice = (0..VOICES).rev().find(|&v| self.tracks[v].active).unwrap_or(VOICES - 1);
        debug!("music: sfx steals voice {}", voice);
        self.sfx = Some(Sfx {
            voice,
            events: track.events,
            index: 0,
            frames_left: 0,
            instrument: track.instrument,
        });
        Ok(())
    }

    pub fn voice_note(&self, voice: usize) -> u8 {
        if self.tracks[voice].active {
            self.tracks[voice].note
        } else {
            0
        }
    }

    pub fn flags(&self) -> u8 {
        self.playing as u8 | (self.sfx.is_some() as u8) << 1
    }

    /// Advance one video frame and write the register deltas into the
    /// owning chips.
    pub fn tick(&mut self, bank: &mut SidBank) {
        if self.playing || self.sfx.is_some() {
            // the engine owns the master volume while anything plays
            for chip in &mut bank.chips {
                if chip.mode_vol & 0x0f == 0 {
                    chip.mode_vol |= 0x0f;
                }
            }
        }
        if self.playing {
            let looping = self.looping;
            let mut all_done = true;
            for voice in 0..VOICES {
                let stolen = self.sfx.as_ref().map(|s| s.voice) == Some(voice);
                let track = &mut self.tracks[voice];
                if track.events.is_empty() {
                    continue;
                }
                if step_track(track, looping) {
                    all_done = false;
                }
                if !stolen {
                    write_voice(bank, voice, track);
                }
            }
            if all_done && !looping {
                self.playing = false;
            }
        }
        if let Some(mut sfx) = self.sfx.take() {
            if step_sfx(&mut sfx, bank) {
                self.sfx = Some(sfx);
            } else {
                // hand the voice back to the interrupted track
                let voice = sfx.voice;
                let track = &mut self.tracks[voice];
                if track.active {
                    track.pitch = track.note as f32;
                    write_voice(bank, voice, track);
                } else {
                    voice_regs(bank, voice).1.set_gate_off();
                }
            }
        }
    }
}

// Convenience over the two chips: (chip, voice handle) for a voice number.
struct VoiceHandle<'a> {
    chip: &'a mut crate::sid::SidChip,
    voice: usize,
}

impl<'a> VoiceHandle<'a> {
    fn base(&self) -> u16 {
        self.voice as u16 * 7
    }

    fn set_freq(&mut self, value: u16) {
        self.chip.write(self.base(), value as u8);
        self.chip.write(self.base() + 1, (value >> 8) as u8);
    }

    fn set_pw(&mut self, value: u16) {
        self.chip.write(self.base() + 2, value as u8);
        self.chip.write(self.base() + 3, (value >> 8) as u8);
    }

    fn set_control(&mut self, value: u8) {
        self.chip.write(self.base() + 4, value);
    }

    fn set_adsr(&mut self, ad: u8, sr: u8) {
        self.chip.write(self.base() + 5, ad);
        self.chip.write(self.base() + 6, sr);
    }

    fn set_gate_off(&mut self) {
        let control = self.chip.voices[self.voice].control;
        self.set_control(control & !CTRL_GATE);
    }
}

fn voice_regs(bank: &mut SidBank, voice: usize) -> (usize, VoiceHandle<'_>) {
    let chip = voice / 3;
    (chip, VoiceHandle { chip: &mut bank.chips[chip], voice: voice % 3 })
}

/// MIDI note to SID frequency register.
pub fn note_to_freq(note: f32) -> u16 {
    let hz = 440.0 * ((note - 69.0) / 12.0).exp2();
    let reg = hz * 16_777_216.0 / 985_248.0;
    reg.min(65_535.0) as u16
}

/// Advance a music track one frame; true while it still has work.
fn step_track(track: &mut Track, looping: bool) -> bool {
    if track.frames_left == 0 {
        if track.index >= track.events.len() {
            if looping && !track.events.is_empty() {
                track.index = 0;
            } else {
                track.active = false;
                return false;
            }
        }
        let event = track.events[track.index];
        track.index += 1;
        track.frames_left = event.frames;
        match event.note {
            Some(note) => {
                track.target = note as f32;
                if !event.tie && !track.mods.portamento {
                    track.pitch = note as f32;
                }
                track.note = note;
                track.active = true;
                track.vib_phase = 0.0;
                if !event.tie {
                    track.sweep_phase = 0.0;
                }
            }
            None => track.active = false,
        }
    }
    track.frames_left = track.frames_left.saturating_sub(1);
    true
}

/// Apply the per-frame modulators and push the voice state into the chip.
fn write_voice(bank: &mut SidBank, voice: usize, track: &mut Track) {
    if !track.active {
        let (_, mut handle) = voice_regs(bank, voice);
        handle.set_gate_off();
        return;
    }
    let instrument = INSTRUMENTS[track.instrument];
    if track.mods.portamento {
        let delta = track.target - track.pitch;
        track.pitch += delta.clamp(-0.5, 0.5);
    } else {
        track.pitch = track.target;
    }
    let mut pitch = track.pitch;
    if track.mods.arpeggio {
        pitch += [0.0, 4.0, 7.0][(track.sweep_phase as usize) % 3];
    }
    if track.mods.vibrato {
        track.vib_phase += 0.35;
        pitch += track.vib_phase.sin() * 0.25;
    }
    track.sweep_phase += 1.0;
    let mut pw = instrument.pw;
    if track.mods.pw_sweep {
        let sweep = (track.sweep_phase * 0.05).sin() * 0x300 as f32;
        pw = (pw as i32 + sweep as i32).clamp(0x100, 0xe00) as u16;
    }
    if track.mods.filter_sweep {
        let chip = &mut bank.chips[voice / 3];
        let fc = 0x0400 + ((track.sweep_phase * 0.04).sin() * 0x300 as f32) as i32;
        chip.write(0x15, fc as u8 & 0x07);
        chip.write(0x16, (fc >> 3) as u8);
    }
    // voice volume rides on the sustain nibble
    let sustain = (instrument.sr >> 4) * track.volume / 15;
    let sr = instrument.sr & 0x0f | sustain << 4;
    let (_, mut handle) = voice_regs(bank, voice);
    handle.set_freq(note_to_freq(pitch));
    handle.set_pw(pw);
    handle.set_adsr(instrument.ad, sr);
    handle.set_control(instrument.waveform | CTRL_GATE);
}

/// Advance the effect; false when it has played out.
fn step_sfx(sfx: &mut Sfx, bank: &mut SidBank) -> bool {
    if sfx.frames_left == 0 {
        if sfx.index >= sfx.events.len() {
            return false;
        }
        let event = sfx.events[sfx.index];
        sfx.index += 1;
        sfx.frames_left = event.frames;
        let instrument = INSTRUMENTS[sfx.instrument];
        let (_, mut handle) = voice_regs(bank, sfx.voice);
        match event.note {
            Some(note) => {
                handle.set_freq(note_to_freq(note as f32));
                handle.set_pw(instrument.pw);
                handle.set_adsr(instrument.ad, instrument.sr);
                handle.set_control(instrument.waveform | CTRL_GATE);
            }
            None => handle.set_gate_off(),
        }
    }
    sfx.frames_left = sfx.frames_left.saturating_sub(1);
    true
}

/// One MML voice: notes `a`–`g` with `#`/`+`/`-`, `r` rests, `o0`–`o7`,
/// `<`/`>` octave steps, `l` default length, `t` tempo, `@` instrument,
/// `v` volume, `&` tie, `.` dotted lengths, and the modulator switches
/// `x` (arpeggio), `~` (vibrato), `/` (portamento), `p` (pulse sweep),
/// `w` (filter sweep).
fn parse_track(text: &str, tempo: &mut u16) -> Result<Track, String> {
    let mut track = Track { volume: 15, ..Track::default() };
    let mut octave: i32 = 4;
    let mut default_len = 4u32;
    let mut tie_pending = false;
    let bytes: Vec<char> = text.chars().collect();
    let mut pos = 0;

    fn number(pos: &mut usize, bytes: &[char]) -> Option<u32> {
        let start = *pos;
        while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
            *pos += 1;
        }
        if start == *pos {
            None
        } else {
            bytes[start..*pos].iter().collect::<String>().parse().ok()
        }
    }

    while pos < bytes.len() {
        let ch = bytes[pos].to_ascii_lowercase();
        pos += 1;
        match ch {
            ' ' | '\t' | '\n' | '\r' => {}
            'c' | 'd' | 'e' | 'f' | 'g' | 'a' | 'b' | 'r' => {
                let semitone = match ch {
                    'c' => 0,
                    'd' => 2,
                    'e' => 4,
                    'f' => 5,
                    'g' => 7,
                    'a' => 9,
                    'b' => 11,
                    _ => 0,
                };
                let mut accidental = 0i32;
                while pos < bytes.len() {
                    match bytes[pos] {
                        '#' | '+' => {
                            accidental += 1;
                            pos += 1;
                        }
                        '-' => {
                            accidental -= 1;
                            pos += 1;
                        }
                        _ => break,
                    }
                }
                let len = number(&mut pos, &bytes).unwrap_or(default_len).max(1);
                let mut frames = length_frames(len, *tempo);
                while pos < bytes.len() && bytes[pos] == '.' {
                    frames += frames / 2;
                    pos += 1;
                }
                let note = if ch == 'r' {
                    None
                } else {
                    let midi = (octave + 1) * 12 + semitone + accidental;
                    Some(midi.clamp(0, 127) as u8)
                };
                track.events.push(NoteEvent { note, frames: frames.max(1), tie: tie_pending });
                tie_pending = false;
            }
            'o' => octave = number(&mut pos, &bytes).unwrap_or(4).min(7) as i32,
            '<' => octave = (octave - 1).max(0),
            '>' => octave = (octave + 1).min(7),
            'l' => default_len = number(&mut pos, &bytes).unwrap_or(4).clamp(1, 32),
            't' => {
                *tempo = number(&mut pos, &bytes).unwrap_or(120).clamp(32, 255) as u16;
            }
            '@' => {
                track.instrument =
                    number(&mut pos, &bytes).unwrap_or(0) as usize % INSTRUMENTS.len();
            }
            'v' => track.volume = number(&mut pos, &bytes).unwrap_or(15).min(15) as u8,
            '&' => tie_pending = true,
            'x' => track.mods.arpeggio = !track.mods.arpeggio,
            '~' => track.mods.vibrato = !track.mods.vibrato,
            '/' => track.mods.portamento = !track.mods.portamento,
            'p' => track.mods.pw_sweep = !track.mods.pw_sweep,
            'w' => track.mods.filter_sweep = !track.mods.filter_sweep,
            other => return Err(format!("mml: unexpected '{}'", other)),
        }
    }
    Ok(track)
}

fn length_frames(len: u32, tempo: u16) -> u32 {
    // a whole note is four beats
    let beats = 4.0 / len as f32;
    (beats * 60.0 / tempo as f32 * FRAME_RATE) as u32
}

/// Register window: readback of the per-voice notes and playing flags,
/// plus the command port driving the engine from BASIC.
pub struct MusicCtl {
    pub music: MusicPtr,
    ptr: u16,
    param: u8,
    param2: u8,
}

impl MusicCtl {
    pub fn new(music: MusicPtr) -> Box<Self> {
        Box::new(MusicCtl { music, ptr: 0, param: 0, param2: 0 })
    }

    fn read_string(&self, ram: &[u8]) -> String {
        let start = self.ptr as usize;
        let end = ram[start..]
            .iter()
            .take(MML_MAX)
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(start);
        String::from_utf8_lossy(&ram[start..end]).into_owned()
    }

    fn execute(&mut self, cmd: u8, ram: &mut [u8]) {
        let mut music = self.music.lock().unwrap();
        match cmd {
            CMD_PLAY => {
                let score = self.read_string(ram);
                if let Err(e) = music.play(&score) {
                    warn!("music: {}", e);
                    music.stop();
                }
            }
            CMD_STOP => music.stop(),
            CMD_SFX => {
                let score = self.read_string(ram);
                if let Err(e) = music.play_sfx(&score, self.param as usize) {
                    warn!("music: {}", e);
                }
            }
            CMD_TEMPO => {
                music.tempo = u16::from_le_bytes([self.param, self.param2]).clamp(32, 300);
            }
            CMD_LOOP => music.looping = self.param != 0,
            other => warn!("music: unknown command {}", other),
        }
    }
}

impl Device for MusicCtl {
    fn memconfig(&self) -> MemoryRange {
        vec![(MUSIC_BASE, MUSIC_BASE + 0x0f)]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        let offset = address - MUSIC_BASE;
        let music = self.music.lock().unwrap();
        match offset {
            o if o < REG_FLAGS => music.voice_note(o as usize),
            REG_FLAGS => music.flags(),
            REG_PTR_LO => self.ptr as u8,
            REG_PTR_HI => (self.ptr >> 8) as u8,
            REG_PARAM => self.param,
            REG_PARAM2 => self.param2,
            _ => 0,
        }
    }

    fn write(&mut self, address: u16, value: u8, ram: &mut [u8]) {
        let offset = address - MUSIC_BASE;
        match offset {
            REG_CMD => self.execute(value, ram),
            REG_PTR_LO => self.ptr = self.ptr & 0xff00 | value as u16,
            REG_PTR_HI => self.ptr = self.ptr & 0x00ff | (value as u16) << 8,
            REG_PARAM => self.param = value,
            REG_PARAM2 => self.param2 = value,
            _ => {}
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.music.lock().unwrap().stop();
        self.ptr = 0;
        self.param = 0;
        self.param2 = 0;
    }
}
