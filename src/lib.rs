use anyhow::{Context, Result};
use log::{info, warn};
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub mod clock;
pub mod conversions;
pub mod devices;
pub mod dma;
pub mod fio;
pub mod font;
pub mod instructions;
pub mod ipc;
pub mod machine;
pub mod memory;
pub mod music;
pub mod nic;
pub mod opcodes;
pub mod processor;
pub mod sid;
pub mod vgc;
pub mod xmc;

use clock::Clock;
use ipc::{Reply, Request};
use machine::Configuration;
use processor::{BreakGate, DebugAction, Debugger, CPU};
use sid::SidSource;
use vgc::{FB_H, FB_W};

/// Handles to the coprocessor state cells shared across threads. The CPU
/// thread reaches them through the bus devices; the renderer, audio, I/O
/// and IPC threads each hold their own clone.
#[derive(Clone)]
pub struct SharedState {
    pub vgc: vgc::VgcPtr,
    pub sid: sid::SidPtr,
    pub music: music::MusicPtr,
    pub nic: nic::NicPtr,
    pub xmc: xmc::XmcPtr,
}

impl SharedState {
    pub fn new() -> Self {
        use std::sync::Mutex;
        SharedState {
            vgc: Arc::new(Mutex::new(vgc::VgcState::new())),
            sid: Arc::new(Mutex::new(sid::SidBank::new())),
            music: Arc::new(Mutex::new(music::MusicEngine::new())),
            nic: Arc::new(Mutex::new(nic::NicShared::new())),
            xmc: Arc::new(Mutex::new(xmc::XmcState::new())),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState::new()
    }
}

pub struct Emulator {
    config: Option<Configuration>,
    pub ipc_port: Option<u16>,
    pub gate: Arc<BreakGate>,
}

impl Emulator {
    pub fn new(config: Configuration) -> Emulator {
        Emulator { config: Some(config), ipc_port: None, gate: BreakGate::new() }
    }

    /// Bring the machine up and run until the window closes (or the CPU
    /// thread quits). `program` is an optional .prg image injected into
    /// RAM before the first instruction.
    pub fn run(&mut self, program: Option<&str>, debug: bool) -> Result<()> {
        let config = self.config.take().context("emulator already ran")?;
        let shared = config.shared.clone();
        let telemetry = config.telemetry;
        let storage_dir = config.storage_dir.clone();

        nic::spawn_io_thread(shared.nic.clone());

        // keep the output stream alive for the duration of the run
        let _audio = match rodio::OutputStream::try_default() {
            Ok((stream, handle)) => {
                if let Err(e) = handle.play_raw(SidSource::new(shared.sid.clone())) {
                    warn!("audio: playback failed: {}", e);
                }
                Some(stream)
            }
            Err(e) => {
                warn!("audio: no output device: {}", e);
                None
            }
        };

        let (req_tx, req_rx) = channel();
        if let Some(port) = self.ipc_port {
            let ctx = ipc::IpcContext {
                vgc: shared.vgc.clone(),
                requests: req_tx.clone(),
                storage_dir,
            };
            if let Err(e) = ipc::serve(port, ctx) {
                warn!("ipc: server not started: {}", e);
            }
        }

        let quit = Arc::new(AtomicBool::new(false));
        let gate = self.gate.clone();
        let program = program.map(PathBuf::from);
        let cpu_quit = quit.clone();
        let cpu_thread = thread::Builder::new()
            .name("cpu".into())
            .spawn(move || cpu_main(config, program, req_rx, gate, cpu_quit, debug, telemetry))
            .context("spawning the CPU thread")?;

        self.render_loop(&shared, &quit);

        quit.store(true, Ordering::Relaxed);
        self.gate.resume();
        let _ = cpu_thread.join();
        Ok(())
    }

    /// Renderer: sample the VGC at the frame rate, tick the music engine,
    /// and feed keyboard input into the character-in queue. Falls back to
    /// a windowless pace-keeper when no display is available.
    fn render_loop(&self, shared: &SharedState, quit: &Arc<AtomicBool>) {
        let mut fb = vec![0u32; FB_W * FB_H];
        let frame = Duration::from_micros(20_000);
        let mut window = match Window::new(
            "home65",
            FB_W,
            FB_H,
            WindowOptions::default(),
        ) {
            Ok(mut window) => {
                window.limit_update_rate(Some(frame));
                window.set_input_callback(Box::new(CharInput { vgc: shared.vgc.clone() }));
                Some(window)
            }
            Err(e) => {
                warn!("video: no display ({}), running headless", e);
                None
            }
        };

        loop {
            if quit.load(Ordering::Relaxed) {
                break;
            }
            let started = Instant::now();
            {
                let mut state = shared.vgc.lock().unwrap();
                vgc::render_frame(&mut state, &mut fb);
            }
            {
                let mut engine = shared.music.lock().unwrap();
                let mut bank = shared.sid.lock().unwrap();
                engine.tick(&mut bank);
            }
            match window {
                Some(ref mut window) => {
                    if !window.is_open() {
                        break;
                    }
                    for (key, code) in &[
                        (Key::Enter, 0x0du8),
                        (Key::Backspace, 0x08),
                        (Key::Home, 0x0b),
                        (Key::Up, 0x1e),
                        (Key::Down, 0x1f),
                        (Key::Left, 0x1d),
                        (Key::Right, 0x1c),
                    ] {
                        if window.is_key_pressed(*key, KeyRepeat::Yes) {
                            shared.vgc.lock().unwrap().chin.push_back(*code);
                        }
                    }
                    let ctrl = window.is_key_down(Key::LeftCtrl) || window.is_key_down(Key::RightCtrl);
                    if ctrl && window.is_key_pressed(Key::C, KeyRepeat::No) {
                        shared.vgc.lock().unwrap().chin.push_back(0x03);
                    }
                    if window.update_with_buffer(&fb, FB_W, FB_H).is_err() {
                        break;
                    }
                }
                None => {
                    let elapsed = started.elapsed();
                    if elapsed < frame {
                        thread::sleep(frame - elapsed);
                    }
                }
            }
        }
    }
}

/// Printable keystrokes from the window land straight in the VGC
/// character-in port.
struct CharInput {
    vgc: vgc::VgcPtr,
}

impl minifb::InputCallback for CharInput {
    fn add_char(&mut self, uni_char: u32) {
        if (0x20..0x7f).contains(&uni_char) {
            self.vgc.lock().unwrap().chin.push_back(uni_char as u8);
        }
    }
}

/// The CPU thread: builds the bus and the core, then runs the paced
/// fetch/execute loop, serving control requests and the break gate
/// between instructions.
fn cpu_main(
    config: Configuration,
    program: Option<PathBuf>,
    requests: Receiver<(Request, Sender<Reply>)>,
    gate: Arc<BreakGate>,
    quit: Arc<AtomicBool>,
    debug: bool,
    telemetry: bool,
) {
    let bus = machine::build_bus(&config);
    let mut cpu = CPU::new(config.variant, bus);
    cpu.reset(config.start_address);
    if let Some(path) = program {
        load_program(&mut cpu, &path);
    }
    let mut clock = Clock::new(config.freq, config.turbo);
    let mut debugger = Debugger::new();
    let mut executed: u64 = 0;
    let mut window_start = Instant::now();

    while !quit.load(Ordering::Relaxed) {
        while let Ok((request, reply)) = requests.try_recv() {
            let _ = reply.send(serve_request(&mut cpu, &mut clock, request));
        }
        let budget = clock.budget(20_000);
        if budget == 0 {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        let mut remaining = budget as i64;
        while remaining > 0 && !quit.load(Ordering::Relaxed) {
            gate.checkpoint();
            if debug {
                if let DebugAction::Quit = debugger.update(&mut cpu) {
                    quit.store(true, Ordering::Relaxed);
                    break;
                }
            }
            let cost = cpu.clocks_for_next();
            let extra = cpu.execute_next();
            cpu.serve_interrupt_requests();
            remaining -= (cost + extra) as i64;
            executed += (cost + extra) as u64;
        }
        if telemetry && window_start.elapsed() >= Duration::from_secs(1) {
            let secs = window_start.elapsed().as_secs_f64();
            info!("cpu: {:.3} MHz effective", executed as f64 / secs / 1e6);
            executed = 0;
            window_start = Instant::now();
        }
    }
}

/// Inject a .prg image: two-byte little-endian load address, then the
/// program bytes, written through the bus.
fn load_program(cpu: &mut CPU, path: &PathBuf) {
    match fs::read(path) {
        Ok(image) if image.len() > 2 => {
            let base = u16::from_le_bytes([image[0], image[1]]);
            for (j, &byte) in image[2..].iter().enumerate() {
                cpu.write_byte(base.wrapping_add(j as u16), byte);
            }
            info!("loaded {} bytes at ${:04x} from {:?}", image.len() - 2, base, path);
        }
        Ok(_) => warn!("{:?} is too short to be a program", path),
        Err(e) => warn!("loading {:?} failed: {}", path, e),
    }
}

// FIO register addresses used by the control-channel driver.
const FIO_CMD: u16 = 0xb9a0;
const FIO_STATUS: u16 = 0xb9a1;
const FIO_ERR: u16 = 0xb9a2;
const FIO_SRC: u16 = 0xb9a4;
const FIO_END: u16 = 0xb9a6;
const FIO_NAME: u16 = 0xb9b0;

fn serve_request(cpu: &mut CPU, clock: &mut Clock, request: Request) -> Reply {
    match request {
        Request::Peek(addr) => Ok(cpu.read_byte(addr)),
        Request::Poke(addr, value) => {
            cpu.write_byte(addr, value);
            Ok(0)
        }
        Request::WarmStart => {
            cpu.reset(None);
            clock.reset();
            Ok(0)
        }
        Request::ColdStart => {
            {
                let mut bus = cpu.bus.borrow_mut();
                for address in 0..machine::ROM_BASE as usize {
                    bus.ram[address] = 0;
                }
                bus.reset_devices();
            }
            cpu.reset(None);
            clock.reset();
            Ok(0)
        }
        Request::SaveProgram { name, src, end } => {
            drive_fio(cpu, &name, fio::CMD_SAVE, Some((src, end)))
        }
        Request::LoadProgram { name, dest } => {
            drive_fio(cpu, &name, fio::CMD_LOAD, Some((dest, 0)))
        }
    }
}

/// Drive a FIO command exactly the way a BASIC program would: filename
/// buffer, address registers, command byte, then the status poll.
fn drive_fio(cpu: &mut CPU, name: &str, cmd: u8, addrs: Option<(u16, u16)>) -> Reply {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > fio::NAME_MAX {
        return Err("bad filename".into());
    }
    for j in 0..64u16 {
        let byte = bytes.get(j as usize).copied().unwrap_or(0);
        cpu.write_byte(FIO_NAME + j, byte);
    }
    if let Some((src, end)) = addrs {
        cpu.write_byte(FIO_SRC, src as u8);
        cpu.write_byte(FIO_SRC + 1, (src >> 8) as u8);
        cpu.write_byte(FIO_END, end as u8);
        cpu.write_byte(FIO_END + 1, (end >> 8) as u8);
    }
    cpu.write_byte(FIO_CMD, cmd);
    match cpu.read_byte(FIO_STATUS) {
        devices::ST_OK => Ok(0),
        _ => Err(format!("fio error {}", cpu.read_byte(FIO_ERR))),
    }
}
