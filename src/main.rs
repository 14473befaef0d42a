use anyhow::{Context, Result};
use log::info;
use retro65::machine::Configuration;
use retro65::opcodes::Variant;
use retro65::Emulator;
use std::env;
use std::fs;

const DEFAULT_IPC_PORT: u16 = 6510;

// Environment:
//   RETRO65_FREQ       target CPU frequency in Hz (default 12000000)
//   RETRO65_TURBO      1 bypasses real-time pacing
//   RETRO65_TELEMETRY  1 logs effective clock speed once a second
//   RETRO65_IPC_PORT   TCP port of the control server (0 disables)
//
// Usage: retro65 <basic.rom> [program.prg] [--nmos] [--debug] [--no-ipc]

fn main() -> Result<()> {
    env_logger::init();

    let mut rom_path = None;
    let mut program = None;
    let mut variant = Variant::Cmos;
    let mut debug = false;
    let mut ipc = true;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--nmos" => variant = Variant::Nmos,
            "--debug" => debug = true,
            "--no-ipc" => ipc = false,
            _ if rom_path.is_none() => rom_path = Some(arg),
            _ => program = Some(arg),
        }
    }
    let rom_path = rom_path.context("usage: retro65 <basic.rom> [program.prg]")?;
    let rom = fs::read(&rom_path).with_context(|| format!("reading ROM {}", rom_path))?;
    info!("rom: {} bytes from {}", rom.len(), rom_path);

    let mut config = Configuration::new(rom);
    config.variant = variant;
    if let Ok(freq) = env::var("RETRO65_FREQ") {
        config.freq = freq.parse().context("RETRO65_FREQ must be a number")?;
    }
    config.turbo = env::var("RETRO65_TURBO").map(|v| v == "1").unwrap_or(false);
    config.telemetry = env::var("RETRO65_TELEMETRY").map(|v| v == "1").unwrap_or(false);
    let port = match env::var("RETRO65_IPC_PORT") {
        Ok(port) => port.parse().context("RETRO65_IPC_PORT must be a port")?,
        Err(_) => DEFAULT_IPC_PORT,
    };

    let mut emulator = Emulator::new(config);
    if ipc && port != 0 {
        emulator.ipc_port = Some(port);
    }
    emulator.run(program.as_deref(), debug)
}
