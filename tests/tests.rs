// Machine-level tests: CPU programs driving coprocessors through the bus,
// device routing, the interval timer, and the control server.

use retro65::devices::{Device, Interrupt};
use retro65::ipc::{self, IpcContext, Reply, Request};
use retro65::machine::{build_bus, Configuration};
use retro65::memory::MemoryRange;
use retro65::opcodes::Variant;
use retro65::processor::{CPU, RESET_VECTOR};
use retro65::vgc::VgcState;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const CODE: u16 = 0x2000;

fn boot(code: &[u8]) -> (CPU, retro65::SharedState) {
    let mut rom = vec![0u8; 0x4000];
    rom[(RESET_VECTOR - 0xc000) as usize] = CODE as u8;
    rom[(RESET_VECTOR - 0xc000) as usize + 1] = (CODE >> 8) as u8;
    let config = Configuration::new(rom);
    let shared = config.shared.clone();
    let bus = build_bus(&config);
    let mut cpu = CPU::new(Variant::Cmos, bus);
    cpu.reset(None);
    for (j, &byte) in code.iter().enumerate() {
        cpu.write_byte(CODE + j as u16, byte);
    }
    (cpu, shared)
}

fn run(cpu: &mut CPU, instructions: usize) {
    for _ in 0..instructions {
        cpu.clocks_for_next();
        cpu.execute_next();
        cpu.serve_interrupt_requests();
    }
}

#[test]
fn program_prints_through_the_character_port() {
    // LDA #'H'; STA $A00E; LDA #'I'; STA $A00E; JMP *
    let (mut cpu, shared) = boot(&[
        0xa9, 0x48, 0x8d, 0x0e, 0xa0, 0xa9, 0x49, 0x8d, 0x0e, 0xa0, 0x4c, 0x0a, 0x20,
    ]);
    run(&mut cpu, 8);
    let vgc = shared.vgc.lock().unwrap();
    assert_eq!(vgc.char_ram[0], b'H');
    assert_eq!(vgc.char_ram[1], b'I');
    assert_eq!(vgc.regs[3], 2, "cursor advanced");
}

#[test]
fn program_reads_the_character_in_port() {
    // LDA $A00F; STA $40; JMP *
    let (mut cpu, shared) = boot(&[0xad, 0x0f, 0xa0, 0x85, 0x40, 0x4c, 0x05, 0x20]);
    shared.vgc.lock().unwrap().chin.push_back(b'Z');
    run(&mut cpu, 3);
    assert_eq!(cpu.read_byte(0x40), b'Z');
    // the port consumed the byte; a rerun sees an empty queue
    cpu.pc = CODE;
    run(&mut cpu, 3);
    assert_eq!(cpu.read_byte(0x40), 0);
}

#[test]
fn vgc_command_from_machine_code() {
    // draw color 5, plot (3,4): GCOLOR via params at $A011
    let (mut cpu, shared) = boot(&[
        0xa9, 0x05, 0x8d, 0x11, 0xa0, // P0 = 5
        0xa9, 0x01, 0x8d, 0x10, 0xa0, // GCOLOR
        0xa9, 0x03, 0x8d, 0x11, 0xa0, // P0 = 3 (x lo)
        0xa9, 0x00, 0x8d, 0x12, 0xa0, // P1 = 0 (x hi)
        0xa9, 0x04, 0x8d, 0x13, 0xa0, // P2 = 4 (y)
        0xa9, 0x02, 0x8d, 0x10, 0xa0, // PLOT
    ]);
    run(&mut cpu, 12);
    assert_eq!(shared.vgc.lock().unwrap().pixel(3, 4), 5);
}

#[test]
fn rom_region_is_write_protected_but_sid_windows_are_not() {
    let (mut cpu, shared) = boot(&[0xea]);
    cpu.write_byte(0xc100, 0x55);
    assert_eq!(cpu.read_byte(0xc100), 0, "ROM write dropped");
    cpu.write_byte(0xd400, 0x42);
    assert_eq!(shared.sid.lock().unwrap().chips[0].voices[0].freq, 0x42);
}

#[test]
fn timer_fires_and_latch_consumes() {
    let (mut cpu, _) = boot(&[0xea]);
    cpu.write_byte(0xba41, 1); // 1 ms divisor
    cpu.write_byte(0xba42, 0);
    cpu.write_byte(0xba40, 0x03); // run + irq enable
    thread::sleep(Duration::from_millis(10));
    let (irq, nmi) = cpu.bus.borrow_mut().interrupt_requests();
    assert!(irq, "the interval elapsed");
    assert!(!nmi);
    assert_eq!(cpu.read_byte(0xba45), 1);
    assert_eq!(cpu.read_byte(0xba45), 0, "latch consumed");
}

#[test]
fn vgc_raster_irq_line_reaches_the_cpu() {
    let (mut cpu, shared) = boot(&[0xea]);
    cpu.write_byte(0xa01f, 0x80); // raster IRQ enable
    assert_eq!(cpu.read_byte(0xa01f), 0, "the enable register is write-only");
    {
        let mut vgc = shared.vgc.lock().unwrap();
        vgc.raster_line = 0;
        let mut fb = vec![0u32; retro65::vgc::FB_W * retro65::vgc::FB_H];
        retro65::vgc::render_frame(&mut vgc, &mut fb);
        assert!(vgc.raster_pending);
    }
    let (irq, _) = cpu.bus.borrow_mut().interrupt_requests();
    assert!(irq);
    // reading $A00E returns the latch and clears it
    assert_eq!(cpu.read_byte(0xa00e), 1);
    assert_eq!(cpu.read_byte(0xa00e), 0);
}

/// A scratch device that records what the bus routes at it.
struct Probe {
    writes: HashMap<u16, u8>,
}

impl Device for Probe {
    fn memconfig(&self) -> MemoryRange {
        vec![(0x7f00, 0x7f0f)]
    }
    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        self.writes.get(&address).copied().unwrap_or(0)
    }
    fn write(&mut self, address: u16, value: u8, _ram: &mut [u8]) {
        self.writes.insert(address, value);
    }
    fn interrupt_request(&mut self) -> Option<Interrupt> {
        None
    }
}

#[test]
fn attached_devices_shadow_ram() {
    let mut bus = retro65::memory::Bus::new(0xc000);
    bus.attach(Box::new(Probe { writes: HashMap::new() }));
    bus.write(0x7f05, 0x99);
    assert_eq!(bus.read(0x7f05), 0x99);
    assert_eq!(bus.ram[0x7f05], 0, "the underlying byte never changed");
}

#[test]
fn ipc_server_round_trip() {
    let vgc = Arc::new(Mutex::new(VgcState::new()));
    let (tx, rx) = channel::<(Request, std::sync::mpsc::Sender<Reply>)>();
    // a stand-in CPU thread that answers every bus request
    thread::spawn(move || {
        for (request, reply) in rx {
            let answer: Reply = match request {
                Request::Peek(_) => Ok(1),
                _ => Ok(0),
            };
            let _ = reply.send(answer);
        }
    });
    let ctx = IpcContext {
        vgc: vgc.clone(),
        requests: tx,
        storage_dir: std::env::temp_dir(),
    };
    ipc::serve(47395, ctx).unwrap();
    thread::sleep(Duration::from_millis(50));

    let stream = TcpStream::connect(("127.0.0.1", 47395)).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    writer.write_all(b"{\"cmd\":\"type_text\",\"text\":\"AB\\n\"}\n").unwrap();
    reader.read_line(&mut line).unwrap();
    assert!(line.contains("\"ok\":true"), "{}", line);
    assert_eq!(
        vgc.lock().unwrap().chin.iter().copied().collect::<Vec<u8>>(),
        vec![0x41, 0x42, 0x0d]
    );

    line.clear();
    writer.write_all(b"{\"cmd\":\"peek\",\"addr\":512}\n").unwrap();
    reader.read_line(&mut line).unwrap();
    assert!(line.contains("\"value\":1"), "{}", line);

    line.clear();
    writer.write_all(b"{\"cmd\":\"wait_ready\"}\n").unwrap();
    reader.read_line(&mut line).unwrap();
    assert!(line.contains("\"ok\":true"), "{}", line);

    line.clear();
    writer.write_all(b"{\"cmd\":\"read_screen\"}\n").unwrap();
    reader.read_line(&mut line).unwrap();
    assert!(line.contains("\"lines\""), "{}", line);

    line.clear();
    writer.write_all(b"{\"cmd\":\"bogus\"}\n").unwrap();
    reader.read_line(&mut line).unwrap();
    assert!(line.contains("\"ok\":false"), "{}", line);
}

#[test]
fn vgc_system_reset_stops_music_and_network() {
    let (mut cpu, shared) = boot(&[0xea]);
    shared.music.lock().unwrap().play("c1").unwrap();
    shared.vgc.lock().unwrap().regs[1] = 9;
    cpu.write_byte(0xa010, 0xff); // VGC reset command
    assert!(!shared.music.lock().unwrap().playing);
    assert_eq!(shared.vgc.lock().unwrap().regs[1], 0, "registers zeroed");
    // every slot back to idle
    let nic = shared.nic.lock().unwrap();
    assert!(nic.slots.iter().all(|s| s.status() == 0));
}
