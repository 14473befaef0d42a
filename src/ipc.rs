// Line-delimited JSON control server. External tooling drives the machine
// over TCP: typed text and keys land directly in the VGC character-in
// queue, screen and sprite reads snapshot the shared state, and anything
// touching the bus or the CPU crosses into the CPU thread over a request
// channel serviced between scheduler batches.

use crate::machine::READY_FLAG;
use crate::vgc::{VgcPtr, SCREEN_W, TEXT_COLS, TEXT_ROWS};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::thread;
use std::time::{Duration, Instant};

const WAIT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Work that must run on the CPU thread.
pub enum Request {
    Peek(u16),
    Poke(u16, u8),
    ColdStart,
    WarmStart,
    SaveProgram { name: String, src: u16, end: u16 },
    LoadProgram { name: String, dest: u16 },
}

pub type Reply = Result<u8, String>;
pub type RequestSender = Sender<(Request, Sender<Reply>)>;

#[derive(Clone)]
pub struct IpcContext {
    pub vgc: VgcPtr,
    pub requests: RequestSender,
    pub storage_dir: PathBuf,
}

impl IpcContext {
    /// Round-trip a request to the CPU thread.
    fn call(&self, request: Request) -> Reply {
        let (tx, rx) = channel();
        self.requests
            .send((request, tx))
            .map_err(|_| "cpu thread gone".to_string())?;
        rx.recv_timeout(Duration::from_secs(10)).map_err(|_| "cpu timeout".to_string())?
    }
}

pub fn serve(port: u16, ctx: IpcContext) -> std::io::Result<thread::JoinHandle<()>> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    info!("ipc: listening on 127.0.0.1:{}", port);
    thread::Builder::new().name("ipc".into()).spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let ctx = ctx.clone();
                    let _ = thread::Builder::new()
                        .name("ipc-conn".into())
                        .spawn(move || handle_connection(stream, ctx));
                }
                Err(e) => {
                    warn!("ipc: accept failed: {}", e);
                    break;
                }
            }
        }
    })
}

fn handle_connection(stream: TcpStream, ctx: IpcContext) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
    debug!("ipc: connection from {}", peer);
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => handle_request(&request, &ctx),
            Err(e) => json!({ "ok": false, "error": format!("bad json: {}", e) }),
        };
        let mut out = response.to_string();
        out.push('\n');
        if writer.write_all(out.as_bytes()).is_err() {
            break;
        }
    }
    debug!("ipc: {} disconnected", peer);
}

fn fail(message: impl Into<String>) -> Value {
    json!({ "ok": false, "error": message.into() })
}

fn handle_request(request: &Value, ctx: &IpcContext) -> Value {
    let cmd = match request.get("cmd").and_then(Value::as_str) {
        Some(cmd) => cmd,
        None => return fail("missing cmd"),
    };
    match cmd {
        "type_text" => {
            let text = request.get("text").and_then(Value::as_str).unwrap_or("");
            let mut vgc = ctx.vgc.lock().unwrap();
            for byte in text.bytes() {
                vgc.chin.push_back(if byte == b'\n' { 0x0d } else { byte });
            }
            json!({ "ok": true })
        }
        "send_key" => {
            let key = request.get("key").and_then(Value::as_str).unwrap_or("");
            match key_code(key) {
                Some(code) => {
                    ctx.vgc.lock().unwrap().chin.push_back(code);
                    json!({ "ok": true })
                }
                None => fail(format!("unknown key '{}'", key)),
            }
        }
        "read_screen" => {
            let vgc = ctx.vgc.lock().unwrap();
            let lines: Vec<String> = (0..TEXT_ROWS).map(|row| screen_line(&vgc.char_ram, row)).collect();
            json!({ "ok": true, "lines": lines })
        }
        "read_line" => {
            let row = request.get("row").and_then(Value::as_u64).unwrap_or(0) as usize;
            if row >= TEXT_ROWS {
                return fail("row out of range");
            }
            let vgc = ctx.vgc.lock().unwrap();
            json!({ "ok": true, "line": screen_line(&vgc.char_ram, row) })
        }
        "get_cursor" => {
            let vgc = ctx.vgc.lock().unwrap();
            json!({ "ok": true, "x": vgc.regs[crate::vgc::REG_CURSX], "y": vgc.regs[crate::vgc::REG_CURSY] })
        }
        "wait_ready" => {
            let deadline = Instant::now() + WAIT_READY_TIMEOUT;
            loop {
                match ctx.call(Request::Peek(READY_FLAG)) {
                    Ok(flag) if flag != 0 => return json!({ "ok": true }),
                    Ok(_) => {}
                    Err(e) => return fail(e),
                }
                if Instant::now() >= deadline {
                    return fail("timeout waiting for ready");
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        "cold_start" => reply_status(ctx.call(Request::ColdStart)),
        "warm_start" => reply_status(ctx.call(Request::WarmStart)),
        "peek" => {
            let addr = match request.get("addr").and_then(Value::as_u64) {
                Some(a) if a < 0x10000 => a as u16,
                _ => return fail("bad addr"),
            };
            match ctx.call(Request::Peek(addr)) {
                Ok(value) => json!({ "ok": true, "value": value }),
                Err(e) => fail(e),
            }
        }
        "poke" => {
            let addr = match request.get("addr").and_then(Value::as_u64) {
                Some(a) if a < 0x10000 => a as u16,
                _ => return fail("bad addr"),
            };
            let value = request.get("value").and_then(Value::as_u64).unwrap_or(0) as u8;
            reply_status(ctx.call(Request::Poke(addr, value)))
        }
        "read_graphics" => {
            let x = request.get("x").and_then(Value::as_u64).unwrap_or(0) as usize;
            let y = request.get("y").and_then(Value::as_u64).unwrap_or(0) as usize;
            let w = request.get("w").and_then(Value::as_u64).unwrap_or(SCREEN_W as u64) as usize;
            let h = request.get("h").and_then(Value::as_u64).unwrap_or(1) as usize;
            if x + w > SCREEN_W || y + h > crate::vgc::SCREEN_H {
                return fail("rect out of range");
            }
            let vgc = ctx.vgc.lock().unwrap();
            let rows: Vec<Vec<u8>> = (y..y + h)
                .map(|yy| vgc.gfx[yy * SCREEN_W + x..yy * SCREEN_W + x + w].to_vec())
                .collect();
            json!({ "ok": true, "pixels": rows })
        }
        "read_sprites" => {
            let vgc = ctx.vgc.lock().unwrap();
            let sprites: Vec<SpriteInfo> = (0..crate::vgc::SPRITE_COUNT)
                .map(|s| SpriteInfo::from_regs(&vgc.sprite_regs[s * 8..s * 8 + 8]))
                .collect();
            json!({ "ok": true, "sprites": sprites })
        }
        "save_program" => {
            let name = match request.get("name").and_then(Value::as_str) {
                Some(n) => n.to_string(),
                None => return fail("missing name"),
            };
            let src = request.get("src").and_then(Value::as_u64).unwrap_or(0x0280) as u16;
            let end = request.get("end").and_then(Value::as_u64).unwrap_or(0xa000) as u16;
            reply_status(ctx.call(Request::SaveProgram { name, src, end }))
        }
        "load_program" => {
            let name = match request.get("name").and_then(Value::as_str) {
                Some(n) => n.to_string(),
                None => return fail("missing name"),
            };
            let dest = request.get("dest").and_then(Value::as_u64).unwrap_or(0x0280) as u16;
            reply_status(ctx.call(Request::LoadProgram { name, dest }))
        }
        "list_programs" => {
            let entries = match std::fs::read_dir(&ctx.storage_dir) {
                Ok(entries) => entries,
                Err(e) => return fail(format!("reading directory: {}", e)),
            };
            let mut names: Vec<String> = entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| {
                    let l = n.to_lowercase();
                    l.ends_with(".prg") || l.ends_with(".sid")
                })
                .collect();
            names.sort();
            json!({ "ok": true, "programs": names })
        }
        other => fail(format!("unknown cmd '{}'", other)),
    }
}

#[derive(Serialize)]
struct SpriteInfo {
    x: i16,
    y: i16,
    shape: u8,
    enabled: bool,
    xflip: bool,
    yflip: bool,
    priority: u8,
    transparent: u8,
}

impl SpriteInfo {
    fn from_regs(r: &[u8]) -> SpriteInfo {
        SpriteInfo {
            x: i16::from_le_bytes([r[0], r[1]]),
            y: i16::from_le_bytes([r[2], r[3]]),
            shape: r[4],
            enabled: r[5] & 1 != 0,
            xflip: r[5] & 2 != 0,
            yflip: r[5] & 4 != 0,
            priority: r[6],
            transparent: r[7],
        }
    }
}

fn reply_status(reply: Reply) -> Value {
    match reply {
        Ok(_) => json!({ "ok": true }),
        Err(e) => fail(e),
    }
}

fn screen_line(char_ram: &[u8], row: usize) -> String {
    char_ram[row * TEXT_COLS..(row + 1) * TEXT_COLS]
        .iter()
        .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
        .collect()
}

fn key_code(key: &str) -> Option<u8> {
    match key {
        "ENTER" => Some(0x0d),
        "BACKSPACE" => Some(0x08),
        "CTRL-C" => Some(0x03),
        "HOME" => Some(0x0b),
        "CLEAR" => Some(0x0c),
        "LF" => Some(0x0a),
        k if k.len() == 1 && k.is_ascii() => Some(k.as_bytes()[0]),
        _ => None,
    }
}
