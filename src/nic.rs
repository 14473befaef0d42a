// Network Interface Controller: four independent TCP slots with
// length-prefixed message framing. The CPU drives the register file; a
// dedicated I/O thread owns the socket traffic and touches only the
// lock-guarded slot state. One Send is exactly one Recv on the peer.

use crate::devices::{
    Device, Interrupt, ERR_BAD_ARGS, ERR_NETWORK, ERR_NONE, ERR_RANGE, ST_ERROR, ST_OK,
};
use crate::memory::MemoryRange;
use log::{debug, warn};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const NIC_BASE: u16 = 0xa100;
pub const SLOT_COUNT: usize = 4;
pub const QUEUE_CAP: usize = 16;

const SLOT_FILE: u16 = 8;
const SLOT_STRIDE: u16 = 14;

// Global registers.
const REG_STATUS: u16 = 0;
const REG_IRQ_EN: u16 = 1;
const REG_IRQ_LATCH: u16 = 2; // consume-on-read

// Per-slot register offsets.
const SL_CMD: u16 = 0;
const SL_STATUS: u16 = 1;
const SL_ERR: u16 = 2;
const SL_PORT_LO: u16 = 3;
const SL_PORT_HI: u16 = 4;
const SL_DMA_LO: u16 = 5;
const SL_DMA_HI: u16 = 6;
const SL_LEN: u16 = 7; // 0 means 256
const SL_RXLEN: u16 = 8; // consume-on-read
const SL_QCOUNT: u16 = 9;

pub const CMD_CONNECT: u8 = 1;
pub const CMD_DISCONNECT: u8 = 2;
pub const CMD_LISTEN: u8 = 3;
pub const CMD_ACCEPT: u8 = 4;
pub const CMD_SEND: u8 = 5;
pub const CMD_RECV: u8 = 6;

// Slot status bits.
pub const STAT_CONNECTED: u8 = 0x01;
pub const STAT_DATA_READY: u8 = 0x02;
pub const STAT_SEND_READY: u8 = 0x04;
pub const STAT_ERROR: u8 = 0x08;
pub const STAT_REMOTE_CLOSED: u8 = 0x10;
pub const STAT_LISTENING: u8 = 0x20;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Role {
    Idle,
    Client,
    Listening,
    ServerConnected,
}

pub type NicPtr = Arc<Mutex<NicShared>>;

#[derive(Default)]
pub struct Slot {
    pub role: Option<Role>,
    stream: Option<TcpStream>,
    listener: Option<TcpListener>,
    pending: Option<TcpStream>,
    rx: VecDeque<Vec<u8>>,
    rx_need: Option<usize>,
    rx_buf: Vec<u8>,
    tx: VecDeque<Vec<u8>>,
    tx_sent: usize,
    pub last_rx_len: u8,
    pub error: bool,
    pub remote_closed: bool,
}

impl Slot {
    fn role(&self) -> Role {
        self.role.unwrap_or(Role::Idle)
    }

    fn close(&mut self) {
        *self = Slot::default();
    }

    pub fn status(&self) -> u8 {
        let mut bits = 0;
        let connected = matches!(self.role(), Role::Client | Role::ServerConnected)
            && self.stream.is_some();
        if connected {
            bits |= STAT_CONNECTED;
        }
        // data-ready doubles as "connection waiting" on a listening slot
        if !self.rx.is_empty() || self.pending.is_some() {
            bits |= STAT_DATA_READY;
        }
        if connected && self.tx.len() < QUEUE_CAP {
            bits |= STAT_SEND_READY;
        }
        if self.error {
            bits |= STAT_ERROR;
        }
        if self.remote_closed {
            bits |= STAT_REMOTE_CLOSED;
        }
        if self.role() == Role::Listening {
            bits |= STAT_LISTENING;
        }
        bits
    }

    /// Queue one framed message for the I/O thread. Payload must be
    /// 1..=256 bytes; a 256-byte message travels with length byte zero.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), u8> {
        if payload.is_empty() || payload.len() > 256 {
            return Err(ERR_BAD_ARGS);
        }
        if self.stream.is_none() {
            return Err(ERR_NETWORK);
        }
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        self.tx.push_back(frame);
        Ok(())
    }

    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.pop_front()
    }
}

#[derive(Default)]
pub struct NicShared {
    pub slots: [Slot; SLOT_COUNT],
    pub irq_enable: u8,
    pub irq_latch: u8,
}

impl NicShared {
    pub fn new() -> Self {
        NicShared::default()
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.close();
        }
        self.irq_enable = 0;
        self.irq_latch = 0;
    }

    pub fn any_data(&self) -> bool {
        self.slots.iter().any(|s| s.status() & STAT_DATA_READY != 0)
    }

    pub fn any_error(&self) -> bool {
        self.slots.iter().any(|s| s.error)
    }
}

/// Socket service pass: accept pending connections, flush queued frames,
/// reassemble inbound frames. Called in a loop by the I/O thread; also
/// callable directly from tests.
pub fn service(shared: &mut NicShared) {
    let NicShared { ref mut slots, ref mut irq_latch, .. } = *shared;
    for (index, slot) in slots.iter_mut().enumerate() {
        if let Some(listener) = &slot.listener {
            if slot.pending.is_none() {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        debug!("nic: slot {} pending connection from {}", index, peer);
                        if stream.set_nonblocking(true).is_ok() {
                            slot.pending = Some(stream);
                            *irq_latch |= 1 << index;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!("nic: slot {} accept failed: {}", index, e);
                        slot.error = true;
                    }
                }
            }
        }
        let mut drop_stream = false;
        if let Some(stream) = &mut slot.stream {
            // drain the outbound queue as far as the socket allows
            while let Some(front) = slot.tx.front() {
                match stream.write(&front[slot.tx_sent..]) {
                    Ok(n) => {
                        slot.tx_sent += n;
                        if slot.tx_sent == front.len() {
                            slot.tx.pop_front();
                            slot.tx_sent = 0;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("nic: slot {} send failed: {}", index, e);
                        slot.error = true;
                        drop_stream = true;
                        break;
                    }
                }
            }
            // reassemble frames while the queue has room; a full queue
            // stalls transport ingress until the CPU drains it
            'read: while slot.rx.len() < QUEUE_CAP && !drop_stream {
                let need = match slot.rx_need {
                    Some(need) => need,
                    None => {
                        let mut len = [0u8; 1];
                        match stream.read(&mut len) {
                            Ok(0) => {
                                slot.remote_closed = true;
                                drop_stream = true;
                                break 'read;
                            }
                            Ok(_) => {
                                // a zero length byte carries the 256-byte frame
                                let need = if len[0] == 0 { 256 } else { len[0] as usize };
                                slot.rx_need = Some(need);
                                need
                            }
                            Err(ref e) if e.kind() == ErrorKind::WouldBlock => break 'read,
                            Err(e) => {
                                warn!("nic: slot {} recv failed: {}", index, e);
                                slot.error = true;
                                drop_stream = true;
                                break 'read;
                            }
                        }
                    }
                };
                let done = slot.rx_buf.len();
                let mut chunk = vec![0u8; need - done];
                match stream.read(&mut chunk) {
                    Ok(0) => {
                        slot.remote_closed = true;
                        drop_stream = true;
                    }
                    Ok(n) => {
                        slot.rx_buf.extend_from_slice(&chunk[..n]);
                        if slot.rx_buf.len() == need {
                            let frame = std::mem::take(&mut slot.rx_buf);
                            slot.rx.push_back(frame);
                            slot.rx_need = None;
                            *irq_latch |= 1 << index;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break 'read,
                    Err(e) => {
                        warn!("nic: slot {} recv failed: {}", index, e);
                        slot.error = true;
                        drop_stream = true;
                    }
                }
            }
        }
        if drop_stream {
            slot.stream = None;
        }
    }
}

/// Spawn the socket service thread. It parks briefly between passes and
/// runs for the lifetime of the process.
pub fn spawn_io_thread(shared: NicPtr) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("nic-io".into())
        .spawn(move || loop {
            {
                let mut shared = shared.lock().unwrap();
                service(&mut shared);
            }
            thread::sleep(Duration::from_millis(2));
        })
        .expect("spawning the NIC I/O thread")
}

pub struct Nic {
    pub shared: NicPtr,
    regs: [[u8; SLOT_STRIDE as usize]; SLOT_COUNT],
}

impl Nic {
    pub fn new(shared: NicPtr) -> Box<Self> {
        Box::new(Nic { shared, regs: [[0; SLOT_STRIDE as usize]; SLOT_COUNT] })
    }

    fn reg(&self, slot: usize, offset: u16) -> u8 {
        self.regs[slot][offset as usize]
    }

    fn dma(&self, slot: usize) -> usize {
        u16::from_le_bytes([self.reg(slot, SL_DMA_LO), self.reg(slot, SL_DMA_HI)]) as usize
    }

    fn port(&self, slot: usize) -> u16 {
        u16::from_le_bytes([self.reg(slot, SL_PORT_LO), self.reg(slot, SL_PORT_HI)])
    }

    fn len(&self, slot: usize) -> usize {
        match self.reg(slot, SL_LEN) {
            0 => 256,
            n => n as usize,
        }
    }

    fn finish(&mut self, slot: usize, result: Result<(), u8>) {
        match result {
            Ok(()) => {
                self.regs[slot][SL_CMD as usize] = ST_OK;
                self.regs[slot][SL_ERR as usize] = ERR_NONE;
            }
            Err(code) => {
                self.regs[slot][SL_CMD as usize] = ST_ERROR;
                self.regs[slot][SL_ERR as usize] = code;
            }
        }
    }

    fn execute(&mut self, slot: usize, cmd: u8, ram: &mut [u8]) {
        let result = match cmd {
            CMD_CONNECT => self.connect(slot, ram),
            CMD_DISCONNECT => {
                self.shared.lock().unwrap().slots[slot].close();
                Ok(())
            }
            CMD_LISTEN => self.listen(slot),
            CMD_ACCEPT => {
                let mut shared = self.shared.lock().unwrap();
                let s = &mut shared.slots[slot];
                match s.pending.take() {
                    Some(stream) => {
                        s.stream = Some(stream);
                        s.role = Some(Role::ServerConnected);
                        Ok(())
                    }
                    None => Err(ERR_NOT_READY),
                }
            }
            CMD_SEND => {
                let (dma, len) = (self.dma(slot), self.len(slot));
                if dma + len > ram.len() {
                    Err(ERR_RANGE)
                } else {
                    let payload = ram[dma..dma + len].to_vec();
                    self.shared.lock().unwrap().slots[slot].send(&payload)
                }
            }
            CMD_RECV => {
                let dma = self.dma(slot);
                let mut shared = self.shared.lock().unwrap();
                match shared.slots[slot].recv() {
                    Some(frame) => {
                        if dma + frame.len() > ram.len() {
                            Err(ERR_RANGE)
                        } else {
                            ram[dma..dma + frame.len()].copy_from_slice(&frame);
                            shared.slots[slot].last_rx_len = frame.len() as u8;
                            Ok(())
                        }
                    }
                    None => Err(ERR_NOT_READY),
                }
            }
            _ => Err(ERR_BAD_ARGS),
        };
        self.finish(slot, result);
    }

    /// Outbound connect. The hostname is a NUL-terminated ASCII string in
    /// CPU RAM at the slot's DMA pointer; the handshake blocks for at most
    /// three seconds, after which the slot is fully non-blocking.
    fn connect(&mut self, slot: usize, ram: &[u8]) -> Result<(), u8> {
        let dma = self.dma(slot);
        let end = ram[dma..].iter().position(|&b| b == 0).map(|p| dma + p).unwrap_or(ram.len());
        let host = std::str::from_utf8(&ram[dma..end]).map_err(|_| ERR_BAD_ARGS)?;
        let port = self.port(slot);
        let target = format!("{}:{}", host.trim(), port);
        debug!("nic: slot {} connecting to {}", slot, target);
        let addr = target
            .to_socket_addrs()
            .map_err(|_| ERR_NETWORK)?
            .next()
            .ok_or(ERR_NETWORK)?;
        let stream =
            TcpStream::connect_timeout(&addr, Duration::from_secs(3)).map_err(|e| {
                warn!("nic: slot {} connect to {} failed: {}", slot, target, e);
                ERR_NETWORK
            })?;
        stream.set_nonblocking(true).map_err(|_| ERR_NETWORK)?;
        let mut shared = self.shared.lock().unwrap();
        let s = &mut shared.slots[slot];
        s.close();
        s.stream = Some(stream);
        s.role = Some(Role::Client);
        Ok(())
    }

    fn listen(&mut self, slot: usize) -> Result<(), u8> {
        let port = self.port(slot);
        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(|e| {
            warn!("nic: slot {} listen on {} failed: {}", slot, port, e);
            ERR_NETWORK
        })?;
        listener.set_nonblocking(true).map_err(|_| ERR_NETWORK)?;
        debug!("nic: slot {} listening on {}", slot, port);
        let mut shared = self.shared.lock().unwrap();
        let s = &mut shared.slots[slot];
        s.close();
        s.listener = Some(listener);
        s.role = Some(Role::Listening);
        Ok(())
    }
}

// "accept with nothing pending" and "recv with an empty queue" both report
// through the network error code.
const ERR_NOT_READY: u8 = ERR_NETWORK;

impl Device for Nic {
    fn memconfig(&self) -> MemoryRange {
        vec![(NIC_BASE, NIC_BASE + 0x3f)]
    }

    fn read(&mut self, address: u16, _ram: &mut [u8]) -> u8 {
        let offset = address - NIC_BASE;
        if offset < SLOT_FILE {
            let mut shared = self.shared.lock().unwrap();
            return match offset {
                REG_STATUS => {
                    let mut bits = 0x01; // controller ready
                    if shared.any_data() {
                        bits |= 0x02;
                    }
                    if shared.any_error() {
                        bits |= 0x04;
                    }
                    bits
                }
                REG_IRQ_EN => shared.irq_enable,
                REG_IRQ_LATCH => {
                    let latch = shared.irq_latch;
                    shared.irq_latch = 0;
                    latch
                }
                _ => 0,
            };
        }
        let slot = ((offset - SLOT_FILE) / SLOT_STRIDE) as usize;
        let field = (offset - SLOT_FILE) % SLOT_STRIDE;
        if slot >= SLOT_COUNT {
            return 0;
        }
        match field {
            SL_STATUS => self.shared.lock().unwrap().slots[slot].status(),
            SL_RXLEN => {
                let mut shared = self.shared.lock().unwrap();
                let len = shared.slots[slot].last_rx_len;
                shared.slots[slot].last_rx_len = 0;
                len
            }
            SL_QCOUNT => self.shared.lock().unwrap().slots[slot].rx.len() as u8,
            SL_CMD => self.regs[slot][SL_CMD as usize], // command status
            _ => self.regs[slot][field as usize],
        }
    }

    fn write(&mut self, address: u16, value: u8, ram: &mut [u8]) {
        let offset = address - NIC_BASE;
        if offset < SLOT_FILE {
            if offset == REG_IRQ_EN {
                self.shared.lock().unwrap().irq_enable = value;
            }
            return;
        }
        let slot = ((offset - SLOT_FILE) / SLOT_STRIDE) as usize;
        let field = (offset - SLOT_FILE) % SLOT_STRIDE;
        if slot >= SLOT_COUNT {
            return;
        }
        match field {
            SL_CMD => self.execute(slot, value, ram),
            SL_STATUS | SL_ERR | SL_RXLEN | SL_QCOUNT => {}
            _ => self.regs[slot][field as usize] = value,
        }
    }

    fn interrupt_request(&mut self) -> Option<Interrupt> {
        let shared = self.shared.lock().unwrap();
        if shared.irq_latch & shared.irq_enable != 0 {
            Some(Interrupt::Irq)
        } else {
            None
        }
    }

    fn reset(&mut self, _ram: &mut [u8]) {
        self.shared.lock().unwrap().reset();
        self.regs = [[0; SLOT_STRIDE as usize]; SLOT_COUNT];
    }
}
