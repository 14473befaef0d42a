// Network slots against real loopback sockets. The service pump is driven
// inline so the tests stay deterministic.

use retro65::devices::Device;
use retro65::nic::{
    self, Nic, NicShared, STAT_CONNECTED, STAT_DATA_READY, STAT_LISTENING, STAT_REMOTE_CLOSED,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const BASE: u16 = 0xa100;
const SLOT0: u16 = BASE + 8;
const S_CMD: u16 = SLOT0;
const S_STATUS: u16 = SLOT0 + 1;
const S_PORT: u16 = SLOT0 + 3;
const S_DMA: u16 = SLOT0 + 5;
const S_LEN: u16 = SLOT0 + 7;
const S_RXLEN: u16 = SLOT0 + 8;
const S_QCOUNT: u16 = SLOT0 + 9;

struct Rig {
    shared: Arc<Mutex<NicShared>>,
    dev: Box<Nic>,
    ram: Vec<u8>,
}

impl Rig {
    fn new() -> Rig {
        let shared = Arc::new(Mutex::new(NicShared::new()));
        let dev = Nic::new(shared.clone());
        Rig { shared, dev, ram: vec![0; 0x10000] }
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.dev.write(addr, value, &mut self.ram);
    }

    fn read(&mut self, addr: u16) -> u8 {
        self.dev.read(addr, &mut self.ram)
    }

    fn listen(&mut self, port: u16) {
        self.write(S_PORT, port as u8);
        self.write(S_PORT + 1, (port >> 8) as u8);
        self.write(S_CMD, nic::CMD_LISTEN);
    }

    /// Pump the socket service until the slot status shows `bit`.
    fn pump_until(&mut self, bit: u8) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            nic::service(&mut self.shared.lock().unwrap());
            if self.read(S_STATUS) & bit != 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn pump_while_queued(&mut self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            nic::service(&mut self.shared.lock().unwrap());
            if self.shared.lock().unwrap().slots[0].status() & STAT_DATA_READY != 0 {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

#[test]
fn echo_round_trip_with_framing() {
    let mut rig = Rig::new();
    rig.listen(47391);
    assert!(rig.read(S_STATUS) & STAT_LISTENING != 0);

    let mut peer = TcpStream::connect(("127.0.0.1", 47391)).unwrap();
    assert!(rig.pump_until(STAT_DATA_READY), "pending connection raises data-ready");

    rig.write(S_CMD, nic::CMD_ACCEPT);
    assert!(rig.read(S_STATUS) & STAT_CONNECTED != 0);

    peer.write_all(b"\x05HELLO").unwrap();
    rig.pump_while_queued();
    assert_eq!(rig.read(S_QCOUNT), 1);

    // receive into $3000
    rig.write(S_DMA, 0x00);
    rig.write(S_DMA + 1, 0x30);
    rig.write(S_CMD, nic::CMD_RECV);
    assert_eq!(&rig.ram[0x3000..0x3005], b"HELLO");
    assert_eq!(rig.read(S_RXLEN), 5);
    assert_eq!(rig.read(S_RXLEN), 0, "the length latch consumes on read");

    // echo the same bytes back
    rig.ram[0x3100..0x3105].copy_from_slice(b"HELLO");
    rig.write(S_DMA, 0x00);
    rig.write(S_DMA + 1, 0x31);
    rig.write(S_LEN, 5);
    rig.write(S_CMD, nic::CMD_SEND);
    for _ in 0..50 {
        nic::service(&mut rig.shared.lock().unwrap());
        thread::sleep(Duration::from_millis(2));
    }
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut frame = [0u8; 6];
    peer.read_exact(&mut frame).unwrap();
    assert_eq!(&frame, b"\x05HELLO", "one send is one framed message");
}

#[test]
fn messages_arrive_in_order() {
    let mut rig = Rig::new();
    rig.listen(47392);
    let mut peer = TcpStream::connect(("127.0.0.1", 47392)).unwrap();
    assert!(rig.pump_until(STAT_DATA_READY));
    rig.write(S_CMD, nic::CMD_ACCEPT);

    peer.write_all(b"\x03ONE\x03TWO\x05THREE").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while rig.read(S_QCOUNT) < 3 && Instant::now() < deadline {
        nic::service(&mut rig.shared.lock().unwrap());
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(rig.read(S_QCOUNT), 3);

    let mut received = Vec::new();
    for _ in 0..3 {
        rig.write(S_DMA, 0x00);
        rig.write(S_DMA + 1, 0x30);
        rig.write(S_CMD, nic::CMD_RECV);
        let len = rig.read(S_RXLEN) as usize;
        received.push(rig.ram[0x3000..0x3000 + len].to_vec());
    }
    assert_eq!(received, vec![b"ONE".to_vec(), b"TWO".to_vec(), b"THREE".to_vec()]);
}

#[test]
fn remote_close_sets_the_status_bit() {
    let mut rig = Rig::new();
    rig.listen(47393);
    let peer = TcpStream::connect(("127.0.0.1", 47393)).unwrap();
    assert!(rig.pump_until(STAT_DATA_READY));
    rig.write(S_CMD, nic::CMD_ACCEPT);
    drop(peer);
    assert!(rig.pump_until(STAT_REMOTE_CLOSED));
    assert_eq!(rig.read(S_STATUS) & STAT_CONNECTED, 0, "connected cleared on close");
}

#[test]
fn send_on_idle_slot_reports_a_network_error() {
    let mut rig = Rig::new();
    rig.ram[0x3000] = 0x41;
    rig.write(S_DMA, 0x00);
    rig.write(S_DMA + 1, 0x30);
    rig.write(S_LEN, 1);
    rig.write(S_CMD, nic::CMD_SEND);
    assert_eq!(rig.read(S_CMD), 3, "command status shows the failure");
}
