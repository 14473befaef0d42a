// Expansion memory: allocator behavior, the named-block directory, and
// the CPU-bus windows, driven through the register file the way a BASIC
// program would drive it.

use retro65::machine::Configuration;
use retro65::memory::Bus;

const BASE: u16 = 0xba00;
const CMD: u16 = BASE;
const STATUS: u16 = BASE + 1;
const ERR: u16 = BASE + 2;
const ADDR: u16 = BASE + 3;
const LEN: u16 = BASE + 6;
const CPUADDR: u16 = BASE + 9;
const HANDLE: u16 = BASE + 0x0b;
const FILL: u16 = BASE + 0x0d;
const WINEN: u16 = BASE + 0x16;
const WINBASE: u16 = BASE + 0x17;
const NAME: u16 = BASE + 0x24;

const ST_OK: u8 = 2;
const ST_ERROR: u8 = 3;
const ERR_NOT_FOUND: u8 = 3;
const ERR_END_OF_DIR: u8 = 6;

fn machine() -> Bus {
    let config = Configuration::new(vec![0u8; 0x4000]);
    retro65::machine::build_bus(&config)
}

fn set24(bus: &mut Bus, base: u16, value: u32) {
    bus.write(base, value as u8);
    bus.write(base + 1, (value >> 8) as u8);
    bus.write(base + 2, (value >> 16) as u8);
}

fn get24(bus: &mut Bus, base: u16) -> u32 {
    bus.read(base) as u32 | (bus.read(base + 1) as u32) << 8 | (bus.read(base + 2) as u32) << 16
}

fn set16(bus: &mut Bus, base: u16, value: u16) {
    bus.write(base, value as u8);
    bus.write(base + 1, (value >> 8) as u8);
}

fn set_name(bus: &mut Bus, name: &str) {
    for j in 0..28u16 {
        let byte = name.as_bytes().get(j as usize).copied().unwrap_or(0);
        bus.write(NAME + j, byte);
    }
}

#[test]
fn alloc_fill_fetch_round_trip() {
    let mut bus = machine();
    set24(&mut bus, LEN, 1000);
    bus.write(CMD, 1); // alloc
    assert_eq!(bus.read(STATUS), ST_OK);
    let addr = get24(&mut bus, ADDR);
    let handle = bus.read(HANDLE) as u16 | (bus.read(HANDLE + 1) as u16) << 8;
    assert_eq!(addr, 0, "first allocation sits at the arena base");
    assert_ne!(handle, 0);

    set24(&mut bus, ADDR, addr);
    set24(&mut bus, LEN, 1000);
    bus.write(FILL, 0xcd);
    bus.write(CMD, 5); // fill
    assert_eq!(bus.read(STATUS), ST_OK);

    set16(&mut bus, CPUADDR, 0x3000);
    bus.write(CMD, 4); // fetch
    assert_eq!(bus.read(STATUS), ST_OK);
    for j in 0..1000u16 {
        assert_eq!(bus.read(0x3000 + j), 0xcd, "offset {}", j);
    }
}

#[test]
fn alloc_finds_lowest_run_and_release_frees_overlaps() {
    let mut bus = machine();
    // three one-page blocks back to back
    for _ in 0..3 {
        set24(&mut bus, LEN, 256);
        bus.write(CMD, 1);
        assert_eq!(bus.read(STATUS), ST_OK);
    }
    // free the middle page
    set24(&mut bus, ADDR, 256);
    set24(&mut bus, LEN, 256);
    bus.write(CMD, 2); // release
    assert_eq!(bus.read(STATUS), ST_OK);
    // the next one-page allocation reuses it
    set24(&mut bus, LEN, 100);
    bus.write(CMD, 1);
    assert_eq!(bus.read(STATUS), ST_OK);
    assert_eq!(get24(&mut bus, ADDR), 256, "lowest free run wins");
    // a two-page request must skip past the occupied third page
    set24(&mut bus, LEN, 512);
    bus.write(CMD, 1);
    assert_eq!(get24(&mut bus, ADDR), 768);
}

#[test]
fn named_block_round_trip_and_directory() {
    let mut bus = machine();
    // payload in CPU RAM
    for j in 0..100u16 {
        bus.write(0x4000 + j, (j % 251) as u8);
    }
    set_name(&mut bus, "  SAVEGAME  "); // names are trimmed
    set16(&mut bus, CPUADDR, 0x4000);
    set24(&mut bus, LEN, 100);
    bus.write(CMD, 6); // nstash
    assert_eq!(bus.read(STATUS), ST_OK);

    set_name(&mut bus, "SAVEGAME");
    set16(&mut bus, CPUADDR, 0x5000);
    bus.write(CMD, 7); // nfetch
    assert_eq!(bus.read(STATUS), ST_OK);
    assert_eq!(get24(&mut bus, LEN), 100);
    for j in 0..100u16 {
        assert_eq!(bus.read(0x5000 + j), (j % 251) as u8);
    }

    // the directory lists it exactly once
    bus.write(CMD, 9); // ndiropen
    bus.write(CMD, 10); // ndirread
    assert_eq!(bus.read(STATUS), ST_OK);
    let mut listed = String::new();
    for j in 0..28u16 {
        let byte = bus.read(NAME + j);
        if byte == 0 {
            break;
        }
        listed.push(byte as char);
    }
    assert_eq!(listed, "SAVEGAME");
    bus.write(CMD, 10);
    assert_eq!(bus.read(STATUS), ST_ERROR);
    assert_eq!(bus.read(ERR), ERR_END_OF_DIR);
}

#[test]
fn nstash_replaces_in_place_when_it_fits() {
    let mut bus = machine();
    bus.write(0x4000, 0x11);
    set_name(&mut bus, "BLOCK");
    set16(&mut bus, CPUADDR, 0x4000);
    set24(&mut bus, LEN, 64);
    bus.write(CMD, 6);
    let first = bus.read(HANDLE);

    bus.write(0x4000, 0x22);
    set24(&mut bus, LEN, 128); // still inside one page
    bus.write(CMD, 6);
    assert_eq!(bus.read(STATUS), ST_OK);
    assert_eq!(bus.read(HANDLE), first, "the handle survives an in-place replace");

    set16(&mut bus, CPUADDR, 0x5000);
    bus.write(CMD, 7);
    assert_eq!(get24(&mut bus, LEN), 128);
    assert_eq!(bus.read(0x5000), 0x22);
}

#[test]
fn delete_and_not_found() {
    let mut bus = machine();
    bus.write(0x4000, 0x5a);
    set_name(&mut bus, "GONE");
    set16(&mut bus, CPUADDR, 0x4000);
    set24(&mut bus, LEN, 10);
    bus.write(CMD, 6);
    bus.write(CMD, 8); // ndelete
    assert_eq!(bus.read(STATUS), ST_OK);
    bus.write(CMD, 7); // nfetch
    assert_eq!(bus.read(STATUS), ST_ERROR);
    assert_eq!(bus.read(ERR), ERR_NOT_FOUND);
}

#[test]
fn name_validation() {
    let mut bus = machine();
    set_name(&mut bus, "    ");
    set16(&mut bus, CPUADDR, 0x4000);
    set24(&mut bus, LEN, 10);
    bus.write(CMD, 6);
    assert_eq!(bus.read(STATUS), ST_ERROR);
    assert_eq!(bus.read(ERR), 5, "blank names are refused");
}

#[test]
fn windows_map_arena_pages_onto_the_bus() {
    let mut bus = machine();
    // stash a known byte at arena address $000500 via fill
    set24(&mut bus, ADDR, 0x500);
    set24(&mut bus, LEN, 1);
    bus.write(FILL, 0x77);
    bus.write(CMD, 5);

    // window 0 at base $000500, enabled
    bus.write(WINBASE, 0x00);
    bus.write(WINBASE + 1, 0x05);
    bus.write(WINBASE + 2, 0x00);
    bus.write(WINEN, 0x01);
    assert_eq!(bus.read(0xbc00), 0x77);

    // writes go through while enabled
    bus.write(0xbc10, 0x99);
    set16(&mut bus, CPUADDR, 0x6000);
    set24(&mut bus, ADDR, 0x510);
    set24(&mut bus, LEN, 1);
    bus.write(CMD, 4); // fetch
    assert_eq!(bus.read(0x6000), 0x99);

    // disabled windows read as zero and drop writes
    bus.write(WINEN, 0x00);
    assert_eq!(bus.read(0xbc00), 0x00);
    bus.write(0xbc00, 0x55);
    bus.write(WINEN, 0x01);
    assert_eq!(bus.read(0xbc00), 0x77, "the disabled write was dropped");
}

#[test]
fn stats_registers_refresh() {
    let mut bus = machine();
    set24(&mut bus, LEN, 1000); // four pages
    bus.write(CMD, 1);
    bus.write(CMD, 11); // stats
    let used = bus.read(BASE + 0x11) as u16 | (bus.read(BASE + 0x12) as u16) << 8;
    let free = bus.read(BASE + 0x0f) as u16 | (bus.read(BASE + 0x10) as u16) << 8;
    assert_eq!(used, 4);
    assert_eq!(free, 2048 - 4);
}
