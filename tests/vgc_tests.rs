// Graphics controller: command port primitives, the scroll-wrap law,
// sprite collisions, copper timing, and the character terminal.

use retro65::machine::Configuration;
use retro65::vgc::{
    self, render_frame, VgcState, CMD_COPADD, CMD_COPON, CMD_GCOLOR, CMD_LINE, CMD_MEMRD,
    CMD_MEMWR, CMD_PLOT, CMD_SHROW, CMD_SPREN, CMD_SPRPOS, FB_H, FB_W, PALETTE, REG_SCRLX,
    REG_SCRLY, SCREEN_H, SCREEN_W, TEXT_COLS, TEXT_ROWS,
};

fn fb() -> Vec<u32> {
    vec![0u32; FB_W * FB_H]
}

fn set_params(state: &mut VgcState, params: &[u8]) {
    for (j, &p) in params.iter().enumerate() {
        state.params[j] = p;
    }
}

fn run_command(state: &mut VgcState, cmd: u8, params: &[u8]) {
    set_params(state, params);
    state.execute(cmd);
}

#[test]
fn line_command_draws_bresenham_endpoints() {
    let mut state = VgcState::new();
    run_command(&mut state, CMD_GCOLOR, &[1]);
    // (0,0) .. (319,199)
    run_command(&mut state, CMD_LINE, &[0, 0, 0, 63, 1, 199]);
    assert_eq!(state.pixel(0, 0), 1);
    assert_eq!(state.pixel(319, 199), 1);
    // the diagonal has exactly one lit pixel on the first column band
    assert_eq!(state.pixel(0, 199), 0);
    assert_eq!(state.pixel(319, 0), 0);
    let lit: usize = (0..SCREEN_W * SCREEN_H).filter(|&j| state.gfx[j] != 0).count();
    assert!(lit >= 320, "a full-diagonal line lights at least one pixel per column");

    // PLOT with draw color 0 clears exactly the specified pixel
    run_command(&mut state, CMD_GCOLOR, &[0]);
    run_command(&mut state, CMD_PLOT, &[0, 0, 0]);
    assert_eq!(state.pixel(0, 0), 0);
    assert_eq!(state.pixel(1, 1), 1, "the neighbour on the diagonal survives");
}

#[test]
fn scroll_wrap_law() {
    let mut state = VgcState::new();
    // a recognizable block glyph at column 10, row 5
    state.char_ram[5 * TEXT_COLS + 10] = 0x7f;
    state.color_ram[5 * TEXT_COLS + 10] = 3;

    let mut scrolled = state.regs;
    scrolled[REG_SCRLX] = 3;
    scrolled[REG_SCRLY] = 7;
    let flat = state.regs;

    for x in 0..SCREEN_W {
        for y in (0..SCREEN_H).step_by(3) {
            let col = (x / 4 + 3) % TEXT_COLS;
            let row = (y / 8 + 7) % TEXT_ROWS;
            let equivalent_x = col * 4 + x % 4;
            let equivalent_y = row * 8 + y % 8;
            assert_eq!(
                state.text_pixel(x, y, &scrolled),
                state.text_pixel(equivalent_x, equivalent_y, &flat),
                "({}, {})",
                x,
                y
            );
        }
    }
}

#[test]
fn sprite_collisions_accumulate_and_clear_on_read() {
    let config = Configuration::new(vec![0u8; 0x4000]);
    let mut bus = retro65::machine::build_bus(&config);
    {
        let mut state = config.shared.vgc.lock().unwrap();
        // shape 0: a solid 16×16 block of color 1
        for row in 0..16 {
            run_command(
                &mut state,
                CMD_SHROW,
                &[0, row, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11],
            );
        }
        // sprites 0 and 1 overlap at (50, 50)..; sprite 2 sits far away
        run_command(&mut state, CMD_SPRPOS, &[0, 50, 0, 50, 0]);
        run_command(&mut state, CMD_SPREN, &[0, 1]);
        run_command(&mut state, CMD_SPRPOS, &[1, 58, 0, 58, 0]);
        run_command(&mut state, CMD_SPREN, &[1, 1]);
        run_command(&mut state, CMD_SPRPOS, &[2, 200, 0, 100, 0]);
        run_command(&mut state, CMD_SPREN, &[2, 1]);
        // background color under sprite 2 only
        state.gfx[100 * SCREEN_W + 205] = 9;

        let mut frame = fb();
        render_frame(&mut state, &mut frame);
        assert_eq!(state.coll_ss & 0x0007, 0x0003, "sprites 0 and 1 collide");
        assert_eq!(state.coll_sb & 0x0007, 0x0004, "sprite 2 touches the bitmap");
    }
    // CPU reads return the accumulated mask and clear what they return
    assert_eq!(bus.read(0xa00a), 0x03);
    assert_eq!(bus.read(0xa00a), 0x00);
    assert_eq!(bus.read(0xa00c), 0x04);
    assert_eq!(bus.read(0xa00c), 0x00);
}

#[test]
fn copper_scroll_split_frame() {
    let mut state = VgcState::new();
    state.regs[0] = 3; // graphics + sprites mode
    for y in 0..SCREEN_H {
        state.gfx[y * SCREEN_W] = 5; // stripe in column 0
    }
    let pos = (100 * SCREEN_W) as u16;
    run_command(
        &mut state,
        CMD_COPADD,
        &[pos as u8, (pos >> 8) as u8, REG_SCRLX as u8, 8],
    );
    run_command(&mut state, CMD_COPON, &[]);

    let mut frame = fb();
    render_frame(&mut state, &mut frame);
    // above the event: stripe at x=0
    assert_eq!(frame[50 * 2 * FB_W], PALETTE[5]);
    // below the event the plane is shifted by 8: the stripe appears at 312
    assert_eq!(frame[150 * 2 * FB_W + 312 * 2], PALETTE[5]);
    assert_eq!(frame[150 * 2 * FB_W], PALETTE[0]);
}

#[test]
fn copper_add_replaces_same_position_same_register() {
    let mut state = VgcState::new();
    run_command(&mut state, CMD_COPADD, &[0, 0, REG_SCRLX as u8, 8]);
    run_command(&mut state, CMD_COPADD, &[0, 0, REG_SCRLY as u8, 2]);
    run_command(&mut state, CMD_COPADD, &[0, 0, REG_SCRLX as u8, 12]);
    let events = state.active_events();
    assert_eq!(events.len(), 2, "same (position, register) merges");
    assert_eq!(events[0].val, 12, "replacement happens in place");
    assert_eq!(events[1].reg, REG_SCRLY as u8, "insertion order is preserved");
}

#[test]
fn copper_swap_waits_for_vblank() {
    let mut state = VgcState::new();
    run_command(&mut state, vgc::CMD_COPTARGET, &[1]);
    run_command(&mut state, CMD_COPADD, &[0, 0, REG_SCRLX as u8, 4]);
    run_command(&mut state, vgc::CMD_COPSWAP, &[1]);
    assert!(state.active_events().is_empty(), "swap is staged, not immediate");
    let mut frame = fb();
    render_frame(&mut state, &mut frame);
    assert_eq!(state.active_events().len(), 1, "the vblank applied the swap");
}

#[test]
fn character_terminal_wraps_and_scrolls() {
    let mut state = VgcState::new();
    state.regs[2] = 7; // default foreground

    for _ in 0..82 {
        state.putchar(b'a');
    }
    assert_eq!(state.regs[3], 2, "wrapped at column 80");
    assert_eq!(state.regs[4], 1);
    assert_eq!(state.char_ram[TEXT_COLS], b'a');

    // backspace rubs out
    state.putchar(0x08);
    assert_eq!(state.regs[3], 1);
    assert_eq!(state.char_ram[TEXT_COLS + 1], 0x20);

    // line feeds until the screen scrolls
    state.char_ram[0] = b'x';
    for _ in 0..30 {
        state.putchar(0x0a);
    }
    assert_eq!(state.regs[4], TEXT_ROWS as u8 - 1);
    assert_eq!(state.char_ram[0], 0x20, "row zero scrolled away");

    // carriage return goes to column 0 and advances
    state.regs[3] = 15;
    state.putchar(0x0d);
    assert_eq!(state.regs[3], 0);

    // form feed clears and homes
    state.putchar(0x0c);
    assert_eq!(state.regs[3], 0);
    assert_eq!(state.regs[4], 0);
    assert!(state.char_ram.iter().all(|&c| c == 0x20));
}

#[test]
fn memory_io_commands_with_post_increment() {
    let mut state = VgcState::new();
    // write two bytes into the graphics plane at $000100 with increment
    run_command(&mut state, CMD_MEMWR, &[2, 0x00, 0x01, 0x00, 9, 1]);
    assert_eq!(state.params[1], 0x01, "address advanced");
    run_command(&mut state, CMD_MEMWR, &[2, 0x01, 0x01, 0x00, 7, 0]);
    assert_eq!(state.gfx[0x100], 9);
    assert_eq!(state.gfx[0x101], 7);

    run_command(&mut state, CMD_MEMRD, &[2, 0x00, 0x01, 0x00, 1]);
    assert_eq!(state.params[13], 9, "read lands in the data register");
    assert_eq!(state.params[1], 0x01, "post-increment applied");
}

#[test]
fn mode_composition_orders_layers() {
    let mut state = VgcState::new();
    state.regs[0] = 2; // text over graphics
    state.regs[1] = 0; // background
    state.gfx.iter_mut().for_each(|p| *p = 4);
    // a block glyph so the text plane is lit at a known pixel
    state.char_ram[0] = 0x7f;
    state.color_ram[0] = 7;
    let mut frame = fb();
    render_frame(&mut state, &mut frame);
    // glyph row 1, column 0..2 carries the block; text wins over graphics
    assert_eq!(frame[2 * FB_W], PALETTE[7]);
    // row 0 of the glyph is blank: graphics shows through
    assert_eq!(frame[0], PALETTE[4]);

    // in graphics-only mode the text plane is gone
    state.regs[0] = 3;
    render_frame(&mut state, &mut frame);
    assert_eq!(frame[2 * FB_W], PALETTE[4]);
}

#[test]
fn frame_counter_ticks_per_rendered_frame() {
    let mut state = VgcState::new();
    let mut frame = fb();
    let before = state.frame;
    render_frame(&mut state, &mut frame);
    render_frame(&mut state, &mut frame);
    assert_eq!(state.frame, before.wrapping_add(2));
}
