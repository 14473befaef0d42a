// Built-in 4×8 text glyphs, ASCII $20..$7F. Each row uses the low four
// bits, bit 3 being the leftmost pixel; rows 0 and 7 stay blank so lines
// of text keep a pixel of separation.

pub const GLYPH_W: usize = 4;
pub const GLYPH_H: usize = 8;

#[rustfmt::skip]
pub const FONT: [[u8; 8]; 96] = [
    [0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0], // space
    [0x0, 0x4, 0x4, 0x4, 0x4, 0x0, 0x4, 0x0], // !
    [0x0, 0xa, 0xa, 0x0, 0x0, 0x0, 0x0, 0x0], // "
    [0x0, 0xa, 0xe, 0xa, 0xe, 0xa, 0x0, 0x0], // #
    [0x0, 0x4, 0x6, 0xc, 0x6, 0xc, 0x4, 0x0], // $
    [0x0, 0xa, 0x2, 0x4, 0x8, 0xa, 0x0, 0x0], // %
    [0x0, 0x4, 0xa, 0x4, 0xa, 0x6, 0x0, 0x0], // &
    [0x0, 0x4, 0x4, 0x0, 0x0, 0x0, 0x0, 0x0], // '
    [0x0, 0x2, 0x4, 0x4, 0x4, 0x4, 0x2, 0x0], // (
    [0x0, 0x8, 0x4, 0x4, 0x4, 0x4, 0x8, 0x0], // )
    [0x0, 0x0, 0xa, 0x4, 0xa, 0x0, 0x0, 0x0], // *
    [0x0, 0x0, 0x4, 0xe, 0x4, 0x0, 0x0, 0x0], // +
    [0x0, 0x0, 0x0, 0x0, 0x0, 0x4, 0x8, 0x0], // ,
    [0x0, 0x0, 0x0, 0xe, 0x0, 0x0, 0x0, 0x0], // -
    [0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x4, 0x0], // .
    [0x0, 0x2, 0x2, 0x4, 0x8, 0x8, 0x0, 0x0], // /
    [0x0, 0x6, 0x9, 0x9, 0x9, 0x9, 0x6, 0x0], // 0
    [0x0, 0x4, 0xc, 0x4, 0x4, 0x4, 0xe, 0x0], // 1
    [0x0, 0xc, 0x2, 0x2, 0x4, 0x8, 0xe, 0x0], // 2
    [0x0, 0xc, 0x2, 0x4, 0x2, 0x2, 0xc, 0x0], // 3
    [0x0, 0xa, 0xa, 0xe, 0x2, 0x2, 0x2, 0x0], // 4
    [0x0, 0xe, 0x8, 0xc, 0x2, 0x2, 0xc, 0x0], // 5
    [0x0, 0x6, 0x8, 0xc, 0xa, 0xa, 0x4, 0x0], // 6
    [0x0, 0xe, 0x2, 0x2, 0x4, 0x4, 0x4, 0x0], // 7
    [0x0, 0x4, 0xa, 0x4, 0xa, 0xa, 0x4, 0x0], // 8
    [0x0, 0x4, 0xa, 0xa, 0x6, 0x2, 0xc, 0x0], // 9
    [0x0, 0x0, 0x4, 0x0, 0x0, 0x4, 0x0, 0x0], // :
    [0x0, 0x0, 0x4, 0x0, 0x0, 0x4, 0x8, 0x0], // ;
    [0x0, 0x2, 0x4, 0x8, 0x4, 0x2, 0x0, 0x0], // <
    [0x0, 0x0, 0xe, 0x0, 0xe, 0x0, 0x0, 0x0], // =
    [0x0, 0x8, 0x4, 0x2, 0x4, 0x8, 0x0, 0x0], // >
    [0x0, 0xc, 0x2, 0x4, 0x4, 0x0, 0x4, 0x0], // ?
    [0x0, 0x4, 0xa, 0xe, 0xe, 0x8, 0x6, 0x0], // @
    [0x0, 0x4, 0xa, 0xa, 0xe, 0xa, 0xa, 0x0], // A
    [0x0, 0xc, 0xa, 0xc, 0xa, 0xa, 0xc, 0x0], // B
    [0x0, 0x6, 0x8, 0x8, 0x8, 0x8, 0x6, 0x0], // C
    [0x0, 0xc, 0xa, 0xa, 0xa, 0xa, 0xc, 0x0], // D
    [0x0, 0xe, 0x8, 0xc, 0x8, 0x8, 0xe, 0x0], // E
    [0x0, 0xe, 0x8, 0xc, 0x8, 0x8, 0x8, 0x0], // F
    [0x0, 0x6, 0x8, 0x8, 0xa, 0xa, 0x6, 0x0], // G
    [0x0, 0xa, 0xa, 0xe, 0xa, 0xa, 0xa, 0x0], // H
    [0x0, 0xe, 0x4, 0x4, 0x4, 0x4, 0xe, 0x0], // I
    [0x0, 0x2, 0x2, 0x2, 0x2, 0xa, 0x4, 0x0], // J
    [0x0, 0xa, 0xa, 0xc, 0xa, 0xa, 0xa, 0x0], // K
    [0x0, 0x8, 0x8, 0x8, 0x8, 0x8, 0xe, 0x0], // L
    [0x0, 0xa, 0xe, 0xe, 0xa, 0xa, 0xa, 0x0], // M
    [0x0, 0xa, 0xe, 0xe, 0xe, 0xa, 0xa, 0x0], // N
    [0x0, 0x4, 0xa, 0xa, 0xa, 0xa, 0x4, 0x0], // O
    [0x0, 0xc, 0xa, 0xa, 0xc, 0x8, 0x8, 0x0], // P
    [0x0, 0x4, 0xa, 0xa, 0xa, 0xe, 0x6, 0x0], // Q
    [0x0, 0xc, 0xa, 0xa, 0xc, 0xa, 0xa, 0x0], // R
    [0x0, 0x6, 0x8, 0x4, 0x2, 0x2, 0xc, 0x0], // S
    [0x0, 0xe, 0x4, 0x4, 0x4, 0x4, 0x4, 0x0], // T
    [0x0, 0xa, 0xa, 0xa, 0xa, 0xa, 0x6, 0x0], // U
    [0x0, 0xa, 0xa, 0xa, 0xa, 0x4, 0x4, 0x0], // V
    [0x0, 0xa, 0xa, 0xa, 0xe, 0xe, 0xa, 0x0], // W
    [0x0, 0xa, 0xa, 0x4, 0xa, 0xa, 0xa, 0x0], // X
    [0x0, 0xa, 0xa, 0x4, 0x4, 0x4, 0x4, 0x0], // Y
    [0x0, 0xe, 0x2, 0x4, 0x8, 0x8, 0xe, 0x0], // Z
    [0x0, 0x6, 0x4, 0x4, 0x4, 0x4, 0x6, 0x0], // [
    [0x0, 0x8, 0x8, 0x4, 0x2, 0x2, 0x0, 0x0], // backslash
    [0x0, 0x6, 0x2, 0x2, 0x2, 0x2, 0x6, 0x0], // ]
    [0x0, 0x4, 0xa, 0x0, 0x0, 0x0, 0x0, 0x0], // ^
    [0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0xe, 0x0], // _
    [0x0, 0x8, 0x4, 0x0, 0x0, 0x0, 0x0, 0x0], // `
    [0x0, 0x0, 0x0, 0x6, 0xa, 0xa, 0x6, 0x0], // a
    [0x0, 0x8, 0x8, 0xc, 0xa, 0xa, 0xc, 0x0], // b
    [0x0, 0x0, 0x0, 0x6, 0x8, 0x8, 0x6, 0x0], // c
    [0x0, 0x2, 0x2, 0x6, 0xa, 0xa, 0x6, 0x0], // d
    [0x0, 0x0, 0x0, 0x4, 0xa, 0xc, 0x6, 0x0], // e
    [0x0, 0x2, 0x4, 0xe, 0x4, 0x4, 0x4, 0x0], // f
    [0x0, 0x0, 0x6, 0xa, 0x6, 0x2, 0xc, 0x0], // g
    [0x0, 0x8, 0x8, 0xc, 0xa, 0xa, 0xa, 0x0], // h
    [0x0, 0x4, 0x0, 0x4, 0x4, 0x4, 0x4, 0x0], // i
    [0x0, 0x2, 0x0, 0x2, 0x2, 0xa, 0x4, 0x0], // j
    [0x0, 0x8, 0x8, 0xa, 0xc, 0xa, 0xa, 0x0], // k
    [0x0, 0x4, 0x4, 0x4, 0x4, 0x4, 0x2, 0x0], // l
    [0x0, 0x0, 0x0, 0xa, 0xe, 0xa, 0xa, 0x0], // m
    [0x0, 0x0, 0x0, 0xc, 0xa, 0xa, 0xa, 0x0], // n
    [0x0, 0x0, 0x0, 0x4, 0xa, 0xa, 0x4, 0x0], // o
    [0x0, 0x0, 0xc, 0xa, 0xc, 0x8, 0x8, 0x0], // p
    [0x0, 0x0, 0x6, 0xa, 0x6, 0x2, 0x2, 0x0], // q
    [0x0, 0x0, 0x0, 0x6, 0x8, 0x8, 0x8, 0x0], // r
    [0x0, 0x0, 0x0, 0x6, 0xc, 0x2, 0xc, 0x0], // s
    [0x0, 0x4, 0x4, 0xe, 0x4, 0x4, 0x2, 0x0], // t
    [0x0, 0x0, 0x0, 0xa, 0xa, 0xa, 0x6, 0x0], // u
    [0x0, 0x0, 0x0, 0xa, 0xa, 0xa, 0x4, 0x0], // v
    [0x0, 0x0, 0x0, 0xa, 0xa, 0xe, 0xa, 0x0], // w
    [0x0, 0x0, 0x0, 0xa, 0x4, 0x4, 0xa, 0x0], // x
    [0x0, 0x0, 0xa, 0xa, 0x6, 0x2, 0xc, 0x0], // y
    [0x0, 0x0, 0x0, 0xe, 0x2, 0x4, 0xe, 0x0], // z
    [0x0, 0x6, 0x4, 0x8, 0x4, 0x4, 0x6, 0x0], // {
    [0x0, 0x4, 0x4, 0x4, 0x4, 0x4, 0x4, 0x0], // |
    [0x0, 0xc, 0x4, 0x2, 0x4, 0x4, 0xc, 0x0], // }
    [0x0, 0x0, 0x5, 0xa, 0x0, 0x0, 0x0, 0x0], // ~
    [0x0, 0xe, 0xe, 0xe, 0xe, 0xe, 0xe, 0x0], // del
];

/// Glyph rows for a character; anything outside the printable range gets
/// the block glyph.
pub fn glyph(ch: u8) -> &'static [u8; 8] {
    if (0x20..0x80).contains(&ch) {
        &FONT[ch as usize - 0x20]
    } else {
        &FONT[95]
    }
}
