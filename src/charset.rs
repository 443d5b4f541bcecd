//! Character-set conversion.
//!
//! A shared routine: optionally XOR-demasks input, trims leading spaces,
//! then either runs a table-driven converter (`encoding_rs`) or the
//! built-in SCSU decoder used by the v7+ family.

use crate::header::Charset;

/// XOR-demasks `data` (if `xor_mask != 0`), trims leading spaces, and
/// converts the remainder to UTF-8 using `charset`. Truncation on malformed
/// trailing sequences is permitted; this never fails outright, matching the
/// tolerant-parsing stance decoding takes everywhere else in this crate.
pub fn convert(data: &[u8], xor_mask: u8, charset: Charset) -> String {
    let mut buf = data.to_vec();
    if xor_mask != 0 {
        for b in buf.iter_mut() {
            *b ^= xor_mask;
        }
    }

    let first_non_space = buf.iter().position(|&b| b != b' ').unwrap_or(buf.len());
    let trimmed = &buf[first_non_space..];

    match charset {
        Charset::Macintosh => encoding_rs::MACINTOSH.decode(trimmed).0.into_owned(),
        Charset::Windows1252 => encoding_rs::WINDOWS_1252.decode(trimmed).0.into_owned(),
        Charset::Scsu => scsu::decode(trimmed),
    }
}

/// An intentionally compact SCSU (Standard Compression Scheme for Unicode,
/// UTS #6) decoder. No registry crate covers SCSU, so it is hand-rolled
/// here, the same way `EwfHeaderSection::decode` hand-rolls its own
/// ASCII/UTF-16LE fallback instead of reaching for a crate it doesn't need.
mod scsu {
    /// Static/initial-dynamic window offsets (UTS #6 table 1).
    const WINDOW_OFFSETS: [u32; 8] = [
        0x0000, 0x0080, 0x0100, 0x0300, 0x2000, 0x2080, 0x2100, 0x3000,
    ];

    /// Offsets selectable by a "define window" operand byte (UTS #6 table 2),
    /// indexed by `(byte - 0x01)` for `0x01..=0xA7`-ish ranges; bytes outside
    /// the covered ranges fall back to `byte as u32 * 0x80`.
    fn window_offset_for_index_byte(byte: u8) -> u32 {
        match byte {
            0x00 => 0x0000,
            0x01..=0x67 => 0x0080 + (byte as u32 - 0x01) * 0x80,
            0xF9 => 0x00C0,
            0xFA => 0x0250,
            0xFB => 0x0370,
            0xFC => 0x0530,
            0xFD => 0x3040,
            0xFE => 0x30A0,
            0xFF => 0xFF60,
            _ => byte as u32 * 0x80,
        }
    }

    pub fn decode(input: &[u8]) -> String {
        let mut out = String::with_capacity(input.len());
        let mut windows = WINDOW_OFFSETS;
        let mut active = 0usize;
        let mut unicode_mode = false;
        let mut i = 0usize;

        while i < input.len() {
            let b = input[i];

            if !unicode_mode {
                match b {
                    0x01..=0x08 => {
                        // SQ0..SQ7: quote one character from static window (b - 1).
                        let win = (b - 1) as usize;
                        if let Some(ch) = take_u8_into_window(input, &mut i, WINDOW_OFFSETS[win]) {
                            push_char(&mut out, ch);
                        } else {
                            break;
                        }
                    }
                    0x09 | 0x0A | 0x0D => {
                        out.push(b as char);
                        i += 1;
                    }
                    0x0E => {
                        // SQU: quote a full 16-bit unit verbatim.
                        i += 1;
                        if let Some(unit) = read_u16_be(input, &mut i) {
                            push_char(&mut out, unit as u32);
                        } else {
                            break;
                        }
                    }
                    0x0F => {
                        // SCU: switch to Unicode mode.
                        unicode_mode = true;
                        i += 1;
                    }
                    0x10..=0x17 => {
                        // SC0..SC7: change active window.
                        active = (b - 0x10) as usize;
                        i += 1;
                    }
                    0x18..=0x1F => {
                        // SD0..SD7: define a window, then switch to it.
                        let win = (b - 0x18) as usize;
                        i += 1;
                        let Some(&index_byte) = input.get(i) else { break };
                        i += 1;
                        windows[win] = window_offset_for_index_byte(index_byte);
                        active = win;
                    }
                    0x20..=0x7F => {
                        out.push(b as char);
                        i += 1;
                    }
                    0x80..=0xFF => {
                        // Implicit quote from the active dynamic window.
                        let code = windows[active] + (b as u32 - 0x80);
                        push_char(&mut out, code);
                        i += 1;
                    }
                    _ => {
                        // Remaining control bytes (0x00, 0x0B, 0x0C) pass through literally.
                        out.push(b as char);
                        i += 1;
                    }
                }
            } else {
                let Some(unit) = read_u16_be(input, &mut i) else { break };
                match unit {
                    0xE000..=0xE007 => {
                        // UC0..UC7: switch back to single-byte mode with window i.
                        active = (unit - 0xE000) as usize;
                        unicode_mode = false;
                    }
                    0xE008..=0xE00F => {
                        // UD0..UD7: define window i, then switch to single-byte mode.
                        let win = (unit - 0xE008) as usize;
                        let Some(&index_byte) = input.get(i) else { break };
                        i += 1;
                        windows[win] = window_offset_for_index_byte(index_byte);
                        active = win;
                        unicode_mode = false;
                    }
                    0xE010 => {
                        // UQU: quote the next 16-bit unit verbatim, stay in Unicode mode.
                        if let Some(next) = read_u16_be(input, &mut i) {
                            push_char(&mut out, next as u32);
                        } else {
                            break;
                        }
                    }
                    _ => push_char(&mut out, unit as u32),
                }
            }
        }

        out
    }

    fn take_u8_into_window(input: &[u8], i: &mut usize, window_offset: u32) -> Option<u32> {
        let b = *input.get(*i)?;
        *i += 1;
        Some(if b < 0x80 {
            b as u32
        } else {
            window_offset + (b as u32 - 0x80)
        })
    }

    fn read_u16_be(input: &[u8], i: &mut usize) -> Option<u16> {
        let hi = *input.get(*i)?;
        let lo = *input.get(*i + 1)?;
        *i += 2;
        Some(u16::from_be_bytes([hi, lo]))
    }

    fn push_char(out: &mut String, code_point: u32) {
        if let Some(ch) = char::from_u32(code_point) {
            out.push(ch);
        }
    }
}
