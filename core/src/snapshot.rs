//! Binary snapshot wire format: a compact encoding of a [`ScreenSnapshot`] for clients that ask
//! for `Accept: application/octet-stream`.
//!
//! Header (28 bytes, little-endian): magic `0x5654` ("VT"), version `0x01`, flags `0x00`, then
//! cols/rows/viewport_y/cursor_x/cursor_y/reserved as defined below. The row stream that follows
//! is a sequence of either an empty-row run (`0xFE <count>`, runs of consecutive blank rows
//! collapsed into one marker) or an explicit row (`0xFD <cell_count> <cells...>`, with trailing
//! blank cells trimmed from the row).

use crate::error::{CoreError, CoreResult};
use crate::vt::{Cell, CellFlags, Color, ScreenSnapshot};

const MAGIC: u16 = 0x5654;
const VERSION: u8 = 0x01;
const HEADER_LEN: usize = 28;

const MARK_EMPTY_ROW: u8 = 0xFE;
const MARK_ROW: u8 = 0xFD;

const CELL_HAS_EXT: u8 = 0b1000_0000;
const CELL_UNICODE: u8 = 0b0100_0000;
const CELL_HAS_FG: u8 = 0b0010_0000;
const CELL_HAS_BG: u8 = 0b0001_0000;
const CELL_FG_RGB: u8 = 0b0000_1000;
const CELL_BG_RGB: u8 = 0b0000_0100;
const CELL_KIND_MASK: u8 = 0b0000_0011;
const CELL_KIND_SPACE: u8 = 0b00;
const CELL_KIND_ASCII: u8 = 0b01;
const CELL_KIND_UNICODE: u8 = 0b10;

/// Encodes a screen snapshot into the binary frame described above.
pub fn encode(snapshot: &ScreenSnapshot) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + (snapshot.cols as usize * snapshot.rows as usize));

    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(VERSION);
    out.push(0x00); // flags
    out.extend_from_slice(&snapshot.cols.to_le_bytes());
    out.extend_from_slice(&snapshot.rows.to_le_bytes());
    out.extend_from_slice(&snapshot.viewport_y.to_le_bytes());
    out.extend_from_slice(&snapshot.cursor_x.to_le_bytes());
    out.extend_from_slice(&snapshot.cursor_y.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved

    debug_assert_eq!(out.len(), HEADER_LEN);

    let mut empty_run: u32 = 0;
    for row in &snapshot.cells {
        let last_non_blank = row.iter().rposition(|c| !c.is_blank());
        match last_non_blank {
            None => {
                empty_run += 1;
            }
            Some(last) => {
                flush_pending_empty(&mut out, &mut empty_run);
                let cells = &row[..=last];
                out.push(MARK_ROW);
                out.extend_from_slice(&(cells.len() as u16).to_le_bytes());
                for cell in cells {
                    encode_cell(&mut out, cell);
                }
            }
        }
    }
    flush_pending_empty(&mut out, &mut empty_run);

    out
}

fn flush_pending_empty(out: &mut Vec<u8>, empty_run: &mut u32) {
    while *empty_run > 0 {
        let chunk = (*empty_run).min(u8::MAX as u32);
        out.push(MARK_EMPTY_ROW);
        out.push(chunk as u8);
        *empty_run -= chunk;
    }
}

fn encode_cell(out: &mut Vec<u8>, cell: &Cell) {
    if cell.is_blank() {
        out.push(0x00);
        return;
    }

    let has_style = !cell.flags.is_empty() || cell.fg != Color::Default || cell.bg != Color::Default;
    let mut type_byte = 0u8;
    if has_style {
        type_byte |= CELL_HAS_EXT;
    }
    let is_ascii = cell.ch.is_ascii();
    if !is_ascii {
        type_byte |= CELL_UNICODE;
    }
    type_byte |= if cell.fg != Color::Default { CELL_HAS_FG } else { 0 };
    type_byte |= if cell.bg != Color::Default { CELL_HAS_BG } else { 0 };
    if matches!(cell.fg, Color::Rgb(..)) {
        type_byte |= CELL_FG_RGB;
    }
    if matches!(cell.bg, Color::Rgb(..)) {
        type_byte |= CELL_BG_RGB;
    }
    type_byte |= if is_ascii { CELL_KIND_ASCII } else { CELL_KIND_UNICODE };

    out.push(type_byte);

    if is_ascii {
        out.push(cell.ch as u8);
    } else {
        let mut buf = [0u8; 4];
        let s = cell.ch.encode_utf8(&mut buf);
        out.push(s.len() as u8);
        out.extend_from_slice(s.as_bytes());
    }

    if has_style {
        out.push(cell.flags.bits());
        if cell.fg != Color::Default {
            encode_color(out, cell.fg);
        }
        if cell.bg != Color::Default {
            encode_color(out, cell.bg);
        }
    }
}

fn encode_color(out: &mut Vec<u8>, color: Color) {
    match color {
        Color::Palette(p) => out.push(p),
        Color::Rgb(r, g, b) => out.extend_from_slice(&[r, g, b]),
        Color::Default => {}
    }
}

/// Decodes a frame produced by [`encode`]. Only used by tests to verify the round-trip law, but
/// kept as part of the public API since any client implementing this wire format needs the same
/// logic.
pub fn decode(bytes: &[u8]) -> CoreResult<ScreenSnapshot> {
    if bytes.len() < HEADER_LEN {
        return Err(CoreError::InvalidRequest("snapshot frame shorter than header".into()));
    }
    let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
    if magic != MAGIC {
        return Err(CoreError::InvalidRequest("bad snapshot magic".into()));
    }
    let version = bytes[2];
    if version != VERSION {
        return Err(CoreError::InvalidRequest(format!("unsupported snapshot version {version}")));
    }
    let cols = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let rows = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let viewport_y = i32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let cursor_x = i32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let cursor_y = i32::from_le_bytes(bytes[20..24].try_into().unwrap());

    let mut cells: Vec<Vec<Cell>> = Vec::with_capacity(rows as usize);
    let mut pos = HEADER_LEN;
    while cells.len() < rows as usize && pos < bytes.len() {
        let marker = bytes[pos];
        pos += 1;
        match marker {
            MARK_EMPTY_ROW => {
                let count = *bytes.get(pos).ok_or_else(truncated)? as usize;
                pos += 1;
                for _ in 0..count {
                    cells.push(vec![Cell::default(); cols as usize]);
                }
            }
            MARK_ROW => {
                let count = u16::from_le_bytes(bytes.get(pos..pos + 2).ok_or_else(truncated)?.try_into().unwrap()) as usize;
                pos += 2;
                let mut row = vec![Cell::default(); cols as usize];
                for slot in row.iter_mut().take(count) {
                    let (cell, consumed) = decode_cell(&bytes[pos..])?;
                    *slot = cell;
                    pos += consumed;
                }
                cells.push(row);
            }
            other => {
                return Err(CoreError::InvalidRequest(format!("unknown row marker 0x{other:02x}")));
            }
        }
    }
    while cells.len() < rows as usize {
        cells.push(vec![Cell::default(); cols as usize]);
    }

    Ok(ScreenSnapshot { cols, rows, viewport_y, cursor_x, cursor_y, cells })
}

fn truncated() -> CoreError {
    CoreError::InvalidRequest("truncated snapshot frame".into())
}

fn decode_cell(bytes: &[u8]) -> CoreResult<(Cell, usize)> {
    let type_byte = *bytes.first().ok_or_else(truncated)?;
    if type_byte == 0x00 {
        return Ok((Cell::default(), 1));
    }
    let mut pos = 1;
    let has_ext = type_byte & CELL_HAS_EXT != 0;
    let kind = type_byte & CELL_KIND_MASK;

    let ch = match kind {
        CELL_KIND_SPACE => ' ',
        CELL_KIND_ASCII => {
            let b = *bytes.get(pos).ok_or_else(truncated)?;
            pos += 1;
            b as char
        }
        CELL_KIND_UNICODE => {
            let len = *bytes.get(pos).ok_or_else(truncated)? as usize;
            pos += 1;
            let slice = bytes.get(pos..pos + len).ok_or_else(truncated)?;
            pos += len;
            std::str::from_utf8(slice)
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::REPLACEMENT_CHARACTER)
        }
        _ => ' ',
    };

    let mut flags = CellFlags::empty();
    let mut fg = Color::Default;
    let mut bg = Color::Default;

    if has_ext {
        let flag_byte = *bytes.get(pos).ok_or_else(truncated)?;
        pos += 1;
        flags = CellFlags::from_bits_truncate(flag_byte);

        if type_byte & CELL_HAS_FG != 0 {
            if type_byte & CELL_FG_RGB != 0 {
                let slice = bytes.get(pos..pos + 3).ok_or_else(truncated)?;
                fg = Color::Rgb(slice[0], slice[1], slice[2]);
                pos += 3;
            } else {
                fg = Color::Palette(*bytes.get(pos).ok_or_else(truncated)?);
                pos += 1;
            }
        }
        if type_byte & CELL_HAS_BG != 0 {
            if type_byte & CELL_BG_RGB != 0 {
                let slice = bytes.get(pos..pos + 3).ok_or_else(truncated)?;
                bg = Color::Rgb(slice[0], slice[1], slice[2]);
                pos += 3;
            } else {
                bg = Color::Palette(*bytes.get(pos).ok_or_else(truncated)?);
                pos += 1;
            }
        }
    }

    Ok((Cell { ch, fg, bg, flags, width: 1 }, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_2x1_matches_documented_frame() {
        let snapshot = ScreenSnapshot {
            cols: 2,
            rows: 1,
            viewport_y: 0,
            cursor_x: 0,
            cursor_y: 0,
            cells: vec![vec![Cell::default(); 2]],
        };
        let encoded = encode(&snapshot);
        let expected: Vec<u8> = vec![
            0x54, 0x56, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0xFE, 0x01,
        ];
        assert_eq!(encoded, expected);
    }

    #[test]
    fn round_trip_preserves_styled_cells() {
        let mut row = vec![Cell::default(); 5];
        row[0] = Cell { ch: 'h', fg: Color::Palette(2), bg: Color::Default, flags: CellFlags::BOLD, width: 1 };
        row[1] = Cell { ch: 'i', fg: Color::Rgb(10, 20, 30), bg: Color::Default, flags: CellFlags::empty(), width: 1 };
        let snapshot = ScreenSnapshot { cols: 5, rows: 1, viewport_y: 0, cursor_x: 2, cursor_y: 0, cells: vec![row] };
        let decoded = decode(&encode(&snapshot)).unwrap();
        assert_eq!(decoded.cols, 5);
        assert_eq!(decoded.cursor_x, 2);
        assert_eq!(decoded.cells[0][0].ch, 'h');
        assert_eq!(decoded.cells[0][0].fg, Color::Palette(2));
        assert_eq!(decoded.cells[0][1].fg, Color::Rgb(10, 20, 30));
    }

    #[test]
    fn trailing_blank_rows_are_trimmed() {
        let snapshot = ScreenSnapshot {
            cols: 3,
            rows: 4,
            viewport_y: 0,
            cursor_x: 0,
            cursor_y: 0,
            cells: vec![vec![Cell::default(); 3]; 4],
        };
        let encoded = encode(&snapshot);
        assert_eq!(&encoded[HEADER_LEN..], &[MARK_EMPTY_ROW, 4]);
    }
}
